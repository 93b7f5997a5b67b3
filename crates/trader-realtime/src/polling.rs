//! 적응형 폴링 스케줄러.
//!
//! 스냅샷 조회를 반복 실행하며 간격을 조절합니다.
//!
//! - 페이지가 숨겨졌거나 사용자가 비활성이면 기본 간격 × `idle_multiplier`
//! - 실패하면 연속 실패 횟수에 비례해 간격을 넓히되 상한(`max_interval`)을 넘지 않음
//! - 성공하면 다시 기본 간격으로 복귀
//!
//! 스케줄러당 대기 중인 타이머는 항상 하나입니다. 핸들을 멈추거나 drop하면
//! 더 이상 조회가 실행되지 않고, 진행 중이던 조회의 결과도 버려집니다.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, warn, Instrument};
use trader_core::PollingConfig;

use crate::error::SyncResult;

/// 페이지/사용자 활동 상태.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Activity {
    /// 페이지가 보이는지
    pub page_visible: bool,
    /// 사용자가 활동 중인지
    pub user_active: bool,
}

impl Default for Activity {
    fn default() -> Self {
        Self {
            page_visible: true,
            user_active: true,
        }
    }
}

impl Activity {
    /// 유휴 상태 (숨김 또는 비활성).
    pub fn is_idle(&self) -> bool {
        !self.page_visible || !self.user_active
    }
}

/// 활동 상태 공급자.
///
/// UI 쪽에서 가시성/활동 변화를 알려주면 모든 폴러가 즉시 간격을 다시 계산합니다.
#[derive(Debug, Clone)]
pub struct ActivityMonitor {
    tx: Arc<watch::Sender<Activity>>,
}

impl Default for ActivityMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivityMonitor {
    /// 활성 상태로 시작.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Activity::default());
        Self { tx: Arc::new(tx) }
    }

    /// 전체 상태 설정.
    pub fn set(&self, activity: Activity) {
        self.tx.send_if_modified(|current| {
            let changed = *current != activity;
            *current = activity;
            changed
        });
    }

    /// 페이지 가시성 설정.
    pub fn set_page_visible(&self, visible: bool) {
        self.set(Activity {
            page_visible: visible,
            ..self.current()
        });
    }

    /// 사용자 활동 설정.
    pub fn set_user_active(&self, active: bool) {
        self.set(Activity {
            user_active: active,
            ..self.current()
        });
    }

    /// 현재 상태.
    pub fn current(&self) -> Activity {
        *self.tx.borrow()
    }

    /// 변경 수신기.
    pub fn subscribe(&self) -> watch::Receiver<Activity> {
        self.tx.subscribe()
    }
}

/// 폴링 간격 정책.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSchedule {
    /// 기본 간격
    pub base_interval: Duration,
    /// 실패 시 간격 상한
    pub max_interval: Duration,
    /// 유휴 배수
    pub idle_multiplier: u32,
}

impl Default for PollSchedule {
    fn default() -> Self {
        Self::from(&PollingConfig::default())
    }
}

impl From<&PollingConfig> for PollSchedule {
    fn from(config: &PollingConfig) -> Self {
        Self {
            base_interval: config.base_interval(),
            max_interval: config.max_interval(),
            idle_multiplier: config.idle_multiplier,
        }
    }
}

impl PollSchedule {
    /// 새 정책 생성.
    pub fn new(base_interval: Duration, max_interval: Duration, idle_multiplier: u32) -> Self {
        Self {
            base_interval,
            max_interval,
            idle_multiplier,
        }
    }

    /// 다음 조회까지의 간격.
    ///
    /// 유휴 배수는 상한과 무관하게 적용되며, 실패 확장은 `max_interval`
    /// (유휴 간격이 더 크면 유휴 간격)까지만 넓어집니다.
    pub fn next_interval(&self, activity: Activity, failures: u32) -> Duration {
        let multiplier = if activity.is_idle() {
            self.idle_multiplier.max(1)
        } else {
            1
        };
        let interval = self.base_interval.saturating_mul(multiplier);
        if failures == 0 {
            return interval;
        }

        let ceiling = self.max_interval.max(interval);
        interval
            .saturating_mul(failures.saturating_add(1))
            .min(ceiling)
    }
}

/// 실행 중인 폴러 핸들.
///
/// drop하면 폴러가 멈춥니다.
#[derive(Debug)]
pub struct PollHandle {
    name: &'static str,
    cancel: CancellationToken,
    trigger: Arc<Notify>,
    task: JoinHandle<()>,
}

impl PollHandle {
    /// 대기 중인 타이머를 건너뛰고 즉시 조회.
    ///
    /// 조회가 진행 중이면 끝난 직후 한 번 더 조회합니다.
    pub fn trigger_now(&self) {
        self.trigger.notify_one();
    }

    /// 폴러 중지. 여러 번 호출해도 안전합니다.
    pub fn stop(&self) {
        if !self.cancel.is_cancelled() {
            debug!(poller = self.name, "폴러 중지");
            self.cancel.cancel();
        }
    }

    /// 중지 여부.
    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// 폴러 이름.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// 태스크가 완전히 끝났는지.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// 폴러 시작.
///
/// 첫 조회는 즉시 실행됩니다. 조회 결과는 성공이든 실패든 `deliver`로
/// 넘어가며, 실패하면 간격을 넓힙니다.
pub fn spawn_poller<T, F, Fut, D>(
    name: &'static str,
    schedule: PollSchedule,
    activity: watch::Receiver<Activity>,
    fetch: F,
    deliver: D,
) -> PollHandle
where
    T: Send + 'static,
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = SyncResult<T>> + Send + 'static,
    D: Fn(SyncResult<T>) + Send + 'static,
{
    let cancel = CancellationToken::new();
    let trigger = Arc::new(Notify::new());

    let poller = Poller {
        schedule,
        activity,
        cancel: cancel.clone(),
        trigger: Arc::clone(&trigger),
    };
    let task = tokio::spawn(
        poller
            .run(fetch, deliver)
            .instrument(info_span!("poller", poller = name)),
    );

    PollHandle {
        name,
        cancel,
        trigger,
        task,
    }
}

struct Poller {
    schedule: PollSchedule,
    activity: watch::Receiver<Activity>,
    cancel: CancellationToken,
    trigger: Arc<Notify>,
}

impl Poller {
    async fn run<T, F, Fut, D>(mut self, fetch: F, deliver: D)
    where
        F: Fn() -> Fut,
        Fut: Future<Output = SyncResult<T>>,
        D: Fn(SyncResult<T>),
    {
        let mut failures: u32 = 0;
        let mut activity_open = true;

        loop {
            let result = tokio::select! {
                _ = self.cancel.cancelled() => return,
                result = fetch() => result,
            };
            // 중지 이후 끝난 조회는 반영하지 않음
            if self.cancel.is_cancelled() {
                debug!("중지된 폴러의 결과 폐기");
                return;
            }

            match &result {
                Ok(_) => {
                    if failures > 0 {
                        debug!(failures, "폴링 복구");
                    }
                    failures = 0;
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    if e.is_auth_error() {
                        warn!(error = %e, failures, "폴링 인증 실패");
                    } else {
                        warn!(error = %e, failures, "폴링 실패");
                    }
                }
            }
            deliver(result);

            let polled_at = Instant::now();
            let interval = self.schedule.next_interval(*self.activity.borrow(), failures);
            debug!(interval_ms = interval.as_millis() as u64, "다음 폴링 예약");

            let timer = sleep_until(polled_at + interval);
            tokio::pin!(timer);

            loop {
                tokio::select! {
                    _ = self.cancel.cancelled() => return,
                    _ = self.trigger.notified() => break,
                    _ = &mut timer => break,
                    changed = self.activity.changed(), if activity_open => {
                        if changed.is_err() {
                            activity_open = false;
                            continue;
                        }
                        let activity = *self.activity.borrow_and_update();
                        let interval = self.schedule.next_interval(activity, failures);
                        debug!(
                            idle = activity.is_idle(),
                            interval_ms = interval.as_millis() as u64,
                            "활동 상태 변경, 폴링 재예약"
                        );
                        timer.as_mut().reset(polled_at + interval);
                    }
                }
            }
        }
    }
}
