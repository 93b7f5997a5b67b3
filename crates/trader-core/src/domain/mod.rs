//! 동기화 계층의 도메인 모델.

mod event;
mod market;
mod notification;
mod stream;

pub use event::*;
pub use market::*;
pub use notification::*;
pub use stream::*;
