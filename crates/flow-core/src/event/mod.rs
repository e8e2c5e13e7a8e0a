pub mod awaitable;
pub mod types;

pub use awaitable::{AwaitableResult, AwaitableSlot};
pub use types::{Event, Message};
