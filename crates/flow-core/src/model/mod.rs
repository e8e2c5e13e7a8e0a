pub mod context;
pub mod table;

pub use context::Context;
pub use table::{Table, ALL_ATTRIBUTES};
