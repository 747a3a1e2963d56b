pub mod data;
pub mod event;
pub mod frame;
pub mod types;

pub use data::*;
pub use event::*;
pub use frame::*;
pub use types::*;
