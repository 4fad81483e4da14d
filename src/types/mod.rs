pub mod error;
pub mod event;
pub mod message;

pub use error::*;
pub use event::*;
pub use message::*;
