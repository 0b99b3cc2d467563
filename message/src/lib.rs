pub mod kind;
pub mod list;
pub mod message;

pub use kind::MessageKind;
pub use list::{CodeStatus, MessageList, MessageOwner, MessageRef};
pub use message::{Message, MessageText};
