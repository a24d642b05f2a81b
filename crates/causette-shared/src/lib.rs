//! # causette-shared
//!
//! Domain model shared by every causette crate: message and identifier
//! types, the error taxonomy, and tuning constants.  This crate owns no
//! behavior beyond small helpers on the types themselves.

pub mod constants;
pub mod error;
pub mod message;
pub mod types;

pub use error::{BackendError, SessionError};
pub use message::{Message, MessageBody, MessageKey, SendingStatus};
pub use types::{ChannelUrl, MessageId, RequestId, UserId};
