//! Message model — addresses, messages, per-recipient dispositions.

pub mod address;
pub mod message;

pub use address::Address;
pub use message::{
    Disposition, Header, Message, MessageBuilder, Payload, RecipientDisposition,
};
