#[macro_use]
mod macros;

pub mod alert;
pub mod base;
pub mod codec;
pub mod enums;
pub mod handshake;
pub mod hsjoiner;
pub mod message;
pub mod persist;
