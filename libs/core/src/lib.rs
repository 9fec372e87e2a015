//! Switchboard Core - status model shared by every layer of the framework

pub mod error;

pub use error::{Code, Status, StatusError};
