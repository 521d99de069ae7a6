//! Core types for lambdaspawn
//!
//! This crate holds the message schema exchanged between a supervisor and its
//! worker process, and the structured error shape both sides report with.

pub mod error;
pub mod message;

pub use error::{ErrorCode, ErrorPayload};
pub use message::{
    FrameError, InitRequest, InitResult, InvokeRequest, InvokeResult, Message, MessageKind,
};
