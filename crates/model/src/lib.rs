//! An abstraction layer for different LLMs.
//!
//! This crate establishes an unified protocol for the agent to interact
//! with chat-completion backends, so that the agent can switch between
//! them without modifying the core codebase.
//!
//! Types in this crate don't define any behavior, instead they are the
//! constraints that the implementors should adhere to. Messages are
//! serializable because conversations are persisted between runs.

#![deny(missing_docs)]

mod error;
mod provider;
mod request;
mod response;

pub use error::*;
pub use provider::*;
pub use request::*;
pub use response::*;
