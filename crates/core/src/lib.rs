//! Core logic including the agent loop, tool execution and thread
//! persistence.

#![deny(missing_docs)]
#![deny(clippy::missing_safety_doc)]

#[macro_use]
extern crate tracing;

mod agent;
pub mod conversation;
mod error;
mod model_client;
pub mod threads;
pub mod tool;

pub use agent::{Agent, AgentBuilder, AgentStage};
pub use conversation::{Conversation, TranscriptSource};
pub use error::Error;
pub use threads::{ThreadSummary, Threads};
