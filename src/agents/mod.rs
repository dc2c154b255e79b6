//! Agent gateway for Ventra
//!
//! This module fronts an upstream language-model agent with:
//! - Per-identity rate limiting (sliding window)
//! - A single error taxonomy for every failure crossing the gateway
//! - Incremental decoding of streamed replies
//! - Conversation sessions with bounded history
//!
//! ## Architecture
//!
//! - `domain/` - Core types (AgentRequest, AgentResponse, ConversationSession)
//! - `llm/` - Provider capability, HTTP provider and stream decoder
//! - `memory/` - Conversation stores
//! - `handler` - The gateway state machine

pub mod config;
pub mod domain;
pub mod error;
pub mod handler;
pub mod llm;
pub mod memory;

// Re-export commonly used types
pub use config::*;
pub use domain::*;
pub use error::*;
pub use handler::{AgentGateway, ExchangeState};
