//! Domain types for the agent gateway
//!
//! Requests, responses, stream events, and conversation sessions.

mod message;
mod request;
mod response;

pub use message::*;
pub use request::*;
pub use response::*;
