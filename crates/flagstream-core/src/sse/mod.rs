//! Server-sent-event client: line framing into frames, and the
//! connection that feeds them to a [`SseHandler`](crate::handler::SseHandler).

mod client;
mod parser;

pub use client::{ConnectionStatus, SseClient, sdk_headers};
pub use parser::{EventStreamParser, SseFrame};
