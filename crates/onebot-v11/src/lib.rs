//! OneBot v11 protocol implementation: CQ message codec, event taxonomy,
//! send helper / receive pipeline, and the HTTP/WS connection layer.

pub mod adapter;
pub mod bot;
pub mod config;
pub mod event;
pub mod exception;
pub mod message;
pub mod signature;

pub use adapter::{call_api, router, spawn_outbound_clients, AdapterState};
pub use config::Config;
pub use event::{build_collator, classify_and_parse, AnyEvent};
pub use exception::AdapterError;
pub use message::{Message, MessageSegment};
