//! OneBot v12 protocol implementation: the array-of-segments message
//! model, event taxonomy, send helper / receive pipeline, and the
//! HTTP/WS connection layer with `StatusUpdate` bot-set reconciliation.

pub mod adapter;
pub mod bot;
pub mod config;
pub mod event;
pub mod exception;
pub mod message;

pub use adapter::{call_api, router, spawn_outbound_clients, AdapterState};
pub use config::Config;
pub use event::{build_collator, classify_and_parse, AnyEvent};
pub use exception::AdapterError;
pub use message::{Message, MessageSegment};
