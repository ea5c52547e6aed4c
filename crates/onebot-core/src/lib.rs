//! Version-independent building blocks shared by `onebot-v11` and
//! `onebot-v12`: the event collator, the echo-correlated result store, a
//! bearer-token helper, and the v12 dotted-key flattening transform.
//!
//! Deliberately does not attempt to unify v11 and v12 behind one trait —
//! the two protocols only share these few pieces, and forcing a common
//! interface for the rest (messages, events, connection handling) would
//! cost more in abstraction than it saves.

pub mod auth;
pub mod collator;
pub mod flatten;
pub mod registry;
pub mod store;

pub use auth::{check_access_token, extract_bearer, resolve_token};
pub use collator::{Collator, CollatorError, KeySpec};
pub use flatten::flattened_to_nested;
pub use registry::{BotIdentityRegistry, SharedBotIdentityRegistry};
pub use store::{ResultStore, StoreError};
