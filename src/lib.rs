//! Thin facade re-exporting the OneBot adapter crates.
//!
//! `onebot-core` holds the version-independent pieces (collator, result
//! store, bearer-token helper, flattened-key transform). `onebot-v11` and
//! `onebot-v12` are sibling protocol implementations built on top of it.

pub use onebot_core as core;
pub use onebot_v11 as v11;
pub use onebot_v12 as v12;
