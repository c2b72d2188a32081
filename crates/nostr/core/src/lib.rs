//! Nostr protocol primitives: keys, events, filters.
//!
//! - `keys` / `nip06`: identity generation, injection and mnemonic derivation
//! - `nip01`: event signing/verification and subscription filters
//! - `nightly`: checklist completion notes and the community subscription filter

mod error;
mod keys;
pub mod nightly;
pub mod nip01;
mod nip06;
mod tag_parsing;

pub use error::{NostrError, Result};
pub use keys::Keys;
pub use nip01::{
    Event, Filter, KIND_TEXT_NOTE, UnsignedEvent, finalize_event, get_event_hash, matches_any,
    unix_now_secs, validate_event, verify_event,
};
pub use nip06::{derive_keys, derive_keys_with_account};
