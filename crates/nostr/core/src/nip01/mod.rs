//! NIP-01: basic protocol flow.
//!
//! Internal module boundaries:
//! - `event`: unsigned/signed event models, canonical id hashing, signing and verification
//! - `filter`: subscription filters, their JSON form and local matching
//! - `tests`: signing and filter coverage

mod event;
mod filter;


pub use event::{
    Event, KIND_TEXT_NOTE, UnsignedEvent, finalize_event, get_event_hash, unix_now_secs,
    validate_event, verify_event,
};
pub use filter::{Filter, matches_any};
