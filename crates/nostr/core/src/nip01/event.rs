use std::time::{SystemTime, UNIX_EPOCH};

use bitcoin::secp256k1::schnorr::Signature;
use bitcoin::secp256k1::{Message, Secp256k1, XOnlyPublicKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{NostrError, Result};
use crate::keys::Keys;
use crate::tag_parsing::collect_tag_values;

/// Short text note.
pub const KIND_TEXT_NOTE: u16 = 1;

/// Signed event as it travels on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub pubkey: String,
    pub created_at: u64,
    pub kind: u16,
    pub tags: Vec<Vec<String>>,
    pub content: String,
    pub sig: String,
}

impl Event {
    /// Check id and signature; see [`validate_event`].
    pub fn verify(&self) -> Result<()> {
        validate_event(self)
    }

    /// Values of all `t` tags.
    pub fn hashtags(&self) -> Vec<String> {
        collect_tag_values(&self.tags, "t")
    }
}

/// Event fields supplied by the caller before signing.
///
/// `created_at` is optional; signing fills in the current time when it is absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsignedEvent {
    pub kind: u16,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<u64>,
}

impl UnsignedEvent {
    pub fn new(kind: u16, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
            tags: Vec::new(),
            created_at: None,
        }
    }

    pub fn text_note(content: impl Into<String>) -> Self {
        Self::new(KIND_TEXT_NOTE, content)
    }

    pub fn with_tag<I, S>(mut self, tag: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.push(tag.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_hashtag(self, hashtag: impl Into<String>) -> Self {
        self.with_tag(["t".to_string(), hashtag.into()])
    }

    pub fn with_created_at(mut self, created_at: u64) -> Self {
        self.created_at = Some(created_at);
        self
    }

    /// Produce a signed copy; `self` is left untouched.
    pub fn sign(&self, keys: &Keys) -> Result<Event> {
        finalize_event(self, keys)
    }
}

/// Current time in seconds since the Unix epoch.
pub fn unix_now_secs() -> Result<u64> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .map_err(|error| NostrError::Clock(error.to_string()))
}

/// SHA-256 of the canonical `[0, pubkey, created_at, kind, tags, content]` serialization.
pub fn get_event_hash(
    pubkey: &str,
    created_at: u64,
    kind: u16,
    tags: &[Vec<String>],
    content: &str,
) -> Result<[u8; 32]> {
    let canonical = serde_json::json!([0, pubkey, created_at, kind, tags, content]);
    let serialized = serde_json::to_vec(&canonical)?;
    Ok(Sha256::digest(&serialized).into())
}

/// Stamp pubkey, id and signature onto a copy of `template`.
pub fn finalize_event(template: &UnsignedEvent, keys: &Keys) -> Result<Event> {
    let created_at = match template.created_at {
        Some(created_at) => created_at,
        None => unix_now_secs()?,
    };
    let pubkey = keys.public_key_hex();
    let hash = get_event_hash(
        &pubkey,
        created_at,
        template.kind,
        &template.tags,
        &template.content,
    )?;
    let signature = keys.sign_digest(&hash);

    Ok(Event {
        id: hex::encode(hash),
        pubkey,
        created_at,
        kind: template.kind,
        tags: template.tags.clone(),
        content: template.content.clone(),
        sig: hex::encode(signature.serialize()),
    })
}

/// Recompute the id and verify the Schnorr signature against the embedded pubkey.
pub fn validate_event(event: &Event) -> Result<()> {
    let hash = get_event_hash(
        &event.pubkey,
        event.created_at,
        event.kind,
        &event.tags,
        &event.content,
    )?;
    let expected = hex::encode(hash);
    if expected != event.id {
        return Err(NostrError::IdMismatch {
            expected,
            actual: event.id.clone(),
        });
    }

    let public_key = XOnlyPublicKey::from_slice(&hex::decode(&event.pubkey)?)?;
    let signature = Signature::from_slice(&hex::decode(&event.sig)?)?;
    Secp256k1::verification_only()
        .verify_schnorr(&signature, &Message::from_digest(hash), &public_key)
        .map_err(|_| NostrError::InvalidSignature(event.id.clone()))
}

/// Boolean form of [`validate_event`].
pub fn verify_event(event: &Event) -> bool {
    validate_event(event).is_ok()
}
