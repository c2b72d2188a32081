//! secp256k1 identity used to sign events.
//!
//! The secret half of a [`Keys`] never leaves this module except as a signature: there is no
//! public accessor for it and the `Debug` impl only prints the public key.

use std::fmt;

use bech32::{Bech32, Hrp};
use bitcoin::secp256k1::schnorr::Signature;
use bitcoin::secp256k1::{Keypair, Message, Secp256k1, SecretKey, XOnlyPublicKey};

use crate::error::{NostrError, Result};

pub(crate) const NSEC_HRP: &str = "nsec";
pub(crate) const NPUB_HRP: &str = "npub";

/// A signing keypair: secret key plus its x-only public key.
#[derive(Clone)]
pub struct Keys {
    keypair: Keypair,
    public_key: XOnlyPublicKey,
}

impl Keys {
    /// Generate a fresh random keypair.
    pub fn generate() -> Self {
        // Out-of-range scalars are astronomically rare; draw again when one shows up.
        loop {
            let candidate: [u8; 32] = rand::random();
            if let Ok(keys) = Self::from_secret_bytes(&candidate) {
                return keys;
            }
        }
    }

    /// Build keys from raw secret key bytes.
    pub fn from_secret_bytes(secret: &[u8; 32]) -> Result<Self> {
        let secp = Secp256k1::new();
        let secret_key = SecretKey::from_slice(secret)?;
        let keypair = Keypair::from_secret_key(&secp, &secret_key);
        let (public_key, _parity) = keypair.x_only_public_key();
        Ok(Self {
            keypair,
            public_key,
        })
    }

    /// Parse a secret key given as 64-char hex or as a NIP-19 `nsec1...` string.
    pub fn parse(secret: &str) -> Result<Self> {
        let trimmed = secret.trim();
        let bytes = if trimmed.starts_with("nsec1") {
            let (hrp, data) =
                bech32::decode(trimmed).map_err(|error| NostrError::Bech32(error.to_string()))?;
            if hrp.as_str() != NSEC_HRP {
                return Err(NostrError::InvalidKey(format!(
                    "expected {NSEC_HRP} prefix, got {}",
                    hrp.as_str()
                )));
            }
            data
        } else {
            hex::decode(trimmed)?
        };

        let secret: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            NostrError::InvalidKey(format!("expected 32 secret key bytes, got {}", bytes.len()))
        })?;
        Self::from_secret_bytes(&secret)
    }

    /// The x-only public key.
    pub fn public_key(&self) -> XOnlyPublicKey {
        self.public_key
    }

    /// Public key as lowercase hex, the form used in event `pubkey` fields.
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key.serialize())
    }

    /// Public key as a NIP-19 `npub1...` string.
    pub fn npub(&self) -> Result<String> {
        encode_bech32(NPUB_HRP, &self.public_key.serialize())
    }

    /// BIP-340 Schnorr signature over a 32-byte digest.
    pub fn sign_digest(&self, digest: &[u8; 32]) -> Signature {
        let secp = Secp256k1::signing_only();
        let aux_rand: [u8; 32] = rand::random();
        secp.sign_schnorr_with_aux_rand(&Message::from_digest(*digest), &self.keypair, &aux_rand)
    }

    #[cfg(test)]
    pub(crate) fn secret_hex(&self) -> String {
        hex::encode(self.keypair.secret_bytes())
    }

    #[cfg(test)]
    pub(crate) fn nsec(&self) -> Result<String> {
        encode_bech32(NSEC_HRP, &self.keypair.secret_bytes())
    }
}

impl fmt::Debug for Keys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keys")
            .field("public_key", &self.public_key_hex())
            .finish_non_exhaustive()
    }
}

pub(crate) fn encode_bech32(hrp: &str, data: &[u8; 32]) -> Result<String> {
    let parsed_hrp = Hrp::parse(hrp).map_err(|error| NostrError::Bech32(error.to_string()))?;
    bech32::encode::<Bech32>(parsed_hrp, data).map_err(|error| NostrError::Bech32(error.to_string()))
}
