//! NIP-06: key derivation from a BIP-39 mnemonic.

use bip39::Mnemonic;
use bitcoin::Network;
use bitcoin::bip32::{ChildNumber, DerivationPath, Xpriv};
use bitcoin::key::Secp256k1;

use crate::error::{NostrError, Result};
use crate::keys::Keys;

const NOSTR_COIN_TYPE: u32 = 1237;

/// Derive keys for account 0.
pub fn derive_keys(mnemonic: &str) -> Result<Keys> {
    derive_keys_with_account(mnemonic, 0)
}

/// Derive keys at `m/44'/1237'/<account>'/0/0`.
pub fn derive_keys_with_account(mnemonic: &str, account: u32) -> Result<Keys> {
    let parsed_mnemonic = Mnemonic::parse(mnemonic.trim())
        .map_err(|error| NostrError::Mnemonic(error.to_string()))?;
    let seed = parsed_mnemonic.to_seed("");

    let secp = Secp256k1::new();
    let master = Xpriv::new_master(Network::Bitcoin, &seed).map_err(bip32_error)?;

    let path = DerivationPath::from(vec![
        ChildNumber::from_hardened_idx(44).map_err(bip32_error)?,
        ChildNumber::from_hardened_idx(NOSTR_COIN_TYPE).map_err(bip32_error)?,
        ChildNumber::from_hardened_idx(account).map_err(bip32_error)?,
        ChildNumber::from_normal_idx(0).map_err(bip32_error)?,
        ChildNumber::from_normal_idx(0).map_err(bip32_error)?,
    ]);

    let derived = master.derive_priv(&secp, &path).map_err(bip32_error)?;
    Keys::from_secret_bytes(&derived.private_key.secret_bytes())
}

fn bip32_error(error: bitcoin::bip32::Error) -> NostrError {
    NostrError::InvalidKey(format!("bip32 derivation failed: {error}"))
}
