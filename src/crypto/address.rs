//! Bech32 address derivation.
//!
//! Addresses are `bech32(hrp, ripemd160(sha256(pubkey)))` with two prefixes
//! in use: `cpc` for account addresses and `cpcvalcons` for validator
//! consensus addresses.

use super::{CryptoError, PublicKeyBytes};
use bech32::{FromBase32, ToBase32, Variant};
use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

pub const ACCOUNT_HRP: &str = "cpc";
pub const CONSENSUS_HRP: &str = "cpcvalcons";

pub fn address_from_pubkey(pk: &PublicKeyBytes, hrp: &str) -> Result<String, CryptoError> {
    let sha = Sha256::digest(&pk.0);
    let h20 = Ripemd160::digest(sha);
    bech32::encode(hrp, h20.to_base32(), Variant::Bech32)
        .map_err(|e| CryptoError::Address(format!("{e}")))
}

pub fn account_address(pk: &PublicKeyBytes) -> Result<String, CryptoError> {
    address_from_pubkey(pk, ACCOUNT_HRP)
}

pub fn consensus_address(pk: &PublicKeyBytes) -> Result<String, CryptoError> {
    address_from_pubkey(pk, CONSENSUS_HRP)
}

pub fn decode_address(addr: &str) -> Result<(String, Vec<u8>), CryptoError> {
    let (hrp, data, _) =
        bech32::decode(addr).map_err(|e| CryptoError::Address(format!("{e}")))?;
    let bytes = Vec::<u8>::from_base32(&data)
        .map_err(|e| CryptoError::Address(format!("{e}")))?;
    Ok((hrp, bytes))
}

pub fn is_valid_address(addr: &str, expected_hrp: Option<&str>) -> bool {
    match decode_address(addr) {
        Ok((hrp, _)) => expected_hrp.map(|e| e == hrp).unwrap_or(true),
        Err(_) => false,
    }
}
