use crate::digest::Digest;
use crate::error::SignatureError;
use crate::types::Address;
use anyhow::Context;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use sha2::{Digest as _, Sha256};

pub const SIGNATURE_LEN: usize = 65;

/// Recovers the address that produced `sig` over `digest`.
///
/// `sig` is `r || s || v` with `v` in {0, 1, 27, 28}. High-S signatures are
/// rejected so a signature has exactly one accepted encoding.
pub fn recover_signer(digest: &Digest, sig: &[u8]) -> Result<Address, SignatureError> {
  if sig.len() != SIGNATURE_LEN {
    return Err(SignatureError::Malformed(sig.len()));
  }

  let v = sig[64];
  let rec = match v {
    0 | 1 => v,
    27 | 28 => v - 27,
    other => return Err(SignatureError::InvalidRecoveryId(other)),
  };
  let recovery_id = RecoveryId::from_byte(rec).ok_or(SignatureError::InvalidRecoveryId(v))?;

  let signature = Signature::from_slice(&sig[..64]).map_err(|_| SignatureError::Recovery)?;
  if signature.normalize_s().is_some() {
    return Err(SignatureError::NonCanonical);
  }

  let key = VerifyingKey::recover_from_prehash(digest, &signature, recovery_id)
    .map_err(|_| SignatureError::Recovery)?;

  let signer = address_of(&key);
  if signer.is_zero() {
    return Err(SignatureError::ZeroSigner);
  }
  Ok(signer)
}

/// Signs `digest` and returns the 65-byte `r || s || v` encoding, `v` in {27, 28}.
pub fn sign_digest(key: &SigningKey, digest: &Digest) -> anyhow::Result<[u8; SIGNATURE_LEN]> {
  let (mut sig, mut recovery_id) = key
    .sign_prehash_recoverable(digest)
    .context("sign digest")?;

  if let Some(normalized) = sig.normalize_s() {
    sig = normalized;
    recovery_id = RecoveryId::new(!recovery_id.is_y_odd(), recovery_id.is_x_reduced());
  }

  let mut out = [0u8; SIGNATURE_LEN];
  out[..64].copy_from_slice(&sig.to_bytes());
  out[64] = recovery_id.to_byte() + 27;
  Ok(out)
}

/// Last 20 bytes of SHA-256 over the uncompressed public point (without the
/// SEC1 tag byte).
pub fn address_of(key: &VerifyingKey) -> Address {
  let point = key.to_encoded_point(false);
  let hash = Sha256::digest(&point.as_bytes()[1..]);
  let mut out = [0u8; 20];
  out.copy_from_slice(&hash[12..]);
  Address(out)
}

pub fn signing_key_from_hex(text: &str) -> anyhow::Result<SigningKey> {
  let t = text.trim();
  let t = t.strip_prefix("0x").unwrap_or(t);
  let bytes = hex::decode(t).context("decode private key hex")?;
  if bytes.len() != 32 {
    anyhow::bail!("private key must be 32 bytes (secp256k1)");
  }
  SigningKey::from_slice(&bytes).context("invalid secp256k1 private key")
}

/// Accepts raw 65-byte signatures, `0x`-hex, bare hex, base64url or base64.
pub fn decode_signature(raw: &[u8]) -> anyhow::Result<Vec<u8>> {
  if raw.len() == SIGNATURE_LEN {
    return Ok(raw.to_vec());
  }
  let text = std::str::from_utf8(raw).context("signature must be raw bytes or UTF-8")?;
  let t = text.trim();
  if t.is_empty() {
    anyhow::bail!("empty signature");
  }

  let hex_body = t.strip_prefix("0x").unwrap_or(t);
  if let Ok(bytes) = hex::decode(hex_body) {
    return Ok(bytes);
  }

  URL_SAFE_NO_PAD
    .decode(t.as_bytes())
    .or_else(|_| STANDARD.decode(t.as_bytes()))
    .context("decode signature (hex, base64 or base64url)")
}
