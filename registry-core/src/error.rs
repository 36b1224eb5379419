use std::path::PathBuf;

/// Rejections of a registry operation. None of these mutate state.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
  #[error("caller is not authorized for this operation")]
  Unauthorized,

  #[error("caller does not match the claimed reporter")]
  ReporterMismatch,

  #[error("recovered signer does not match the claimed reporter")]
  SignerMismatch,

  #[error("report already exists")]
  AlreadyExists,

  #[error("report is deprecated and cannot be updated")]
  CannotUpdateDeprecated,

  #[error("report not found")]
  NotFound,

  #[error("report is already deprecated")]
  AlreadyDeprecated,

  #[error("ledger failure: {0}")]
  Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
  #[error("malformed signature: expected 65 bytes, got {0}")]
  Malformed(usize),

  #[error("invalid recovery id {0}")]
  InvalidRecoveryId(u8),

  #[error("signature s value is not in the lower half of the curve order")]
  NonCanonical,

  #[error("public key recovery failed")]
  Recovery,

  #[error("signature recovers to the zero address")]
  ZeroSigner,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
  #[error("slot {0} is already occupied")]
  Occupied(String),

  #[error("slot {0} does not exist")]
  Missing(String),

  #[error("ledger I/O failed: {0}")]
  Io(#[from] std::io::Error),

  #[error("corrupt ledger snapshot at {path}: {reason}")]
  Corrupt { path: PathBuf, reason: String },

  #[error("ledger at {0} is locked by another process")]
  Locked(PathBuf),

  #[error("ledger at {0} was opened read-only")]
  ReadOnly(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
  #[error("invalid hex encoding")]
  InvalidHex,

  #[error("expected {expected} bytes, got {actual}")]
  InvalidLength { expected: usize, actual: usize },

  #[error("unknown {kind}: {value}")]
  UnknownVariant { kind: &'static str, value: String },
}
