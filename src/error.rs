//! Domain error taxonomy.
//!
//! These are the errors that cross module boundaries. HTTP routers map them
//! onto status codes; infrastructure-level failures (SQLite, reqwest plumbing)
//! are wrapped in `Storage`/`Provider` with context preserved.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Entity does not exist.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// A credential with the same slug name or (provider, client_id) pair
    /// already exists.
    #[error("duplicate credential: {0}")]
    DuplicateCredential(String),

    /// A webhook event with the same idempotency key was already recorded.
    /// Expected under duplicate delivery; non-fatal.
    #[error("duplicate event: {0}")]
    DuplicateEvent(String),

    /// OAuth state token missing, expired, replayed, or bound to a different
    /// provider. Fails closed.
    #[error("invalid or expired OAuth state")]
    InvalidState,

    /// Security token validation failed (admin or service token).
    #[error("invalid token: {0}")]
    InvalidToken(String),

    /// Upstream provider returned a non-success response.
    #[error("provider error ({status}): {detail}")]
    Provider { status: u16, detail: String },

    /// Encryption or decryption failed (bad key, tampered ciphertext).
    #[error("cipher error: {0}")]
    Cipher(String),

    /// Credential exists but is not in `connected` status.
    #[error("credential is not connected")]
    CredentialNotConnected,

    /// Access token is expiring and no refresh token is stored.
    #[error("token expired and no refresh token available")]
    NoRefreshToken,

    /// Event processing failed and the retry ceiling was reached.
    #[error("retry limit reached after {0} attempts")]
    RetryExhausted(u32),

    /// Storage-layer failure.
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Provider call failed before a response was received (network, timeout).
    #[error("provider request failed: {0}")]
    ProviderTransport(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// True for errors the ingestion path treats as "already recorded".
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Error::DuplicateEvent(_))
    }
}
