//! Key/value storage for tokens, cached credentials, and preferences.
//!
//! This module provides:
//! - `CredentialStore`: the get/set/delete contract every backing store implements
//! - `KeyringStore`: secure OS-level storage via keyring
//! - `FileStore`: a JSON file for non-secret preferences
//! - `MemoryStore`: an in-process map
//!
//! Every operation is independently fallible. Callers log failures and keep
//! their in-memory state intact.

pub mod file;
pub mod keyring;
pub mod memory;

pub use file::FileStore;
pub use self::keyring::KeyringStore;
pub use memory::MemoryStore;

use crate::error::StoreError;

/// Persisted backend session (serialized `TokenSet`).
pub const SESSION_KEY: &str = "auth_session";
/// Bare access token, mirrored for platform integrations that read it directly.
pub const ACCESS_TOKEN_KEY: &str = "auth_access_token";
pub const REFRESH_TOKEN_KEY: &str = "auth_refresh_token";
/// RFC 3339 timestamp of the last successful refresh.
pub const LAST_REFRESH_KEY: &str = "last_token_refresh";
/// Persisted `SessionConfig`.
pub const SESSION_CONFIG_KEY: &str = "session_config";
pub const SAVED_EMAIL_KEY: &str = "saved_email";
pub const SAVED_PASSWORD_KEY: &str = "saved_password";

/// Every key holding token material, removed on sign-out.
pub const TOKEN_KEYS: [&str; 4] = [
    SESSION_KEY,
    ACCESS_TOKEN_KEY,
    REFRESH_TOKEN_KEY,
    LAST_REFRESH_KEY,
];

pub trait CredentialStore: Send + Sync {
    /// Returns `Ok(None)` when nothing is stored under `key`.
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Deleting a missing key succeeds.
    fn delete(&self, key: &str) -> Result<(), StoreError>;
}
