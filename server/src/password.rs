//! Salted password hashes for protected pastes.
//!
//! Hashing is deliberately slow, so both directions run on the blocking pool.

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use rand::rngs::OsRng;
use rand::RngCore;
use tokio::task;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to hash password: {0}")]
    Hash(argon2::password_hash::Error),
    #[error("stored password hash is malformed: {0}")]
    Malformed(argon2::password_hash::Error),
    #[error("password task failed: {0}")]
    Join(#[from] task::JoinError),
}

/// Hashes `password` with Argon2id and a fresh random salt, returning the PHC
/// string to persist.
pub async fn hash(password: String) -> Result<String, Error> {
    task::spawn_blocking(move || {
        let mut salt = [0_u8; 16];
        OsRng.fill_bytes(&mut salt);
        let salt = SaltString::encode_b64(&salt).map_err(Error::Hash)?;

        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(Error::Hash)
    })
    .await?
}

/// Checks an attempt against a stored PHC string.
pub async fn verify(attempt: String, stored: String) -> Result<bool, Error> {
    task::spawn_blocking(move || {
        let parsed = PasswordHash::new(&stored).map_err(Error::Malformed)?;
        match Argon2::default().verify_password(attempt.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(Error::Malformed(e)),
        }
    })
    .await?
}
