use anyhow::{anyhow, Context, Result};
use argon2::{password_hash::SaltString, Argon2, PasswordHasher};
use rand::rngs::OsRng;
use secrecy::{ExposeSecret, SecretString};

/// Argon2id PHC string for the submitted password.
///
/// Hashing is CPU bound, so it runs on the blocking pool.
pub(super) async fn hash_credential(password: SecretString) -> Result<String> {
    tokio::task::spawn_blocking(move || {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.expose_secret().as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|_| anyhow!("failed to hash credential"))
    })
    .await
    .context("credential hashing task failed")?
}
