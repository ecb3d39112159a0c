/// Credential protection for stored SSH passwords.
pub mod secrets;

pub use secrets::{CipherSecretStore, SecretError, SecretStore};
