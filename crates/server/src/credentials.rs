//! At-rest encryption for Power BI client secrets.
//!
//! Secrets are sealed with AES-256-GCM and stored as `iv:tag:ciphertext` in
//! hex. The key comes from `DB_ENCRYPTION_KEY` or a generated
//! `{DATA_DIR}/.conn_key` file.

use std::path::Path;

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use biportal_core::PortalError;
use rand::RngCore;
use tracing::info;

const KEY_ENV: &str = "DB_ENCRYPTION_KEY";
const KEY_FILE: &str = ".conn_key";

fn cipher(key: &[u8; 32]) -> Result<Aes256Gcm, PortalError> {
    Aes256Gcm::new_from_slice(key)
        .map_err(|e| PortalError::Config(format!("failed to create cipher: {e}")))
}

fn decode_hex(label: &str, value: &str) -> Result<Vec<u8>, PortalError> {
    hex::decode(value.trim()).map_err(|e| PortalError::Config(format!("invalid {label} hex: {e}")))
}

fn key_from_hex(source: &str, value: &str) -> Result<[u8; 32], PortalError> {
    let bytes = decode_hex(source, value)?;
    <[u8; 32]>::try_from(bytes.as_slice()).map_err(|_| {
        PortalError::Config(format!(
            "{source} must be 64 hex characters (32 bytes), got {} bytes",
            bytes.len()
        ))
    })
}

/// Encrypt `plaintext`, returning `iv:tag:ciphertext` hex.
pub fn encrypt_secret(key: &[u8; 32], plaintext: &str) -> Result<String, PortalError> {
    let mut iv = [0u8; 12];
    OsRng.fill_bytes(&mut iv);

    let sealed = cipher(key)?
        .encrypt(Nonce::from_slice(&iv), plaintext.as_bytes())
        .map_err(|e| PortalError::Other(format!("encryption failed: {e}")))?;

    // aes-gcm appends the 16-byte tag.
    let (ct, tag) = sealed.split_at(sealed.len() - 16);
    Ok(format!("{}:{}:{}", hex::encode(iv), hex::encode(tag), hex::encode(ct)))
}

/// Reverse of [`encrypt_secret`].
pub fn decrypt_secret(key: &[u8; 32], encrypted: &str) -> Result<String, PortalError> {
    let parts: Vec<&str> = encrypted.splitn(3, ':').collect();
    let [iv, tag, ct] = parts.as_slice() else {
        return Err(PortalError::Config(
            "invalid encrypted secret (expected iv:tag:ciphertext)".into(),
        ));
    };

    let iv = decode_hex("iv", iv)?;
    if iv.len() != 12 {
        return Err(PortalError::Config(format!(
            "invalid IV length: expected 12, got {}",
            iv.len()
        )));
    }
    let mut combined = decode_hex("ciphertext", ct)?;
    combined.extend_from_slice(&decode_hex("tag", tag)?);

    let plaintext = cipher(key)?
        .decrypt(Nonce::from_slice(&iv), combined.as_ref())
        .map_err(|e| PortalError::Other(format!("decryption failed: {e}")))?;

    String::from_utf8(plaintext).map_err(|e| PortalError::Other(format!("secret is not UTF-8: {e}")))
}

/// Load the key from `DB_ENCRYPTION_KEY`, else from `{data_dir}/.conn_key`,
/// generating that file on first use.
pub fn load_or_generate_key(data_dir: &Path) -> Result<[u8; 32], PortalError> {
    if let Ok(env_key) = std::env::var(KEY_ENV) {
        let key = key_from_hex(KEY_ENV, &env_key)?;
        info!("Using encryption key from {KEY_ENV}");
        return Ok(key);
    }
    load_or_generate_key_file(data_dir)
}

fn load_or_generate_key_file(data_dir: &Path) -> Result<[u8; 32], PortalError> {
    let key_path = data_dir.join(KEY_FILE);
    if key_path.exists() {
        let key = key_from_hex(&key_path.display().to_string(), &std::fs::read_to_string(&key_path)?)?;
        info!(path = %key_path.display(), "Loaded encryption key");
        return Ok(key);
    }

    let mut key = [0u8; 32];
    OsRng.fill_bytes(&mut key);
    std::fs::create_dir_all(data_dir)?;
    std::fs::write(&key_path, hex::encode(key))?;
    info!(path = %key_path.display(), "Generated new encryption key");
    Ok(key)
}
