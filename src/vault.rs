//! Vault decryption.
//!
//! Consumes (never produces) values and files in the established vault
//! envelope: a `$ANSIBLE_VAULT;<version>;AES256` header line followed by a
//! hex-encoded payload of salt, HMAC, and ciphertext. Keys derive via
//! PBKDF2-HMAC-SHA256 (10 000 iterations, 80 bytes: 32 cipher key, 32 HMAC
//! key, 16 IV); the cipher is AES-256-CTR with PKCS#7 padding.

use aes::Aes256;
use ctr::cipher::{KeyIvInit, StreamCipher};
use hmac::{Hmac, Mac};
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::Sha256;
use std::path::Path;

use crate::error::{Error, Result};

type Aes256Ctr = ctr::Ctr128BE<Aes256>;
type HmacSha256 = Hmac<Sha256>;

/// Recognized envelope header prefix.
pub const VAULT_HEADER: &str = "$ANSIBLE_VAULT";

static HEADER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\$ANSIBLE_VAULT;(\d+\.\d+);(AES256)(?:;(\w+))?$").expect("valid regex")
});

const PBKDF2_ITERATIONS: u32 = 10_000;
const DERIVED_KEY_LEN: usize = 80;

/// A vault password.
pub struct VaultSecret {
    password: Vec<u8>,
}

impl VaultSecret {
    /// Creates a secret from a password string.
    pub fn new(password: impl Into<String>) -> Self {
        Self {
            password: password.into().into_bytes(),
        }
    }

    /// Loads a secret from a password file. An executable file is run and
    /// its trimmed stdout used as the password.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::Vault(format!(
                "vault password file not found: {}",
                path.display()
            )));
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let executable = path
                .metadata()
                .map(|m| m.permissions().mode() & 0o111 != 0)
                .unwrap_or(false);
            if executable {
                let output = std::process::Command::new(path)
                    .output()
                    .map_err(|e| Error::Vault(format!("vault password script failed: {}", e)))?;
                if !output.status.success() {
                    return Err(Error::Vault(format!(
                        "vault password script exited {}: {}",
                        output.status.code().unwrap_or(-1),
                        String::from_utf8_lossy(&output.stderr).trim()
                    )));
                }
                let password = String::from_utf8_lossy(&output.stdout).trim().to_string();
                return Ok(Self::new(password));
            }
        }

        let password = std::fs::read_to_string(path)
            .map_err(|e| Error::Vault(format!("cannot read vault password file: {}", e)))?;
        Ok(Self::new(password.trim()))
    }
}

/// Decrypts vault envelopes with one or more candidate secrets.
#[derive(Default)]
pub struct VaultLib {
    secrets: Vec<VaultSecret>,
}

impl VaultLib {
    /// Creates an empty vault (decryption will fail until a secret is
    /// added).
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a candidate secret. Secrets are tried in insertion order.
    pub fn add_secret(&mut self, secret: VaultSecret) {
        self.secrets.push(secret);
    }

    /// True if at least one secret is loaded.
    pub fn has_secrets(&self) -> bool {
        !self.secrets.is_empty()
    }

    /// True if the data carries the vault header.
    pub fn is_encrypted(data: &str) -> bool {
        data.trim_start().starts_with(VAULT_HEADER)
    }

    /// Decrypts an envelope to the plaintext byte stream.
    pub fn decrypt(&self, data: &str) -> Result<Vec<u8>> {
        let mut lines = data.trim().lines();
        let header = lines
            .next()
            .ok_or_else(|| Error::Vault("empty vault data".into()))?;
        let caps = HEADER_RE
            .captures(header.trim())
            .ok_or_else(|| Error::Vault(format!("invalid vault header: {}", header)))?;
        if caps.get(2).map(|m| m.as_str()) != Some("AES256") {
            return Err(Error::Vault("unsupported vault cipher".into()));
        }

        let body: String = lines.collect::<Vec<_>>().join("");
        let payload = hex::decode(body.trim())
            .map_err(|e| Error::Vault(format!("invalid vault payload: {}", e)))?;
        let payload_hex = String::from_utf8(payload)
            .map_err(|_| Error::Vault("invalid vault payload encoding".into()))?;
        // Inner layout: 64 hex chars of salt, 64 of HMAC, remainder
        // ciphertext; separators, if present, are insignificant.
        let payload_hex: String = payload_hex.split_whitespace().collect();
        if payload_hex.len() < 128 {
            return Err(Error::Vault("vault payload too short".into()));
        }

        let salt = hex::decode(&payload_hex[..64])
            .map_err(|e| Error::Vault(format!("invalid vault salt: {}", e)))?;
        let expected_hmac = hex::decode(&payload_hex[64..128])
            .map_err(|e| Error::Vault(format!("invalid vault hmac: {}", e)))?;
        let ciphertext = hex::decode(&payload_hex[128..])
            .map_err(|e| Error::Vault(format!("invalid vault ciphertext: {}", e)))?;

        for secret in &self.secrets {
            if let Ok(plain) =
                decrypt_aes256(&secret.password, &salt, &expected_hmac, &ciphertext)
            {
                return Ok(plain);
            }
        }
        Err(Error::Vault(
            "vault decryption failed: no valid password found".into(),
        ))
    }

    /// Decrypts an envelope and decodes the plaintext as UTF-8.
    pub fn decrypt_to_string(&self, data: &str) -> Result<String> {
        let bytes = self.decrypt(data)?;
        String::from_utf8(bytes)
            .map_err(|_| Error::Vault("decrypted payload is not valid UTF-8".into()))
    }

    /// Reads and decrypts a vault-encrypted file.
    pub fn decrypt_file(&self, path: impl AsRef<Path>) -> Result<Vec<u8>> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Vault(format!("cannot read vault file: {}", e)))?;
        self.decrypt(&content)
    }
}

fn decrypt_aes256(
    password: &[u8],
    salt: &[u8],
    expected_hmac: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>> {
    let mut derived = [0u8; DERIVED_KEY_LEN];
    pbkdf2::pbkdf2_hmac::<Sha256>(password, salt, PBKDF2_ITERATIONS, &mut derived);
    let key: [u8; 32] = derived[..32].try_into().expect("derived key length");
    let hmac_key = &derived[32..64];
    let iv: [u8; 16] = derived[64..80].try_into().expect("derived iv length");

    let mut mac = HmacSha256::new_from_slice(hmac_key)
        .map_err(|_| Error::Vault("invalid HMAC key length".into()))?;
    mac.update(ciphertext);
    mac.verify_slice(expected_hmac)
        .map_err(|_| Error::Vault("HMAC verification failed - wrong password?".into()))?;

    let mut buffer = ciphertext.to_vec();
    let mut cipher = Aes256Ctr::new(&key.into(), &iv.into());
    cipher.apply_keystream(&mut buffer);

    Ok(unpad_pkcs7(buffer))
}

/// Removes PKCS#7 padding; malformed padding returns the buffer as-is.
fn unpad_pkcs7(mut data: Vec<u8>) -> Vec<u8> {
    if let Some(&pad) = data.last() {
        let pad = pad as usize;
        if pad > 0 && pad <= 16 && pad <= data.len() {
            let start = data.len() - pad;
            if data[start..].iter().all(|&b| b as usize == pad) {
                data.truncate(start);
            }
        }
    }
    data
}
