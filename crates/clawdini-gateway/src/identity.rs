use std::fs;
use std::path::Path;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use ed25519_dalek::pkcs8::spki::der::pem::LineEnding;
use ed25519_dalek::pkcs8::{DecodePrivateKey, EncodePrivateKey, EncodePublicKey};
use ed25519_dalek::{Signer, SigningKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use clawdini_core::error::{ClawdiniError, Result};

/// On-disk schema of the device identity file.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdentityFile {
    version: u32,
    device_id: String,
    public_key_pem: String,
    private_key_pem: String,
    created_at_ms: i64,
}

/// Persistent Ed25519 device identity used by the gateway handshake.
///
/// The device id is the lowercase hex SHA-256 of the 32 raw public-key bytes.
/// The keypair survives id healing: rotating keys would re-authenticate as a
/// new device and lose any server-side grants.
pub struct DeviceIdentity {
    device_id: String,
    signing_key: SigningKey,
}

impl DeviceIdentity {
    /// Load the identity at `path`, generating and persisting a fresh one
    /// when the file does not exist. A stored device id that disagrees with
    /// the stored public key is rewritten in place, keeping the keys.
    pub fn load_or_generate(path: &Path) -> Result<Self> {
        if path.exists() {
            return Self::load(path);
        }

        let signing_key = SigningKey::generate(&mut OsRng);
        let private_key_pem = signing_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| ClawdiniError::Auth(format!("failed to encode private key: {e}")))?
            .to_string();
        let public_key_pem = signing_key
            .verifying_key()
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| ClawdiniError::Auth(format!("failed to encode public key: {e}")))?;
        let device_id = device_id_for(&signing_key);

        let file = IdentityFile {
            version: 1,
            device_id: device_id.clone(),
            public_key_pem,
            private_key_pem,
            created_at_ms: chrono::Utc::now().timestamp_millis(),
        };
        write_identity(path, &file)?;
        info!(device_id = %device_id, path = %path.display(), "generated device identity");

        Ok(Self {
            device_id,
            signing_key,
        })
    }

    fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let file: IdentityFile = serde_json::from_str(&content)
            .map_err(|e| ClawdiniError::Auth(format!("unreadable identity file: {e}")))?;
        let signing_key = SigningKey::from_pkcs8_pem(&file.private_key_pem)
            .map_err(|e| ClawdiniError::Auth(format!("invalid stored private key: {e}")))?;

        let expected = device_id_for(&signing_key);
        if file.device_id != expected {
            // Older schema or hand-edited file: correct the id, keep the keys.
            warn!(
                stored = %file.device_id,
                corrected = %expected,
                "device id disagrees with public key, healing"
            );
            let healed = IdentityFile {
                device_id: expected.clone(),
                ..file
            };
            write_identity(path, &healed)?;
        }

        Ok(Self {
            device_id: expected,
            signing_key,
        })
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// The 32 raw public-key bytes, base64url without padding.
    pub fn public_key_b64(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.signing_key.verifying_key().to_bytes())
    }

    /// Ed25519 signature over `payload`, base64url without padding.
    pub fn sign_b64(&self, payload: &str) -> String {
        URL_SAFE_NO_PAD.encode(self.signing_key.sign(payload.as_bytes()).to_bytes())
    }
}

fn device_id_for(key: &SigningKey) -> String {
    let digest = Sha256::digest(key.verifying_key().to_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

fn write_identity(path: &Path, file: &IdentityFile) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, serde_json::to_string_pretty(file)?)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}
