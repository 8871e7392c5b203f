use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use ring::digest::{digest, SHA256};
use std::path::Path;
use tracing::info;
use wtransport::Identity;

use crate::config::ServerConfig;

// Development certificate location, relative to the working directory
const DEV_CERT_FILE: &str = "certs/cert.pem";
const DEV_KEY_FILE: &str = "certs/key.pem";

/// TLS identity for the WebTransport endpoint
pub struct TlsConfig {
    pub identity: Identity,
    /// Base64 SHA-256 of the leaf certificate (browser `serverCertificateHashes`)
    pub cert_hash: String,
}

impl TlsConfig {
    /// Load the identity named by the config, or the development pair in `certs/`
    pub async fn load(config: &ServerConfig) -> Result<Self> {
        if let (Some(cert_path), Some(key_path)) = (&config.tls_cert_path, &config.tls_key_path) {
            info!("Loading TLS certificate from {}", cert_path);
            return Self::load_from_paths(cert_path, key_path).await;
        }

        if Path::new(DEV_CERT_FILE).exists() && Path::new(DEV_KEY_FILE).exists() {
            info!("Loading dev certificate from certs/");
            Self::load_from_paths(DEV_CERT_FILE, DEV_KEY_FILE).await
        } else {
            Err(anyhow!(
                "TLS certificate not found.\n\n\
                Set TLS_CERT_PATH and TLS_KEY_PATH, or place a PEM pair at {} and {}.",
                DEV_CERT_FILE,
                DEV_KEY_FILE
            ))
        }
    }

    async fn load_from_paths(cert_path: &str, key_path: &str) -> Result<Self> {
        let identity = Identity::load_pemfiles(cert_path, key_path)
            .await
            .with_context(|| format!("Failed to load certificate pair {} / {}", cert_path, key_path))?;

        let cert_hash = Self::compute_cert_hash(&identity);
        info!("Certificate hash: {}", cert_hash);

        Ok(Self {
            identity,
            cert_hash,
        })
    }

    fn compute_cert_hash(identity: &Identity) -> String {
        identity
            .certificate_chain()
            .as_slice()
            .first()
            .map(|cert| hash_der(cert.der()))
            .unwrap_or_default()
    }
}

/// Base64 SHA-256 of a DER certificate
pub fn hash_der(der: &[u8]) -> String {
    STANDARD.encode(digest(&SHA256, der).as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_der_is_base64_sha256() {
        let hash = hash_der(b"not really a certificate");
        let decoded = STANDARD.decode(&hash).unwrap();
        assert_eq!(decoded.len(), 32);
        assert_eq!(hash, hash_der(b"not really a certificate"));
        assert_ne!(hash, hash_der(b"another one"));
    }

    #[tokio::test]
    async fn test_missing_files_error() {
        let config = ServerConfig {
            tls_cert_path: Some("/nonexistent/cert.pem".to_string()),
            tls_key_path: Some("/nonexistent/key.pem".to_string()),
            ..ServerConfig::default()
        };
        let err = TlsConfig::load(&config).await.err().unwrap();
        assert!(err.to_string().contains("/nonexistent/cert.pem"));
    }
}
