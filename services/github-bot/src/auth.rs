//! GitHub App Authentication
//!
//! Private key loading and the short-lived RS256 assertion that identifies
//! the app when exchanging for an installation token.

use crate::error::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Lifetime of a signed assertion, in seconds
pub const ASSERTION_LIFETIME_SECS: i64 = 60;

/// JWT claims for GitHub App authentication
#[derive(Debug, Serialize, Deserialize)]
pub struct GitHubAppClaims {
    /// Issued at time (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issuer (GitHub App ID)
    pub iss: String,
}

/// Parsed RSA private key of a GitHub App
///
/// Loaded once; the key is never printed.
#[derive(Clone)]
pub struct PrivateKey {
    key: EncodingKey,
}

impl PrivateKey {
    /// Parse a PEM encoded RSA key (PKCS#1 or PKCS#8)
    pub fn from_pem(pem: &[u8]) -> Result<Self> {
        let key = EncodingKey::from_rsa_pem(pem).map_err(Error::KeyParse)?;

        // PEM armour alone is accepted by the parser, so prove the DER is usable
        jsonwebtoken::crypto::sign(b"probe", &key, Algorithm::RS256).map_err(Error::KeyParse)?;

        Ok(Self { key })
    }

    /// Read and parse a PEM key file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let pem = std::fs::read(path).map_err(|source| Error::KeyFile {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_pem(&pem)
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(..)")
    }
}

/// Signs bearer assertions for one app
#[derive(Debug, Clone)]
pub struct AssertionSigner {
    key: PrivateKey,
}

impl AssertionSigner {
    pub fn new(key: PrivateKey) -> Self {
        Self { key }
    }

    /// Build and sign `{iat: now, exp: now + 60s, iss: app_id}`
    pub fn sign(&self, app_id: u64, now: DateTime<Utc>) -> Result<String> {
        let claims = GitHubAppClaims {
            iat: now.timestamp(),
            exp: (now + Duration::seconds(ASSERTION_LIFETIME_SECS)).timestamp(),
            iss: app_id.to_string(),
        };

        let header = Header::new(Algorithm::RS256);

        encode(&header, &claims, &self.key.key).map_err(Error::Signing)
    }
}
