//! Stable identity of one input file.
//!
//! The fingerprint is a content hash, so renaming or touching a file keeps
//! its identity while editing its bytes produces a new unit of work.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs::File;
use tokio::io::AsyncReadExt;

/// Number of hex characters kept from the SHA256 digest
const FINGERPRINT_LEN: usize = 16;

/// Stable key for one unit of work
///
/// Equality and hashing consider only the fingerprint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileIdentity {
    /// File name as last seen on disk (e.g. `gundam_rx78.zip`)
    pub name: String,

    /// Content fingerprint (first 16 hex chars of SHA256)
    pub fingerprint: String,

    /// File size in bytes
    pub size: u64,
}

impl FileIdentity {
    pub fn new(name: impl Into<String>, fingerprint: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            fingerprint: fingerprint.into(),
            size,
        }
    }

    /// Compute the identity of a file on disk, streaming its content
    pub async fn from_path(path: &Path) -> std::io::Result<Self> {
        let mut file = File::open(path).await?;
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; 64 * 1024];
        let mut size = 0u64;

        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            size += n as u64;
        }

        let digest = hex::encode(hasher.finalize());
        let name = path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();

        Ok(Self::new(name, &digest[..FINGERPRINT_LEN], size))
    }

    /// Subject name used for content generation (file name without extension)
    pub fn subject(&self) -> &str {
        Path::new(&self.name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(&self.name)
    }
}

impl PartialEq for FileIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.fingerprint == other.fingerprint
    }
}

impl Eq for FileIdentity {}

impl Hash for FileIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.fingerprint.hash(state);
    }
}

impl fmt::Display for FileIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.fingerprint)
    }
}
