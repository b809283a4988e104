//! Document fingerprints and block identity.
//!
//! A [`Fingerprint`] is the SHA-256 digest of a document's exact bytes. It is
//! only ever compared for equality against the hash stored at the last sync.
//! A [`BlockKey`] identifies one persisted block by position: topic code ×
//! stage × module.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;

use crate::models::{ModuleCode, StageId};

/// Lower-case hex SHA-256 of a source document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when `stored` (a hash read back from the store) names the same bytes.
    pub fn matches(&self, stored: &str) -> bool {
        self.0 == stored
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn fingerprint(bytes: &[u8]) -> Fingerprint {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    Fingerprint(format!("{:x}", hasher.finalize()))
}

/// Normalized form of a topic code as stored: trimmed and upper-cased.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

/// Composite identity of one persisted block.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct BlockKey {
    pub topic_code: String,
    pub stage: StageId,
    pub module_code: ModuleCode,
}

impl BlockKey {
    pub fn new(topic_code: &str, stage: StageId, module_code: ModuleCode) -> Self {
        Self {
            topic_code: normalize_code(topic_code),
            stage,
            module_code,
        }
    }
}

impl fmt::Display for BlockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.topic_code, self.stage, self.module_code)
    }
}
