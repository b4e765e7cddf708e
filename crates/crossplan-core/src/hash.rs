//! Provenance digests recorded in run manifests.
//!
//! A digest is the blake3 hash of a value's JSON form, keyed by what the
//! value is: a logical plan and a stage graph with the same bytes still get
//! different digests. Only ordered containers (`BTreeMap`, `Vec`) may be
//! hashed, or the digest stops being stable across runs.

use blake3::Hasher;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// What a digest was computed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashDomain {
    LogicalPlan,
    StageGraph,
    Implementation,
}

impl HashDomain {
    fn context(self) -> &'static str {
        match self {
            HashDomain::LogicalPlan => "crossplan logical plan v1",
            HashDomain::StageGraph => "crossplan stage graph v1",
            HashDomain::Implementation => "crossplan plan implementation v1",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    pub fn to_hex(&self) -> String {
        blake3::Hash::from(self.0).to_hex().to_string()
    }

    /// Order-independent combination of two digests.
    pub fn combine(self, other: Hash256) -> Hash256 {
        let mut out = self.0;
        for (o, b) in out.iter_mut().zip(other.0) {
            *o ^= b;
        }
        Hash256(out)
    }
}

impl std::fmt::Display for Hash256 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

pub fn digest<T: Serialize>(domain: HashDomain, value: &T) -> Result<Hash256> {
    let bytes = serde_json::to_vec(value)?;
    let mut h = Hasher::new_derive_key(domain.context());
    h.update(&bytes);
    Ok(Hash256(*h.finalize().as_bytes()))
}
