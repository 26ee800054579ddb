//! Plan artifact storage backends for Terraflow.

pub mod local;
pub mod memory;

pub use local::LocalPlanStorage;
pub use memory::MemoryPlanStorage;

use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of an artifact's bytes.
pub(crate) fn checksum(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}
