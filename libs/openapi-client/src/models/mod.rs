//! API models

mod bundle;
mod outcome;
mod state;

pub use bundle::*;
pub use outcome::*;
pub use state::*;

use sha2::{Digest, Sha256};

/// Header carrying the device identity on every channel request
pub const DEVICE_ID_HEADER: &str = "X-Device-ID";

/// SHA-256 of the JSON serialization of `value`, hex encoded
pub fn json_sha256<T: serde::Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let bytes = serde_json::to_vec(value)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}
