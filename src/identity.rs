//! Node-identity persistence.
//!
//! Each process is identified by a 32-bit pseudo-random integer, generated
//! on first start and persisted to a JSON file so restarts keep the same
//! identity. The heartbeat lease (see [`crate::core::lease`]) keys on it.

use crate::utils::error::Result;
use rand::Rng;
use std::path::Path;

/// Default file name for the persisted node id.
pub const NODE_ID_FILE: &str = "node_id.json";

/// Generates a fresh node id in `0..1_000_000`.
fn generate_node_id() -> u32 {
    rand::thread_rng().gen_range(0..1_000_000)
}

/// Loads the node id from `path`, generating and persisting a fresh one
/// if the file does not exist.
///
/// The file holds a single decimal integer.
pub fn load_or_generate(path: impl AsRef<Path>) -> Result<u32> {
    let path = path.as_ref();
    if path.exists() {
        let data = std::fs::read_to_string(path)?;
        let node_id: u32 = serde_json::from_str(data.trim())?;
        return Ok(node_id);
    }
    let node_id = generate_node_id();
    std::fs::write(path, serde_json::to_string(&node_id)?)?;
    Ok(node_id)
}
