//! Node-level identity (§6: "Node-level identity UUID under key `peer_id_key`
//! in the node-scoped store"). The rest of the workspace treats `peer_id` as
//! an opaque `Uuid` threaded through at construction time; this is the one
//! place that decides where it comes from on a fresh node and persists it
//! across restarts.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Serialize, Deserialize)]
struct IdentityFile {
    peer_id: Uuid,
}

fn identity_path(storage_root: &Path) -> PathBuf {
    storage_root.join("node_identity.json")
}

/// Loads the persisted `peer_id` under `storage_root`, or mints and persists
/// a fresh one on first boot.
pub fn load_or_create(storage_root: &Path) -> color_eyre::Result<Uuid> {
    std::fs::create_dir_all(storage_root)?;
    let path = identity_path(storage_root);

    if let Ok(raw) = std::fs::read_to_string(&path) {
        let parsed: IdentityFile = serde_json::from_str(&raw)?;
        return Ok(parsed.peer_id);
    }

    let peer_id = Uuid::new_v4();
    std::fs::write(&path, serde_json::to_string(&IdentityFile { peer_id })?)?;
    Ok(peer_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_persists_across_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let first = load_or_create(dir.path()).unwrap();
        let second = load_or_create(dir.path()).unwrap();
        assert_eq!(first, second);
    }
}
