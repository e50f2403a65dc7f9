//! Snapshot persistence: periodic bincode dumps of the catalog and KV store to
//! disk, generalized from this codebase's periodic-snapshot /
//! graceful-shutdown-save pattern. There is no cloud backup here — the
//! catalog and KV store are process-local in-memory state standing in for
//! external collaborators, not a tenant-scoped store that needs off-box
//! replication, so S3/GCS/Azure sync doesn't apply; `object_store` is
//! accordingly not a dependency of this crate.

use crate::catalog::{Catalog, CatalogSnapshot};
use crate::kv::KvStore;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct PersistedState {
    version: u32,
    catalog: CatalogSnapshot,
    kv_entries: Vec<(String, serde_json::Value, Option<i64>)>,
}

/// Owns the on-disk snapshot file for one running instance's catalog + KV
/// store pair.
pub struct SnapshotManager {
    catalog: Catalog,
    kv: KvStore,
    path: PathBuf,
}

impl SnapshotManager {
    pub fn new(catalog: Catalog, kv: KvStore, data_dir: impl AsRef<Path>) -> Self {
        Self {
            catalog,
            kv,
            path: data_dir.as_ref().join("snapshot.bin"),
        }
    }

    /// Serializes current state and atomically replaces the snapshot file
    /// (write to a temp file, then rename) so a crash mid-write never leaves
    /// a truncated snapshot behind.
    pub fn save(&self) -> std::io::Result<()> {
        let state = PersistedState {
            version: SNAPSHOT_VERSION,
            catalog: self.catalog.snapshot(),
            kv_entries: self.kv.snapshot(),
        };
        let bytes = bincode::serialize(&state).map_err(std::io::Error::other)?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("bin.tmp");
        std::fs::File::create(&tmp)?.write_all(&bytes)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Loads the snapshot file into the catalog/KV store if one exists.
    /// Returns `false` (without error) when there is nothing to load yet.
    pub fn load(&self) -> std::io::Result<bool> {
        if !self.path.exists() {
            return Ok(false);
        }
        let mut bytes = Vec::new();
        std::fs::File::open(&self.path)?.read_to_end(&mut bytes)?;
        let state: PersistedState = bincode::deserialize(&bytes).map_err(std::io::Error::other)?;
        if state.version != SNAPSHOT_VERSION {
            warn!(found = state.version, expected = SNAPSHOT_VERSION, "snapshot version mismatch, ignoring");
            return Ok(false);
        }
        self.catalog.restore(state.catalog);
        self.kv.restore(state.kv_entries);
        Ok(true)
    }

    /// Spawns a background task that saves on a fixed interval, matching this
    /// codebase's periodic-snapshot convention; the caller still owns a final
    /// `save()` call on graceful shutdown.
    pub fn start_periodic(self: Arc<Self>, interval: Duration) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match self.save() {
                    Ok(()) => debug!("periodic snapshot saved"),
                    Err(e) => error!(error = %e, "periodic snapshot failed"),
                }
            }
        });
    }
}
