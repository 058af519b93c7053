//! Gzip-compressed JSON snapshot of pipeline state.
//!
//! A snapshot captures metrics, the record cache, the seen-fingerprint set,
//! and the runtime config as one unit. Writes go to a sibling temp file that
//! is renamed into place, so readers never observe a half-written snapshot.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{Read, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use curator_shared::{CuratorError, Fingerprint, PipelineConfig, Record, Result};

use crate::metrics::MetricsSnapshot;

/// Bumped whenever the serialized layout changes incompatibly.
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    pub metrics: MetricsSnapshot,
    pub cache: BTreeMap<String, Record>,
    pub seen_fingerprints: BTreeSet<Fingerprint>,
    pub config: PipelineConfig,
    pub saved_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn new(
        metrics: MetricsSnapshot,
        cache: BTreeMap<String, Record>,
        seen_fingerprints: BTreeSet<Fingerprint>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            metrics,
            cache,
            seen_fingerprints,
            config,
            saved_at: Utc::now(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let json = serde_json::to_vec(self)
            .map_err(|e| CuratorError::Snapshot(format!("serialize: {e}")))?;
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(&json)
            .map_err(|e| CuratorError::Snapshot(format!("compress: {e}")))?;
        encoder
            .finish()
            .map_err(|e| CuratorError::Snapshot(format!("compress: {e}")))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut json = Vec::new();
        GzDecoder::new(bytes)
            .read_to_end(&mut json)
            .map_err(|e| CuratorError::Snapshot(format!("decompress: {e}")))?;
        let snapshot: Self = serde_json::from_slice(&json)
            .map_err(|e| CuratorError::Snapshot(format!("deserialize: {e}")))?;

        if snapshot.version != SNAPSHOT_VERSION {
            return Err(CuratorError::Snapshot(format!(
                "unsupported snapshot version {} (expected {SNAPSHOT_VERSION})",
                snapshot.version
            )));
        }
        Ok(snapshot)
    }

    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let bytes = self.encode()?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| CuratorError::io(parent, e))?;
        }

        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = std::path::PathBuf::from(tmp);

        fs::write(&tmp, &bytes).map_err(|e| CuratorError::io(&tmp, e))?;
        fs::rename(&tmp, path).map_err(|e| CuratorError::io(path, e))?;

        debug!(
            bytes = bytes.len(),
            records = self.cache.len(),
            fingerprints = self.seen_fingerprints.len(),
            "snapshot written"
        );
        Ok(())
    }

    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn read_from(path: &Path) -> Result<Self> {
        let bytes = fs::read(path).map_err(|e| CuratorError::io(path, e))?;
        Self::decode(&bytes)
    }
}
