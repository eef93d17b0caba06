//! Compressed state snapshots for fast sync.
//!
//! A snapshot is the bincode encoding of the full state plus the tip it was
//! taken at, gzip-compressed, written alongside a `.sha256` sidecar with the
//! hex digest of the compressed bytes and a small JSON manifest. Loading
//! verifies the digest before decompressing. The newest `keep` snapshots are
//! retained; older ones are pruned.

use crate::consensus::ChainTip;
use crate::execution::ChainState;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::{self, Read, Write};
use std::path::Path;
use std::{fs, time};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SnapshotPayload {
    pub height: u64,
    pub tip: ChainTip,
    pub state: ChainState,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SnapshotManifest {
    pub height: u64,
    pub created_unix_s: u64,
    pub state_root_hex: String,
    pub format: String,
}

pub fn snapshot_path(dir: &str, height: u64) -> String {
    format!("{dir}/state_{height:020}.bin.gz")
}

pub fn digest_path(dir: &str, height: u64) -> String {
    format!("{dir}/state_{height:020}.bin.gz.sha256")
}

pub fn manifest_path(dir: &str, height: u64) -> String {
    format!("{dir}/state_{height:020}.manifest.json")
}

pub fn write_snapshot(dir: &str, payload: &SnapshotPayload) -> io::Result<()> {
    fs::create_dir_all(dir)?;

    let raw = bincode::serialize(payload)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("snapshot encode: {e}")))?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&raw)?;
    let compressed = encoder.finish()?;

    let digest = hex::encode(Sha256::digest(&compressed));
    let height = payload.height;
    fs::write(snapshot_path(dir, height), &compressed)?;
    fs::write(digest_path(dir, height), format!("{digest}\n"))?;

    let now = time::SystemTime::now()
        .duration_since(time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let manifest = SnapshotManifest {
        height,
        created_unix_s: now,
        state_root_hex: payload.state.state_root().to_hex(),
        format: "bincode-gzip-v1".into(),
    };
    let s = serde_json::to_string_pretty(&manifest)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("manifest encode: {e}")))?;
    fs::write(manifest_path(dir, height), s)?;
    Ok(())
}

/// Verify the sidecar digest and decode the snapshot.
pub fn load_snapshot(dir: &str, height: u64) -> io::Result<SnapshotPayload> {
    let compressed = fs::read(snapshot_path(dir, height))?;
    let expected = fs::read_to_string(digest_path(dir, height))?;
    let actual = hex::encode(Sha256::digest(&compressed));
    if expected.trim() != actual {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("snapshot digest mismatch at height {height}: expected {}, got {actual}", expected.trim()),
        ));
    }

    let mut decoder = GzDecoder::new(&compressed[..]);
    let mut raw = Vec::new();
    decoder.read_to_end(&mut raw)?;
    bincode::deserialize(&raw)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("snapshot decode: {e}")))
}

pub fn list_snapshot_heights(dir: &str) -> io::Result<Vec<u64>> {
    if !Path::new(dir).exists() {
        return Ok(vec![]);
    }
    let mut out = vec![];
    for ent in fs::read_dir(dir)? {
        let ent = ent?;
        let name = ent.file_name();
        let name = name.to_string_lossy();
        if name.ends_with(".bin.gz") {
            if let Some(h) = name.strip_prefix("state_").and_then(|s| s.split('.').next()) {
                if let Ok(v) = h.parse::<u64>() {
                    out.push(v);
                }
            }
        }
    }
    out.sort_unstable();
    Ok(out)
}

pub fn latest_snapshot_height(dir: &str) -> io::Result<Option<u64>> {
    Ok(list_snapshot_heights(dir)?.pop())
}

pub fn prune_snapshots(dir: &str, keep: usize) -> io::Result<()> {
    let hs = list_snapshot_heights(dir)?;
    if hs.len() <= keep {
        return Ok(());
    }
    for h in &hs[..hs.len() - keep] {
        let _ = fs::remove_file(snapshot_path(dir, *h));
        let _ = fs::remove_file(digest_path(dir, *h));
        let _ = fs::remove_file(manifest_path(dir, *h));
    }
    Ok(())
}
