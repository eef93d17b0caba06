//! Append-only block store.
//!
//! One file per height under `blocks/`, a JSON index mapping block hashes to
//! heights, and an LRU read cache for the recent tail of the chain. Writes
//! fsync before the index is updated; the index itself goes through a tmp
//! file rename.

use crate::types::{Block, Hash32, Height};
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::{self, Read, Write};
use std::num::NonZeroUsize;
use std::path::PathBuf;
use thiserror::Error;
use tracing::warn;

const CACHE_SIZE: usize = 256;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage i/o: {0}")]
    Io(#[from] io::Error),
    #[error("corrupt block file at height {0}")]
    Corrupt(Height),
    #[error("non-consecutive height: have {have}, tried {tried}")]
    NonConsecutive { have: Height, tried: Height },
}

#[derive(Default, Serialize, Deserialize)]
struct IndexFile {
    by_hash: HashMap<String, Height>,
    best_height: Height,
}

pub struct BlockStore {
    dir: PathBuf,
    idx_path: PathBuf,
    idx: Mutex<IndexFile>,
    cache: Mutex<LruCache<Height, Block>>,
}

impl BlockStore {
    pub fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = root.into();
        fs::create_dir_all(&dir)?;
        let idx_path = dir.join("index.json");
        let idx = if idx_path.exists() {
            serde_json::from_str(&fs::read_to_string(&idx_path)?).unwrap_or_default()
        } else {
            IndexFile::default()
        };
        let cap = NonZeroUsize::new(CACHE_SIZE).unwrap_or(NonZeroUsize::MIN);
        Ok(Self {
            dir,
            idx_path,
            idx: Mutex::new(idx),
            cache: Mutex::new(LruCache::new(cap)),
        })
    }

    fn path_for(&self, height: Height) -> PathBuf {
        self.dir.join(format!("{height:012}.bin"))
    }

    fn persist_index(&self) {
        let idx = self.idx.lock();
        let tmp = self.idx_path.with_extension("tmp");
        if let Ok(s) = serde_json::to_string(&*idx) {
            if fs::write(&tmp, &s).is_ok() {
                let _ = fs::rename(&tmp, &self.idx_path);
            }
        }
    }

    pub fn best_height(&self) -> Height {
        self.idx.lock().best_height
    }

    /// Append the next block. Heights must be strictly consecutive.
    pub fn put(&self, block: &Block) -> Result<(), StoreError> {
        let height = block.header.height;
        let have = self.best_height();
        if height != have + 1 {
            return Err(StoreError::NonConsecutive { have, tried: height });
        }

        let bytes = bincode::serialize(block).map_err(|_| StoreError::Corrupt(height))?;
        let mut f = fs::File::create(self.path_for(height))?;
        f.write_all(&bytes)?;
        if let Err(e) = f.sync_all() {
            warn!("block fsync failed: {e}");
        }

        {
            let mut idx = self.idx.lock();
            idx.by_hash.insert(block.id().to_hex(), height);
            if height > idx.best_height {
                idx.best_height = height;
            }
        }
        self.persist_index();
        self.cache.lock().put(height, block.clone());
        Ok(())
    }

    pub fn get(&self, height: Height) -> Option<Block> {
        {
            let mut cache = self.cache.lock();
            if let Some(b) = cache.get(&height) {
                return Some(b.clone());
            }
        }
        let mut f = fs::File::open(self.path_for(height)).ok()?;
        let mut buf = Vec::new();
        f.read_to_end(&mut buf).ok()?;
        let block: Block = bincode::deserialize(&buf).ok()?;
        self.cache.lock().put(height, block.clone());
        Some(block)
    }

    pub fn get_by_hash(&self, hash: &Hash32) -> Option<Block> {
        let height = *self.idx.lock().by_hash.get(&hash.to_hex())?;
        self.get(height)
    }

    /// Blocks in `[from, to]`, stopping at the first gap.
    pub fn range(&self, from: Height, to: Height) -> Vec<Block> {
        let mut out = Vec::new();
        for h in from..=to {
            match self.get(h) {
                Some(b) => out.push(b),
                None => break,
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::SignatureBytes;
    use crate::types::{BlockHeader, PROTOCOL_VERSION};

    fn block(height: Height, prev: Hash32) -> Block {
        Block {
            header: BlockHeader {
                height,
                prev_hash: prev,
                timestamp: 1_000 + height,
                slot: height,
                proposer: "cpcvalcons1p".into(),
                tx_root: Hash32::zero(),
                state_root: Hash32::zero(),
                compute_root: Hash32::zero(),
                version: PROTOCOL_VERSION,
            },
            txs: vec![],
            signature: SignatureBytes(vec![0; 64]),
        }
    }

    #[test]
    fn put_get_roundtrip_and_range() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlockStore::open(dir.path()).unwrap();

        let b1 = block(1, Hash32::zero());
        let b2 = block(2, b1.id());
        store.put(&b1).unwrap();
        store.put(&b2).unwrap();

        assert_eq!(store.best_height(), 2);
        assert_eq!(store.get(1).unwrap().id(), b1.id());
        assert_eq!(store.get_by_hash(&b2.id()).unwrap().header.height, 2);
        assert_eq!(store.range(1, 10).len(), 2);
    }

    #[test]
    fn rejects_height_gaps() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlockStore::open(dir.path()).unwrap();
        store.put(&block(1, Hash32::zero())).unwrap();
        let err = store.put(&block(5, Hash32::zero())).unwrap_err();
        assert!(matches!(err, StoreError::NonConsecutive { have: 1, tried: 5 }));
    }

    #[test]
    fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let b1 = block(1, Hash32::zero());
        {
            let store = BlockStore::open(dir.path()).unwrap();
            store.put(&b1).unwrap();
        }
        let store = BlockStore::open(dir.path()).unwrap();
        assert_eq!(store.best_height(), 1);
        assert_eq!(store.get(1).unwrap().id(), b1.id());
    }
}
