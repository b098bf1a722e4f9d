use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::{CacheError, CacheResult};
use crate::store::{CacheRecord, KvStore, StoreOp};

const MAGIC: &[u8; 4] = b"CFRC";
const FORMAT_VERSION: u16 = 1;

/// Store header: magic, format version, update sequence, record count.
const STORE_HEADER_SIZE: usize = 4 + 2 + 8 + 4;

/// Record header: 4 bytes length + 4 bytes CRC.
const RECORD_HEADER_SIZE: usize = 8;

/// File-backed key-value store.
///
/// Each store is one file under the root directory. Every transaction
/// rewrites the whole file through a temporary sibling that is synced and then
/// renamed over the old one, so a reader sees either the previous or the new
/// contents.
///
/// On-disk format:
/// ```text
/// [4 bytes: magic "CFRC"]
/// [2 bytes: format version (little-endian u16)]
/// [8 bytes: update sequence number (little-endian u64)]
/// [4 bytes: record count (little-endian u32)]
/// then, per record:
/// [4 bytes: payload length (little-endian u32)]
/// [4 bytes: CRC32 of payload (little-endian u32)]
/// [N bytes: payload (bincode-serialized CacheRecord)]
/// ```
///
/// A record that fails its length or CRC check is logged and recovery stops
/// there, keeping the records before it.
pub struct FileKvStore {
    root: PathBuf,
}

impl FileKvStore {
    /// Use `root` as the store directory. It is created on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Update sequence number of the last flush of `store`; zero if it was
    /// never written.
    pub async fn sequence(&self, store: &str) -> CacheResult<u64> {
        Ok(self.read_store(store).await?.0)
    }

    fn store_path(&self, store: &str) -> CacheResult<PathBuf> {
        let valid = !store.is_empty()
            && store
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(CacheError::InvalidStoreId(store.to_string()));
        }
        Ok(self.root.join(format!("{store}.cache")))
    }

    async fn read_store(&self, store: &str) -> CacheResult<(u64, BTreeMap<String, Vec<u8>>)> {
        let path = self.store_path(store)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => decode(store, &bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok((0, BTreeMap::new())),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_store(
        &self,
        store: &str,
        seq: u64,
        entries: &BTreeMap<String, Vec<u8>>,
    ) -> CacheResult<()> {
        let path = self.store_path(store)?;
        let bytes = encode(seq, entries)?;

        tokio::fs::create_dir_all(&self.root).await?;
        let tmp = path.with_extension("cache.tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, &path).await?;

        debug!(store, seq, records = entries.len(), bytes = bytes.len(), "store flushed");
        Ok(())
    }
}

#[async_trait]
impl KvStore for FileKvStore {
    async fn load(&self, store: &str) -> CacheResult<Vec<CacheRecord>> {
        let (_, entries) = self.read_store(store).await?;
        Ok(entries
            .into_iter()
            .map(|(rel_path, data)| CacheRecord { rel_path, data })
            .collect())
    }

    async fn transact(&self, store: &str, ops: Vec<StoreOp>) -> CacheResult<()> {
        let (seq, mut entries) = self.read_store(store).await?;
        for op in ops {
            match op {
                StoreOp::Put(record) => {
                    entries.insert(record.rel_path, record.data);
                }
                StoreOp::Delete(rel_path) => {
                    entries.remove(&rel_path);
                }
                StoreOp::Clear => entries.clear(),
            }
        }
        self.write_store(store, seq + 1, &entries)
            .await
            .map_err(|e| match e {
                CacheError::Io(io) => CacheError::Transaction {
                    store: store.to_string(),
                    reason: io.to_string(),
                },
                other => other,
            })
    }

    async fn destroy(&self, store: &str) -> CacheResult<bool> {
        let path = self.store_path(store)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

fn encode(seq: u64, entries: &BTreeMap<String, Vec<u8>>) -> CacheResult<Vec<u8>> {
    let mut out = Vec::with_capacity(STORE_HEADER_SIZE);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(&seq.to_le_bytes());
    out.extend_from_slice(&(entries.len() as u32).to_le_bytes());

    for (rel_path, data) in entries {
        let record = CacheRecord::new(rel_path.clone(), data.clone());
        let payload =
            bincode::serialize(&record).map_err(|e| CacheError::Serialization(e.to_string()))?;
        out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        out.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
        out.extend_from_slice(&payload);
    }
    Ok(out)
}

fn decode(store: &str, bytes: &[u8]) -> CacheResult<(u64, BTreeMap<String, Vec<u8>>)> {
    let corrupt = |reason: &str| CacheError::Corrupt {
        store: store.to_string(),
        reason: reason.to_string(),
    };

    if bytes.len() < STORE_HEADER_SIZE || &bytes[0..4] != MAGIC {
        return Err(corrupt("bad store header"));
    }
    let version = u16::from_le_bytes([bytes[4], bytes[5]]);
    if version != FORMAT_VERSION {
        return Err(corrupt(&format!("unsupported format version {version}")));
    }
    let mut seq_buf = [0u8; 8];
    seq_buf.copy_from_slice(&bytes[6..14]);
    let seq = u64::from_le_bytes(seq_buf);
    let count = u32::from_le_bytes([bytes[14], bytes[15], bytes[16], bytes[17]]);

    let mut entries = BTreeMap::new();
    let mut offset = STORE_HEADER_SIZE;
    while offset + RECORD_HEADER_SIZE <= bytes.len() {
        let h = &bytes[offset..offset + RECORD_HEADER_SIZE];
        let length = u32::from_le_bytes([h[0], h[1], h[2], h[3]]) as usize;
        let expected_crc = u32::from_le_bytes([h[4], h[5], h[6], h[7]]);

        let start = offset + RECORD_HEADER_SIZE;
        if length == 0 || start + length > bytes.len() {
            warn!(store, offset, length, "torn cache record; stopping recovery");
            break;
        }

        let payload = &bytes[start..start + length];
        let actual_crc = crc32fast::hash(payload);
        if actual_crc != expected_crc {
            warn!(
                store,
                offset,
                expected = expected_crc,
                actual = actual_crc,
                "CRC mismatch in cache record; stopping recovery"
            );
            break;
        }

        match bincode::deserialize::<CacheRecord>(payload) {
            Ok(record) => {
                entries.insert(record.rel_path, record.data);
            }
            Err(e) => {
                warn!(store, offset, error = %e, "undecodable cache record; stopping recovery");
                break;
            }
        }
        offset = start + length;
    }

    if entries.len() != count as usize {
        warn!(store, expected = count, recovered = entries.len(), "cache store partially recovered");
    }
    debug!(store, seq, recovered = entries.len(), "store loaded");
    Ok((seq, entries))
}
