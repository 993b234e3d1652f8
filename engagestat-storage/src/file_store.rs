// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! File-backed persistence
//!
//! Append-only log of [`StoredRecord`] entries, replayed into an in-memory
//! index on open. Later records for the same key win. A torn or corrupt
//! tail entry is skipped with a warning.
//!
//! Entry format: `[len: u32 LE][json payload][crc32: u32 LE]`, after a
//! `ESTL` magic and a version word.

use crate::persistence::{MemoryPersistence, PersistenceError, StatsPersistence, StoredRecord, UserMeta};
use engagestat_core::{BucketSnapshot, CounterField, PeriodKey, UserId};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

const LOG_MAGIC: &[u8; 4] = b"ESTL";
const LOG_VERSION: u32 = 1;
const LOG_FILE: &str = "stats.log";

pub struct FilePersistence {
    data_dir: PathBuf,
    log_path: PathBuf,
    index: MemoryPersistence,
    writer: Mutex<BufWriter<File>>,
    sync: bool,
}

impl std::fmt::Debug for FilePersistence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilePersistence")
            .field("log_path", &self.log_path)
            .field("sync", &self.sync)
            .finish()
    }
}

impl FilePersistence {
    /// Open or create a store under `data_dir`
    pub fn open(data_dir: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let data_dir = data_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&data_dir)?;
        let log_path = data_dir.join(LOG_FILE);

        if !log_path.exists() {
            let mut file = File::create(&log_path)?;
            write_header(&mut file)?;
            file.sync_all()?;
        }

        let index = MemoryPersistence::new();
        let (replayed, valid_len) = replay(&log_path, &index)?;
        let file_len = std::fs::metadata(&log_path)?.len();
        if valid_len < file_len {
            // drop the torn tail so new entries follow a clean boundary
            OpenOptions::new().write(true).open(&log_path)?.set_len(valid_len)?;
        }
        if valid_len == 0 {
            let mut file = File::create(&log_path)?;
            write_header(&mut file)?;
            file.sync_all()?;
        }
        tracing::info!(path = ?log_path, records = replayed, "opened stats log");

        let file = OpenOptions::new().append(true).open(&log_path)?;
        Ok(Self {
            data_dir,
            log_path,
            index,
            writer: Mutex::new(BufWriter::new(file)),
            sync: false,
        })
    }

    /// fsync after every put instead of only flushing to the OS
    pub fn with_sync(mut self, sync: bool) -> Self {
        self.sync = sync;
        self
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Number of distinct keys currently stored
    pub fn len(&self) -> usize {
        self.index.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn append(&self, record: StoredRecord) -> Result<(), PersistenceError> {
        let data = serde_json::to_vec(&record)?;
        // index update stays under the writer lock so it matches log order
        let mut writer = self.writer.lock();
        write_entry(&mut *writer, &data)?;
        writer.flush()?;
        if self.sync {
            writer.get_ref().sync_data()?;
        }
        self.index.apply(record);
        Ok(())
    }

    /// Rewrite the log keeping only the latest record per key
    pub fn compact(&self) -> Result<(), PersistenceError> {
        let new_path = self.data_dir.join(format!("{LOG_FILE}.new"));
        let mut writer = self.writer.lock();
        writer.flush()?;

        let records = self.index.records();
        {
            let file = File::create(&new_path)?;
            let mut out = BufWriter::new(file);
            write_header(&mut out)?;
            for record in &records {
                let data = serde_json::to_vec(record)?;
                write_entry(&mut out, &data)?;
            }
            out.flush()?;
            out.get_ref().sync_all()?;
        }

        std::fs::rename(&new_path, &self.log_path)?;
        let file = OpenOptions::new().append(true).open(&self.log_path)?;
        *writer = BufWriter::new(file);

        tracing::info!(records = records.len(), "compacted stats log");
        Ok(())
    }
}

impl StatsPersistence for FilePersistence {
    fn get_counter(
        &self,
        user: &UserId,
        field: CounterField,
    ) -> Result<Option<u64>, PersistenceError> {
        self.index.get_counter(user, field)
    }

    fn put_counter(
        &self,
        user: &UserId,
        field: CounterField,
        value: u64,
    ) -> Result<(), PersistenceError> {
        self.append(StoredRecord::Counter {
            user: user.clone(),
            field,
            value,
        })
    }

    fn get_bucket(
        &self,
        user: &UserId,
        period: &PeriodKey,
    ) -> Result<Option<BucketSnapshot>, PersistenceError> {
        self.index.get_bucket(user, period)
    }

    fn put_bucket(&self, user: &UserId, bucket: &BucketSnapshot) -> Result<(), PersistenceError> {
        self.append(StoredRecord::Bucket {
            user: user.clone(),
            bucket: bucket.clone(),
        })
    }

    fn bucket_keys(&self) -> Result<Vec<(UserId, PeriodKey)>, PersistenceError> {
        self.index.bucket_keys()
    }

    fn get_user_meta(&self, user: &UserId) -> Result<Option<UserMeta>, PersistenceError> {
        self.index.get_user_meta(user)
    }

    fn put_user_meta(&self, user: &UserId, meta: &UserMeta) -> Result<(), PersistenceError> {
        self.append(StoredRecord::Meta {
            user: user.clone(),
            meta: meta.clone(),
        })
    }
}

fn write_header<W: Write>(out: &mut W) -> std::io::Result<()> {
    out.write_all(LOG_MAGIC)?;
    out.write_all(&LOG_VERSION.to_le_bytes())
}

fn write_entry<W: Write>(out: &mut W, data: &[u8]) -> std::io::Result<()> {
    let crc = crc32fast::hash(data);
    out.write_all(&(data.len() as u32).to_le_bytes())?;
    out.write_all(data)?;
    out.write_all(&crc.to_le_bytes())
}

/// Replay the log into `index`
///
/// Returns the number of applied entries and the byte length of the
/// well-formed prefix.
fn replay(path: &Path, index: &MemoryPersistence) -> Result<(usize, u64), PersistenceError> {
    let file = File::open(path)?;
    let file_len = file.metadata()?.len();
    let mut reader = BufReader::new(file);

    let mut magic = [0u8; 4];
    if reader.read_exact(&mut magic).is_err() {
        return Ok((0, 0));
    }
    if &magic != LOG_MAGIC {
        return Err(PersistenceError::Unavailable(format!(
            "{} is not a stats log",
            path.display()
        )));
    }
    let mut version = [0u8; 4];
    reader.read_exact(&mut version)?;
    let version = u32::from_le_bytes(version);
    if version != LOG_VERSION {
        return Err(PersistenceError::Unavailable(format!(
            "unsupported stats log version {version}"
        )));
    }

    let mut applied = 0;
    let mut valid_len = (LOG_MAGIC.len() + 4) as u64;
    loop {
        let mut len = [0u8; 4];
        if reader.read_exact(&mut len).is_err() {
            break;
        }
        // a corrupt length must not drive the allocation
        let entry_len = u64::from(u32::from_le_bytes(len));
        let remaining = file_len.saturating_sub(valid_len + 4);
        if entry_len + 4 > remaining {
            tracing::warn!(path = ?path, entry_len, remaining, "entry overruns end of stats log, ignoring tail");
            break;
        }
        let mut data = vec![0u8; entry_len as usize];
        let mut crc = [0u8; 4];
        if reader.read_exact(&mut data).is_err() || reader.read_exact(&mut crc).is_err() {
            tracing::warn!(path = ?path, "truncated entry at end of stats log, ignoring");
            break;
        }
        valid_len += 8 + data.len() as u64;
        if crc32fast::hash(&data) != u32::from_le_bytes(crc) {
            tracing::warn!(path = ?path, "CRC mismatch in stats log, skipping entry");
            continue;
        }
        match serde_json::from_slice::<StoredRecord>(&data) {
            Ok(record) => {
                index.apply(record);
                applied += 1;
            }
            Err(e) => tracing::warn!(error = %e, "undecodable stats log entry, skipping"),
        }
    }
    Ok((applied, valid_len))
}
