//! The Write-Ahead Log. The buffer pool appends a page record (before and
//! after image) and forces the log before any page write reaches disk;
//! commit and abort append their own marker records. Records are bincode
//! payloads framed by a length and a crc32 checksum. Replay is out of
//! scope; the file can be scanned back for inspection and verification.

use crate::error::{DbError, DbResult};
use crate::page::HeapPage;
use crate::transaction::TransactionId;
use crate::PageId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A Log Sequence Number: the byte offset of a record in the log file.
pub type Lsn = u64;

/// Frame prefix of every record: payload length, then crc32 of the payload.
const FRAME_LEN: usize = 8;

/// One log record.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub enum WalRecord {
    /// A page is about to be written to disk, or is being captured at
    /// commit: both images plus the transaction responsible.
    PageWrite {
        tid: TransactionId,
        pid: PageId,
        before: Vec<u8>,
        after: Vec<u8>,
    },
    Commit { tid: TransactionId },
    Abort { tid: TransactionId },
}

impl WalRecord {
    pub fn tid(&self) -> TransactionId {
        match self {
            WalRecord::PageWrite { tid, .. } => *tid,
            WalRecord::Commit { tid } => *tid,
            WalRecord::Abort { tid } => *tid,
        }
    }
}

/// The sink the buffer pool writes through. Object-safe so tests can wrap
/// the real file in a recording shim.
pub trait WalSink: Send + Sync {
    /// Append a page record carrying both images. Must precede the disk
    /// write of `after`, and must be forced before that write happens.
    fn log_write(&self, tid: TransactionId, before: &HeapPage, after: &HeapPage) -> DbResult<Lsn>;

    fn log_commit(&self, tid: TransactionId) -> DbResult<Lsn>;

    fn log_abort(&self, tid: TransactionId) -> DbResult<Lsn>;

    /// Durably sync everything appended so far.
    fn force(&self) -> DbResult<()>;
}

struct WalFileInner {
    file: File,
    next_lsn: Lsn,
}

/// The file-backed log.
pub struct WalFile {
    inner: Mutex<WalFileInner>,
    path: PathBuf,
}

impl WalFile {
    /// Open (or create) the log at `path`, appending after any existing
    /// records.
    pub fn open(path: impl AsRef<Path>) -> DbResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        let next_lsn = file.metadata()?.len();
        Ok(Self {
            inner: Mutex::new(WalFileInner { file, next_lsn }),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, record: &WalRecord) -> DbResult<Lsn> {
        let payload = bincode::serialize(record)
            .map_err(|e| DbError::InvalidState(format!("wal encode: {e}")))?;
        let crc = crc32fast::hash(&payload);

        let mut inner = self.inner.lock();
        let lsn = inner.next_lsn;
        inner.file.seek(SeekFrom::Start(lsn))?;
        inner.file.write_all(&(payload.len() as u32).to_be_bytes())?;
        inner.file.write_all(&crc.to_be_bytes())?;
        inner.file.write_all(&payload)?;
        inner.next_lsn = lsn + (FRAME_LEN + payload.len()) as u64;
        Ok(lsn)
    }

    /// Scan every record from the start of the file, verifying checksums.
    pub fn records(&self) -> DbResult<Vec<WalRecord>> {
        let mut inner = self.inner.lock();
        let end = inner.next_lsn as usize;
        let mut buf = Vec::with_capacity(end);
        inner.file.seek(SeekFrom::Start(0))?;
        std::io::Read::by_ref(&mut inner.file)
            .take(end as u64)
            .read_to_end(&mut buf)?;

        let mut records = Vec::new();
        let mut pos = 0;
        while pos < buf.len() {
            if pos + FRAME_LEN > buf.len() {
                return Err(DbError::WalCorrupted(format!(
                    "truncated frame at offset {pos}"
                )));
            }
            let len_raw: [u8; 4] = buf[pos..pos + 4].try_into().expect("sliced to 4 bytes");
            let crc_raw: [u8; 4] = buf[pos + 4..pos + 8].try_into().expect("sliced to 4 bytes");
            let len = u32::from_be_bytes(len_raw) as usize;
            let start = pos + FRAME_LEN;
            if start + len > buf.len() {
                return Err(DbError::WalCorrupted(format!(
                    "record at offset {pos} runs past end of log"
                )));
            }
            let payload = &buf[start..start + len];
            if crc32fast::hash(payload) != u32::from_be_bytes(crc_raw) {
                return Err(DbError::WalCorrupted(format!(
                    "checksum mismatch at offset {pos}"
                )));
            }
            let record = bincode::deserialize(payload)
                .map_err(|e| DbError::WalCorrupted(format!("undecodable record at {pos}: {e}")))?;
            records.push(record);
            pos = start + len;
        }
        Ok(records)
    }
}

impl WalSink for WalFile {
    fn log_write(&self, tid: TransactionId, before: &HeapPage, after: &HeapPage) -> DbResult<Lsn> {
        log::trace!("wal: page record for {} by {}", after.pid(), tid);
        self.append(&WalRecord::PageWrite {
            tid,
            pid: after.pid(),
            before: before.serialize(),
            after: after.serialize(),
        })
    }

    fn log_commit(&self, tid: TransactionId) -> DbResult<Lsn> {
        self.append(&WalRecord::Commit { tid })
    }

    fn log_abort(&self, tid: TransactionId) -> DbResult<Lsn> {
        self.append(&WalRecord::Abort { tid })
    }

    fn force(&self) -> DbResult<()> {
        let inner = self.inner.lock();
        inner.file.sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuple::{Field, Tuple, TupleDesc, Type};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn sample_pages() -> (HeapPage, HeapPage) {
        let desc = Arc::new(TupleDesc::unnamed(vec![Type::Int]));
        let pid = PageId::new(3, 0);
        let before = HeapPage::new(pid, &HeapPage::empty_page_data(64), desc.clone()).unwrap();
        let mut after = before.clone();
        let mut t = Tuple::new(desc, vec![Field::Int(99)]).unwrap();
        after.insert_tuple(&mut t).unwrap();
        (before, after)
    }

    #[test]
    fn records_round_trip_through_the_file() {
        let dir = tempdir().unwrap();
        let wal = WalFile::open(dir.path().join("test.wal")).unwrap();
        let tid = TransactionId::new();
        let (before, after) = sample_pages();

        wal.log_write(tid, &before, &after).unwrap();
        wal.log_commit(tid).unwrap();
        wal.force().unwrap();

        let records = wal.records().unwrap();
        assert_eq!(records.len(), 2);
        match &records[0] {
            WalRecord::PageWrite {
                tid: rec_tid,
                pid,
                before: b,
                after: a,
            } => {
                assert_eq!(*rec_tid, tid);
                assert_eq!(*pid, PageId::new(3, 0));
                assert_eq!(*b, before.serialize());
                assert_eq!(*a, after.serialize());
            }
            other => panic!("expected a page record, got {other:?}"),
        }
        assert!(matches!(records[1], WalRecord::Commit { tid: t } if t == tid));
    }

    #[test]
    fn reopen_appends_after_existing_records() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.wal");
        let tid = TransactionId::new();

        {
            let wal = WalFile::open(&path).unwrap();
            wal.log_commit(tid).unwrap();
            wal.force().unwrap();
        }
        let wal = WalFile::open(&path).unwrap();
        wal.log_abort(tid).unwrap();
        let records = wal.records().unwrap();
        assert_eq!(records.len(), 2);
        assert!(matches!(records[0], WalRecord::Commit { .. }));
        assert!(matches!(records[1], WalRecord::Abort { .. }));
    }

    #[test]
    fn corruption_is_detected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.wal");
        {
            let wal = WalFile::open(&path).unwrap();
            wal.log_commit(TransactionId::new()).unwrap();
            wal.force().unwrap();
        }
        // Flip a payload byte behind the checksum.
        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        std::fs::write(&path, &bytes).unwrap();

        let wal = WalFile::open(&path).unwrap();
        assert!(matches!(wal.records(), Err(DbError::WalCorrupted(_))));
    }
}
