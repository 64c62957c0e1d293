//! # raft-storage
//!
//! why: provide durable persistence for raft state using standard rust fs apis
//! relations: implements raft-engine's Storage trait; the engine keeps InMemoryStorage for tests
//! what: FileStorage (meta.json + append-only log.bin), StorageError

use raft_engine::{Index, ServerId, Storage, Term};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

pub use raft_engine::InMemoryStorage;

// -- log record layout --

const RECORD_TERM: usize = 0;
const RECORD_INDEX: usize = RECORD_TERM + 4;
const RECORD_LEN: usize = RECORD_INDEX + 8;
/// bytes before the command in every log.bin record
pub const RECORD_HEADER_LEN: usize = RECORD_LEN + 4;

/// ways the files on disk can disagree with what raft expects
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("log record at byte {offset} is corrupt: {reason}")]
    CorruptRecord { offset: u64, reason: String },

    #[error("entry {got} appended out of order, expected {expected}")]
    OutOfOrder { expected: Index, got: Index },

    #[error("cannot truncate from negative index {0}")]
    NegativeIndex(Index),

    #[error("invalid metadata: {0}")]
    Metadata(#[from] serde_json::Error),
}

impl From<StorageError> for io::Error {
    fn from(e: StorageError) -> Self {
        let kind = match e {
            StorageError::OutOfOrder { .. } | StorageError::NegativeIndex(_) => {
                io::ErrorKind::InvalidInput
            }
            StorageError::CorruptRecord { .. } | StorageError::Metadata(_) => {
                io::ErrorKind::InvalidData
            }
        };
        io::Error::new(kind, e)
    }
}

// -- file storage implementation --

/// file-based storage implementation using std::fs
///
/// stores raft state in a directory with:
/// - meta.json: term and voted_for, replaced atomically
/// - log.bin: append-only records of `term(4) index(8) len(4) command`
///
/// every write is fsynced before it returns, and so is the directory entry of
/// every file it creates or renames. the log is also cached in memory so reads
/// can borrow it.
#[derive(Debug)]
pub struct FileStorage {
    /// directory path for storing state files
    dir: PathBuf,
    log_file: File,
    /// end of the last complete record
    log_end: u64,
    entries: Vec<(Term, Vec<u8>)>,
    /// byte offset of each record in log.bin
    offsets: Vec<u64>,
}

/// metadata structure for term and vote
#[derive(serde::Serialize, serde::Deserialize, Default)]
struct MetaData {
    term: Term,
    voted_for: Option<ServerId>,
}

impl FileStorage {
    /// open the storage at the given directory, recovering the log
    /// creates the directory if it doesn't exist
    pub fn new(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let log_path = dir.join("log.bin");
        let created = !log_path.exists();
        let mut log_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&log_path)?;
        if created {
            sync_dir(&dir)?;
        }

        let mut bytes = Vec::new();
        log_file.read_to_end(&mut bytes)?;
        let (entries, offsets, log_end) = parse_log(&bytes)?;
        if log_end < bytes.len() as u64 {
            warn!(
                dir = %dir.display(),
                valid = log_end,
                found = bytes.len(),
                "dropping torn record at the end of the log"
            );
            log_file.set_len(log_end)?;
            log_file.sync_all()?;
        }
        debug!(dir = %dir.display(), entries = entries.len(), "opened file storage");

        Ok(Self {
            dir,
            log_file,
            log_end,
            entries,
            offsets,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// get the path to the metadata file
    fn meta_path(&self) -> PathBuf {
        self.dir.join("meta.json")
    }
}

/// makes created, renamed or removed entries of `dir` durable
#[cfg(unix)]
fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

/// directories cannot be opened for syncing here; renames are durable once they return
#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}

/// parses complete records; stops at the first incomplete one
fn parse_log(bytes: &[u8]) -> io::Result<(Vec<(Term, Vec<u8>)>, Vec<u64>, u64)> {
    let mut entries = Vec::new();
    let mut offsets = Vec::new();
    let mut pos = 0usize;
    while bytes.len() - pos >= RECORD_HEADER_LEN {
        let header = &bytes[pos..pos + RECORD_HEADER_LEN];
        let term = Term::from_le_bytes(field(header, RECORD_TERM));
        let index = Index::from_le_bytes(field(header, RECORD_INDEX));
        let len = u32::from_le_bytes(field(header, RECORD_LEN)) as usize;

        let expected = entries.len() as Index;
        if index != expected {
            return Err(StorageError::CorruptRecord {
                offset: pos as u64,
                reason: format!("holds index {index}, expected {expected}"),
            }
            .into());
        }
        let start = pos + RECORD_HEADER_LEN;
        if bytes.len() - start < len {
            break;
        }
        entries.push((term, bytes[start..start + len].to_vec()));
        offsets.push(pos as u64);
        pos = start + len;
    }
    Ok((entries, offsets, pos as u64))
}

fn field<const N: usize>(header: &[u8], offset: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&header[offset..offset + N]);
    out
}

impl Storage for FileStorage {
    fn save_term_and_vote(&mut self, term: Term, voted_for: Option<ServerId>) -> io::Result<()> {
        let meta = MetaData { term, voted_for };
        let json = serde_json::to_string_pretty(&meta).map_err(StorageError::from)?;

        // atomic write: write to temp file then rename
        let temp_path = self.dir.join("meta.tmp");
        let mut file = File::create(&temp_path)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
        fs::rename(&temp_path, self.meta_path())?;
        // the rename itself lives in the directory
        sync_dir(&self.dir)?;

        Ok(())
    }

    fn load_term_and_vote(&self) -> io::Result<(Term, Option<ServerId>)> {
        let path = self.meta_path();
        if !path.exists() {
            return Ok((0, None)); // default for new servers
        }

        let contents = fs::read_to_string(&path)?;
        let meta: MetaData = serde_json::from_str(&contents).map_err(StorageError::from)?;

        Ok((meta.term, meta.voted_for))
    }

    fn append(&mut self, term: Term, index: Index, command: &[u8]) -> io::Result<()> {
        let expected = self.size();
        if index != expected {
            return Err(StorageError::OutOfOrder {
                expected,
                got: index,
            }
            .into());
        }
        let len = u32::try_from(command.len()).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("command of {} bytes is too large for a log record", command.len()),
            )
        })?;

        let mut record = Vec::with_capacity(RECORD_HEADER_LEN + command.len());
        record.extend_from_slice(&term.to_le_bytes());
        record.extend_from_slice(&index.to_le_bytes());
        record.extend_from_slice(&len.to_le_bytes());
        record.extend_from_slice(command);

        self.log_file.seek(SeekFrom::Start(self.log_end))?;
        self.log_file.write_all(&record)?;
        self.log_file.sync_data()?;

        self.offsets.push(self.log_end);
        self.log_end += record.len() as u64;
        self.entries.push((term, command.to_vec()));
        Ok(())
    }

    fn read(&self, index: Index) -> io::Result<Option<(Term, &[u8])>> {
        let Ok(slot) = usize::try_from(index) else {
            return Ok(None);
        };
        Ok(self
            .entries
            .get(slot)
            .map(|(term, command)| (*term, command.as_slice())))
    }

    fn truncate_from(&mut self, from_index: Index) -> io::Result<()> {
        let slot = usize::try_from(from_index).map_err(|_| StorageError::NegativeIndex(from_index))?;
        let Some(&offset) = self.offsets.get(slot) else {
            return Ok(());
        };
        self.log_file.set_len(offset)?;
        self.log_file.sync_all()?;
        self.log_end = offset;
        self.offsets.truncate(slot);
        self.entries.truncate(slot);
        Ok(())
    }

    fn size(&self) -> Index {
        self.entries.len() as Index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn file_storage_persists_term_and_vote() {
        let dir = tempdir().unwrap();
        let mut storage = FileStorage::new(dir.path()).unwrap();

        storage.save_term_and_vote(7, Some(3)).unwrap();
        let (term, voted_for) = storage.load_term_and_vote().unwrap();

        assert_eq!(term, 7);
        assert_eq!(voted_for, Some(3));
        assert!(!dir.path().join("meta.tmp").exists());
    }

    #[test]
    fn directory_sync_follows_file_creation() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fresh");

        let mut storage = FileStorage::new(&path).unwrap();
        assert!(path.join("log.bin").exists());
        sync_dir(storage.dir()).unwrap();

        storage.save_term_and_vote(2, Some(1)).unwrap();
        let names: Vec<_> = fs::read_dir(&path)
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names.len(), 2);
        assert!(names.iter().any(|n| n == "meta.json"));
        assert!(names.iter().any(|n| n == "log.bin"));
    }

    #[test]
    fn file_storage_appends_and_reads_log() {
        let dir = tempdir().unwrap();
        let mut storage = FileStorage::new(dir.path()).unwrap();

        storage.append(1, 0, b"set key1 value1").unwrap();
        storage.append(1, 1, b"set key2 value2").unwrap();

        assert_eq!(storage.size(), 2);
        assert_eq!(storage.read(0).unwrap(), Some((1, &b"set key1 value1"[..])));
        assert_eq!(storage.read(2).unwrap(), None);
        assert_eq!(storage.read(-1).unwrap(), None);
    }

    #[test]
    fn file_storage_rejects_out_of_order_append() {
        let dir = tempdir().unwrap();
        let mut storage = FileStorage::new(dir.path()).unwrap();

        let err = storage.append(1, 3, b"gap").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert_eq!(storage.size(), 0);
    }

    #[test]
    fn file_storage_truncates_log_on_disk() {
        let dir = tempdir().unwrap();
        {
            let mut storage = FileStorage::new(dir.path()).unwrap();
            storage.append(1, 0, &[1]).unwrap();
            storage.append(2, 1, &[2]).unwrap();
            storage.append(3, 2, &[3]).unwrap();
            storage.truncate_from(1).unwrap();
            storage.append(4, 1, &[4]).unwrap();
        }

        let storage = FileStorage::new(dir.path()).unwrap();
        assert_eq!(storage.size(), 2);
        assert_eq!(storage.read(1).unwrap(), Some((4, &[4u8][..])));
    }

    #[test]
    fn torn_tail_is_dropped_on_open() {
        let dir = tempdir().unwrap();
        {
            let mut storage = FileStorage::new(dir.path()).unwrap();
            storage.append(1, 0, b"whole").unwrap();
            storage.append(1, 1, b"partial").unwrap();
        }
        let path = dir.path().join("log.bin");
        let full = fs::metadata(&path).unwrap().len();
        OpenOptions::new()
            .write(true)
            .open(&path)
            .unwrap()
            .set_len(full - 3)
            .unwrap();

        let mut storage = FileStorage::new(dir.path()).unwrap();
        assert_eq!(storage.size(), 1);
        assert_eq!(
            fs::metadata(&path).unwrap().len(),
            (RECORD_HEADER_LEN + b"whole".len()) as u64
        );
        storage.append(2, 1, b"again").unwrap();
        assert_eq!(storage.read(1).unwrap(), Some((2, &b"again"[..])));
    }
}
