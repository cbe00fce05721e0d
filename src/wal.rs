use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::limits::MAX_WAL_FRAME_LEN;
use crate::model::{BookingId, BookingRecord};

/// One committed table mutation. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalEntry {
    Inserted(BookingRecord),
    Updated(BookingRecord),
    Deleted { id: BookingId },
}

impl WalEntry {
    /// Apply to a table's rows. Inserting a present id or touching an absent
    /// one is a no-op.
    pub fn apply(&self, rows: &mut Vec<BookingRecord>) {
        match self {
            WalEntry::Inserted(record) => {
                if !rows.iter().any(|r| r.id == record.id) {
                    rows.push(record.clone());
                }
            }
            WalEntry::Updated(record) => {
                if let Some(row) = rows.iter_mut().find(|r| r.id == record.id) {
                    *row = record.clone();
                }
            }
            WalEntry::Deleted { id } => rows.retain(|r| r.id != *id),
        }
    }
}

fn write_entry(writer: &mut impl Write, entry: &WalEntry) -> io::Result<()> {
    let payload =
        bincode::serialize(entry).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    writer.write_all(&(payload.len() as u32).to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(())
}

/// Read exactly `buf.len()` bytes. `Ok(false)` on a clean or torn end of file.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Append-only log of one table's mutations.
///
/// Entry layout: `[u32 len][bincode WalEntry][u32 crc32]`, little endian.
/// A torn or corrupt tail ends replay; everything before it is kept, and
/// reopening for appends cuts the tail off.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

impl Wal {
    pub fn open(path: &Path) -> io::Result<Self> {
        Self::recover(path).map(|(wal, _)| wal)
    }

    /// Append one entry and fsync before returning.
    pub fn append(&mut self, entry: &WalEntry) -> io::Result<()> {
        write_entry(&mut self.writer, entry)?;
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.appends_since_compact += 1;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Rewrite the log as `rows` inserts: write a temp file, fsync, rename
    /// it over the log and reopen for appends.
    pub fn compact(&mut self, rows: &[BookingRecord]) -> io::Result<()> {
        let tmp_path = self.path.with_extension("wal.tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp_path)?);
            for row in rows {
                write_entry(&mut writer, &WalEntry::Inserted(row.clone()))?;
            }
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        Ok(())
    }

    /// Every intact entry in the log at `path`. A missing file is an empty log.
    pub fn replay(path: &Path) -> io::Result<Vec<WalEntry>> {
        match File::open(path) {
            Ok(file) => Ok(scan(file)?.0),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    /// Replay and fold into the table's rows, in commit order.
    pub fn load_rows(path: &Path) -> io::Result<Vec<BookingRecord>> {
        Ok(fold(Self::replay(path)?))
    }

    /// Open the log for appends and return its rows. A torn or corrupt tail
    /// is cut off first so new entries follow the last intact one.
    pub fn recover(path: &Path) -> io::Result<(Self, Vec<BookingRecord>)> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;
        let (entries, intact) = scan(file.try_clone()?)?;
        let len = file.metadata()?.len();
        if len > intact {
            warn!(
                "truncating {} bytes of torn tail from {}",
                len - intact,
                path.display()
            );
            file.set_len(intact)?;
            file.sync_all()?;
        }
        let wal = Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
        };
        Ok((wal, fold(entries)))
    }
}

fn fold(entries: Vec<WalEntry>) -> Vec<BookingRecord> {
    let mut rows = Vec::new();
    for entry in &entries {
        entry.apply(&mut rows);
    }
    rows
}

/// Read frames from the start of `file` until the first torn or corrupt one.
/// Returns the intact entries and the byte length they occupy.
fn scan(file: File) -> io::Result<(Vec<WalEntry>, u64)> {
    let file_len = file.metadata()?.len();
    let mut reader = BufReader::new(file);
    let mut entries = Vec::new();
    let mut intact = 0u64;

    loop {
        let mut len_buf = [0u8; 4];
        if !read_full(&mut reader, &mut len_buf)? {
            break;
        }
        let len = u32::from_le_bytes(len_buf) as usize;
        let frame_len = 4 + len as u64 + 4;
        if len > MAX_WAL_FRAME_LEN || intact + frame_len > file_len {
            break;
        }
        let mut payload = vec![0u8; len];
        if !read_full(&mut reader, &mut payload)? {
            break;
        }
        let mut crc_buf = [0u8; 4];
        if !read_full(&mut reader, &mut crc_buf)? {
            break;
        }
        if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
            break;
        }
        match bincode::deserialize::<WalEntry>(&payload) {
            Ok(entry) => entries.push(entry),
            Err(_) => break,
        }
        intact += frame_len;
    }

    Ok((entries, intact))
}
