use std::{
    fs::{self, File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use tracing::{debug, warn};

use crate::{
    types::{PageId, error::DatabaseError},
    utils::hash::{calculate_checksum, calculate_record_checksum},
};

/*
 * Rollback journal, written next to the database as "<db>-journal"
 * ┌──────────────────────────────────────────────────────────────┐
 * │ HEADER (32 bytes, big-endian)                                │
 * │  magic(8) | page_size(4) | original_page_count(8) |          │
 * │  record_count(4) | header_crc(4) | reserved(4)               │
 * ├──────────────────────────────────────────────────────────────┤
 * │ RECORD: page_id(8) | pre-image(page_size) | crc32(4)         │
 * │ RECORD ...                                                   │
 * └──────────────────────────────────────────────────────────────┘
 *
 * record_count stays 0 until every record is on disk and synced. The
 * database file is only touched after that, so a journal with a zero
 * count never needs replaying.
 */
const JOURNAL_MAGIC: &[u8; 8] = b"LUMBUNGJ";
pub const JOURNAL_HEADER_SIZE: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryOutcome {
    NoJournal,
    /// The journal was never sealed; the database is untouched.
    Discarded,
    Replayed { pages: usize },
}

#[derive(Debug)]
pub struct Journal {
    path: PathBuf,
    file: File,
    page_size: usize,
    original_page_count: u64,
    record_count: u32,
}

impl Journal {
    pub fn path_for(db_path: &Path) -> PathBuf {
        let mut path = db_path.as_os_str().to_owned();
        path.push("-journal");
        PathBuf::from(path)
    }

    pub fn create(
        db_path: &Path,
        page_size: usize,
        original_page_count: u64,
    ) -> Result<Self, DatabaseError> {
        let path = Self::path_for(db_path);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        let mut journal = Self {
            path,
            file,
            page_size,
            original_page_count,
            record_count: 0,
        };
        journal.write_header(0)?;
        Ok(journal)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record_count(&self) -> u32 {
        self.record_count
    }

    /// Appends the pre-image of one page.
    pub fn append(&mut self, page_id: PageId, image: &[u8]) -> Result<(), DatabaseError> {
        if image.len() != self.page_size {
            return Err(DatabaseError::execution(format!(
                "journal record for page {} has {} bytes, expected {}",
                page_id,
                image.len(),
                self.page_size
            )));
        }
        let offset = JOURNAL_HEADER_SIZE as u64 + self.record_count as u64 * self.record_size();
        let mut record = Vec::with_capacity(self.record_size() as usize);
        record.extend_from_slice(&page_id.to_be_bytes());
        record.extend_from_slice(image);
        record.extend_from_slice(&calculate_record_checksum(page_id, image).to_be_bytes());

        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(&record)?;
        self.record_count += 1;
        Ok(())
    }

    /// Syncs the records, then publishes their count. After this returns the
    /// database file may be overwritten.
    pub fn seal(&mut self, sync: bool) -> Result<(), DatabaseError> {
        if sync {
            self.file.sync_all()?;
        }
        self.write_header(self.record_count)?;
        if sync {
            self.file.sync_all()?;
        }
        debug!(
            journal = %self.path.display(),
            records = self.record_count,
            "journal sealed"
        );
        Ok(())
    }

    /// Deleting the journal is the commit point.
    pub fn finish(self) -> Result<(), DatabaseError> {
        let Journal { path, file, .. } = self;
        drop(file);
        fs::remove_file(&path)?;
        Ok(())
    }

    pub fn discard(self) {
        let Journal { path, file, .. } = self;
        drop(file);
        let _ = fs::remove_file(&path);
    }

    fn record_size(&self) -> u64 {
        (8 + self.page_size + 4) as u64
    }

    fn write_header(&mut self, record_count: u32) -> Result<(), DatabaseError> {
        let mut header = Vec::with_capacity(JOURNAL_HEADER_SIZE);
        header.extend_from_slice(JOURNAL_MAGIC);
        header.extend_from_slice(&(self.page_size as u32).to_be_bytes());
        header.extend_from_slice(&self.original_page_count.to_be_bytes());
        header.extend_from_slice(&record_count.to_be_bytes());
        let crc = calculate_checksum(&header);
        header.extend_from_slice(&crc.to_be_bytes());
        header.resize(JOURNAL_HEADER_SIZE, 0);

        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&header)?;
        Ok(())
    }

    /// Rolls a hot journal back into `db_file`, truncates the file to its
    /// pre-transaction length and deletes the journal.
    pub fn recover(db_path: &Path, db_file: &mut File) -> Result<RecoveryOutcome, DatabaseError> {
        let path = Self::path_for(db_path);
        if !path.exists() {
            return Ok(RecoveryOutcome::NoJournal);
        }

        let mut bytes = Vec::new();
        File::open(&path)?.read_to_end(&mut bytes)?;

        let Some(header) = JournalHeader::decode(&bytes) else {
            warn!(journal = %path.display(), "discarding unsealed journal");
            fs::remove_file(&path)?;
            return Ok(RecoveryOutcome::Discarded);
        };

        let record_size = 8 + header.page_size + 4;
        let mut replayed = 0;
        for i in 0..header.record_count as usize {
            let start = JOURNAL_HEADER_SIZE + i * record_size;
            let Some(record) = bytes.get(start..start + record_size) else {
                warn!(record = i, "torn journal record, stopping replay");
                break;
            };
            let page_id = u64::from_be_bytes(array_at(record, 0));
            let image = &record[8..8 + header.page_size];
            let stored = u32::from_be_bytes(array_at(record, 8 + header.page_size));
            if stored != calculate_record_checksum(page_id, image) {
                warn!(record = i, page_id, "journal record checksum mismatch, stopping replay");
                break;
            }
            db_file.seek(SeekFrom::Start(page_id * header.page_size as u64))?;
            db_file.write_all(image)?;
            replayed += 1;
        }

        let original_len = header.original_page_count * header.page_size as u64;
        if db_file.metadata()?.len() > original_len {
            db_file.set_len(original_len)?;
        }
        db_file.sync_all()?;
        fs::remove_file(&path)?;

        warn!(
            database = %db_path.display(),
            pages = replayed,
            "rolled back interrupted transaction from hot journal"
        );
        Ok(RecoveryOutcome::Replayed { pages: replayed })
    }
}

struct JournalHeader {
    page_size: usize,
    original_page_count: u64,
    record_count: u32,
}

impl JournalHeader {
    /// `None` for anything that is not a sealed, intact header.
    fn decode(bytes: &[u8]) -> Option<Self> {
        let header = bytes.get(..JOURNAL_HEADER_SIZE)?;
        if &header[0..8] != JOURNAL_MAGIC {
            return None;
        }
        let crc = u32::from_be_bytes(array_at(header, 24));
        if crc != calculate_checksum(&header[..24]) {
            return None;
        }
        let decoded = Self {
            page_size: u32::from_be_bytes(array_at(header, 8)) as usize,
            original_page_count: u64::from_be_bytes(array_at(header, 12)),
            record_count: u32::from_be_bytes(array_at(header, 20)),
        };
        (decoded.record_count > 0 && decoded.page_size > 0).then_some(decoded)
    }
}

fn array_at<const N: usize>(bytes: &[u8], at: usize) -> [u8; N] {
    let mut raw = [0u8; N];
    raw.copy_from_slice(&bytes[at..at + N]);
    raw
}
