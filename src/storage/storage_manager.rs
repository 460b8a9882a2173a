use std::{
    collections::{BTreeMap, HashMap},
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use tracing::{debug, info, warn};

use crate::{
    config::StorageConfig,
    storage::{
        header::DatabaseHeader,
        journal::{Journal, RecoveryOutcome},
        lock::{GateReadGuard, SharedFile},
    },
    types::{
        HEADER_SIZE, PAGE_HEADER_SIZE, PageId, SCHEMA_ROOT_PAGE,
        error::DatabaseError,
        page::{Page, PageType},
    },
};

/// Snapshot of the uncommitted state, restored when one statement of an
/// explicit transaction fails.
#[derive(Debug, Clone)]
pub struct Savepoint {
    header: DatabaseHeader,
    dirty: BTreeMap<PageId, Page>,
}

/// Owns the database file. Writes are buffered in a dirty set until
/// `flush`, which commits them through the rollback journal.
pub struct StorageManager {
    path: PathBuf,
    file: File,
    /// Shared gate entry held across a whole read; declared before `shared`
    /// so it is released first.
    pinned: Option<GateReadGuard>,
    shared: SharedFile,
    config: StorageConfig,
    /// Working header, including uncommitted allocations.
    header: DatabaseHeader,
    committed_header: DatabaseHeader,
    cache: HashMap<PageId, Page>,
    dirty: BTreeMap<PageId, Page>,
    /// Bumped on every change to the visible page set; cursors re-seek when
    /// it moves.
    generation: u64,
}

impl StorageManager {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DatabaseError> {
        Self::open(path, &StorageConfig::default())
    }

    pub fn open<P: AsRef<Path>>(path: P, config: &StorageConfig) -> Result<Self, DatabaseError> {
        config.validate()?;
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        let shared = SharedFile::register(&path)?;

        let header = {
            let gate = shared.io_gate();
            let _guard = gate.write();
            let outcome = Journal::recover(&path, &mut file)?;
            if outcome != RecoveryOutcome::NoJournal {
                debug!(?outcome, "journal recovery finished");
            }
            if file.metadata()?.len() == 0 {
                info!("Creating new database at path: {}", path.display());
                Self::initialize_file(&mut file, config)?
            } else {
                info!("Opening existing database at path: {}", path.display());
                Self::read_header(&mut file)?
            }
        };

        let expected_len = header.page_count * header.page_size as u64;
        let actual_len = file.metadata()?.len();
        if actual_len < expected_len {
            return Err(DatabaseError::corruption(format!(
                "file holds {} bytes but the header declares {} pages of {} bytes",
                actual_len, header.page_count, header.page_size
            )));
        }

        Ok(Self {
            path,
            file,
            pinned: None,
            shared,
            config: config.clone(),
            committed_header: header.clone(),
            header,
            cache: HashMap::new(),
            dirty: BTreeMap::new(),
            generation: 0,
        })
    }

    fn initialize_file(
        file: &mut File,
        config: &StorageConfig,
    ) -> Result<DatabaseHeader, DatabaseError> {
        let page_size = config.page_size;
        let header = DatabaseHeader::new(page_size);

        let mut header_page = header.to_bytes();
        header_page.resize(page_size, 0);
        let schema_page = Page::new(SCHEMA_ROOT_PAGE, PageType::LeafTable, page_size);

        file.seek(SeekFrom::Start(0))?;
        file.write_all(&header_page)?;
        file.write_all(&schema_page.to_bytes())?;
        file.sync_all()?;
        Ok(header)
    }

    fn read_header(file: &mut File) -> Result<DatabaseHeader, DatabaseError> {
        let mut buffer = vec![0u8; HEADER_SIZE];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut buffer)?;
        DatabaseHeader::from_bytes(&buffer)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn shared(&self) -> &SharedFile {
        &self.shared
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn header(&self) -> &DatabaseHeader {
        &self.header
    }

    pub fn page_size(&self) -> usize {
        self.header.page_size()
    }

    pub fn page_count(&self) -> u64 {
        self.header.page_count
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn schema_root(&self) -> PageId {
        self.header.schema_root
    }

    pub fn schema_cookie(&self) -> u32 {
        self.header.schema_cookie
    }

    /// Records a catalog change in the header of the running transaction.
    pub fn bump_schema_cookie(&mut self) {
        self.header.schema_cookie = self.header.schema_cookie.wrapping_add(1);
        self.generation += 1;
    }

    /// Bytes a B-tree node must hold before it counts as underfull.
    pub fn min_fill_bytes(&self) -> usize {
        (self.page_size() - PAGE_HEADER_SIZE) * self.config.min_fill_percent as usize / 100
    }

    pub fn has_pending_changes(&self) -> bool {
        !self.dirty.is_empty() || self.header != self.committed_header
    }

    fn check_page_id(&self, page_id: PageId) -> Result<(), DatabaseError> {
        if page_id == 0 {
            return Err(DatabaseError::CorruptedPage {
                page_id,
                reason: "page 0 holds the file header".to_string(),
            });
        }
        if page_id >= self.header.page_count {
            return Err(DatabaseError::CorruptedPage {
                page_id,
                reason: format!("past the end of a {}-page file", self.header.page_count),
            });
        }
        Ok(())
    }

    pub fn read_page(&mut self, page_id: PageId) -> Result<Page, DatabaseError> {
        self.check_page_id(page_id)?;
        if let Some(page) = self.dirty.get(&page_id) {
            return Ok(page.clone());
        }
        if let Some(page) = self.cache.get(&page_id) {
            return Ok(page.clone());
        }

        let page_size = self.page_size();
        let buffer = {
            let _guard = self.read_guard();
            read_raw_page(&mut self.file, page_id, page_size)?
        };
        let page = Page::from_bytes(&buffer, page_id)?;
        self.cache_insert(page.clone());
        Ok(page)
    }

    fn cache_insert(&mut self, page: Page) {
        if self.cache.len() >= self.config.cache_pages {
            if let Some(victim) = self.cache.keys().next().copied() {
                self.cache.remove(&victim);
            }
        }
        self.cache.insert(page.page_id, page);
    }

    /// Buffers a page; it is visible to `read_page` at once and durable
    /// after the next successful `flush`.
    pub fn write_page(&mut self, mut page: Page) -> Result<(), DatabaseError> {
        self.check_page_id(page.page_id)?;
        if page.page_size() != self.page_size() {
            return Err(DatabaseError::execution(format!(
                "page {} has {} bytes, file pages have {}",
                page.page_id,
                page.page_size(),
                self.page_size()
            )));
        }
        page.is_dirty = true;
        self.cache.remove(&page.page_id);
        self.dirty.insert(page.page_id, page);
        self.generation += 1;
        Ok(())
    }

    /// Hands out a page from the free list, or extends the file.
    pub fn allocate_page(&mut self, page_type: PageType) -> Result<PageId, DatabaseError> {
        let page_id = if self.header.freelist_head != 0 {
            let page_id = self.header.freelist_head;
            let free = self.read_page(page_id)?;
            if free.page_type != PageType::Free {
                return Err(DatabaseError::CorruptedPage {
                    page_id,
                    reason: format!("free list entry has type {:?}", free.page_type),
                });
            }
            self.header.freelist_head = free.right_pointer.unwrap_or(0);
            self.header.freelist_count = self.header.freelist_count.saturating_sub(1);
            page_id
        } else {
            let page_id = self.header.page_count;
            self.header.page_count += 1;
            page_id
        };

        let page_size = self.page_size();
        self.write_page(Page::new(page_id, page_type, page_size))?;
        Ok(page_id)
    }

    pub fn free_page(&mut self, page_id: PageId) -> Result<(), DatabaseError> {
        if page_id <= SCHEMA_ROOT_PAGE {
            return Err(DatabaseError::execution(format!(
                "page {} is reserved and cannot be freed",
                page_id
            )));
        }
        let mut page = Page::new(page_id, PageType::Free, self.page_size());
        page.right_pointer = (self.header.freelist_head != 0).then_some(self.header.freelist_head);
        self.write_page(page)?;
        self.header.freelist_head = page_id;
        self.header.freelist_count += 1;
        Ok(())
    }

    /// Pages currently on the free list, in list order.
    pub fn freelist_pages(&mut self) -> Result<Vec<PageId>, DatabaseError> {
        let mut pages = Vec::new();
        let mut next = self.header.freelist_head;
        while next != 0 {
            if pages.len() as u64 > self.header.freelist_count {
                return Err(DatabaseError::corruption(format!(
                    "free list is longer than its recorded length {}",
                    self.header.freelist_count
                )));
            }
            pages.push(next);
            next = self.read_page(next)?.right_pointer.unwrap_or(0);
        }
        Ok(pages)
    }

    pub fn savepoint(&self) -> Savepoint {
        Savepoint {
            header: self.header.clone(),
            dirty: self.dirty.clone(),
        }
    }

    pub fn rollback_to(&mut self, savepoint: Savepoint) {
        self.header = savepoint.header;
        self.dirty = savepoint.dirty;
        self.generation += 1;
    }

    /// Discards every uncommitted page.
    pub fn rollback(&mut self) {
        if self.has_pending_changes() {
            debug!(pages = self.dirty.len(), "discarding uncommitted pages");
        }
        self.dirty.clear();
        self.header = self.committed_header.clone();
        self.generation += 1;
    }

    /// Commits the dirty set: journal the pre-images, write the pages, then
    /// delete the journal. On failure the file is rolled back and the dirty
    /// set discarded.
    pub fn flush(&mut self) -> Result<(), DatabaseError> {
        if !self.has_pending_changes() {
            return Ok(());
        }

        let mut header = self.header.clone();
        header.change_counter = header.change_counter.wrapping_add(1);

        match self.commit(&header) {
            Ok(()) => {
                let pages = self.dirty.len();
                for (_, mut page) in std::mem::take(&mut self.dirty) {
                    page.is_dirty = false;
                    self.cache_insert(page);
                }
                self.committed_header = header.clone();
                self.header = header;
                debug!(
                    pages,
                    change_counter = self.header.change_counter,
                    "transaction committed"
                );
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "commit failed, rolling back");
                self.rollback();
                Err(e)
            }
        }
    }

    fn commit(&mut self, header: &DatabaseHeader) -> Result<(), DatabaseError> {
        let page_size = self.page_size();
        let sync = self.config.sync_on_commit;
        // Our own shared entry would keep the exclusive one waiting forever
        self.unpin();
        let _guard = self.shared.io_gate().write();

        let original_count = self.committed_header.page_count;
        let mut journal = Journal::create(&self.path, page_size, original_count)?;
        let journaled = write_journal(
            &mut self.file,
            &self.dirty,
            &mut journal,
            page_size,
            original_count,
        )
        .and_then(|()| journal.seal(sync));
        if let Err(e) = journaled {
            journal.discard();
            return Err(e);
        }

        let written = write_pages(&mut self.file, &self.dirty, header, page_size, sync)
            .and_then(|()| journal.finish());
        if let Err(e) = written {
            match Journal::recover(&self.path, &mut self.file) {
                Ok(_) => {}
                Err(recovery) => {
                    warn!(
                        error = %recovery,
                        "journal replay failed, it stays hot for the next open"
                    );
                }
            }
            return Err(e);
        }
        Ok(())
    }

    /// Enters the I/O gate until [`unpin`](Self::unpin). Commits of other
    /// handles wait for it, so every page read in between comes from the
    /// same committed state. Pinning twice is a no-op.
    pub fn pin(&mut self) {
        if self.pinned.is_none() {
            self.pinned = Some(self.shared.io_gate().read());
        }
    }

    pub fn unpin(&mut self) {
        self.pinned = None;
    }

    pub fn is_pinned(&self) -> bool {
        self.pinned.is_some()
    }

    fn read_guard(&self) -> Option<GateReadGuard> {
        match self.pinned {
            Some(_) => None,
            None => Some(self.shared.io_gate().read()),
        }
    }

    /// Drops the clean cache when another handle committed since we last
    /// looked. Returns whether anything changed.
    pub fn refresh_if_changed(&mut self) -> Result<bool, DatabaseError> {
        if self.has_pending_changes() {
            return Ok(false);
        }
        let disk_header = {
            let _guard = self.read_guard();
            Self::read_header(&mut self.file)?
        };
        if disk_header == self.committed_header {
            return Ok(false);
        }
        debug!(
            change_counter = disk_header.change_counter,
            "database changed on disk, dropping page cache"
        );
        self.cache.clear();
        self.committed_header = disk_header.clone();
        self.header = disk_header;
        self.generation += 1;
        Ok(true)
    }
}

fn read_raw_page(
    file: &mut File,
    page_id: PageId,
    page_size: usize,
) -> Result<Vec<u8>, DatabaseError> {
    let mut buffer = vec![0u8; page_size];
    file.seek(SeekFrom::Start(page_id * page_size as u64))?;
    file.read_exact(&mut buffer)?;
    Ok(buffer)
}

fn write_journal(
    file: &mut File,
    dirty: &BTreeMap<PageId, Page>,
    journal: &mut Journal,
    page_size: usize,
    original_count: u64,
) -> Result<(), DatabaseError> {
    journal.append(0, &read_raw_page(file, 0, page_size)?)?;
    // Pages past the original end need no pre-image, truncation undoes them
    for &page_id in dirty.keys().filter(|&&id| id < original_count) {
        journal.append(page_id, &read_raw_page(file, page_id, page_size)?)?;
    }
    Ok(())
}

fn write_pages(
    file: &mut File,
    dirty: &BTreeMap<PageId, Page>,
    header: &DatabaseHeader,
    page_size: usize,
    sync: bool,
) -> Result<(), DatabaseError> {
    for (page_id, page) in dirty {
        file.seek(SeekFrom::Start(page_id * page_size as u64))?;
        file.write_all(&page.to_bytes())?;
    }
    let mut header_page = header.to_bytes();
    header_page.resize(page_size, 0);
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&header_page)?;
    if sync {
        file.sync_all()?;
    } else {
        file.flush()?;
    }
    Ok(())
}
