//! WAL Writer
//!
//! Handles appending entries to the live WAL file.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, error};

use super::entry::unix_millis;
use super::WalEntry;
use crate::config::WalSyncStrategy;
use crate::error::Result;

/// Writes entries to the shard's WAL directory.
///
/// The file is created lazily on the first append. [`rotate`](Self::rotate)
/// closes it and hands its path to the caller, who deletes it once the
/// entries it holds are durable in a segment. An empty memtable therefore
/// has no live WAL file at all.
pub struct WalWriter {
    dir: PathBuf,
    live: Option<LiveFile>,
    /// Files closed outside of `rotate` that still hold acknowledged entries
    retired: Vec<PathBuf>,
    next_lsn: u64,
    sync_strategy: WalSyncStrategy,
    /// Entries written since the last fsync
    unsynced: usize,
}

struct LiveFile {
    path: PathBuf,
    writer: BufWriter<File>,
    /// Bytes of complete, accepted records in the file
    len: u64,
}

impl WalWriter {
    /// Open a writer over `dir`. Existing files in the directory are left
    /// alone; recovery decides what happens to them.
    pub fn open(dir: &Path, sync_strategy: WalSyncStrategy) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            live: None,
            retired: Vec::new(),
            next_lsn: 1,
            sync_strategy,
            unsynced: 0,
        })
    }

    /// Append an entry to the WAL, returning its LSN.
    ///
    /// On error nothing of the record stays behind: buffered bytes are
    /// discarded and the file is cut back to its previous length.
    pub fn append(&mut self, key: &str, value: &str) -> Result<u64> {
        let lsn = self.next_lsn;
        let bytes = WalEntry::new(lsn, key, value).serialize()?;
        let must_sync = match self.sync_strategy {
            WalSyncStrategy::EveryWrite => true,
            WalSyncStrategy::EveryNEntries { count } => self.unsynced + 1 >= count,
        };

        let live = self.live_file()?;
        let start = live.len;
        let written = live
            .writer
            .write_all(&bytes)
            .and_then(|()| live.writer.flush())
            .and_then(|()| {
                if must_sync {
                    live.writer.get_ref().sync_data()
                } else {
                    Ok(())
                }
            });

        if let Err(e) = written {
            self.rollback(start);
            return Err(e.into());
        }

        if let Some(live) = self.live.as_mut() {
            live.len += bytes.len() as u64;
        }
        self.next_lsn += 1;
        self.unsynced = if must_sync { 0 } else { self.unsynced + 1 };
        Ok(lsn)
    }

    /// Force sync to disk
    pub fn sync(&mut self) -> Result<()> {
        if let Some(live) = self.live.as_mut() {
            live.writer.flush()?;
            live.writer.get_ref().sync_data()?;
        }
        self.unsynced = 0;
        Ok(())
    }

    /// Close the live file and return every file written so far.
    ///
    /// The next append starts a fresh file. The returned files still hold
    /// their entries; the caller removes them once those are stored elsewhere.
    pub fn rotate(&mut self) -> Result<Vec<PathBuf>> {
        self.sync()?;
        let mut files = std::mem::take(&mut self.retired);
        if let Some(live) = self.live.take() {
            debug!(path = %live.path.display(), "WAL rotated");
            files.push(live.path);
        }
        self.next_lsn = 1;
        self.unsynced = 0;
        Ok(files)
    }

    /// Path of the live file, if any entries are pending
    pub fn path(&self) -> Option<&Path> {
        self.live.as_ref().map(|l| l.path.as_path())
    }

    /// Get the LSN the next append will receive
    pub fn current_lsn(&self) -> u64 {
        self.next_lsn
    }

    /// Drop whatever a failed append left buffered or half-written.
    ///
    /// The buffer is discarded without flushing and the file is cut back to
    /// `len`. If the cut itself fails the file is retired so later records
    /// never land behind a torn one.
    fn rollback(&mut self, len: u64) {
        let Some(LiveFile { path, writer, .. }) = self.live.take() else {
            return;
        };
        let (file, _unflushed) = writer.into_parts();

        match file.set_len(len) {
            Ok(()) => {
                debug!(path = %path.display(), len, "WAL tail rolled back");
                self.live = Some(LiveFile {
                    path,
                    writer: BufWriter::new(file),
                    len,
                });
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "could not roll back WAL tail, retiring file");
                self.retired.push(path);
            }
        }
    }

    fn live_file(&mut self) -> Result<&mut LiveFile> {
        let live = match self.live.take() {
            Some(live) => live,
            None => {
                let path = self.fresh_path();
                let file = OpenOptions::new().create(true).append(true).open(&path)?;
                debug!(path = %path.display(), "WAL file created");
                LiveFile {
                    path,
                    writer: BufWriter::new(file),
                    len: 0,
                }
            }
        };
        Ok(self.live.insert(live))
    }

    /// Timestamp-named path that does not collide with a leftover file
    fn fresh_path(&self) -> PathBuf {
        let mut stamp = unix_millis();
        loop {
            let path = self.dir.join(format!("{:020}", stamp));
            if !path.exists() {
                return path;
            }
            stamp += 1;
        }
    }
}
