//! Per-recipient blob buckets on the local filesystem.
//!
//! Each recipient portal gets one directory under the storage root, named
//! by its id; each pending item is one file named by its [`ItemId`]. The
//! relay never inspects blob contents. Delivery is pull-based and
//! at-most-once: `take_and_delete` removes the file whether or not the
//! download completed on the client side.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use portal_types::{ItemId, PortalId};

use crate::error::{StoreError, StoreResult};

/// Bound on entries examined per bucket per sweep pass.
const SWEEP_PAGE: usize = 1000;

/// Copy buffer size for blob streaming.
const COPY_BUF: usize = 64 * 1024;

/// Filesystem-backed pending-item storage.
pub struct RelayStore {
    root: PathBuf,
}

impl RelayStore {
    /// Open a store rooted at `root`, creating the directory if needed.
    pub fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn bucket(&self, recipient: &PortalId) -> PathBuf {
        self.root.join(recipient.as_str())
    }

    fn item_path(&self, recipient: &PortalId, item: &ItemId) -> PathBuf {
        self.bucket(recipient).join(item.to_string())
    }

    /// Store a blob for a recipient, returning its item id.
    ///
    /// The blob is written under a temporary name and renamed into place so
    /// a concurrent listing never sees a half-written item.
    pub fn put(&self, recipient: &PortalId, reader: &mut impl Read) -> StoreResult<ItemId> {
        let bucket = self.bucket(recipient);
        fs::create_dir_all(&bucket)?;

        let item = ItemId::new();
        let final_path = bucket.join(item.to_string());
        let tmp_path = bucket.join(format!("{item}.tmp"));

        let mut file = fs::File::create(&tmp_path)?;
        let mut buf = [0u8; COPY_BUF];
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            file.write_all(&buf[..n])?;
        }
        file.flush()?;
        drop(file);
        fs::rename(&tmp_path, &final_path)?;

        tracing::debug!("Stored item {} for {}", item, recipient);
        Ok(item)
    }

    /// List up to `limit` pending item ids, oldest first by modified time.
    ///
    /// Files that do not parse as item ids (temp files, strays) are
    /// ignored. A missing bucket means nothing pending.
    pub fn list_pending(&self, recipient: &PortalId, limit: usize) -> StoreResult<Vec<ItemId>> {
        let bucket = self.bucket(recipient);
        let entries = match fs::read_dir(&bucket) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut items: Vec<(SystemTime, ItemId)> = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(item) = ItemId::parse(&name) else {
                continue;
            };
            let modified = entry
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            items.push((modified, item));
        }
        items.sort_by_key(|(modified, _)| *modified);
        Ok(items.into_iter().take(limit).map(|(_, id)| id).collect())
    }

    /// Stream a blob out and delete it.
    ///
    /// The file is removed even when streaming fails partway; the item is
    /// gone either way (at-most-once).
    pub fn take_and_delete(
        &self,
        recipient: &PortalId,
        item: &ItemId,
        writer: &mut impl Write,
    ) -> StoreResult<()> {
        let path = self.item_path(recipient, item);
        let file = match fs::File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound { item: *item });
            }
            Err(e) => return Err(e.into()),
        };

        let result = stream_copy(file, writer);
        if let Err(e) = fs::remove_file(&path) {
            tracing::warn!("Failed to delete delivered item {}: {}", item, e);
        }
        tracing::debug!("Delivered item {} to {}", item, recipient);
        result.map_err(StoreError::from)
    }

    /// Delete a recipient's bucket and everything in it.
    pub fn purge_bucket(&self, recipient: &PortalId) -> StoreResult<()> {
        let bucket = self.bucket(recipient);
        match fs::remove_dir_all(&bucket) {
            Ok(()) => {
                tracing::debug!("Purged bucket for {}", recipient);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete items older than `ttl` across all buckets, bounded per
    /// bucket per pass. Returns the number of items deleted.
    pub fn sweep_expired(&self, ttl: Duration) -> StoreResult<u64> {
        let now = SystemTime::now();
        let mut deleted = 0;
        for bucket in fs::read_dir(&self.root)?.flatten() {
            if !bucket.path().is_dir() {
                continue;
            }
            deleted += sweep_bucket(&bucket.path(), now, ttl)?;
        }
        Ok(deleted)
    }
}

fn sweep_bucket(bucket: &Path, now: SystemTime, ttl: Duration) -> StoreResult<u64> {
    let mut deleted = 0;
    for entry in fs::read_dir(bucket)?.take(SWEEP_PAGE).flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        if ItemId::parse(&name).is_none() {
            continue;
        }
        let Ok(modified) = entry.metadata().and_then(|m| m.modified()) else {
            continue;
        };
        let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
        if age > ttl {
            match fs::remove_file(entry.path()) {
                Ok(()) => {
                    tracing::debug!("Expired item {}", name);
                    deleted += 1;
                }
                Err(e) => tracing::warn!("Failed to expire item {}: {}", name, e),
            }
        }
    }
    Ok(deleted)
}

fn stream_copy(mut reader: impl Read, writer: &mut impl Write) -> std::io::Result<()> {
    let mut buf = [0u8; COPY_BUF];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n])?;
    }
    writer.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn store() -> (RelayStore, TempDir) {
        let dir = TempDir::new().unwrap();
        (RelayStore::open(dir.path()).unwrap(), dir)
    }

    fn recipient() -> PortalId {
        PortalId::generate()
    }

    #[test]
    fn put_take_roundtrip() {
        let (store, _dir) = store();
        let rcpt = recipient();
        let item = store.put(&rcpt, &mut Cursor::new(b"opaque blob")).unwrap();

        let mut out = Vec::new();
        store.take_and_delete(&rcpt, &item, &mut out).unwrap();
        assert_eq!(out, b"opaque blob");

        // Gone after delivery.
        let mut again = Vec::new();
        assert!(matches!(
            store.take_and_delete(&rcpt, &item, &mut again),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn list_pending_is_oldest_first_and_bounded() {
        let (store, dir) = store();
        let rcpt = recipient();
        let first = store.put(&rcpt, &mut Cursor::new(b"1")).unwrap();
        // mtime resolution on some filesystems is coarse; force an order.
        let bucket = dir.path().join(rcpt.as_str());
        let old = SystemTime::now() - Duration::from_secs(10);
        filetime_set(&bucket.join(first.to_string()), old);
        let second = store.put(&rcpt, &mut Cursor::new(b"2")).unwrap();

        let all = store.list_pending(&rcpt, 10).unwrap();
        assert_eq!(all, vec![first, second]);

        let limited = store.list_pending(&rcpt, 1).unwrap();
        assert_eq!(limited, vec![first]);
    }

    #[test]
    fn list_pending_ignores_stray_files() {
        let (store, dir) = store();
        let rcpt = recipient();
        store.put(&rcpt, &mut Cursor::new(b"x")).unwrap();
        fs::write(dir.path().join(rcpt.as_str()).join("not-an-item"), b"junk").unwrap();

        assert_eq!(store.list_pending(&rcpt, 10).unwrap().len(), 1);
    }

    #[test]
    fn empty_bucket_lists_nothing() {
        let (store, _dir) = store();
        assert!(store.list_pending(&recipient(), 10).unwrap().is_empty());
    }

    #[test]
    fn purge_removes_bucket() {
        let (store, _dir) = store();
        let rcpt = recipient();
        store.put(&rcpt, &mut Cursor::new(b"x")).unwrap();
        store.purge_bucket(&rcpt).unwrap();
        assert!(store.list_pending(&rcpt, 10).unwrap().is_empty());

        // Purging an absent bucket is fine.
        store.purge_bucket(&recipient()).unwrap();
    }

    #[test]
    fn sweep_deletes_only_expired_items() {
        let (store, dir) = store();
        let rcpt = recipient();
        let stale = store.put(&rcpt, &mut Cursor::new(b"old")).unwrap();
        let fresh = store.put(&rcpt, &mut Cursor::new(b"new")).unwrap();

        let bucket = dir.path().join(rcpt.as_str());
        let old = SystemTime::now() - Duration::from_secs(3700);
        filetime_set(&bucket.join(stale.to_string()), old);

        let deleted = store.sweep_expired(Duration::from_secs(3600)).unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(store.list_pending(&rcpt, 10).unwrap(), vec![fresh]);
    }

    #[test]
    fn item_within_ttl_is_still_retrievable() {
        let (store, dir) = store();
        let rcpt = recipient();
        let item = store.put(&rcpt, &mut Cursor::new(b"keep")).unwrap();

        let bucket = dir.path().join(rcpt.as_str());
        let aged = SystemTime::now() - Duration::from_secs(3000);
        filetime_set(&bucket.join(item.to_string()), aged);

        assert_eq!(store.sweep_expired(Duration::from_secs(3600)).unwrap(), 0);
        let mut out = Vec::new();
        store.take_and_delete(&rcpt, &item, &mut out).unwrap();
        assert_eq!(out, b"keep");
    }

    // Backdate a file's mtime without pulling in a filetime crate.
    fn filetime_set(path: &Path, to: SystemTime) {
        let file = fs::OpenOptions::new().write(true).open(path).unwrap();
        file.set_modified(to).unwrap();
    }
}
