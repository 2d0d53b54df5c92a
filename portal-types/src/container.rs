//! Transfer container and folder archive codecs.
//!
//! A transfer payload is a two-entry container read in fixed order:
//!
//! 1. `meta` entry - a [`KvDocument`] holding `name`, `sender`, `type`
//!    (`file` or `folder`) and the base64 wrapped file key. Length-prefixed
//!    so it can be parsed before any content arrives.
//! 2. `content` entry - the encrypted payload stream. It carries no length
//!    and runs to end-of-stream, so senders can stream it without knowing
//!    the ciphertext size up front.
//!
//! Entry headers are a u32 big-endian name length followed by the name.
//! Folder payloads use a separate record codec (path length, path, data
//! length, data) that is written *inside* the encrypted content stream.

use std::io::{Read, Write};

use crate::{KvDocument, WireError};

/// Name of the metadata entry.
pub const META_ENTRY: &str = "meta";
/// Name of the content entry.
pub const CONTENT_ENTRY: &str = "content";

/// Upper bound on the serialized metadata document.
const MAX_META_LEN: u64 = 64 * 1024;
/// Upper bound on an archive entry path.
const MAX_PATH_LEN: u32 = 4096;
/// Read granularity for archive entry data.
const DATA_CHUNK: usize = 64 * 1024;

fn write_entry_header(w: &mut impl Write, name: &str) -> Result<(), WireError> {
    w.write_all(&(name.len() as u32).to_be_bytes())?;
    w.write_all(name.as_bytes())?;
    Ok(())
}

fn read_entry_header(r: &mut impl Read, expected: &str) -> Result<(), WireError> {
    let mut len_buf = [0u8; 4];
    r.read_exact(&mut len_buf)?;
    let len = u32::from_be_bytes(len_buf);
    if len as usize != expected.len() {
        return Err(WireError::UnexpectedEntry {
            expected: expected.to_string(),
            actual: format!("<{len}-byte name>"),
        });
    }
    let mut name = vec![0u8; len as usize];
    r.read_exact(&mut name)?;
    if name != expected.as_bytes() {
        return Err(WireError::UnexpectedEntry {
            expected: expected.to_string(),
            actual: String::from_utf8_lossy(&name).into_owned(),
        });
    }
    Ok(())
}

/// Write the `meta` entry.
pub fn write_meta(w: &mut impl Write, meta: &KvDocument) -> Result<(), WireError> {
    let body = meta.encode();
    write_entry_header(w, META_ENTRY)?;
    w.write_all(&(body.len() as u64).to_be_bytes())?;
    w.write_all(body.as_bytes())?;
    Ok(())
}

/// Read and parse the `meta` entry.
pub fn read_meta(r: &mut impl Read) -> Result<KvDocument, WireError> {
    read_entry_header(r, META_ENTRY)?;
    let mut len_buf = [0u8; 8];
    r.read_exact(&mut len_buf)?;
    let len = u64::from_be_bytes(len_buf);
    if len > MAX_META_LEN {
        return Err(WireError::OversizedEntry { len });
    }
    let mut body = vec![0u8; len as usize];
    r.read_exact(&mut body)?;
    KvDocument::parse_bytes(&body)
}

/// Write the `content` entry header.
///
/// The caller streams the content bytes directly afterwards; the entry has
/// no length and runs to end-of-stream.
pub fn begin_content(w: &mut impl Write) -> Result<(), WireError> {
    write_entry_header(w, CONTENT_ENTRY)
}

/// Read the `content` entry header.
///
/// After this returns, the reader yields the content stream until EOF.
pub fn read_content_header(r: &mut impl Read) -> Result<(), WireError> {
    read_entry_header(r, CONTENT_ENTRY)
}

/// One file inside a folder archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Path relative to the archived folder root, `/`-separated.
    pub path: String,
    /// File contents.
    pub data: Vec<u8>,
}

/// Whether an archive path is safe to materialize under a destination root.
///
/// Rejects absolute paths, drive-letter-ish prefixes, and `..` components.
pub fn is_safe_relative_path(path: &str) -> bool {
    if path.is_empty() || path.starts_with('/') || path.contains('\\') || path.contains(':') {
        return false;
    }
    path.split('/').all(|c| !c.is_empty() && c != "." && c != "..")
}

/// Append one archive record.
pub fn write_archive_entry(w: &mut impl Write, path: &str, data: &[u8]) -> Result<(), WireError> {
    if !is_safe_relative_path(path) {
        return Err(WireError::InvalidPath {
            path: path.to_string(),
        });
    }
    w.write_all(&(path.len() as u32).to_be_bytes())?;
    w.write_all(path.as_bytes())?;
    w.write_all(&(data.len() as u64).to_be_bytes())?;
    w.write_all(data)?;
    Ok(())
}

/// Read the next archive record, or `None` at a clean end-of-stream.
pub fn read_archive_entry(r: &mut impl Read) -> Result<Option<ArchiveEntry>, WireError> {
    let mut len_buf = [0u8; 4];
    match read_exact_or_eof(r, &mut len_buf)? {
        false => return Ok(None),
        true => {}
    }
    let path_len = u32::from_be_bytes(len_buf);
    if path_len == 0 || path_len > MAX_PATH_LEN {
        return Err(WireError::InvalidPath {
            path: format!("<{path_len}-byte path>"),
        });
    }
    let mut path = vec![0u8; path_len as usize];
    r.read_exact(&mut path)?;
    let path = String::from_utf8(path).map_err(|_| WireError::NotUtf8)?;
    if !is_safe_relative_path(&path) {
        return Err(WireError::InvalidPath { path });
    }

    let mut size_buf = [0u8; 8];
    r.read_exact(&mut size_buf)?;
    let size = u64::from_be_bytes(size_buf);

    // The size prefix is untrusted input; grow the buffer with the bytes
    // actually read rather than allocating the claimed size up front.
    let mut data = Vec::with_capacity(size.min(DATA_CHUNK as u64) as usize);
    let mut remaining = size;
    let mut chunk = [0u8; DATA_CHUNK];
    while remaining > 0 {
        let want = remaining.min(DATA_CHUNK as u64) as usize;
        let n = r.read(&mut chunk[..want])?;
        if n == 0 {
            return Err(WireError::Truncated);
        }
        data.extend_from_slice(&chunk[..n]);
        remaining -= n as u64;
    }
    Ok(Some(ArchiveEntry { path, data }))
}

/// Fill `buf` completely, or return `false` if the reader was already at EOF.
///
/// A partial read (EOF mid-buffer) is an error; only a clean boundary counts
/// as end-of-archive.
fn read_exact_or_eof(r: &mut impl Read, buf: &mut [u8]) -> Result<bool, WireError> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = r.read(&mut buf[filled..])?;
        if n == 0 {
            if filled == 0 {
                return Ok(false);
            }
            return Err(WireError::Truncated);
        }
        filled += n;
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn meta_doc() -> KvDocument {
        let mut doc = KvDocument::new();
        doc.set("name", "report.pdf")
            .set("sender", "1a2b-ffee")
            .set("type", "file")
            .set("key", "AAAA");
        doc
    }

    #[test]
    fn container_roundtrip() {
        let mut buf = Vec::new();
        write_meta(&mut buf, &meta_doc()).unwrap();
        begin_content(&mut buf).unwrap();
        buf.extend_from_slice(b"ciphertext bytes");

        let mut r = Cursor::new(buf);
        let meta = read_meta(&mut r).unwrap();
        assert_eq!(meta.get("name"), Some("report.pdf"));
        read_content_header(&mut r).unwrap();
        let mut content = Vec::new();
        r.read_to_end(&mut content).unwrap();
        assert_eq!(content, b"ciphertext bytes");
    }

    #[test]
    fn meta_read_before_content() {
        // Entries are in fixed order: reading content first must fail.
        let mut buf = Vec::new();
        write_meta(&mut buf, &meta_doc()).unwrap();
        let mut r = Cursor::new(buf);
        assert!(matches!(
            read_content_header(&mut r),
            Err(WireError::UnexpectedEntry { .. })
        ));
    }

    #[test]
    fn oversized_meta_rejected() {
        let mut buf = Vec::new();
        write_entry_header(&mut buf, META_ENTRY).unwrap();
        buf.extend_from_slice(&(MAX_META_LEN + 1).to_be_bytes());
        let mut r = Cursor::new(buf);
        assert!(matches!(
            read_meta(&mut r),
            Err(WireError::OversizedEntry { .. })
        ));
    }

    #[test]
    fn archive_roundtrip() {
        let mut buf = Vec::new();
        write_archive_entry(&mut buf, "a.txt", b"alpha").unwrap();
        write_archive_entry(&mut buf, "sub/b.txt", b"beta").unwrap();

        let mut r = Cursor::new(buf);
        let first = read_archive_entry(&mut r).unwrap().unwrap();
        assert_eq!(first.path, "a.txt");
        assert_eq!(first.data, b"alpha");
        let second = read_archive_entry(&mut r).unwrap().unwrap();
        assert_eq!(second.path, "sub/b.txt");
        assert_eq!(second.data, b"beta");
        assert!(read_archive_entry(&mut r).unwrap().is_none());
    }

    #[test]
    fn archive_rejects_traversal_paths() {
        let mut buf = Vec::new();
        assert!(write_archive_entry(&mut buf, "../evil", b"x").is_err());
        assert!(write_archive_entry(&mut buf, "/abs", b"x").is_err());

        // Hand-craft a malicious record and make sure the reader refuses it.
        let mut raw = Vec::new();
        let path = b"../../etc/passwd";
        raw.extend_from_slice(&(path.len() as u32).to_be_bytes());
        raw.extend_from_slice(path);
        raw.extend_from_slice(&0u64.to_be_bytes());
        let mut r = Cursor::new(raw);
        assert!(matches!(
            read_archive_entry(&mut r),
            Err(WireError::InvalidPath { .. })
        ));
    }

    #[test]
    fn huge_claimed_size_fails_without_allocating() {
        // A record claiming u64::MAX bytes must fail on the bytes actually
        // present, not abort trying to reserve the claimed size.
        let mut raw = Vec::new();
        let path = b"big.bin";
        raw.extend_from_slice(&(path.len() as u32).to_be_bytes());
        raw.extend_from_slice(path);
        raw.extend_from_slice(&u64::MAX.to_be_bytes());
        raw.extend_from_slice(b"only a few bytes follow");
        let mut r = Cursor::new(raw);
        assert!(matches!(
            read_archive_entry(&mut r),
            Err(WireError::Truncated)
        ));
    }

    #[test]
    fn truncated_archive_record_is_an_error() {
        let mut buf = Vec::new();
        write_archive_entry(&mut buf, "a.txt", b"alpha").unwrap();
        buf.truncate(buf.len() - 2);
        let mut r = Cursor::new(buf);
        assert!(read_archive_entry(&mut r).is_err());
    }

    #[test]
    fn safe_path_checks() {
        assert!(is_safe_relative_path("a/b/c.txt"));
        assert!(!is_safe_relative_path(""));
        assert!(!is_safe_relative_path("a//b"));
        assert!(!is_safe_relative_path("./a"));
        assert!(!is_safe_relative_path("a/../b"));
        assert!(!is_safe_relative_path("C:\\x"));
    }
}
