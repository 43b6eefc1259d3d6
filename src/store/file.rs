//! Store file image
//!
//! The complete persisted contents of a store. Every flush rewrites the whole
//! file; there is no incremental format.
//!
//! ## File Format
//! ```text
//! ┌──────────┬─────────┬──────────────┬──────────────┬─────────────┬─────────┐
//! │ "EMKV"   │ Format  │ StoreVersion │ RecordCount  │ Records...  │ CRC32   │
//! │ 4 bytes  │ u8      │ varint i32   │ varint       │             │ u32 LE  │
//! └──────────┴─────────┴──────────────┴──────────────┴─────────────┴─────────┘
//!
//! Record:
//! ┌──────────────┬──────────┬────────────────┬──────────────────────────────┐
//! │ KeyLen varint│ Key      │ ValueLen varint│ Value (object codec frame)   │
//! └──────────────┴──────────┴────────────────┴──────────────────────────────┘
//! ```
//! The CRC covers every byte before it.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{EmberError, Result};
use crate::key::Key;
use crate::varint::{int_length, read_int, write_int};

/// Magic bytes at the start of every store file
pub const MAGIC: &[u8; 4] = b"EMKV";

/// Current file format version
pub const FORMAT_VERSION: u8 = 1;

/// Magic + format byte
const PREAMBLE_SIZE: usize = 5;

/// Trailing checksum
const CRC_SIZE: usize = 4;

/// Decoded contents of a store file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileImage {
    /// Store version scalar
    pub version: i32,
    /// Key and encoded value of every entry
    pub records: Vec<(Key, Bytes)>,
}

impl FileImage {
    pub fn new(version: i32, records: Vec<(Key, Bytes)>) -> Self {
        Self { version, records }
    }

    // =========================================================================
    // Encoding
    // =========================================================================

    /// Serialize the image, checksum included
    pub fn encode(&self) -> Result<Bytes> {
        let body: usize = self
            .records
            .iter()
            .map(|(k, v)| k.len() + v.len() + 10)
            .sum();
        let mut buf = BytesMut::with_capacity(PREAMBLE_SIZE + 10 + body + CRC_SIZE);

        buf.put_slice(MAGIC);
        buf.put_u8(FORMAT_VERSION);
        write_int(&mut buf, self.version, false);
        write_int(&mut buf, length_field(self.records.len(), "record count")?, true);

        for (key, value) in &self.records {
            write_int(&mut buf, length_field(key.len(), "key")?, true);
            buf.put_slice(key.as_bytes());
            write_int(&mut buf, length_field(value.len(), "value")?, true);
            buf.put_slice(value);
        }

        let crc = crc32fast::hash(&buf);
        buf.put_u32_le(crc);

        Ok(buf.freeze())
    }

    /// Exact size [`encode`](Self::encode) produces
    pub fn encoded_size(&self) -> usize {
        let records: usize = self
            .records
            .iter()
            .map(|(k, v)| {
                int_length(k.len() as i32, true) + k.len() + int_length(v.len() as i32, true) + v.len()
            })
            .sum();

        PREAMBLE_SIZE
            + int_length(self.version, false)
            + int_length(self.records.len() as i32, true)
            + records
            + CRC_SIZE
    }

    /// Parse and verify a complete file
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < PREAMBLE_SIZE + CRC_SIZE {
            return Err(EmberError::truncated("store file header"));
        }
        if &data[..4] != MAGIC {
            return Err(EmberError::Serialization(
                "Not a store file (bad magic)".to_string(),
            ));
        }
        if data[4] != FORMAT_VERSION {
            return Err(EmberError::Serialization(format!(
                "Unsupported store file format: {}",
                data[4]
            )));
        }

        let (payload, mut trailer) = data.split_at(data.len() - CRC_SIZE);
        let stored_crc = trailer.get_u32_le();
        let actual_crc = crc32fast::hash(payload);
        if stored_crc != actual_crc {
            return Err(EmberError::Serialization(format!(
                "Store file checksum mismatch: stored {:08x}, computed {:08x}",
                stored_crc, actual_crc
            )));
        }

        let mut input = &payload[PREAMBLE_SIZE..];
        let version = read_int(&mut input, false)?;
        let count = read_length(&mut input, "record count")?;

        // Every record takes at least two bytes
        let mut records = Vec::with_capacity(count.min(input.len() / 2));
        for _ in 0..count {
            let key = read_chunk(&mut input, "key")?;
            let value = read_chunk(&mut input, "value")?;
            records.push((Key::from(key), Bytes::copy_from_slice(value)));
        }

        if input.has_remaining() {
            return Err(EmberError::Serialization(format!(
                "{} unexpected bytes after last record",
                input.remaining()
            )));
        }

        Ok(Self { version, records })
    }

    // =========================================================================
    // File I/O
    // =========================================================================

    /// Read `path`; `Ok(None)` if it does not exist or is empty
    pub fn read(path: &Path) -> Result<Option<Self>> {
        let data = match fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if data.is_empty() {
            return Ok(None);
        }
        Self::decode(&data).map(Some)
    }

    /// Replace `path` with this image
    ///
    /// Writes a temp file next to `path`, optionally fsyncs it, then renames
    /// it into place. Readers see either the old file or the new one.
    pub fn write_atomic(&self, path: &Path, sync: bool) -> Result<u64> {
        let data = self.encode()?;
        let tmp = temp_path(path);

        if let Err(e) = write_file(&tmp, &data, sync) {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }
        if let Err(e) = fs::rename(&tmp, path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }

        Ok(data.len() as u64)
    }
}

/// `.<name>.tmp` in the same directory as `path`
pub(crate) fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.tmp", name))
}

fn write_file(path: &Path, data: &[u8], sync: bool) -> Result<()> {
    let mut file: File = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)?;
    file.write_all(data)?;
    if sync {
        file.sync_all()?;
    }
    Ok(())
}

fn length_field(len: usize, what: &str) -> Result<i32> {
    i32::try_from(len)
        .map_err(|_| EmberError::InvalidArgument(format!("{} too large: {} bytes", what, len)))
}

fn read_length(input: &mut &[u8], what: &str) -> Result<usize> {
    let len = read_int(input, true)?;
    usize::try_from(len)
        .map_err(|_| EmberError::Serialization(format!("Negative {} length: {}", what, len)))
}

fn read_chunk<'a>(input: &mut &'a [u8], what: &str) -> Result<&'a [u8]> {
    let len = read_length(input, what)?;
    if input.len() < len {
        return Err(EmberError::truncated(what));
    }
    let (chunk, rest) = input.split_at(len);
    *input = rest;
    Ok(chunk)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> FileImage {
        FileImage::new(
            -7,
            vec![
                (Key::default_key(), Bytes::from_static(&[0])),
                (Key::from("alpha"), Bytes::from(vec![14, 3, b'a', b'b', b'c'])),
                (Key::from(vec![0xFFu8; 200]), Bytes::from(vec![7u8; 300])),
            ],
        )
    }

    #[test]
    fn test_encode_layout() {
        let image = FileImage::new(1, vec![(Key::from("k"), Bytes::from_static(&[0]))]);
        let data = image.encode().unwrap();

        assert_eq!(&data[..4], MAGIC);
        assert_eq!(data[4], FORMAT_VERSION);
        // zigzag(1) = 2, count 1, key len 1, 'k', value len 1, null tag
        assert_eq!(&data[5..11], &[2, 1, 1, b'k', 1, 0]);
        assert_eq!(data.len(), 11 + CRC_SIZE);
        assert_eq!(data.len(), image.encoded_size());
    }

    #[test]
    fn test_decode_restores_image() {
        let image = sample();
        let data = image.encode().unwrap();

        assert_eq!(image.encoded_size(), data.len());
        assert_eq!(FileImage::decode(&data).unwrap(), image);
    }

    #[test]
    fn test_decode_rejects_bad_magic() {
        let mut data = sample().encode().unwrap().to_vec();
        data[0] = b'X';

        let err = FileImage::decode(&data).unwrap_err();
        assert!(matches!(err, EmberError::Serialization(_)));
    }

    #[test]
    fn test_decode_rejects_flipped_bit() {
        let mut data = sample().encode().unwrap().to_vec();
        let mid = data.len() / 2;
        data[mid] ^= 0x01;

        let err = FileImage::decode(&data).unwrap_err();
        assert!(err.to_string().contains("checksum"));
    }

    #[test]
    fn test_decode_rejects_truncation() {
        let data = sample().encode().unwrap();

        assert!(FileImage::decode(&data[..data.len() - 1]).is_err());
        assert!(FileImage::decode(&data[..3]).is_err());
    }

    #[test]
    fn test_write_atomic_replaces_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.bin");

        FileImage::new(1, vec![]).write_atomic(&path, true).unwrap();
        let written = sample().write_atomic(&path, false).unwrap();

        assert_eq!(written, fs::metadata(&path).unwrap().len());
        assert_eq!(FileImage::read(&path).unwrap(), Some(sample()));
        assert!(!temp_path(&path).exists());
    }

    #[test]
    fn test_read_missing_or_empty_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.bin");

        assert_eq!(FileImage::read(&path).unwrap(), None);
        File::create(&path).unwrap();
        assert_eq!(FileImage::read(&path).unwrap(), None);
    }

    #[test]
    fn test_temp_path_is_hidden_sibling() {
        let path = Path::new("/data/settings.bin");
        assert_eq!(temp_path(path), PathBuf::from("/data/.settings.bin.tmp"));
    }
}
