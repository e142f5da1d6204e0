//! Purpose: On-disk layout of a KVDB home: JSON metadata plus one checksummed data file per KVS.
//! Exports: `KvdbMeta`, `KvsMeta`, `load_meta`, `save_meta`, `write_kvs_file`, `load_kvs_file`.
//! Role: Durable state only; snapshots and transactions never reach disk.
//! Invariants: Files are replaced with temp+rename, so readers see old or new, never partial.
//! Invariants: A data file whose header, lengths, or SHA-256 trailer disagree is `Corrupt`.
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::core::error::{Error, ErrorKind, io_error};
use crate::core::media::Mclass;

pub const META_FILE: &str = "kvdb.meta";
pub const LOCK_FILE: &str = "kvdb.lock";
const META_FORMAT: u32 = 1;

const MAGIC: [u8; 4] = *b"HKVS";
const VERSION: u32 = 1;
const ENDIANNESS_LE: u8 = 1;
const HEADER_SIZE: usize = 32;
const TRAILER_SIZE: usize = 32;
const RECORD_HEADER_SIZE: usize = 8;

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub(crate) struct KvsMeta {
    pub name: String,
    pub id: u64,
    pub prefix_length: usize,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub(crate) struct KvdbMeta {
    pub format: u32,
    pub next_kvs_id: u64,
    pub capacity_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staging_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pmem_path: Option<PathBuf>,
    #[serde(default)]
    pub kvs: Vec<KvsMeta>,
}

impl KvdbMeta {
    pub fn new(capacity_path: PathBuf) -> Self {
        Self {
            format: META_FORMAT,
            next_kvs_id: 1,
            capacity_path,
            staging_path: None,
            pmem_path: None,
            kvs: Vec::new(),
        }
    }

    pub fn mclass_path(&self, mclass: Mclass) -> Option<&Path> {
        match mclass {
            Mclass::Capacity => Some(self.capacity_path.as_path()),
            Mclass::Staging => self.staging_path.as_deref(),
            Mclass::Pmem => self.pmem_path.as_deref(),
        }
    }

    pub fn set_mclass_path(&mut self, mclass: Mclass, path: PathBuf) {
        match mclass {
            Mclass::Capacity => self.capacity_path = path,
            Mclass::Staging => self.staging_path = Some(path),
            Mclass::Pmem => self.pmem_path = Some(path),
        }
    }

    pub fn find_kvs(&self, name: &str) -> Option<&KvsMeta> {
        self.kvs.iter().find(|kvs| kvs.name == name)
    }

    pub fn kvs_file(&self, name: &str) -> PathBuf {
        self.capacity_path.join(format!("{name}.kvs"))
    }
}

pub(crate) fn meta_exists(home: &Path) -> bool {
    home.join(META_FILE).is_file()
}

pub(crate) fn load_meta(home: &Path) -> Result<KvdbMeta, Error> {
    let path = home.join(META_FILE);
    let text = fs::read_to_string(&path).map_err(|err| io_error(err, &path))?;
    let meta: KvdbMeta = serde_json::from_str(&text).map_err(|err| {
        Error::new(ErrorKind::Corrupt)
            .with_message("invalid kvdb metadata")
            .with_path(&path)
            .with_source(err)
    })?;
    if meta.format != META_FORMAT {
        return Err(Error::new(ErrorKind::Corrupt)
            .with_message(format!("unsupported kvdb metadata format {}", meta.format))
            .with_path(&path));
    }
    Ok(meta)
}

pub(crate) fn save_meta(home: &Path, meta: &KvdbMeta) -> Result<(), Error> {
    let bytes = serde_json::to_vec_pretty(meta).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("failed to encode kvdb metadata")
            .with_source(err)
    })?;
    replace_file(&home.join(META_FILE), &bytes)
}

/// Writes all records to `path`. Returns the file size.
pub(crate) fn write_kvs_file<'a>(
    path: &Path,
    prefix_length: usize,
    records: impl Iterator<Item = (&'a [u8], &'a [u8])>,
) -> Result<u64, Error> {
    let mut buf = vec![0u8; HEADER_SIZE];
    let mut count = 0u64;
    for (key, value) in records {
        buf.extend_from_slice(&(key.len() as u32).to_le_bytes());
        buf.extend_from_slice(&(value.len() as u32).to_le_bytes());
        buf.extend_from_slice(key);
        buf.extend_from_slice(value);
        count += 1;
    }
    let body_len = (buf.len() - HEADER_SIZE) as u64;

    buf[0..4].copy_from_slice(&MAGIC);
    buf[4..8].copy_from_slice(&VERSION.to_le_bytes());
    buf[8] = ENDIANNESS_LE;
    buf[9] = prefix_length as u8;
    write_u64(&mut buf, 16, count);
    write_u64(&mut buf, 24, body_len);

    let digest = Sha256::digest(&buf);
    buf.extend_from_slice(&digest);
    replace_file(path, &buf)?;
    Ok(buf.len() as u64)
}

/// Loads and verifies a data file; returns the stored prefix length and records.
pub(crate) fn load_kvs_file(path: &Path) -> Result<(usize, Vec<(Vec<u8>, Vec<u8>)>), Error> {
    let file = File::open(path).map_err(|err| io_error(err, path))?;
    let len = file
        .metadata()
        .map_err(|err| io_error(err, path))?
        .len() as usize;
    if len < HEADER_SIZE + TRAILER_SIZE {
        return Err(corrupt(path, "data file too small"));
    }
    let mmap = unsafe { Mmap::map(&file).map_err(|err| io_error(err, path))? };
    decode_kvs(&mmap).map_err(|err| err.with_path(path))
}

fn decode_kvs(buf: &[u8]) -> Result<(usize, Vec<(Vec<u8>, Vec<u8>)>), Error> {
    if buf.len() < HEADER_SIZE + TRAILER_SIZE {
        return Err(Error::new(ErrorKind::Corrupt).with_message("data file too small"));
    }
    if buf[0..4] != MAGIC {
        return Err(Error::new(ErrorKind::Corrupt).with_message("bad magic"));
    }
    let version = u32::from_le_bytes(read_4(buf, 4));
    if version != VERSION {
        return Err(Error::new(ErrorKind::Corrupt).with_message("unsupported version"));
    }
    if buf[8] != ENDIANNESS_LE {
        return Err(Error::new(ErrorKind::Corrupt).with_message("unsupported endianness"));
    }
    let prefix_length = buf[9] as usize;
    let count = read_u64(buf, 16);
    let body_len = buf.len() - HEADER_SIZE - TRAILER_SIZE;
    if read_u64(buf, 24) != body_len as u64 {
        return Err(Error::new(ErrorKind::Corrupt).with_message("length mismatch"));
    }

    let (content, trailer) = buf.split_at(HEADER_SIZE + body_len);
    if Sha256::digest(content).as_slice() != trailer {
        return Err(Error::new(ErrorKind::Corrupt).with_message("checksum mismatch"));
    }

    let mut records = Vec::with_capacity(count.min(1 << 20) as usize);
    let mut off = HEADER_SIZE;
    let end = HEADER_SIZE + body_len;
    while off < end {
        if off + RECORD_HEADER_SIZE > end {
            return Err(Error::new(ErrorKind::Corrupt).with_message("truncated record header"));
        }
        let key_len = u32::from_le_bytes(read_4(buf, off)) as usize;
        let value_len = u32::from_le_bytes(read_4(buf, off + 4)) as usize;
        off += RECORD_HEADER_SIZE;
        let fits = key_len
            .checked_add(value_len)
            .is_some_and(|len| len <= end - off);
        if !fits {
            return Err(Error::new(ErrorKind::Corrupt).with_message("truncated record"));
        }
        let key = buf[off..off + key_len].to_vec();
        off += key_len;
        let value = buf[off..off + value_len].to_vec();
        off += value_len;
        records.push((key, value));
    }
    if records.len() as u64 != count {
        return Err(Error::new(ErrorKind::Corrupt).with_message("record count mismatch"));
    }
    Ok((prefix_length, records))
}

fn replace_file(path: &Path, bytes: &[u8]) -> Result<(), Error> {
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp = PathBuf::from(tmp_name);
    let mut file = OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .open(&tmp)
        .map_err(|err| io_error(err, &tmp))?;
    file.write_all(bytes).map_err(|err| io_error(err, &tmp))?;
    file.sync_all().map_err(|err| io_error(err, &tmp))?;
    fs::rename(&tmp, path).map_err(|err| io_error(err, path))
}

pub(crate) fn remove_if_exists(path: &Path) -> Result<(), Error> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_error(err, path)),
    }
}

fn corrupt(path: &Path, message: &str) -> Error {
    Error::new(ErrorKind::Corrupt)
        .with_message(message)
        .with_path(path)
}

fn read_4(buf: &[u8], offset: usize) -> [u8; 4] {
    let mut out = [0u8; 4];
    out.copy_from_slice(&buf[offset..offset + 4]);
    out
}

fn read_u64(buf: &[u8], offset: usize) -> u64 {
    let mut out = [0u8; 8];
    out.copy_from_slice(&buf[offset..offset + 8]);
    u64::from_le_bytes(out)
}

fn write_u64(buf: &mut [u8], offset: usize, value: u64) {
    buf[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}
