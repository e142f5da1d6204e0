// Media classes (storage tiers) and their on-disk usage reports.
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::error::{Error, ErrorKind, io_error};

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mclass {
    Capacity,
    Staging,
    Pmem,
}

impl Mclass {
    pub const ALL: [Mclass; 3] = [Mclass::Capacity, Mclass::Staging, Mclass::Pmem];

    pub fn as_str(self) -> &'static str {
        match self {
            Mclass::Capacity => "capacity",
            Mclass::Staging => "staging",
            Mclass::Pmem => "pmem",
        }
    }

    pub(crate) fn path_param(self) -> &'static str {
        match self {
            Mclass::Capacity => "storage.capacity.path",
            Mclass::Staging => "storage.staging.path",
            Mclass::Pmem => "storage.pmem.path",
        }
    }
}

impl fmt::Display for Mclass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mclass {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Mclass::ALL
            .into_iter()
            .find(|mclass| mclass.as_str() == value)
            .ok_or_else(|| {
                Error::new(ErrorKind::Usage).with_message(format!("unknown media class: {value}"))
            })
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct MclassInfo {
    pub allocated_bytes: u64,
    pub used_bytes: u64,
    pub path: PathBuf,
}

/// Usage of a media-class directory. `allocated_bytes` counts filesystem blocks.
pub(crate) fn mclass_info(path: &Path) -> Result<MclassInfo, Error> {
    let mut allocated_bytes = 0u64;
    let mut used_bytes = 0u64;
    let entries = fs::read_dir(path).map_err(|err| io_error(err, path))?;
    for entry in entries {
        let entry = entry.map_err(|err| io_error(err, path))?;
        let metadata = entry.metadata().map_err(|err| io_error(err, &entry.path()))?;
        if !metadata.is_file() {
            continue;
        }
        used_bytes += metadata.len();
        allocated_bytes += allocated_len(&metadata);
    }
    Ok(MclassInfo {
        allocated_bytes,
        used_bytes,
        path: path.to_path_buf(),
    })
}

#[cfg(unix)]
fn allocated_len(metadata: &fs::Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    metadata.blocks() * 512
}

#[cfg(not(unix))]
fn allocated_len(metadata: &fs::Metadata) -> u64 {
    metadata.len()
}

#[cfg(test)]
mod tests {
    use super::{Mclass, mclass_info};

    #[test]
    fn names_round_trip_lowercase() {
        for mclass in Mclass::ALL {
            let name = mclass.to_string();
            assert_eq!(name, name.to_lowercase());
            assert_eq!(name.parse::<Mclass>().expect("parse"), mclass);
        }
        assert!("CAPACITY".parse::<Mclass>().is_err());
    }

    #[test]
    fn info_sums_file_sizes() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("a.kvs"), vec![0u8; 100]).expect("write");
        std::fs::write(dir.path().join("b.kvs"), vec![0u8; 28]).expect("write");
        let info = mclass_info(dir.path()).expect("info");
        assert_eq!(info.used_bytes, 128);
        assert_eq!(info.path, dir.path());
    }
}
