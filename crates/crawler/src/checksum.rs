//! Content checksums and the backup archive they key.
//!
//! Archive entries are named `<yymmdd>_<HHMM>_<original name>_<checksum>`. The
//! trailing checksum is what makes a re-delivered file recognisable.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

const CHUNK_SIZE: usize = 8192;

/// `yymmdd_HHMM`, as embedded in archive entry names.
pub const BACKUP_TIMESTAMP_FORMAT: &str = "%y%m%d_%H%M";

static BACKUP_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{6}_\d{4})_(.*)_(\w*)$").expect("backup name regex"));

/// Hex blake3 digest of the whole file, read in fixed-size chunks.
pub fn checksum(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    let mut buf = [0u8; CHUNK_SIZE];

    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hasher.finalize().to_hex().to_string())
}

/// Whether any archive entry in `archive_dir` carries `digest`.
///
/// A missing directory is an error, not "no match".
pub fn matches(digest: &str, archive_dir: &Path) -> io::Result<bool> {
    for entry in std::fs::read_dir(archive_dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if let Some(caps) = BACKUP_NAME.captures(name) {
            if &caps[3] == digest {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

/// Archive entry name for `file_name` backed up at `at`.
pub fn backup_name(file_name: &str, digest: &str, at: DateTime<Utc>) -> String {
    format!("{}_{}_{}", at.format(BACKUP_TIMESTAMP_FORMAT), file_name, digest)
}
