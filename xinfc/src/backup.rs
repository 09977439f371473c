//! One-time backup of the tag's original NDEF area
//!
//! The first run on a chip saves the stock content; later runs leave an
//! existing backup alone so it always holds the factory data.

use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use log::info;

pub const DEFAULT_BACKUP_FILE: &str = "nfc_ndef_backup.bin";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupOutcome {
    Created(PathBuf),
    /// A backup already existed and was kept
    Skipped(PathBuf),
    Disabled,
}

#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    #[error("cannot open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot write to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Save `data` to `path` unless the file already exists
pub fn write_backup(path: &Path, data: &[u8]) -> Result<BackupOutcome, BackupError> {
    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path);

    let mut file = match file {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            info!("Backup file found. Skipping backup...");
            return Ok(BackupOutcome::Skipped(path.to_path_buf()));
        }
        Err(source) => {
            return Err(BackupError::Open { path: path.to_path_buf(), source });
        }
    };

    info!("Stock chip data backup not found. Backing up...");
    if let Err(source) = file.write_all(data).and_then(|()| file.sync_all()) {
        drop(file);
        // a partial backup would be kept forever by later runs
        let _ = std::fs::remove_file(path);
        return Err(BackupError::Write { path: path.to_path_buf(), source });
    }

    info!("Backup complete.");
    Ok(BackupOutcome::Created(path.to_path_buf()))
}
