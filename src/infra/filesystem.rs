//! Filesystem operations
//!
//! Handles file and directory operations.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{ConfigError, FilesystemError};

/// Create a directory and all parent directories
pub fn create_dir_all(path: &Path) -> Result<(), FilesystemError> {
    fs::create_dir_all(path).map_err(|e| FilesystemError::CreateDir {
        path: path.to_path_buf(),
        error: e.to_string(),
    })
}

/// Remove a directory and all its contents
pub fn remove_dir_all(path: &Path) -> Result<(), FilesystemError> {
    if path.exists() {
        fs::remove_dir_all(path).map_err(|e| FilesystemError::RemoveDir {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
    }
    Ok(())
}

/// Remove a directory if present and create it empty
pub fn recreate_dir(path: &Path) -> Result<(), FilesystemError> {
    remove_dir_all(path)?;
    create_dir_all(path)
}

/// Write content to a file
pub fn write_file(path: &Path, content: &str) -> Result<(), FilesystemError> {
    if let Some(parent) = path.parent() {
        create_dir_all(parent)?;
    }
    fs::write(path, content).map_err(|e| FilesystemError::WriteFile {
        path: path.to_path_buf(),
        error: e.to_string(),
    })
}

/// Read content from a file
pub fn read_file(path: &Path) -> Result<String, FilesystemError> {
    fs::read_to_string(path).map_err(|e| FilesystemError::ReadFile {
        path: path.to_path_buf(),
        error: e.to_string(),
    })
}

/// Copy a single file, creating parent directories
pub fn copy_file(from: &Path, to: &Path) -> Result<(), FilesystemError> {
    if let Some(parent) = to.parent() {
        create_dir_all(parent)?;
    }
    fs::copy(from, to)
        .map(|_| ())
        .map_err(|e| copy_error(from, to, &e))
}

/// Check that a directory accepts new files
pub fn ensure_writable(path: &Path) -> Result<(), ConfigError> {
    tempfile::tempfile_in(path)
        .map(drop)
        .map_err(|e| ConfigError::WorkdirNotWritable {
            path: path.to_path_buf(),
            error: e.to_string(),
        })
}

/// Create a uniquely named directory under the system temp directory
///
/// The directory is not removed automatically.
pub fn create_ephemeral_dir(prefix: &str) -> Result<PathBuf, FilesystemError> {
    let path = std::env::temp_dir().join(format!("{prefix}{}", uuid::Uuid::new_v4().simple()));
    create_dir_all(&path)?;
    Ok(path)
}

/// Copy the contents of `from` into `to`, preserving symlinks
///
/// Returns the number of entries copied.
pub fn copy_dir_contents(from: &Path, to: &Path) -> Result<usize, FilesystemError> {
    create_dir_all(to)?;
    let mut copied = 0;
    for entry in WalkDir::new(from).min_depth(1).follow_links(false) {
        let entry = entry.map_err(|e| FilesystemError::ReadFile {
            path: from.to_path_buf(),
            error: e.to_string(),
        })?;
        let relative = entry
            .path()
            .strip_prefix(from)
            .unwrap_or_else(|_| entry.path());
        let target = to.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            create_dir_all(&target)?;
        } else if file_type.is_symlink() {
            let link = fs::read_link(entry.path()).map_err(|e| copy_error(entry.path(), &target, &e))?;
            if target.symlink_metadata().is_ok() {
                fs::remove_file(&target).map_err(|e| copy_error(entry.path(), &target, &e))?;
            }
            std::os::unix::fs::symlink(&link, &target)
                .map_err(|e| copy_error(entry.path(), &target, &e))?;
        } else {
            copy_file(entry.path(), &target)?;
        }
        copied += 1;
    }
    Ok(copied)
}

/// Total size of the regular files below a directory
pub fn dir_size(path: &Path) -> u64 {
    WalkDir::new(path)
        .follow_links(false)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

/// Create (or truncate) a sparse file of exactly `size` bytes
pub fn create_sized_file(path: &Path, size: u64) -> Result<(), FilesystemError> {
    if let Some(parent) = path.parent() {
        create_dir_all(parent)?;
    }
    let write_error = |e: io::Error| FilesystemError::WriteFile {
        path: path.to_path_buf(),
        error: e.to_string(),
    };
    let file = File::create(path).map_err(write_error)?;
    file.set_len(size).map_err(write_error)
}

/// Copy the whole of `source` into `target` starting at byte `offset`
///
/// `target` is not truncated. Returns the number of bytes written.
pub fn write_at(target: &Path, source: &Path, offset: u64) -> Result<u64, FilesystemError> {
    let mut input = File::open(source).map_err(|e| copy_error(source, target, &e))?;
    let mut output = OpenOptions::new()
        .write(true)
        .open(target)
        .map_err(|e| copy_error(source, target, &e))?;
    output
        .seek(SeekFrom::Start(offset))
        .map_err(|e| copy_error(source, target, &e))?;
    io::copy(&mut input, &mut output).map_err(|e| copy_error(source, target, &e))
}

fn copy_error(from: &Path, to: &Path, error: &io::Error) -> FilesystemError {
    FilesystemError::Copy {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        error: error.to_string(),
    }
}
