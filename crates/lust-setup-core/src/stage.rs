//! Filesystem stager: idempotent create/correct/remove primitives for
//! directories, files, and symlinks. Leaf component; everything here checks
//! current state before writing and never re-executes destructively.

use crate::error::{SetupError, SetupResult};
use crate::provider::Owner;
use log::debug;
use sha2::{Digest, Sha256};
use std::fs;
use std::os::unix::fs::{symlink, MetadataExt, PermissionsExt};
use std::path::Path;

/// What `ensure_file` did to the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOutcome {
    /// Destination already matched; nothing written.
    Unchanged,
    /// Destination was created or its content replaced.
    Written,
    /// Destination existed with different content and `overwrite` was off;
    /// content was left byte-for-byte intact.
    Preserved,
}

/// SHA-256 of a file's content, or `None` when the path is absent.
pub fn file_digest(path: &Path) -> SetupResult<Option<String>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(hex::encode(Sha256::digest(&bytes)))),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(SetupError::from_io(err, "reading", path)),
    }
}

pub fn content_digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Create `path` as a directory with the requested owner and mode, or bring
/// an existing directory into line. Returns whether anything was written.
pub fn ensure_directory(path: &Path, owner: Option<Owner>, mode: u32) -> SetupResult<bool> {
    let mut changed = false;
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => {}
        Ok(meta) => {
            return Err(SetupError::PathConflict {
                path: path.to_path_buf(),
                expected: "directory",
                found: file_kind(&meta),
            });
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            fs::create_dir_all(path).map_err(|err| SetupError::from_io(err, "creating", path))?;
            changed = true;
        }
        Err(err) => return Err(SetupError::from_io(err, "inspecting", path)),
    }
    changed |= correct_mode(path, mode)?;
    changed |= correct_owner(path, owner)?;
    Ok(changed)
}

/// Stage `source` at `path` with the requested owner and mode. With
/// `overwrite` off an existing file keeps its content no matter what the
/// source says; owner and mode are still corrected. The source is only read
/// when its content could actually be written.
pub fn ensure_file(
    path: &Path,
    source: &Path,
    owner: Option<Owner>,
    mode: u32,
    overwrite: bool,
) -> SetupResult<FileOutcome> {
    let existing = match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_file() => Some(meta),
        Ok(meta) => {
            return Err(SetupError::PathConflict {
                path: path.to_path_buf(),
                expected: "file",
                found: file_kind(&meta),
            });
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
        Err(err) => return Err(SetupError::from_io(err, "inspecting", path)),
    };

    if existing.is_some() && !overwrite {
        correct_mode(path, mode)?;
        correct_owner(path, owner)?;
        debug!("preserving existing content at {}", path.display());
        return Ok(FileOutcome::Preserved);
    }

    let content = read_source(source)?;
    let outcome = write_if_changed(path, &content, existing.is_some())?;
    correct_mode(path, mode)?;
    correct_owner(path, owner)?;
    Ok(outcome)
}

/// Stage literal `content` at `path`; used for rendered unit definitions.
pub fn ensure_file_content(
    path: &Path,
    content: &[u8],
    owner: Option<Owner>,
    mode: u32,
) -> SetupResult<FileOutcome> {
    let exists = match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_file() => true,
        Ok(meta) => {
            return Err(SetupError::PathConflict {
                path: path.to_path_buf(),
                expected: "file",
                found: file_kind(&meta),
            });
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => false,
        Err(err) => return Err(SetupError::from_io(err, "inspecting", path)),
    };
    let outcome = write_if_changed(path, content, exists)?;
    correct_mode(path, mode)?;
    correct_owner(path, owner)?;
    Ok(outcome)
}

/// Point `link` at `target`, replacing a symlink that points elsewhere.
/// Returns whether anything was written.
pub fn ensure_symlink(target: &Path, link: &Path) -> SetupResult<bool> {
    match fs::symlink_metadata(link) {
        Ok(meta) if meta.file_type().is_symlink() => {
            if fs::read_link(link).map_or(false, |current| current == target) {
                return Ok(false);
            }
            fs::remove_file(link).map_err(|err| SetupError::from_io(err, "replacing", link))?;
        }
        Ok(meta) => {
            return Err(SetupError::PathConflict {
                path: link.to_path_buf(),
                expected: "symlink",
                found: file_kind(&meta),
            });
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => return Err(SetupError::from_io(err, "inspecting", link)),
    }
    symlink(target, link).map_err(|err| SetupError::from_io(err, "linking", link))?;
    Ok(true)
}

/// Remove a regular file; succeeds as a no-op when already absent.
pub fn remove_file(path: &Path) -> SetupResult<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(SetupError::from_io(err, "removing", path)),
    }
}

/// Remove `link` only when it is a symlink, and only when it points at
/// `expected_target`; anything else is left alone so an unrelated file with
/// the same name survives an uninstall.
pub fn remove_symlink(link: &Path, expected_target: &Path) -> SetupResult<bool> {
    match fs::symlink_metadata(link) {
        Ok(meta) if meta.file_type().is_symlink() => {
            match fs::read_link(link) {
                Ok(current) if current != expected_target => Ok(false),
                _ => remove_file(link),
            }
        }
        Ok(_) => Ok(false),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(SetupError::from_io(err, "inspecting", link)),
    }
}

/// Remove a directory tree; succeeds as a no-op when already absent.
pub fn remove_directory(path: &Path) -> SetupResult<bool> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => {
            fs::remove_dir_all(path).map_err(|err| SetupError::from_io(err, "removing", path))?;
            Ok(true)
        }
        Ok(meta) => Err(SetupError::PathConflict {
            path: path.to_path_buf(),
            expected: "directory",
            found: file_kind(&meta),
        }),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(SetupError::from_io(err, "inspecting", path)),
    }
}

fn read_source(source: &Path) -> SetupResult<Vec<u8>> {
    match fs::read(source) {
        Ok(bytes) => Ok(bytes),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            Err(SetupError::SourceNotFound(source.to_path_buf()))
        }
        Err(err) => Err(SetupError::from_io(err, "reading", source)),
    }
}

fn write_if_changed(path: &Path, content: &[u8], exists: bool) -> SetupResult<FileOutcome> {
    if exists {
        if file_digest(path)?.as_deref() == Some(content_digest(content).as_str()) {
            return Ok(FileOutcome::Unchanged);
        }
    }
    fs::write(path, content).map_err(|err| SetupError::from_io(err, "writing", path))?;
    Ok(FileOutcome::Written)
}

fn correct_mode(path: &Path, mode: u32) -> SetupResult<bool> {
    let meta =
        fs::symlink_metadata(path).map_err(|err| SetupError::from_io(err, "inspecting", path))?;
    if meta.permissions().mode() & 0o7777 == mode {
        return Ok(false);
    }
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .map_err(|err| SetupError::from_io(err, "chmodding", path))?;
    Ok(true)
}

fn correct_owner(path: &Path, owner: Option<Owner>) -> SetupResult<bool> {
    let Some(owner) = owner else { return Ok(false) };
    let meta =
        fs::symlink_metadata(path).map_err(|err| SetupError::from_io(err, "inspecting", path))?;
    if meta.uid() == owner.uid && meta.gid() == owner.gid {
        return Ok(false);
    }
    std::os::unix::fs::chown(path, Some(owner.uid), Some(owner.gid))
        .map_err(|err| SetupError::from_io(err, "chowning", path))?;
    Ok(true)
}

fn file_kind(meta: &fs::Metadata) -> &'static str {
    if meta.is_dir() {
        "directory"
    } else if meta.file_type().is_symlink() {
        "symlink"
    } else {
        "file"
    }
}
