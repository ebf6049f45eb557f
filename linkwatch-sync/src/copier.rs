//! Hash-gated atomic file copier.
//!
//! ## `copy_entry` protocol
//!
//! 1. Validate the changed name (relative, no `..`).
//! 2. Stat the source: gone → skip, directory → mirror the directory.
//! 3. SHA-256 hash the source.
//! 4. Compare with the destination's hash → skip if identical.
//! 5. Copy to `<dest>.linkwatch.tmp`.
//! 6. Rename to the final path (atomic on POSIX).

use std::fs::File;
use std::io;
use std::path::{Component, Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::{io_err, CopyError};

/// Suffix of in-flight copies; names carrying it are never mirrored.
pub const TMP_SUFFIX: &str = ".linkwatch.tmp";

// ---------------------------------------------------------------------------
// Copy result
// ---------------------------------------------------------------------------

/// Outcome of mirroring one changed entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopyResult {
    /// Destination now holds the source's bytes.
    Copied { path: PathBuf, digest: String },
    /// Destination already matched the source.
    Unchanged { path: PathBuf },
    /// Source is a directory; the destination directory exists.
    Directory { path: PathBuf },
    /// Nothing to mirror (source deleted, or an in-flight temp file).
    Skipped { path: PathBuf },
}

// ---------------------------------------------------------------------------
// copy_entry
// ---------------------------------------------------------------------------

/// Mirror `<src_root>/<name>` to `<dest_root>/<name>`.
pub fn copy_entry(src_root: &Path, dest_root: &Path, name: &Path) -> Result<CopyResult, CopyError> {
    validate_name(name)?;
    let src = src_root.join(name);
    let dest = dest_root.join(name);

    if name.to_string_lossy().ends_with(TMP_SUFFIX) {
        return Ok(CopyResult::Skipped { path: dest });
    }

    let meta = match std::fs::metadata(&src) {
        Ok(meta) => meta,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            tracing::debug!(path = %src.display(), "source vanished before copy");
            return Ok(CopyResult::Skipped { path: dest });
        }
        Err(err) => return Err(io_err(&src, err)),
    };

    if meta.is_dir() {
        std::fs::create_dir_all(&dest).map_err(|e| io_err(&dest, e))?;
        return Ok(CopyResult::Directory { path: dest });
    }

    let digest = hash_file(&src)?;
    if dest.is_file() && hash_file(&dest)? == digest {
        tracing::debug!("unchanged: {}", dest.display());
        return Ok(CopyResult::Unchanged { path: dest });
    }

    let tmp = PathBuf::from(format!("{}{TMP_SUFFIX}", dest.display()));
    atomic_copy(&src, &dest, &tmp)?;

    tracing::debug!("copied: {} -> {}", src.display(), dest.display());
    Ok(CopyResult::Copied { path: dest, digest })
}

fn validate_name(name: &Path) -> Result<(), CopyError> {
    let invalid = |reason| CopyError::InvalidPath {
        name: name.to_path_buf(),
        reason,
    };
    if name.as_os_str().is_empty() {
        return Err(invalid("empty path"));
    }
    for component in name.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir => return Err(invalid("path escapes the link root")),
            Component::RootDir | Component::Prefix(_) => {
                return Err(invalid("path must be relative"))
            }
        }
    }
    Ok(())
}

fn atomic_copy(src: &Path, dest: &Path, tmp: &Path) -> Result<(), CopyError> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    // `fs::copy` also carries the permission bits across.
    if let Err(e) = std::fs::copy(src, tmp) {
        let _ = std::fs::remove_file(tmp);
        return Err(io_err(tmp, e));
    }
    if let Err(e) = std::fs::rename(tmp, dest) {
        let _ = std::fs::remove_file(tmp);
        return Err(io_err(dest, e));
    }
    Ok(())
}

fn hash_file(path: &Path) -> Result<String, CopyError> {
    let mut file = File::open(path).map_err(|e| io_err(path, e))?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher).map_err(|e| io_err(path, e))?;
    Ok(hex::encode(hasher.finalize()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
