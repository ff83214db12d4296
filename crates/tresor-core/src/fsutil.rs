// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Crash-safe file writes.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

use crate::error::Result;

/// Replace `path` with `data` atomically.
///
/// Writes to a sibling temp file, fsyncs it, then renames over the target, so
/// readers see either the old or the new content. With `owner_only` the file
/// is created with mode 0600 on Unix.
pub fn atomic_write(path: &Path, data: &[u8], owner_only: bool) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let tmp = temp_path(path);
    let result = (|| -> Result<()> {
        let mut file = create_file(&tmp, owner_only)?;
        file.write_all(data)?;
        file.sync_all()?;
        fs::rename(&tmp, path)?;
        sync_parent(path);
        Ok(())
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    debug!(path = %path.display(), len = data.len(), "atomic write");
    result
}

/// Create (truncate) a file, owner read/write only when requested.
///
/// The mode is reapplied after opening: `O_CREAT` modes do not touch a file
/// that already exists, such as a stale temp file from a crashed run.
pub fn create_file(path: &Path, owner_only: bool) -> Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
        if owner_only {
            options.mode(0o600);
            let file = options.open(path)?;
            file.set_permissions(fs::Permissions::from_mode(0o600))?;
            return Ok(file);
        }
    }
    #[cfg(not(unix))]
    let _ = owner_only;
    Ok(options.open(path)?)
}

/// `<path>.<suffix>` next to the original.
pub fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}

/// Unique per call within the process, so concurrent writers of the same
/// target never share a temp file.
fn temp_path(path: &Path) -> PathBuf {
    static SEQ: AtomicU64 = AtomicU64::new(0);
    let seq = SEQ.fetch_add(1, Ordering::Relaxed);
    sibling_with_suffix(path, &format!("tmp{}.{seq}", std::process::id()))
}

fn sync_parent(path: &Path) {
    #[cfg(unix)]
    {
        if let Some(Ok(dir)) = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(File::open)
        {
            let _ = dir.sync_all();
        }
    }
    #[cfg(not(unix))]
    let _ = path;
}
