// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Default data directory resolution.

use std::path::PathBuf;

/// Default root for key material and audit logs.
///
/// Not created here; the components create their own subdirectories on first
/// write.
pub fn default_data_dir() -> PathBuf {
    base_dir().join("tresor")
}

fn base_dir() -> PathBuf {
    // XDG data dir, then ~/.local/share
    if let Some(xdg) = std::env::var_os("XDG_DATA_HOME").filter(|v| !v.is_empty()) {
        return PathBuf::from(xdg);
    }
    if let Some(home) = std::env::var_os("HOME").filter(|v| !v.is_empty()) {
        return PathBuf::from(home).join(".local").join("share");
    }
    // Last resort
    PathBuf::from("/tmp")
}
