// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! File-backed token store: load/save a JSON token pair with atomic writes.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use anyhow::Context;

use futures_util::future::BoxFuture;
use parking_lot::RwLock;

use crate::token::{TokenPair, TokenStore};

/// Token store persisted to a JSON file, cached in memory.
pub struct FileTokenStore {
    path: PathBuf,
    cached: RwLock<Option<TokenPair>>,
}

impl FileTokenStore {
    /// Open the store at `path`. A missing file starts empty; a corrupt one
    /// is ignored with a warning and overwritten on the next save.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let cached = match load(&path) {
            Ok(tokens) => tokens,
            Err(e) => {
                tracing::warn!(path = %path.display(), err = %e, "ignoring unreadable token file");
                None
            }
        };
        Self { path, cached: RwLock::new(cached) }
    }

    /// Open `tokens.json` under the given state directory.
    pub fn in_dir(dir: &Path) -> Self {
        Self::open(dir.join("tokens.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn snapshot(&self) -> Option<TokenPair> {
        self.cached.read().clone()
    }

    /// Forget the stored pair and remove the file.
    pub fn clear(&self) -> anyhow::Result<()> {
        *self.cached.write() = None;
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl TokenStore for FileTokenStore {
    fn get_tokens(&self) -> BoxFuture<'_, Option<TokenPair>> {
        let tokens = self.snapshot();
        Box::pin(async move { tokens })
    }

    fn set_tokens(&self, tokens: TokenPair) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async move {
            save(&self.path, &tokens)?;
            *self.cached.write() = Some(tokens);
            Ok(())
        })
    }
}

/// Load a token pair from a JSON file. A missing file yields `None`.
pub fn load(path: &Path) -> anyhow::Result<Option<TokenPair>> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let tokens: TokenPair = serde_json::from_str(&contents)?;
    Ok(Some(tokens))
}

/// Replace the token file so readers only ever see a complete pair.
///
/// The pair is written and synced to a sibling temp file that only the
/// owner can read, then renamed over `path`. Parent directories are created
/// on first login.
pub fn save(path: &Path, tokens: &TokenPair) -> anyhow::Result<()> {
    static SAVES: AtomicU32 = AtomicU32::new(0);

    let Some(file_name) = path.file_name() else {
        anyhow::bail!("token path has no file name: {}", path.display());
    };
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    let tmp_path = path.with_file_name(format!(
        "{}.{}-{}.tmp",
        file_name.to_string_lossy(),
        std::process::id(),
        SAVES.fetch_add(1, Ordering::Relaxed),
    ));

    let mut file = open_private(&tmp_path)?;
    serde_json::to_writer_pretty(&mut file, tokens)?;
    file.write_all(b"\n")?;
    file.sync_all()?;
    drop(file);

    if let Err(e) = std::fs::rename(&tmp_path, path) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(e).with_context(|| format!("replacing {}", path.display()));
    }
    Ok(())
}

fn open_private(path: &Path) -> std::io::Result<std::fs::File> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path)
}

#[cfg(test)]
#[path = "persist_tests.rs"]
mod tests;
