// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Filesystem store: one file per name under a root directory.
//!
//! ## Layout
//!
//! Every stored name maps to a single file directly under the root. Names are
//! escaped into file names: `%`, `/` and NUL are percent-encoded, and so is a
//! leading `.`, which keeps hidden files (including in-flight temp files) out
//! of the key space.
//!
//! ## Atomic create
//!
//! `create` writes the value to a uniquely named temp file, syncs it, then
//! `hard_link`s it into place. The link fails with `EEXIST` if the name is
//! taken, so exactly one of several racing creates wins and readers never
//! observe a partially written value.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use async_trait::async_trait;
use tokio::fs::ReadDir;
use uuid::Uuid;

use super::{require_key, CloseState, Iter, KeyIter, Store, StoreState};
use crate::cancel::Context;
use crate::error::{KmsError, KmsResult};
use crate::pattern::Pattern;

/// File name prefix of in-flight writes.
const TEMP_PREFIX: &str = ".tmp-";

/// [`Store`] connector keeping one file per name.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Open the store rooted at `root`, creating the directory if needed.
    pub async fn open(root: impl AsRef<Path>) -> KmsResult<Self> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| map_io(&root.display().to_string(), e))?;
        tracing::debug!(root = %root.display(), "Filesystem store opened");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, key: &str) -> PathBuf {
        self.root.join(encode_name(key))
    }
}

#[async_trait]
impl Store<String, Vec<u8>> for FsStore {
    async fn status(&self, ctx: &Context) -> KmsResult<StoreState> {
        let start = Instant::now();
        let root = self.root.display().to_string();
        ctx.run(async {
            let meta = tokio::fs::metadata(&self.root)
                .await
                .map_err(|e| KmsError::Unreachable(format!("{root}: {e}")))?;
            if !meta.is_dir() {
                return Err(KmsError::Unreachable(format!("{root} is not a directory")));
            }
            let mut entries = tokio::fs::read_dir(&self.root)
                .await
                .map_err(|e| map_io(&root, e))?;
            entries.next_entry().await.map_err(|e| map_io(&root, e))?;
            Ok(())
        })
        .await?;
        Ok(StoreState {
            latency: start.elapsed(),
        })
    }

    async fn create(&self, ctx: &Context, key: String, value: Vec<u8>) -> KmsResult<()> {
        require_key(&key)?;
        ctx.check()?;

        let path = self.path_of(&key);
        let temp = self.root.join(format!("{TEMP_PREFIX}{}", Uuid::new_v4()));
        let ctx = ctx.clone();

        tokio::task::spawn_blocking(move || {
            let result = write_temp(&temp, &value)
                .map_err(|e| map_io(&key, e))
                .and_then(|()| ctx.check())
                .and_then(|()| fs::hard_link(&temp, &path).map_err(|e| map_io(&key, e)));
            if let Err(e) = fs::remove_file(&temp) {
                if e.kind() != io::ErrorKind::NotFound {
                    tracing::warn!(temp = %temp.display(), error = %e, "Failed to remove temp file");
                }
            }
            result
        })
        .await?
    }

    async fn get(&self, ctx: &Context, key: &String) -> KmsResult<Vec<u8>> {
        require_key(key)?;
        let path = self.path_of(key);
        ctx.run(async { tokio::fs::read(&path).await.map_err(|e| map_io(key, e)) })
            .await
    }

    async fn delete(&self, ctx: &Context, key: &String) -> KmsResult<()> {
        require_key(key)?;
        ctx.check()?;
        match tokio::fs::remove_file(self.path_of(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(map_io(key, e)),
        }
    }

    async fn list(&self, ctx: &Context, pattern: &str) -> KmsResult<KeyIter<String>> {
        let pattern = Pattern::new(pattern)?;
        let root = self.root.display().to_string();
        let dir = ctx
            .run(async { tokio::fs::read_dir(&self.root).await.map_err(|e| map_io(&root, e)) })
            .await?;
        Ok(Box::new(DirIter {
            dir: Some(dir),
            pattern,
            state: CloseState::default(),
        }))
    }
}

/// Lazy directory stream filtered through a pattern.
struct DirIter {
    dir: Option<ReadDir>,
    pattern: Pattern,
    state: CloseState,
}

#[async_trait]
impl Iter<String> for DirIter {
    async fn next(&mut self, ctx: &Context) -> Option<String> {
        loop {
            if !self.state.check(ctx) {
                return None;
            }
            let dir = self.dir.as_mut()?;
            let next = ctx
                .run(async move {
                    dir.next_entry()
                        .await
                        .map_err(|e| KmsError::Unreachable(format!("directory listing: {e}")))
                })
                .await;

            let entry = match next {
                Ok(Some(entry)) => entry,
                Ok(None) => {
                    self.dir = None;
                    return None;
                }
                Err(e) => {
                    self.state.fail(e);
                    self.dir = None;
                    return None;
                }
            };

            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if file_name.starts_with('.') {
                continue;
            }
            if let Some(name) = decode_name(file_name) {
                if self.pattern.matches(&name) {
                    return Some(name);
                }
            }
        }
    }

    async fn close(&mut self) -> KmsResult<()> {
        self.dir = None;
        self.state.close()
    }
}

fn write_temp(path: &Path, value: &[u8]) -> io::Result<()> {
    let mut file = File::create_new(path)?;
    file.write_all(value)?;
    file.sync_all()
}

fn map_io(name: &str, e: io::Error) -> KmsError {
    match e.kind() {
        io::ErrorKind::NotFound => KmsError::NotFound(name.to_string()),
        io::ErrorKind::AlreadyExists => KmsError::AlreadyExists(name.to_string()),
        io::ErrorKind::PermissionDenied => KmsError::Unauthorized(format!("{name}: {e}")),
        io::ErrorKind::InvalidFilename => {
            KmsError::invalid(format!("{name:?} cannot be stored as a file name: {e}"))
        }
        _ => KmsError::Unreachable(format!("{name}: {e}")),
    }
}

/// Escape a stored name into a single file name.
fn encode_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for (i, ch) in name.chars().enumerate() {
        match ch {
            '%' => out.push_str("%25"),
            '/' => out.push_str("%2F"),
            '\0' => out.push_str("%00"),
            '.' if i == 0 => out.push_str("%2E"),
            _ => out.push(ch),
        }
    }
    out
}

/// Inverse of [`encode_name`]; `None` for file names this store never writes.
fn decode_name(file_name: &str) -> Option<String> {
    let bytes = file_name.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = file_name.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}
