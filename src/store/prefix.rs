// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Namespacing wrapper: a view of a shared store under a fixed prefix.

use async_trait::async_trait;

use super::{require_key, Iter, KeyIter, SharedStore, Store, StoreState};
use crate::cancel::Context;
use crate::error::{KmsError, KmsResult};
use crate::pattern::{has_metacharacters, MATCH_ALL};

/// A [`Store`] whose names all live under `prefix` in an inner store.
///
/// Callers see unprefixed names; listing only ever yields names under the
/// prefix.
#[derive(Clone)]
pub struct PrefixStore {
    inner: SharedStore,
    prefix: String,
}

impl PrefixStore {
    /// Wrap `inner`. The prefix must not contain pattern characters.
    pub fn new(inner: SharedStore, prefix: impl Into<String>) -> KmsResult<Self> {
        let prefix = prefix.into();
        if has_metacharacters(&prefix) {
            return Err(KmsError::invalid(format!(
                "store prefix {prefix:?} contains a pattern character"
            )));
        }
        Ok(Self { inner, prefix })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn full(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }
}

impl std::fmt::Debug for PrefixStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrefixStore")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Store<String, Vec<u8>> for PrefixStore {
    async fn status(&self, ctx: &Context) -> KmsResult<StoreState> {
        self.inner.status(ctx).await
    }

    async fn create(&self, ctx: &Context, key: String, value: Vec<u8>) -> KmsResult<()> {
        require_key(&key)?;
        match self.inner.create(ctx, self.full(&key), value).await {
            Err(KmsError::AlreadyExists(_)) => Err(KmsError::AlreadyExists(key)),
            other => other,
        }
    }

    async fn get(&self, ctx: &Context, key: &String) -> KmsResult<Vec<u8>> {
        require_key(key)?;
        match self.inner.get(ctx, &self.full(key)).await {
            Err(KmsError::NotFound(_)) => Err(KmsError::NotFound(key.clone())),
            other => other,
        }
    }

    async fn delete(&self, ctx: &Context, key: &String) -> KmsResult<()> {
        require_key(key)?;
        self.inner.delete(ctx, &self.full(key)).await
    }

    async fn list(&self, ctx: &Context, pattern: &str) -> KmsResult<KeyIter<String>> {
        let pattern = if pattern.is_empty() { MATCH_ALL } else { pattern };
        let inner = self.inner.list(ctx, &self.full(pattern)).await?;
        Ok(Box::new(StripPrefix {
            inner,
            prefix: self.prefix.clone(),
        }))
    }
}

/// Removes the namespace prefix from every listed name.
struct StripPrefix {
    inner: KeyIter<String>,
    prefix: String,
}

#[async_trait]
impl Iter<String> for StripPrefix {
    async fn next(&mut self, ctx: &Context) -> Option<String> {
        loop {
            let name = self.inner.next(ctx).await?;
            if let Some(stripped) = name.strip_prefix(self.prefix.as_str()) {
                if !stripped.is_empty() {
                    return Some(stripped.to_string());
                }
            }
        }
    }

    async fn close(&mut self) -> KmsResult<()> {
        self.inner.close().await
    }
}
