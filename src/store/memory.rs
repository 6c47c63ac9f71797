// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Volatile in-process store.
//!
//! Backs tests and development deployments. Names are kept in an ordered map
//! behind an async `RwLock`, so `create` is a check-and-insert under the
//! write lock and listings come back sorted.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{require_key, KeyIter, Store, StoreState, VecIter};
use crate::cancel::Context;
use crate::error::{KmsError, KmsResult};
use crate::pattern::Pattern;

/// In-memory [`Store`] connector.
#[derive(Debug, Default)]
pub struct MemStore {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store<String, Vec<u8>> for MemStore {
    async fn status(&self, ctx: &Context) -> KmsResult<StoreState> {
        ctx.check()?;
        let start = Instant::now();
        let _guard = self.entries.read().await;
        Ok(StoreState {
            latency: start.elapsed(),
        })
    }

    async fn create(&self, ctx: &Context, key: String, value: Vec<u8>) -> KmsResult<()> {
        require_key(&key)?;
        let mut entries = ctx.run(async { Ok::<_, KmsError>(self.entries.write().await) }).await?;
        ctx.check()?;
        match entries.entry(key) {
            Entry::Occupied(entry) => Err(KmsError::AlreadyExists(entry.key().clone())),
            Entry::Vacant(entry) => {
                entry.insert(value);
                Ok(())
            }
        }
    }

    async fn get(&self, ctx: &Context, key: &String) -> KmsResult<Vec<u8>> {
        let entries = ctx.run(async { Ok::<_, KmsError>(self.entries.read().await) }).await?;
        entries
            .get(key)
            .cloned()
            .ok_or_else(|| KmsError::NotFound(key.clone()))
    }

    async fn delete(&self, ctx: &Context, key: &String) -> KmsResult<()> {
        let mut entries = ctx.run(async { Ok::<_, KmsError>(self.entries.write().await) }).await?;
        ctx.check()?;
        entries.remove(key);
        Ok(())
    }

    async fn list(&self, ctx: &Context, pattern: &str) -> KmsResult<KeyIter<String>> {
        let pattern = Pattern::new(pattern)?;
        let entries = ctx.run(async { Ok::<_, KmsError>(self.entries.read().await) }).await?;
        let names: Vec<String> = entries
            .keys()
            .filter(|name| pattern.matches(name))
            .cloned()
            .collect();
        Ok(Box::new(VecIter::new(names)))
    }
}
