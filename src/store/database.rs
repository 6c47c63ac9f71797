// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Embedded store backed by redb (pure Rust, ACID).
//!
//! ## Table Layout
//!
//! - `entries`: stored name → value bytes
//!
//! redb serializes write transactions, so `create` is a plain
//! check-and-insert inside one write transaction. Listing reads the table
//! in key order one page per read transaction, resuming after the last key
//! seen, so a long listing never pins a snapshot. Only the key range under
//! the pattern's literal prefix is read.

use std::collections::VecDeque;
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};

use super::{require_key, CloseState, Iter, KeyIter, Store, StoreState};
use crate::cancel::Context;
use crate::error::{KmsError, KmsResult};
use crate::pattern::Pattern;

/// Stored name → value bytes.
const ENTRIES: TableDefinition<&str, &[u8]> = TableDefinition::new("entries");

/// Names fetched per listing page.
const PAGE_SIZE: usize = 256;

#[derive(Debug, thiserror::Error)]
enum DbError {
    #[error("redb database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

type DbResult<T> = Result<T, DbError>;

impl From<DbError> for KmsError {
    fn from(e: DbError) -> Self {
        KmsError::Unreachable(e.to_string())
    }
}

/// Result of a conditional write transaction.
enum Commit {
    Done,
    Exists,
    Canceled,
}

/// [`Store`] connector on an embedded redb database.
#[derive(Clone)]
pub struct RedbStore {
    db: Arc<Database>,
    path: PathBuf,
}

impl std::fmt::Debug for RedbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStore").field("path", &self.path).finish()
    }
}

impl RedbStore {
    /// Open (or create) the database at the given path.
    pub async fn open(path: impl AsRef<Path>) -> KmsResult<Self> {
        let path = path.as_ref().to_path_buf();
        let db_path = path.clone();
        let db = tokio::task::spawn_blocking(move || open_database(&db_path)).await??;
        tracing::debug!(path = %path.display(), "redb store opened");
        Ok(Self {
            db: Arc::new(db),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn open_database(path: &Path) -> DbResult<Database> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let db = Database::create(path)?;

    // Pre-create the table so later read transactions don't fail
    let write_txn = db.begin_write()?;
    {
        let _ = write_txn.open_table(ENTRIES)?;
    }
    write_txn.commit()?;
    Ok(db)
}

fn insert_if_absent(db: &Database, ctx: &Context, key: &str, value: &[u8]) -> DbResult<Commit> {
    let write_txn = db.begin_write()?;
    let exists = {
        let mut table = write_txn.open_table(ENTRIES)?;
        if table.get(key)?.is_some() {
            true
        } else {
            table.insert(key, value)?;
            false
        }
    };
    if exists {
        write_txn.abort()?;
        return Ok(Commit::Exists);
    }
    if ctx.is_canceled() {
        write_txn.abort()?;
        return Ok(Commit::Canceled);
    }
    write_txn.commit()?;
    Ok(Commit::Done)
}

fn remove(db: &Database, ctx: &Context, key: &str) -> DbResult<Commit> {
    let write_txn = db.begin_write()?;
    {
        let mut table = write_txn.open_table(ENTRIES)?;
        table.remove(key)?;
    }
    if ctx.is_canceled() {
        write_txn.abort()?;
        return Ok(Commit::Canceled);
    }
    write_txn.commit()?;
    Ok(Commit::Done)
}

fn lookup(db: &Database, key: &str) -> DbResult<Option<Vec<u8>>> {
    let read_txn = db.begin_read()?;
    let table = read_txn.open_table(ENTRIES)?;
    Ok(table.get(key)?.map(|value| value.value().to_vec()))
}

/// Up to [`PAGE_SIZE`] names starting with `prefix`, in key order, resuming
/// strictly after `after`. The flag is set once no further page exists.
fn read_page(db: &Database, prefix: &str, after: Option<&str>) -> DbResult<(Vec<String>, bool)> {
    let read_txn = db.begin_read()?;
    let table = read_txn.open_table(ENTRIES)?;
    let lower = match after {
        Some(last) => Bound::Excluded(last),
        None => Bound::Included(prefix),
    };
    let mut names = Vec::with_capacity(PAGE_SIZE);
    for entry in table.range::<&str>((lower, Bound::Unbounded))? {
        let (key, _) = entry?;
        let name = key.value();
        // Names sharing the prefix are contiguous in key order
        if !name.starts_with(prefix) {
            return Ok((names, true));
        }
        names.push(name.to_string());
        if names.len() >= PAGE_SIZE {
            return Ok((names, false));
        }
    }
    Ok((names, true))
}

#[async_trait]
impl Store<String, Vec<u8>> for RedbStore {
    async fn status(&self, ctx: &Context) -> KmsResult<StoreState> {
        let start = Instant::now();
        let db = Arc::clone(&self.db);
        ctx.run(async move {
            tokio::task::spawn_blocking(move || -> DbResult<()> {
                let read_txn = db.begin_read()?;
                read_txn.open_table(ENTRIES)?;
                Ok(())
            })
            .await??;
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
        let db = Arc::clone(&self.db);
        let txn_ctx = ctx.clone();
        let name = key.clone();
        let outcome =
            tokio::task::spawn_blocking(move || insert_if_absent(&db, &txn_ctx, &name, &value))
                .await??;
        match outcome {
            Commit::Done => Ok(()),
            Commit::Exists => Err(KmsError::AlreadyExists(key)),
            Commit::Canceled => Err(KmsError::Canceled),
        }
    }

    async fn get(&self, ctx: &Context, key: &String) -> KmsResult<Vec<u8>> {
        require_key(key)?;
        let db = Arc::clone(&self.db);
        let name = key.clone();
        let value = ctx
            .run(async move {
                Ok(tokio::task::spawn_blocking(move || lookup(&db, &name)).await??)
            })
            .await?;
        value.ok_or_else(|| KmsError::NotFound(key.clone()))
    }

    async fn delete(&self, ctx: &Context, key: &String) -> KmsResult<()> {
        require_key(key)?;
        ctx.check()?;
        let db = Arc::clone(&self.db);
        let txn_ctx = ctx.clone();
        let name = key.clone();
        match tokio::task::spawn_blocking(move || remove(&db, &txn_ctx, &name)).await?? {
            Commit::Canceled => Err(KmsError::Canceled),
            Commit::Done | Commit::Exists => Ok(()),
        }
    }

    async fn list(&self, ctx: &Context, pattern: &str) -> KmsResult<KeyIter<String>> {
        let pattern = Pattern::new(pattern)?;
        ctx.check()?;
        Ok(Box::new(PageIter {
            db: Arc::clone(&self.db),
            prefix: pattern.literal_prefix().to_string(),
            pattern,
            page: VecDeque::new(),
            last: None,
            exhausted: false,
            state: CloseState::default(),
        }))
    }
}

/// Lazy, key-ordered listing fetched one page at a time.
struct PageIter {
    db: Arc<Database>,
    /// Literal prefix of the pattern; bounds the key range read.
    prefix: String,
    pattern: Pattern,
    page: VecDeque<String>,
    last: Option<String>,
    exhausted: bool,
    state: CloseState,
}

impl PageIter {
    async fn fetch(&mut self, ctx: &Context) -> KmsResult<()> {
        let db = Arc::clone(&self.db);
        let prefix = self.prefix.clone();
        let after = self.last.clone();
        let (names, done) = ctx
            .run(async move {
                Ok(tokio::task::spawn_blocking(move || {
                    read_page(&db, &prefix, after.as_deref())
                })
                .await??)
            })
            .await?;

        self.exhausted = done;
        if let Some(last) = names.last() {
            self.last = Some(last.clone());
        }
        self.page
            .extend(names.into_iter().filter(|name| self.pattern.matches(name)));
        Ok(())
    }
}

#[async_trait]
impl Iter<String> for PageIter {
    async fn next(&mut self, ctx: &Context) -> Option<String> {
        loop {
            if !self.state.check(ctx) {
                return None;
            }
            if let Some(name) = self.page.pop_front() {
                return Some(name);
            }
            if self.exhausted {
                return None;
            }
            if let Err(e) = self.fetch(ctx).await {
                self.state.fail(e);
                return None;
            }
        }
    }

    async fn close(&mut self) -> KmsResult<()> {
        self.page.clear();
        self.exhausted = true;
        self.state.close()
    }
}
