// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Store contract conformance, run against every bundled connector and the
//! namespacing and typed wrappers.

use std::collections::BTreeSet;
use std::sync::Arc;

use enclave_keystore::cancel::Context;
use enclave_keystore::error::KmsError;
use enclave_keystore::repository::Records;
use enclave_keystore::store::{
    drain, FsStore, Iter, MemStore, PrefixStore, RedbStore, SharedStore, Store,
};
use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use tokio::sync::Barrier;

type Fixture = (Option<TempDir>, SharedStore);

async fn memory_fixture() -> Fixture {
    (None, Arc::new(MemStore::new()))
}

async fn fs_fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let store = FsStore::open(dir.path().join("store")).await.unwrap();
    (Some(dir), Arc::new(store))
}

async fn redb_fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let store = RedbStore::open(dir.path().join("store.redb")).await.unwrap();
    (Some(dir), Arc::new(store))
}

async fn prefixed_memory_fixture() -> Fixture {
    let inner: SharedStore = Arc::new(MemStore::new());
    // A neighbour outside the namespace that must never show up
    inner
        .create(&Context::background(), "outside".to_string(), b"x".to_vec())
        .await
        .unwrap();
    (None, Arc::new(PrefixStore::new(inner, "tenant/").unwrap()))
}

async fn prefixed_fs_fixture() -> Fixture {
    let (dir, inner) = fs_fixture().await;
    (dir, Arc::new(PrefixStore::new(inner, "enclaves/e/keys/").unwrap()))
}

fn key(name: &str) -> String {
    name.to_string()
}

async fn create_then_get(store: SharedStore) {
    let ctx = Context::background();
    let value: Vec<u8> = (0..=255).collect();
    store.create(&ctx, key("k"), value.clone()).await.unwrap();
    assert_eq!(store.get(&ctx, &key("k")).await.unwrap(), value);
}

async fn duplicate_create_keeps_original(store: SharedStore) {
    let ctx = Context::background();
    store.create(&ctx, key("k"), b"v1".to_vec()).await.unwrap();
    let err = store.create(&ctx, key("k"), b"v2".to_vec()).await.unwrap_err();
    assert!(matches!(err, KmsError::AlreadyExists(_)), "{err}");
    assert_eq!(store.get(&ctx, &key("k")).await.unwrap(), b"v1");
}

async fn missing_and_deleted_keys_are_not_found(store: SharedStore) {
    let ctx = Context::background();
    assert!(store.get(&ctx, &key("never")).await.unwrap_err().is_not_found());

    store.create(&ctx, key("gone"), b"v".to_vec()).await.unwrap();
    store.delete(&ctx, &key("gone")).await.unwrap();
    assert!(store.get(&ctx, &key("gone")).await.unwrap_err().is_not_found());
}

async fn delete_is_idempotent(store: SharedStore) {
    let ctx = Context::background();
    store.delete(&ctx, &key("absent")).await.unwrap();
    store.create(&ctx, key("k"), Vec::new()).await.unwrap();
    store.delete(&ctx, &key("k")).await.unwrap();
    store.delete(&ctx, &key("k")).await.unwrap();
}

async fn recreate_after_delete(store: SharedStore) {
    let ctx = Context::background();
    store.create(&ctx, key("k"), b"old".to_vec()).await.unwrap();
    store.delete(&ctx, &key("k")).await.unwrap();
    store.create(&ctx, key("k"), b"new".to_vec()).await.unwrap();
    assert_eq!(store.get(&ctx, &key("k")).await.unwrap(), b"new");
}

async fn list_filters_by_pattern(store: SharedStore) {
    let ctx = Context::background();
    for name in ["a", "ab", "b"] {
        store.create(&ctx, key(name), Vec::new()).await.unwrap();
    }

    let matched: BTreeSet<String> = drain(store.list(&ctx, "a*").await.unwrap(), &ctx)
        .await
        .unwrap()
        .into_iter()
        .collect();
    assert_eq!(matched, BTreeSet::from([key("a"), key("ab")]));

    for all in ["", "*"] {
        let names: BTreeSet<String> = drain(store.list(&ctx, all).await.unwrap(), &ctx)
            .await
            .unwrap()
            .into_iter()
            .collect();
        assert_eq!(names, BTreeSet::from([key("a"), key("ab"), key("b")]));
    }
}

async fn repeated_stars_list_like_one(store: SharedStore) {
    let ctx = Context::background();
    for name in ["a1b", "a/x/b", "ac"] {
        store.create(&ctx, key(name), Vec::new()).await.unwrap();
    }
    let matched: BTreeSet<String> = drain(store.list(&ctx, "a**b").await.unwrap(), &ctx)
        .await
        .unwrap()
        .into_iter()
        .collect();
    assert_eq!(matched, BTreeSet::from([key("a1b"), key("a/x/b")]));
}

async fn iterator_close_is_idempotent(store: SharedStore) {
    let ctx = Context::background();
    for name in ["x", "y"] {
        store.create(&ctx, key(name), Vec::new()).await.unwrap();
    }
    let mut iter = store.list(&ctx, "*").await.unwrap();
    assert!(iter.next(&ctx).await.is_some());
    iter.close().await.unwrap();
    iter.close().await.unwrap();
    assert!(iter.next(&ctx).await.is_none());
}

async fn canceled_listing_reports_on_close(store: SharedStore) {
    let ctx = Context::background();
    for name in ["x", "y", "z"] {
        store.create(&ctx, key(name), Vec::new()).await.unwrap();
    }
    let listing = ctx.child();
    let mut iter = store.list(&listing, "*").await.unwrap();
    assert!(iter.next(&listing).await.is_some());

    listing.cancel();
    assert!(iter.next(&listing).await.is_none());
    assert!(iter.close().await.unwrap_err().is_canceled());
    assert!(iter.close().await.is_ok());
}

async fn canceled_create_is_not_visible(store: SharedStore) {
    let ctx = Context::background();
    let canceled = ctx.child();
    canceled.cancel();

    let err = store
        .create(&canceled, key("k"), b"v".to_vec())
        .await
        .unwrap_err();
    assert!(err.is_canceled());
    assert!(store.get(&ctx, &key("k")).await.unwrap_err().is_not_found());
}

async fn canceled_reads_fail_with_canceled(store: SharedStore) {
    let ctx = Context::background();
    store.create(&ctx, key("k"), b"v".to_vec()).await.unwrap();
    let canceled = ctx.child();
    canceled.cancel();
    assert!(store.get(&canceled, &key("k")).await.unwrap_err().is_canceled());
}

async fn concurrent_create_has_one_winner(store: SharedStore) {
    const CONTENDERS: usize = 8;
    let ctx = Context::background();
    let barrier = Arc::new(Barrier::new(CONTENDERS));

    let mut tasks = Vec::with_capacity(CONTENDERS);
    for i in 0..CONTENDERS {
        let store = Arc::clone(&store);
        let barrier = Arc::clone(&barrier);
        let ctx = ctx.clone();
        tasks.push(tokio::spawn(async move {
            let value = format!("value-{i}").into_bytes();
            barrier.wait().await;
            let result = store.create(&ctx, key("race"), value.clone()).await;
            (value, result)
        }));
    }

    let mut winners = Vec::new();
    for task in tasks {
        let (value, result) = task.await.unwrap();
        match result {
            Ok(()) => winners.push(value),
            Err(KmsError::AlreadyExists(_)) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(winners.len(), 1);
    assert_eq!(store.get(&ctx, &key("race")).await.unwrap(), winners[0]);
}

async fn status_succeeds(store: SharedStore) {
    let ctx = Context::background();
    store.status(&ctx).await.unwrap();
}

macro_rules! conformance {
    ($module:ident, $fixture:ident) => {
        mod $module {
            use super::*;

            #[tokio::test]
            async fn create_then_get() {
                let (_guard, store) = $fixture().await;
                super::create_then_get(store).await;
            }

            #[tokio::test]
            async fn duplicate_create_keeps_original() {
                let (_guard, store) = $fixture().await;
                super::duplicate_create_keeps_original(store).await;
            }

            #[tokio::test]
            async fn missing_and_deleted_keys_are_not_found() {
                let (_guard, store) = $fixture().await;
                super::missing_and_deleted_keys_are_not_found(store).await;
            }

            #[tokio::test]
            async fn delete_is_idempotent() {
                let (_guard, store) = $fixture().await;
                super::delete_is_idempotent(store).await;
            }

            #[tokio::test]
            async fn recreate_after_delete() {
                let (_guard, store) = $fixture().await;
                super::recreate_after_delete(store).await;
            }

            #[tokio::test]
            async fn list_filters_by_pattern() {
                let (_guard, store) = $fixture().await;
                super::list_filters_by_pattern(store).await;
            }

            #[tokio::test]
            async fn repeated_stars_list_like_one() {
                let (_guard, store) = $fixture().await;
                super::repeated_stars_list_like_one(store).await;
            }

            #[tokio::test]
            async fn iterator_close_is_idempotent() {
                let (_guard, store) = $fixture().await;
                super::iterator_close_is_idempotent(store).await;
            }

            #[tokio::test]
            async fn canceled_listing_reports_on_close() {
                let (_guard, store) = $fixture().await;
                super::canceled_listing_reports_on_close(store).await;
            }

            #[tokio::test]
            async fn canceled_create_is_not_visible() {
                let (_guard, store) = $fixture().await;
                super::canceled_create_is_not_visible(store).await;
            }

            #[tokio::test]
            async fn canceled_reads_fail_with_canceled() {
                let (_guard, store) = $fixture().await;
                super::canceled_reads_fail_with_canceled(store).await;
            }

            #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
            async fn concurrent_create_has_one_winner() {
                let (_guard, store) = $fixture().await;
                super::concurrent_create_has_one_winner(store).await;
            }

            #[tokio::test]
            async fn status_succeeds() {
                let (_guard, store) = $fixture().await;
                super::status_succeeds(store).await;
            }
        }
    };
}

conformance!(memory_store, memory_fixture);
conformance!(fs_store, fs_fixture);
conformance!(redb_store, redb_fixture);
conformance!(prefix_over_memory, prefixed_memory_fixture);
conformance!(prefix_over_fs, prefixed_fs_fixture);

#[tokio::test]
async fn fs_status_fails_when_root_disappears() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("store");
    let store = FsStore::open(&root).await.unwrap();
    std::fs::remove_dir_all(&root).unwrap();

    let err = store.status(&Context::background()).await.unwrap_err();
    assert!(matches!(err, KmsError::Unreachable(_)));
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Sample {
    label: String,
    count: u32,
}

#[tokio::test]
async fn typed_records_follow_the_contract() {
    let ctx = Context::background();
    let (_guard, raw) = redb_fixture().await;
    let records: Records<Sample> = Records::new(raw);
    let first = Sample {
        label: "first".into(),
        count: 1,
    };

    records.create(&ctx, key("s"), first.clone()).await.unwrap();
    let err = records
        .create(
            &ctx,
            key("s"),
            Sample {
                label: "second".into(),
                count: 2,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, KmsError::AlreadyExists(_)));
    assert_eq!(records.get(&ctx, &key("s")).await.unwrap(), first);

    records.delete(&ctx, &key("s")).await.unwrap();
    assert!(records.get(&ctx, &key("s")).await.unwrap_err().is_not_found());
    assert!(drain(records.list(&ctx, "*").await.unwrap(), &ctx)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_replace_leaves_one_complete_record() {
    let ctx = Context::background();
    let records: Arc<Records<Sample>> = Arc::new(Records::new(Arc::new(MemStore::new())));

    let mut tasks = Vec::new();
    for i in 0..4u32 {
        let records = Arc::clone(&records);
        let ctx = ctx.clone();
        tasks.push(tokio::spawn(async move {
            let sample = Sample {
                label: format!("writer-{i}"),
                count: i,
            };
            // A writer may exhaust its retries under contention
            let _ = records.replace(&ctx, key("shared"), &sample).await;
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let stored = records.get(&ctx, &key("shared")).await.unwrap();
    assert_eq!(stored.label, format!("writer-{}", stored.count));
}
