// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Repository layer providing typed access to the byte-level store.
//!
//! [`Records`] turns any [`Store`] of bytes into a store of JSON records.
//! Each repository builds on it for one entity type.

pub mod identities;
pub mod keys;
pub mod policies;

use std::marker::PhantomData;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

use crate::cancel::Context;
use crate::error::{KmsError, KmsResult};
use crate::store::{KeyIter, SharedStore, Store, StoreState};

pub use identities::{IdentityInfo, IdentityRecord, IdentityRepository};
pub use keys::{KeyInfo, KeyRecord, KeyRepository};
pub use policies::PolicyRepository;

/// Attempts made by [`Records::replace`] before giving up on a name that
/// concurrent writers keep recreating.
const REPLACE_ATTEMPTS: usize = 3;

/// Typed view of a byte store; records are encoded as JSON.
pub struct Records<T> {
    store: SharedStore,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Records<T> {
    fn clone(&self) -> Self {
        Self {
            store: SharedStore::clone(&self.store),
            _marker: PhantomData,
        }
    }
}

impl<T> Records<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(store: SharedStore) -> Self {
        Self {
            store,
            _marker: PhantomData,
        }
    }

    /// Store `record` under `key`, replacing any existing record.
    ///
    /// Implemented as delete followed by create. A concurrent reader may see
    /// `NotFound` in between. If another writer recreates the name between
    /// the two steps, the whole sequence is retried.
    pub async fn replace(&self, ctx: &Context, key: String, record: &T) -> KmsResult<()> {
        let bytes = serde_json::to_vec(record)?;
        for attempt in 1..=REPLACE_ATTEMPTS {
            self.store.delete(ctx, &key).await?;
            match self.store.create(ctx, key.clone(), bytes.clone()).await {
                Err(KmsError::AlreadyExists(_)) => {
                    tracing::debug!(key = %key, attempt, "Concurrent write during replace, retrying");
                }
                other => return other,
            }
        }
        Err(KmsError::AlreadyExists(key))
    }

    /// Like [`Store::get`], but `None` for an absent record.
    pub async fn find(&self, ctx: &Context, key: &String) -> KmsResult<Option<T>> {
        match self.get(ctx, key).await {
            Ok(record) => Ok(Some(record)),
            Err(KmsError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl<T> Store<String, T> for Records<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn status(&self, ctx: &Context) -> KmsResult<StoreState> {
        self.store.status(ctx).await
    }

    async fn create(&self, ctx: &Context, key: String, value: T) -> KmsResult<()> {
        let bytes = serde_json::to_vec(&value)?;
        self.store.create(ctx, key, bytes).await
    }

    async fn get(&self, ctx: &Context, key: &String) -> KmsResult<T> {
        let bytes = self.store.get(ctx, key).await?;
        serde_json::from_slice(&bytes)
            .map_err(|e| KmsError::Serialization(format!("record {key:?} is corrupt: {e}")))
    }

    async fn delete(&self, ctx: &Context, key: &String) -> KmsResult<()> {
        self.store.delete(ctx, key).await
    }

    async fn list(&self, ctx: &Context, pattern: &str) -> KmsResult<KeyIter<String>> {
        self.store.list(ctx, pattern).await
    }
}

/// Serde adapter storing opaque bytes as standard base64.
pub(crate) mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde::Deserialize;

    use super::*;
    use crate::store::MemStore;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        text: String,
    }

    fn note(text: &str) -> Note {
        Note {
            text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn records_round_trip_as_json() {
        let ctx = Context::background();
        let raw: SharedStore = Arc::new(MemStore::new());
        let notes: Records<Note> = Records::new(Arc::clone(&raw));

        notes.create(&ctx, "n".to_string(), note("hi")).await.unwrap();
        assert_eq!(notes.get(&ctx, &"n".to_string()).await.unwrap(), note("hi"));
        assert_eq!(
            raw.get(&ctx, &"n".to_string()).await.unwrap(),
            br#"{"text":"hi"}"#
        );
    }

    #[tokio::test]
    async fn replace_overwrites_existing_record() {
        let ctx = Context::background();
        let notes: Records<Note> = Records::new(Arc::new(MemStore::new()));

        notes.replace(&ctx, "n".to_string(), &note("one")).await.unwrap();
        notes.replace(&ctx, "n".to_string(), &note("two")).await.unwrap();
        assert_eq!(notes.get(&ctx, &"n".to_string()).await.unwrap(), note("two"));
    }

    #[tokio::test]
    async fn corrupt_record_is_a_serialization_error() {
        let ctx = Context::background();
        let raw: SharedStore = Arc::new(MemStore::new());
        raw.create(&ctx, "n".to_string(), b"not json".to_vec())
            .await
            .unwrap();
        let notes: Records<Note> = Records::new(raw);
        let err = notes.get(&ctx, &"n".to_string()).await.unwrap_err();
        assert!(matches!(err, KmsError::Serialization(_)));
    }

    #[tokio::test]
    async fn find_maps_absence_to_none() {
        let ctx = Context::background();
        let notes: Records<Note> = Records::new(Arc::new(MemStore::new()));
        assert_eq!(notes.find(&ctx, &"missing".to_string()).await.unwrap(), None);
    }

    #[test]
    fn base64_adapter_round_trips() {
        #[derive(Serialize, Deserialize)]
        struct Sealed {
            #[serde(with = "base64_bytes")]
            value: Vec<u8>,
        }
        let json = serde_json::to_string(&Sealed {
            value: vec![0, 1, 2, 255],
        })
        .unwrap();
        assert_eq!(json, r#"{"value":"AAEC/w=="}"#);
        let back: Sealed = serde_json::from_str(&json).unwrap();
        assert_eq!(back.value, vec![0, 1, 2, 255]);
    }
}
