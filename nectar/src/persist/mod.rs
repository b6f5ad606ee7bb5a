//! Key-value persistence.
//!
//! The driver contract higher-level features (sessions, rate
//! limiting) build on: raw bytes with optional TTL, create-vs-set
//! semantics, JSON helpers for typed values.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use nectar_core::AnyError;
use serde::{de::DeserializeOwned, Serialize};

mod memory;

pub use memory::{MemoryPersistDriver, PersistSweeper};

#[derive(thiserror::Error, Debug)]
pub enum PersistError {
    /// `create` on a key that is present and not yet expired.
    #[error("key already exists")]
    Duplicate,
    #[error("stored value does not decode: {0}")]
    InvalidValue(#[from] serde_json::Error),
    #[error("persist driver failure: {0}")]
    Driver(AnyError),
}

impl From<AnyError> for PersistError {
    fn from(err: AnyError) -> Self {
        Self::Driver(err)
    }
}

/// Contract over a key-value store with TTL and create-vs-set
/// semantics. Expired entries behave as absent everywhere.
#[async_trait(?Send)]
pub trait PersistDriver: 'static {
    /// Overwrite or insert.
    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>)
        -> Result<(), PersistError>;

    /// Insert only; fails with [`PersistError::Duplicate`] if the key
    /// is present and not yet expired.
    async fn create(
        &self,
        key: &str,
        value: Bytes,
        ttl: Option<Duration>,
    ) -> Result<(), PersistError>;

    /// `None` for missing or expired keys.
    async fn get(&self, key: &str) -> Result<Option<Bytes>, PersistError>;

    /// Idempotent.
    async fn remove(&self, key: &str) -> Result<(), PersistError>;
}

/// JSON codecs over any driver.
#[async_trait(?Send)]
pub trait PersistDriverExt: PersistDriver {
    async fn set_json<T: Serialize + 'static>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<(), PersistError> {
        let encoded = serde_json::to_vec(value)?;
        self.set(key, encoded.into(), ttl).await
    }

    async fn create_json<T: Serialize + 'static>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<(), PersistError> {
        let encoded = serde_json::to_vec(value)?;
        self.create(key, encoded.into(), ttl).await
    }

    async fn get_json<T: DeserializeOwned + 'static>(
        &self,
        key: &str,
    ) -> Result<Option<T>, PersistError> {
        match self.get(key).await? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }
}

#[async_trait(?Send)]
impl<P: PersistDriver> PersistDriverExt for P {}
