//! In-memory persist driver.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use async_trait::async_trait;
use bytes::Bytes;
use nectar_core::AnyResult;
use nectar_server::cancel::Waiter;
use tracing::debug;

use super::{PersistDriver, PersistError};
use crate::application::AppService;

struct Entry {
    value: Bytes,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Map-backed driver. Shared freely across workers; every operation
/// is a short critical section and nothing suspends while the lock is
/// held. Expired entries are dropped lazily on access; a
/// [`PersistSweeper`] service can reclaim cold ones in the background.
#[derive(Clone, Default)]
pub struct MemoryPersistDriver {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
}

impl MemoryPersistDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every expired entry now.
    pub fn sweep(&self) {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap();
        entries.retain(|_, entry| !entry.expired(now));
    }

    /// Background eviction service for this driver.
    pub fn sweeper(&self, interval: Duration) -> PersistSweeper {
        PersistSweeper {
            driver: self.clone(),
            interval,
        }
    }

    fn entry(value: Bytes, ttl: Option<Duration>) -> Entry {
        Entry {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }
}

#[async_trait(?Send)]
impl PersistDriver for MemoryPersistDriver {
    async fn set(
        &self,
        key: &str,
        value: Bytes,
        ttl: Option<Duration>,
    ) -> Result<(), PersistError> {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(key.to_string(), Self::entry(value, ttl));
        Ok(())
    }

    async fn create(
        &self,
        key: &str,
        value: Bytes,
        ttl: Option<Duration>,
    ) -> Result<(), PersistError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap();
        match entries.get(key) {
            Some(existing) if !existing.expired(now) => Err(PersistError::Duplicate),
            _ => {
                entries.insert(key.to_string(), Self::entry(value, ttl));
                Ok(())
            }
        }
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, PersistError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap();
        match entries.get(key) {
            Some(entry) if entry.expired(now) => {
                entries.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value.clone())),
            None => Ok(None),
        }
    }

    async fn remove(&self, key: &str) -> Result<(), PersistError> {
        let mut entries = self.entries.lock().unwrap();
        entries.remove(key);
        Ok(())
    }
}

/// Periodic sweep of expired entries, running until shutdown.
pub struct PersistSweeper {
    driver: MemoryPersistDriver,
    interval: Duration,
}

#[async_trait(?Send)]
impl AppService for PersistSweeper {
    async fn run(&self, mut shutdown: Waiter) -> AnyResult<()> {
        loop {
            monoio::select! {
                _ = &mut shutdown => {
                    debug!("persist sweeper stopping");
                    return Ok(());
                }
                _ = monoio::time::sleep(self.interval) => {
                    self.driver.sweep();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::PersistDriverExt;

    fn run<F: std::future::Future>(f: F) -> F::Output {
        monoio::RuntimeBuilder::<monoio::LegacyDriver>::new()
            .enable_timer()
            .build()
            .unwrap()
            .block_on(f)
    }

    #[test]
    fn create_is_exclusive_set_is_not() {
        run(async {
            let driver = MemoryPersistDriver::new();
            driver
                .create("session", Bytes::from_static(b"a"), None)
                .await
                .unwrap();
            let err = driver
                .create("session", Bytes::from_static(b"b"), None)
                .await
                .unwrap_err();
            assert!(matches!(err, PersistError::Duplicate));

            driver
                .set("session", Bytes::from_static(b"c"), None)
                .await
                .unwrap();
            assert_eq!(
                driver.get("session").await.unwrap().unwrap().as_ref(),
                b"c"
            );
        });
    }

    #[test]
    fn expired_entries_act_absent() {
        run(async {
            let driver = MemoryPersistDriver::new();
            driver
                .set("ephemeral", Bytes::from_static(b"x"), Some(Duration::ZERO))
                .await
                .unwrap();
            assert!(driver.get("ephemeral").await.unwrap().is_none());
            // An expired key may be created again.
            driver
                .set("gone", Bytes::from_static(b"x"), Some(Duration::ZERO))
                .await
                .unwrap();
            driver
                .create("gone", Bytes::from_static(b"y"), None)
                .await
                .unwrap();
        });
    }

    #[test]
    fn remove_is_idempotent() {
        run(async {
            let driver = MemoryPersistDriver::new();
            driver.set("k", Bytes::from_static(b"v"), None).await.unwrap();
            driver.remove("k").await.unwrap();
            driver.remove("k").await.unwrap();
            assert!(driver.get("k").await.unwrap().is_none());
        });
    }

    #[test]
    fn json_round_trip() {
        run(async {
            #[derive(serde::Serialize, serde::Deserialize, PartialEq, Debug)]
            struct Session {
                user: String,
            }
            let driver = MemoryPersistDriver::new();
            driver
                .set_json(
                    "session",
                    &Session {
                        user: "ada".into(),
                    },
                    None,
                )
                .await
                .unwrap();
            let loaded: Session = driver.get_json("session").await.unwrap().unwrap();
            assert_eq!(loaded.user, "ada");
        });
    }

    #[test]
    fn sweep_reclaims_expired() {
        run(async {
            let driver = MemoryPersistDriver::new();
            driver
                .set("dead", Bytes::from_static(b"x"), Some(Duration::ZERO))
                .await
                .unwrap();
            driver.set("live", Bytes::from_static(b"y"), None).await.unwrap();
            driver.sweep();
            assert_eq!(driver.entries.lock().unwrap().len(), 1);
        });
    }
}
