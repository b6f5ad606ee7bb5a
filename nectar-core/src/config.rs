//! Runtime and server configuration.
//!
//! Plain serde structures; how they are loaded (files, CLI) is up to
//! the embedding application.

use std::{net::SocketAddr, num::NonZeroUsize, time::Duration};

use serde::{Deserialize, Serialize};

// Default iouring/epoll entries: 32k
const DEFAULT_ENTRIES: u32 = 32768;

pub const FALLBACK_PARALLELISM: NonZeroUsize = NonZeroUsize::new(1).unwrap();

/// Configuration options for the worker runtime environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Number of worker threads, each with its own runtime and
    /// listener.
    #[serde(default = "default_workers")]
    pub worker_threads: usize,

    /// Number of I/O entries for event handling for io_uring.
    #[serde(default = "default_entries")]
    pub entries: u32,

    /// Idle timeout for squall polling (io_uring specific).
    pub sqpoll_idle: Option<u32>,

    /// The type of runtime to use.
    #[serde(default)]
    pub runtime_type: RuntimeType,

    /// Whether to enable CPU affinity for worker threads.
    #[serde(default = "default_cpu_affinity")]
    pub cpu_affinity: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            worker_threads: default_workers(),
            entries: default_entries(),
            sqpoll_idle: None,
            runtime_type: Default::default(),
            cpu_affinity: default_cpu_affinity(),
        }
    }
}

/// Enum representing different runtime implementation options.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeType {
    /// io_uring-based runtime (Linux only).
    #[cfg(target_os = "linux")]
    IoUring,

    /// Legacy runtime implementation.
    Legacy,
}

impl Default for RuntimeType {
    #[cfg(target_os = "linux")]
    fn default() -> Self {
        Self::IoUring
    }
    #[cfg(not(target_os = "linux"))]
    fn default() -> Self {
        Self::Legacy
    }
}

/// Server-level settings shared by every worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the listeners bind.
    #[serde(default = "default_address")]
    pub address: SocketAddr,

    /// Value for the `Server` response header; `None` omits it.
    #[serde(default = "default_server_name")]
    pub server_name: Option<String>,

    /// Idle timeout between keep-alive requests.
    #[serde(default = "default_keepalive", with = "secs_opt")]
    pub keepalive_timeout: Option<Duration>,

    /// Timeout for reading a full request header.
    #[serde(default, with = "secs_opt")]
    pub read_header_timeout: Option<Duration>,

    /// Timeout for receiving a full request body.
    #[serde(default, with = "secs_opt")]
    pub read_body_timeout: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            server_name: default_server_name(),
            keepalive_timeout: default_keepalive(),
            read_header_timeout: None,
            read_body_timeout: None,
        }
    }
}

macro_rules! define_const {
    ($name: ident, $val: expr, $type: ty) => {
        fn $name() -> $type {
            $val
        }
    };
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .unwrap_or(FALLBACK_PARALLELISM)
        .into()
}

fn default_address() -> SocketAddr {
    "127.0.0.1:8080".parse().unwrap()
}

define_const!(default_entries, DEFAULT_ENTRIES, u32);
define_const!(default_cpu_affinity, false, bool);
define_const!(
    default_server_name,
    Some("nectar".to_string()),
    Option<String>
);
define_const!(
    default_keepalive,
    Some(Duration::from_secs(75)),
    Option<Duration>
);

/// Durations serialized as whole seconds.
mod secs_opt {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&d.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = RuntimeConfig::default();
        assert!(config.worker_threads >= 1);
        assert_eq!(config.entries, 32768);

        let server = ServerConfig::default();
        assert_eq!(server.keepalive_timeout, Some(Duration::from_secs(75)));
        assert_eq!(server.server_name.as_deref(), Some("nectar"));
    }

    #[test]
    fn server_config_deserializes_partial() {
        let server: ServerConfig =
            serde_json::from_str(r#"{"address":"0.0.0.0:3000","keepalive_timeout":10}"#).unwrap();
        assert_eq!(server.address.port(), 3000);
        assert_eq!(server.keepalive_timeout, Some(Duration::from_secs(10)));
    }
}
