pub mod cancel;
pub mod http;
pub mod runtime;
pub mod serve;
#[cfg(feature = "tls")]
pub mod tls;
pub mod workers;

pub use cancel::{Canceller, Waiter};
pub use self::http::{HttpDriver, HttpServerTimeout};
pub use serve::{serve, ConnTracker};
