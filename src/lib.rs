pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod http;
pub mod intercept;
pub mod logger;
pub mod messenger;
pub mod migration;
pub mod network;
pub mod proxy;
pub mod scheduler;
pub mod store;
pub mod utils;
pub mod worker;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use error::WorkerError;

pub type Result<T> = std::result::Result<T, WorkerError>;

pub mod prelude {
    pub use crate::cache::{CacheManager, CacheNames, CachePolicy};
    pub use crate::clock::{Clock, SystemClock};
    pub use crate::config::Config;
    pub use crate::http::{Destination, Request, RequestMode, Response};
    pub use crate::messenger::{MessengerHandle, WorkerMessage};
    pub use crate::network::{Fetcher, HyperFetcher};
    pub use crate::proxy::ProxyServer;
    pub use crate::scheduler::{
        Capability, Notifier, PeriodicSync, TickOutcome, TracingNotifier, UnsupportedPeriodicSync, WindowClients,
    };
    pub use crate::worker::{ServiceWorker, WorkerEvent, WorkerHost, WorkerState};
}
