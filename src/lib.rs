pub mod canvas;
pub mod cloner;
pub mod db;
pub mod error;
pub mod mutation;
pub mod realtime;
pub mod reconcile;
pub mod remote_client;
pub mod settings;
pub mod snapshot;
pub mod status;
pub mod store;

pub use canvas::Canvas;
pub use error::{CloneError, ServiceError};
pub use reconcile::{ReconcileOptions, Reconciler, StaleNodePolicy};
pub use remote_client::RemoteClient;
pub use settings::Settings;

use tracing_subscriber::EnvFilter;

/// Install the fmt subscriber shared by both binaries. `RUST_LOG` overrides `default_level`.
pub fn init_logging(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    // A second call (tests, embedding) keeps the first subscriber
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
