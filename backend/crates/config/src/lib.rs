pub mod env;
pub mod service;
pub mod sync;
pub mod tracing_init;

pub use env::AppConfig;
pub use service::{RunMode, ServiceConfig};
pub use sync::{FetchFailurePolicy, SyncConfig};
pub use tracing_init::init_tracing;
