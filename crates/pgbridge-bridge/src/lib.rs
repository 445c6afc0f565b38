pub mod bridge;
pub mod connector;
pub mod metadata;
pub mod outcome;
pub mod pool;
pub mod retry;

pub use bridge::{Bridge, BridgeConfig};
pub use connector::{BackendConnection, BackendFailure, Connector, Interrupt, RawOutcome};
pub use metadata::load_snapshot;
pub use outcome::{BridgeError, Outcome};
pub use pool::{PoolConfig, PoolStatus, PooledConnection};
pub use retry::RetryPolicy;
pub use tokio_util::sync::CancellationToken;
