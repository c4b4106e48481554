pub mod discover;
pub mod seed;
pub mod serve;
pub mod work;

// Re-export command functions for convenience
pub use discover::{discover, DiscoverParams};
pub use seed::seed;
pub use serve::{coordinator_server, CoordinatorParams};
pub use work::{worker, WorkerParams};
