//! Queue consumption: the dispatcher, worker threads and the per-job executor.

pub mod executor;
pub mod lease;
pub mod outcome;
pub mod pool;
pub mod reconciler;

pub use executor::{lease_duration, JobWorker};
pub use lease::{Lease, LeaseTable};
pub use outcome::JobOutcome;
pub use pool::{PoolSettings, WorkerPool};
pub use reconciler::{Reconciler, SweepReport, LEASE_EXPIRED_DETAIL};
