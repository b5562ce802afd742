//! Reconnection sync and offline mode for tradelink.
//!
//! `SyncCoordinator` watches the persistent channel's status and the
//! platform network signal. It derives the offline mode, routes writes
//! (send now or queue for later), serves reads with cache fallback and
//! replays the offline queue in FIFO order once connectivity returns.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod mode;

pub use config::SyncConfig;
pub use coordinator::{SyncCoordinator, SyncReport, SyncStats, WriteOutcome};
pub use error::{SyncError, SyncResult};
pub use mode::{OfflineCapabilities, OfflineMode};
