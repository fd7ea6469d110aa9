//! Core engine: reconciliation, connectivity gating, and capture wiring.

pub mod capture;
pub mod connectivity;
pub mod reconciler;

pub use capture::{CaptureConfig, CaptureSession};
pub use connectivity::ConnectivityGate;
pub use reconciler::{SyncService, SyncStatus};
