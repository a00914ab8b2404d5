//! Device control for barcode verification nodes.
//!
//! [`DeviceController`] tracks one node's operating state from its event
//! stream and exposes composite operations (inspect, detect sectors, mode
//! switches, read). [`RepeatCorrelator`] matches repeat numbers reported by
//! the node to the print that caused them, and [`RunOrchestrator`] drives
//! print → correlate → read cycles over an image roll.

pub mod config;
pub mod controller;
pub mod correlator;
pub mod error;
pub mod run;
pub mod sectors;
pub mod state;
pub mod store;

pub use config::{DEFAULT_SYSTEM_PORT, DiscoveryProvider, NodeConfig, Timeouts};
pub use controller::{DeviceController, EventObserver, Notice, ReadResult, RepeatReport};
pub use correlator::{Correlation, FaultReason, RepeatCorrelator, Ticket};
pub use error::CoreError;
pub use run::{
    ImageOutcome, ImageRoll, ImageStatus, Printer, RunOrchestrator, RunPlan, RunSummary,
    SourceImage,
};
pub use sectors::{GradingStandard, VerifySector, create_sectors};
pub use state::{DeviceState, NodeStatus};
pub use store::{MemoryStore, ResultKey, ResultStore, StoredResult};

// Re-export the wire layer so consumers need only one dependency.
pub use labelval_api as api;
