//! Command learning reconciler.
//!
//! Learning an IR/RF code is fire-and-forget: the controller is put in learn
//! mode and, somewhere between a few seconds and a minute later, the captured
//! code appears in the controller's storage file. Nothing reports success or
//! failure, and the code may be filed under a device name other than the one
//! the caller asked for.
//!
//! This crate tracks each learn as a pending operation, polls the controller
//! storage, and copies the code into the device or profile record that asked
//! for it.
//!
//! # Architecture
//!
//! - [`PendingRegistry`] holds at most one operation per origin key
//! - [`OriginReader`] snapshots every controller shard through an [`OriginStore`]
//! - [`DestinationResolver`] maps a caller hint to a device or profile record
//! - [`Reconciler`] runs the poll loop and the per-operation state machine
//! - [`ResultSink`] writes codes and sentinels and cleans up origin copies
//! - [`LearnService`] is the submission entry point
//!
//! Callers observe progress by reading the destination command: `"pending"`
//! while learning, the code once stored, `"error"` once learning failed.

pub mod config;
pub mod destination;
pub mod document;
pub mod error;
pub mod origin;
pub mod reconcile;
pub mod registry;
pub mod resolver;
pub mod server;
pub mod service;
pub mod sink;
pub mod types;

pub use config::{LearnerConfig, Timing};
pub use destination::{DeviceDocument, ProfileLibrary, WriteOutcome};
pub use error::{ConfigError, StoreError, SubmitError};
pub use origin::{JsonOriginStore, OriginReader, OriginSnapshot, OriginStore};
pub use reconcile::{Reconciler, TickReport};
pub use registry::PendingRegistry;
pub use resolver::{DestinationHint, DestinationResolver, Resolution};
pub use service::{Accepted, LearnRequest, LearnService};
pub use sink::{JsonResultSink, ResultSink};
pub use types::{
    CleanupTarget, CommandKind, Destination, FailureReason, OperationState, OriginKey,
    PendingOperation, ERROR_SENTINEL, PENDING_SENTINEL,
};

use document::DocumentLocks;
use std::sync::Arc;

/// Service and reconciler wired over the JSON stores, sharing one registry.
pub struct Learner {
    pub service: LearnService,
    pub reconciler: Reconciler,
}

impl Learner {
    /// Wire the learner over the stores named in `config`.
    #[must_use]
    pub fn from_config(config: &LearnerConfig) -> Self {
        let locks = DocumentLocks::new();
        let devices = DeviceDocument::new(&config.devices_file, locks.clone());
        let profiles = ProfileLibrary::new(&config.profiles_dir, locks);
        let origin: Arc<dyn OriginStore> = Arc::new(JsonOriginStore::new(&config.origin_dir));

        let sink: Arc<dyn ResultSink> = Arc::new(JsonResultSink::new(
            devices.clone(),
            profiles.clone(),
            Arc::clone(&origin),
        ));
        let registry = PendingRegistry::new();

        let service = LearnService::new(
            registry.clone(),
            DestinationResolver::new(devices, profiles),
            Arc::clone(&sink),
        );
        let reconciler = Reconciler::new(registry, OriginReader::new(origin), sink, config.timing);

        Self {
            service,
            reconciler,
        }
    }
}
