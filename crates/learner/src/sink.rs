//! Result sink: writes learned codes into destinations and cleans up origins.

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

use crate::destination::{DeviceDocument, ProfileLibrary, WriteOutcome};
use crate::error::StoreError;
use crate::origin::OriginStore;
use crate::types::{CommandKind, Destination};

/// Trait for the stores the reconciler writes to.
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Set a command on a device record.
    async fn write_device(
        &self,
        device_id: &str,
        command_name: &str,
        value: &str,
        kind: CommandKind,
    ) -> Result<WriteOutcome, StoreError>;

    /// Set a command inside a profile file.
    async fn write_profile(
        &self,
        profile_path: &Path,
        command_name: &str,
        value: &str,
    ) -> Result<WriteOutcome, StoreError>;

    /// Delete the origin copy of a resolved code.
    async fn delete_origin(
        &self,
        shard: &str,
        device_name: &str,
        command_name: &str,
    ) -> Result<bool, StoreError>;

    /// Route a write to whichever store `destination` lives in.
    async fn write(
        &self,
        destination: &Destination,
        command_name: &str,
        value: &str,
        kind: CommandKind,
    ) -> Result<WriteOutcome, StoreError> {
        match destination {
            Destination::DeviceRecord { device_id } => {
                self.write_device(device_id, command_name, value, kind)
                    .await
            }
            Destination::ProfileRecord { profile_path, .. } => {
                self.write_profile(profile_path, command_name, value).await
            }
        }
    }
}

/// Sink over the JSON device document, profile library and origin store.
#[derive(Clone)]
pub struct JsonResultSink {
    devices: DeviceDocument,
    profiles: ProfileLibrary,
    origin: Arc<dyn OriginStore>,
}

impl JsonResultSink {
    pub fn new(devices: DeviceDocument, profiles: ProfileLibrary, origin: Arc<dyn OriginStore>) -> Self {
        Self {
            devices,
            profiles,
            origin,
        }
    }
}

#[async_trait]
impl ResultSink for JsonResultSink {
    async fn write_device(
        &self,
        device_id: &str,
        command_name: &str,
        value: &str,
        kind: CommandKind,
    ) -> Result<WriteOutcome, StoreError> {
        self.devices
            .set_command(device_id, command_name, value, kind)
            .await
    }

    async fn write_profile(
        &self,
        profile_path: &Path,
        command_name: &str,
        value: &str,
    ) -> Result<WriteOutcome, StoreError> {
        self.profiles
            .set_command(profile_path, command_name, value)
            .await
    }

    async fn delete_origin(
        &self,
        shard: &str,
        device_name: &str,
        command_name: &str,
    ) -> Result<bool, StoreError> {
        self.origin
            .delete_command(shard, device_name, command_name)
            .await
    }
}
