//! Learn submission.
//!
//! Called after the learn action has been triggered on a controller. Picks
//! the destination, marks it pending, and hands the operation to the
//! registry. Returns immediately; the outcome shows up in the destination.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::destination::WriteOutcome;
use crate::error::SubmitError;
use crate::registry::PendingRegistry;
use crate::resolver::{DestinationHint, DestinationResolver, Resolution};
use crate::sink::ResultSink;
use crate::types::{
    CleanupTarget, CommandKind, Destination, OriginKey, PendingOperation, PENDING_SENTINEL,
};

/// A request to track one learned code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LearnRequest {
    pub origin_key: OriginKey,
    pub hint: DestinationHint,
    #[serde(default)]
    pub cleanup: Option<CleanupTarget>,
    #[serde(default)]
    pub shard: Option<String>,
    #[serde(default)]
    pub kind: CommandKind,
}

impl LearnRequest {
    pub fn new(origin_key: OriginKey, hint: DestinationHint) -> Self {
        Self {
            origin_key,
            hint,
            cleanup: None,
            shard: None,
            kind: CommandKind::default(),
        }
    }

    #[must_use]
    pub fn with_cleanup(mut self, target: CleanupTarget) -> Self {
        self.cleanup = Some(target);
        self
    }

    #[must_use]
    pub fn with_shard(mut self, shard: impl Into<String>) -> Self {
        self.shard = Some(shard.into());
        self
    }

    #[must_use]
    pub fn with_kind(mut self, kind: CommandKind) -> Self {
        self.kind = kind;
        self
    }
}

/// A queued submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Accepted {
    pub id: Uuid,
    pub destination: Destination,
    /// An earlier operation for the same key was dropped.
    pub replaced: bool,
}

/// Entry point for learn submissions.
#[derive(Clone)]
pub struct LearnService {
    registry: PendingRegistry,
    resolver: DestinationResolver,
    sink: Arc<dyn ResultSink>,
}

impl LearnService {
    pub fn new(
        registry: PendingRegistry,
        resolver: DestinationResolver,
        sink: Arc<dyn ResultSink>,
    ) -> Self {
        Self {
            registry,
            resolver,
            sink,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &PendingRegistry {
        &self.registry
    }

    #[must_use]
    pub fn resolver(&self) -> &DestinationResolver {
        &self.resolver
    }

    /// Resolve the destination, write the pending placeholder and queue the operation.
    pub async fn submit(&self, request: LearnRequest) -> Result<Accepted, SubmitError> {
        let destination = match self.resolver.resolve(&request.hint).await? {
            Resolution::Found { destination } => destination,
            Resolution::Ambiguous { candidates } => {
                return Err(SubmitError::AmbiguousDestination {
                    hint: request.hint.device_name,
                    candidates,
                })
            }
        };

        let outcome = self
            .sink
            .write(
                &destination,
                &request.origin_key.command_name,
                PENDING_SENTINEL,
                request.kind,
            )
            .await?;
        if outcome == WriteOutcome::DestinationGone {
            return Err(SubmitError::DestinationGone(destination.to_string()));
        }

        let mut op = PendingOperation::new(request.origin_key, destination.clone())
            .with_kind(request.kind);
        if let Some(target) = request.cleanup {
            op = op.with_cleanup(target);
        }
        if let Some(shard) = request.shard {
            op = op.with_shard(shard);
        }

        let id = op.id;
        let key = op.origin_key.clone();
        let replaced = self.registry.submit(op).is_some();

        info!(key = %key, destination = %destination, replaced, "Learn operation queued");

        Ok(Accepted {
            id,
            destination,
            replaced,
        })
    }
}
