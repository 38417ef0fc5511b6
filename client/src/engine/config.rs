use thiserror::Error;
use uuid::Uuid;

/// Construction-time errors. Per the failure-handling contract these are
/// the only errors the engine ever propagates to a caller; everything
/// after a successful construction is handled internally.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("workspace id must not be empty")]
    EmptyWorkspaceId,

    #[error("peer id `{id}` is not a valid UUID")]
    InvalidPeerId { id: String },

    #[error("stability window must be non-zero")]
    ZeroStabilityWindow,

    #[error("max queue size must be non-zero")]
    ZeroQueueSize,
}

/// Engine knobs. Everything except the workspace id has a default; the
/// token/api-key fields are carried for the transport collaborator and
/// never read by the core.
#[derive(Clone)]
pub struct EngineConfig {
    /// Partitions persisted state and identifies the replicated map.
    pub workspace_id: String,
    /// Stable identity used in ordering tie-breaks; generated if absent.
    /// Must parse as a UUID because it travels in the 16-byte actor field.
    pub peer_id: Option<String>,
    /// Handed to the transport collaborator verbatim.
    pub token: Option<String>,
    /// Handed to the transport collaborator verbatim.
    pub api_key: Option<String>,
    /// Raises per-op trace logging.
    pub debug: bool,
    /// Upper bound on locally queued unacknowledged ops; the oldest op is
    /// dropped on overflow.
    pub max_queue_size: usize,
    /// Tombstones older than this are eligible for compaction.
    pub stability_window_ms: u64,
    /// Upper bound on remote ops parked for missing dependencies.
    pub max_buffered_ops: usize,
    /// Enables end-to-end payload encryption when set.
    pub encryption_key: Option<[u8; 32]>,
}

impl EngineConfig {
    pub fn new(workspace_id: &str) -> Self {
        Self {
            workspace_id: workspace_id.to_string(),
            peer_id: None,
            token: None,
            api_key: None,
            debug: false,
            max_queue_size: 1024,
            stability_window_ms: 5000,
            max_buffered_ops: 512,
            encryption_key: None,
        }
    }

    pub fn with_peer_id(mut self, peer_id: &str) -> Self {
        self.peer_id = Some(peer_id.to_string());
        self
    }

    pub fn with_encryption_key(mut self, key: [u8; 32]) -> Self {
        self.encryption_key = Some(key);
        self
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.workspace_id.is_empty() {
            return Err(ConfigError::EmptyWorkspaceId);
        }
        if let Some(peer_id) = &self.peer_id {
            if Uuid::parse_str(peer_id).is_err() {
                return Err(ConfigError::InvalidPeerId {
                    id: peer_id.clone(),
                });
            }
        }
        if self.stability_window_ms == 0 {
            return Err(ConfigError::ZeroStabilityWindow);
        }
        if self.max_queue_size == 0 {
            return Err(ConfigError::ZeroQueueSize);
        }
        Ok(())
    }
}
