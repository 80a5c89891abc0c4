//! Pipeline Lifecycle
//!
//! `Created → Running → Stopping → Stopped`. A stopped pipeline is never
//! restarted; a new instance is required. A pipeline that was never
//! started may be stopped directly.

/// Lifecycle state of the ingestion pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PipelineState {
    /// Constructed, worker not yet spawned.
    #[default]
    Created,
    /// Worker running, accepting events.
    Running,
    /// Shutdown requested, worker draining.
    Stopping,
    /// Worker has exited.
    Stopped,
}

impl PipelineState {
    /// Whether `next` is a legal successor of `self`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Created, Self::Running | Self::Stopped)
                | (Self::Running, Self::Stopping)
                | (Self::Stopping, Self::Stopped)
        )
    }

    /// Whether new events are accepted.
    #[must_use]
    pub const fn accepts_events(self) -> bool {
        matches!(self, Self::Running)
    }

    /// State name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
