use autopatch_graph::GraphError;
use autopatch_types::Domain;
use thiserror::Error;

/// Everything that can go wrong in a pass.
///
/// `Transient` and `ConfigInconsistency` are diagnostics: the pass records
/// them and carries on. The rest abort the pass before anything is committed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReconcileError {
    #[error("{what} is not present yet")]
    Transient { what: String },
    #[error("{target}: source '{spec}' resolves to no port")]
    ConfigInconsistency { target: String, spec: String },
    #[error("commit failed: {0}")]
    Commit(#[source] GraphError),
    #[error("graph query failed: {0}")]
    Query(#[source] GraphError),
    #[error("unexpected failure: {0}")]
    Unexpected(String),
}

impl ReconcileError {
    /// Fatal errors abort the pass and discard its staged changes.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ReconcileError::Commit(_) | ReconcileError::Query(_) | ReconcileError::Unexpected(_)
        )
    }
}

impl From<GraphError> for ReconcileError {
    fn from(e: GraphError) -> Self {
        ReconcileError::Query(e)
    }
}

pub(crate) fn log_target(domain: Domain) -> &'static str {
    match domain {
        Domain::Midi => "autoconnect::midi",
        Domain::Audio => "autoconnect::audio",
    }
}

/// Why a pass did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Hardware and virtual endpoints are unchanged since the last full pass.
    FingerprintUnchanged,
    BootIncomplete,
    LoadInProgress,
    /// Audio passes only run when forced.
    NotForced,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            SkipReason::FingerprintUnchanged => "endpoints unchanged",
            SkipReason::BootIncomplete => "boot not complete",
            SkipReason::LoadInProgress => "song load in progress",
            SkipReason::NotForced => "not forced",
        };
        f.write_str(text)
    }
}

/// Diagnostics and effect of one completed pass.
#[derive(Debug, Clone, PartialEq)]
pub struct PassReport {
    pub domain: Domain,
    /// Operations committed to the graph.
    pub applied: usize,
    pub diagnostics: Vec<ReconcileError>,
}

impl PassReport {
    pub fn new(domain: Domain) -> Self {
        Self {
            domain,
            applied: 0,
            diagnostics: Vec::new(),
        }
    }

    /// Something the pass expected is missing, most likely still starting.
    pub fn transient(&mut self, what: impl Into<String>) {
        let what = what.into();
        log::debug!(target: log_target(self.domain), "{} is not present yet", what);
        self.diagnostics.push(ReconcileError::Transient { what });
    }

    /// An override names a source that resolves to nothing.
    pub fn inconsistent(&mut self, target: impl Into<String>, spec: impl Into<String>) {
        let error = ReconcileError::ConfigInconsistency {
            target: target.into(),
            spec: spec.into(),
        };
        log::info!(target: log_target(self.domain), "{}", error);
        self.diagnostics.push(error);
    }

    /// The pass needs another go once missing ports appear.
    pub fn has_transient(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| matches!(d, ReconcileError::Transient { .. }))
    }

    pub fn inconsistencies(&self) -> impl Iterator<Item = &ReconcileError> {
        self.diagnostics
            .iter()
            .filter(|d| matches!(d, ReconcileError::ConfigInconsistency { .. }))
    }
}

/// Result of one guarded pass.
#[derive(Debug, Clone, PartialEq)]
pub enum PassOutcome {
    Completed(PassReport),
    Skipped(SkipReason),
    Failed(ReconcileError),
}

impl PassOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, PassOutcome::Completed(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, PassOutcome::Failed(_))
    }

    pub fn report(&self) -> Option<&PassReport> {
        match self {
            PassOutcome::Completed(report) => Some(report),
            _ => None,
        }
    }
}
