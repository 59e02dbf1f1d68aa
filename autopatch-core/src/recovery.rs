//! Containment of pass failures.
//!
//! Nothing a pass does may escape to the scheduler thread. Errors are
//! classified and logged here; panics from a provider or backend are caught
//! and treated as unexpected failures. Staged changes live in the pass's
//! ledger and are dropped with it, so a contained failure never commits.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use autopatch_types::Domain;

use crate::error::{log_target, PassOutcome, ReconcileError};

pub struct RecoveryPolicy;

impl RecoveryPolicy {
    /// Run one pass and fold every way it can end into a `PassOutcome`.
    pub fn guard<F>(domain: Domain, pass: F) -> PassOutcome
    where
        F: FnOnce() -> Result<PassOutcome, ReconcileError>,
    {
        let target = log_target(domain);
        let outcome = match panic::catch_unwind(AssertUnwindSafe(pass)) {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(error)) => PassOutcome::Failed(error),
            Err(payload) => PassOutcome::Failed(ReconcileError::Unexpected(panic_message(payload.as_ref()))),
        };

        match &outcome {
            PassOutcome::Failed(error) if error.is_fatal() => {
                log::error!(target: target, "{} pass failed: {}", domain, error);
            }
            PassOutcome::Failed(error) => {
                log::debug!(target: target, "{} pass gave up: {}", domain, error);
            }
            PassOutcome::Skipped(reason) => {
                log::trace!(target: target, "{} pass skipped: {}", domain, reason);
            }
            PassOutcome::Completed(_) => {}
        }
        outcome
    }

    /// Whether the domain must run a full pass at the next opportunity.
    pub fn needs_retry(outcome: &PassOutcome) -> bool {
        match outcome {
            PassOutcome::Completed(report) => report.has_transient(),
            PassOutcome::Failed(_) => true,
            PassOutcome::Skipped(_) => false,
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "panic".to_string()
    }
}
