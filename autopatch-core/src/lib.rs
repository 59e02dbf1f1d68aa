//! Autoconnect reconciler.
//!
//! Keeps the live audio/MIDI connection graph in line with the routing
//! described by a [`RoutingStateProvider`]. [`Autoconnect`] is the entry
//! point: it runs passes on request or on a background tick, one at a time.

pub mod audio;
pub mod config;
pub mod error;
pub mod fingerprint;
mod handle;
pub mod midi;
pub mod provider;
pub mod recovery;
mod resolve;
pub mod scheduler;

pub use audio::AudioReconciler;
pub use config::{ClientNames, Config};
pub use error::{PassOutcome, PassReport, ReconcileError, SkipReason};
pub use fingerprint::{FingerprintGuard, HardwareFingerprint};
pub use handle::{Autoconnect, GraphLock};
pub use midi::MidiReconciler;
pub use provider::{RoutingStateProvider, SharedRoutingState};
pub use recovery::RecoveryPolicy;
pub use resolve::StereoFeed;
pub use scheduler::{Callback, PassStats};
