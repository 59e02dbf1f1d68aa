//! Graph access layer for the autoconnect reconciler.
//!
//! `GraphBackend` is the seam to the audio server. `PortDirectory` reads the
//! registered ports once per pass, `ConnectionLedger` stages edge and node
//! changes and commits them as one batch, and `GraphMonitor` carries server
//! figures to other threads.

pub mod backend;
pub mod directory;
pub mod ledger;
pub mod monitor;

pub use backend::{GraphBackend, GraphError, GraphOp, GraphResult, MemoryGraph, NullGraph};
pub use directory::{PortDirectory, PortFilter};
pub use ledger::ConnectionLedger;
pub use monitor::GraphMonitor;
