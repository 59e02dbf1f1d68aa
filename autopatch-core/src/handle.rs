use std::sync::{Arc, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};

use autopatch_graph::{GraphBackend, GraphMonitor};
use autopatch_types::Domain;

use crate::config::Config;
use crate::error::PassOutcome;
use crate::provider::RoutingStateProvider;
use crate::scheduler::{Control, PassStats, Passes, Reconciler, Trigger, Worker};

/// Holds the pass lock; no pass runs until it is dropped.
pub struct GraphLock<'a> {
    _guard: MutexGuard<'a, Passes>,
}

/// Main-thread handle to the autoconnect reconciler.
///
/// Synchronous calls run a pass on the caller's thread. Requests and
/// callbacks go to the background worker started by `start`; sent before
/// `start`, they wait for it.
pub struct Autoconnect {
    shared: Arc<Reconciler>,
    control_tx: Sender<Control>,
    control_rx: Receiver<Control>,
    join_handle: Option<JoinHandle<()>>,
}

impl Autoconnect {
    pub fn new(
        backend: Arc<dyn GraphBackend>,
        provider: Arc<dyn RoutingStateProvider>,
        config: Config,
    ) -> Self {
        let (control_tx, control_rx) = crossbeam_channel::unbounded();
        Self {
            shared: Arc::new(Reconciler::new(backend, provider, config)),
            control_tx,
            control_rx,
            join_handle: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// One MIDI pass, then one audio pass, without releasing the lock in
    /// between.
    pub fn autoconnect(&self, force: bool) -> (PassOutcome, PassOutcome) {
        let mut passes = self.shared.lock();
        let midi = self
            .shared
            .run_locked(&mut passes, Domain::Midi, force, Trigger::Request);
        let audio = self
            .shared
            .run_locked(&mut passes, Domain::Audio, force, Trigger::Request);
        (midi, audio)
    }

    pub fn reconcile_midi(&self, force: bool) -> PassOutcome {
        self.shared.run(Domain::Midi, force, Trigger::Request)
    }

    pub fn reconcile_audio(&self, force: bool) -> PassOutcome {
        self.shared.run(Domain::Audio, force, Trigger::Request)
    }

    /// Ask the worker for a pass. Never touches the graph on this thread.
    pub fn request_reconcile(&self, domain: Domain, force: bool) {
        if force {
            self.shared.set_forced_retry(domain);
        }
        if self.control_tx.send(Control::Request { domain, force }).is_err() {
            log::warn!(target: "autoconnect::scheduler", "worker gone, dropping {} request", domain);
        }
    }

    /// Run `callback` on the worker after the next successful pass of
    /// `domain`. That pass is forced.
    pub fn schedule_callback<F>(&self, domain: Domain, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.set_forced_retry(domain);
        let control = Control::Callback {
            domain,
            callback: Box::new(callback),
        };
        if self.control_tx.send(control).is_err() {
            log::warn!(target: "autoconnect::scheduler", "worker gone, dropping {} callback", domain);
        }
    }

    /// Start the background worker. Does nothing if it is already running.
    pub fn start(&mut self, interval: Duration) {
        if self.is_running() {
            return;
        }
        let interval = interval.max(Duration::from_millis(10));
        let worker = Worker::new(Arc::clone(&self.shared), self.control_rx.clone(), interval);
        self.join_handle = Some(thread::spawn(move || worker.run()));
    }

    /// Stop the worker and wait for it. A pass in progress finishes first.
    pub fn stop(&mut self) {
        if let Some(handle) = self.join_handle.take() {
            let _ = self.control_tx.send(Control::Stop);
            let _ = handle.join();
        }
    }

    pub fn is_running(&self) -> bool {
        self.join_handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Block passes while the host changes the graph itself.
    pub fn lock(&self) -> GraphLock<'_> {
        GraphLock {
            _guard: self.shared.lock(),
        }
    }

    pub fn monitor(&self) -> &GraphMonitor {
        &self.shared.monitor
    }

    pub fn stats(&self) -> PassStats {
        self.shared.stats()
    }

    pub fn forced_retry(&self, domain: Domain) -> bool {
        self.shared.forced_retry(domain)
    }
}

impl Drop for Autoconnect {
    fn drop(&mut self) {
        self.stop();
    }
}
