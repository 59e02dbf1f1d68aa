//! The pass lock, per-domain retry flags and the background worker.
//!
//! Every pass, whether from the worker or a synchronous call, runs under one
//! mutex, so MIDI and audio passes never overlap each other or themselves.
//! Callers on other threads only flip flags and send control messages; the
//! worker thread owns the callback queues.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;

use autopatch_graph::{GraphBackend, GraphMonitor};
use autopatch_types::Domain;

use crate::audio::AudioReconciler;
use crate::config::Config;
use crate::error::{PassOutcome, SkipReason};
use crate::midi::MidiReconciler;
use crate::provider::RoutingStateProvider;
use crate::recovery::{panic_message, RecoveryPolicy};

const TARGET: &str = "autoconnect::scheduler";

/// Deferred work run after the next successful pass of its domain.
pub type Callback = Box<dyn FnOnce() + Send + 'static>;

/// What started a pass. Ticks may skip an unforced audio pass; requests
/// and synchronous calls never do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Trigger {
    Tick,
    Request,
}

pub(crate) enum Control {
    Request { domain: Domain, force: bool },
    Callback { domain: Domain, callback: Callback },
    Stop,
}

/// Reconcilers guarded by the pass lock.
pub(crate) struct Passes {
    midi: MidiReconciler,
    audio: AudioReconciler,
}

/// Counters of pass outcomes since creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassStats {
    pub midi_completed: u64,
    pub audio_completed: u64,
    pub failed: u64,
    pub skipped: u64,
}

#[derive(Default)]
struct StatCounters {
    midi_completed: AtomicU64,
    audio_completed: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
}

/// State shared between the handle, its callers and the worker thread.
pub(crate) struct Reconciler {
    pub(crate) backend: Arc<dyn GraphBackend>,
    pub(crate) provider: Arc<dyn RoutingStateProvider>,
    pub(crate) config: Config,
    pub(crate) monitor: GraphMonitor,
    passes: Mutex<Passes>,
    /// Raised by callers; consumed when a pass of the domain starts.
    requested: [AtomicBool; 2],
    /// Raised by the outcome of the last pass of the domain.
    retry: [AtomicBool; 2],
    stats: StatCounters,
}

impl Reconciler {
    pub(crate) fn new(
        backend: Arc<dyn GraphBackend>,
        provider: Arc<dyn RoutingStateProvider>,
        config: Config,
    ) -> Self {
        Self {
            backend,
            provider,
            config,
            monitor: GraphMonitor::new(),
            passes: Mutex::new(Passes {
                midi: MidiReconciler::new(),
                audio: AudioReconciler::new(),
            }),
            requested: Default::default(),
            retry: Default::default(),
            stats: StatCounters::default(),
        }
    }

    /// Take the pass lock. A panic inside a pass is caught before the guard
    /// drops, so poisoning only follows a panic outside one and is ignored.
    pub(crate) fn lock(&self) -> MutexGuard<'_, Passes> {
        self.passes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether the next pass of `domain` is forced.
    pub(crate) fn forced_retry(&self, domain: Domain) -> bool {
        self.requested(domain) || self.retry[domain.index()].load(Ordering::SeqCst)
    }

    /// Whether a caller asked for a pass that has not started yet.
    pub(crate) fn requested(&self, domain: Domain) -> bool {
        self.requested[domain.index()].load(Ordering::SeqCst)
    }

    pub(crate) fn set_forced_retry(&self, domain: Domain) {
        self.requested[domain.index()].store(true, Ordering::SeqCst);
    }

    /// One pass of `domain` under the pass lock.
    pub(crate) fn run(&self, domain: Domain, force: bool, trigger: Trigger) -> PassOutcome {
        let mut passes = self.lock();
        self.run_locked(&mut passes, domain, force, trigger)
    }

    /// One pass of `domain` with the lock already held. A caller's flag is
    /// taken before the state snapshot, so a flag raised during the pass
    /// stays up for the next one.
    pub(crate) fn run_locked(
        &self,
        passes: &mut Passes,
        domain: Domain,
        force: bool,
        trigger: Trigger,
    ) -> PassOutcome {
        let force = self.requested[domain.index()].swap(false, Ordering::SeqCst) || force;
        let backend = self.backend.as_ref();
        let provider = self.provider.as_ref();
        let outcome = RecoveryPolicy::guard(domain, || match domain {
            Domain::Midi => passes.midi.reconcile(backend, provider, &self.config, force),
            Domain::Audio => {
                let force = force || trigger == Trigger::Request;
                passes.audio.reconcile(backend, provider, &self.config, force)
            }
        });
        self.record(domain, force, &outcome);
        outcome
    }

    fn record(&self, domain: Domain, force: bool, outcome: &PassOutcome) {
        match outcome {
            PassOutcome::Completed(_) | PassOutcome::Failed(_) => {
                self.retry[domain.index()].store(RecoveryPolicy::needs_retry(outcome), Ordering::SeqCst);
            }
            // A forced pass held back by boot or a song load must still run.
            PassOutcome::Skipped(SkipReason::BootIncomplete | SkipReason::LoadInProgress) if force => {
                self.set_forced_retry(domain);
            }
            PassOutcome::Skipped(_) => {}
        }

        let counter = match (outcome, domain) {
            (PassOutcome::Completed(_), Domain::Midi) => &self.stats.midi_completed,
            (PassOutcome::Completed(_), Domain::Audio) => &self.stats.audio_completed,
            (PassOutcome::Failed(_), _) => &self.stats.failed,
            (PassOutcome::Skipped(_), _) => &self.stats.skipped,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn stats(&self) -> PassStats {
        PassStats {
            midi_completed: self.stats.midi_completed.load(Ordering::Relaxed),
            audio_completed: self.stats.audio_completed.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
            skipped: self.stats.skipped.load(Ordering::Relaxed),
        }
    }
}

// ─── Worker ─────────────────────────────────────────────────────────

pub(crate) struct Worker {
    shared: Arc<Reconciler>,
    rx: Receiver<Control>,
    interval: Duration,
    queues: [VecDeque<Callback>; 2],
    /// Control messages taken off the channel while draining.
    backlog: VecDeque<Control>,
    last_tick: Instant,
    window_start: Instant,
}

impl Worker {
    pub(crate) fn new(shared: Arc<Reconciler>, rx: Receiver<Control>, interval: Duration) -> Self {
        let now = Instant::now();
        Self {
            shared,
            rx,
            interval,
            queues: Default::default(),
            backlog: VecDeque::new(),
            last_tick: now,
            window_start: now,
        }
    }

    pub(crate) fn run(mut self) {
        log::debug!(target: TARGET, "worker started, interval {:?}", self.interval);
        'outer: loop {
            while let Some(control) = self.backlog.pop_front() {
                if self.handle(control) {
                    break 'outer;
                }
            }

            let remaining = self.interval.saturating_sub(self.last_tick.elapsed());
            crossbeam_channel::select! {
                recv(self.rx) -> result => {
                    match result {
                        Ok(control) => {
                            if self.handle(control) {
                                break;
                            }
                        }
                        Err(_) => break,
                    }
                }
                default(remaining) => {}
            }

            if self.last_tick.elapsed() >= self.interval {
                self.last_tick = Instant::now();
                self.tick();
            }
        }
        log::debug!(target: TARGET, "worker stopped");
    }

    /// Returns true when the worker should stop.
    fn handle(&mut self, control: Control) -> bool {
        match control {
            Control::Request { domain, force } => {
                self.pass(domain, force, Trigger::Request);
                false
            }
            Control::Callback { domain, callback } => {
                self.queues[domain.index()].push_back(callback);
                false
            }
            Control::Stop => true,
        }
    }

    fn tick(&mut self) {
        self.pass(Domain::Midi, false, Trigger::Tick);
        if self.shared.forced_retry(Domain::Audio) {
            self.pass(Domain::Audio, true, Trigger::Tick);
        }
        self.refresh_monitor();
    }

    fn pass(&mut self, domain: Domain, force: bool, trigger: Trigger) {
        let force = force || self.shared.forced_retry(domain);
        if self.shared.run(domain, force, trigger).is_completed() {
            self.drain(domain);
        }
    }

    /// Take whatever arrived during a pass. Callbacks join their queues,
    /// everything else waits in the backlog.
    fn absorb(&mut self) {
        while let Ok(control) = self.rx.try_recv() {
            match control {
                Control::Callback { domain, callback } => {
                    self.queues[domain.index()].push_back(callback);
                }
                other => self.backlog.push_back(other),
            }
        }
    }

    /// Remove pending requests for `domain`. Returns whether there were any.
    fn take_requests(&mut self, domain: Domain) -> bool {
        let before = self.backlog.len();
        self.backlog
            .retain(|control| !matches!(control, Control::Request { domain: d, .. } if *d == domain));
        self.backlog.len() != before
    }

    /// Run the queued callbacks of `domain` after a successful pass. A request
    /// or callback that arrived during the pass is honoured first by passing
    /// again, at most `max_redo` times.
    fn drain(&mut self, domain: Domain) {
        let max_redo = self.shared.config.max_redo();
        let mut redo = 0;
        loop {
            self.absorb();
            if self.queues[domain.index()].is_empty() {
                break;
            }
            if !self.take_requests(domain) && !self.shared.requested(domain) {
                break;
            }
            if redo == max_redo {
                log::warn!(target: TARGET, "{} requests kept arriving, draining after {} redos", domain, redo);
                break;
            }
            redo += 1;
            if !self.shared.run(domain, true, Trigger::Request).is_completed() {
                return;
            }
        }

        while let Some(callback) = self.queues[domain.index()].pop_front() {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(callback)) {
                log::error!(
                    target: TARGET,
                    "{} callback panicked: {}",
                    domain,
                    panic_message(payload.as_ref())
                );
            }
        }
    }

    fn refresh_monitor(&mut self) {
        let monitor = &self.shared.monitor;
        monitor.refresh_from(self.shared.backend.as_ref());

        let window = self.shared.config.xrun_window();
        if self.window_start.elapsed() >= window {
            self.window_start = Instant::now();
            let xruns = monitor.take_xruns();
            if xruns > 0 {
                log::warn!(target: TARGET, "{} xruns in the last {:?}", xruns, window);
            }
        }
    }
}
