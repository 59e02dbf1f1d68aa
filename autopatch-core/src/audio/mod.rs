//! Audio pass: passthrough nodes, per-track FX chains, meters, global
//! playback and monitor mirrors.
//!
//! Every passthrough edge is cleared and restated each pass. The ledger only
//! submits the difference, so a pass over an unchanged state submits
//! nothing.

mod chain;

use std::collections::BTreeSet;

pub use chain::{build_chains, Chain};

use autopatch_graph::{ConnectionLedger, GraphBackend, PortDirectory, PortFilter};
use autopatch_types::{
    Channel, Domain, LaneState, PassthroughNode, PassthroughPort, PortDirection, PortId, PortKind,
    RoutingState, SlotIndex, SourceSpec, TrackIndex, TrackState, GLOBAL_FX_COUNT,
};

use crate::config::Config;
use crate::error::{PassOutcome, PassReport, ReconcileError, SkipReason};
use crate::provider::RoutingStateProvider;
use crate::resolve::{meter_port, stereo_pair, Resolver, StereoFeed};

const TARGET: &str = "autoconnect::audio";

/// Stateless; every audio pass starts from the provider and the graph.
#[derive(Debug, Default)]
pub struct AudioReconciler;

impl AudioReconciler {
    pub fn new() -> Self {
        Self
    }

    /// Run one audio pass. Only forced passes do any work, and only once
    /// boot has completed and no song load is under way.
    pub fn reconcile<B, P>(
        &self,
        backend: &B,
        provider: &P,
        config: &Config,
        force: bool,
    ) -> Result<PassOutcome, ReconcileError>
    where
        B: GraphBackend + ?Sized,
        P: RoutingStateProvider + ?Sized,
    {
        let state = provider.snapshot();
        if !state.boot_complete {
            return Ok(PassOutcome::Skipped(SkipReason::BootIncomplete));
        }
        if state.load_in_progress {
            return Ok(PassOutcome::Skipped(SkipReason::LoadInProgress));
        }
        if !force {
            return Ok(PassOutcome::Skipped(SkipReason::NotForced));
        }

        let directory = PortDirectory::snapshot(backend)?;
        log::debug!(target: TARGET, "pass start, {} ports", directory.len());

        let mut pass = AudioPass {
            ledger: ConnectionLedger::new(backend, &directory),
            resolver: Resolver::new(&directory, &state, config),
            directory: &directory,
            state: &state,
            config,
            report: PassReport::new(Domain::Audio),
            existing: BTreeSet::new(),
            feeds: Vec::new(),
            playback: None,
            global_fx: Default::default(),
        };

        if let Err(e) = pass.stage() {
            pass.ledger.clear_pending();
            return Err(e);
        }

        let applied = pass.ledger.commit().map_err(ReconcileError::Commit)?;
        let mut report = pass.report;
        report.applied = applied;
        log::debug!(target: TARGET, "pass done, {} operations", applied);
        Ok(PassOutcome::Completed(report))
    }
}

/// Why a lane's source list came up short.
enum LaneIssue {
    /// An override resolved to nothing.
    Unresolved(SourceSpec),
    /// A default source is not running yet.
    Missing(String),
}

struct AudioPass<'p, B: GraphBackend + ?Sized> {
    ledger: ConnectionLedger<'p, B>,
    resolver: Resolver<'p>,
    directory: &'p PortDirectory,
    state: &'p RoutingState,
    config: &'p Config,
    report: PassReport,
    /// Passthrough nodes present in the graph before this pass.
    existing: BTreeSet<PassthroughNode>,
    /// Lanes with input and what feeds them.
    feeds: Vec<(TrackIndex, SlotIndex, StereoFeed)>,
    /// Global playback inputs.
    playback: Option<[PortId; 2]>,
    /// Inputs of the global FX engines.
    global_fx: [Option<[PortId; 2]>; GLOBAL_FX_COUNT],
}

impl<'p, B: GraphBackend + ?Sized> AudioPass<'p, B> {
    fn stage(&mut self) -> Result<(), ReconcileError> {
        self.clear_passthroughs()?;
        self.global_bus()?;
        self.synths()?;
        self.lanes()?;
        self.chains()?;
        self.wet_sends()?;
        self.nodes();
        self.meters()?;
        self.monitors()?;
        self.capture()?;
        Ok(())
    }

    fn present_pair(&self, [left, right]: [PortId; 2]) -> Option<[PortId; 2]> {
        (self.directory.contains(&left) && self.directory.contains(&right)).then_some([left, right])
    }

    fn connect_pair(&mut self, from: &[PortId; 2], to: &[PortId; 2]) -> Result<(), ReconcileError> {
        self.ledger.connect(&from[0], &to[0])?;
        self.ledger.connect(&from[1], &to[1])?;
        Ok(())
    }

    fn disconnect_pair(&mut self, from: &[PortId; 2], to: &[PortId; 2]) -> Result<(), ReconcileError> {
        self.ledger.disconnect(&from[0], &to[0])?;
        self.ledger.disconnect(&from[1], &to[1])?;
        Ok(())
    }

    fn system_ports(&self, direction: PortDirection) -> Vec<PortId> {
        let filter = PortFilter::new()
            .client(self.config.clients().system.as_str())
            .kind(PortKind::Audio)
            .direction(direction)
            .physical(true);
        let disabled = match direction {
            PortDirection::Output => &self.state.audio_ports.disabled_capture,
            PortDirection::Input => &self.state.audio_ports.disabled_playback,
        };
        self.directory
            .query(&filter)
            .filter(|port| !disabled.contains(&port.id.to_string()))
            .map(|port| port.id.clone())
            .collect()
    }

    // ─── Clearing ───────────────────────────────────────────────────

    /// Stage removal of every edge on existing passthrough ports. Side-chain
    /// inputs and side-channel peers are left alone.
    fn clear_passthroughs(&mut self) -> Result<(), ReconcileError> {
        let config = self.config;
        let directory = self.directory;
        for port in directory.iter() {
            let Some((node, kind)) = PassthroughNode::parse_port(&port.id) else {
                continue;
            };
            self.existing.insert(node);
            if kind.is_side_chain() || config.is_side_channel(&port.id) {
                continue;
            }
            self.ledger
                .clear_port(&port.id, |peer| config.is_side_channel(peer))?;
        }
        Ok(())
    }

    // ─── Global bus ─────────────────────────────────────────────────

    fn global_bus(&mut self) -> Result<(), ReconcileError> {
        let config = self.config;
        let global = config.clients().global_playback.as_str();
        self.playback = self.present_pair([
            PortId::new(global, "InputLeft"),
            PortId::new(global, "InputRight"),
        ]);
        if self.playback.is_none() {
            self.report.transient(format!("{} inputs", global));
        }

        let state = self.state;
        for (i, slot) in state.global.fx.iter().enumerate() {
            let Some(fx) = slot else { continue };
            let inputs = self.directory.stereo_inputs(&fx.engine);
            let outputs = self.directory.stereo_outputs(&fx.engine);
            let (Some(inputs), Some(outputs)) = (inputs, outputs) else {
                self.report.transient(format!("global FX {}", fx.engine));
                continue;
            };
            if let Some(playback) = self.playback.clone() {
                self.connect_pair(&outputs, &playback)?;
            }
            self.global_fx[i] = Some(inputs);
        }

        let outputs = self.present_pair([
            PortId::new(global, "OutputLeft"),
            PortId::new(global, "OutputRight"),
        ]);
        if let (Some(outputs), Some(sinks)) = (outputs, stereo_pair(self.system_ports(PortDirection::Input))) {
            self.connect_pair(&outputs, &sinks)?;
        }

        self.global_sampler()
    }

    /// The sampler's global voices: effected through the global FX, or
    /// straight to playback when there is none.
    fn global_sampler(&mut self) -> Result<(), ReconcileError> {
        let config = self.config;
        let sampler = config.clients().sampler.as_str();
        let Some(playback) = self.playback.clone() else {
            return Ok(());
        };

        if let Some(effected) = self.present_pair([
            PortId::new(sampler, "global-effected-Left"),
            PortId::new(sampler, "global-effected-Right"),
        ]) {
            let fx_inputs: Vec<[PortId; 2]> = self.global_fx.iter().flatten().cloned().collect();
            if fx_inputs.is_empty() {
                self.connect_pair(&effected, &playback)?;
            } else {
                self.disconnect_pair(&effected, &playback)?;
                for inputs in &fx_inputs {
                    self.connect_pair(&effected, inputs)?;
                }
            }
        }

        if let Some(uneffected) = self.present_pair([
            PortId::new(sampler, "global-uneffected-Left"),
            PortId::new(sampler, "global-uneffected-Right"),
        ]) {
            self.connect_pair(&uneffected, &playback)?;
        }
        Ok(())
    }

    // ─── Synths and lanes ───────────────────────────────────────────

    /// Engine outputs into the synth passthrough of every channel they
    /// serve. A channel is live once its engine has audio outputs.
    fn synths(&mut self) -> Result<(), ReconcileError> {
        let state = self.state;
        for engine in &state.engines {
            let Some(outputs) = self.directory.stereo_outputs(&engine.client) else {
                self.report.transient(format!("{} audio outputs", engine.client));
                continue;
            };
            // Omni engines sit outside the per-channel passthroughs.
            let Some(channels) = &engine.channels else {
                continue;
            };
            for &channel in channels {
                self.resolver.synth_live.insert(channel);
                let node = PassthroughNode::Synth { channel };
                let inputs = node.pair(PassthroughPort::InputLeft, PassthroughPort::InputRight);
                self.connect_pair(&outputs, &inputs)?;
            }
        }
        Ok(())
    }

    /// What feeds a lane. Overrides, when present, replace every default
    /// source. `follow_lanes` off ignores references to other lanes.
    fn lane_feed(
        &self,
        track: TrackIndex,
        index: SlotIndex,
        lane: &LaneState,
        follow_lanes: bool,
    ) -> (StereoFeed, Vec<LaneIssue>) {
        let mut feed = StereoFeed::default();
        let mut issues = Vec::new();

        if !lane.audio_overrides.is_empty() {
            for spec in &lane.audio_overrides {
                let lane_ref = match spec {
                    SourceSpec::Track {
                        track: t,
                        lane: Some(l),
                    } => Some((*t, *l)),
                    _ => None,
                };
                if lane_ref.is_some() && !follow_lanes {
                    continue;
                }
                let resolved = if lane_ref == Some((track, index)) {
                    StereoFeed::default()
                } else {
                    self.resolver.audio_sources(spec)
                };
                if resolved.is_empty() && !spec.is_no_input() {
                    issues.push(LaneIssue::Unresolved(spec.clone()));
                }
                feed.extend(resolved);
            }
            return (feed, issues);
        }

        if let Some(channel) = lane.synth {
            match self.resolver.synth_output(channel) {
                Some(pair) => feed.extend(StereoFeed::select(pair, Channel::Both)),
                None => issues.push(LaneIssue::Missing(format!("synth on channel {}", channel))),
            }
        }
        let clients = self.config.clients();
        let players = [
            (lane.sample, clients.sampler.as_str()),
            (lane.loop_clip, clients.loop_player.as_str()),
        ];
        for (loaded, client) in players {
            if !loaded {
                continue;
            }
            match self.resolver.player_output(client, track, index) {
                Some(pair) => feed.extend(StereoFeed::select(pair, Channel::Both)),
                None => issues.push(LaneIssue::Missing(format!("{} T{}-L{}", client, track, index))),
            }
        }
        if let Some(channel) = lane.capture {
            match stereo_pair(self.system_ports(PortDirection::Output)) {
                Some(pair) => feed.extend(StereoFeed::select(pair, channel)),
                None => issues.push(LaneIssue::Missing("system capture".into())),
            }
        }
        (feed, issues)
    }

    /// Resolve every lane in two sweeps. The first ignores references to
    /// other lanes and decides which lanes have input of their own; the
    /// second resolves references against that set.
    fn lanes(&mut self) -> Result<(), ReconcileError> {
        let state = self.state;

        let mut first = BTreeSet::new();
        for (track, track_state) in state.indexed_tracks() {
            for (index, lane) in track_state.indexed_lanes() {
                if !self.lane_feed(track, index, lane, false).0.is_empty() {
                    first.insert((track, index));
                }
            }
        }
        self.resolver.lanes_live = first;

        let mut live = BTreeSet::new();
        for (track, track_state) in state.indexed_tracks() {
            for (index, lane) in track_state.indexed_lanes() {
                let (feed, issues) = self.lane_feed(track, index, lane, true);
                let node = PassthroughNode::TrackLane { track, lane: index };
                for issue in issues {
                    match issue {
                        LaneIssue::Unresolved(spec) => self
                            .report
                            .inconsistent(node.port(PassthroughPort::InputLeft).to_string(), spec.to_string()),
                        LaneIssue::Missing(what) => self.report.transient(what),
                    }
                }
                if !feed.is_empty() {
                    live.insert((track, index));
                    self.feeds.push((track, index, feed));
                }
            }
        }
        self.resolver.lanes_live = live;

        for (track, lane, feed) in std::mem::take(&mut self.feeds) {
            let node = PassthroughNode::TrackLane { track, lane };
            let [left, right] = node.pair(PassthroughPort::InputLeft, PassthroughPort::InputRight);
            for source in &feed.left {
                self.ledger.connect(source, &left)?;
            }
            for source in &feed.right {
                self.ledger.connect(source, &right)?;
            }
        }
        Ok(())
    }

    // ─── FX chains ──────────────────────────────────────────────────

    fn chains(&mut self) -> Result<(), ReconcileError> {
        let state = self.state;
        for (track, track_state) in state.indexed_tracks() {
            let with_input: Vec<SlotIndex> = track_state
                .indexed_lanes()
                .map(|(index, _)| index)
                .filter(|&index| self.resolver.lanes_live.contains(&(track, index)))
                .collect();
            for chain in build_chains(track_state, &with_input) {
                self.wire_chain(track, track_state, &chain)?;
            }
        }
        Ok(())
    }

    /// Lane dry outputs through each FX slot in turn, then into the meter.
    /// Each slot's engine takes the same signal as the slot's dry input and
    /// returns into its wet input.
    fn wire_chain(&mut self, track: TrackIndex, state: &TrackState, chain: &Chain) -> Result<(), ReconcileError> {
        let mut feeds: Vec<[PortId; 2]> = chain
            .lanes
            .iter()
            .map(|&lane| {
                PassthroughNode::TrackLane { track, lane }
                    .pair(PassthroughPort::DryOutLeft, PassthroughPort::DryOutRight)
            })
            .collect();

        for &slot in &chain.fx {
            let node = PassthroughNode::FxSlot { track, slot };
            let input = node.pair(PassthroughPort::InputLeft, PassthroughPort::InputRight);
            let engine = state.fx_slot(slot).map(|fx| fx.engine.as_str()).unwrap_or_default();
            let engine_in = self.directory.stereo_inputs(engine);
            let engine_out = self.directory.stereo_outputs(engine);
            if engine_in.is_none() || engine_out.is_none() {
                self.report.transient(format!("FX engine {} on T{}-S{}", engine, track, slot));
            }

            for feed in &feeds {
                self.connect_pair(feed, &input)?;
                if let Some(engine_in) = &engine_in {
                    self.connect_pair(feed, engine_in)?;
                }
            }
            if let Some(engine_out) = &engine_out {
                let wet = node.pair(PassthroughPort::WetInLeft, PassthroughPort::WetInRight);
                self.connect_pair(engine_out, &wet)?;
            }
            feeds = vec![node.pair(PassthroughPort::DryOutLeft, PassthroughPort::DryOutRight)];
        }

        if feeds.is_empty() {
            return Ok(());
        }
        let Some(meter) = self.present_pair([
            meter_port(self.config, track, "InputLeft"),
            meter_port(self.config, track, "InputRight"),
        ]) else {
            self.report.transient(format!("meter for track {}", track));
            return Ok(());
        };
        for feed in &feeds {
            self.connect_pair(feed, &meter)?;
        }
        Ok(())
    }

    /// Lane wet sends into the global FX engines.
    fn wet_sends(&mut self) -> Result<(), ReconcileError> {
        let sends = [
            (PassthroughPort::WetOutFx1Left, PassthroughPort::WetOutFx1Right),
            (PassthroughPort::WetOutFx2Left, PassthroughPort::WetOutFx2Right),
        ];
        let lanes: Vec<(TrackIndex, SlotIndex)> = self.resolver.lanes_live.iter().copied().collect();
        for (track, lane) in lanes {
            let node = PassthroughNode::TrackLane { track, lane };
            for (i, (left, right)) in sends.into_iter().enumerate() {
                if let Some(inputs) = self.global_fx[i].clone() {
                    self.connect_pair(&node.pair(left, right), &inputs)?;
                }
            }
        }
        Ok(())
    }

    // ─── Nodes ──────────────────────────────────────────────────────

    /// Lanes exist iff they have input, FX slots iff occupied, synth
    /// passthroughs iff their engine is running.
    fn nodes(&mut self) {
        let mut desired = BTreeSet::new();
        for &(track, lane) in &self.resolver.lanes_live {
            desired.insert(PassthroughNode::TrackLane { track, lane });
        }
        for (track, state) in self.state.indexed_tracks() {
            for (slot, _) in state.occupied_fx() {
                desired.insert(PassthroughNode::FxSlot { track, slot });
            }
        }
        for &channel in &self.resolver.synth_live {
            desired.insert(PassthroughNode::Synth { channel });
        }

        let existing = std::mem::take(&mut self.existing);
        for node in existing.union(&desired) {
            self.ledger.set_node(*node, desired.contains(node));
        }
    }

    // ─── Meters and monitors ────────────────────────────────────────

    /// Meters reach global playback only while something feeds them.
    fn meters(&mut self) -> Result<(), ReconcileError> {
        let state = self.state;
        for (track, _) in state.indexed_tracks() {
            let Some(outputs) = self.present_pair([
                meter_port(self.config, track, "OutputLeft"),
                meter_port(self.config, track, "OutputRight"),
            ]) else {
                continue;
            };
            let mut fed = false;
            for side in ["InputLeft", "InputRight"] {
                fed |= !self.ledger.inbound(&meter_port(self.config, track, side))?.is_empty();
            }
            let Some(playback) = self.playback.clone() else {
                continue;
            };
            if fed {
                self.connect_pair(&outputs, &playback)?;
            } else {
                self.disconnect_pair(&outputs, &playback)?;
            }
        }
        Ok(())
    }

    /// Headphone and gadget outputs carry what the system playback carries,
    /// port for port.
    fn monitors(&mut self) -> Result<(), ReconcileError> {
        let config = self.config;
        let clients = config.clients();
        let playback = self.system_ports(PortDirection::Input);
        for client in [clients.headphones.as_str(), clients.usb_gadget.as_str()] {
            let sinks = self
                .directory
                .client_ports(client, PortKind::Audio, PortDirection::Input);
            for (sink, system) in sinks.iter().zip(&playback) {
                let sources = self.ledger.inbound(system)?;
                self.ledger
                    .set_inbound(sink, &sources, |peer| config.is_side_channel(peer))?;
            }
        }
        Ok(())
    }

    /// The first two capture ports feed note detection while it is enabled.
    fn capture(&mut self) -> Result<(), ReconcileError> {
        let config = self.config;
        let Some(aubio) = self
            .directory
            .client_ports(&config.clients().aubio, PortKind::Audio, PortDirection::Input)
            .into_iter()
            .next()
        else {
            return Ok(());
        };
        for port in self.system_ports(PortDirection::Output).iter().take(2) {
            if config.aubionotes() {
                self.ledger.connect(port, &aubio)?;
            } else {
                self.ledger.disconnect(port, &aubio)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autopatch_graph::MemoryGraph;
    use autopatch_types::{FxSlot, MidiChannel, RoutingStyle, SynthEngine};

    use crate::provider::SharedRoutingState;

    fn audio(graph: &MemoryGraph, client: &str, port: &str, direction: PortDirection) -> PortId {
        let id = PortId::new(client, port);
        graph.add(id.clone(), direction, PortKind::Audio);
        id
    }

    fn rig() -> MemoryGraph {
        let graph = MemoryGraph::new();
        for port in ["capture_1", "capture_2"] {
            graph.add_physical(PortId::new("system", port), PortDirection::Output, PortKind::Audio);
        }
        for port in ["playback_1", "playback_2"] {
            graph.add_physical(PortId::new("system", port), PortDirection::Input, PortKind::Audio);
        }
        for side in ["Left", "Right"] {
            audio(&graph, "GlobalPlayback", &format!("Input{}", side), PortDirection::Input);
            audio(&graph, "GlobalPlayback", &format!("Output{}", side), PortDirection::Output);
        }
        for track in 0..2 {
            for side in ["Left", "Right"] {
                audio(&graph, "AudioLevels", &format!("T{}-Input{}", track, side), PortDirection::Input);
                audio(&graph, "AudioLevels", &format!("T{}-Output{}", track, side), PortDirection::Output);
            }
        }
        graph
    }

    fn state() -> RoutingState {
        let mut state = RoutingState::new();
        state.tracks.truncate(2);
        state
    }

    fn synth(graph: &MemoryGraph, state: &mut RoutingState, client: &str, channel: u8) {
        audio(graph, client, "out_L", PortDirection::Output);
        audio(graph, client, "out_R", PortDirection::Output);
        state.engines.push(SynthEngine::new(client, MidiChannel::new(channel)));
    }

    fn fx_engine(graph: &MemoryGraph, client: &str) {
        audio(graph, client, "in", PortDirection::Input);
        audio(graph, client, "out", PortDirection::Output);
    }

    fn lane(track: u8, lane: u8) -> PassthroughNode {
        PassthroughNode::TrackLane {
            track: TrackIndex::new(track),
            lane: SlotIndex::new(lane),
        }
    }

    fn run(graph: &MemoryGraph, state: RoutingState) -> PassOutcome {
        AudioReconciler::new()
            .reconcile(graph, &SharedRoutingState::new(state), &Config::default(), true)
            .unwrap()
    }

    #[test]
    fn preconditions_skip_without_touching_the_graph() {
        let graph = rig();
        let audio = AudioReconciler::new();
        let config = Config::default();

        let mut booting = state();
        booting.boot_complete = false;
        let outcome = audio
            .reconcile(&graph, &SharedRoutingState::new(booting), &config, true)
            .unwrap();
        assert_eq!(outcome, PassOutcome::Skipped(SkipReason::BootIncomplete));

        let mut loading = state();
        loading.load_in_progress = true;
        let outcome = audio
            .reconcile(&graph, &SharedRoutingState::new(loading), &config, true)
            .unwrap();
        assert_eq!(outcome, PassOutcome::Skipped(SkipReason::LoadInProgress));

        let outcome = audio
            .reconcile(&graph, &SharedRoutingState::new(state()), &config, false)
            .unwrap();
        assert_eq!(outcome, PassOutcome::Skipped(SkipReason::NotForced));
        assert_eq!(graph.port_queries(), 0);
        assert_eq!(graph.batches(), 0);
    }

    #[test]
    fn synth_lane_runs_through_passthroughs_to_playback() {
        let graph = rig();
        let mut state = state();
        synth(&graph, &mut state, "fluidsynth", 0);
        state.tracks[0].lanes[0].synth = Some(MidiChannel::new(0));

        assert!(run(&graph, state).is_completed());
        let ch0 = PassthroughNode::Synth {
            channel: MidiChannel::new(0),
        };
        assert!(graph.has_node(ch0));
        assert!(graph.has_node(lane(0, 0)));
        assert!(graph.has_edge(
            &PortId::new("fluidsynth", "out_L"),
            &ch0.port(PassthroughPort::InputLeft)
        ));
        assert!(graph.has_edge(
            &ch0.port(PassthroughPort::DryOutRight),
            &lane(0, 0).port(PassthroughPort::InputRight)
        ));
        assert!(graph.has_edge(
            &lane(0, 0).port(PassthroughPort::DryOutLeft),
            &PortId::new("AudioLevels", "T0-InputLeft")
        ));
        assert!(graph.has_edge(
            &PortId::new("AudioLevels", "T0-OutputLeft"),
            &PortId::new("GlobalPlayback", "InputLeft")
        ));
        assert!(!graph.has_edge(
            &PortId::new("AudioLevels", "T1-OutputLeft"),
            &PortId::new("GlobalPlayback", "InputLeft")
        ));
    }

    #[test]
    fn lane_without_input_loses_its_node() {
        let graph = rig();
        graph.create_node_now(lane(1, 3)).unwrap();
        run(&graph, state());
        assert!(!graph.has_node(lane(1, 3)));
    }

    #[test]
    fn override_replaces_default_sources() {
        let graph = rig();
        let mut state = state();
        synth(&graph, &mut state, "fluidsynth", 0);
        let lane0 = &mut state.tracks[0].lanes[0];
        lane0.synth = Some(MidiChannel::new(0));
        lane0.audio_overrides.push("external:system:left".parse().unwrap());

        run(&graph, state);
        let capture = PortId::new("system", "capture_1");
        assert_eq!(graph.inbound(&lane(0, 0).port(PassthroughPort::InputLeft)), vec![capture.clone()]);
        assert_eq!(graph.inbound(&lane(0, 0).port(PassthroughPort::InputRight)), vec![capture]);
    }

    #[test]
    fn lane_reference_follows_another_lane() {
        let graph = rig();
        let mut state = state();
        synth(&graph, &mut state, "fluidsynth", 0);
        state.tracks[0].lanes[0].synth = Some(MidiChannel::new(0));
        state.tracks[1].lanes[2].audio_overrides.push("track:0:0".parse().unwrap());
        state.tracks[1].lanes[3].audio_overrides.push("track:0:4".parse().unwrap());

        let outcome = run(&graph, state);
        assert_eq!(
            graph.inbound(&lane(1, 2).port(PassthroughPort::InputLeft)),
            vec![lane(0, 0).port(PassthroughPort::DryOutLeft)]
        );
        assert!(!graph.has_node(lane(1, 3)));
        assert_eq!(outcome.report().unwrap().inconsistencies().count(), 1);
    }

    #[test]
    fn one_to_one_keeps_lanes_apart() {
        let graph = rig();
        let mut state = state();
        synth(&graph, &mut state, "fluidsynth", 0);
        synth(&graph, &mut state, "zynaddsubfx", 1);
        fx_engine(&graph, "delay");
        let track = &mut state.tracks[0];
        track.routing_style = RoutingStyle::OneToOne;
        track.lanes[0].synth = Some(MidiChannel::new(0));
        track.lanes[1].synth = Some(MidiChannel::new(1));
        track.fx_slots[1] = Some(FxSlot::new("delay"));

        run(&graph, state);
        let slot = PassthroughNode::FxSlot {
            track: TrackIndex::new(0),
            slot: SlotIndex::new(1),
        };
        let meter = PortId::new("AudioLevels", "T0-InputLeft");
        assert!(graph.has_edge(&lane(0, 0).port(PassthroughPort::DryOutLeft), &meter));
        assert!(graph.has_edge(
            &lane(0, 1).port(PassthroughPort::DryOutLeft),
            &slot.port(PassthroughPort::InputLeft)
        ));
        assert!(!graph.has_edge(
            &lane(0, 0).port(PassthroughPort::DryOutLeft),
            &slot.port(PassthroughPort::InputLeft)
        ));
        assert!(graph.has_edge(&slot.port(PassthroughPort::DryOutLeft), &meter));
        assert!(graph.has_edge(&PortId::new("delay", "out"), &slot.port(PassthroughPort::WetInRight)));
    }

    #[test]
    fn wet_sends_reach_global_fx() {
        let graph = rig();
        let mut state = state();
        synth(&graph, &mut state, "fluidsynth", 0);
        fx_engine(&graph, "reverb");
        state.tracks[0].lanes[0].synth = Some(MidiChannel::new(0));
        state.global.fx[0] = Some(FxSlot::new("reverb"));

        run(&graph, state);
        assert!(graph.has_edge(
            &lane(0, 0).port(PassthroughPort::WetOutFx1Left),
            &PortId::new("reverb", "in")
        ));
        assert!(graph.has_edge(&PortId::new("reverb", "out"), &PortId::new("GlobalPlayback", "InputRight")));
        assert!(graph.outbound(&lane(0, 0).port(PassthroughPort::WetOutFx2Left)).is_empty());
    }

    #[test]
    fn global_sampler_bypasses_missing_fx() {
        let graph = rig();
        let effected = audio(&graph, "SamplerSynth", "global-effected-Left", PortDirection::Output);
        audio(&graph, "SamplerSynth", "global-effected-Right", PortDirection::Output);
        run(&graph, state());
        assert_eq!(
            graph.outbound(&effected),
            vec![PortId::new("GlobalPlayback", "InputLeft")]
        );
    }

    #[test]
    fn headphones_mirror_system_playback() {
        let graph = rig();
        let left = PortId::new("headphones", "playback_1");
        let right = PortId::new("headphones", "playback_2");
        graph.add_physical(left.clone(), PortDirection::Input, PortKind::Audio);
        graph.add_physical(right.clone(), PortDirection::Input, PortKind::Audio);
        graph.connect_now(PortId::new("system", "capture_1"), left.clone()).unwrap();

        run(&graph, state());
        assert_eq!(graph.inbound(&left), vec![PortId::new("GlobalPlayback", "OutputLeft")]);
        assert_eq!(graph.inbound(&right), vec![PortId::new("GlobalPlayback", "OutputRight")]);
    }

    #[test]
    fn aubio_follows_its_flag() {
        let graph = rig();
        let aubio = audio(&graph, "aubio", "in", PortDirection::Input);
        let provider = SharedRoutingState::new(state());
        let audio = AudioReconciler::new();

        let enabled = Config::default().with_aubionotes(true);
        audio.reconcile(&graph, &provider, &enabled, true).unwrap();
        assert_eq!(graph.inbound(&aubio).len(), 2);

        audio.reconcile(&graph, &provider, &Config::default(), true).unwrap();
        assert!(graph.inbound(&aubio).is_empty());
    }

    #[test]
    fn unchanged_state_commits_nothing() {
        let graph = rig();
        let mut state = state();
        synth(&graph, &mut state, "fluidsynth", 0);
        fx_engine(&graph, "delay");
        state.tracks[0].lanes[0].synth = Some(MidiChannel::new(0));
        state.tracks[0].fx_slots[2] = Some(FxSlot::new("delay"));
        let provider = SharedRoutingState::new(state);

        let audio = AudioReconciler::new();
        let config = Config::default();
        audio.reconcile(&graph, &provider, &config, true).unwrap();
        graph.clear_operations();

        let outcome = audio.reconcile(&graph, &provider, &config, true).unwrap();
        assert_eq!(outcome.report().map(|r| r.applied), Some(0));
        assert_eq!(graph.batches(), 0);
    }
}
