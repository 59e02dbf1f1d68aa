//! MIDI pass: hardware and network endpoints, bus channels, engine inputs,
//! MIDI tools and per-lane overrides.

use std::collections::BTreeMap;

use autopatch_graph::{ConnectionLedger, GraphBackend, PortDirectory, PortFilter};
use autopatch_types::{
    Domain, MidiChannel, PortDirection, PortId, PortKind, RoutingState, SourceSpec,
};

use crate::config::Config;
use crate::error::{PassOutcome, PassReport, ReconcileError, SkipReason};
use crate::fingerprint::{FingerprintGuard, HardwareFingerprint};
use crate::provider::RoutingStateProvider;
use crate::resolve::{bus_channel_port, bus_port, Resolver};

const TARGET: &str = "autoconnect::midi";

/// Owns the fingerprint of the last full MIDI pass.
#[derive(Debug, Default)]
pub struct MidiReconciler {
    guard: FingerprintGuard,
}

impl MidiReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next pass run in full even if nothing changed.
    pub fn reset_fingerprint(&mut self) {
        self.guard.reset();
    }

    pub fn reconcile<B, P>(
        &mut self,
        backend: &B,
        provider: &P,
        config: &Config,
        force: bool,
    ) -> Result<PassOutcome, ReconcileError>
    where
        B: GraphBackend + ?Sized,
        P: RoutingStateProvider + ?Sized,
    {
        let directory = PortDirectory::snapshot(backend)?;

        let endpoints = endpoints(&directory, config);
        if !self
            .guard
            .should_run_full(HardwareFingerprint::compute(&endpoints), force)
        {
            log::trace!(target: TARGET, "endpoints unchanged, skipping");
            return Ok(PassOutcome::Skipped(SkipReason::FingerprintUnchanged));
        }

        let state = provider.snapshot();
        log::debug!(target: TARGET, "pass start (force={})", force);

        let mut pass = MidiPass {
            ledger: ConnectionLedger::new(backend, &directory),
            resolver: Resolver::new(&directory, &state, config),
            directory: &directory,
            state: &state,
            config,
            report: PassReport::new(Domain::Midi),
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

/// Hardware ports plus the virtual sources enabled by configuration.
fn endpoints(directory: &PortDirectory, config: &Config) -> Vec<PortId> {
    let clients = config.clients();
    directory
        .query(&PortFilter::new().kind(PortKind::Midi))
        .filter(|port| {
            port.physical
                || (config.aubionotes() && port.id.client() == clients.aubio)
                || (config.touchosc() && port.id.client() == clients.touchosc)
                || (config.network_midi() && port.id.client() == clients.network)
        })
        .map(|port| port.id.clone())
        .collect()
}

struct MidiPass<'p, B: GraphBackend + ?Sized> {
    ledger: ConnectionLedger<'p, B>,
    resolver: Resolver<'p>,
    directory: &'p PortDirectory,
    state: &'p RoutingState,
    config: &'p Config,
    report: PassReport,
}

impl<'p, B: GraphBackend + ?Sized> MidiPass<'p, B> {
    fn stage(&mut self) -> Result<(), ReconcileError> {
        self.hardware_inputs()?;
        self.network()?;
        self.midi_tools()?;
        self.root_engines()?;
        self.lane_overrides()?;
        self.hardware_outputs()?;
        Ok(())
    }

    /// A bus port, or a transient diagnostic if the bus is not up.
    fn bus(&mut self, name: &str) -> Option<PortId> {
        let port = bus_port(self.config, name);
        if self.directory.contains(&port) {
            Some(port)
        } else {
            self.report.transient(port.to_string());
            None
        }
    }

    fn physical(&self, direction: PortDirection) -> Vec<(PortId, String)> {
        let filter = PortFilter::new()
            .kind(PortKind::Midi)
            .direction(direction)
            .physical(true);
        self.directory
            .query(&filter)
            .map(|port| (port.id.clone(), port.alias_id()))
            .collect()
    }

    fn client_outputs(&self, client: &str) -> Vec<PortId> {
        self.directory
            .client_ports(client, PortKind::Midi, PortDirection::Output)
    }

    fn client_inputs(&self, client: &str) -> Vec<PortId> {
        self.directory
            .client_ports(client, PortKind::Midi, PortDirection::Input)
    }

    /// Capture devices and optional virtual sources into the bus.
    fn hardware_inputs(&mut self) -> Result<(), ReconcileError> {
        let Some(main_in) = self.bus("main_in") else {
            return Ok(());
        };
        let disabled = &self.state.midi_ports.disabled_in;
        for (port, alias) in self.physical(PortDirection::Output) {
            if disabled.contains(&alias) {
                self.ledger.disconnect(&port, &main_in)?;
            } else {
                self.ledger.connect(&port, &main_in)?;
            }
        }

        let config = self.config;
        let clients = config.clients();
        let virtual_sources = [
            (clients.aubio.as_str(), config.aubionotes()),
            (clients.touchosc.as_str(), config.touchosc()),
        ];
        for (client, enabled) in virtual_sources {
            for port in self.client_outputs(client) {
                if enabled {
                    self.ledger.connect(&port, &main_in)?;
                } else {
                    self.ledger.disconnect(&port, &main_in)?;
                }
            }
        }
        Ok(())
    }

    fn network(&mut self) -> Result<(), ReconcileError> {
        let config = self.config;
        let client = config.clients().network.as_str();
        let enabled = config.network_midi();
        let sources = self.client_outputs(client);
        let sinks = self.client_inputs(client);
        if sources.is_empty() && sinks.is_empty() {
            return Ok(());
        }

        if let Some(net_in) = self.bus("net_in") {
            for port in &sources {
                if enabled {
                    self.ledger.connect(port, &net_in)?;
                } else {
                    self.ledger.disconnect(port, &net_in)?;
                }
            }
        }
        if let Some(net_out) = self.bus("net_out") {
            for port in &sinks {
                if enabled {
                    self.ledger.connect(&net_out, port)?;
                } else {
                    self.ledger.disconnect(&net_out, port)?;
                }
            }
        }
        Ok(())
    }

    /// Engine MIDI inputs in state order, skipping engines not running yet.
    fn engine_inputs(&self) -> Vec<(String, Option<PortId>)> {
        self.state
            .engines
            .iter()
            .map(|engine| {
                (
                    engine.client.clone(),
                    self.resolver.engine_midi_input(&engine.client),
                )
            })
            .collect()
    }

    fn midi_tools(&mut self) -> Result<(), ReconcileError> {
        let engines = self.engine_inputs();
        for (_, track) in self.state.indexed_tracks() {
            for tool in &track.midi_tools {
                let outputs = self.client_outputs(&tool.client);
                if outputs.is_empty() {
                    self.report.transient(format!("MIDI tool {}", tool.client));
                    continue;
                }
                for (client, input) in &engines {
                    let Some(input) = input else { continue };
                    let listed = tool.targets.contains(client);
                    for output in &outputs {
                        if listed {
                            self.ledger.connect(output, input)?;
                        } else {
                            self.ledger.disconnect(output, input)?;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Engines whose input is governed by a lane override this pass.
    fn overridden_engines(&self) -> Vec<String> {
        let mut clients = Vec::new();
        for track in &self.state.tracks {
            for lane in &track.lanes {
                if lane.midi_overrides.is_empty() {
                    continue;
                }
                if let Some(engine) = lane.synth.and_then(|c| self.state.engine_for_channel(c)) {
                    if !clients.contains(&engine.client) {
                        clients.push(engine.client.clone());
                    }
                }
            }
        }
        clients
    }

    /// Outputs of every MIDI tool that lists `client` as a target.
    fn tool_feeds(&self, client: &str) -> Vec<PortId> {
        let mut feeds = Vec::new();
        for track in &self.state.tracks {
            for tool in &track.midi_tools {
                if !tool.targets.iter().any(|target| target == client) {
                    continue;
                }
                for port in self.client_outputs(&tool.client) {
                    if !feeds.contains(&port) {
                        feeds.push(port);
                    }
                }
            }
        }
        feeds
    }

    /// Each engine not under an override takes exactly its bus feed and the
    /// tools aimed at it. Sources left from an earlier override are dropped.
    fn root_engines(&mut self) -> Result<(), ReconcileError> {
        let overridden = self.overridden_engines();
        let config = self.config;
        let state = self.state;

        for engine in &state.engines {
            let Some(input) = self.resolver.engine_midi_input(&engine.client) else {
                self.report.transient(format!("{} MIDI input", engine.client));
                continue;
            };
            if overridden.contains(&engine.client) {
                continue;
            }
            let mut desired: Vec<PortId> = if engine.is_omni() {
                vec![bus_port(config, "main_out")]
            } else {
                MidiChannel::all()
                    .filter(|&channel| engine.listens_on(channel))
                    .map(|channel| bus_channel_port(config, channel))
                    .collect()
            };
            desired.retain(|port| self.directory.contains(port));
            desired.extend(self.tool_feeds(&engine.client));
            self.ledger
                .set_inbound(&input, &desired, |peer| config.is_side_channel(peer))?;
        }
        Ok(())
    }

    /// Replace the sources of overridden engines with the resolved overrides.
    fn lane_overrides(&mut self) -> Result<(), ReconcileError> {
        let mut desired: BTreeMap<PortId, Vec<PortId>> = BTreeMap::new();
        for (_, track) in self.state.indexed_tracks() {
            for lane in &track.lanes {
                if lane.midi_overrides.is_empty() {
                    continue;
                }
                let Some(engine) = lane.synth.and_then(|c| self.state.engine_for_channel(c)) else {
                    continue;
                };
                let Some(input) = self.resolver.engine_midi_input(&engine.client) else {
                    continue;
                };
                let sources = desired.entry(input.clone()).or_default();
                for spec in &lane.midi_overrides {
                    let resolved = self.resolver.midi_sources(spec);
                    if resolved.is_empty() && !matches!(spec, SourceSpec::NoInput) {
                        self.report.inconsistent(input.to_string(), spec.to_string());
                    }
                    for port in resolved {
                        if !sources.contains(&port) {
                            sources.push(port);
                        }
                    }
                }
            }
        }

        let config = self.config;
        for (input, sources) in desired {
            self.ledger
                .set_inbound(&input, &sources, |peer| config.is_side_channel(peer))?;
        }
        Ok(())
    }

    /// Bus outputs to hardware playback ports and per-track device outputs.
    fn hardware_outputs(&mut self) -> Result<(), ReconcileError> {
        let sinks = self.physical(PortDirection::Input);
        let policy = &self.state.midi_ports;

        let main_out = bus_port(self.config, "main_out");
        if self.directory.contains(&main_out) {
            for (port, alias) in &sinks {
                if policy.enabled_out.contains(alias) {
                    self.ledger.connect(&main_out, port)?;
                } else {
                    self.ledger.disconnect(&main_out, port)?;
                }
            }
        }

        let feedback_out = bus_port(self.config, "feedback_out");
        if self.directory.contains(&feedback_out) {
            for (port, alias) in &sinks {
                if policy.enabled_feedback.contains(alias) {
                    self.ledger.connect(&feedback_out, port)?;
                } else {
                    self.ledger.disconnect(&feedback_out, port)?;
                }
            }
        }

        // Channel outputs go to the devices named by tracks on that channel.
        let mut wanted: BTreeMap<MidiChannel, Vec<&str>> = BTreeMap::new();
        for track in &self.state.tracks {
            let devices = wanted.entry(track.midi_channel).or_default();
            if let Some(device) = track.external_midi_out.as_deref() {
                devices.push(device);
            }
        }
        for (channel, devices) in wanted {
            let port = bus_channel_port(self.config, channel);
            if !self.directory.contains(&port) {
                continue;
            }
            let clients: Vec<&str> = devices
                .iter()
                .map(|device| self.state.device_client(device))
                .collect();
            for (sink, alias) in &sinks {
                let target = devices.contains(&alias.as_str()) || clients.contains(&sink.client());
                if target {
                    self.ledger.connect(&port, sink)?;
                } else {
                    self.ledger.disconnect(&port, sink)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autopatch_graph::MemoryGraph;
    use autopatch_types::{MidiTool, Port, SlotIndex, SynthEngine, TrackIndex};

    use crate::provider::SharedRoutingState;

    fn midi_out(graph: &MemoryGraph, client: &str, port: &str) -> PortId {
        let id = PortId::new(client, port);
        graph.add(id.clone(), PortDirection::Output, PortKind::Midi);
        id
    }

    fn midi_in(graph: &MemoryGraph, client: &str, port: &str) -> PortId {
        let id = PortId::new(client, port);
        graph.add(id.clone(), PortDirection::Input, PortKind::Midi);
        id
    }

    fn bus(graph: &MemoryGraph) {
        midi_in(graph, "MidiBus", "main_in");
        midi_in(graph, "MidiBus", "net_in");
        for name in ["main_out", "net_out", "feedback_out", "current_out"] {
            midi_out(graph, "MidiBus", name);
        }
        for ch in 0..16 {
            midi_out(graph, "MidiBus", &format!("ch{}_out", ch));
        }
    }

    fn engine_with_bus() -> (MemoryGraph, SharedRoutingState) {
        let graph = MemoryGraph::new();
        bus(&graph);
        midi_in(&graph, "fluidsynth", "midi_in");
        let mut state = RoutingState::new();
        state.engines.push(SynthEngine::new("fluidsynth", MidiChannel::new(1)));
        (graph, SharedRoutingState::new(state))
    }

    fn run(graph: &MemoryGraph, provider: &SharedRoutingState, force: bool) -> PassOutcome {
        MidiReconciler::new()
            .reconcile(graph, provider, &Config::default(), force)
            .unwrap()
    }

    #[test]
    fn engine_receives_its_channel_only() {
        let (graph, provider) = engine_with_bus();
        let input = PortId::new("fluidsynth", "midi_in");
        graph.connect_now(PortId::new("MidiBus", "ch5_out"), input.clone()).unwrap();

        assert!(run(&graph, &provider, true).is_completed());
        assert_eq!(graph.inbound(&input), vec![PortId::new("MidiBus", "ch1_out")]);
    }

    #[test]
    fn omni_engine_listens_on_main_out() {
        let graph = MemoryGraph::new();
        bus(&graph);
        let input = midi_in(&graph, "setbfree", "midi_in");
        midi_in(&graph, "setbfree", "osc");
        graph.connect_now(PortId::new("MidiBus", "ch0_out"), input.clone()).unwrap();
        let mut state = RoutingState::new();
        state.engines.push(SynthEngine::omni("setbfree"));

        run(&graph, &SharedRoutingState::new(state), true);
        assert_eq!(graph.inbound(&input), vec![PortId::new("MidiBus", "main_out")]);
        assert!(graph.inbound(&PortId::new("setbfree", "osc")).is_empty());
    }

    #[test]
    fn disabled_hardware_input_is_cut() {
        let (graph, provider) = engine_with_bus();
        let keys = PortId::new("system", "midi_capture_1");
        let pads = PortId::new("system", "midi_capture_2");
        graph.add_port(
            Port::new(keys.clone(), PortDirection::Output, PortKind::Midi, true)
                .with_alias("alsa_pcm:Keys-MIDI-1-out-x-Keys"),
        );
        graph.add_port(
            Port::new(pads.clone(), PortDirection::Output, PortKind::Midi, true)
                .with_alias("alsa_pcm:Pads-MIDI-1-out-x-Pads"),
        );
        graph.connect_now(pads.clone(), PortId::new("MidiBus", "main_in")).unwrap();
        provider.update(|s| s.midi_ports.disabled_in.push("Pads".into()));

        run(&graph, &provider, true);
        assert_eq!(
            graph.inbound(&PortId::new("MidiBus", "main_in")),
            vec![keys]
        );
    }

    #[test]
    fn midi_tool_reaches_listed_engines_only() {
        let (graph, provider) = engine_with_bus();
        let other = midi_in(&graph, "zynaddsubfx", "midi_in");
        let arp = midi_out(&graph, "arpeggiator", "out");
        graph.connect_now(arp.clone(), other.clone()).unwrap();
        provider.update(|s| {
            s.engines.push(SynthEngine::new("zynaddsubfx", MidiChannel::new(2)));
            s.tracks[0].midi_tools.push(MidiTool {
                client: "arpeggiator".into(),
                targets: vec!["fluidsynth".into()],
            });
        });

        run(&graph, &provider, true);
        assert!(graph.has_edge(&arp, &PortId::new("fluidsynth", "midi_in")));
        assert!(!graph.has_edge(&arp, &other));
    }

    #[test]
    fn override_replaces_bus_channel() {
        let (graph, provider) = engine_with_bus();
        let keys = PortId::new("a2j", "Keys");
        graph.add_physical(keys.clone(), PortDirection::Output, PortKind::Midi);
        provider.update(|s| {
            if let Some(lane) = s.lane_mut(TrackIndex::new(0), SlotIndex::new(0)) {
                lane.synth = Some(MidiChannel::new(1));
                lane.midi_overrides.push("external:a2j".parse().unwrap());
            }
        });

        run(&graph, &provider, true);
        assert_eq!(graph.inbound(&PortId::new("fluidsynth", "midi_in")), vec![keys]);
    }

    #[test]
    fn removed_override_gives_input_back_to_the_bus() {
        let (graph, provider) = engine_with_bus();
        let keys = PortId::new("a2j", "Keys");
        graph.add_physical(keys.clone(), PortDirection::Output, PortKind::Midi);
        let input = PortId::new("fluidsynth", "midi_in");
        provider.update(|s| {
            if let Some(lane) = s.lane_mut(TrackIndex::new(0), SlotIndex::new(0)) {
                lane.synth = Some(MidiChannel::new(1));
                lane.midi_overrides.push("external:a2j".parse().unwrap());
            }
        });
        run(&graph, &provider, true);
        assert_eq!(graph.inbound(&input), vec![keys]);

        provider.update(|s| {
            if let Some(lane) = s.lane_mut(TrackIndex::new(0), SlotIndex::new(0)) {
                lane.midi_overrides.clear();
            }
        });
        assert!(run(&graph, &provider, true).is_completed());
        assert_eq!(graph.inbound(&input), vec![PortId::new("MidiBus", "ch1_out")]);
    }

    #[test]
    fn stray_engine_sources_are_dropped() {
        let (graph, provider) = engine_with_bus();
        let input = PortId::new("fluidsynth", "midi_in");
        let stray = midi_out(&graph, "vmpk", "out");
        graph.connect_now(stray, input.clone()).unwrap();
        graph.connect_now(PortId::new("MidiBus", "main_out"), input.clone()).unwrap();

        run(&graph, &provider, true);
        assert_eq!(graph.inbound(&input), vec![PortId::new("MidiBus", "ch1_out")]);
    }

    #[test]
    fn unplugged_override_device_leaves_no_input() {
        let (graph, provider) = engine_with_bus();
        let input = PortId::new("fluidsynth", "midi_in");
        graph.connect_now(PortId::new("MidiBus", "ch1_out"), input.clone()).unwrap();
        provider.update(|s| {
            if let Some(lane) = s.lane_mut(TrackIndex::new(2), SlotIndex::new(1)) {
                lane.synth = Some(MidiChannel::new(1));
                lane.midi_overrides.push("external:deviceA".parse().unwrap());
            }
        });

        let outcome = run(&graph, &provider, true);
        assert!(graph.inbound(&input).is_empty());
        let report = outcome.report().unwrap();
        assert_eq!(report.inconsistencies().count(), 1);
    }

    #[test]
    fn feedback_and_main_out_follow_allow_lists() {
        let (graph, provider) = engine_with_bus();
        let synth = PortId::new("system", "midi_playback_1");
        let ctrl = PortId::new("system", "midi_playback_2");
        graph.add_port(
            Port::new(synth.clone(), PortDirection::Input, PortKind::Midi, true)
                .with_alias("alsa_pcm:Synth-MIDI-1-in-x-Synth"),
        );
        graph.add_port(
            Port::new(ctrl.clone(), PortDirection::Input, PortKind::Midi, true)
                .with_alias("alsa_pcm:Ctrl-MIDI-1-in-x-Ctrl"),
        );
        provider.update(|s| {
            s.midi_ports.enabled_out.push("Synth".into());
            s.midi_ports.enabled_feedback.push("Ctrl".into());
        });

        run(&graph, &provider, true);
        assert_eq!(graph.inbound(&synth), vec![PortId::new("MidiBus", "main_out")]);
        assert_eq!(graph.inbound(&ctrl), vec![PortId::new("MidiBus", "feedback_out")]);
    }

    #[test]
    fn track_external_out_uses_track_channel() {
        let (graph, provider) = engine_with_bus();
        let device = PortId::new("usbmidi", "in");
        graph.add_physical(device.clone(), PortDirection::Input, PortKind::Midi);
        provider.update(|s| s.tracks[3].external_midi_out = Some("usbmidi".into()));

        run(&graph, &provider, true);
        assert_eq!(graph.inbound(&device), vec![PortId::new("MidiBus", "ch3_out")]);
    }

    #[test]
    fn network_bridge_is_wired_both_ways() {
        let (graph, provider) = engine_with_bus();
        let net_src = midi_out(&graph, "QmidiNet", "out_1");
        let net_sink = midi_in(&graph, "QmidiNet", "in_1");
        run(&graph, &provider, true);
        assert!(graph.has_edge(&net_src, &PortId::new("MidiBus", "net_in")));
        assert!(graph.has_edge(&PortId::new("MidiBus", "net_out"), &net_sink));
    }

    #[test]
    fn unchanged_endpoints_skip_unforced_pass() {
        let (graph, provider) = engine_with_bus();
        let mut midi = MidiReconciler::new();
        let config = Config::default();
        assert!(midi.reconcile(&graph, &provider, &config, false).unwrap().is_completed());
        graph.clear_operations();

        let outcome = midi.reconcile(&graph, &provider, &config, false).unwrap();
        assert_eq!(outcome, PassOutcome::Skipped(SkipReason::FingerprintUnchanged));
        assert_eq!(graph.port_queries(), 1);
        assert_eq!(graph.connection_queries(), 0);
    }

    #[test]
    fn missing_engine_is_transient() {
        let graph = MemoryGraph::new();
        bus(&graph);
        let mut state = RoutingState::new();
        state.engines.push(SynthEngine::new("late", MidiChannel::new(0)));
        let outcome = run(&graph, &SharedRoutingState::new(state), true);
        assert!(outcome.report().is_some_and(PassReport::has_transient));
    }

    #[test]
    fn query_failure_aborts_without_commit() {
        let (graph, provider) = engine_with_bus();
        graph.fail_connections_for(PortId::new("MidiBus", "ch1_out"));
        let result = MidiReconciler::new().reconcile(&graph, &provider, &Config::default(), true);
        assert!(matches!(result, Err(ReconcileError::Query(_))));
        assert_eq!(graph.batches(), 0);
    }
}
