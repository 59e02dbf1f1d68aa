//! Override source resolution.
//!
//! Every `SourceSpec` goes through one dispatch per domain. A resolution
//! that yields no port is reported by the caller as a configuration
//! inconsistency; `no-input` is the only source that may legitimately
//! resolve to nothing.

use std::collections::BTreeSet;

use autopatch_graph::{PortDirectory, PortFilter};
use autopatch_types::{
    Channel, MidiChannel, PassthroughNode, PassthroughPort, PortDirection, PortId, PortKind,
    RoutingState, SlotIndex, SlotKind, SourceSpec, TrackIndex,
};

use crate::config::Config;

/// Sources for the left and right inputs of a stereo destination.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StereoFeed {
    pub left: Vec<PortId>,
    pub right: Vec<PortId>,
}

impl StereoFeed {
    pub fn is_empty(&self) -> bool {
        self.left.is_empty() && self.right.is_empty()
    }

    /// Route a left/right source pair according to the channel selection.
    pub fn select([left, right]: [PortId; 2], channel: Channel) -> Self {
        match channel {
            Channel::Left => Self {
                left: vec![left.clone()],
                right: vec![left],
            },
            Channel::Right => Self {
                left: vec![right.clone()],
                right: vec![right],
            },
            Channel::Both => Self {
                left: vec![left],
                right: vec![right],
            },
        }
    }

    pub fn extend(&mut self, other: StereoFeed) {
        for port in other.left {
            if !self.left.contains(&port) {
                self.left.push(port);
            }
        }
        for port in other.right {
            if !self.right.contains(&port) {
                self.right.push(port);
            }
        }
    }
}

/// First two ports as a stereo pair; a single port serves both sides.
pub(crate) fn stereo_pair(ports: Vec<PortId>) -> Option<[PortId; 2]> {
    let mut ports = ports.into_iter();
    let left = ports.next()?;
    let right = ports.next().unwrap_or_else(|| left.clone());
    Some([left, right])
}

pub(crate) fn meter_port(config: &Config, track: TrackIndex, name: &str) -> PortId {
    PortId::new(config.clients().audio_levels.as_str(), format!("T{}-{}", track, name))
}

pub(crate) fn bus_port(config: &Config, name: &str) -> PortId {
    PortId::new(config.clients().midi_bus.as_str(), name)
}

pub(crate) fn bus_channel_port(config: &Config, channel: MidiChannel) -> PortId {
    bus_port(config, &format!("ch{}_out", channel))
}

pub(crate) struct Resolver<'a> {
    pub directory: &'a PortDirectory,
    pub state: &'a RoutingState,
    pub config: &'a Config,
    /// Synth passthrough channels that exist after this pass.
    pub synth_live: BTreeSet<MidiChannel>,
    /// Track lanes whose passthrough exists after this pass.
    pub lanes_live: BTreeSet<(TrackIndex, SlotIndex)>,
}

impl<'a> Resolver<'a> {
    pub fn new(directory: &'a PortDirectory, state: &'a RoutingState, config: &'a Config) -> Self {
        Self {
            directory,
            state,
            config,
            synth_live: BTreeSet::new(),
            lanes_live: BTreeSet::new(),
        }
    }

    fn present(&self, port: PortId) -> Option<PortId> {
        self.directory.contains(&port).then_some(port)
    }

    fn present_pair(&self, [left, right]: [PortId; 2]) -> Option<[PortId; 2]> {
        Some([self.present(left)?, self.present(right)?])
    }

    /// Physical ports of a hardware device, matched by client or alias id.
    pub fn device_ports(&self, device: &str, kind: PortKind) -> Vec<PortId> {
        let client = self.state.device_client(device);
        let filter = PortFilter::new()
            .kind(kind)
            .direction(PortDirection::Output)
            .physical(true);
        self.directory
            .query(&filter)
            .filter(|port| port.id.client() == client || port.alias_id() == device)
            .filter(|port| {
                kind != PortKind::Audio
                    || !self
                        .state
                        .audio_ports
                        .disabled_capture
                        .contains(&port.id.to_string())
            })
            .map(|port| port.id.clone())
            .collect()
    }

    /// MIDI input ports of an engine, skipping ignored ports.
    pub fn engine_midi_inputs(&self, client: &str) -> Vec<PortId> {
        self.directory
            .client_ports(client, PortKind::Midi, PortDirection::Input)
            .into_iter()
            .filter(|port| !self.config.is_ignored_midi_input(port))
            .collect()
    }

    /// The engine MIDI input fed by the bus; engines expose one.
    pub fn engine_midi_input(&self, client: &str) -> Option<PortId> {
        self.engine_midi_inputs(client).into_iter().next()
    }

    pub fn engine_midi_outputs(&self, client: &str) -> Vec<PortId> {
        self.directory
            .client_ports(client, PortKind::Midi, PortDirection::Output)
    }

    /// Bus channel of a lane's synth.
    fn lane_synth(&self, track: TrackIndex, lane: SlotIndex) -> Option<MidiChannel> {
        self.state.lane(track, lane).and_then(|lane| lane.synth)
    }

    // ─── MIDI ───────────────────────────────────────────────────────

    pub fn midi_sources(&self, spec: &SourceSpec) -> Vec<PortId> {
        match spec {
            SourceSpec::NoInput => Vec::new(),
            SourceSpec::External { device, .. } => self.device_ports(device, PortKind::Midi),
            SourceSpec::Track { track, .. } => self
                .state
                .track(*track)
                .and_then(|t| self.present(bus_channel_port(self.config, t.midi_channel)))
                .into_iter()
                .collect(),
            SourceSpec::CurrentTrackMirror => self
                .present(bus_port(self.config, "current_out"))
                .into_iter()
                .collect(),
            SourceSpec::InternalMaster { .. } => self
                .present(bus_port(self.config, "main_out"))
                .into_iter()
                .collect(),
            SourceSpec::Slot {
                kind: SlotKind::Synth,
                track,
                slot,
                ..
            } => self
                .lane_synth(*track, *slot)
                .and_then(|channel| self.state.engine_for_channel(channel))
                .map(|engine| self.engine_midi_outputs(&engine.client))
                .unwrap_or_default(),
            // Samplers, loop players and effects emit no MIDI.
            SourceSpec::Slot { .. } => Vec::new(),
        }
    }

    // ─── Audio ──────────────────────────────────────────────────────

    pub fn audio_sources(&self, spec: &SourceSpec) -> StereoFeed {
        let channel = spec.channel();
        let pair = match spec {
            SourceSpec::NoInput => None,
            SourceSpec::External { device, .. } => {
                stereo_pair(self.device_ports(device, PortKind::Audio))
            }
            SourceSpec::Track { track, lane: None } => self.meter_output(*track),
            SourceSpec::Track {
                track,
                lane: Some(lane),
            } => self.lane_output(*track, *lane),
            SourceSpec::CurrentTrackMirror => self.meter_output(self.state.current_track),
            SourceSpec::InternalMaster { .. } => {
                let client = self.config.clients().global_playback.as_str();
                self.present_pair([
                    PortId::new(client, "OutputLeft"),
                    PortId::new(client, "OutputRight"),
                ])
            }
            SourceSpec::Slot {
                kind, track, slot, ..
            } => self.slot_output(*kind, *track, *slot),
        };
        pair.map(|pair| StereoFeed::select(pair, channel))
            .unwrap_or_default()
    }

    fn meter_output(&self, track: TrackIndex) -> Option<[PortId; 2]> {
        self.state.track(track)?;
        self.present_pair([
            meter_port(self.config, track, "OutputLeft"),
            meter_port(self.config, track, "OutputRight"),
        ])
    }

    fn lane_output(&self, track: TrackIndex, lane: SlotIndex) -> Option<[PortId; 2]> {
        self.lanes_live.contains(&(track, lane)).then(|| {
            PassthroughNode::TrackLane { track, lane }
                .pair(PassthroughPort::DryOutLeft, PassthroughPort::DryOutRight)
        })
    }

    pub fn synth_output(&self, channel: MidiChannel) -> Option<[PortId; 2]> {
        self.synth_live.contains(&channel).then(|| {
            PassthroughNode::Synth { channel }
                .pair(PassthroughPort::DryOutLeft, PassthroughPort::DryOutRight)
        })
    }

    pub fn player_output(&self, client: &str, track: TrackIndex, lane: SlotIndex) -> Option<[PortId; 2]> {
        self.present_pair([
            PortId::new(client, format!("T{}-L{}-OutputLeft", track, lane)),
            PortId::new(client, format!("T{}-L{}-OutputRight", track, lane)),
        ])
    }

    fn slot_output(&self, kind: SlotKind, track: TrackIndex, slot: SlotIndex) -> Option<[PortId; 2]> {
        match kind {
            SlotKind::Synth => self.synth_output(self.lane_synth(track, slot)?),
            SlotKind::Sample => {
                self.player_output(self.config.clients().sampler.as_str(), track, slot)
            }
            SlotKind::Loop => {
                self.player_output(self.config.clients().loop_player.as_str(), track, slot)
            }
            SlotKind::Fx => {
                self.state.track(track)?.fx_slot(slot)?;
                Some(
                    PassthroughNode::FxSlot { track, slot }
                        .pair(PassthroughPort::DryOutLeft, PassthroughPort::DryOutRight),
                )
            }
        }
    }
}
