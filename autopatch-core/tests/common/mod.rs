#![allow(dead_code)]
//! Test rig for autopatch-core integration tests.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use autopatch_core::{Autoconnect, Config, SharedRoutingState};
use autopatch_graph::MemoryGraph;
use autopatch_types::{
    MidiChannel, PassthroughNode, PortDirection, PortId, PortKind, RoutingState, SlotIndex,
    SynthEngine, TrackIndex, TRACK_COUNT,
};

/// A graph with the system, bus, meter and global playback ports a running
/// workstation exposes, and the routing state that drives it.
pub struct Rig {
    pub graph: Arc<MemoryGraph>,
    pub state: SharedRoutingState,
}

impl Rig {
    pub fn new() -> Self {
        let graph = Arc::new(MemoryGraph::new());
        for port in ["capture_1", "capture_2"] {
            graph.add_physical(PortId::new("system", port), PortDirection::Output, PortKind::Audio);
        }
        for port in ["playback_1", "playback_2"] {
            graph.add_physical(PortId::new("system", port), PortDirection::Input, PortKind::Audio);
        }
        graph.add_physical(PortId::new("system", "midi_capture_1"), PortDirection::Output, PortKind::Midi);

        for name in ["main_in", "net_in"] {
            graph.add(PortId::new("MidiBus", name), PortDirection::Input, PortKind::Midi);
        }
        for name in ["main_out", "net_out", "feedback_out", "current_out"] {
            graph.add(PortId::new("MidiBus", name), PortDirection::Output, PortKind::Midi);
        }
        for channel in MidiChannel::all() {
            graph.add(
                PortId::new("MidiBus", format!("ch{}_out", channel)),
                PortDirection::Output,
                PortKind::Midi,
            );
        }

        for side in ["Left", "Right"] {
            audio_in(&graph, "GlobalPlayback", &format!("Input{}", side));
            audio_out(&graph, "GlobalPlayback", &format!("Output{}", side));
            for track in 0..TRACK_COUNT {
                audio_in(&graph, "AudioLevels", &format!("T{}-Input{}", track, side));
                audio_out(&graph, "AudioLevels", &format!("T{}-Output{}", track, side));
            }
        }

        Self {
            graph,
            state: SharedRoutingState::new(RoutingState::new()),
        }
    }

    /// A synth engine with a MIDI input and stereo output, on `channel`.
    pub fn synth(&self, client: &str, channel: u8) -> &Self {
        self.graph
            .add(PortId::new(client, "midi_in"), PortDirection::Input, PortKind::Midi);
        audio_out(&self.graph, client, "out_L");
        audio_out(&self.graph, client, "out_R");
        self.state
            .update(|s| s.engines.push(SynthEngine::new(client, MidiChannel::new(channel))));
        self
    }

    /// An effect engine with a stereo input and output.
    pub fn fx_engine(&self, client: &str) -> &Self {
        audio_in(&self.graph, client, "in_L");
        audio_in(&self.graph, client, "in_R");
        audio_out(&self.graph, client, "out_L");
        audio_out(&self.graph, client, "out_R");
        self
    }

    /// Per-lane sampler outputs for `track`.
    pub fn sampler_lanes(&self, track: u8) -> &Self {
        for lane in 0..autopatch_types::LANE_COUNT {
            for side in ["Left", "Right"] {
                audio_out(&self.graph, "SamplerSynth", &format!("T{}-L{}-Output{}", track, lane, side));
            }
        }
        self
    }

    pub fn handle(&self) -> Autoconnect {
        self.handle_with(Config::default())
    }

    pub fn handle_with(&self, config: Config) -> Autoconnect {
        Autoconnect::new(self.graph.clone(), Arc::new(self.state.clone()), config)
    }
}

pub fn audio_in(graph: &MemoryGraph, client: &str, port: &str) -> PortId {
    let id = PortId::new(client, port);
    graph.add(id.clone(), PortDirection::Input, PortKind::Audio);
    id
}

pub fn audio_out(graph: &MemoryGraph, client: &str, port: &str) -> PortId {
    let id = PortId::new(client, port);
    graph.add(id.clone(), PortDirection::Output, PortKind::Audio);
    id
}

pub fn lane_node(track: u8, lane: u8) -> PassthroughNode {
    PassthroughNode::TrackLane {
        track: TrackIndex::new(track),
        lane: SlotIndex::new(lane),
    }
}

pub fn fx_node(track: u8, slot: u8) -> PassthroughNode {
    PassthroughNode::FxSlot {
        track: TrackIndex::new(track),
        slot: SlotIndex::new(slot),
    }
}

/// Poll `condition` until it holds or five seconds pass.
pub fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}
