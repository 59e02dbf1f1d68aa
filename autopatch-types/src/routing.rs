//! Desired routing snapshot.
//!
//! The host application owns the song model; once per pass the reconciler
//! asks it for a [`RoutingState`] and derives every edge from that value
//! alone.

use serde::{Deserialize, Serialize};

use crate::{
    Channel, MidiChannel, SlotIndex, SourceSpec, TrackIndex, FX_SLOT_COUNT, LANE_COUNT,
    MIDI_CHANNEL_COUNT, TRACK_COUNT,
};

/// How a track's lanes share its FX slots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoutingStyle {
    /// All lanes feed one serial chain through every occupied FX slot.
    #[default]
    Standard,
    /// Lane `n` runs through FX slot `n` only.
    OneToOne,
}

/// A running sound engine addressed by its graph client name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynthEngine {
    pub client: String,
    /// Bus channels the engine listens on. `None` listens on everything
    /// through the bus main output.
    #[serde(default)]
    pub channels: Option<Vec<MidiChannel>>,
}

impl SynthEngine {
    pub fn new(client: impl Into<String>, channel: MidiChannel) -> Self {
        Self {
            client: client.into(),
            channels: Some(vec![channel]),
        }
    }

    pub fn omni(client: impl Into<String>) -> Self {
        Self {
            client: client.into(),
            channels: None,
        }
    }

    pub fn is_omni(&self) -> bool {
        self.channels.is_none()
    }

    pub fn listens_on(&self, channel: MidiChannel) -> bool {
        self.channels
            .as_ref()
            .is_some_and(|channels| channels.contains(&channel))
    }
}

/// A MIDI processing tool in a track's chain (arpeggiator, chord generator).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MidiTool {
    pub client: String,
    /// Engine clients the tool's output should reach.
    #[serde(default)]
    pub targets: Vec<String>,
}

/// An effect engine loaded into a track FX slot or a global FX slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FxSlot {
    pub engine: String,
}

impl FxSlot {
    pub fn new(engine: impl Into<String>) -> Self {
        Self {
            engine: engine.into(),
        }
    }
}

/// One parallel lane of a track.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaneState {
    /// Bus channel of the synth playing in this lane.
    #[serde(default)]
    pub synth: Option<MidiChannel>,
    /// A sample is loaded into the lane's sampler slot.
    #[serde(default)]
    pub sample: bool,
    /// A loop clip is loaded into the lane's loop player.
    #[serde(default)]
    pub loop_clip: bool,
    /// Record from the system capture ports.
    #[serde(default)]
    pub capture: Option<Channel>,
    /// Explicit audio sources. When non-empty they replace every implicit one.
    #[serde(default)]
    pub audio_overrides: Vec<SourceSpec>,
    /// Explicit MIDI sources for the lane's synth.
    #[serde(default)]
    pub midi_overrides: Vec<SourceSpec>,
}

impl LaneState {
    pub fn is_empty(&self) -> bool {
        self.synth.is_none()
            && !self.sample
            && !self.loop_clip
            && self.capture.is_none()
            && self.audio_overrides.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackState {
    #[serde(default)]
    pub routing_style: RoutingStyle,
    /// Bus channel carrying this track's notes.
    pub midi_channel: MidiChannel,
    pub lanes: Vec<LaneState>,
    pub fx_slots: Vec<Option<FxSlot>>,
    #[serde(default)]
    pub midi_tools: Vec<MidiTool>,
    /// Hardware device receiving this track's notes.
    #[serde(default)]
    pub external_midi_out: Option<String>,
}

impl TrackState {
    pub fn new(midi_channel: MidiChannel) -> Self {
        Self {
            routing_style: RoutingStyle::default(),
            midi_channel,
            lanes: vec![LaneState::default(); LANE_COUNT],
            fx_slots: vec![None; FX_SLOT_COUNT],
            midi_tools: Vec::new(),
            external_midi_out: None,
        }
    }

    pub fn lane(&self, lane: SlotIndex) -> Option<&LaneState> {
        self.lanes.get(lane.as_usize())
    }

    pub fn lane_mut(&mut self, lane: SlotIndex) -> Option<&mut LaneState> {
        self.lanes.get_mut(lane.as_usize())
    }

    /// Lanes with their indices, ascending. Lanes past the last addressable
    /// index are not visited.
    pub fn indexed_lanes(&self) -> impl Iterator<Item = (SlotIndex, &LaneState)> {
        self.lanes
            .iter()
            .enumerate()
            .map_while(|(i, lane)| u8::try_from(i).ok().map(|i| (SlotIndex::new(i), lane)))
    }

    pub fn fx_slot(&self, slot: SlotIndex) -> Option<&FxSlot> {
        self.fx_slots.get(slot.as_usize()).and_then(Option::as_ref)
    }

    /// Occupied FX slots in ascending order.
    pub fn occupied_fx(&self) -> impl Iterator<Item = (SlotIndex, &FxSlot)> {
        self.fx_slots
            .iter()
            .enumerate()
            .map_while(|(i, slot)| u8::try_from(i).ok().map(|i| (SlotIndex::new(i), slot)))
            .filter_map(|(slot, fx)| fx.as_ref().map(|fx| (slot, fx)))
    }
}

/// Maps a device name used in `external:` sources to its graph client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareDevice {
    pub name: String,
    pub client: String,
}

/// Hardware MIDI allow/deny lists, keyed by port alias id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MidiPortPolicy {
    /// Capture ports that must not feed the bus.
    #[serde(default)]
    pub disabled_in: Vec<String>,
    /// Playback ports that receive the bus main output.
    #[serde(default)]
    pub enabled_out: Vec<String>,
    /// Playback ports that receive controller feedback.
    #[serde(default)]
    pub enabled_feedback: Vec<String>,
}

/// System audio ports excluded from routing, by full port name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioPortPolicy {
    #[serde(default)]
    pub disabled_capture: Vec<String>,
    #[serde(default)]
    pub disabled_playback: Vec<String>,
}

/// The two global FX slots fed by lane wet sends.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalBus {
    pub fx: [Option<FxSlot>; 2],
}

/// Everything the reconciler needs to know about the song, in one value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingState {
    pub boot_complete: bool,
    pub load_in_progress: bool,
    pub current_track: TrackIndex,
    pub tracks: Vec<TrackState>,
    #[serde(default)]
    pub engines: Vec<SynthEngine>,
    #[serde(default)]
    pub devices: Vec<HardwareDevice>,
    #[serde(default)]
    pub midi_ports: MidiPortPolicy,
    #[serde(default)]
    pub audio_ports: AudioPortPolicy,
    #[serde(default)]
    pub global: GlobalBus,
}

impl Default for RoutingState {
    fn default() -> Self {
        Self::new()
    }
}

impl RoutingState {
    /// An empty, booted song: every track on its own bus channel, nothing loaded.
    pub fn new() -> Self {
        let tracks = (0..TRACK_COUNT)
            .map(|t| TrackState::new(MidiChannel::new((t % MIDI_CHANNEL_COUNT) as u8)))
            .collect();
        Self {
            boot_complete: true,
            load_in_progress: false,
            current_track: TrackIndex::default(),
            tracks,
            engines: Vec::new(),
            devices: Vec::new(),
            midi_ports: MidiPortPolicy::default(),
            audio_ports: AudioPortPolicy::default(),
            global: GlobalBus::default(),
        }
    }

    pub fn track(&self, track: TrackIndex) -> Option<&TrackState> {
        self.tracks.get(track.as_usize())
    }

    pub fn track_mut(&mut self, track: TrackIndex) -> Option<&mut TrackState> {
        self.tracks.get_mut(track.as_usize())
    }

    pub fn lane(&self, track: TrackIndex, lane: SlotIndex) -> Option<&LaneState> {
        self.track(track).and_then(|t| t.lane(lane))
    }

    pub fn lane_mut(&mut self, track: TrackIndex, lane: SlotIndex) -> Option<&mut LaneState> {
        self.track_mut(track).and_then(|t| t.lane_mut(lane))
    }

    /// Tracks with their indices, ascending. Tracks past the last
    /// addressable index are not visited.
    pub fn indexed_tracks(&self) -> impl Iterator<Item = (TrackIndex, &TrackState)> {
        self.tracks
            .iter()
            .enumerate()
            .map_while(|(i, track)| u8::try_from(i).ok().map(|i| (TrackIndex::new(i), track)))
    }

    /// First engine listening on `channel`.
    pub fn engine_for_channel(&self, channel: MidiChannel) -> Option<&SynthEngine> {
        self.engines.iter().find(|engine| engine.listens_on(channel))
    }

    pub fn engine(&self, client: &str) -> Option<&SynthEngine> {
        self.engines.iter().find(|engine| engine.client == client)
    }

    /// Graph client for a device name, falling back to the name itself.
    pub fn device_client<'a>(&'a self, name: &'a str) -> &'a str {
        self.devices
            .iter()
            .find(|device| device.name == name)
            .map(|device| device.client.as_str())
            .unwrap_or(name)
    }
}
