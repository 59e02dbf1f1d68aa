//! # autopatch-types
//!
//! Shared type definitions for the autoconnect reconciler.
//! This crate holds port identities, edges, the override source vocabulary and
//! the routing snapshot the host application hands to the reconciler. It has no
//! knowledge of any audio server.

mod domain;
mod passthrough;
mod port;
pub mod routing;
pub mod source;

pub use domain::Domain;
pub use passthrough::{
    PassthroughNode, PassthroughPort, FX_PASSTHROUGH_CLIENT, SYNTH_PASSTHROUGH_CLIENT,
    TRACK_PASSTHROUGH_CLIENT,
};
pub use port::{Edge, Port, PortDirection, PortId, PortIdError, PortKind};
pub use routing::*;
pub use source::{Channel, SlotKind, SourceParseError, SourceSpec};

/// Number of tracks a song exposes.
pub const TRACK_COUNT: usize = 10;

/// Number of parallel lanes (sound slots) per track.
pub const LANE_COUNT: usize = 5;

/// Number of serial FX slots per track.
pub const FX_SLOT_COUNT: usize = 5;

/// Number of MIDI channels on the shared multi-channel bus.
pub const MIDI_CHANNEL_COUNT: usize = 16;

/// Number of global FX slots fed by the per-lane wet sends.
pub const GLOBAL_FX_COUNT: usize = 2;

/// Index of a track (0-based).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
pub struct TrackIndex(u8);

impl TrackIndex {
    pub fn new(index: u8) -> Self {
        Self(index)
    }
    pub fn get(self) -> u8 {
        self.0
    }
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for TrackIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Index of a lane or an FX slot within a track (0-based).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
pub struct SlotIndex(u8);

impl SlotIndex {
    pub fn new(index: u8) -> Self {
        Self(index)
    }
    pub fn get(self) -> u8 {
        self.0
    }
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for SlotIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A MIDI channel on the shared bus. Always in `0..MIDI_CHANNEL_COUNT`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
pub struct MidiChannel(u8);

impl MidiChannel {
    /// Create a MidiChannel. Panics if `channel >= MIDI_CHANNEL_COUNT`.
    pub fn new(channel: u8) -> Self {
        assert!(
            (channel as usize) < MIDI_CHANNEL_COUNT,
            "MIDI channel {} out of range",
            channel
        );
        Self(channel)
    }

    /// Checked constructor for values coming from outside the process.
    pub fn try_new(channel: u8) -> Option<Self> {
        ((channel as usize) < MIDI_CHANNEL_COUNT).then_some(Self(channel))
    }

    pub fn get(self) -> u8 {
        self.0
    }

    /// All channels in ascending order.
    pub fn all() -> impl Iterator<Item = MidiChannel> {
        (0..MIDI_CHANNEL_COUNT as u8).map(MidiChannel)
    }
}

impl std::fmt::Display for MidiChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
