//! Per-track FX chain layout.

use autopatch_types::{RoutingStyle, SlotIndex, TrackState};

/// One serial signal path: lanes mixed in, then FX slots in order, then the
/// track meter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chain {
    pub lanes: Vec<SlotIndex>,
    pub fx: Vec<SlotIndex>,
}

/// Lay out a track's chains.
///
/// `lanes_with_input` must be ascending. Standard routing yields one chain
/// over every occupied FX slot, even when no lane has input, so occupied FX
/// nodes stay wired. One-to-one routing yields a chain per lane with input,
/// through the FX slot of the same index when it is occupied.
pub fn build_chains(track: &TrackState, lanes_with_input: &[SlotIndex]) -> Vec<Chain> {
    match track.routing_style {
        RoutingStyle::Standard => vec![Chain {
            lanes: lanes_with_input.to_vec(),
            fx: track.occupied_fx().map(|(slot, _)| slot).collect(),
        }],
        RoutingStyle::OneToOne => lanes_with_input
            .iter()
            .map(|&lane| Chain {
                lanes: vec![lane],
                fx: track.fx_slot(lane).map(|_| lane).into_iter().collect(),
            })
            .collect(),
    }
}
