//! Dynamically created mixing nodes and their fixed port layouts.

use serde::{Deserialize, Serialize};

use crate::{MidiChannel, PortDirection, PortId, SlotIndex, TrackIndex};

pub const TRACK_PASSTHROUGH_CLIENT: &str = "TrackPassthrough";
pub const FX_PASSTHROUGH_CLIENT: &str = "FXPassthrough";
pub const SYNTH_PASSTHROUGH_CLIENT: &str = "SynthPassthrough";

/// A passthrough node. Its ports exist only while the node exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PassthroughNode {
    TrackLane { track: TrackIndex, lane: SlotIndex },
    FxSlot { track: TrackIndex, slot: SlotIndex },
    Synth { channel: MidiChannel },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PassthroughPort {
    InputLeft,
    InputRight,
    WetInLeft,
    WetInRight,
    DryOutLeft,
    DryOutRight,
    WetOutFx1Left,
    WetOutFx1Right,
    WetOutFx2Left,
    WetOutFx2Right,
    SidechainInLeft,
    SidechainInRight,
}

impl PassthroughPort {
    pub fn name(self) -> &'static str {
        match self {
            PassthroughPort::InputLeft => "InputLeft",
            PassthroughPort::InputRight => "InputRight",
            PassthroughPort::WetInLeft => "WetInLeft",
            PassthroughPort::WetInRight => "WetInRight",
            PassthroughPort::DryOutLeft => "DryOutLeft",
            PassthroughPort::DryOutRight => "DryOutRight",
            PassthroughPort::WetOutFx1Left => "WetOutFx1Left",
            PassthroughPort::WetOutFx1Right => "WetOutFx1Right",
            PassthroughPort::WetOutFx2Left => "WetOutFx2Left",
            PassthroughPort::WetOutFx2Right => "WetOutFx2Right",
            PassthroughPort::SidechainInLeft => "SidechainInLeft",
            PassthroughPort::SidechainInRight => "SidechainInRight",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        ALL_PORTS.iter().copied().find(|port| port.name() == name)
    }

    pub fn direction(self) -> PortDirection {
        match self {
            PassthroughPort::DryOutLeft
            | PassthroughPort::DryOutRight
            | PassthroughPort::WetOutFx1Left
            | PassthroughPort::WetOutFx1Right
            | PassthroughPort::WetOutFx2Left
            | PassthroughPort::WetOutFx2Right => PortDirection::Output,
            _ => PortDirection::Input,
        }
    }

    /// Side-chain inputs are wired by the engines themselves.
    pub fn is_side_chain(self) -> bool {
        matches!(
            self,
            PassthroughPort::SidechainInLeft | PassthroughPort::SidechainInRight
        )
    }
}

const ALL_PORTS: [PassthroughPort; 12] = [
    PassthroughPort::InputLeft,
    PassthroughPort::InputRight,
    PassthroughPort::WetInLeft,
    PassthroughPort::WetInRight,
    PassthroughPort::DryOutLeft,
    PassthroughPort::DryOutRight,
    PassthroughPort::WetOutFx1Left,
    PassthroughPort::WetOutFx1Right,
    PassthroughPort::WetOutFx2Left,
    PassthroughPort::WetOutFx2Right,
    PassthroughPort::SidechainInLeft,
    PassthroughPort::SidechainInRight,
];

const TRACK_LANE_PORTS: &[PassthroughPort] = &[
    PassthroughPort::InputLeft,
    PassthroughPort::InputRight,
    PassthroughPort::DryOutLeft,
    PassthroughPort::DryOutRight,
    PassthroughPort::WetOutFx1Left,
    PassthroughPort::WetOutFx1Right,
    PassthroughPort::WetOutFx2Left,
    PassthroughPort::WetOutFx2Right,
    PassthroughPort::SidechainInLeft,
    PassthroughPort::SidechainInRight,
];

const FX_SLOT_PORTS: &[PassthroughPort] = &[
    PassthroughPort::InputLeft,
    PassthroughPort::InputRight,
    PassthroughPort::WetInLeft,
    PassthroughPort::WetInRight,
    PassthroughPort::DryOutLeft,
    PassthroughPort::DryOutRight,
    PassthroughPort::SidechainInLeft,
    PassthroughPort::SidechainInRight,
];

const SYNTH_PORTS: &[PassthroughPort] = &[
    PassthroughPort::InputLeft,
    PassthroughPort::InputRight,
    PassthroughPort::DryOutLeft,
    PassthroughPort::DryOutRight,
];

impl PassthroughNode {
    pub fn client(self) -> &'static str {
        match self {
            PassthroughNode::TrackLane { .. } => TRACK_PASSTHROUGH_CLIENT,
            PassthroughNode::FxSlot { .. } => FX_PASSTHROUGH_CLIENT,
            PassthroughNode::Synth { .. } => SYNTH_PASSTHROUGH_CLIENT,
        }
    }

    /// Port name prefix shared by all of this node's ports.
    fn prefix(self) -> String {
        match self {
            PassthroughNode::TrackLane { track, lane } => format!("T{}-L{}", track, lane),
            PassthroughNode::FxSlot { track, slot } => format!("T{}-S{}", track, slot),
            PassthroughNode::Synth { channel } => format!("Ch{}", channel),
        }
    }

    /// The port layout this kind of node exposes.
    pub fn layout(self) -> &'static [PassthroughPort] {
        match self {
            PassthroughNode::TrackLane { .. } => TRACK_LANE_PORTS,
            PassthroughNode::FxSlot { .. } => FX_SLOT_PORTS,
            PassthroughNode::Synth { .. } => SYNTH_PORTS,
        }
    }

    pub fn has_port(self, port: PassthroughPort) -> bool {
        self.layout().contains(&port)
    }

    pub fn port(self, port: PassthroughPort) -> PortId {
        PortId::new(self.client(), format!("{}-{}", self.prefix(), port.name()))
    }

    /// Every port of the node with its direction, in layout order.
    pub fn ports(self) -> Vec<(PortId, PortDirection)> {
        self.layout()
            .iter()
            .map(|&port| (self.port(port), port.direction()))
            .collect()
    }

    /// Left and right ports of a stereo pair.
    pub fn pair(self, left: PassthroughPort, right: PassthroughPort) -> [PortId; 2] {
        [self.port(left), self.port(right)]
    }

    /// Recognise a port name as belonging to a passthrough node.
    pub fn parse_port(id: &PortId) -> Option<(PassthroughNode, PassthroughPort)> {
        let (prefix, name) = id.port().split_once('-').and_then(|(head, rest)| {
            // TrackLane and FxSlot prefixes have two dash-separated fields.
            match id.client() {
                TRACK_PASSTHROUGH_CLIENT | FX_PASSTHROUGH_CLIENT => {
                    let (second, name) = rest.split_once('-')?;
                    Some((format!("{}-{}", head, second), name))
                }
                _ => Some((head.to_string(), rest)),
            }
        })?;
        let port = PassthroughPort::from_name(name)?;
        let node = match id.client() {
            TRACK_PASSTHROUGH_CLIENT => {
                let (track, lane) = parse_pair(&prefix, 'T', 'L')?;
                PassthroughNode::TrackLane {
                    track: TrackIndex::new(track),
                    lane: SlotIndex::new(lane),
                }
            }
            FX_PASSTHROUGH_CLIENT => {
                let (track, slot) = parse_pair(&prefix, 'T', 'S')?;
                PassthroughNode::FxSlot {
                    track: TrackIndex::new(track),
                    slot: SlotIndex::new(slot),
                }
            }
            SYNTH_PASSTHROUGH_CLIENT => {
                let channel = prefix.strip_prefix("Ch")?.parse().ok()?;
                PassthroughNode::Synth {
                    channel: MidiChannel::try_new(channel)?,
                }
            }
            _ => return None,
        };
        node.has_port(port).then_some((node, port))
    }
}

fn parse_pair(prefix: &str, first: char, second: char) -> Option<(u8, u8)> {
    let (a, b) = prefix.split_once('-')?;
    let a = a.strip_prefix(first)?.parse().ok()?;
    let b = b.strip_prefix(second)?.parse().ok()?;
    Some((a, b))
}

impl std::fmt::Display for PassthroughNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.client(), self.prefix())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_names_follow_layout() {
        let node = PassthroughNode::FxSlot {
            track: TrackIndex::new(3),
            slot: SlotIndex::new(1),
        };
        assert_eq!(
            node.port(PassthroughPort::WetInLeft).to_string(),
            "FXPassthrough:T3-S1-WetInLeft"
        );
        assert_eq!(node.ports().len(), 8);
        assert!(!node.has_port(PassthroughPort::WetOutFx1Left));
    }

    #[test]
    fn parse_port_recognises_every_layout() {
        let nodes = [
            PassthroughNode::TrackLane {
                track: TrackIndex::new(9),
                lane: SlotIndex::new(4),
            },
            PassthroughNode::FxSlot {
                track: TrackIndex::new(0),
                slot: SlotIndex::new(2),
            },
            PassthroughNode::Synth {
                channel: MidiChannel::new(15),
            },
        ];
        for node in nodes {
            for &port in node.layout() {
                assert_eq!(PassthroughNode::parse_port(&node.port(port)), Some((node, port)));
            }
        }
    }

    #[test]
    fn parse_port_rejects_foreign_names() {
        assert!(PassthroughNode::parse_port(&PortId::new("system", "playback_1")).is_none());
        assert!(PassthroughNode::parse_port(&PortId::new("SynthPassthrough", "Ch16-InputLeft")).is_none());
        assert!(
            PassthroughNode::parse_port(&PortId::new("SynthPassthrough", "Ch1-WetInLeft")).is_none()
        );
    }

    #[test]
    fn side_chain_ports_are_inputs() {
        assert!(PassthroughPort::SidechainInLeft.is_side_chain());
        assert_eq!(PassthroughPort::SidechainInLeft.direction(), PortDirection::Input);
        assert_eq!(PassthroughPort::DryOutRight.direction(), PortDirection::Output);
    }
}
