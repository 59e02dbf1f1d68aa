//! Override source vocabulary.
//!
//! Routing overrides arrive from the host as short strings (`no-input`,
//! `external:Keystation:left`, `slot:synth:2:0:both`, ...). They are parsed
//! once into [`SourceSpec`] so resolution can match exhaustively.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{SlotIndex, TrackIndex};

/// Stereo side selection for a source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Channel {
    Left,
    Right,
    #[default]
    Both,
}

impl Channel {
    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Left => "left",
            Channel::Right => "right",
            Channel::Both => "both",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "left" => Some(Channel::Left),
            "right" => Some(Channel::Right),
            "both" => Some(Channel::Both),
            _ => None,
        }
    }
}

/// What a `slot:` reference points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SlotKind {
    Synth,
    Sample,
    Loop,
    Fx,
}

impl SlotKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SlotKind::Synth => "synth",
            SlotKind::Sample => "sample",
            SlotKind::Loop => "loop",
            SlotKind::Fx => "fx",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "synth" => Some(SlotKind::Synth),
            "sample" => Some(SlotKind::Sample),
            "loop" => Some(SlotKind::Loop),
            "fx" => Some(SlotKind::Fx),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceParseError {
    #[error("unknown source '{0}'")]
    Unknown(String),
    #[error("source '{0}' names no device")]
    MissingDevice(String),
    #[error("invalid index '{index}' in source '{source_text}'")]
    BadIndex { source_text: String, index: String },
    #[error("invalid channel '{channel}' in source '{source_text}'")]
    BadChannel { source_text: String, channel: String },
    #[error("invalid slot kind '{kind}' in source '{source_text}'")]
    BadSlotKind { source_text: String, kind: String },
    #[error("source '{0}' has the wrong number of fields")]
    FieldCount(String),
}

/// One source a routing override asks for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SourceSpec {
    /// Explicit refusal: no edge, and existing inbound edges are cleared.
    NoInput,
    /// A hardware device's capture ports.
    External { device: String, channel: Channel },
    /// The output of another track, or of one lane of it.
    Track { track: TrackIndex, lane: Option<SlotIndex> },
    /// Whatever track is currently selected in the host.
    CurrentTrackMirror,
    /// The global playback mix.
    InternalMaster { channel: Channel },
    /// A specific slot's output.
    Slot {
        kind: SlotKind,
        track: TrackIndex,
        slot: SlotIndex,
        channel: Channel,
    },
}

impl SourceSpec {
    pub fn is_no_input(&self) -> bool {
        matches!(self, SourceSpec::NoInput)
    }

    /// The stereo side this source asks for. Sources without a side feed both.
    pub fn channel(&self) -> Channel {
        match self {
            SourceSpec::External { channel, .. }
            | SourceSpec::InternalMaster { channel }
            | SourceSpec::Slot { channel, .. } => *channel,
            SourceSpec::NoInput | SourceSpec::Track { .. } | SourceSpec::CurrentTrackMirror => Channel::Both,
        }
    }
}

fn parse_index<T>(text: &str, field: &str, make: fn(u8) -> T) -> Result<T, SourceParseError> {
    field.parse::<u8>().map(make).map_err(|_| SourceParseError::BadIndex {
        source_text: text.to_string(),
        index: field.to_string(),
    })
}

fn parse_channel(text: &str, field: &str) -> Result<Channel, SourceParseError> {
    Channel::parse(field).ok_or_else(|| SourceParseError::BadChannel {
        source_text: text.to_string(),
        channel: field.to_string(),
    })
}

impl FromStr for SourceSpec {
    type Err = SourceParseError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let text = text.trim();
        match text {
            "no-input" => return Ok(SourceSpec::NoInput),
            "current-track-mirror" => return Ok(SourceSpec::CurrentTrackMirror),
            "internal-master" => {
                return Ok(SourceSpec::InternalMaster {
                    channel: Channel::Both,
                })
            }
            _ => {}
        }

        if let Some(rest) = text.strip_prefix("internal-master:") {
            return Ok(SourceSpec::InternalMaster {
                channel: parse_channel(text, rest)?,
            });
        }

        if let Some(rest) = text.strip_prefix("external:") {
            // Device names may themselves contain colons; only a trailing
            // known channel name is split off.
            let (device, channel) = match rest.rsplit_once(':') {
                Some((device, tail)) => match Channel::parse(tail) {
                    Some(channel) => (device, channel),
                    None => (rest, Channel::Both),
                },
                None => (rest, Channel::Both),
            };
            if device.is_empty() {
                return Err(SourceParseError::MissingDevice(text.to_string()));
            }
            return Ok(SourceSpec::External {
                device: device.to_string(),
                channel,
            });
        }

        if let Some(rest) = text.strip_prefix("track:") {
            let fields: Vec<&str> = rest.split(':').collect();
            return match fields.as_slice() {
                [track] => Ok(SourceSpec::Track {
                    track: parse_index(text, track, TrackIndex::new)?,
                    lane: None,
                }),
                [track, lane] => Ok(SourceSpec::Track {
                    track: parse_index(text, track, TrackIndex::new)?,
                    lane: Some(parse_index(text, lane, SlotIndex::new)?),
                }),
                _ => Err(SourceParseError::FieldCount(text.to_string())),
            };
        }

        if let Some(rest) = text.strip_prefix("slot:") {
            let fields: Vec<&str> = rest.split(':').collect();
            let [kind, track, slot, channel] = fields.as_slice() else {
                return Err(SourceParseError::FieldCount(text.to_string()));
            };
            let kind = SlotKind::parse(kind).ok_or_else(|| SourceParseError::BadSlotKind {
                source_text: text.to_string(),
                kind: kind.to_string(),
            })?;
            return Ok(SourceSpec::Slot {
                kind,
                track: parse_index(text, track, TrackIndex::new)?,
                slot: parse_index(text, slot, SlotIndex::new)?,
                channel: parse_channel(text, channel)?,
            });
        }

        Err(SourceParseError::Unknown(text.to_string()))
    }
}

impl std::fmt::Display for SourceSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceSpec::NoInput => f.write_str("no-input"),
            SourceSpec::External { device, channel } => {
                write!(f, "external:{}:{}", device, channel.as_str())
            }
            SourceSpec::Track { track, lane: None } => write!(f, "track:{}", track),
            SourceSpec::Track {
                track,
                lane: Some(lane),
            } => write!(f, "track:{}:{}", track, lane),
            SourceSpec::CurrentTrackMirror => f.write_str("current-track-mirror"),
            SourceSpec::InternalMaster { channel } => {
                write!(f, "internal-master:{}", channel.as_str())
            }
            SourceSpec::Slot {
                kind,
                track,
                slot,
                channel,
            } => write!(
                f,
                "slot:{}:{}:{}:{}",
                kind.as_str(),
                track,
                slot,
                channel.as_str()
            ),
        }
    }
}

impl TryFrom<String> for SourceSpec {
    type Error = SourceParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SourceSpec> for String {
    fn from(spec: SourceSpec) -> Self {
        spec.to_string()
    }
}
