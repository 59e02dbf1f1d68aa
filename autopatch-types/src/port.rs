//! Port identities and edges of the live connection graph.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error parsing a `client:port` identifier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PortIdError {
    #[error("port name '{0}' has no client separator")]
    MissingSeparator(String),
    #[error("port name '{0}' has an empty client")]
    EmptyClient(String),
    #[error("port name '{0}' has an empty port part")]
    EmptyPort(String),
}

/// Fully qualified port identifier, `client:port`.
///
/// Only the first `:` separates client from port, so port names may contain
/// further colons.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PortId {
    client: String,
    port: String,
}

impl PortId {
    pub fn new(client: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            client: client.into(),
            port: port.into(),
        }
    }

    pub fn parse(full: &str) -> Result<Self, PortIdError> {
        let (client, port) = full
            .split_once(':')
            .ok_or_else(|| PortIdError::MissingSeparator(full.to_string()))?;
        if client.is_empty() {
            return Err(PortIdError::EmptyClient(full.to_string()));
        }
        if port.is_empty() {
            return Err(PortIdError::EmptyPort(full.to_string()));
        }
        Ok(Self::new(client, port))
    }

    pub fn client(&self) -> &str {
        &self.client
    }

    pub fn port(&self) -> &str {
        &self.port
    }
}

impl std::fmt::Display for PortId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.client, self.port)
    }
}

impl FromStr for PortId {
    type Err = PortIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for PortId {
    type Error = PortIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<PortId> for String {
    fn from(id: PortId) -> Self {
        id.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PortKind {
    Audio,
    Midi,
}

/// Direction from the graph's point of view: an `Output` produces signal,
/// an `Input` consumes it. Edges always run output → input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PortDirection {
    Input,
    Output,
}

/// Snapshot of one port as seen during a single query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Port {
    pub id: PortId,
    pub direction: PortDirection,
    pub kind: PortKind,
    /// Hardware-backed port.
    pub physical: bool,
    #[serde(default)]
    pub aliases: Vec<String>,
}

impl Port {
    pub fn new(id: PortId, direction: PortDirection, kind: PortKind, physical: bool) -> Self {
        Self {
            id,
            direction,
            kind,
            physical,
            aliases: Vec::new(),
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    pub fn is_input(&self) -> bool {
        self.direction == PortDirection::Input
    }

    pub fn is_output(&self) -> bool {
        self.direction == PortDirection::Output
    }

    /// Identifier used by hardware allow/deny lists.
    ///
    /// ALSA-bridged ports carry an alias like
    /// `alsa_pcm:Device-Name-MIDI-1-out-Keystation_49` whose fields from the
    /// sixth `-` separated position on are the stable device id. Ports without
    /// such an alias fall back to their full name.
    pub fn alias_id(&self) -> String {
        let from_alias = self.aliases.first().map(|alias| {
            alias
                .split('-')
                .skip(5)
                .collect::<Vec<_>>()
                .join("_")
        });
        match from_alias {
            Some(id) if !id.is_empty() => id,
            _ => self.id.to_string(),
        }
    }
}

/// Directed connection between an output port and an input port.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Edge {
    pub source: PortId,
    pub destination: PortId,
}

impl Edge {
    pub fn new(source: PortId, destination: PortId) -> Self {
        Self { source, destination }
    }

    /// True if either endpoint is `port`.
    pub fn touches(&self, port: &PortId) -> bool {
        &self.source == port || &self.destination == port
    }

    /// The endpoint opposite `port`, if the edge touches it.
    pub fn peer_of(&self, port: &PortId) -> Option<&PortId> {
        if &self.source == port {
            Some(&self.destination)
        } else if &self.destination == port {
            Some(&self.source)
        } else {
            None
        }
    }
}

impl std::fmt::Display for Edge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -> {}", self.source, self.destination)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_splits_on_first_colon() {
        let id = PortId::parse("a2j:Keystation [20] (capture): MIDI 1").unwrap();
        assert_eq!(id.client(), "a2j");
        assert_eq!(id.port(), "Keystation [20] (capture): MIDI 1");
        assert_eq!(id.to_string(), "a2j:Keystation [20] (capture): MIDI 1");
    }

    #[test]
    fn parse_rejects_malformed_names() {
        assert!(matches!(PortId::parse("system"), Err(PortIdError::MissingSeparator(_))));
        assert!(matches!(PortId::parse(":out"), Err(PortIdError::EmptyClient(_))));
        assert!(matches!(PortId::parse("system:"), Err(PortIdError::EmptyPort(_))));
    }

    #[test]
    fn port_id_serializes_as_string() {
        let id = PortId::new("system", "playback_1");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"system:playback_1\"");
        let back: PortId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn alias_id_uses_device_fields() {
        let port = Port::new(
            PortId::new("system", "midi_capture_1"),
            PortDirection::Output,
            PortKind::Midi,
            true,
        )
        .with_alias("alsa_pcm:Keystation-49-MIDI-1-out-Keystation-49");
        assert_eq!(port.alias_id(), "Keystation_49");
    }

    #[test]
    fn alias_id_falls_back_to_name() {
        let bare = Port::new(PortId::new("ttymidi", "MIDI_out"), PortDirection::Input, PortKind::Midi, true);
        assert_eq!(bare.alias_id(), "ttymidi:MIDI_out");

        let short = bare.clone().with_alias("short-alias");
        assert_eq!(short.alias_id(), "ttymidi:MIDI_out");
    }

    #[test]
    fn edge_peer_lookup() {
        let a = PortId::new("a", "out");
        let b = PortId::new("b", "in");
        let edge = Edge::new(a.clone(), b.clone());
        assert_eq!(edge.peer_of(&a), Some(&b));
        assert_eq!(edge.peer_of(&b), Some(&a));
        assert_eq!(edge.peer_of(&PortId::new("c", "x")), None);
        assert!(edge.touches(&b));
    }
}
