//! Read-only view of the ports registered on the graph.

use std::collections::HashMap;

use autopatch_types::{Port, PortDirection, PortId, PortKind};
use regex::Regex;

use crate::backend::{GraphBackend, GraphResult};

/// Port selection criteria. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct PortFilter {
    client: Option<String>,
    name: Option<Regex>,
    kind: Option<PortKind>,
    direction: Option<PortDirection>,
    physical: Option<bool>,
}

impl PortFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn client(mut self, client: impl Into<String>) -> Self {
        self.client = Some(client.into());
        self
    }

    /// Match the full `client:port` name against `pattern`.
    pub fn name_pattern(mut self, pattern: &str) -> Result<Self, regex::Error> {
        self.name = Some(Regex::new(pattern)?);
        Ok(self)
    }

    pub fn name_regex(mut self, regex: Regex) -> Self {
        self.name = Some(regex);
        self
    }

    pub fn kind(mut self, kind: PortKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn direction(mut self, direction: PortDirection) -> Self {
        self.direction = Some(direction);
        self
    }

    pub fn physical(mut self, physical: bool) -> Self {
        self.physical = Some(physical);
        self
    }

    /// MIDI ports producing events.
    pub fn midi_outputs() -> Self {
        Self::new().kind(PortKind::Midi).direction(PortDirection::Output)
    }

    /// MIDI ports consuming events.
    pub fn midi_inputs() -> Self {
        Self::new().kind(PortKind::Midi).direction(PortDirection::Input)
    }

    pub fn audio_outputs() -> Self {
        Self::new().kind(PortKind::Audio).direction(PortDirection::Output)
    }

    pub fn audio_inputs() -> Self {
        Self::new().kind(PortKind::Audio).direction(PortDirection::Input)
    }

    pub fn matches(&self, port: &Port) -> bool {
        if let Some(client) = &self.client {
            if port.id.client() != client {
                return false;
            }
        }
        if let Some(kind) = self.kind {
            if port.kind != kind {
                return false;
            }
        }
        if let Some(direction) = self.direction {
            if port.direction != direction {
                return false;
            }
        }
        if let Some(physical) = self.physical {
            if port.physical != physical {
                return false;
            }
        }
        match &self.name {
            Some(regex) => regex.is_match(&port.id.to_string()),
            None => true,
        }
    }
}

/// Ports visible at the moment of one query.
///
/// Taken once per pass and dropped with it. Order follows the backend's
/// registration order, so numbered hardware ports keep their natural order.
#[derive(Debug, Clone, Default)]
pub struct PortDirectory {
    ports: Vec<Port>,
    index: HashMap<PortId, usize>,
}

impl PortDirectory {
    pub fn snapshot<B: GraphBackend + ?Sized>(backend: &B) -> GraphResult<Self> {
        Ok(Self::from_ports(backend.ports()?))
    }

    pub fn from_ports(ports: Vec<Port>) -> Self {
        let index = ports
            .iter()
            .enumerate()
            .map(|(i, port)| (port.id.clone(), i))
            .collect();
        Self { ports, index }
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Port> {
        self.ports.iter()
    }

    pub fn get(&self, id: &PortId) -> Option<&Port> {
        self.index.get(id).map(|&i| &self.ports[i])
    }

    pub fn contains(&self, id: &PortId) -> bool {
        self.index.contains_key(id)
    }

    pub fn query<'a>(&'a self, filter: &'a PortFilter) -> impl Iterator<Item = &'a Port> + 'a {
        self.ports.iter().filter(move |port| filter.matches(port))
    }

    /// Ids of the ports matching `filter`.
    pub fn ids(&self, filter: &PortFilter) -> Vec<PortId> {
        self.query(filter).map(|port| port.id.clone()).collect()
    }

    /// Ports of one client with the given kind and direction.
    pub fn client_ports(&self, client: &str, kind: PortKind, direction: PortDirection) -> Vec<PortId> {
        self.ports
            .iter()
            .filter(|port| port.id.client() == client && port.kind == kind && port.direction == direction)
            .map(|port| port.id.clone())
            .collect()
    }

    /// Left/right audio outputs of a client. A mono client uses its single
    /// output for both sides.
    pub fn stereo_outputs(&self, client: &str) -> Option<[PortId; 2]> {
        stereo(self.client_ports(client, PortKind::Audio, PortDirection::Output))
    }

    /// Left/right audio inputs of a client, mono clients doubled.
    pub fn stereo_inputs(&self, client: &str) -> Option<[PortId; 2]> {
        stereo(self.client_ports(client, PortKind::Audio, PortDirection::Input))
    }
}

fn stereo(ports: Vec<PortId>) -> Option<[PortId; 2]> {
    let mut ports = ports.into_iter();
    let left = ports.next()?;
    let right = ports.next().unwrap_or_else(|| left.clone());
    Some([left, right])
}
