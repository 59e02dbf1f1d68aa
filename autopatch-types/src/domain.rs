use serde::{Deserialize, Serialize};

/// The two independently scheduled halves of the connection graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Domain {
    Midi,
    Audio,
}

impl Domain {
    /// Both domains in the order a full autoconnect runs them.
    pub const ALL: [Domain; 2] = [Domain::Midi, Domain::Audio];

    /// Stable slot for per-domain arrays.
    pub fn index(self) -> usize {
        match self {
            Domain::Midi => 0,
            Domain::Audio => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Domain::Midi => "midi",
            Domain::Audio => "audio",
        }
    }
}

impl std::fmt::Display for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
