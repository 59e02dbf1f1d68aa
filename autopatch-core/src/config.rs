use std::path::{Path, PathBuf};
use std::time::Duration;

use autopatch_types::PortId;
use regex::RegexSet;
use serde::Deserialize;

const DEFAULT_CONFIG: &str = include_str!("../config.toml");

#[derive(Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    scheduler: SchedulerConfig,
    #[serde(default)]
    midi: MidiConfig,
    #[serde(default)]
    clients: ClientsConfig,
    #[serde(default)]
    ports: PortsConfig,
}

#[derive(Deserialize, Default, Clone, Debug)]
struct SchedulerConfig {
    interval_ms: Option<u64>,
    xrun_window_secs: Option<u64>,
    max_redo: Option<usize>,
}

#[derive(Deserialize, Default, Clone, Debug)]
struct MidiConfig {
    aubionotes: Option<bool>,
    touchosc: Option<bool>,
    network: Option<bool>,
}

#[derive(Deserialize, Default)]
struct ClientsConfig {
    midi_bus: Option<String>,
    network: Option<String>,
    aubio: Option<String>,
    touchosc: Option<String>,
    system: Option<String>,
    headphones: Option<String>,
    usb_gadget: Option<String>,
    global_playback: Option<String>,
    audio_levels: Option<String>,
    sampler: Option<String>,
    loop_player: Option<String>,
}

#[derive(Deserialize, Default)]
struct PortsConfig {
    side_channel: Option<Vec<String>>,
    ignored_midi_inputs: Option<Vec<String>>,
}

/// Graph client names of the well-known parts of the system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientNames {
    pub midi_bus: String,
    pub network: String,
    pub aubio: String,
    pub touchosc: String,
    pub system: String,
    pub headphones: String,
    pub usb_gadget: String,
    pub global_playback: String,
    pub audio_levels: String,
    pub sampler: String,
    pub loop_player: String,
}

impl ClientNames {
    fn from_file(file: ClientsConfig) -> Self {
        Self {
            midi_bus: file.midi_bus.unwrap_or_else(|| "MidiBus".into()),
            network: file.network.unwrap_or_else(|| "QmidiNet".into()),
            aubio: file.aubio.unwrap_or_else(|| "aubio".into()),
            touchosc: file.touchosc.unwrap_or_else(|| "RtMidiOut Client".into()),
            system: file.system.unwrap_or_else(|| "system".into()),
            headphones: file.headphones.unwrap_or_else(|| "headphones".into()),
            usb_gadget: file.usb_gadget.unwrap_or_else(|| "usb_gadget".into()),
            global_playback: file.global_playback.unwrap_or_else(|| "GlobalPlayback".into()),
            audio_levels: file.audio_levels.unwrap_or_else(|| "AudioLevels".into()),
            sampler: file.sampler.unwrap_or_else(|| "SamplerSynth".into()),
            loop_player: file.loop_player.unwrap_or_else(|| "SketchPlayer".into()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    scheduler: SchedulerConfig,
    midi: MidiConfig,
    clients: ClientNames,
    side_channel: RegexSet,
    ignored_midi_inputs: RegexSet,
}

impl Default for Config {
    /// The embedded defaults, ignoring any user file.
    fn default() -> Self {
        Self::from_file(embedded())
    }
}

fn embedded() -> ConfigFile {
    toml::from_str(DEFAULT_CONFIG).unwrap_or_else(|e| {
        log::error!(target: "config", "embedded config.toml is malformed: {}", e);
        ConfigFile::default()
    })
}

impl Config {
    /// Embedded defaults merged with `<config_dir>/autopatch/config.toml`.
    pub fn load() -> Self {
        Self::load_with(user_config_path().as_deref())
    }

    /// Embedded defaults merged with the file at `path`, if it exists.
    /// A missing or malformed user file is logged and ignored.
    pub fn load_with(path: Option<&Path>) -> Self {
        let mut base = embedded();

        if let Some(path) = path {
            if path.exists() {
                match std::fs::read_to_string(path) {
                    Ok(contents) => match toml::from_str::<ConfigFile>(&contents) {
                        Ok(user) => merge(&mut base, user),
                        Err(e) => {
                            log::warn!(target: "config", "ignoring malformed config {}: {}", path.display(), e)
                        }
                    },
                    Err(e) => {
                        log::warn!(target: "config", "could not read config {}: {}", path.display(), e)
                    }
                }
            }
        }

        Self::from_file(base)
    }

    /// Embedded defaults merged with TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        let mut base = embedded();
        merge(&mut base, toml::from_str(text)?);
        Ok(Self::from_file(base))
    }

    fn from_file(file: ConfigFile) -> Self {
        let side_channel = file
            .ports
            .side_channel
            .unwrap_or_else(|| vec!["sidechain".into()]);
        let ignored = file
            .ports
            .ignored_midi_inputs
            .unwrap_or_else(|| vec!["osc".into()]);
        Config {
            scheduler: file.scheduler,
            midi: file.midi,
            clients: ClientNames::from_file(file.clients),
            side_channel: fragment_set("side_channel", &side_channel),
            ignored_midi_inputs: fragment_set("ignored_midi_inputs", &ignored),
        }
    }

    /// Time between background ticks (at least 10ms).
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.scheduler.interval_ms.unwrap_or(2000).max(10))
    }

    /// Length of one xrun reporting window.
    pub fn xrun_window(&self) -> Duration {
        Duration::from_secs(self.scheduler.xrun_window_secs.unwrap_or(10).max(1))
    }

    /// Bound on passes re-run before a callback drain.
    pub fn max_redo(&self) -> usize {
        self.scheduler.max_redo.unwrap_or(8)
    }

    pub fn aubionotes(&self) -> bool {
        self.midi.aubionotes.unwrap_or(false)
    }

    pub fn touchosc(&self) -> bool {
        self.midi.touchosc.unwrap_or(false)
    }

    pub fn network_midi(&self) -> bool {
        self.midi.network.unwrap_or(true)
    }

    pub fn clients(&self) -> &ClientNames {
        &self.clients
    }

    /// Side-channel ports are left alone by every pass.
    pub fn is_side_channel(&self, port: &PortId) -> bool {
        self.side_channel.is_match(port.port())
    }

    pub fn is_ignored_midi_input(&self, port: &PortId) -> bool {
        self.ignored_midi_inputs.is_match(port.port())
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.scheduler.interval_ms = Some(interval.as_millis() as u64);
        self
    }

    pub fn with_aubionotes(mut self, enabled: bool) -> Self {
        self.midi.aubionotes = Some(enabled);
        self
    }

    pub fn with_touchosc(mut self, enabled: bool) -> Self {
        self.midi.touchosc = Some(enabled);
        self
    }

    pub fn with_network_midi(mut self, enabled: bool) -> Self {
        self.midi.network = Some(enabled);
        self
    }
}

fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("autopatch").join("config.toml"))
}

/// Case-insensitive substring matcher over literal fragments.
fn fragment_set(name: &str, fragments: &[String]) -> RegexSet {
    let patterns = fragments
        .iter()
        .filter(|f| !f.is_empty())
        .map(|f| format!("(?i){}", regex::escape(f)));
    RegexSet::new(patterns).unwrap_or_else(|e| {
        log::warn!(target: "config", "ignoring [ports] {}: {}", name, e);
        RegexSet::empty()
    })
}

fn merge(base: &mut ConfigFile, user: ConfigFile) {
    merge_scheduler(&mut base.scheduler, user.scheduler);
    merge_midi(&mut base.midi, user.midi);
    merge_clients(&mut base.clients, user.clients);
    merge_ports(&mut base.ports, user.ports);
}

fn merge_scheduler(base: &mut SchedulerConfig, user: SchedulerConfig) {
    if user.interval_ms.is_some() {
        base.interval_ms = user.interval_ms;
    }
    if user.xrun_window_secs.is_some() {
        base.xrun_window_secs = user.xrun_window_secs;
    }
    if user.max_redo.is_some() {
        base.max_redo = user.max_redo;
    }
}

fn merge_midi(base: &mut MidiConfig, user: MidiConfig) {
    if user.aubionotes.is_some() {
        base.aubionotes = user.aubionotes;
    }
    if user.touchosc.is_some() {
        base.touchosc = user.touchosc;
    }
    if user.network.is_some() {
        base.network = user.network;
    }
}

fn merge_clients(base: &mut ClientsConfig, user: ClientsConfig) {
    let fields = [
        (&mut base.midi_bus, user.midi_bus),
        (&mut base.network, user.network),
        (&mut base.aubio, user.aubio),
        (&mut base.touchosc, user.touchosc),
        (&mut base.system, user.system),
        (&mut base.headphones, user.headphones),
        (&mut base.usb_gadget, user.usb_gadget),
        (&mut base.global_playback, user.global_playback),
        (&mut base.audio_levels, user.audio_levels),
        (&mut base.sampler, user.sampler),
        (&mut base.loop_player, user.loop_player),
    ];
    for (slot, value) in fields {
        if value.is_some() {
            *slot = value;
        }
    }
}

fn merge_ports(base: &mut PortsConfig, user: PortsConfig) {
    if user.side_channel.is_some() {
        base.side_channel = user.side_channel;
    }
    if user.ignored_midi_inputs.is_some() {
        base.ignored_midi_inputs = user.ignored_midi_inputs;
    }
}
