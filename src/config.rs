//! Runtime configuration, loaded from YAML.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

/// Sample rate used when no audio device reports one.
pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;

/// Name the bridge registers its own MIDI client under.
pub const CLIENT_NAME: &str = "midi_synth_bridge";

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct BridgeConfig {
    /// Devices whose name equals one of these (ignoring case) are never read from. This keeps
    /// the synthesizer's own virtual port from being fed back into itself.
    pub loopback_denylist: Vec<String>,
    /// Output port tried first when a device is opened.
    pub port_index: usize,
    /// Upper bound on one blocking read; also how quickly a reader notices `stop()`.
    pub read_timeout_ms: u64,
    /// How long `stop()` waits for a reader thread before detaching it.
    pub stop_timeout_ms: u64,
    /// Undelivered notification lines kept before the oldest are dropped.
    pub notification_capacity: usize,
    /// Scan interval for backends that have to poll for hot-plug changes.
    pub hotplug_poll_ms: u64,
    pub synth: SynthConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            loopback_denylist: vec!["fluidsynth".to_owned(), CLIENT_NAME.to_owned()],
            port_index: 0,
            read_timeout_ms: 20,
            stop_timeout_ms: 500,
            notification_capacity: 256,
            hotplug_poll_ms: 500,
            synth: SynthConfig::default(),
        }
    }
}

impl BridgeConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms.max(1))
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn hotplug_poll(&self) -> Duration {
        Duration::from_millis(self.hotplug_poll_ms.max(1))
    }

    /// True if `name` is on the loopback denylist.
    pub fn is_denied(&self, name: &str) -> bool {
        let name = name.trim();
        self.loopback_denylist
            .iter()
            .any(|denied| denied.trim().eq_ignore_ascii_case(name))
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct SynthConfig {
    pub sample_rate: u32,
    /// Master volume applied at startup, 0-127.
    pub initial_volume: u8,
    /// Voices in the built-in patch engine.
    pub polyphony: usize,
    /// Instrument bank loaded at startup.
    pub bank: Option<String>,
}

impl Default for SynthConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            initial_volume: 127,
            polyphony: 10,
            bank: None,
        }
    }
}

/// Loads a configuration file. A missing file yields the defaults.
pub fn load_config(path: &Path) -> anyhow::Result<BridgeConfig> {
    if !path.exists() {
        log::info!("no config at {}, using defaults", path.display());
        return Ok(BridgeConfig::default());
    }
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    let config: BridgeConfig = serde_yaml::from_str(&contents)
        .with_context(|| format!("parsing config {}", path.display()))?;
    log::info!(
        "loaded config from {} ({} denied device name(s))",
        path.display(),
        config.loopback_denylist.len()
    );
    Ok(config)
}
