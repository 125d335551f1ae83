use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use read_input::prelude::*;

use midi_synth_bridge::audio::AudioOutput;
use midi_synth_bridge::config::{load_config, CLIENT_NAME};
use midi_synth_bridge::device::midir_backend::MidirBackend;
use midi_synth_bridge::synth::{AssetDir, BUILTIN_BANK};
use midi_synth_bridge::{notification_channel, MidiBackend, Registry, SynthControl};

/// Plays connected MIDI controllers through a software synthesizer.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// YAML configuration file; defaults apply if it does not exist.
    #[arg(long, default_value = "midi_synth_bridge.yaml")]
    config: PathBuf,

    /// Directory instrument banks are loaded from.
    #[arg(long, default_value = "assets")]
    assets: PathBuf,

    /// Instrument bank: a SoundFont under the asset directory, `builtin` or `builtin:<patch>`.
    #[arg(long)]
    bank: Option<String>,

    /// Master volume, 0-127.
    #[arg(long)]
    volume: Option<i32>,

    /// Device name never to read from (repeatable).
    #[arg(long = "deny")]
    deny: Vec<String>,

    /// List MIDI inputs and exit.
    #[arg(long)]
    list: bool,

    /// Run without opening an audio device.
    #[arg(long)]
    no_audio: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = load_config(&args.config)?;
    config.loopback_denylist.extend(args.deny);
    let backend = Arc::new(MidirBackend::new(CLIENT_NAME, config.hotplug_poll()));

    if args.list {
        for device in backend.list_devices() {
            println!("{}: {} ({:?})", device.id, device.name, device.kind);
        }
        return Ok(());
    }

    if !args.no_audio {
        if let Some(rate) = AudioOutput::default_sample_rate() {
            config.synth.sample_rate = rate;
        }
    }
    let synth = SynthControl::new(AssetDir::new(args.assets.clone()), &config.synth);
    let bank = args
        .bank
        .or_else(|| config.synth.bank.clone())
        .unwrap_or_else(|| BUILTIN_BANK.to_owned());
    if let Err(e) = synth.load_instrument_bank(&bank) {
        log::error!("{e}; MIDI input will be ignored until a bank is loaded");
    }
    if let Some(volume) = args.volume {
        synth.set_volume(volume);
    }

    let audio = if args.no_audio {
        None
    } else {
        match AudioOutput::start(synth.clone()) {
            Ok(audio) => Some(audio),
            Err(e) => {
                log::warn!("continuing without audio: {e}");
                None
            }
        }
    };

    let (notifier, pump) = notification_channel(config.notification_capacity);
    let mut pump_thread = pump.spawn(|line: &str| println!("{line}"))?;

    let registry = Registry::new(backend.clone(), synth.clone(), notifier, config);
    registry.start(backend.as_ref());

    let _ = input::<String>().msg("(press enter to exit)...\n").get();

    if !registry.stop() {
        log::warn!("MIDI reader did not release its port before exit");
    }
    drop(registry);
    drop(backend);
    drop(audio);
    synth.release();
    pump_thread.stop();
    Ok(())
}
