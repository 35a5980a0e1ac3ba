//! rf-player: the bundled CLI driver for `rf-engine` (spec §6).
//!
//! Loads one song (any accepted container format), optionally a bank,
//! and either plays it live through the platform audio device or
//! renders it offline to a WAV file.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use clap::Parser;
use rf_dsp::reverb::ReverbPreset;
use rf_engine::error::{EngineError, EngineResult};
use rf_engine::mixer::OpenConfig;
use rf_engine::song::TransportState;
use rf_engine::Mixer;
use rf_file::ExportFormat;

#[derive(Parser, Debug)]
#[command(name = "rf-player", about = "Play or render a MIDI/RMF/XMF song through the ReelForge GM engine")]
struct Cli {
    /// Song file (SMF/RMF/RMI/XMF/MXMF).
    file: PathBuf,

    /// Bank file to load before playback (HSB, or SF2/DLS as the base bank).
    #[arg(short = 'p', long = "bank")]
    bank: Option<PathBuf>,

    /// Offline-render to this WAV file instead of playing live.
    #[arg(short = 'o', long = "out")]
    out: Option<PathBuf>,

    /// Mixing sample rate.
    #[arg(long = "mr", default_value_t = 44_100)]
    mr: u32,

    /// Loop count (0 = play once).
    #[arg(short = 'l', long = "loop", default_value_t = 0)]
    l: u32,

    /// Master volume, percent, capped at the configured overdrive percent.
    #[arg(short = 'v', long = "volume", default_value_t = 100)]
    v: u32,

    /// Time limit in seconds (0 = unlimited).
    #[arg(short = 't', long = "time", default_value_t = 0)]
    t: u64,

    /// Comma-separated 1-based channel numbers to mute.
    #[arg(long = "mc")]
    mc: Option<String>,

    /// Reverb type, 0..11.
    #[arg(long = "rv")]
    rv: Option<u8>,

    /// Disable fadeout on stop.
    #[arg(long = "nf")]
    nf: bool,

    /// Quiet: suppress all but error output.
    #[arg(short = 'q', long = "quiet")]
    quiet: bool,

    /// Verbose: debug-level logging.
    #[arg(short = 'd', long = "verbose")]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.quiet, cli.verbose);

    match run(&cli) {
        Ok(()) => std::process::exit(0),
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(1);
        }
    }
}

fn init_logging(quiet: bool, verbose: bool) {
    let level = if quiet {
        "error"
    } else if verbose {
        "debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn run(cli: &Cli) -> EngineResult<()> {
    let mixer = Mixer::new();

    if let Some(bank_path) = &cli.bank {
        load_bank(&mixer, bank_path)?;
    }

    mixer.open(OpenConfig {
        sample_rate: cli.mr,
        channels: 2,
        mix_level_percent: cli.v,
        engage_audio: cli.out.is_none(),
        ..Default::default()
    })?;

    if let Some(rv) = cli.rv {
        let preset = ReverbPreset::from_index(rv)
            .ok_or_else(|| EngineError::ParamErr(format!("reverb type out of range: {rv}")))?;
        mixer.set_default_reverb(preset);
    }

    let song = mixer.load_song_from_file(&cli.file)?;
    log::info!("loaded {:?}", cli.file);

    if let Some(csv) = &cli.mc {
        for token in csv.split(',') {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }
            let one_based: u8 = token
                .parse()
                .map_err(|_| EngineError::ParamErr(format!("not a channel number: {token}")))?;
            if one_based == 0 || one_based > 16 {
                return Err(EngineError::ParamErr(format!("channel out of range: {one_based}")));
            }
            song.mute_channel(one_based - 1, true);
        }
    }

    song.set_loops(cli.l);
    mixer.preroll_song(&song);
    mixer.start_song(&song)?;

    let limit = if cli.t == 0 { None } else { Some(Duration::from_secs(cli.t)) };

    if let Some(out_path) = &cli.out {
        render_offline(&mixer, &song, out_path, limit)?;
    } else {
        play_live(&song, limit, cli.nf);
    }

    Ok(())
}

fn load_bank(mixer: &std::sync::Arc<Mixer>, path: &Path) -> EngineResult<()> {
    let is_soundfont = matches!(
        path.extension().and_then(|e| e.to_str()).map(|e| e.to_ascii_lowercase()).as_deref(),
        Some("sf2") | Some("sf3") | Some("dls")
    );
    if is_soundfont {
        mixer.add_soundfont_file(path, false)?;
    } else {
        mixer.add_hsb_bank_file(path)?;
    }
    Ok(())
}

fn render_offline(
    mixer: &std::sync::Arc<Mixer>,
    song: &rf_engine::Song,
    out_path: &Path,
    limit: Option<Duration>,
) -> EngineResult<()> {
    mixer.start_output_to_file(out_path, ExportFormat::Wav)?;
    let start = Instant::now();
    loop {
        let still_active = mixer.service_audio_output_to_file();
        if !still_active {
            break;
        }
        if let Some(limit) = limit {
            if start.elapsed() >= limit {
                song.stop();
                break;
            }
        }
    }
    let stats = mixer.stop_output_to_file();
    log::info!("wrote {} frames ({} dropped) to {:?}", stats.frames_written, stats.dropped_frames, out_path);
    Ok(())
}

const FADEOUT: Duration = Duration::from_millis(200);

fn play_live(song: &rf_engine::Song, limit: Option<Duration>, no_fadeout: bool) {
    let start = Instant::now();
    loop {
        if song.transport_state() != TransportState::Playing {
            break;
        }
        if let Some(limit) = limit {
            if start.elapsed() >= limit {
                if no_fadeout {
                    song.stop();
                } else {
                    fade_out(song);
                }
                break;
            }
        }
        std::thread::sleep(Duration::from_millis(20));
    }
}

/// Ramps the song's volume to silence over [`FADEOUT`] before stopping
/// (spec §5: "a graceful fade (~200 ms) is preferred when called from a
/// user gesture").
fn fade_out(song: &rf_engine::Song) {
    let base = song.volume();
    let steps: u32 = 10;
    for step in (0..=steps).rev() {
        song.set_volume(rf_core::Q16_16::from_f64(base.to_f64() * step as f64 / steps as f64));
        std::thread::sleep(FADEOUT / steps);
    }
    song.stop();
}
