mod audio;
mod breath;
mod colors;
mod config;
mod detect;
mod error;
mod help;
mod logging;
mod narrative;
mod play;
mod session;
mod settings;
mod stage;
mod terminal;
mod timeline;
mod waves;

use clap::{Parser, Subcommand};
use config::{DetectConfig, PlayConfig};
use error::Result;
use narrative::{Beat, Script, Trigger};
use session::SessionCounter;
use settings::Settings;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "manpa")]
#[command(author = "manpa contributors")]
#[command(version)]
#[command(about = "manpa: calm the waves with your breath, a microphone-driven terminal story", long_about = None)]
struct Cli {
    /// Write a debug log to /tmp/manpa.log
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Play the story
    Play {
        /// Story script (TOML) instead of the built-in one
        #[arg(short, long)]
        script: Option<PathBuf>,

        /// No microphone; breathe with the space bar
        #[arg(long)]
        no_mic: bool,

        /// No sound
        #[arg(long)]
        no_audio: bool,

        /// Mobile microphone profile (lower floor, shorter hold)
        #[arg(long)]
        mobile: bool,

        /// Wait for the first exhale before the story starts
        #[arg(long)]
        start_on_breath: bool,

        /// Skip the breathing guide
        #[arg(long)]
        skip_guide: bool,
    },

    /// Live microphone test and calibration
    Detect {
        /// Energy above the baseline needed to trigger
        #[arg(short = 'd', long)]
        threshold_delta: Option<f32>,

        /// Minimum milliseconds between two breaths
        #[arg(short, long)]
        cooldown: Option<u64>,

        /// Mobile microphone profile
        #[arg(long)]
        mobile: bool,
    },

    /// Print and validate the beat sequence
    Script {
        /// Story script (TOML) instead of the built-in one
        path: Option<PathBuf>,
    },

    /// Show the session counter
    Sessions {
        /// Set the counter back to zero
        #[arg(long)]
        reset: bool,
    },
}

fn platform(mobile: bool) -> Option<breath::Platform> {
    mobile.then_some(breath::Platform::Mobile)
}

/// How a beat moves on, as shown by `manpa script`
fn advance_label(beat: &Beat) -> String {
    match beat.trigger {
        Trigger::Inhale | Trigger::None => format!("{}ms", beat.total_ms()),
        Trigger::Pause => format!("{}ms", beat.pause_hold_ms()),
        Trigger::Exhale => format!("breath+{}ms", beat.response_window_ms()),
    }
}

fn print_script(path: Option<&Path>, audio_dir: &Path) -> Result<()> {
    let script = match path {
        Some(p) => Script::load(p)?,
        None => Script::builtin()?,
    };

    println!(
        "{:>3}  {:<6} {:<7} {:>5} {:>7} {:>9} {:>14}  {:<16} {}",
        "#", "id", "trigger", "lines", "line_ms", "interlude", "advance", "audio", "bg"
    );
    for (i, beat) in script.beats().iter().enumerate() {
        println!(
            "{:>3}  {:<6} {:<7} {:>5} {:>7} {:>9} {:>14}  {:<16} {}",
            i,
            beat.id,
            beat.trigger.as_str(),
            beat.lines.len(),
            beat.line_ms(),
            beat.interlude_ms.map(|v| v.to_string()).unwrap_or_else(|| "-".into()),
            advance_label(beat),
            beat.audio.as_deref().unwrap_or("-"),
            beat.bg_color.as_deref().unwrap_or("-"),
        );
    }
    println!("\n{} beats, {} directives", script.len(), script.directives_len());

    for warning in script.warnings() {
        println!("warning: {}", warning);
    }

    let mut missing = 0;
    for cue in script.beats().iter().filter_map(|b| b.audio.as_deref()) {
        if let Err(e) = audio::check_cue(audio_dir, cue) {
            println!("note: {}", e);
            missing += 1;
        }
    }
    if missing > 0 {
        println!("{} cue(s) missing from {} (story plays without them)", missing, audio_dir.display());
    }
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    let settings = Settings::load();

    match cli.command {
        Commands::Play {
            script,
            no_mic,
            no_audio,
            mobile,
            start_on_breath,
            skip_guide,
        } => {
            let mut config = PlayConfig::from_settings(&settings, platform(mobile));
            if script.is_some() {
                config.script = script;
            }
            config.mic = !no_mic;
            config.audio = config.audio && !no_audio;
            config.start_on_breath = config.start_on_breath || start_on_breath;
            config.guide = config.guide && !skip_guide;
            play::run(config)?;
        }
        Commands::Detect {
            threshold_delta,
            cooldown,
            mobile,
        } => {
            let config = DetectConfig::from_settings(&settings, platform(mobile), threshold_delta, cooldown);
            detect::run(config)?;
        }
        Commands::Script { path } => {
            let path = path.or(settings.play.script.clone());
            let audio_dir = PlayConfig::from_settings(&settings, None).audio_dir;
            print_script(path.as_deref(), &audio_dir)?;
        }
        Commands::Sessions { reset } => {
            let mut counter = SessionCounter::load();
            if reset {
                counter.reset()?;
                println!("session counter reset ({})", counter.path().display());
            } else {
                println!("{}번째 호흡 ({})", counter.count(), counter.path().display());
            }
        }
    }

    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.debug);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            eprintln!("manpa: {}", e);
            ExitCode::FAILURE
        }
    }
}
