use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::AsyncBufReadExt;
use tokio::sync::{mpsc, oneshot};
use tracing_subscriber::EnvFilter;

use vca_client::session::ControlHandle;
use vca_client::voice::{
    AudioFrame, CaptureSource, CpalDevice, FRAME_DURATION, InterruptingPlayer, PlaybackSink,
    SpeakerRenderer,
};
use vca_client::{Config, Daemon, UiEvent};

/// VCA - wake-word voice client for a remote assistant
#[derive(Parser)]
#[command(name = "vca", version, about)]
struct Cli {
    /// Config file to load instead of the default location
    #[arg(short, long, env = "VCA_CONFIG")]
    config: Option<PathBuf>,

    /// Backend WebSocket URL
    #[arg(long)]
    server: Option<String>,

    /// Device identifier sent to the backend
    #[arg(long)]
    device_id: Option<String>,

    /// Wake word model directory
    #[arg(long)]
    model: Option<PathBuf>,

    /// Disable the wake word; sessions start only on command
    #[arg(long)]
    no_wake_word: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Play an MP3 or WAV file through the speaker
    TestSpeaker {
        /// Audio file to play
        file: PathBuf,
    },
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,vca_client=info",
        1 => "info,vca_client=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli)?;

    // Handle subcommands
    if let Some(cmd) = cli.command {
        return match cmd {
            Command::TestMic { duration } => test_mic(&config, duration).await,
            Command::TestSpeaker { file } => test_speaker(&file).await,
            Command::Config => {
                println!("{config:#?}");
                Ok(())
            }
        };
    }

    tracing::debug!(?config, "loaded configuration");

    let (ui_tx, ui_rx) = mpsc::unbounded_channel();
    let daemon = Daemon::new(config, ui_tx);
    let control = daemon.control();

    tokio::spawn(print_ui_events(ui_rx));
    tokio::spawn(read_commands(control.clone()));
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received");
            control.shutdown();
        }
    });

    tracing::info!("vca ready - type start, stop, or quit");

    // Run until shut down
    daemon.run().await?;

    Ok(())
}

/// Load configuration and apply command-line overrides
fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    if let Some(server) = &cli.server {
        config.transport.server_url.clone_from(server);
    }
    if let Some(device_id) = &cli.device_id {
        config.transport.device_id.clone_from(device_id);
    }
    if let Some(model) = &cli.model {
        config.wake_word.model_path.clone_from(model);
    }
    if cli.no_wake_word {
        config.wake_word.enabled = false;
    }

    config.validate()?;
    Ok(config)
}

/// Print status lines and server text for the user
async fn print_ui_events(mut events: mpsc::UnboundedReceiver<UiEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            UiEvent::Status(status) => println!("{status}"),
            UiEvent::ServerText(text) => println!("server: {text}"),
            UiEvent::StateChanged(state) => tracing::debug!(state = %state, "session state"),
        }
    }
}

/// Map stdin lines onto controller commands
async fn read_commands(control: ControlHandle) {
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let delivered = match line.trim() {
                    "start" => control.start_session(),
                    "stop" => control.stop_session(),
                    "quit" | "exit" => control.shutdown(),
                    "" => true,
                    other => {
                        println!("unknown command: {other} (expected start, stop, or quit)");
                        true
                    }
                };
                if !delivered {
                    break;
                }
            }
            Ok(None) => {
                tracing::debug!("stdin closed, keyboard control disabled");
                break;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to read stdin");
                break;
            }
        }
    }
}

/// Test microphone input
async fn test_mic(config: &Config, duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let (tx, mut rx) = mpsc::unbounded_channel::<AudioFrame>();
    let device = config.capture.device.clone();
    let mut capture = CaptureSource::new();
    capture.start(
        move || CpalDevice::open(device.as_deref()),
        move |frame| tx.send(frame).is_ok(),
    )?;

    let per_second = Duration::from_secs(1).as_millis() / FRAME_DURATION.as_millis();
    println!("Frame size: {} ms (~{per_second} frames/s)", FRAME_DURATION.as_millis());
    println!("---");

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let mut frames = 0_u32;
        let mut energy = 0.0_f32;
        let mut peak = 0.0_f32;
        while let Ok(frame) = rx.try_recv() {
            let rms = frame.rms();
            frames += 1;
            energy += rms;
            peak = peak.max(rms);
        }
        #[allow(clippy::cast_precision_loss)]
        let energy = if frames == 0 { 0.0 } else { energy / frames as f32 };

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] frames: {frames:3} | RMS: {energy:.4} | Peak: {peak:.4} | [{meter}]",
            i + 1
        );
    }

    capture.stop();

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If frames stayed at 0 or RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

/// Play a local payload through the playback sink
async fn test_speaker(file: &Path) -> anyhow::Result<()> {
    let payload = std::fs::read(file)?;
    println!("Playing {} ({} bytes)...", file.display(), payload.len());

    let (done_tx, done_rx) = oneshot::channel();
    let mut player = InterruptingPlayer::new(SpeakerRenderer);
    player.play(
        payload,
        Box::new(move || {
            let _ = done_tx.send(());
        }),
    );
    let _ = done_rx.await;
    player.stop();

    println!("\n---");
    println!("If you heard the audio, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: aplay -l (to list devices)");

    Ok(())
}
