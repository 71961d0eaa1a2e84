use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use crabscreen::config::RecorderConfig;
use crabscreen::recording::AudioPolicy;
use crabscreen::session::{SessionController, StartRequest};
use crabscreen::source::{FrameSource, SyntheticConfig, SyntheticScreenSource};
use crabscreen::timing::PTSClock;

const USAGE: &str = "Usage:
  crabscreen-cli record <name> [--frames <n>] [--audio none|muxed|independent] [--title <t>] [--device <mic>] [--config <path>] [--json]
  crabscreen-cli config [--config <path>]";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    crabscreen::init_logging();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("{}", USAGE);
        std::process::exit(1);
    }

    match args[1].as_str() {
        "record" => cmd_record(&args).await,
        "config" => cmd_config(&args),
        other => {
            eprintln!("Unknown command: {}\n{}", other, USAGE);
            std::process::exit(1);
        }
    }
}

struct RecordArgs {
    name: String,
    frames: Option<u64>,
    audio: Option<AudioPolicy>,
    title: Option<String>,
    device: Option<String>,
    config: Option<PathBuf>,
    json: bool,
}

fn flag_value<'a>(args: &'a [String], i: usize, flag: &str) -> anyhow::Result<&'a str> {
    args.get(i)
        .map(String::as_str)
        .ok_or_else(|| anyhow!("{} needs a value", flag))
}

fn parse_record_args(args: &[String]) -> anyhow::Result<RecordArgs> {
    let mut parsed = RecordArgs {
        name: String::new(),
        frames: None,
        audio: None,
        title: None,
        device: None,
        config: None,
        json: false,
    };

    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            "--frames" => {
                i += 1;
                parsed.frames = Some(flag_value(args, i, "--frames")?.parse().context("--frames expects a number")?);
            }
            "--audio" => {
                i += 1;
                let policy = flag_value(args, i, "--audio")?.parse::<AudioPolicy>().map_err(|e| anyhow!(e))?;
                parsed.audio = Some(policy);
            }
            "--title" => {
                i += 1;
                parsed.title = Some(flag_value(args, i, "--title")?.to_string());
            }
            "--device" => {
                i += 1;
                parsed.device = Some(flag_value(args, i, "--device")?.to_string());
            }
            "--config" => {
                i += 1;
                parsed.config = Some(PathBuf::from(flag_value(args, i, "--config")?));
            }
            "--json" => parsed.json = true,
            other if parsed.name.is_empty() => parsed.name = other.to_string(),
            other => bail!("Unexpected argument: {}", other),
        }
        i += 1;
    }

    if parsed.name.is_empty() {
        bail!("Missing recording name\n{}", USAGE);
    }
    Ok(parsed)
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<RecorderConfig> {
    match path {
        Some(path) => RecorderConfig::load_from_file(path).with_context(|| format!("loading {}", path.display())),
        None => Ok(RecorderConfig::load_or_default()),
    }
}

fn build_source(config: &RecorderConfig, args: &RecordArgs, policy: AudioPolicy) -> Box<dyn FrameSource> {
    let mut synthetic = SyntheticConfig::from_recorder(config);
    if let Some(frames) = args.frames {
        synthetic = synthetic.with_frame_limit(frames);
    }
    let clock = PTSClock::new();
    let screen = SyntheticScreenSource::with_clock(synthetic, clock.clone());

    #[cfg(feature = "microphone")]
    if policy.includes_audio() {
        let microphone = crabscreen::source::MicrophoneSource::new(Box::new(screen), args.device.clone(), clock)
            .with_format(config.audio.muxed_sample_rate, config.audio.muxed_channels);
        return Box::new(microphone);
    }

    #[cfg(not(feature = "microphone"))]
    {
        let _ = (policy, clock);
        if args.device.is_some() {
            log::warn!("Built without microphone support; recording the synthetic tone instead");
        }
    }

    Box::new(screen)
}

async fn cmd_record(args: &[String]) -> anyhow::Result<()> {
    let args = parse_record_args(args)?;
    let config = load_config(args.config.as_ref())?;
    let policy = args.audio.unwrap_or(AudioPolicy::None);

    // Let the source run past its last frame before stopping
    let wait = args
        .frames
        .map(|frames| Duration::from_secs_f64(frames as f64 / config.video.fps) + Duration::from_millis(250));

    let source = build_source(&config, &args, policy);
    let controller = SessionController::with_mp4(config, source);

    let (interrupt_tx, mut interrupt_rx) = tokio::sync::mpsc::unbounded_channel();
    ctrlc::set_handler(move || {
        let _ = interrupt_tx.send(());
    })
    .context("installing Ctrl-C handler")?;

    let mut request = StartRequest::new(args.name.clone()).with_audio(policy);
    if let Some(ref title) = args.title {
        request = request.with_title(title.clone());
    }
    let info = controller.start_with(request)?;
    if !args.json {
        eprintln!("Recording to {} (Ctrl-C to stop)", info.output_path.display());
    }

    let limit = async {
        match wait {
            Some(duration) => tokio::time::sleep(duration).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::select! {
        _ = limit => {}
        _ = interrupt_rx.recv() => log::info!("Interrupted, finishing recording"),
    }

    let result = match controller.stop().await {
        Ok(result) => result,
        Err(e) => bail!("[{}] {}: {}", e.code(), e, e.detail.as_deref().unwrap_or("no detail")),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("{}", result.output_path.display());
        if let Some(ref audio) = result.audio_file {
            println!("{}", audio.display());
        }
        eprintln!(
            "{} frames, {:.2}s, {} bytes ({} dropped)",
            result.stats.video_frames, result.stats.duration_secs, result.stats.bytes_written, result.stats.dropped_frames
        );
    }
    Ok(())
}

fn cmd_config(args: &[String]) -> anyhow::Result<()> {
    let path = args
        .iter()
        .position(|a| a == "--config")
        .map(|i| flag_value(args, i + 1, "--config").map(PathBuf::from))
        .transpose()?;
    let config = load_config(path.as_ref())?;
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}
