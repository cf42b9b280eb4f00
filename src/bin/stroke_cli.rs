use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use futures::StreamExt;
use serde::Serialize;
use stroke_detector::analysis::{DetectionEvent, DetectorStats, StrokeEvent, StrokeMeasurement};
use stroke_detector::audio::backend::{default_backend, FixtureBackend};
use stroke_detector::config::{AppConfig, DetectorConfigPatch, MetronomeConfig, ProcessingPath};
use stroke_detector::engine::{DetectionEngine, PathKind};
use stroke_detector::fixtures::{self, ExpectationDiff, StrokeExpectations, SynthSpec};
use stroke_detector::metronome::{
    clock::render_offline, ManualClock, Metronome, MetronomeDriver, OutputClockFactory,
    DEFAULT_TICK_PERIOD,
};
use stroke_detector::{logging, telemetry};

#[derive(Parser, Debug)]
#[command(
    name = "stroke_cli",
    about = "Stroke detection and metronome harness"
)]
struct Cli {
    /// JSON configuration file (defaults to assets/stroke_config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Print the diagnostics snapshot to stderr on exit
    #[arg(long, global = true)]
    diagnostics: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum PathArg {
    Auto,
    Realtime,
    Fallback,
}

impl From<PathArg> for ProcessingPath {
    fn from(value: PathArg) -> Self {
        match value {
            PathArg::Auto => ProcessingPath::Auto,
            PathArg::Realtime => ProcessingPath::Realtime,
            PathArg::Fallback => ProcessingPath::Fallback,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run detection over a WAV file or a synthetic track and print a JSON report
    Detect {
        #[arg(long, conflicts_with = "synth")]
        wav: Option<PathBuf>,
        /// Generate evenly spaced synthetic strokes instead of reading a file
        #[arg(long)]
        synth: bool,
        #[arg(long, default_value_t = 8)]
        hits: usize,
        #[arg(long, default_value_t = 250.0)]
        spacing_ms: f64,
        #[arg(long, value_enum, default_value_t = PathArg::Auto)]
        path: PathArg,
        /// Samples per delivered block
        #[arg(long, default_value_t = 256)]
        block_size: usize,
        #[arg(long)]
        sensitivity: Option<f32>,
        /// Stroke expectations JSON; mismatches exit with code 2
        #[arg(long)]
        expect: Option<PathBuf>,
        /// Also write the report to this file
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Detect strokes from the default microphone, one JSON line per event
    Listen {
        #[arg(long, default_value_t = 10)]
        seconds: u64,
        #[arg(long)]
        sensitivity: Option<f32>,
    },
    /// Play the metronome, or render it to a WAV file
    Metronome {
        #[arg(long)]
        bpm: Option<f64>,
        #[arg(long)]
        subdivision: Option<u32>,
        #[arg(long)]
        volume: Option<f32>,
        #[arg(long, default_value_t = 5)]
        seconds: u64,
        /// Render offline to this WAV file instead of playing
        #[arg(long)]
        render: Option<PathBuf>,
    },
}

#[derive(Debug, Serialize)]
struct DetectionReport {
    source: String,
    sample_rate: u32,
    run_id: u64,
    path: Option<PathKind>,
    stroke_count: usize,
    strokes: Vec<StrokeEvent>,
    measurements: Vec<StrokeMeasurement>,
    stats: Option<DetectorStats>,
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::from(1)
        }
    }
}

fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => AppConfig::load_from_file(path),
        None => AppConfig::load(),
    };
    logging::init(&config.logging);

    let code = match cli.command {
        Commands::Detect {
            wav,
            synth,
            hits,
            spacing_ms,
            path,
            block_size,
            sensitivity,
            expect,
            output,
        } => {
            let source = match (wav, synth) {
                (Some(wav), _) => Source::Wav(wav),
                (None, true) => Source::Synth(SynthSpec::evenly_spaced(hits, 250.0, spacing_ms)),
                (None, false) => return Err(anyhow!("pass --wav <file> or --synth")),
            };
            run_detect(
                config,
                source,
                path.into(),
                block_size,
                sensitivity,
                expect.as_deref(),
                output.as_deref(),
            )?
        }
        Commands::Listen {
            seconds,
            sensitivity,
        } => run_listen(config, seconds, sensitivity)?,
        Commands::Metronome {
            bpm,
            subdivision,
            volume,
            seconds,
            render,
        } => {
            let metronome = MetronomeConfig {
                tempo_bpm: bpm.unwrap_or(config.metronome.tempo_bpm),
                subdivision: subdivision.unwrap_or(config.metronome.subdivision),
                volume: volume.unwrap_or(config.metronome.volume),
            };
            match render {
                Some(path) => run_metronome_render(metronome, seconds, &path)?,
                None => run_metronome_live(metronome, seconds)?,
            }
        }
    };

    if cli.diagnostics {
        eprintln!("{}", serde_json::to_string_pretty(&telemetry::hub().snapshot())?);
    }
    Ok(code)
}

enum Source {
    Wav(PathBuf),
    Synth(SynthSpec),
}

fn run_detect(
    mut config: AppConfig,
    source: Source,
    path: ProcessingPath,
    block_size: usize,
    sensitivity: Option<f32>,
    expect: Option<&Path>,
    output: Option<&Path>,
) -> Result<ExitCode> {
    let (label, audio, synth_expectations) = match source {
        Source::Wav(path) => {
            let audio = fixtures::load_wav(&path)?;
            (path.display().to_string(), audio, None)
        }
        Source::Synth(spec) => {
            let audio = fixtures::FixtureAudio {
                sample_rate: spec.sample_rate,
                samples: fixtures::synth_strokes(&spec),
            };
            let expectations = StrokeExpectations::from_synth(&spec);
            ("synth".to_string(), audio, Some(expectations))
        }
    };
    let expectations = match expect {
        Some(path) => Some(StrokeExpectations::load(path)?),
        None => synth_expectations,
    };

    let block_size = block_size.max(1);
    config.audio.processing_path = path;
    config.audio.sample_rate = audio.sample_rate;
    // Offline replay outruns real time; size the queues for the whole file.
    let blocks = audio.samples.len() / block_size + 1;
    config.audio.buffer_size = block_size;
    config.audio.buffer_pool_size = config.audio.buffer_pool_size.max(blocks);
    config.audio.event_queue_capacity = config.audio.event_queue_capacity.max(blocks * 3);

    let backend = Arc::new(FixtureBackend::streaming(
        audio.samples,
        audio.sample_rate,
        block_size,
    ));
    let progress = backend
        .progress()
        .ok_or_else(|| anyhow!("streaming fixture has no progress handle"))?;

    let mut engine = DetectionEngine::new(backend, &config);
    let mut events = engine.subscribe();
    let patch = sensitivity.map(DetectorConfigPatch::sensitivity);
    let run_id = engine.start(patch)?;
    let active_path = engine.active_path();
    if !progress.wait(Duration::from_secs(120)) {
        engine.stop();
        return Err(anyhow!("fixture replay timed out"));
    }
    engine.stop();

    let mut strokes = Vec::new();
    let mut measurements = Vec::new();
    while let Ok(event) = events.try_recv() {
        match event {
            DetectionEvent::Stroke(stroke) => strokes.push(stroke),
            DetectionEvent::Measurement(measurement) => measurements.push(measurement),
            DetectionEvent::Telemetry(_) => {}
        }
    }

    let report = DetectionReport {
        source: label,
        sample_rate: audio.sample_rate,
        run_id: run_id.0,
        path: active_path,
        stroke_count: strokes.len(),
        strokes,
        measurements,
        stats: engine.last_run_stats().map(|(_, stats)| stats),
    };
    let json = serde_json::to_string_pretty(&report)?;
    println!("{json}");
    if let Some(path) = output {
        std::fs::write(path, &json).with_context(|| format!("writing {}", path.display()))?;
    }

    match expectations {
        Some(expectations) => match expectations.verify(&report.strokes) {
            Ok(()) => Ok(ExitCode::from(0)),
            Err(diff) => {
                emit_diff(&diff)?;
                Ok(ExitCode::from(2))
            }
        },
        None => Ok(ExitCode::from(0)),
    }
}

fn emit_diff(diff: &ExpectationDiff) -> Result<()> {
    let payload = serde_json::json!({ "failures": diff });
    eprintln!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}

fn run_listen(config: AppConfig, seconds: u64, sensitivity: Option<f32>) -> Result<ExitCode> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .context("building runtime")?;

    let mut engine = DetectionEngine::new(default_backend(), &config);
    let stream = engine.event_stream();
    let run_id = engine.start(sensitivity.map(DetectorConfigPatch::sensitivity))?;
    eprintln!("Listening as {run_id} for {seconds}s...");

    let result = runtime.block_on(print_events(stream, seconds));
    engine.stop();
    result?;
    Ok(ExitCode::from(0))
}

async fn print_events<S>(stream: S, seconds: u64) -> Result<()>
where
    S: futures::Stream<Item = DetectionEvent>,
{
    tokio::pin!(stream);
    let deadline = tokio::time::sleep(Duration::from_secs(seconds));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => return Ok(()),
            event = stream.next() => match event {
                Some(DetectionEvent::Telemetry(_)) => {}
                Some(event) => println!("{}", serde_json::to_string(&event)?),
                None => return Ok(()),
            },
        }
    }
}

fn run_metronome_live(config: MetronomeConfig, seconds: u64) -> Result<ExitCode> {
    let mut metronome = Metronome::new(Arc::new(OutputClockFactory), config)?;
    metronome.start()?;
    eprintln!(
        "Metronome at {} BPM, click every {:.1} ms",
        config.tempo_bpm,
        metronome.interval_ms()
    );

    let shared = Arc::new(Mutex::new(metronome));
    let mut driver = MetronomeDriver::spawn(Arc::clone(&shared), DEFAULT_TICK_PERIOD)?;
    std::thread::sleep(Duration::from_secs(seconds));
    driver.stop()?;
    if let Ok(mut metronome) = shared.lock() {
        metronome.stop();
    }
    Ok(ExitCode::from(0))
}

fn run_metronome_render(config: MetronomeConfig, seconds: u64, path: &Path) -> Result<ExitCode> {
    const RENDER_RATE: u32 = 48_000;
    const FRAME_SECONDS: f64 = 1.0 / 60.0;

    let clock = ManualClock::new();
    let mut metronome = Metronome::new(Arc::new(clock.clone()), config)?;
    metronome.start()?;
    let end = seconds as f64;
    while clock_now(&metronome) < end {
        metronome.tick();
        clock.advance(FRAME_SECONDS);
    }
    metronome.stop();

    // The last tick may have scheduled past the end of the render.
    let clicks: Vec<_> = clock
        .clicks()
        .into_iter()
        .filter(|click| click.beat.scheduled_time_seconds < end)
        .collect();
    let total_frames = (end * RENDER_RATE as f64) as usize;
    let samples = render_offline(&clicks, RENDER_RATE, total_frames);
    fixtures::write_wav(path, &samples, RENDER_RATE)?;
    println!(
        "{}",
        serde_json::json!({
            "path": path.display().to_string(),
            "clicks": clicks.len(),
            "sample_rate": RENDER_RATE,
            "seconds": seconds,
        })
    );
    Ok(ExitCode::from(0))
}

fn clock_now(metronome: &Metronome) -> f64 {
    metronome.now_seconds().unwrap_or(f64::INFINITY)
}
