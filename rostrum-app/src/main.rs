//! Rostrum host binary.
//!
//! Headless front end for the engine SDK: loads persisted settings, applies
//! command-line overrides, wires a `RostrumEngine`, and prints transcript and
//! reveal output to stdout while structured logs go to `ROSTRUM_LOG`.
//!
//! ## Runtime note
//!
//! The engine facade spawns its session on `tokio::task::spawn_blocking`, so
//! the binary owns a small multi-thread runtime and enters it before calling
//! `start()`. Event forwarding stays on plain threads via `blocking_recv` —
//! nothing here needs to be async except waiting for Ctrl-C.

mod settings;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use tracing::{debug, info, warn};

use rostrum_core::{
    assets::registered_models,
    audio::device::list_input_devices,
    codec::decode_wav_bytes,
    generate::HttpGenerationClient,
    transcribe::{backend::StubBackend, TranscriptionEngine},
    BackendFactory, CaptureMode, EngineConfig, GenerationSettings, ModelCache, QuizQuestion,
    RostrumEngine, StreamOptions,
};
use settings::{default_settings_path, load_settings, save_settings, AppSettings};

/// Patience for the post-stop drain: every already-submitted window gets its
/// generation attempt before the reveal, and jobs can take up to a minute.
const COLLECT_TIMEOUT: Duration = Duration::from_secs(300);

const USAGE: &str = "\
rostrum — live lecture capture, transcription, and quiz generation

USAGE:
    rostrum [OPTIONS]                 capture from an input device (Ctrl-C stops)
    rostrum --input lecture.wav       replay a WAV file as a live capture feed
    rostrum --transcribe lecture.wav  one-shot transcription, no generation
    rostrum --list-devices            print input devices
    rostrum --list-models             print registered models

OPTIONS:
    --device <name>            preferred input device
    --model <name>             whisper model (tiny, tiny.en, base, base.en, small, small.en)
    --mode <stream|file>       decode path (default: stream)
    --endpoint <url>           quiz service base URL
    --room <code>              room the generated questions belong to
    --generation-model <name>  service-side LLM (default: gemma3)
    --questions <n>            questions per window, 1-10 (default: 2)
    --language <code>          decode language hint (default: en)
    --duration <secs>          stop a live capture automatically after this long
    --settings <path>          settings file (default: platform data dir)
    --save-settings            persist the effective settings back to the file
    --json                     emit events and the reveal as JSON lines
    -h, --help                 show this help
";

enum Command {
    Capture { replay: Option<PathBuf> },
    Transcribe(PathBuf),
    ListDevices,
    ListModels,
    Help,
}

#[derive(Default)]
struct CliOverrides {
    settings_path: Option<PathBuf>,
    device: Option<String>,
    model: Option<String>,
    mode: Option<String>,
    endpoint: Option<String>,
    room: Option<String>,
    generation_model: Option<String>,
    questions: Option<u32>,
    language: Option<String>,
    duration_secs: Option<u64>,
    save: bool,
    json: bool,
}

fn parse_args(args: &[String]) -> anyhow::Result<(Command, CliOverrides)> {
    let mut overrides = CliOverrides::default();
    let mut replay: Option<PathBuf> = None;
    let mut transcribe: Option<PathBuf> = None;
    let mut list_devices = false;
    let mut list_models = false;

    let mut iter = args.iter();
    while let Some(flag) = iter.next() {
        let mut value = |name: &str| -> anyhow::Result<String> {
            iter.next()
                .cloned()
                .with_context(|| format!("{name} needs a value"))
        };

        match flag.as_str() {
            "--input" => replay = Some(PathBuf::from(value("--input")?)),
            "--transcribe" => transcribe = Some(PathBuf::from(value("--transcribe")?)),
            "--device" => overrides.device = Some(value("--device")?),
            "--model" => overrides.model = Some(value("--model")?),
            "--mode" => overrides.mode = Some(value("--mode")?),
            "--endpoint" => overrides.endpoint = Some(value("--endpoint")?),
            "--room" => overrides.room = Some(value("--room")?),
            "--generation-model" => {
                overrides.generation_model = Some(value("--generation-model")?)
            }
            "--questions" => {
                let raw = value("--questions")?;
                overrides.questions =
                    Some(raw.parse().with_context(|| {
                        format!("--questions expects a number, got {raw:?}")
                    })?);
            }
            "--language" => overrides.language = Some(value("--language")?),
            "--duration" => {
                let raw = value("--duration")?;
                overrides.duration_secs =
                    Some(raw.parse().with_context(|| {
                        format!("--duration expects seconds, got {raw:?}")
                    })?);
            }
            "--settings" => overrides.settings_path = Some(PathBuf::from(value("--settings")?)),
            "--save-settings" => overrides.save = true,
            "--json" => overrides.json = true,
            "--list-devices" => list_devices = true,
            "--list-models" => list_models = true,
            "-h" | "--help" => return Ok((Command::Help, overrides)),
            other => bail!("unknown flag {other:?} (see --help)"),
        }
    }

    if replay.is_some() && transcribe.is_some() {
        bail!("--input and --transcribe are mutually exclusive");
    }

    let command = if list_devices {
        Command::ListDevices
    } else if list_models {
        Command::ListModels
    } else if let Some(path) = transcribe {
        Command::Transcribe(path)
    } else {
        Command::Capture { replay }
    };
    Ok((command, overrides))
}

fn effective_settings(overrides: &CliOverrides) -> anyhow::Result<AppSettings> {
    let path = overrides
        .settings_path
        .clone()
        .unwrap_or_else(default_settings_path);
    let mut settings = load_settings(&path);

    if let Some(device) = &overrides.device {
        settings.preferred_input_device = Some(device.clone());
    }
    if let Some(model) = &overrides.model {
        settings.model = model.clone();
    }
    if let Some(mode) = &overrides.mode {
        settings.mode = mode.clone();
    }
    if let Some(endpoint) = &overrides.endpoint {
        settings.endpoint = endpoint.clone();
    }
    if let Some(room) = &overrides.room {
        settings.room_code = room.clone();
    }
    if let Some(model) = &overrides.generation_model {
        settings.generation_model = model.clone();
    }
    if let Some(count) = overrides.questions {
        settings.question_count = count;
    }
    if let Some(language) = &overrides.language {
        settings.language = language.clone();
    }
    settings.normalize();

    if overrides.save {
        save_settings(&path, &settings)
            .with_context(|| format!("saving settings to {}", path.display()))?;
        info!(path = %path.display(), "settings saved");
    }
    Ok(settings)
}

fn build_engine(settings: &AppSettings) -> anyhow::Result<RostrumEngine> {
    let cache = Arc::new(ModelCache::open_default()?);
    let factory: BackendFactory = Arc::new(|| Box::new(StubBackend::new()));
    let generation = Arc::new(HttpGenerationClient::new(
        &settings.endpoint,
        &settings.room_code,
    ));

    let config = EngineConfig {
        model: settings.model.clone(),
        mode: match settings.mode.as_str() {
            "file" => CaptureMode::File,
            _ => CaptureMode::Stream,
        },
        stream: StreamOptions {
            language: settings.language.clone(),
            ..StreamOptions::default()
        },
        generation: GenerationSettings {
            model: settings.generation_model.clone(),
            question_count: settings.question_count,
            ..GenerationSettings::default()
        },
        ..EngineConfig::default()
    };

    Ok(RostrumEngine::new(config, cache, factory, generation))
}

/// Fan engine broadcasts out to stdout / tracing on plain threads.
fn forward_events(engine: &RostrumEngine, json: bool) {
    use tokio::sync::broadcast::error::RecvError;

    let mut transcript_rx = engine.subscribe_transcripts();
    std::thread::spawn(move || loop {
        match transcript_rx.blocking_recv() {
            Ok(event) => {
                if json {
                    if let Ok(line) = serde_json::to_string(&event) {
                        println!("{line}");
                    }
                } else {
                    for segment in &event.segments {
                        println!("[{:7.1}s] {}", segment.from, segment.text);
                    }
                }
            }
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "transcript stream lagged"),
            Err(RecvError::Closed) => break,
        }
    });

    let mut status_rx = engine.subscribe_status();
    std::thread::spawn(move || loop {
        match status_rx.blocking_recv() {
            Ok(event) => {
                if json {
                    if let Ok(line) = serde_json::to_string(&event) {
                        println!("{line}");
                    }
                } else {
                    match &event.detail {
                        Some(detail) => info!(status = ?event.status, detail, "session status"),
                        None => info!(status = ?event.status, "session status"),
                    }
                }
            }
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "status stream lagged"),
            Err(RecvError::Closed) => break,
        }
    });

    let mut progress_rx = engine.subscribe_progress();
    std::thread::spawn(move || loop {
        match progress_rx.blocking_recv() {
            Ok(event) => {
                if event.total > 0 && event.loaded == event.total {
                    info!(model = %event.model, bytes = event.total, "model ready");
                } else {
                    debug!(model = %event.model, event.loaded, event.total, "model download");
                }
            }
            Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => break,
        }
    });

    let mut activity_rx = engine.subscribe_activity();
    std::thread::spawn(move || loop {
        match activity_rx.blocking_recv() {
            Ok(event) => {
                debug!(
                    rms = format_args!("{:.4}", event.rms),
                    is_speech = event.is_speech,
                    "audio activity"
                );
            }
            Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => break,
        }
    });
}

fn print_questions(questions: &[QuizQuestion], json: bool) {
    if json {
        if let Ok(line) = serde_json::to_string(questions) {
            println!("{line}");
        }
        return;
    }

    if questions.is_empty() {
        println!("No questions were generated for this session.");
        return;
    }

    println!("\nRevealed {} question(s):\n", questions.len());
    for (i, question) in questions.iter().enumerate() {
        println!("{}. {}", i + 1, question.question);
        for (j, option) in question.options.iter().enumerate() {
            let marker = if j == question.correct_option_index {
                '*'
            } else {
                ' '
            };
            let label = (b'a' + j as u8) as char;
            println!("  {marker} {label}) {option}");
        }
        println!();
    }
}

fn capture(settings: &AppSettings, replay: Option<PathBuf>, overrides: &CliOverrides) -> anyhow::Result<()> {
    let engine = build_engine(settings)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;
    let _guard = runtime.enter();

    forward_events(&engine, overrides.json);
    engine.warm_up()?;

    let questions = match replay {
        Some(path) => {
            let bytes = std::fs::read(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let (samples, rate) = decode_wav_bytes(&bytes)?;
            info!(
                path = %path.display(),
                rate,
                seconds = format_args!("{:.1}", samples.len() as f32 / rate as f32),
                "replaying file as capture feed"
            );

            let mut feed = engine.start_with_feed(rate)?;
            let mut cursor = 0usize;
            while cursor < samples.len() && feed.is_active() {
                let end = (cursor + 8_192).min(samples.len());
                cursor += feed.push(&samples[cursor..end]);
                std::thread::sleep(Duration::from_millis(5));
            }

            // Let the session catch up with the ring before stopping, so the
            // tail of the file is decoded rather than discarded.
            let deadline = Instant::now() + Duration::from_secs(60);
            while engine.diagnostics_snapshot().samples_in < cursor
                && Instant::now() < deadline
            {
                std::thread::sleep(Duration::from_millis(10));
            }

            engine.stop_and_collect(COLLECT_TIMEOUT)?
        }
        None => {
            engine.start_with_device(settings.preferred_input_device.clone())?;
            if !overrides.json {
                println!("Capturing. Press Ctrl-C to stop and reveal questions.");
            }

            match overrides.duration_secs {
                Some(secs) => runtime.block_on(async {
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_secs(secs)) => {}
                        _ = tokio::signal::ctrl_c() => {}
                    }
                }),
                None => {
                    runtime
                        .block_on(tokio::signal::ctrl_c())
                        .context("waiting for Ctrl-C")?;
                }
            }

            engine.stop_and_collect(COLLECT_TIMEOUT)?
        }
    };

    print_questions(&questions, overrides.json);
    Ok(())
}

fn transcribe_file(settings: &AppSettings, path: &PathBuf, json: bool) -> anyhow::Result<()> {
    let bytes =
        std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let (samples, rate) = decode_wav_bytes(&bytes)?;

    let cache = Arc::new(ModelCache::open_default()?);
    let factory: BackendFactory = Arc::new(|| Box::new(StubBackend::new()));
    let mut engine = TranscriptionEngine::new(cache, factory)?;
    engine.load(&settings.model, &mut |loaded, total| {
        debug!(loaded, total, "model download");
    })?;

    let segments = engine.decode(&samples, rate)?;
    if json {
        if let Ok(line) = serde_json::to_string(&segments) {
            println!("{line}");
        }
        return Ok(());
    }

    for segment in &segments {
        println!("[{:7.1}s..{:7.1}s] {}", segment.from, segment.to, segment.text);
    }
    let transcript: Vec<&str> = segments.iter().map(|s| s.text.as_str()).collect();
    println!("\n{}", transcript.join(" "));
    Ok(())
}

fn list_devices() {
    let devices = list_input_devices();
    if devices.is_empty() {
        println!("No input devices found.");
        return;
    }
    for device in devices {
        let mut notes = Vec::new();
        if device.is_default {
            notes.push("default");
        }
        if device.is_recommended {
            notes.push("recommended");
        }
        if device.is_monitor {
            notes.push("playback monitor");
        }
        if notes.is_empty() {
            println!("  {}", device.name);
        } else {
            println!("  {} ({})", device.name, notes.join(", "));
        }
    }
}

fn list_models() -> anyhow::Result<()> {
    let cache = ModelCache::open_default()?;
    for name in registered_models() {
        if cache.is_cached(name) {
            println!("  {name} (cached)");
        } else {
            println!("  {name}");
        }
    }
    Ok(())
}

fn main() {
    // ── Tracing ───────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("ROSTRUM_LOG")
                .unwrap_or_else(|_| "rostrum=info".parse().unwrap()),
        )
        .init();

    if let Err(e) = run() {
        eprintln!("rostrum: {e:#}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let (command, overrides) = parse_args(&args)?;

    match command {
        Command::Help => {
            print!("{USAGE}");
            Ok(())
        }
        Command::ListDevices => {
            list_devices();
            Ok(())
        }
        Command::ListModels => list_models(),
        Command::Transcribe(path) => {
            let settings = effective_settings(&overrides)?;
            transcribe_file(&settings, &path, overrides.json)
        }
        Command::Capture { replay } => {
            let settings = effective_settings(&overrides)?;
            info!(
                model = %settings.model,
                mode = %settings.mode,
                endpoint = %settings.endpoint,
                room = %settings.room_code,
                "rostrum starting"
            );
            capture(&settings, replay, &overrides)
        }
    }
}
