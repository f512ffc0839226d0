use anyhow::{bail, Context, Result};
use macro_engine::platform::{NativeWindowActivator, WindowActivator};
use macro_engine::testing::{LoggingInputSink, LoggingWindowActivator};
use macro_engine::{
    change_speed, drop_events, trim_unreleased_keys, FileMacroStore, JitterRange, Macro,
    MacroEngine, MacroStore, PlatformBackend, PlaybackConfig, PlaybackReport, RecorderConfig,
    StoreError,
};
use std::io::{self, Write};
use std::ops::Range;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::ctrl_c;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

pub struct PlayOptions {
    pub loop_playback: bool,
    pub vary_speed: bool,
    pub jitter: (f64, f64),
    pub seed: Option<u64>,
    pub window: Option<String>,
    pub dry_run: bool,
}

pub fn open_store(dir: Option<PathBuf>) -> Result<FileMacroStore> {
    let dir = match dir {
        Some(dir) => dir,
        None => dirs::data_dir()
            .context("no platform data directory; pass --store-dir")?
            .join("macro-tool")
            .join("macros"),
    };
    FileMacroStore::open(&dir)
        .with_context(|| format!("failed to open macro store at {}", dir.display()))
}

fn format_duration(d: Duration) -> String {
    let ms = d.as_millis();
    if ms < 1000 {
        format!("{}ms", ms)
    } else {
        format!("{:.1}s", d.as_secs_f64())
    }
}

pub async fn record(store: &FileMacroStore, name: &str, record_mouse_moves: bool) -> Result<()> {
    if store.get(name).is_some() {
        warn!(name, "A macro with this name exists and will be replaced");
    }

    let config = RecorderConfig {
        record_mouse_moves,
        ..RecorderConfig::default()
    };
    let engine = MacroEngine::with_backend(PlatformBackend::native(), config);
    let mut events = engine.recorder().event_stream();
    let mut done = engine.recorder().start().context("failed to start recording")?;
    println!("Recording '{}'. Press Ctrl+C to stop.", name);

    let mut captured = 0usize;
    let finished_early = loop {
        tokio::select! {
            _ = ctrl_c() => break None,
            outcome = &mut done => break Some(outcome),
            Some(event) = events.next() => {
                captured += 1;
                debug!(?event, "captured");
                print!("\r{} events", captured);
                let _ = io::stdout().flush();
            }
        }
    };
    println!();

    let outcome = match finished_early {
        Some(outcome) => outcome,
        None => {
            engine.recorder().stop();
            done.await
        }
    };
    let captured = outcome.context("recording failed")?;
    // The Ctrl+C that stopped the recording is captured without its release
    let recorded = trim_unreleased_keys(&captured);
    if recorded.len() < captured.len() {
        info!(
            trimmed = captured.len() - recorded.len(),
            "Dropped key presses that were never released"
        );
    }

    store
        .save(name, &recorded)
        .with_context(|| format!("failed to save macro '{}'", name))?;
    println!(
        "Saved '{}': {} events, {}",
        name,
        recorded.len(),
        format_duration(recorded.total_duration())
    );
    Ok(())
}

pub async fn play(store: &FileMacroStore, name: &str, options: PlayOptions) -> Result<()> {
    let recorded = Arc::new(load(store, name)?);

    let mut backend = PlatformBackend::native();
    if options.dry_run {
        backend.sink = Arc::new(LoggingInputSink::new());
        backend.windows = Arc::new(LoggingWindowActivator::new());
    }
    let engine = MacroEngine::with_backend(backend, RecorderConfig::default());

    let config = PlaybackConfig {
        target_window_title: options.window,
        loop_playback: options.loop_playback,
        vary_speed: options.vary_speed,
        jitter: JitterRange::new(options.jitter.0, options.jitter.1),
        jitter_seed: options.seed,
    };
    let mut done = engine
        .player()
        .start(Arc::clone(&recorded), config)
        .context("failed to start playback")?;
    info!(
        name,
        events = recorded.len(),
        duration = %format_duration(recorded.total_duration()),
        "Playing macro"
    );

    let outcome = tokio::select! {
        outcome = &mut done => outcome,
        _ = ctrl_c() => {
            engine.player().stop();
            done.await
        }
    };
    let report = outcome.context("playback failed")?;
    print_report(&report);
    Ok(())
}

fn print_report(report: &PlaybackReport) {
    println!(
        "{} {} events over {} pass(es), {} skipped",
        if report.cancelled { "Stopped after" } else { "Played" },
        report.dispatched,
        report.passes,
        report.skipped
    );
    for warning in &report.warnings {
        println!("warning: {}", warning);
    }
}

fn load(store: &FileMacroStore, name: &str) -> Result<Macro> {
    match store.load(name) {
        Ok(m) => Ok(m),
        Err(StoreError::NotFound(_)) => bail!("no macro named '{}' (see `macro-tool list`)", name),
        Err(e) => Err(e).with_context(|| format!("failed to load macro '{}'", name)),
    }
}

pub fn list(store: &FileMacroStore) -> Result<()> {
    let names = store.list().context("failed to list macros")?;
    if names.is_empty() {
        println!("No macros in {}", store.dir().display());
        return Ok(());
    }
    for name in names {
        match store.get(&name) {
            Some(m) => println!(
                "{:<24} {:>6} events {:>8}  {}",
                name,
                m.len(),
                format_duration(m.total_duration()),
                m.created_at().format("%Y-%m-%d %H:%M")
            ),
            None => println!("{:<24} (unreadable)", name),
        }
    }
    Ok(())
}

pub fn show(store: &FileMacroStore, name: &str, all: bool, json: bool) -> Result<()> {
    let m = load(store, name)?;
    if json {
        println!("{}", m.to_json()?);
        return Ok(());
    }

    println!("Name:     {}", m.name());
    println!("Created:  {}", m.created_at().to_rfc3339());
    println!("Events:   {}", m.len());
    println!("Duration: {}", format_duration(m.total_duration()));
    if all {
        let mut elapsed = 0u64;
        for (i, event) in m.events().iter().enumerate() {
            elapsed += event.offset_ms;
            println!(
                "{:>5} {:>8}ms (+{:>5}) {}",
                i,
                elapsed,
                event.offset_ms,
                serde_json::to_string(&event.action)?
            );
        }
    }
    Ok(())
}

pub struct EditOptions {
    pub drop: Option<Range<usize>>,
    pub speed: Option<f64>,
    pub trim_held_keys: bool,
    pub save_as: Option<String>,
}

/// Parse an event range as numbered by `show --all`: `5`, `3..7` or `3..=7`
pub fn parse_range(s: &str) -> std::result::Result<Range<usize>, String> {
    let index = |part: &str| {
        part.trim()
            .parse::<usize>()
            .map_err(|_| format!("'{}' is not an event index", part))
    };
    let range = if let Some((start, end)) = s.split_once("..=") {
        index(start)?..index(end)?.saturating_add(1)
    } else if let Some((start, end)) = s.split_once("..") {
        index(start)?..index(end)?
    } else {
        let i = index(s)?;
        i..i + 1
    };
    if range.is_empty() {
        return Err(format!("'{}' selects no events", s));
    }
    Ok(range)
}

/// Apply edits to a saved macro and save the result
pub fn edit(store: &FileMacroStore, name: &str, options: EditOptions) -> Result<()> {
    if options.drop.is_none() && options.speed.is_none() && !options.trim_held_keys {
        bail!("nothing to change; pass --drop, --speed or --trim-held-keys");
    }
    let original = load(store, name)?;

    let mut edited = original.clone();
    if let Some(range) = options.drop {
        edited = drop_events(&edited, range)?;
    }
    if options.trim_held_keys {
        edited = trim_unreleased_keys(&edited);
    }
    if let Some(speed) = options.speed {
        edited = change_speed(&edited, speed)?;
    }

    let target = options.save_as.as_deref().unwrap_or(name);
    if target != name && store.get(target).is_some() {
        warn!(name = target, "A macro with this name exists and will be replaced");
    }
    store
        .save(target, &edited)
        .with_context(|| format!("failed to save macro '{}'", target))?;
    println!(
        "Saved '{}': {} -> {} events, {} -> {}",
        target,
        original.len(),
        edited.len(),
        format_duration(original.total_duration()),
        format_duration(edited.total_duration())
    );
    Ok(())
}

pub fn delete(store: &FileMacroStore, name: &str) -> Result<()> {
    match store.delete(name) {
        Ok(()) => {
            println!("Deleted '{}'", name);
            Ok(())
        }
        Err(StoreError::NotFound(_)) => bail!("no macro named '{}'", name),
        Err(e) => Err(e).with_context(|| format!("failed to delete macro '{}'", name)),
    }
}

pub fn windows() -> Result<()> {
    let titles = NativeWindowActivator::new()
        .list_titles()
        .context("failed to list windows")?;
    for title in titles {
        println!("{}", title);
    }
    Ok(())
}
