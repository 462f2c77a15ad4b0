use anyhow::{Context, Result, bail};
use clap::{Arg, ArgAction, ArgMatches, Command, value_parser};
use crossbeam_channel::select;
use log::{info, warn};
use practice_core::audio::{AudioInput, CpalInput, ReplayInput};
use practice_core::compare::suggestion;
use practice_core::midi;
use practice_core::playback::{ClockPlayback, Playback, PlaybackEvent};
use practice_core::score::Song;
use practice_core::scoring::PracticeScore;
use practice_core::session::{PracticeEngine, SessionEvent};
use practice_core::EngineConfig;
use std::f32::consts::PI;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

fn cli() -> Command {
    Command::new("practice")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Play along with a score and get graded on pitch and timing")
        .arg(
            Arg::new("song")
                .value_name("SONG")
                .value_parser(value_parser!(PathBuf))
                .help("Song JSON file (default: the built-in sample song)"),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .value_parser(value_parser!(PathBuf))
                .help("Engine configuration JSON file"),
        )
        .arg(
            Arg::new("speed")
                .short('s')
                .long("speed")
                .value_name("RATE")
                .value_parser(value_parser!(f32))
                .default_value("1.0")
                .help("Playback speed, 0.5 to 2.0"),
        )
        .arg(
            Arg::new("sync-offset")
                .long("sync-offset")
                .value_name("MS")
                .value_parser(value_parser!(i64))
                .allow_negative_numbers(true)
                .help("Milliseconds subtracted from the playback position"),
        )
        .arg(
            Arg::new("export-midi")
                .long("export-midi")
                .value_name("FILE")
                .value_parser(value_parser!(PathBuf))
                .help("Write the song as a MIDI file and exit"),
        )
        .arg(
            Arg::new("save-session")
                .long("save-session")
                .value_name("FILE")
                .value_parser(value_parser!(PathBuf))
                .help("Write the completed session record as JSON"),
        )
        .arg(
            Arg::new("simulate")
                .long("simulate")
                .action(ArgAction::SetTrue)
                .help("Play the score back as sine tones instead of using the microphone"),
        )
}

fn load_inputs(matches: &ArgMatches) -> Result<(Song, EngineConfig)> {
    let song = match matches.get_one::<PathBuf>("song") {
        Some(path) => {
            Song::load(path).with_context(|| format!("loading song {}", path.display()))?
        }
        None => Song::sample(),
    };
    let mut config = match matches.get_one::<PathBuf>("config") {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if let Some(&offset) = matches.get_one::<i64>("sync-offset") {
        config.sync_offset_ms = offset;
    }
    config.validate()?;
    Ok((song, config))
}

/// Renders the score as sine frames, one per capture buffer, delivered at
/// the cadence a live input would have at `speed`.
fn simulated_input(song: &Song, config: &EngineConfig, speed: f32) -> ReplayInput {
    let sample_rate = config.capture.sample_rate;
    let buffer_size = config.capture.buffer_size;
    let frame_ms = buffer_size as f64 * 1000.0 / f64::from(sample_rate);
    let frame_count = (song.total_duration_ms() as f64 / frame_ms).ceil() as usize;

    let frames = (0..frame_count)
        .map(|k| {
            let position_ms = (k as f64 * frame_ms) as u64;
            match song.note_at_time(position_ms) {
                Some(note) => {
                    let step = 2.0 * PI * note.frequency_hz / sample_rate as f32;
                    (0..buffer_size).map(|i| 0.5 * (step * i as f32).sin()).collect()
                }
                None => vec![0.0; buffer_size],
            }
        })
        .collect();

    let interval = Duration::from_secs_f64(frame_ms / 1000.0 / f64::from(speed));
    ReplayInput::new(frames, sample_rate, interval)
}

fn print_report(song: &Song, score: &PracticeScore) {
    let stats = &score.statistics;
    println!();
    println!("=== {} ===", song.title);
    println!("Score: {} ({}: {})", score.total_score, score.grade, score.grade.text());
    println!(
        "  pitch {:.1}  timing {:.1}  completion {:.1}",
        score.pitch_accuracy_score, score.timing_accuracy_score, score.completion_score
    );
    println!(
        "  perfect {}  good {}  fair {}  poor {}  miss {}",
        stats.perfect_count, stats.good_count, stats.fair_count, stats.poor_count, stats.miss_count
    );
    println!(
        "  average deviation {:.1} cents, mean timing error {:.0} ms",
        stats.average_deviation, stats.mean_abs_timing_error_ms
    );
    for strength in &score.strengths {
        println!("+ {strength}");
    }
    for weakness in &score.weaknesses {
        println!("- {weakness}");
    }
    for line in &score.suggestions {
        println!("> {line}");
    }
    println!("{}", score.grade.encouragement());
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let matches = cli().get_matches();
    let (song, config) = load_inputs(&matches)?;

    if let Some(path) = matches.get_one::<PathBuf>("export-midi") {
        midi::save(&song, config.instrument_program, path)?;
        return Ok(());
    }

    let speed = matches.get_one::<f32>("speed").copied().unwrap_or(1.0);
    let (playback, playback_events) = ClockPlayback::new(song.total_duration_ms());
    playback.set_speed(speed);

    let input: Box<dyn AudioInput> = if matches.get_flag("simulate") {
        Box::new(simulated_input(&song, &config, playback.speed()))
    } else {
        Box::new(CpalInput::new(config.capture.clone()))
    };

    let song = Arc::new(song);
    let (mut engine, events) =
        PracticeEngine::new(Arc::clone(&song), config, input, Arc::new(playback));
    engine.start().context("starting the practice session")?;
    info!("[MAIN] Practicing {} ({} notes)", song.title, song.total_note_count());

    loop {
        select! {
            recv(events) -> event => match event {
                Ok(SessionEvent::MeasureChanged { measure_number, .. }) => {
                    println!("-- measure {measure_number}")
                }
                Ok(SessionEvent::NoteHit(result)) => println!(
                    "  {:<4} {:>+6.1} cents {:>+5} ms  {}",
                    result.target_note.pitch_name,
                    result.deviation_cents,
                    result.timing_error_ms,
                    result.verdict.label()
                ),
                Ok(SessionEvent::NoteMissed(result)) => {
                    let advice = suggestion(&result);
                    println!("  {:<4} missed  {}", result.target_note.pitch_name, advice)
                }
                Ok(SessionEvent::PlaybackFinished) => break,
                Ok(SessionEvent::CaptureError(message)) => {
                    engine.stop()?;
                    bail!("audio capture failed: {message}");
                }
                Ok(SessionEvent::Error(message)) => warn!("[MAIN] {message}"),
                Ok(_) => {}
                Err(_) => break,
            },
            recv(playback_events) -> event => {
                if let Ok(PlaybackEvent::Error(message)) = event {
                    warn!("[MAIN] Playback: {message}");
                }
            },
        }
    }

    let score = engine.complete()?;
    print_report(&song, &score);

    let save_to = matches.get_one::<PathBuf>("save-session");
    if let (Some(path), Some(session)) = (save_to, engine.session()) {
        std::fs::write(path, serde_json::to_string_pretty(session)?)
            .with_context(|| format!("writing session to {}", path.display()))?;
        info!("[MAIN] Session saved to {}", path.display());
    }
    Ok(())
}
