use std::fmt;
use std::time::Duration;

use env_logger::Env;
use log::{info, warn};

use services::{Clock, ProgressSettings, StudioOptions, TickDriver, TrainingStudio};
use studio_core::model::{ProgressEvent, ProgressStatus, TrainingConfigPatch};

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    UnknownArg(String),
    InvalidNumber { flag: &'static str, raw: String },
    InvalidDbUrl { raw: String },
    InvalidModels { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidNumber { flag, raw } => write!(f, "invalid {flag} value: {raw}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
            ArgsError::InvalidModels { raw } => write!(f, "invalid --models value: {raw}"),
        }
    }
}

impl std::error::Error for ArgsError {}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

fn parse_number<T: std::str::FromStr>(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<T, ArgsError> {
    let value = require_value(args, flag)?;
    value
        .parse()
        .map_err(|_| ArgsError::InvalidNumber { flag, raw: value })
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  cargo run -p app -- run     [--db <sqlite_url>] [--seconds <n>] [--seed <n>]");
    eprintln!("                              [--models a,b,c] [--tick-ms <n>] [--max-step <x>]");
    eprintln!("  cargo run -p app -- history [--db <sqlite_url>] [--limit <n>]");
    eprintln!("  cargo run -p app -- config  [--db <sqlite_url>] [--set <json>]");
    eprintln!();
    eprintln!("Defaults for run:");
    eprintln!("  --db sqlite:studio.sqlite3");
    eprintln!("  --seconds 30 (0 runs until every model completes)");
    eprintln!("  --models gesture,objectDetection,voiceRecognition");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  STUDIO_DB_URL, RUST_LOG");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Run,
    History,
    Config,
}

impl Command {
    fn from_arg(arg: &str) -> Option<Self> {
        match arg {
            "run" => Some(Self::Run),
            "history" => Some(Self::History),
            "config" => Some(Self::Config),
            _ => None,
        }
    }
}

struct Args {
    db_url: String,
    seconds: u64,
    limit: u32,
    set: Option<String>,
    options: StudioOptions,
}

impl Args {
    fn parse(cmd: Command, args: &mut impl Iterator<Item = String>) -> Result<Self, ArgsError> {
        let mut parsed = Self {
            db_url: std::env::var("STUDIO_DB_URL")
                .ok()
                .map_or_else(|| "sqlite://studio.sqlite3".into(), normalize_sqlite_url),
            seconds: 30,
            limit: 20,
            set: None,
            options: StudioOptions::default(),
        };
        let defaults = ProgressSettings::default();
        let mut tick = None;
        let mut max_step = defaults.max_step;

        while let Some(arg) = args.next() {
            match (cmd, arg.as_str()) {
                (_, "--db") => {
                    let value = require_value(args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    parsed.db_url = normalize_sqlite_url(value);
                }
                (Command::Run, "--seconds") => parsed.seconds = parse_number(args, "--seconds")?,
                (Command::Run, "--seed") => parsed.options.seed = Some(parse_number(args, "--seed")?),
                (Command::Run, "--tick-ms") => {
                    tick = Some(Duration::from_millis(parse_number(args, "--tick-ms")?));
                }
                (Command::Run, "--max-step") => max_step = parse_number(args, "--max-step")?,
                (Command::Run, "--models") => {
                    let value = require_value(args, "--models")?;
                    let models: Vec<String> = value
                        .split(',')
                        .map(str::trim)
                        .filter(|name| !name.is_empty())
                        .map(String::from)
                        .collect();
                    if models.is_empty() {
                        return Err(ArgsError::InvalidModels { raw: value });
                    }
                    parsed.options.model_types = models;
                }
                (Command::History, "--limit") => parsed.limit = parse_number(args, "--limit")?,
                (Command::Config, "--set") => parsed.set = Some(require_value(args, "--set")?),
                (_, "--help" | "-h") => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        let period = tick.unwrap_or(match defaults.driver {
            TickDriver::Timer(period) => period,
            TickDriver::External => Duration::from_millis(300),
        });
        parsed.options.progress = ProgressSettings::timer(period, max_step);
        Ok(parsed)
    }
}

fn normalize_sqlite_url(raw: String) -> String {
    if raw == "sqlite::memory:" || raw.starts_with("sqlite://") {
        return raw;
    }

    let trimmed = raw.trim().to_string();
    let path_str = trimmed
        .strip_prefix("sqlite:")
        .unwrap_or(trimmed.as_str())
        .to_string();
    let path = std::path::Path::new(&path_str);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| std::path::PathBuf::from("."))
            .join(path)
    };
    format!("sqlite://{}", absolute.display())
}

fn print_event(event: &ProgressEvent) {
    match (&event.model_type, event.model_progress, &event.message) {
        (Some(model), Some(model_progress), _) => println!(
            "{:>6.1}%  {model:<20} {model_progress:>6.1}%",
            event.percentage
        ),
        (_, _, Some(message)) => println!("{:>6.1}%  {message}", event.percentage),
        _ => println!("{:>6.1}%  [{}]", event.percentage, event.status),
    }
}

async fn run_session(studio: &TrainingStudio, seconds: u64) -> Result<(), Box<dyn std::error::Error>> {
    let coordinator = studio.coordinator();
    let progress = studio.progress();
    progress.set_on_progress_update(print_event);
    let mut updates = progress.subscribe();

    let session_id = coordinator.start(&TrainingConfigPatch::new()).await?;
    info!("started session {session_id}");

    let deadline = async {
        if seconds == 0 {
            std::future::pending::<()>().await;
        } else {
            tokio::time::sleep(Duration::from_secs(seconds)).await;
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            () = &mut deadline => {
                info!("time limit reached");
                break;
            }
            signal = tokio::signal::ctrl_c() => {
                if let Err(err) = signal {
                    warn!("could not listen for ctrl-c: {err}");
                }
                info!("interrupted");
                break;
            }
            update = updates.recv() => match update {
                Ok(event) if event.model_type.is_some()
                    && event.status == ProgressStatus::Completed => {
                    info!("every model completed");
                    break;
                }
                Ok(_) | Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    let outcome = coordinator.shutdown().await;
    for warning in &outcome.warnings {
        eprintln!("warning: {warning}");
    }
    if let Some(session) = outcome.session {
        println!("session {} {}", session.id(), session.status());
    }
    Ok(())
}

async fn print_history(studio: &TrainingStudio, limit: u32) -> Result<(), Box<dyn std::error::Error>> {
    let items = studio.history().list_recent(limit).await?;
    if items.is_empty() {
        println!("no sessions recorded yet");
        return Ok(());
    }
    for item in items {
        let duration = item
            .duration()
            .map_or_else(|| "-".to_string(), |d| format!("{}s", d.num_seconds()));
        println!(
            "{}  {:<10} {}  {:>6}  {} epochs",
            item.id,
            item.status,
            item.started_at.format("%Y-%m-%d %H:%M:%S"),
            duration,
            item.epochs
        );
    }
    Ok(())
}

async fn print_config(
    studio: &TrainingStudio,
    set: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = match set {
        Some(raw) => {
            let patch: TrainingConfigPatch = serde_json::from_str(raw)?;
            studio.update_training_config(&patch).await?
        }
        None => studio.coordinator().default_config(),
    };
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut argv: Vec<String> = std::env::args().skip(1).collect();

    // No subcommand means a training run.
    let cmd = match argv.first().map(String::as_str) {
        None => Command::Run,
        Some("--help" | "-h") => {
            print_usage();
            return Ok(());
        }
        Some(first) if first.starts_with("--") => Command::Run,
        Some(first) => Command::from_arg(first).ok_or_else(|| {
            eprintln!("unknown subcommand: {first}");
            print_usage();
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "unknown subcommand")
        })?,
    };

    if !argv.is_empty() && !argv[0].starts_with("--") {
        argv.remove(0);
    }

    let mut iter = argv.into_iter();
    let parsed = Args::parse(cmd, &mut iter).map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    prepare_sqlite_file(&parsed.db_url)?;
    let studio = TrainingStudio::new_sqlite(&parsed.db_url, Clock::system(), &parsed.options).await?;

    match cmd {
        Command::Run => run_session(&studio, parsed.seconds).await,
        Command::History => print_history(&studio, parsed.limit).await,
        Command::Config => print_config(&studio, parsed.set.as_deref()).await,
    }
}

fn prepare_sqlite_file(db_url: &str) -> Result<(), Box<dyn std::error::Error>> {
    if db_url == "sqlite::memory:" {
        return Ok(());
    }

    let path = db_url
        .strip_prefix("sqlite://")
        .ok_or_else(|| ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        })?;
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() {
        return Err(ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        }
        .into());
    }

    let path = std::path::Path::new(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    if !path.exists() {
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)?;
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(cmd: Command, args: &[&str]) -> Result<Args, ArgsError> {
        let mut iter = args.iter().map(|s| (*s).to_string());
        Args::parse(cmd, &mut iter)
    }

    #[test]
    fn run_flags_shape_the_studio_options() {
        let args = parse(
            Command::Run,
            &["--seed", "7", "--models", "gesture, gaze", "--tick-ms", "50", "--max-step", "2.5"],
        )
        .unwrap();
        assert_eq!(args.options.seed, Some(7));
        assert_eq!(args.options.model_types, vec!["gesture", "gaze"]);
        assert_eq!(
            args.options.progress,
            ProgressSettings::timer(Duration::from_millis(50), 2.5)
        );
    }

    #[test]
    fn flags_are_scoped_to_their_subcommand() {
        assert!(matches!(
            parse(Command::History, &["--seed", "1"]),
            Err(ArgsError::UnknownArg(_))
        ));
        assert!(matches!(
            parse(Command::Run, &["--models", " , "]),
            Err(ArgsError::InvalidModels { .. })
        ));
        assert!(matches!(
            parse(Command::Run, &["--seconds", "soon"]),
            Err(ArgsError::InvalidNumber { flag: "--seconds", .. })
        ));
    }

    #[test]
    fn relative_sqlite_paths_become_absolute() {
        let url = normalize_sqlite_url("sqlite:data/studio.sqlite3".to_string());
        assert!(url.starts_with("sqlite:///"));
        assert!(url.ends_with("data/studio.sqlite3"));
        assert_eq!(normalize_sqlite_url("sqlite::memory:".into()), "sqlite::memory:");
    }
}
