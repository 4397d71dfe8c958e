//! Log level selection and subscriber setup.
//!
//! Logs go to stderr. Stdout carries only the startup announcement.

use clap::Args;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Level used when no level flag is given.
pub const DEFAULT_LEVEL: Level = Level::ERROR;

/// Map a command-line flag to a level.
pub fn level_for_flag(flag: &str) -> Option<Level> {
    match flag {
        "--trace" => Some(Level::TRACE),
        "--debug" => Some(Level::DEBUG),
        "--info" => Some(Level::INFO),
        "--warn" => Some(Level::WARN),
        "--error" => Some(Level::ERROR),
        _ => None,
    }
}

/// Pick the level from raw arguments. The first recognised flag wins.
pub fn select_level<I, S>(args: I) -> Level
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    args.into_iter()
        .find_map(|arg| level_for_flag(arg.as_ref()))
        .unwrap_or(DEFAULT_LEVEL)
}

/// The level flags as parsed from the command line.
#[derive(Args, Debug, Default, Clone)]
pub struct LevelFlags {
    #[arg(long)]
    pub trace: bool,
    #[arg(long)]
    pub debug: bool,
    #[arg(long)]
    pub info: bool,
    #[arg(long)]
    pub warn: bool,
    #[arg(long)]
    pub error: bool,
}

impl LevelFlags {
    fn given(&self) -> [(Level, bool); 5] {
        [
            (Level::TRACE, self.trace),
            (Level::DEBUG, self.debug),
            (Level::INFO, self.info),
            (Level::WARN, self.warn),
            (Level::ERROR, self.error),
        ]
    }

    fn is_set(&self, level: Level) -> bool {
        self.given()
            .iter()
            .any(|(flag, set)| *set && *flag == level)
    }

    /// Resolve the level. `args` only orders the flags that were parsed, so
    /// a flag-like option value never counts.
    pub fn level<I, S>(&self, args: I) -> Level
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        args.into_iter()
            .filter_map(|arg| level_for_flag(arg.as_ref()))
            .find(|level| self.is_set(*level))
            .or_else(|| {
                self.given()
                    .into_iter()
                    .find_map(|(level, set)| set.then_some(level))
            })
            .unwrap_or(DEFAULT_LEVEL)
    }
}

/// Install the global fmt subscriber. `RUST_LOG` overrides `level` when set.
///
/// Calling this more than once keeps the first subscriber.
pub fn init(level: Level) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_ascii_lowercase()));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
