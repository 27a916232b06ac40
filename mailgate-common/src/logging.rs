use std::str::FromStr;

use serde::Deserialize;
use tracing::metadata::LevelFilter;
use tracing_subscriber::{
    Layer, filter::FilterFn, prelude::__tracing_subscriber_SubscriberExt, util::SubscriberInitExt,
};

pub const LEVEL_ENV: &str = "LOG_LEVEL";

#[doc(hidden)]
#[macro_export]
macro_rules! directed {
    ($level:expr, $direction:expr, $($msg:expr),*) => {{
        let span = $crate::tracing::span!($level, $direction);
        let _enter = span.enter();

        $crate::tracing::event!($level, $($msg),*)
    }};
}

/// Protocol traffic written to a peer.
#[macro_export]
macro_rules! outgoing {
    (level = $level:ident, $($msg:expr),*) => {
        $crate::directed!($crate::tracing::Level::$level, "outgoing", $($msg),*)
    };

    ($($msg:expr),*) => {
        $crate::outgoing!(level = TRACE, $($msg),*)
    };
}

/// Protocol traffic read from a peer.
#[macro_export]
macro_rules! incoming {
    (level = $level:ident, $($msg:expr),*) => {
        $crate::directed!($crate::tracing::Level::$level, "incoming", $($msg),*)
    };

    ($($msg:expr),*) => {
        $crate::incoming!(level = TRACE, $($msg),*)
    };
}

/// State changes inside mailgate itself.
#[macro_export]
macro_rules! internal {
    (level = $level:ident, $($msg:expr),*) => {
        $crate::directed!($crate::tracing::Level::$level, "internal", $($msg),*)
    };

    ($($msg:expr),*) => {
        $crate::internal!(level = TRACE, $($msg),*)
    };
}

/// The `logging` section of the configuration file.
///
/// ```ron
/// logging: (
///     level: Some("debug"),
///     targets: ["mailgate", "hickory_resolver"],
///     ansi: false,
/// ),
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Overridden by `LOG_LEVEL` when that is set.
    #[serde(default)]
    pub level: Option<String>,

    /// Target prefixes whose events are shown.
    #[serde(default = "default_targets")]
    pub targets: Vec<String>,

    #[serde(default = "default_ansi")]
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: None,
            targets: default_targets(),
            ansi: default_ansi(),
        }
    }
}

fn default_targets() -> Vec<String> {
    vec!["mailgate".to_string()]
}

const fn default_ansi() -> bool {
    true
}

impl LoggingConfig {
    /// Picks the level from `env`, then the configured level, then the build
    /// default (TRACE for debug builds, INFO for release).
    ///
    /// An unparsable value is reported and skipped.
    pub fn resolve_level(&self, env: Option<&str>) -> LevelFilter {
        let default = if cfg!(debug_assertions) {
            LevelFilter::TRACE
        } else {
            LevelFilter::INFO
        };

        [env, self.level.as_deref()]
            .into_iter()
            .flatten()
            .find_map(|level| {
                LevelFilter::from_str(level.trim())
                    .inspect_err(|_| eprintln!("Invalid log level specified {level}, ignoring"))
                    .ok()
            })
            .unwrap_or(default)
    }

    pub fn allows(&self, target: &str) -> bool {
        allows(&self.targets, target)
    }
}

fn allows(targets: &[String], target: &str) -> bool {
    targets.iter().any(|prefix| target.starts_with(prefix.as_str()))
}

/// Installs the global subscriber.
pub fn init(config: &LoggingConfig) {
    let level = config.resolve_level(std::env::var(LEVEL_ENV).ok().as_deref());
    let targets = config.targets.clone();

    tracing_subscriber::Registry::default()
        .with(
            tracing_subscriber::fmt::layer()
                .with_file(false)
                .with_line_number(false)
                .compact()
                .with_ansi(config.ansi)
                .with_timer(tracing_subscriber::fmt::time::ChronoUtc::rfc_3339())
                .with_filter(level)
                .with_filter(FilterFn::new(move |metadata| {
                    allows(&targets, metadata.target())
                })),
        )
        .init();
}
