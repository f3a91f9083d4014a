//! Tracy profiling hooks.
//!
//! Built with the `tracy` feature (`cargo build -p frontline --features tracy`),
//! the `tracing` spans around battle resolution, the tracker's fight loop and
//! odds trials show up in the Tracy timeline. Every finished battle round is a
//! secondary frame named `round`. Without the feature all of this compiles to
//! nothing.

use tracing::Level;

/// Minimum span level forwarded to Tracy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TraceLevel {
    /// Battle and tracker spans only
    #[default]
    Info,
    /// Adds per-step spans
    Debug,
    Trace,
}

impl TraceLevel {
    pub fn as_level(self) -> Level {
        match self {
            TraceLevel::Info => Level::INFO,
            TraceLevel::Debug => Level::DEBUG,
            TraceLevel::Trace => Level::TRACE,
        }
    }
}

impl std::str::FromStr for TraceLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "info" => Ok(TraceLevel::Info),
            "debug" => Ok(TraceLevel::Debug),
            "trace" => Ok(TraceLevel::Trace),
            other => Err(format!("Unknown trace level '{}' (info, debug, trace)", other)),
        }
    }
}

/// Install the Tracy subscriber.
///
/// # Panics
///
/// Panics if a global subscriber has already been set.
#[cfg(feature = "tracy")]
pub fn init_tracy(level: TraceLevel) {
    use tracing_subscriber::filter::LevelFilter;
    use tracing_subscriber::prelude::*;

    tracing_subscriber::registry()
        .with(tracing_tracy::TracyLayer::default())
        .with(LevelFilter::from_level(level.as_level()))
        .init();
}

#[cfg(not(feature = "tracy"))]
pub fn init_tracy(_level: TraceLevel) {}

#[cfg(feature = "tracy")]
#[inline]
pub fn frame_mark_round() {
    tracy_client::secondary_frame_mark!("round");
}

#[cfg(not(feature = "tracy"))]
#[inline]
pub fn frame_mark_round() {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_level_parsing() {
        assert_eq!("DEBUG".parse::<TraceLevel>(), Ok(TraceLevel::Debug));
        assert_eq!("trace".parse::<TraceLevel>().map(TraceLevel::as_level), Ok(Level::TRACE));
        assert!("loud".parse::<TraceLevel>().unwrap_err().contains("loud"));
        assert_eq!(TraceLevel::default().as_level(), Level::INFO);
    }
}
