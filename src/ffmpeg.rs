//! FFmpeg console verbosity.
//!
//! FFmpeg writes its own diagnostics to stderr, independent of the `log`
//! facade this crate uses. A full match scan decodes every frame, so a
//! noisy demuxer can flood the terminal; [`set_ffmpeg_log_level`] tunes or
//! silences it.
//!
//! ```no_run
//! use killreel::FfmpegLogLevel;
//!
//! killreel::set_ffmpeg_log_level(FfmpegLogLevel::Error);
//! ```

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    str::FromStr,
};

use ffmpeg_next::util::log::Level;

use crate::error::ReelError;

/// FFmpeg log level, most quiet first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FfmpegLogLevel {
    /// No output.
    Quiet,
    /// Unrecoverable errors about to abort.
    Panic,
    /// Unrecoverable errors.
    Fatal,
    /// Recoverable errors.
    Error,
    /// Warnings. FFmpeg's default.
    Warning,
    /// Informational messages.
    Info,
    /// Verbose informational messages.
    Verbose,
    /// Debugging messages.
    Debug,
    /// Everything.
    Trace,
}

const NAMES: [(FfmpegLogLevel, &str); 9] = [
    (FfmpegLogLevel::Quiet, "quiet"),
    (FfmpegLogLevel::Panic, "panic"),
    (FfmpegLogLevel::Fatal, "fatal"),
    (FfmpegLogLevel::Error, "error"),
    (FfmpegLogLevel::Warning, "warning"),
    (FfmpegLogLevel::Info, "info"),
    (FfmpegLogLevel::Verbose, "verbose"),
    (FfmpegLogLevel::Debug, "debug"),
    (FfmpegLogLevel::Trace, "trace"),
];

impl FfmpegLogLevel {
    /// All levels, most quiet first.
    pub fn all() -> impl Iterator<Item = FfmpegLogLevel> {
        NAMES.iter().map(|(level, _)| *level)
    }

    fn name(self) -> &'static str {
        NAMES
            .iter()
            .find(|(level, _)| *level == self)
            .map_or("warning", |(_, name)| name)
    }

    fn to_ffmpeg_level(self) -> Level {
        match self {
            FfmpegLogLevel::Quiet => Level::Quiet,
            FfmpegLogLevel::Panic => Level::Panic,
            FfmpegLogLevel::Fatal => Level::Fatal,
            FfmpegLogLevel::Error => Level::Error,
            FfmpegLogLevel::Warning => Level::Warning,
            FfmpegLogLevel::Info => Level::Info,
            FfmpegLogLevel::Verbose => Level::Verbose,
            FfmpegLogLevel::Debug => Level::Debug,
            FfmpegLogLevel::Trace => Level::Trace,
        }
    }
}

impl Display for FfmpegLogLevel {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.name())
    }
}

impl FromStr for FfmpegLogLevel {
    type Err = ReelError;

    /// Parse a level name as FFmpeg's `-loglevel` accepts it (`warn` is
    /// also accepted).
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim().to_ascii_lowercase();
        if value == "warn" {
            return Ok(FfmpegLogLevel::Warning);
        }
        NAMES
            .iter()
            .find(|(_, name)| *name == value)
            .map(|(level, _)| *level)
            .ok_or_else(|| {
                ReelError::InvalidConfiguration(format!("unknown FFmpeg log level '{value}'"))
            })
    }
}

/// Set FFmpeg's stderr verbosity. Does not affect `log` output.
pub fn set_ffmpeg_log_level(level: FfmpegLogLevel) {
    log::debug!("Setting FFmpeg log level to {level}");
    ffmpeg_next::util::log::set_level(level.to_ffmpeg_level());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_parse_back_to_levels() {
        for level in FfmpegLogLevel::all() {
            assert_eq!(level.to_string().parse::<FfmpegLogLevel>().unwrap(), level);
        }
    }

    #[test]
    fn parsing_is_case_insensitive_and_accepts_warn() {
        assert_eq!("ERROR".parse::<FfmpegLogLevel>().unwrap(), FfmpegLogLevel::Error);
        assert_eq!("warn".parse::<FfmpegLogLevel>().unwrap(), FfmpegLogLevel::Warning);
        assert!("loud".parse::<FfmpegLogLevel>().is_err());
    }

    #[test]
    fn levels_order_from_quiet_to_trace() {
        assert!(FfmpegLogLevel::Quiet < FfmpegLogLevel::Error);
        assert!(FfmpegLogLevel::Debug < FfmpegLogLevel::Trace);
    }
}
