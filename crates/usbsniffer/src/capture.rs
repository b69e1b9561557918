//! Capture session options.

use std::path::PathBuf;

use merge::Merge;

use crate::error::FormatError;
use crate::usb::Speed;
use crate::writer::TraceFormat;

/// Default destination when none is given.
pub const DEFAULT_OUTPUT: &str = "capture.usb";

/// Options for a capture session. Unset fields fall back to
/// [`CaptureOptions::defaults`] when resolved.
#[derive(Clone, Debug, Default, Merge)]
pub struct CaptureOptions {
    pub speed: Option<Speed>,
    pub include_sof: Option<bool>,
    pub output: Option<PathBuf>,
}

impl CaptureOptions {
    pub fn defaults() -> CaptureOptions {
        CaptureOptions {
            speed: Some(Speed::High),
            include_sof: Some(true),
            output: Some(PathBuf::from(DEFAULT_OUTPUT)),
        }
    }

    /// Fill unset fields from the defaults and fix the output format.
    pub fn resolve(mut self) -> Result<SessionConfig, FormatError> {
        self.merge(CaptureOptions::defaults());
        let output = self.output.unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT));
        let format = TraceFormat::from_path(&output)?;
        Ok(SessionConfig {
            speed: self.speed.unwrap_or_default(),
            include_sof: self.include_sof.unwrap_or(true),
            output,
            format,
        })
    }
}

/// Resolved settings for one capture session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    pub speed: Speed,
    pub include_sof: bool,
    pub output: PathBuf,
    pub format: TraceFormat,
}
