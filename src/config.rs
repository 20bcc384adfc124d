//! Capture plan read from TOML.
//!
//! Every field has a default, so an empty document yields the built-in plan:
//! gamma 1.0, auto gain and auto white balance off, then one shot each at
//! 0.5, 1, 2, 4 and 8 seconds of exposure.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::acquisition::{FileNaming, TriggerWait, DEFAULT_JPEG_QUALITY};
use crate::image::PixelFormat;
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CaptureConfig {
    pub output_dir: PathBuf,
    pub naming: FileNaming,
    pub jpeg_quality: u8,
    pub pixel_format: String,
    pub poll_interval_ms: u64,
    /// Added to the exposure time of each shot.
    pub trigger_timeout_s: f64,
    pub gamma: Option<f64>,
    pub auto_gain: bool,
    pub auto_white_balance: bool,
    /// One triggered shot per entry, in seconds.
    pub exposures_s: Vec<f64>,
    pub sequence_frames: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        CaptureConfig {
            output_dir: PathBuf::from("."),
            naming: FileNaming::ExposureTime,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            pixel_format: PixelFormat::RGB8.symbolic().to_string(),
            poll_interval_ms: 100,
            trigger_timeout_s: 30.0,
            gamma: Some(1.0),
            auto_gain: false,
            auto_white_balance: false,
            exposures_s: vec![0.5, 1.0, 2.0, 4.0, 8.0],
            sequence_frames: 10,
        }
    }
}

impl CaptureConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: CaptureConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(Error::InvalidConfig(format!(
                "jpeg_quality must be within 1..=100, got {}",
                self.jpeg_quality
            )));
        }
        if self.poll_interval_ms == 0 {
            return Err(Error::InvalidConfig(
                "poll_interval_ms must be positive".into(),
            ));
        }
        if !(self.trigger_timeout_s > 0.0)
            || Duration::try_from_secs_f64(self.trigger_timeout_s).is_err()
        {
            return Err(Error::InvalidConfig(format!(
                "trigger_timeout_s must be a positive number of seconds, got {}",
                self.trigger_timeout_s
            )));
        }
        if let Some(bad) = self
            .exposures_s
            .iter()
            .find(|e| !(e.is_finite() && **e > 0.0))
        {
            return Err(Error::InvalidConfig(format!(
                "exposure times must be positive, got {bad}"
            )));
        }
        if let Some(gamma) = self.gamma {
            if !(gamma.is_finite() && gamma > 0.0) {
                return Err(Error::InvalidConfig(format!(
                    "gamma must be positive, got {gamma}"
                )));
            }
        }
        self.pixel_format()?;
        Ok(())
    }

    pub fn pixel_format(&self) -> Result<PixelFormat> {
        self.pixel_format.parse()
    }

    pub fn trigger_wait(&self) -> TriggerWait {
        TriggerWait {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            // out of range only when not validated; too long means no limit
            timeout: Duration::try_from_secs_f64(self.trigger_timeout_s).unwrap_or(
                if self.trigger_timeout_s > 0.0 {
                    Duration::MAX
                } else {
                    Duration::ZERO
                },
            ),
        }
    }
}
