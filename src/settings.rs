//! Acquisition parameters staged by the controller before a capture.

use crate::image::PixelFormat;
use crate::roi::RoiRequest;

/// Microseconds per second; the device takes exposure times in µs.
pub const MICROS_PER_SECOND: f64 = 1e6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TriggerSource {
    #[default]
    Software,
    /// Hardware input line 0.
    Line0,
}

impl TriggerSource {
    pub fn symbolic(self) -> &'static str {
        match self {
            TriggerSource::Software => "Software",
            TriggerSource::Line0 => "Line0",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Exposure {
    #[default]
    Auto,
    /// Exposure time in seconds.
    Manual(f64),
    /// Auto exposure off, keep whatever exposure time the device has.
    Fixed,
}

impl Exposure {
    /// Exposure time as written to the device, in microseconds.
    pub fn micros(self) -> Option<f64> {
        match self {
            Exposure::Manual(seconds) => Some(seconds * MICROS_PER_SECOND),
            Exposure::Auto | Exposure::Fixed => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Gain {
    #[default]
    Auto,
    /// Gain in dB.
    Manual(f64),
    /// Auto gain off, keep whatever gain the device has.
    Fixed,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum WhiteBalance {
    #[default]
    Auto,
    /// Auto white balance off. Ratios left as `None` keep the device values.
    Manual {
        red: Option<f64>,
        blue: Option<f64>,
    },
}

/// Everything `Controller::apply` writes to the device.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CaptureSettings {
    pub trigger_source: TriggerSource,
    pub pixel_format: PixelFormat,
    pub roi: RoiRequest,
    pub exposure: Exposure,
    pub gain: Gain,
    pub white_balance: WhiteBalance,
    /// `Some` enables gamma correction with this value.
    pub gamma: Option<f64>,
}
