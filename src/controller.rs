//! Stateful single-camera controller.
//!
//! Setters only stage parameters. [Controller::apply] commits them to the
//! device in a fixed order and stops at the first node that cannot be
//! written; [Controller::trigger] applies, captures one frame, saves it and
//! resets the device.

use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{error, info, warn};

use crate::acquisition::{
    self, FileNaming, SaveOnImage, SequenceOptions, SequenceReport, TriggerWait,
    DEFAULT_JPEG_QUALITY,
};
use crate::camera::CameraSession;
use crate::config::CaptureConfig;
use crate::features;
use crate::image::PixelFormat;
use crate::roi::{self, RoiRequest};
use crate::sdk::{Camera, NodeMap, System};
use crate::settings::{
    CaptureSettings, Exposure, Gain, TriggerSource, WhiteBalance, MICROS_PER_SECOND,
};
use crate::Result;

pub struct Controller<S: System> {
    session: CameraSession<S>,
    settings: CaptureSettings,
    output_dir: PathBuf,
    naming: FileNaming,
    jpeg_quality: u8,
    wait: TriggerWait,
    shots: u64,
    /// Manual exposure as accepted by the device in the last apply.
    applied_exposure: Option<Duration>,
}

impl<S: System> Controller<S> {
    /// Open the first camera of `system`.
    pub fn new(system: S) -> Result<Self> {
        Ok(Controller::from_session(CameraSession::open(system)?))
    }

    pub fn from_session(session: CameraSession<S>) -> Self {
        Controller {
            session,
            settings: CaptureSettings::default(),
            output_dir: PathBuf::from("."),
            naming: FileNaming::default(),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            wait: TriggerWait::default(),
            shots: 0,
            applied_exposure: None,
        }
    }

    /// Take output, naming, polling and image settings from `config`.
    pub fn configure(&mut self, config: &CaptureConfig) -> Result<()> {
        config.validate()?;
        self.output_dir.clone_from(&config.output_dir);
        self.naming = config.naming;
        self.jpeg_quality = config.jpeg_quality;
        self.wait = config.trigger_wait();
        self.settings.pixel_format = config.pixel_format()?;
        if let Some(gamma) = config.gamma {
            self.set_gamma(gamma);
        }
        self.set_auto_gain(config.auto_gain);
        self.set_auto_white_balance(config.auto_white_balance);
        Ok(())
    }

    pub fn info(&self) -> String {
        self.session.info()
    }

    pub fn session(&self) -> &CameraSession<S> {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut CameraSession<S> {
        &mut self.session
    }

    pub fn settings(&self) -> &CaptureSettings {
        &self.settings
    }

    /// Exposure time the device accepted for the last apply, after
    /// clamping. `None` unless the exposure was set manually.
    pub fn applied_exposure(&self) -> Option<Duration> {
        self.applied_exposure
    }

    pub fn print_device_info(&self) -> Result<()> {
        info!("*** DEVICE INFORMATION ***");
        for (name, value) in self.session.device_info()? {
            info!("{name} : {value}");
        }
        Ok(())
    }

    pub fn set_output_dir<P: AsRef<Path>>(&mut self, dir: P) {
        self.output_dir = dir.as_ref().to_path_buf();
    }

    pub fn set_naming(&mut self, naming: FileNaming) {
        self.naming = naming;
    }

    pub fn set_trigger_wait(&mut self, wait: TriggerWait) {
        self.wait = wait;
    }

    /// Exposure time in seconds; auto exposure is turned off on apply.
    pub fn set_exposure_time(&mut self, seconds: f64) {
        self.settings.exposure = Exposure::Manual(seconds);
    }

    pub fn set_auto_exposure(&mut self, enabled: bool) {
        self.settings.exposure = match (enabled, self.settings.exposure) {
            (true, _) => Exposure::Auto,
            (false, Exposure::Auto) => Exposure::Fixed,
            (false, other) => other,
        };
    }

    /// Gain in dB; auto gain is turned off on apply.
    pub fn set_gain(&mut self, db: f64) {
        self.settings.gain = Gain::Manual(db);
    }

    pub fn set_auto_gain(&mut self, enabled: bool) {
        self.settings.gain = match (enabled, self.settings.gain) {
            (true, _) => Gain::Auto,
            (false, Gain::Auto) => Gain::Fixed,
            (false, other) => other,
        };
    }

    pub fn set_white_balance(&mut self, red: f64, blue: f64) {
        self.settings.white_balance = WhiteBalance::Manual {
            red: Some(red),
            blue: Some(blue),
        };
    }

    pub fn set_auto_white_balance(&mut self, enabled: bool) {
        self.settings.white_balance = match (enabled, self.settings.white_balance) {
            (true, _) => WhiteBalance::Auto,
            (false, WhiteBalance::Auto) => WhiteBalance::Manual {
                red: None,
                blue: None,
            },
            (false, other) => other,
        };
    }

    pub fn set_gamma(&mut self, gamma: f64) {
        self.settings.gamma = Some(gamma);
    }

    pub fn set_pixel_format(&mut self, format: PixelFormat) {
        self.settings.pixel_format = format;
    }

    pub fn set_roi(&mut self, roi: RoiRequest) {
        self.settings.roi = roi;
    }

    pub fn set_trigger_source(&mut self, source: TriggerSource) {
        self.settings.trigger_source = source;
    }

    /// Initialize the camera if needed and write the staged settings.
    ///
    /// Order: trigger mode off, trigger source, trigger mode on, pixel
    /// format, geometry, exposure, gain, white balance, gamma.
    pub fn apply(&mut self) -> Result<()> {
        self.applied_exposure = None;
        let settings = self.settings.clone();
        let camera = self.session.camera_mut()?;
        if !camera.is_initialized() {
            camera.init()?;
        }
        match apply_settings(camera.node_map_mut(), &settings) {
            Ok(exposure_us) => {
                self.applied_exposure = exposure_us
                    .and_then(|us| Duration::try_from_secs_f64(us / MICROS_PER_SECOND).ok());
                Ok(())
            }
            Err(e) => {
                error!("Error: {e}. Aborting...");
                Err(e)
            }
        }
    }

    /// Apply the staged settings, trigger until one frame is saved, then
    /// reset the device.
    ///
    /// Returns the path of the saved image.
    pub fn trigger(&mut self) -> Result<PathBuf> {
        self.apply()?;
        let serial = self.session.serial_number();
        let handler = SaveOnImage::new(&self.output_dir, self.naming, serial)
            .jpeg_quality(self.jpeg_quality)
            .index(self.shots);
        let completion = handler.completion();
        let exposure = self.applied_exposure.unwrap_or_default();
        let wait = self.wait;

        let camera = self.session.camera_mut()?;
        camera.register_image_handler(Box::new(handler));
        let outcome = match camera.begin_acquisition() {
            Ok(()) => {
                let outcome = wait.run(camera, &completion, exposure);
                match (outcome, camera.end_acquisition()) {
                    (Ok(path), Ok(())) => Ok(path),
                    (Ok(_), Err(e)) => Err(e),
                    (Err(e), ended) => {
                        if let Err(end_err) = ended {
                            warn!("ending acquisition: {end_err}");
                        }
                        Err(e)
                    }
                }
            }
            Err(e) => Err(e),
        };
        camera.unregister_image_handler();
        self.shots += 1;

        if let Err(e) = self.reset() {
            warn!("reset after capture failed: {e}");
        }
        outcome
    }

    /// Trigger once per exposure time (seconds), in order.
    pub fn run_exposure_series(&mut self, exposures: &[f64]) -> Result<Vec<PathBuf>> {
        exposures
            .iter()
            .map(|&seconds| {
                self.set_exposure_time(seconds);
                self.trigger()
            })
            .collect()
    }

    /// Apply the staged settings and save `count` frames named by sequence
    /// number, then reset.
    pub fn capture_sequence(&mut self, count: u32) -> Result<SequenceReport> {
        self.apply()?;
        let options = SequenceOptions {
            dir: self.output_dir.clone(),
            serial: self.session.serial_number(),
            jpeg_quality: self.jpeg_quality,
            ..Default::default()
        };
        info!("*** IMAGE ACQUISITION ***");
        let report = acquisition::acquire_sequence(self.session.camera_mut()?, count, &options);
        if let Err(e) = self.reset() {
            warn!("reset after capture failed: {e}");
        }
        report
    }

    /// Turn auto exposure back on and trigger mode off.
    ///
    /// Both steps are attempted; the first failure is returned.
    pub fn reset(&mut self) -> Result<()> {
        let camera = self.session.camera_mut()?;
        if !camera.is_initialized() {
            return Ok(());
        }
        let map = camera.node_map_mut();
        let exposure = features::set_exposure_auto(map, "Continuous");
        match &exposure {
            Ok(_) => info!("Automatic exposure enabled..."),
            Err(e) => warn!("Unable to enable automatic exposure: {e}. Non-fatal error..."),
        }
        let trigger = features::set_trigger_mode(map, "Off");
        match &trigger {
            Ok(_) => info!("Trigger mode disabled..."),
            Err(e) => warn!("Unable to disable trigger mode: {e}. Non-fatal error..."),
        }
        exposure.and(trigger).map(|_| ())
    }

    /// Release the camera and the SDK now instead of on drop.
    pub fn release(&mut self) {
        self.session.release();
    }
}

/// Returns the manual exposure time written, in microseconds.
fn apply_settings(map: &mut dyn NodeMap, settings: &CaptureSettings) -> Result<Option<f64>> {
    info!("*** CONFIGURING TRIGGER ***");
    features::set_trigger_mode(map, "Off")?;
    info!("Trigger mode disabled...");
    let source = features::set_trigger_source(map, settings.trigger_source.symbolic())?;
    info!("Trigger source set to {source}...");
    features::set_trigger_mode(map, "On")?;
    info!("Trigger mode turned back on...");

    info!("*** CONFIGURING CUSTOM IMAGE SETTINGS ***");
    let format = features::set_pixel_format(map, settings.pixel_format.symbolic())?;
    info!("Pixel format set to {format}...");

    roi::apply(map, settings.roi)?;

    let exposure_us = match settings.exposure {
        Exposure::Auto => {
            features::set_exposure_auto(map, "Continuous")?;
            info!("Automatic exposure enabled...");
            None
        }
        Exposure::Manual(seconds) => {
            features::set_exposure_auto(map, "Off")?;
            info!("Automatic exposure disabled...");
            let written = features::set_exposure_time(map, seconds * MICROS_PER_SECOND)?;
            info!("Exposure time set to {written} us...");
            Some(written)
        }
        Exposure::Fixed => {
            features::set_exposure_auto(map, "Off")?;
            info!("Automatic exposure disabled...");
            None
        }
    };

    match settings.gain {
        Gain::Auto => {
            features::set_gain_auto(map, "Continuous")?;
            info!("Automatic gain enabled...");
        }
        Gain::Manual(db) => {
            features::set_gain_auto(map, "Off")?;
            let written = features::set_gain(map, db)?;
            info!("Gain set to {written} dB...");
        }
        Gain::Fixed => {
            features::set_gain_auto(map, "Off")?;
            info!("Automatic gain disabled...");
        }
    }

    match settings.white_balance {
        WhiteBalance::Auto => {
            features::set_balance_white_auto(map, "Continuous")?;
            info!("Automatic white balance enabled...");
        }
        WhiteBalance::Manual { red, blue } => {
            features::set_balance_white_auto(map, "Off")?;
            info!("Automatic white balance disabled...");
            for (channel, ratio) in [("Red", red), ("Blue", blue)] {
                if let Some(ratio) = ratio {
                    features::set_balance_ratio_selector(map, channel)?;
                    let written = features::set_balance_ratio(map, ratio)?;
                    info!("{channel} balance ratio set to {written}...");
                }
            }
        }
    }

    if let Some(gamma) = settings.gamma {
        features::set_bool(map, features::names::GAMMA_ENABLE, true)?;
        let written = features::set_gamma(map, gamma)?;
        info!("Gamma set to {written}...");
    }
    Ok(exposure_us)
}
