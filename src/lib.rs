//! Configure, trigger and capture for a single GenICam-style camera.
//!
//! The camera SDK is reached through the traits in [sdk]; [sim] provides a
//! simulated device that implements them.

pub use acquisition::{FileNaming, SequenceReport, TriggerWait};
pub use camera::*;
pub use config::CaptureConfig;
pub use controller::Controller;
pub use error::{Error, Result};
pub use crate::image::{Image, PixelFormat};
pub use roi::{Roi, RoiRequest};
pub use settings::{CaptureSettings, Exposure, Gain, TriggerSource, WhiteBalance};

pub mod acquisition;
pub mod camera;
pub mod config;
pub mod controller;
pub mod convert;
pub mod error;
pub mod features;
pub mod image;
pub mod roi;
pub mod sdk;
pub mod settings;
pub mod sim;

#[cfg(test)]
mod tests {
    use crate::sdk::Camera;
    use crate::sim::SimSystem;
    use crate::{open_device, Controller};

    #[test]
    fn start_stop_acquisition() -> crate::Result<()> {
        let mut session = open_device(SimSystem::default())?;
        let cam = session.camera_mut()?;
        cam.init()?;
        cam.begin_acquisition()?;
        assert!(cam.is_streaming());
        cam.end_acquisition()?;
        Ok(())
    }

    #[test]
    fn single_shot() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut controller = Controller::new(SimSystem::default())?;
        controller.set_output_dir(dir.path());
        controller.set_exposure_time(0.001);
        let path = controller.trigger()?;
        assert_eq!(path, dir.path().join("exposure_1000us.jpg"));
        assert!(path.exists());
        Ok(())
    }
}
