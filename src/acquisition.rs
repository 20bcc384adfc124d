//! Getting frames off a streaming camera and onto disk.
//!
//! Two modes are supported: a software trigger followed by a poll loop that
//! waits for an [ImageEventHandler] to signal completion, and a bounded
//! sequence read with [Camera::next_image].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, error, info};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::features::{self, names};
use crate::image::{ColorProcessing, Image, PixelFormat};
use crate::sdk::{Camera, ImageEventHandler, NodeMap};
use crate::{Error, Result};

pub const DEFAULT_JPEG_QUALITY: u8 = 90;

/// How saved files are named.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileNaming {
    /// `exposure_<µs>us.jpg`
    #[default]
    ExposureTime,
    /// `Acquisition-<serial>-<n>.jpg`, serial left out when unknown.
    Sequence,
}

impl FileNaming {
    pub fn file_name(self, image: &Image, serial: Option<&str>, index: u64) -> String {
        match self {
            FileNaming::ExposureTime => {
                format!("exposure_{}us.jpg", image.exposure_time_us().round() as u64)
            }
            FileNaming::Sequence => match serial {
                Some(serial) => format!("Acquisition-{serial}-{index}.jpg"),
                None => format!("Acquisition-{index}.jpg"),
            },
        }
    }
}

/// Convert to RGB8 and write as JPEG.
pub fn save_converted(image: &Image, path: &Path, jpeg_quality: u8) -> Result<()> {
    let converted = image.convert(PixelFormat::RGB8, ColorProcessing::HqLinear)?;
    converted.save_jpeg(path, jpeg_quality)?;
    info!("Image saved at {}", path.display());
    Ok(())
}

/// Completion flag shared between an image handler and the poll loop.
#[derive(Clone, Default)]
pub struct Completion {
    outcome: Arc<Mutex<Option<Result<PathBuf>>>>,
}

impl Completion {
    pub fn is_done(&self) -> bool {
        self.outcome.lock().is_some()
    }

    fn finish(&self, outcome: Result<PathBuf>) {
        let mut slot = self.outcome.lock();
        if slot.is_none() {
            *slot = Some(outcome);
        }
    }

    fn take(&self) -> Option<Result<PathBuf>> {
        self.outcome.lock().take()
    }
}

/// Image handler that saves the first complete frame and signals completion.
///
/// Frames arriving after completion are ignored, so one trigger cycle never
/// saves more than one image.
pub struct SaveOnImage {
    dir: PathBuf,
    naming: FileNaming,
    serial: Option<String>,
    jpeg_quality: u8,
    index: u64,
    completion: Completion,
}

impl SaveOnImage {
    pub fn new<P: Into<PathBuf>>(dir: P, naming: FileNaming, serial: Option<String>) -> Self {
        SaveOnImage {
            dir: dir.into(),
            naming,
            serial,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            index: 0,
            completion: Completion::default(),
        }
    }

    pub fn jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality;
        self
    }

    /// Sequence number used by [FileNaming::Sequence].
    pub fn index(mut self, index: u64) -> Self {
        self.index = index;
        self
    }

    pub fn completion(&self) -> Completion {
        self.completion.clone()
    }
}

impl ImageEventHandler for SaveOnImage {
    fn on_image(&mut self, image: &Image) {
        if self.completion.is_done() {
            debug!("frame {} arrived after completion, ignored", image.frame_id());
            return;
        }
        if image.is_incomplete() {
            info!("Image incomplete: {}...", image.status().description());
            return;
        }
        info!(
            "Grabbed image {}, width = {}, height = {}",
            image.frame_id(),
            image.width(),
            image.height()
        );
        let name = self.naming.file_name(image, self.serial.as_deref(), self.index);
        let path = self.dir.join(name);
        let outcome = save_converted(image, &path, self.jpeg_quality).map(|()| path);
        self.completion.finish(outcome);
    }
}

/// Poll loop run after a software trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerWait {
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl Default for TriggerWait {
    fn default() -> Self {
        TriggerWait {
            poll_interval: Duration::from_millis(100),
            timeout: Duration::from_secs(30),
        }
    }
}

impl TriggerWait {
    /// Issue software triggers until `completion` is signaled.
    ///
    /// Sleeps `poll_interval` between triggers. Gives up with
    /// [Error::TriggerTimeout] once `timeout + extra` has passed; `extra`
    /// is meant for the exposure time of the shot. When the device is not
    /// armed for software triggers the loop only waits for a hardware
    /// trigger to produce the frame.
    pub fn run<C: Camera + ?Sized>(
        &self,
        camera: &mut C,
        completion: &Completion,
        extra: Duration,
    ) -> Result<PathBuf> {
        let limit = self.timeout.saturating_add(extra);
        let software = software_trigger_armed(camera.node_map());
        if !software {
            info!("Use the hardware to trigger image acquisition.");
        }
        let start = Instant::now();
        let mut cycles = 0u64;
        loop {
            if software {
                features::execute(camera.node_map_mut(), names::TRIGGER_SOFTWARE)?;
            }
            cycles += 1;
            if let Some(outcome) = completion.take() {
                debug!("completed after {cycles} trigger(s)");
                return outcome;
            }
            if start.elapsed() >= limit {
                return Err(Error::TriggerTimeout {
                    waited: start.elapsed(),
                });
            }
            thread::sleep(self.poll_interval);
            if let Some(outcome) = completion.take() {
                debug!("completed after {cycles} trigger(s)");
                return outcome;
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceOptions {
    pub dir: PathBuf,
    pub serial: Option<String>,
    pub jpeg_quality: u8,
    pub frame_timeout: Option<Duration>,
}

impl Default for SequenceOptions {
    fn default() -> Self {
        SequenceOptions {
            dir: PathBuf::from("."),
            serial: None,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            frame_timeout: Some(Duration::from_secs(1)),
        }
    }
}

/// What happened to the frames of [acquire_sequence].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SequenceReport {
    pub saved: Vec<PathBuf>,
    pub incomplete: usize,
    pub failed: usize,
}

impl SequenceReport {
    pub fn is_success(&self) -> bool {
        self.incomplete == 0 && self.failed == 0
    }
}

/// Acquire `count` frames in continuous mode, one trigger each, and save
/// them as `Acquisition-<serial>-<n>.jpg`.
///
/// A failing frame is logged and counted, the loop carries on. Acquisition
/// is ended even when frames failed.
pub fn acquire_sequence<C: Camera + ?Sized>(
    camera: &mut C,
    count: u32,
    options: &SequenceOptions,
) -> Result<SequenceReport> {
    features::set_acquisition_mode(camera.node_map_mut(), "Continuous")?;
    info!("Acquisition mode set to continuous");

    let software = software_trigger_armed(camera.node_map());

    camera.begin_acquisition()?;
    info!("Acquiring images...");
    if let Some(serial) = &options.serial {
        info!("Device serial number retrieved as {serial}...");
    }

    let mut report = SequenceReport::default();
    for index in 0..count {
        match grab_one(camera, index, software, options) {
            Ok(Some(path)) => report.saved.push(path),
            Ok(None) => report.incomplete += 1,
            Err(e) => {
                error!("Error: {e}");
                report.failed += 1;
            }
        }
    }

    camera.end_acquisition()?;
    Ok(report)
}

/// Trigger mode is on with the software source selected.
fn software_trigger_armed(map: &dyn NodeMap) -> bool {
    features::trigger_mode(map).map_or(false, |m| m == "On")
        && features::trigger_source(map).map_or(false, |s| s == "Software")
}

fn grab_one<C: Camera + ?Sized>(
    camera: &mut C,
    index: u32,
    software: bool,
    options: &SequenceOptions,
) -> Result<Option<PathBuf>> {
    if software {
        features::execute(camera.node_map_mut(), names::TRIGGER_SOFTWARE)?;
    } else {
        info!("Use the hardware to trigger image acquisition.");
    }
    let image = camera.next_image(options.frame_timeout)?;
    if image.is_incomplete() {
        info!("Image incomplete: {}...", image.status().description());
        return Ok(None);
    }
    info!(
        "Grabbed image {index}, width = {}, height = {}",
        image.width(),
        image.height()
    );
    let name = FileNaming::Sequence.file_name(&image, options.serial.as_deref(), index.into());
    let path = options.dir.join(name);
    save_converted(&image, &path, options.jpeg_quality)?;
    Ok(Some(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimCamera;

    fn armed_camera() -> SimCamera {
        let mut cam = SimCamera::default();
        cam.init().unwrap();
        let map = cam.node_map_mut();
        features::set_trigger_source(map, "Software").unwrap();
        features::set_trigger_mode(map, "On").unwrap();
        cam
    }

    fn fast_wait() -> TriggerWait {
        TriggerWait {
            poll_interval: Duration::from_millis(1),
            timeout: Duration::from_millis(200),
        }
    }

    #[test]
    fn file_names() {
        let image = Image::new(1, 1, PixelFormat::Mono8, vec![0])
            .unwrap()
            .with_frame_info(0, 500_000.0, 0);
        assert_eq!(
            FileNaming::ExposureTime.file_name(&image, None, 3),
            "exposure_500000us.jpg"
        );
        assert_eq!(
            FileNaming::Sequence.file_name(&image, Some("1234"), 3),
            "Acquisition-1234-3.jpg"
        );
        assert_eq!(FileNaming::Sequence.file_name(&image, None, 3), "Acquisition-3.jpg");
    }

    #[test]
    fn retriggers_until_completion() {
        let dir = tempfile::tempdir().unwrap();
        let mut cam = armed_camera();
        cam.drop_next_triggers(3);
        let handler = SaveOnImage::new(dir.path(), FileNaming::ExposureTime, None);
        let completion = handler.completion();
        cam.register_image_handler(Box::new(handler));
        cam.begin_acquisition().unwrap();

        let path = fast_wait().run(&mut cam, &completion, Duration::ZERO).unwrap();
        assert!(path.exists());
        assert_eq!(cam.recorder().software_triggers(), 4);
    }

    #[test]
    fn one_image_per_trigger_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let mut cam = armed_camera();
        cam.set_frames_per_trigger(3);
        let handler = SaveOnImage::new(dir.path(), FileNaming::Sequence, None);
        let completion = handler.completion();
        cam.register_image_handler(Box::new(handler));
        cam.begin_acquisition().unwrap();

        fast_wait().run(&mut cam, &completion, Duration::ZERO).unwrap();
        assert_eq!(cam.recorder().frames_delivered(), 3);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn incomplete_frames_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let mut cam = armed_camera();
        cam.mark_next_frames_incomplete(2);
        let handler = SaveOnImage::new(dir.path(), FileNaming::ExposureTime, None);
        let completion = handler.completion();
        cam.register_image_handler(Box::new(handler));
        cam.begin_acquisition().unwrap();

        fast_wait().run(&mut cam, &completion, Duration::ZERO).unwrap();
        assert_eq!(cam.recorder().software_triggers(), 3);
    }

    #[test]
    fn silent_device_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let mut cam = armed_camera();
        cam.drop_next_triggers(usize::MAX);
        let handler = SaveOnImage::new(dir.path(), FileNaming::ExposureTime, None);
        let completion = handler.completion();
        cam.register_image_handler(Box::new(handler));
        cam.begin_acquisition().unwrap();

        let wait = TriggerWait {
            poll_interval: Duration::from_millis(2),
            timeout: Duration::from_millis(20),
        };
        match wait.run(&mut cam, &completion, Duration::ZERO) {
            Err(Error::TriggerTimeout { waited }) => assert!(waited >= Duration::from_millis(20)),
            other => panic!("unexpected {other:?}"),
        }
        assert!(!completion.is_done());
    }

    #[test]
    fn hardware_source_waits_without_software_triggers() {
        let dir = tempfile::tempdir().unwrap();
        let mut cam = SimCamera::default();
        cam.init().unwrap();
        let map = cam.node_map_mut();
        features::set_trigger_source(map, "Line0").unwrap();
        features::set_trigger_mode(map, "On").unwrap();
        let handler = SaveOnImage::new(dir.path(), FileNaming::ExposureTime, None);
        let completion = handler.completion();
        cam.register_image_handler(Box::new(handler));
        cam.begin_acquisition().unwrap();

        let wait = TriggerWait {
            poll_interval: Duration::from_millis(1),
            timeout: Duration::from_millis(10),
        };
        assert!(matches!(
            wait.run(&mut cam, &completion, Duration::ZERO),
            Err(Error::TriggerTimeout { .. })
        ));
        assert_eq!(cam.recorder().software_triggers(), 0);
    }

    #[test]
    fn huge_extra_does_not_overflow() {
        let dir = tempfile::tempdir().unwrap();
        let mut cam = armed_camera();
        let handler = SaveOnImage::new(dir.path(), FileNaming::ExposureTime, None);
        let completion = handler.completion();
        cam.register_image_handler(Box::new(handler));
        cam.begin_acquisition().unwrap();
        let wait = TriggerWait {
            poll_interval: Duration::from_millis(1),
            timeout: Duration::MAX,
        };
        assert!(wait.run(&mut cam, &completion, Duration::MAX).is_ok());
    }

    #[test]
    fn save_failure_is_reported() {
        let mut cam = armed_camera();
        let handler = SaveOnImage::new("/nonexistent/dir", FileNaming::ExposureTime, None);
        let completion = handler.completion();
        cam.register_image_handler(Box::new(handler));
        cam.begin_acquisition().unwrap();
        assert!(matches!(
            fast_wait().run(&mut cam, &completion, Duration::ZERO),
            Err(Error::Io(_))
        ));
    }

    #[test]
    fn sequence_names_by_serial_and_index() {
        let dir = tempfile::tempdir().unwrap();
        let mut cam = armed_camera();
        cam.mark_next_frames_incomplete(1);
        let options = SequenceOptions {
            dir: dir.path().to_path_buf(),
            serial: Some("19240001".into()),
            ..Default::default()
        };
        let report = acquire_sequence(&mut cam, 4, &options).unwrap();
        assert_eq!(report.incomplete, 1);
        assert_eq!(report.failed, 0);
        assert!(!report.is_success());
        let names: Vec<String> = report
            .saved
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            [
                "Acquisition-19240001-1.jpg",
                "Acquisition-19240001-2.jpg",
                "Acquisition-19240001-3.jpg"
            ]
        );
        assert!(!cam.is_streaming());
    }

    #[test]
    fn sequence_counts_missing_frames_as_failed() {
        let dir = tempfile::tempdir().unwrap();
        let mut cam = armed_camera();
        cam.drop_next_triggers(1);
        let options = SequenceOptions {
            dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let report = acquire_sequence(&mut cam, 2, &options).unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.saved.len(), 1);
        assert_eq!(cam.recorder().acquisitions_ended(), 1);
    }
}
