use log::{info, warn};

use crate::features::{self, names};
use crate::sdk::{Camera, LibraryVersion, NodeMap, System};
use crate::{Error, Result};

/// Owns the SDK system and the first camera it reports.
///
/// Both are given back to the SDK exactly once, by [CameraSession::release]
/// or on drop, whatever happened in between.
pub struct CameraSession<S: System> {
    system: Option<S>,
    camera: Option<S::Camera>,
    sdk_name: String,
    library_version: LibraryVersion,
    camera_count: usize,
}

/// Open the first camera attached to `system`.
pub fn open_device<S: System>(system: S) -> Result<CameraSession<S>> {
    CameraSession::open(system)
}

impl<S: System> CameraSession<S> {
    pub fn open(mut system: S) -> Result<Self> {
        let cameras = system.cameras();
        let mut session = CameraSession {
            sdk_name: system.name().to_string(),
            library_version: system.library_version(),
            system: Some(system),
            camera: None,
            camera_count: 0,
        };
        let mut cameras = cameras?;
        session.camera_count = cameras.len();
        if cameras.is_empty() {
            return Err(Error::NoCamera);
        }
        let camera = cameras.remove(0);
        for mut unused in cameras {
            unused.release();
        }
        session.camera = Some(camera);
        Ok(session)
    }

    /// Library version and number of cameras, one per line.
    pub fn info(&self) -> String {
        format!(
            "{} library version: {}\n#camera: {}\n",
            self.sdk_name, self.library_version, self.camera_count
        )
    }

    pub fn library_version(&self) -> LibraryVersion {
        self.library_version
    }

    pub fn camera(&self) -> Result<&S::Camera> {
        self.camera
            .as_ref()
            .ok_or_else(|| Error::Sdk("camera session already released".into()))
    }

    pub fn camera_mut(&mut self) -> Result<&mut S::Camera> {
        self.camera
            .as_mut()
            .ok_or_else(|| Error::Sdk("camera session already released".into()))
    }

    /// Features of the `DeviceInformation` category with their values.
    ///
    /// Returns an empty list when the category itself cannot be read.
    pub fn device_info(&self) -> Result<Vec<(String, String)>> {
        let tl = self.camera()?.tl_device_node_map();
        let features = match features::category_features(tl, names::DEVICE_INFORMATION) {
            Ok(features) => features,
            Err(_) => {
                info!("Device control information not available.");
                return Ok(Vec::new());
            }
        };
        Ok(features
            .into_iter()
            .map(|name| {
                let value = match tl.node(&name) {
                    Some(node) if node.access.is_readable() => node.value_string(),
                    _ => "Node not readable".to_string(),
                };
                (name, value)
            })
            .collect())
    }

    pub fn serial_number(&self) -> Option<String> {
        let tl: &dyn NodeMap = self.camera().ok()?.tl_device_node_map();
        features::string_value(tl, names::DEVICE_SERIAL_NUMBER)
            .ok()
            .filter(|s| !s.is_empty())
    }

    pub fn is_released(&self) -> bool {
        self.camera.is_none() && self.system.is_none()
    }

    /// Stop streaming, deinitialize and release the camera, then release
    /// the system. Calling it again does nothing.
    pub fn release(&mut self) {
        if let Some(mut camera) = self.camera.take() {
            if camera.is_streaming() {
                if let Err(e) = camera.end_acquisition() {
                    warn!("ending acquisition on release: {e}");
                }
            }
            if camera.is_initialized() {
                if let Err(e) = camera.deinit() {
                    warn!("deinitializing camera on release: {e}");
                }
            }
            camera.release();
        }
        if let Some(mut system) = self.system.take() {
            system.release();
        }
    }
}

impl<S: System> Drop for CameraSession<S> {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimCamera, SimSystem};

    #[test]
    fn no_camera_releases_system() {
        let system = SimSystem::empty();
        let recorder = system.recorder();
        assert!(matches!(open_device(system), Err(Error::NoCamera)));
        assert_eq!(recorder.system_releases(), 1);
        assert_eq!(recorder.camera_releases(), 0);
    }

    #[test]
    fn info_lists_version_and_count() {
        let session = open_device(SimSystem::default()).unwrap();
        assert_eq!(
            session.info(),
            "Simulated library version: 4.0.0.116\n#camera: 1\n"
        );
    }

    #[test]
    fn device_info_marks_unreadable_nodes() {
        let session = open_device(SimSystem::default()).unwrap();
        let info = session.device_info().unwrap();
        assert!(info
            .iter()
            .any(|(k, v)| k == names::DEVICE_SERIAL_NUMBER && v == "19240001"));
        assert!(info
            .iter()
            .any(|(k, v)| k == "DeviceUserID" && v == "Node not readable"));
        assert_eq!(session.serial_number().as_deref(), Some("19240001"));
    }

    #[test]
    fn first_camera_is_selected_and_others_released() {
        let system =
            SimSystem::with_cameras(vec![SimCamera::new("A"), SimCamera::new("B")]);
        let recorder = system.recorder();
        let session = open_device(system).unwrap();
        assert_eq!(session.serial_number().as_deref(), Some("A"));
        assert!(session.info().ends_with("#camera: 2\n"));
        assert_eq!(recorder.camera_releases(), 1);
    }

    #[test]
    fn release_is_idempotent() {
        let system = SimSystem::default();
        let recorder = system.recorder();
        let mut session = open_device(system).unwrap();
        session.camera_mut().unwrap().init().unwrap();
        session.camera_mut().unwrap().begin_acquisition().unwrap();
        session.release();
        session.release();
        assert!(session.is_released());
        assert!(session.camera().is_err());
        drop(session);
        assert_eq!(recorder.acquisitions_ended(), 1);
        assert_eq!(recorder.deinits(), 1);
        assert_eq!(recorder.camera_releases(), 1);
        assert_eq!(recorder.system_releases(), 1);
    }

    #[test]
    fn drop_releases_once() {
        let system = SimSystem::default();
        let recorder = system.recorder();
        {
            let _session = open_device(system).unwrap();
        }
        assert_eq!(recorder.camera_releases(), 1);
        assert_eq!(recorder.system_releases(), 1);
        assert_eq!(recorder.deinits(), 0);
    }
}
