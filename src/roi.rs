use log::info;

use crate::features;
use crate::sdk::NodeMap;
use crate::{Error, Result};

/// Roi represents a region of interest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Roi {

    /// Offset from the left in the horizontal direction
    pub offset_x: u32,

    /// Offset from the top in the vertical direction
    pub offset_y: u32,

    /// Image width
    pub width: u32,

    /// Image height
    pub height: u32
}

impl Roi {
    pub fn new(offset_x: u32, offset_y: u32, width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::InvalidRoi(format!("empty window {width}x{height}")));
        }
        Ok(Roi {
            offset_x,
            offset_y,
            width,
            height,
        })
    }
}

/// Geometry requested for the next capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoiRequest {
    /// Offsets at their minimum, width and height at their maximum.
    #[default]
    FullSensor,
    Window(Roi),
}

/// Write the requested geometry to the device and return what it ended up as.
///
/// Offsets are moved to their minimum first so that the size can grow to the
/// full sensor; the requested offsets are written last.
pub fn apply(map: &mut dyn NodeMap, request: RoiRequest) -> Result<Roi> {
    let (min_y, _, _) = features::int_range(map, features::names::OFFSET_Y)?;
    let offset_y = features::set_offset_y(map, min_y)?;
    info!("Offset Y set to {offset_y}...");
    let (min_x, _, _) = features::int_range(map, features::names::OFFSET_X)?;
    let offset_x = features::set_offset_x(map, min_x)?;
    info!("Offset X set to {offset_x}...");

    let (_, max_w, _) = features::int_range(map, features::names::WIDTH)?;
    let (_, max_h, _) = features::int_range(map, features::names::HEIGHT)?;

    let roi = match request {
        RoiRequest::FullSensor => {
            let width = features::set_width(map, max_w)?;
            info!("Width set to {width}...");
            let height = features::set_height(map, max_h)?;
            info!("Height set to {height}...");
            Roi {
                offset_x: offset_x as u32,
                offset_y: offset_y as u32,
                width: width as u32,
                height: height as u32,
            }
        }
        RoiRequest::Window(roi) => {
            if i64::from(roi.offset_x) + i64::from(roi.width) > max_w
                || i64::from(roi.offset_y) + i64::from(roi.height) > max_h
            {
                return Err(Error::InvalidRoi(format!(
                    "{roi:?} does not fit a {max_w}x{max_h} sensor"
                )));
            }
            let width = features::set_width(map, roi.width.into())?;
            info!("Width set to {width}...");
            let height = features::set_height(map, roi.height.into())?;
            info!("Height set to {height}...");
            let offset_x = features::set_offset_x(map, roi.offset_x.into())?;
            info!("Offset X set to {offset_x}...");
            let offset_y = features::set_offset_y(map, roi.offset_y.into())?;
            info!("Offset Y set to {offset_y}...");
            roi
        }
    };
    Ok(roi)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::names;
    use crate::sdk::{AccessMode, Camera};
    use crate::sim::{SimCamera, SENSOR_HEIGHT, SENSOR_WIDTH};

    fn camera() -> SimCamera {
        let mut cam = SimCamera::default();
        cam.init().unwrap();
        cam
    }

    #[test]
    fn empty_roi_is_invalid() {
        assert!(Roi::new(0, 0, 0, 10).is_err());
        assert!(Roi::new(0, 0, 10, 10).is_ok());
    }

    #[test]
    fn full_sensor() {
        let mut cam = camera();
        let roi = apply(cam.node_map_mut(), RoiRequest::Window(Roi::new(8, 8, 64, 32).unwrap()))
            .unwrap();
        assert_eq!(roi.width, 64);
        let roi = apply(cam.node_map_mut(), RoiRequest::FullSensor).unwrap();
        assert_eq!(roi, Roi::new(0, 0, SENSOR_WIDTH, SENSOR_HEIGHT).unwrap());
        assert_eq!(features::width(cam.node_map()).unwrap(), i64::from(SENSOR_WIDTH));
    }

    #[test]
    fn window_is_written_size_then_offsets() {
        let mut cam = camera();
        let recorder = cam.recorder();
        let window = Roi::new(16, 8, 640, 480).unwrap();
        assert_eq!(apply(cam.node_map_mut(), RoiRequest::Window(window)).unwrap(), window);
        let order: Vec<String> = recorder.writes().into_iter().map(|w| w.node).collect();
        assert_eq!(
            order,
            [
                names::OFFSET_Y,
                names::OFFSET_X,
                names::WIDTH,
                names::HEIGHT,
                names::OFFSET_X,
                names::OFFSET_Y
            ]
        );
        assert_eq!(features::offset_x(cam.node_map()).unwrap(), 16);
    }

    #[test]
    fn window_outside_sensor() {
        let mut cam = camera();
        let window = Roi::new(SENSOR_WIDTH - 8, 0, 64, 64).unwrap();
        assert!(matches!(
            apply(cam.node_map_mut(), RoiRequest::Window(window)),
            Err(Error::InvalidRoi(_))
        ));
    }

    #[test]
    fn read_only_geometry_aborts() {
        let mut cam = camera();
        cam.set_node_access(names::OFFSET_Y, AccessMode::ReadOnly);
        assert!(matches!(
            apply(cam.node_map_mut(), RoiRequest::FullSensor),
            Err(Error::NodeNotWritable { .. })
        ));
    }
}
