/*
 * Copyright (c) 2022. XIMEA GmbH - All Rights Reserved
 */
use camshot::features;
use camshot::sdk::Camera;
use camshot::sim::SimSystem;

fn main() -> camshot::Result<()> {
    env_logger::init();
    let mut session = camshot::open_device(SimSystem::default())?;
    let cam = session.camera_mut()?;
    cam.init()?;

    features::set_exposure_auto(cam.node_map_mut(), "Off")?;
    features::set_exposure_time(cam.node_map_mut(), 10000.0)?;
    features::set_acquisition_mode(cam.node_map_mut(), "Continuous")?;
    features::set_trigger_source(cam.node_map_mut(), "Software")?;
    features::set_trigger_mode(cam.node_map_mut(), "On")?;

    cam.begin_acquisition()?;
    for _ in 0..10 {
        features::execute(cam.node_map_mut(), features::names::TRIGGER_SOFTWARE)?;
        let image = cam.next_image(None)?;
        match image.pixel(0, 0) {
            Some(pixel) => println!("Image received, first pixel: {:?}", pixel),
            None => unreachable!("Could not get pixel value from image!"),
        }
    }
    cam.end_acquisition()?;
    Ok(())
}
