/*
 * Copyright (c) 2022. XIMEA GmbH - All Rights Reserved
 */
use camshot::sim::SimSystem;
use camshot::{Controller, PixelFormat};

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let mut camera = Controller::new(SimSystem::default())?;
    camera.set_pixel_format(PixelFormat::BayerRG8);
    camera.set_exposure_time(0.01);
    camera.set_auto_white_balance(false);
    camera.set_white_balance(1.4, 1.9);
    camera.set_gamma(0.8);

    let path = camera.trigger()?;
    let image = image::open(&path)?.to_rgb8();
    println!(
        "Saved {} ({}x{})",
        path.display(),
        image.width(),
        image.height()
    );
    Ok(())
}
