/*
 * Copyright (c) 2022. XIMEA GmbH - All Rights Reserved
 */
use camshot::sim::SimSystem;
use camshot::{CaptureConfig, Controller, Roi, RoiRequest};

const CONFIG: &str = r#"
naming = "sequence"
sequence_frames = 5
gamma = 1.0
"#;

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let config = CaptureConfig::from_toml_str(CONFIG)?;

    let mut camera = Controller::new(SimSystem::default())?;
    camera.configure(&config)?;
    camera.set_roi(RoiRequest::Window(Roi::new(64, 32, 320, 240)?));
    camera.set_exposure_time(0.02);

    let report = camera.capture_sequence(config.sequence_frames)?;
    for path in &report.saved {
        println!("{}", path.display());
    }
    if !report.is_success() {
        anyhow::bail!(
            "{} incomplete and {} failed frame(s)",
            report.incomplete,
            report.failed
        );
    }
    Ok(())
}
