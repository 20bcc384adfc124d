use env_logger::Env;

use camshot::sim::SimSystem;
use camshot::{CaptureConfig, Controller};

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = CaptureConfig::default();
    let mut camera = Controller::new(SimSystem::default())?;
    print!("{}", camera.info());
    camera.print_device_info()?;

    camera.configure(&config)?;
    for path in camera.run_exposure_series(&config.exposures_s)? {
        println!("{}", path.display());
    }
    Ok(())
}
