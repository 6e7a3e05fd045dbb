
extern crate lockin_sweep;

use std::env;
use std::error::Error;
use std::thread;
use std::time::Duration;

use lockin_sweep::config::Settings;
use lockin_sweep::devices::sr865a::{CaptureMode, LockInAmplifier};

// Usage: sr865a_continuous [settings.json]
// Runs the capture buffer as a ring for a little longer than it takes to fill, then prints
// the newest samples as JSON.
pub fn main() -> Result<(), Box<dyn Error>> {
	simple_logger::SimpleLogger::new()
		.with_level(log::LevelFilter::Info)
		.env()
		.init()?;

	let settings = match env::args().nth(1) {
		Some(path) => Settings::from_file(path)?,
		None => Settings::default(),
	};

	let mut sr865a = LockInAmplifier::connect(&settings.lockin.host, &settings.lockin)?;

	let channels = settings.sweep.channels;
	let points = settings.sweep.points_per_angle;
	sr865a.configure_capture(points, channels)?;

	let rate_hz = sr865a.capture_rate()?;
	let fill_s = if rate_hz > 0.0 { (points as f64) / rate_hz * 1.2 } else { 1.0 };
	log::info!("capturing at {} Hz, waiting {:.2} s", rate_hz, fill_s);

	sr865a.start_continuous(CaptureMode::Immediate)?;
	thread::sleep(Duration::from_secs_f64(fill_s));
	sr865a.stop_capture()?;

	let set = sr865a.retrieve_continuous(points, channels)?;
	log::info!("kept {} samples per channel", set.len());
	println!("{}", serde_json::to_string(&set)?);

	Ok(())
}
