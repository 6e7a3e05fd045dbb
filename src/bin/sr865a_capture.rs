
extern crate lockin_sweep;

use std::env;
use std::error::Error;

use serde::Serialize;

use lockin_sweep::config::Settings;
use lockin_sweep::devices::sr865a::LockInAmplifier;

#[derive(Debug, Serialize)]
struct CaptureResult {
	channels: String,
	samples: usize,
	means: Vec<f64>,
	data: Vec<Vec<f32>>,
}

// Usage: sr865a_capture [settings.json]
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
	sr865a.initialize_lockin(&settings.input)?;
	eprintln!("{}", serde_json::to_string(&sr865a.get_full_state()?)?);

	let channels = settings.sweep.channels;
	let points = settings.sweep.points_per_angle;
	sr865a.configure_capture(points, channels)?;

	let set = sr865a.capture(channels, points, settings.sweep.mode)?;

	let result = CaptureResult {
		channels: channels.as_str().to_owned(),
		samples: set.len(),
		means: set.means(),
		data: set.channels,
	};
	println!("{}", serde_json::to_string(&result)?);

	Ok(())
}
