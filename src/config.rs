
// Settings for a sweep, loaded from JSON. Every field has a default so a file only needs
// the values that differ.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Serialize, Deserialize};

use crate::devices::sr865a::{CaptureMode, ChannelSet, Pacing};
use crate::devices::sr865a::input::{Coupling, CurrentRange, Ground, InputMode, InputSource, ReferenceImpedance, ReferenceSource, ReferenceTrigger};
use crate::error::{invalid, Error, Result};

fn secs(x:f64) -> Duration { Duration::from_secs_f64(x.max(0.0)) }

fn check_secs(name:&str, x:f64) -> Result<()> {
	if x.is_finite() && x >= 0.0 { Ok(()) }
	else { Err(invalid(format!("{} must be a non-negative number of seconds, got {}", name, x))) }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
	pub host: String,
	pub io_timeout_ms: u64,
	pub poll_interval_s: f64,
	pub chunk_delay_s: f64,
	pub continuous_chunk_delay_s: f64,
	// None waits for the capture forever
	pub status_timeout_s: Option<f64>,
	pub max_consecutive_failures: u32,
}

impl Default for CaptureSettings {
	fn default() -> Self {
		Self {
			host: "192.168.1.10".to_owned(),
			io_timeout_ms: 10000,
			poll_interval_s: 1.0,
			chunk_delay_s: 0.5,
			continuous_chunk_delay_s: 0.2,
			status_timeout_s: Some(600.0),
			max_consecutive_failures: 10,
		}
	}
}

impl CaptureSettings {

	pub fn io_timeout(&self) -> Duration { Duration::from_millis(self.io_timeout_ms) }

	pub fn pacing(&self) -> Pacing {
		Pacing {
			poll_interval: secs(self.poll_interval_s),
			chunk_delay: secs(self.chunk_delay_s),
			continuous_chunk_delay: secs(self.continuous_chunk_delay_s),
			status_timeout: self.status_timeout_s.map(secs),
			max_consecutive_failures: self.max_consecutive_failures.max(1),
		}
	}

	fn validate(&self) -> Result<()> {
		check_secs("poll_interval_s", self.poll_interval_s)?;
		check_secs("chunk_delay_s", self.chunk_delay_s)?;
		check_secs("continuous_chunk_delay_s", self.continuous_chunk_delay_s)?;
		if let Some(t) = self.status_timeout_s { check_secs("status_timeout_s", t)?; }
		if self.max_consecutive_failures == 0 {
			return Err(invalid("max_consecutive_failures must be at least 1".to_owned()));
		}
		Ok(())
	}

}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StageSettings {
	pub serial: String,
	pub polling_ms: u32,
	// Pause before each motion command, the controller drops commands sent back to back
	pub settle_s: f64,
	pub steps_per_rev: f64,
	pub gearbox_ratio: f64,
	pub pitch: f64,
	pub jog_step_deg: f64,
	pub jog_velocity_deg_s: f64,
	pub move_timeout_s: f64,
	pub home_timeout_s: f64,
}

impl Default for StageSettings {
	fn default() -> Self {
		Self {
			serial: "27257212".to_owned(),
			polling_ms: 200,
			settle_s: 0.25,
			steps_per_rev: 1919.64186,
			gearbox_ratio: 1.0,
			pitch: 1.0,
			jog_step_deg: 3.0,
			jog_velocity_deg_s: 15.0,
			move_timeout_s: 60.0,
			home_timeout_s: 120.0,
		}
	}
}

impl StageSettings {

	pub fn settle(&self) -> Duration { secs(self.settle_s) }
	pub fn move_timeout(&self) -> Duration { secs(self.move_timeout_s) }
	pub fn home_timeout(&self) -> Duration { secs(self.home_timeout_s) }

	fn validate(&self) -> Result<()> {
		check_secs("settle_s", self.settle_s)?;
		check_secs("move_timeout_s", self.move_timeout_s)?;
		check_secs("home_timeout_s", self.home_timeout_s)?;
		if !(self.steps_per_rev > 0.0) || !(self.gearbox_ratio > 0.0) || !(self.pitch > 0.0) {
			return Err(invalid("Motor parameters must be positive".to_owned()));
		}
		Ok(())
	}

}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepSettings {
	pub start_deg: f64,
	pub stop_deg: f64,
	pub step_deg: f64,
	pub home_first: bool,
	pub points_per_angle: usize,
	pub channels: ChannelSet,
	pub mode: CaptureMode,
}

impl Default for SweepSettings {
	fn default() -> Self {
		Self {
			start_deg: 0.0,
			stop_deg: 90.0,
			step_deg: 1.0,
			home_first: true,
			points_per_angle: 100,
			channels: ChannelSet::XY,
			mode: CaptureMode::Immediate,
		}
	}
}

// Everything `initialize_lockin` applies, in the order it applies them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockinInputSettings {
	pub sync_filter: bool,
	pub source: InputSource,
	pub coupling: Coupling,
	pub ground: Ground,
	pub mode: InputMode,
	pub current_range: CurrentRange,
	pub reference_source: ReferenceSource,
	pub reference_trigger: ReferenceTrigger,
	pub reference_impedance: ReferenceImpedance,
}

impl Default for LockinInputSettings {
	fn default() -> Self {
		Self {
			sync_filter: false,
			source: InputSource::A,
			coupling: Coupling::AC,
			ground: Ground::Float,
			mode: InputMode::Voltage,
			current_range: CurrentRange::Micro1,
			reference_source: ReferenceSource::External,
			reference_trigger: ReferenceTrigger::Sine,
			reference_impedance: ReferenceImpedance::Ohms50,
		}
	}
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
	pub lockin: CaptureSettings,
	pub input: LockinInputSettings,
	pub stage: StageSettings,
	pub sweep: SweepSettings,
}

impl Settings {

	pub fn from_json_str(s:&str) -> Result<Self> {
		let settings:Settings = serde_json::from_str(s)
			.map_err(|e| invalid(format!("Unable to parse settings: {}", e)))?;
		settings.validate()?;
		Ok(settings)
	}

	pub fn from_file<P: AsRef<Path>>(path:P) -> Result<Self> {
		let text = fs::read_to_string(path.as_ref()).map_err(Error::Io)?;
		Self::from_json_str(&text)
	}

	pub fn validate(&self) -> Result<()> {
		self.lockin.validate()?;
		self.stage.validate()?;
		if self.sweep.points_per_angle == 0 {
			return Err(invalid("points_per_angle must be at least 1".to_owned()));
		}
		Ok(())
	}

}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn empty_object_gives_defaults() {
		let s = Settings::from_json_str("{}").unwrap();
		let p = s.lockin.pacing();
		assert_eq!(p.poll_interval, Duration::from_secs(1));
		assert_eq!(p.chunk_delay, Duration::from_millis(500));
		assert_eq!(p.continuous_chunk_delay, Duration::from_millis(200));
		assert_eq!(p.status_timeout, Some(Duration::from_secs(600)));
		assert_eq!(s.stage.polling_ms, 200);
		assert_eq!(s.sweep.channels, ChannelSet::XY);
	}

	#[test]
	fn partial_override() {
		let s = Settings::from_json_str(r#"{
			"lockin": { "host": "10.0.0.5", "status_timeout_s": null },
			"sweep": { "start_deg": 10.0, "channels": "XYRT", "mode": "TriggerStart" }
		}"#).unwrap();
		assert_eq!(s.lockin.host, "10.0.0.5");
		assert_eq!(s.lockin.pacing().status_timeout, None);
		assert_eq!(s.lockin.chunk_delay_s, 0.5);
		assert_eq!(s.sweep.start_deg, 10.0);
		assert_eq!(s.sweep.channels, ChannelSet::XYRT);
		assert_eq!(s.sweep.mode, CaptureMode::TriggerStart);
	}

	#[test]
	fn input_settings_from_json() {
		let s = Settings::from_json_str(r#"{
			"input": { "sync_filter": true, "coupling": "DC", "reference_source": "Internal", "reference_impedance": "Meg1" }
		}"#).unwrap();
		assert!(s.input.sync_filter);
		assert_eq!(s.input.coupling, Coupling::DC);
		assert_eq!(s.input.reference_source, ReferenceSource::Internal);
		assert_eq!(s.input.reference_impedance, ReferenceImpedance::Meg1);
		assert_eq!(s.input.ground, Ground::Float);
		assert!(Settings::from_json_str(r#"{"input": {"coupling": "XX"}}"#).is_err());
	}

	#[test]
	fn bad_values_rejected() {
		assert!(Settings::from_json_str(r#"{"lockin": {"poll_interval_s": -1}}"#).is_err());
		assert!(Settings::from_json_str(r#"{"lockin": {"max_consecutive_failures": 0}}"#).is_err());
		assert!(Settings::from_json_str(r#"{"stage": {"pitch": 0}}"#).is_err());
		assert!(Settings::from_json_str(r#"{"sweep": {"points_per_angle": 0}}"#).is_err());
		assert!(Settings::from_json_str("not json").is_err());
	}
}
