
// Signal input and reference settings. Each one is a keyword command whose query answers
// with the index of the keyword.

use serde::{Serialize, Deserialize};

use crate::error::{protocol, Result};

pub trait InputSetting: Sized + Copy + 'static {
	const CMD: &'static str;

	// In the order of the instrument's numeric codes
	const ALL: &'static [Self];

	fn as_str(&self) -> &'static str;

	fn from_code(code:i64) -> Result<Self> {
		if code >= 0 && (code as usize) < Self::ALL.len() {
			Ok(Self::ALL[code as usize])
		} else {
			Err(protocol(&format!("Unknown {}? code {}", Self::CMD, code)))
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InputSource { A, AMinusB }

impl InputSetting for InputSource {
	const CMD: &'static str = "ISRC";
	const ALL: &'static [Self] = &[InputSource::A, InputSource::AMinusB];
	fn as_str(&self) -> &'static str {
		match self {
			InputSource::A       => "A",
			InputSource::AMinusB => "A-B",
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Coupling { AC, DC }

impl InputSetting for Coupling {
	const CMD: &'static str = "ICPL";
	const ALL: &'static [Self] = &[Coupling::AC, Coupling::DC];
	fn as_str(&self) -> &'static str {
		match self {
			Coupling::AC => "AC",
			Coupling::DC => "DC",
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Ground { Float, Ground }

impl InputSetting for Ground {
	const CMD: &'static str = "IGND";
	const ALL: &'static [Self] = &[Ground::Float, Ground::Ground];
	fn as_str(&self) -> &'static str {
		match self {
			Ground::Float  => "FLOAT",
			Ground::Ground => "GROUND",
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InputMode { Voltage, Current }

impl InputSetting for InputMode {
	const CMD: &'static str = "IVMD";
	const ALL: &'static [Self] = &[InputMode::Voltage, InputMode::Current];
	fn as_str(&self) -> &'static str {
		match self {
			InputMode::Voltage => "VOLTAGE",
			InputMode::Current => "CURRENT",
		}
	}
}

// Current input gain, 1 uA or 10 nA full scale. Set by index, there's no keyword form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CurrentRange { Micro1, Nano10 }

impl InputSetting for CurrentRange {
	const CMD: &'static str = "ICUR";
	const ALL: &'static [Self] = &[CurrentRange::Micro1, CurrentRange::Nano10];
	fn as_str(&self) -> &'static str {
		match self {
			CurrentRange::Micro1 => "0",
			CurrentRange::Nano10 => "1",
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReferenceSource { Internal, External, Dual, Chop }

impl InputSetting for ReferenceSource {
	const CMD: &'static str = "RSRC";
	const ALL: &'static [Self] = &[ReferenceSource::Internal, ReferenceSource::External, ReferenceSource::Dual, ReferenceSource::Chop];
	fn as_str(&self) -> &'static str {
		match self {
			ReferenceSource::Internal => "INT",
			ReferenceSource::External => "EXT",
			ReferenceSource::Dual     => "DUAL",
			ReferenceSource::Chop     => "CHOP",
		}
	}
}

// Which edge of the external reference input the lock-in follows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReferenceTrigger { Sine, PosTtl, NegTtl }

impl InputSetting for ReferenceTrigger {
	const CMD: &'static str = "RTRG";
	const ALL: &'static [Self] = &[ReferenceTrigger::Sine, ReferenceTrigger::PosTtl, ReferenceTrigger::NegTtl];
	fn as_str(&self) -> &'static str {
		match self {
			ReferenceTrigger::Sine   => "SIN",
			ReferenceTrigger::PosTtl => "POSTTL",
			ReferenceTrigger::NegTtl => "NEGTTL",
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReferenceImpedance { Ohms50, Meg1 }

impl InputSetting for ReferenceImpedance {
	const CMD: &'static str = "REFZ";
	const ALL: &'static [Self] = &[ReferenceImpedance::Ohms50, ReferenceImpedance::Meg1];
	fn as_str(&self) -> &'static str {
		match self {
			ReferenceImpedance::Ohms50 => "50OHMS",
			ReferenceImpedance::Meg1   => "1MEG",
		}
	}
}
