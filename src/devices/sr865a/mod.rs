
use std::time::Duration;

use lazy_static::lazy_static;
use regex::{Captures, Match, Regex};
use serde::{Serialize, Deserialize};

use crate::cancel::CancellationToken;
use crate::config::{CaptureSettings, LockinInputSettings};
use crate::error::{invalid, protocol, Error, Result};
use crate::instrument::{parse_float, parse_int, Instrument};
use crate::vxi11::CoreClient;

pub mod capture;
pub mod input;

pub use capture::{CaptureMode, CaptureSession, CaptureStatus, ChannelSet, ChannelTag, Pacing, SampleSet, SessionStatus};
pub use input::{Coupling, CurrentRange, Ground, InputMode, InputSetting, InputSource, ReferenceImpedance, ReferenceSource, ReferenceTrigger};

lazy_static! {
	static ref IDN_RE: Regex = Regex::new("([^,]+),([^,]+),([^,]+),([^,\\s]+)").unwrap();
}

pub const MAX_CAPTURE_LEN_KBYTES:u32 = 4096;
pub const MAX_CAPTURE_RATE_EXPONENT:u32 = 20;
pub const MAX_DISPLAY_SLOT:u32 = 3;
pub const MAX_DISPLAY_PARAM:u32 = 16;

pub struct LockInAmplifier<I: Instrument = CoreClient> {
	inst: I,
	pacing: Pacing,
	cancel: CancellationToken,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
	pub manufacturer: String,
	pub model: String,
	pub serial_num: String,
	pub fw_version: String,
}

#[derive(Debug, Serialize)]
pub struct State {
	pub identity: Identity,
	pub capture_channels: ChannelSet,
	pub capture_len_kbytes: u32,
	pub capture_rate_max_hz: f64,
	pub capture_rate_hz: f64,
	pub phase_deg: f64,
}

fn match_str(opt_match:Option<Match>, err:&str) -> Result<String> {
	match opt_match {
		Some(m) => Ok(m.as_str().trim().to_owned()),
		None    => Err(protocol(err))
	}
}

pub fn parse_identity(idn:&str) -> Result<Identity> {
	let caps:Captures = IDN_RE.captures(idn).ok_or_else(|| protocol("Unable to parse *IDN? response"))?;
	Ok(Identity {
		manufacturer: match_str(caps.get(1), "No match for manufacturer")?,
		model:        match_str(caps.get(2), "No match for model")?,
		serial_num:   match_str(caps.get(3), "No match for serial_num")?,
		fw_version:   match_str(caps.get(4), "No match for fw_version")?,
	})
}

// Capture length that holds `points` samples of `channels` channels: whole kilobytes rounded
// up past the next even number, the instrument only takes even lengths
pub fn capture_len_for(points:usize, channels:ChannelSet) -> Result<u32> {
	let kbytes = capture::sample_bytes(points, channels.count())? as f64 / capture::KBYTE as f64;
	let even = (((kbytes / 2.0).floor() as u64) + 1) * 2;
	if kbytes > MAX_CAPTURE_LEN_KBYTES as f64 || even > MAX_CAPTURE_LEN_KBYTES as u64 {
		return Err(invalid(format!("{} points of {} need {:.1} kB, more than the capture buffer holds, reduce the sampling rate", points, channels.as_str(), kbytes)));
	}
	Ok(even as u32)
}

impl LockInAmplifier<CoreClient> {

	pub fn connect(host:&str, settings:&CaptureSettings) -> Result<Self> {
		let core = CoreClient::open(host)?;
		let mut li = Self::with_instrument(core, settings.pacing());
		li.set_timeout(settings.io_timeout())?;

		let identity = li.identity()?;
		if !identity.model.contains("SR865") {
			return Err(Error::Connection(format!("Connected to {} {} at {}, which isn't an SR865", identity.manufacturer, identity.model, host)));
		}
		log::info!("connected to {} {} (s/n {}, fw {})", identity.manufacturer, identity.model, identity.serial_num, identity.fw_version);

		Ok(li)
	}

}

impl<I: Instrument> LockInAmplifier<I> {

	pub fn with_instrument(inst:I, pacing:Pacing) -> Self {
		Self{ inst, pacing, cancel: CancellationToken::new() }
	}

	pub fn into_inner(self) -> I { self.inst }

	pub fn pacing(&self) -> &Pacing { &self.pacing }

	pub fn set_pacing(&mut self, pacing:Pacing) { self.pacing = pacing; }

	pub fn cancellation(&self) -> &CancellationToken { &self.cancel }

	// Waits inside captures and retrievals observe this token from now on
	pub fn set_cancellation(&mut self, cancel:CancellationToken) { self.cancel = cancel; }

	pub fn set_timeout(&mut self, timeout:Duration) -> Result<()> { self.inst.set_timeout(timeout) }

	pub fn write(&mut self, cmd:&str) -> Result<()> { self.inst.write_str(cmd) }

	pub fn ask(&mut self, cmd:&str) -> Result<String> { self.inst.ask_str(cmd) }

	pub fn ask_raw(&mut self, cmd:&str) -> Result<Vec<u8>> {
		self.inst.write_str(cmd)?;
		self.inst.read_raw()
	}

	pub fn identity(&mut self) -> Result<Identity> {
		let idn = self.ask("*IDN?")?;
		parse_identity(&idn)
	}

	pub fn get_full_state(&mut self) -> Result<State> {
		let identity = self.identity()?;
		let capture_channels = self.capture_channels()?;
		let capture_len_kbytes = self.capture_len_kbytes()?;
		let capture_rate_max_hz = self.capture_rate_max()?;
		let capture_rate_hz = self.capture_rate()?;
		let phase_deg = self.phase()?;

		Ok(State{ identity, capture_channels, capture_len_kbytes, capture_rate_max_hz, capture_rate_hz, phase_deg })
	}

	pub fn set_capture_channels(&mut self, channels:ChannelSet) -> Result<()> {
		self.write(&format!("CAPTURECFG {}", channels.as_str()))
	}

	pub fn capture_channels(&mut self) -> Result<ChannelSet> {
		let code = parse_int(&self.ask("CAPTURECFG?")?)?;
		ChannelSet::from_code(code)
	}

	pub fn set_capture_len_kbytes(&mut self, n:u32) -> Result<()> {
		if n < 1 || n > MAX_CAPTURE_LEN_KBYTES {
			return Err(invalid(format!("Capture length must be 1..={} kB, got {}", MAX_CAPTURE_LEN_KBYTES, n)));
		}
		self.write(&format!("CAPTURELEN {}", n))
	}

	pub fn capture_len_kbytes(&mut self) -> Result<u32> {
		let n = parse_int(&self.ask("CAPTURELEN?")?)?;
		if n < 0 { return Err(protocol("Negative capture length")); }
		Ok(n as u32)
	}

	// Selects the channels and sizes the buffer for `points` samples per channel
	pub fn configure_capture(&mut self, points:usize, channels:ChannelSet) -> Result<()> {
		let len_kb = capture_len_for(points, channels)?;
		self.set_capture_channels(channels)?;
		self.set_capture_len_kbytes(len_kb)?;
		log::debug!("capture configured for {} points of {} ({} kB)", points, channels.as_str(), len_kb);
		Ok(())
	}

	// Fastest capture rate in Hz, set by the time constant
	pub fn capture_rate_max(&mut self) -> Result<f64> { parse_float(&self.ask("CAPTURERATEMAX?")?) }

	// Capture rate becomes the maximum divided by 2^n
	pub fn set_capture_rate(&mut self, n:u32) -> Result<()> {
		if n > MAX_CAPTURE_RATE_EXPONENT {
			return Err(invalid(format!("Capture rate exponent must be 0..={}, got {}", MAX_CAPTURE_RATE_EXPONENT, n)));
		}
		self.write(&format!("CAPTURERATE {}", n))
	}

	pub fn capture_rate(&mut self) -> Result<f64> { parse_float(&self.ask("CAPTURERATE?")?) }

	// Stops after the next 2 kB are captured
	pub fn stop_capture(&mut self) -> Result<()> { self.write("CAPTURESTOP") }

	pub fn capture_bytes_so_far(&mut self) -> Result<u64> {
		let n = parse_int(&self.ask("CAPTUREBYTES?")?)?;
		if n < 0 { return Err(protocol("Negative capture byte count")); }
		Ok(n as u64)
	}

	pub fn total_kbytes_captured(&mut self) -> Result<u32> {
		let n = parse_int(&self.ask("CAPTUREPROG?")?)?;
		if n < 0 { return Err(protocol("Negative capture progress")); }
		Ok(n as u32)
	}

	// Raw binary block for len_kb kilobytes of the buffer starting at offset_kb
	pub fn capture_block(&mut self, offset_kb:u32, len_kb:u32) -> Result<Vec<u8>> {
		if len_kb < 1 || len_kb > capture::MAX_CHUNK_KBYTES {
			return Err(invalid(format!("Capture block length must be 1..={} kB, got {}", capture::MAX_CHUNK_KBYTES, len_kb)));
		}
		self.ask_raw(&format!("CAPTUREGET? {}, {}", offset_kb, len_kb))
	}

	// One sample of every captured channel as ASCII
	pub fn capture_value(&mut self, n:u32) -> Result<String> { self.ask(&format!("CAPTUREVAL? {}", n)) }

	pub fn output(&mut self, param:&str) -> Result<f64> {
		parse_float(&self.ask(&format!("OUTP? {}", param))?)
	}

	pub fn snapshot(&mut self, params:&[&str]) -> Result<Vec<f64>> {
		if params.len() < 2 || params.len() > 3 {
			return Err(invalid(format!("SNAP? takes 2 or 3 parameters, got {}", params.len())));
		}
		let resp = self.ask(&format!("SNAP? {}", params.join(", ")))?;
		let values = resp.split(',').map(parse_float).collect::<Result<Vec<f64>>>()?;
		if values.len() != params.len() {
			return Err(protocol("SNAP? returned a different number of values than asked for"));
		}
		Ok(values)
	}

	pub fn phase(&mut self) -> Result<f64> { parse_float(&self.ask("PHAS?")?) }

	pub fn set_phase(&mut self, deg:f64) -> Result<()> { self.write(&format!("PHAS {} DEG", deg)) }

	pub fn auto_phase(&mut self) -> Result<()> { self.write("APHS") }

	fn set_setting<S: InputSetting>(&mut self, value:S) -> Result<()> {
		self.write(&format!("{} {}", S::CMD, value.as_str()))
	}

	fn setting<S: InputSetting>(&mut self) -> Result<S> {
		let code = parse_int(&self.ask(&format!("{}?", S::CMD))?)?;
		S::from_code(code)
	}

	pub fn set_sync_filter(&mut self, on:bool) -> Result<()> {
		self.write(if on { "SYNC ON" } else { "SYNC OFF" })
	}

	pub fn sync_filter(&mut self) -> Result<bool> {
		match parse_int(&self.ask("SYNC?")?)? {
			0 => Ok(false),
			1 => Ok(true),
			n => Err(protocol(&format!("Unknown SYNC? code {}", n))),
		}
	}

	pub fn set_input_source(&mut self, source:InputSource) -> Result<()> { self.set_setting(source) }
	pub fn input_source(&mut self) -> Result<InputSource> { self.setting() }

	pub fn set_coupling(&mut self, coupling:Coupling) -> Result<()> { self.set_setting(coupling) }
	pub fn coupling(&mut self) -> Result<Coupling> { self.setting() }

	pub fn set_ground(&mut self, ground:Ground) -> Result<()> { self.set_setting(ground) }
	pub fn ground(&mut self) -> Result<Ground> { self.setting() }

	pub fn set_input_mode(&mut self, mode:InputMode) -> Result<()> { self.set_setting(mode) }
	pub fn input_mode(&mut self) -> Result<InputMode> { self.setting() }

	pub fn set_current_range(&mut self, range:CurrentRange) -> Result<()> { self.set_setting(range) }
	pub fn current_range(&mut self) -> Result<CurrentRange> { self.setting() }

	pub fn set_reference_source(&mut self, source:ReferenceSource) -> Result<()> { self.set_setting(source) }
	pub fn reference_source(&mut self) -> Result<ReferenceSource> { self.setting() }

	pub fn set_reference_trigger(&mut self, trigger:ReferenceTrigger) -> Result<()> { self.set_setting(trigger) }
	pub fn reference_trigger(&mut self) -> Result<ReferenceTrigger> { self.setting() }

	pub fn set_reference_impedance(&mut self, z:ReferenceImpedance) -> Result<()> { self.set_setting(z) }
	pub fn reference_impedance(&mut self) -> Result<ReferenceImpedance> { self.setting() }

	// Frequency of the signal on the reference input, in Hz
	pub fn external_ref_frequency(&mut self) -> Result<f64> { parse_float(&self.ask("FREQEXT?")?) }

	// Shows parameter `param` in front-panel display slot `slot`
	pub fn set_display(&mut self, slot:u32, param:u32) -> Result<()> {
		if slot > MAX_DISPLAY_SLOT || param > MAX_DISPLAY_PARAM {
			return Err(invalid(format!("Display slot must be 0..={} and parameter 0..={}, got {}, {}", MAX_DISPLAY_SLOT, MAX_DISPLAY_PARAM, slot, param)));
		}
		self.write(&format!("CDSP {}, {}", slot, param))
	}

	pub fn display_aux_in1(&mut self) -> Result<()> { self.set_display(3, 4) }

	// Puts the signal input and reference into a known state before measuring
	pub fn initialize_lockin(&mut self, s:&LockinInputSettings) -> Result<()> {
		self.set_sync_filter(s.sync_filter)?;
		self.set_input_source(s.source)?;
		self.set_coupling(s.coupling)?;
		self.set_ground(s.ground)?;
		self.set_input_mode(s.mode)?;
		self.set_current_range(s.current_range)?;
		self.set_reference_source(s.reference_source)?;
		self.set_reference_trigger(s.reference_trigger)?;
		self.set_reference_impedance(s.reference_impedance)?;
		log::info!("lock-in input initialized: {:?}", s);
		Ok(())
	}

	pub fn input_settings(&mut self) -> Result<LockinInputSettings> {
		Ok(LockinInputSettings {
			sync_filter: self.sync_filter()?,
			source: self.setting()?,
			coupling: self.setting()?,
			ground: self.setting()?,
			mode: self.setting()?,
			current_range: self.setting()?,
			reference_source: self.setting()?,
			reference_trigger: self.setting()?,
			reference_impedance: self.setting()?,
		})
	}

}


// Not Yet Implemented
// OFLT 	OFLT? 		REFERENCE 	Time constant.
// SCAL 	SCAL? 		REFERENCE 	Sensitivity.
// IRNG 	IRNG? 		SIGNAL 		Current input range.
// OFSL 	OFSL? 		REFERENCE 	Filter slope.

// Partially implemented
// OUTP? 	 			DATA 		Single output. Named parameters only, no numeric codes.
// SNAP? 	 			DATA 		Two or three outputs at once. Named parameters only.

// Implemented
// *IDN 	*IDN? 		SYSTEM 		Gets identification from device.
// SYNC 	SYNC? 		REFERENCE 	Synchronous filter below 200 Hz, OFF or ON.
// ISRC 	ISRC? 		SIGNAL 		Voltage input, A or A-B.
// ICPL 	ICPL? 		SIGNAL 		Input coupling, AC or DC.
// IGND 	IGND? 		SIGNAL 		Input shield, FLOAT or GROUND.
// IVMD 	IVMD? 		SIGNAL 		Voltage or current input.
// ICUR 	ICUR? 		SIGNAL 		Current input gain, 0 is 1 uA, 1 is 10 nA.
// RSRC 	RSRC? 		REFERENCE 	Reference source, INT, EXT, DUAL or CHOP.
// RTRG 	RTRG? 		REFERENCE 	External reference trigger, SIN, POSTTL or NEGTTL.
// REFZ 	REFZ? 		REFERENCE 	External reference input impedance, 50OHMS or 1MEG.
// 		FREQEXT? 	REFERENCE 	External reference frequency.
// CDSP 	 			DISPLAY 	Parameter shown in a display slot.
// PHAS 	PHAS? 		REFERENCE 	Reference phase shift.
// APHS 	 			REFERENCE 	Auto phase.
// CAPTURECFG 	CAPTURECFG? 	CAPTURE 	Channels recorded into the capture buffer.
// CAPTURELEN 	CAPTURELEN? 	CAPTURE 	Capture buffer length in kB, even, 1 to 4096.
// CAPTURERATE 	CAPTURERATE? 	CAPTURE 	Capture rate as max rate / 2^n, n 0 to 20.
// 		CAPTURERATEMAX? CAPTURE 	Fastest capture rate for the current time constant.
// CAPTURESTART 		CAPTURE 	Start a one-shot or continuous capture, immediately or on trigger.
// CAPTURESTOP 			CAPTURE 	Stop capturing.
// 		CAPTURESTAT? 	CAPTURE 	Capture status, 0 awaiting, 3 triggered, 6 done.
// 		CAPTUREBYTES? 	CAPTURE 	Bytes captured so far.
// 		CAPTUREPROG? 	CAPTURE 	Kilobytes captured so far.
// 		CAPTUREGET? 	CAPTURE 	Binary block of up to 64 kB of the buffer.
// 		CAPTUREVAL? 	CAPTURE 	One buffer entry as ASCII.
