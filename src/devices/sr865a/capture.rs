
// Capture buffer protocol for the SR865A
//
// The lock-in records interleaved 32-bit floats for the configured channels into its
// internal buffer. A capture is started, its status polled until done, and the buffer
// then drained with CAPTUREGET? in chunks of at most 64 kB. Every chunk comes back as an
// IEEE-488.2 definite-length block: '#', one ASCII digit d, d ASCII digits of length and
// then the payload.

use std::time::{Duration, Instant};

use byteorder::{ByteOrder, LittleEndian};
use serde::{Serialize, Deserialize};

use crate::error::{decode, invalid, protocol, Error, Result};
use crate::instrument::{parse_int, Instrument};
use super::LockInAmplifier;

pub const KBYTE:usize = 1024;
pub const MAX_CHUNK_KBYTES:u32 = 64;
pub const BYTES_PER_SAMPLE:usize = 4;

// Continuous captures leave never-written slots at exactly zero. Compared as f64 this
// keeps every sample an f32 can represent other than zero.
pub const PLACEHOLDER_TOLERANCE:f64 = 1e-100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelTag { X, Y, R, Theta }

// The four capture configurations the instrument supports, CAPTURECFG codes 0..=3
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelSet { X, XY, RT, XYRT }

impl ChannelSet {

	pub fn tags(&self) -> &'static [ChannelTag] {
		match self {
			ChannelSet::X    => &[ChannelTag::X],
			ChannelSet::XY   => &[ChannelTag::X, ChannelTag::Y],
			ChannelSet::RT   => &[ChannelTag::R, ChannelTag::Theta],
			ChannelSet::XYRT => &[ChannelTag::X, ChannelTag::Y, ChannelTag::R, ChannelTag::Theta],
		}
	}

	pub fn count(&self) -> usize { self.tags().len() }

	pub fn as_str(&self) -> &'static str {
		match self {
			ChannelSet::X    => "X",
			ChannelSet::XY   => "XY",
			ChannelSet::RT   => "RT",
			ChannelSet::XYRT => "XYRT",
		}
	}

	pub fn from_code(code:i64) -> Result<Self> {
		match code {
			0 => Ok(ChannelSet::X),
			1 => Ok(ChannelSet::XY),
			2 => Ok(ChannelSet::RT),
			3 => Ok(ChannelSet::XYRT),
			_ => Err(protocol(&format!("Unknown capture configuration code {}", code))),
		}
	}

}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CaptureMode {
	Immediate,
	// Armed, waits for an edge on the rear-panel trigger input
	TriggerStart,
}

impl CaptureMode {
	fn as_arg(&self) -> &'static str {
		match self {
			CaptureMode::Immediate    => "IMM",
			CaptureMode::TriggerStart => "TRIG",
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CaptureStatus { Awaiting, Triggered, Done }

impl CaptureStatus {
	pub fn from_code(code:i64) -> Result<Self> {
		match code {
			0 => Ok(CaptureStatus::Awaiting),
			3 => Ok(CaptureStatus::Triggered),
			6 => Ok(CaptureStatus::Done),
			c => Err(Error::UnrecognizedStatus(c)),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionStatus { Awaiting, Triggered, Done, Error }

impl From<CaptureStatus> for SessionStatus {
	fn from(s:CaptureStatus) -> Self {
		match s {
			CaptureStatus::Awaiting  => SessionStatus::Awaiting,
			CaptureStatus::Triggered => SessionStatus::Triggered,
			CaptureStatus::Done      => SessionStatus::Done,
		}
	}
}

#[derive(Debug, Clone, Serialize)]
pub struct CaptureSession {
	pub channels: ChannelSet,
	pub target_samples: usize,
	pub mode: CaptureMode,
	pub status: SessionStatus,
}

impl CaptureSession {
	pub fn new(channels:ChannelSet, target_samples:usize, mode:CaptureMode) -> Self {
		Self{ channels, target_samples, mode, status: SessionStatus::Awaiting }
	}
}

// How fast to talk to the instrument and how long to put up with it
#[derive(Debug, Clone)]
pub struct Pacing {
	pub poll_interval: Duration,
	pub chunk_delay: Duration,
	pub continuous_chunk_delay: Duration,
	pub status_timeout: Option<Duration>,
	pub max_consecutive_failures: u32,
}

impl Pacing {
	// No waiting at all, for instruments that answer instantly (simulated ones)
	pub fn immediate() -> Self {
		Self {
			poll_interval: Duration::from_secs(0),
			chunk_delay: Duration::from_secs(0),
			continuous_chunk_delay: Duration::from_secs(0),
			status_timeout: None,
			max_consecutive_failures: 10,
		}
	}
}

// Per-channel samples, channel i is index i of the capture configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SampleSet {
	pub channels: Vec<Vec<f32>>,
}

impl SampleSet {

	pub fn channel_count(&self) -> usize { self.channels.len() }

	pub fn channel(&self, idx:usize) -> Option<&[f32]> { self.channels.get(idx).map(|c| c.as_slice()) }

	// Samples per channel, the shortest one if they differ
	pub fn len(&self) -> usize { self.channels.iter().map(|c| c.len()).min().unwrap_or(0) }

	pub fn is_empty(&self) -> bool { self.len() == 0 }

	pub fn means(&self) -> Vec<f64> {
		self.channels.iter().map(|c| crate::utils::mean(c)).collect()
	}

	pub fn truncate_leading(&mut self, n:usize) {
		for c in self.channels.iter_mut() { c.truncate(n); }
	}

	pub fn keep_trailing(&mut self, n:usize) {
		for c in self.channels.iter_mut() {
			if c.len() > n {
				c.drain(..(c.len() - n));
			}
		}
	}

	pub fn drop_placeholders(&mut self, tolerance:f64) {
		for c in self.channels.iter_mut() {
			c.retain(|x| (*x as f64).abs() > tolerance);
		}
	}

}

// Size of the next CAPTUREGET? request in kB: everything that's left rounded up to the
// 1 kB grain, but never more than the 64 kB the instrument hands out at once
pub fn chunk_kbytes(remaining_bytes:i64) -> u32 {
	if remaining_bytes <= 0 {
		return 0;
	}
	let kb = (remaining_bytes as u64 + KBYTE as u64 - 1) / KBYTE as u64;
	kb.min(MAX_CHUNK_KBYTES as u64) as u32
}

pub fn strip_block_header(chunk:&[u8]) -> Result<&[u8]> {
	if chunk.len() < 2 {
		return Err(decode("Block shorter than its header"));
	}
	if chunk[0] != b'#' {
		return Err(decode(&format!("Block starts with {:#04x} instead of '#'", chunk[0])));
	}
	let digits = match (chunk[1] as char).to_digit(10) {
		Some(d) => d as usize,
		None    => return Err(decode("Second byte of the block header isn't an ASCII digit")),
	};
	let header_len = 2 + digits;
	if chunk.len() < header_len {
		return Err(decode("Block ends inside its header"));
	}
	Ok(&chunk[header_len..])
}

// Little-endian f32s from the first min(limit, len) bytes, whole samples only
pub fn decode_le_f32(payload:&[u8], limit_bytes:usize) -> Vec<f32> {
	let n = limit_bytes.min(payload.len()) / BYTES_PER_SAMPLE;
	payload[..(n * BYTES_PER_SAMPLE)]
		.chunks_exact(BYTES_PER_SAMPLE)
		.map(LittleEndian::read_f32)
		.collect()
}

// Bytes taken by `samples` samples of each of `channel_count` channels
pub fn sample_bytes(samples:usize, channel_count:usize) -> Result<usize> {
	samples.checked_mul(channel_count)
		.and_then(|x| x.checked_mul(BYTES_PER_SAMPLE))
		.ok_or_else(|| invalid(format!("{} samples of {} channels don't fit in memory", samples, channel_count)))
}

// Sample i of the flat stream belongs to channel i mod n
pub fn deinterleave(flat:&[f32], n:usize) -> SampleSet {
	let n = n.max(1);
	let mut channels:Vec<Vec<f32>> = (0..n).map(|_| Vec::with_capacity(flat.len() / n + 1)).collect();
	for (i, x) in flat.iter().enumerate() {
		channels[i % n].push(*x);
	}
	SampleSet{ channels }
}

impl<I: Instrument> LockInAmplifier<I> {

	pub fn start_capture(&mut self, mode:CaptureMode) -> Result<()> {
		self.write(&format!("CAPTURESTART ONE, {}", mode.as_arg()))
	}

	// Ring-buffer capture that keeps overwriting the oldest data until CAPTURESTOP
	pub fn start_continuous(&mut self, mode:CaptureMode) -> Result<()> {
		self.write(&format!("CAPTURESTART CONT, {}", mode.as_arg()))
	}

	pub fn poll_status(&mut self) -> Result<CaptureStatus> {
		let code = parse_int(&self.ask("CAPTURESTAT?")?)?;
		CaptureStatus::from_code(code)
	}

	// Polls until the capture is done. Glitches on individual polls are retried, but only
	// max_consecutive_failures times in a row.
	pub fn wait_until_done(&mut self, session:&mut CaptureSession) -> Result<()> {
		let result = self.poll_until_done(session);
		if result.is_err() {
			session.status = SessionStatus::Error;
		}
		result
	}

	fn poll_until_done(&mut self, session:&mut CaptureSession) -> Result<()> {
		let deadline:Option<Instant> = self.pacing.status_timeout.map(|t| Instant::now() + t);
		let mut failures:u32 = 0;
		let mut seen_trigger:bool = session.status == SessionStatus::Triggered;

		loop {
			self.cancel.check()?;
			if let Some(d) = deadline {
				if Instant::now() >= d {
					return Err(Error::TimedOut("capture to finish".to_owned()));
				}
			}

			match self.poll_status() {
				Ok(status) => {
					failures = 0;
					session.status = status.into();
					match status {
						CaptureStatus::Triggered if !seen_trigger => {
							log::info!("lock-in capture triggered");
							seen_trigger = true;
						},
						CaptureStatus::Done => {
							log::info!("lock-in capture finished");
							return Ok(());
						},
						_ => { },
					}
				},
				Err(e) if e.is_transient() => {
					failures += 1;
					log::warn!("error while querying capture status ({}/{}): {}", failures, self.pacing.max_consecutive_failures, e);
					if failures >= self.pacing.max_consecutive_failures {
						return Err(Error::RetriesExhausted{ attempts: failures, last: Box::new(e) });
					}
				},
				Err(e) => return Err(e),
			}

			self.cancel.sleep(self.pacing.poll_interval)?;
		}
	}

	fn drain_flat(&mut self, total_bytes:usize, delay:Duration) -> Result<Vec<f32>> {
		let mut remaining:i64 = total_bytes as i64;
		let mut offset_kb:u32 = 0;
		let mut failures:u32 = 0;
		let mut ans:Vec<f32> = Vec::with_capacity(total_bytes / BYTES_PER_SAMPLE);

		while remaining > 0 {
			self.cancel.check()?;

			let len_kb = chunk_kbytes(remaining);
			let limit = remaining as usize;
			let chunk = self.capture_block(offset_kb, len_kb)
				.and_then(|buf| strip_block_header(&buf).map(|payload| decode_le_f32(payload, limit)));

			match chunk {
				Ok(samples) => {
					log::debug!("retrieved {} samples at offset {} kB ({} kB requested)", samples.len(), offset_kb, len_kb);
					failures = 0;
					ans.extend_from_slice(&samples);
					offset_kb += len_kb;
					remaining -= len_kb as i64 * KBYTE as i64;
				},
				Err(e) if e.is_transient() => {
					failures += 1;
					log::warn!("error while retrieving data at offset {} kB ({}/{}): {}", offset_kb, failures, self.pacing.max_consecutive_failures, e);
					if failures >= self.pacing.max_consecutive_failures {
						return Err(Error::RetriesExhausted{ attempts: failures, last: Box::new(e) });
					}
				},
				Err(e) => return Err(e),
			}

			// Give the instrument time to refill its output buffer before asking again
			if remaining > 0 {
				self.cancel.sleep(delay)?;
			}
		}

		Ok(ans)
	}

	pub fn drain_buffer(&mut self, total_bytes:usize, channel_count:usize) -> Result<SampleSet> {
		let delay = self.pacing.chunk_delay;
		let flat = self.drain_flat(total_bytes, delay)?;
		Ok(deinterleave(&flat, channel_count))
	}

	// One-shot retrieval, the first target_samples of each channel
	pub fn retrieve_data(&mut self, target_samples:usize, channels:ChannelSet) -> Result<SampleSet> {
		let n = channels.count();
		let captured = self.total_kbytes_captured()? as usize * KBYTE;
		let wanted = captured.min(sample_bytes(target_samples, n)?);
		log::info!("amount of data captured: {} bytes, retrieving {}", captured, wanted);

		let delay = self.pacing.chunk_delay;
		let flat = self.drain_flat(wanted, delay)?;
		let mut set = deinterleave(&flat, n);
		set.truncate_leading(target_samples);
		Ok(set)
	}

	// Continuous retrieval: the whole buffer, minus slots never written, newest target_samples kept
	pub fn retrieve_continuous(&mut self, target_samples:usize, channels:ChannelSet) -> Result<SampleSet> {
		let captured = self.total_kbytes_captured()? as usize * KBYTE;
		log::info!("amount of data captured: {} bytes", captured);

		let delay = self.pacing.continuous_chunk_delay;
		let flat = self.drain_flat(captured, delay)?;

		let mut set = deinterleave(&flat, channels.count());
		set.drop_placeholders(PLACEHOLDER_TOLERANCE);
		set.keep_trailing(target_samples);
		Ok(set)
	}

	// Start, wait and retrieve a one-shot capture
	pub fn capture(&mut self, channels:ChannelSet, target_samples:usize, mode:CaptureMode) -> Result<SampleSet> {
		let mut session = CaptureSession::new(channels, target_samples, mode);
		self.start_capture(mode)?;
		log::info!("lock-in capturing {} samples of {} ({:?})", target_samples, channels.as_str(), mode);

		self.wait_until_done(&mut session)?;
		let set = self.retrieve_data(session.target_samples, session.channels)?;
		log::info!("data retrieved, {} samples per channel", set.len());
		Ok(set)
	}

}

#[cfg(test)]
pub(crate) mod tests {
	use super::*;
	use crate::instrument::fake::ScriptedInstrument;

	pub fn block(samples:&[f32]) -> Vec<u8> {
		let mut payload:Vec<u8> = vec![];
		for s in samples { payload.extend_from_slice(&s.to_le_bytes()); }
		let len = payload.len().to_string();
		let mut ans = format!("#{}{}", len.len(), len).into_bytes();
		ans.append(&mut payload);
		ans.push(b'\n');
		ans
	}

	fn lockin(inst:ScriptedInstrument) -> LockInAmplifier<ScriptedInstrument> {
		LockInAmplifier::with_instrument(inst, Pacing::immediate())
	}

	#[test]
	fn chunk_size_bounds() {
		assert_eq!(chunk_kbytes(1), 1);
		assert_eq!(chunk_kbytes(1024), 1);
		assert_eq!(chunk_kbytes(1025), 2);
		assert_eq!(chunk_kbytes(64 * 1024), 64);
		assert_eq!(chunk_kbytes(10 * 1024 * 1024), 64);
		assert_eq!(chunk_kbytes(0), 0);
		assert_eq!(chunk_kbytes(-5), 0);

		for remaining in (1..300_000i64).step_by(997) {
			let kb = chunk_kbytes(remaining) as i64;
			assert!(kb <= 64);
			assert!(kb <= (remaining + 1023) / 1024);
			assert!(kb >= 1);
		}
	}

	#[test]
	fn header_length_comes_from_second_byte() {
		assert_eq!(strip_block_header(b"#3012abcdefghijkl").unwrap(), b"abcdefghijkl");
		assert_eq!(strip_block_header(b"#0xyz").unwrap(), b"xyz");
		assert!(strip_block_header(b"#").is_err());
		assert!(strip_block_header(b"#9123").is_err());
		assert!(strip_block_header(b"#a123").is_err());
		assert!(strip_block_header(b"x3012abcd").is_err());
	}

	#[test]
	fn decoding_is_bounded_by_limit_and_payload() {
		let raw = block(&[1.0, -2.5, 3.25]);
		let payload = strip_block_header(&raw).unwrap();

		// Trailing newline is not a whole sample
		assert_eq!(decode_le_f32(payload, 1000), vec![1.0, -2.5, 3.25]);
		assert_eq!(decode_le_f32(payload, 8), vec![1.0, -2.5]);
		assert_eq!(decode_le_f32(payload, 7), vec![1.0]);
		assert!(decode_le_f32(payload, 0).is_empty());
	}

	#[test]
	fn decoding_keeps_every_whole_sample() {
		let xs:Vec<f32> = (0..1000).map(|i| i as f32 * 0.5 - 100.0).collect();
		let raw = block(&xs);
		let payload = strip_block_header(&raw).unwrap();
		assert_eq!(decode_le_f32(payload, payload.len()), xs);
		assert_eq!(decode_le_f32(&payload[..4001], 4001).len(), 1000);
	}

	#[test]
	fn oversized_sample_counts_are_rejected() {
		assert_eq!(sample_bytes(128, 2).unwrap(), 1024);
		assert!(matches!(sample_bytes(usize::MAX, 2), Err(Error::InvalidParameter(_))));
		assert!(matches!(sample_bytes(usize::MAX / 4, 4), Err(Error::InvalidParameter(_))));

		let mut li = lockin(ScriptedInstrument::new());
		li.inst.reply("1");
		assert!(matches!(li.retrieve_data(usize::MAX, ChannelSet::XYRT), Err(Error::InvalidParameter(_))));
		assert_eq!(li.inst.count("CAPTUREGET?"), 0);
	}

	#[test]
	fn deinterleave_recovers_channels() {
		let a = [1.0f32, 2.0, 3.0];
		let b = [10.0f32, 20.0, 30.0];
		let c = [100.0f32, 200.0, 300.0];
		let flat:Vec<f32> = (0..3).flat_map(|i| vec![a[i], b[i], c[i]]).collect();

		let set = deinterleave(&flat, 3);
		assert_eq!(set.channel(0).unwrap(), &a);
		assert_eq!(set.channel(1).unwrap(), &b);
		assert_eq!(set.channel(2).unwrap(), &c);
	}

	#[test]
	fn status_codes() {
		assert_eq!(CaptureStatus::from_code(0).unwrap(), CaptureStatus::Awaiting);
		assert_eq!(CaptureStatus::from_code(3).unwrap(), CaptureStatus::Triggered);
		assert_eq!(CaptureStatus::from_code(6).unwrap(), CaptureStatus::Done);
		assert!(matches!(CaptureStatus::from_code(2), Err(Error::UnrecognizedStatus(2))));
	}

	#[test]
	fn one_kilobyte_two_channels_is_one_request() {
		let samples:Vec<f32> = (0..256).map(|i| i as f32).collect();
		let mut inst = ScriptedInstrument::new();
		inst.reply_bytes(block(&samples));

		let mut li = lockin(inst);
		let set = li.drain_buffer(1024, 2).unwrap();

		assert_eq!(li.inst.sent, vec!["CAPTUREGET? 0, 1".to_string()]);
		assert_eq!(set.channel_count(), 2);
		assert_eq!(set.channel(0).unwrap().len(), 128);
		assert_eq!(set.channel(1).unwrap().len(), 128);
		assert_eq!(set.channel(0).unwrap()[1], 2.0);
		assert_eq!(set.channel(1).unwrap()[1], 3.0);
	}

	#[test]
	fn large_buffer_drains_in_64k_chunks() {
		// 130 kB: 64 + 64 + 2
		let total = 130 * 1024;
		let mut inst = ScriptedInstrument::new();
		for kb in &[64usize, 64, 2] {
			let samples:Vec<f32> = vec![1.5; kb * 1024 / 4];
			inst.reply_bytes(block(&samples));
		}

		let mut li = lockin(inst);
		let set = li.drain_buffer(total, 4).unwrap();

		assert_eq!(li.inst.sent, vec!["CAPTUREGET? 0, 64", "CAPTUREGET? 64, 64", "CAPTUREGET? 128, 2"]);
		assert_eq!(set.len() * 4 * 4, total);
	}

	#[test]
	fn transient_chunk_failure_retries_same_offset() {
		let mut inst = ScriptedInstrument::new();
		inst.reply_bytes(b"garbage".to_vec());
		inst.fail(protocol("read glitch"));
		inst.reply_bytes(block(&vec![2.0; 256]));

		let mut li = lockin(inst);
		let set = li.drain_buffer(1024, 1).unwrap();
		assert_eq!(li.inst.count("CAPTUREGET? 0, 1"), 3);
		assert_eq!(set.len(), 256);
	}

	#[test]
	fn persistent_chunk_failure_escalates() {
		let mut inst = ScriptedInstrument::new();
		for _ in 0..3 { inst.reply_bytes(b"#".to_vec()); }

		let mut li = lockin(inst);
		li.pacing.max_consecutive_failures = 3;
		match li.drain_buffer(1024, 1) {
			Err(Error::RetriesExhausted{ attempts, .. }) => assert_eq!(attempts, 3),
			other => panic!("unexpected {:?}", other),
		}
	}

	#[test]
	fn poll_loop_stops_exactly_at_done() {
		let mut inst = ScriptedInstrument::new();
		for code in &["0", "0", "3", "3", "6"] { inst.reply(code); }
		// Would be consumed if polling went on past done
		inst.reply("0");

		let mut li = lockin(inst);
		let mut session = CaptureSession::new(ChannelSet::XY, 10, CaptureMode::TriggerStart);
		li.wait_until_done(&mut session).unwrap();

		assert_eq!(li.inst.count("CAPTURESTAT?"), 5);
		assert_eq!(session.status, SessionStatus::Done);
		assert_eq!(li.inst.replies.len(), 1);
	}

	#[test]
	fn poll_loop_tolerates_glitches() {
		let mut inst = ScriptedInstrument::new();
		inst.reply("0").reply("junk").reply("5").reply("6");

		let mut li = lockin(inst);
		let mut session = CaptureSession::new(ChannelSet::X, 10, CaptureMode::Immediate);
		li.wait_until_done(&mut session).unwrap();
		assert_eq!(li.inst.count("CAPTURESTAT?"), 4);
	}

	#[test]
	fn poll_loop_gives_up_after_consecutive_failures() {
		let mut inst = ScriptedInstrument::new();
		inst.reply("9").reply("9").reply("9");

		let mut li = lockin(inst);
		li.pacing.max_consecutive_failures = 3;
		let mut session = CaptureSession::new(ChannelSet::X, 10, CaptureMode::Immediate);
		assert!(matches!(li.wait_until_done(&mut session), Err(Error::RetriesExhausted{ .. })));
		assert_eq!(session.status, SessionStatus::Error);
	}

	#[test]
	fn poll_loop_times_out() {
		let mut inst = ScriptedInstrument::new();
		for _ in 0..1000 { inst.reply("0"); }

		let mut li = lockin(inst);
		li.pacing.status_timeout = Some(Duration::from_millis(30));
		li.pacing.poll_interval = Duration::from_millis(5);
		let mut session = CaptureSession::new(ChannelSet::X, 10, CaptureMode::Immediate);
		assert!(matches!(li.wait_until_done(&mut session), Err(Error::TimedOut(_))));
	}

	#[test]
	fn cancelled_before_polling() {
		let mut li = lockin(ScriptedInstrument::new());
		li.cancellation().cancel();
		let mut session = CaptureSession::new(ChannelSet::X, 10, CaptureMode::Immediate);
		assert!(matches!(li.wait_until_done(&mut session), Err(Error::Cancelled)));
		assert_eq!(li.inst.count("CAPTURESTAT?"), 0);
	}

	#[test]
	fn one_shot_keeps_leading_window() {
		// 2 channels, 100 samples wanted, 2 kB captured
		let flat:Vec<f32> = (0..512).map(|i| i as f32).collect();
		let mut inst = ScriptedInstrument::new();
		inst.reply("2");
		inst.reply_bytes(block(&flat));

		let mut li = lockin(inst);
		let set = li.retrieve_data(100, ChannelSet::XY).unwrap();

		// min(2048, 100*4*2) = 800 bytes, one 1 kB request
		assert_eq!(li.inst.sent, vec!["CAPTUREPROG?", "CAPTUREGET? 0, 1"]);
		assert_eq!(set.channel(0).unwrap().len(), 100);
		assert_eq!(set.channel(1).unwrap().len(), 100);
		assert_eq!(set.channel(0).unwrap()[0], 0.0);
		assert_eq!(set.channel(1).unwrap()[99], 199.0);
	}

	#[test]
	fn continuous_keeps_nonzero_suffix() {
		// 2 kB of XY: 100 placeholder pairs, then real data 1..=156
		let mut flat:Vec<f32> = vec![0.0; 200];
		for i in 1..=156 { flat.push(i as f32); flat.push(-(i as f32)); }
		let mut inst = ScriptedInstrument::new();
		inst.reply("2");
		inst.reply_bytes(block(&flat));

		let mut li = lockin(inst);
		let set = li.retrieve_continuous(50, ChannelSet::XY).unwrap();

		let x = set.channel(0).unwrap();
		let y = set.channel(1).unwrap();
		assert_eq!(x.len(), 50);
		assert_eq!(x[0], 107.0);
		assert_eq!(x[49], 156.0);
		assert_eq!(y[49], -156.0);
		assert!(x.iter().chain(y.iter()).all(|v| *v != 0.0));
	}

	#[test]
	fn continuous_with_fewer_real_samples_than_wanted() {
		let mut flat:Vec<f32> = vec![0.0; 250];
		for i in 1..=6 { flat.push(i as f32); }
		let mut inst = ScriptedInstrument::new();
		inst.reply("1");
		inst.reply_bytes(block(&flat));

		let mut li = lockin(inst);
		let set = li.retrieve_continuous(100, ChannelSet::X).unwrap();
		assert_eq!(set.channel(0).unwrap(), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
	}

	#[test]
	fn full_capture_sequence() {
		let mut inst = ScriptedInstrument::new();
		inst.reply("0").reply("6").reply("1");
		inst.reply_bytes(block(&[1.0, 2.0, 3.0, 4.0]));

		let mut li = lockin(inst);
		let set = li.capture(ChannelSet::XY, 2, CaptureMode::Immediate).unwrap();

		assert_eq!(li.inst.sent[0], "CAPTURESTART ONE, IMM");
		assert_eq!(set.channels, vec![vec![1.0, 3.0], vec![2.0, 4.0]]);
		assert_eq!(set.means(), vec![2.0, 3.0]);
	}
}
