
extern crate lockin_sweep;

use std::collections::VecDeque;
use std::str;
use std::time::Duration;

use byteorder::{LittleEndian, WriteBytesExt};

use lockin_sweep::devices::sr865a::{CaptureMode, ChannelSet, LockInAmplifier, Pacing};
use lockin_sweep::instrument::Instrument;
use lockin_sweep::{Error, Result};

// Simulated SR865A capture engine: answers the capture queries from a status script and
// a prepared buffer of samples, and serves CAPTUREGET? as binary blocks.
struct SimLockIn {
	statuses: VecDeque<i64>,
	buffer: Vec<f32>,
	commands: Vec<String>,
	pending: Option<Vec<u8>>,
}

impl SimLockIn {
	fn new(statuses:&[i64], buffer:Vec<f32>) -> Self {
		Self{ statuses: statuses.iter().cloned().collect(), buffer, commands: vec![], pending: None }
	}

	fn buffer_bytes(&self) -> Vec<u8> {
		let mut ans:Vec<u8> = vec![];
		for x in &self.buffer {
			ans.write_f32::<LittleEndian>(*x).unwrap();
		}
		ans
	}

	fn respond(&mut self, cmd:&str) -> Option<Vec<u8>> {
		if cmd == "CAPTURESTAT?" {
			let code = self.statuses.pop_front().unwrap_or(6);
			return Some(format!("{}\n", code).into_bytes());
		}
		if cmd == "CAPTUREPROG?" {
			let kb = (self.buffer.len() * 4 + 1023) / 1024;
			return Some(format!("{}\n", kb).into_bytes());
		}
		if let Some(args) = cmd.strip_prefix("CAPTUREGET? ") {
			let parts:Vec<usize> = args.split(',').map(|s| s.trim().parse().unwrap()).collect();
			let bytes = self.buffer_bytes();
			let start = (parts[0] * 1024).min(bytes.len());
			let end = ((parts[0] + parts[1]) * 1024).min(bytes.len());
			let payload = &bytes[start..end];

			let len = payload.len().to_string();
			let mut ans = format!("#{}{}", len.len(), len).into_bytes();
			ans.extend_from_slice(payload);
			ans.push(b'\n');
			return Some(ans);
		}
		None
	}

	fn count(&self, prefix:&str) -> usize {
		self.commands.iter().filter(|c| c.starts_with(prefix)).count()
	}
}

impl Instrument for SimLockIn {
	fn write(&mut self, data:&[u8]) -> Result<()> {
		let cmd = str::from_utf8(data).unwrap().trim().to_owned();
		self.pending = self.respond(&cmd);
		self.commands.push(cmd);
		Ok(())
	}

	fn read_raw(&mut self) -> Result<Vec<u8>> {
		self.pending.take().ok_or_else(|| Error::Protocol("Nothing to read".to_owned()))
	}

	fn set_timeout(&mut self, _timeout:Duration) -> Result<()> { Ok(()) }
}

#[test]
fn one_kilobyte_of_two_channels() {
	let buffer:Vec<f32> = (0..256).map(|i| i as f32).collect();
	let mut li = LockInAmplifier::with_instrument(SimLockIn::new(&[6], buffer), Pacing::immediate());

	let set = li.capture(ChannelSet::XY, 128, CaptureMode::Immediate).unwrap();

	assert_eq!(set.channel_count(), 2);
	assert_eq!(set.len(), 128);
	assert_eq!(set.channel(0).unwrap()[..3], [0.0, 2.0, 4.0]);
	assert_eq!(set.channel(1).unwrap()[127], 255.0);

	let sim = li.into_inner();
	assert_eq!(sim.commands[0], "CAPTURESTART ONE, IMM");
	assert_eq!(sim.count("CAPTUREGET?"), 1);
	assert!(sim.commands.contains(&"CAPTUREGET? 0, 1".to_owned()));
}

#[test]
fn polls_until_done() {
	let buffer:Vec<f32> = vec![1.0; 256];
	let mut li = LockInAmplifier::with_instrument(SimLockIn::new(&[0, 0, 3, 3, 6], buffer), Pacing::immediate());

	li.capture(ChannelSet::XY, 16, CaptureMode::TriggerStart).unwrap();

	let sim = li.into_inner();
	assert_eq!(sim.commands[0], "CAPTURESTART ONE, TRIG");
	assert_eq!(sim.count("CAPTURESTAT?"), 5);
}

#[test]
fn unknown_status_gives_up_after_retries() {
	let mut pacing = Pacing::immediate();
	pacing.max_consecutive_failures = 3;
	let mut li = LockInAmplifier::with_instrument(SimLockIn::new(&[0, 5, 5, 5, 6], vec![]), pacing);

	match li.capture(ChannelSet::X, 1, CaptureMode::Immediate) {
		Err(Error::RetriesExhausted{ attempts, last }) => {
			assert_eq!(attempts, 3);
			assert!(matches!(*last, Error::UnrecognizedStatus(5)));
		},
		other => panic!("unexpected {:?}", other),
	}
}

#[test]
fn large_buffer_comes_in_64k_chunks() {
	// 100 kB of XYRT data, one-shot asks for all of it
	let buffer:Vec<f32> = (0..25_600).map(|i| (i % 4) as f32 + 1.0).collect();
	let mut li = LockInAmplifier::with_instrument(SimLockIn::new(&[6], buffer), Pacing::immediate());

	let set = li.capture(ChannelSet::XYRT, 6400, CaptureMode::Immediate).unwrap();
	assert_eq!(set.len(), 6400);
	assert_eq!(set.means(), vec![1.0, 2.0, 3.0, 4.0]);

	let sim = li.into_inner();
	assert!(sim.commands.contains(&"CAPTUREGET? 0, 64".to_owned()));
	assert!(sim.commands.contains(&"CAPTUREGET? 64, 36".to_owned()));
	assert_eq!(sim.count("CAPTUREGET?"), 2);
}

#[test]
fn continuous_keeps_newest_written_samples() {
	// 192 written XY pairs, then the rest of the kilobyte never written
	let mut buffer:Vec<f32> = (1..=384).map(|i| i as f32).collect();
	buffer.resize(512, 0.0);
	let mut li = LockInAmplifier::with_instrument(SimLockIn::new(&[], buffer), Pacing::immediate());

	li.start_continuous(CaptureMode::Immediate).unwrap();
	let set = li.retrieve_continuous(10, ChannelSet::XY).unwrap();

	assert_eq!(set.len(), 10);
	assert_eq!(set.channel(0).unwrap()[9], 383.0);
	assert_eq!(set.channel(1).unwrap()[9], 384.0);
	assert_eq!(set.channel(1).unwrap()[0], 366.0);

	let sim = li.into_inner();
	assert_eq!(sim.commands[0], "CAPTURESTART CONT, IMM");
}
