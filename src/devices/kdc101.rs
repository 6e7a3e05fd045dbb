
// KDC101 K-Cube DC servo controller driving a rotation mount
//
// The controller is reached through the vendor's motion-control library, which this crate
// only sees through the MotionBus trait: commands go in, replies come back, and motion
// completion is reported asynchronously as messages on a per-device queue.

use std::time::{Duration, Instant};

use crate::cancel::CancellationToken;
use crate::config::StageSettings;
use crate::error::{invalid, protocol, Error, Result};

// Device type id for a KDC101 in the vendor's device list
pub const KCUBE_DC_SERVO_TYPE:u32 = 27;

// Message types/ids the controller posts to its queue
pub const GENERIC_MOTOR:u16 = 2;
pub const MSG_HOMED:u16     = 0;
pub const MSG_MOVED:u16     = 1;
pub const MSG_STOPPED:u16   = 2;

const WAIT_SLICE:Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitKind { Distance = 0, Velocity = 1, Acceleration = 2 }

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JogDirection { Backward = 1, Forward = 2 }

impl JogDirection {
	pub fn from_code(code:u8) -> Result<Self> {
		match code {
			1 => Ok(JogDirection::Backward),
			2 => Ok(JogDirection::Forward),
			c => Err(invalid(format!("Invalid jog direction {}, use 2 for forwards or 1 for backwards", c))),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JogMode { Continuous = 1, SingleStep = 2 }

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopMode { Immediate = 1, Profiled = 2 }

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
	Open,
	Close,
	StartPolling { ms: u32 },
	StopPolling,
	ClearMessageQueue,
	Home,
	SetMotorParams { steps_per_rev: f64, gearbox_ratio: f64, pitch: f64 },
	DeviceUnitFromReal { value: f64, unit: UnitKind },
	RealFromDeviceUnit { value: i64, unit: UnitKind },
	SetMoveAbsolutePosition(i64),
	MoveAbsolute,
	MoveRelative(i64),
	SetJogMode { mode: JogMode, stop_mode: StopMode },
	SetJogVelParams { acceleration: i64, max_velocity: i64 },
	SetJogStepSize(i64),
	MoveJog(JogDirection),
	GetVelParams,
	SetVelParams { acceleration: i64, max_velocity: i64 },
	RequestPosition,
	GetPosition,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
	Done,
	Int(i64),
	Real(f64),
	// (acceleration, max velocity) in device units
	VelParams(i64, i64),
}

impl Reply {
	pub fn int(self) -> Result<i64> {
		match self { Reply::Int(x) => Ok(x), r => Err(protocol(&format!("Expected an integer reply, got {:?}", r))) }
	}
	pub fn real(self) -> Result<f64> {
		match self { Reply::Real(x) => Ok(x), r => Err(protocol(&format!("Expected a real-valued reply, got {:?}", r))) }
	}
	pub fn vel_params(self) -> Result<(i64, i64)> {
		match self { Reply::VelParams(a, v) => Ok((a, v)), r => Err(protocol(&format!("Expected velocity parameters, got {:?}", r))) }
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Message {
	pub msg_type: u16,
	pub id: u16,
	pub data: u32,
}

pub trait MotionBus: Send {
	// Serial numbers of every connected device of the given type
	fn device_serials(&mut self, type_id:u32) -> Result<Vec<String>>;

	fn send_command(&mut self, serial:&str, cmd:Command) -> Result<Reply>;

	// Next message from the device's queue, or None if nothing arrived within `timeout`
	fn wait_for_message(&mut self, serial:&str, timeout:Duration) -> Result<Option<Message>>;
}

pub struct Kdc101<B: MotionBus> {
	bus: B,
	serial: String,
	settings: StageSettings,
	cancel: CancellationToken,
	open: bool,
}

impl<B: MotionBus> Kdc101<B> {

	pub fn connect(mut bus:B, settings:StageSettings) -> Result<Self> {
		let serials = bus.device_serials(KCUBE_DC_SERVO_TYPE)
			.map_err(|e| Error::Connection(format!("Failed to build device list: {}", e)))?;

		if !serials.iter().any(|s| s == &settings.serial) {
			return Err(Error::Connection(format!("Device {} not found", settings.serial)));
		}
		log::debug!("device {} found", settings.serial);

		let serial = settings.serial.clone();
		bus.send_command(&serial, Command::Open)?;
		let mut stage = Self{ bus, serial, settings, cancel: CancellationToken::new(), open: true };

		let ms = stage.settings.polling_ms;
		stage.send(Command::StartPolling{ ms })?;
		stage.set_motor_params()?;
		log::info!("stage {} connected", stage.serial);
		Ok(stage)
	}

	pub fn serial(&self) -> &str { &self.serial }

	pub fn set_cancellation(&mut self, cancel:CancellationToken) { self.cancel = cancel; }

	fn send(&mut self, cmd:Command) -> Result<Reply> {
		log::trace!("{} <- {:?}", self.serial, cmd);
		self.bus.send_command(&self.serial, cmd)
	}

	fn settle(&self) -> Result<()> { self.cancel.sleep(self.settings.settle()) }

	fn to_device(&mut self, value:f64, unit:UnitKind) -> Result<i64> {
		self.send(Command::DeviceUnitFromReal{ value, unit })?.int()
	}

	fn to_real(&mut self, value:i64, unit:UnitKind) -> Result<f64> {
		self.send(Command::RealFromDeviceUnit{ value, unit })?.real()
	}

	// Blocks until the controller reports `expected_id`, other messages are dropped
	fn wait_for(&mut self, expected_id:u16, timeout:Duration, what:&str) -> Result<Message> {
		let deadline = Instant::now() + timeout;
		loop {
			self.cancel.check()?;
			let now = Instant::now();
			if now >= deadline {
				return Err(Error::TimedOut(format!("{} on stage {}", what, self.serial)));
			}

			let slice = (deadline - now).min(WAIT_SLICE);
			match self.bus.wait_for_message(&self.serial, slice)? {
				Some(m) if m.msg_type == GENERIC_MOTOR && m.id == expected_id => return Ok(m),
				Some(m) => log::trace!("ignoring message {:?} while waiting for id {}", m, expected_id),
				None    => { },
			}
		}
	}

	pub fn set_motor_params(&mut self) -> Result<()> {
		let (steps_per_rev, gearbox_ratio, pitch) = (self.settings.steps_per_rev, self.settings.gearbox_ratio, self.settings.pitch);
		self.send(Command::SetMotorParams{ steps_per_rev, gearbox_ratio, pitch })?;
		log::debug!("motor parameters set ({} steps/rev, gearbox {}, pitch {})", steps_per_rev, gearbox_ratio, pitch);
		Ok(())
	}

	pub fn home(&mut self) -> Result<()> {
		self.settle()?;
		self.send(Command::ClearMessageQueue)?;
		self.send(Command::Home)?;
		let timeout = self.settings.home_timeout();
		self.wait_for(MSG_HOMED, timeout, "homing")?;
		log::info!("stage {} homed", self.serial);
		Ok(())
	}

	pub fn move_absolute(&mut self, deg:f64) -> Result<()> {
		self.settle()?;
		self.send(Command::ClearMessageQueue)?;

		let target = self.to_device(deg, UnitKind::Distance)?;
		self.send(Command::SetMoveAbsolutePosition(target))?;
		self.settle()?;
		self.send(Command::MoveAbsolute)?;
		log::info!("moving to {}\u{b0}", deg);

		let timeout = self.settings.move_timeout();
		self.wait_for(MSG_MOVED, timeout, "absolute move")?;
		Ok(())
	}

	pub fn move_relative(&mut self, deg:f64) -> Result<()> {
		self.send(Command::ClearMessageQueue)?;
		let displacement = self.to_device(deg, UnitKind::Distance)?;
		self.send(Command::MoveRelative(displacement))?;
		log::info!("moving relatively by {}\u{b0}", deg);

		let timeout = self.settings.move_timeout();
		self.wait_for(MSG_MOVED, timeout, "relative move")?;
		Ok(())
	}

	// Single-step jogging at the configured velocity and step size
	pub fn set_jog_mode(&mut self) -> Result<()> {
		self.send(Command::SetJogMode{ mode: JogMode::SingleStep, stop_mode: StopMode::Immediate })?;
		let velocity = self.settings.jog_velocity_deg_s;
		let v = self.to_device(velocity, UnitKind::Velocity)?;
		self.send(Command::SetJogVelParams{ acceleration: v, max_velocity: v })?;
		let step = self.settings.jog_step_deg;
		self.set_jog_step_size(step)
	}

	pub fn set_jog_step_size(&mut self, deg:f64) -> Result<()> {
		let step = self.to_device(deg, UnitKind::Distance)?;
		self.send(Command::SetJogStepSize(step))?;
		log::debug!("jog step size set to {}\u{b0}", deg);
		Ok(())
	}

	// Raw direction code as the controller numbers them, 1 backward and 2 forward.
	// Doesn't wait for the jog to finish.
	pub fn move_jog(&mut self, code:u8) -> Result<()> {
		let direction = JogDirection::from_code(code)?;
		self.jog(direction)
	}

	pub fn jog(&mut self, direction:JogDirection) -> Result<()> {
		self.send(Command::MoveJog(direction))?;
		log::info!("jogging {:?}", direction);
		Ok(())
	}

	pub fn velocity(&mut self) -> Result<f64> {
		let (_, max_velocity) = self.send(Command::GetVelParams)?.vel_params()?;
		self.to_real(max_velocity, UnitKind::Velocity)
	}

	// Non-positive velocities are ignored
	pub fn set_velocity(&mut self, deg_s:f64) -> Result<()> {
		if !(deg_s > 0.0) {
			log::warn!("ignoring non-positive velocity {}", deg_s);
			return Ok(());
		}
		self.settle()?;
		self.send(Command::ClearMessageQueue)?;
		let (acceleration, _) = self.send(Command::GetVelParams)?.vel_params()?;
		let max_velocity = self.to_device(deg_s, UnitKind::Velocity)?;
		self.send(Command::SetVelParams{ acceleration, max_velocity })?;
		log::info!("velocity set to {}\u{b0}/s", deg_s);
		Ok(())
	}

	pub fn position(&mut self) -> Result<f64> {
		self.send(Command::RequestPosition)?;
		let dev = self.send(Command::GetPosition)?.int()?;
		self.to_real(dev, UnitKind::Distance)
	}

	pub fn disconnect(&mut self) -> Result<()> {
		if !self.open {
			return Ok(());
		}
		self.open = false;
		self.send(Command::StopPolling)?;
		self.send(Command::Close)?;
		log::info!("stage {} disconnected", self.serial);
		Ok(())
	}

}

impl<B: MotionBus> Drop for Kdc101<B> {

	fn drop(&mut self) {
		if let Err(e) = self.disconnect() {
			log::warn!("Unable to close stage {}: {}", self.serial, e);
		}
	}

}

#[cfg(test)]
pub mod fake {
	use std::collections::VecDeque;
	use std::sync::{Arc, Mutex};
	use std::time::Duration;

	use super::*;

	pub const DEVICE_UNITS_PER_DEG:f64 = 1000.0;

	#[derive(Default)]
	pub struct BusState {
		pub commands: Vec<Command>,
		pub queue: VecDeque<Message>,
		pub position: i64,
		pub target: i64,
		// Moves never report completion
		pub stuck: bool,
	}

	// Simulated controller, the state is shared so tests can look at it after the stage
	// has taken ownership of the bus
	#[derive(Clone)]
	pub struct FakeBus {
		pub serials: Vec<String>,
		pub state: Arc<Mutex<BusState>>,
	}

	impl FakeBus {
		pub fn new(serial:&str) -> Self {
			Self{ serials: vec![serial.to_owned()], state: Arc::new(Mutex::new(BusState::default())) }
		}

		pub fn commands(&self) -> Vec<Command> { self.state.lock().unwrap().commands.clone() }
	}

	fn done(s:&mut BusState, id:u16) {
		if !s.stuck {
			s.queue.push_back(Message{ msg_type: GENERIC_MOTOR, id, data: 0 });
		}
	}

	impl MotionBus for FakeBus {
		fn device_serials(&mut self, _type_id:u32) -> Result<Vec<String>> { Ok(self.serials.clone()) }

		fn send_command(&mut self, _serial:&str, cmd:Command) -> Result<Reply> {
			let mut s = self.state.lock().unwrap();
			s.commands.push(cmd.clone());
			let reply = match cmd {
				Command::DeviceUnitFromReal{ value, .. } => Reply::Int((value * DEVICE_UNITS_PER_DEG).round() as i64),
				Command::RealFromDeviceUnit{ value, .. } => Reply::Real(value as f64 / DEVICE_UNITS_PER_DEG),
				Command::ClearMessageQueue => { s.queue.clear(); Reply::Done },
				Command::Home => {
					s.queue.push_back(Message{ msg_type: 0, id: 7, data: 0 });
					s.position = 0;
					done(&mut s, MSG_HOMED);
					Reply::Done
				},
				Command::SetMoveAbsolutePosition(p) => { s.target = p; Reply::Done },
				Command::MoveAbsolute => { s.position = s.target; done(&mut s, MSG_MOVED); Reply::Done },
				Command::MoveRelative(d) => { s.position += d; done(&mut s, MSG_MOVED); Reply::Done },
				Command::GetVelParams => Reply::VelParams(500, 10_000),
				Command::GetPosition => Reply::Int(s.position),
				_ => Reply::Done,
			};
			Ok(reply)
		}

		fn wait_for_message(&mut self, _serial:&str, timeout:Duration) -> Result<Option<Message>> {
			let msg = self.state.lock().unwrap().queue.pop_front();
			if msg.is_none() {
				std::thread::sleep(timeout.min(Duration::from_millis(2)));
			}
			Ok(msg)
		}
	}

	pub fn quick_settings(serial:&str) -> StageSettings {
		StageSettings{ serial: serial.to_owned(), settle_s: 0.0, ..StageSettings::default() }
	}
}
