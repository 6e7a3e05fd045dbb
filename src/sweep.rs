
// Reflectivity sweep: step the rotation stage through a list of angles and take a lock-in
// capture at each one. The worker owns both instruments for the whole sweep and reports
// every point as soon as it's measured.

use std::sync::mpsc;
use std::thread;

use serde::Serialize;

use crate::cancel::CancellationToken;
use crate::config::SweepSettings;
use crate::devices::kdc101::{Kdc101, MotionBus};
use crate::devices::sr865a::{CaptureMode, ChannelSet, LockInAmplifier};
use crate::error::{invalid, Error, Result};
use crate::instrument::Instrument;
use crate::utils;

#[derive(Debug, Clone)]
pub struct SweepPlan {
	pub angles: Vec<f64>,
	pub home_first: bool,
	pub points_per_angle: usize,
	pub channels: ChannelSet,
	pub mode: CaptureMode,
}

#[derive(Debug, Clone, Serialize)]
pub struct SweepPoint {
	pub index: usize,
	pub angle_deg: f64,
	// Mean of each captured channel, photodiode A first
	pub values: Vec<f64>,
	pub std_devs: Vec<f64>,
}

#[derive(Debug)]
pub enum SweepEvent {
	Point(SweepPoint),
	Finished { points: usize },
	Cancelled { points: usize },
	Failed(String),
}

// start, start+step, ... up to and including stop (within a hundredth of a step)
pub fn angle_steps(start:f64, stop:f64, step:f64) -> Result<Vec<f64>> {
	if !start.is_finite() || !stop.is_finite() || !step.is_finite() {
		return Err(invalid("Sweep limits must be finite".to_owned()));
	}
	if start == stop {
		return Ok(vec![start]);
	}
	if step == 0.0 || (stop - start).signum() != step.signum() {
		return Err(invalid(format!("A step of {} never gets from {} to {}", step, start, stop)));
	}

	let n = ((stop - start) / step + 0.01).floor() as usize;
	Ok((0..=n).map(|i| start + (i as f64) * step).collect())
}

impl SweepPlan {

	pub fn from_settings(s:&SweepSettings) -> Result<Self> {
		if s.points_per_angle == 0 {
			return Err(invalid("points_per_angle must be at least 1".to_owned()));
		}
		Ok(Self {
			angles: angle_steps(s.start_deg, s.stop_deg, s.step_deg)?,
			home_first: s.home_first,
			points_per_angle: s.points_per_angle,
			channels: s.channels,
			mode: s.mode,
		})
	}

}

// Runs the sweep on the calling thread. Cancellation is checked before every move and
// capture, and inside their waits.
pub fn run_sweep<B, I, F>(stage:&mut Kdc101<B>, lockin:&mut LockInAmplifier<I>, plan:&SweepPlan, cancel:&CancellationToken, mut on_point:F) -> Result<Vec<SweepPoint>>
	where B: MotionBus, I: Instrument, F: FnMut(&SweepPoint)
{
	stage.set_cancellation(cancel.clone());
	lockin.set_cancellation(cancel.clone());

	lockin.configure_capture(plan.points_per_angle, plan.channels)?;

	if plan.home_first {
		cancel.check()?;
		stage.home()?;
	}

	let mut points:Vec<SweepPoint> = Vec::with_capacity(plan.angles.len());
	for (index, angle) in plan.angles.iter().enumerate() {
		cancel.check()?;
		stage.move_absolute(*angle)?;

		cancel.check()?;
		let set = lockin.capture(plan.channels, plan.points_per_angle, plan.mode)?;

		let point = SweepPoint {
			index,
			angle_deg: *angle,
			values: set.means(),
			std_devs: set.channels.iter().map(|c| utils::std_dev(c)).collect(),
		};
		log::info!("point {}/{} at {}\u{b0}: {:?}", index + 1, plan.angles.len(), angle, point.values);
		on_point(&point);
		points.push(point);
	}

	Ok(points)
}

pub struct SweepWorker<B: MotionBus, I: Instrument> {
	join_handle: thread::JoinHandle<(Kdc101<B>, LockInAmplifier<I>)>,
	events_rx: mpsc::Receiver<SweepEvent>,
	cancel: CancellationToken,
}

impl<B, I> SweepWorker<B, I> where B: MotionBus + 'static, I: Instrument + 'static {

	pub fn spawn(mut stage:Kdc101<B>, mut lockin:LockInAmplifier<I>, plan:SweepPlan) -> Self {
		let (events_tx, events_rx) = mpsc::channel();
		let cancel = CancellationToken::new();
		let worker_cancel = cancel.clone();

		let join_handle = thread::spawn(move || {
			let mut measured:usize = 0;
			let result = run_sweep(&mut stage, &mut lockin, &plan, &worker_cancel, |p| {
				measured += 1;
				// Nobody listening any more is fine, the sweep still runs to completion
				let _ = events_tx.send(SweepEvent::Point(p.clone()));
			});

			let last = match result {
				Ok(points) => SweepEvent::Finished{ points: points.len() },
				Err(Error::Cancelled) => {
					log::info!("sweep cancelled after {} points", measured);
					SweepEvent::Cancelled{ points: measured }
				},
				Err(e) => {
					log::error!("sweep failed: {}", e);
					SweepEvent::Failed(format!("{}", e))
				},
			};
			if let Err(e) = events_tx.send(last) {
				log::debug!("sweep finished with nobody listening: {:?}", e.0);
			}

			(stage, lockin)
		});

		Self{ join_handle, events_rx, cancel }
	}

	pub fn events(&self) -> &mpsc::Receiver<SweepEvent> { &self.events_rx }

	pub fn cancel(&self) { self.cancel.cancel(); }

	// Waits for the worker and hands the instruments back
	pub fn join(self) -> thread::Result<(Kdc101<B>, LockInAmplifier<I>)> {
		self.join_handle.join()
	}

}
