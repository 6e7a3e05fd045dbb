
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

// Cooperative cancellation shared between a worker and whoever started it. Cloning
// hands out another handle to the same flag.
#[derive(Clone, Default)]
pub struct CancellationToken {
	inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancellationToken {

	pub fn new() -> Self { Self::default() }

	pub fn cancel(&self) {
		let (lock, cvar) = &*self.inner;
		let mut cancelled = lock.lock().unwrap_or_else(|e| e.into_inner());
		*cancelled = true;
		cvar.notify_all();
	}

	pub fn is_cancelled(&self) -> bool {
		*self.inner.0.lock().unwrap_or_else(|e| e.into_inner())
	}

	pub fn check(&self) -> Result<()> {
		if self.is_cancelled() { Err(Error::Cancelled) } else { Ok(()) }
	}

	// Sleeps for `d` unless cancelled first, in which case it returns early with Cancelled
	pub fn sleep(&self, d:Duration) -> Result<()> {
		let (lock, cvar) = &*self.inner;
		let deadline = Instant::now() + d;
		let mut cancelled = lock.lock().unwrap_or_else(|e| e.into_inner());

		while !*cancelled {
			let now = Instant::now();
			if now >= deadline {
				return Ok(());
			}
			cancelled = cvar.wait_timeout(cancelled, deadline - now)
				.map(|(guard, _)| guard)
				.unwrap_or_else(|e| e.into_inner().0);
		}
		Err(Error::Cancelled)
	}

}
