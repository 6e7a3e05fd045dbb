
use std::str;
use std::time::Duration;

use crate::error::{protocol, Result};

// A request/response channel to a single message-based instrument. Every call is a
// blocking round trip and the instrument serializes requests, so implementors don't
// need to be shareable between threads, only movable to one.
pub trait Instrument: Send {

	fn write(&mut self, data:&[u8]) -> Result<()>;

	// One complete response message, binary blocks included, exactly as it came off the bus
	fn read_raw(&mut self) -> Result<Vec<u8>>;

	fn set_timeout(&mut self, timeout:Duration) -> Result<()>;

	fn write_str(&mut self, cmd:&str) -> Result<()> {
		log::trace!("-> {}", cmd);
		self.write(cmd.as_bytes())
	}

	fn ask(&mut self, data:&[u8]) -> Result<Vec<u8>> {
		self.write(data)?;
		self.read_raw()
	}

	// Text response with the trailing terminator removed
	fn ask_str(&mut self, cmd:&str) -> Result<String> {
		self.write_str(cmd)?;
		let resp = self.read_raw()?;
		let text = str::from_utf8(&resp).map_err(|_| protocol("Unable to parse response as UTF-8"))?;
		log::trace!("<- {}", text.trim_end());
		Ok(text.trim_end().to_owned())
	}

}

impl<T: Instrument + ?Sized> Instrument for Box<T> {
	fn write(&mut self, data:&[u8]) -> Result<()> { (**self).write(data) }
	fn read_raw(&mut self) -> Result<Vec<u8>> { (**self).read_raw() }
	fn set_timeout(&mut self, timeout:Duration) -> Result<()> { (**self).set_timeout(timeout) }
}

pub fn parse_int(resp:&str) -> Result<i64> {
	resp.trim().parse::<i64>().map_err(|_| protocol(&format!("Expected an integer but got {:?}", resp)))
}

pub fn parse_float(resp:&str) -> Result<f64> {
	resp.trim().parse::<f64>().map_err(|_| protocol(&format!("Expected a number but got {:?}", resp)))
}
