
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use byteorder::{BigEndian, WriteBytesExt, ReadBytesExt};

use crate::error::{protocol, Error, Result};
use crate::xdr;
use super::{xdr_pack, xdr_unpack};

const LAST_FRAGMENT:u32 = 0x8000_0000;

// Largest reply accepted. A CAPTUREGET? block of 64 kB is well under this, anything bigger is a
// corrupt record-marking header.
pub const MAX_RECORD_SIZE:usize = 4 * 1024 * 1024;

pub struct TcpClient {
	stream: TcpStream,
	addr: SocketAddr,
	timeout: Duration,
	// Set when a call failed partway through a record, the stream can't be trusted after that
	broken: bool,
	reconnects: u32,
	pub prog: u32,
	pub vers: u32,
	pub lastxid: u32,
	pub packer: xdr::Packer,
	pub unpacker: xdr::Unpacker,
}

fn open_stream(addr:SocketAddr, timeout:Duration) -> Result<TcpStream> {
	let stream = TcpStream::connect_timeout(&addr, timeout)?;
	stream.set_read_timeout(Some(timeout))?;
	stream.set_write_timeout(Some(timeout))?;
	stream.set_nodelay(true)?;
	Ok(stream)
}

impl TcpClient {

	pub fn connect<A: ToSocketAddrs>(addr: A, prog: u32, vers: u32, timeout: Duration) -> Result<Self> {
		let addr:SocketAddr = addr.to_socket_addrs()?.next()
			.ok_or_else(|| Error::Connection("Address didn't resolve".to_owned()))?;
		let stream = open_stream(addr, timeout)?;
		Ok(Self{ stream, addr, timeout, broken: false, reconnects: 0, prog, vers, lastxid: 0, packer: xdr::Packer::new(), unpacker: xdr::Unpacker::new() })
	}

	pub fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
		self.timeout = timeout;
		self.stream.set_read_timeout(Some(timeout))?;
		Ok(self.stream.set_write_timeout(Some(timeout))?)
	}

	pub fn is_broken(&self) -> bool { self.broken }

	// How many times the connection has been replaced, anything tied to the old one is gone
	pub fn reconnects(&self) -> u32 { self.reconnects }

	// Drops the current stream along with whatever was left unread on it
	pub fn reconnect(&mut self) -> Result<()> {
		log::warn!("reconnecting to {} after a broken call", self.addr);
		self.stream = open_stream(self.addr, self.timeout)
			.map_err(|e| Error::Connection(format!("Unable to reconnect to {}: {}", self.addr, e)))?;
		self.broken = false;
		self.reconnects += 1;
		Ok(())
	}

	// Clears the packer and writes a fresh call header, arguments get packed after this
	pub fn start_call(&mut self, prc:u32) -> Result<()> {
		if self.broken {
			self.reconnect()?;
		}
		self.lastxid = self.lastxid.wrapping_add(1);
		self.packer.reset();
		xdr_pack::pack_callheader_no_auth(&mut self.packer, self.lastxid, self.prog, self.vers, prc)
	}

	// Sends whatever is in the packer as one record and loads the matching reply into the unpacker
	pub fn do_call(&mut self) -> Result<()> {
		if self.broken {
			return Err(Error::Connection("Call started on a broken connection".to_owned()));
		}
		if let Err(e) = self.send_record() {
			self.broken = true;
			return Err(e);
		}

		loop {
			let reply = match self.read_record() {
				Ok(r) => r,
				Err(e) => {
					self.broken = true;
					return Err(e);
				},
			};
			self.unpacker.reset(&reply);

			let xid = xdr_unpack::unpack_replyheader(&mut self.unpacker)?;
			if xid == self.lastxid {
				return Ok(());
			} else if xid < self.lastxid {
				// Stale reply to a call we already gave up on
				log::debug!("discarding RPC reply with old xid {} (expecting {})", xid, self.lastxid);
				continue;
			} else {
				return Err(protocol("Received a reply with an xid we never sent"));
			}
		}
	}

	fn send_record(&mut self) -> Result<()> {
		let call:&[u8] = self.packer.as_bytes();
		let mut send_bytes:Vec<u8> = Vec::with_capacity(call.len() + 4);
		send_bytes.write_u32::<BigEndian>(call.len() as u32 | LAST_FRAGMENT)?;
		send_bytes.extend_from_slice(call);
		Ok(self.stream.write_all(&send_bytes)?)
	}

	fn read_record(&mut self) -> Result<Vec<u8>> {
		let mut record:Vec<u8> = vec![];
		let mut last:bool = false;
		while !last {
			let x:u32 = self.stream.read_u32::<BigEndian>()?;
			last = (x & LAST_FRAGMENT) != 0;
			let n = (x & !LAST_FRAGMENT) as usize;

			if record.len() + n > MAX_RECORD_SIZE {
				return Err(protocol(&format!("Record of more than {} bytes, the stream is out of sync", MAX_RECORD_SIZE)));
			}

			let start = record.len();
			record.resize(start + n, 0);
			self.stream.read_exact(&mut record[start..])?;
		}
		Ok(record)
	}

}
