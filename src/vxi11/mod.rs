// Device core
pub const DEVICE_CORE_PROG:u32  = 0x0607af;
pub const DEVICE_CORE_VERS:u32  = 1;
pub const CREATE_LINK:u32       = 10;
pub const DEVICE_WRITE:u32      = 11;
pub const DEVICE_READ:u32       = 12;
pub const DESTROY_LINK:u32      = 23;

pub const CLIENT_ID:i32 = 3333;
pub const DEFAULT_LOCK_TIMEOUT:u32 = 10000;
pub const DEFAULT_IO_TIMEOUT_MS:u32 = 10000;

pub const OPERATION_FLAGS_END_ONLY:i32 = 8;

// Reason bits in a device_read response
pub const REASON_REQCNT:i32 = 1;
pub const REASON_CHR:i32    = 2;
pub const REASON_END:i32    = 4;

use std::time::Duration;

use crate::error::{protocol, Error, Result};
use crate::instrument::Instrument;
use crate::rpc::port_mapping::{TcpPortMapperClient, Mapping};
use crate::rpc::tcp_clients::TcpClient;

pub mod xdr_pack;

pub struct CoreClient {
	client: TcpClient,
	opt_link: Option<Link>,
	io_timeout_ms: u32,
}

pub struct Link {
	pub link_id: i32,
	pub max_recv_size: u32,
	pub device: String,
	// Which connection the link was made on, links die with their connection
	connection: u32,
}

fn device_error(code:i32) -> Error {
	let msg = match code {
		1  => "Syntax error",
		3  => "Device not accessible",
		4  => "Invalid link identifier",
		5  => "Parameter error",
		9  => "Out of resources",
		11 => "Device locked by another link",
		15 => "I/O timeout",
		17 => "I/O error",
		21 => "Invalid address",
		23 => "Abort",
		_  => "Unknown device error",
	};
	match code {
		3 | 9 | 11 | 21 => Error::Connection(format!("{} (VXI-11 error {})", msg, code)),
		_               => Error::Protocol(format!("{} (VXI-11 error {})", msg, code)),
	}
}

impl CoreClient {

	fn get_link(&self) -> Result<&Link> {
		self.opt_link.as_ref().ok_or_else(|| protocol("No link"))
	}

	fn link_is_stale(&self) -> bool {
		match &self.opt_link {
			Some(link) => self.client.is_broken() || link.connection != self.client.reconnects(),
			None       => false,
		}
	}

	// Link for the next call. A call that died partway leaves the connection unusable, so this
	// reconnects and makes a new link to the same device first.
	fn active_link(&mut self) -> Result<(i32, usize)> {
		if self.link_is_stale() {
			if self.client.is_broken() {
				self.client.reconnect()?;
			}
			if let Some(old) = self.opt_link.take() {
				log::warn!("re-creating link to {} (was link {})", old.device, old.link_id);
				self.create_link(&old.device)?;
			}
		}
		let link = self.get_link()?;
		Ok((link.link_id, link.max_recv_size.max(1) as usize))
	}

	// Asks the port mapper where the core channel lives and connects to it, no link yet
	pub fn new(host:&str) -> Result<Self> {
		let timeout = Duration::from_millis(DEFAULT_IO_TIMEOUT_MS as u64);

		let mut pmap_client = TcpPortMapperClient::new(host, timeout)
			.map_err(|e| Error::Connection(format!("Unable to reach port mapper on {}: {}", host, e)))?;

		let mapping = Mapping {
			program: DEVICE_CORE_PROG,
			version: DEVICE_CORE_VERS,
			port: 0,
		};

		let port = pmap_client.get_port(&mapping)?;
		log::debug!("VXI-11 core channel on {} is at port {}", host, port);

		let client = TcpClient::connect((host, port), DEVICE_CORE_PROG, DEVICE_CORE_VERS, timeout)
			.map_err(|e| Error::Connection(format!("Unable to connect to {}:{}: {}", host, port, e)))?;

		Ok(CoreClient { client, opt_link: None, io_timeout_ms: DEFAULT_IO_TIMEOUT_MS })
	}

	// Connects and creates the default "inst0" link in one go
	pub fn open(host:&str) -> Result<Self> {
		let mut core = Self::new(host)?;
		core.create_link("inst0")?;
		Ok(core)
	}

	pub fn create_link(&mut self, device:&str) -> Result<()> {
		if self.opt_link.is_some() {
			return Err(protocol("Already connected to a link"));
		}

		self.client.start_call(CREATE_LINK)?;
		xdr_pack::pack_create_link_parms(&mut self.client.packer, CLIENT_ID, false, DEFAULT_LOCK_TIMEOUT, device)?;
		self.client.do_call()?;

		let error:i32         = self.client.unpacker.unpack_i32()?;
		let link_id:i32       = self.client.unpacker.unpack_i32()?;
		let _abort_port:u32   = self.client.unpacker.unpack_u32()?;
		let max_recv_size:u32 = self.client.unpacker.unpack_u32()?;

		if error != 0 {
			return Err(device_error(error));
		}

		log::debug!("created link {} to {}, max_recv_size={}", link_id, device, max_recv_size);
		let connection = self.client.reconnects();
		self.opt_link = Some(Link{ link_id, max_recv_size, device: device.to_owned(), connection });
		Ok(())
	}

	pub fn destroy_link(&mut self) -> Result<()> {
		if self.link_is_stale() {
			// Went away with the connection it was made on
			self.opt_link = None;
			return Ok(());
		}
		let link_id:i32 = self.get_link()?.link_id;

		self.client.start_call(DESTROY_LINK)?;
		xdr_pack::pack_device_link(&mut self.client.packer, link_id)?;
		self.client.do_call()?;
		self.opt_link = None;

		match self.client.unpacker.unpack_i32()? {
			0 => Ok(()),
			e => Err(device_error(e)),
		}
	}

	fn write_chunk(&mut self, link_id:i32, data:&[u8], flags:i32) -> Result<()> {
		self.client.start_call(DEVICE_WRITE)?;
		xdr_pack::pack_device_write_parms(&mut self.client.packer, link_id, self.io_timeout_ms, DEFAULT_LOCK_TIMEOUT, flags, data)?;
		self.client.do_call()?;

		let error:i32 = self.client.unpacker.unpack_i32()?;
		let size:u32  = self.client.unpacker.unpack_u32()?;

		if error != 0 {
			return Err(device_error(error));
		}
		if size as usize != data.len() {
			return Err(protocol("Number of bytes in confirmation doesn't match number of bytes sent"));
		}
		Ok(())
	}

	fn read_once(&mut self, link_id:i32) -> Result<(i32, Vec<u8>)> {
		self.client.start_call(DEVICE_READ)?;
		xdr_pack::pack_device_read_parms(&mut self.client.packer, link_id, std::u32::MAX, self.io_timeout_ms, DEFAULT_LOCK_TIMEOUT, 0, 0)?;
		self.client.do_call()?;

		let error:i32    = self.client.unpacker.unpack_i32()?;
		let reason:i32   = self.client.unpacker.unpack_i32()?;
		let data:Vec<u8> = self.client.unpacker.unpack_variable_len_opaque()?;

		if error != 0 {
			return Err(device_error(error));
		}
		Ok((reason, data))
	}

}

impl Instrument for CoreClient {

	// Messages longer than the link's receive size go out in pieces, END only on the last one
	fn write(&mut self, data:&[u8]) -> Result<()> {
		let (link_id, max_recv) = self.active_link()?;

		let mut chunks = data.chunks(max_recv).peekable();
		if chunks.peek().is_none() {
			return self.write_chunk(link_id, &[], OPERATION_FLAGS_END_ONLY);
		}
		while let Some(chunk) = chunks.next() {
			let flags = if chunks.peek().is_none() { OPERATION_FLAGS_END_ONLY } else { 0 };
			self.write_chunk(link_id, chunk, flags)?;
		}
		Ok(())
	}

	// Large binary blocks can arrive over several device_read calls, keep going until END
	fn read_raw(&mut self) -> Result<Vec<u8>> {
		let (link_id, _) = self.active_link()?;
		let mut ans:Vec<u8> = vec![];

		loop {
			let (reason, mut data) = self.read_once(link_id)?;
			ans.append(&mut data);

			if reason & REASON_END != 0 {
				return Ok(ans);
			} else if reason & (REASON_REQCNT | REASON_CHR) == 0 {
				return Err(protocol("Expected one of three reason bits to be set"));
			}
		}
	}

	fn set_timeout(&mut self, timeout:Duration) -> Result<()> {
		self.io_timeout_ms = timeout.as_millis().min(u32::MAX as u128) as u32;
		// Leave some room over the device-side timeout for the RPC round trip itself
		self.client.set_timeout(timeout + Duration::from_secs(1))
	}

}

impl Drop for CoreClient {

	fn drop(&mut self) {
		if self.opt_link.is_some() {
			if let Err(e) = self.destroy_link() {
				log::warn!("Unable to destroy VXI-11 link: {}", e);
			}
		}
	}

}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::{Read, Write};
	use std::net::{TcpListener, TcpStream};
	use std::sync::{Arc, Mutex};
	use std::thread;

	use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

	use crate::rpc::{MSG_ACCEPTED, REPLY, SUCCESS};
	use crate::xdr::{Packer, Unpacker};

	// Minimal VXI-11 core channel on one connection. Every read answers "6\n" unless
	// `cut_reads`, in which case the reply stops after 10 bytes and the connection stalls.
	fn serve(mut s:TcpStream, link_id:i32, cut_reads:bool, procs:Arc<Mutex<Vec<u32>>>) {
		loop {
			let x = match s.read_u32::<BigEndian>() { Ok(x) => x, Err(_) => return };
			let mut body = vec![0u8; (x & 0x7fff_ffff) as usize];
			if s.read_exact(&mut body).is_err() { return; }

			let mut u = Unpacker::new();
			u.reset(&body);
			let xid = u.unpack_u32().unwrap();
			for _ in 0..4 { u.unpack_u32().unwrap(); }
			let prc = u.unpack_u32().unwrap();
			for _ in 0..2 { u.unpack_enum().unwrap(); u.unpack_variable_len_opaque().unwrap(); }
			procs.lock().unwrap().push(prc);

			let mut p = Packer::new();
			for w in &[xid as i32, REPLY, MSG_ACCEPTED, 0, 0, SUCCESS] { p.pack_i32(*w).unwrap(); }
			match prc {
				CREATE_LINK => {
					for w in &[0, link_id, 0, 1024] { p.pack_i32(*w).unwrap(); }
				},
				DEVICE_WRITE => {
					for _ in 0..4 { u.unpack_u32().unwrap(); }
					let data = u.unpack_variable_len_opaque().unwrap();
					p.pack_i32(0).unwrap();
					p.pack_u32(data.len() as u32).unwrap();
				},
				DEVICE_READ => {
					p.pack_i32(0).unwrap();
					p.pack_i32(REASON_END).unwrap();
					p.pack_variable_len_opaque(b"6\n").unwrap();
				},
				_ => p.pack_i32(0).unwrap(),
			}

			let mut record:Vec<u8> = vec![];
			record.write_u32::<BigEndian>(p.as_bytes().len() as u32 | 0x8000_0000).unwrap();
			record.extend_from_slice(p.as_bytes());

			if prc == DEVICE_READ && cut_reads {
				s.write_all(&record[..10]).unwrap();
				thread::sleep(Duration::from_millis(500));
				return;
			}
			if s.write_all(&record).is_err() { return; }
		}
	}

	#[test]
	fn query_after_a_cut_off_read_relinks_and_succeeds() {
		let listener = TcpListener::bind("127.0.0.1:0").unwrap();
		let addr = listener.local_addr().unwrap();
		let procs:Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(vec![]));

		let server_procs = procs.clone();
		let server = thread::spawn(move || {
			let (first, _) = listener.accept().unwrap();
			let p1 = server_procs.clone();
			let h1 = thread::spawn(move || serve(first, 1, true, p1));
			let (second, _) = listener.accept().unwrap();
			serve(second, 2, false, server_procs);
			h1.join().unwrap();
		});

		let client = TcpClient::connect(addr, DEVICE_CORE_PROG, DEVICE_CORE_VERS, Duration::from_millis(150)).unwrap();
		let mut core = CoreClient{ client, opt_link: None, io_timeout_ms: 100 };
		core.create_link("inst0").unwrap();

		let first = core.ask_str("CAPTURESTAT?");
		assert!(matches!(first, Err(Error::Io(_))));

		assert_eq!(core.ask_str("CAPTURESTAT?").unwrap(), "6");
		assert_eq!(core.get_link().unwrap().link_id, 2);
		assert_eq!(core.get_link().unwrap().device, "inst0");

		drop(core);
		server.join().unwrap();

		let creates = procs.lock().unwrap().iter().filter(|p| **p == CREATE_LINK).count();
		assert_eq!(creates, 2);
	}

	#[test]
	fn device_errors_map_to_kinds() {
		assert!(matches!(device_error(11), Error::Connection(_)));
		assert!(matches!(device_error(15), Error::Protocol(_)));
		assert!(device_error(17).is_transient());
	}
}
