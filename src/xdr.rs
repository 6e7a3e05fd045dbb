
use std::io::Cursor;

use byteorder::{BigEndian, WriteBytesExt, ReadBytesExt};

use crate::error::{protocol, Result};

pub struct Packer {
	buff: Vec<u8>
}

// Reads from the front of a received message, `pos` only ever moves in multiples of four bytes
pub struct Unpacker {
	buff: Vec<u8>,
	pos: usize,
}

fn padded(n:usize) -> usize { (n + 3) & !3 }

impl Packer {

	pub fn new() -> Self { Packer{ buff: Vec::new() } }

	pub fn reset(&mut self) { self.buff.clear(); }

	pub fn as_bytes(&self) -> &[u8] { &self.buff }

	pub fn pack_u32(&mut self, x:u32) -> Result<()> { Ok(self.buff.write_u32::<BigEndian>(x)?) }
	pub fn pack_i32(&mut self, x:i32) -> Result<()> { Ok(self.buff.write_i32::<BigEndian>(x)?) }

	pub fn pack_bool(&mut self, b:bool) -> Result<()> { self.pack_i32(if b { 1 } else { 0 }) }

	pub fn pack_enum(&mut self, x:i32) -> Result<()> { self.pack_i32(x) }

	pub fn pack_variable_len_opaque(&mut self, data:&[u8]) -> Result<()> {
		self.pack_u32(data.len() as u32)?;
		self.buff.extend_from_slice(data);

		// Ensure alignment
		while self.buff.len() % 4 != 0 { self.buff.push(0); }
		Ok(())
	}

}

impl Default for Packer {
	fn default() -> Self { Self::new() }
}

impl Unpacker {

	pub fn new() -> Self { Unpacker{ buff: Vec::new(), pos: 0 } }

	pub fn reset(&mut self, data:&[u8]) {
		self.buff.clear();
		self.buff.extend_from_slice(data);
		self.pos = 0;
	}

	pub fn remaining(&self) -> usize { self.buff.len() - self.pos }

	pub fn all_data_consumed(&self) -> bool { self.remaining() == 0 }

	pub fn remaining_bytes(&self) -> &[u8] { &self.buff[self.pos..] }

	fn skip(&mut self, n:usize) -> Result<()> {
		if n > self.remaining() {
			return Err(protocol("Tried to unpack past the end of the XDR buffer"));
		}
		self.pos += n;
		Ok(())
	}

	pub fn unpack_u32(&mut self) -> Result<u32> {
		let ans:u32 = Cursor::new(self.remaining_bytes()).read_u32::<BigEndian>()
			.map_err(|_| protocol("XDR buffer ended inside a u32"))?;
		self.skip(4)?;
		Ok(ans)
	}

	pub fn unpack_i32(&mut self) -> Result<i32> {
		let ans:i32 = Cursor::new(self.remaining_bytes()).read_i32::<BigEndian>()
			.map_err(|_| protocol("XDR buffer ended inside an i32"))?;
		self.skip(4)?;
		Ok(ans)
	}

	// Whether the value is in the right set depends on the procedure, so an enum is just an i32 here
	pub fn unpack_enum(&mut self) -> Result<i32> { self.unpack_i32() }

	pub fn unpack_variable_len_opaque(&mut self) -> Result<Vec<u8>> {
		let n = self.unpack_u32()? as usize;
		if padded(n) > self.remaining() {
			return Err(protocol("Opaque length runs past the end of the XDR buffer"));
		}
		let ans:Vec<u8> = self.buff[self.pos..(self.pos + n)].to_vec();
		self.skip(padded(n))?;
		Ok(ans)
	}

}

impl Default for Unpacker {
	fn default() -> Self { Self::new() }
}
