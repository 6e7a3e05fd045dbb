
use crate::error::{protocol, Result};
use crate::xdr::Unpacker;
use crate::rpc::{REPLY, MSG_DENIED, RPC_MISMATCH, AUTH_ERROR, MSG_ACCEPTED, PROG_UNAVAIL, PROG_MISMATCH, PROC_UNAVAIL, GARBAGE_ARGS, SUCCESS};

pub fn unpack_auth(unpacker:&mut Unpacker) -> Result<(i32, Vec<u8>)> {
	let flavor:i32    = unpacker.unpack_enum()?;
	let stuff:Vec<u8> = unpacker.unpack_variable_len_opaque()?;
	Ok((flavor, stuff))
}

// Returns the xid of an accepted, successful reply and leaves the unpacker at the procedure results
pub fn unpack_replyheader(unpacker:&mut Unpacker) -> Result<u32> {
	let xid:u32 = unpacker.unpack_u32()?;

	if unpacker.unpack_enum()? != REPLY { return Err(protocol("Expected REPLY message type")); }

	match unpacker.unpack_enum()? {
		MSG_DENIED => {
			return match unpacker.unpack_enum()? {
				RPC_MISMATCH => Err(protocol("Message denied due to RPC_MISMATCH")),
				AUTH_ERROR   => Err(protocol("Message denied due to AUTH_ERROR")),
				_            => Err(protocol("Message denied for an unknown reason")),
			};
		},
		MSG_ACCEPTED => { },
		_            => return Err(protocol("Neither MSG_DENIED nor MSG_ACCEPTED in reply")),
	}

	// Verifier is always AUTH_NONE for the instruments we talk to
	unpack_auth(unpacker)?;

	match unpacker.unpack_enum()? {
		SUCCESS       => Ok(xid),
		PROG_UNAVAIL  => Err(protocol("Program unavailable")),
		PROG_MISMATCH => Err(protocol("Program version mismatch")),
		PROC_UNAVAIL  => Err(protocol("Procedure unavailable")),
		GARBAGE_ARGS  => Err(protocol("Remote could not decode the arguments")),
		_             => Err(protocol("Call failed for an unknown reason")),
	}
}
