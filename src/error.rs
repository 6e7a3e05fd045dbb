
use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
	#[error("Connection error: {0}")]
	Connection(String),
	#[error("Protocol error: {0}")]
	Protocol(String),
	#[error("Unable to decode binary block: {0}")]
	Decode(String),
	#[error("Unrecognized capture status code {0}")]
	UnrecognizedStatus(i64),
	#[error("Invalid parameter: {0}")]
	InvalidParameter(String),
	#[error("Timed out waiting for {0}")]
	TimedOut(String),
	#[error("Operation cancelled")]
	Cancelled,
	#[error("Gave up after {attempts} consecutive failures, last one: {last}")]
	RetriesExhausted { attempts: u32, last: Box<Error> },
	#[error("IO error: {0}")]
	Io(#[from] io::Error),
}

impl Error {

	// Errors a polling or draining loop is allowed to swallow and retry
	pub fn is_transient(&self) -> bool {
		match self {
			Error::Protocol(_) | Error::Decode(_) | Error::UnrecognizedStatus(_) | Error::Io(_) => true,
			_ => false,
		}
	}

}

pub(crate) fn protocol(msg:&str) -> Error { Error::Protocol(msg.to_owned()) }

pub(crate) fn decode(msg:&str) -> Error { Error::Decode(msg.to_owned()) }

pub(crate) fn invalid(msg:String) -> Error { Error::InvalidParameter(msg) }
