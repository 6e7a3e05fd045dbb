
// Crate-wide error type; every fallible call returns crate::Result
pub mod error;
pub use error::{Error, Result};

// External data representation, a protocol for serializing data to be sent over the network
pub mod xdr;

// Remote procedure call, a protocol build on top of XDR to provide something like C-style function calls over the network
pub mod rpc;

// A protocol using RPC that's meant to communicate with instruments like lock-in amplifiers, oscilloscopes, etc
pub mod vxi11;

// Request/response seam between the drivers and whatever bus carries their messages
pub mod instrument;

pub mod cancel;
pub mod config;
pub mod utils;

// Drivers for the lock-in amplifier and the rotation stage
pub mod devices;

// Angle sweep tying the two devices together
pub mod sweep;
