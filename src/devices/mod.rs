
// Stanford Research Systems lock-in amplifier, reached over VXI-11
pub mod sr865a;

// Thorlabs K-Cube DC servo driving the rotation stage
pub mod kdc101;
