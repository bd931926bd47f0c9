pub mod bet;
pub mod frame;

/// Per-batch acknowledgment bytes sent back to the agency.
pub const ACK: u8 = 0x00;
pub const NACK: u8 = 0x01;
