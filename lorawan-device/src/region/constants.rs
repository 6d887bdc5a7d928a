//! LoRaWAN 1.0.x timing and ADR constants that do not vary by region.
pub const RECEIVE_DELAY1_MS: u32 = 1000;
pub const RECEIVE_DELAY2_MS: u32 = RECEIVE_DELAY1_MS + 1000;
pub const JOIN_ACCEPT_DELAY1_MS: u32 = 5000;
pub const JOIN_ACCEPT_DELAY2_MS: u32 = 6000;
pub const MAX_FCNT_GAP: u32 = 16384;
pub const ADR_ACK_LIMIT: u32 = 64;
pub const ADR_ACK_DELAY: u32 = 32;
/// ACK_TIMEOUT is specified as a random value in `[1, 3]` seconds, applied on top of each RX2
/// deadline when awaiting a confirmed-uplink acknowledgement.
pub const ACK_TIMEOUT_MIN_MS: u32 = 1000;
pub const ACK_TIMEOUT_MAX_MS: u32 = 3000;
pub const MAX_ACK_RETRIES: u8 = 8;
