//! The regional band plugin contract (spec's `RegionPhy`).
//!
//! Per-region channel plans, SF/BW/payload tables and duty-cycle classes are out of scope for
//! this crate's protocol engine; only the interface `MacCore` calls against lives here, plus two
//! concrete implementations (EU868's dynamic channel plan with duty-cycle, US915's fixed channel
//! plan without) enough to exercise every method of the contract.
pub mod constants;

#[cfg(feature = "region-eu868")]
pub mod eu868;
#[cfg(feature = "region-us915")]
pub mod us915;

use lorawan::types::ChannelMask;

use crate::radio::{RfConfig, RxConfig};

/// A single extra channel carried in a Join-Accept `CFList` or added via `NewChannelReq`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelPlanEntry {
    pub freq: u32,
    pub min_dr: u8,
    pub max_dr: u8,
}

/// MIB-style physical attributes a region can be asked to report (spec's `get_phy_params`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhyAttribute {
    MinTxDr,
    MaxTxDr,
    MaxPayloadForDr(u8),
    DutyCycleEnabled,
    NextLowerTxDr(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhyValue {
    DataRate(u8),
    MaxPayload(u16),
    Bool(bool),
}

/// A datarate/power candidate returned by ADR back-off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdrOutcome {
    pub data_rate: u8,
    pub tx_power: u8,
    pub adr_ack_counter: u32,
    pub adr_ack_req: bool,
}

/// The outcome of `compute_rx_win_params`: the RX configuration plus a timing offset the MAC
/// engine folds into the window delay to center the radio's symbol timeout on the expected
/// downlink preamble.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RxWindowParams {
    pub rx_config: RxConfig,
    pub window_offset_ms: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyParams {
    TxPower(u8),
    DataRate(u8),
    ChannelsNbRep(u8),
    RxDataRate(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitType {
    Init,
    Restore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionError {
    InvalidChannel,
    InvalidParameter,
    NoChannelFound,
}

/// The interface contract `MacCore` drives a regional band plugin through. Every method mirrors
/// one named in spec section 6 ("Toward RegionPhy").
pub trait RegionPhy {
    fn get_phy_param(&self, attr: PhyAttribute) -> PhyValue;

    /// Selects a transmit channel honoring per-channel and aggregated duty-cycle off-time.
    /// Returns `(channel, duty_cycle_timeoff_ms, updated_aggregated_timeoff_ms)`, or `None` if no
    /// channel is currently usable at `data_rate` and the caller should retry at a lower one.
    fn set_next_channel(
        &mut self,
        aggregated_timeoff_ms: u32,
        data_rate: u8,
        duty_cycle_on: bool,
        joined: bool,
        last_aggregate_tx_ms: u64,
        now_ms: u64,
    ) -> Option<(u8, u32, u32)>;

    /// Records a completed TX on `channel`, extending that channel's own off-time window.
    fn set_band_tx_done(&mut self, channel: u8, now_ms: u64);

    fn compute_rx_win_params(&self, dr_offset: u8, rx1_dr_for_channel: u8, min_rx_symbols: u8, system_max_rx_error_ms: u32) -> RxWindowParams;

    /// Returns the TX RF configuration for `channel` at `data_rate`, and the on-air time the
    /// frame of `payload_len` bytes will take (needed to update duty-cycle accounting).
    fn tx_config(&self, channel: u8, data_rate: u8, payload_len: usize, max_eirp: i8, antenna_gain: i8) -> (RfConfig, i8, u32);

    fn rx2_config(&self, data_rate: u8) -> RxConfig;

    fn apply_dr_offset(&self, data_rate: u8, dr_offset: u8) -> u8;

    fn apply_cf_list(&mut self, cf_list: [u8; 16]) -> Result<(), RegionError>;

    /// Chooses a datarate for join-retry attempt `nb_trials` (1-based), cycling the region's
    /// join datarate ladder.
    fn get_alternate_dr(&self, nb_trials: u32) -> u8;

    fn get_next_adr(&self, adr_enabled: bool, current: AdrOutcome, adr_ack_limit: u32, adr_ack_delay: u32) -> AdrOutcome;

    fn calculate_backoff(&mut self, joined: bool, last_tx_was_join_request: bool, tx_time_on_air_ms: u32, aggregated_dcycle: u32) -> u32;

    fn verify(&self, params: VerifyParams) -> Result<(), RegionError>;

    fn set_channel_mask(&mut self, mask: ChannelMask<2>) -> Result<(), RegionError>;

    fn add_channel(&mut self, index: u8, entry: ChannelPlanEntry) -> Result<(), RegionError>;

    fn remove_channel(&mut self, index: u8) -> Result<(), RegionError>;

    fn load_defaults(&mut self, kind: InitType);

    fn max_payload_len(&self, data_rate: u8) -> u16;
}
