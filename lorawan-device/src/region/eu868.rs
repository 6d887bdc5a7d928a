//! EU868: a dynamic channel plan (device-managed frequency list) with mandatory duty-cycle
//! enforcement. Grounded in the teacher's `region::dynamic_channel_plans` family, simplified to
//! the fixed 3 join channels plus up to 13 network-added ones this spec exercises.
use lora_modulation::{Bandwidth, CodingRate, SpreadingFactor};
use lorawan::types::ChannelMask;

use crate::radio::{BaseBandModulationParams, RfConfig, RxConfig, RxMode};
use crate::region::{
    AdrOutcome, ChannelPlanEntry, InitType, PhyAttribute, PhyValue, RegionError, RegionPhy,
    RxWindowParams, VerifyParams,
};

const NUM_CHANNELS: usize = 16;
const JOIN_CHANNELS: [u32; 3] = [868_100_000, 868_300_000, 868_500_000];
const DR_TABLE: [(SpreadingFactor, Bandwidth); 8] = [
    (SpreadingFactor::_12, Bandwidth::_125KHz),
    (SpreadingFactor::_11, Bandwidth::_125KHz),
    (SpreadingFactor::_10, Bandwidth::_125KHz),
    (SpreadingFactor::_9, Bandwidth::_125KHz),
    (SpreadingFactor::_8, Bandwidth::_125KHz),
    (SpreadingFactor::_7, Bandwidth::_125KHz),
    (SpreadingFactor::_7, Bandwidth::_250KHz),
    (SpreadingFactor::_7, Bandwidth::_125KHz), // DR7 (FSK) approximated as SF7/125; FSK not modeled.
];
const MAX_PAYLOAD: [u16; 8] = [59, 59, 59, 123, 230, 230, 230, 230];

#[derive(Debug, Clone, Copy)]
struct Channel {
    freq: u32,
    min_dr: u8,
    max_dr: u8,
    enabled: bool,
    off_time_until_ms: u64,
}

pub struct Eu868 {
    channels: [Channel; NUM_CHANNELS],
    rx2_freq: u32,
    rx2_dr: u8,
    default_rx2_dr: u8,
    aggregated_off_until_ms: u64,
}

impl Default for Eu868 {
    fn default() -> Self {
        let mut channels = [Channel { freq: 0, min_dr: 0, max_dr: 0, enabled: false, off_time_until_ms: 0 }; NUM_CHANNELS];
        for (i, f) in JOIN_CHANNELS.iter().enumerate() {
            channels[i] = Channel { freq: *f, min_dr: 0, max_dr: 5, enabled: true, off_time_until_ms: 0 };
        }
        Eu868 { channels, rx2_freq: 869_525_000, rx2_dr: 0, default_rx2_dr: 0, aggregated_off_until_ms: 0 }
    }
}

impl Eu868 {
    pub fn new() -> Self {
        Self::default()
    }

    fn bb(dr: u8) -> BaseBandModulationParams {
        let (sf, bw) = DR_TABLE[dr.min(7) as usize];
        BaseBandModulationParams::new(sf, bw, CodingRate::_4_5)
    }
}

impl RegionPhy for Eu868 {
    fn get_phy_param(&self, attr: PhyAttribute) -> PhyValue {
        match attr {
            PhyAttribute::MinTxDr => PhyValue::DataRate(0),
            PhyAttribute::MaxTxDr => PhyValue::DataRate(5),
            PhyAttribute::MaxPayloadForDr(dr) => PhyValue::MaxPayload(MAX_PAYLOAD[dr.min(7) as usize]),
            PhyAttribute::DutyCycleEnabled => PhyValue::Bool(true),
            PhyAttribute::NextLowerTxDr(dr) => PhyValue::DataRate(dr.saturating_sub(1)),
        }
    }

    fn set_next_channel(
        &mut self,
        aggregated_timeoff_ms: u32,
        data_rate: u8,
        duty_cycle_on: bool,
        _joined: bool,
        _last_aggregate_tx_ms: u64,
        now_ms: u64,
    ) -> Option<(u8, u32, u32)> {
        if duty_cycle_on && now_ms < self.aggregated_off_until_ms {
            let remaining = (self.aggregated_off_until_ms - now_ms) as u32;
            return Some((self.last_usable_channel(data_rate)?, remaining, aggregated_timeoff_ms));
        }
        for (i, ch) in self.channels.iter().enumerate() {
            if ch.enabled && data_rate >= ch.min_dr && data_rate <= ch.max_dr && now_ms >= ch.off_time_until_ms {
                return Some((i as u8, 0, aggregated_timeoff_ms));
            }
        }
        None
    }

    fn set_band_tx_done(&mut self, channel: u8, now_ms: u64) {
        if let Some(ch) = self.channels.get_mut(channel as usize) {
            ch.off_time_until_ms = now_ms;
        }
    }

    fn compute_rx_win_params(
        &self,
        dr_offset: u8,
        rx1_dr_for_channel: u8,
        _min_rx_symbols: u8,
        _system_max_rx_error_ms: u32,
    ) -> RxWindowParams {
        let dr = self.apply_dr_offset(rx1_dr_for_channel, dr_offset);
        RxWindowParams {
            rx_config: RxConfig {
                rf: RfConfig { frequency: JOIN_CHANNELS[0], bb: Self::bb(dr) },
                mode: RxMode::Single { ms: 0 },
            },
            window_offset_ms: 0,
        }
    }

    fn tx_config(&self, channel: u8, data_rate: u8, payload_len: usize, max_eirp: i8, antenna_gain: i8) -> (RfConfig, i8, u32) {
        let freq = self.channels.get(channel as usize).map(|c| c.freq).unwrap_or(JOIN_CHANNELS[0]);
        let rf = RfConfig { frequency: freq, bb: Self::bb(data_rate) };
        let pw = (max_eirp - antenna_gain).min(16);
        let toa = estimate_time_on_air_ms(data_rate, payload_len);
        (rf, pw, toa)
    }

    fn rx2_config(&self, _data_rate: u8) -> RxConfig {
        RxConfig { rf: RfConfig { frequency: self.rx2_freq, bb: Self::bb(self.rx2_dr) }, mode: RxMode::Single { ms: 0 } }
    }

    fn apply_dr_offset(&self, data_rate: u8, dr_offset: u8) -> u8 {
        data_rate.saturating_sub(dr_offset)
    }

    fn apply_cf_list(&mut self, cf_list: [u8; 16]) -> Result<(), RegionError> {
        for i in 0..5 {
            let start = i * 3;
            let raw = u32::from_le_bytes([cf_list[start], cf_list[start + 1], cf_list[start + 2], 0]);
            if raw == 0 {
                continue;
            }
            let freq = raw * 100;
            let idx = 3 + i;
            if idx >= NUM_CHANNELS {
                break;
            }
            self.channels[idx] = Channel { freq, min_dr: 0, max_dr: 5, enabled: true, off_time_until_ms: 0 };
        }
        Ok(())
    }

    fn get_alternate_dr(&self, nb_trials: u32) -> u8 {
        // Join ladder: DR0, DR0, DR0, DR1, DR1, DR1, DR2, ... cycling every 3 joins per channel
        // rotation, as used by the EU868 join duty-cycle backoff table.
        ((nb_trials.saturating_sub(1) / 3) % 6) as u8
    }

    fn get_next_adr(&self, adr_enabled: bool, current: AdrOutcome, adr_ack_limit: u32, adr_ack_delay: u32) -> AdrOutcome {
        if !adr_enabled {
            return current;
        }
        let counter = current.adr_ack_counter + 1;
        if counter <= adr_ack_limit {
            return AdrOutcome { adr_ack_counter: counter, adr_ack_req: false, ..current };
        }
        if counter <= adr_ack_limit + adr_ack_delay {
            return AdrOutcome { adr_ack_counter: counter, adr_ack_req: true, ..current };
        }
        // Past the grace window: step datarate down first, then TX power, per LoRaWAN ADR.
        if current.data_rate > 0 {
            AdrOutcome { data_rate: current.data_rate - 1, adr_ack_counter: counter, adr_ack_req: true, ..current }
        } else if current.tx_power < 5 {
            AdrOutcome { tx_power: current.tx_power + 1, adr_ack_counter: counter, adr_ack_req: true, ..current }
        } else {
            AdrOutcome { adr_ack_counter: counter, adr_ack_req: true, ..current }
        }
    }

    fn calculate_backoff(&mut self, _joined: bool, _last_tx_was_join_request: bool, tx_time_on_air_ms: u32, aggregated_dcycle: u32) -> u32 {
        if aggregated_dcycle <= 1 {
            return 0;
        }
        let extra = tx_time_on_air_ms as u64 * (aggregated_dcycle as u64 - 1);
        self.aggregated_off_until_ms += extra;
        extra as u32
    }

    fn verify(&self, params: VerifyParams) -> Result<(), RegionError> {
        match params {
            VerifyParams::TxPower(p) if p > 7 => Err(RegionError::InvalidParameter),
            VerifyParams::DataRate(dr) if dr > 7 => Err(RegionError::InvalidParameter),
            VerifyParams::ChannelsNbRep(n) if n == 0 || n > 15 => Err(RegionError::InvalidParameter),
            VerifyParams::RxDataRate(dr) if dr > 7 => Err(RegionError::InvalidParameter),
            _ => Ok(()),
        }
    }

    fn set_channel_mask(&mut self, mask: ChannelMask<2>) -> Result<(), RegionError> {
        for i in 0..NUM_CHANNELS {
            let enabled = mask.is_enabled(i).map_err(|_| RegionError::InvalidChannel)?;
            if self.channels[i].freq != 0 {
                self.channels[i].enabled = enabled;
            }
        }
        Ok(())
    }

    fn add_channel(&mut self, index: u8, entry: ChannelPlanEntry) -> Result<(), RegionError> {
        let idx = index as usize;
        if idx >= NUM_CHANNELS {
            return Err(RegionError::InvalidChannel);
        }
        self.channels[idx] = Channel { freq: entry.freq, min_dr: entry.min_dr, max_dr: entry.max_dr, enabled: true, off_time_until_ms: 0 };
        Ok(())
    }

    fn remove_channel(&mut self, index: u8) -> Result<(), RegionError> {
        let idx = index as usize;
        if idx < 3 || idx >= NUM_CHANNELS {
            // The three join channels are mandatory and cannot be removed.
            return Err(RegionError::InvalidChannel);
        }
        self.channels[idx] = Channel { freq: 0, min_dr: 0, max_dr: 0, enabled: false, off_time_until_ms: 0 };
        Ok(())
    }

    fn load_defaults(&mut self, kind: InitType) {
        match kind {
            InitType::Init => *self = Self::default(),
            InitType::Restore => {
                for ch in self.channels.iter_mut().skip(3) {
                    *ch = Channel { freq: 0, min_dr: 0, max_dr: 0, enabled: false, off_time_until_ms: 0 };
                }
                self.rx2_dr = self.default_rx2_dr;
            }
        }
    }

    fn max_payload_len(&self, data_rate: u8) -> u16 {
        MAX_PAYLOAD[data_rate.min(7) as usize]
    }
}

impl Eu868 {
    fn last_usable_channel(&self, data_rate: u8) -> Option<u8> {
        self.channels
            .iter()
            .position(|c| c.enabled && data_rate >= c.min_dr && data_rate <= c.max_dr)
            .map(|i| i as u8)
    }
}

/// A coarse time-on-air estimate (symbols-based, ignoring low-datarate-optimization and explicit
/// header toggles) — enough for duty-cycle accounting, not a certified radio timing source.
fn estimate_time_on_air_ms(data_rate: u8, payload_len: usize) -> u32 {
    let (sf, bw) = DR_TABLE[data_rate.min(7) as usize];
    let sf_n = match sf {
        SpreadingFactor::_7 => 7,
        SpreadingFactor::_8 => 8,
        SpreadingFactor::_9 => 9,
        SpreadingFactor::_10 => 10,
        SpreadingFactor::_11 => 11,
        SpreadingFactor::_12 => 12,
        _ => 12,
    };
    let bw_hz: u32 = match bw {
        Bandwidth::_125KHz => 125_000,
        Bandwidth::_250KHz => 250_000,
        Bandwidth::_500KHz => 500_000,
        _ => 125_000,
    };
    let t_sym_us = (1u64 << sf_n) * 1_000_000 / bw_hz as u64;
    let n_payload = 8 + core::cmp::max(((8 * payload_len as i64 - 4 * sf_n as i64 + 28) as f64 / (4 * sf_n) as f64).ceil() as i64 * 1, 0);
    let t_packet_us = (n_payload as u64 + 12) * t_sym_us;
    (t_packet_us / 1000) as u32
}
