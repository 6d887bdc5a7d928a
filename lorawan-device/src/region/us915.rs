//! US915: a fixed 64+8 channel plan, no duty cycle. Implemented minimally (one 8-channel
//! sub-band) — enough to exercise every `RegionPhy` method against a plan without duty-cycle
//! back-off, the contrasting case to [`crate::region::eu868`].
use lora_modulation::{Bandwidth, CodingRate, SpreadingFactor};
use lorawan::types::ChannelMask;

use crate::radio::{BaseBandModulationParams, RfConfig, RxConfig, RxMode};
use crate::region::{
    AdrOutcome, ChannelPlanEntry, InitType, PhyAttribute, PhyValue, RegionError, RegionPhy,
    RxWindowParams, VerifyParams,
};

const NUM_CHANNELS: usize = 8;
const BASE_FREQ_HZ: u32 = 902_300_000;
const CHANNEL_STEP_HZ: u32 = 200_000;
const DR_TABLE: [(SpreadingFactor, Bandwidth); 5] = [
    (SpreadingFactor::_10, Bandwidth::_125KHz),
    (SpreadingFactor::_9, Bandwidth::_125KHz),
    (SpreadingFactor::_8, Bandwidth::_125KHz),
    (SpreadingFactor::_7, Bandwidth::_125KHz),
    (SpreadingFactor::_8, Bandwidth::_500KHz),
];
const MAX_PAYLOAD: [u16; 5] = [19, 61, 133, 250, 250];

pub struct Us915 {
    enabled: [bool; NUM_CHANNELS],
    rx2_dr: u8,
}

impl Default for Us915 {
    fn default() -> Self {
        Us915 { enabled: [true; NUM_CHANNELS], rx2_dr: 8 }
    }
}

impl Us915 {
    pub fn new() -> Self {
        Self::default()
    }

    fn bb(dr: u8) -> BaseBandModulationParams {
        let (sf, bw) = DR_TABLE[dr.min(4) as usize];
        BaseBandModulationParams::new(sf, bw, CodingRate::_4_5)
    }
}

impl RegionPhy for Us915 {
    fn get_phy_param(&self, attr: PhyAttribute) -> PhyValue {
        match attr {
            PhyAttribute::MinTxDr => PhyValue::DataRate(0),
            PhyAttribute::MaxTxDr => PhyValue::DataRate(4),
            PhyAttribute::MaxPayloadForDr(dr) => PhyValue::MaxPayload(MAX_PAYLOAD[dr.min(4) as usize]),
            PhyAttribute::DutyCycleEnabled => PhyValue::Bool(false),
            PhyAttribute::NextLowerTxDr(dr) => PhyValue::DataRate(dr.saturating_sub(1)),
        }
    }

    fn set_next_channel(
        &mut self,
        aggregated_timeoff_ms: u32,
        data_rate: u8,
        _duty_cycle_on: bool,
        _joined: bool,
        _last_aggregate_tx_ms: u64,
        _now_ms: u64,
    ) -> Option<(u8, u32, u32)> {
        let _ = data_rate;
        self.enabled.iter().position(|e| *e).map(|i| (i as u8, 0, aggregated_timeoff_ms))
    }

    fn set_band_tx_done(&mut self, _channel: u8, _now_ms: u64) {}

    fn compute_rx_win_params(
        &self,
        dr_offset: u8,
        rx1_dr_for_channel: u8,
        _min_rx_symbols: u8,
        _system_max_rx_error_ms: u32,
    ) -> RxWindowParams {
        let dr = self.apply_dr_offset(rx1_dr_for_channel, dr_offset);
        RxWindowParams {
            rx_config: RxConfig { rf: RfConfig { frequency: BASE_FREQ_HZ, bb: Self::bb(dr) }, mode: RxMode::Single { ms: 0 } },
            window_offset_ms: 0,
        }
    }

    fn tx_config(&self, channel: u8, data_rate: u8, payload_len: usize, max_eirp: i8, antenna_gain: i8) -> (RfConfig, i8, u32) {
        let freq = BASE_FREQ_HZ + channel as u32 * CHANNEL_STEP_HZ;
        let rf = RfConfig { frequency: freq, bb: Self::bb(data_rate) };
        let pw = (max_eirp - antenna_gain).min(30);
        let toa = 50 + payload_len as u32; // US915 fixed-channel radios run short, wide-bandwidth frames.
        (rf, pw, toa)
    }

    fn rx2_config(&self, _data_rate: u8) -> RxConfig {
        RxConfig { rf: RfConfig { frequency: 923_300_000, bb: Self::bb(self.rx2_dr.min(4)) }, mode: RxMode::Single { ms: 0 } }
    }

    fn apply_dr_offset(&self, data_rate: u8, dr_offset: u8) -> u8 {
        data_rate.saturating_sub(dr_offset)
    }

    fn apply_cf_list(&mut self, _cf_list: [u8; 16]) -> Result<(), RegionError> {
        // US915's CFList carries a channel-mask, not frequencies; out of scope for this
        // simplified single-sub-band model.
        Ok(())
    }

    fn get_alternate_dr(&self, nb_trials: u32) -> u8 {
        ((nb_trials.saturating_sub(1) / 2) % 4) as u8
    }

    fn get_next_adr(&self, adr_enabled: bool, current: AdrOutcome, adr_ack_limit: u32, adr_ack_delay: u32) -> AdrOutcome {
        if !adr_enabled {
            return current;
        }
        let counter = current.adr_ack_counter + 1;
        if counter <= adr_ack_limit {
            AdrOutcome { adr_ack_counter: counter, adr_ack_req: false, ..current }
        } else if counter <= adr_ack_limit + adr_ack_delay {
            AdrOutcome { adr_ack_counter: counter, adr_ack_req: true, ..current }
        } else if current.data_rate > 0 {
            AdrOutcome { data_rate: current.data_rate - 1, adr_ack_counter: counter, adr_ack_req: true, ..current }
        } else {
            AdrOutcome { adr_ack_counter: counter, adr_ack_req: true, ..current }
        }
    }

    fn calculate_backoff(&mut self, _joined: bool, _last_tx_was_join_request: bool, _tx_time_on_air_ms: u32, _aggregated_dcycle: u32) -> u32 {
        0
    }

    fn verify(&self, params: VerifyParams) -> Result<(), RegionError> {
        match params {
            VerifyParams::TxPower(p) if p > 14 => Err(RegionError::InvalidParameter),
            VerifyParams::DataRate(dr) if dr > 4 => Err(RegionError::InvalidParameter),
            VerifyParams::ChannelsNbRep(n) if n == 0 || n > 15 => Err(RegionError::InvalidParameter),
            VerifyParams::RxDataRate(dr) if dr > 13 => Err(RegionError::InvalidParameter),
            _ => Ok(()),
        }
    }

    fn set_channel_mask(&mut self, mask: ChannelMask<2>) -> Result<(), RegionError> {
        for i in 0..NUM_CHANNELS {
            self.enabled[i] = mask.is_enabled(i).map_err(|_| RegionError::InvalidChannel)?;
        }
        Ok(())
    }

    fn add_channel(&mut self, _index: u8, _entry: ChannelPlanEntry) -> Result<(), RegionError> {
        Err(RegionError::InvalidChannel)
    }

    fn remove_channel(&mut self, index: u8) -> Result<(), RegionError> {
        let idx = index as usize;
        if idx >= NUM_CHANNELS {
            return Err(RegionError::InvalidChannel);
        }
        self.enabled[idx] = false;
        Ok(())
    }

    fn load_defaults(&mut self, kind: InitType) {
        match kind {
            InitType::Init | InitType::Restore => *self = Self::default(),
        }
    }

    fn max_payload_len(&self, data_rate: u8) -> u16 {
        MAX_PAYLOAD[data_rate.min(4) as usize]
    }
}
