//! The MAC state machine (spec component "MacCore") — request admission, TX scheduling, the
//! RX1/RX2 window driver, downlink frame processing, the confirmed-uplink retry ladder and ADR.
//! Structured after the teacher's `mac::Mac`, generalized from its fixed two-state
//! (`Otaa`/`Joined`) model to the full convergence procedure described in spec §4.4.
pub mod commands;
pub mod otaa;
pub mod session;
pub mod types;

#[cfg(feature = "multicast")]
pub mod multicast;

use lorawan::frame::JOIN_REQUEST_LEN;
use lorawan::keys::CryptoFactory;
use rand_core::RngCore;

use crate::duty_cycle::DutyCycleEngine;
use crate::mac::commands::MacCommandBuffer;
use crate::mac::otaa::{NetworkCredentials, Otaa};
use crate::mac::session::Session;
use crate::mac::types::*;
use crate::radio::{RadioBuffer, RxConfig, TxConfig};
use crate::region::{self, AdrOutcome, RegionPhy};

const MAC_STATE_CHECK_TIMEOUT_MS: u32 = 1000;
const RADIO_BUFFER_LEN: usize = 256;

enum SessionState {
    Unjoined,
    Joining(Otaa),
    Joined(Session),
}

/// What the caller must do next, returned from every `Mac` entry point. The dispatcher
/// (spec's single-consumer queue) is the only thing that acts on these.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Action {
    /// Nothing to do right now; wait for the next event.
    None,
    /// Transmit `len` bytes of `buffer` with the given radio configuration.
    Tx { len: usize, config: TxConfig },
    /// Arm a one-shot timer to fire `delay_ms` from now with `tag`.
    ArmTimer { delay_ms: u32, tag: TimerTag },
    /// Configure the radio for receive per `config` and start listening.
    Rx(RxConfig),
    /// Put the radio in its resting state (standby for Class A, continuous RX2 for Class C).
    Idle,
    /// `MlmeRequest(TxCW | TxCW1)`: hold an unmodulated carrier for `timeout_s` seconds, at
    /// `rf_override` if the request pinned a specific frequency/power (`TxCW1`), otherwise at the
    /// region's current channel/max power (`TxCW`).
    TxContinuousWave { timeout_s: u16, rf_override: Option<(u32, i8)> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerTag {
    TxDelayed,
    RxWindow1,
    RxWindow2,
    AckTimeout,
    MacStateCheck,
}

/// The outcome surfaced to the application once a request's lifecycle settles.
#[derive(Default)]
pub struct Outcome {
    pub mcps_confirm: Option<McpsConfirm>,
    pub mlme_confirm: Option<MlmeConfirm>,
    pub mlme_indication: Option<MlmeIndication>,
}

impl Outcome {
    /// Folds `other` into `self`, keeping whichever side already set a given field. Used by the
    /// dispatcher to combine the `Outcome` `handle_rx_done` returns with the one the immediately
    /// following state-check convergence produces (spec ordering guarantee (b): "Confirm and any
    /// Indication are delivered after MacDone settles").
    pub fn merge(mut self, other: Outcome) -> Outcome {
        self.mcps_confirm = self.mcps_confirm.or(other.mcps_confirm);
        self.mlme_confirm = self.mlme_confirm.or(other.mlme_confirm);
        self.mlme_indication = self.mlme_indication.or(other.mlme_indication);
        self
    }
}

/// The Class-A/C MAC engine. Generic over the crypto primitive factory, the regional band plugin
/// and the application's chosen downlink payload capacity.
pub struct Mac<C: CryptoFactory, R: RegionPhy, const N: usize = 256> {
    factory: C,
    region: R,
    class: DeviceClass,
    session: SessionState,
    params: MacParams,
    flags: MacStateFlags,
    cmd_buf: MacCommandBuffer,
    duty_cycle: DutyCycleEngine,

    data_rate: u8,
    tx_power: u8,
    adr_ack_counter: u32,

    last_tx_channel: u8,
    last_tx_was_join: bool,
    last_tx_done_ms: u64,
    power_on_ms: u64,

    rx1_delay_ms: u32,
    rx2_delay_ms: u32,

    ack_timeout_retries: u8,
    ack_timeout_retries_counter: u8,
    join_request_trials: u32,

    pending_confirmed: bool,
    pending_ind: Option<McpsIndication<N>>,
    node_ack_requested: bool,
    ack_received: bool,
    /// Reported in `DevStatusAns`; `255` (unknown) until the integrator calls
    /// [`Mac::set_battery_level`] with a real reading (spec §3 "AppCallbacks").
    battery_level: u8,

    #[cfg(feature = "multicast")]
    multicast: multicast::MulticastTable,

    #[cfg(feature = "test-hooks")]
    test_duty_cycle_suspended: bool,
    #[cfg(feature = "test-hooks")]
    test_mic_error: bool,
    #[cfg(feature = "test-hooks")]
    test_rx_windows_on: bool,
    #[cfg(feature = "test-hooks")]
    test_channel_override: Option<u8>,

    radio_buffer: RadioBuffer<RADIO_BUFFER_LEN>,
}

impl<C: CryptoFactory, R: RegionPhy, const N: usize> Mac<C, R, N> {
    pub fn new(factory: C, region: R, power_on_ms: u64) -> Self {
        Mac {
            factory,
            region,
            class: DeviceClass::A,
            session: SessionState::Unjoined,
            params: MacParams::default(),
            flags: MacStateFlags::default(),
            cmd_buf: MacCommandBuffer::new(),
            duty_cycle: DutyCycleEngine::new(),
            data_rate: 0,
            tx_power: 0,
            adr_ack_counter: 0,
            last_tx_channel: 0,
            last_tx_was_join: false,
            last_tx_done_ms: 0,
            power_on_ms,
            rx1_delay_ms: region::constants::RECEIVE_DELAY1_MS,
            rx2_delay_ms: region::constants::RECEIVE_DELAY2_MS,
            ack_timeout_retries: 1,
            ack_timeout_retries_counter: 0,
            join_request_trials: 0,
            pending_confirmed: false,
            pending_ind: None,
            node_ack_requested: false,
            ack_received: false,
            battery_level: 255,
            #[cfg(feature = "multicast")]
            multicast: multicast::MulticastTable::new(),
            #[cfg(feature = "test-hooks")]
            test_duty_cycle_suspended: false,
            #[cfg(feature = "test-hooks")]
            test_mic_error: false,
            #[cfg(feature = "test-hooks")]
            test_rx_windows_on: true,
            #[cfg(feature = "test-hooks")]
            test_channel_override: None,
            radio_buffer: RadioBuffer::new(),
        }
    }

    pub fn is_joined(&self) -> bool {
        matches!(self.session, SessionState::Joined(_))
    }

    /// `LoRaMacMulticastChannelLink`/`Unlink`: idle-only, per spec §3/§9.
    #[cfg(feature = "multicast")]
    pub fn multicast_link(&mut self, group: MulticastGroup) -> Result<(), Status> {
        if !self.flags.is_idle() {
            return Err(Status::Busy);
        }
        self.multicast.link(group).map_err(|_| Status::ParameterInvalid)
    }

    #[cfg(feature = "multicast")]
    pub fn multicast_unlink(&mut self, dev_addr: lorawan::types::DevAddr) -> Result<(), Status> {
        if !self.flags.is_idle() {
            return Err(Status::Busy);
        }
        self.multicast.unlink(dev_addr).map_err(|_| Status::ParameterInvalid)
    }

    pub fn set_class(&mut self, class: DeviceClass) {
        self.class = class;
    }

    pub fn set_datarate(&mut self, dr: u8) {
        self.data_rate = dr;
    }

    pub fn set_battery_level(&mut self, level: u8) {
        self.battery_level = level;
    }

    /// Compliance-test hook (`TestSetDutyCycleOn`): suspends aggregated/per-channel duty-cycle
    /// enforcement in `schedule_tx` while `false`, so a certification harness can drive the DUT
    /// outside the regulatory limits it would otherwise self-enforce.
    #[cfg(feature = "test-hooks")]
    pub fn test_set_duty_cycle_on(&mut self, on: bool) {
        self.test_duty_cycle_suspended = !on;
    }

    /// Compliance-test hook (`TestSetMic`): corrupts the MIC of the next built uplink frame so a
    /// harness can exercise the network server's MIC-rejection path.
    #[cfg(feature = "test-hooks")]
    pub fn test_set_mic_error(&mut self, corrupt: bool) {
        self.test_mic_error = corrupt;
    }

    /// Compliance-test hook (`TestRxWindowsOn`): with `false`, `handle_tx_done` skips arming
    /// RX1/RX2 entirely, probing the "RX windows disabled" TX-done branch (spec §4.4.3).
    #[cfg(feature = "test-hooks")]
    pub fn test_rx_windows_on(&mut self, on: bool) {
        self.test_rx_windows_on = on;
    }

    /// Compliance-test hook (`TestSetChannel`): pins `schedule_tx` to `channel` instead of letting
    /// [`RegionPhy::set_next_channel`] pick one. `None` returns to normal channel selection.
    #[cfg(feature = "test-hooks")]
    pub fn test_set_channel(&mut self, channel: Option<u8>) {
        self.test_channel_override = channel;
    }

    /// `MlmeRequest(LinkCheck | TxCW | TxCW1)`. `Join` has its own entry point, [`Mac::mlme_join`],
    /// since it additionally needs network credentials and an RNG.
    pub fn mlme_request(&mut self, req: MlmeRequestKind) -> Result<Action, Status> {
        match req {
            MlmeRequestKind::Join { .. } => Err(Status::ParameterInvalid),
            MlmeRequestKind::LinkCheck => {
                if !self.flags.is_idle() {
                    return Err(Status::Busy);
                }
                // No dedicated uplink opportunity exists in Class A outside of an application
                // send; LinkCheckReq rides the next uplink's FOpts like any other MAC command
                // (spec §4.3 supplement).
                self.cmd_buf
                    .push_next_tx(lorawan::maccommands::UplinkMacCommand::LinkCheckReq)
                    .map_err(|_| Status::ParameterInvalid)?;
                Ok(Action::None)
            }
            MlmeRequestKind::TxCw { timeout_s } => {
                if !self.flags.is_idle() {
                    return Err(Status::Busy);
                }
                Ok(Action::TxContinuousWave { timeout_s, rf_override: None })
            }
            MlmeRequestKind::TxCw1 { timeout_s, frequency, power } => {
                if !self.flags.is_idle() {
                    return Err(Status::Busy);
                }
                Ok(Action::TxContinuousWave { timeout_s, rf_override: Some((frequency, power)) })
            }
        }
    }

    /// `LoRaMacQueryTxPossible`, spec §6. Drops pending MAC commands (never the application
    /// payload) when they would not fit alongside `size` bytes at the current datarate.
    pub fn query_tx_possible(&mut self, size: usize) -> TxInfo {
        let max_payload = self.region.max_payload_len(self.data_rate) as usize;
        let fopts_len = self.cmd_buf.len();
        if fopts_len > 0 && size + fopts_len > max_payload {
            self.cmd_buf.clear_command_buffer();
        }
        TxInfo { current_payload_size: size, max_possible_payload: max_payload.saturating_sub(self.cmd_buf.len()) }
    }

    /// `LoRaMacChannelAdd`.
    pub fn channel_add(&mut self, index: u8, entry: region::ChannelPlanEntry) -> Result<(), Status> {
        self.region.add_channel(index, entry).map_err(|_| Status::ParameterInvalid)
    }

    /// `LoRaMacChannelRemove`.
    pub fn channel_remove(&mut self, index: u8) -> Result<(), Status> {
        self.region.remove_channel(index).map_err(|_| Status::ParameterInvalid)
    }

    /// `LoRaMacMibGetRequestConfirm`.
    pub fn mib_get(&self, attr: MibAttribute) -> Result<MibValue, Status> {
        Ok(match attr {
            MibAttribute::DeviceClass => MibValue::DeviceClass(self.class),
            MibAttribute::NetworkJoined => MibValue::Bool(self.is_joined()),
            MibAttribute::Adr => MibValue::Bool(self.params.adr_enabled),
            MibAttribute::NetId => match &self.session {
                SessionState::Joined(_) => MibValue::NetId(0),
                _ => return Err(Status::ServiceUnknown),
            },
            MibAttribute::DevAddr => match &self.session {
                SessionState::Joined(s) => MibValue::DevAddr(s.dev_addr),
                _ => return Err(Status::ServiceUnknown),
            },
            MibAttribute::ChannelsNbRep => MibValue::U8(self.params.channels_nb_rep),
            MibAttribute::MaxDCycle => MibValue::U8(self.params.max_d_cycle),
            MibAttribute::MaxRxWindow => MibValue::U32(self.params.max_rx_window_ms),
            MibAttribute::ReceiveDelay1 => MibValue::U32(self.rx1_delay_ms),
            MibAttribute::ReceiveDelay2 => MibValue::U32(self.rx2_delay_ms),
            MibAttribute::JoinAcceptDelay1 => MibValue::U32(region::constants::JOIN_ACCEPT_DELAY1_MS),
            MibAttribute::JoinAcceptDelay2 => MibValue::U32(region::constants::JOIN_ACCEPT_DELAY2_MS),
            MibAttribute::SystemMaxRxError => MibValue::U32(self.params.system_max_rx_error_ms),
            MibAttribute::MinRxSymbols => MibValue::U8(self.params.min_rx_symbols),
            MibAttribute::AntennaGain => MibValue::I8(self.params.antenna_gain),
            MibAttribute::MaxEirp => MibValue::I8(self.params.max_eirp),
            MibAttribute::UplinkCounter => match &self.session {
                SessionState::Joined(s) => MibValue::U32(s.fcnt_up),
                _ => return Err(Status::ServiceUnknown),
            },
            MibAttribute::DownLinkCounter => match &self.session {
                SessionState::Joined(s) => MibValue::U32(s.fcnt_down),
                _ => return Err(Status::ServiceUnknown),
            },
        })
    }

    /// `LoRaMacMibSetRequestConfirm`. Setting `DeviceClass::C` while joined immediately opens
    /// continuous RX2 rather than waiting for the next idle convergence (spec §6).
    pub fn mib_set(&mut self, attr: MibAttribute, value: MibValue) -> Result<Option<Action>, Status> {
        match (attr, value) {
            (MibAttribute::DeviceClass, MibValue::DeviceClass(class)) => {
                self.class = class;
                if matches!(class, DeviceClass::C) && self.is_joined() {
                    return Ok(Some(self.open_continuous_rx2()));
                }
            }
            (MibAttribute::Adr, MibValue::Bool(adr)) => self.params.adr_enabled = adr,
            (MibAttribute::ChannelsNbRep, MibValue::U8(n)) => self.params.channels_nb_rep = n.clamp(1, 15),
            (MibAttribute::MaxDCycle, MibValue::U8(n)) => self.params.max_d_cycle = n,
            (MibAttribute::SystemMaxRxError, MibValue::U32(ms)) => self.params.system_max_rx_error_ms = ms,
            (MibAttribute::MinRxSymbols, MibValue::U8(n)) => self.params.min_rx_symbols = n,
            (MibAttribute::AntennaGain, MibValue::I8(gain)) => self.params.antenna_gain = gain,
            (MibAttribute::MaxEirp, MibValue::I8(eirp)) => self.params.max_eirp = eirp,
            (MibAttribute::MaxRxWindow, MibValue::U32(ms)) => self.params.max_rx_window_ms = ms,
            _ => return Err(Status::ParameterInvalid),
        }
        Ok(None)
    }

    // ---- 4.4.1 Request admission ----------------------------------------------------------

    pub fn mlme_join<RNG: RngCore>(
        &mut self,
        credentials: NetworkCredentials,
        nb_trials: u32,
        rng: &mut RNG,
        now_ms: u64,
    ) -> Result<Action, Status> {
        if !self.flags.is_idle() {
            return Err(Status::Busy);
        }
        self.reset_session_state();
        self.join_request_trials = 0;
        self.data_rate = self.region.get_alternate_dr(nb_trials);
        let mut otaa = Otaa::new(credentials);
        let mut buf = [0u8; JOIN_REQUEST_LEN];
        otaa.prepare_buffer(&self.factory, rng, &mut buf).map_err(|_| Status::CryptoFail)?;
        self.radio_buffer.clear();
        let _ = self.radio_buffer.extend_from_slice(&buf);
        self.session = SessionState::Joining(otaa);
        self.last_tx_was_join = true;
        self.ack_timeout_retries = nb_trials.min(u8::MAX as u32) as u8;
        self.ack_timeout_retries_counter = 0;
        self.schedule_tx(now_ms)
    }

    pub fn mcps_request(&mut self, req: McpsRequest, now_ms: u64) -> Result<Action, Status> {
        if !self.flags.is_idle() {
            return Err(Status::Busy);
        }
        let session = match &self.session {
            SessionState::Joined(s) => s.clone(),
            _ => return Err(Status::NoNetworkJoined),
        };

        self.ack_timeout_retries = match req.kind {
            McpsRequestKind::Confirmed { nb_trials } => nb_trials.max(1),
            _ => 1,
        };
        self.ack_timeout_retries_counter = 0;
        self.node_ack_requested = matches!(req.kind, McpsRequestKind::Confirmed { .. });
        self.ack_received = false;

        if let Some(dr) = req.data_rate {
            if !self.params.adr_enabled {
                self.region.verify(region::VerifyParams::DataRate(dr)).map_err(|_| Status::ParameterInvalid)?;
                self.data_rate = dr;
            } else {
                return Err(Status::ParameterInvalid);
            }
        }

        self.cmd_buf.prepare_for_tx();
        let fopts_fits = self.cmd_buf.len() <= commands::FOPTS_MAX_LEN && !req.data.is_empty();
        let (fopts, fport, payload): (&[u8], Option<u8>, &[u8]) = if fopts_fits || req.data.is_empty() {
            (self.cmd_buf.current(), Some(req.fport), req.data)
        } else {
            (&[], Some(lorawan::frame::MAC_COMMAND_FPORT), self.cmd_buf.current())
        };

        let confirmed = matches!(req.kind, McpsRequestKind::Confirmed { .. });
        let adr_outcome = self.run_adr();
        let mut buf = [0u8; RADIO_BUFFER_LEN];
        let n = session
            .prepare_buffer(&self.factory, confirmed, self.params.adr_enabled, adr_outcome.adr_ack_req, fopts, fport, payload, &mut buf)
            .map_err(|_| Status::LengthError)?;
        #[cfg(feature = "test-hooks")]
        if self.test_mic_error && n >= 4 {
            buf[n - 1] ^= 0xFF;
        }
        self.radio_buffer.clear();
        let _ = self.radio_buffer.extend_from_slice(&buf[..n]);
        self.last_tx_was_join = false;
        self.pending_confirmed = confirmed;
        self.schedule_tx(now_ms)
    }

    fn reset_session_state(&mut self) {
        self.params = MacParams::default();
        self.cmd_buf = MacCommandBuffer::new();
        self.adr_ack_counter = 0;
        self.region.load_defaults(region::InitType::Init);
        self.duty_cycle = DutyCycleEngine::new();
    }

    /// A region's own duty-cycle regulation (EU868's mandatory sub-G ISM limit) always applies;
    /// `params.max_d_cycle` additionally lets the network tighten it further via `DutyCycleReq`.
    fn region_duty_cycle_mandatory(&self) -> bool {
        matches!(self.region.get_phy_param(region::PhyAttribute::DutyCycleEnabled), region::PhyValue::Bool(true))
    }

    #[cfg(feature = "test-hooks")]
    fn duty_cycle_enforced(&self) -> bool {
        (self.region_duty_cycle_mandatory() || self.params.max_d_cycle != 0) && !self.test_duty_cycle_suspended
    }
    #[cfg(not(feature = "test-hooks"))]
    fn duty_cycle_enforced(&self) -> bool {
        self.region_duty_cycle_mandatory() || self.params.max_d_cycle != 0
    }

    #[cfg(feature = "test-hooks")]
    fn test_channel_override(&self) -> Option<u8> {
        self.test_channel_override
    }
    #[cfg(not(feature = "test-hooks"))]
    fn test_channel_override(&self) -> Option<u8> {
        None
    }

    #[cfg(feature = "test-hooks")]
    fn rx_windows_enabled(&self) -> bool {
        self.test_rx_windows_on
    }
    #[cfg(not(feature = "test-hooks"))]
    fn rx_windows_enabled(&self) -> bool {
        true
    }

    // ---- 4.4.2 Transmit scheduling ---------------------------------------------------------

    fn schedule_tx(&mut self, now_ms: u64) -> Result<Action, Status> {
        if self.params.max_d_cycle == 255 {
            return Err(Status::DeviceOff);
        }

        let aggregated_dcycle = self.duty_cycle.aggregated_dcycle(now_ms.saturating_sub(self.power_on_ms));
        let aggregated_timeoff = self.duty_cycle.time_off_remaining_ms();
        let mut data_rate = self.data_rate;
        let (channel, duty_cycle_timeoff, _updated) = if let Some(ch) = self.test_channel_override() {
            (ch, 0u32, false)
        } else {
            loop {
                match self.region.set_next_channel(
                    aggregated_timeoff,
                    data_rate,
                    self.duty_cycle_enforced(),
                    self.is_joined(),
                    self.last_tx_done_ms,
                    now_ms,
                ) {
                    Some(v) => break v,
                    None => {
                        if data_rate == 0 {
                            return Err(Status::ParameterInvalid);
                        }
                        data_rate -= 1;
                    }
                }
            }
        };
        self.data_rate = data_rate;
        self.last_tx_channel = channel;

        let rx1 = self.region.compute_rx_win_params(
            self.params.rx1_dr_offset,
            self.data_rate,
            self.params.min_rx_symbols,
            self.params.system_max_rx_error_ms,
        );
        let base_rx1_delay_ms = if self.is_joined() {
            region::constants::RECEIVE_DELAY1_MS
        } else {
            region::constants::JOIN_ACCEPT_DELAY1_MS
        };
        self.rx1_delay_ms = (base_rx1_delay_ms as i64 + rx1.window_offset_ms as i64).max(0) as u32;
        self.rx2_delay_ms = if self.is_joined() {
            region::constants::RECEIVE_DELAY2_MS
        } else {
            region::constants::JOIN_ACCEPT_DELAY2_MS
        };

        if self.is_joined() {
            let max_payload = self.region.max_payload_len(self.data_rate) as usize;
            if self.radio_buffer.len() > max_payload {
                return Err(Status::LengthError);
            }
        }

        if duty_cycle_timeoff == 0 {
            Ok(self.send_frame_on_channel(channel, now_ms))
        } else {
            self.flags.set(MacStateFlags::TX_DELAYED);
            Ok(Action::ArmTimer { delay_ms: duty_cycle_timeoff, tag: TimerTag::TxDelayed })
        }
    }

    /// `TxDelayed` timer firing: duty-cycle or confirmed-retry backoff has elapsed, retry
    /// scheduling the pending frame.
    pub fn handle_tx_delayed(&mut self, now_ms: u64) -> Action {
        self.flags.clear(MacStateFlags::TX_DELAYED);
        match self.schedule_tx(now_ms) {
            Ok(action) => action,
            Err(_) => Action::None,
        }
    }

    fn send_frame_on_channel(&mut self, channel: u8, now_ms: u64) -> Action {
        let (rf, pw, toa_ms) =
            self.region.tx_config(channel, self.data_rate, self.radio_buffer.len(), self.params.max_eirp, self.params.antenna_gain);
        let mut tx = TxConfig { pw, rf };
        tx.adjust_power(self.params.max_eirp as u8, self.params.antenna_gain);

        let aggregated_dcycle = self.duty_cycle.aggregated_dcycle(now_ms.saturating_sub(self.power_on_ms));
        let _band_backoff_ms =
            self.region.calculate_backoff(self.is_joined(), self.last_tx_was_join, toa_ms, aggregated_dcycle);
        self.duty_cycle.record_tx(toa_ms, aggregated_dcycle);

        self.last_tx_done_ms = now_ms;
        self.region.set_band_tx_done(channel, now_ms);
        if self.last_tx_was_join {
            self.join_request_trials += 1;
        }
        self.flags.set(MacStateFlags::TX_RUNNING);
        Action::Tx { len: self.radio_buffer.len(), config: tx }
    }

    pub fn radio_buffer(&self) -> &[u8] {
        self.radio_buffer.as_ref_for_read()
    }

    // ---- 4.4.3 TX-done path -----------------------------------------------------------------

    pub fn handle_tx_done(&mut self, now_ms: u64) -> Action {
        self.last_tx_done_ms = now_ms;
        if !self.node_ack_requested {
            self.params.channels_nb_rep_counter += 1;
        }
        if !self.rx_windows_enabled() {
            self.flags.clear(MacStateFlags::TX_RUNNING);
            return Action::None;
        }
        if matches!(self.class, DeviceClass::C) {
            return self.open_continuous_rx2();
        }
        Action::ArmTimer { delay_ms: self.rx1_delay_ms, tag: TimerTag::RxWindow1 }
    }

    // ---- 4.4.4 RX-window path ---------------------------------------------------------------

    pub fn handle_rx_window1(&mut self) -> (Action, Action) {
        let rx1 = self.region.compute_rx_win_params(
            self.params.rx1_dr_offset,
            self.data_rate,
            self.params.min_rx_symbols,
            self.params.system_max_rx_error_ms,
        );
        let timer2 = Action::ArmTimer { delay_ms: self.rx2_delay_ms, tag: TimerTag::RxWindow2 };
        (Action::Rx(rx1.rx_config), timer2)
    }

    pub fn handle_rx_window2<RNG: RngCore>(&mut self, rng: &mut RNG) -> (Action, Option<Action>) {
        let rx2 = self.region.rx2_config(self.params.rx2_data_rate);
        let ack_timer = if self.node_ack_requested || matches!(self.class, DeviceClass::C) {
            // PHY_ACK_TIMEOUT: a region-random 1-3 s window (spec §4.4.3), layered on top of RX2.
            let span = region::constants::ACK_TIMEOUT_MAX_MS - region::constants::ACK_TIMEOUT_MIN_MS;
            let ack_timeout = region::constants::ACK_TIMEOUT_MIN_MS + rng.next_u32() % (span + 1);
            Some(Action::ArmTimer { delay_ms: ack_timeout, tag: TimerTag::AckTimeout })
        } else {
            None
        };
        (Action::Rx(rx2), ack_timer)
    }

    fn open_continuous_rx2(&mut self) -> Action {
        let mut cfg = self.region.rx2_config(self.params.rx2_data_rate);
        cfg.mode = crate::radio::RxMode::Continuous;
        Action::Rx(cfg)
    }

    // ---- 4.4.5 RX-done / frame processing ---------------------------------------------------

    pub fn handle_rx_done(&mut self, bytes: &mut [u8], rssi: i16, snr: i8, rx_slot: RxSlot, now_ms: u64) -> Outcome {
        self.flags.clear(MacStateFlags::TX_RUNNING);
        let mut outcome = Outcome::default();

        if bytes.is_empty() {
            return outcome;
        }
        let mtype_bits = bytes[0] >> 5;

        match mtype_bits {
            1 => self.handle_join_accept(bytes, &mut outcome),
            2 | 3 | 4 | 5 => self.handle_data_downlink(bytes, rssi, snr, rx_slot, &mut outcome),
            _ => {
                outcome.mcps_confirm = Some(McpsConfirm { status: Some(EventStatus::Error), ..Default::default() });
            }
        }
        let _ = now_ms;
        outcome
    }

    fn handle_join_accept(&mut self, bytes: &[u8], outcome: &mut Outcome) {
        if self.is_joined() {
            outcome.mlme_confirm = Some(MlmeConfirm { status: Some(EventStatus::Error), ..Default::default() });
            return;
        }
        let otaa = match core::mem::replace(&mut self.session, SessionState::Unjoined) {
            SessionState::Joining(o) => o,
            other => {
                self.session = other;
                outcome.mlme_confirm = Some(MlmeConfirm { status: Some(EventStatus::Error), ..Default::default() });
                return;
            }
        };
        match otaa.handle_rx(&self.factory, &mut self.region, bytes) {
            Ok((session, rx1_delay_ms, rx1_dr_offset, rx2_data_rate)) => {
                if rx1_delay_ms > 0 {
                    self.rx1_delay_ms = rx1_delay_ms;
                    self.rx2_delay_ms = rx1_delay_ms + 1000;
                } else {
                    self.rx1_delay_ms = region::constants::RECEIVE_DELAY1_MS;
                    self.rx2_delay_ms = region::constants::RECEIVE_DELAY2_MS;
                }
                self.params.rx1_dr_offset = rx1_dr_offset;
                self.params.rx2_data_rate = rx2_data_rate;
                self.session = SessionState::Joined(session);
                self.join_request_trials = 0;
                outcome.mlme_confirm = Some(MlmeConfirm { status: Some(EventStatus::Ok), ..Default::default() });
            }
            Err(status) => {
                self.session = SessionState::Joining(otaa);
                outcome.mlme_confirm = Some(MlmeConfirm { status: Some(status), ..Default::default() });
            }
        }
    }

    fn handle_data_downlink(&mut self, bytes: &mut [u8], rssi: i16, snr: i8, rx_slot: RxSlot, outcome: &mut Outcome) {
        let session = match &mut self.session {
            SessionState::Joined(s) => s,
            _ => {
                outcome.mcps_confirm = Some(McpsConfirm { status: Some(EventStatus::Error), ..Default::default() });
                return;
            }
        };
        let battery_level = self.battery_level;
        match session.handle_rx::<C, R, N>(
            &self.factory,
            &mut self.region,
            bytes,
            rssi,
            snr,
            rx_slot,
            self.data_rate,
            &mut self.cmd_buf,
            battery_level,
            &mut self.params,
        ) {
            Ok(Some(ind)) => {
                self.adr_ack_counter = 0;
                if self.node_ack_requested && ind.ack {
                    self.ack_received = true;
                }
                if let Some((margin, gw_cnt)) = ind.link_check {
                    outcome.mlme_confirm = Some(MlmeConfirm {
                        status: Some(EventStatus::Ok),
                        link_check_margin: margin,
                        link_check_gw_cnt: gw_cnt,
                        ..Default::default()
                    });
                }
                self.pending_ind = Some(ind);
            }
            Ok(None) => self.handle_multicast_downlink(bytes, rssi, snr, rx_slot, outcome),
            Err(status) => {
                outcome.mcps_confirm = Some(McpsConfirm { status: Some(status), ..Default::default() });
            }
        }
    }

    #[cfg(feature = "multicast")]
    fn handle_multicast_downlink(&mut self, bytes: &mut [u8], rssi: i16, snr: i8, rx_slot: RxSlot, outcome: &mut Outcome) {
        match self.multicast.handle_rx::<C, N>(&self.factory, bytes, rssi, snr, rx_slot, self.data_rate) {
            Ok(Some(ind)) => self.pending_ind = Some(ind),
            Ok(None) => {
                outcome.mcps_confirm = Some(McpsConfirm { status: Some(EventStatus::AddressFail), ..Default::default() });
            }
            Err(status) => {
                outcome.mcps_confirm = Some(McpsConfirm { status: Some(status), ..Default::default() });
            }
        }
    }

    #[cfg(not(feature = "multicast"))]
    fn handle_multicast_downlink(&mut self, _bytes: &mut [u8], _rssi: i16, _snr: i8, _rx_slot: RxSlot, outcome: &mut Outcome) {
        outcome.mcps_confirm = Some(McpsConfirm { status: Some(EventStatus::AddressFail), ..Default::default() });
    }

    // ---- 4.4.6 RX error / timeout -----------------------------------------------------------

    pub fn handle_rx_timeout(&mut self, rx_slot: RxSlot) -> Action {
        match rx_slot {
            RxSlot::Win1 => Action::None,
            RxSlot::Win2 | RxSlot::ClassC => {
                self.flags.clear(MacStateFlags::TX_RUNNING);
                Action::ArmTimer { delay_ms: 1, tag: TimerTag::MacStateCheck }
            }
        }
    }

    pub fn handle_rx_error(&mut self, rx_slot: RxSlot) -> Action {
        self.handle_rx_timeout(rx_slot)
    }

    // ---- 4.4.7 State-check / completion ------------------------------------------------------

    /// `OnMacStateCheckTimerEvent`: the convergence point re-entered on every `MacStateCheck`
    /// timer firing until the state machine settles back to idle.
    pub fn on_mac_state_check<RNG: RngCore>(&mut self, rng: &mut RNG, now_ms: u64) -> (Outcome, Action) {
        let mut outcome = Outcome::default();

        if self.flags.is_set(MacStateFlags::RX_ABORT) {
            self.flags.clear(MacStateFlags::RX_ABORT);
            self.flags.clear(MacStateFlags::TX_RUNNING);
        }

        let has_ind = self.pending_ind.is_some();
        if !self.node_ack_requested && self.flags.is_set(MacStateFlags::TX_RUNNING) {
            if self.params.channels_nb_rep_counter >= self.params.channels_nb_rep || has_ind {
                if has_ind {
                    self.cmd_buf.copy_repeat_commands_to_buffer();
                } else {
                    self.cmd_buf.clear_command_buffer();
                    self.adr_ack_counter += 1;
                }
                self.increment_fcnt_up();
                self.flags.clear(MacStateFlags::TX_RUNNING);
            } else {
                // Still within the unconfirmed repetition budget; caller should resend.
            }
        }

        if self.node_ack_requested
            && has_ind
            && (self.ack_received
                || self.ack_timeout_retries_counter >= self.ack_timeout_retries.min(region::constants::MAX_ACK_RETRIES))
        {
            self.node_ack_requested = false;
            self.increment_fcnt_up();
            self.flags.clear(MacStateFlags::TX_RUNNING);
        } else if self.node_ack_requested && !self.flags.is_set(MacStateFlags::TX_DELAYED) {
            if self.ack_timeout_retries_counter < self.ack_timeout_retries && self.ack_timeout_retries_counter < region::constants::MAX_ACK_RETRIES {
                self.ack_timeout_retries_counter += 1;
                if self.ack_timeout_retries_counter % 2 == 1 {
                    self.data_rate = self.data_rate.saturating_sub(1);
                }
                match self.schedule_tx(now_ms) {
                    Ok(action) => return (outcome, action),
                    Err(_) => {
                        outcome.mcps_confirm =
                            Some(McpsConfirm { status: Some(EventStatus::TxDrPayloadSizeError), ..Default::default() });
                        self.node_ack_requested = false;
                        self.flags.clear(MacStateFlags::TX_RUNNING);
                    }
                }
            } else {
                self.region.load_defaults(region::InitType::Restore);
                self.flags.clear(MacStateFlags::TX_RUNNING);
                self.increment_fcnt_up();
                outcome.mcps_confirm = Some(McpsConfirm {
                    status: Some(EventStatus::Ok),
                    ack_received: false,
                    nb_retries: self.ack_timeout_retries_counter,
                });
            }
        }

        if let SessionState::Joining(otaa) = &mut self.session {
            if !self.flags.is_set(MacStateFlags::TX_RUNNING) && outcome.mlme_confirm.is_none() {
                if self.join_request_trials >= self.params.max_join_request_trials {
                    outcome.mlme_confirm = Some(MlmeConfirm {
                        status: Some(EventStatus::JoinFail),
                        nb_retries: self.join_request_trials,
                        ..Default::default()
                    });
                } else {
                    let mut buf = [0u8; JOIN_REQUEST_LEN];
                    match otaa.prepare_buffer(&self.factory, rng, &mut buf) {
                        Ok(()) => {
                            self.radio_buffer.clear();
                            let _ = self.radio_buffer.extend_from_slice(&buf);
                            self.last_tx_was_join = true;
                            match self.schedule_tx(now_ms) {
                                Ok(action) => return (outcome, action),
                                Err(_) => {
                                    outcome.mlme_confirm = Some(MlmeConfirm {
                                        status: Some(EventStatus::JoinFail),
                                        nb_retries: self.join_request_trials,
                                        ..Default::default()
                                    });
                                }
                            }
                        }
                        Err(_) => {
                            outcome.mlme_confirm =
                                Some(MlmeConfirm { status: Some(EventStatus::CryptoFail), ..Default::default() });
                        }
                    }
                }
            }
        }

        self.flags.clear(MacStateFlags::RX);

        let action = if self.flags.is_idle() {
            if self.cmd_buf.is_sticky_pending() {
                outcome.mlme_indication = Some(MlmeIndication { kind: MlmeIndicationKind::ScheduleUplink });
            }
            // Peek, don't take: the payload itself is only ever handed to the caller through
            // `Mac::take_indication`, called after this convergence settles.
            if let Some(ind) = &self.pending_ind {
                let status = ind.status;
                let ack_received = self.ack_received;
                self.ack_received = false;
                outcome.mcps_confirm.get_or_insert(McpsConfirm {
                    status: Some(status),
                    ack_received,
                    ..Default::default()
                });
            }
            if matches!(self.class, DeviceClass::C) && self.is_joined() {
                self.open_continuous_rx2()
            } else {
                Action::Idle
            }
        } else {
            Action::ArmTimer { delay_ms: MAC_STATE_CHECK_TIMEOUT_MS, tag: TimerTag::MacStateCheck }
        };

        (outcome, action)
    }

    fn increment_fcnt_up(&mut self) {
        if let SessionState::Joined(s) = &mut self.session {
            s.fcnt_up = s.fcnt_up.wrapping_add(1);
        }
        self.params.channels_nb_rep_counter = 0;
    }

    // ---- 4.4.8 ADR ----------------------------------------------------------------------------

    /// `FrameCodec` build rule 1 (spec §4.2): "call ADR to maybe mutate datarate/txpower and set
    /// AdrAckReq bit". Invoked once per uplink build from [`Mac::mcps_request`]; returns the
    /// outcome so the caller can read `adr_ack_req` without recomputing it from the counter.
    fn run_adr(&mut self) -> AdrOutcome {
        let current = AdrOutcome {
            data_rate: self.data_rate,
            tx_power: self.tx_power,
            adr_ack_counter: self.adr_ack_counter,
            adr_ack_req: false,
        };
        let next = self.region.get_next_adr(
            self.params.adr_enabled,
            current,
            region::constants::ADR_ACK_LIMIT,
            region::constants::ADR_ACK_DELAY,
        );
        self.data_rate = next.data_rate;
        self.tx_power = next.tx_power;
        self.adr_ack_counter = next.adr_ack_counter;
        next
    }

    pub fn take_indication(&mut self) -> Option<McpsIndication<N>> {
        self.pending_ind.take()
    }
}
