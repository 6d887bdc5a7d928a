//! Shared vocabulary for `MacCore`: runtime state flags, status/error taxonomies, MAC parameters
//! and the request/confirm/indication types the application façade exchanges with it.
use lorawan::types::DevAddr;

/// Bitset mirroring spec §3's `MacStateFlags`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MacStateFlags(u8);

impl MacStateFlags {
    pub const TX_RUNNING: u8 = 1 << 0;
    pub const TX_DELAYED: u8 = 1 << 1;
    pub const TX_CONFIG: u8 = 1 << 2;
    pub const RX: u8 = 1 << 3;
    pub const RX_ABORT: u8 = 1 << 4;
    pub const ACK_REQ: u8 = 1 << 5;

    pub fn set(&mut self, bit: u8) {
        self.0 |= bit;
    }

    pub fn clear(&mut self, bit: u8) {
        self.0 &= !bit;
    }

    pub fn is_set(&self, bit: u8) -> bool {
        self.0 & bit != 0
    }

    pub fn is_idle(&self) -> bool {
        self.0 == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxSlot {
    Win1,
    Win2,
    ClassC,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceClass {
    A,
    C,
}

/// Synchronous request-rejection / setup-call status, spec §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    Busy,
    ServiceUnknown,
    ParameterInvalid,
    NoNetworkJoined,
    LengthError,
    DeviceOff,
    CryptoFail,
}

/// Event-status taxonomy carried on `Confirm`/`Indication`, spec §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventStatus {
    Ok,
    Error,
    TxTimeout,
    Rx1Timeout,
    Rx2Timeout,
    Rx1Error,
    Rx2Error,
    JoinFail,
    DownlinkRepeated,
    DownlinkTooManyFramesLoss,
    AddressFail,
    MicFail,
    CryptoFail,
    TxDrPayloadSizeError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MlmeRequestKind {
    Join { nb_trials: u32 },
    LinkCheck,
    TxCw { timeout_s: u16 },
    TxCw1 { timeout_s: u16, frequency: u32, power: i8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum McpsRequestKind {
    Unconfirmed,
    Confirmed { nb_trials: u8 },
    Proprietary,
}

/// A pending MCPS uplink request as admitted by [`crate::mac::Mac::mcps_request`].
#[derive(Debug, Clone, Copy)]
pub struct McpsRequest<'a> {
    pub kind: McpsRequestKind,
    pub fport: u8,
    pub data: &'a [u8],
    pub data_rate: Option<u8>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct McpsConfirm {
    pub status: Option<EventStatus>,
    pub ack_received: bool,
    pub nb_retries: u8,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MlmeConfirm {
    pub status: Option<EventStatus>,
    pub nb_retries: u32,
    pub link_check_margin: u8,
    pub link_check_gw_cnt: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MlmeIndicationKind {
    ScheduleUplink,
}

#[derive(Debug, Clone, Copy)]
pub struct MlmeIndication {
    pub kind: MlmeIndicationKind,
}

/// Delivered application-visible downlink; `skip` mirrors a duplicate confirmed downlink that
/// still had to be processed for its MAC commands but must not be re-surfaced to the app.
#[derive(Debug, Clone)]
pub struct McpsIndication<const N: usize> {
    pub status: EventStatus,
    pub fport: Option<u8>,
    pub data: heapless::Vec<u8, N>,
    pub rssi: i16,
    pub snr: i8,
    pub rx_slot: RxSlot,
    pub rx_datarate: u8,
    pub fcnt_down: u32,
    pub skip: bool,
    pub ack: bool,
    /// `(margin, gw_cnt)` from a `LinkCheckAns` riding this downlink's FOpts, spec §4.3: "delivers
    /// margin/GwCnt through MlmeConfirm".
    pub link_check: Option<(u8, u8)>,
}

/// `LoRaMacQueryTxPossible`: the current vs. maximum payload size at the active datarate, with
/// pending MAC commands already accounted for (dropped from the budget, not the app payload, if
/// they don't fit — spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxInfo {
    pub current_payload_size: usize,
    pub max_possible_payload: usize,
}

/// `LoRaMacMibGetRequestConfirm`/`...SetRequestConfirm`'s attribute discriminant, scoped to the
/// attributes this crate's data model actually carries (see SPEC_FULL.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MibAttribute {
    DeviceClass,
    NetworkJoined,
    Adr,
    NetId,
    DevAddr,
    ChannelsNbRep,
    MaxDCycle,
    MaxRxWindow,
    ReceiveDelay1,
    ReceiveDelay2,
    JoinAcceptDelay1,
    JoinAcceptDelay2,
    SystemMaxRxError,
    MinRxSymbols,
    AntennaGain,
    MaxEirp,
    UplinkCounter,
    DownLinkCounter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MibValue {
    DeviceClass(DeviceClass),
    Bool(bool),
    NetId(u32),
    DevAddr(DevAddr),
    U8(u8),
    U32(u32),
    I8(i8),
}

/// Mutable protocol configuration (spec's `MacParams`/`MacParamsDefaults`).
#[derive(Debug, Clone, Copy)]
pub struct MacParams {
    pub adr_enabled: bool,
    pub channels_nb_rep: u8,
    pub channels_nb_rep_counter: u8,
    pub max_d_cycle: u8,
    pub aggregated_d_cycle: u32,
    pub rx1_dr_offset: u8,
    pub rx2_data_rate: u8,
    pub max_join_request_trials: u32,
    pub max_eirp: i8,
    pub antenna_gain: i8,
    pub min_rx_symbols: u8,
    pub system_max_rx_error_ms: u32,
    pub max_rx_window_ms: u32,
}

impl Default for MacParams {
    fn default() -> Self {
        MacParams {
            adr_enabled: false,
            channels_nb_rep: 1,
            channels_nb_rep_counter: 0,
            max_d_cycle: 0,
            aggregated_d_cycle: 1,
            rx1_dr_offset: 0,
            rx2_data_rate: 0,
            max_join_request_trials: 8,
            max_eirp: 16,
            antenna_gain: 0,
            min_rx_symbols: 8,
            system_max_rx_error_ms: 10,
            max_rx_window_ms: 3000,
        }
    }
}

/// Session-local multicast group entry (spec §3 "Multicast sessions"); lifecycle is link/unlink
/// while idle only.
#[derive(Debug, Clone, Copy)]
pub struct MulticastGroup {
    pub dev_addr: DevAddr,
    pub nwk_skey: lorawan::keys::AES128,
    pub app_skey: lorawan::keys::AES128,
    pub fcnt_down: u32,
}
