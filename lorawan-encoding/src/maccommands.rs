//! Encoding and decoding of LoRaWAN MAC commands (spec component "MacCommands").
//!
//! This module is purely about wire shape: given a CID and a byte slice, produce a typed command
//! or an error; given a typed command, write its bytes. The *buffering* policy (current / repeat
//! / next-tx / sticky tracking) described in the spec belongs to `MacCore` in the device crate,
//! which is the only thing that needs to reason about FOpts budget and confirmation.
use crate::types::ChannelMask;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    BufferTooShort,
    UnknownCid(u8),
}

macro_rules! cid_table {
    (uplink { $($u_name:ident = $u_cid:expr, $u_len:expr;)* }
     downlink { $($d_name:ident = $d_cid:expr, $d_len:expr;)* }) => {
        /// CIDs recognized on the uplink direction (device -> network).
        pub mod uplink_cid {
            $(pub const $u_name: u8 = $u_cid;)*
        }
        /// CIDs recognized on the downlink direction (network -> device).
        pub mod downlink_cid {
            $(pub const $d_name: u8 = $d_cid;)*
        }
    };
}

cid_table! {
    uplink {
        LINK_CHECK_REQ = 0x02, 0;
        LINK_ADR_ANS = 0x03, 1;
        DUTY_CYCLE_ANS = 0x04, 0;
        RX_PARAM_SETUP_ANS = 0x05, 1;
        DEV_STATUS_ANS = 0x06, 2;
        NEW_CHANNEL_ANS = 0x07, 1;
        RX_TIMING_SETUP_ANS = 0x08, 0;
        TX_PARAM_SETUP_ANS = 0x09, 0;
        DL_CHANNEL_ANS = 0x0A, 1;
        DEVICE_TIME_REQ = 0x0D, 0;
    }
    downlink {
        LINK_CHECK_ANS = 0x02, 2;
        LINK_ADR_REQ = 0x03, 4;
        DUTY_CYCLE_REQ = 0x04, 1;
        RX_PARAM_SETUP_REQ = 0x05, 4;
        DEV_STATUS_REQ = 0x06, 0;
        NEW_CHANNEL_REQ = 0x07, 5;
        RX_TIMING_SETUP_REQ = 0x08, 1;
        TX_PARAM_SETUP_REQ = 0x09, 1;
        DL_CHANNEL_REQ = 0x0A, 4;
        DEVICE_TIME_ANS = 0x0D, 5;
    }
}

/// A parsed uplink MAC command (device -> network).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UplinkMacCommand {
    LinkCheckReq,
    LinkAdrAns { power_ack: bool, data_rate_ack: bool, channel_mask_ack: bool },
    DutyCycleAns,
    RxParamSetupAns { channel_ack: bool, rx2_data_rate_ack: bool, rx1_dr_offset_ack: bool },
    DevStatusAns { battery: u8, margin: i8 },
    NewChannelAns { channel_freq_ok: bool, data_rate_range_ok: bool },
    RxTimingSetupAns,
    TxParamSetupAns,
    DlChannelAns { channel_freq_ok: bool, uplink_freq_ok: bool },
    DeviceTimeReq,
}

impl UplinkMacCommand {
    pub fn cid(self) -> u8 {
        use uplink_cid::*;
        match self {
            UplinkMacCommand::LinkCheckReq => LINK_CHECK_REQ,
            UplinkMacCommand::LinkAdrAns { .. } => LINK_ADR_ANS,
            UplinkMacCommand::DutyCycleAns => DUTY_CYCLE_ANS,
            UplinkMacCommand::RxParamSetupAns { .. } => RX_PARAM_SETUP_ANS,
            UplinkMacCommand::DevStatusAns { .. } => DEV_STATUS_ANS,
            UplinkMacCommand::NewChannelAns { .. } => NEW_CHANNEL_ANS,
            UplinkMacCommand::RxTimingSetupAns => RX_TIMING_SETUP_ANS,
            UplinkMacCommand::TxParamSetupAns => TX_PARAM_SETUP_ANS,
            UplinkMacCommand::DlChannelAns { .. } => DL_CHANNEL_ANS,
            UplinkMacCommand::DeviceTimeReq => DEVICE_TIME_REQ,
        }
    }

    /// Writes CID + payload into `out`, returning the number of bytes written.
    pub fn encode(self, out: &mut [u8]) -> Result<usize, Error> {
        if out.is_empty() {
            return Err(Error::BufferTooShort);
        }
        out[0] = self.cid();
        let len = match self {
            UplinkMacCommand::LinkCheckReq
            | UplinkMacCommand::DutyCycleAns
            | UplinkMacCommand::RxTimingSetupAns
            | UplinkMacCommand::TxParamSetupAns
            | UplinkMacCommand::DeviceTimeReq => 0,
            UplinkMacCommand::LinkAdrAns { power_ack, data_rate_ack, channel_mask_ack } => {
                require(out, 2)?;
                out[1] = (power_ack as u8) << 2 | (data_rate_ack as u8) << 1 | (channel_mask_ack as u8);
                1
            }
            UplinkMacCommand::RxParamSetupAns { channel_ack, rx2_data_rate_ack, rx1_dr_offset_ack } => {
                require(out, 2)?;
                out[1] =
                    (rx1_dr_offset_ack as u8) << 2 | (rx2_data_rate_ack as u8) << 1 | (channel_ack as u8);
                1
            }
            UplinkMacCommand::DevStatusAns { battery, margin } => {
                require(out, 3)?;
                out[1] = battery;
                out[2] = margin as u8 & 0x3F;
                2
            }
            UplinkMacCommand::NewChannelAns { channel_freq_ok, data_rate_range_ok } => {
                require(out, 2)?;
                out[1] = (data_rate_range_ok as u8) << 1 | (channel_freq_ok as u8);
                1
            }
            UplinkMacCommand::DlChannelAns { channel_freq_ok, uplink_freq_ok } => {
                require(out, 2)?;
                out[1] = (uplink_freq_ok as u8) << 1 | (channel_freq_ok as u8);
                1
            }
        };
        Ok(1 + len)
    }
}

fn require(buf: &[u8], n: usize) -> Result<(), Error> {
    if buf.len() < n {
        Err(Error::BufferTooShort)
    } else {
        Ok(())
    }
}

/// A parsed downlink MAC command (network -> device). `LinkADRReq`'s channel mask is 2 raw bytes
/// here; the device crate's region plugin is responsible for interpreting `chmask_ctrl` against
/// its own channel plan (per spec, region-specific verification is an external collaborator).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownlinkMacCommand {
    LinkCheckAns { margin: u8, gw_cnt: u8 },
    LinkAdrReq { data_rate: u8, tx_power: u8, ch_mask: ChannelMask<2>, ch_mask_ctrl: u8, nb_trans: u8 },
    DutyCycleReq { max_d_cycle: u8 },
    RxParamSetupReq { rx1_dr_offset: u8, rx2_data_rate: u8, frequency: u32 },
    DevStatusReq,
    NewChannelReq { ch_index: u8, freq: u32, min_dr: u8, max_dr: u8 },
    RxTimingSetupReq { delay: u8 },
    TxParamSetupReq { downlink_dwell_time: bool, uplink_dwell_time: bool, max_eirp: u8 },
    DlChannelReq { ch_index: u8, freq: u32 },
    DeviceTimeAns { seconds: u32, fractional: u8 },
}

impl DownlinkMacCommand {
    pub fn cid(self) -> u8 {
        use downlink_cid::*;
        match self {
            DownlinkMacCommand::LinkCheckAns { .. } => LINK_CHECK_ANS,
            DownlinkMacCommand::LinkAdrReq { .. } => LINK_ADR_REQ,
            DownlinkMacCommand::DutyCycleReq { .. } => DUTY_CYCLE_REQ,
            DownlinkMacCommand::RxParamSetupReq { .. } => RX_PARAM_SETUP_REQ,
            DownlinkMacCommand::DevStatusReq => DEV_STATUS_REQ,
            DownlinkMacCommand::NewChannelReq { .. } => NEW_CHANNEL_REQ,
            DownlinkMacCommand::RxTimingSetupReq { .. } => RX_TIMING_SETUP_REQ,
            DownlinkMacCommand::TxParamSetupReq { .. } => TX_PARAM_SETUP_REQ,
            DownlinkMacCommand::DlChannelReq { .. } => DL_CHANNEL_REQ,
            DownlinkMacCommand::DeviceTimeAns { .. } => DEVICE_TIME_ANS,
        }
    }

    /// Parses one command starting at `bytes[0]` (the CID), returning the command and the number
    /// of bytes it consumed (CID included).
    pub fn parse(bytes: &[u8]) -> Result<(Self, usize), Error> {
        if bytes.is_empty() {
            return Err(Error::BufferTooShort);
        }
        let cid = bytes[0];
        let body = &bytes[1..];
        use downlink_cid::*;
        let (cmd, body_len) = match cid {
            LINK_CHECK_ANS => {
                require(body, 2)?;
                (DownlinkMacCommand::LinkCheckAns { margin: body[0], gw_cnt: body[1] }, 2)
            }
            LINK_ADR_REQ => {
                require(body, 4)?;
                let ch_mask = ChannelMask::<2>::new(&body[1..3]).map_err(|_| Error::BufferTooShort)?;
                (
                    DownlinkMacCommand::LinkAdrReq {
                        data_rate: body[0] >> 4,
                        tx_power: body[0] & 0x0F,
                        ch_mask,
                        ch_mask_ctrl: (body[3] >> 4) & 0x07,
                        nb_trans: body[3] & 0x0F,
                    },
                    4,
                )
            }
            DUTY_CYCLE_REQ => {
                require(body, 1)?;
                (DownlinkMacCommand::DutyCycleReq { max_d_cycle: body[0] & 0x0F }, 1)
            }
            RX_PARAM_SETUP_REQ => {
                require(body, 4)?;
                let freq = u32::from_le_bytes([body[1], body[2], body[3], 0]);
                (
                    DownlinkMacCommand::RxParamSetupReq {
                        rx1_dr_offset: (body[0] >> 4) & 0x07,
                        rx2_data_rate: body[0] & 0x0F,
                        frequency: freq,
                    },
                    4,
                )
            }
            DEV_STATUS_REQ => (DownlinkMacCommand::DevStatusReq, 0),
            NEW_CHANNEL_REQ => {
                require(body, 5)?;
                let freq = u32::from_le_bytes([body[1], body[2], body[3], 0]);
                (
                    DownlinkMacCommand::NewChannelReq {
                        ch_index: body[0],
                        freq,
                        min_dr: body[4] & 0x0F,
                        max_dr: (body[4] >> 4) & 0x0F,
                    },
                    5,
                )
            }
            RX_TIMING_SETUP_REQ => {
                require(body, 1)?;
                (DownlinkMacCommand::RxTimingSetupReq { delay: body[0] & 0x0F }, 1)
            }
            TX_PARAM_SETUP_REQ => {
                require(body, 1)?;
                (
                    DownlinkMacCommand::TxParamSetupReq {
                        downlink_dwell_time: body[0] & 0x20 != 0,
                        uplink_dwell_time: body[0] & 0x10 != 0,
                        max_eirp: body[0] & 0x0F,
                    },
                    1,
                )
            }
            DL_CHANNEL_REQ => {
                require(body, 4)?;
                let freq = u32::from_le_bytes([body[1], body[2], body[3], 0]);
                (DownlinkMacCommand::DlChannelReq { ch_index: body[0], freq }, 4)
            }
            DEVICE_TIME_ANS => {
                require(body, 5)?;
                let seconds = u32::from_le_bytes([body[0], body[1], body[2], body[3]]);
                (DownlinkMacCommand::DeviceTimeAns { seconds, fractional: body[4] }, 5)
            }
            other => return Err(Error::UnknownCid(other)),
        };
        Ok((cmd, 1 + body_len))
    }
}

/// Iterates a concatenated run of downlink MAC commands (a `FOpts` field, or an FPort-0
/// `FRMPayload`), stopping at the first unrecognized CID or truncated command.
pub struct DownlinkCommandIter<'a> {
    rest: &'a [u8],
}

impl<'a> DownlinkCommandIter<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        DownlinkCommandIter { rest: bytes }
    }
}

impl<'a> Iterator for DownlinkCommandIter<'a> {
    type Item = Result<DownlinkMacCommand, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.rest.is_empty() {
            return None;
        }
        match DownlinkMacCommand::parse(self.rest) {
            Ok((cmd, consumed)) => {
                self.rest = &self.rest[consumed..];
                Some(Ok(cmd))
            }
            Err(e) => {
                self.rest = &[];
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_adr_req_parses_known_fixture() {
        // DR5/TxPower0, all 16 channels of bank 0 enabled, ChMaskCtrl=0, NbTrans=1.
        let bytes = [downlink_cid::LINK_ADR_REQ, 0x50, 0xFF, 0xFF, 0x01];
        let (cmd, consumed) = DownlinkMacCommand::parse(&bytes).unwrap();
        assert_eq!(consumed, 5);
        match cmd {
            DownlinkMacCommand::LinkAdrReq { data_rate, tx_power, nb_trans, ch_mask_ctrl, .. } => {
                assert_eq!(data_rate, 5);
                assert_eq!(tx_power, 0);
                assert_eq!(nb_trans, 1);
                assert_eq!(ch_mask_ctrl, 0);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn link_adr_ans_encodes_all_ack_bits() {
        let cmd = UplinkMacCommand::LinkAdrAns {
            power_ack: true,
            data_rate_ack: true,
            channel_mask_ack: true,
        };
        let mut buf = [0u8; 2];
        let n = cmd.encode(&mut buf).unwrap();
        assert_eq!(n, 2);
        assert_eq!(buf, [uplink_cid::LINK_ADR_ANS, 0b111]);
    }

    #[test]
    fn iterator_stops_on_unknown_cid() {
        let bytes = [downlink_cid::DEV_STATUS_REQ, 0xFE];
        let mut it = DownlinkCommandIter::new(&bytes);
        assert_eq!(it.next(), Some(Ok(DownlinkMacCommand::DevStatusReq)));
        assert!(matches!(it.next(), Some(Err(Error::UnknownCid(0xFE)))));
        assert_eq!(it.next(), None);
    }
}
