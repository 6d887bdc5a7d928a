//! Post-join session state: session keys, frame counters, and the downlink frame-processing
//! pipeline (spec §4.4.5's FCnt rollover, MIC validation, MAC-command dispatch and duplicate
//! detection), grounded in the teacher's `mac::session` module.
use heapless::Vec;
use lorawan::crypto;
use lorawan::frame::{self, DataUplinkParams, JoinAccept};
use lorawan::keys::{AppSKey, CryptoFactory, Direction, NwkSKey};
use lorawan::maccommands::{DownlinkCommandIter, DownlinkMacCommand};
use lorawan::types::{DevAddr, DevNonce};

use crate::mac::commands::MacCommandBuffer;
use crate::mac::types::{EventStatus, MacParams, McpsIndication, RxSlot};
use crate::region::{RegionPhy, VerifyParams};
use crate::region::constants::MAX_FCNT_GAP;

#[derive(Clone)]
pub struct Session {
    pub nwk_skey: NwkSKey,
    pub app_skey: AppSKey,
    pub dev_addr: DevAddr,
    pub fcnt_up: u32,
    pub fcnt_down: u32,
    pub confirmed_pending_ack: bool,
}

impl Session {
    pub fn derive_new<C: CryptoFactory>(
        factory: &C,
        app_key: &lorawan::keys::AppKey,
        accept: &JoinAccept,
        dev_nonce: DevNonce,
    ) -> Self {
        let (nwk_skey, app_skey) = crypto::derive_session_keys(
            factory,
            app_key,
            accept.app_nonce.0,
            accept.net_id.0,
            dev_nonce.0,
        )
        .expect("software AES never fails");
        Session {
            nwk_skey,
            app_skey,
            dev_addr: accept.dev_addr,
            fcnt_up: 0,
            fcnt_down: 0,
            confirmed_pending_ack: false,
        }
    }

    /// Builds an uplink data frame, writing the raw PHY payload into `out` and returning its
    /// length. `mac_cmds` is the FOpts content already folded by [`MacCommandBuffer::prepare_for_tx`].
    #[allow(clippy::too_many_arguments)]
    pub fn prepare_buffer<C: CryptoFactory>(
        &self,
        factory: &C,
        confirmed: bool,
        adr: bool,
        adr_ack_req: bool,
        fopts: &[u8],
        fport: Option<u8>,
        payload: &[u8],
        out: &mut [u8],
    ) -> Result<usize, frame::Error> {
        let params = DataUplinkParams {
            confirmed,
            dev_addr: self.dev_addr,
            fctrl_adr: adr,
            fctrl_adr_ack_req: adr_ack_req,
            fctrl_ack: self.confirmed_pending_ack,
            fcnt: self.fcnt_up as u16,
            fopts,
            fport,
            frm_payload: payload,
        };
        frame::build_data_uplink(factory, self.nwk_skey.inner(), self.app_skey.inner(), &params, self.fcnt_up, out)
    }

    /// Reconstructs the 32-bit downlink frame counter from the stored value and the 16-bit wire
    /// value, trying the non-rollover candidate first (spec §4.4.5 / §4.4.9). The returned `bool`
    /// is `rolled`: whether the reconstructed candidate's high 16 bits differ from `stored`'s,
    /// i.e. a 16→32-bit rollover occurred — not which branch below produced the candidate.
    pub fn reconstruct_fcnt(stored: u32, wire: u16) -> (u32, bool) {
        let stored16 = (stored & 0xFFFF) as u16;
        let diff = wire.wrapping_sub(stored16);
        let candidate = if diff < 0x8000 {
            stored.wrapping_add(diff as u32)
        } else {
            // `diff` interpreted as a negative i16 offset from the rollover candidate.
            let neg = (0x10000 - diff as u32) as i32;
            stored.wrapping_add(0x10000).wrapping_sub(neg as u32)
        };
        let rolled = (candidate >> 16) != (stored >> 16);
        (candidate, rolled)
    }

    /// Processes a received downlink: validates devaddr/MIC, reconstructs FCnt, decrypts, walks
    /// MAC commands, and fills in an `McpsIndication`. Returns `Ok(None)` when the downlink was
    /// not addressed to this session (caller should check multicast groups next).
    #[allow(clippy::too_many_arguments)]
    pub fn handle_rx<C: CryptoFactory, R: RegionPhy, const N: usize>(
        &mut self,
        factory: &C,
        region: &mut R,
        bytes: &mut [u8],
        rssi: i16,
        snr: i8,
        rx_slot: RxSlot,
        rx_datarate: u8,
        cmd_buf: &mut MacCommandBuffer,
        battery_level: u8,
        params: &mut MacParams,
    ) -> Result<Option<McpsIndication<N>>, EventStatus> {
        if bytes.len() < 5 {
            return Err(EventStatus::Error);
        }
        let wire_dev_addr = DevAddr::from_le_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
        if wire_dev_addr.0 != self.dev_addr.0 {
            return Ok(None);
        }

        let wire_fcnt = u16::from_le_bytes([bytes[6], bytes[7]]);
        let (candidate, rolled) = Self::reconstruct_fcnt(self.fcnt_down, wire_fcnt);
        let diff = candidate.wrapping_sub(self.fcnt_down);
        if diff >= MAX_FCNT_GAP && !(self.fcnt_down == 0 && candidate == 0) {
            return Err(EventStatus::DownlinkTooManyFramesLoss);
        }

        let parsed = frame::parse_data_downlink(
            factory,
            self.nwk_skey.inner(),
            self.app_skey.inner(),
            bytes,
            candidate,
        )
        .map_err(|_| EventStatus::MicFail)?;

        let is_duplicate = candidate == self.fcnt_down && self.fcnt_down != 0;
        let skip = if is_duplicate {
            if !parsed.confirmed {
                return Err(EventStatus::DownlinkRepeated);
            }
            true
        } else {
            self.fcnt_down = candidate;
            let _ = rolled;
            false
        };

        if parsed.confirmed && parsed.fctrl.ack() {
            cmd_buf.clear_command_buffer();
        }

        let mut link_check = None;
        for cmd in DownlinkCommandIter::new(parsed.fopts) {
            if let Ok(cmd) = cmd {
                apply_downlink_command(region, cmd, cmd_buf, battery_level, &mut link_check, params);
            }
        }
        if parsed.fport == Some(0) {
            for cmd in DownlinkCommandIter::new(parsed.frm_payload) {
                if let Ok(cmd) = cmd {
                    apply_downlink_command(region, cmd, cmd_buf, battery_level, &mut link_check, params);
                }
            }
        }

        self.confirmed_pending_ack = parsed.confirmed;

        let mut data = Vec::new();
        if parsed.fport != Some(0) {
            let _ = data.extend_from_slice(parsed.frm_payload);
        }

        Ok(Some(McpsIndication {
            status: EventStatus::Ok,
            fport: parsed.fport.filter(|p| *p != 0),
            data,
            rssi,
            snr,
            rx_slot,
            rx_datarate,
            fcnt_down: self.fcnt_down,
            skip,
            ack: parsed.fctrl.ack(),
            link_check,
        }))
    }
}

fn apply_downlink_command<R: RegionPhy>(
    region: &mut R,
    cmd: DownlinkMacCommand,
    cmd_buf: &mut MacCommandBuffer,
    battery_level: u8,
    link_check: &mut Option<(u8, u8)>,
    params: &mut MacParams,
) {
    use lorawan::maccommands::UplinkMacCommand as Up;
    match cmd {
        DownlinkMacCommand::LinkCheckAns { margin, gw_cnt } => {
            // Surfaced through MlmeConfirm by the caller (spec §4.3); no uplink answer needed.
            *link_check = Some((margin, gw_cnt));
        }
        DownlinkMacCommand::LinkAdrReq { data_rate, tx_power, ch_mask, nb_trans, .. } => {
            let data_rate_ack = region.verify(VerifyParams::DataRate(data_rate)).is_ok();
            let power_ack = region.verify(VerifyParams::TxPower(tx_power)).is_ok();
            let channel_mask_ack = region.set_channel_mask(ch_mask).is_ok();
            if data_rate_ack && power_ack && channel_mask_ack && nb_trans > 0 {
                params.channels_nb_rep = nb_trans.clamp(1, 15);
            }
            let _ = cmd_buf.push_next_tx(Up::LinkAdrAns { power_ack, data_rate_ack, channel_mask_ack });
        }
        DownlinkMacCommand::DutyCycleReq { max_d_cycle } => {
            params.max_d_cycle = max_d_cycle;
            let _ = cmd_buf.push_next_tx(Up::DutyCycleAns);
        }
        DownlinkMacCommand::RxParamSetupReq { rx1_dr_offset, rx2_data_rate, frequency: _ } => {
            let rx1_ok = region.verify(VerifyParams::DataRate(rx1_dr_offset)).is_ok();
            let rx2_ok = region.verify(VerifyParams::RxDataRate(rx2_data_rate)).is_ok();
            // Per LoRaWAN 1.0.x §5.4, the new parameters only take effect once every
            // sub-setting is acknowledged; a partial ack leaves MacParams untouched.
            if rx1_ok && rx2_ok {
                params.rx1_dr_offset = rx1_dr_offset;
                params.rx2_data_rate = rx2_data_rate;
            }
            let _ = cmd_buf.push_next_tx(Up::RxParamSetupAns {
                channel_ack: true,
                rx2_data_rate_ack: rx2_ok,
                rx1_dr_offset_ack: rx1_ok,
            });
        }
        DownlinkMacCommand::DevStatusReq => {
            let _ = cmd_buf.push_next_tx(Up::DevStatusAns { battery: battery_level, margin: 0 });
        }
        DownlinkMacCommand::NewChannelReq { ch_index, freq, min_dr, max_dr } => {
            let ok = region.add_channel(ch_index, crate::region::ChannelPlanEntry { freq, min_dr, max_dr }).is_ok();
            let _ = cmd_buf.push_next_tx(Up::NewChannelAns { channel_freq_ok: ok, data_rate_range_ok: ok });
        }
        DownlinkMacCommand::RxTimingSetupReq { .. } => {
            let _ = cmd_buf.push_next_tx(Up::RxTimingSetupAns);
        }
        DownlinkMacCommand::TxParamSetupReq { .. } => {
            let _ = cmd_buf.push_next_tx(Up::TxParamSetupAns);
        }
        DownlinkMacCommand::DlChannelReq { ch_index, freq } => {
            let ok = region
                .add_channel(ch_index, crate::region::ChannelPlanEntry { freq, min_dr: 0, max_dr: 5 })
                .is_ok();
            let _ = cmd_buf.push_next_tx(Up::DlChannelAns { channel_freq_ok: ok, uplink_freq_ok: ok });
        }
        DownlinkMacCommand::DeviceTimeAns { .. } => {}
    }
}

#[cfg(all(test, feature = "region-eu868"))]
mod tests {
    use super::*;
    use crate::region::eu868::Eu868;

    #[test]
    fn reconstruct_fcnt_forward_progression() {
        let (fcnt, rolled) = Session::reconstruct_fcnt(10, 11);
        assert_eq!(fcnt, 11);
        assert!(!rolled);
    }

    #[test]
    fn reconstruct_fcnt_wraps_16_bit_wire_into_32_bit_counter() {
        let (fcnt, rolled) = Session::reconstruct_fcnt(0x1_FFFE, 0x0000);
        assert_eq!(fcnt, 0x2_0000);
        assert!(rolled);
    }

    #[test]
    fn link_check_ans_threads_into_link_check_field() {
        let mut region = Eu868::new();
        let mut cmd_buf = MacCommandBuffer::new();
        let mut link_check = None;
        let mut params = MacParams::default();
        apply_downlink_command(
            &mut region,
            DownlinkMacCommand::LinkCheckAns { margin: 20, gw_cnt: 3 },
            &mut cmd_buf,
            255,
            &mut link_check,
            &mut params,
        );
        assert_eq!(link_check, Some((20, 3)));
    }

    #[test]
    fn dev_status_req_answers_with_caller_supplied_battery_level() {
        let mut region = Eu868::new();
        let mut cmd_buf = MacCommandBuffer::new();
        let mut link_check = None;
        let mut params = MacParams::default();
        apply_downlink_command(&mut region, DownlinkMacCommand::DevStatusReq, &mut cmd_buf, 42, &mut link_check, &mut params);
        assert!(cmd_buf.is_mac_commands_in_next_tx());
        assert!(link_check.is_none());
    }

    #[test]
    fn duty_cycle_req_updates_max_d_cycle_param() {
        let mut region = Eu868::new();
        let mut cmd_buf = MacCommandBuffer::new();
        let mut link_check = None;
        let mut params = MacParams::default();
        apply_downlink_command(
            &mut region,
            DownlinkMacCommand::DutyCycleReq { max_d_cycle: 4 },
            &mut cmd_buf,
            255,
            &mut link_check,
            &mut params,
        );
        assert_eq!(params.max_d_cycle, 4);
        assert!(cmd_buf.is_mac_commands_in_next_tx());
    }

    #[test]
    fn link_adr_req_applies_nb_trans_to_channels_nb_rep_on_full_ack() {
        let mut region = Eu868::new();
        let mut cmd_buf = MacCommandBuffer::new();
        let mut link_check = None;
        let mut params = MacParams::default();
        let mask = lorawan::types::ChannelMask::<2>::default();
        apply_downlink_command(
            &mut region,
            DownlinkMacCommand::LinkAdrReq { data_rate: 3, tx_power: 1, ch_mask: mask, ch_mask_ctrl: 0, nb_trans: 3 },
            &mut cmd_buf,
            255,
            &mut link_check,
            &mut params,
        );
        assert_eq!(params.channels_nb_rep, 3);
    }
}
