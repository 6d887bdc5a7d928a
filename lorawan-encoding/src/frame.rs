//! Byte-exact serialization and parsing of LoRaWAN frames (spec component "FrameCodec").
//!
//! Every multi-byte field is exposed as an opaque byte (or byte slice) plus explicit accessor
//! methods rather than an overlaid `#[repr(packed)]` struct: LoRaWAN's bit-packed fields
//! (`FCtrl`, `DLSettings`) and endianness mix make a direct memory overlay error-prone, and this
//! crate targets architectures where unaligned reads are not guaranteed safe.
use crate::keys::{AppKey, CryptoFactory, Direction, AES128, MIC};
use crate::types::{memcpy_convert_endianess, AppEui, AppNonce, CfList, DevAddr, DevEui, DevNonce, DlSettings, NetId, RxDelay};
use crate::{crypto, maccommands};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    BufferTooShort,
    UnsupportedMajorVersion,
    InvalidMessageType,
    MicMismatch,
}

/// The wire `MType` values occupying bits 7-5 of MHDR.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MType {
    JoinRequest,
    JoinAccept,
    UnconfirmedDataUp,
    UnconfirmedDataDown,
    ConfirmedDataUp,
    ConfirmedDataDown,
    RfuProprietary(u8),
}

impl MType {
    fn from_bits(v: u8) -> Self {
        match v {
            0 => MType::JoinRequest,
            1 => MType::JoinAccept,
            2 => MType::UnconfirmedDataUp,
            3 => MType::UnconfirmedDataDown,
            4 => MType::ConfirmedDataUp,
            5 => MType::ConfirmedDataDown,
            other => MType::RfuProprietary(other),
        }
    }

    fn to_bits(self) -> u8 {
        match self {
            MType::JoinRequest => 0,
            MType::JoinAccept => 1,
            MType::UnconfirmedDataUp => 2,
            MType::UnconfirmedDataDown => 3,
            MType::ConfirmedDataUp => 4,
            MType::ConfirmedDataDown => 5,
            MType::RfuProprietary(v) => v,
        }
    }

    pub fn is_uplink(self) -> bool {
        matches!(self, MType::JoinRequest | MType::UnconfirmedDataUp | MType::ConfirmedDataUp)
    }

    pub fn is_confirmed(self) -> bool {
        matches!(self, MType::ConfirmedDataUp | MType::ConfirmedDataDown)
    }
}

/// The MHDR byte: major version (bits 1-0, always `0` for 1.0.x) plus [`MType`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mhdr(pub u8);

impl Mhdr {
    pub fn new(mtype: MType) -> Self {
        Mhdr((mtype.to_bits() << 5) | 0b00)
    }

    pub fn mtype(self) -> MType {
        MType::from_bits(self.0 >> 5)
    }

    pub fn major(self) -> u8 {
        self.0 & 0b11
    }
}

/// The `FCtrl` byte. Uplink and downlink give the bit at position 4 a different name
/// (`ADRACKReq` vs `FPending`); both are exposed and the caller is expected to use the one
/// matching the frame's direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FCtrl(pub u8);

impl FCtrl {
    pub fn new(adr: bool, adr_ack_req_or_pending: bool, ack: bool, fopts_len: u8) -> Self {
        let mut b = fopts_len & 0x0F;
        if adr {
            b |= 0x80;
        }
        if adr_ack_req_or_pending {
            b |= 0x40;
        }
        if ack {
            b |= 0x20;
        }
        FCtrl(b)
    }

    pub fn adr(self) -> bool {
        self.0 & 0x80 != 0
    }

    pub fn adr_ack_req(self) -> bool {
        self.0 & 0x40 != 0
    }

    pub fn ack(self) -> bool {
        self.0 & 0x20 != 0
    }

    pub fn f_pending(self) -> bool {
        self.0 & 0x10 != 0
    }

    pub fn f_opts_len(self) -> u8 {
        self.0 & 0x0F
    }
}

/// `DevAddr | FCtrl | FCnt(lo 16 bits) | FOpts`.
#[derive(Debug, Clone, Copy)]
pub struct Fhdr<'a> {
    pub dev_addr: DevAddr,
    pub fctrl: FCtrl,
    pub fcnt: u16,
    pub fopts: &'a [u8],
}

impl<'a> Fhdr<'a> {
    pub fn len(&self) -> usize {
        7 + self.fopts.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

/// Parses `MHDR..MIC` into its parts without validating the MIC or decrypting `FRMPayload`. The
/// caller decides whether the result is a join or data message and proceeds accordingly.
pub fn parse_mhdr(bytes: &[u8]) -> Result<(Mhdr, &[u8]), Error> {
    if bytes.is_empty() {
        return Err(Error::BufferTooShort);
    }
    let mhdr = Mhdr(bytes[0]);
    if mhdr.major() != 0 {
        return Err(Error::UnsupportedMajorVersion);
    }
    Ok((mhdr, &bytes[1..]))
}

fn split_tail_mic(bytes: &[u8]) -> Result<(&[u8], MIC), Error> {
    if bytes.len() < 4 {
        return Err(Error::BufferTooShort);
    }
    let (body, mic) = bytes.split_at(bytes.len() - 4);
    let mut m = [0u8; 4];
    m.copy_from_slice(mic);
    Ok((body, MIC(m)))
}

// ---- Join-Request ----------------------------------------------------------------------

pub const JOIN_REQUEST_LEN: usize = 23;

/// Builds a 23-byte Join-Request: `MHDR | AppEUI(wire order) | DevEUI(wire order) | DevNonce |
/// MIC`. `app_eui`/`dev_eui` are given in the conventional MSB-first order and reversed here.
pub fn build_join_request<C: CryptoFactory>(
    factory: &C,
    app_key: &AppKey,
    app_eui: AppEui,
    dev_eui: DevEui,
    dev_nonce: DevNonce,
    out: &mut [u8; JOIN_REQUEST_LEN],
) -> Result<(), Error> {
    out[0] = Mhdr::new(MType::JoinRequest).0;
    memcpy_convert_endianess(&mut out[1..9], app_eui.as_ref());
    memcpy_convert_endianess(&mut out[9..17], dev_eui.as_ref());
    out[17..19].copy_from_slice(&dev_nonce.0.to_le_bytes());
    let mic = crypto::join_compute_mic(factory, app_key, &out[0..19]).map_err(|_| Error::MicMismatch)?;
    out[19..23].copy_from_slice(&mic.0);
    Ok(())
}

/// A parsed, MIC-validated Join-Request.
#[derive(Debug, Clone, Copy)]
pub struct JoinRequest {
    pub app_eui: AppEui,
    pub dev_eui: DevEui,
    pub dev_nonce: DevNonce,
}

pub fn parse_join_request<C: CryptoFactory>(
    factory: &C,
    app_key: &AppKey,
    bytes: &[u8],
) -> Result<JoinRequest, Error> {
    if bytes.len() != JOIN_REQUEST_LEN {
        return Err(Error::BufferTooShort);
    }
    let (mhdr, _) = parse_mhdr(bytes)?;
    if mhdr.mtype() != MType::JoinRequest {
        return Err(Error::InvalidMessageType);
    }
    let (body, mic) = split_tail_mic(bytes)?;
    let expect = crypto::join_compute_mic(factory, app_key, body).map_err(|_| Error::MicMismatch)?;
    if expect != mic {
        return Err(Error::MicMismatch);
    }
    let mut app_eui = [0u8; 8];
    memcpy_convert_endianess(&mut app_eui, &bytes[1..9]);
    let mut dev_eui = [0u8; 8];
    memcpy_convert_endianess(&mut dev_eui, &bytes[9..17]);
    let dev_nonce = DevNonce(u16::from_le_bytes([bytes[17], bytes[18]]));
    Ok(JoinRequest { app_eui: AppEui(app_eui), dev_eui: DevEui(dev_eui), dev_nonce })
}

// ---- Join-Accept -------------------------------------------------------------------------

/// The decrypted, MIC-validated contents of a Join-Accept.
#[derive(Debug, Clone, Copy)]
pub struct JoinAccept {
    pub app_nonce: AppNonce,
    pub net_id: NetId,
    pub dev_addr: DevAddr,
    pub dl_settings: DlSettings,
    pub rx_delay: RxDelay,
    pub cf_list: Option<CfList>,
}

/// Parses a wire Join-Accept (`MHDR` followed by 16 or 32 encrypted bytes), decrypting and
/// validating the MIC in place. `bytes` must be exactly 17 or 33 bytes.
pub fn parse_join_accept<C: CryptoFactory>(
    factory: &C,
    app_key: &AppKey,
    bytes: &[u8],
    scratch: &mut [u8; 32],
) -> Result<JoinAccept, Error> {
    if bytes.len() != 17 && bytes.len() != 33 {
        return Err(Error::BufferTooShort);
    }
    let (mhdr, _) = parse_mhdr(bytes)?;
    if mhdr.mtype() != MType::JoinAccept {
        return Err(Error::InvalidMessageType);
    }
    let body_len = bytes.len() - 1;
    scratch[..body_len].copy_from_slice(&bytes[1..]);
    crypto::join_decrypt(factory, app_key, &mut scratch[..body_len]).map_err(|_| Error::MicMismatch)?;

    let mut mic_input = [0u8; 33];
    mic_input[0] = bytes[0];
    mic_input[1..1 + body_len - 4].copy_from_slice(&scratch[..body_len - 4]);
    let expect = crypto::join_compute_mic(factory, app_key, &mic_input[..1 + body_len - 4])
        .map_err(|_| Error::MicMismatch)?;
    let mut mic = [0u8; 4];
    mic.copy_from_slice(&scratch[body_len - 4..body_len]);
    if expect.0 != mic {
        return Err(Error::MicMismatch);
    }

    let app_nonce = AppNonce([scratch[0], scratch[1], scratch[2]]);
    let net_id = NetId([scratch[3], scratch[4], scratch[5]]);
    let dev_addr = DevAddr::from_le_bytes([scratch[6], scratch[7], scratch[8], scratch[9]]);
    let dl_settings = DlSettings(scratch[10]);
    let rx_delay = RxDelay(scratch[11]);
    let cf_list = if body_len == 32 {
        let mut cf = [0u8; 16];
        cf.copy_from_slice(&scratch[12..28]);
        Some(cf)
    } else {
        None
    };
    Ok(JoinAccept { app_nonce, net_id, dev_addr, dl_settings, rx_delay, cf_list })
}

// ---- Data frames --------------------------------------------------------------------------

/// Port 0 marks a MAC-command-only `FRMPayload`; any other value is an application port.
pub const MAC_COMMAND_FPORT: u8 = 0;

/// Everything needed to assemble one uplink data frame. `fopts` are piggy-backed MAC commands
/// (only legal when `fport != Some(0)`, per spec's 6-step build rule); if there are more MAC
/// commands pending than fit in `FOpts`, the caller must instead send them as the FRMPayload of
/// a dedicated FPort-0 frame and leave `fopts` empty here.
pub struct DataUplinkParams<'a> {
    pub confirmed: bool,
    pub dev_addr: DevAddr,
    pub fctrl_adr: bool,
    pub fctrl_adr_ack_req: bool,
    pub fctrl_ack: bool,
    pub fcnt: u16,
    pub fopts: &'a [u8],
    pub fport: Option<u8>,
    pub frm_payload: &'a [u8],
}

/// Builds an uplink data frame into `out`, returning the number of bytes written.
///
/// Build order (spec's 6-step rule): MHDR, FHDR (DevAddr/FCtrl/FCnt/FOpts), FPort (omitted iff
/// FRMPayload is empty), FRMPayload encrypted under NwkSKey (FPort 0) or AppSKey (FPort != 0),
/// then the MIC computed over the whole assembled frame under NwkSKey.
pub fn build_data_uplink<C: CryptoFactory>(
    factory: &C,
    nwk_skey: &AES128,
    app_skey: &AES128,
    p: &DataUplinkParams,
    fcnt32: u32,
    out: &mut [u8],
) -> Result<usize, Error> {
    let fopts_len = p.fopts.len();
    if fopts_len > 15 {
        return Err(Error::BufferTooShort);
    }
    let has_port = p.fport.is_some() || !p.frm_payload.is_empty();
    let needed = 1 + 7 + fopts_len + if has_port { 1 } else { 0 } + p.frm_payload.len() + 4;
    if out.len() < needed {
        return Err(Error::BufferTooShort);
    }

    let mtype = if p.confirmed { MType::ConfirmedDataUp } else { MType::UnconfirmedDataUp };
    out[0] = Mhdr::new(mtype).0;
    out[1..5].copy_from_slice(&p.dev_addr.to_le_bytes());
    out[5] = FCtrl::new(p.fctrl_adr, p.fctrl_adr_ack_req, p.fctrl_ack, fopts_len as u8).0;
    out[6..8].copy_from_slice(&p.fcnt.to_le_bytes());
    out[8..8 + fopts_len].copy_from_slice(p.fopts);
    let mut cursor = 8 + fopts_len;

    if has_port {
        let fport = p.fport.unwrap_or(1);
        out[cursor] = fport;
        cursor += 1;
        let payload_start = cursor;
        out[cursor..cursor + p.frm_payload.len()].copy_from_slice(p.frm_payload);
        cursor += p.frm_payload.len();
        let key = if fport == MAC_COMMAND_FPORT { nwk_skey } else { app_skey };
        crypto::payload_encrypt(
            factory,
            key,
            p.dev_addr,
            Direction::Up,
            fcnt32,
            &mut out[payload_start..cursor],
        )
        .map_err(|_| Error::MicMismatch)?;
    }

    let mic = crypto::compute_mic(factory, nwk_skey, p.dev_addr, Direction::Up, fcnt32, &out[0..cursor])
        .map_err(|_| Error::MicMismatch)?;
    out[cursor..cursor + 4].copy_from_slice(&mic.0);
    Ok(cursor + 4)
}

/// A parsed downlink data frame. `frm_payload` has already been decrypted in place by
/// [`parse_data_downlink`]; MAC commands riding in `FOpts` (or, if `fport == Some(0)`, in
/// `frm_payload`) are left for the caller to iterate with
/// [`crate::maccommands::DownlinkCommandIter`].
#[derive(Debug, Clone, Copy)]
pub struct DataDownlink<'a> {
    pub confirmed: bool,
    pub dev_addr: DevAddr,
    pub fctrl: FCtrl,
    pub fcnt: u16,
    pub fopts: &'a [u8],
    pub fport: Option<u8>,
    pub frm_payload: &'a [u8],
}

/// Parses and decrypts a downlink data frame in place. `fcnt32` is the full reconstructed frame
/// counter (rollover already resolved by the caller) used both for MIC validation and payload
/// decryption.
pub fn parse_data_downlink<'a, C: CryptoFactory>(
    factory: &C,
    nwk_skey: &AES128,
    app_skey: &AES128,
    bytes: &'a mut [u8],
    fcnt32: u32,
) -> Result<DataDownlink<'a>, Error> {
    if bytes.len() < 12 {
        return Err(Error::BufferTooShort);
    }
    let (mhdr, _) = parse_mhdr(bytes)?;
    let confirmed = match mhdr.mtype() {
        MType::UnconfirmedDataDown => false,
        MType::ConfirmedDataDown => true,
        _ => return Err(Error::InvalidMessageType),
    };
    let dev_addr = DevAddr::from_le_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
    let fctrl = FCtrl(bytes[5]);
    let fcnt = u16::from_le_bytes([bytes[6], bytes[7]]);
    let fopts_len = fctrl.f_opts_len() as usize;
    if bytes.len() < 8 + fopts_len + 4 {
        return Err(Error::BufferTooShort);
    }

    let body_end = bytes.len() - 4;
    {
        let (body, mic_bytes) = bytes.split_at(body_end);
        let mut m = [0u8; 4];
        m.copy_from_slice(mic_bytes);
        let expect = crypto::compute_mic(factory, nwk_skey, dev_addr, Direction::Down, fcnt32, body)
            .map_err(|_| Error::MicMismatch)?;
        if expect.0 != m {
            return Err(Error::MicMismatch);
        }
    }

    let fport_pos = 8 + fopts_len;
    let (fport, payload_start) = if fport_pos < body_end {
        (Some(bytes[fport_pos]), fport_pos + 1)
    } else {
        (None, fport_pos)
    };

    if payload_start < body_end {
        let key = match fport {
            Some(MAC_COMMAND_FPORT) => nwk_skey,
            _ => app_skey,
        };
        crypto::payload_encrypt(factory, key, dev_addr, Direction::Down, fcnt32, &mut bytes[payload_start..body_end])
            .map_err(|_| Error::MicMismatch)?;
    }

    let fopts_range = 8..8 + fopts_len;
    let frm_range = payload_start..body_end;
    // SAFETY-free split: fopts_range and frm_range never overlap (fopts end <= fport_pos <=
    // payload_start), so two immutable borrows of disjoint sub-slices are fine.
    let (fopts, frm_payload) = {
        let base = bytes as &[u8];
        (&base[fopts_range], &base[frm_range])
    };

    Ok(DataDownlink { confirmed, dev_addr, fctrl, fcnt, fopts, fport, frm_payload })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::default_crypto::DefaultFactory;

    #[test]
    fn join_request_round_trips() {
        let app_key = AppKey::from([0x2b; 16]);
        let app_eui = AppEui([1, 2, 3, 4, 5, 6, 7, 8]);
        let dev_eui = DevEui([8, 7, 6, 5, 4, 3, 2, 1]);
        let dev_nonce = DevNonce(0x1234);
        let mut buf = [0u8; JOIN_REQUEST_LEN];
        build_join_request(&DefaultFactory, &app_key, app_eui, dev_eui, dev_nonce, &mut buf).unwrap();
        let parsed = parse_join_request(&DefaultFactory, &app_key, &buf).unwrap();
        assert_eq!(parsed.app_eui.0, app_eui.0);
        assert_eq!(parsed.dev_eui.0, dev_eui.0);
        assert_eq!(parsed.dev_nonce.0, dev_nonce.0);
    }

    #[test]
    fn data_uplink_unconfirmed_no_payload_round_trips_as_downlink_shape() {
        let nwk = AES128([1; 16]);
        let app = AES128([2; 16]);
        let params = DataUplinkParams {
            confirmed: false,
            dev_addr: DevAddr(0xAABBCCDD),
            fctrl_adr: false,
            fctrl_adr_ack_req: false,
            fctrl_ack: false,
            fcnt: 5,
            fopts: &[],
            fport: Some(1),
            frm_payload: b"hi",
        };
        let mut buf = [0u8; 64];
        let n = build_data_uplink(&DefaultFactory, &nwk, &app, &params, 5, &mut buf).unwrap();
        assert_eq!(n, 1 + 7 + 1 + 2 + 4);
        assert_eq!(MType::from_bits(buf[0] >> 5), MType::UnconfirmedDataUp);
    }
}
