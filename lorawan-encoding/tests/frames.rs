//! End-to-end wire-format coverage for the frame codec, independent of the `MacCore` state
//! machine (which has its own scenario tests in the `lorawan-device` crate).
use lorawan::crypto;
use lorawan::default_crypto::DefaultFactory;
use lorawan::frame::{
    build_data_uplink, build_join_request, parse_data_downlink, parse_join_accept, parse_join_request,
    DataUplinkParams, Mhdr, MType, JOIN_REQUEST_LEN,
};
use lorawan::keys::{AppEui, AppKey, DevEui, Direction, AES128};
use lorawan::types::{DevAddr, DevNonce};

const DEV_EUI: DevEui = DevEui([0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]);
const APP_EUI: AppEui = AppEui([0x0A, 0x0B, 0x0C, 0x0D, 0x0E, 0x0F, 0x10, 0x11]);
const DEV_NONCE: DevNonce = DevNonce(0x1234);

fn app_key() -> AppKey {
    let mut bytes = [0u8; 16];
    for (i, b) in bytes.iter_mut().enumerate() {
        *b = i as u8;
    }
    AppKey::from(bytes)
}

#[test]
fn join_request_matches_documented_wire_layout() {
    let key = app_key();
    let mut buf = [0u8; JOIN_REQUEST_LEN];
    build_join_request(&DefaultFactory, &key, APP_EUI, DEV_EUI, DEV_NONCE, &mut buf).unwrap();

    assert_eq!(buf[0], Mhdr::new(MType::JoinRequest).0);
    // AppEUI/DevEUI are carried wire-order (LSB-first), i.e. reversed from the MSB-first constants.
    let mut wire_app_eui = APP_EUI.0;
    wire_app_eui.reverse();
    assert_eq!(&buf[1..9], &wire_app_eui[..]);
    let mut wire_dev_eui = DEV_EUI.0;
    wire_dev_eui.reverse();
    assert_eq!(&buf[9..17], &wire_dev_eui[..]);
    assert_eq!(&buf[17..19], &DEV_NONCE.0.to_le_bytes()[..]);

    let parsed = parse_join_request(&DefaultFactory, &key, &buf).unwrap();
    assert_eq!(parsed.app_eui.0, APP_EUI.0);
    assert_eq!(parsed.dev_eui.0, DEV_EUI.0);
    assert_eq!(parsed.dev_nonce.0, DEV_NONCE.0);
}

#[test]
fn join_request_rejects_tampered_mic() {
    let key = app_key();
    let mut buf = [0u8; JOIN_REQUEST_LEN];
    build_join_request(&DefaultFactory, &key, APP_EUI, DEV_EUI, DEV_NONCE, &mut buf).unwrap();
    buf[22] ^= 0xFF;
    assert!(parse_join_request(&DefaultFactory, &key, &buf).is_err());
}

/// Forges a valid Join-Accept wire frame the way the network side would: the network's
/// "encryption" of a Join-Accept is a plain AES *decrypt*, the reverse of what
/// [`lorawan::crypto::join_decrypt`] (the device side) performs.
fn forge_join_accept(app_key: &AppKey, app_nonce: [u8; 3], net_id: [u8; 3], dev_addr: DevAddr, dl_settings: u8, rx_delay: u8) -> [u8; 17] {
    let mhdr = Mhdr::new(MType::JoinAccept).0;
    let mut cleartext = [0u8; 12];
    cleartext[0..3].copy_from_slice(&app_nonce);
    cleartext[3..6].copy_from_slice(&net_id);
    cleartext[6..10].copy_from_slice(&dev_addr.to_le_bytes());
    cleartext[10] = dl_settings;
    cleartext[11] = rx_delay;

    let mut mic_input = [0u8; 13];
    mic_input[0] = mhdr;
    mic_input[1..13].copy_from_slice(&cleartext);
    let mic = crypto::join_compute_mic(&DefaultFactory, app_key, &mic_input).unwrap();

    let mut plaintext_block = [0u8; 16];
    plaintext_block[..12].copy_from_slice(&cleartext);
    plaintext_block[12..16].copy_from_slice(&mic.0);

    use aes::cipher::{generic_array::GenericArray as GA, BlockDecrypt, KeyInit};
    let cipher = aes::Aes128::new(GA::from_slice(&app_key.0 .0));
    let mut block = GA::clone_from_slice(&plaintext_block);
    BlockDecrypt::decrypt_block(&cipher, &mut block);

    let mut out = [0u8; 17];
    out[0] = mhdr;
    out[1..17].copy_from_slice(&block);
    out
}

#[test]
fn join_accept_round_trips_through_forged_network_side_encryption() {
    let key = app_key();
    let dev_addr = DevAddr(0x0708_0910);
    let bytes = forge_join_accept(&key, [0x01, 0x02, 0x03], [0x04, 0x05, 0x06], dev_addr, 0x00, 0x01);

    let mut scratch = [0u8; 32];
    let accept = parse_join_accept(&DefaultFactory, &key, &bytes, &mut scratch).unwrap();
    assert_eq!(accept.app_nonce.0, [0x01, 0x02, 0x03]);
    assert_eq!(accept.net_id.0, [0x04, 0x05, 0x06]);
    assert_eq!(accept.dev_addr, dev_addr);
    assert_eq!(accept.rx_delay.as_seconds(), 1);
    assert!(accept.cf_list.is_none());
}

/// As [`forge_join_accept`], but appends a 16-byte CFList before the MIC, producing the 33-byte
/// wire form.
fn forge_join_accept_with_cf_list(
    app_key: &AppKey,
    app_nonce: [u8; 3],
    net_id: [u8; 3],
    dev_addr: DevAddr,
    dl_settings: u8,
    rx_delay: u8,
    cf_list: [u8; 16],
) -> [u8; 33] {
    let mhdr = Mhdr::new(MType::JoinAccept).0;
    let mut cleartext = [0u8; 28];
    cleartext[0..3].copy_from_slice(&app_nonce);
    cleartext[3..6].copy_from_slice(&net_id);
    cleartext[6..10].copy_from_slice(&dev_addr.to_le_bytes());
    cleartext[10] = dl_settings;
    cleartext[11] = rx_delay;
    cleartext[12..28].copy_from_slice(&cf_list);

    let mut mic_input = [0u8; 29];
    mic_input[0] = mhdr;
    mic_input[1..29].copy_from_slice(&cleartext);
    let mic = crypto::join_compute_mic(&DefaultFactory, app_key, &mic_input).unwrap();

    let mut plaintext = [0u8; 32];
    plaintext[..28].copy_from_slice(&cleartext);
    plaintext[28..32].copy_from_slice(&mic.0);

    use aes::cipher::{generic_array::GenericArray as GA, BlockDecrypt, KeyInit};
    let cipher = aes::Aes128::new(GA::from_slice(&app_key.0 .0));
    let mut out = [0u8; 33];
    out[0] = mhdr;
    for (chunk_in, chunk_out) in plaintext.chunks_exact(16).zip(out[1..].chunks_exact_mut(16)) {
        let mut block = GA::clone_from_slice(chunk_in);
        BlockDecrypt::decrypt_block(&cipher, &mut block);
        chunk_out.copy_from_slice(&block);
    }
    out
}

#[test]
fn join_accept_with_cf_list_round_trips() {
    let key = app_key();
    let dev_addr = DevAddr(0x0708_0910);
    let cf_list = [0x11; 16];
    let bytes =
        forge_join_accept_with_cf_list(&key, [0x01, 0x02, 0x03], [0x04, 0x05, 0x06], dev_addr, 0x00, 0x01, cf_list);

    let mut scratch = [0u8; 32];
    let accept = parse_join_accept(&DefaultFactory, &key, &bytes, &mut scratch).unwrap();
    assert_eq!(accept.dev_addr, dev_addr);
    assert_eq!(accept.cf_list, Some(cf_list));
}

#[test]
fn join_accept_rejects_corrupted_body() {
    let key = app_key();
    let mut bytes = forge_join_accept(&key, [0x01, 0x02, 0x03], [0x04, 0x05, 0x06], DevAddr(0x0708_0910), 0x00, 0x01);
    bytes[3] ^= 0xFF;
    let mut scratch = [0u8; 32];
    assert!(parse_join_accept(&DefaultFactory, &key, &bytes, &mut scratch).is_err());
}

#[test]
fn data_uplink_fctrl_ack_and_adr_ack_req_bits_survive_to_a_downlink_style_read() {
    // Regression for the bit positions of FCtrl's ADRACKReq/ACK fields: ADRACKReq occupies 0x40,
    // ACK occupies 0x20, independent of FOptsLen.
    let nwk = AES128([1; 16]);
    let app = AES128([2; 16]);
    let params = DataUplinkParams {
        confirmed: true,
        dev_addr: DevAddr(0xAABBCCDD),
        fctrl_adr: true,
        fctrl_adr_ack_req: true,
        fctrl_ack: true,
        fcnt: 42,
        fopts: &[],
        fport: Some(5),
        frm_payload: b"payload",
    };
    let mut buf = [0u8; 64];
    let n = build_data_uplink(&DefaultFactory, &nwk, &app, &params, 42, &mut buf).unwrap();
    let fctrl = buf[5];
    assert_eq!(fctrl & 0x80, 0x80, "ADR bit");
    assert_eq!(fctrl & 0x40, 0x40, "ADRACKReq bit");
    assert_eq!(fctrl & 0x20, 0x20, "ACK bit");
    assert_eq!(fctrl & 0x0F, 0, "FOptsLen");
    assert_eq!(MType::from_bits(buf[0] >> 5), MType::ConfirmedDataUp);
    let _ = n;
}

#[test]
fn data_downlink_decrypts_payload_and_validates_mic() {
    let nwk = AES128([3; 16]);
    let app = AES128([4; 16]);
    let dev_addr = DevAddr(0x0708_0910);
    let fcnt: u32 = 9;

    // Hand-build an unconfirmed downlink frame the way build_data_uplink would for an uplink,
    // but with Direction::Down and the downlink MType.
    let mut buf = [0u8; 32];
    buf[0] = Mhdr::new(MType::UnconfirmedDataDown).0;
    buf[1..5].copy_from_slice(&dev_addr.to_le_bytes());
    buf[5] = 0x00; // FCtrl: no ADR, no FPending, no ACK, no FOpts.
    buf[6..8].copy_from_slice(&(fcnt as u16).to_le_bytes());
    buf[8] = 3; // FPort.
    let payload_start = 9;
    buf[payload_start..payload_start + 5].copy_from_slice(b"hello");
    let mut cursor = payload_start + 5;
    crypto::payload_encrypt(&DefaultFactory, &app, dev_addr, Direction::Down, fcnt, &mut buf[payload_start..cursor]).unwrap();
    let mic = crypto::compute_mic(&DefaultFactory, &nwk, dev_addr, Direction::Down, fcnt, &buf[0..cursor]).unwrap();
    buf[cursor..cursor + 4].copy_from_slice(&mic.0);
    cursor += 4;

    let parsed = parse_data_downlink(&DefaultFactory, &nwk, &app, &mut buf[..cursor], fcnt).unwrap();
    assert!(!parsed.confirmed);
    assert_eq!(parsed.dev_addr, dev_addr);
    assert_eq!(parsed.fport, Some(3));
    assert_eq!(parsed.frm_payload, b"hello");
}
