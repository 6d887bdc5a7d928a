//! End-to-end coverage of the MAC engine's documented operating scenarios: a full OTAA join,
//! an application-driven datarate change, duplicate-downlink suppression, the confirmed-uplink
//! retry ladder with its datarate back-off, downlink frame-counter rollover, and the EU868
//! mandatory duty-cycle deferring a second transmission. Each scenario drives `Mac` purely
//! through its public API, the way a dispatcher (see `src/dispatcher.rs`) would.
use lora_modulation::{Bandwidth, CodingRate, SpreadingFactor};
use lorawan::default_crypto::DefaultFactory;
use lorawan::frame::{Mhdr, MType};
use lorawan::keys::{AppEui, AppKey, DevEui, Direction, AES128};
use lorawan::types::DevAddr;
use lorawan_device::mac::otaa::NetworkCredentials;
use lorawan_device::mac::session::Session;
use lorawan_device::mac::types::*;
use lorawan_device::mac::{Action, Mac, TimerTag};
use lorawan_device::radio::BaseBandModulationParams;
use lorawan_device::region::eu868::Eu868;
use rand_core::{Error as RngError, RngCore};

type TestMac = Mac<DefaultFactory, Eu868, 256>;

/// An `RngCore` that always yields the same word, so the tests that need a random nonce or an
/// ack-timeout jitter value are deterministic.
struct FixedRng(u32);

impl RngCore for FixedRng {
    fn next_u32(&mut self) -> u32 {
        self.0
    }
    fn next_u64(&mut self) -> u64 {
        self.0 as u64
    }
    fn fill_bytes(&mut self, dest: &mut [u8]) {
        for b in dest.iter_mut() {
            *b = self.0 as u8;
        }
    }
    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), RngError> {
        self.fill_bytes(dest);
        Ok(())
    }
}

fn dev_eui() -> DevEui {
    DevEui([0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08])
}

fn app_eui() -> AppEui {
    AppEui([0x0A, 0x0B, 0x0C, 0x0D, 0x0E, 0x0F, 0x10, 0x11])
}

fn app_key() -> AppKey {
    AppKey::from([0x2b; 16])
}

/// Forges a valid Join-Accept wire frame the way the network side would, duplicated from
/// `lorawan-encoding/tests/frames.rs`'s helper of the same name since it is a standalone crate.
fn forge_join_accept(key: &AppKey, app_nonce: [u8; 3], net_id: [u8; 3], dev_addr: DevAddr, rx_delay: u8) -> [u8; 17] {
    let mhdr = Mhdr::new(MType::JoinAccept).0;
    let mut cleartext = [0u8; 12];
    cleartext[0..3].copy_from_slice(&app_nonce);
    cleartext[3..6].copy_from_slice(&net_id);
    cleartext[6..10].copy_from_slice(&dev_addr.to_le_bytes());
    cleartext[10] = 0x00;
    cleartext[11] = rx_delay;

    let mut mic_input = [0u8; 13];
    mic_input[0] = mhdr;
    mic_input[1..13].copy_from_slice(&cleartext);
    let mic = lorawan::crypto::join_compute_mic(&DefaultFactory, key, &mic_input).unwrap();

    let mut plaintext_block = [0u8; 16];
    plaintext_block[..12].copy_from_slice(&cleartext);
    plaintext_block[12..16].copy_from_slice(&mic.0);

    use aes::cipher::{generic_array::GenericArray as GA, BlockDecrypt, KeyInit};
    let cipher = aes::Aes128::new(GA::from_slice(&key.0 .0));
    let mut block = GA::clone_from_slice(&plaintext_block);
    BlockDecrypt::decrypt_block(&cipher, &mut block);

    let mut out = [0u8; 17];
    out[0] = mhdr;
    out[1..17].copy_from_slice(&block);
    out
}

/// Hand-builds a valid downlink wire frame under known session keys, mirroring
/// `lorawan-encoding/tests/frames.rs`'s `data_downlink_decrypts_payload_and_validates_mic`.
fn build_downlink(
    nwk_skey: &AES128,
    app_skey: &AES128,
    dev_addr: DevAddr,
    fcnt: u32,
    confirmed: bool,
    fport: u8,
    payload: &[u8],
) -> heapless::Vec<u8, 64> {
    let mut buf = [0u8; 64];
    buf[0] = Mhdr::new(if confirmed { MType::ConfirmedDataDown } else { MType::UnconfirmedDataDown }).0;
    buf[1..5].copy_from_slice(&dev_addr.to_le_bytes());
    buf[5] = 0x00;
    buf[6..8].copy_from_slice(&(fcnt as u16).to_le_bytes());
    buf[8] = fport;
    let payload_start = 9;
    buf[payload_start..payload_start + payload.len()].copy_from_slice(payload);
    let mut cursor = payload_start + payload.len();
    lorawan::crypto::payload_encrypt(&DefaultFactory, app_skey, dev_addr, Direction::Down, fcnt, &mut buf[payload_start..cursor]).unwrap();
    let mic = lorawan::crypto::compute_mic(&DefaultFactory, nwk_skey, dev_addr, Direction::Down, fcnt, &buf[0..cursor]).unwrap();
    buf[cursor..cursor + 4].copy_from_slice(&mic.0);
    cursor += 4;
    let mut out = heapless::Vec::new();
    let _ = out.extend_from_slice(&buf[..cursor]);
    out
}

/// Scenario 1's fixture: joins `mac` over a forged Join-Accept and returns it together with the
/// independently-derived session keys and DevAddr, so later scenarios can forge matching
/// downlinks without reaching into `Mac`'s private `Session`.
fn join_mac() -> (TestMac, AES128, AES128, DevAddr) {
    let mut mac: TestMac = Mac::new(DefaultFactory, Eu868::new(), 0);
    let credentials = NetworkCredentials { dev_eui: dev_eui(), app_eui: app_eui(), app_key: app_key() };
    let mut rng = FixedRng(0x1234);
    let action = mac.mlme_join(credentials, 1, &mut rng, 0).unwrap();
    assert!(matches!(action, Action::Tx { .. }));

    let app_nonce = [0x01, 0x02, 0x03];
    let net_id = [0x04, 0x05, 0x06];
    let dev_addr = DevAddr(0x0708_0910);
    let mut accept_bytes = forge_join_accept(&app_key(), app_nonce, net_id, dev_addr, 1);
    let outcome = mac.handle_rx_done(&mut accept_bytes, -50, 7, RxSlot::Win1, 1000);
    assert_eq!(outcome.mlme_confirm.unwrap().status, Some(EventStatus::Ok));
    assert!(mac.is_joined());

    let (nwk_skey, app_skey) =
        lorawan::crypto::derive_session_keys(&DefaultFactory, &app_key(), app_nonce, net_id, 0x1234).unwrap();
    (mac, nwk_skey.0, app_skey.0, dev_addr)
}

fn bb_for_dr(dr: u8) -> BaseBandModulationParams {
    const DR_TABLE: [(SpreadingFactor, Bandwidth); 8] = [
        (SpreadingFactor::_12, Bandwidth::_125KHz),
        (SpreadingFactor::_11, Bandwidth::_125KHz),
        (SpreadingFactor::_10, Bandwidth::_125KHz),
        (SpreadingFactor::_9, Bandwidth::_125KHz),
        (SpreadingFactor::_8, Bandwidth::_125KHz),
        (SpreadingFactor::_7, Bandwidth::_125KHz),
        (SpreadingFactor::_7, Bandwidth::_250KHz),
        (SpreadingFactor::_7, Bandwidth::_125KHz),
    ];
    let (sf, bw) = DR_TABLE[dr.min(7) as usize];
    BaseBandModulationParams::new(sf, bw, CodingRate::_4_5)
}

// ---- Scenario 1: OTAA join success -----------------------------------------------------------

#[test]
fn otaa_join_succeeds_and_leaves_the_device_joined() {
    let (mac, _nwk, _app, dev_addr) = join_mac();
    assert_eq!(mac.mib_get(MibAttribute::DevAddr), Ok(MibValue::DevAddr(dev_addr)));
    assert_eq!(mac.mib_get(MibAttribute::NetworkJoined), Ok(MibValue::Bool(true)));
}

// ---- Scenario 2: Set DR and echo -------------------------------------------------------------

#[test]
fn mcps_request_with_an_explicit_data_rate_is_carried_into_the_tx_config() {
    let (mut mac, _nwk, _app, _dev_addr) = join_mac();
    let req = McpsRequest { kind: McpsRequestKind::Unconfirmed, fport: 1, data: b"hi", data_rate: Some(3) };
    let action = mac.mcps_request(req, 2000).unwrap();
    match action {
        Action::Tx { config, .. } => assert_eq!(config.rf.bb, bb_for_dr(3)),
        other => panic!("expected Action::Tx, got {other:?}"),
    }
}

// ---- Scenario 3: Duplicate downlink -----------------------------------------------------------

#[test]
fn duplicate_unconfirmed_downlink_is_reported_as_repeated_and_not_redelivered() {
    let (mut mac, nwk, app, dev_addr) = join_mac();
    let mut first = build_downlink(&nwk, &app, dev_addr, 1, false, 1, b"hello");
    let outcome = mac.handle_rx_done(&mut first, -40, 9, RxSlot::Win1, 3000);
    assert!(outcome.mcps_confirm.is_none());
    let ind = mac.take_indication().expect("first delivery should produce an indication");
    assert_eq!(&ind.data[..], b"hello");

    let mut second = build_downlink(&nwk, &app, dev_addr, 1, false, 1, b"hello");
    let outcome = mac.handle_rx_done(&mut second, -40, 9, RxSlot::Win1, 3100);
    assert_eq!(outcome.mcps_confirm.unwrap().status, Some(EventStatus::DownlinkRepeated));
    assert!(mac.take_indication().is_none());
}

// ---- Scenario 4: Confirmed-uplink retry with datarate degradation -----------------------------

#[cfg(feature = "test-hooks")]
#[test]
fn confirmed_uplink_retry_ladder_degrades_datarate_every_second_retry() {
    let (mut mac, _nwk, _app, _dev_addr) = join_mac();
    mac.test_set_duty_cycle_on(false);
    mac.set_datarate(5);
    let mut rng = FixedRng(0);

    let req = McpsRequest { kind: McpsRequestKind::Confirmed { nb_trials: 4 }, fport: 1, data: b"hi", data_rate: None };
    let action = mac.mcps_request(req, 0).unwrap();
    let mut observed = heapless::Vec::<BaseBandModulationParams, 8>::new();
    match action {
        Action::Tx { config, .. } => {
            let _ = observed.push(config.rf.bb);
        }
        other => panic!("expected Action::Tx, got {other:?}"),
    }

    let mut now_ms = 0u64;
    let mut final_confirm = None;
    loop {
        now_ms += 10;
        let tx_done = mac.handle_tx_done(now_ms);
        assert!(matches!(tx_done, Action::ArmTimer { tag: TimerTag::RxWindow1, .. }));
        let (_rx1, timer2) = mac.handle_rx_window1();
        assert!(matches!(timer2, Action::ArmTimer { tag: TimerTag::RxWindow2, .. }));
        assert_eq!(mac.handle_rx_timeout(RxSlot::Win1), Action::None);
        assert!(matches!(mac.handle_rx_timeout(RxSlot::Win2), Action::ArmTimer { tag: TimerTag::MacStateCheck, .. }));

        let (outcome, action) = mac.on_mac_state_check(&mut rng, now_ms);
        match action {
            Action::Tx { config, .. } => {
                let _ = observed.push(config.rf.bb);
            }
            _ => {
                final_confirm = outcome.mcps_confirm;
                break;
            }
        }
    }

    // One initial transmission at DR5 plus four retries, degrading every *second* retry
    // (spec §4.4.3's ack-timeout ladder): DR5, DR4, DR4, DR3, DR3.
    let mut expected = heapless::Vec::<BaseBandModulationParams, 8>::new();
    for dr in [5u8, 4, 4, 3, 3] {
        let _ = expected.push(bb_for_dr(dr));
    }
    assert_eq!(observed, expected);

    let confirm = final_confirm.expect("retry ladder must settle with an McpsConfirm");
    assert_eq!(confirm.nb_retries, 4);
    assert!(!confirm.ack_received);
}

// ---- Scenario 5: Downlink frame-counter rollover -----------------------------------------------

#[test]
fn downlink_fcnt_rollover_reconstructs_the_32_bit_counter() {
    let (reconstructed, rolled) = Session::reconstruct_fcnt(0x0000_FFFE, 0x0002);
    assert_eq!(reconstructed, 0x0001_0002);
    assert!(rolled);
}

// ---- Scenario 6: Duty-cycle defers a second back-to-back transmission -------------------------

#[test]
fn mandatory_duty_cycle_defers_a_second_transmission_sent_immediately_after_the_first() {
    let (mut mac, _nwk, _app, _dev_addr) = join_mac();

    let req = McpsRequest { kind: McpsRequestKind::Unconfirmed, fport: 1, data: b"hi", data_rate: None };
    let first = mac.mcps_request(req, 0).unwrap();
    assert!(matches!(first, Action::Tx { .. }));

    let tx_done = mac.handle_tx_done(0);
    assert!(matches!(tx_done, Action::ArmTimer { tag: TimerTag::RxWindow1, .. }));
    let (_rx1, _timer2) = mac.handle_rx_window1();
    assert_eq!(mac.handle_rx_timeout(RxSlot::Win1), Action::None);
    assert!(matches!(mac.handle_rx_timeout(RxSlot::Win2), Action::ArmTimer { tag: TimerTag::MacStateCheck, .. }));
    let mut rng = FixedRng(0);
    let (_outcome, settle_action) = mac.on_mac_state_check(&mut rng, 1);
    assert_eq!(settle_action, Action::Idle);

    let req2 = McpsRequest { kind: McpsRequestKind::Unconfirmed, fport: 1, data: b"hi", data_rate: None };
    let second = mac.mcps_request(req2, 2).unwrap();
    match second {
        Action::ArmTimer { tag: TimerTag::TxDelayed, delay_ms } => assert!(delay_ms > 0),
        other => panic!("expected the EU868 mandatory duty cycle to defer the second send, got {other:?}"),
    }
}
