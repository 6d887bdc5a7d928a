//! Join-Request construction and Join-Accept processing, grounded in the teacher's
//! `mac::otaa` module.
use lorawan::frame::{self, JOIN_REQUEST_LEN};
use lorawan::keys::{AppEui, AppKey, CryptoFactory, DevEui};
use lorawan::types::DevNonce;
use rand_core::RngCore;

use crate::mac::session::Session;
use crate::mac::types::EventStatus;
use crate::region::RegionPhy;

#[derive(Debug, Clone, Copy)]
pub struct NetworkCredentials {
    pub dev_eui: DevEui,
    pub app_eui: AppEui,
    pub app_key: AppKey,
}

pub struct Otaa {
    pub credentials: NetworkCredentials,
    pub dev_nonce: DevNonce,
}

impl Otaa {
    pub fn new(credentials: NetworkCredentials) -> Self {
        Otaa { credentials, dev_nonce: DevNonce(0) }
    }

    /// Builds the 23-byte Join-Request, drawing a fresh `DevNonce` from `rng` as required on
    /// every join attempt (spec §4.4.1).
    pub fn prepare_buffer<C: CryptoFactory, R: RngCore>(
        &mut self,
        factory: &C,
        rng: &mut R,
        out: &mut [u8; JOIN_REQUEST_LEN],
    ) -> Result<(), frame::Error> {
        self.dev_nonce = DevNonce(rng.next_u32() as u16);
        frame::build_join_request(
            factory,
            &self.credentials.app_key,
            self.credentials.app_eui,
            self.credentials.dev_eui,
            self.dev_nonce,
            out,
        )
    }

    /// Processes a Join-Accept frame, returning the derived [`Session`], the RX1 delay the
    /// network requested (0 meaning "use the 1-second default"), and the `DLSettings` byte's
    /// RX1 DR offset / RX2 datarate (spec §4.2's `DlSettings` bitfield).
    pub fn handle_rx<C: CryptoFactory, R: RegionPhy>(
        &self,
        factory: &C,
        region: &mut R,
        bytes: &[u8],
    ) -> Result<(Session, u32, u8, u8), EventStatus> {
        let mut scratch = [0u8; 32];
        let accept = frame::parse_join_accept(factory, &self.credentials.app_key, bytes, &mut scratch)
            .map_err(|_| EventStatus::MicFail)?;

        if let Some(cf_list) = accept.cf_list {
            let _ = region.apply_cf_list(cf_list);
        }

        let session = Session::derive_new(factory, &self.credentials.app_key, &accept, self.dev_nonce);
        let rx1_delay_ms = accept.rx_delay.as_seconds() as u32 * 1000;
        Ok((session, rx1_delay_ms, accept.dl_settings.rx1_dr_offset(), accept.dl_settings.rx2_data_rate()))
    }
}
