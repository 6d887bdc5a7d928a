#![cfg_attr(not(test), no_std)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! ## Feature flags
#![doc = document_features::document_features!(feature_label = r#"<span class="stab portability"><code>{feature}</code></span>"#)]

#[macro_use]
mod fmt;

pub mod dispatcher;
pub mod duty_cycle;
pub mod mac;
pub mod radio;
pub mod region;
pub mod rng;
pub mod timer;

pub use mac::otaa::NetworkCredentials;
pub use rng::Prng;

#[cfg(feature = "default-crypto")]
#[cfg_attr(docsrs, doc(cfg(feature = "default-crypto")))]
pub use lorawan::default_crypto;
pub use lorawan::keys::{AppEui, AppKey, CryptoFactory, DevEui};
pub use lorawan::types::DevAddr;
pub use rand_core::RngCore;

/// The application payload and FPort of a delivered downlink message.
pub struct Downlink {
    pub data: heapless::Vec<u8, 256>,
    pub fport: u8,
}

#[cfg(feature = "defmt-03")]
impl defmt::Format for Downlink {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "Downlink {{ fport: {}, data: ", self.fport);
        for byte in self.data.iter() {
            defmt::write!(f, "{:02x}", byte);
        }
        defmt::write!(f, " }}")
    }
}

/// Lets the integrator fine-tune when a receive window actually opens relative to the nominal
/// delay, to compensate for board-specific radio warm-up latency. `Mac` itself never owns a radio
/// instance (see `dispatcher`'s `Action`-passing design), so this trait is implemented by the
/// caller's own radio driver and applied to the delay carried in an `Action::ArmTimer { tag:
/// TimerTag::RxWindow1 | RxWindow2, .. }` before arming the real timer.
pub trait Timings {
    /// Offset in milliseconds from the nominal window start. A positive value tells the stack to
    /// begin configuring the receive window that many milliseconds early.
    fn get_rx_window_offset_ms(&self) -> i32;

    /// How long to leave the receive window open, in milliseconds.
    fn get_rx_window_duration_ms(&self) -> u32;
}
