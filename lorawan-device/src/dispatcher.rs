//! The single-consumer event queue (spec §4.6 "Dispatcher" / §9 "deep ISR→MAC chain"): radio
//! callbacks, timer firings and application requests all reduce to "enqueue one event; return".
//!
//! The spec's source material models this as boxed closures pushed onto a queue. This crate is
//! `no_std` without `alloc`, so closures are replaced with a concrete [`Event`] enum carried over a
//! [`heapless::spsc::Queue`] — a deliberate, grounded redesign (see DESIGN.md) that keeps the
//! single-producer/single-consumer contract (an ISR or timer callback pushes, one dedicated
//! consumer drains and is the only caller permitted to touch [`crate::mac::Mac`]) without
//! allocation.
use heapless::spsc::{Consumer, Producer, Queue};

use crate::mac::otaa::NetworkCredentials;
use crate::mac::types::{McpsRequestKind, RxSlot};
use crate::mac::{Action, Mac, Outcome, TimerTag};
use crate::region::RegionPhy;
use lorawan::keys::CryptoFactory;
use rand_core::RngCore;

/// What the radio driver's interrupt shims observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioEvent {
    TxDone,
    RxDone { rssi: i16, snr: i8, rx_slot: RxSlot },
    RxTimeout { rx_slot: RxSlot },
    RxError { rx_slot: RxSlot },
}

/// A queued unit of work. Radio/timer variants carry only what the interrupt context observed
/// directly (received bytes themselves live in `Mac`'s own radio buffer, already written by the
/// radio driver before the event is enqueued, so no payload copy crosses the queue).
pub enum Event<const N: usize> {
    Radio(RadioEvent),
    TimerFired { tag: TimerTag },
    McStateCheck,
    MlmeJoin { credentials: NetworkCredentials, nb_trials: u32 },
    McpsRequest { kind: McpsRequestKind, fport: u8, data: heapless::Vec<u8, N>, data_rate: Option<u8> },
}

/// Fixed-capacity single-producer/single-consumer event queue. `CAP` bounds how many events may be
/// outstanding before a producer (an ISR shim) must drop or back-pressure; the spec assigns no
/// numeric bound, so `CAP` is left to the integrator.
pub struct Dispatcher<const N: usize, const CAP: usize> {
    queue: Queue<Event<N>, CAP>,
}

impl<const N: usize, const CAP: usize> Default for Dispatcher<N, CAP> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize, const CAP: usize> Dispatcher<N, CAP> {
    pub const fn new() -> Self {
        Dispatcher { queue: Queue::new() }
    }

    /// Splits into a producer half (for ISR/timer/app-request shims) and the single consumer half
    /// that alone may call into `Mac`.
    pub fn split(&mut self) -> (Producer<'_, Event<N>, CAP>, Consumer<'_, Event<N>, CAP>) {
        self.queue.split()
    }
}

/// Runs one queued event to completion against `mac`. Returns the `Outcome` to surface to the
/// application, the `Action` the caller's radio/timer shims must now perform, and — only for the
/// RX1-window case, which must both open a receive window and arm the RX2 timer — a second
/// follow-up `Action`. This is the dispatcher's entire job: no event may be processed except
/// through this function, and no two events may be in flight at once.
pub fn drain_one<C: CryptoFactory, R: RegionPhy, RNG: RngCore, const N: usize>(
    mac: &mut Mac<C, R, N>,
    rng: &mut RNG,
    now_ms: u64,
    event: Event<N>,
) -> (Outcome, Action, Option<Action>) {
    match event {
        Event::Radio(RadioEvent::TxDone) => (Outcome::default(), mac.handle_tx_done(now_ms), None),
        Event::Radio(RadioEvent::RxDone { rssi, snr, rx_slot }) => {
            let mut buf = [0u8; 256];
            let len = mac.radio_buffer().len().min(buf.len());
            buf[..len].copy_from_slice(&mac.radio_buffer()[..len]);
            let rx_outcome = mac.handle_rx_done(&mut buf[..len], rssi, snr, rx_slot, now_ms);
            let (check_outcome, action) = mac.on_mac_state_check(rng, now_ms);
            (rx_outcome.merge(check_outcome), action, None)
        }
        Event::Radio(RadioEvent::RxTimeout { rx_slot }) => (Outcome::default(), mac.handle_rx_timeout(rx_slot), None),
        Event::Radio(RadioEvent::RxError { rx_slot }) => (Outcome::default(), mac.handle_rx_error(rx_slot), None),
        Event::TimerFired { tag } => match tag {
            TimerTag::TxDelayed => (Outcome::default(), mac.handle_tx_delayed(now_ms), None),
            TimerTag::RxWindow1 => {
                let (rx_action, timer2) = mac.handle_rx_window1();
                (Outcome::default(), rx_action, Some(timer2))
            }
            TimerTag::RxWindow2 => {
                let (rx_action, ack_timer) = mac.handle_rx_window2(rng);
                (Outcome::default(), rx_action, ack_timer)
            }
            TimerTag::AckTimeout | TimerTag::MacStateCheck => {
                let (outcome, action) = mac.on_mac_state_check(rng, now_ms);
                (outcome, action, None)
            }
        },
        Event::McStateCheck => {
            let (outcome, action) = mac.on_mac_state_check(rng, now_ms);
            (outcome, action, None)
        }
        Event::MlmeJoin { credentials, nb_trials } => {
            let mut outcome = Outcome::default();
            let action = match mac.mlme_join(credentials, nb_trials, rng, now_ms) {
                Ok(action) => action,
                Err(status) => {
                    outcome.mlme_confirm =
                        Some(crate::mac::types::MlmeConfirm { status: Some(crate::mac::types::EventStatus::Error), ..Default::default() });
                    let _ = status;
                    Action::None
                }
            };
            (outcome, action, None)
        }
        Event::McpsRequest { kind, fport, data, data_rate } => {
            let mut outcome = Outcome::default();
            let req = crate::mac::types::McpsRequest { kind, fport, data: &data, data_rate };
            let action = match mac.mcps_request(req, now_ms) {
                Ok(action) => action,
                Err(status) => {
                    outcome.mcps_confirm = Some(crate::mac::types::McpsConfirm {
                        status: Some(crate::mac::types::EventStatus::Error),
                        ..Default::default()
                    });
                    let _ = status;
                    Action::None
                }
            };
            (outcome, action, None)
        }
    }
}
