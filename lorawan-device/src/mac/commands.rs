//! Stateful buffering of uplink MAC-command responses (spec §4.3), built atop the pure
//! encode/decode primitives in [`lorawan::maccommands`].
//!
//! Three fixed-capacity byte buffers mirror the spec's contract: `current` (what goes out on the
//! very next frame), `repeat` (answers that must keep being resent until a valid downlink
//! arrives, e.g. `RXParamSetupAns`), and `next_tx` (staging area filled while processing a
//! downlink, copied into `current` at the next uplink build). `sticky` tracks which CIDs are
//! repeat-until-acked so `CopyRepeatCommandsToBuffer` knows what to keep.
use heapless::Vec;
use lorawan::maccommands::UplinkMacCommand;

pub const FOPTS_MAX_LEN: usize = 15;
const STICKY_MAX: usize = 4;

fn is_sticky(cmd: UplinkMacCommand) -> bool {
    // RXParamSetupAns and DlChannelAns must be repeated until the network's ACK for them is
    // observed (an uplink with FCtrl.ACK set), per LoRaWAN 1.0.x section 5.
    matches!(cmd, UplinkMacCommand::RxParamSetupAns { .. } | UplinkMacCommand::DlChannelAns { .. })
}

#[derive(Default)]
pub struct MacCommandBuffer {
    current: Vec<u8, FOPTS_MAX_LEN>,
    repeat: Vec<u8, FOPTS_MAX_LEN>,
    next_tx: Vec<u8, { FOPTS_MAX_LEN * 2 }>,
    sticky: Vec<UplinkMacCommand, STICKY_MAX>,
}

impl MacCommandBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a response to the staging buffer, built while processing a downlink's MAC
    /// commands. Tracks it as sticky if its kind demands repetition.
    pub fn push_next_tx(&mut self, cmd: UplinkMacCommand) -> Result<(), ()> {
        let mut scratch = [0u8; 3];
        let n = cmd.encode(&mut scratch).map_err(|_| ())?;
        self.next_tx.extend_from_slice(&scratch[..n]).map_err(|_| ())?;
        if is_sticky(cmd) {
            let _ = self.sticky.push(cmd);
        }
        Ok(())
    }

    /// `ParseMacCommandsToRepeat`: before building the next uplink, folds `next_tx` into
    /// `current`, preferring `current` first so already-queued responses are not starved, then
    /// appends anything still pending in `repeat` that did not already get included (truncating
    /// silently at the FOpts budget — callers needing the rest must fall back to FPort 0).
    pub fn prepare_for_tx(&mut self) {
        let mut merged: Vec<u8, FOPTS_MAX_LEN> = Vec::new();
        let _ = merged.extend_from_slice(&self.current);
        for b in self.next_tx.iter() {
            if merged.push(*b).is_err() {
                break;
            }
        }
        for b in self.repeat.iter() {
            if merged.contains(b) {
                continue;
            }
            if merged.push(*b).is_err() {
                break;
            }
        }
        self.current = merged;
        self.next_tx.clear();
    }

    /// After a successful TX carrying the current FOpts, sticky commands move into `repeat`; all
    /// others are dropped.
    pub fn copy_repeat_commands_to_buffer(&mut self) {
        self.repeat.clear();
        for cmd in self.sticky.iter() {
            let mut scratch = [0u8; 3];
            if let Ok(n) = cmd.encode(&mut scratch) {
                let _ = self.repeat.extend_from_slice(&scratch[..n]);
            }
        }
    }

    pub fn current(&self) -> &[u8] {
        &self.current
    }

    pub fn len(&self) -> usize {
        self.current.len()
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_empty()
    }

    pub fn repeat_len(&self) -> usize {
        self.repeat.len()
    }

    pub fn is_mac_commands_in_next_tx(&self) -> bool {
        !self.next_tx.is_empty()
    }

    pub fn is_sticky_pending(&self) -> bool {
        !self.sticky.is_empty()
    }

    /// A valid downlink acknowledges pending sticky commands (the network's FCtrl.ACK bit, or
    /// simply having processed a fresh downlink at all, depending on the command); called from
    /// the confirmed-downlink ACK path to drop entries the network has now seen.
    pub fn clear_command_buffer(&mut self) {
        self.current.clear();
    }

    pub fn clear_repeat_buffer(&mut self) {
        self.repeat.clear();
        self.sticky.clear();
    }
}
