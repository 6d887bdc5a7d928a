//! Multicast session table (spec §3 "Multicast sessions", §9 REDESIGN FLAGS): an owned,
//! fixed-capacity ordered container keyed by `DevAddr`, grounded in the teacher's
//! `mac::multicast` module but reduced to the simpler model the spec actually describes — no
//! remote multicast setup protocol, just link/unlink while idle and downlink dispatch.
use heapless::Vec;
use lorawan::frame;
use lorawan::keys::CryptoFactory;
use lorawan::types::DevAddr;

use crate::mac::session::Session;
use crate::mac::types::{EventStatus, McpsIndication, MulticastGroup, RxSlot};

/// Number of concurrently linked multicast groups.
pub const MAX_GROUPS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// `LoRaMacMulticastChannelLink`/`Unlink` are idle-only.
    Busy,
    TableFull,
    AlreadyLinked,
    UnknownGroup,
}

#[derive(Default)]
pub struct MulticastTable {
    groups: Vec<MulticastGroup, MAX_GROUPS>,
}

impl MulticastTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// `LoRaMacMulticastChannelLink`. Caller is responsible for rejecting this while
    /// `TX_RUNNING` is set.
    pub fn link(&mut self, group: MulticastGroup) -> Result<(), Error> {
        if self.groups.iter().any(|g| g.dev_addr.0 == group.dev_addr.0) {
            return Err(Error::AlreadyLinked);
        }
        self.groups.push(group).map_err(|_| Error::TableFull)
    }

    /// `LoRaMacMulticastChannelUnlink`.
    pub fn unlink(&mut self, dev_addr: DevAddr) -> Result<(), Error> {
        let before = self.groups.len();
        self.groups.retain(|g| g.dev_addr.0 != dev_addr.0);
        if self.groups.len() == before {
            Err(Error::UnknownGroup)
        } else {
            Ok(())
        }
    }

    pub fn groups(&self) -> &[MulticastGroup] {
        &self.groups
    }

    fn find_mut(&mut self, dev_addr: DevAddr) -> Option<&mut MulticastGroup> {
        self.groups.iter_mut().find(|g| g.dev_addr.0 == dev_addr.0)
    }

    /// Scans the table for a group matching the frame's `DevAddr`. A matching downlink is always
    /// unconfirmed network-side (multicast frames carry no ACK), so an fcnt32 at or below the
    /// stored value is always a repeat, never an awaited retransmission.
    pub fn handle_rx<C: CryptoFactory, const N: usize>(
        &mut self,
        factory: &C,
        bytes: &mut [u8],
        rssi: i16,
        snr: i8,
        rx_slot: RxSlot,
        rx_datarate: u8,
    ) -> Result<Option<McpsIndication<N>>, EventStatus> {
        if bytes.len() < 5 {
            return Err(EventStatus::Error);
        }
        let wire_dev_addr = DevAddr::from_le_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
        let Some(group) = self.find_mut(wire_dev_addr) else {
            return Ok(None);
        };

        let wire_fcnt = u16::from_le_bytes([bytes[6], bytes[7]]);
        let (candidate, _rolled) = Session::reconstruct_fcnt(group.fcnt_down, wire_fcnt);
        if candidate <= group.fcnt_down && !(group.fcnt_down == 0 && candidate == 0) {
            return Err(EventStatus::DownlinkRepeated);
        }

        let parsed = frame::parse_data_downlink(factory, &group.nwk_skey, &group.app_skey, bytes, candidate)
            .map_err(|_| EventStatus::MicFail)?;
        group.fcnt_down = candidate;

        let mut data = heapless::Vec::new();
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
            fcnt_down: group.fcnt_down,
            skip: false,
            ack: false,
            link_check: None,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lorawan::keys::AES128;

    fn group(addr: u32) -> MulticastGroup {
        MulticastGroup {
            dev_addr: DevAddr(addr),
            nwk_skey: AES128([0u8; 16]),
            app_skey: AES128([1u8; 16]),
            fcnt_down: 0,
        }
    }

    #[test]
    fn link_rejects_duplicate_dev_addr() {
        let mut table = MulticastTable::new();
        table.link(group(1)).unwrap();
        assert_eq!(table.link(group(1)), Err(Error::AlreadyLinked));
    }

    #[test]
    fn unlink_removes_known_group() {
        let mut table = MulticastTable::new();
        table.link(group(1)).unwrap();
        assert!(table.unlink(DevAddr(1)).is_ok());
        assert!(table.groups().is_empty());
    }

    #[test]
    fn unlink_unknown_group_errors() {
        let mut table = MulticastTable::new();
        assert_eq!(table.unlink(DevAddr(1)), Err(Error::UnknownGroup));
    }

    #[test]
    fn table_full_rejects_fifth_group() {
        let mut table = MulticastTable::new();
        for i in 0..MAX_GROUPS as u32 {
            table.link(group(i)).unwrap();
        }
        assert_eq!(table.link(group(99)), Err(Error::TableFull));
    }
}
