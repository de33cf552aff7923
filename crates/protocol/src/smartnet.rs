//! SmartNet control-channel framing: 76-bit outbound signaling words.

use std::collections::VecDeque;

use crate::fec::{crc16_ccitt, crc16_check};
use crate::sync::{SyncDetector, SyncState};
use crate::{bits_to_u32, push_bits, LogicalChannel, ProtocolUnit};

pub const SYNC_WORD: u64 = 0x5555;
pub const SYNC_BITS: usize = 16;
pub const SYNC_TOLERANCE: u32 = 2;

/// OSW layout: sync(16) address(10) group(3) command(11) crc(16) status(20)
pub const FRAME_BITS: usize = 76;

const ADDRESS_OFFSET: usize = 16;
const CRC_END: usize = 56;

/// A decoded outbound signaling word.
#[derive(Debug, Clone, Copy)]
pub struct Osw {
    pub address: u16,
    pub group: u8,
    pub command: u16,
}

impl Osw {
    /// Field extraction from a validated 40-bit OSW payload
    /// (address | group | command | crc).
    pub fn from_payload(bits: &[u8]) -> Self {
        Self {
            address: bits_to_u32(bits, 0, 10) as u16,
            group: bits_to_u32(bits, 10, 3) as u8,
            command: bits_to_u32(bits, 13, 11) as u16,
        }
    }
}

/// SmartNet framer: binary FSK symbols in, validated OSWs out.
pub struct SmartnetFramer {
    sync: SyncDetector,
    bits: VecDeque<u8>,
    frame_index: u64,

    pub frames_decoded: u64,
    pub sync_losses: u64,
    pub crc_failures: u64,
}

impl SmartnetFramer {
    pub fn new() -> Self {
        Self {
            sync: SyncDetector::new(vec![SYNC_WORD], SYNC_BITS, SYNC_TOLERANCE, 10),
            bits: VecDeque::new(),
            frame_index: 0,
            frames_decoded: 0,
            sync_losses: 0,
            crc_failures: 0,
        }
    }

    pub fn reset(&mut self) {
        self.sync.reset();
        self.bits.clear();
        self.frame_index = 0;
    }

    pub fn sync_state(&self) -> SyncState {
        self.sync.state()
    }

    pub fn process_symbols(&mut self, symbols: &[f32], out: &mut Vec<ProtocolUnit>) {
        for &symbol in symbols {
            self.bits.push_back(if symbol > 0.5 { 1 } else { 0 });
        }
        self.drain(out);
    }

    fn drain(&mut self, out: &mut Vec<ProtocolUnit>) {
        loop {
            match self.sync.state() {
                SyncState::Searching => match self.sync.search(&self.bits) {
                    Some((discard, _)) => {
                        self.bits.drain(..discard);
                        log::info!("smartnet: sync acquired");
                    }
                    None => {
                        while self.bits.len() > FRAME_BITS * 4 {
                            self.bits.pop_front();
                        }
                        return;
                    }
                },
                SyncState::Locked => {
                    if self.bits.len() < FRAME_BITS {
                        return;
                    }
                    if self.sync.verify(&self.bits).is_some() {
                        let frame: Vec<u8> =
                            self.bits.iter().take(FRAME_BITS).copied().collect();
                        self.decode_frame(&frame, out);
                        self.bits.drain(..FRAME_BITS);
                        self.frame_index += 1;
                    } else if self.sync.state() == SyncState::Searching {
                        self.sync_losses += 1;
                        log::warn!("smartnet: sync lost");
                    } else {
                        self.bits.drain(..FRAME_BITS);
                    }
                }
            }
        }
    }

    fn decode_frame(&mut self, frame: &[u8], out: &mut Vec<ProtocolUnit>) {
        // CRC-16 covers address, group, and command
        let payload = &frame[ADDRESS_OFFSET..CRC_END];
        if !crc16_check(payload) {
            self.crc_failures += 1;
            return;
        }

        self.frames_decoded += 1;
        out.push(ProtocolUnit {
            channel: LogicalChannel::Osw,
            slot: 0,
            frame_index: self.frame_index,
            bits: payload.to_vec(),
            crc_ok: true,
            ber: 0.0,
        });
    }
}

impl Default for SmartnetFramer {
    fn default() -> Self {
        Self::new()
    }
}

/// Build one OSW air frame with a valid CRC (test and simulation support).
pub fn build_osw_frame(address: u16, group: u8, command: u16, status: u32) -> Vec<u8> {
    let mut payload = Vec::with_capacity(24);
    push_bits(&mut payload, address as u64, 10);
    push_bits(&mut payload, group as u64, 3);
    push_bits(&mut payload, command as u64, 11);
    let crc = crc16_ccitt(&payload);

    let mut frame = Vec::with_capacity(FRAME_BITS);
    push_bits(&mut frame, SYNC_WORD, SYNC_BITS);
    frame.extend_from_slice(&payload);
    push_bits(&mut frame, crc as u64, 16);
    push_bits(&mut frame, status as u64, 20);
    frame
}

/// Bits to binary symbols for the FSK2 path.
pub fn bits_to_symbols(bits: &[u8]) -> Vec<f32> {
    bits.iter().map(|&b| b as f32).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_osw_round_trip() {
        let mut framer = SmartnetFramer::new();
        let frame = build_osw_frame(1234, 2, 0x003, 0);

        let mut units = Vec::new();
        framer.process_symbols(&bits_to_symbols(&frame), &mut units);
        assert_eq!(units.len(), 1);
        assert!(units[0].crc_ok);

        let osw = Osw::from_payload(&units[0].bits);
        assert_eq!(osw.address, 1234);
        assert_eq!(osw.group, 2);
        assert_eq!(osw.command, 0x003);
    }

    #[test]
    fn test_crc_failure_suppresses_frame() {
        let mut framer = SmartnetFramer::new();
        let mut frame = build_osw_frame(1234, 2, 0x003, 0);
        // One flipped bit outside the sync word
        frame[30] ^= 1;

        let mut units = Vec::new();
        framer.process_symbols(&bits_to_symbols(&frame), &mut units);
        assert!(units.is_empty());
        assert_eq!(framer.crc_failures, 1);
    }

    #[test]
    fn test_consecutive_frames() {
        let mut framer = SmartnetFramer::new();
        let mut bits = build_osw_frame(100, 0, 0x2F0, 0);
        bits.extend(build_osw_frame(200, 1, 0x003, 5));

        let mut units = Vec::new();
        framer.process_symbols(&bits_to_symbols(&bits), &mut units);
        assert_eq!(units.len(), 2);
        assert_eq!(Osw::from_payload(&units[0].bits).address, 100);
        assert_eq!(Osw::from_payload(&units[1].bits).address, 200);
    }
}
