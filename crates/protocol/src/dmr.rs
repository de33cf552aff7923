//! DMR Tier II/III physical layer: TDMA slot framing, slot type, BPTC.

use std::collections::VecDeque;

use crate::fec::{crc16_ccitt, crc16_check, Bptc19696, Cyclic20_10};
use crate::sync::{SyncDetector, SyncState};
use crate::{bits_to_u32, push_bits, symbol_to_dibit, LogicalChannel, ProtocolUnit};

/// Base-station and mobile-station sync words, voice and data.
pub const SYNC_BS_DATA: u64 = 0x755FD7DF75F7;
pub const SYNC_BS_VOICE: u64 = 0x7F7D5DD57DFD;
pub const SYNC_MS_DATA: u64 = 0xD5D7F77FD757;
pub const SYNC_MS_VOICE: u64 = 0xDFF57D75DF5D;

pub const SYNC_BITS: usize = 48;
pub const SYNC_TOLERANCE: u32 = 4;

/// Slot layout: sync(48) slot-type(20) info(196)
pub const FRAME_BITS: usize = 264;
const SLOT_TYPE_OFFSET: usize = 48;
const INFO_OFFSET: usize = 68;

/// Data type codes carried in the slot type.
pub const DT_VOICE_HEADER: u8 = 0x00;
pub const DT_VOICE_TERMINATOR: u8 = 0x01;
pub const DT_CSBK: u8 = 0x03;
pub const DT_DATA_HEADER: u8 = 0x06;
pub const DT_IDLE: u8 = 0x09;

/// DMR framer: 4-level FSK symbols in, validated slot payloads out.
pub struct DmrFramer {
    sync: SyncDetector,
    slot_code: Cyclic20_10,
    bptc: Bptc19696,
    bits: VecDeque<u8>,
    expected_color: Option<u8>,
    current_slot: u8,
    frame_index: u64,

    pub frames_decoded: u64,
    pub sync_losses: u64,
    pub fec_failures: u64,
    pub crc_failures: u64,
    pub corrections: u64,
    pub color_mismatches: u64,
}

impl DmrFramer {
    /// `expected_color` of None accepts any colour code.
    pub fn new(expected_color: Option<u8>) -> Self {
        Self {
            sync: SyncDetector::new(
                vec![SYNC_BS_DATA, SYNC_BS_VOICE, SYNC_MS_DATA, SYNC_MS_VOICE],
                SYNC_BITS,
                SYNC_TOLERANCE,
                10,
            ),
            slot_code: Cyclic20_10::new(),
            bptc: Bptc19696::new(),
            bits: VecDeque::new(),
            expected_color,
            current_slot: 0,
            frame_index: 0,
            frames_decoded: 0,
            sync_losses: 0,
            fec_failures: 0,
            crc_failures: 0,
            corrections: 0,
            color_mismatches: 0,
        }
    }

    pub fn reset(&mut self) {
        self.sync.reset();
        self.bits.clear();
        self.current_slot = 0;
        self.frame_index = 0;
    }

    pub fn sync_state(&self) -> SyncState {
        self.sync.state()
    }

    pub fn process_symbols(&mut self, symbols: &[f32], out: &mut Vec<ProtocolUnit>) {
        for &symbol in symbols {
            let (b1, b0) = symbol_to_dibit(symbol);
            self.bits.push_back(b1);
            self.bits.push_back(b0);
        }
        self.drain(out);
    }

    fn drain(&mut self, out: &mut Vec<ProtocolUnit>) {
        loop {
            match self.sync.state() {
                SyncState::Searching => match self.sync.search(&self.bits) {
                    Some((discard, _)) => {
                        self.bits.drain(..discard);
                        self.current_slot = 0;
                        log::info!("dmr: sync acquired");
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
                        self.decode_slot(&frame, out);
                    } else if self.sync.state() == SyncState::Searching {
                        self.sync_losses += 1;
                        log::warn!("dmr: sync lost");
                        continue;
                    }
                    self.bits.drain(..FRAME_BITS);
                    // TDMA: slots alternate burst by burst
                    self.current_slot ^= 1;
                    self.frame_index += 1;
                }
            }
        }
    }

    fn decode_slot(&mut self, frame: &[u8], out: &mut Vec<ProtocolUnit>) {
        let mut slot_type = frame[SLOT_TYPE_OFFSET..INFO_OFFSET].to_vec();
        let errors = match self.slot_code.correct(&mut slot_type) {
            Some(n) => n,
            None => {
                self.fec_failures += 1;
                return;
            }
        };
        self.corrections += errors as u64;

        let data_type = bits_to_u32(&slot_type, 0, 4) as u8;
        let color = bits_to_u32(&slot_type, 4, 4) as u8;

        if let Some(expected) = self.expected_color {
            if color != expected {
                self.color_mismatches += 1;
                return;
            }
        }

        let channel = match data_type {
            DT_CSBK => LogicalChannel::DmrCsbk,
            DT_VOICE_HEADER => LogicalChannel::DmrVoiceHeader,
            DT_VOICE_TERMINATOR => LogicalChannel::DmrVoiceTerminator,
            DT_DATA_HEADER => LogicalChannel::DmrDataHeader,
            DT_IDLE => LogicalChannel::DmrIdle,
            _ => {
                self.frames_decoded += 1;
                return;
            }
        };

        if channel == LogicalChannel::DmrIdle || channel == LogicalChannel::DmrDataHeader {
            self.frames_decoded += 1;
            return;
        }

        let info = &frame[INFO_OFFSET..INFO_OFFSET + 196];
        let (payload, bptc_errors) = match self.bptc.decode(info) {
            Some(v) => v,
            None => {
                self.fec_failures += 1;
                return;
            }
        };
        self.corrections += bptc_errors as u64;

        // CSBKs carry a trailing CRC-16; voice link control is already
        // validated by the product code
        let crc_ok = if channel == LogicalChannel::DmrCsbk {
            crc16_check(&payload)
        } else {
            true
        };
        if !crc_ok {
            self.crc_failures += 1;
            return;
        }

        self.frames_decoded += 1;
        out.push(ProtocolUnit {
            channel,
            slot: self.current_slot,
            frame_index: self.frame_index,
            bits: payload,
            crc_ok: true,
            ber: (errors + bptc_errors) as f32 / FRAME_BITS as f32,
        });
    }
}

/// Build one DMR burst (test and simulation support).
pub fn build_slot(sync: u64, data_type: u8, color: u8, payload: &[u8]) -> Vec<u8> {
    debug_assert_eq!(payload.len(), 96);
    let slot_code = Cyclic20_10::new();
    let bptc = Bptc19696::new();

    let mut st_data = Vec::with_capacity(10);
    push_bits(&mut st_data, data_type as u64, 4);
    push_bits(&mut st_data, color as u64, 4);
    push_bits(&mut st_data, 0, 2);

    let mut frame = Vec::with_capacity(FRAME_BITS);
    push_bits(&mut frame, sync, SYNC_BITS);
    frame.extend(slot_code.encode(&st_data));
    frame.extend(bptc.encode(payload));
    frame
}

/// Append the CRC-16 to 80 CSBK data bits, forming the 96-bit payload.
pub fn seal_csbk_payload(data: &[u8]) -> Vec<u8> {
    debug_assert_eq!(data.len(), 80);
    let crc = crc16_ccitt(data);
    let mut payload = data.to_vec();
    push_bits(&mut payload, crc as u64, 16);
    payload
}

/// Bit stream to 4-level symbol indices, two bits per symbol.
pub fn bits_to_symbols(bits: &[u8]) -> Vec<f32> {
    bits.chunks_exact(2)
        .map(|d| ((d[0] << 1) | d[1]) as f32)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csbk_slot_round_trip() {
        let mut framer = DmrFramer::new(Some(1));
        let mut data = vec![0u8; 80];
        data[0] = 1; // opcode-ish content
        let payload = seal_csbk_payload(&data);
        let slot = build_slot(SYNC_BS_DATA, DT_CSBK, 1, &payload);

        let mut units = Vec::new();
        framer.process_symbols(&bits_to_symbols(&slot), &mut units);
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].channel, LogicalChannel::DmrCsbk);
        assert!(units[0].crc_ok);
        assert_eq!(units[0].bits, payload);
    }

    #[test]
    fn test_color_code_filter() {
        let mut framer = DmrFramer::new(Some(2));
        let payload = seal_csbk_payload(&vec![0u8; 80]);
        let slot = build_slot(SYNC_BS_DATA, DT_CSBK, 7, &payload);

        let mut units = Vec::new();
        framer.process_symbols(&bits_to_symbols(&slot), &mut units);
        assert!(units.is_empty());
        assert_eq!(framer.color_mismatches, 1);
    }

    #[test]
    fn test_slot_alternation() {
        let mut framer = DmrFramer::new(None);
        let payload = seal_csbk_payload(&vec![0u8; 80]);
        let mut bits = build_slot(SYNC_BS_DATA, DT_CSBK, 1, &payload);
        bits.extend(build_slot(SYNC_BS_DATA, DT_CSBK, 1, &payload));

        let mut units = Vec::new();
        framer.process_symbols(&bits_to_symbols(&bits), &mut units);
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].slot, 0);
        assert_eq!(units[1].slot, 1);
    }

    #[test]
    fn test_corrects_channel_errors() {
        let mut framer = DmrFramer::new(None);
        let payload = seal_csbk_payload(&vec![0u8; 80]);
        let mut slot = build_slot(SYNC_BS_VOICE, DT_VOICE_HEADER, 3, &payload);
        slot[50] ^= 1; // slot type
        slot[100] ^= 1; // info field

        let mut units = Vec::new();
        framer.process_symbols(&bits_to_symbols(&slot), &mut units);
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].channel, LogicalChannel::DmrVoiceHeader);
        assert!(framer.corrections >= 2);
    }
}
