//! TETRA physical layer: training-sequence sync, de-interleaving,
//! descrambling, rate-2/3 Viterbi decoding, and positional logical-channel
//! assignment.

use std::collections::VecDeque;

use crate::fec::{conv_encode_r23, crc16_ccitt, crc16_check, scramble, viterbi_decode_r23};
use crate::sync::{SyncDetector, SyncState};
use crate::{push_bits, symbol_to_dibit, LogicalChannel, ProtocolUnit};

/// 11-bit training sequences: normal, extended, and synchronization bursts.
pub const TRAIN_NORMAL: u64 = 0x0FD;
pub const TRAIN_EXTENDED: u64 = 0x6E4;
pub const TRAIN_SYNC: u64 = 0x3AA;

pub const TRAIN_BITS: usize = 11;
pub const TRAIN_TOLERANCE: u32 = 3;

/// Slot layout: training(11) coded(480) guard(19).
pub const SLOT_BITS: usize = 510;
const CODED_BITS: usize = 480;
const CODED_OFFSET: usize = TRAIN_BITS;

/// Decoded slot: 304 data bits followed by their CRC-16.
pub const DATA_BITS: usize = 304;

pub const SLOTS_PER_FRAME: u8 = 4;
pub const FRAMES_PER_MULTIFRAME: u8 = 18;

/// Block interleaver depth.
const INTERLEAVE_ROWS: usize = 30;
const INTERLEAVE_COLS: usize = CODED_BITS / INTERLEAVE_ROWS;

/// MAC PDU types in the leading 8 bits of an MCCH payload.
pub const PDU_BROADCAST: u8 = 0x01;
pub const PDU_D_SETUP: u8 = 0x02;
pub const PDU_D_CONNECT: u8 = 0x03;
pub const PDU_D_RELEASE: u8 = 0x04;
pub const PDU_D_SDS: u8 = 0x05;

#[inline]
fn deinterleave_index(i: usize) -> usize {
    (i % INTERLEAVE_COLS) * INTERLEAVE_ROWS + i / INTERLEAVE_COLS
}

/// TETRA framer: pi/4-DQPSK symbols in, validated MAC payloads out.
pub struct TetraFramer {
    sync: SyncDetector,
    bits: VecDeque<u8>,
    slot_in_frame: u8,
    frame_in_multiframe: u8,
    multiframe: u64,
    frame_counter: u64,

    pub bursts_decoded: u64,
    pub sync_losses: u64,
    pub crc_failures: u64,
    pub avg_ber: f32,
}

impl TetraFramer {
    pub fn new() -> Self {
        Self {
            sync: SyncDetector::new(
                vec![TRAIN_NORMAL, TRAIN_EXTENDED, TRAIN_SYNC],
                TRAIN_BITS,
                TRAIN_TOLERANCE,
                10,
            ),
            bits: VecDeque::new(),
            slot_in_frame: 0,
            frame_in_multiframe: 0,
            multiframe: 0,
            frame_counter: 0,
            bursts_decoded: 0,
            sync_losses: 0,
            crc_failures: 0,
            avg_ber: 0.0,
        }
    }

    pub fn reset(&mut self) {
        self.sync.reset();
        self.bits.clear();
        self.slot_in_frame = 0;
        self.frame_in_multiframe = 0;
        self.multiframe = 0;
        self.frame_counter = 0;
    }

    pub fn sync_state(&self) -> SyncState {
        self.sync.state()
    }

    pub fn multiframe(&self) -> u64 {
        self.multiframe
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
                        // A fresh lock starts a multiframe
                        self.slot_in_frame = 0;
                        self.frame_in_multiframe = 0;
                        log::info!("tetra: training sequence acquired");
                    }
                    None => {
                        while self.bits.len() > SLOT_BITS * 4 {
                            self.bits.pop_front();
                        }
                        return;
                    }
                },
                SyncState::Locked => {
                    if self.bits.len() < SLOT_BITS {
                        return;
                    }
                    if self.sync.verify(&self.bits).is_some() {
                        let slot: Vec<u8> =
                            self.bits.iter().take(SLOT_BITS).copied().collect();
                        self.decode_slot(&slot, out);
                    } else if self.sync.state() == SyncState::Searching {
                        self.sync_losses += 1;
                        log::warn!("tetra: sync lost");
                        continue;
                    }
                    self.bits.drain(..SLOT_BITS);
                    self.advance_position();
                }
            }
        }
    }

    fn advance_position(&mut self) {
        self.slot_in_frame += 1;
        if self.slot_in_frame >= SLOTS_PER_FRAME {
            self.slot_in_frame = 0;
            self.frame_in_multiframe += 1;
            self.frame_counter += 1;
            if self.frame_in_multiframe >= FRAMES_PER_MULTIFRAME {
                self.frame_in_multiframe = 0;
                self.multiframe += 1;
            }
        }
    }

    /// Slot-position mapping onto logical channels: the first slot of the
    /// multiframe carries the synchronization broadcast, the first slot of
    /// the next frame the network broadcast, other first slots the main
    /// control channel, and the remaining slots traffic.
    fn logical_channel(&self) -> LogicalChannel {
        if self.slot_in_frame != 0 {
            return LogicalChannel::Tch;
        }
        match self.frame_in_multiframe {
            0 => LogicalChannel::Bsch,
            1 => LogicalChannel::Bnch,
            _ => LogicalChannel::Mcch,
        }
    }

    fn decode_slot(&mut self, slot: &[u8], out: &mut Vec<ProtocolUnit>) {
        let mut coded = vec![0u8; CODED_BITS];
        for i in 0..CODED_BITS {
            coded[i] = slot[CODED_OFFSET + deinterleave_index(i)];
        }
        scramble(&mut coded, self.frame_in_multiframe as u32);

        let (decoded, metric) = viterbi_decode_r23(&coded);
        let ber = metric as f32 / CODED_BITS as f32;
        self.avg_ber = 0.9 * self.avg_ber + 0.1 * ber;

        if !crc16_check(&decoded) {
            self.crc_failures += 1;
            return;
        }

        self.bursts_decoded += 1;
        out.push(ProtocolUnit {
            channel: self.logical_channel(),
            slot: self.slot_in_frame,
            frame_index: self.frame_counter,
            bits: decoded[..DATA_BITS].to_vec(),
            crc_ok: true,
            ber,
        });
    }
}

impl Default for TetraFramer {
    fn default() -> Self {
        Self::new()
    }
}

/// Build one slot around 304 data bits (test and simulation support).
/// `frame_number` seeds the scrambler and must match the receiver's frame
/// position within the multiframe.
pub fn build_slot(data: &[u8], frame_number: u32) -> Vec<u8> {
    debug_assert_eq!(data.len(), DATA_BITS);

    let mut payload = data.to_vec();
    let crc = crc16_ccitt(data);
    push_bits(&mut payload, crc as u64, 16);

    let mut coded = conv_encode_r23(&payload);
    debug_assert_eq!(coded.len(), CODED_BITS);
    scramble(&mut coded, frame_number);

    let mut slot = Vec::with_capacity(SLOT_BITS);
    push_bits(&mut slot, TRAIN_NORMAL, TRAIN_BITS);
    slot.resize(SLOT_BITS, 0);
    for (i, &bit) in coded.iter().enumerate() {
        slot[CODED_OFFSET + deinterleave_index(i)] = bit;
    }
    slot
}

/// Bit stream to differential symbol indices, two bits per symbol.
pub fn bits_to_symbols(bits: &[u8]) -> Vec<f32> {
    bits.chunks_exact(2)
        .map(|d| ((d[0] << 1) | d[1]) as f32)
        .collect()
}
