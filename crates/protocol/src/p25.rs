// Copyright 2025-2026 CEMAXECUTER LLC

//! P25 Phase 1 physical layer: frame sync, NID, and TSBK recovery.

use std::collections::VecDeque;

use crate::fec::{crc16_ccitt, crc16_check, Golay24, Hamming16_11};
use crate::sync::{SyncDetector, SyncState};
use crate::{bits_to_u32, push_bits, symbol_to_dibit, LogicalChannel, ProtocolUnit};

/// 48-bit frame sync word.
pub const FRAME_SYNC: u64 = 0x5575F5FF77FF;
pub const SYNC_BITS: usize = 48;
pub const SYNC_TOLERANCE: u32 = 4;

/// Full frame length in bits, sync included.
pub const FRAME_BITS: usize = 1728;
/// NID occupies the 64 bits after the sync.
const NID_BITS: usize = 64;
/// TSBK information bits following the NID.
const TSBK_BITS: usize = 144;

/// Data unit IDs carried in the NID.
pub const DUID_HEADER: u8 = 0x0;
pub const DUID_TERMINATOR: u8 = 0x3;
pub const DUID_LDU1: u8 = 0x5;
pub const DUID_TSBK: u8 = 0x7;
pub const DUID_LDU2: u8 = 0xA;
pub const DUID_PDU: u8 = 0xC;

/// P25 framer. Consumes C4FM symbols, emits validated protocol units.
pub struct P25Framer {
    sync: SyncDetector,
    golay: Golay24,
    hamming: Hamming16_11,
    bits: VecDeque<u8>,
    expected_nac: u16,
    frame_index: u64,

    pub frames_decoded: u64,
    pub sync_losses: u64,
    pub fec_failures: u64,
    pub crc_failures: u64,
    pub corrections: u64,
    pub nac_mismatches: u64,
}

impl P25Framer {
    /// `expected_nac` of zero disables the NAC filter.
    pub fn new(expected_nac: u16) -> Self {
        Self {
            sync: SyncDetector::new(vec![FRAME_SYNC], SYNC_BITS, SYNC_TOLERANCE, 10),
            golay: Golay24::new(),
            hamming: Hamming16_11::new(),
            bits: VecDeque::new(),
            expected_nac,
            frame_index: 0,
            frames_decoded: 0,
            sync_losses: 0,
            fec_failures: 0,
            crc_failures: 0,
            corrections: 0,
            nac_mismatches: 0,
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
            let (b1, b0) = symbol_to_dibit(symbol);
            self.bits.push_back(b1);
            self.bits.push_back(b0);
        }
        self.drain(out);
    }

    fn drain(&mut self, out: &mut Vec<ProtocolUnit>) {
        loop {
            match self.sync.state() {
                SyncState::Searching => {
                    match self.sync.search(&self.bits) {
                        Some((discard, _)) => {
                            self.bits.drain(..discard);
                            log::info!("p25: frame sync acquired");
                        }
                        None => {
                            // Keep a bounded search window
                            while self.bits.len() > FRAME_BITS * 2 {
                                self.bits.pop_front();
                            }
                            return;
                        }
                    }
                }
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
                        log::warn!("p25: frame sync lost");
                    } else {
                        // Boundary miss while still locked: skip the frame
                        self.bits.drain(..FRAME_BITS);
                    }
                }
            }
        }
    }

    fn decode_frame(&mut self, frame: &[u8], out: &mut Vec<ProtocolUnit>) {
        let nid = &frame[SYNC_BITS..SYNC_BITS + NID_BITS];
        let (nac, duid, nid_errors) = match decode_nid(&self.golay, nid) {
            Some(v) => v,
            None => {
                self.fec_failures += 1;
                return;
            }
        };
        self.corrections += nid_errors as u64;

        if self.expected_nac != 0 && nac != self.expected_nac {
            self.nac_mismatches += 1;
            return;
        }

        self.frames_decoded += 1;
        let payload_start = SYNC_BITS + NID_BITS;

        match duid {
            DUID_TSBK => {
                let air = &frame[payload_start..payload_start + TSBK_BITS];
                let (payload, errors) = match decode_tsbk(&self.hamming, air) {
                    Some(v) => v,
                    None => {
                        self.fec_failures += 1;
                        return;
                    }
                };
                self.corrections += errors as u64;

                if !crc16_check(&payload) {
                    self.crc_failures += 1;
                    return;
                }

                let ber = (nid_errors + errors) as f32 / (NID_BITS + TSBK_BITS) as f32;
                out.push(ProtocolUnit {
                    channel: LogicalChannel::P25Tsbk,
                    slot: 0,
                    frame_index: self.frame_index,
                    bits: payload,
                    crc_ok: true,
                    ber,
                });
            }
            DUID_LDU1 | DUID_LDU2 => {
                // Voice frames ride through to the codec black box
                out.push(ProtocolUnit {
                    channel: LogicalChannel::P25Voice,
                    slot: 0,
                    frame_index: self.frame_index,
                    bits: frame[payload_start..].to_vec(),
                    crc_ok: true,
                    ber: nid_errors as f32 / NID_BITS as f32,
                });
            }
            DUID_TERMINATOR => {
                out.push(ProtocolUnit {
                    channel: LogicalChannel::P25Terminator,
                    slot: 0,
                    frame_index: self.frame_index,
                    bits: Vec::new(),
                    crc_ok: true,
                    ber: nid_errors as f32 / NID_BITS as f32,
                });
            }
            _ => {
                // HDU/PDU and reserved DUIDs carry nothing the trunking
                // layer needs
            }
        }
    }
}

/// Decode the 64-bit NID: two Golay(24,12) codewords carrying the NAC and
/// the DUID. Returns (nac, duid, corrected bits).
fn decode_nid(golay: &Golay24, nid: &[u8]) -> Option<(u16, u8, u32)> {
    // First codeword in systematic order: NAC(12) | check(11) | parity(1)
    let cw1 = bits_to_u32(nid, 0, 24);
    let (nac, e1) = golay.decode(cw1)?;

    // Second codeword is stored check-bits first so the DUID lands in the
    // tail of the NID: check(11) | parity(1) | data(12)
    let rem = bits_to_u32(nid, 40, 11);
    let parity = bits_to_u32(nid, 51, 1);
    let data = bits_to_u32(nid, 52, 12);
    let cw2 = (data << 12) | (rem << 1) | parity;
    let (word2, e2) = golay.decode(cw2)?;

    Some((nac & 0xFFF, (word2 & 0xF) as u8, e1 + e2))
}

/// Encode a 64-bit NID from NAC and DUID (test and simulation support).
pub fn encode_nid(golay: &Golay24, nac: u16, duid: u8) -> Vec<u8> {
    let mut nid = Vec::with_capacity(NID_BITS);

    let cw1 = golay.encode(nac & 0xFFF);
    push_bits(&mut nid, cw1 as u64, 24);

    // 16 reserved bits between the codewords
    push_bits(&mut nid, 0, 16);

    let cw2 = golay.encode((duid & 0xF) as u16);
    let data = (cw2 >> 12) & 0xFFF;
    let rem = (cw2 >> 1) & 0x7FF;
    let parity = cw2 & 1;
    push_bits(&mut nid, rem as u64, 11);
    push_bits(&mut nid, parity as u64, 1);
    push_bits(&mut nid, data as u64, 12);

    nid
}

/// Decode 144 TSBK air bits (nine Hamming(16,11) codewords) into the
/// 96-bit payload. Returns (payload, corrected bits).
fn decode_tsbk(hamming: &Hamming16_11, air: &[u8]) -> Option<(Vec<u8>, u32)> {
    let mut info = Vec::with_capacity(99);
    let mut errors = 0;
    for chunk in air.chunks_exact(16) {
        let mut cw = chunk.to_vec();
        errors += hamming.correct(&mut cw)?;
        info.extend_from_slice(&cw[..11]);
    }
    info.truncate(96);
    Some((info, errors))
}

/// Encode a 96-bit TSBK payload into 144 air bits.
pub fn encode_tsbk(hamming: &Hamming16_11, payload: &[u8]) -> Vec<u8> {
    debug_assert_eq!(payload.len(), 96);
    let mut info = payload.to_vec();
    info.extend_from_slice(&[0, 0, 0]);
    let mut air = Vec::with_capacity(TSBK_BITS);
    for chunk in info.chunks_exact(11) {
        air.extend(hamming.encode(chunk));
    }
    air
}

/// Append the CRC-16 to 80 TSBK data bits, forming the 96-bit payload.
pub fn seal_tsbk_payload(data: &[u8]) -> Vec<u8> {
    debug_assert_eq!(data.len(), 80);
    let crc = crc16_ccitt(data);
    let mut payload = data.to_vec();
    push_bits(&mut payload, crc as u64, 16);
    payload
}

/// Build one complete air frame around a TSBK payload (sync + NID + TSBK,
/// zero-padded to the frame length).
pub fn build_tsbk_frame(nac: u16, payload: &[u8]) -> Vec<u8> {
    let golay = Golay24::new();
    let hamming = Hamming16_11::new();

    let mut frame = Vec::with_capacity(FRAME_BITS);
    push_bits(&mut frame, FRAME_SYNC, SYNC_BITS);
    frame.extend(encode_nid(&golay, nac, DUID_TSBK));
    frame.extend(encode_tsbk(&hamming, payload));
    frame.resize(FRAME_BITS, 0);
    frame
}

/// Pack a bit stream into C4FM symbol indices, two bits per symbol.
pub fn bits_to_symbols(bits: &[u8]) -> Vec<f32> {
    bits.chunks_exact(2)
        .map(|d| ((d[0] << 1) | d[1]) as f32)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nid_round_trip() {
        let golay = Golay24::new();
        let nid = encode_nid(&golay, 0x293, DUID_TSBK);
        assert_eq!(nid.len(), 64);
        // NAC rides in the leading 12 bits, DUID in 60..63
        assert_eq!(bits_to_u32(&nid, 0, 12), 0x293);
        assert_eq!(bits_to_u32(&nid, 60, 4), DUID_TSBK as u32);

        let (nac, duid, errors) = decode_nid(&golay, &nid).expect("clean NID");
        assert_eq!(nac, 0x293);
        assert_eq!(duid, DUID_TSBK);
        assert_eq!(errors, 0);
    }

    #[test]
    fn test_nid_corrects_errors() {
        let golay = Golay24::new();
        let mut nid = encode_nid(&golay, 0xFED, DUID_LDU1);
        nid[3] ^= 1;
        nid[62] ^= 1;
        let (nac, duid, errors) = decode_nid(&golay, &nid).expect("correctable");
        assert_eq!(nac, 0xFED);
        assert_eq!(duid, DUID_LDU1);
        assert_eq!(errors, 2);
    }

    #[test]
    fn test_tsbk_round_trip() {
        let hamming = Hamming16_11::new();
        let data: Vec<u8> = (0..80).map(|i| ((i * 3) % 2) as u8).collect();
        let payload = seal_tsbk_payload(&data);
        let air = encode_tsbk(&hamming, &payload);
        assert_eq!(air.len(), 144);

        let (decoded, errors) = decode_tsbk(&hamming, &air).expect("clean");
        assert_eq!(decoded, payload);
        assert_eq!(errors, 0);
        assert!(crc16_check(&decoded));
    }

    #[test]
    fn test_framer_emits_tsbk() {
        let mut framer = P25Framer::new(0x293);
        let mut data = vec![0u8; 80];
        data[5] = 1; // arbitrary payload content
        let frame = build_tsbk_frame(0x293, &seal_tsbk_payload(&data));
        let symbols = bits_to_symbols(&frame);

        let mut units = Vec::new();
        framer.process_symbols(&symbols, &mut units);
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].channel, LogicalChannel::P25Tsbk);
        assert!(units[0].crc_ok);
        assert_eq!(units[0].bits.len(), 96);
        assert_eq!(units[0].bits[5], 1);
        assert_eq!(framer.frames_decoded, 1);
    }

    #[test]
    fn test_framer_filters_nac() {
        let mut framer = P25Framer::new(0x111);
        let data = vec![0u8; 80];
        let frame = build_tsbk_frame(0x293, &seal_tsbk_payload(&data));

        let mut units = Vec::new();
        framer.process_symbols(&bits_to_symbols(&frame), &mut units);
        assert!(units.is_empty());
        assert_eq!(framer.nac_mismatches, 1);
    }

    #[test]
    fn test_framer_counts_crc_failure() {
        let mut framer = P25Framer::new(0);
        let data = vec![0u8; 80];
        let mut payload = seal_tsbk_payload(&data);
        // Corrupt one payload bit after sealing, then re-encode: the FEC
        // sees a valid codeword whose content fails the CRC
        payload[20] ^= 1;
        let hamming = Hamming16_11::new();
        let golay = Golay24::new();
        let mut frame = Vec::new();
        push_bits(&mut frame, FRAME_SYNC, SYNC_BITS);
        frame.extend(encode_nid(&golay, 0x293, DUID_TSBK));
        frame.extend(encode_tsbk(&hamming, &payload));
        frame.resize(FRAME_BITS, 0);

        let mut units = Vec::new();
        framer.process_symbols(&bits_to_symbols(&frame), &mut units);
        assert!(units.is_empty());
        assert_eq!(framer.crc_failures, 1);
    }
}
