// Copyright 2025-2026 CEMAXECUTER LLC

//! Error-correction building blocks shared by the protocol framers.
//!
//! Everything here is a pure function (or a precomputed-table struct) over
//! bit slices: CRC-16-CCITT, cyclic Hamming correctors, extended
//! Golay(24,12), the DMR BPTC(196,96) product code, the TETRA rate-2/3
//! convolutional code, and the TETRA frame scrambler. Encoders are included
//! for each block so air frames can be synthesized in tests.

use std::collections::HashMap;

/// CRC-16-CCITT polynomial.
const CRC16_POLY: u16 = 0x1021;
const CRC16_INIT: u16 = 0xFFFF;

/// Bit-serial CRC-16-CCITT over a bit slice, MSB of the register first.
pub fn crc16_ccitt(bits: &[u8]) -> u16 {
    let mut crc = CRC16_INIT;
    for &bit in bits {
        crc ^= (bit as u16 & 1) << 15;
        if crc & 0x8000 != 0 {
            crc = (crc << 1) ^ CRC16_POLY;
        } else {
            crc <<= 1;
        }
    }
    crc
}

/// Validate a payload whose trailing 16 bits are its CRC. Dividing the
/// whole codeword leaves a zero remainder.
pub fn crc16_check(bits: &[u8]) -> bool {
    bits.len() >= 16 && crc16_ccitt(bits) == 0
}

/// Remainder of `bits` divided by a generator polynomial of the given
/// degree (MSB-first division).
fn poly_rem(bits: &[u8], gen: u32, degree: u32) -> u32 {
    let mut rem = 0u32;
    let top = 1u32 << degree;
    for &bit in bits {
        rem = (rem << 1) | (bit & 1) as u32;
        if rem & top != 0 {
            rem ^= gen;
        }
    }
    rem
}

/// Cyclic code corrector: systematic (n, k) code with a degree n-k
/// generator, correcting single-bit errors through a syndrome table.
struct CyclicCode {
    n: usize,
    k: usize,
    gen: u32,
    degree: u32,
    /// syndrome -> errored bit position
    positions: HashMap<u32, usize>,
}

impl CyclicCode {
    fn new(n: usize, k: usize, gen: u32) -> Self {
        let degree = (n - k) as u32;
        let mut code = Self {
            n,
            k,
            gen,
            degree,
            positions: HashMap::new(),
        };
        for pos in 0..n {
            let mut cw = vec![0u8; n];
            cw[pos] = 1;
            let syndrome = poly_rem(&cw, gen, degree);
            code.positions.insert(syndrome, pos);
        }
        code
    }

    /// Systematic encode: data bits followed by the division remainder.
    fn encode(&self, data: &[u8]) -> Vec<u8> {
        debug_assert_eq!(data.len(), self.k);
        let mut padded = data.to_vec();
        padded.extend(std::iter::repeat(0).take(self.n - self.k));
        let rem = poly_rem(&padded, self.gen, self.degree);
        let mut cw = data.to_vec();
        for i in (0..self.degree).rev() {
            cw.push(((rem >> i) & 1) as u8);
        }
        cw
    }

    /// Correct up to one bit error in place. Returns the number of
    /// corrections, or None if the syndrome is unknown.
    fn correct(&self, bits: &mut [u8]) -> Option<u32> {
        debug_assert_eq!(bits.len(), self.n);
        let syndrome = poly_rem(bits, self.gen, self.degree);
        if syndrome == 0 {
            return Some(0);
        }
        match self.positions.get(&syndrome) {
            Some(&pos) => {
                bits[pos] ^= 1;
                Some(1)
            }
            None => None,
        }
    }
}

/// Hamming(15,11), generator x^4 + x + 1. BPTC rows.
pub struct Hamming15_11(CyclicCode);

impl Hamming15_11 {
    pub fn new() -> Self {
        Self(CyclicCode::new(15, 11, 0b10011))
    }
    pub fn encode(&self, data: &[u8]) -> Vec<u8> {
        self.0.encode(data)
    }
    pub fn correct(&self, bits: &mut [u8]) -> Option<u32> {
        self.0.correct(bits)
    }
}

impl Default for Hamming15_11 {
    fn default() -> Self {
        Self::new()
    }
}

/// Hamming(13,9), generator x^4 + x^3 + 1. BPTC columns.
pub struct Hamming13_9(CyclicCode);

impl Hamming13_9 {
    pub fn new() -> Self {
        Self(CyclicCode::new(13, 9, 0b11001))
    }
    pub fn encode(&self, data: &[u8]) -> Vec<u8> {
        self.0.encode(data)
    }
    pub fn correct(&self, bits: &mut [u8]) -> Option<u32> {
        self.0.correct(bits)
    }
}

impl Default for Hamming13_9 {
    fn default() -> Self {
        Self::new()
    }
}

/// Hamming(16,11): the (15,11) code extended by an overall even-parity
/// bit. Corrects single errors, detects doubles.
pub struct Hamming16_11 {
    inner: CyclicCode,
}

impl Hamming16_11 {
    pub fn new() -> Self {
        Self {
            inner: CyclicCode::new(15, 11, 0b10011),
        }
    }

    pub fn encode(&self, data: &[u8]) -> Vec<u8> {
        let mut cw = self.inner.encode(data);
        let parity = cw.iter().fold(0u8, |acc, &b| acc ^ b);
        cw.push(parity);
        cw
    }

    /// Returns corrections applied, or None for an uncorrectable (double)
    /// error pattern.
    pub fn correct(&self, bits: &mut [u8]) -> Option<u32> {
        debug_assert_eq!(bits.len(), 16);
        let syndrome = poly_rem(&bits[..15], self.inner.gen, self.inner.degree);
        let parity = bits.iter().fold(0u8, |acc, &b| acc ^ b);

        match (syndrome, parity) {
            (0, 0) => Some(0),
            (0, _) => {
                // Error in the parity bit itself
                bits[15] ^= 1;
                Some(1)
            }
            (s, 1) => {
                let &pos = self.inner.positions.get(&s)?;
                bits[pos] ^= 1;
                Some(1)
            }
            // Nonzero syndrome with even parity: two errors
            _ => None,
        }
    }
}

impl Default for Hamming16_11 {
    fn default() -> Self {
        Self::new()
    }
}

/// Generator polynomial of the (23,12) Golay code.
const GOLAY_GEN: u32 = 0xAE3;

/// Extended Golay(24,12): the perfect (23,12) code plus an overall parity
/// bit, correcting up to three bit errors.
///
/// Decoding walks a syndrome table built by enumerating every error
/// pattern of weight <= 3, the same construction the access-code
/// corrector uses for its syndrome map.
pub struct Golay24 {
    /// (remainder << 1 | parity) -> error pattern over 24 bits
    map: HashMap<u32, u32>,
}

impl Golay24 {
    pub fn new() -> Self {
        let mut map = HashMap::new();
        for a in 0..24u32 {
            insert_pattern(&mut map, 1 << a);
            for b in (a + 1)..24 {
                insert_pattern(&mut map, (1 << a) | (1 << b));
                for c in (b + 1)..24 {
                    insert_pattern(&mut map, (1 << a) | (1 << b) | (1 << c));
                }
            }
        }
        Self { map }
    }

    /// Encode 12 data bits into a 24-bit codeword (data, 11 check bits,
    /// overall parity).
    pub fn encode(&self, data: u16) -> u32 {
        let data = (data & 0xFFF) as u32;
        let mut bits = Vec::with_capacity(23);
        for i in (0..12).rev() {
            bits.push(((data >> i) & 1) as u8);
        }
        bits.extend(std::iter::repeat(0).take(11));
        let rem = poly_rem(&bits, GOLAY_GEN, 11);
        let cw23 = (data << 11) | rem;
        let parity = (cw23.count_ones() & 1) as u32;
        (cw23 << 1) | parity
    }

    /// Correct a received 24-bit codeword. Returns (data, corrections) or
    /// None when more than three errors are present.
    pub fn decode(&self, received: u32) -> Option<(u16, u32)> {
        let key = syndrome_key(received);
        let corrected = if key == 0 {
            received
        } else {
            received ^ self.map.get(&key).copied()?
        };
        let data = ((corrected >> 12) & 0xFFF) as u16;
        let errors = (received ^ corrected).count_ones();
        Some((data, errors))
    }
}

impl Default for Golay24 {
    fn default() -> Self {
        Self::new()
    }
}

fn syndrome_key(word24: u32) -> u32 {
    let cw23 = word24 >> 1;
    let mut bits = Vec::with_capacity(23);
    for i in (0..23).rev() {
        bits.push(((cw23 >> i) & 1) as u8);
    }
    let rem = poly_rem(&bits, GOLAY_GEN, 11);
    let parity = word24.count_ones() & 1;
    (rem << 1) | parity
}

fn insert_pattern(map: &mut HashMap<u32, u32>, pattern: u32) {
    map.insert(syndrome_key(pattern), pattern);
}

/// Shortened cyclic (20,10) code protecting the DMR slot type, generator
/// x^10 + x^3 + 1. Single-error correcting.
pub struct Cyclic20_10(CyclicCode);

impl Cyclic20_10 {
    pub fn new() -> Self {
        Self(CyclicCode::new(20, 10, 0b10000001001))
    }
    pub fn encode(&self, data: &[u8]) -> Vec<u8> {
        self.0.encode(data)
    }
    pub fn correct(&self, bits: &mut [u8]) -> Option<u32> {
        self.0.correct(bits)
    }
}

impl Default for Cyclic20_10 {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// TETRA rate-2/3 convolutional code
// ---------------------------------------------------------------------------

/// Constraint length 5: four memory bits, 16 trellis states.
const CONV_MEM: usize = 4;
const CONV_STATES: usize = 1 << CONV_MEM;
/// Rate-1/2 mother code generators, octal 23 and 35, newest bit first.
const CONV_G1: u8 = 0b10011;
const CONV_G2: u8 = 0b11101;

#[inline]
fn parity5(x: u8) -> u8 {
    let mut p = x;
    p ^= p >> 4;
    p ^= p >> 2;
    p ^= p >> 1;
    p & 1
}

/// Rate-2/3 convolutional encode: the K=5 rate-1/2 mother code punctured
/// 3-of-4 (the second check bit of every odd input bit is dropped), so two
/// input bits produce three coded bits. Input length must be even.
pub fn conv_encode_r23(data: &[u8]) -> Vec<u8> {
    debug_assert!(data.len() % 2 == 0);
    let mut coded = Vec::with_capacity(data.len() * 3 / 2);
    let mut state: u8 = 0;

    for (i, &bit) in data.iter().enumerate() {
        let input = bit & 1;
        let reg = (input << CONV_MEM) | state;
        let c1 = parity5(reg & CONV_G1);
        let c2 = parity5(reg & CONV_G2);
        coded.push(c1);
        if i % 2 == 0 {
            coded.push(c2);
        }
        state = ((input << (CONV_MEM - 1)) | (state >> 1)) & ((1 << CONV_MEM) - 1);
    }
    coded
}

#[derive(Clone, Copy)]
struct Branch {
    next_state: u8,
    c1: u8,
    c2: u8,
}

fn conv_branch_table() -> [[Branch; 2]; CONV_STATES] {
    let mut table = [[Branch { next_state: 0, c1: 0, c2: 0 }; 2]; CONV_STATES];
    let mask = (1u8 << CONV_MEM) - 1;
    for state in 0..CONV_STATES as u8 {
        for input in 0u8..2 {
            let reg = (input << CONV_MEM) | state;
            table[state as usize][input as usize] = Branch {
                next_state: ((input << (CONV_MEM - 1)) | (state >> 1)) & mask,
                c1: parity5(reg & CONV_G1),
                c2: parity5(reg & CONV_G2),
            };
        }
    }
    table
}

/// Viterbi decode of the punctured rate-2/3 stream. `coded.len()` must be
/// a multiple of 3; returns the decoded bits and the final path metric
/// (cumulative Hamming distance).
pub fn viterbi_decode_r23(coded: &[u8]) -> (Vec<u8>, u32) {
    let steps = coded.len() / 3 * 2;
    if steps == 0 {
        return (Vec::new(), 0);
    }

    let branches = conv_branch_table();
    const INF: u32 = u32::MAX / 2;

    let mut pm = [INF; CONV_STATES];
    pm[0] = 0;
    let mut traceback = vec![[0u8; CONV_STATES]; steps];
    let mut pos = 0usize;

    for step in 0..steps {
        // Even input bits carry both check bits, odd ones only the first.
        let punctured = step % 2 == 1;
        let r1 = coded[pos];
        let r2 = if punctured { 0 } else { coded[pos + 1] };
        pos += if punctured { 1 } else { 2 };

        let mut pm_new = [INF; CONV_STATES];
        let mut tb = [0u8; CONV_STATES];

        for state in 0..CONV_STATES {
            if pm[state] >= INF {
                continue;
            }
            for input in 0..2usize {
                let br = &branches[state][input];
                let mut metric = pm[state] + (br.c1 ^ r1) as u32;
                if !punctured {
                    metric += (br.c2 ^ r2) as u32;
                }
                let ns = br.next_state as usize;
                if metric < pm_new[ns] {
                    pm_new[ns] = metric;
                    tb[ns] = ((state as u8) << 1) | input as u8;
                }
            }
        }

        pm = pm_new;
        traceback[step] = tb;
    }

    let mut best_state = 0usize;
    let mut best_metric = pm[0];
    for (state, &metric) in pm.iter().enumerate() {
        if metric < best_metric {
            best_metric = metric;
            best_state = state;
        }
    }

    let mut decoded = vec![0u8; steps];
    let mut state = best_state as u8;
    for step in (0..steps).rev() {
        let entry = traceback[step][state as usize];
        decoded[step] = entry & 1;
        state = entry >> 1;
    }

    (decoded, best_metric)
}

// ---------------------------------------------------------------------------
// DMR BPTC(196,96)
// ---------------------------------------------------------------------------

const BPTC_BITS: usize = 196;
const BPTC_ROWS: usize = 13;
const BPTC_COLS: usize = 15;
const BPTC_DATA_ROWS: usize = 9;
/// The first three info positions are reserved and transmitted as zero.
const BPTC_RESERVED: usize = 3;

#[inline]
fn bptc_interleave_index(i: usize) -> usize {
    (i * 181) % BPTC_BITS
}

/// BPTC(196,96) product code: a 13x15 matrix (bit 0 of the block unused)
/// with Hamming(15,11) rows and Hamming(13,9) columns, interleaved over
/// the burst.
pub struct Bptc19696 {
    rows: Hamming15_11,
    cols: Hamming13_9,
}

impl Bptc19696 {
    pub fn new() -> Self {
        Self {
            rows: Hamming15_11::new(),
            cols: Hamming13_9::new(),
        }
    }

    /// Encode 96 payload bits into the 196-bit on-air block.
    pub fn encode(&self, data: &[u8]) -> Vec<u8> {
        debug_assert_eq!(data.len(), 96);

        let mut matrix = [[0u8; BPTC_COLS]; BPTC_ROWS];
        let mut src = data.iter().copied();
        for r in 0..BPTC_DATA_ROWS {
            for c in 0..11 {
                if r == 0 && c < BPTC_RESERVED {
                    continue;
                }
                matrix[r][c] = src.next().unwrap_or(0);
            }
        }

        for r in 0..BPTC_DATA_ROWS {
            let cw = self.rows.encode(&matrix[r][..11].to_vec());
            matrix[r][..BPTC_COLS].copy_from_slice(&cw);
        }
        for c in 0..BPTC_COLS {
            let column: Vec<u8> = (0..BPTC_DATA_ROWS).map(|r| matrix[r][c]).collect();
            let cw = self.cols.encode(&column);
            for (r, &bit) in cw.iter().enumerate().skip(BPTC_DATA_ROWS) {
                matrix[r][c] = bit;
            }
        }

        let mut flat = vec![0u8; BPTC_BITS];
        for r in 0..BPTC_ROWS {
            for c in 0..BPTC_COLS {
                flat[1 + r * BPTC_COLS + c] = matrix[r][c];
            }
        }

        let mut out = vec![0u8; BPTC_BITS];
        for (i, &bit) in flat.iter().enumerate() {
            out[bptc_interleave_index(i)] = bit;
        }
        out
    }

    /// Decode a 196-bit block. Returns the 96 payload bits and the number
    /// of corrected bits, or None when the product code does not converge.
    pub fn decode(&self, received: &[u8]) -> Option<(Vec<u8>, u32)> {
        debug_assert_eq!(received.len(), BPTC_BITS);

        let mut flat = vec![0u8; BPTC_BITS];
        for i in 0..BPTC_BITS {
            flat[i] = received[bptc_interleave_index(i)];
        }

        let mut matrix = [[0u8; BPTC_COLS]; BPTC_ROWS];
        for r in 0..BPTC_ROWS {
            for c in 0..BPTC_COLS {
                matrix[r][c] = flat[1 + r * BPTC_COLS + c];
            }
        }

        let mut corrections = 0u32;
        // Two row/column passes clear any single error per row or column.
        for _ in 0..2 {
            for r in 0..BPTC_DATA_ROWS {
                let mut row = matrix[r][..BPTC_COLS].to_vec();
                if let Some(n) = self.rows.correct(&mut row) {
                    corrections += n;
                    matrix[r][..BPTC_COLS].copy_from_slice(&row);
                }
            }
            for c in 0..BPTC_COLS {
                let mut column: Vec<u8> = (0..BPTC_ROWS).map(|r| matrix[r][c]).collect();
                if let Some(n) = self.cols.correct(&mut column) {
                    corrections += n;
                    for r in 0..BPTC_ROWS {
                        matrix[r][c] = column[r];
                    }
                }
            }
        }

        // Verify: every row and column syndrome must now be clean.
        for r in 0..BPTC_DATA_ROWS {
            let mut row = matrix[r][..BPTC_COLS].to_vec();
            if self.rows.correct(&mut row) != Some(0) {
                return None;
            }
        }
        for c in 0..BPTC_COLS {
            let mut column: Vec<u8> = (0..BPTC_ROWS).map(|r| matrix[r][c]).collect();
            if self.cols.correct(&mut column) != Some(0) {
                return None;
            }
        }

        let mut data = Vec::with_capacity(96);
        for r in 0..BPTC_DATA_ROWS {
            for c in 0..11 {
                if r == 0 && c < BPTC_RESERVED {
                    continue;
                }
                data.push(matrix[r][c]);
            }
        }
        Some((data, corrections))
    }
}

impl Default for Bptc19696 {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// TETRA scrambler
// ---------------------------------------------------------------------------

/// Frame-number-seeded LFSR scrambler. The keystream depends only on the
/// register state, so applying it twice restores the input.
pub fn scramble(bits: &mut [u8], frame_number: u32) {
    let mut lfsr = 0x1FFu32 ^ (frame_number & 0x1FF);
    for bit in bits.iter_mut() {
        let keystream = (lfsr ^ (lfsr >> 5)) & 1;
        *bit ^= keystream as u8;
        lfsr = ((lfsr << 1) | keystream) & 0x1FF;
    }
}
