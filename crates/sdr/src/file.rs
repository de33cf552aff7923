// Copyright 2025-2026 CEMAXECUTER LLC

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use crossbeam::channel::Sender;

use crate::{SampleBuf, SdrError, SdrSource};

/// IQ sample format for file input
#[derive(Debug, Clone, Copy)]
pub enum SampleFormat {
    /// Unsigned int8 pairs (cu8), the RTL2832U native capture format
    Cu8,
    /// Complex int16 (CS16): pairs of i16, little-endian
    Cs16,
    /// Complex float32 (CF32): pairs of f32, little-endian
    Cf32,
}

/// IQ file reader: reads samples from a capture file and sends them as
/// SampleBuf blocks, for offline decode and tests.
pub struct FileSource {
    path: String,
    format: SampleFormat,
    sample_rate: u32,
    center_freq: f64,
    /// Number of complex samples per block
    block_size: usize,
    running: bool,
}

impl FileSource {
    pub fn new(
        path: impl Into<String>,
        format: SampleFormat,
        sample_rate: u32,
        center_freq: f64,
    ) -> Self {
        Self {
            path: path.into(),
            format,
            sample_rate,
            center_freq,
            block_size: 65536, // 64K complex samples per block
            running: false,
        }
    }

    pub fn set_block_size(&mut self, size: usize) {
        self.block_size = size;
    }

    fn read_block_cu8(reader: &mut BufReader<File>, num_samples: usize) -> io::Result<Option<Vec<u8>>> {
        let mut buf = vec![0u8; num_samples * 2];
        let n = reader.read(&mut buf)?;
        if n == 0 {
            return Ok(None);
        }
        buf.truncate(n - (n % 2));
        Ok(Some(buf))
    }

    fn read_block_cs16(reader: &mut BufReader<File>, num_samples: usize) -> io::Result<Option<Vec<u8>>> {
        let mut buf = vec![0u8; num_samples * 4];
        let n = reader.read(&mut buf)?;
        if n == 0 {
            return Ok(None);
        }
        let actual_samples = n / 4;
        let mut out = Vec::with_capacity(actual_samples * 2);
        for i in 0..actual_samples {
            let base = i * 4;
            let i_val = i16::from_le_bytes([buf[base], buf[base + 1]]);
            let q_val = i16::from_le_bytes([buf[base + 2], buf[base + 3]]);
            out.push(((i_val >> 8) as i16 + 128) as u8);
            out.push(((q_val >> 8) as i16 + 128) as u8);
        }
        Ok(Some(out))
    }

    fn read_block_cf32(reader: &mut BufReader<File>, num_samples: usize) -> io::Result<Option<Vec<u8>>> {
        let mut buf = vec![0u8; num_samples * 8];
        let n = reader.read(&mut buf)?;
        if n == 0 {
            return Ok(None);
        }
        let actual_samples = n / 8;
        let mut out = Vec::with_capacity(actual_samples * 2);
        for i in 0..actual_samples {
            let base = i * 8;
            let i_f = f32::from_le_bytes([buf[base], buf[base + 1], buf[base + 2], buf[base + 3]]);
            let q_f = f32::from_le_bytes([buf[base + 4], buf[base + 5], buf[base + 6], buf[base + 7]]);
            out.push((i_f * 128.0 + 127.4).clamp(0.0, 255.0) as u8);
            out.push((q_f * 128.0 + 127.4).clamp(0.0, 255.0) as u8);
        }
        Ok(Some(out))
    }
}

impl SdrSource for FileSource {
    fn start(&mut self, tx: Sender<SampleBuf>) -> Result<(), SdrError> {
        let path = Path::new(&self.path);
        let file = File::open(path)?;
        let mut reader = BufReader::with_capacity(1024 * 1024, file);

        self.running = true;
        log::info!(
            "reading IQ from {} ({:?}, {} Hz, {:.4} MHz)",
            self.path,
            self.format,
            self.sample_rate,
            self.center_freq / 1e6
        );

        while self.running {
            let result = match self.format {
                SampleFormat::Cu8 => Self::read_block_cu8(&mut reader, self.block_size),
                SampleFormat::Cs16 => Self::read_block_cs16(&mut reader, self.block_size),
                SampleFormat::Cf32 => Self::read_block_cf32(&mut reader, self.block_size),
            };

            match result {
                Ok(Some(data)) => {
                    let num_samples = data.len() / 2;
                    if tx.send(SampleBuf { data, num_samples }).is_err() {
                        break; // receiver dropped
                    }
                }
                Ok(None) => {
                    log::info!("end of file: {}", self.path);
                    break;
                }
                Err(e) => return Err(SdrError::Io(e)),
            }
        }

        Ok(())
    }

    fn stop(&mut self) {
        self.running = false;
    }

    fn tune(&mut self, frequency_hz: f64) -> Result<(), SdrError> {
        // File playback has no tuner; record the request so downstream
        // frequency bookkeeping stays coherent.
        self.center_freq = frequency_hz;
        Ok(())
    }

    fn dropped_blocks(&self) -> u64 {
        0
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn center_frequency(&self) -> f64 {
        self.center_freq
    }
}
