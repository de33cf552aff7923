//! Call recording: 16-bit PCM mono WAV files.

use std::fs::File;
use std::io::{self, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, WriteBytesExt};

/// Streaming WAV writer. The RIFF sizes are patched on finalize.
pub struct WavWriter {
    writer: BufWriter<File>,
    path: PathBuf,
    sample_rate: u32,
    samples_written: u32,
}

impl WavWriter {
    pub fn create(path: impl AsRef<Path>, sample_rate: u32) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)?;
        let mut writer = BufWriter::new(file);
        write_header(&mut writer, sample_rate, 0)?;
        Ok(Self {
            writer,
            path,
            sample_rate,
            samples_written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&mut self, pcm: &[i16]) -> io::Result<()> {
        for &sample in pcm {
            self.writer.write_i16::<LittleEndian>(sample)?;
        }
        self.samples_written += pcm.len() as u32;
        Ok(())
    }

    /// Patch the chunk sizes and flush.
    pub fn finalize(mut self) -> io::Result<()> {
        self.writer.seek(SeekFrom::Start(0))?;
        write_header(&mut self.writer, self.sample_rate, self.samples_written)?;
        self.writer.flush()
    }
}

fn write_header<W: Write>(w: &mut W, sample_rate: u32, samples: u32) -> io::Result<()> {
    let data_bytes = samples * 2;
    w.write_all(b"RIFF")?;
    w.write_u32::<LittleEndian>(36 + data_bytes)?;
    w.write_all(b"WAVE")?;

    w.write_all(b"fmt ")?;
    w.write_u32::<LittleEndian>(16)?;
    w.write_u16::<LittleEndian>(1)?; // PCM
    w.write_u16::<LittleEndian>(1)?; // mono
    w.write_u32::<LittleEndian>(sample_rate)?;
    w.write_u32::<LittleEndian>(sample_rate * 2)?; // byte rate
    w.write_u16::<LittleEndian>(2)?; // block align
    w.write_u16::<LittleEndian>(16)?; // bits per sample

    w.write_all(b"data")?;
    w.write_u32::<LittleEndian>(data_bytes)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wav_file_shape() {
        let dir = std::env::temp_dir();
        let path = dir.join("trunkrx_wav_test.wav");
        let mut w = WavWriter::create(&path, 8000).expect("create");
        w.write(&[0, 1000, -1000, 32767]).expect("write");
        w.finalize().expect("finalize");

        let bytes = std::fs::read(&path).expect("read back");
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WAVE");
        // data chunk length = 4 samples * 2 bytes
        assert_eq!(
            u32::from_le_bytes([bytes[40], bytes[41], bytes[42], bytes[43]]),
            8
        );
        assert_eq!(bytes.len(), 44 + 8);
        std::fs::remove_file(&path).ok();
    }
}
