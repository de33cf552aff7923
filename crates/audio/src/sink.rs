//! Audio sink abstraction and the reopen-with-backoff wrapper used by the
//! audio writer thread.

use std::io;

use tr_trunking::{AudioFrame, Event};

/// Blocking PCM consumer (sound server, pipe, file).
pub trait AudioSink: Send {
    fn write(&mut self, pcm: &[i16]) -> io::Result<()>;

    /// Attempt to recover a failed sink (device re-enumeration etc).
    fn reopen(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Discards all audio. Used when no output device is configured and in
/// tests.
pub struct NullSink;

impl AudioSink for NullSink {
    fn write(&mut self, _pcm: &[i16]) -> io::Result<()> {
        Ok(())
    }
}

const MAX_CONSECUTIVE_FAILURES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 250;

/// Wraps a sink with exponential-backoff reopen. After three consecutive
/// reopen failures the wrapper reports the sink as down; grants keep
/// flowing upstream, audio is discarded until a write succeeds again.
pub struct SinkWriter {
    sink: Box<dyn AudioSink>,
    consecutive_failures: u32,
    backoff_ms: u64,
    down: bool,
}

impl SinkWriter {
    pub fn new(sink: Box<dyn AudioSink>) -> Self {
        Self {
            sink,
            consecutive_failures: 0,
            backoff_ms: INITIAL_BACKOFF_MS,
            down: false,
        }
    }

    pub fn is_down(&self) -> bool {
        self.down
    }

    /// Deliver one frame. Returns an event when the sink transitions to
    /// the down state.
    pub fn deliver(&mut self, frame: &AudioFrame) -> Option<Event> {
        if self.down {
            // Probe occasionally: a successful write revives the sink
            if self.sink.write(&frame.pcm).is_ok() {
                log::info!("audio sink recovered");
                self.down = false;
                self.consecutive_failures = 0;
                self.backoff_ms = INITIAL_BACKOFF_MS;
            }
            return None;
        }

        match self.sink.write(&frame.pcm) {
            Ok(()) => {
                self.consecutive_failures = 0;
                self.backoff_ms = INITIAL_BACKOFF_MS;
                None
            }
            Err(e) => {
                log::warn!("audio sink write failed: {}", e);
                self.try_reopen()
            }
        }
    }

    fn try_reopen(&mut self) -> Option<Event> {
        std::thread::sleep(std::time::Duration::from_millis(self.backoff_ms));
        self.backoff_ms = (self.backoff_ms * 2).min(4000);

        match self.sink.reopen() {
            Ok(()) => {
                log::info!("audio sink reopened");
                self.consecutive_failures = 0;
                self.backoff_ms = INITIAL_BACKOFF_MS;
                None
            }
            Err(e) => {
                self.consecutive_failures += 1;
                log::warn!(
                    "audio sink reopen failed ({}/{}): {}",
                    self.consecutive_failures,
                    MAX_CONSECUTIVE_FAILURES,
                    e
                );
                if self.consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                    self.down = true;
                    return Some(Event::AudioSinkDown);
                }
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FlakySink {
        fail_writes: u32,
        fail_reopens: u32,
    }

    impl AudioSink for FlakySink {
        fn write(&mut self, _pcm: &[i16]) -> io::Result<()> {
            if self.fail_writes > 0 {
                self.fail_writes -= 1;
                Err(io::Error::new(io::ErrorKind::BrokenPipe, "gone"))
            } else {
                Ok(())
            }
        }

        fn reopen(&mut self) -> io::Result<()> {
            if self.fail_reopens > 0 {
                self.fail_reopens -= 1;
                Err(io::Error::new(io::ErrorKind::NotFound, "still gone"))
            } else {
                Ok(())
            }
        }
    }

    fn frame() -> AudioFrame {
        AudioFrame {
            pcm: vec![0; 16],
            sample_rate: 8000,
            talkgroup_id: 1,
            source_id: 1,
            timestamp_ms: 0,
        }
    }

    #[test]
    fn test_sink_down_after_three_reopen_failures() {
        let sink = FlakySink {
            fail_writes: 10,
            fail_reopens: 10,
        };
        let mut writer = SinkWriter::new(Box::new(sink));

        assert!(writer.deliver(&frame()).is_none());
        assert!(writer.deliver(&frame()).is_none());
        let ev = writer.deliver(&frame());
        assert!(matches!(ev, Some(Event::AudioSinkDown)));
        assert!(writer.is_down());
    }

    #[test]
    fn test_sink_recovers() {
        let sink = FlakySink {
            fail_writes: 3,
            fail_reopens: 3,
        };
        let mut writer = SinkWriter::new(Box::new(sink));
        for _ in 0..3 {
            writer.deliver(&frame());
        }
        assert!(writer.is_down());
        // Next write succeeds and revives the sink
        assert!(writer.deliver(&frame()).is_none());
        assert!(!writer.is_down());
    }

    #[test]
    fn test_transient_failure_recovers_without_down() {
        let sink = FlakySink {
            fail_writes: 1,
            fail_reopens: 0,
        };
        let mut writer = SinkWriter::new(Box::new(sink));
        assert!(writer.deliver(&frame()).is_none());
        assert!(!writer.is_down());
        assert!(writer.deliver(&frame()).is_none());
    }
}
