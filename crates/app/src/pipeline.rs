//! The three-worker pipeline: SDR reader, DSP + decode worker, audio
//! writer, joined by bounded channels.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use crossbeam::channel::{bounded, Sender};

use tr_audio::{
    AnalogPassthrough, AudioSink, CallManager, SinkWriter, VoiceDecoder,
};
use tr_protocol::ProtocolUnit;
use tr_sdr::{SampleBuf, SdrSource};
use tr_trunking::receiver::ControlReceiver;
use tr_trunking::{AudioFrame, Event};

use crate::config::Config;

/// Bounded queue depths: 16 IQ blocks, a few seconds of PCM.
const IQ_QUEUE_BLOCKS: usize = 16;
const AUDIO_QUEUE_FRAMES: usize = 64;

const STATS_INTERVAL_SECS: u64 = 10;

/// Codec stand-in for the proprietary vocoders; produces silence until a
/// real decoder library is linked in.
struct SilenceDecoder {
    samples_per_frame: usize,
}

impl VoiceDecoder for SilenceDecoder {
    fn decode(&mut self, _encoded: &[u8]) -> Vec<i16> {
        vec![0; self.samples_per_frame]
    }
}

fn make_decoder(codec: &str) -> Box<dyn VoiceDecoder> {
    match codec {
        "analog" => Box::new(AnalogPassthrough),
        other => {
            log::debug!("no native {} decoder, substituting silence", other);
            Box::new(SilenceDecoder {
                samples_per_frame: 160,
            })
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Pack protocol-unit bits into bytes for the codec black box.
fn bits_to_bytes(bits: &[u8]) -> Vec<u8> {
    bits.chunks(8)
        .map(|chunk| chunk.iter().fold(0u8, |acc, &b| (acc << 1) | (b & 1)))
        .collect()
}

/// Run the receiver until the source ends or `running` clears.
pub fn run(
    config: &Config,
    mut source: Box<dyn SdrSource>,
    sink: Box<dyn AudioSink>,
    running: Arc<AtomicBool>,
    sdr_drops: Option<Arc<AtomicU64>>,
    host_events: Option<Sender<Event>>,
) -> Result<(), String> {
    let sample_rate = source.sample_rate();
    let mut receiver =
        ControlReceiver::new(config.system_params(), sample_rate, config.modulation())?;

    let mut manager = CallManager::new(config.talkgroup_policy())
        .with_recording(
            config.audio.record_calls,
            PathBuf::from(&config.audio.recording_path),
        )
        .with_sample_rate(config.audio.sample_rate);
    let codec_name = config.codec().to_string();
    let audio_sample_rate = config.audio.sample_rate;

    let (iq_tx, iq_rx) = bounded::<SampleBuf>(IQ_QUEUE_BLOCKS);
    let (audio_tx, audio_rx) = bounded::<AudioFrame>(AUDIO_QUEUE_FRAMES);
    let (event_tx, event_rx) = crossbeam::channel::unbounded::<Event>();

    // SDR reader: blocks in the driver until the stream ends
    let reader = std::thread::Builder::new()
        .name("sdr-reader".into())
        .spawn(move || {
            if let Err(e) = source.start(iq_tx) {
                log::error!("sdr reader: {}", e);
            }
        })
        .map_err(|e| e.to_string())?;

    // Audio writer: drains the PCM queue into the (possibly blocking) sink
    let writer_running = Arc::clone(&running);
    let writer_events = event_tx;
    let writer = std::thread::Builder::new()
        .name("audio-writer".into())
        .spawn(move || {
            let mut sink = SinkWriter::new(sink);
            for frame in audio_rx.iter() {
                if !writer_running.load(Ordering::Relaxed) {
                    break;
                }
                if let Some(event) = sink.deliver(&frame) {
                    let _ = writer_events.send(event);
                }
            }
        })
        .map_err(|e| e.to_string())?;

    // DSP + decode worker runs inline on this thread
    let mut decoders: HashMap<u32, Box<dyn VoiceDecoder>> = HashMap::new();
    let mut events: Vec<Event> = Vec::new();
    let mut voice: Vec<ProtocolUnit> = Vec::new();
    let mut reported_drops = 0u64;
    let mut last_stats = Instant::now();

    for buf in iq_rx.iter() {
        if !running.load(Ordering::Relaxed) {
            break;
        }
        let now = now_ms();
        let block = buf.to_complex();

        events.clear();
        voice.clear();
        receiver.process_iq(&block, now, &mut events, &mut voice);
        receiver.tick(now);

        // Signaling events feed the call manager; what survives its
        // filter goes to the host
        let mut host: Vec<Event> = Vec::new();
        for event in events.drain(..) {
            match event {
                Event::CallGrant(grant) => {
                    manager.handle_grant(grant, now, &mut host);
                }
                Event::CallRelease { talkgroup_id } => {
                    manager.end_call(talkgroup_id, now, &mut host);
                }
                other => host.push(other),
            }
        }

        // Voice frames through the per-call codec
        for unit in voice.drain(..) {
            let talkgroup = match manager.latest_talkgroup() {
                Some(tg) => tg,
                None => continue,
            };
            let decoder = decoders
                .entry(talkgroup)
                .or_insert_with(|| make_decoder(&codec_name));
            let pcm = decoder.decode(&bits_to_bytes(&unit.bits));
            if pcm.is_empty() {
                continue;
            }
            let frame = AudioFrame {
                pcm,
                sample_rate: audio_sample_rate,
                talkgroup_id: talkgroup,
                source_id: 0,
                timestamp_ms: now,
            };
            manager.handle_audio_frame(frame, now);
        }

        manager.tick(now, &mut host);

        // Codec state is scoped to the call: drop it when the call ends
        for event in &host {
            if let Event::CallEnded { talkgroup_id, .. } = event {
                decoders.remove(talkgroup_id);
            }
        }

        // Push decoded PCM toward the sink without blocking the DSP path
        while let Some(frame) = manager.pop_frame() {
            match audio_tx.try_send(frame) {
                Ok(()) => {}
                Err(crossbeam::channel::TrySendError::Full(frame)) => {
                    manager.requeue_front(frame);
                    break;
                }
                Err(crossbeam::channel::TrySendError::Disconnected(_)) => break,
            }
        }

        // Surface USB-level drops as events
        if let Some(drops) = &sdr_drops {
            let total = drops.load(Ordering::Relaxed);
            if total > reported_drops {
                host.push(Event::DroppedSamples {
                    count: total - reported_drops,
                });
                reported_drops = total;
            }
        }

        for event in host.drain(..) {
            log_event(&event);
            if let Some(tx) = &host_events {
                let _ = tx.send(event);
            }
        }

        // Forward sink-state events from the writer thread
        while let Ok(event) = event_rx.try_recv() {
            if let Some(tx) = &host_events {
                let _ = tx.send(event.clone());
            }
            if matches!(event, Event::AudioSinkDown) {
                log::error!("audio sink down, discarding audio until recovery");
            }
        }

        if last_stats.elapsed().as_secs() >= STATS_INTERVAL_SECS {
            let c = receiver.counters();
            log::info!(
                "frames: {} grants: {} crc_fail: {} sync_lost: {} calls: {} (total {})",
                c.frames_decoded,
                c.parser.grants_emitted,
                c.crc_failures,
                c.sync_losses,
                manager.active_call_count(),
                manager.total_calls,
            );
            last_stats = Instant::now();
        }
    }

    // Close out any live calls on shutdown
    let mut host = Vec::new();
    let now = now_ms();
    manager.tick(now + tr_audio::CALL_TIMEOUT_MS + 1, &mut host);
    for event in host {
        log_event(&event);
    }

    drop(audio_tx);
    running.store(false, Ordering::Relaxed);
    let _ = writer.join();
    let _ = reader.join();
    Ok(())
}

fn log_event(event: &Event) {
    match event {
        Event::SystemIdentified(info) => log::info!("system identified: {:?}", info),
        Event::CallGrant(g) => log::info!(
            "call grant: tg={} src={} {:.4} MHz prio={}{}",
            g.talkgroup_id,
            g.source_id,
            g.frequency_hz / 1e6,
            g.priority,
            if g.encrypted { " [encrypted]" } else { "" }
        ),
        Event::CallEnded {
            talkgroup_id,
            duration_ms,
        } => log::info!("call ended: tg={} after {} ms", talkgroup_id, duration_ms),
        Event::CallRelease { talkgroup_id } => {
            log::debug!("call release: tg={}", talkgroup_id)
        }
        Event::AudioFrame(_) => {}
        Event::DroppedSamples { count } => log::warn!("dropped {} sample blocks", count),
        Event::AudioSinkDown => {}
    }
}
