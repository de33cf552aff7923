// Copyright 2025-2026 CEMAXECUTER LLC

//! Call sessions: talkgroup filtering, priority, audio buffering, and the
//! inactivity timeout.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;

use tr_trunking::{AudioFrame, CallGrant, CallType, Event};

use crate::wav::WavWriter;

/// A call with no audio for this long is closed.
pub const CALL_TIMEOUT_MS: u64 = 5000;

const DEFAULT_PRIORITY: u8 = 5;
const EMERGENCY_PRIORITY: u8 = 10;

/// Bounded PCM delivery queue: a few seconds at 8 kHz / 20 ms frames.
const DEFAULT_QUEUE_FRAMES: usize = 256;

/// Talkgroup policy from the configuration document. An empty enabled set
/// allows every talkgroup.
#[derive(Debug, Default, Clone)]
pub struct TalkgroupPolicy {
    pub enabled: HashSet<u32>,
    pub priorities: HashMap<u32, u8>,
    pub labels: HashMap<u32, String>,
}

impl TalkgroupPolicy {
    pub fn is_enabled(&self, talkgroup: u32) -> bool {
        self.enabled.is_empty() || self.enabled.contains(&talkgroup)
    }

    pub fn priority(&self, talkgroup: u32) -> u8 {
        self.priorities
            .get(&talkgroup)
            .copied()
            .unwrap_or(DEFAULT_PRIORITY)
    }

    pub fn label(&self, talkgroup: u32) -> Option<&str> {
        self.labels.get(&talkgroup).map(String::as_str)
    }
}

/// One live call session. At most one exists per talkgroup.
pub struct ActiveCall {
    pub grant: CallGrant,
    pub start_ms: u64,
    pub last_audio_ms: u64,
    pub frame_count: u64,
    recording: Option<WavWriter>,
}

/// Owns the active-call table and the bounded audio queue feeding the
/// sink worker.
pub struct CallManager {
    policy: TalkgroupPolicy,
    calls: HashMap<u32, ActiveCall>,
    queue: VecDeque<AudioFrame>,
    queue_capacity: usize,
    record_calls: bool,
    recording_path: PathBuf,
    recording_sample_rate: u32,

    pub total_calls: u64,
    pub filtered_grants: u64,
    pub dropped_frames: u64,
    pub orphan_frames: u64,
}

impl CallManager {
    pub fn new(policy: TalkgroupPolicy) -> Self {
        Self {
            policy,
            calls: HashMap::new(),
            queue: VecDeque::new(),
            queue_capacity: DEFAULT_QUEUE_FRAMES,
            record_calls: false,
            recording_path: PathBuf::from("."),
            recording_sample_rate: 8000,
            total_calls: 0,
            filtered_grants: 0,
            dropped_frames: 0,
            orphan_frames: 0,
        }
    }

    pub fn with_recording(mut self, enabled: bool, path: PathBuf) -> Self {
        self.record_calls = enabled;
        self.recording_path = path;
        self
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.recording_sample_rate = sample_rate;
        self
    }

    pub fn set_queue_capacity(&mut self, frames: usize) {
        self.queue_capacity = frames.max(1);
    }

    pub fn active_call(&self, talkgroup: u32) -> Option<&ActiveCall> {
        self.calls.get(&talkgroup)
    }

    pub fn active_call_count(&self) -> usize {
        self.calls.len()
    }

    /// A grant for an enabled talkgroup opens a session (or refreshes the
    /// existing one). The host-visible CallGrant event is emitted here,
    /// after the filter.
    pub fn handle_grant(&mut self, mut grant: CallGrant, now_ms: u64, out: &mut Vec<Event>) {
        let talkgroup = grant.talkgroup_id;
        if !self.policy.is_enabled(talkgroup) {
            self.filtered_grants += 1;
            log::debug!("ignoring grant for disabled talkgroup {}", talkgroup);
            return;
        }

        grant.priority = if grant.call_type == CallType::Emergency {
            EMERGENCY_PRIORITY
        } else {
            self.policy.priority(talkgroup)
        };

        if let Some(call) = self.calls.get_mut(&talkgroup) {
            call.last_audio_ms = now_ms;
            call.grant = grant;
            log::debug!("refreshed call for talkgroup {}", talkgroup);
            return;
        }

        let recording = if self.record_calls {
            let name = format!("{}_{}.wav", talkgroup, now_ms);
            match WavWriter::create(self.recording_path.join(name), self.recording_sample_rate) {
                Ok(w) => Some(w),
                Err(e) => {
                    log::warn!("recording disabled for tg {}: {}", talkgroup, e);
                    None
                }
            }
        } else {
            None
        };

        let label = self
            .policy
            .label(talkgroup)
            .map(|l| format!(" ({})", l))
            .unwrap_or_default();
        log::info!(
            "call start: tg={}{} freq={:.4} MHz prio={}",
            talkgroup,
            label,
            grant.frequency_hz / 1e6,
            grant.priority
        );

        self.calls.insert(
            talkgroup,
            ActiveCall {
                grant: grant.clone(),
                start_ms: now_ms,
                last_audio_ms: now_ms,
                frame_count: 0,
                recording,
            },
        );
        self.total_calls += 1;
        out.push(Event::CallGrant(grant));
    }

    /// Queue one decoded PCM frame for the sink.
    pub fn handle_audio_frame(&mut self, frame: AudioFrame, now_ms: u64) {
        let call = match self.calls.get_mut(&frame.talkgroup_id) {
            Some(c) => c,
            None => {
                self.orphan_frames += 1;
                log::debug!("audio for inactive talkgroup {}", frame.talkgroup_id);
                return;
            }
        };

        call.last_audio_ms = now_ms;
        call.frame_count += 1;
        if let Some(rec) = &mut call.recording {
            if let Err(e) = rec.write(&frame.pcm) {
                log::warn!("recording write failed: {}", e);
                call.recording = None;
            }
        }

        if self.queue.len() >= self.queue_capacity {
            self.drop_lowest_priority_frame();
        }
        self.queue.push_back(frame);
    }

    /// Take the next frame for the sink worker.
    pub fn pop_frame(&mut self) -> Option<AudioFrame> {
        self.queue.pop_front()
    }

    /// Return a frame the sink worker could not deliver yet.
    pub fn requeue_front(&mut self, frame: AudioFrame) {
        self.queue.push_front(frame);
    }

    /// The most recently granted live call, used to attribute voice frames
    /// heard on the monitored channel.
    pub fn latest_talkgroup(&self) -> Option<u32> {
        self.calls
            .values()
            .max_by_key(|c| c.start_ms)
            .map(|c| c.grant.talkgroup_id)
    }

    pub fn queued_frames(&self) -> usize {
        self.queue.len()
    }

    /// Close a call explicitly (release or terminator from the control
    /// channel).
    pub fn end_call(&mut self, talkgroup: u32, now_ms: u64, out: &mut Vec<Event>) {
        if let Some(call) = self.calls.remove(&talkgroup) {
            Self::close(talkgroup, call, now_ms, out);
        }
    }

    /// Time-driven sweep: calls silent past the timeout are closed.
    pub fn tick(&mut self, now_ms: u64, out: &mut Vec<Event>) {
        let expired: Vec<u32> = self
            .calls
            .iter()
            .filter(|(_, call)| now_ms.saturating_sub(call.last_audio_ms) > CALL_TIMEOUT_MS)
            .map(|(&tg, _)| tg)
            .collect();
        for talkgroup in expired {
            if let Some(call) = self.calls.remove(&talkgroup) {
                log::info!("call timeout: tg={}", talkgroup);
                Self::close(talkgroup, call, now_ms, out);
            }
        }
    }

    fn close(talkgroup: u32, mut call: ActiveCall, now_ms: u64, out: &mut Vec<Event>) {
        if let Some(rec) = call.recording.take() {
            if let Err(e) = rec.finalize() {
                log::warn!("recording finalize failed: {}", e);
            }
        }
        let duration_ms = now_ms.saturating_sub(call.start_ms);
        log::info!(
            "call end: tg={} duration={} ms frames={}",
            talkgroup,
            duration_ms,
            call.frame_count
        );
        out.push(Event::CallEnded {
            talkgroup_id: talkgroup,
            duration_ms,
        });
    }

    /// Overflow policy: discard the oldest queued frame belonging to the
    /// lowest-priority active call; the queue head if no queued frame maps
    /// to a live call.
    fn drop_lowest_priority_frame(&mut self) {
        self.dropped_frames += 1;

        let victim_tg = self
            .calls
            .values()
            .min_by_key(|c| (c.grant.priority, c.start_ms))
            .map(|c| c.grant.talkgroup_id);

        if let Some(tg) = victim_tg {
            if let Some(pos) = self.queue.iter().position(|f| f.talkgroup_id == tg) {
                self.queue.remove(pos);
                return;
            }
        }
        self.queue.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tr_trunking::EncryptionLabel;

    fn grant(tg: u32, call_type: CallType) -> CallGrant {
        CallGrant {
            talkgroup_id: tg,
            source_id: 4097,
            frequency_hz: 851_025_000.0,
            call_type,
            encrypted: false,
            encryption_label: EncryptionLabel::Clear,
            priority: 5,
            timestamp_ms: 0,
        }
    }

    fn frame(tg: u32, ts: u64) -> AudioFrame {
        AudioFrame {
            pcm: vec![0; 160],
            sample_rate: 8000,
            talkgroup_id: tg,
            source_id: 4097,
            timestamp_ms: ts,
        }
    }

    #[test]
    fn test_empty_enabled_set_allows_all() {
        let mut mgr = CallManager::new(TalkgroupPolicy::default());
        let mut out = Vec::new();
        mgr.handle_grant(grant(100, CallType::Group), 0, &mut out);
        assert_eq!(mgr.active_call_count(), 1);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_disabled_talkgroup_filtered() {
        let policy = TalkgroupPolicy {
            enabled: [200].into_iter().collect(),
            ..TalkgroupPolicy::default()
        };
        let mut mgr = CallManager::new(policy);
        let mut out = Vec::new();
        mgr.handle_grant(grant(100, CallType::Group), 0, &mut out);
        assert_eq!(mgr.active_call_count(), 0);
        assert!(out.is_empty());
        assert_eq!(mgr.filtered_grants, 1);
    }

    #[test]
    fn test_repeat_grant_updates_not_duplicates() {
        let mut mgr = CallManager::new(TalkgroupPolicy::default());
        let mut out = Vec::new();
        mgr.handle_grant(grant(100, CallType::Group), 0, &mut out);
        mgr.handle_grant(grant(100, CallType::Group), 100, &mut out);
        assert_eq!(mgr.active_call_count(), 1);
        assert_eq!(mgr.total_calls, 1);
        assert_eq!(out.len(), 1, "refresh emits no second grant event");
        assert_eq!(mgr.active_call(100).map(|c| c.last_audio_ms), Some(100));
    }

    #[test]
    fn test_timeout_window() {
        let mut mgr = CallManager::new(TalkgroupPolicy::default());
        let mut out = Vec::new();
        let t0 = 10_000;
        mgr.handle_grant(grant(100, CallType::Group), t0, &mut out);

        mgr.tick(t0 + 4999, &mut out);
        assert_eq!(mgr.active_call_count(), 1, "still open at 4999 ms");

        mgr.tick(t0 + 5001, &mut out);
        assert_eq!(mgr.active_call_count(), 0, "closed after 5001 ms");

        let ended = out
            .iter()
            .find_map(|e| match e {
                Event::CallEnded {
                    talkgroup_id,
                    duration_ms,
                } => Some((*talkgroup_id, *duration_ms)),
                _ => None,
            })
            .expect("call-ended event");
        assert_eq!(ended.0, 100);
        assert!(
            (4999..=5001).contains(&ended.1),
            "duration {} out of window",
            ended.1
        );
    }

    #[test]
    fn test_audio_refreshes_timeout() {
        let mut mgr = CallManager::new(TalkgroupPolicy::default());
        let mut out = Vec::new();
        mgr.handle_grant(grant(100, CallType::Group), 0, &mut out);
        mgr.handle_audio_frame(frame(100, 4000), 4000);
        mgr.tick(5001, &mut out);
        assert_eq!(mgr.active_call_count(), 1, "audio at 4000 keeps the call");
        mgr.tick(9002, &mut out);
        assert_eq!(mgr.active_call_count(), 0);
    }

    #[test]
    fn test_orphan_audio_dropped() {
        let mut mgr = CallManager::new(TalkgroupPolicy::default());
        mgr.handle_audio_frame(frame(55, 0), 0);
        assert_eq!(mgr.orphan_frames, 1);
        assert_eq!(mgr.queued_frames(), 0);
    }

    #[test]
    fn test_emergency_priority_override() {
        let policy = TalkgroupPolicy {
            priorities: [(100u32, 2u8)].into_iter().collect(),
            ..TalkgroupPolicy::default()
        };
        let mut mgr = CallManager::new(policy);
        let mut out = Vec::new();
        mgr.handle_grant(grant(100, CallType::Emergency), 0, &mut out);
        assert_eq!(mgr.active_call(100).map(|c| c.grant.priority), Some(10));
    }

    #[test]
    fn test_overflow_drops_lowest_priority_first() {
        let policy = TalkgroupPolicy {
            priorities: [(1u32, 2u8), (2u32, 8u8)].into_iter().collect(),
            ..TalkgroupPolicy::default()
        };
        let mut mgr = CallManager::new(policy);
        mgr.set_queue_capacity(4);
        let mut out = Vec::new();
        mgr.handle_grant(grant(1, CallType::Group), 0, &mut out);
        mgr.handle_grant(grant(2, CallType::Group), 0, &mut out);

        // Fill the queue: two frames per call, then overflow with tg 2
        mgr.handle_audio_frame(frame(1, 10), 10);
        mgr.handle_audio_frame(frame(2, 11), 11);
        mgr.handle_audio_frame(frame(1, 12), 12);
        mgr.handle_audio_frame(frame(2, 13), 13);
        mgr.handle_audio_frame(frame(2, 14), 14);

        assert_eq!(mgr.dropped_frames, 1);
        // The oldest frame of tg 1 (priority 2) was sacrificed
        let frames: Vec<(u32, u64)> = std::iter::from_fn(|| mgr.pop_frame())
            .map(|f| (f.talkgroup_id, f.timestamp_ms))
            .collect();
        assert_eq!(
            frames,
            vec![(2, 11), (1, 12), (2, 13), (2, 14)],
            "tg 1 frame at t=10 dropped"
        );
    }
}
