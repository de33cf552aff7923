// Copyright 2025-2026 CEMAXECUTER LLC

pub mod channel_table;
pub mod parser;
pub mod receiver;

pub use channel_table::{Band, ChannelTable};
pub use parser::Parser;
pub use receiver::ControlReceiver;

/// Trunking families handled by the receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemType {
    P25Phase1,
    P25Phase2,
    Smartnet,
    Smartzone,
    Edacs,
    Dmr,
    Nxdn,
    Tetra,
}

impl SystemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SystemType::P25Phase1 => "P25 Phase 1",
            SystemType::P25Phase2 => "P25 Phase 2",
            SystemType::Smartnet => "Motorola SmartNet",
            SystemType::Smartzone => "Motorola SmartZone",
            SystemType::Edacs => "EDACS",
            SystemType::Dmr => "DMR",
            SystemType::Nxdn => "NXDN",
            SystemType::Tetra => "TETRA",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallType {
    Group,
    Private,
    Emergency,
}

/// Air-interface encryption as signaled by the system. Detection and
/// labeling only; traffic is never decrypted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionLabel {
    Clear,
    Tea1,
    Tea2,
    Tea3,
    Tea4,
    Unknown,
}

/// A voice-channel assignment decoded from the control channel.
#[derive(Debug, Clone)]
pub struct CallGrant {
    pub talkgroup_id: u32,
    pub source_id: u32,
    pub frequency_hz: f64,
    pub call_type: CallType,
    pub encrypted: bool,
    pub encryption_label: EncryptionLabel,
    pub priority: u8,
    pub timestamp_ms: u64,
}

/// System-identifying scalars, populated per family.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SystemInfo {
    pub name: Option<String>,
    pub nac: Option<u16>,
    pub wacn: Option<u32>,
    pub system_id: Option<u32>,
    pub mcc: Option<u16>,
    pub mnc: Option<u16>,
    pub color_code: Option<u8>,
    pub location_area: Option<u16>,
    pub network_name: Option<String>,
}

/// One decoded audio frame, mono PCM.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub pcm: Vec<i16>,
    pub sample_rate: u32,
    pub talkgroup_id: u32,
    pub source_id: u32,
    pub timestamp_ms: u64,
}

/// Events emitted toward the embedding host.
#[derive(Debug, Clone)]
pub enum Event {
    SystemIdentified(SystemInfo),
    CallGrant(CallGrant),
    /// The control channel signaled the end of a call (explicit release or
    /// voice terminator).
    CallRelease { talkgroup_id: u32 },
    /// A call session was closed by the call manager.
    CallEnded { talkgroup_id: u32, duration_ms: u64 },
    AudioFrame(AudioFrame),
    DroppedSamples { count: u64 },
    AudioSinkDown,
}

/// Per-system parameters the decode chain needs, resolved from the
/// configuration document before the pipeline starts.
#[derive(Debug, Clone)]
pub struct SystemParams {
    pub system_type: SystemType,
    pub name: Option<String>,
    /// P25 network access code; zero disables the filter.
    pub nac: u16,
    /// DMR/TETRA colour code filter.
    pub color_code: Option<u8>,
    /// SmartNet control-channel baud rate (3600 or 9600).
    pub baud_rate: u32,
    /// SmartNet/TETRA band base frequency.
    pub base_frequency_hz: f64,
    pub channel_spacing_hz: f64,
    /// TETRA downlink carrier offset from the 25 kHz raster.
    pub duplex_offset_hz: f64,
    /// DMR Capacity Plus rest channel.
    pub rest_channel_hz: Option<f64>,
    pub control_channels: Vec<f64>,
}

impl SystemParams {
    pub fn new(system_type: SystemType, control_channels: Vec<f64>) -> Self {
        Self {
            system_type,
            name: None,
            nac: 0,
            color_code: None,
            baud_rate: 3600,
            base_frequency_hz: 851_000_000.0,
            channel_spacing_hz: 25_000.0,
            duplex_offset_hz: 12_500.0,
            rest_channel_hz: None,
            control_channels,
        }
    }
}
