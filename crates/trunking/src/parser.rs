// Copyright 2025-2026 CEMAXECUTER LLC

//! Trunking signaling parsers: route validated protocol units by logical
//! channel, maintain system identity and the channel identifier table, and
//! emit grant events.

use tr_protocol::{bits_to_u32, LogicalChannel, ProtocolUnit};

use crate::channel_table::{Band, ChannelTable};
use crate::{CallGrant, CallType, EncryptionLabel, Event, SystemInfo, SystemParams};

/// How long a grant may wait for an identifier update before it is dropped.
const GRANT_HOLD_MS: u64 = 1000;

const DEFAULT_PRIORITY: u8 = 5;
const EMERGENCY_PRIORITY: u8 = 10;

// P25 TSBK opcodes
const TSBK_GROUP_VOICE_GRANT: u32 = 0x00;
const TSBK_GROUP_VOICE_UPDATE: u32 = 0x02;
const TSBK_UNIT_VOICE_GRANT: u32 = 0x04;
const TSBK_RFSS_STATUS: u32 = 0x38;
const TSBK_NETWORK_STATUS: u32 = 0x3A;
const TSBK_ADJACENT_SITE: u32 = 0x3B;
const TSBK_IDENTIFIER_UPDATE: u32 = 0x3C;

// DMR CSBK opcodes
const CSBK_CHANNEL_GRANT: u32 = 0x06;
const CSBK_TALKGROUP_ANNOUNCE: u32 = 0x08;
const CSBK_PREAMBLE: u32 = 0x3D;

// SmartNet
const OSW_IDLE: u16 = 0x2F0;

/// System identity: locked to the first system seen.
#[derive(Debug, Clone, PartialEq)]
enum Identity {
    Unidentified,
    Identified(SystemInfo),
}

struct PendingGrant {
    freq_id: u16,
    grant: CallGrant,
    deadline_ms: u64,
}

/// Shared parser counters. Parse failures are never fatal.
#[derive(Debug, Default, Clone, Copy)]
pub struct ParserCounters {
    pub grants_emitted: u64,
    pub unknown_opcodes: u64,
    pub parse_errors: u64,
    pub unresolved_grants: u64,
    pub ignored_contradictions: u64,
}

/// Signaling parser for one configured trunking system.
pub struct Parser {
    params: SystemParams,
    identity: Identity,
    table: ChannelTable,
    pending: Vec<PendingGrant>,
    pub counters: ParserCounters,
}

impl Parser {
    pub fn new(params: SystemParams) -> Self {
        Self {
            params,
            identity: Identity::Unidentified,
            table: ChannelTable::new(),
            pending: Vec::new(),
            counters: ParserCounters::default(),
        }
    }

    pub fn channel_table(&self) -> &ChannelTable {
        &self.table
    }

    pub fn identified(&self) -> bool {
        matches!(self.identity, Identity::Identified(_))
    }

    /// Route a validated unit. Invalid units never make it here.
    pub fn handle_unit(&mut self, unit: &ProtocolUnit, now_ms: u64, out: &mut Vec<Event>) {
        if !unit.crc_ok {
            return;
        }
        match unit.channel {
            LogicalChannel::P25Tsbk => self.handle_tsbk(unit, now_ms, out),
            LogicalChannel::Osw => self.handle_osw(unit, now_ms, out),
            LogicalChannel::DmrCsbk => self.handle_csbk(unit, now_ms, out),
            LogicalChannel::DmrVoiceTerminator => self.handle_dmr_terminator(unit, out),
            LogicalChannel::Bsch => self.handle_bsch(unit, out),
            LogicalChannel::Bnch => self.handle_bnch(unit),
            LogicalChannel::Mcch => self.handle_mcch(unit, now_ms, out),
            _ => {}
        }
    }

    /// Expire grants still waiting for a frequency mapping.
    pub fn tick(&mut self, now_ms: u64) {
        let before = self.pending.len();
        self.pending.retain(|p| p.deadline_ms > now_ms);
        let dropped = before - self.pending.len();
        if dropped > 0 {
            self.counters.unresolved_grants += dropped as u64;
            log::debug!("dropped {} grants with unresolved frequency IDs", dropped);
        }
    }

    fn identify(&mut self, info: SystemInfo, out: &mut Vec<Event>) {
        match &self.identity {
            Identity::Unidentified => {
                log::info!("system identified: {:?}", info);
                self.identity = Identity::Identified(info.clone());
                out.push(Event::SystemIdentified(info));
            }
            Identity::Identified(current) => {
                if *current != info {
                    self.counters.ignored_contradictions += 1;
                    log::warn!(
                        "ignoring contradictory system broadcast (locked to first-seen): {:?}",
                        info
                    );
                }
            }
        }
    }

    fn emit_grant(&mut self, grant: CallGrant, out: &mut Vec<Event>) {
        self.counters.grants_emitted += 1;
        log::info!(
            "call grant: tg={} src={} freq={:.4} MHz{}",
            grant.talkgroup_id,
            grant.source_id,
            grant.frequency_hz / 1e6,
            if grant.encrypted { " [encrypted]" } else { "" }
        );
        out.push(Event::CallGrant(grant));
    }

    // -- P25 ---------------------------------------------------------------

    fn handle_tsbk(&mut self, unit: &ProtocolUnit, now_ms: u64, out: &mut Vec<Event>) {
        let bits = &unit.bits;
        if bits.len() < 80 {
            self.counters.parse_errors += 1;
            return;
        }
        let opcode = bits_to_u32(bits, 0, 6);

        match opcode {
            TSBK_GROUP_VOICE_GRANT | TSBK_GROUP_VOICE_UPDATE => {
                let options = bits_to_u32(bits, 6, 8);
                let freq_id = bits_to_u32(bits, 22, 12) as u16;
                let talkgroup = bits_to_u32(bits, 34, 16);
                let source = if opcode == TSBK_GROUP_VOICE_GRANT {
                    bits_to_u32(bits, 50, 24)
                } else {
                    0
                };

                let emergency = options & 0x80 != 0;
                let encrypted = options & 0x40 != 0;
                let grant = CallGrant {
                    talkgroup_id: talkgroup,
                    source_id: source,
                    frequency_hz: 0.0,
                    call_type: if emergency {
                        CallType::Emergency
                    } else {
                        CallType::Group
                    },
                    encrypted,
                    encryption_label: if encrypted {
                        EncryptionLabel::Unknown
                    } else {
                        EncryptionLabel::Clear
                    },
                    priority: if emergency {
                        EMERGENCY_PRIORITY
                    } else {
                        DEFAULT_PRIORITY
                    },
                    timestamp_ms: now_ms,
                };
                self.grant_with_frequency(freq_id, grant, now_ms, out);
            }
            TSBK_UNIT_VOICE_GRANT => {
                let freq_id = bits_to_u32(bits, 22, 12) as u16;
                let target = bits_to_u32(bits, 34, 16);
                let source = bits_to_u32(bits, 50, 24);
                let grant = CallGrant {
                    talkgroup_id: target,
                    source_id: source,
                    frequency_hz: 0.0,
                    call_type: CallType::Private,
                    encrypted: false,
                    encryption_label: EncryptionLabel::Clear,
                    priority: DEFAULT_PRIORITY,
                    timestamp_ms: now_ms,
                };
                self.grant_with_frequency(freq_id, grant, now_ms, out);
            }
            TSBK_IDENTIFIER_UPDATE => {
                let identifier = bits_to_u32(bits, 6, 4) as u8;
                let base = bits_to_u32(bits, 10, 32);
                let spacing = bits_to_u32(bits, 42, 10);
                let offset = bits_to_u32(bits, 52, 10);

                let band = Band {
                    base_hz: base as f64 * 5_000.0,
                    spacing_hz: spacing as f64 * 125.0,
                    offset_hz: offset as f64,
                };
                log::debug!(
                    "identifier update: id={} base={:.4} MHz spacing={} Hz",
                    identifier,
                    band.base_hz / 1e6,
                    band.spacing_hz
                );
                self.table.insert(identifier, band);
                self.resolve_pending(out);
            }
            TSBK_NETWORK_STATUS => {
                let wacn = bits_to_u32(bits, 6, 20);
                let system_id = bits_to_u32(bits, 26, 12);
                let info = SystemInfo {
                    name: self.params.name.clone(),
                    nac: Some(self.params.nac),
                    wacn: Some(wacn),
                    system_id: Some(system_id),
                    ..SystemInfo::default()
                };
                self.identify(info, out);
            }
            TSBK_RFSS_STATUS | TSBK_ADJACENT_SITE => {
                log::debug!("p25 site status broadcast, opcode {:#04x}", opcode);
            }
            _ => {
                self.counters.unknown_opcodes += 1;
                log::debug!("unhandled TSBK opcode {:#04x}", opcode);
            }
        }
    }

    fn grant_with_frequency(
        &mut self,
        freq_id: u16,
        mut grant: CallGrant,
        now_ms: u64,
        out: &mut Vec<Event>,
    ) {
        match self.table.resolve(freq_id) {
            Some(freq) => {
                grant.frequency_hz = freq;
                self.emit_grant(grant, out);
            }
            None => {
                // Hold until an identifier update arrives or the deadline
                // passes
                log::debug!("grant for unknown frequency ID {:#05x} held", freq_id);
                self.pending.push(PendingGrant {
                    freq_id,
                    grant,
                    deadline_ms: now_ms + GRANT_HOLD_MS,
                });
            }
        }
    }

    fn resolve_pending(&mut self, out: &mut Vec<Event>) {
        let pending = std::mem::take(&mut self.pending);
        for p in pending {
            match self.table.resolve(p.freq_id) {
                Some(freq) => {
                    let mut grant = p.grant;
                    grant.frequency_hz = freq;
                    self.emit_grant(grant, out);
                }
                None => self.pending.push(p),
            }
        }
    }

    // -- SmartNet ----------------------------------------------------------

    fn handle_osw(&mut self, unit: &ProtocolUnit, now_ms: u64, out: &mut Vec<Event>) {
        let bits = &unit.bits;
        if bits.len() < 24 {
            self.counters.parse_errors += 1;
            return;
        }
        let address = bits_to_u32(bits, 0, 10);
        let command = bits_to_u32(bits, 13, 11) as u16;

        if self.identity == Identity::Unidentified {
            let info = SystemInfo {
                name: self.params.name.clone(),
                ..SystemInfo::default()
            };
            self.identify(info, out);
        }

        if (command >> 6) & 0x1F == 0 {
            // Group voice channel grant
            let channel = command & 0x3F;
            let frequency =
                self.params.base_frequency_hz + channel as f64 * self.params.channel_spacing_hz;
            let grant = CallGrant {
                talkgroup_id: address,
                source_id: 0,
                frequency_hz: frequency,
                call_type: CallType::Group,
                encrypted: false,
                encryption_label: EncryptionLabel::Clear,
                priority: DEFAULT_PRIORITY,
                timestamp_ms: now_ms,
            };
            self.emit_grant(grant, out);
        } else if command == OSW_IDLE {
            log::trace!("smartnet idle");
        } else {
            log::debug!("smartnet command {:#05x} addr {}", command, address);
        }
    }

    // -- DMR ---------------------------------------------------------------

    fn handle_csbk(&mut self, unit: &ProtocolUnit, now_ms: u64, out: &mut Vec<Event>) {
        let bits = &unit.bits;
        if bits.len() < 64 {
            self.counters.parse_errors += 1;
            return;
        }
        let opcode = bits_to_u32(bits, 0, 6);

        if self.identity == Identity::Unidentified {
            let info = SystemInfo {
                name: self.params.name.clone(),
                color_code: self.params.color_code,
                ..SystemInfo::default()
            };
            self.identify(info, out);
        }

        match opcode {
            CSBK_CHANNEL_GRANT => {
                let slot_flag = bits_to_u32(bits, 8, 1);
                let source = bits_to_u32(bits, 16, 24);
                let destination = bits_to_u32(bits, 40, 24);

                // Capacity Plus: voice stays on the configured rest channel
                let frequency = self
                    .params
                    .rest_channel_hz
                    .or_else(|| self.params.control_channels.first().copied())
                    .unwrap_or(0.0);

                log::debug!("dmr channel grant on slot {}", slot_flag);
                let grant = CallGrant {
                    talkgroup_id: destination,
                    source_id: source,
                    frequency_hz: frequency,
                    call_type: CallType::Group,
                    encrypted: false,
                    encryption_label: EncryptionLabel::Clear,
                    priority: DEFAULT_PRIORITY,
                    timestamp_ms: now_ms,
                };
                self.emit_grant(grant, out);
            }
            CSBK_TALKGROUP_ANNOUNCE => {
                let talkgroup = bits_to_u32(bits, 16, 24);
                log::debug!("dmr talkgroup announce: {}", talkgroup);
            }
            CSBK_PREAMBLE => log::trace!("dmr preamble"),
            _ => {
                self.counters.unknown_opcodes += 1;
                log::debug!("unhandled CSBK opcode {:#04x}", opcode);
            }
        }
    }

    fn handle_dmr_terminator(&mut self, unit: &ProtocolUnit, out: &mut Vec<Event>) {
        if unit.bits.len() < 64 {
            return;
        }
        let destination = bits_to_u32(&unit.bits, 40, 24);
        out.push(Event::CallRelease {
            talkgroup_id: destination,
        });
    }

    // -- TETRA -------------------------------------------------------------

    fn handle_bsch(&mut self, unit: &ProtocolUnit, out: &mut Vec<Event>) {
        let bits = &unit.bits;
        if bits.len() < 30 {
            self.counters.parse_errors += 1;
            return;
        }
        let mcc = bits_to_u32(bits, 0, 10) as u16;
        let mnc = bits_to_u32(bits, 10, 14) as u16;
        let color_code = bits_to_u32(bits, 24, 6) as u8;

        let info = SystemInfo {
            name: self.params.name.clone(),
            mcc: Some(mcc),
            mnc: Some(mnc),
            color_code: Some(color_code),
            ..SystemInfo::default()
        };
        self.identify(info, out);
    }

    fn handle_bnch(&mut self, unit: &ProtocolUnit) {
        let bits = &unit.bits;
        if bits.len() < 32 {
            self.counters.parse_errors += 1;
            return;
        }
        let location_area = bits_to_u32(bits, 0, 16) as u16;
        let name = decode_text(bits, 32);

        if let Identity::Identified(info) = &mut self.identity {
            info.location_area = Some(location_area);
            if !name.is_empty() {
                log::info!("tetra network: {} (la={})", name, location_area);
                info.network_name = Some(name);
            }
        }
    }

    fn handle_mcch(&mut self, unit: &ProtocolUnit, now_ms: u64, out: &mut Vec<Event>) {
        let bits = &unit.bits;
        if bits.len() < 80 {
            self.counters.parse_errors += 1;
            return;
        }
        let pdu_type = bits_to_u32(bits, 0, 8) as u8;

        match pdu_type {
            tr_protocol::tetra::PDU_D_SETUP => {
                let call_type_bits = bits_to_u32(bits, 8, 4);
                let talkgroup = bits_to_u32(bits, 12, 24);
                let source = bits_to_u32(bits, 36, 24);
                let freq_index = bits_to_u32(bits, 60, 12);
                let enc_class = bits_to_u32(bits, 72, 2);

                let call_type = match call_type_bits {
                    0 => CallType::Group,
                    1 => CallType::Private,
                    4 => CallType::Emergency,
                    other => {
                        log::debug!("tetra call type {} treated as group", other);
                        CallType::Group
                    }
                };

                let label = match enc_class {
                    0 => EncryptionLabel::Clear,
                    1 => EncryptionLabel::Tea1,
                    2 => EncryptionLabel::Tea2,
                    _ => {
                        if bits_to_u32(bits, 74, 1) == 0 {
                            EncryptionLabel::Tea3
                        } else {
                            EncryptionLabel::Tea4
                        }
                    }
                };

                let frequency = self.params.base_frequency_hz
                    + freq_index as f64 * self.params.channel_spacing_hz
                    + self.params.duplex_offset_hz;

                let grant = CallGrant {
                    talkgroup_id: talkgroup,
                    source_id: source,
                    frequency_hz: frequency,
                    call_type,
                    encrypted: label != EncryptionLabel::Clear,
                    encryption_label: label,
                    priority: if call_type == CallType::Emergency {
                        EMERGENCY_PRIORITY
                    } else {
                        DEFAULT_PRIORITY
                    },
                    timestamp_ms: now_ms,
                };
                self.emit_grant(grant, out);
            }
            tr_protocol::tetra::PDU_D_RELEASE => {
                let talkgroup = bits_to_u32(bits, 8, 24);
                log::info!("tetra call release: tg={}", talkgroup);
                out.push(Event::CallRelease {
                    talkgroup_id: talkgroup,
                });
            }
            tr_protocol::tetra::PDU_BROADCAST | tr_protocol::tetra::PDU_D_CONNECT => {}
            tr_protocol::tetra::PDU_D_SDS => {
                let text = decode_text(bits, 32);
                if !text.is_empty() {
                    log::info!("tetra sds: {}", text);
                }
            }
            _ => {
                self.counters.unknown_opcodes += 1;
            }
        }
    }
}

/// Extract printable ASCII packed 8 bits per character.
fn decode_text(bits: &[u8], start: usize) -> String {
    let mut text = String::new();
    let mut pos = start;
    while pos + 8 <= bits.len() {
        let ch = bits_to_u32(bits, pos, 8) as u8;
        if (32..127).contains(&ch) {
            text.push(ch as char);
        }
        pos += 8;
    }
    text.trim().to_string()
}
