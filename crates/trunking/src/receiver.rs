//! The in-worker decode chain: demodulator, framer, and parser composed as
//! a straight function call path over each IQ block.

use num_complex::Complex32;

use tr_dsp::Demod;
use tr_protocol::dmr::DmrFramer;
use tr_protocol::p25::P25Framer;
use tr_protocol::smartnet::SmartnetFramer;
use tr_protocol::sync::SyncState;
use tr_protocol::tetra::TetraFramer;
use tr_protocol::{LogicalChannel, ProtocolUnit};

use crate::parser::{Parser, ParserCounters};
use crate::{Event, SystemParams, SystemType};

/// Modulation override from the configuration document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modulation {
    C4fm,
    Fsk,
    Gmsk,
    Qpsk,
}

/// Physical-layer framer for one trunking family.
pub enum Framer {
    P25(P25Framer),
    Smartnet(SmartnetFramer),
    Dmr(DmrFramer),
    Tetra(TetraFramer),
}

impl Framer {
    fn process_symbols(&mut self, symbols: &[f32], out: &mut Vec<ProtocolUnit>) {
        match self {
            Framer::P25(f) => f.process_symbols(symbols, out),
            Framer::Smartnet(f) => f.process_symbols(symbols, out),
            Framer::Dmr(f) => f.process_symbols(symbols, out),
            Framer::Tetra(f) => f.process_symbols(symbols, out),
        }
    }

    pub fn sync_state(&self) -> SyncState {
        match self {
            Framer::P25(f) => f.sync_state(),
            Framer::Smartnet(f) => f.sync_state(),
            Framer::Dmr(f) => f.sync_state(),
            Framer::Tetra(f) => f.sync_state(),
        }
    }

    pub fn crc_failures(&self) -> u64 {
        match self {
            Framer::P25(f) => f.crc_failures,
            Framer::Smartnet(f) => f.crc_failures,
            Framer::Dmr(f) => f.crc_failures,
            Framer::Tetra(f) => f.crc_failures,
        }
    }

    pub fn sync_losses(&self) -> u64 {
        match self {
            Framer::P25(f) => f.sync_losses,
            Framer::Smartnet(f) => f.sync_losses,
            Framer::Dmr(f) => f.sync_losses,
            Framer::Tetra(f) => f.sync_losses,
        }
    }

    pub fn frames_decoded(&self) -> u64 {
        match self {
            Framer::P25(f) => f.frames_decoded,
            Framer::Smartnet(f) => f.frames_decoded,
            Framer::Dmr(f) => f.frames_decoded,
            Framer::Tetra(f) => f.bursts_decoded,
        }
    }
}

/// Snapshot of the decode-chain health counters.
#[derive(Debug, Clone, Copy)]
pub struct ReceiverCounters {
    pub frames_decoded: u64,
    pub crc_failures: u64,
    pub sync_losses: u64,
    pub parser: ParserCounters,
}

/// Control-channel receiver: one demodulator, one framer, one parser.
pub struct ControlReceiver {
    demod: Demod,
    framer: Framer,
    parser: Parser,
    symbols: Vec<f32>,
    units: Vec<ProtocolUnit>,
}

impl ControlReceiver {
    /// Build the decode chain for the configured system. Fails on families
    /// this receiver cannot decode.
    pub fn new(
        params: SystemParams,
        sample_rate: u32,
        modulation: Option<Modulation>,
    ) -> Result<Self, String> {
        let (demod, framer) = match params.system_type {
            SystemType::P25Phase1 | SystemType::P25Phase2 => {
                let demod = match modulation {
                    None | Some(Modulation::C4fm) => Demod::c4fm(sample_rate),
                    Some(Modulation::Qpsk) => Demod::pi4_dqpsk(sample_rate, 4800, 0.2),
                    Some(other) => {
                        log::warn!("{:?} override ignored for P25, using C4FM", other);
                        Demod::c4fm(sample_rate)
                    }
                };
                (demod, Framer::P25(P25Framer::new(params.nac)))
            }
            SystemType::Smartnet | SystemType::Smartzone => (
                Demod::fsk2(sample_rate, params.baud_rate),
                Framer::Smartnet(SmartnetFramer::new()),
            ),
            SystemType::Dmr => (
                Demod::fsk4(sample_rate, 4800),
                Framer::Dmr(DmrFramer::new(params.color_code)),
            ),
            SystemType::Tetra => (
                Demod::pi4_dqpsk(sample_rate, 18_000, 0.35),
                Framer::Tetra(TetraFramer::new()),
            ),
            other => {
                return Err(format!("unsupported system type: {}", other.as_str()));
            }
        };

        Ok(Self {
            demod,
            framer,
            parser: Parser::new(params),
            symbols: Vec::new(),
            units: Vec::new(),
        })
    }

    /// Process one complex baseband block. Signaling events land in
    /// `events`; validated voice-channel units land in `voice` for the
    /// codec black box downstream.
    pub fn process_iq(
        &mut self,
        block: &[Complex32],
        now_ms: u64,
        events: &mut Vec<Event>,
        voice: &mut Vec<ProtocolUnit>,
    ) {
        self.symbols.clear();
        self.demod.process(block, &mut self.symbols);

        self.units.clear();
        self.framer.process_symbols(&self.symbols, &mut self.units);

        for unit in self.units.drain(..) {
            match unit.channel {
                LogicalChannel::P25Voice | LogicalChannel::Tch | LogicalChannel::Stch => {
                    voice.push(unit);
                }
                _ => self.parser.handle_unit(&unit, now_ms, events),
            }
        }
    }

    /// Time-driven maintenance (pending-grant expiry).
    pub fn tick(&mut self, now_ms: u64) {
        self.parser.tick(now_ms);
    }

    pub fn counters(&self) -> ReceiverCounters {
        ReceiverCounters {
            frames_decoded: self.framer.frames_decoded(),
            crc_failures: self.framer.crc_failures(),
            sync_losses: self.framer.sync_losses(),
            parser: self.parser.counters,
        }
    }

    pub fn parser(&self) -> &Parser {
        &self.parser
    }

    pub fn framer(&self) -> &Framer {
        &self.framer
    }

    pub fn reset(&mut self) {
        self.demod.reset();
        match &mut self.framer {
            Framer::P25(f) => f.reset(),
            Framer::Smartnet(f) => f.reset(),
            Framer::Dmr(f) => f.reset(),
            Framer::Tetra(f) => f.reset(),
        }
    }
}
