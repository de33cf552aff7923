//! End-to-end control-channel scenarios: synthesized baseband in, grant
//! events out.

use num_complex::Complex32;

use tr_dsp::testsig::fm_modulate;
use tr_protocol::{push_bits, LogicalChannel, ProtocolUnit};
use tr_trunking::receiver::ControlReceiver;
use tr_trunking::{CallGrant, Event, Parser, SystemParams, SystemType};

const P25_FS: u32 = 96_000;
const SMARTNET_FS: u32 = 36_000;

fn p25_identifier_update(id: u8, base_hz: f64, spacing_hz: f64) -> Vec<u8> {
    let mut bits = Vec::new();
    push_bits(&mut bits, 0x3C, 6);
    push_bits(&mut bits, id as u64, 4);
    push_bits(&mut bits, (base_hz / 5000.0) as u64, 32);
    push_bits(&mut bits, (spacing_hz / 125.0) as u64, 10);
    push_bits(&mut bits, 0, 10);
    bits.resize(80, 0);
    bits
}

fn p25_group_grant(options: u64, freq_id: u64, tg: u64, src: u64) -> Vec<u8> {
    let mut bits = Vec::new();
    push_bits(&mut bits, 0x00, 6);
    push_bits(&mut bits, options, 8);
    push_bits(&mut bits, 0, 8);
    push_bits(&mut bits, freq_id, 12);
    push_bits(&mut bits, tg, 16);
    push_bits(&mut bits, src, 24);
    bits.resize(80, 0);
    bits
}

/// C4FM: symbol index 0..3 to deviation in Hz.
fn c4fm_modulate(bits: &[u8], fs: u32) -> Vec<Complex32> {
    let symbols = tr_protocol::p25::bits_to_symbols(bits);
    let devs: Vec<f32> = symbols.iter().map(|&s| (2.0 * s - 3.0) * 600.0).collect();
    fm_modulate(&devs, fs, (fs / 4800) as usize)
}

/// Binary FSK at 3600 baud.
fn fsk2_modulate(bits: &[u8], fs: u32) -> Vec<Complex32> {
    let devs: Vec<f32> = bits
        .iter()
        .map(|&b| if b == 1 { 1200.0 } else { -1200.0 })
        .collect();
    fm_modulate(&devs, fs, (fs / 3600) as usize)
}

fn carrier(samples: usize) -> Vec<Complex32> {
    vec![Complex32::new(1.0, 0.0); samples]
}

/// Low-deviation filler symbols (alternating inner levels) that settle the
/// demodulator filters without resembling a sync word.
fn pad_symbols(count: usize) -> Vec<u8> {
    let mut bits = Vec::with_capacity(count * 2);
    for i in 0..count {
        if i % 2 == 0 {
            bits.extend([0, 1]); // symbol 1
        } else {
            bits.extend([1, 0]); // symbol 2
        }
    }
    bits
}

/// Run blocks through the receiver, 4096 samples at a time.
fn run(receiver: &mut ControlReceiver, iq: &[Complex32]) -> (Vec<Event>, Vec<ProtocolUnit>) {
    let mut events = Vec::new();
    let mut voice = Vec::new();
    let mut now_ms = 0u64;
    for block in iq.chunks(4096) {
        receiver.process_iq(block, now_ms, &mut events, &mut voice);
        now_ms += 10;
    }
    (events, voice)
}

fn grants(events: &[Event]) -> Vec<&CallGrant> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::CallGrant(g) => Some(g),
            _ => None,
        })
        .collect()
}

#[test]
fn p25_grant_end_to_end() {
    let mut params = SystemParams::new(SystemType::P25Phase1, vec![851_012_500.0]);
    params.nac = 0x293;
    let mut receiver = ControlReceiver::new(params, P25_FS, None).expect("p25 chain");

    let update = tr_protocol::p25::build_tsbk_frame(
        0x293,
        &tr_protocol::p25::seal_tsbk_payload(&p25_identifier_update(1, 851_000_000.0, 25_000.0)),
    );
    let grant = tr_protocol::p25::build_tsbk_frame(
        0x293,
        &tr_protocol::p25::seal_tsbk_payload(&p25_group_grant(0, 1, 100, 4097)),
    );

    let mut bits = pad_symbols(20);
    bits.extend(update);
    bits.extend(grant);
    bits.extend(pad_symbols(20));
    let iq = c4fm_modulate(&bits, P25_FS);

    let (events, _) = run(&mut receiver, &iq);
    let grants = grants(&events);
    assert_eq!(grants.len(), 1, "exactly one grant, got {:?}", events);
    assert_eq!(grants[0].talkgroup_id, 100);
    assert_eq!(grants[0].source_id, 4097);
    assert_eq!(grants[0].frequency_hz, 851_025_000.0);
    assert!(!grants[0].encrypted);
}

#[test]
fn p25_wrong_nac_suppressed() {
    let mut params = SystemParams::new(SystemType::P25Phase1, vec![851_012_500.0]);
    params.nac = 0x111;
    let mut receiver = ControlReceiver::new(params, P25_FS, None).expect("p25 chain");

    let mut bits = pad_symbols(20);
    bits.extend(tr_protocol::p25::build_tsbk_frame(
        0x293,
        &tr_protocol::p25::seal_tsbk_payload(&p25_identifier_update(1, 851_000_000.0, 25_000.0)),
    ));
    bits.extend(tr_protocol::p25::build_tsbk_frame(
        0x293,
        &tr_protocol::p25::seal_tsbk_payload(&p25_group_grant(0, 1, 100, 4097)),
    ));
    bits.extend(pad_symbols(20));
    let iq = c4fm_modulate(&bits, P25_FS);

    let (events, _) = run(&mut receiver, &iq);
    assert!(grants(&events).is_empty(), "NAC filter must hold");
}

#[test]
fn smartnet_grant_end_to_end() {
    let mut params = SystemParams::new(SystemType::Smartnet, vec![851_012_500.0]);
    params.baud_rate = 3600;
    params.base_frequency_hz = 851_000_000.0;
    params.channel_spacing_hz = 25_000.0;
    let mut receiver = ControlReceiver::new(params, SMARTNET_FS, None).expect("smartnet chain");

    // Group grant: command high-5 bits zero, channel 3
    let frame = tr_protocol::smartnet::build_osw_frame(1234, 0, 3, 0);

    let mut bits = vec![0u8; 24];
    bits.extend(&frame);
    bits.extend(std::iter::repeat(0).take(24));
    let iq = fsk2_modulate(&bits, SMARTNET_FS);

    let (events, _) = run(&mut receiver, &iq);
    let grants = grants(&events);
    assert_eq!(grants.len(), 1);
    assert_eq!(grants[0].talkgroup_id, 1234);
    assert_eq!(grants[0].frequency_hz, 851_075_000.0);
    assert!(!grants[0].encrypted);
}

#[test]
fn smartnet_crc_failure_suppresses_grant() {
    let mut params = SystemParams::new(SystemType::Smartnet, vec![851_012_500.0]);
    params.base_frequency_hz = 851_000_000.0;
    let mut receiver = ControlReceiver::new(params, SMARTNET_FS, None).expect("smartnet chain");

    let mut frame = tr_protocol::smartnet::build_osw_frame(1234, 0, 3, 0);
    // One bit flipped inside the frame, outside the sync word
    frame[35] ^= 1;

    let mut bits = vec![0u8; 24];
    bits.extend(&frame);
    bits.extend(std::iter::repeat(0).take(24));
    let iq = fsk2_modulate(&bits, SMARTNET_FS);

    let before = receiver.counters().crc_failures;
    let (events, _) = run(&mut receiver, &iq);
    assert!(grants(&events).is_empty());
    assert_eq!(
        receiver.counters().crc_failures - before,
        1,
        "exactly one CRC failure counted"
    );
}

#[test]
fn tetra_identification_then_encrypted_grant() {
    // Symbol-level injection through the TETRA framer and parser
    let mut params = SystemParams::new(SystemType::Tetra, vec![382_612_500.0]);
    params.base_frequency_hz = 380_000_000.0;
    params.channel_spacing_hz = 25_000.0;
    params.duplex_offset_hz = 12_500.0;

    let mut framer = tr_protocol::tetra::TetraFramer::new();
    let mut parser = Parser::new(params);

    let mut bsch = Vec::new();
    push_bits(&mut bsch, 234, 10);
    push_bits(&mut bsch, 14, 14);
    push_bits(&mut bsch, 1, 6);
    bsch.resize(tr_protocol::tetra::DATA_BITS, 0);

    let mut bnch = Vec::new();
    push_bits(&mut bnch, 1, 16);
    bnch.resize(tr_protocol::tetra::DATA_BITS, 0);

    let mut setup = Vec::new();
    push_bits(&mut setup, tr_protocol::tetra::PDU_D_SETUP as u64, 8);
    push_bits(&mut setup, 0, 4);
    push_bits(&mut setup, 1001, 24);
    push_bits(&mut setup, 456_789, 24);
    push_bits(&mut setup, 112, 12);
    push_bits(&mut setup, 1, 2); // encryption class: TEA1
    setup.resize(tr_protocol::tetra::DATA_BITS, 0);

    let mut idle = vec![0u8; tr_protocol::tetra::DATA_BITS];
    idle[7] = 1; // PDU_BROADCAST

    // Frame 0: BSCH + traffic; frame 1: BNCH + traffic; frame 2: D-SETUP
    let mut bits = Vec::new();
    bits.extend(tr_protocol::tetra::build_slot(&bsch, 0));
    for _ in 0..3 {
        bits.extend(tr_protocol::tetra::build_slot(&idle, 0));
    }
    bits.extend(tr_protocol::tetra::build_slot(&bnch, 1));
    for _ in 0..3 {
        bits.extend(tr_protocol::tetra::build_slot(&idle, 1));
    }
    bits.extend(tr_protocol::tetra::build_slot(&setup, 2));

    let symbols = tr_protocol::tetra::bits_to_symbols(&bits);
    let mut units = Vec::new();
    framer.process_symbols(&symbols, &mut units);

    let mut events = Vec::new();
    let mut voice = Vec::new();
    for unit in &units {
        match unit.channel {
            LogicalChannel::Tch | LogicalChannel::Stch => voice.push(unit.clone()),
            _ => parser.handle_unit(unit, 0, &mut events),
        }
    }

    // Identification precedes the grant
    let ident_pos = events
        .iter()
        .position(|e| matches!(e, Event::SystemIdentified(_)))
        .expect("system identified");
    match &events[ident_pos] {
        Event::SystemIdentified(info) => {
            assert_eq!(info.mcc, Some(234));
            assert_eq!(info.mnc, Some(14));
            assert_eq!(info.color_code, Some(1));
        }
        _ => unreachable!(),
    }

    let grant_pos = events
        .iter()
        .position(|e| matches!(e, Event::CallGrant(_)))
        .expect("grant emitted");
    assert!(ident_pos < grant_pos);
    match &events[grant_pos] {
        Event::CallGrant(g) => {
            assert_eq!(g.talkgroup_id, 1001);
            assert_eq!(g.source_id, 456_789);
            assert_eq!(g.frequency_hz, 382_812_500.0);
            assert!(g.encrypted);
            assert_eq!(g.encryption_label, tr_trunking::EncryptionLabel::Tea1);
        }
        _ => unreachable!(),
    }

    // Traffic slots were routed to the voice path, not the parser
    assert_eq!(voice.len(), 6);
}

#[test]
fn symbol_rate_invariant_through_receiver() {
    // The demodulator emits floor(len / sps) +/- 1 symbols per block
    let mut demod = tr_dsp::Demod::c4fm(P25_FS);
    let iq = carrier(48_000);
    let mut symbols = Vec::new();
    demod.process(&iq, &mut symbols);
    let expected = 48_000 / (P25_FS / 4800) as usize;
    assert!((symbols.len() as i64 - expected as i64).abs() <= 1);
}
