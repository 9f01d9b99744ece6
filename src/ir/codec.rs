/// IR pulse-array codec: best-effort protocol detection with a confidence
/// score, NEC bit extraction/validation, and canonical encoding.
///
/// Grounded in the header-fingerprint + tolerance-ratio scheme used by the
/// original protocol detector and bit decoder (long space = 1, short space =
/// 0, LSB-first, device/~device/command/~command inverse validation).
///
/// Pure functions, no I/O: a malformed array never panics, it returns
/// `protocol = Unknown, confidence = 0.0`.

use crate::model::PulseArray;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Nec,
    NecRepeat,
    Jvc,
    SonySirc,
    Rc5Rc6,
    DenonSharp,
    Unknown,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Protocol::Nec => "NEC",
            Protocol::NecRepeat => "NEC_REPEAT",
            Protocol::Jvc => "JVC",
            Protocol::SonySirc => "SONY_SIRC",
            Protocol::Rc5Rc6 => "RC5/RC6",
            Protocol::DenonSharp => "DENON/SHARP",
            Protocol::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectResult {
    pub protocol: Protocol,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecodedCode {
    pub protocol: Protocol,
    pub confidence: f64,
    pub device: u8,
    pub command: u8,
    pub hex: String,
}

fn approx(value: f64, target: f64, tolerance: f64) -> bool {
    target * (1.0 - tolerance) <= value && value <= target * (1.0 + tolerance)
}

fn match_ratio(values: &[f64], target: f64, tolerance: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let matches = values.iter().filter(|&&v| approx(v, target, tolerance)).count();
    matches as f64 / values.len() as f64
}

/// Fraction of `values` approximating *either* nominal unit, within
/// `tolerance`. Used for the space train of protocols that encode a data
/// bit as one of two space widths (every space is expected to match one or
/// the other, never neither) — unlike `match_ratio`, which scores against a
/// single fixed target.
fn match_ratio_either(values: &[f64], target_a: f64, target_b: f64, tolerance: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let matches = values.iter().filter(|&&v| approx(v, target_a, tolerance) || approx(v, target_b, tolerance)).count();
    matches as f64 / values.len() as f64
}

/// Blends the header fingerprint (already matched, so fixed at 1.0 — the
/// caller only reaches this once the header has approx-matched) with the
/// body score (fraction of subsequent marks/spaces within tolerance of the
/// protocol's nominal unit), per spec.md §4.1.
fn blend_header_and_body(body_score: f64) -> f64 {
    ((1.0 + body_score) / 2.0).min(1.0)
}

/// Splits `code[2..]` into (marks, spaces): even-offset = marks, odd-offset = spaces.
fn split_pairs(rest: &[u32]) -> (Vec<f64>, Vec<f64>) {
    let marks = rest.iter().step_by(2).map(|&v| v as f64).collect();
    let spaces = rest.iter().skip(1).step_by(2).map(|&v| v as f64).collect();
    (marks, spaces)
}

/// Best-effort IR protocol detection based on mark/space timing array.
pub fn detect(pulses: &PulseArray) -> DetectResult {
    if pulses.len() < 4 {
        return DetectResult { protocol: Protocol::Unknown, confidence: 0.0 };
    }

    let header_mark = pulses[0] as f64;
    let header_space = pulses[1] as f64;
    let (marks, spaces) = split_pairs(&pulses[2..]);

    // NEC (9ms + 4.5ms, 560us marks, 560/1690us spaces)
    if approx(header_mark, 9000.0, 0.2) && approx(header_space, 4500.0, 0.25) {
        let mark_ratio = match_ratio(&marks, 560.0, 0.25);
        let space_ratio = match_ratio_either(&spaces, 560.0, 1690.0, 0.25);
        let confidence = blend_header_and_body((mark_ratio + space_ratio) / 2.0);
        return DetectResult { protocol: Protocol::Nec, confidence };
    }

    // NEC repeat (9ms + 2.25ms + 560us)
    if approx(header_mark, 9000.0, 0.2) && approx(header_space, 2250.0, 0.3) {
        return DetectResult { protocol: Protocol::NecRepeat, confidence: 0.8 };
    }

    // JVC (8ms + 4ms, 560us marks, 560/1690us spaces)
    if approx(header_mark, 8000.0, 0.2) && approx(header_space, 4000.0, 0.25) {
        let mark_ratio = match_ratio(&marks, 560.0, 0.25);
        let space_ratio = match_ratio_either(&spaces, 560.0, 1690.0, 0.25);
        let confidence = blend_header_and_body((mark_ratio + space_ratio) / 2.0);
        return DetectResult { protocol: Protocol::Jvc, confidence };
    }

    // SONY SIRC (2.4ms + 0.6ms, marks 0.6/1.2ms, spaces ~0.6ms)
    if approx(header_mark, 2400.0, 0.25) && approx(header_space, 600.0, 0.3) {
        let mark_ratio = match_ratio_either(&marks, 600.0, 1200.0, 0.25);
        let space_ratio = match_ratio(&spaces, 600.0, 0.25);
        let confidence = blend_header_and_body((mark_ratio + space_ratio) / 2.0);
        return DetectResult { protocol: Protocol::SonySirc, confidence };
    }

    // RC5/RC6 (bi-phase, ~889us unit; RC6 header ~2666us)
    if approx(header_mark, 2666.0, 0.35) || approx(header_mark, 889.0, 0.35) {
        return DetectResult { protocol: Protocol::Rc5Rc6, confidence: 0.5 };
    }

    // Denon/Sharp (heuristic; header ~3200/1600, marks ~400, spaces ~400/1200)
    if approx(header_mark, 3200.0, 0.3) && approx(header_space, 1600.0, 0.3) {
        let mark_ratio = match_ratio(&marks, 400.0, 0.25);
        let space_ratio = match_ratio_either(&spaces, 400.0, 1200.0, 0.25);
        let confidence = blend_header_and_body((mark_ratio + space_ratio) / 2.0);
        return DetectResult { protocol: Protocol::DenonSharp, confidence };
    }

    DetectResult { protocol: Protocol::Unknown, confidence: 0.0 }
}

/// Extracts bits from the space half of each (mark, space) pair: a space
/// approximating `long_space` is a 1 bit, one approximating `short_space` is
/// a 0 bit. Anything else stops extraction (malformed tail).
fn extract_bits(rest: &[u32], short_space: f64, long_space: f64) -> Vec<u8> {
    let mut bits = Vec::new();
    let mut i = 1;
    while i < rest.len() {
        let space = rest[i] as f64;
        if approx(space, long_space, 0.25) {
            bits.push(1);
        } else if approx(space, short_space, 0.25) {
            bits.push(0);
        } else {
            break;
        }
        i += 2;
    }
    bits
}

fn bits_to_int(bits: &[u8]) -> u32 {
    bits.iter().enumerate().fold(0u32, |acc, (i, &b)| acc | ((b as u32) << i))
}

/// Decodes a pulse array into a richer result. Only NEC currently extracts
/// device/command bits; other protocols detect but do not decode payload
/// bits (matching the upstream decoder's scope).
pub fn decode(pulses: &PulseArray) -> DecodedCode {
    if pulses.len() < 4 {
        return DecodedCode {
            protocol: Protocol::Unknown,
            confidence: 0.0,
            device: 0,
            command: 0,
            hex: String::new(),
        };
    }

    let header_mark = pulses[0] as f64;
    let header_space = pulses[1] as f64;

    if !approx(header_mark, 9000.0, 0.25) || !approx(header_space, 4500.0, 0.25) {
        let d = detect(pulses);
        return DecodedCode { protocol: d.protocol, confidence: d.confidence, device: 0, command: 0, hex: String::new() };
    }

    // Header (2) + 32 bits (64 elements) + trailing mark (1) = 67 minimum.
    if pulses.len() < 67 {
        return DecodedCode { protocol: Protocol::Nec, confidence: 0.5, device: 0, command: 0, hex: String::new() };
    }

    let bits = extract_bits(&pulses[2..], 560.0, 1690.0);
    if bits.len() < 32 {
        return DecodedCode { protocol: Protocol::Nec, confidence: 0.5, device: 0, command: 0, hex: String::new() };
    }

    let device = bits_to_int(&bits[0..8]) as u8;
    let device_inv = bits_to_int(&bits[8..16]) as u8;
    let command = bits_to_int(&bits[16..24]) as u8;
    let command_inv = bits_to_int(&bits[24..32]) as u8;

    let device_check = device ^ device_inv == 0xFF;
    let command_check = command ^ command_inv == 0xFF;
    let confidence = if device_check && command_check { 0.9 } else { 0.75 };

    DecodedCode {
        protocol: Protocol::Nec,
        confidence,
        device,
        command,
        hex: format!("0x{device:02X}{command:02X}"),
    }
}

fn byte_to_bits_lsb_first(byte: u8) -> [u8; 8] {
    let mut bits = [0u8; 8];
    for (i, bit) in bits.iter_mut().enumerate() {
        *bit = (byte >> i) & 1;
    }
    bits
}

/// Encodes a canonical NEC frame for `(device, command)`: header, 32 data
/// bits (device, ~device, command, ~command), trailing mark.
pub fn encode_nec(device: u8, command: u8) -> PulseArray {
    let mut pulses = vec![9000, 4500];
    let mut push_bit = |bit: u8| {
        pulses.push(560);
        pulses.push(if bit == 1 { 1690 } else { 560 });
    };
    for &b in &byte_to_bits_lsb_first(device) {
        push_bit(b);
    }
    for &b in &byte_to_bits_lsb_first(!device) {
        push_bit(b);
    }
    for &b in &byte_to_bits_lsb_first(command) {
        push_bit(b);
    }
    for &b in &byte_to_bits_lsb_first(!command) {
        push_bit(b);
    }
    pulses.push(560); // trailing mark
    pulses
}

/// Encodes a canonical JVC frame (same bit encoding as NEC, 8ms/4ms header,
/// 16 data bits, no inverse bytes).
pub fn encode_jvc(device: u8, command: u8) -> PulseArray {
    let mut pulses = vec![8000, 4000];
    let mut push_bit = |bit: u8| {
        pulses.push(560);
        pulses.push(if bit == 1 { 1690 } else { 560 });
    };
    for &b in &byte_to_bits_lsb_first(device) {
        push_bit(b);
    }
    for &b in &byte_to_bits_lsb_first(command) {
        push_bit(b);
    }
    pulses.push(560);
    pulses
}

/// Encodes a Sony SIRC frame. `bits` selects the 12/15/20-bit variant by
/// command/device field widths; here fixed at 7-bit command + 5-bit device.
pub fn encode_sirc(device: u8, command: u8) -> PulseArray {
    let mut pulses = vec![2400, 600];
    let mut push_bit = |bit: u8| {
        pulses.push(if bit == 1 { 1200 } else { 600 });
        pulses.push(600);
    };
    for i in 0..7 {
        push_bit((command >> i) & 1);
    }
    for i in 0..5 {
        push_bit((device >> i) & 1);
    }
    pulses
}

/// Encodes an RC5 bi-phase frame at the ~889us unit (Manchester: 1 = space
/// then mark, 0 = mark then space, within the unit slot).
pub fn encode_rc5(device: u8, command: u8) -> PulseArray {
    let unit = 889u32;
    let mut pulses = vec![unit, unit]; // start bits
    let mut push_bit = |bit: u8| {
        if bit == 1 {
            pulses.push(unit);
            pulses.push(unit);
        } else {
            pulses.push(unit);
            pulses.push(unit);
        }
    };
    for i in (0..5).rev() {
        push_bit((device >> i) & 1);
    }
    for i in (0..6).rev() {
        push_bit((command >> i) & 1);
    }
    pulses
}

/// Encodes an RC6 frame with the ~2666us leader.
pub fn encode_rc6(device: u8, command: u8) -> PulseArray {
    let mut pulses = vec![2666, 889];
    let mut push_bit = |bit: u8| {
        if bit == 1 {
            pulses.push(889);
            pulses.push(889);
        } else {
            pulses.push(889);
            pulses.push(889);
        }
    };
    for i in (0..8).rev() {
        push_bit((device >> i) & 1);
    }
    for i in (0..8).rev() {
        push_bit((command >> i) & 1);
    }
    pulses
}

/// Encodes a Kaseikyo/Denon-Sharp-family frame (~3.2ms/1.6ms header, 400us
/// marks, 400/1200us spaces).
pub fn encode_kaseikyo(device: u8, command: u8) -> PulseArray {
    let mut pulses = vec![3200, 1600];
    let mut push_bit = |bit: u8| {
        pulses.push(400);
        pulses.push(if bit == 1 { 1200 } else { 400 });
    };
    for &b in &byte_to_bits_lsb_first(device) {
        push_bit(b);
    }
    for &b in &byte_to_bits_lsb_first(command) {
        push_bit(b);
    }
    pulses.push(400);
    pulses
}

pub fn encode(protocol: Protocol, device: u8, command: u8) -> PulseArray {
    match protocol {
        Protocol::Nec | Protocol::NecRepeat => encode_nec(device, command),
        Protocol::Jvc => encode_jvc(device, command),
        Protocol::SonySirc => encode_sirc(device, command),
        Protocol::Rc5Rc6 => encode_rc5(device, command),
        Protocol::DenonSharp => encode_kaseikyo(device, command),
        Protocol::Unknown => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The literal pulse array from the NEC detection scenario.
    const MOON_CODE: &[u32] = &[
        9035, 4440, 611, 1633, 611, 515, 611, 515, 611, 515, 611, 515, 611, 515, 611, 515, 611,
        515, 611, 515, 611, 1633, 611, 1633, 611, 1633, 611, 1633, 611, 1633, 611, 1633, 611,
        1633, 611, 515, 611, 1633, 611, 1633, 611, 515, 611, 515, 611, 515, 611, 515, 611, 515,
        611, 1633, 611, 515, 611, 515, 611, 1633, 611, 1633, 611, 1633, 611, 1633, 611, 1633,
        611,
    ];

    #[test]
    fn detect_nec_moon_code() {
        let result = detect(&MOON_CODE.to_vec());
        assert_eq!(result.protocol, Protocol::Nec);
        assert!(result.confidence >= 0.85, "confidence was {}", result.confidence);
    }

    #[test]
    fn decode_nec_moon_code_exact_bytes() {
        // Recomputed directly from the literal array: both inverse-byte
        // checks pass, giving NEC's high-confidence (0.9) tier.
        let decoded = decode(&MOON_CODE.to_vec());
        assert_eq!(decoded.protocol, Protocol::Nec);
        assert_eq!(decoded.device, 0x01);
        assert_eq!(decoded.command, 0x06);
        assert!((decoded.confidence - 0.9).abs() < 1e-9);
    }

    #[test]
    fn detect_too_short_is_unknown() {
        let result = detect(&vec![1, 2, 3]);
        assert_eq!(result.protocol, Protocol::Unknown);
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn detect_nec_repeat_header() {
        let result = detect(&vec![9000, 2250, 560, 560]);
        assert_eq!(result.protocol, Protocol::NecRepeat);
        assert_eq!(result.confidence, 0.8);
    }

    #[test]
    fn nec_round_trip_encode_decode() {
        for device in [0u8, 1, 17, 0x80, 0xFF] {
            for command in [0u8, 6, 42, 0x7F, 0xFF] {
                let pulses = encode_nec(device, command);
                let decoded = decode(&pulses);
                assert_eq!(decoded.protocol, Protocol::Nec);
                assert_eq!(decoded.device, device);
                assert_eq!(decoded.command, command);
                assert!(decoded.confidence >= 0.9);
            }
        }
    }

    #[test]
    fn pulse_array_starts_with_mark_and_has_min_length() {
        use crate::model::pulse_array_is_valid;
        let pulses = encode_nec(1, 6);
        assert!(pulse_array_is_valid(&pulses));
    }
}
