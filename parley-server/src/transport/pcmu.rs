/// Decode one G.711 μ-law byte into linear 16-bit PCM.
pub fn decode_ulaw(byte: u8) -> i16 {
    let u = !byte;
    let exponent = (u >> 4) & 0x07;
    let mantissa = (u & 0x0f) as i32;
    let magnitude = (((mantissa << 3) + 0x84) << exponent) - 0x84;

    if u & 0x80 != 0 {
        -magnitude as i16
    } else {
        magnitude as i16
    }
}

pub fn decode_ulaw_payload(payload: &[u8]) -> Vec<i16> {
    payload.iter().map(|b| decode_ulaw(*b)).collect()
}
