//! Reception-quality score.
//!
//! SNR demodulation thresholds per spreading factor (RadioLib wrapper
//! values), combined with a length-based collision penalty.

/// Minimum SNR at which a frame of this SF can still demodulate.
pub fn snr_threshold(spreading_factor: u8) -> f64 {
    match spreading_factor {
        7 => -7.5,
        8 => -10.0,
        9 => -12.5,
        10 => -15.0,
        11 => -17.5,
        12 => -20.0,
        _ => -10.0,
    }
}

/// Score in [0, 1]: 0 below threshold, otherwise SNR margin scaled by a
/// collision penalty that grows with packet length (256-byte ceiling).
pub fn packet_score(snr: f64, packet_len: usize, spreading_factor: u8) -> f64 {
    if spreading_factor < 7 {
        return 0.0;
    }
    let threshold = snr_threshold(spreading_factor);
    if snr < threshold {
        return 0.0;
    }
    let success_rate = (snr - threshold) / 10.0;
    let collision_penalty = 1.0 - (packet_len as f64 / 256.0);
    (success_rate * collision_penalty).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_below_threshold() {
        assert_eq!(packet_score(-8.0, 10, 7), 0.0);
        assert_eq!(packet_score(-21.0, 10, 12), 0.0);
    }

    #[test]
    fn zero_for_invalid_sf() {
        assert_eq!(packet_score(10.0, 10, 6), 0.0);
    }

    #[test]
    fn always_in_unit_interval() {
        for sf in 7..=12u8 {
            for snr_decis in -250..300 {
                let snr = f64::from(snr_decis) / 10.0;
                for len in [0usize, 32, 128, 255] {
                    let score = packet_score(snr, len, sf);
                    assert!((0.0..=1.0).contains(&score), "score {score} out of range");
                }
            }
        }
    }

    #[test]
    fn margin_and_length_shape_the_score() {
        // 10 dB above the SF7 threshold, tiny frame: near-perfect
        let strong = packet_score(2.5, 0, 7);
        assert!((strong - 1.0).abs() < 1e-9);
        // same SNR, longer frame scores lower
        assert!(packet_score(2.5, 128, 7) < strong);
        // exactly at threshold: zero margin
        assert_eq!(packet_score(-7.5, 10, 7), 0.0);
    }
}
