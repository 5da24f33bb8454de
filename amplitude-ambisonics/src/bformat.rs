//! B-format channel layout and soundfield encoding.
//!
//! Channels follow Furse-Malham (FuMa) letter order: `W`, `X Y Z`,
//! `R S T U V`, `K L M N O P Q` for orders 0 through 3.

/// Number of B-format components for a given ambisonic order.
/// `(order + 1)²` for a full 3D soundfield, `2·order + 1` for a
/// horizontal-only (2D) one.
pub fn component_count(order: u32, is_3d: bool) -> usize {
    if is_3d {
        ((order + 1) * (order + 1)) as usize
    } else {
        (2 * order + 1) as usize
    }
}

/// Evaluates the FuMa-normalized real spherical harmonic for B-format
/// channel `index` (in FuMa letter order) at the given direction.
/// `azimuth`/`elevation` are in radians; azimuth `0` is straight ahead.
///
/// Supports orders 0 through 3 (indices `0..16`); out-of-range indices
/// return `0.0`.
pub fn channel_basis(index: usize, azimuth: f32, elevation: f32) -> f32 {
    let (sin_az, cos_az) = azimuth.sin_cos();
    let (sin_el, cos_el) = elevation.sin_cos();

    const FRAC_1_SQRT_2: f32 = std::f32::consts::FRAC_1_SQRT_2;
    let sqrt3 = 3f32.sqrt();
    let sqrt3_2 = (3.0f32 / 2.0).sqrt();
    let sqrt15_2 = (15.0f32 / 4.0).sqrt();
    let sqrt10_4 = (10.0f32 / 16.0).sqrt();
    let sqrt6_4 = (6.0f32 / 16.0).sqrt();

    match index {
        0 => FRAC_1_SQRT_2,
        1 => cos_az * cos_el,
        2 => sin_az * cos_el,
        3 => sin_el,
        4 => 0.5 * (3.0 * sin_el * sin_el - 1.0),
        5 => (sqrt3 / 2.0) * cos_az * (2.0 * sin_el * cos_el),
        6 => (sqrt3 / 2.0) * sin_az * (2.0 * sin_el * cos_el),
        7 => (sqrt3 / 2.0) * (2.0 * azimuth).cos() * cos_el * cos_el,
        8 => (sqrt3 / 2.0) * (2.0 * azimuth).sin() * cos_el * cos_el,
        9 => sin_el * (5.0 * sin_el * sin_el - 3.0) / 2.0,
        10 => sqrt6_4 * cos_az * cos_el * (5.0 * sin_el * sin_el - 1.0),
        11 => sqrt6_4 * sin_az * cos_el * (5.0 * sin_el * sin_el - 1.0),
        12 => sqrt15_2 * (2.0 * azimuth).cos() * sin_el * cos_el * cos_el,
        13 => sqrt15_2 * (2.0 * azimuth).sin() * sin_el * cos_el * cos_el,
        14 => sqrt10_4 * (3.0 * azimuth).cos() * cos_el * cos_el * cos_el,
        15 => sqrt10_4 * (3.0 * azimuth).sin() * cos_el * cos_el * cos_el,
        _ => 0.0,
    }
}

/// Encodes a mono signal arriving from `(azimuth, elevation)` into
/// `channels.len()` B-format channels (in FuMa order), accumulating into
/// whatever is already there.
pub fn encode_accumulate(mono: &[f32], azimuth: f32, elevation: f32, channels: &mut [Vec<f32>]) {
    for (i, channel) in channels.iter_mut().enumerate() {
        let gain = channel_basis(i, azimuth, elevation);
        for (o, &s) in channel.iter_mut().zip(mono) {
            *o += s * gain;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn component_count_matches_expected_growth() {
        assert_eq!(component_count(0, true), 1);
        assert_eq!(component_count(1, true), 4);
        assert_eq!(component_count(2, true), 9);
        assert_eq!(component_count(3, true), 16);
        assert_eq!(component_count(1, false), 3);
        assert_eq!(component_count(3, false), 7);
    }

    #[test]
    fn w_channel_is_direction_independent() {
        let w_front = channel_basis(0, 0.0, 0.0);
        let w_side = channel_basis(0, std::f32::consts::FRAC_PI_2, 0.3);
        assert!((w_front - w_side).abs() < 1e-6);
    }

    #[test]
    fn x_channel_peaks_straight_ahead() {
        let front = channel_basis(1, 0.0, 0.0);
        let behind = channel_basis(1, std::f32::consts::PI, 0.0);
        assert!(front > 0.9);
        assert!(behind < -0.9);
    }
}
