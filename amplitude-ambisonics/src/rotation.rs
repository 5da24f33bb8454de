//! Z-Y-Z Euler rotation of a B-format soundfield.

/// A Z-Y-Z Euler rotation (alpha, beta, gamma, in radians) applied in
/// place to a set of B-format channel buffers, in FuMa letter order.
/// Supports orders 1 through 3; lower orders simply skip the higher-order
/// channel groups.
pub struct BFormatRotator {
    alpha: f32,
    beta: f32,
    gamma: f32,
    cos_a: f32,
    sin_a: f32,
    cos_b: f32,
    sin_b: f32,
    cos_g: f32,
    sin_g: f32,
    cos_2a: f32,
    sin_2a: f32,
    cos_2b: f32,
    #[allow(dead_code)]
    sin_2b: f32,
    cos_2g: f32,
    sin_2g: f32,
    cos_3a: f32,
    sin_3a: f32,
    cos_3b: f32,
    sin_3b: f32,
    cos_3g: f32,
    sin_3g: f32,
}

impl BFormatRotator {
    pub fn new(alpha: f32, beta: f32, gamma: f32) -> Self {
        let mut r = Self {
            alpha,
            beta,
            gamma,
            cos_a: 0.0,
            sin_a: 0.0,
            cos_b: 0.0,
            sin_b: 0.0,
            cos_g: 0.0,
            sin_g: 0.0,
            cos_2a: 0.0,
            sin_2a: 0.0,
            cos_2b: 0.0,
            sin_2b: 0.0,
            cos_2g: 0.0,
            sin_2g: 0.0,
            cos_3a: 0.0,
            sin_3a: 0.0,
            cos_3b: 0.0,
            sin_3b: 0.0,
            cos_3g: 0.0,
            sin_3g: 0.0,
        };
        r.refresh();
        r
    }

    pub fn set_orientation(&mut self, alpha: f32, beta: f32, gamma: f32) {
        self.alpha = alpha;
        self.beta = beta;
        self.gamma = gamma;
        self.refresh();
    }

    pub fn orientation(&self) -> (f32, f32, f32) {
        (self.alpha, self.beta, self.gamma)
    }

    fn refresh(&mut self) {
        (self.sin_a, self.cos_a) = self.alpha.sin_cos();
        (self.sin_b, self.cos_b) = self.beta.sin_cos();
        (self.sin_g, self.cos_g) = self.gamma.sin_cos();
        (self.sin_2a, self.cos_2a) = (2.0 * self.alpha).sin_cos();
        (self.sin_2b, self.cos_2b) = (2.0 * self.beta).sin_cos();
        (self.sin_2g, self.cos_2g) = (2.0 * self.gamma).sin_cos();
        (self.sin_3a, self.cos_3a) = (3.0 * self.alpha).sin_cos();
        (self.sin_3b, self.cos_3b) = (3.0 * self.beta).sin_cos();
        (self.sin_3g, self.cos_3g) = (3.0 * self.gamma).sin_cos();
    }

    /// Rotates an order-1..3 B-format soundfield in place. `channels` must
    /// hold exactly `(order + 1)²` buffers of equal length, in FuMa order
    /// (`W, X, Y, Z, R, S, T, U, V, K, L, M, N, O, P, Q`).
    pub fn process(&self, order: u32, channels: &mut [Vec<f32>]) {
        if order >= 1 && channels.len() >= 4 {
            self.process_order1(channels);
        }
        if order >= 2 && channels.len() >= 9 {
            self.process_order2(channels);
        }
        if order >= 3 && channels.len() >= 16 {
            self.process_order3(channels);
        }
    }

    fn process_order1(&self, ch: &mut [Vec<f32>]) {
        let frames = ch[1].len();
        for i in 0..frames {
            let x = ch[1][i];
            let y = ch[2][i];
            let z = ch[3][i];

            let tx = x * self.cos_a + y * self.sin_a;
            let ty = y * self.cos_a - x * self.sin_a;
            let tz = z;

            let x2 = tx * self.cos_b - tz * self.sin_b;
            let y2 = ty;
            let z2 = tz * self.cos_b + tx * self.sin_b;

            ch[1][i] = x2 * self.cos_g + y2 * self.sin_g;
            ch[2][i] = y2 * self.cos_g - x2 * self.sin_g;
            ch[3][i] = z2;
        }
    }

    fn process_order2(&self, ch: &mut [Vec<f32>]) {
        let sqrt3 = 3f32.sqrt();
        let frames = ch[4].len();
        for i in 0..frames {
            let r = ch[4][i];
            let s = ch[5][i];
            let t = ch[6][i];
            let u = ch[7][i];
            let v = ch[8][i];

            let tr = r;
            let ts = s * self.cos_a + t * self.sin_a;
            let tt = t * self.cos_a - s * self.sin_a;
            let tu = u * self.cos_2a + v * self.sin_2a;
            let tv = v * self.cos_2a - u * self.sin_2a;

            let r2 = tr * (0.75 * self.cos_b + 0.25)
                + tu * (0.5 * sqrt3 * self.sin_b.powi(2))
                + ts * (sqrt3 * self.sin_b * self.cos_b);
            let s2 = ts * self.cos_2b - tr * self.cos_b * self.sin_b * sqrt3 + tu * self.cos_b * self.sin_b;
            let t2 = tv * self.sin_b - tt * self.cos_b;
            let u2 = tu * (0.25 * self.cos_2b + 0.75) - ts * self.cos_b * self.sin_b
                + tr * (0.5 * sqrt3 * self.sin_b.powi(2));
            let v2 = tv * self.cos_b - tt * self.sin_b;

            ch[4][i] = r2;
            ch[5][i] = s2 * self.cos_g + t2 * self.sin_g;
            ch[6][i] = t2 * self.cos_g - s2 * self.sin_g;
            ch[7][i] = u2 * self.cos_2g + v2 * self.sin_2g;
            ch[8][i] = v2 * self.cos_2g - u2 * self.sin_2g;
        }
    }

    fn process_order3(&self, ch: &mut [Vec<f32>]) {
        let sqrt3_2 = (3.0f32 / 2.0).sqrt();
        let sqrt5_2 = (5.0f32 / 2.0).sqrt();
        let sqrt15 = 15f32.sqrt();

        let frames = ch[9].len();
        for i in 0..frames {
            let k = ch[9][i];
            let l = ch[10][i];
            let m = ch[11][i];
            let n = ch[12][i];
            let o = ch[13][i];
            let p = ch[14][i];
            let q = ch[15][i];

            let tk = k;
            let tl = l * self.cos_a + m * self.sin_a;
            let tm = m * self.cos_a - l * self.sin_a;
            let tn = n * self.cos_2a + o * self.sin_2a;
            let to_ = o * self.cos_2a - n * self.sin_2a;
            let tp = p * self.cos_3a + q * self.sin_3a;
            let tq = q * self.cos_3a - p * self.sin_3a;

            let sin_b = self.sin_b;
            let cos_b = self.cos_b;

            let q2 = 0.125 * tq * (5.0 + 3.0 * self.cos_2b) - sqrt3_2 * to_ * cos_b * sin_b
                + 0.25 * sqrt15 * tm * sin_b.powi(2);
            let o2 = to_ * self.cos_2b - sqrt5_2 * tm * cos_b * sin_b + sqrt3_2 * tq * cos_b * sin_b;
            let m2 = 0.125 * tm * (3.0 + 5.0 * self.cos_2b) - sqrt5_2 * to_ * cos_b * sin_b
                + 0.25 * sqrt15 * tq * sin_b.powi(2);
            let k2 = 0.25 * tk * cos_b * (-1.0 + 15.0 * self.cos_2b)
                + 0.5 * sqrt15 * tn * cos_b * sin_b.powi(2)
                + 0.5 * sqrt5_2 * tp * sin_b.powi(3)
                + 0.125 * sqrt3_2 * tl * (sin_b + 5.0 * self.sin_3b);
            let l2 = 0.0625 * tl * (cos_b + 15.0 * self.cos_3b)
                + 0.25 * sqrt5_2 * tn * (1.0 + 3.0 * self.cos_2b) * sin_b
                + 0.25 * sqrt15 * tp * cos_b * sin_b.powi(2)
                - 0.125 * sqrt3_2 * tk * (sin_b + 5.0 * self.sin_3b);
            let n2 = 0.125 * tn * (5.0 * cos_b + 3.0 * self.cos_3b)
                + 0.25 * sqrt3_2 * tp * (3.0 + self.cos_2b) * sin_b
                + 0.5 * sqrt15 * tk * cos_b * sin_b.powi(2)
                + 0.125 * sqrt5_2 * tl * (sin_b - 3.0 * self.sin_3b);
            let p2 = 0.0625 * tp * (15.0 * cos_b + self.cos_3b) - 0.25 * sqrt3_2 * tn * (3.0 + self.cos_2b) * sin_b
                + 0.25 * sqrt15 * tl * cos_b * sin_b.powi(2)
                - 0.5 * sqrt5_2 * tk * sin_b.powi(3);

            ch[9][i] = k2;
            ch[10][i] = l2 * self.cos_g + m2 * self.sin_g;
            ch[11][i] = m2 * self.cos_g - l2 * self.sin_g;
            ch[12][i] = n2 * self.cos_2g + o2 * self.sin_2g;
            ch[13][i] = o2 * self.cos_2g - n2 * self.sin_2g;
            ch[14][i] = p2 * self.cos_3g + q2 * self.sin_3g;
            ch[15][i] = q2 * self.cos_3g - p2 * self.sin_3g;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order1_channels(w: f32, x: f32, y: f32, z: f32) -> Vec<Vec<f32>> {
        vec![vec![w], vec![x], vec![y], vec![z]]
    }

    #[test]
    fn zero_rotation_is_identity() {
        let rotator = BFormatRotator::new(0.0, 0.0, 0.0);
        let mut ch = order1_channels(0.7, 1.0, 0.5, 0.2);
        let original = ch.clone();
        rotator.process(1, &mut ch);
        for (a, b) in ch.iter().zip(original.iter()) {
            assert!((a[0] - b[0]).abs() < 1e-5);
        }
    }

    #[test]
    fn full_turn_about_z_is_identity() {
        let rotator = BFormatRotator::new(std::f32::consts::TAU, 0.0, 0.0);
        let mut ch = order1_channels(0.0, 1.0, 0.0, 0.0);
        rotator.process(1, &mut ch);
        assert!((ch[1][0] - 1.0).abs() < 1e-3);
        assert!(ch[2][0].abs() < 1e-3);
    }

    #[test]
    fn w_channel_is_rotation_invariant() {
        let rotator = BFormatRotator::new(0.4, 0.9, -1.2);
        let mut ch = vec![vec![0.66]];
        let w_before = ch[0][0];
        // W has no rotation-dependent term; a 1-channel slice is a no-op
        // for process(), so assert directly on the known invariant.
        rotator.process(0, &mut ch);
        assert_eq!(ch[0][0], w_before);
    }

    #[test]
    fn order2_preserves_energy_under_rotation() {
        let rotator = BFormatRotator::new(0.3, 0.6, 1.1);
        let mut ch: Vec<Vec<f32>> = (0..9).map(|i| vec![(i as f32 + 1.0) * 0.1]).collect();
        let energy_before: f32 = ch.iter().skip(4).map(|c| c[0] * c[0]).sum();
        rotator.process(2, &mut ch);
        let energy_after: f32 = ch.iter().skip(4).map(|c| c[0] * c[0]).sum();
        assert!((energy_before - energy_after).abs() < 1e-2, "{energy_before} vs {energy_after}");
    }
}
