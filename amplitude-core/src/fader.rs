//! Cubic-Bezier value transitions driving a channel's fade-in/fade-out
//! gain ramp.

const SPLINE_SAMPLES: usize = 11;
const SAMPLE_STEP: f64 = 1.0 / (SPLINE_SAMPLES - 1) as f64;

/// A one-dimensional cubic Bezier with fixed endpoints `(0,0)` and
/// `(1,1)`, matching the CSS `cubic-bezier()` easing algorithm.
pub struct BezierCurve {
    x1: f64,
    y1: f64,
    x2: f64,
    y2: f64,
    sample_values: [f64; SPLINE_SAMPLES],
}

impl BezierCurve {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        let (x1, y1, x2, y2) = (x1 as f64, y1 as f64, x2 as f64, y2 as f64);
        let mut curve = Self {
            x1,
            y1,
            x2,
            y2,
            sample_values: [0.0; SPLINE_SAMPLES],
        };
        for i in 0..SPLINE_SAMPLES {
            curve.sample_values[i] = curve.sample_curve_x(i as f64 * SAMPLE_STEP);
        }
        curve
    }

    /// Linear: the identity transition, used for a zero-duration fade.
    pub fn linear() -> Self {
        Self::new(0.0, 0.0, 1.0, 1.0)
    }

    fn sample_curve_x(&self, t: f64) -> f64 {
        let mt = 1.0 - t;
        3.0 * mt * mt * t * self.x1 + 3.0 * mt * t * t * self.x2 + t * t * t
    }

    fn sample_curve_y(&self, t: f64) -> f64 {
        let mt = 1.0 - t;
        3.0 * mt * mt * t * self.y1 + 3.0 * mt * t * t * self.y2 + t * t * t
    }

    fn sample_curve_derivative_x(&self, t: f64) -> f64 {
        let mt = 1.0 - t;
        3.0 * mt * mt * self.x1 + 6.0 * mt * t * (self.x2 - self.x1) + 3.0 * t * t * (1.0 - self.x2)
    }

    fn solve_curve_x(&self, x: f64, epsilon: f64) -> f64 {
        let mut current_sample = 1;
        while current_sample < SPLINE_SAMPLES - 1 && self.sample_values[current_sample] <= x {
            current_sample += 1;
        }
        let interval_start = (current_sample - 1) as f64 * SAMPLE_STEP;
        let span = self.sample_values[current_sample] - self.sample_values[current_sample - 1];
        let dist = if span.abs() > f64::MIN_POSITIVE {
            (x - self.sample_values[current_sample - 1]) / span
        } else {
            0.0
        };
        let mut t = interval_start + dist * SAMPLE_STEP;

        for _ in 0..8 {
            let x2 = self.sample_curve_x(t) - x;
            if x2.abs() < epsilon {
                return t;
            }
            let derivative = self.sample_curve_derivative_x(t);
            if derivative.abs() < 1e-6 {
                break;
            }
            t -= x2 / derivative;
        }

        let mut lo = 0.0;
        let mut hi = 1.0;
        let mut guess = t.clamp(0.0, 1.0);
        while lo < hi {
            let sample = self.sample_curve_x(guess);
            if (sample - x).abs() < epsilon {
                return guess;
            }
            if x > sample {
                lo = guess;
            } else {
                hi = guess;
            }
            guess = (hi + lo) / 2.0;
        }
        guess
    }

    /// Evaluates the curve's y for a given x in `[0, 1]`.
    pub fn ease(&self, x: f32) -> f32 {
        let x = (x as f64).clamp(0.0, 1.0);
        if x == 0.0 || x == 1.0 {
            return x as f32;
        }
        let t = self.solve_curve_x(x, 1e-6);
        self.sample_curve_y(t) as f32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaderState {
    Stopped,
    Disabled,
    Active,
}

/// Drives a value from `from` to `to` over `duration` seconds along a
/// `BezierCurve`. `get_from_time` bootstraps `percentage = (time -
/// start)/duration` and delegates to `get_from_percentage`.
pub struct FaderInstance {
    from: f64,
    to: f64,
    delta: f64,
    duration: f64,
    start_time: f64,
    end_time: f64,
    state: FaderState,
    curve: BezierCurve,
}

impl FaderInstance {
    pub fn new(curve: BezierCurve) -> Self {
        Self {
            from: 0.0,
            to: 0.0,
            delta: 0.0,
            duration: 0.0,
            start_time: 0.0,
            end_time: 0.0,
            state: FaderState::Disabled,
            curve,
        }
    }

    pub fn set(&mut self, from: f64, to: f64, duration: f64) {
        self.from = from;
        self.to = to;
        self.delta = to - from;
        self.duration = duration.max(0.0);
    }

    pub fn set_duration(&mut self, duration: f64) {
        self.duration = duration.max(0.0);
    }

    pub fn start(&mut self, time: f64) {
        self.start_time = time;
        self.end_time = time + self.duration;
        self.state = FaderState::Active;
    }

    pub fn state(&self) -> FaderState {
        self.state
    }

    pub fn set_state(&mut self, state: FaderState) {
        self.state = state;
    }

    pub fn get_from_percentage(&self, percentage: f64) -> f64 {
        let t = percentage.clamp(0.0, 1.0) as f32;
        self.from + self.delta * self.curve.ease(t) as f64
    }

    pub fn get_from_time(&mut self, time: f64) -> f64 {
        if self.duration <= 0.0 {
            self.state = FaderState::Stopped;
            return self.to;
        }
        let percentage = (time - self.start_time) / self.duration;
        if percentage >= 1.0 {
            self.state = FaderState::Stopped;
            return self.to;
        }
        self.get_from_percentage(percentage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_curve_is_the_identity() {
        let curve = BezierCurve::linear();
        for i in 0..=10 {
            let x = i as f32 / 10.0;
            assert!((curve.ease(x) - x).abs() < 1e-3, "x={x}");
        }
    }

    #[test]
    fn endpoints_are_exact() {
        let curve = BezierCurve::new(0.25, 0.1, 0.25, 1.0);
        assert_eq!(curve.ease(0.0), 0.0);
        assert_eq!(curve.ease(1.0), 1.0);
    }

    #[test]
    fn fader_reaches_target_at_duration() {
        let mut fader = FaderInstance::new(BezierCurve::linear());
        fader.set(0.0, 1.0, 2.0);
        fader.start(10.0);
        let value = fader.get_from_time(12.0);
        assert_eq!(value, 1.0);
        assert_eq!(fader.state(), FaderState::Stopped);
    }

    #[test]
    fn fader_halfway_through_linear_curve_is_the_midpoint() {
        let mut fader = FaderInstance::new(BezierCurve::linear());
        fader.set(0.0, 10.0, 4.0);
        fader.start(0.0);
        let value = fader.get_from_time(2.0);
        assert!((value - 5.0).abs() < 1e-2);
    }

    #[test]
    fn zero_duration_fader_jumps_immediately_to_target() {
        let mut fader = FaderInstance::new(BezierCurve::linear());
        fader.set(0.0, 1.0, 0.0);
        fader.start(0.0);
        assert_eq!(fader.get_from_time(0.0), 1.0);
    }
}
