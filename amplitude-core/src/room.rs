//! Room reflections via 8 comb filters in parallel feeding 4 series
//! allpasses per channel, the classic Jezar Freeverb topology, gated by a
//! room's cutoff frequency and reflections gain and routed to a dedicated
//! reflections bus rather than mixed in-place, so its send level is
//! controllable like any other bus.

const NUM_COMBS: usize = 8;
const NUM_ALLPASSES: usize = 4;
const STEREO_SPREAD: usize = 23;
const FIXED_GAIN: f32 = 0.015;

// Tuned at 44.1 kHz; scaled to the engine sample rate in
// `RoomReflections::new`.
const COMB_TUNING_L: [usize; NUM_COMBS] = [1116, 1188, 1277, 1356, 1422, 1491, 1557, 1617];
const ALLPASS_TUNING_L: [usize; NUM_ALLPASSES] = [556, 441, 341, 225];

fn undenormalize(sample: f32) -> f32 {
    if sample.abs() < 1e-15 {
        0.0
    } else {
        sample
    }
}

struct Comb {
    buffer: Vec<f32>,
    index: usize,
    feedback: f32,
    damp1: f32,
    damp2: f32,
    filter_store: f32,
}

impl Comb {
    fn new(size: usize) -> Self {
        Self {
            buffer: vec![0.0; size.max(1)],
            index: 0,
            feedback: 0.5,
            damp1: 0.5,
            damp2: 0.5,
            filter_store: 0.0,
        }
    }

    fn set_damp(&mut self, damp: f32) {
        self.damp1 = damp;
        self.damp2 = 1.0 - damp;
    }

    fn process(&mut self, input: f32) -> f32 {
        let output = undenormalize(self.buffer[self.index]);
        self.filter_store = undenormalize(output * self.damp2 + self.filter_store * self.damp1);
        self.buffer[self.index] = input + self.filter_store * self.feedback;
        self.index = (self.index + 1) % self.buffer.len();
        output
    }

    fn mute(&mut self) {
        self.buffer.iter_mut().for_each(|s| *s = 0.0);
        self.filter_store = 0.0;
    }
}

struct AllPass {
    buffer: Vec<f32>,
    index: usize,
    feedback: f32,
}

impl AllPass {
    fn new(size: usize) -> Self {
        Self {
            buffer: vec![0.0; size.max(1)],
            index: 0,
            feedback: 0.5,
        }
    }

    fn process(&mut self, input: f32) -> f32 {
        let buffered = undenormalize(self.buffer[self.index]);
        let output = -input + buffered;
        self.buffer[self.index] = input + buffered * self.feedback;
        self.index = (self.index + 1) % self.buffer.len();
        output
    }

    fn mute(&mut self) {
        self.buffer.iter_mut().for_each(|s| *s = 0.0);
    }
}

/// Per-room reflections processor: reads a mono downmix of a real
/// channel's output, produces a stereo tail, and is summed by the caller
/// into the room's reflections bus rather than the dry signal path.
pub struct RoomReflections {
    comb_l: Vec<Comb>,
    comb_r: Vec<Comb>,
    allpass_l: Vec<AllPass>,
    allpass_r: Vec<AllPass>,
    room_size: f32,
    damp: f32,
}

impl RoomReflections {
    pub fn new(sample_rate: u32) -> Self {
        let scale = sample_rate as f32 / 44_100.0;
        let scaled = |n: usize| ((n as f32 * scale).round() as usize).max(1);

        let comb_l = COMB_TUNING_L.iter().map(|&n| Comb::new(scaled(n))).collect();
        let comb_r = COMB_TUNING_L
            .iter()
            .map(|&n| Comb::new(scaled(n + STEREO_SPREAD)))
            .collect();
        let allpass_l = ALLPASS_TUNING_L.iter().map(|&n| AllPass::new(scaled(n))).collect();
        let allpass_r = ALLPASS_TUNING_L
            .iter()
            .map(|&n| AllPass::new(scaled(n + STEREO_SPREAD)))
            .collect();

        let mut reflections = Self {
            comb_l,
            comb_r,
            allpass_l,
            allpass_r,
            room_size: 0.5,
            damp: 0.5,
        };
        for ap in reflections.allpass_l.iter_mut().chain(reflections.allpass_r.iter_mut()) {
            ap.feedback = 0.5;
        }
        reflections.apply_parameters();
        reflections.mute();
        reflections
    }

    /// Derives room size and damping from the room's mean wall absorption
    /// and cutoff frequency: more absorbent walls shrink the effective
    /// room size (shorter, more damped tail); a lower cutoff increases
    /// damping, rolling off high-frequency reflections faster.
    pub fn configure(&mut self, mean_absorption: f32, cutoff_frequency: f32) {
        self.room_size = (1.0 - mean_absorption.clamp(0.0, 1.0)).clamp(0.0, 1.0);
        self.damp = (1.0 - (cutoff_frequency / 20_000.0).clamp(0.0, 1.0)).clamp(0.0, 1.0);
        self.apply_parameters();
    }

    fn apply_parameters(&mut self) {
        for comb in self.comb_l.iter_mut().chain(self.comb_r.iter_mut()) {
            comb.feedback = self.room_size;
            comb.set_damp(self.damp);
        }
    }

    fn mute(&mut self) {
        for comb in self.comb_l.iter_mut().chain(self.comb_r.iter_mut()) {
            comb.mute();
        }
        for ap in self.allpass_l.iter_mut().chain(self.allpass_r.iter_mut()) {
            ap.mute();
        }
    }

    /// Runs one block of a mono-downmixed `input`, gated by
    /// `reflections_gain`, writing the stereo tail into `out_l`/`out_r`
    /// (added, not overwritten — the caller owns the reflections bus mix
    /// buffer).
    pub fn process_block(&mut self, input: &[f32], reflections_gain: f32, out_l: &mut [f32], out_r: &mut [f32]) {
        if reflections_gain <= 0.0 {
            return;
        }
        for i in 0..input.len() {
            let dry = input[i] * FIXED_GAIN;
            let mut l = 0.0;
            let mut r = 0.0;
            for comb in self.comb_l.iter_mut() {
                l += comb.process(dry);
            }
            for comb in self.comb_r.iter_mut() {
                r += comb.process(dry);
            }
            for ap in self.allpass_l.iter_mut() {
                l = ap.process(l);
            }
            for ap in self.allpass_r.iter_mut() {
                r = ap.process(r);
            }
            out_l[i] += l * reflections_gain;
            out_r[i] += r * reflections_gain;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silent_input_produces_silent_tail_once_muted_state_settles() {
        let mut room = RoomReflections::new(48_000);
        room.configure(0.1, 5_000.0);
        let input = vec![0.0f32; 256];
        let mut out_l = vec![0.0f32; 256];
        let mut out_r = vec![0.0f32; 256];
        room.process_block(&input, 1.0, &mut out_l, &mut out_r);
        assert!(out_l.iter().all(|s| *s == 0.0));
        assert!(out_r.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn zero_gain_leaves_output_untouched() {
        let mut room = RoomReflections::new(48_000);
        let input = vec![1.0f32; 64];
        let mut out_l = vec![2.0f32; 64];
        let mut out_r = vec![3.0f32; 64];
        room.process_block(&input, 0.0, &mut out_l, &mut out_r);
        assert!(out_l.iter().all(|&s| s == 2.0));
        assert!(out_r.iter().all(|&s| s == 3.0));
    }

    #[test]
    fn impulse_produces_finite_reverberant_tail() {
        let mut room = RoomReflections::new(48_000);
        room.configure(0.05, 8_000.0);
        let mut input = vec![0.0f32; 4096];
        input[0] = 1.0;
        let mut out_l = vec![0.0f32; 4096];
        let mut out_r = vec![0.0f32; 4096];
        room.process_block(&input, 1.0, &mut out_l, &mut out_r);
        assert!(out_l.iter().all(|s| s.is_finite()));
        assert!(out_r.iter().all(|s| s.is_finite()));
        assert!(out_l.iter().any(|&s| s != 0.0), "tail should ring on after the impulse");
    }

    #[test]
    fn higher_absorption_shortens_effective_room_size() {
        let mut low_absorption = RoomReflections::new(48_000);
        low_absorption.configure(0.0, 20_000.0);
        let mut high_absorption = RoomReflections::new(48_000);
        high_absorption.configure(0.9, 20_000.0);
        assert!(low_absorption.room_size > high_absorption.room_size);
    }
}
