//! The real-channel/layer bridge between a logical `Channel` and the
//! mixer: a bounded lock-free command queue per real channel, draining
//! into a map of simultaneously playing layers.

use std::collections::BTreeMap;
use std::sync::Arc;

use crossbeam_queue::ArrayQueue;

use amplitude_dsp::resampler::PolyphaseResampler;

use crate::sound_object::SoundInstance;

pub type LayerId = u32;

/// Smallest pitch-ratio drift that justifies rebuilding a layer's
/// resampler; below this the existing kernel is reused as-is, since a
/// fresh polyphase bank every block would dominate render-thread cost for
/// a correction nobody can hear.
const PITCH_REBUILD_EPSILON: f32 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerPlayState {
    Play,
    Loop,
    Paused,
    /// Stopped.
    Min,
}

pub struct Layer {
    pub instance: Arc<parking_lot::Mutex<SoundInstance>>,
    pub play_state: LayerPlayState,
    pub stream: bool,
    pub gain: f32,
    /// Corrects the asset's native sample rate to the engine's output rate
    /// and, scaled on top of that, the last doppler pitch factor computed
    /// for this layer's channel. `None` when the asset is already at the
    /// output rate and no pitch correction is in effect.
    resampler: Option<PolyphaseResampler>,
    resampler_pitch: f32,
}

impl Layer {
    /// Rebuilds the resampler if none exists yet, the asset/output rate
    /// pairing changed, or `pitch` drifted past [`PITCH_REBUILD_EPSILON`]
    /// since the one in place was built. A no-op once the ratio already
    /// matches, so steady-state playback at a stable pitch doesn't pay for
    /// a kernel rebuild every block.
    pub fn ensure_resampler(&mut self, source_rate: u32, output_rate: u32, pitch: f32) {
        let pitch = pitch.clamp(0.05, 20.0);
        if source_rate == output_rate && (pitch - 1.0).abs() < PITCH_REBUILD_EPSILON {
            self.resampler = None;
            self.resampler_pitch = 1.0;
            return;
        }
        let needs_rebuild = match &self.resampler {
            None => true,
            Some(resampler) => {
                (pitch - self.resampler_pitch).abs() > PITCH_REBUILD_EPSILON
                    || resampler.channel_count() != 1
            }
        };
        if !needs_rebuild {
            return;
        }
        let effective_source_rate = ((source_rate as f32) / pitch).round().max(1.0) as u32;
        if let Ok(resampler) = PolyphaseResampler::new(effective_source_rate, output_rate, 1) {
            self.resampler = Some(resampler);
            self.resampler_pitch = pitch;
        }
    }

    pub fn resampler_mut(&mut self) -> Option<&mut PolyphaseResampler> {
        self.resampler.as_mut()
    }

    /// Reads this layer's source at its native rate and corrects it to
    /// `output_rate`/`pitch` in one step. Returns the number of frames
    /// written into `out` and whether the underlying stream ran dry this
    /// call (always `false` while looping).
    pub fn read_resampled_mono(&mut self, output_rate: u32, pitch: f32, out: &mut [f32]) -> (usize, bool) {
        let source_rate = self.instance.lock().asset.format.sample_rate;
        let looping = matches!(self.play_state, LayerPlayState::Loop);
        self.ensure_resampler(source_rate, output_rate, pitch);
        let mut instance = self.instance.lock();
        match self.resampler.as_mut() {
            None => {
                let written = instance.read_mono(out);
                (written, written < out.len() && !looping)
            }
            Some(resampler) => {
                let needed = (out.len() as u64 * resampler.down() as u64 / resampler.up() as u64) as usize + 8;
                let mut scratch = vec![0.0f32; needed];
                let read = instance.read_mono(&mut scratch);
                let (_, produced) = resampler.process_channel(0, &scratch[..read], out);
                (produced, read < needed && !looping)
            }
        }
    }
}

/// Commands posted from the audio thread's layer mutators to whatever
/// drains the mixer queue (here the same thread, but modeled as a queue so
/// a layer destroy can be deferred past the in-flight block currently being
/// rendered).
#[derive(Debug)]
pub enum MixCommand {
    DestroyLayer { layer_id: LayerId },
}

/// Bridges one logical channel to the mixer: owns every active layer and
/// the per-instance played-history needed for sequence/random scheduling.
pub struct RealChannel {
    pub id: u64,
    layers: BTreeMap<LayerId, Layer>,
    pub pan: f32,
    pub pitch: f32,
    pub played_history: Vec<u64>,
    command_queue: ArrayQueue<MixCommand>,
}

impl RealChannel {
    pub fn new(id: u64, queue_capacity: usize) -> Self {
        Self {
            id,
            layers: BTreeMap::new(),
            pan: 0.0,
            pitch: 1.0,
            played_history: Vec::new(),
            command_queue: ArrayQueue::new(queue_capacity),
        }
    }

    /// Smallest integer `>= seed` not already present in the layer map.
    pub fn find_free_layer(&self, seed: LayerId) -> LayerId {
        let mut candidate = seed;
        while self.layers.contains_key(&candidate) {
            candidate += 1;
        }
        candidate
    }

    /// Binds `instance` to a fresh layer, choosing `Loop` as the initial
    /// play state when the asset loops, otherwise `Play`.
    pub fn create_layer(&mut self, seed: LayerId, instance: SoundInstance, looping: bool, stream: bool) -> LayerId {
        let layer_id = self.find_free_layer(seed);
        let play_state = if looping { LayerPlayState::Loop } else { LayerPlayState::Play };
        self.layers.insert(
            layer_id,
            Layer {
                instance: Arc::new(parking_lot::Mutex::new(instance)),
                play_state,
                stream,
                gain: 1.0,
                resampler: None,
                resampler_pitch: 1.0,
            },
        );
        layer_id
    }

    /// Marks a layer stopped and posts its destruction through the mix
    /// command queue so the audio thread finishes the in-flight block
    /// first; the layer is actually dropped when the queue is drained.
    pub fn destroy_layer(&mut self, layer_id: LayerId) {
        if let Some(layer) = self.layers.get_mut(&layer_id) {
            layer.play_state = LayerPlayState::Min;
        }
        let _ = self.command_queue.push(MixCommand::DestroyLayer { layer_id });
    }

    pub fn drain_commands(&mut self) {
        while let Some(command) = self.command_queue.pop() {
            match command {
                MixCommand::DestroyLayer { layer_id } => {
                    self.layers.remove(&layer_id);
                }
            }
        }
    }

    pub fn layer(&self, layer_id: LayerId) -> Option<&Layer> {
        self.layers.get(&layer_id)
    }

    pub fn layer_mut(&mut self, layer_id: LayerId) -> Option<&mut Layer> {
        self.layers.get_mut(&layer_id)
    }

    pub fn layers(&self) -> impl Iterator<Item = (&LayerId, &Layer)> {
        self.layers.iter()
    }

    pub fn playing(&self) -> bool {
        self.layers
            .values()
            .any(|l| matches!(l.play_state, LayerPlayState::Play | LayerPlayState::Loop))
    }

    pub fn paused(&self) -> bool {
        !self.layers.is_empty() && self.layers.values().all(|l| l.play_state == LayerPlayState::Paused)
    }

    pub fn set_gain(&mut self, gain: f32) {
        for layer in self.layers.values_mut() {
            layer.gain = gain;
        }
    }

    /// Applies `gain` scaled by the sound object's own base gain multiplier.
    pub fn set_gain_pan(&mut self, gain: f32, pan: f32, base_gain_multiplier: f32) {
        self.set_gain(gain * base_gain_multiplier);
        self.set_pan(pan);
    }

    pub fn set_pan(&mut self, pan: f32) {
        self.pan = pan;
    }

    pub fn set_pitch(&mut self, pitch: f32) {
        self.pitch = pitch;
    }

    pub fn set_obstruction(&mut self, obstruction: f32) {
        for layer in self.layers.values() {
            layer.instance.lock().obstruction = obstruction;
        }
    }

    pub fn set_occlusion(&mut self, occlusion: f32) {
        for layer in self.layers.values() {
            layer.instance.lock().occlusion = occlusion;
        }
    }

    /// "Every sound in the collection has appeared" is a set comparison
    /// against recorded playback, not a linear search.
    pub fn all_sounds_has_played(&self, collection_ids: &[u64]) -> bool {
        let played: std::collections::HashSet<u64> = self.played_history.iter().copied().collect();
        collection_ids.iter().all(|id| played.contains(id))
    }

    pub fn record_played(&mut self, asset_id: u64) {
        self.played_history.push(asset_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sound_object::{FormatDescriptor, SampleType, SoundAsset};

    fn instance() -> SoundInstance {
        let asset = Arc::new(SoundAsset::new(
            1,
            "test",
            FormatDescriptor {
                sample_rate: 48_000,
                channel_count: 1,
                bits_per_sample: 32,
                frame_count: 256,
                sample_type: SampleType::F32,
            },
        ));
        SoundInstance::acquire(asset, 0)
    }

    #[test]
    fn find_free_layer_returns_smallest_unused_id() {
        let mut channel = RealChannel::new(1, 8);
        assert_eq!(channel.find_free_layer(0), 0);
        channel.create_layer(0, instance(), false, false);
        assert_eq!(channel.find_free_layer(0), 1);
        channel.create_layer(0, instance(), false, false);
        assert_eq!(channel.find_free_layer(0), 2);
    }

    #[test]
    fn destroy_layer_defers_removal_until_drain() {
        let mut channel = RealChannel::new(1, 8);
        let id = channel.create_layer(0, instance(), false, false);
        channel.destroy_layer(id);
        assert!(channel.layer(id).is_some(), "layer removal is deferred");
        assert_eq!(channel.layer(id).unwrap().play_state, LayerPlayState::Min);
        channel.drain_commands();
        assert!(channel.layer(id).is_none());
    }

    #[test]
    fn ensure_resampler_is_a_noop_at_matching_rate_and_unit_pitch() {
        let mut channel = RealChannel::new(1, 8);
        let id = channel.create_layer(0, instance(), false, false);
        let layer = channel.layer_mut(id).unwrap();
        layer.ensure_resampler(48_000, 48_000, 1.0);
        assert!(layer.resampler_mut().is_none());
    }

    #[test]
    fn ensure_resampler_builds_a_kernel_for_a_rate_mismatch() {
        let mut channel = RealChannel::new(1, 8);
        let id = channel.create_layer(0, instance(), false, false);
        let layer = channel.layer_mut(id).unwrap();
        layer.ensure_resampler(44_100, 48_000, 1.0);
        assert!(layer.resampler_mut().is_some());
    }

    #[test]
    fn ensure_resampler_skips_rebuild_for_a_small_pitch_drift() {
        let mut channel = RealChannel::new(1, 8);
        let id = channel.create_layer(0, instance(), false, false);
        let layer = channel.layer_mut(id).unwrap();
        layer.ensure_resampler(44_100, 48_000, 1.0);
        let first = layer.resampler_mut().unwrap().up();
        layer.ensure_resampler(44_100, 48_000, 1.001);
        assert_eq!(layer.resampler_mut().unwrap().up(), first);
    }

    #[test]
    fn read_resampled_mono_is_a_passthrough_at_matching_rates() {
        let mut channel = RealChannel::new(1, 8);
        let id = channel.create_layer(0, instance(), false, false);
        let layer = channel.layer_mut(id).unwrap();
        let mut out = vec![0.0f32; 64];
        let (written, ended) = layer.read_resampled_mono(48_000, 1.0, &mut out);
        assert_eq!(written, 64);
        assert!(!ended);
        assert!(layer.resampler_mut().is_none(), "matching rates need no kernel");
    }

    #[test]
    fn read_resampled_mono_builds_and_uses_a_kernel_on_rate_mismatch() {
        let asset = Arc::new(SoundAsset::new(
            1,
            "test",
            FormatDescriptor {
                sample_rate: 44_100,
                channel_count: 1,
                bits_per_sample: 32,
                frame_count: 4096,
                sample_type: SampleType::F32,
            },
        ));
        let mut channel = RealChannel::new(1, 8);
        let id = channel.create_layer(0, SoundInstance::acquire(asset, 0), false, false);
        let layer = channel.layer_mut(id).unwrap();
        let mut out = vec![0.0f32; 128];
        let (written, _ended) = layer.read_resampled_mono(48_000, 1.0, &mut out);
        assert!(written > 0 && written <= out.len());
        assert!(layer.resampler_mut().is_some());
    }

    #[test]
    fn playing_reduces_over_all_layers() {
        let mut channel = RealChannel::new(1, 8);
        assert!(!channel.playing());
        channel.create_layer(0, instance(), false, false);
        assert!(channel.playing());
    }

    #[test]
    fn broadcast_mutators_apply_to_every_layer() {
        let mut channel = RealChannel::new(1, 8);
        channel.create_layer(0, instance(), false, false);
        channel.create_layer(1, instance(), false, false);
        channel.set_gain(0.5);
        assert!(channel.layers().all(|(_, l)| l.gain == 0.5));
    }

    #[test]
    fn all_sounds_has_played_is_a_set_comparison() {
        let mut channel = RealChannel::new(1, 8);
        channel.record_played(1);
        channel.record_played(2);
        assert!(channel.all_sounds_has_played(&[1, 2]));
        assert!(!channel.all_sounds_has_played(&[1, 2, 3]));
    }
}
