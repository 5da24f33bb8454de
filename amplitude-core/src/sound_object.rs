//! Sound assets and playback instances: the static, shared-chunk side of
//! what a `Channel` plays.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleType {
    F32,
    I16,
}

#[derive(Debug, Clone, Copy)]
pub struct FormatDescriptor {
    pub sample_rate: u32,
    pub channel_count: u16,
    pub bits_per_sample: u16,
    pub frame_count: u64,
    pub sample_type: SampleType,
}

/// A shared, reference-counted block of decoded samples. Freed when the
/// last acquiring instance releases it; the final decrement performed on
/// the audio thread defers the actual drop to a free-list the game thread
/// drains, so no allocator call happens in the render path.
#[derive(Debug)]
pub struct SoundChunk {
    pub samples: amplitude_dsp::AudioBuffer,
    refcount: AtomicU64,
}

impl SoundChunk {
    pub fn new(samples: amplitude_dsp::AudioBuffer) -> Arc<Self> {
        Arc::new(Self {
            samples,
            refcount: AtomicU64::new(0),
        })
    }

    pub fn acquire(self: &Arc<Self>) -> u64 {
        self.refcount.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Releases one reference. Returns the pending count; a pending count
    /// of zero means the caller should enqueue this chunk on the deferred
    /// free-list rather than dropping it inline.
    pub fn release(self: &Arc<Self>) -> u64 {
        self.refcount.fetch_sub(1, Ordering::AcqRel) - 1
    }

    pub fn ref_count(&self) -> u64 {
        self.refcount.load(Ordering::Acquire)
    }
}

/// A free-list of chunks whose last reference was released on the audio
/// thread. The game thread drains this periodically to perform the actual
/// deallocation off the render path.
#[derive(Default)]
pub struct DeferredFreeList {
    pending: Mutex<Vec<Arc<SoundChunk>>>,
}

impl DeferredFreeList {
    pub fn defer(&self, chunk: Arc<SoundChunk>) {
        self.pending.lock().push(chunk);
    }

    pub fn drain(&self) -> Vec<Arc<SoundChunk>> {
        std::mem::take(&mut *self.pending.lock())
    }
}

/// Immutable once loaded. Shared by every instance acquired from it.
#[derive(Debug)]
pub struct SoundAsset {
    pub id: u64,
    pub name: String,
    pub format: FormatDescriptor,
    pub stream: bool,
    pub looping: bool,
    pub loop_count: Option<u32>,
    pub priority_multiplier: f32,
    chunk: Mutex<Option<Arc<SoundChunk>>>,
}

impl SoundAsset {
    pub fn new(id: u64, name: impl Into<String>, format: FormatDescriptor) -> Self {
        Self {
            id,
            name: name.into(),
            format,
            stream: false,
            looping: false,
            loop_count: None,
            priority_multiplier: 1.0,
            chunk: Mutex::new(None),
        }
    }

    /// Allocates the shared chunk on first instance acquisition; later
    /// acquisitions reuse it.
    pub fn acquire_chunk(&self, frames_hint: u64) -> Arc<SoundChunk> {
        let mut guard = self.chunk.lock();
        if guard.is_none() && !self.stream {
            let frames = frames_hint.max(self.format.frame_count) as usize;
            let buffer = amplitude_dsp::AudioBuffer::new(frames, self.format.channel_count as usize);
            *guard = Some(SoundChunk::new(buffer));
        }
        guard
            .as_ref()
            .expect("non-streaming asset must have an allocated chunk")
            .clone()
    }
}

static NEXT_INSTANCE_ID: AtomicU64 = AtomicU64::new(1);

fn next_instance_id() -> u64 {
    NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed)
}

/// Per-playback copy of an asset reference plus per-playback state.
pub struct SoundInstance {
    pub id: u64,
    pub asset: Arc<SoundAsset>,
    pub chunk: Option<Arc<SoundChunk>>,
    pub obstruction: f32,
    pub occlusion: f32,
    pub loop_iteration: u32,
    /// Read position into `chunk`, in frames. Advanced by the mixer each
    /// block; wraps (and bumps `loop_iteration`) when the asset loops.
    pub cursor: u64,
}

impl SoundInstance {
    pub fn acquire(asset: Arc<SoundAsset>, stream_frames: u64) -> Self {
        let chunk = if asset.stream {
            None
        } else {
            let chunk = asset.acquire_chunk(stream_frames);
            chunk.acquire();
            Some(chunk)
        };
        Self {
            id: next_instance_id(),
            asset,
            chunk,
            obstruction: 0.0,
            occlusion: 0.0,
            loop_iteration: 0,
            cursor: 0,
        }
    }

    /// Reads `out.len()` mono frames starting at `cursor`, downmixing a
    /// multichannel chunk by averaging. Returns the number of frames
    /// actually written; the remainder of `out` is left untouched so the
    /// caller can zero-fill it on underrun instead of failing the block.
    pub fn read_mono(&mut self, out: &mut [f32]) -> usize {
        let Some(chunk) = self.chunk.as_ref() else { return 0 };
        let total_frames = chunk.samples.frame_count() as u64;
        if total_frames == 0 {
            return 0;
        }
        let channel_count = chunk.samples.channel_count();
        let mut written = 0;
        for slot in out.iter_mut() {
            if self.cursor >= total_frames {
                if self.asset.looping {
                    self.cursor = 0;
                    self.loop_iteration += 1;
                } else {
                    break;
                }
            }
            let frame = self.cursor as usize;
            let mut sum = 0.0;
            for c in 0..channel_count {
                sum += chunk.samples.channel(c)[frame];
            }
            *slot = sum / channel_count as f32;
            self.cursor += 1;
            written += 1;
        }
        written
    }

    /// Releases the acquired chunk reference, returning it for deferred
    /// free-list handling when this was the last reference.
    pub fn release(&mut self) -> Option<Arc<SoundChunk>> {
        let chunk = self.chunk.take()?;
        if chunk.release() == 0 {
            Some(chunk)
        } else {
            None
        }
    }
}

/// How a `Collection`'s children are picked on each trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionSchedulerKind {
    Random { avoid_repeat: bool },
    Sequence { reverse_on_boundary: bool },
}

pub struct Collection {
    pub id: u64,
    pub name: String,
    pub items: Vec<Arc<SoundAsset>>,
    pub scheduler_kind: CollectionSchedulerKind,
    pub priority_multiplier: f32,
}

#[derive(Debug, Clone)]
pub struct SwitchContainerItem {
    pub asset: Arc<SoundAsset>,
    pub switch_states: Vec<u32>,
    pub continue_between_states: bool,
    pub fade_in: f32,
    pub fade_out: f32,
}

pub struct SwitchContainer {
    pub id: u64,
    pub name: String,
    pub switch_group: u64,
    pub items: Vec<SwitchContainerItem>,
    pub priority_multiplier: f32,
}

impl SwitchContainer {
    /// Items whose `switch_states` contains `state`.
    pub fn active_items(&self, state: u32) -> Vec<&SwitchContainerItem> {
        self.items
            .iter()
            .filter(|item| item.switch_states.contains(&state))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mono_format() -> FormatDescriptor {
        FormatDescriptor {
            sample_rate: 48_000,
            channel_count: 1,
            bits_per_sample: 32,
            frame_count: 1024,
            sample_type: SampleType::F32,
        }
    }

    #[test]
    fn chunk_is_allocated_once_and_shared_across_instances() {
        let asset = Arc::new(SoundAsset::new(1, "ding", mono_format()));
        let mut a = SoundInstance::acquire(asset.clone(), 0);
        let b = SoundInstance::acquire(asset.clone(), 0);
        assert!(Arc::ptr_eq(a.chunk.as_ref().unwrap(), b.chunk.as_ref().unwrap()));
        assert_eq!(a.chunk.as_ref().unwrap().ref_count(), 2);
        let released = a.release();
        assert!(released.is_none(), "one reference remains outstanding");
    }

    #[test]
    fn last_release_reports_zero_refcount() {
        let asset = Arc::new(SoundAsset::new(1, "ding", mono_format()));
        let mut a = SoundInstance::acquire(asset, 0);
        let released = a.release();
        assert!(released.is_some());
    }

    #[test]
    fn switch_container_filters_active_items_by_state() {
        let asset_a = Arc::new(SoundAsset::new(1, "a", mono_format()));
        let asset_b = Arc::new(SoundAsset::new(2, "b", mono_format()));
        let container = SwitchContainer {
            id: 1,
            name: "footsteps".into(),
            switch_group: 10,
            items: vec![
                SwitchContainerItem {
                    asset: asset_a,
                    switch_states: vec![1],
                    continue_between_states: false,
                    fade_in: 0.1,
                    fade_out: 0.1,
                },
                SwitchContainerItem {
                    asset: asset_b,
                    switch_states: vec![2],
                    continue_between_states: false,
                    fade_in: 0.1,
                    fade_out: 0.1,
                },
            ],
            priority_multiplier: 1.0,
        };
        assert_eq!(container.active_items(1).len(), 1);
        assert_eq!(container.active_items(3).len(), 0);
    }
}
