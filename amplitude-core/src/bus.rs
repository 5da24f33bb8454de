//! Bus tree: gain/mute nodes with an intrusive list of channels currently
//! routing through each, summed bottom-up into the master bus.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

fn f32_to_bits_atomic(value: f32) -> u32 {
    value.to_bits()
}

/// An atomic f32 built on `AtomicU32`, used for bus gain so the audio
/// thread can read it without locking while the game thread updates it.
pub struct AtomicGain(AtomicU32);

impl AtomicGain {
    pub fn new(value: f32) -> Self {
        Self(AtomicU32::new(f32_to_bits_atomic(value)))
    }

    pub fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Acquire))
    }

    pub fn store(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Release);
    }
}

pub struct Bus {
    pub id: u64,
    pub name: String,
    gain: AtomicGain,
    mute: AtomicBool,
    pub children: Vec<usize>,
    pub parent: Option<usize>,
    pub channel_ids: Vec<u64>,
}

impl Bus {
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            gain: AtomicGain::new(1.0),
            mute: AtomicBool::new(false),
            children: Vec::new(),
            parent: None,
            channel_ids: Vec::new(),
        }
    }

    pub fn gain(&self) -> f32 {
        self.gain.load()
    }

    pub fn set_gain(&self, gain: f32) {
        self.gain.store(gain.max(0.0));
    }

    pub fn is_muted(&self) -> bool {
        self.mute.load(Ordering::Acquire)
    }

    pub fn set_muted(&self, muted: bool) {
        self.mute.store(muted, Ordering::Release);
    }
}

/// Tree of buses constructed at init and read-only afterwards except for
/// gain/mute atomics, rooted at index 0 (the master bus).
pub struct BusTree {
    buses: Vec<Bus>,
    global_mute: AtomicBool,
    master_gain: AtomicGain,
}

impl BusTree {
    pub fn new() -> Self {
        Self {
            buses: vec![Bus::new(0, "master")],
            global_mute: AtomicBool::new(false),
            master_gain: AtomicGain::new(1.0),
        }
    }

    pub const MASTER: usize = 0;

    pub fn add_child(&mut self, parent: usize, id: u64, name: impl Into<String>) -> usize {
        let index = self.buses.len();
        let mut bus = Bus::new(id, name);
        bus.parent = Some(parent);
        self.buses.push(bus);
        self.buses[parent].children.push(index);
        index
    }

    pub fn bus(&self, index: usize) -> &Bus {
        &self.buses[index]
    }

    pub fn set_global_mute(&self, muted: bool) {
        self.global_mute.store(muted, Ordering::Release);
    }

    pub fn set_master_gain(&self, gain: f32) {
        self.master_gain.store(gain.max(0.0));
    }

    pub fn master_gain(&self) -> f32 {
        self.master_gain.load()
    }

    /// Product of every bus gain from `index` up to the master, gated by
    /// mute at any level along the chain.
    pub fn effective_gain(&self, index: usize) -> f32 {
        if self.global_mute.load(Ordering::Acquire) {
            return 0.0;
        }
        let mut gain = self.master_gain();
        let mut current = Some(index);
        let mut chain = Vec::new();
        while let Some(i) = current {
            chain.push(i);
            current = self.buses[i].parent;
        }
        for &i in chain.iter().rev() {
            let bus = &self.buses[i];
            if bus.is_muted() {
                return 0.0;
            }
            gain *= bus.gain();
        }
        gain
    }
}

impl Default for BusTree {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_gain_multiplies_the_chain_to_master() {
        let mut tree = BusTree::new();
        let sfx = tree.add_child(BusTree::MASTER, 1, "sfx");
        tree.bus(sfx).set_gain(0.5);
        tree.set_master_gain(0.8);
        assert!((tree.effective_gain(sfx) - 0.4).abs() < 1e-6);
    }

    #[test]
    fn mute_anywhere_in_the_chain_zeroes_effective_gain() {
        let mut tree = BusTree::new();
        let sfx = tree.add_child(BusTree::MASTER, 1, "sfx");
        tree.bus(sfx).set_muted(true);
        assert_eq!(tree.effective_gain(sfx), 0.0);
    }

    #[test]
    fn global_mute_overrides_everything() {
        let mut tree = BusTree::new();
        let sfx = tree.add_child(BusTree::MASTER, 1, "sfx");
        tree.set_global_mute(true);
        assert_eq!(tree.effective_gain(sfx), 0.0);
    }
}
