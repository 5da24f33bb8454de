//! `Collection` item selection and `SwitchContainer` state transitions.
//! Scheduler state is per-scope — one world scheduler plus a map of
//! entity-scoped schedulers created on demand.

use std::collections::{HashMap, HashSet};

use crate::sound_object::{Collection, CollectionSchedulerKind, SwitchContainerItem};

/// A lightweight, dependency-free xorshift generator for collection
/// selection. Audio thread code must not allocate or touch thread-local OS
/// state, so this stays a private, seedable generator rather than reaching
/// for `rand`.
pub struct SchedulerRng {
    state: u64,
}

impl SchedulerRng {
    pub fn new(seed: u64) -> Self {
        Self {
            state: seed.max(1),
        }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    fn next_below(&mut self, bound: usize) -> usize {
        (self.next_u64() % bound as u64) as usize
    }
}

/// Per-scope scheduling state for one `Collection`.
pub struct CollectionSchedulerState {
    sequence_index: usize,
    reverse: bool,
    played: HashSet<u64>,
}

impl CollectionSchedulerState {
    pub fn new() -> Self {
        Self {
            sequence_index: 0,
            reverse: false,
            played: HashSet::new(),
        }
    }

    /// Picks the next item index per `kind`. Random optionally avoids the
    /// "don't-repeat" set tracked in `played`; Sequence advances a cyclic
    /// index, flipping direction at either boundary when
    /// `reverse_on_boundary` is set.
    pub fn next_index(&mut self, rng: &mut SchedulerRng, count: usize, kind: CollectionSchedulerKind) -> usize {
        if count == 0 {
            return 0;
        }
        match kind {
            CollectionSchedulerKind::Random { avoid_repeat } => {
                if avoid_repeat && self.played.len() < count {
                    loop {
                        let candidate = rng.next_below(count);
                        if !self.played.contains(&(candidate as u64)) {
                            return candidate;
                        }
                    }
                }
                rng.next_below(count)
            }
            CollectionSchedulerKind::Sequence { reverse_on_boundary } => {
                let index = self.sequence_index.min(count - 1);
                self.advance_sequence(count, reverse_on_boundary);
                index
            }
        }
    }

    fn advance_sequence(&mut self, count: usize, reverse_on_boundary: bool) {
        if !reverse_on_boundary {
            self.sequence_index = (self.sequence_index + 1) % count;
            return;
        }
        if self.reverse {
            if self.sequence_index == 0 {
                self.reverse = false;
                self.sequence_index = (1).min(count - 1);
            } else {
                self.sequence_index -= 1;
            }
        } else if self.sequence_index + 1 >= count {
            self.reverse = true;
            self.sequence_index = count.saturating_sub(2);
        } else {
            self.sequence_index += 1;
        }
    }

    pub fn record_played(&mut self, index: usize) {
        self.played.insert(index as u64);
    }

    pub fn all_played(&self, count: usize) -> bool {
        self.played.len() >= count
    }

    pub fn reset_played(&mut self) {
        self.played.clear();
    }
}

impl Default for CollectionSchedulerState {
    fn default() -> Self {
        Self::new()
    }
}

/// Owns the world-scoped scheduler plus on-demand entity-scoped ones for a
/// single `Collection`.
pub struct CollectionScheduler {
    pub collection_id: u64,
    world: CollectionSchedulerState,
    per_entity: HashMap<u64, CollectionSchedulerState>,
}

impl CollectionScheduler {
    pub fn new(collection_id: u64) -> Self {
        Self {
            collection_id,
            world: CollectionSchedulerState::new(),
            per_entity: HashMap::new(),
        }
    }

    pub fn scope_mut(&mut self, entity_id: Option<u64>) -> &mut CollectionSchedulerState {
        match entity_id {
            None => &mut self.world,
            Some(id) => self.per_entity.entry(id).or_default(),
        }
    }

    pub fn pick(&mut self, rng: &mut SchedulerRng, collection: &Collection, entity_id: Option<u64>) -> usize {
        let count = collection.items.len();
        let kind = collection.scheduler_kind;
        self.scope_mut(entity_id).next_index(rng, count, kind)
    }
}

/// The outcome of a `set_switch_state` transition: which items should
/// begin fading out, which should begin fading in, and which are common
/// to both the old and new active sets and therefore left alone.
pub struct SwitchTransition<'a> {
    pub fade_out: Vec<&'a SwitchContainerItem>,
    pub fade_in: Vec<&'a SwitchContainerItem>,
    pub unchanged: Vec<&'a SwitchContainerItem>,
}

/// Computes a switch-state transition by set difference between the items
/// active for `previous_state` and `new_state`: every item present before
/// but absent now begins fade-out, every newly-present item begins
/// fade-in, and items common to both sets are preserved unchanged.
pub fn compute_switch_transition<'a>(
    items: &'a [SwitchContainerItem],
    previous_state: Option<u32>,
    new_state: u32,
) -> SwitchTransition<'a> {
    let was_active = |item: &SwitchContainerItem| {
        previous_state.is_some_and(|state| item.switch_states.contains(&state))
    };
    let is_active = |item: &SwitchContainerItem| item.switch_states.contains(&new_state);

    let mut fade_out = Vec::new();
    let mut fade_in = Vec::new();
    let mut unchanged = Vec::new();

    for item in items {
        match (was_active(item), is_active(item)) {
            (true, false) => fade_out.push(item),
            (false, true) => fade_in.push(item),
            (true, true) => unchanged.push(item),
            (false, false) => {}
        }
    }

    SwitchTransition { fade_out, fade_in, unchanged }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sound_object::{FormatDescriptor, SampleType, SoundAsset};
    use std::sync::Arc;

    fn asset(id: u64) -> Arc<SoundAsset> {
        Arc::new(SoundAsset::new(
            id,
            format!("asset-{id}"),
            FormatDescriptor {
                sample_rate: 48_000,
                channel_count: 1,
                bits_per_sample: 32,
                frame_count: 16,
                sample_type: SampleType::F32,
            },
        ))
    }

    #[test]
    fn sequence_wraps_cyclically() {
        let mut state = CollectionSchedulerState::new();
        let mut rng = SchedulerRng::new(1);
        let kind = CollectionSchedulerKind::Sequence { reverse_on_boundary: false };
        let picks: Vec<usize> = (0..5).map(|_| state.next_index(&mut rng, 3, kind)).collect();
        assert_eq!(picks, vec![0, 1, 2, 0, 1]);
    }

    #[test]
    fn sequence_reverses_at_boundary_when_flagged() {
        let mut state = CollectionSchedulerState::new();
        let mut rng = SchedulerRng::new(1);
        let kind = CollectionSchedulerKind::Sequence { reverse_on_boundary: true };
        let picks: Vec<usize> = (0..6).map(|_| state.next_index(&mut rng, 3, kind)).collect();
        assert_eq!(picks, vec![0, 1, 2, 1, 0, 1]);
    }

    #[test]
    fn random_avoid_repeat_never_repeats_until_all_played() {
        let mut state = CollectionSchedulerState::new();
        let mut rng = SchedulerRng::new(7);
        let kind = CollectionSchedulerKind::Random { avoid_repeat: true };
        let mut seen = HashSet::new();
        for _ in 0..4 {
            let pick = state.next_index(&mut rng, 4, kind);
            assert!(!seen.contains(&pick), "repeated {pick} before exhausting the set");
            state.record_played(pick);
            seen.insert(pick);
        }
        assert!(state.all_played(4));
    }

    #[test]
    fn switch_transition_partitions_items_by_membership_change() {
        let a = SwitchContainerItem {
            asset: asset(1),
            switch_states: vec![1],
            continue_between_states: false,
            fade_in: 0.1,
            fade_out: 0.1,
        };
        let b = SwitchContainerItem {
            asset: asset(2),
            switch_states: vec![2],
            continue_between_states: false,
            fade_in: 0.1,
            fade_out: 0.1,
        };
        let c = SwitchContainerItem {
            asset: asset(3),
            switch_states: vec![1, 2],
            continue_between_states: true,
            fade_in: 0.1,
            fade_out: 0.1,
        };
        let items = vec![a, b, c];
        let transition = compute_switch_transition(&items, Some(1), 2);
        assert_eq!(transition.fade_out.len(), 1);
        assert_eq!(transition.fade_in.len(), 1);
        assert_eq!(transition.unchanged.len(), 1);
    }
}
