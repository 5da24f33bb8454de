//! The logical voice. A `Channel` is never decoded or mixed directly —
//! it owns at most one [`RealChannel`](crate::mixer::RealChannel) binding
//! and drives that binding's lifetime through a fade state machine.
//!
//! Priority/bus/entity bookkeeping is a sorted-vec [`PriorityList`] plus
//! plain `bus`/`entity` handle fields queried by arena scan, rather than
//! intrusive linked lists; the channel free list is delegated to
//! `Arena`'s own index recycling instead of a fourth intrusive list,
//! since the arena already provides it.

use crate::ambisonic_mode::Spatialization;
use crate::arena::{Arena, Handle};
use crate::fader::{BezierCurve, FaderInstance, FaderState};
use crate::mixer::LayerId;

/// One child of a switch container currently bound to a layer. Tracked
/// outside `bound_layer` because a switch container can have more than one
/// of these live at once — every item common to the old and new active
/// set during a crossfade, plus whichever items are still fading out or
/// in.
pub struct SwitchLayer {
    pub asset_id: u64,
    pub layer_id: LayerId,
    /// Current gain multiplier for this item; `1.0` once settled, ramping
    /// while `fader` is `Some`.
    pub gain: f32,
    fader: Option<FaderInstance>,
    fading_out: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Stopped,
    Playing,
    FadingIn,
    FadingOut,
    SwitchingState,
    Paused,
}

/// What a fade-out is heading toward once the fader bottoms out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FadeTarget {
    Stopped,
    Paused,
}

/// What a channel plays: exactly one of a sound, a collection, or a
/// switch container is bound at a time.
#[derive(Debug, Clone, Copy)]
pub enum PlaySource {
    Sound(u64),
    Collection(u64),
    SwitchContainer(u64),
}

pub struct Channel {
    pub state: ChannelState,
    pub fade_target: FadeTarget,
    pub source: Option<PlaySource>,
    pub real_channel: Option<Handle>,
    pub bound_layer: Option<LayerId>,
    /// Live items of a bound switch container, keyed by membership in the
    /// current switch state; empty for `Sound`/`Collection` sources, which
    /// use `bound_layer` instead.
    pub switch_layers: Vec<SwitchLayer>,
    /// The switch state `switch_layers` was last resolved against. `None`
    /// until the first bind, so a later transition knows whether it's
    /// diffing against a real prior state or starting cold.
    pub switch_state: Option<u32>,
    /// Doppler pitch factor computed on the previous block, fed into this
    /// block's resampler ratio for every bound layer.
    pub pending_pitch: f32,
    pub gain: f32,
    pub priority_multiplier: f32,
    pub pan: f32,
    pub pitch: f32,
    pub directivity: f32,
    pub directivity_sharpness: f32,
    pub entity: Option<Handle>,
    /// Assigned each block to the closest listener; not a caller
    /// preference.
    pub listener: Option<Handle>,
    pub bus: Option<Handle>,
    pub room: Option<u64>,
    pub spatialization: Spatialization,
    pub max_distance: f32,
    pub attenuation_curve: Vec<(f32, f32)>,
    pub fader: FaderInstance,
}

impl Channel {
    pub fn new() -> Self {
        Self {
            state: ChannelState::Stopped,
            fade_target: FadeTarget::Stopped,
            source: None,
            real_channel: None,
            bound_layer: None,
            switch_layers: Vec::new(),
            switch_state: None,
            pending_pitch: 1.0,
            gain: 1.0,
            priority_multiplier: 1.0,
            pan: 0.0,
            pitch: 1.0,
            directivity: 0.0,
            directivity_sharpness: 1.0,
            entity: None,
            listener: None,
            bus: None,
            room: None,
            spatialization: Spatialization::None,
            max_distance: 100.0,
            attenuation_curve: vec![(0.0, 1.0), (1.0, 0.0)],
            fader: FaderInstance::new(BezierCurve::linear()),
        }
    }

    /// Alive when a sound, collection, or switch container is bound.
    pub fn is_alive(&self) -> bool {
        self.source.is_some()
    }

    pub fn is_real(&self) -> bool {
        self.real_channel.is_some()
    }

    pub fn priority(&self) -> f32 {
        self.gain * self.priority_multiplier
    }

    /// Stopped → Playing (fade == 0) or FadingIn (fade > 0).
    pub fn play(&mut self, source: PlaySource, fade_seconds: f64, now: f64) {
        self.source = Some(source);
        if fade_seconds <= 0.0 {
            self.state = ChannelState::Playing;
            self.fader.set_state(FaderState::Stopped);
        } else {
            self.state = ChannelState::FadingIn;
            self.fader.set(0.0, 1.0, fade_seconds);
            self.fader.start(now);
        }
    }

    /// Playing/Paused → FadingOut(target=Stopped), or immediate Stopped
    /// when `fade_seconds <= 0`.
    pub fn stop(&mut self, fade_seconds: f64, now: f64) {
        if fade_seconds <= 0.0 {
            self.enter_stopped();
            return;
        }
        self.fade_target = FadeTarget::Stopped;
        self.state = ChannelState::FadingOut;
        self.fader.set(1.0, 0.0, fade_seconds);
        self.fader.start(now);
    }

    /// Playing → FadingOut(target=Paused) or immediate Paused.
    pub fn pause(&mut self, fade_seconds: f64, now: f64) {
        if fade_seconds <= 0.0 {
            self.state = ChannelState::Paused;
            return;
        }
        self.fade_target = FadeTarget::Paused;
        self.state = ChannelState::FadingOut;
        self.fader.set(1.0, 0.0, fade_seconds);
        self.fader.start(now);
    }

    /// Paused → FadingIn(d>0) or Playing(d==0).
    pub fn resume(&mut self, fade_seconds: f64, now: f64) {
        if self.state != ChannelState::Paused {
            return;
        }
        if fade_seconds <= 0.0 {
            self.state = ChannelState::Playing;
        } else {
            self.state = ChannelState::FadingIn;
            self.fader.set(0.0, 1.0, fade_seconds);
            self.fader.start(now);
        }
    }

    /// Playing → SwitchingState; at least one item is mid-crossfade.
    pub fn begin_switch(&mut self) {
        if self.state == ChannelState::Playing {
            self.state = ChannelState::SwitchingState;
        }
    }

    pub fn end_switch(&mut self) {
        if self.state == ChannelState::SwitchingState {
            self.state = ChannelState::Playing;
        }
    }

    /// Binds a newly-created layer for an item that was already active
    /// before this channel's first switch transition — no fade, since
    /// there is nothing to cross from.
    pub fn bind_switch_layer_settled(&mut self, asset_id: u64, layer_id: LayerId) {
        self.switch_layers.push(SwitchLayer {
            asset_id,
            layer_id,
            gain: 1.0,
            fader: None,
            fading_out: false,
        });
    }

    /// Starts fading out the layer bound to `asset_id`. Left in
    /// `switch_layers` until `advance_switch_layers` reports the fader has
    /// finished, so the caller can destroy the layer at the right time.
    pub fn begin_switch_fade_out(&mut self, asset_id: u64, fade_seconds: f64, now: f64) {
        let Some(layer) = self.switch_layers.iter_mut().find(|l| l.asset_id == asset_id && !l.fading_out) else {
            return;
        };
        let mut fader = FaderInstance::new(BezierCurve::linear());
        fader.set(layer.gain as f64, 0.0, fade_seconds);
        fader.start(now);
        layer.fader = Some(fader);
        layer.fading_out = true;
        self.begin_switch();
    }

    /// Registers a freshly created layer for an item entering the active
    /// set, fading its gain up from zero.
    pub fn begin_switch_fade_in(&mut self, asset_id: u64, layer_id: LayerId, fade_seconds: f64, now: f64) {
        let mut fader = FaderInstance::new(BezierCurve::linear());
        fader.set(0.0, 1.0, fade_seconds);
        fader.start(now);
        self.switch_layers.push(SwitchLayer {
            asset_id,
            layer_id,
            gain: 0.0,
            fader: Some(fader),
            fading_out: false,
        });
        self.begin_switch();
    }

    /// Drives every switch layer's fader for `now`, drops the ones whose
    /// fade-out just finished, and returns their layer ids so the caller
    /// can destroy them in the mixer. Resolves SwitchingState back to
    /// Playing once nothing is left mid-fade.
    pub fn advance_switch_layers(&mut self, now: f64) -> Vec<LayerId> {
        for layer in self.switch_layers.iter_mut() {
            if let Some(fader) = layer.fader.as_mut() {
                layer.gain = fader.get_from_time(now) as f32;
                if fader.state() == FaderState::Stopped {
                    layer.fader = None;
                }
            }
        }
        let mut finished = Vec::new();
        self.switch_layers.retain(|layer| {
            if layer.fading_out && layer.fader.is_none() {
                finished.push(layer.layer_id);
                false
            } else {
                true
            }
        });
        if self.switch_layers.iter().all(|l| l.fader.is_none()) {
            self.end_switch();
        }
        finished
    }

    /// Drives the fader for `now`, resolving FadingIn → Playing and
    /// FadingOut → `fade_target` when the fader bottoms out or tops out.
    /// Channel stopped during fade-in at t=0 lands in Stopped directly,
    /// without ever emitting audio.
    pub fn advance(&mut self, now: f64) {
        match self.state {
            ChannelState::FadingIn => {
                let value = self.fader.get_from_time(now);
                if self.fader.state() == FaderState::Stopped {
                    if value <= 0.0 {
                        self.enter_stopped();
                    } else {
                        self.state = ChannelState::Playing;
                    }
                }
            }
            ChannelState::FadingOut => {
                self.fader.get_from_time(now);
                if self.fader.state() == FaderState::Stopped {
                    match self.fade_target {
                        FadeTarget::Stopped => self.enter_stopped(),
                        FadeTarget::Paused => self.state = ChannelState::Paused,
                    }
                }
            }
            _ => {}
        }
    }

    /// End-of-stream with `looping == false` drives Playing → Stopped
    /// directly, same as a zero-fade `stop()`.
    pub fn on_stream_end(&mut self, looping: bool) {
        if !looping && self.state == ChannelState::Playing {
            self.enter_stopped();
        }
    }

    fn enter_stopped(&mut self) {
        self.state = ChannelState::Stopped;
        self.source = None;
        self.real_channel = None;
        self.bound_layer = None;
        self.switch_layers = Vec::new();
        self.switch_state = None;
        self.pending_pitch = 1.0;
    }
}

impl Default for Channel {
    fn default() -> Self {
        Self::new()
    }
}

/// A sorted-descending priority order over live channels; the first
/// `max_real` entries are real, the rest virtual. `devirtualize` transfers
/// a displaced channel's real-channel binding to the newcomer crossing
/// the boundary.
pub struct PriorityList {
    order: Vec<Handle>,
    max_real: usize,
}

impl PriorityList {
    pub fn new(max_real: usize) -> Self {
        Self {
            order: Vec::new(),
            max_real,
        }
    }

    pub fn insert(&mut self, channels: &Arena<Channel>, handle: Handle) {
        if self.order.contains(&handle) {
            return;
        }
        let priority = channels.get(handle).map(|c| c.priority()).unwrap_or(f32::MIN);
        let position = self
            .order
            .iter()
            .position(|&h| channels.get(h).map(|c| c.priority()).unwrap_or(f32::MIN) < priority)
            .unwrap_or(self.order.len());
        self.order.insert(position, handle);
    }

    pub fn remove(&mut self, handle: Handle) {
        self.order.retain(|&h| h != handle);
    }

    /// Re-sorts the whole list by current priority. Called once per block
    /// after gain/priority_multiplier ramps have been applied, since a
    /// stable full re-sort is simpler and cheap enough at `max_channels`
    /// scale than maintaining per-update positional invariants.
    pub fn resort(&mut self, channels: &Arena<Channel>) {
        self.order.sort_by(|&a, &b| {
            let pa = channels.get(a).map(|c| c.priority()).unwrap_or(f32::MIN);
            let pb = channels.get(b).map(|c| c.priority()).unwrap_or(f32::MIN);
            pb.partial_cmp(&pa).unwrap_or(std::cmp::Ordering::Equal)
        });
    }

    pub fn real_window(&self) -> &[Handle] {
        &self.order[..self.order.len().min(self.max_real)]
    }

    pub fn virtual_tail(&self) -> &[Handle] {
        let split = self.order.len().min(self.max_real);
        &self.order[split..]
    }

    /// For every channel in the real window lacking a real-channel
    /// binding, and every virtual-tail channel holding one, transfer the
    /// binding from the lowest-priority real-holder to the newcomer.
    pub fn devirtualize(&self, channels: &mut Arena<Channel>) {
        let real_window = self.real_window().to_vec();
        let mut displaced: Vec<Handle> = self
            .virtual_tail()
            .iter()
            .copied()
            .filter(|h| channels.get(*h).map(|c| c.is_real()).unwrap_or(false))
            .collect();

        for &promoted in &real_window {
            let needs_binding = channels.get(promoted).map(|c| !c.is_real()).unwrap_or(false);
            if !needs_binding {
                continue;
            }
            let Some(donor) = displaced.pop() else { break };
            let binding = channels.get_mut(donor).and_then(|c| c.real_channel.take());
            if let Some(handle) = binding {
                if let Some(target) = channels.get_mut(promoted) {
                    target.real_channel = Some(handle);
                }
            }
        }
    }
}

/// Every live channel routed to `bus`, found by a direct arena scan rather
/// than an intrusive per-bus list — cheap at `max_channels` scale and
/// avoids a second linked structure to keep consistent on every move.
pub fn channels_on_bus(channels: &Arena<Channel>, bus: Handle) -> impl Iterator<Item = Handle> + '_ {
    channels.iter().filter(move |(_, c)| c.bus == Some(bus)).map(|(h, _)| h)
}

pub fn channels_bound_to_entity(channels: &Arena<Channel>, entity: Handle) -> impl Iterator<Item = Handle> + '_ {
    channels.iter().filter(move |(_, c)| c.entity == Some(entity)).map(|(h, _)| h)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channels_on_bus_finds_only_matching_routing() {
        let mut channels = Arena::new();
        let bus_a = Handle::INVALID;
        let mut on_bus = Channel::new();
        on_bus.bus = Some(bus_a);
        let off_bus = Channel::new();
        let on_handle = channels.insert(on_bus);
        channels.insert(off_bus);
        let found: Vec<Handle> = channels_on_bus(&channels, bus_a).collect();
        assert_eq!(found, vec![on_handle]);
    }

    #[test]
    fn play_with_zero_fade_goes_straight_to_playing() {
        let mut channel = Channel::new();
        channel.play(PlaySource::Sound(1), 0.0, 0.0);
        assert_eq!(channel.state, ChannelState::Playing);
    }

    #[test]
    fn play_with_fade_enters_fading_in() {
        let mut channel = Channel::new();
        channel.play(PlaySource::Sound(1), 0.5, 0.0);
        assert_eq!(channel.state, ChannelState::FadingIn);
    }

    #[test]
    fn fading_in_resolves_to_playing_when_fader_completes() {
        let mut channel = Channel::new();
        channel.play(PlaySource::Sound(1), 0.5, 0.0);
        channel.advance(1.0);
        assert_eq!(channel.state, ChannelState::Playing);
    }

    #[test]
    fn stop_with_fade_ends_in_stopped_and_releases_real_channel() {
        let mut channel = Channel::new();
        channel.play(PlaySource::Sound(1), 0.0, 0.0);
        channel.real_channel = Some(Handle::INVALID);
        channel.stop(0.25, 0.0);
        assert_eq!(channel.state, ChannelState::FadingOut);
        channel.advance(1.0);
        assert_eq!(channel.state, ChannelState::Stopped);
        assert!(channel.real_channel.is_none());
        assert!(!channel.is_alive());
    }

    #[test]
    fn end_of_stream_without_looping_stops_immediately() {
        let mut channel = Channel::new();
        channel.play(PlaySource::Sound(1), 0.0, 0.0);
        channel.on_stream_end(false);
        assert_eq!(channel.state, ChannelState::Stopped);
    }

    #[test]
    fn end_of_stream_while_looping_is_a_no_op() {
        let mut channel = Channel::new();
        channel.play(PlaySource::Sound(1), 0.0, 0.0);
        channel.on_stream_end(true);
        assert_eq!(channel.state, ChannelState::Playing);
    }

    #[test]
    fn settled_switch_layer_binds_at_full_gain_with_no_fader() {
        let mut channel = Channel::new();
        channel.bind_switch_layer_settled(1, 7);
        assert_eq!(channel.switch_layers.len(), 1);
        assert_eq!(channel.switch_layers[0].gain, 1.0);
        assert!(channel.advance_switch_layers(0.0).is_empty());
    }

    #[test]
    fn switch_fade_out_retires_the_layer_once_its_fader_settles() {
        let mut channel = Channel::new();
        channel.play(PlaySource::SwitchContainer(1), 0.0, 0.0);
        channel.bind_switch_layer_settled(1, 7);
        channel.begin_switch_fade_out(1, 0.5, 0.0);
        assert_eq!(channel.state, ChannelState::SwitchingState);
        assert!(channel.advance_switch_layers(0.1).is_empty(), "still ramping");
        let finished = channel.advance_switch_layers(1.0);
        assert_eq!(finished, vec![7]);
        assert!(channel.switch_layers.is_empty());
        assert_eq!(channel.state, ChannelState::Playing);
    }

    #[test]
    fn switch_fade_in_ramps_a_new_layer_up_from_zero() {
        let mut channel = Channel::new();
        channel.play(PlaySource::SwitchContainer(1), 0.0, 0.0);
        channel.begin_switch_fade_in(2, 9, 0.5, 0.0);
        assert_eq!(channel.switch_layers[0].gain, 0.0);
        channel.advance_switch_layers(0.5);
        assert!((channel.switch_layers[0].gain - 1.0).abs() < 1e-6);
        assert_eq!(channel.state, ChannelState::Playing);
    }

    #[test]
    fn entering_stopped_clears_every_switch_layer() {
        let mut channel = Channel::new();
        channel.play(PlaySource::SwitchContainer(1), 0.0, 0.0);
        channel.bind_switch_layer_settled(1, 7);
        channel.switch_state = Some(2);
        channel.stop(0.0, 0.0);
        assert!(channel.switch_layers.is_empty());
        assert!(channel.switch_state.is_none());
    }

    #[test]
    fn priority_window_keeps_first_k_by_descending_priority() {
        let mut channels = Arena::new();
        let mut make = |gain: f32| {
            let mut c = Channel::new();
            c.gain = gain;
            channels.insert(c)
        };
        let high = make(0.9);
        let mid = make(0.5);
        let low = make(0.1);

        let mut list = PriorityList::new(2);
        list.insert(&channels, low);
        list.insert(&channels, high);
        list.insert(&channels, mid);

        assert_eq!(list.real_window(), &[high, mid]);
        assert_eq!(list.virtual_tail(), &[low]);
    }

    #[test]
    fn devirtualize_transfers_binding_to_the_promoted_channel() {
        let mut channels = Arena::new();
        let mut high = Channel::new();
        high.gain = 0.1;
        let mut low = Channel::new();
        low.gain = 0.9;
        low.real_channel = Some(Handle::INVALID);

        let high_handle = channels.insert(high);
        let low_handle = channels.insert(low);

        let mut list = PriorityList::new(1);
        list.insert(&channels, low_handle);
        list.insert(&channels, high_handle);

        // Raise the virtual one above the current real holder, then resort.
        channels.get_mut(high_handle).unwrap().gain = 1.0;
        list.resort(&channels);
        assert_eq!(list.real_window(), &[high_handle]);

        list.devirtualize(&mut channels);
        assert!(channels.get(high_handle).unwrap().is_real());
        assert!(!channels.get(low_handle).unwrap().is_real());
    }
}
