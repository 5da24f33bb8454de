//! The engine frontend. Owns every piece of mutable audio state and
//! exposes it to callers two ways: synchronous getters/handle allocation
//! for things the caller needs back immediately, and an `EngineCommand`
//! queue for mutations whose effect should land atomically at the start of
//! the next render block rather than mid-block.
//!
//! `Engine` is an ordinary owned struct rather than a singleton reached
//! through a global, so a host can run more than one (or none, in a test).

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use glam::Vec3;

use crate::ambisonic_mode::Spatialization;
use crate::arena::{Arena, Handle};
use crate::bus::BusTree;
use crate::channel::{Channel, ChannelState, PlaySource, PriorityList};
use crate::config::EngineConfig;
use crate::entities::{Entity, Environment, Listener, Orientation, Positioned, Room};
use crate::error::{AmplitudeError, Result};
use crate::logger::{LogLevel, Logger, SourceLocation, TracingLogger};
use crate::mixer::{LayerId, LayerPlayState, RealChannel};
use crate::room::RoomReflections;
use crate::scheduler::{compute_switch_transition, CollectionScheduler, SchedulerRng};
use crate::sound_object::{Collection, SoundAsset, SoundInstance, SwitchContainer, SwitchContainerItem};
use crate::spatialize::{process_block as run_spatialize, SpatialBlockInput, SpatialChannel};
use crate::thread_primitives::SpinMutex;

pub type ChannelHandle = Handle;

/// What a `play()` call binds a channel to, mirroring [`PlaySource`] but
/// exposed as the engine's public entry point.
#[derive(Debug, Clone, Copy)]
pub enum PlayTarget {
    Sound(u64),
    Collection(u64),
    SwitchContainer(u64),
}

/// A single step of an [`Event`]: every kind but `Wait` resolves
/// immediately against the event's target entity; `Wait` spans frames.
#[derive(Debug, Clone)]
pub enum EventActionKind {
    Play { target: PlayTarget, bus: usize, fade_in: f64 },
    Stop { fade_out: f64 },
    Pause { fade_out: f64 },
    Resume { fade_in: f64 },
    MuteBus { bus: usize },
    UnmuteBus { bus: usize },
    Wait { seconds: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventRunMode {
    Parallel,
    Sequential,
}

/// An event definition: a set of actions run in parallel (all ticking at
/// once) or in sequence (one completes before the next starts).
pub struct Event {
    pub id: u64,
    pub run_mode: EventRunMode,
    pub actions: Vec<EventActionKind>,
}

struct RunningAction {
    kind: EventActionKind,
    channel: Option<ChannelHandle>,
    elapsed: f64,
    done: bool,
}

/// One in-flight trigger of an [`Event`] against a specific entity.
struct EventInstance {
    run_mode: EventRunMode,
    actions: Vec<RunningAction>,
    running_index: usize,
    entity: Option<u64>,
    canceled: bool,
}

impl EventInstance {
    fn is_running(&self) -> bool {
        !self.canceled && self.actions.iter().any(|a| !a.done)
    }
}

/// Returned from [`Engine::trigger`]. Cancellation is itself a command:
/// posting it here only guarantees the event stops advancing from the next
/// render block onward, never mid-block.
pub struct EventCanceler {
    instance: Handle,
    queue: Arc<SpinMutex<VecDeque<EngineCommand>>>,
}

impl EventCanceler {
    pub fn cancel(&self) {
        self.queue.lock().push_back(EngineCommand::CancelEvent { instance: self.instance });
    }
}

enum EngineCommand {
    Stop { channel: ChannelHandle, fade_out: f64 },
    Pause { channel: ChannelHandle, fade_out: f64 },
    Resume { channel: ChannelHandle, fade_in: f64 },
    SetSwitchState { switch_group: u64, state: u32 },
    SetRtpcValue { id: u64, value: f64 },
    SetMasterGain { gain: f32 },
    SetMute { muted: bool },
    PauseAll { fade_out: f64 },
    ResumeAll { fade_in: f64 },
    SetBusGain { bus: usize, gain: f32 },
    SetBusMute { bus: usize, muted: bool },
    SetChannelObstruction { channel: ChannelHandle, obstruction: f32 },
    SetChannelOcclusion { channel: ChannelHandle, occlusion: f32 },
    TriggerEvent { instance: Handle },
    CancelEvent { instance: Handle },
    NextFrame(Box<dyn FnOnce() + Send>),
}

/// Resolved sound source for one render block: either a standalone asset,
/// a collection item chosen by its scheduler, or the active item(s) of a
/// switch container for the current switch state.
enum ResolvedSource {
    Asset(Arc<SoundAsset>),
    SwitchItems { state: u32, items: Vec<SwitchContainerItem> },
    None,
}

pub struct Engine {
    config: EngineConfig,
    logger: Box<dyn Logger>,
    total_time: f64,

    listeners: Arena<Listener>,
    listeners_by_id: HashMap<u64, Handle>,
    entities: Arena<Entity>,
    entities_by_id: HashMap<u64, Handle>,
    environments: HashMap<u64, Environment>,
    rooms: HashMap<u64, Room>,
    room_reflections: HashMap<u64, RoomReflections>,

    sounds: HashMap<u64, Arc<SoundAsset>>,
    sounds_by_name: HashMap<String, u64>,
    collections: HashMap<u64, Arc<Collection>>,
    switch_containers: HashMap<u64, Arc<SwitchContainer>>,
    collection_schedulers: HashMap<u64, CollectionScheduler>,
    scheduler_rng: SchedulerRng,
    switch_states: HashMap<u64, u32>,
    rtpc_values: HashMap<u64, f64>,

    channels: Arena<Channel>,
    priority_list: PriorityList,
    channel_bus: HashMap<Handle, usize>,

    real_channels: Arena<RealChannel>,
    free_real_channels: Vec<Handle>,
    spatial_channels: HashMap<Handle, SpatialChannel>,
    hrir: Option<amplitude_hrir::HrirSphere>,

    bus_tree: BusTree,
    events: HashMap<u64, Event>,
    event_instances: Arena<EventInstance>,

    command_queue: Arc<SpinMutex<VecDeque<EngineCommand>>>,
}

impl Engine {
    /// Builds an engine from `config`, pre-allocating `max_channels` real
    /// channels and a matching-sized free list; no HRIR sphere is loaded
    /// here (see [`Engine::load_hrir_sphere`]) since that requires a
    /// filesystem handle the config blob alone doesn't carry.
    pub fn initialize(config: EngineConfig) -> Result<Self> {
        if config.output_sample_rate == 0 || config.frames_per_buffer == 0 {
            return Err(AmplitudeError::InvalidParameter(
                "output_sample_rate and frames_per_buffer must be non-zero".into(),
            ));
        }

        let mut real_channels = Arena::with_capacity(config.max_channels);
        let mut free_real_channels = Vec::with_capacity(config.max_channels);
        for i in 0..config.max_channels {
            free_real_channels.push(real_channels.insert(RealChannel::new(i as u64, 16)));
        }

        let priority_list = PriorityList::new(config.max_channels);

        Ok(Self {
            total_time: 0.0,
            listeners: Arena::with_capacity(config.listeners_capacity),
            listeners_by_id: HashMap::new(),
            entities: Arena::with_capacity(config.entities_capacity),
            entities_by_id: HashMap::new(),
            environments: HashMap::new(),
            rooms: HashMap::new(),
            room_reflections: HashMap::new(),
            sounds: HashMap::new(),
            sounds_by_name: HashMap::new(),
            collections: HashMap::new(),
            switch_containers: HashMap::new(),
            collection_schedulers: HashMap::new(),
            scheduler_rng: SchedulerRng::new(0x9E3779B97F4A7C15),
            switch_states: HashMap::new(),
            rtpc_values: HashMap::new(),
            channels: Arena::new(),
            priority_list,
            channel_bus: HashMap::new(),
            real_channels,
            free_real_channels,
            spatial_channels: HashMap::new(),
            hrir: None,
            bus_tree: BusTree::new(),
            events: HashMap::new(),
            event_instances: Arena::new(),
            command_queue: Arc::new(SpinMutex::new(VecDeque::new())),
            logger: Box::new(TracingLogger),
            config,
        })
    }

    pub fn set_logger(&mut self, logger: Box<dyn Logger>) {
        self.logger = logger;
    }

    fn log_error(&self, message: impl Into<String>) {
        self.logger.log(LogLevel::Error, &message.into(), SourceLocation { file: file!(), line: line!() });
    }

    pub fn total_time(&self) -> f64 {
        self.total_time
    }

    /// Reads the HRIR sphere named by `config.hrir_sphere_path` through the
    /// given filesystem and swaps it into place. A no-op returning `Ok`
    /// when no path is configured.
    pub fn load_hrir_sphere(&mut self, fs: &dyn amplitude_filesystem::Filesystem) -> Result<()> {
        let Some(path) = self.config.hrir_sphere_path.clone() else { return Ok(()) };
        let mut file = fs.open_file(std::path::Path::new(&path), amplitude_filesystem::FileOpenMode::Read);
        if !file.is_valid() {
            return Err(AmplitudeError::NotFound(path));
        }
        let length = file.length()? as usize;
        let mut data = vec![0u8; length];
        let mut read = 0;
        while read < length {
            let n = file.read(&mut data[read..])?;
            if n == 0 {
                break;
            }
            read += n;
        }
        data.truncate(read);
        let sphere = amplitude_hrir::HrirSphere::parse(&data)?;
        self.hrir = Some(sphere);
        Ok(())
    }

    // -- Listeners / entities / environments / rooms, keyed by caller id --

    pub fn add_listener(&mut self, id: u64) -> Handle {
        let handle = self.listeners.insert(Listener { id, state: Positioned::default() });
        self.listeners_by_id.insert(id, handle);
        handle
    }

    pub fn remove_listener(&mut self, id: u64) {
        if let Some(handle) = self.listeners_by_id.remove(&id) {
            self.listeners.remove(handle);
        }
    }

    pub fn set_listener_position(&mut self, id: u64, position: Vec3, dt: f32) -> Result<()> {
        let handle = *self.listeners_by_id.get(&id).ok_or_else(|| AmplitudeError::NotFound(format!("listener {id}")))?;
        self.listeners.get_mut(handle).unwrap().state.set_position(position, dt);
        Ok(())
    }

    pub fn set_listener_orientation(&mut self, id: u64, orientation: Orientation) -> Result<()> {
        let handle = *self.listeners_by_id.get(&id).ok_or_else(|| AmplitudeError::NotFound(format!("listener {id}")))?;
        self.listeners.get_mut(handle).unwrap().state.orientation = orientation;
        Ok(())
    }

    pub fn add_entity(&mut self, id: u64) -> Handle {
        let handle = self.entities.insert(Entity { id, state: Positioned::default() });
        self.entities_by_id.insert(id, handle);
        handle
    }

    pub fn remove_entity(&mut self, id: u64) {
        if let Some(handle) = self.entities_by_id.remove(&id) {
            self.entities.remove(handle);
        }
    }

    pub fn set_entity_position(&mut self, id: u64, position: Vec3, dt: f32) -> Result<()> {
        let handle = *self.entities_by_id.get(&id).ok_or_else(|| AmplitudeError::NotFound(format!("entity {id}")))?;
        self.entities.get_mut(handle).unwrap().state.set_position(position, dt);
        Ok(())
    }

    pub fn add_environment(&mut self, id: u64, factor: f32) {
        self.environments.insert(id, Environment { id, factor });
    }

    /// Adds a child bus under `parent` (use [`BusTree::MASTER`] for a
    /// top-level bus), returning its index for use with `play`/`set_bus_*`.
    pub fn add_bus(&mut self, parent: usize, id: u64, name: impl Into<String>) -> usize {
        self.bus_tree.add_child(parent, id, name)
    }

    pub fn add_room(&mut self, room: Room) {
        let sample_rate = self.config.output_sample_rate;
        let mut reflections = RoomReflections::new(sample_rate);
        reflections.configure(room.mean_absorption(), room.cutoff_frequency);
        self.room_reflections.insert(room.id, reflections);
        self.rooms.insert(room.id, room);
    }

    // -- Asset registration --

    pub fn register_sound(&mut self, asset: Arc<SoundAsset>) {
        self.sounds_by_name.insert(asset.name.clone(), asset.id);
        self.sounds.insert(asset.id, asset);
    }

    pub fn register_collection(&mut self, collection: Arc<Collection>) {
        self.collection_schedulers.insert(collection.id, CollectionScheduler::new(collection.id));
        self.collections.insert(collection.id, collection);
    }

    pub fn register_switch_container(&mut self, container: Arc<SwitchContainer>) {
        self.switch_containers.insert(container.id, container);
    }

    pub fn sound_id_by_name(&self, name: &str) -> Option<u64> {
        self.sounds_by_name.get(name).copied()
    }

    pub fn register_event(&mut self, event: Event) {
        self.events.insert(event.id, event);
    }

    // -- Playback --

    /// Allocates a channel and starts it playing `target`, immediately
    /// returning a valid handle; the sound instance backing it is created
    /// lazily the first time the channel reaches the real window, so its
    /// audible effect still only begins on the next render block.
    pub fn play(&mut self, target: PlayTarget, entity: Option<u64>, bus: usize, fade_in: f64) -> Result<ChannelHandle> {
        let source = match target {
            PlayTarget::Sound(id) => {
                if !self.sounds.contains_key(&id) {
                    return Err(AmplitudeError::NotFound(format!("sound {id}")));
                }
                PlaySource::Sound(id)
            }
            PlayTarget::Collection(id) => {
                if !self.collections.contains_key(&id) {
                    return Err(AmplitudeError::NotFound(format!("collection {id}")));
                }
                PlaySource::Collection(id)
            }
            PlayTarget::SwitchContainer(id) => {
                if !self.switch_containers.contains_key(&id) {
                    return Err(AmplitudeError::NotFound(format!("switch container {id}")));
                }
                PlaySource::SwitchContainer(id)
            }
        };

        let mut channel = Channel::new();
        channel.play(source, fade_in, self.total_time);
        channel.entity = entity.and_then(|id| self.entities_by_id.get(&id).copied());
        let handle = self.channels.insert(channel);
        self.priority_list.insert(&self.channels, handle);
        self.channel_bus.insert(handle, bus);
        Ok(handle)
    }

    pub fn stop(&mut self, channel: ChannelHandle, fade_out: f64) {
        self.command_queue.lock().push_back(EngineCommand::Stop { channel, fade_out });
    }

    pub fn pause(&mut self, channel: ChannelHandle, fade_out: f64) {
        self.command_queue.lock().push_back(EngineCommand::Pause { channel, fade_out });
    }

    pub fn resume(&mut self, channel: ChannelHandle, fade_in: f64) {
        self.command_queue.lock().push_back(EngineCommand::Resume { channel, fade_in });
    }

    pub fn pause_all(&mut self, fade_out: f64) {
        self.command_queue.lock().push_back(EngineCommand::PauseAll { fade_out });
    }

    pub fn resume_all(&mut self, fade_in: f64) {
        self.command_queue.lock().push_back(EngineCommand::ResumeAll { fade_in });
    }

    pub fn set_switch_state(&mut self, switch_group: u64, state: u32) {
        self.command_queue.lock().push_back(EngineCommand::SetSwitchState { switch_group, state });
    }

    pub fn set_rtpc_value(&mut self, id: u64, value: f64) {
        self.command_queue.lock().push_back(EngineCommand::SetRtpcValue { id, value });
    }

    pub fn set_master_gain(&mut self, gain: f32) {
        self.command_queue.lock().push_back(EngineCommand::SetMasterGain { gain });
    }

    pub fn set_mute(&mut self, muted: bool) {
        self.command_queue.lock().push_back(EngineCommand::SetMute { muted });
    }

    pub fn set_bus_gain(&mut self, bus: usize, gain: f32) {
        self.command_queue.lock().push_back(EngineCommand::SetBusGain { bus, gain });
    }

    pub fn set_bus_mute(&mut self, bus: usize, muted: bool) {
        self.command_queue.lock().push_back(EngineCommand::SetBusMute { bus, muted });
    }

    /// Sets how much a raycast-traced obstruction should low-pass and
    /// attenuate a channel, normalized `[0, 1]`. Applied to the bound
    /// sound instance, so it takes effect once the channel is real.
    pub fn set_channel_obstruction(&mut self, channel: ChannelHandle, obstruction: f32) {
        self.command_queue.lock().push_back(EngineCommand::SetChannelObstruction { channel, obstruction });
    }

    pub fn set_channel_occlusion(&mut self, channel: ChannelHandle, occlusion: f32) {
        self.command_queue.lock().push_back(EngineCommand::SetChannelOcclusion { channel, occlusion });
    }

    /// Queues `f` to run at the very start of the next render block, ahead
    /// of everything else drained that block.
    pub fn next_frame_callback(&mut self, f: impl FnOnce() + Send + 'static) {
        self.command_queue.lock().push_back(EngineCommand::NextFrame(Box::new(f)));
    }

    pub fn trigger(&mut self, event_id: u64, entity: Option<u64>) -> Result<EventCanceler> {
        let event = self.events.get(&event_id).ok_or_else(|| AmplitudeError::NotFound(format!("event {event_id}")))?;
        let actions = event
            .actions
            .iter()
            .map(|kind| RunningAction { kind: kind.clone(), channel: None, elapsed: 0.0, done: false })
            .collect();
        let instance = self.event_instances.insert(EventInstance {
            run_mode: event.run_mode,
            actions,
            running_index: 0,
            entity,
            canceled: false,
        });
        self.command_queue.lock().push_back(EngineCommand::TriggerEvent { instance });
        Ok(EventCanceler { instance, queue: self.command_queue.clone() })
    }

    // -- Render --

    /// Runs one block: drains commands, advances fade/channel state,
    /// reassigns each channel to its closest listener, re-evaluates the
    /// priority list and devirtualizes as needed, pulls decoded audio
    /// through every real channel's spatialization chain, and writes
    /// interleaved stereo samples into `output` (`frame_count * 2` long).
    pub fn render(&mut self, output: &mut [f32], frame_count: usize) {
        debug_assert!(output.len() >= frame_count * 2);

        self.drain_commands();

        let dt = frame_count as f64 / self.config.output_sample_rate as f64;
        self.total_time += dt;
        for (_, channel) in self.channels.iter_mut() {
            channel.advance(self.total_time);
        }
        self.advance_events(dt);

        self.assign_best_listeners();
        self.update_real_channel_bindings();

        let mut master_left = vec![0.0f32; frame_count];
        let mut master_right = vec![0.0f32; frame_count];
        let mut bus_mix: HashMap<usize, (Vec<f32>, Vec<f32>)> = HashMap::new();
        let mut reflections_left = vec![0.0f32; frame_count];
        let mut reflections_right = vec![0.0f32; frame_count];

        let real_window: Vec<Handle> = self.priority_list.real_window().to_vec();
        for channel_handle in real_window {
            self.render_channel(
                channel_handle,
                frame_count,
                &mut bus_mix,
                &mut reflections_left,
                &mut reflections_right,
            );
        }

        for (bus_index, (left, right)) in bus_mix {
            let gain = self.bus_tree.effective_gain(bus_index);
            for i in 0..frame_count {
                master_left[i] += left[i] * gain;
                master_right[i] += right[i] * gain;
            }
        }
        let master_gain = self.bus_tree.effective_gain(BusTree::MASTER);
        for i in 0..frame_count {
            master_left[i] += reflections_left[i] * master_gain;
            master_right[i] += reflections_right[i] * master_gain;
        }

        self.retire_stopped_channels();

        for i in 0..frame_count {
            output[i * 2] = master_left[i];
            output[i * 2 + 1] = master_right[i];
        }
    }

    fn drain_commands(&mut self) {
        let pending: Vec<EngineCommand> = {
            let mut queue = self.command_queue.lock();
            std::mem::take(&mut *queue).into_iter().collect()
        };
        for command in pending {
            self.apply_command(command);
        }
    }

    fn apply_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::Stop { channel, fade_out } => {
                if let Some(c) = self.channels.get_mut(channel) {
                    c.stop(fade_out, self.total_time);
                }
            }
            EngineCommand::Pause { channel, fade_out } => {
                if let Some(c) = self.channels.get_mut(channel) {
                    c.pause(fade_out, self.total_time);
                }
            }
            EngineCommand::Resume { channel, fade_in } => {
                if let Some(c) = self.channels.get_mut(channel) {
                    c.resume(fade_in, self.total_time);
                }
            }
            EngineCommand::PauseAll { fade_out } => {
                let now = self.total_time;
                for (_, c) in self.channels.iter_mut() {
                    if c.state == ChannelState::Playing {
                        c.pause(fade_out, now);
                    }
                }
            }
            EngineCommand::ResumeAll { fade_in } => {
                let now = self.total_time;
                for (_, c) in self.channels.iter_mut() {
                    if c.state == ChannelState::Paused {
                        c.resume(fade_in, now);
                    }
                }
            }
            EngineCommand::SetSwitchState { switch_group, state } => {
                self.switch_states.insert(switch_group, state);
                self.apply_switch_transition(switch_group, state);
            }
            EngineCommand::SetRtpcValue { id, value } => {
                self.rtpc_values.insert(id, value);
            }
            EngineCommand::SetMasterGain { gain } => self.bus_tree.set_master_gain(gain),
            EngineCommand::SetMute { muted } => self.bus_tree.set_global_mute(muted),
            EngineCommand::SetBusGain { bus, gain } => self.bus_tree.bus(bus).set_gain(gain),
            EngineCommand::SetBusMute { bus, muted } => self.bus_tree.bus(bus).set_muted(muted),
            EngineCommand::SetChannelObstruction { channel, obstruction } => {
                if let Some(real) = self.channels.get(channel).and_then(|c| c.real_channel) {
                    if let Some(real_channel) = self.real_channels.get_mut(real) {
                        real_channel.set_obstruction(obstruction);
                    }
                }
            }
            EngineCommand::SetChannelOcclusion { channel, occlusion } => {
                if let Some(real) = self.channels.get(channel).and_then(|c| c.real_channel) {
                    if let Some(real_channel) = self.real_channels.get_mut(real) {
                        real_channel.set_occlusion(occlusion);
                    }
                }
            }
            EngineCommand::TriggerEvent { instance } => self.start_event_instance(instance),
            EngineCommand::CancelEvent { instance } => {
                if let Some(inst) = self.event_instances.get_mut(instance) {
                    inst.canceled = true;
                }
            }
            EngineCommand::NextFrame(f) => f(),
        }
    }

    fn start_event_instance(&mut self, instance: Handle) {
        let entity = self.event_instances.get(instance).and_then(|i| i.entity);
        let first_is_sequential = self
            .event_instances
            .get(instance)
            .map(|i| i.run_mode == EventRunMode::Sequential)
            .unwrap_or(false);

        let action_count = self.event_instances.get(instance).map(|i| i.actions.len()).unwrap_or(0);
        let run_now: Vec<usize> = if first_is_sequential {
            if action_count > 0 { vec![0] } else { Vec::new() }
        } else {
            (0..action_count).collect()
        };
        for index in run_now {
            self.run_event_action(instance, index, entity);
        }
    }

    fn run_event_action(&mut self, instance: Handle, index: usize, entity: Option<u64>) {
        let Some(kind) = self.event_instances.get(instance).and_then(|i| i.actions.get(index)).map(|a| a.kind.clone())
        else {
            return;
        };
        let channel = match &kind {
            EventActionKind::Play { target, bus, fade_in } => self.play(*target, entity, *bus, *fade_in).ok(),
            EventActionKind::Stop { fade_out } => {
                let ch = self.event_instances.get(instance).and_then(|i| i.actions.get(index)).and_then(|a| a.channel);
                if let Some(ch) = ch {
                    self.stop(ch, *fade_out);
                }
                ch
            }
            EventActionKind::Pause { fade_out } => {
                let ch = self.event_instances.get(instance).and_then(|i| i.actions.get(index)).and_then(|a| a.channel);
                if let Some(ch) = ch {
                    self.pause(ch, *fade_out);
                }
                ch
            }
            EventActionKind::Resume { fade_in } => {
                let ch = self.event_instances.get(instance).and_then(|i| i.actions.get(index)).and_then(|a| a.channel);
                if let Some(ch) = ch {
                    self.resume(ch, *fade_in);
                }
                ch
            }
            EventActionKind::MuteBus { bus } => {
                self.bus_tree.bus(*bus).set_muted(true);
                None
            }
            EventActionKind::UnmuteBus { bus } => {
                self.bus_tree.bus(*bus).set_muted(false);
                None
            }
            EventActionKind::Wait { .. } => None,
        };
        let done = !matches!(kind, EventActionKind::Wait { .. });
        if let Some(inst) = self.event_instances.get_mut(instance) {
            if let Some(action) = inst.actions.get_mut(index) {
                action.channel = channel;
                action.done = done;
            }
        }
    }

    /// Advances every live event instance by `dt`: `Wait` actions accrue
    /// elapsed time and complete at their deadline; sequential instances
    /// start their next action once the running one finishes.
    fn advance_events(&mut self, dt: f64) {
        let handles: Vec<Handle> = self.event_instances.iter().map(|(h, _)| h).collect();
        for handle in handles {
            let (run_mode, entity, running_index, action_count) = {
                let Some(inst) = self.event_instances.get(handle) else { continue };
                (inst.run_mode, inst.entity, inst.running_index, inst.actions.len())
            };
            if run_mode == EventRunMode::Sequential {
                let finished = {
                    let inst = self.event_instances.get_mut(handle).unwrap();
                    if let Some(action) = inst.actions.get_mut(running_index) {
                        if let EventActionKind::Wait { seconds } = action.kind {
                            action.elapsed += dt;
                            if action.elapsed >= seconds {
                                action.done = true;
                            }
                        }
                        action.done
                    } else {
                        true
                    }
                };
                if finished && running_index + 1 < action_count {
                    let next = running_index + 1;
                    if let Some(inst) = self.event_instances.get_mut(handle) {
                        inst.running_index = next;
                    }
                    self.run_event_action(handle, next, entity);
                }
            } else {
                for index in 0..action_count {
                    let should_tick = self
                        .event_instances
                        .get(handle)
                        .and_then(|i| i.actions.get(index))
                        .map(|a| !a.done)
                        .unwrap_or(false);
                    if !should_tick {
                        continue;
                    }
                    if let Some(inst) = self.event_instances.get_mut(handle) {
                        if let Some(action) = inst.actions.get_mut(index) {
                            if let EventActionKind::Wait { seconds } = action.kind {
                                action.elapsed += dt;
                                if action.elapsed >= seconds {
                                    action.done = true;
                                }
                            }
                        }
                    }
                }
            }
            if !self.event_instances.get(handle).map(|i| i.is_running()).unwrap_or(false) {
                self.event_instances.remove(handle);
            }
        }
    }

    /// Assigns each entity-bound channel to the listener with the smallest
    /// squared distance, ties broken by the lower listener id.
    fn assign_best_listeners(&mut self) {
        let listeners: Vec<(u64, Handle, Vec3)> = self
            .listeners
            .iter()
            .map(|(h, l)| (l.id, h, l.state.position))
            .collect();
        if listeners.is_empty() {
            return;
        }
        let entity_positions: HashMap<Handle, Vec3> = self.entities.iter().map(|(h, e)| (h, e.state.position)).collect();

        for (_, channel) in self.channels.iter_mut() {
            let Some(entity_handle) = channel.entity else { continue };
            let Some(&position) = entity_positions.get(&entity_handle) else { continue };
            let mut best: Option<(u64, Handle, f32)> = None;
            for &(id, handle, listener_pos) in &listeners {
                let dist_sq = (listener_pos - position).length_squared();
                let better = match best {
                    None => true,
                    Some((best_id, _, best_dist)) => dist_sq < best_dist || (dist_sq == best_dist && id < best_id),
                };
                if better {
                    best = Some((id, handle, dist_sq));
                }
            }
            channel.listener = best.map(|(_, handle, _)| handle);
        }
    }

    fn update_real_channel_bindings(&mut self) {
        self.priority_list.resort(&self.channels);
        self.priority_list.devirtualize(&mut self.channels);

        let real_window: Vec<Handle> = self.priority_list.real_window().to_vec();
        let virtual_tail: Vec<Handle> = self.priority_list.virtual_tail().to_vec();

        for &handle in &virtual_tail {
            if let Some(channel) = self.channels.get_mut(handle) {
                if let Some(real) = channel.real_channel.take() {
                    self.free_real_channels.push(real);
                }
            }
        }
        for &handle in &real_window {
            let needs_binding = self.channels.get(handle).map(|c| !c.is_real()).unwrap_or(false);
            if needs_binding {
                if let Some(real) = self.free_real_channels.pop() {
                    if let Some(channel) = self.channels.get_mut(handle) {
                        channel.real_channel = Some(real);
                    }
                }
            }
        }
    }

    fn resolve_source(&mut self, source: PlaySource) -> ResolvedSource {
        match source {
            PlaySource::Sound(id) => self.sounds.get(&id).cloned().map(ResolvedSource::Asset).unwrap_or(ResolvedSource::None),
            PlaySource::Collection(id) => {
                let Some(collection) = self.collections.get(&id).cloned() else { return ResolvedSource::None };
                let scheduler = self.collection_schedulers.entry(id).or_insert_with(|| CollectionScheduler::new(id));
                let index = scheduler.pick(&mut self.scheduler_rng, &collection, None);
                collection.items.get(index).cloned().map(ResolvedSource::Asset).unwrap_or(ResolvedSource::None)
            }
            PlaySource::SwitchContainer(id) => {
                let Some(container) = self.switch_containers.get(&id).cloned() else { return ResolvedSource::None };
                let state = self.switch_states.get(&container.switch_group).copied().unwrap_or(0);
                let items: Vec<SwitchContainerItem> = container.active_items(state).into_iter().cloned().collect();
                if items.is_empty() {
                    ResolvedSource::None
                } else {
                    ResolvedSource::SwitchItems { state, items }
                }
            }
        }
    }

    /// Diffs the active item set of every channel bound to `switch_group`
    /// against `new_state`, fading out items that left the set and fading
    /// in (on a fresh layer) items that entered it. Channels not yet real
    /// just record the new state for their eventual initial bind.
    fn apply_switch_transition(&mut self, switch_group: u64, new_state: u32) {
        let now = self.total_time;
        let handles: Vec<Handle> = self
            .channels
            .iter()
            .filter_map(|(h, c)| match c.source {
                Some(PlaySource::SwitchContainer(id)) => self
                    .switch_containers
                    .get(&id)
                    .filter(|container| container.switch_group == switch_group)
                    .map(|_| h),
                _ => None,
            })
            .collect();

        for handle in handles {
            let Some(container_id) = self.channels.get(handle).and_then(|c| match c.source {
                Some(PlaySource::SwitchContainer(id)) => Some(id),
                _ => None,
            }) else {
                continue;
            };
            let Some(container) = self.switch_containers.get(&container_id).cloned() else { continue };
            let previous_state = self.channels.get(handle).and_then(|c| c.switch_state);
            let real_handle = self.channels.get(handle).and_then(|c| c.real_channel);

            if previous_state.is_none() || real_handle.is_none() {
                // Never bound yet, or not real: the initial bind in
                // `render_channel` resolves every item active for
                // `new_state` from scratch, so there's nothing to cross yet.
                if let Some(channel) = self.channels.get_mut(handle) {
                    channel.switch_state = Some(new_state);
                }
                continue;
            }
            let real_handle = real_handle.unwrap();

            let transition = compute_switch_transition(&container.items, previous_state, new_state);
            let fade_out: Vec<(u64, f32)> = transition.fade_out.iter().map(|item| (item.asset.id, item.fade_out)).collect();
            let fade_in: Vec<(Arc<SoundAsset>, f32)> = transition.fade_in.iter().map(|item| (item.asset.clone(), item.fade_in)).collect();

            for (asset_id, fade_seconds) in fade_out {
                if let Some(channel) = self.channels.get_mut(handle) {
                    channel.begin_switch_fade_out(asset_id, fade_seconds as f64, now);
                }
            }
            for (asset, fade_seconds) in fade_in {
                let looping = asset.looping;
                let asset_id = asset.id;
                let instance = SoundInstance::acquire(asset, 0);
                let Some(real) = self.real_channels.get_mut(real_handle) else { continue };
                let layer_id = real.create_layer(0, instance, looping, false);
                if let Some(channel) = self.channels.get_mut(handle) {
                    channel.begin_switch_fade_in(asset_id, layer_id, fade_seconds as f64, now);
                }
            }
            if let Some(channel) = self.channels.get_mut(handle) {
                channel.switch_state = Some(new_state);
            }
        }
    }

    /// Pulls one block of samples for a single real channel and
    /// accumulates its spatialized output into the matching bus mix
    /// buffer (and the reflections buffer, if the channel is in a room).
    fn render_channel(
        &mut self,
        channel_handle: Handle,
        frame_count: usize,
        bus_mix: &mut HashMap<usize, (Vec<f32>, Vec<f32>)>,
        reflections_left: &mut [f32],
        reflections_right: &mut [f32],
    ) {
        let Some(real_handle) = self.channels.get(channel_handle).and_then(|c| c.real_channel) else { return };

        let source = self.channels.get(channel_handle).and_then(|c| c.source);
        let is_switch_container = matches!(source, Some(PlaySource::SwitchContainer(_)));

        if is_switch_container {
            let needs_initial_bind = self.channels.get(channel_handle).map(|c| c.switch_state.is_none()).unwrap_or(false);
            if needs_initial_bind {
                if let Some(source) = source {
                    if let ResolvedSource::SwitchItems { state, items } = self.resolve_source(source) {
                        for item in &items {
                            let instance = SoundInstance::acquire(item.asset.clone(), frame_count as u64);
                            let layer_id = match self.real_channels.get_mut(real_handle) {
                                Some(real) => real.create_layer(0, instance, item.asset.looping, false),
                                None => continue,
                            };
                            if let Some(channel) = self.channels.get_mut(channel_handle) {
                                channel.bind_switch_layer_settled(item.asset.id, layer_id);
                            }
                        }
                        if let Some(channel) = self.channels.get_mut(channel_handle) {
                            channel.switch_state = Some(state);
                        }
                    }
                }
            }
        } else if self.channels.get(channel_handle).map(|c| c.bound_layer.is_none()).unwrap_or(false) {
            if let Some(source) = source {
                if let ResolvedSource::Asset(asset) = self.resolve_source(source) {
                    let looping = asset.looping;
                    let instance = SoundInstance::acquire(asset, frame_count as u64);
                    if let Some(real) = self.real_channels.get_mut(real_handle) {
                        let layer_id = real.create_layer(0, instance, looping, false);
                        if let Some(channel) = self.channels.get_mut(channel_handle) {
                            channel.bound_layer = Some(layer_id);
                        }
                    }
                }
            }
        }

        let output_rate = self.config.output_sample_rate;
        let pending_pitch = self.channels.get(channel_handle).map(|c| c.pending_pitch).unwrap_or(1.0);
        let now = self.total_time;

        let mut mono = vec![0.0f32; frame_count];
        let mut stream_ended = false;
        let mut looping = true;
        let mut obstruction = 0.0f32;
        let mut occlusion = 0.0f32;

        if is_switch_container {
            let finished = self
                .channels
                .get_mut(channel_handle)
                .map(|c| c.advance_switch_layers(now))
                .unwrap_or_default();
            if let Some(real) = self.real_channels.get_mut(real_handle) {
                for layer_id in finished {
                    real.destroy_layer(layer_id);
                }
                real.drain_commands();
            }

            let layer_snapshots: Vec<(LayerId, f32, u64)> = self
                .channels
                .get(channel_handle)
                .map(|c| c.switch_layers.iter().map(|l| (l.layer_id, l.gain, l.asset_id)).collect())
                .unwrap_or_default();

            let mut ended_assets = Vec::new();
            if let Some(real) = self.real_channels.get_mut(real_handle) {
                let mut scratch = vec![0.0f32; frame_count];
                for (layer_id, gain, asset_id) in layer_snapshots {
                    let Some(layer) = real.layer_mut(layer_id) else { continue };
                    let (written, ended) = layer.read_resampled_mono(output_rate, pending_pitch, &mut scratch);
                    for i in 0..written {
                        mono[i] += scratch[i] * gain;
                    }
                    let instance = layer.instance.lock();
                    obstruction = instance.obstruction;
                    occlusion = instance.occlusion;
                    drop(instance);
                    if ended {
                        ended_assets.push(asset_id);
                    }
                }
            }
            for asset_id in ended_assets {
                if let Some(channel) = self.channels.get_mut(channel_handle) {
                    channel.begin_switch_fade_out(asset_id, 0.0, now);
                }
            }
            stream_ended = self.channels.get(channel_handle).map(|c| c.switch_layers.is_empty()).unwrap_or(true);
        } else if let Some(real) = self.real_channels.get_mut(real_handle) {
            real.drain_commands();
            if let Some(bound) = self.channels.get(channel_handle).and_then(|c| c.bound_layer) {
                if let Some(layer) = real.layer_mut(bound) {
                    looping = matches!(layer.play_state, LayerPlayState::Loop);
                    let (written, ended) = layer.read_resampled_mono(output_rate, pending_pitch, &mut mono);
                    let instance = layer.instance.lock();
                    obstruction = instance.obstruction;
                    occlusion = instance.occlusion;
                    drop(instance);
                    let _ = written;
                    if ended {
                        stream_ended = true;
                    }
                }
            }
        }

        if stream_ended {
            if let Some(channel) = self.channels.get_mut(channel_handle) {
                channel.on_stream_end(if is_switch_container { false } else { looping });
            }
        }

        let fade_scale = self
            .channels
            .get_mut(channel_handle)
            .map(|c| match c.state {
                ChannelState::FadingIn | ChannelState::FadingOut => c.fader.get_from_time(now) as f32,
                _ => 1.0,
            })
            .unwrap_or(0.0);

        let Some(channel) = self.channels.get(channel_handle) else { return };
        let gain = channel.gain * fade_scale;
        let spatialization = channel.spatialization;
        let max_distance = channel.max_distance;
        let attenuation_curve = channel.attenuation_curve.clone();
        let obstruction_cfg = self.config.obstruction_config.clone();
        let occlusion_cfg = self.config.occlusion_config.clone();
        let sound_speed = self.config.sound_speed;
        let doppler_factor = self.config.doppler_factor;
        let room = channel.room;
        let bus_index = self.channel_bus.get(&channel_handle).copied().unwrap_or(BusTree::MASTER);

        let entity_state = channel.entity.and_then(|h| self.entities.get(h)).map(|e| e.state);
        let listener_state = channel.listener.and_then(|h| self.listeners.get(h)).map(|l| l.state);

        let source_position = entity_state.map(|s| s.position).unwrap_or(Vec3::ZERO);
        let source_velocity = entity_state.map(|s| s.velocity).unwrap_or(Vec3::ZERO);
        let (listener_position, listener_velocity, listener_orientation) = match listener_state {
            Some(state) => (state.position, state.velocity, state.orientation),
            None => (Vec3::ZERO, Vec3::ZERO, Orientation::default()),
        };
        let effective_spatialization = if entity_state.is_none() || listener_state.is_none() {
            Spatialization::None
        } else {
            spatialization
        };

        let sample_rate = self.config.output_sample_rate;
        let panning_mode = self.config.panning_mode;
        let hrir = self.hrir.as_ref();
        let spatial_channel = self
            .spatial_channels
            .entry(real_handle)
            .or_insert_with(|| SpatialChannel::new(sample_rate, frame_count, panning_mode, hrir));

        let (bus_left, bus_right) = bus_mix.entry(bus_index).or_insert_with(|| (vec![0.0; frame_count], vec![0.0; frame_count]));

        let input = SpatialBlockInput {
            source_position,
            source_velocity,
            listener_position,
            listener_velocity,
            listener_orientation,
            listener_rotation_euler: (0.0, 0.0, 0.0),
            attenuation_curve: &attenuation_curve,
            max_distance,
            obstruction,
            occlusion,
            obstruction_config: &obstruction_cfg,
            occlusion_config: &occlusion_cfg,
            gain,
            spatialization: effective_spatialization,
            sound_speed,
            doppler_factor,
            hrir,
        };
        let pitch_factor = run_spatialize(spatial_channel, &mut mono, &input, bus_left, bus_right);
        if let Some(channel) = self.channels.get_mut(channel_handle) {
            channel.pending_pitch = pitch_factor;
        }

        if let Some(room_id) = room {
            if let Some(reflections) = self.room_reflections.get_mut(&room_id) {
                let send = self.rooms.get(&room_id).map(|r| r.reflections_gain).unwrap_or(0.0);
                reflections.process_block(&mono, send, reflections_left, reflections_right);
            }
        }
    }

    /// Frees real-channel bindings and priority-list entries for channels
    /// that fully stopped this block, so the next block's priority pass
    /// sees an accurate live set.
    fn retire_stopped_channels(&mut self) {
        let stopped: Vec<Handle> = self
            .channels
            .iter()
            .filter(|(_, c)| c.state == ChannelState::Stopped)
            .map(|(h, _)| h)
            .collect();
        for handle in stopped {
            self.priority_list.remove(handle);
            self.spatial_channels.remove(&handle);
            self.channel_bus.remove(&handle);
            self.channels.remove(handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.output_sample_rate = 48_000;
        config.frames_per_buffer = 256;
        config.max_channels = 4;
        config
    }

    /// A short non-streaming asset backed by a silent chunk; enough to
    /// exercise real-channel binding and the render path without needing a
    /// decoder.
    fn test_asset(id: u64, frames: usize, sample_rate: u32) -> Arc<SoundAsset> {
        Arc::new(SoundAsset::new(
            id,
            format!("asset-{id}"),
            crate::sound_object::FormatDescriptor {
                sample_rate,
                channel_count: 1,
                bits_per_sample: 32,
                frame_count: frames as u64,
                sample_type: crate::sound_object::SampleType::F32,
            },
        ))
    }

    #[test]
    fn silent_engine_produces_silent_output() {
        let mut engine = Engine::initialize(test_config()).unwrap();
        let mut out = vec![1.0f32; 256 * 2];
        engine.render(&mut out, 256);
        assert!(out.iter().all(|&s| s == 0.0));
        assert!((engine.total_time() - 256.0 / 48_000.0).abs() < 1e-9);
    }

    #[test]
    fn playing_a_sound_produces_a_valid_channel_handle() {
        let mut engine = Engine::initialize(test_config()).unwrap();
        let asset = test_asset(1, 4096, 48_000);
        engine.register_sound(asset);
        let handle = engine.play(PlayTarget::Sound(1), None, BusTree::MASTER, 0.0).unwrap();
        assert!(handle.is_valid());
    }

    #[test]
    fn virtualization_keeps_only_the_highest_priority_channels_real() {
        let mut engine = Engine::initialize(test_config()).unwrap();
        engine.config.max_channels = 2;
        engine.priority_list = PriorityList::new(2);
        let asset = test_asset(1, 4096, 48_000);
        engine.register_sound(asset);

        let high = engine.play(PlayTarget::Sound(1), None, BusTree::MASTER, 0.0).unwrap();
        let mid = engine.play(PlayTarget::Sound(1), None, BusTree::MASTER, 0.0).unwrap();
        let low = engine.play(PlayTarget::Sound(1), None, BusTree::MASTER, 0.0).unwrap();
        engine.channels.get_mut(high).unwrap().gain = 0.9;
        engine.channels.get_mut(mid).unwrap().gain = 0.5;
        engine.channels.get_mut(low).unwrap().gain = 0.1;

        let mut out = vec![0.0f32; 256 * 2];
        engine.render(&mut out, 256);

        assert!(engine.channels.get(high).unwrap().is_real());
        assert!(engine.channels.get(mid).unwrap().is_real());
        assert!(!engine.channels.get(low).unwrap().is_real());
    }

    #[test]
    fn stopping_a_channel_releases_its_real_binding_next_block() {
        let mut engine = Engine::initialize(test_config()).unwrap();
        let asset = test_asset(1, 4096, 48_000);
        engine.register_sound(asset);
        let handle = engine.play(PlayTarget::Sound(1), None, BusTree::MASTER, 0.0).unwrap();

        let mut out = vec![0.0f32; 256 * 2];
        engine.render(&mut out, 256);
        engine.stop(handle, 0.0);
        engine.render(&mut out, 256);
        assert!(engine.channels.get(handle).is_none(), "stopped channel is retired");
    }
}
