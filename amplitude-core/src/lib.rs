//! Mixer, channel scheduler, and engine frontend for the Amplitude audio
//! engine: owns the channel/voice lifecycle, the bus tree, spatialization
//! dispatch, and the game-thread-facing `Engine` API.

pub mod ambisonic_mode;
pub mod arena;
pub mod bus;
pub mod channel;
pub mod config;
pub mod engine;
pub mod entities;
pub mod error;
pub mod fader;
pub mod logger;
pub mod mixer;
pub mod pipeline;
pub mod room;
pub mod scheduler;
pub mod sound_object;
pub mod spatialize;
pub mod thread_primitives;

pub use config::EngineConfig;
pub use engine::{Engine, EventActionKind, EventRunMode, PlayTarget};
pub use error::{AmplitudeError, Result};
