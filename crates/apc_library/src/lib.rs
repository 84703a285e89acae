//! Control core for the Akai APC mini mk2 8x8 RGB pad grid.
//!
//! Inbound MIDI is decoded into grid events, run through the per-button
//! state machine, rendered by the animation engine on a fixed tick and
//! flushed back to the device by the frame dispatcher.

pub mod animation;
pub mod button;
pub mod codec;
pub mod controller;
pub mod controls;
pub mod dispatch;
pub mod error;
pub mod lights;
pub mod profile;
pub mod runtime;
pub mod store;
pub mod tempo;
pub mod transport;

pub use controller::Controller;
pub use error::{
    AnimationParamError, CodecError, ConfigError, ConfigValidationError, RenderError, TransportError,
};
