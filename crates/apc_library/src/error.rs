use std::error::Error;
use std::fmt;

/// The MIDI link is unavailable. Recoverable: surfaced as a connection
/// state, never fatal to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    PortNotFound(String),
    Open(String),
    Send(String),
    Disconnected,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::PortNotFound(name) => write!(f, "no MIDI port matching {name:?}"),
            TransportError::Open(reason) => write!(f, "couldn't open MIDI port: {reason}"),
            TransportError::Send(reason) => write!(f, "MIDI send failed: {reason}"),
            TransportError::Disconnected => write!(f, "MIDI device disconnected"),
        }
    }
}

impl Error for TransportError {}

/// Inbound bytes we can't turn into an event. Logged and dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    Empty,
    Malformed(String),
    UnmappedNote(u8),
    Unsupported(String),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::Empty => write!(f, "empty MIDI message"),
            CodecError::Malformed(reason) => write!(f, "malformed MIDI message: {reason}"),
            CodecError::UnmappedNote(note) => write!(f, "note {note} isn't mapped to a control"),
            CodecError::Unsupported(what) => write!(f, "unsupported MIDI message: {what}"),
        }
    }
}

impl Error for CodecError {}

/// An animation setting that can never be rendered.
#[derive(Debug, Clone, PartialEq)]
pub enum AnimationParamError {
    UnknownKind(String),
    /// `static`, `pulse` or `blink` named as a free-rate effect.
    ReservedKind(String),
    InvalidSpeed { kind: &'static str, speed: String },
    InvalidRate(f64),
    MissingParameter { kind: String, parameter: &'static str },
}

impl fmt::Display for AnimationParamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnimationParamError::UnknownKind(kind) => write!(f, "unknown animation {kind:?}"),
            AnimationParamError::ReservedKind(kind) => {
                write!(f, "{kind:?} takes a note-fraction speed, not a rate")
            }
            AnimationParamError::InvalidSpeed { kind, speed } => {
                write!(f, "{speed:?} isn't a valid {kind} speed")
            }
            AnimationParamError::InvalidRate(rate) => {
                write!(f, "animation rate {rate} must be in (0, 16] cycles per beat")
            }
            AnimationParamError::MissingParameter { kind, parameter } => {
                write!(f, "animation {kind:?} needs a {parameter}")
            }
        }
    }
}

impl Error for AnimationParamError {}

/// A configuration value outside its allowed range. `path` names the
/// offending field, e.g. `buttons[5].pressed.brightness`.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValidationError {
    Brightness { path: String, percent: i64 },
    Color { path: String, value: String },
    Animation { path: String, source: AnimationParamError },
    Index { path: String, index: i64 },
    DuplicateIndex(u8),
    Count { path: &'static str, expected: usize, found: usize },
    Tempo(f64),
    Scene(String),
    SceneSpeed(f64),
    Version(u32),
    UnknownName { path: String, value: String },
}

impl fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValidationError::Brightness { path, percent } => {
                write!(f, "{path}: brightness {percent}% outside 10..=100")
            }
            ConfigValidationError::Color { path, value } => write!(f, "{path}: bad colour {value:?}"),
            ConfigValidationError::Animation { path, source } => write!(f, "{path}: {source}"),
            ConfigValidationError::Index { path, index } => write!(f, "{path}: index {index} out of range"),
            ConfigValidationError::DuplicateIndex(index) => write!(f, "button {index} configured twice"),
            ConfigValidationError::Count { path, expected, found } => {
                write!(f, "{path}: expected {expected} entries, found {found}")
            }
            ConfigValidationError::Tempo(bpm) => write!(f, "tempo {bpm} BPM outside 20..=300"),
            ConfigValidationError::Scene(name) => write!(f, "unknown scene effect {name:?}"),
            ConfigValidationError::SceneSpeed(speed) => {
                write!(f, "scene speed {speed} outside 0.25..=4")
            }
            ConfigValidationError::Version(version) => write!(f, "unsupported profile version {version}"),
            ConfigValidationError::UnknownName { path, value } => write!(f, "{path}: unknown value {value:?}"),
        }
    }
}

impl Error for ConfigValidationError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ConfigValidationError::Animation { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Parse(serde_json::Error),
    Validation(ConfigValidationError),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Parse(e) => write!(f, "profile isn't valid JSON: {e}"),
            ConfigError::Validation(e) => write!(f, "invalid configuration: {e}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ConfigError::Parse(e) => Some(e),
            ConfigError::Validation(e) => Some(e),
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        ConfigError::Parse(e)
    }
}

impl From<ConfigValidationError> for ConfigError {
    fn from(e: ConfigValidationError) -> Self {
        ConfigError::Validation(e)
    }
}

/// A single cell failed to render this tick.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderError {
    UnregisteredKind(String),
    NonFinite(&'static str),
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderError::UnregisteredKind(kind) => write!(f, "no renderer registered for {kind:?}"),
            RenderError::NonFinite(what) => write!(f, "{what} is not finite"),
        }
    }
}

impl Error for RenderError {}
