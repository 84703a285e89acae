//! JSON profile format.
//!
//! ```json
//! {
//!   "version": 1,
//!   "globals": { "tempo_bpm": 120.0, "scene": { "effect": "rain", "speed": 1.0, "seed": 7 } },
//!   "buttons": [
//!     { "index": 0, "mode": "toggle", "latched": false,
//!       "pressed":   { "color": "#FF0000", "brightness": 100, "animation": { "kind": "pulse", "speed": "1/4" } },
//!       "unpressed": { "color": "off",     "brightness": 100, "animation": { "kind": "static" } } },
//!     ...
//!   ],
//!   "side": [ { "mode": "flash", "blink": true, "latched": false }, ... ]
//! }
//! ```
//!
//! `buttons` holds all 64 pads in any order; `side` holds the 17 side
//! buttons in track, scene, shift order. A held Flash button is saved as
//! its latched state.

use crate::animation::{AnimationRegistry, AnimationSpec, BlinkSpeed, PulseSpeed, SceneSpec};
use crate::button::{ButtonMode, LogicalState};
use crate::controls::{GridIndex, PAD_COUNT, SIDE_COUNT, SideButton};
use crate::error::{AnimationParamError, ConfigError, ConfigValidationError};
use crate::lights::{Brightness, Rgb};
use crate::store::{Appearance, ButtonSlot, GlobalSettings, GridConfig, SideSlot};
use serde::{Deserialize, Serialize};

pub const VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct ProfileFile {
    version: u32,
    #[serde(default)]
    globals: GlobalsFile,
    buttons: Vec<ButtonFile>,
    #[serde(default)]
    side: Vec<SideFile>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GlobalsFile {
    tempo_bpm: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    scene: Option<SceneFile>,
}

impl Default for GlobalsFile {
    fn default() -> Self {
        Self {
            tempo_bpm: crate::store::DEFAULT_TEMPO,
            scene: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SceneFile {
    effect: String,
    #[serde(default = "unit_speed")]
    speed: f64,
    #[serde(default)]
    seed: u64,
}

fn unit_speed() -> f64 {
    1.0
}

#[derive(Debug, Serialize, Deserialize)]
struct ButtonFile {
    index: i64,
    #[serde(default)]
    mode: ButtonMode,
    #[serde(default)]
    latched: bool,
    pressed: AppearanceFile,
    unpressed: AppearanceFile,
}

#[derive(Debug, Serialize, Deserialize)]
struct AppearanceFile {
    color: String,
    brightness: i64,
    #[serde(default)]
    animation: AnimationFile,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct AnimationFile {
    kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    speed: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    rate: Option<f64>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SideFile {
    #[serde(default)]
    mode: ButtonMode,
    #[serde(default)]
    blink: bool,
    #[serde(default)]
    latched: bool,
}

/// Parses and fully validates a profile. Nothing is returned unless every
/// field is acceptable.
pub fn from_json(bytes: &[u8], registry: &AnimationRegistry) -> Result<GridConfig, ConfigError> {
    let file: ProfileFile = serde_json::from_slice(bytes)?;
    let config = to_config(file, registry)?;
    config.validate(registry)?;
    Ok(config)
}

pub fn to_json(config: &GridConfig) -> Result<Vec<u8>, ConfigError> {
    let file = from_config(config);
    Ok(serde_json::to_vec_pretty(&file)?)
}

fn to_config(file: ProfileFile, registry: &AnimationRegistry) -> Result<GridConfig, ConfigValidationError> {
    if file.version != VERSION {
        return Err(ConfigValidationError::Version(file.version));
    }
    if file.buttons.len() != PAD_COUNT {
        return Err(ConfigValidationError::Count {
            path: "buttons",
            expected: PAD_COUNT,
            found: file.buttons.len(),
        });
    }
    if !file.side.is_empty() && file.side.len() != SIDE_COUNT {
        return Err(ConfigValidationError::Count {
            path: "side",
            expected: SIDE_COUNT,
            found: file.side.len(),
        });
    }

    let mut slots: [Option<ButtonSlot>; PAD_COUNT] = std::array::from_fn(|_| None);
    for (position, button) in file.buttons.into_iter().enumerate() {
        let path = format!("buttons[{position}]");
        let index = u8::try_from(button.index)
            .ok()
            .and_then(GridIndex::new)
            .ok_or_else(|| ConfigValidationError::Index {
                path: format!("{path}.index"),
                index: button.index,
            })?;
        let slot = &mut slots[index.as_usize()];
        if slot.is_some() {
            return Err(ConfigValidationError::DuplicateIndex(index.get()));
        }
        let mut configured = ButtonSlot::new(index);
        configured.mode = button.mode;
        configured.pressed = to_appearance(button.pressed, registry, &format!("{path}.pressed"))?;
        configured.unpressed = to_appearance(button.unpressed, registry, &format!("{path}.unpressed"))?;
        *slot = Some(configured.with_state(LogicalState::from_latched(button.latched)));
    }

    let mut config = GridConfig::default();
    // 64 entries with no duplicates fill every position.
    for (target, slot) in config.buttons.iter_mut().zip(slots) {
        if let Some(slot) = slot {
            *target = slot;
        }
    }
    for (target, side) in config.side.iter_mut().zip(file.side) {
        let mut slot = SideSlot::new(target.button);
        slot.mode = side.mode;
        slot.blink = side.blink;
        *target = slot.with_state(LogicalState::from_latched(side.latched));
    }
    config.globals = GlobalSettings {
        tempo_bpm: file.globals.tempo_bpm,
        scene: file.globals.scene.map(|scene| SceneSpec {
            effect: scene.effect,
            speed: scene.speed,
            seed: scene.seed,
        }),
    };
    Ok(config)
}

fn to_appearance(
    file: AppearanceFile,
    registry: &AnimationRegistry,
    path: &str,
) -> Result<Appearance, ConfigValidationError> {
    let color = file
        .color
        .parse::<Rgb>()
        .map_err(|_| ConfigValidationError::Color {
            path: format!("{path}.color"),
            value: file.color.clone(),
        })?;
    let brightness = u8::try_from(file.brightness)
        .ok()
        .and_then(Brightness::from_percent)
        .ok_or_else(|| ConfigValidationError::Brightness {
            path: format!("{path}.brightness"),
            percent: file.brightness,
        })?;
    let animation = to_animation(file.animation).map_err(|source| ConfigValidationError::Animation {
        path: format!("{path}.animation"),
        source,
    })?;
    animation
        .validate(registry)
        .map_err(|source| ConfigValidationError::Animation {
            path: format!("{path}.animation"),
            source,
        })?;
    Ok(Appearance {
        color,
        brightness,
        animation,
    })
}

fn to_animation(file: AnimationFile) -> Result<AnimationSpec, AnimationParamError> {
    let speed = |kind: &str| {
        file.speed.clone().ok_or(AnimationParamError::MissingParameter {
            kind: kind.to_string(),
            parameter: "speed",
        })
    };
    match file.kind.as_str() {
        "" | "static" => Ok(AnimationSpec::Static),
        "pulse" => Ok(AnimationSpec::Pulse {
            speed: speed("pulse")?.parse::<PulseSpeed>()?,
        }),
        "blink" => Ok(AnimationSpec::Blink {
            speed: speed("blink")?.parse::<BlinkSpeed>()?,
        }),
        name => {
            let rate = file.rate.ok_or(AnimationParamError::MissingParameter {
                kind: name.to_string(),
                parameter: "rate",
            })?;
            Ok(AnimationSpec::Effect {
                name: name.to_string(),
                rate,
            })
        }
    }
}

fn from_config(config: &GridConfig) -> ProfileFile {
    ProfileFile {
        version: VERSION,
        globals: GlobalsFile {
            tempo_bpm: config.globals.tempo_bpm,
            scene: config.globals.scene.as_ref().map(|scene| SceneFile {
                effect: scene.effect.clone(),
                speed: scene.speed,
                seed: scene.seed,
            }),
        },
        buttons: config
            .buttons
            .iter()
            .map(|slot| ButtonFile {
                index: i64::from(slot.index.get()),
                mode: slot.mode,
                latched: slot.state().latched(),
                pressed: from_appearance(&slot.pressed),
                unpressed: from_appearance(&slot.unpressed),
            })
            .collect(),
        side: SideButton::ALL
            .iter()
            .map(|&button| {
                let slot = config.side(button);
                SideFile {
                    mode: slot.mode,
                    blink: slot.blink,
                    latched: slot.state().latched(),
                }
            })
            .collect(),
    }
}

fn from_appearance(appearance: &Appearance) -> AppearanceFile {
    let (speed, rate) = match &appearance.animation {
        AnimationSpec::Static => (None, None),
        AnimationSpec::Pulse { speed } => (Some(speed.label().to_string()), None),
        AnimationSpec::Blink { speed } => (Some(speed.label().to_string()), None),
        AnimationSpec::Effect { rate, .. } => (None, Some(*rate)),
    };
    AppearanceFile {
        color: appearance.color.to_string(),
        brightness: i64::from(appearance.brightness.percent()),
        animation: AnimationFile {
            kind: appearance.animation.tag().to_string(),
            speed,
            rate,
        },
    }
}
