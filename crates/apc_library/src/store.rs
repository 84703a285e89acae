//! Owned configuration: per-pad slots, side buttons and global settings.
//!
//! The live [`GridConfig`] sits behind an `Arc`. Edits validate first and
//! then copy-on-write, so a [`ConfigStore::snapshot`] taken by another
//! thread never sees half an edit.

use crate::animation::{AnimationRegistry, AnimationSpec, SceneSpec, scene};
use crate::button::{ButtonMode, LogicalState};
use crate::controls::{GridIndex, PAD_COUNT, SIDE_COUNT, SideButton};
use crate::error::{ConfigError, ConfigValidationError};
use crate::lights::{Brightness, PadColors, Rgb};
use crate::profile;
use std::sync::Arc;

pub const MIN_TEMPO: f64 = 20.0;
pub const MAX_TEMPO: f64 = 300.0;
pub const DEFAULT_TEMPO: f64 = 120.0;

/// How a pad looks in one of its two states.
#[derive(Clone, Debug, PartialEq)]
pub struct Appearance {
    pub color: Rgb,
    pub brightness: Brightness,
    pub animation: AnimationSpec,
}

impl Appearance {
    pub fn off() -> Self {
        Self::solid(Rgb::BLACK, Brightness::Percent100)
    }

    pub fn solid(color: Rgb, brightness: Brightness) -> Self {
        Self {
            color,
            brightness,
            animation: AnimationSpec::Static,
        }
    }

    fn validate(&self, registry: &AnimationRegistry, path: &str) -> Result<(), ConfigValidationError> {
        self.animation
            .validate(registry)
            .map_err(|source| ConfigValidationError::Animation {
                path: format!("{path}.animation"),
                source,
            })
    }
}

impl Default for Appearance {
    fn default() -> Self {
        Self::off()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ButtonSlot {
    pub index: GridIndex,
    pub mode: ButtonMode,
    pub pressed: Appearance,
    pub unpressed: Appearance,
    state: LogicalState,
}

impl ButtonSlot {
    /// Toggle pad that is dark until pressed, then red.
    pub fn new(index: GridIndex) -> Self {
        Self {
            index,
            mode: ButtonMode::Toggle,
            pressed: Appearance::solid(PadColors::Red.rgb(), Brightness::Percent100),
            unpressed: Appearance::off(),
            state: LogicalState::Off,
        }
    }

    pub fn state(&self) -> LogicalState {
        self.state
    }

    pub(crate) fn with_state(mut self, state: LogicalState) -> Self {
        self.state = state;
        self
    }

    fn validate(&self, registry: &AnimationRegistry) -> Result<(), ConfigValidationError> {
        let path = format!("buttons[{}]", self.index.get());
        self.pressed.validate(registry, &format!("{path}.pressed"))?;
        self.unpressed.validate(registry, &format!("{path}.unpressed"))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SideSlot {
    pub button: SideButton,
    pub mode: ButtonMode,
    /// Blink instead of steady on when lit.
    pub blink: bool,
    state: LogicalState,
}

impl SideSlot {
    pub fn new(button: SideButton) -> Self {
        Self {
            button,
            mode: ButtonMode::Toggle,
            blink: false,
            state: LogicalState::Off,
        }
    }

    pub fn state(&self) -> LogicalState {
        self.state
    }

    pub(crate) fn with_state(mut self, state: LogicalState) -> Self {
        self.state = state;
        self
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct GlobalSettings {
    pub tempo_bpm: f64,
    pub scene: Option<SceneSpec>,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            tempo_bpm: DEFAULT_TEMPO,
            scene: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct GridConfig {
    pub buttons: [ButtonSlot; PAD_COUNT],
    pub side: [SideSlot; SIDE_COUNT],
    pub globals: GlobalSettings,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            buttons: GridIndex::array(ButtonSlot::new),
            side: SideButton::ALL.map(SideSlot::new),
            globals: GlobalSettings::default(),
        }
    }
}

impl GridConfig {
    pub fn slot(&self, index: GridIndex) -> &ButtonSlot {
        &self.buttons[index.as_usize()]
    }

    pub fn side(&self, button: SideButton) -> &SideSlot {
        &self.side[button.slot()]
    }

    /// Checks every field that the types alone don't constrain.
    pub fn validate(&self, registry: &AnimationRegistry) -> Result<(), ConfigValidationError> {
        for (i, slot) in self.buttons.iter().enumerate() {
            if slot.index.as_usize() != i {
                return Err(ConfigValidationError::Index {
                    path: format!("buttons[{i}].index"),
                    index: i64::from(slot.index.get()),
                });
            }
            slot.validate(registry)?;
        }
        validate_tempo(self.globals.tempo_bpm)?;
        if let Some(spec) = &self.globals.scene {
            validate_scene(spec, registry)?;
        }
        Ok(())
    }
}

fn validate_tempo(bpm: f64) -> Result<(), ConfigValidationError> {
    if !(MIN_TEMPO..=MAX_TEMPO).contains(&bpm) {
        return Err(ConfigValidationError::Tempo(bpm));
    }
    Ok(())
}

fn validate_scene(spec: &SceneSpec, registry: &AnimationRegistry) -> Result<(), ConfigValidationError> {
    if registry.scene(&spec.effect).is_none() {
        return Err(ConfigValidationError::Scene(spec.effect.clone()));
    }
    if !(scene::MIN_SPEED..=scene::MAX_SPEED).contains(&spec.speed) {
        return Err(ConfigValidationError::SceneSpeed(spec.speed));
    }
    Ok(())
}

/// Single owner of the configuration. Cloning the store is cheap and
/// shares nothing mutable: the next edit on either copy forks the data.
#[derive(Clone, Debug)]
pub struct ConfigStore {
    current: Arc<GridConfig>,
    registry: Arc<AnimationRegistry>,
}

impl ConfigStore {
    pub fn new(registry: Arc<AnimationRegistry>) -> Self {
        Self {
            current: Arc::new(GridConfig::default()),
            registry,
        }
    }

    pub fn with_config(registry: Arc<AnimationRegistry>, config: GridConfig) -> Result<Self, ConfigValidationError> {
        config.validate(&registry)?;
        Ok(Self {
            current: Arc::new(config),
            registry,
        })
    }

    pub fn registry(&self) -> &Arc<AnimationRegistry> {
        &self.registry
    }

    /// Immutable view of the whole configuration as of now.
    pub fn snapshot(&self) -> Arc<GridConfig> {
        Arc::clone(&self.current)
    }

    pub fn config(&self) -> &GridConfig {
        &self.current
    }

    pub fn slot(&self, index: GridIndex) -> &ButtonSlot {
        self.current.slot(index)
    }

    pub fn side(&self, button: SideButton) -> &SideSlot {
        self.current.side(button)
    }

    pub fn globals(&self) -> &GlobalSettings {
        &self.current.globals
    }

    /// Replaces a pad's configuration. Its logical state is kept, except that
    /// a mode change drops a hold in progress so no overlay lingers.
    pub fn set_slot(&mut self, slot: ButtonSlot) -> Result<(), ConfigValidationError> {
        slot.validate(&self.registry)?;
        let current = self.current.slot(slot.index);
        let state = if current.mode != slot.mode {
            LogicalState::from_latched(current.state.latched())
        } else {
            current.state
        };
        let i = slot.index.as_usize();
        Arc::make_mut(&mut self.current).buttons[i] = slot.with_state(state);
        Ok(())
    }

    /// Edits a copy of the slot and commits it through [`Self::set_slot`].
    /// The index can't be changed this way.
    pub fn update_slot(
        &mut self,
        index: GridIndex,
        edit: impl FnOnce(&mut ButtonSlot),
    ) -> Result<(), ConfigValidationError> {
        let mut slot = self.slot(index).clone();
        edit(&mut slot);
        slot.index = index;
        self.set_slot(slot)
    }

    pub fn reset_slot(&mut self, index: GridIndex) {
        Arc::make_mut(&mut self.current).buttons[index.as_usize()] = ButtonSlot::new(index);
    }

    pub fn set_side(&mut self, button: SideButton, mode: ButtonMode, blink: bool) {
        let config = Arc::make_mut(&mut self.current);
        let slot = &mut config.side[button.slot()];
        if slot.mode != mode {
            slot.state = LogicalState::from_latched(slot.state.latched());
        }
        slot.mode = mode;
        slot.blink = blink;
    }

    pub fn set_tempo(&mut self, bpm: f64) -> Result<(), ConfigValidationError> {
        validate_tempo(bpm)?;
        Arc::make_mut(&mut self.current).globals.tempo_bpm = bpm;
        Ok(())
    }

    pub fn set_scene(&mut self, spec: Option<SceneSpec>) -> Result<(), ConfigValidationError> {
        if let Some(spec) = &spec {
            validate_scene(spec, &self.registry)?;
        }
        Arc::make_mut(&mut self.current).globals.scene = spec;
        Ok(())
    }

    /// Parses and validates the whole profile before swapping it in. On any
    /// error the current configuration is untouched.
    pub fn load_profile(&mut self, bytes: &[u8]) -> Result<(), ConfigError> {
        let config = profile::from_json(bytes, &self.registry)?;
        self.current = Arc::new(config);
        Ok(())
    }

    pub fn save_profile(&self) -> Result<Vec<u8>, ConfigError> {
        profile::to_json(&self.current)
    }

    pub(crate) fn set_button_state(&mut self, index: GridIndex, state: LogicalState) {
        Arc::make_mut(&mut self.current).buttons[index.as_usize()].state = state;
    }

    pub(crate) fn set_side_state(&mut self, button: SideButton, state: LogicalState) {
        Arc::make_mut(&mut self.current).side[button.slot()].state = state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::animation::PulseSpeed;
    use crate::error::AnimationParamError;

    fn store() -> ConfigStore {
        ConfigStore::new(Arc::new(AnimationRegistry::with_builtins()))
    }

    fn pad(i: u8) -> GridIndex {
        GridIndex::new(i).unwrap()
    }

    #[test]
    fn defaults() {
        let store = store();
        assert_eq!(store.slot(pad(5)).mode, ButtonMode::Toggle);
        assert_eq!(store.slot(pad(5)).unpressed, Appearance::off());
        assert_eq!(store.side(SideButton::Shift).button, SideButton::Shift);
        assert_eq!(store.globals().tempo_bpm, DEFAULT_TEMPO);
        assert_eq!(store.config().validate(store.registry()), Ok(()));
    }

    #[test]
    fn snapshot_is_isolated_from_later_edits() {
        let mut store = store();
        let before = store.snapshot();
        store
            .update_slot(pad(3), |slot| slot.pressed.color = Rgb::new(1, 2, 3))
            .unwrap();
        store.set_tempo(90.0).unwrap();
        assert_eq!(before.slot(pad(3)).pressed.color, PadColors::Red.rgb());
        assert_eq!(before.globals.tempo_bpm, DEFAULT_TEMPO);
        assert_eq!(store.slot(pad(3)).pressed.color, Rgb::new(1, 2, 3));
    }

    #[test]
    fn invalid_edit_is_rejected_whole() {
        let mut store = store();
        let err = store
            .update_slot(pad(7), |slot| {
                slot.pressed.color = Rgb::WHITE;
                slot.unpressed.animation = AnimationSpec::Effect {
                    name: "breathe".into(),
                    rate: 0.0,
                };
            })
            .unwrap_err();
        assert_eq!(
            err,
            ConfigValidationError::Animation {
                path: "buttons[7].unpressed.animation".into(),
                source: AnimationParamError::InvalidRate(0.0),
            }
        );
        assert_eq!(store.slot(pad(7)), &ButtonSlot::new(pad(7)));
    }

    #[test]
    fn builtin_kinds_cannot_be_used_as_rate_effects() {
        let mut store = store();
        for name in ["static", "pulse", "blink"] {
            let err = store
                .update_slot(pad(1), |slot| {
                    slot.pressed.animation = AnimationSpec::Effect {
                        name: name.into(),
                        rate: 2.0,
                    }
                })
                .unwrap_err();
            assert_eq!(
                err,
                ConfigValidationError::Animation {
                    path: "buttons[1].pressed.animation".into(),
                    source: AnimationParamError::ReservedKind(name.into()),
                }
            );
        }
        assert_eq!(store.slot(pad(1)), &ButtonSlot::new(pad(1)));
    }

    #[test]
    fn set_slot_keeps_state_unless_mode_changes() {
        let mut store = store();
        store.set_button_state(pad(2), LogicalState::On);
        store
            .update_slot(pad(2), |slot| {
                slot.pressed.animation = AnimationSpec::Pulse {
                    speed: PulseSpeed::Eighth,
                }
            })
            .unwrap();
        assert_eq!(store.slot(pad(2)).state(), LogicalState::On);

        store.update_slot(pad(2), |slot| slot.mode = ButtonMode::Flash).unwrap();
        store.set_button_state(pad(2), LogicalState::Pressed { was_on: true });
        store.update_slot(pad(2), |slot| slot.mode = ButtonMode::Toggle).unwrap();
        assert_eq!(store.slot(pad(2)).state(), LogicalState::On);
    }

    #[test]
    fn reset_restores_default() {
        let mut store = store();
        store.update_slot(pad(0), |slot| slot.mode = ButtonMode::Flash).unwrap();
        store.set_button_state(pad(0), LogicalState::On);
        store.reset_slot(pad(0));
        assert_eq!(store.slot(pad(0)), &ButtonSlot::new(pad(0)));
    }

    #[test]
    fn tempo_and_scene_bounds() {
        let mut store = store();
        assert_eq!(store.set_tempo(19.0), Err(ConfigValidationError::Tempo(19.0)));
        assert!(store.set_tempo(f64::NAN).is_err());
        assert!(store.set_tempo(300.0).is_ok());

        let scene = |effect: &str, speed| SceneSpec {
            effect: effect.into(),
            speed,
            seed: 0,
        };
        assert_eq!(
            store.set_scene(Some(scene("lava", 1.0))),
            Err(ConfigValidationError::Scene("lava".into()))
        );
        assert_eq!(
            store.set_scene(Some(scene("rain", 5.0))),
            Err(ConfigValidationError::SceneSpeed(5.0))
        );
        assert!(store.set_scene(Some(scene("rain", 0.25))).is_ok());
        assert!(store.set_scene(None).is_ok());
    }
}
