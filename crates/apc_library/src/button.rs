//! Per-button state machine. The only writer of button logical state.

use crate::codec::{GridEvent, SideEvent};
use crate::controls::GridIndex;
use crate::lights::SideLed;
use crate::store::{Appearance, ButtonSlot, ConfigStore, SideSlot};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ButtonMode {
    /// Each press flips the latched state.
    #[default]
    Toggle,
    /// Lit only while held.
    Flash,
}

impl fmt::Display for ButtonMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ButtonMode::Toggle => write!(f, "toggle"),
            ButtonMode::Flash => write!(f, "flash"),
        }
    }
}

impl FromStr for ButtonMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "toggle" => Ok(ButtonMode::Toggle),
            "flash" => Ok(ButtonMode::Flash),
            other => Err(format!("unknown button mode {other:?}, expected toggle or flash")),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum LogicalState {
    #[default]
    Off,
    On,
    /// A Flash button being held. `was_on` is what it goes back to.
    Pressed { was_on: bool },
}

impl LogicalState {
    pub fn from_latched(on: bool) -> Self {
        if on { LogicalState::On } else { LogicalState::Off }
    }

    /// The state ignoring any momentary hold.
    pub fn latched(self) -> bool {
        match self {
            LogicalState::Off => false,
            LogicalState::On => true,
            LogicalState::Pressed { was_on } => was_on,
        }
    }

    pub fn is_held(self) -> bool {
        matches!(self, LogicalState::Pressed { .. })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Edge {
    Down { velocity: u8 },
    Up,
}

impl Edge {
    pub fn new(pressed: bool, velocity: u8) -> Self {
        if pressed { Edge::Down { velocity } } else { Edge::Up }
    }
}

/// Pure transition function.
///
/// A press with velocity 0 is a no-op. A Toggle release only clears a hold
/// left over from before a mode change, so the latched state survives.
pub fn next_state(mode: ButtonMode, state: LogicalState, edge: Edge) -> LogicalState {
    match (mode, edge) {
        (_, Edge::Down { velocity: 0 }) => state,
        (ButtonMode::Toggle, Edge::Down { .. }) => LogicalState::from_latched(!state.latched()),
        (ButtonMode::Flash, Edge::Down { .. }) if state.is_held() => state,
        (ButtonMode::Flash, Edge::Down { .. }) => LogicalState::Pressed {
            was_on: state.latched(),
        },
        (_, Edge::Up) => LogicalState::from_latched(state.latched()),
    }
}

/// What a pad should look like, handed from the state machine to the
/// animation engine.
#[derive(Clone, Debug, PartialEq)]
pub struct VisualIntent {
    pub index: GridIndex,
    pub base: Appearance,
    /// Set while a Flash button is held; wins over scenes and `base`.
    pub overlay: Option<Appearance>,
    /// Engine time of the last visual change, the pad's phase origin.
    pub since: Duration,
}

impl VisualIntent {
    pub fn for_slot(slot: &ButtonSlot, since: Duration) -> Self {
        let state = slot.state();
        let base = if state.latched() { &slot.pressed } else { &slot.unpressed };
        Self {
            index: slot.index,
            base: base.clone(),
            overlay: state.is_held().then(|| slot.pressed.clone()),
            since,
        }
    }
}

/// Runs a pad edge through the state machine and commits the new state.
/// Returns the pad's new intent when its state changed.
pub fn apply_grid_event(store: &mut ConfigStore, event: &GridEvent, now: Duration) -> Option<VisualIntent> {
    let slot = store.slot(event.index);
    let before = slot.state();
    let after = next_state(slot.mode, before, Edge::new(event.pressed, event.velocity));
    if after == before {
        return None;
    }
    log::trace!("{}: {before:?} -> {after:?}", event.index);
    store.set_button_state(event.index, after);
    Some(VisualIntent::for_slot(store.slot(event.index), now))
}

/// Same rules for the single-colour buttons. Returns the new LED value when
/// the state changed.
pub fn apply_side_event(store: &mut ConfigStore, event: &SideEvent) -> Option<SideLed> {
    let slot = store.side(event.button);
    let before = slot.state();
    // Side buttons report no useful velocity.
    let after = next_state(slot.mode, before, Edge::new(event.pressed, 127));
    if after == before {
        return None;
    }
    log::trace!("{:?}: {before:?} -> {after:?}", event.button);
    store.set_side_state(event.button, after);
    Some(side_led(store.side(event.button)))
}

pub fn side_led(slot: &SideSlot) -> SideLed {
    let state = slot.state();
    match (slot.button.has_light(), state.latched() || state.is_held()) {
        (true, true) if slot.blink => SideLed::Blink,
        (true, true) => SideLed::On,
        _ => SideLed::Off,
    }
}
