use crate::animation::{AnimationEngine, AnimationRegistry, SceneSpec};
use crate::button::{self, ButtonMode, VisualIntent};
use crate::codec::{self, Decoded, GridEvent, SideEvent, TransportEvent};
use crate::controls::{GridIndex, PAD_COUNT, SIDE_COUNT, SideButton};
use crate::error::{ConfigError, ConfigValidationError};
use crate::lights::{FrameCommand, SideLed};
use crate::store::{ButtonSlot, ConfigStore};
use crate::tempo::TempoFollower;
use std::sync::Arc;
use std::time::{Duration, Instant};

// Clock jitter below this doesn't rewrite the stored tempo.
const TEMPO_EPSILON: f64 = 0.05;

/// Everything between decoded input and a rendered frame: the store, the
/// state machine, the animation engine and the tempo follower.
///
/// Engine time is whatever the caller passes to [`Controller::tick`]; input
/// handled between ticks takes the last tick's time as its phase origin.
pub struct Controller {
    store: ConfigStore,
    engine: AnimationEngine,
    tempo: TempoFollower,
    follow_clock: bool,
    frame: [FrameCommand; PAD_COUNT],
    side: [SideLed; SIDE_COUNT],
    now: Duration,
    resync: bool,
}

impl Controller {
    pub fn new(store: ConfigStore) -> Self {
        let engine = AnimationEngine::new(Arc::clone(store.registry()), store.config());
        let mut controller = Self {
            store,
            engine,
            tempo: TempoFollower::new(),
            follow_clock: false,
            frame: GridIndex::array(FrameCommand::off),
            side: [SideLed::Off; SIDE_COUNT],
            now: Duration::ZERO,
            resync: false,
        };
        controller.refresh_side();
        controller
    }

    pub fn with_builtins() -> Self {
        Self::new(ConfigStore::new(Arc::new(AnimationRegistry::with_builtins())))
    }

    pub fn set_follow_clock(&mut self, follow: bool) {
        self.follow_clock = follow;
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    pub fn now(&self) -> Duration {
        self.now
    }

    pub fn intent(&self, index: GridIndex) -> &VisualIntent {
        self.engine.intent(index)
    }

    /// Decodes and applies one raw inbound message.
    pub fn apply_message(&mut self, bytes: &[u8], received: Instant) {
        self.apply(codec::decode(bytes), received);
    }

    pub fn apply(&mut self, decoded: Decoded, received: Instant) {
        match decoded {
            Decoded::Grid(event) => self.apply_grid_event(event),
            Decoded::Side(event) => self.apply_side_event(event),
            Decoded::Transport(event) => self.apply_transport_event(event, received),
            Decoded::Unrecognized(e) => log::debug!("ignoring input: {e}"),
        }
    }

    pub fn apply_grid_event(&mut self, event: GridEvent) {
        if let Some(intent) = button::apply_grid_event(&mut self.store, &event, self.now) {
            self.engine.accept(intent);
        }
    }

    pub fn apply_side_event(&mut self, event: SideEvent) {
        if let Some(led) = button::apply_side_event(&mut self.store, &event) {
            self.side[event.button.slot()] = led;
        }
    }

    pub fn apply_transport_event(&mut self, event: TransportEvent, at: Instant) {
        if !self.follow_clock {
            return;
        }
        let Some(bpm) = self.tempo.observe(event, at) else {
            return;
        };
        if (bpm - self.store.globals().tempo_bpm).abs() < TEMPO_EPSILON {
            return;
        }
        match self.store.set_tempo(bpm) {
            Ok(()) => log::debug!("following clock at {bpm:.1} BPM"),
            Err(e) => log::warn!("clock tempo rejected: {e}"),
        }
    }

    /// Renders the frame for engine time `elapsed`. Time never runs
    /// backwards: an earlier `elapsed` renders at the latest time seen.
    pub fn tick(&mut self, elapsed: Duration) -> &[FrameCommand; PAD_COUNT] {
        self.now = self.now.max(elapsed);
        let globals = self.store.globals();
        self.engine
            .render(self.now, globals.tempo_bpm, globals.scene.as_ref(), &mut self.frame);
        &self.frame
    }

    /// The last rendered frame.
    pub fn snapshot(&self) -> [FrameCommand; PAD_COUNT] {
        self.frame
    }

    pub fn frame(&self) -> &[FrameCommand; PAD_COUNT] {
        &self.frame
    }

    pub fn side_leds(&self) -> &[SideLed; SIDE_COUNT] {
        &self.side
    }

    /// True once after anything that should make the device get a full
    /// frame, such as a profile load.
    pub fn take_resync(&mut self) -> bool {
        std::mem::take(&mut self.resync)
    }

    pub fn load_profile(&mut self, bytes: &[u8]) -> Result<(), ConfigError> {
        self.store.load_profile(bytes)?;
        for index in GridIndex::all() {
            self.refresh(index);
        }
        self.refresh_side();
        self.resync = true;
        Ok(())
    }

    pub fn save_profile(&self) -> Result<Vec<u8>, ConfigError> {
        self.store.save_profile()
    }

    pub fn set_slot(&mut self, slot: ButtonSlot) -> Result<(), ConfigValidationError> {
        let index = slot.index;
        self.store.set_slot(slot)?;
        self.refresh(index);
        Ok(())
    }

    pub fn update_slot(
        &mut self,
        index: GridIndex,
        edit: impl FnOnce(&mut ButtonSlot),
    ) -> Result<(), ConfigValidationError> {
        self.store.update_slot(index, edit)?;
        self.refresh(index);
        Ok(())
    }

    pub fn reset_slot(&mut self, index: GridIndex) {
        self.store.reset_slot(index);
        self.refresh(index);
    }

    pub fn set_side(&mut self, button: SideButton, mode: ButtonMode, blink: bool) {
        self.store.set_side(button, mode, blink);
        self.side[button.slot()] = button::side_led(self.store.side(button));
    }

    pub fn set_tempo(&mut self, bpm: f64) -> Result<(), ConfigValidationError> {
        self.store.set_tempo(bpm)
    }

    pub fn set_scene(&mut self, scene: Option<SceneSpec>) -> Result<(), ConfigValidationError> {
        self.store.set_scene(scene)
    }

    fn refresh(&mut self, index: GridIndex) {
        self.engine
            .accept(VisualIntent::for_slot(self.store.slot(index), self.now));
    }

    fn refresh_side(&mut self) {
        for button in SideButton::ALL {
            self.side[button.slot()] = button::side_led(self.store.side(button));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::animation::{AnimationSpec, PulseSpeed};
    use crate::lights::{Brightness, PadColors, Rgb};

    fn pad(i: u8) -> GridIndex {
        GridIndex::new(i).unwrap()
    }

    #[test]
    fn edits_take_effect_on_next_tick() {
        let mut controller = Controller::with_builtins();
        controller.tick(Duration::from_millis(10));
        controller
            .update_slot(pad(4), |slot| {
                slot.unpressed.color = Rgb::new(0, 255, 0);
                slot.unpressed.brightness = Brightness::Percent25;
            })
            .unwrap();
        let frame = controller.tick(Duration::from_millis(20));
        assert_eq!(frame[4].rgb, Rgb::new(0, 255, 0));
        assert_eq!(frame[4].brightness, 25);
    }

    #[test]
    fn time_never_runs_backwards() {
        let mut controller = Controller::with_builtins();
        controller.tick(Duration::from_secs(2));
        controller.tick(Duration::from_secs(1));
        assert_eq!(controller.now(), Duration::from_secs(2));
    }

    #[test]
    fn pressed_pad_starts_its_animation_at_press_time() {
        let mut controller = Controller::with_builtins();
        controller
            .update_slot(pad(0), |slot| {
                slot.pressed.animation = AnimationSpec::Pulse {
                    speed: PulseSpeed::Quarter,
                }
            })
            .unwrap();
        controller.tick(Duration::from_millis(700));
        controller.apply_message(&[0x90, 0, 127], Instant::now());
        assert_eq!(controller.intent(pad(0)).since, Duration::from_millis(700));
        // Quarter-note pulse at 120 BPM: dark at its own start, full half a beat in.
        assert_eq!(controller.tick(Duration::from_millis(700))[0].brightness, 0);
        assert_eq!(controller.tick(Duration::from_millis(950))[0].brightness, 100);
    }

    #[test]
    fn side_buttons_light_up() {
        let mut controller = Controller::with_builtins();
        controller.apply_message(&[0x90, SideButton::Track2.note(), 127], Instant::now());
        assert_eq!(controller.side_leds()[SideButton::Track2.slot()], SideLed::On);
        controller.set_side(SideButton::Track2, ButtonMode::Toggle, true);
        assert_eq!(controller.side_leds()[SideButton::Track2.slot()], SideLed::Blink);
    }

    #[test]
    fn follows_clock_when_enabled() {
        let mut controller = Controller::with_builtins();
        let start = Instant::now();
        let interval = Duration::from_secs_f64(60.0 / (140.0 * 24.0));
        for i in 0..30 {
            controller.apply_transport_event(TransportEvent::Clock, start + interval * i);
        }
        assert_eq!(controller.store().globals().tempo_bpm, 120.0);

        controller.set_follow_clock(true);
        for i in 0..30 {
            controller.apply_transport_event(TransportEvent::Clock, start + interval * i);
        }
        assert!((controller.store().globals().tempo_bpm - 140.0).abs() < 0.01);
    }

    #[test]
    fn profile_load_requests_resync() {
        let mut controller = Controller::with_builtins();
        controller
            .update_slot(pad(1), |slot| slot.unpressed.color = PadColors::Blue.rgb())
            .unwrap();
        let saved = controller.save_profile().unwrap();
        controller.reset_slot(pad(1));
        assert!(!controller.take_resync());

        controller.load_profile(&saved).unwrap();
        assert!(controller.take_resync());
        assert_eq!(controller.tick(Duration::ZERO)[1].rgb, PadColors::Blue.rgb());
    }
}
