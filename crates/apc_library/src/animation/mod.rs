//! Per-tick LED computation.
//!
//! Two classes of animation share one registry. Cell kinds are pure
//! functions of a single pad's phase and base colour; scene effects are
//! pure functions of grid-wide time and a seed and paint all 64 pads at
//! once. Pad phase is counted in beats accumulated tick by tick at the
//! tempo of each tick, so a tempo change bends the speed without making
//! a running animation jump. A late tick lands where an on-time tick
//! would have.

mod cell;
pub mod scene;

use crate::button::VisualIntent;
use crate::controls::{GridIndex, PAD_COUNT};
use crate::error::{AnimationParamError, RenderError};
use crate::lights::{FrameCommand, Rgb};
use crate::store::GridConfig;
pub use scene::{GridFrame, SceneInput, SceneSpec};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Highest rate an `Effect` animation may run at.
pub const MAX_RATE: f64 = 16.0;

/// Pulse period as a note fraction of the current tempo.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PulseSpeed {
    Sixteenth,
    Eighth,
    Quarter,
    Half,
}

impl PulseSpeed {
    pub const ALL: [PulseSpeed; 4] = [
        PulseSpeed::Sixteenth,
        PulseSpeed::Eighth,
        PulseSpeed::Quarter,
        PulseSpeed::Half,
    ];

    pub fn fraction(self) -> f64 {
        match self {
            PulseSpeed::Sixteenth => 1.0 / 16.0,
            PulseSpeed::Eighth => 1.0 / 8.0,
            PulseSpeed::Quarter => 1.0 / 4.0,
            PulseSpeed::Half => 1.0 / 2.0,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            PulseSpeed::Sixteenth => "1/16",
            PulseSpeed::Eighth => "1/8",
            PulseSpeed::Quarter => "1/4",
            PulseSpeed::Half => "1/2",
        }
    }
}

impl FromStr for PulseSpeed {
    type Err = AnimationParamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|speed| speed.label() == s.trim())
            .ok_or_else(|| AnimationParamError::InvalidSpeed {
                kind: "pulse",
                speed: s.to_string(),
            })
    }
}

/// Blink period as a note fraction of the current tempo.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlinkSpeed {
    TwentyFourth,
    Sixteenth,
    Eighth,
    Quarter,
    Half,
}

impl BlinkSpeed {
    pub const ALL: [BlinkSpeed; 5] = [
        BlinkSpeed::TwentyFourth,
        BlinkSpeed::Sixteenth,
        BlinkSpeed::Eighth,
        BlinkSpeed::Quarter,
        BlinkSpeed::Half,
    ];

    pub fn fraction(self) -> f64 {
        match self {
            BlinkSpeed::TwentyFourth => 1.0 / 24.0,
            BlinkSpeed::Sixteenth => 1.0 / 16.0,
            BlinkSpeed::Eighth => 1.0 / 8.0,
            BlinkSpeed::Quarter => 1.0 / 4.0,
            BlinkSpeed::Half => 1.0 / 2.0,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            BlinkSpeed::TwentyFourth => "1/24",
            BlinkSpeed::Sixteenth => "1/16",
            BlinkSpeed::Eighth => "1/8",
            BlinkSpeed::Quarter => "1/4",
            BlinkSpeed::Half => "1/2",
        }
    }
}

impl FromStr for BlinkSpeed {
    type Err = AnimationParamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|speed| speed.label() == s.trim())
            .ok_or_else(|| AnimationParamError::InvalidSpeed {
                kind: "blink",
                speed: s.to_string(),
            })
    }
}

/// What a pad does with its colour over time.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum AnimationSpec {
    #[default]
    Static,
    Pulse {
        speed: PulseSpeed,
    },
    Blink {
        speed: BlinkSpeed,
    },
    /// Any other registered cell kind, at `rate` cycles per beat.
    Effect {
        name: String,
        rate: f64,
    },
}

impl AnimationSpec {
    pub fn tag(&self) -> &str {
        match self {
            AnimationSpec::Static => "static",
            AnimationSpec::Pulse { .. } => "pulse",
            AnimationSpec::Blink { .. } => "blink",
            AnimationSpec::Effect { name, .. } => name,
        }
    }

    /// A note fraction of `f` means one cycle every `4 * f` beats.
    pub fn cycles_per_beat(&self) -> f64 {
        match self {
            AnimationSpec::Static => 0.0,
            AnimationSpec::Pulse { speed } => 1.0 / (4.0 * speed.fraction()),
            AnimationSpec::Blink { speed } => 1.0 / (4.0 * speed.fraction()),
            AnimationSpec::Effect { rate, .. } => *rate,
        }
    }

    pub fn is_static(&self) -> bool {
        matches!(self, AnimationSpec::Static)
    }

    pub fn validate(&self, registry: &AnimationRegistry) -> Result<(), AnimationParamError> {
        if let AnimationSpec::Effect { name, rate } = self {
            // These have their own variants and speed sets.
            if matches!(name.as_str(), "static" | "pulse" | "blink") {
                return Err(AnimationParamError::ReservedKind(name.clone()));
            }
            if registry.cell(name).is_none() {
                return Err(AnimationParamError::UnknownKind(name.clone()));
            }
            if !rate.is_finite() || *rate <= 0.0 || *rate > MAX_RATE {
                return Err(AnimationParamError::InvalidRate(*rate));
            }
        }
        Ok(())
    }
}

impl fmt::Display for AnimationSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnimationSpec::Static => write!(f, "static"),
            AnimationSpec::Pulse { speed } => write!(f, "pulse {}", speed.label()),
            AnimationSpec::Blink { speed } => write!(f, "blink {}", speed.label()),
            AnimationSpec::Effect { name, rate } => write!(f, "{name} x{rate}"),
        }
    }
}

/// A computed pad colour without its address.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Cell {
    pub rgb: Rgb,
    pub brightness: u8,
}

impl Cell {
    pub const OFF: Cell = Cell {
        rgb: Rgb::BLACK,
        brightness: 0,
    };

    pub fn new(rgb: Rgb, brightness: u8) -> Self {
        Self {
            rgb,
            brightness: brightness.min(100),
        }
    }

    pub fn at(self, index: GridIndex) -> FrameCommand {
        FrameCommand {
            index,
            rgb: self.rgb,
            brightness: self.brightness,
        }
    }
}

pub struct CellInput {
    /// Cycles completed since the pad's visual last changed.
    pub phase: f64,
    pub color: Rgb,
    pub brightness: u8,
}

pub type CellFn = fn(&CellInput) -> Result<Cell, RenderError>;
pub type SceneFn = fn(&SceneInput) -> GridFrame;

/// Tag to render function tables. New kinds are added here; the engine
/// only ever looks them up.
#[derive(Clone)]
pub struct AnimationRegistry {
    cells: BTreeMap<&'static str, CellFn>,
    scenes: BTreeMap<&'static str, SceneFn>,
}

impl AnimationRegistry {
    pub fn empty() -> Self {
        Self {
            cells: BTreeMap::new(),
            scenes: BTreeMap::new(),
        }
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        cell::register(&mut registry);
        scene::register(&mut registry);
        registry
    }

    pub fn register_cell(&mut self, tag: &'static str, render: CellFn) {
        self.cells.insert(tag, render);
    }

    pub fn register_scene(&mut self, name: &'static str, render: SceneFn) {
        self.scenes.insert(name, render);
    }

    pub fn cell(&self, tag: &str) -> Option<CellFn> {
        self.cells.get(tag).copied()
    }

    pub fn scene(&self, name: &str) -> Option<SceneFn> {
        self.scenes.get(name).copied()
    }

    pub fn cell_kinds(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.cells.keys().copied()
    }

    pub fn scene_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.scenes.keys().copied()
    }
}

impl Default for AnimationRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl fmt::Debug for AnimationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnimationRegistry")
            .field("cells", &self.cells.keys().collect::<Vec<_>>())
            .field("scenes", &self.scenes.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Turns visual intents into one frame per tick. Never touches button
/// state; it only sees what the state machine handed it.
pub struct AnimationEngine {
    registry: Arc<AnimationRegistry>,
    intents: Vec<VisualIntent>,
    clock: BeatClock,
    /// Beat each pad's phase counts from. `None` until the next render
    /// places the intent's start on the beat clock.
    starts: [Option<f64>; PAD_COUNT],
    last: [Cell; PAD_COUNT],
    failing: [bool; PAD_COUNT],
    missing_scene: Option<String>,
}

impl AnimationEngine {
    pub fn new(registry: Arc<AnimationRegistry>, config: &GridConfig) -> Self {
        let intents = config
            .buttons
            .iter()
            .map(|slot| VisualIntent::for_slot(slot, Duration::ZERO))
            .collect();
        Self {
            registry,
            intents,
            clock: BeatClock::default(),
            starts: [None; PAD_COUNT],
            last: [Cell::OFF; PAD_COUNT],
            failing: [false; PAD_COUNT],
            missing_scene: None,
        }
    }

    pub fn accept(&mut self, intent: VisualIntent) {
        let i = intent.index.as_usize();
        self.intents[i] = intent;
        self.starts[i] = None;
    }

    /// Beats counted up to the last render.
    pub fn beats(&self) -> f64 {
        self.clock.beats
    }

    pub fn intent(&self, index: GridIndex) -> &VisualIntent {
        &self.intents[index.as_usize()]
    }

    /// Computes the frame at `elapsed`. Priority per pad: a held Flash
    /// overlay, then the active scene, then the pad's own animation.
    pub fn render(
        &mut self,
        elapsed: Duration,
        tempo_bpm: f64,
        scene: Option<&SceneSpec>,
        out: &mut [FrameCommand; PAD_COUNT],
    ) {
        let previous = self.clock;
        self.clock.advance(elapsed, tempo_bpm);
        let scene_frame = scene.and_then(|spec| self.render_scene(spec, elapsed));

        for i in 0..PAD_COUNT {
            let intent = &self.intents[i];
            let index = intent.index;
            let start = *self.starts[i].get_or_insert_with(|| previous.beat_at(intent.since, tempo_bpm));
            let beats = (self.clock.beats - start).max(0.0);
            let result = match (&intent.overlay, &scene_frame) {
                (Some(overlay), _) => self.render_cell(overlay, beats),
                (None, Some(frame)) => Ok(frame[i]),
                (None, None) => self.render_cell(&intent.base, beats),
            };
            match result {
                Ok(cell) => {
                    self.failing[i] = false;
                    self.last[i] = cell;
                }
                Err(e) => {
                    if !self.failing[i] {
                        log::warn!("{index}: skipped this tick: {e}");
                        self.failing[i] = true;
                    }
                }
            }
            out[i] = self.last[i].at(index);
        }
    }

    fn render_cell(
        &self,
        appearance: &crate::store::Appearance,
        beats: f64,
    ) -> Result<Cell, RenderError> {
        let tag = appearance.animation.tag();
        let render = self
            .registry
            .cell(tag)
            .ok_or_else(|| RenderError::UnregisteredKind(tag.to_string()))?;
        let input = CellInput {
            phase: beats * appearance.animation.cycles_per_beat(),
            color: appearance.color,
            brightness: appearance.brightness.percent(),
        };
        render(&input)
    }

    fn render_scene(&mut self, spec: &SceneSpec, elapsed: Duration) -> Option<GridFrame> {
        let Some(render) = self.registry.scene(&spec.effect) else {
            if self.missing_scene.as_deref() != Some(spec.effect.as_str()) {
                log::warn!("scene {:?} isn't registered, showing pad animations", spec.effect);
                self.missing_scene = Some(spec.effect.clone());
            }
            return None;
        };
        self.missing_scene = None;

        let mut base = [Rgb::BLACK; PAD_COUNT];
        for (color, intent) in base.iter_mut().zip(&self.intents) {
            *color = intent.base.color;
        }
        let input = SceneInput {
            time: elapsed.as_secs_f64() * spec.speed,
            seed: spec.seed,
            base,
        };
        Some(render(&input))
    }
}

/// Beats counted so far and the render time they were counted up to.
#[derive(Clone, Copy, Debug, Default)]
struct BeatClock {
    beats: f64,
    at: Duration,
}

impl BeatClock {
    /// Counts the time since the last render at `tempo_bpm`. Time never
    /// runs backwards here, so the count only grows.
    fn advance(&mut self, elapsed: Duration, tempo_bpm: f64) {
        if elapsed > self.at {
            self.beats += (elapsed - self.at).as_secs_f64() * tempo_bpm / 60.0;
            self.at = elapsed;
        }
    }

    /// Beat position of `t`, counting from the last render at `tempo_bpm`.
    fn beat_at(&self, t: Duration, tempo_bpm: f64) -> f64 {
        let offset = if t >= self.at {
            (t - self.at).as_secs_f64()
        } else {
            -(self.at - t).as_secs_f64()
        };
        self.beats + offset * tempo_bpm / 60.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lights::Brightness;
    use crate::store::Appearance;

    fn engine() -> AnimationEngine {
        let registry = Arc::new(AnimationRegistry::with_builtins());
        AnimationEngine::new(registry, &GridConfig::default())
    }

    fn intent(index: u8, animation: AnimationSpec, since: Duration) -> VisualIntent {
        VisualIntent {
            index: GridIndex::new(index).unwrap(),
            base: Appearance {
                color: Rgb::new(0, 0, 255),
                brightness: Brightness::Percent100,
                animation,
            },
            overlay: None,
            since,
        }
    }

    fn frame() -> [FrameCommand; PAD_COUNT] {
        std::array::from_fn(|i| FrameCommand::off(GridIndex::new(i as u8).unwrap()))
    }

    #[test]
    fn speed_labels_parse() {
        assert_eq!("1/16".parse::<PulseSpeed>(), Ok(PulseSpeed::Sixteenth));
        assert_eq!("1/24".parse::<BlinkSpeed>(), Ok(BlinkSpeed::TwentyFourth));
        assert!("1/24".parse::<PulseSpeed>().is_err());
        assert!("1/3".parse::<BlinkSpeed>().is_err());
    }

    #[test]
    fn effect_specs_are_validated() {
        let registry = AnimationRegistry::with_builtins();
        let ok = AnimationSpec::Effect { name: "breathe".into(), rate: 0.5 };
        assert_eq!(ok.validate(&registry), Ok(()));
        let unknown = AnimationSpec::Effect { name: "lava".into(), rate: 1.0 };
        assert_eq!(unknown.validate(&registry), Err(AnimationParamError::UnknownKind("lava".into())));
        let fast = AnimationSpec::Effect { name: "breathe".into(), rate: 17.0 };
        assert_eq!(fast.validate(&registry), Err(AnimationParamError::InvalidRate(17.0)));
        let nan = AnimationSpec::Effect { name: "breathe".into(), rate: f64::NAN };
        assert!(nan.validate(&registry).is_err());
    }

    #[test]
    fn pulse_period_follows_tempo() {
        // 1/4 note at 120 BPM: one cycle per beat, i.e. every 0.5 s.
        let spec = AnimationSpec::Pulse { speed: PulseSpeed::Quarter };
        assert_eq!(spec.cycles_per_beat(), 1.0);
        let spec = AnimationSpec::Blink { speed: BlinkSpeed::Half };
        assert_eq!(spec.cycles_per_beat(), 0.5);
    }

    #[test]
    fn blink_is_dark_in_second_half_of_cycle() {
        let mut engine = engine();
        let spec = AnimationSpec::Blink { speed: BlinkSpeed::Quarter };
        engine.accept(intent(3, spec, Duration::ZERO));
        let mut out = frame();

        engine.render(Duration::from_millis(100), 120.0, None, &mut out);
        assert_eq!(out[3].brightness, 100);
        engine.render(Duration::from_millis(300), 120.0, None, &mut out);
        assert_eq!(out[3].brightness, 0);
        engine.render(Duration::from_millis(600), 120.0, None, &mut out);
        assert_eq!(out[3].brightness, 100);
    }

    #[test]
    fn phase_starts_at_intent_time() {
        let mut engine = engine();
        let spec = AnimationSpec::Pulse { speed: PulseSpeed::Quarter };
        engine.accept(intent(0, spec.clone(), Duration::ZERO));
        engine.accept(intent(1, spec, Duration::from_millis(250)));
        let mut out = frame();
        engine.render(Duration::from_millis(250), 120.0, None, &mut out);
        // Half a cycle in for pad 0 (peak), just starting for pad 1 (dark).
        assert_eq!(out[0].brightness, 100);
        assert_eq!(out[1].brightness, 0);
    }

    #[test]
    fn slowing_down_never_winds_phase_back() {
        let mut engine = engine();
        let spec = AnimationSpec::Effect { name: "hue_cycle".into(), rate: 1.0 };
        engine.accept(intent(0, spec, Duration::ZERO));
        let mut out = frame();

        let mut t = Duration::ZERO;
        let mut last = engine.beats();
        for tempo in [300.0, 300.0, 300.0, 20.0, 20.0, 140.0] {
            t += Duration::from_millis(100);
            engine.render(t, tempo, None, &mut out);
            assert!(engine.beats() > last);
            last = engine.beats();
        }
        // 0.3 s at 300 BPM, 0.2 s at 20 and 0.1 s at 140.
        let expected = 1.5 + 1.0 / 15.0 + 7.0 / 30.0;
        assert!((engine.beats() - expected).abs() < 1e-9);
    }

    #[test]
    fn tempo_drop_keeps_pulse_where_it_was() {
        let mut engine = engine();
        let spec = AnimationSpec::Pulse { speed: PulseSpeed::Quarter };
        engine.accept(intent(0, spec, Duration::ZERO));
        let mut out = frame();

        // A quarter beat in at 120 BPM: half way up the ramp.
        engine.render(Duration::from_millis(125), 120.0, None, &mut out);
        let before = out[0].brightness;
        assert!((40..=60).contains(&before), "{before}");
        // Halving the tempo slows the ramp instead of pulling it back to
        // the eighth-beat point.
        engine.render(Duration::from_millis(130), 60.0, None, &mut out);
        assert!(out[0].brightness >= before, "{} < {before}", out[0].brightness);
    }

    #[test]
    fn failing_cell_keeps_previous_value() {
        let mut engine = engine();
        engine.accept(intent(2, AnimationSpec::Static, Duration::ZERO));
        let mut out = frame();
        engine.render(Duration::ZERO, 120.0, None, &mut out);
        let good = out[2];
        assert_eq!(good.brightness, 100);

        let broken = AnimationSpec::Effect { name: "not-registered".into(), rate: 1.0 };
        engine.accept(intent(2, broken, Duration::ZERO));
        engine.accept(intent(4, AnimationSpec::Static, Duration::ZERO));
        engine.render(Duration::from_millis(20), 120.0, None, &mut out);
        assert_eq!(out[2], good);
        assert_eq!(out[4].brightness, 100);
    }

    #[test]
    fn overlay_beats_scene_beats_base() {
        let mut engine = engine();
        let mut held = intent(10, AnimationSpec::Static, Duration::ZERO);
        held.overlay = Some(Appearance {
            color: Rgb::new(255, 0, 0),
            brightness: Brightness::Percent50,
            animation: AnimationSpec::Static,
        });
        engine.accept(held);
        let scene = SceneSpec {
            effect: "color_wipe".into(),
            speed: 1.0,
            seed: 1,
        };
        let mut out = frame();
        engine.render(Duration::from_millis(10), 120.0, Some(&scene), &mut out);
        assert_eq!(out[10].rgb, Rgb::new(255, 0, 0));
        assert_eq!(out[10].brightness, 50);
        // Column 0 is painted by the wipe right away.
        assert_eq!(out[0].rgb, crate::lights::PadColors::Red.rgb());
    }

    #[test]
    fn unknown_scene_falls_back_to_pads() {
        let mut engine = engine();
        engine.accept(intent(0, AnimationSpec::Static, Duration::ZERO));
        let scene = SceneSpec {
            effect: "nope".into(),
            speed: 1.0,
            seed: 0,
        };
        let mut out = frame();
        engine.render(Duration::ZERO, 120.0, Some(&scene), &mut out);
        assert_eq!(out[0].rgb, Rgb::new(0, 0, 255));
    }
}
