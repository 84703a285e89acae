//! Line commands read from stdin while the driver runs.

use apc_library::Controller;
use apc_library::animation::{AnimationSpec, SceneSpec};
use apc_library::button::ButtonMode;
use apc_library::controls::{GridIndex, SideButton};
use apc_library::lights::{Brightness, Rgb};
use apc_library::runtime::Command;
use apc_library::store::{Appearance, ButtonSlot};
use crossbeam_channel::{Sender, bounded};
use std::io::BufRead;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub(crate) const HELP: &str = "\
commands:
  color <pad> pressed|unpressed <#rrggbb|name>
  brightness <pad> pressed|unpressed <10..100>
  anim <pad> pressed|unpressed static | pulse <1/16..1/2> | blink <1/24..1/2> | <kind> [rate]
  mode <pad> toggle|flash
  reset <pad>
  side track<1-8>|scene<1-8> toggle|flash [blink]
  tempo <bpm>
  follow on|off
  scene <name> [speed] [seed] | scene off
  show <pad>
  save <file> | load <file>
  help | quit";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Which {
    Pressed,
    Unpressed,
}

impl Which {
    fn of(self, slot: &mut ButtonSlot) -> &mut Appearance {
        match self {
            Which::Pressed => &mut slot.pressed,
            Which::Unpressed => &mut slot.unpressed,
        }
    }
}

/// Something the engine thread applies to the controller.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Edit {
    Color(GridIndex, Which, Rgb),
    Brightness(GridIndex, Which, Brightness),
    Animation(GridIndex, Which, AnimationSpec),
    Mode(GridIndex, ButtonMode),
    Reset(GridIndex),
    Side(SideButton, ButtonMode, bool),
    Tempo(f64),
    FollowClock(bool),
    Scene(Option<SceneSpec>),
}

impl Edit {
    pub(crate) fn apply(self, controller: &mut Controller) -> Result<(), String> {
        let result = match self {
            Edit::Color(pad, which, rgb) => controller.update_slot(pad, |s| which.of(s).color = rgb),
            Edit::Brightness(pad, which, level) => {
                controller.update_slot(pad, |s| which.of(s).brightness = level)
            }
            Edit::Animation(pad, which, spec) => controller.update_slot(pad, |s| which.of(s).animation = spec),
            Edit::Mode(pad, mode) => controller.update_slot(pad, |s| s.mode = mode),
            Edit::Reset(pad) => {
                controller.reset_slot(pad);
                Ok(())
            }
            Edit::Side(button, mode, blink) => {
                controller.set_side(button, mode, blink);
                Ok(())
            }
            Edit::Tempo(bpm) => controller.set_tempo(bpm),
            Edit::FollowClock(on) => {
                controller.set_follow_clock(on);
                Ok(())
            }
            Edit::Scene(scene) => controller.set_scene(scene),
        };
        result.map_err(|e| e.to_string())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Line {
    Edit(Edit),
    Show(GridIndex),
    Save(String),
    Load(String),
    Help,
    Quit,
    Empty,
}

fn pad(word: Option<&str>) -> Result<GridIndex, String> {
    let word = word.ok_or("missing pad number")?;
    word.parse::<u8>()
        .ok()
        .and_then(GridIndex::new)
        .ok_or_else(|| format!("pad must be 0 to 63, got {word:?}"))
}

fn which(word: Option<&str>) -> Result<Which, String> {
    match word {
        Some("pressed") => Ok(Which::Pressed),
        Some("unpressed") => Ok(Which::Unpressed),
        other => Err(format!("expected pressed or unpressed, got {other:?}")),
    }
}

fn side_button(word: Option<&str>) -> Result<SideButton, String> {
    let word = word.ok_or("missing side button")?;
    let (row, n) = if let Some(n) = word.strip_prefix("track") {
        (0, n)
    } else if let Some(n) = word.strip_prefix("scene") {
        (8, n)
    } else {
        return Err(format!("unknown side button {word:?}"));
    };
    match n.parse::<usize>() {
        Ok(n @ 1..=8) => Ok(SideButton::ALL[row + n - 1]),
        _ => Err(format!("unknown side button {word:?}")),
    }
}

fn number<T: std::str::FromStr>(word: Option<&str>, what: &str) -> Result<T, String> {
    let word = word.ok_or_else(|| format!("missing {what}"))?;
    word.parse().map_err(|_| format!("invalid {what} {word:?}"))
}

fn animation<'a>(mut words: impl Iterator<Item = &'a str>) -> Result<AnimationSpec, String> {
    let kind = words.next().ok_or("missing animation")?;
    let spec = match kind {
        "static" => AnimationSpec::Static,
        "pulse" => AnimationSpec::Pulse {
            speed: words.next().unwrap_or("1/4").parse().map_err(|e| format!("{e}"))?,
        },
        "blink" => AnimationSpec::Blink {
            speed: words.next().unwrap_or("1/4").parse().map_err(|e| format!("{e}"))?,
        },
        name => AnimationSpec::Effect {
            name: name.to_string(),
            rate: words.next().map_or(Ok(1.0), |w| number(Some(w), "rate"))?,
        },
    };
    Ok(spec)
}

pub(crate) fn parse(line: &str) -> Result<Line, String> {
    let mut words = line.split_whitespace();
    let Some(command) = words.next() else {
        return Ok(Line::Empty);
    };
    let line = match command.to_ascii_lowercase().as_str() {
        "help" | "?" => Line::Help,
        "quit" | "exit" => Line::Quit,
        "show" => Line::Show(pad(words.next())?),
        "save" => Line::Save(number(words.next(), "file name")?),
        "load" => Line::Load(number(words.next(), "file name")?),
        other => Line::Edit(parse_edit(other, &mut words)?),
    };
    if let Some(extra) = words.next() {
        return Err(format!("unexpected {extra:?}"));
    }
    Ok(line)
}

fn parse_edit<'a>(command: &str, words: &mut impl Iterator<Item = &'a str>) -> Result<Edit, String> {
    let edit = match command {
        "color" => {
            let (p, w) = (pad(words.next())?, which(words.next())?);
            Edit::Color(p, w, words.next().ok_or("missing colour")?.parse()?)
        }
        "brightness" => {
            let (p, w) = (pad(words.next())?, which(words.next())?);
            let percent: u8 = number(words.next(), "brightness")?;
            let level = Brightness::from_percent(percent)
                .ok_or_else(|| format!("brightness must be 10 to 100, got {percent}"))?;
            Edit::Brightness(p, w, level)
        }
        "anim" => {
            let (p, w) = (pad(words.next())?, which(words.next())?);
            Edit::Animation(p, w, animation(&mut *words)?)
        }
        "mode" => Edit::Mode(pad(words.next())?, words.next().unwrap_or_default().parse()?),
        "reset" => Edit::Reset(pad(words.next())?),
        "side" => {
            let button = side_button(words.next())?;
            let mode = words.next().unwrap_or_default().parse()?;
            let blink = match words.next() {
                None => false,
                Some("blink") => true,
                Some(other) => return Err(format!("expected blink, got {other:?}")),
            };
            Edit::Side(button, mode, blink)
        }
        "tempo" => Edit::Tempo(number(words.next(), "tempo")?),
        "follow" => match words.next() {
            Some("on") => Edit::FollowClock(true),
            Some("off") => Edit::FollowClock(false),
            other => return Err(format!("expected on or off, got {other:?}")),
        },
        "scene" => match words.next() {
            Some("off") => Edit::Scene(None),
            Some(effect) => Edit::Scene(Some(SceneSpec {
                effect: effect.to_string(),
                speed: words.next().map_or(Ok(1.0), |w| number(Some(w), "speed"))?,
                seed: words.next().map_or(Ok(0), |w| number(Some(w), "seed"))?,
            })),
            None => return Err("missing scene name".to_string()),
        },
        other => return Err(format!("unknown command {other:?}, try help")),
    };
    Ok(edit)
}

/// Asks the engine thread for something and waits for the answer.
fn ask<T: Send + 'static>(
    commands: &Sender<Command>,
    f: impl FnOnce(&mut Controller) -> T + Send + 'static,
) -> Option<T> {
    let (tx, rx) = bounded(1);
    let command: Command = Box::new(move |controller: &mut Controller| {
        let _ = tx.send(f(controller));
    });
    commands.send(command).ok()?;
    rx.recv_timeout(Duration::from_secs(2)).ok()
}

fn run_line(line: Line, commands: &Sender<Command>, stop: &AtomicBool) -> Result<(), String> {
    match line {
        Line::Empty => {}
        Line::Help => println!("{HELP}"),
        Line::Quit => stop.store(true, Ordering::SeqCst),
        Line::Show(index) => {
            let slot = ask(commands, move |c| c.store().slot(index).clone()).ok_or("engine not responding")?;
            println!(
                "{index}: {} {:?}, pressed {} {}% {}, unpressed {} {}% {}",
                slot.mode,
                slot.state(),
                slot.pressed.color,
                slot.pressed.brightness.percent(),
                slot.pressed.animation,
                slot.unpressed.color,
                slot.unpressed.brightness.percent(),
                slot.unpressed.animation,
            );
        }
        Line::Save(path) => {
            let bytes = ask(commands, |c| c.save_profile())
                .ok_or("engine not responding")?
                .map_err(|e| e.to_string())?;
            std::fs::write(&path, bytes).map_err(|e| format!("{path}: {e}"))?;
            println!("saved {path}");
        }
        Line::Load(path) => {
            let bytes = std::fs::read(&path).map_err(|e| format!("{path}: {e}"))?;
            ask(commands, move |c| c.load_profile(&bytes))
                .ok_or("engine not responding")?
                .map_err(|e| format!("{path}: {e}"))?;
            println!("loaded {path}");
        }
        Line::Edit(edit) => ask(commands, move |c| edit.apply(c)).ok_or("engine not responding")??,
    }
    Ok(())
}

/// Reads commands from stdin until `quit`. End of input just stops reading,
/// so the driver keeps running when started without a terminal.
pub(crate) fn spawn(commands: Sender<Command>, stop: Arc<AtomicBool>) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new().name("apc-console".into()).spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            match parse(&line).and_then(|l| run_line(l, &commands, &stop)) {
                Ok(()) => {}
                Err(e) => println!("error: {e}"),
            }
            if stop.load(Ordering::SeqCst) {
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use apc_library::animation::{BlinkSpeed, PulseSpeed};
    use apc_library::lights::PadColors;

    fn pad(i: u8) -> GridIndex {
        GridIndex::new(i).unwrap()
    }

    fn edit(line: &str) -> Edit {
        match parse(line) {
            Ok(Line::Edit(edit)) => edit,
            other => panic!("{line:?} parsed as {other:?}"),
        }
    }

    #[test]
    fn parses_pad_edits() {
        assert_eq!(
            edit("color 5 pressed #ff0000"),
            Edit::Color(pad(5), Which::Pressed, Rgb::new(255, 0, 0))
        );
        assert_eq!(
            edit("color 63 unpressed blue"),
            Edit::Color(pad(63), Which::Unpressed, PadColors::Blue.rgb())
        );
        assert_eq!(
            edit("brightness 0 pressed 70"),
            Edit::Brightness(pad(0), Which::Pressed, Brightness::Percent75)
        );
        assert_eq!(
            edit("anim 9 unpressed pulse 1/8"),
            Edit::Animation(
                pad(9),
                Which::Unpressed,
                AnimationSpec::Pulse {
                    speed: PulseSpeed::Eighth
                }
            )
        );
        assert_eq!(
            edit("anim 9 pressed blink 1/24"),
            Edit::Animation(
                pad(9),
                Which::Pressed,
                AnimationSpec::Blink {
                    speed: BlinkSpeed::TwentyFourth
                }
            )
        );
        assert_eq!(
            edit("anim 1 pressed breathe 2"),
            Edit::Animation(
                pad(1),
                Which::Pressed,
                AnimationSpec::Effect {
                    name: "breathe".into(),
                    rate: 2.0
                }
            )
        );
        assert_eq!(edit("mode 3 flash"), Edit::Mode(pad(3), ButtonMode::Flash));
    }

    #[test]
    fn parses_globals_and_side() {
        assert_eq!(edit("tempo 128.5"), Edit::Tempo(128.5));
        assert_eq!(edit("follow on"), Edit::FollowClock(true));
        assert_eq!(edit("scene off"), Edit::Scene(None));
        assert_eq!(
            edit("scene fireworks 2 7"),
            Edit::Scene(Some(SceneSpec {
                effect: "fireworks".into(),
                speed: 2.0,
                seed: 7
            }))
        );
        assert_eq!(
            edit("side scene3 flash blink"),
            Edit::Side(SideButton::Scene3, ButtonMode::Flash, true)
        );
        assert_eq!(
            edit("side track8 toggle"),
            Edit::Side(SideButton::Track8, ButtonMode::Toggle, false)
        );
    }

    #[test]
    fn rejects_bad_lines() {
        for line in [
            "color 64 pressed red",
            "color 1 sideways red",
            "brightness 1 pressed 150",
            "anim 1 pressed pulse 1/3",
            "side track9 toggle",
            "side shift toggle",
            "tempo fast",
            "reset 1 2",
            "save a.json b.json",
            "load a.json extra",
            "show 3 4",
            "quit now",
            "frobnicate",
        ] {
            assert!(parse(line).is_err(), "{line:?} should not parse");
        }
        assert_eq!(parse("   "), Ok(Line::Empty));
        assert_eq!(parse("quit"), Ok(Line::Quit));
    }

    #[test]
    fn edits_go_through_store_validation() {
        let mut controller = Controller::with_builtins();
        edit("color 4 unpressed green").apply(&mut controller).unwrap();
        assert_eq!(
            controller.store().slot(pad(4)).unpressed.color,
            PadColors::Green.rgb()
        );
        assert!(edit("tempo 900").apply(&mut controller).is_err());
        assert!(edit("anim 2 pressed nosuchkind").apply(&mut controller).is_err());
        assert!(edit("scene nosuchscene").apply(&mut controller).is_err());
    }
}
