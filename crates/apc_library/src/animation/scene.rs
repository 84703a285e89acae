//! Grid-wide effects. Each one is a pure function of scene time and seed:
//! anything that looks random draws from a generator seeded with the seed
//! and the current step, so replaying the same times replays the same
//! frames no matter how ticks were spaced.

use super::{AnimationRegistry, Cell};
use crate::controls::{GRID_HEIGHT, GRID_WIDTH, PAD_COUNT};
use crate::lights::{Brightness, PadColors, Rgb};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::{PI, TAU};

pub type GridFrame = [Cell; PAD_COUNT];

pub const MIN_SPEED: f64 = 0.25;
pub const MAX_SPEED: f64 = 4.0;

/// Which effect drives the whole grid, how fast, and from which seed.
#[derive(Clone, Debug, PartialEq)]
pub struct SceneSpec {
    pub effect: String,
    pub speed: f64,
    pub seed: u64,
}

pub struct SceneInput {
    /// Seconds since the engine started, already multiplied by the speed.
    pub time: f64,
    pub seed: u64,
    /// Each pad's current base colour, for effects that tint with it.
    pub base: [Rgb; PAD_COUNT],
}

pub(super) fn register(registry: &mut AnimationRegistry) {
    registry.register_scene("rainbow", rainbow);
    registry.register_scene("wave", wave);
    registry.register_scene("rain", rain);
    registry.register_scene("snake", snake);
    registry.register_scene("ripple", ripple);
    registry.register_scene("random", random);
    registry.register_scene("spiral", spiral);
    registry.register_scene("fireworks", fireworks);
    registry.register_scene("pulse", pulse);
    registry.register_scene("color_wipe", color_wipe);
    registry.register_scene("energy_field", energy_field);
    registry.register_scene("bounce", bounce);
    registry.register_scene("sparkle", sparkle);
    registry.register_scene("dna_helix", dna_helix);
    registry.register_scene("chase", chase);
    registry.register_scene("tetris", tetris);
    registry.register_scene("laser", laser);
    registry.register_scene("galaxy", galaxy);
    registry.register_scene("piano", piano);
    registry.register_scene("equalizer", equalizer);
}

fn blank() -> GridFrame {
    [Cell::OFF; PAD_COUNT]
}

fn index(row: i32, col: i32) -> Option<usize> {
    let in_grid = (0..GRID_HEIGHT as i32).contains(&row) && (0..GRID_WIDTH as i32).contains(&col);
    in_grid.then(|| row as usize * GRID_WIDTH + col as usize)
}

/// `channel` counts brightness the way the hardware does, 0..=6.
fn paint(frame: &mut GridFrame, row: i32, col: i32, color: PadColors, channel: i32) {
    paint_rgb(frame, row, col, color.rgb(), channel);
}

fn paint_rgb(frame: &mut GridFrame, row: i32, col: i32, rgb: Rgb, channel: i32) {
    if let Some(i) = index(row, col) {
        frame[i] = if rgb.is_black() {
            Cell::OFF
        } else {
            Cell::new(rgb, Brightness::level(channel).percent())
        };
    }
}

fn cells() -> impl Iterator<Item = (i32, i32)> {
    (0..GRID_HEIGHT as i32).flat_map(|row| (0..GRID_WIDTH as i32).map(move |col| (row, col)))
}

fn step(time: f64, interval: f64) -> u64 {
    (time / interval).floor().max(0.0) as u64
}

fn splitmix(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^ (x >> 31)
}

/// Generator for one `(stream, n)` pair under `seed`.
fn rng(seed: u64, stream: u64, n: u64) -> StdRng {
    StdRng::seed_from_u64(splitmix(seed ^ splitmix(stream.wrapping_mul(0x1000_0001) ^ splitmix(n))))
}

fn rainbow(input: &SceneInput) -> GridFrame {
    const COLORS: [PadColors; 5] = [
        PadColors::Red,
        PadColors::Orange,
        PadColors::Yellow,
        PadColors::Green,
        PadColors::Blue,
    ];
    const STEPS: i32 = 6;
    const TOTAL: i32 = STEPS * COLORS.len() as i32;

    let offset = (step(input.time, 0.08) % TOTAL as u64) as i32;
    let mut frame = blank();
    for (row, col) in cells() {
        let pos = (col + row + offset) % TOTAL;
        let color_pos = f64::from(pos) / f64::from(STEPS);
        let color = COLORS[color_pos as usize];
        let channel = match color_pos.fract() {
            f if f < 0.33 => 6,
            f if f < 0.66 => 5,
            _ => 4,
        };
        paint(&mut frame, row, col, color, channel);
    }
    frame
}

fn wave(input: &SceneInput) -> GridFrame {
    const COLORS: [PadColors; 3] = [PadColors::Blue, PadColors::Green, PadColors::Yellow];
    const LENGTH: i32 = 12;

    let offset = (step(input.time, 0.05) % LENGTH as u64) as i32;
    let mut frame = blank();
    for (row, col) in cells() {
        let pos = (col + row + offset) % LENGTH;
        let w = (TAU * f64::from(pos) / f64::from(LENGTH)).sin();
        let color = ((w + 1.0) * COLORS.len() as f64 / 2.0) as usize;
        let channel = ((6.0 * (w + 1.0) / 2.0) as i32).clamp(3, 6);
        paint(&mut frame, row, col, COLORS[color.min(COLORS.len() - 1)], channel);
    }
    frame
}

fn rain(input: &SceneInput) -> GridFrame {
    const DROPS_PER_STEP: usize = 3;

    let now = step(input.time, 0.1);
    let mut frame = blank();
    for age in 0..GRID_HEIGHT as u64 {
        let Some(spawned) = now.checked_sub(age) else {
            continue;
        };
        let mut r = rng(input.seed, 1, spawned);
        let row = GRID_HEIGHT as i32 - 1 - age as i32;
        let channel = (6 - age as i32).max(1);
        for _ in 0..DROPS_PER_STEP {
            let col = r.gen_range(0..GRID_WIDTH as i32);
            paint(&mut frame, row, col, PadColors::LightBlue, channel);
        }
    }
    frame
}

/// Clockwise walk around the grid edge starting bottom-left.
fn perimeter() -> Vec<(i32, i32)> {
    let last = GRID_WIDTH as i32 - 1;
    let mut path = Vec::with_capacity(28);
    path.extend((0..=last).map(|col| (0, col)));
    path.extend((1..=last).map(|row| (row, last)));
    path.extend((0..last).rev().map(|col| (last, col)));
    path.extend((1..last).rev().map(|row| (row, 0)));
    path
}

fn snake(input: &SceneInput) -> GridFrame {
    const LENGTH: u64 = 5;

    let path = perimeter();
    let n = path.len() as u64;
    let s = step(input.time, 0.1);
    let head = s % n;
    let mut frame = blank();
    for i in 0..(s + 1).min(LENGTH) {
        let (row, col) = path[((head + n - i) % n) as usize];
        let color = if i == 0 { PadColors::Red } else { PadColors::DarkRed };
        paint(&mut frame, row, col, color, 6);
    }
    frame
}

fn ripple(input: &SceneInput) -> GridFrame {
    let radius = (step(input.time, 0.05) % 12) as f64;
    let mut frame = blank();
    for (row, col) in cells() {
        let distance = (f64::from(row) - 3.5).hypot(f64::from(col) - 3.5);
        let w = (distance - radius / 2.0).sin();
        let color = if w > 0.5 {
            PadColors::DarkLime
        } else if w > 0.0 {
            PadColors::Blue
        } else if w > -0.5 {
            PadColors::DarkBlue
        } else {
            PadColors::Off
        };
        paint(&mut frame, row, col, color, 6);
    }
    frame
}

/// One random pad takes a random colour every step and keeps it until
/// picked again.
fn random(input: &SceneInput) -> GridFrame {
    const LOOKBACK: u64 = 512;

    let colors = &PadColors::ALL[1..];
    let now = step(input.time, 0.05);
    let mut frame = blank();
    let mut assigned = [false; PAD_COUNT];
    let mut remaining = PAD_COUNT;
    for back in 0..=now.min(LOOKBACK) {
        let mut r = rng(input.seed, 2, now - back);
        let pad = r.gen_range(0..PAD_COUNT);
        let color = colors[r.gen_range(0..colors.len())];
        if !assigned[pad] {
            assigned[pad] = true;
            frame[pad] = Cell::new(color.rgb(), Brightness::Percent100.percent());
            remaining -= 1;
            if remaining == 0 {
                break;
            }
        }
    }
    frame
}

fn spiral(input: &SceneInput) -> GridFrame {
    const COLORS: [PadColors; 5] = [
        PadColors::Red,
        PadColors::Orange,
        PadColors::Yellow,
        PadColors::Green,
        PadColors::Blue,
    ];

    let angle = ((step(input.time, 0.01) * 6) % 360) as f64;
    let mut frame = blank();
    for (row, col) in cells() {
        let dx = f64::from(col) - 3.5;
        let dy = f64::from(row) - 3.5;
        let distance = dx.hypot(dy);
        let theta = dy.atan2(dx).to_degrees();
        let color = ((theta + angle).rem_euclid(360.0) * COLORS.len() as f64 / 360.0) as usize;
        let channel = 6 - (distance as i32).min(3);
        paint(&mut frame, row, col, COLORS[color.min(COLORS.len() - 1)], channel);
    }
    frame
}

fn fireworks(input: &SceneInput) -> GridFrame {
    const COLORS: [PadColors; 4] = [PadColors::Red, PadColors::Blue, PadColors::Green, PadColors::Yellow];
    const RISE: f64 = 0.4;
    const BURST: f64 = 0.25;
    const HOLD: f64 = 0.2;
    const DARK: f64 = 0.3;
    const CYCLE: f64 = RISE + BURST + HOLD + DARK;

    let n = step(input.time, CYCLE);
    let local = input.time - n as f64 * CYCLE;
    let mut r = rng(input.seed, 3, n);
    let col = r.gen_range(0..GRID_WIDTH as i32);
    let color = COLORS[r.gen_range(0..COLORS.len())];
    let center_row = r.gen_range(4..GRID_HEIGHT as i32);

    let mut frame = blank();
    if local < RISE {
        let row = step(local, 0.05) as i32;
        paint(&mut frame, row, col, color, 6);
    } else if local < RISE + BURST + HOLD {
        let reached = (step(local - RISE, 0.05) as i32).min(4);
        for radius in 0..=reached {
            for (row, c) in cells() {
                if (row - center_row).abs() + (c - col).abs() == radius {
                    paint(&mut frame, row, c, color, 6 - radius);
                }
            }
        }
    }
    frame
}

/// Whole grid breathing through the seven brightness levels. Pads with a
/// base colour keep it; the rest cycle red, blue and green.
fn pulse(input: &SceneInput) -> GridFrame {
    const COLORS: [PadColors; 3] = [PadColors::Red, PadColors::Blue, PadColors::Green];

    let k = (step(input.time, 0.05) % 14) as i32;
    let channel = if k < 7 { k } else { 13 - k };
    let mut frame = blank();
    for (row, col) in cells() {
        let i = row as usize * GRID_WIDTH + col as usize;
        let rgb = if input.base[i].is_black() {
            COLORS[i % COLORS.len()].rgb()
        } else {
            input.base[i]
        };
        paint_rgb(&mut frame, row, col, rgb, channel);
    }
    frame
}

fn color_wipe(input: &SceneInput) -> GridFrame {
    const COLORS: [PadColors; 4] = [PadColors::Red, PadColors::Yellow, PadColors::Green, PadColors::Blue];
    const PASS: f64 = 0.5;

    let pass = step(input.time, PASS);
    let local = input.time - pass as f64 * PASS;
    let current = COLORS[(pass % 4) as usize];
    let previous = if pass == 0 {
        PadColors::Off
    } else {
        COLORS[((pass + 3) % 4) as usize]
    };
    let edge = (step(local, 0.05) as i32).min(GRID_WIDTH as i32 - 1);
    let mut frame = blank();
    for (row, col) in cells() {
        let color = if col <= edge { current } else { previous };
        paint(&mut frame, row, col, color, 6);
    }
    frame
}

fn energy_field(input: &SceneInput) -> GridFrame {
    const COLORS: [PadColors; 4] = [
        PadColors::Blue,
        PadColors::LightBlue,
        PadColors::Green,
        PadColors::LightGreen,
    ];

    let mut r = rng(input.seed, 4, 0);
    let points: Vec<(f64, f64)> = (0..3)
        .map(|_| {
            let (x0, y0): (f64, f64) = (r.gen_range(0.0..7.0), r.gen_range(0.0..7.0));
            let (wx, wy): (f64, f64) = (r.gen_range(0.2..0.6), r.gen_range(0.2..0.6));
            let (px, py): (f64, f64) = (r.gen_range(0.0..TAU), r.gen_range(0.0..TAU));
            let x = (x0 + 0.8 * (input.time * wx + px).sin()).clamp(0.0, 7.0);
            let y = (y0 + 0.8 * (input.time * wy + py).sin()).clamp(0.0, 7.0);
            (x, y)
        })
        .collect();
    let offset = input.time * 4.0;

    let mut frame = blank();
    for (row, col) in cells() {
        let mut energy = 0.0;
        for &(x, y) in &points {
            let distance = (f64::from(row) - y).hypot(f64::from(col) - x);
            energy += (distance + offset).sin() / (distance + 1.0);
        }
        let energy = (energy + 3.0) / 6.0;
        let color = ((energy * COLORS.len() as f64) as usize).min(COLORS.len() - 1);
        let channel = ((energy * 6.0) as i32).clamp(3, 6);
        paint(&mut frame, row, col, COLORS[color], channel);
    }
    frame
}

fn bounce(input: &SceneInput) -> GridFrame {
    const HOP: f64 = 0.9;

    let p = (step(input.time, 0.05) % 14) as i32;
    let col = if p <= 7 { p } else { 14 - p };
    let t = input.time.rem_euclid(HOP) / HOP;
    let row = (7.0 * 4.0 * t * (1.0 - t)).round() as i32;
    let mut frame = blank();
    paint(&mut frame, row, col, PadColors::Yellow, 6);
    frame
}

fn sparkle(input: &SceneInput) -> GridFrame {
    const COLORS: [PadColors; 2] = [PadColors::White, PadColors::Yellow];

    let mut r = rng(input.seed, 5, step(input.time, 0.15));
    let mut frame = blank();
    for _ in 0..3 {
        let pad = r.gen_range(0..PAD_COUNT);
        let color = COLORS[r.gen_range(0..COLORS.len())];
        frame[pad] = Cell::new(color.rgb(), Brightness::Percent100.percent());
    }
    frame
}

fn dna_helix(input: &SceneInput) -> GridFrame {
    const COLORS: [PadColors; 2] = [PadColors::Red, PadColors::Blue];
    const HEIGHT: f64 = 4.0;
    const LENGTH: f64 = 12.0;

    let offset = input.time * 4.0;
    let mut frame = blank();
    for strand in 0..2 {
        let phase = PI * strand as f64;
        for x in 0..16 {
            let xf = f64::from(x);
            let y = HEIGHT * ((xf / LENGTH) * TAU + offset + phase).sin();
            let col = (x / 2) % GRID_WIDTH as i32;
            let row = (3.5 + y).trunc() as i32;
            let channel = 4 + (2.0 * (xf / 4.0).sin().abs()) as i32;
            if index(row, col).is_some() {
                paint(&mut frame, row, col, COLORS[strand], channel);
                if strand == 0 && x % 4 == 0 {
                    let rung = (3.5 - y / 2.0).trunc() as i32;
                    paint(&mut frame, rung, col, PadColors::Yellow, 5);
                }
            }
        }
    }
    frame
}

fn chase(input: &SceneInput) -> GridFrame {
    const COLORS: [PadColors; 3] = [PadColors::Red, PadColors::Blue, PadColors::Green];
    const TAIL: u64 = 5;

    let color = COLORS[rng(input.seed, 6, 0).gen_range(0..COLORS.len())];
    let n = PAD_COUNT as u64;
    let head = step(input.time, 0.05) % n;
    let mut frame = blank();
    for i in 0..TAIL {
        let pad = ((head + n - i) % n) as usize;
        let channel = (6 - i as i32).max(1);
        frame[pad] = Cell::new(color.rgb(), Brightness::level(channel).percent());
    }
    frame
}

struct Block {
    start: i32,
    width: i32,
    color: PadColors,
}

fn tetris_block(seed: u64, n: u64) -> Block {
    const COLORS: [PadColors; 4] = [PadColors::Red, PadColors::Blue, PadColors::Green, PadColors::Yellow];
    let mut r = rng(seed, 7, n);
    let width = r.gen_range(2..=4);
    Block {
        start: r.gen_range(0..=GRID_WIDTH as i32 - width),
        width,
        color: COLORS[r.gen_range(0..COLORS.len())],
    }
}

/// Blocks fall one row per step and pile into the bottom row, newest on top.
fn tetris(input: &SceneInput) -> GridFrame {
    const CYCLE: f64 = 1.0;
    const KEEP: u64 = 8;

    let n = step(input.time, CYCLE);
    let local = input.time - n as f64 * CYCLE;
    let mut frame = blank();
    for landed in n.saturating_sub(KEEP)..n {
        let block = tetris_block(input.seed, landed);
        for col in block.start..block.start + block.width {
            paint(&mut frame, 0, col, block.color, 6);
        }
    }
    let block = tetris_block(input.seed, n);
    let fallen = (step(local, 0.1) as i32).min(GRID_HEIGHT as i32 - 1);
    for col in block.start..block.start + block.width {
        paint(&mut frame, GRID_HEIGHT as i32 - 1 - fallen, col, block.color, 6);
    }
    frame
}

fn laser(input: &SceneInput) -> GridFrame {
    const CHARGE: f64 = 0.5;
    const SHOT: f64 = 0.24;
    const HOLD: f64 = 0.1;
    const DARK: f64 = 0.2;
    const CYCLE: f64 = CHARGE + SHOT + HOLD + DARK;

    let n = step(input.time, CYCLE);
    let local = input.time - n as f64 * CYCLE;
    let col = rng(input.seed, 8, n).gen_range(0..GRID_WIDTH as i32);
    let mut frame = blank();
    let beam = |frame: &mut GridFrame, rows: i32| {
        for row in 0..rows {
            paint(frame, row, col, PadColors::Red, 6);
            paint(frame, row, col - 1, PadColors::Orange, 4);
            paint(frame, row, col + 1, PadColors::Orange, 4);
        }
    };
    if local < CHARGE {
        paint(&mut frame, 0, col, PadColors::Red, 3 + step(local, 0.1) as i32);
    } else if local < CHARGE + SHOT {
        let reached = (step(local - CHARGE, 0.03) as i32).min(GRID_HEIGHT as i32 - 1);
        beam(&mut frame, reached + 1);
    } else if local < CHARGE + SHOT + HOLD {
        beam(&mut frame, GRID_HEIGHT as i32);
    }
    frame
}

fn galaxy(input: &SceneInput) -> GridFrame {
    const STARS: usize = 10;

    let mut r = rng(input.seed, 9, 0);
    let mut frame = blank();
    for _ in 0..STARS {
        let (x, y): (f64, f64) = (r.gen_range(0.0..7.0), r.gen_range(0.0..7.0));
        let start: f64 = r.gen_range(0.0..TAU);
        let speed: f64 = r.gen_range(0.02..0.06);
        let radius = (x - 3.5).hypot(y - 3.5);
        // Outer stars orbit slower.
        let angle = start + speed / (radius + 0.5) * (input.time / 0.1);
        let px = 3.5 + radius * angle.cos();
        let py = 3.5 + radius * angle.sin();
        if (0.0..8.0).contains(&px) && (0.0..8.0).contains(&py) {
            let color = if radius < 2.0 { PadColors::White } else { PadColors::Yellow };
            paint(&mut frame, py as i32, px as i32, color, 6 - (radius as i32).min(3));
        }
    }
    frame
}

fn piano(input: &SceneInput) -> GridFrame {
    const PRESS: f64 = 0.16;
    const RELEASE: f64 = 0.16;
    const PAUSE: f64 = 0.1;
    const CYCLE: f64 = PRESS + RELEASE + PAUSE;
    const KEEP: u64 = 8;

    let key = |n: u64| rng(input.seed, 10, n).gen_range(0..GRID_WIDTH as i32);
    let color = |col: i32| if col % 2 == 0 { PadColors::White } else { PadColors::Blue };

    let n = step(input.time, CYCLE);
    let local = input.time - n as f64 * CYCLE;
    let mut frame = blank();
    for played in n.saturating_sub(KEEP)..n {
        let col = key(played);
        for row in 0..GRID_HEIGHT as i32 {
            paint(&mut frame, row, col, color(col), 3);
        }
    }

    let col = key(n);
    let top = GRID_HEIGHT as i32 - 1;
    if local < PRESS {
        let reached = (step(local, 0.02) as i32).min(top);
        for row in 0..=reached {
            paint(&mut frame, row, col, color(col), 6);
        }
    } else {
        let released = if local < PRESS + RELEASE {
            (step(local - PRESS, 0.02) as i32).min(top)
        } else {
            top
        };
        for row in 0..=top {
            let channel = if row >= top - released { 3 } else { 6 };
            paint(&mut frame, row, col, color(col), channel);
        }
    }
    frame
}

fn equalizer(input: &SceneInput) -> GridFrame {
    const SEGMENT: u64 = 10;

    let s = step(input.time, 0.05);
    let segment = s / SEGMENT;
    let progress = (s % SEGMENT) as i32;
    let target = |col: i32, seg: u64| rng(input.seed, 11, seg * GRID_WIDTH as u64 + col as u64).gen_range(0..8);

    let mut frame = blank();
    for col in 0..GRID_WIDTH as i32 {
        let from = if segment == 0 { 0 } else { target(col, segment - 1) };
        let to = target(col, segment);
        let level = if to >= from {
            (from + progress).min(to)
        } else {
            (from - progress).max(to)
        };
        for row in 0..=level {
            let color = match row {
                0..=2 => PadColors::Green,
                3..=4 => PadColors::Yellow,
                _ => PadColors::Red,
            };
            paint(&mut frame, row, col, color, 6);
        }
    }
    frame
}
