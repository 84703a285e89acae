use super::{AnimationRegistry, Cell, CellInput};
use crate::error::RenderError;
use crate::lights::Rgb;
use std::f64::consts::{E, TAU};

pub(super) fn register(registry: &mut AnimationRegistry) {
    registry.register_cell("static", solid);
    registry.register_cell("pulse", pulse);
    registry.register_cell("blink", blink);
    registry.register_cell("breathe", breathe);
    registry.register_cell("hue_cycle", hue_cycle);
    registry.register_cell("strobe", strobe);
}

fn cycle(input: &CellInput) -> Result<f64, RenderError> {
    if !input.phase.is_finite() {
        return Err(RenderError::NonFinite("phase"));
    }
    Ok(input.phase.rem_euclid(1.0))
}

fn dimmed(input: &CellInput, level: f64) -> Cell {
    let brightness = (f64::from(input.brightness) * level.clamp(0.0, 1.0)).round() as u8;
    Cell::new(input.color, brightness)
}

fn solid(input: &CellInput) -> Result<Cell, RenderError> {
    Ok(Cell::new(input.color, input.brightness))
}

/// Raised cosine, dark at the start of each cycle and full at mid-cycle.
fn pulse(input: &CellInput) -> Result<Cell, RenderError> {
    let t = cycle(input)?;
    Ok(dimmed(input, 0.5 - 0.5 * (TAU * t).cos()))
}

fn blink(input: &CellInput) -> Result<Cell, RenderError> {
    let t = cycle(input)?;
    Ok(dimmed(input, if t < 0.5 { 1.0 } else { 0.0 }))
}

fn breathe(input: &CellInput) -> Result<Cell, RenderError> {
    let t = cycle(input)?;
    // exp(sin) spends longer near the dark end than a plain sine does.
    let raw = ((TAU * t - TAU / 4.0).sin()).exp();
    let level = (raw - 1.0 / E) / (E - 1.0 / E);
    Ok(dimmed(input, level))
}

fn hue_cycle(input: &CellInput) -> Result<Cell, RenderError> {
    let t = cycle(input)?;
    let (hue, saturation, value) = input.color.to_hsv();
    let rgb = Rgb::from_hsv(hue + t, saturation, value);
    Ok(Cell::new(rgb, input.brightness))
}

fn strobe(input: &CellInput) -> Result<Cell, RenderError> {
    let t = cycle(input)?;
    Ok(dimmed(input, if t < 0.1 { 1.0 } else { 0.0 }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(phase: f64) -> CellInput {
        CellInput {
            phase,
            color: Rgb::new(255, 0, 0),
            brightness: 90,
        }
    }

    #[test]
    fn pulse_shape() {
        assert_eq!(pulse(&input(0.0)).unwrap().brightness, 0);
        assert_eq!(pulse(&input(0.5)).unwrap().brightness, 90);
        assert_eq!(pulse(&input(0.25)).unwrap().brightness, 45);
        assert_eq!(pulse(&input(3.5)), pulse(&input(0.5)));
    }

    #[test]
    fn breathe_bounds() {
        assert_eq!(breathe(&input(0.0)).unwrap().brightness, 0);
        assert_eq!(breathe(&input(0.5)).unwrap().brightness, 90);
    }

    #[test]
    fn hue_cycle_rotates_colour_only() {
        let third = hue_cycle(&input(1.0 / 3.0)).unwrap();
        assert_eq!(third.rgb, Rgb::new(0, 255, 0));
        assert_eq!(third.brightness, 90);
        assert_eq!(hue_cycle(&input(0.0)).unwrap().rgb, Rgb::new(255, 0, 0));
    }

    #[test]
    fn strobe_and_blink_duty() {
        assert_eq!(strobe(&input(0.05)).unwrap().brightness, 90);
        assert_eq!(strobe(&input(0.2)).unwrap().brightness, 0);
        assert_eq!(blink(&input(0.49)).unwrap().brightness, 90);
        assert_eq!(blink(&input(0.51)).unwrap().brightness, 0);
    }

    #[test]
    fn non_finite_phase_is_an_error() {
        assert_eq!(pulse(&input(f64::NAN)), Err(RenderError::NonFinite("phase")));
        assert_eq!(solid(&input(f64::INFINITY)).unwrap().brightness, 90);
    }
}
