use crate::controls::{GridIndex, SideButton};
use crate::error::CodecError;
use crate::lights::{Brightness, FrameCommand, PadColors, SideLed};
use midly::live::{LiveEvent, SystemRealtime};
use midly::MidiMessage;
use std::fmt;
use std::str::FromStr;

const NOTE_ON: u8 = 0x90;

// RGB SysEx: F0 47 7F 4F 24 <len hi> <len lo> <start pad> <end pad>
//            <R hi> <R lo> <G hi> <G lo> <B hi> <B lo> F7
// Each 8-bit channel is split into its top bit and low seven bits.
const SYSEX_HEADER: [u8; 5] = [0xF0, 0x47, 0x7F, 0x4F, 0x24];
const SYSEX_RANGE_LEN: u8 = 8;
const SYSEX_END: u8 = 0xF7;

/// How pad colours are put on the wire.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ColorEncoding {
    /// Note On with the velocity picking the nearest palette entry and the
    /// channel picking the brightness level. 3 bytes per pad.
    #[default]
    Palette,
    /// Full RGB via SysEx, brightness folded into the colour. 16 bytes per pad.
    Sysex,
}

impl fmt::Display for ColorEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColorEncoding::Palette => write!(f, "palette"),
            ColorEncoding::Sysex => write!(f, "sysex"),
        }
    }
}

impl FromStr for ColorEncoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "palette" => Ok(ColorEncoding::Palette),
            "sysex" | "rgb" => Ok(ColorEncoding::Sysex),
            other => Err(format!("invalid color_encoding={other:?} (expected: \"palette\", \"sysex\")")),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GridEvent {
    pub index: GridIndex,
    pub pressed: bool,
    pub velocity: u8,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SideEvent {
    pub button: SideButton,
    pub pressed: bool,
}

/// System real-time traffic that shares the input port with the pads.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    Clock,
    Start,
    Continue,
    Stop,
    ActiveSensing,
    Reset,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decoded {
    Grid(GridEvent),
    Side(SideEvent),
    Transport(TransportEvent),
    Unrecognized(CodecError),
}

pub fn decode(message: &[u8]) -> Decoded {
    if message.is_empty() {
        return Decoded::Unrecognized(CodecError::Empty);
    }
    // Identity replies and other SysEx from the device aren't acted on.
    if message[0] == 0xF0 {
        return Decoded::Unrecognized(CodecError::Unsupported(format!(
            "SysEx ({} bytes)",
            message.len()
        )));
    }

    let event = match LiveEvent::parse(message) {
        Ok(event) => event,
        Err(e) => return Decoded::Unrecognized(CodecError::Malformed(e.to_string())),
    };

    match event {
        LiveEvent::Midi { message, .. } => match message {
            MidiMessage::NoteOn { key, vel } => note_event(key.as_int(), vel.as_int(), vel.as_int() > 0),
            MidiMessage::NoteOff { key, vel } => note_event(key.as_int(), vel.as_int(), false),
            other => Decoded::Unrecognized(CodecError::Unsupported(format!("{other:?}"))),
        },
        LiveEvent::Realtime(rt) => match rt {
            SystemRealtime::TimingClock => Decoded::Transport(TransportEvent::Clock),
            SystemRealtime::Start => Decoded::Transport(TransportEvent::Start),
            SystemRealtime::Continue => Decoded::Transport(TransportEvent::Continue),
            SystemRealtime::Stop => Decoded::Transport(TransportEvent::Stop),
            SystemRealtime::ActiveSensing => Decoded::Transport(TransportEvent::ActiveSensing),
            SystemRealtime::Reset => Decoded::Transport(TransportEvent::Reset),
            other => Decoded::Unrecognized(CodecError::Unsupported(format!("{other:?}"))),
        },
        LiveEvent::Common(common) => Decoded::Unrecognized(CodecError::Unsupported(format!("{common:?}"))),
    }
}

fn note_event(note: u8, velocity: u8, pressed: bool) -> Decoded {
    if let Some(index) = GridIndex::new(note) {
        return Decoded::Grid(GridEvent {
            index,
            pressed,
            velocity,
        });
    }
    if let Some(button) = SideButton::from_note(note) {
        return Decoded::Side(SideEvent { button, pressed });
    }
    Decoded::Unrecognized(CodecError::UnmappedNote(note))
}

/// Wire bytes for one pad. The same command always yields the same bytes.
pub fn encode(command: &FrameCommand, encoding: ColorEncoding) -> Vec<u8> {
    match encoding {
        ColorEncoding::Palette => encode_palette(command).to_vec(),
        ColorEncoding::Sysex => encode_sysex(command).to_vec(),
    }
}

fn encode_palette(command: &FrameCommand) -> [u8; 3] {
    let note = command.index.get();
    if command.is_dark() {
        return [NOTE_ON, note, PadColors::Off.velocity()];
    }
    let color = PadColors::nearest(command.rgb);
    let level = Brightness::quantize(command.brightness);
    [NOTE_ON | level.channel(), note, color.velocity()]
}

fn encode_sysex(command: &FrameCommand) -> [u8; 16] {
    let pad = command.index.get();
    let rgb = command.rgb.scaled(command.brightness);
    let split = |c: u8| [c >> 7, c & 0x7F];
    let [r_hi, r_lo] = split(rgb.r);
    let [g_hi, g_lo] = split(rgb.g);
    let [b_hi, b_lo] = split(rgb.b);
    let h = SYSEX_HEADER;
    [
        h[0], h[1], h[2], h[3], h[4], 0x00, SYSEX_RANGE_LEN, pad, pad, r_hi, r_lo, g_hi, g_lo, b_hi, b_lo,
        SYSEX_END,
    ]
}

/// Side buttons only take off/on/blink on channel 0.
pub fn encode_side(button: SideButton, led: SideLed) -> [u8; 3] {
    [NOTE_ON, button.note(), led.velocity()]
}
