use num_derive::FromPrimitive;
use std::fmt;

pub const GRID_WIDTH: usize = 8;
pub const GRID_HEIGHT: usize = 8;
pub const PAD_COUNT: usize = GRID_WIDTH * GRID_HEIGHT;
pub const SIDE_COUNT: usize = 17;

/// One of the 64 RGB pads. Index 0 is bottom-left, 63 is top-right, and the
/// index doubles as the pad's MIDI note number.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GridIndex(u8);

impl GridIndex {
    pub fn new(index: u8) -> Option<Self> {
        (usize::from(index) < PAD_COUNT).then_some(Self(index))
    }

    pub fn from_row_col(row: usize, col: usize) -> Option<Self> {
        if row < GRID_HEIGHT && col < GRID_WIDTH {
            Some(Self((row * GRID_WIDTH + col) as u8))
        } else {
            None
        }
    }

    /// The pad's index, which is also its note number.
    pub fn get(self) -> u8 {
        self.0
    }

    pub fn as_usize(self) -> usize {
        usize::from(self.0)
    }

    pub fn row(self) -> usize {
        self.as_usize() / GRID_WIDTH
    }

    pub fn col(self) -> usize {
        self.as_usize() % GRID_WIDTH
    }

    pub fn all() -> impl Iterator<Item = GridIndex> {
        (0..PAD_COUNT as u8).map(GridIndex)
    }

    /// Builds a per-pad array, calling `f` once for each pad in index order.
    pub fn array<T>(mut f: impl FnMut(GridIndex) -> T) -> [T; PAD_COUNT] {
        std::array::from_fn(|i| f(GridIndex(i as u8)))
    }
}

impl fmt::Display for GridIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pad {} (row {}, col {})", self.0, self.row(), self.col())
    }
}

/// Fixed-function buttons around the grid. Discriminants are the note
/// numbers the device sends and listens on (channel 0).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, FromPrimitive)]
#[repr(u8)]
pub enum SideButton {
    Track1 = 0x64,
    Track2 = 0x65,
    Track3 = 0x66,
    Track4 = 0x67,
    Track5 = 0x68,
    Track6 = 0x69,
    Track7 = 0x6A,
    Track8 = 0x6B,
    Scene1 = 0x70,
    Scene2 = 0x71,
    Scene3 = 0x72,
    Scene4 = 0x73,
    Scene5 = 0x74,
    Scene6 = 0x75,
    Scene7 = 0x76,
    Scene8 = 0x77,
    Shift = 0x7A,
}

impl SideButton {
    pub const ALL: [SideButton; SIDE_COUNT] = [
        SideButton::Track1,
        SideButton::Track2,
        SideButton::Track3,
        SideButton::Track4,
        SideButton::Track5,
        SideButton::Track6,
        SideButton::Track7,
        SideButton::Track8,
        SideButton::Scene1,
        SideButton::Scene2,
        SideButton::Scene3,
        SideButton::Scene4,
        SideButton::Scene5,
        SideButton::Scene6,
        SideButton::Scene7,
        SideButton::Scene8,
        SideButton::Shift,
    ];

    pub fn from_note(note: u8) -> Option<Self> {
        num::FromPrimitive::from_u8(note)
    }

    pub fn note(self) -> u8 {
        self as u8
    }

    /// Position of this button in [`SideButton::ALL`].
    pub fn slot(self) -> usize {
        match self {
            SideButton::Shift => SIDE_COUNT - 1,
            b if b.note() >= SideButton::Scene1.note() => 8 + usize::from(b.note() - 0x70),
            b => usize::from(b.note() - 0x64),
        }
    }

    pub fn has_light(self) -> bool {
        self != SideButton::Shift
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_index_bounds() {
        assert!(GridIndex::new(63).is_some());
        assert!(GridIndex::new(64).is_none());
        assert_eq!(GridIndex::from_row_col(1, 2).map(GridIndex::get), Some(10));
        assert!(GridIndex::from_row_col(8, 0).is_none());
    }

    #[test]
    fn row_col_round_trip() {
        for index in GridIndex::all() {
            assert_eq!(GridIndex::from_row_col(index.row(), index.col()), Some(index));
        }
        assert_eq!(GridIndex::all().count(), PAD_COUNT);
    }

    #[test]
    fn side_slots_match_all_order() {
        for (i, button) in SideButton::ALL.iter().enumerate() {
            assert_eq!(button.slot(), i);
            assert_eq!(SideButton::from_note(button.note()), Some(*button));
        }
        assert_eq!(SideButton::from_note(0x6C), None);
        assert!(!SideButton::Shift.has_light());
    }
}
