use serde::{Deserialize, Serialize};

/// The seven piece kinds. The discriminant is the non-zero cell value the
/// kind leaves on the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Kind {
    I = 1,
    O = 2,
    T = 3,
    S = 4,
    Z = 5,
    J = 6,
    L = 7,
}

pub const ALL_KINDS: [Kind; 7] = [
    Kind::I,
    Kind::O,
    Kind::T,
    Kind::S,
    Kind::Z,
    Kind::J,
    Kind::L,
];

impl Kind {
    pub fn cell_value(self) -> u8 {
        self as u8
    }

    pub fn letter(self) -> &'static str {
        match self {
            Kind::I => "I",
            Kind::O => "O",
            Kind::T => "T",
            Kind::S => "S",
            Kind::Z => "Z",
            Kind::J => "J",
            Kind::L => "L",
        }
    }

    /// Cell offsets from the piece origin for a rotation index (0..3).
    ///
    /// The tables are the canonical kick-free orientations: rotation only
    /// succeeds when the target placement is directly valid. The O piece's
    /// four states are identical.
    pub fn cells(self, rot: u8) -> [(i8, i8); 4] {
        let rot = (rot % 4) as usize;
        match self {
            Kind::I => [
                [(0, 1), (1, 1), (2, 1), (3, 1)],
                [(2, 0), (2, 1), (2, 2), (2, 3)],
                [(0, 2), (1, 2), (2, 2), (3, 2)],
                [(1, 0), (1, 1), (1, 2), (1, 3)],
            ][rot],
            Kind::O => [(1, 0), (2, 0), (1, 1), (2, 1)],
            Kind::T => [
                [(1, 0), (0, 1), (1, 1), (2, 1)],
                [(1, 0), (1, 1), (2, 1), (1, 2)],
                [(0, 1), (1, 1), (2, 1), (1, 2)],
                [(1, 0), (0, 1), (1, 1), (1, 2)],
            ][rot],
            Kind::S => [
                [(1, 0), (2, 0), (0, 1), (1, 1)],
                [(1, 0), (1, 1), (2, 1), (2, 2)],
                [(1, 1), (2, 1), (0, 2), (1, 2)],
                [(0, 0), (0, 1), (1, 1), (1, 2)],
            ][rot],
            Kind::Z => [
                [(0, 0), (1, 0), (1, 1), (2, 1)],
                [(2, 0), (1, 1), (2, 1), (1, 2)],
                [(0, 1), (1, 1), (1, 2), (2, 2)],
                [(1, 0), (0, 1), (1, 1), (0, 2)],
            ][rot],
            Kind::J => [
                [(0, 0), (0, 1), (1, 1), (2, 1)],
                [(1, 0), (2, 0), (1, 1), (1, 2)],
                [(0, 1), (1, 1), (2, 1), (2, 2)],
                [(1, 0), (1, 1), (0, 2), (1, 2)],
            ][rot],
            Kind::L => [
                [(2, 0), (0, 1), (1, 1), (2, 1)],
                [(1, 0), (1, 1), (1, 2), (2, 2)],
                [(0, 1), (1, 1), (2, 1), (0, 2)],
                [(0, 0), (1, 0), (1, 1), (1, 2)],
            ][rot],
        }
    }

    /// Spawn origin: horizontally centered, topmost occupied cell on row 0.
    pub fn spawn_origin(self) -> (i8, i8) {
        let min_dy = self
            .cells(0)
            .iter()
            .map(|&(_, dy)| dy)
            .min()
            .unwrap_or(0);
        (3, -min_dy)
    }
}

impl std::fmt::Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.letter())
    }
}

/// A player action. Gravity reuses `Down` semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    Left,
    Right,
    Down,
    Cw,
    Ccw,
    HardDrop,
    Hold,
}

impl Action {
    /// Resolve a wire action string; `None` for anything outside the set.
    pub fn from_wire(s: &str) -> Option<Action> {
        match s {
            "LEFT" => Some(Action::Left),
            "RIGHT" => Some(Action::Right),
            "DOWN" => Some(Action::Down),
            "CW" => Some(Action::Cw),
            "CCW" => Some(Action::Ccw),
            "HARD_DROP" => Some(Action::HardDrop),
            "HOLD" => Some(Action::Hold),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn every_rotation_has_four_distinct_cells() {
        for kind in ALL_KINDS {
            for rot in 0..4 {
                let cells: HashSet<_> = kind.cells(rot).into_iter().collect();
                assert_eq!(cells.len(), 4, "{kind:?} rot {rot}");
            }
        }
    }

    #[test]
    fn o_piece_rotations_are_identical() {
        for rot in 1..4 {
            assert_eq!(Kind::O.cells(0), Kind::O.cells(rot));
        }
    }

    #[test]
    fn spawn_top_row_is_zero() {
        for kind in ALL_KINDS {
            let (ox, oy) = kind.spawn_origin();
            let min_y = kind
                .cells(0)
                .iter()
                .map(|&(_, dy)| oy + dy)
                .min()
                .unwrap();
            assert_eq!(min_y, 0, "{kind:?} should spawn with its top on row 0");
            // Horizontally in bounds.
            for (dx, _) in kind.cells(0) {
                let x = ox + dx;
                assert!((0..10).contains(&x), "{kind:?} spawn x {x}");
            }
        }
    }

    #[test]
    fn cell_values_are_one_through_seven() {
        let values: Vec<u8> = ALL_KINDS.iter().map(|k| k.cell_value()).collect();
        assert_eq!(values, vec![1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn wire_actions_resolve() {
        assert_eq!(Action::from_wire("HARD_DROP"), Some(Action::HardDrop));
        assert_eq!(Action::from_wire("CW"), Some(Action::Cw));
        assert_eq!(Action::from_wire("SPIN"), None);
        assert_eq!(Action::from_wire("left"), None);
    }

    #[test]
    fn action_serde_names_match_wire() {
        assert_eq!(
            serde_json::to_string(&Action::HardDrop).unwrap(),
            "\"HARD_DROP\""
        );
        assert_eq!(serde_json::to_string(&Action::Ccw).unwrap(), "\"CCW\"");
    }
}
