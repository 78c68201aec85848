//! Deterministic single-player Tetris state.
//!
//! The engine is pure: every transition happens through [`Engine::apply`]
//! (player actions) or [`Engine::gravity`] (the externally-scheduled tick),
//! and two engines built from the same seed and fed the same steps stay
//! byte-identical. Networking, timing, and the opponent all live elsewhere.

pub mod bag;
pub mod board;
pub mod piece;

pub use bag::SevenBag;
pub use board::Board;
pub use piece::{ALL_KINDS, Action, Kind};

/// Score gain for clearing k rows at once, multiplied by the level.
const LINE_SCORES: [u64; 5] = [0, 100, 300, 500, 800];

/// The falling piece: kind, origin cell, rotation index (0..3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivePiece {
    pub kind: Kind,
    pub x: i8,
    pub y: i8,
    pub rot: u8,
}

impl ActivePiece {
    fn spawn(kind: Kind) -> Self {
        let (x, y) = kind.spawn_origin();
        Self { kind, x, y, rot: 0 }
    }

    /// Absolute board cells occupied at the current placement.
    pub fn cells(&self) -> [(i8, i8); 4] {
        self.kind
            .cells(self.rot)
            .map(|(dx, dy)| (self.x + dx, self.y + dy))
    }

    fn at(&self, x: i8, y: i8, rot: u8) -> [(i8, i8); 4] {
        self.kind.cells(rot).map(|(dx, dy)| (x + dx, y + dy))
    }
}

/// What one step did to the state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepOutcome {
    /// The active piece locked onto the board this step.
    pub locked: bool,
    /// Rows cleared by the lock.
    pub cleared: usize,
    /// The game ended this step (spawn placement collided).
    pub game_over: bool,
}

#[derive(Debug)]
pub struct Engine {
    board: Board,
    bag: SevenBag,
    active: ActivePiece,
    hold: Option<Kind>,
    hold_used: bool,
    score: u64,
    lines: u32,
    game_over: bool,
}

impl Engine {
    pub fn new(seed: u64) -> Self {
        let mut bag = SevenBag::new(seed);
        let active = ActivePiece::spawn(bag.draw());
        Self {
            board: Board::new(),
            bag,
            active,
            hold: None,
            hold_used: false,
            score: 0,
            lines: 0,
            game_over: false,
        }
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn active(&self) -> &ActivePiece {
        &self.active
    }

    pub fn hold(&self) -> Option<Kind> {
        self.hold
    }

    /// The next three previewed kinds.
    pub fn next_preview(&mut self) -> Vec<Kind> {
        self.bag.preview(3)
    }

    pub fn score(&self) -> u64 {
        self.score
    }

    pub fn lines(&self) -> u32 {
        self.lines
    }

    pub fn level(&self) -> u32 {
        1 + self.lines / 10
    }

    pub fn is_game_over(&self) -> bool {
        self.game_over
    }

    /// Apply one player action. Invalid moves and rotations are silent
    /// no-ops; `DOWN` into an obstruction locks; a spawn that collides ends
    /// the game. Once the game is over every action is a no-op.
    pub fn apply(&mut self, action: Action) -> StepOutcome {
        if self.game_over {
            return StepOutcome::default();
        }
        match action {
            Action::Left => {
                self.try_shift(-1, 0);
                StepOutcome::default()
            }
            Action::Right => {
                self.try_shift(1, 0);
                StepOutcome::default()
            }
            Action::Down => {
                if self.try_shift(0, 1) {
                    StepOutcome::default()
                } else {
                    self.lock_active()
                }
            }
            Action::Cw => {
                self.try_rotate(1);
                StepOutcome::default()
            }
            Action::Ccw => {
                self.try_rotate(3);
                StepOutcome::default()
            }
            Action::HardDrop => {
                while self.try_shift(0, 1) {}
                self.lock_active()
            }
            Action::Hold => self.hold_swap(),
        }
    }

    /// One gravity step: `DOWN` semantics on the fixed interval.
    pub fn gravity(&mut self) -> StepOutcome {
        self.apply(Action::Down)
    }

    fn try_shift(&mut self, dx: i8, dy: i8) -> bool {
        let target = self.active.at(self.active.x + dx, self.active.y + dy, self.active.rot);
        if self.board.collides(&target) {
            return false;
        }
        self.active.x += dx;
        self.active.y += dy;
        true
    }

    fn try_rotate(&mut self, delta: u8) -> bool {
        let rot = (self.active.rot + delta) % 4;
        let target = self.active.at(self.active.x, self.active.y, rot);
        if self.board.collides(&target) {
            return false;
        }
        self.active.rot = rot;
        true
    }

    fn hold_swap(&mut self) -> StepOutcome {
        if self.hold_used {
            return StepOutcome::default();
        }
        let parked = self.active.kind;
        let next = match self.hold.take() {
            Some(kind) => kind,
            None => self.bag.draw(),
        };
        self.hold = Some(parked);
        self.hold_used = true;
        self.spawn(next);
        StepOutcome {
            locked: false,
            cleared: 0,
            game_over: self.game_over,
        }
    }

    fn lock_active(&mut self) -> StepOutcome {
        let cells = self.active.cells();
        self.board.lock(&cells, self.active.kind.cell_value());
        let cleared = self.board.clear_full_rows();
        self.score += LINE_SCORES[cleared] * self.level() as u64;
        self.lines += cleared as u32;
        self.hold_used = false;
        let next = self.bag.draw();
        self.spawn(next);
        StepOutcome {
            locked: true,
            cleared,
            game_over: self.game_over,
        }
    }

    fn spawn(&mut self, kind: Kind) {
        let piece = ActivePiece::spawn(kind);
        if self.board.collides(&piece.cells()) {
            self.game_over = true;
        }
        self.active = piece;
    }
}

#[cfg(any(test, feature = "test-helpers"))]
impl Engine {
    /// Direct board access for crafted-position tests.
    pub fn board_mut(&mut self) -> &mut Board {
        &mut self.board
    }

    /// Replace the active piece with a fresh spawn of `kind`, bypassing the
    /// bag. Sets the game-over flag if the spawn placement collides.
    pub fn force_active(&mut self, kind: Kind) {
        self.spawn(kind);
    }

    /// Pretend `lines` rows were already cleared (drives the level).
    pub fn set_lines(&mut self, lines: u32) {
        self.lines = lines;
    }
}
