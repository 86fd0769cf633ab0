//! Authoritative Tetris state for one player.
//!
//! The runtime owns one `TetrisGame` per seat; both are built from the same
//! seed so the piece sequence is reproducible by any deterministic client.
//! Gravity is advanced by the runtime's tick, player input is applied the
//! moment it arrives.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use shared::{BOARD_COLS, BOARD_ROWS};

/// Shapes as 4x4 cell masks: I, T, L, J, O, S, Z.
const SHAPES: [[[u8; 4]; 4]; 7] = [
    [[0, 1, 0, 0], [0, 1, 0, 0], [0, 1, 0, 0], [0, 1, 0, 0]],
    [[0, 1, 0, 0], [1, 1, 1, 0], [0, 0, 0, 0], [0, 0, 0, 0]],
    [[0, 1, 0, 0], [0, 1, 0, 0], [0, 1, 1, 0], [0, 0, 0, 0]],
    [[0, 1, 0, 0], [0, 1, 0, 0], [1, 1, 0, 0], [0, 0, 0, 0]],
    [[1, 1, 0, 0], [1, 1, 0, 0], [0, 0, 0, 0], [0, 0, 0, 0]],
    [[0, 1, 1, 0], [1, 1, 0, 0], [0, 0, 0, 0], [0, 0, 0, 0]],
    [[1, 1, 0, 0], [0, 1, 1, 0], [0, 0, 0, 0], [0, 0, 0, 0]],
];

/// Score per number of lines cleared in one lock.
const LINE_POINTS: [i32; 5] = [0, 100, 300, 500, 800];

/// One player action from an `INPUT` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Left,
    Right,
    Down,
    Rotate,
    Drop,
    Hold,
}

impl Action {
    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "LEFT" => Some(Action::Left),
            "RIGHT" => Some(Action::Right),
            "DOWN" => Some(Action::Down),
            "ROTATE" => Some(Action::Rotate),
            "DROP" => Some(Action::Drop),
            "HOLD" => Some(Action::Hold),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
struct Piece {
    cells: [[u8; 4]; 4],
    x: i32,
    y: i32,
    shape_id: usize,
}

#[derive(Debug)]
pub struct TetrisGame {
    board: [[u8; BOARD_COLS]; BOARD_ROWS],
    piece: Piece,
    bag: Vec<usize>,
    rng: StdRng,
    hold_shape: Option<usize>,
    hold_used: bool,
    pub score: i32,
    pub lines_cleared: i32,
    pub game_over: bool,
}

impl TetrisGame {
    pub fn new(seed: u64) -> Self {
        let mut game = Self {
            board: [[0; BOARD_COLS]; BOARD_ROWS],
            piece: Piece {
                cells: SHAPES[0],
                x: 0,
                y: 0,
                shape_id: 0,
            },
            bag: Vec::new(),
            rng: StdRng::seed_from_u64(seed),
            hold_shape: None,
            hold_used: false,
            score: 0,
            lines_cleared: 0,
            game_over: false,
        };
        game.fill_bag();
        game.spawn_piece();
        game
    }

    fn fill_bag(&mut self) {
        self.bag = (0..SHAPES.len()).collect();
        self.bag.shuffle(&mut self.rng);
    }

    fn set_active_shape(&mut self, shape_id: usize) {
        self.piece = Piece {
            cells: SHAPES[shape_id],
            x: BOARD_COLS as i32 / 2 - 2,
            y: 0,
            shape_id,
        };
        if self.collides(&self.piece.cells, self.piece.x, self.piece.y) {
            self.game_over = true;
        }
    }

    fn spawn_piece(&mut self) {
        if self.bag.is_empty() {
            self.fill_bag();
        }
        let next = self.bag.pop().unwrap_or(0);
        self.set_active_shape(next);
        self.hold_used = false;
    }

    fn collides(&self, cells: &[[u8; 4]; 4], x: i32, y: i32) -> bool {
        for (r, row) in cells.iter().enumerate() {
            for (c, &cell) in row.iter().enumerate() {
                if cell == 0 {
                    continue;
                }
                let board_r = y + r as i32;
                let board_c = x + c as i32;
                if board_r < 0
                    || board_r >= BOARD_ROWS as i32
                    || board_c < 0
                    || board_c >= BOARD_COLS as i32
                    || self.board[board_r as usize][board_c as usize] != 0
                {
                    return true;
                }
            }
        }
        false
    }

    fn lock_piece(&mut self) {
        for (r, row) in self.piece.cells.iter().enumerate() {
            for (c, &cell) in row.iter().enumerate() {
                if cell != 0 {
                    let board_r = (self.piece.y + r as i32) as usize;
                    let board_c = (self.piece.x + c as i32) as usize;
                    // Color ids 1..=7 on the wire.
                    self.board[board_r][board_c] = self.piece.shape_id as u8 + 1;
                }
            }
        }
        self.clear_lines();
        self.spawn_piece();
    }

    fn clear_lines(&mut self) {
        let kept: Vec<[u8; BOARD_COLS]> = self
            .board
            .iter()
            .copied()
            .filter(|row| row.iter().any(|&cell| cell == 0))
            .collect();
        let cleared = BOARD_ROWS - kept.len();
        if cleared == 0 {
            return;
        }

        let mut board = [[0u8; BOARD_COLS]; BOARD_ROWS];
        board[BOARD_ROWS - kept.len()..].copy_from_slice(&kept);
        self.board = board;

        self.lines_cleared += cleared as i32;
        self.score += LINE_POINTS[cleared.min(LINE_POINTS.len() - 1)];
    }

    fn hold_piece(&mut self) {
        if self.game_over || self.hold_used {
            return;
        }
        let current = self.piece.shape_id;
        match self.hold_shape.replace(current) {
            None => self.spawn_piece(),
            Some(swapped) => self.set_active_shape(swapped),
        }
        self.hold_used = true;
    }

    fn rotate_piece(&mut self) {
        // 90 degrees clockwise.
        let mut rotated = [[0u8; 4]; 4];
        for r in 0..4 {
            for c in 0..4 {
                rotated[c][3 - r] = self.piece.cells[r][c];
            }
        }

        // Simple wall kick: in place, one left, one right, else give up.
        for dx in [0, -1, 1] {
            if !self.collides(&rotated, self.piece.x + dx, self.piece.y) {
                self.piece.cells = rotated;
                self.piece.x += dx;
                return;
            }
        }
    }

    /// One gravity step: fall if possible, lock otherwise.
    pub fn tick(&mut self) {
        if self.game_over {
            return;
        }
        if !self.collides(&self.piece.cells, self.piece.x, self.piece.y + 1) {
            self.piece.y += 1;
        } else {
            self.lock_piece();
        }
    }

    /// Applies one player action immediately.
    pub fn apply(&mut self, action: Action) {
        if self.game_over {
            return;
        }
        match action {
            Action::Left => {
                if !self.collides(&self.piece.cells, self.piece.x - 1, self.piece.y) {
                    self.piece.x -= 1;
                }
            }
            Action::Right => {
                if !self.collides(&self.piece.cells, self.piece.x + 1, self.piece.y) {
                    self.piece.x += 1;
                }
            }
            Action::Down => {
                if !self.collides(&self.piece.cells, self.piece.x, self.piece.y + 1) {
                    self.piece.y += 1;
                    self.score += 1;
                } else {
                    self.lock_piece();
                }
            }
            Action::Rotate => self.rotate_piece(),
            Action::Drop => {
                let mut distance = 0;
                while !self.collides(&self.piece.cells, self.piece.x, self.piece.y + 1) {
                    self.piece.y += 1;
                    distance += 1;
                }
                self.score += distance * 2;
                self.lock_piece();
            }
            Action::Hold => self.hold_piece(),
        }
    }

    /// The board with the active piece stamped in, serialized row-major as
    /// `BOARD_ROWS * BOARD_COLS` digits.
    pub fn snapshot(&self) -> String {
        let mut view = self.board;
        for (r, row) in self.piece.cells.iter().enumerate() {
            for (c, &cell) in row.iter().enumerate() {
                if cell == 0 {
                    continue;
                }
                let board_r = self.piece.y + r as i32;
                let board_c = self.piece.x + c as i32;
                if (0..BOARD_ROWS as i32).contains(&board_r) && (0..BOARD_COLS as i32).contains(&board_c) {
                    view[board_r as usize][board_c as usize] = self.piece.shape_id as u8 + 1;
                }
            }
        }

        let mut out = String::with_capacity(BOARD_ROWS * BOARD_COLS);
        for row in &view {
            for &cell in row {
                out.push((b'0' + cell) as char);
            }
        }
        out
    }
}
