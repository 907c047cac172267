//! Input counters and the updates they produce
//!
//! [`InputManager`] counts key presses per direction between frames and
//! turns them into buttons updates. [`ProgressTracker`] reports collection
//! progress whenever it changes. [`Wanderer`] stands in for a keyboard in
//! the headless client by pressing random directions.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::{ButtonCounts, ClientUpdate, Position};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Left,
    Right,
    Down,
    Up,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::Left,
        Direction::Right,
        Direction::Down,
        Direction::Up,
    ];

    fn offset(self) -> (f32, f32) {
        match self {
            Direction::Left => (-1.0, 0.0),
            Direction::Right => (1.0, 0.0),
            Direction::Down => (0.0, -1.0),
            Direction::Up => (0.0, 1.0),
        }
    }
}

/// Press state of one direction key
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Button {
    /// Presses since the last update was taken
    pub downs: u8,
    /// Whether the key is currently held
    pub pressed: bool,
}

/// Accumulates key presses and moves the local player with each one
#[derive(Debug)]
pub struct InputManager {
    left: Button,
    right: Button,
    down: Button,
    up: Button,
    position: Position,
    move_speed: f32,
}

impl InputManager {
    pub fn new(move_speed: f32) -> Self {
        Self {
            left: Button::default(),
            right: Button::default(),
            down: Button::default(),
            up: Button::default(),
            position: Position::ZERO,
            move_speed,
        }
    }

    fn button_mut(&mut self, direction: Direction) -> &mut Button {
        match direction {
            Direction::Left => &mut self.left,
            Direction::Right => &mut self.right,
            Direction::Down => &mut self.down,
            Direction::Up => &mut self.up,
        }
    }

    pub fn button(&self, direction: Direction) -> Button {
        match direction {
            Direction::Left => self.left,
            Direction::Right => self.right,
            Direction::Down => self.down,
            Direction::Up => self.up,
        }
    }

    /// Registers a key press. Auto-repeat events are ignored.
    pub fn key_down(&mut self, direction: Direction, repeat: bool) {
        if repeat {
            return;
        }
        let button = self.button_mut(direction);
        button.downs = button.downs.saturating_add(1);
        button.pressed = true;

        let (dx, dy) = direction.offset();
        self.position.x += dx * self.move_speed;
        self.position.y += dy * self.move_speed;
    }

    pub fn key_up(&mut self, direction: Direction) {
        self.button_mut(direction).pressed = false;
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn counts(&self) -> ButtonCounts {
        ButtonCounts {
            left: self.left.downs,
            right: self.right.downs,
            down: self.down.downs,
            up: self.up.downs,
        }
    }

    /// Buttons update for this frame, if any key went down since the last
    /// call. Press counters are reset either way.
    pub fn take_update(&mut self) -> Option<ClientUpdate> {
        let counts = self.counts();
        for direction in Direction::ALL {
            self.button_mut(direction).downs = 0;
        }
        if counts.is_empty() {
            None
        } else {
            Some(ClientUpdate::buttons(counts, self.position))
        }
    }
}

impl Default for InputManager {
    fn default() -> Self {
        Self::new(1.0)
    }
}

/// Collection progress towards a goal, reported only when it changes
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    collected: u8,
    goal: u8,
    last_sent: Option<(u8, bool)>,
}

impl ProgressTracker {
    pub fn new(goal: u8) -> Self {
        Self {
            collected: 0,
            goal,
            last_sent: None,
        }
    }

    pub fn collect(&mut self, items: u8) {
        self.collected = self.collected.saturating_add(items).min(self.goal);
    }

    pub fn collected(&self) -> u8 {
        self.collected
    }

    pub fn won(&self) -> bool {
        self.collected >= self.goal
    }

    /// Progress update if collected count or win flag changed since the
    /// last update taken
    pub fn take_update(&mut self, position: Position) -> Option<ClientUpdate> {
        let current = (self.collected, self.won());
        if self.last_sent == Some(current) {
            return None;
        }
        self.last_sent = Some(current);
        Some(ClientUpdate::progress(current.0, current.1, position))
    }
}

/// Random-walk key presser for running without a keyboard
#[derive(Debug)]
pub struct Wanderer {
    rng: StdRng,
    held: Option<Direction>,
    /// Chance per frame of releasing the held key and pressing another
    switch_chance: f64,
}

impl Wanderer {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            rng,
            held: None,
            switch_chance: 0.1,
        }
    }

    pub fn with_switch_chance(mut self, chance: f64) -> Self {
        self.switch_chance = chance.clamp(0.0, 1.0);
        self
    }

    pub fn held(&self) -> Option<Direction> {
        self.held
    }

    /// Advances one frame, possibly switching keys. Returns the direction
    /// pressed this frame, if any.
    pub fn step(&mut self, input: &mut InputManager) -> Option<Direction> {
        if self.held.is_some() && !self.rng.gen_bool(self.switch_chance) {
            return None;
        }
        if let Some(previous) = self.held.take() {
            input.key_up(previous);
        }

        let next = Direction::ALL[self.rng.gen_range(0..Direction::ALL.len())];
        input.key_down(next, false);
        self.held = Some(next);
        Some(next)
    }
}
