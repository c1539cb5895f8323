//! Fetch-decode-execute loop over a [`Tape`].
//!
//! The engine walks the program one character at a time. Loops are resolved
//! by scanning the program text at the moment a bracket executes: `[` looks
//! forward for the first `]`, `]` looks backward for the last `[`. The scans
//! do not count nesting depth. Characters outside `<>+-.,[]` are skipped.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::config::Config;
use crate::error::{EngineError, TapeError, UnmatchedBracketKind};
use crate::tape::{CancelHandle, Direction, Tape, TapeIo};

/// What to do when a bracket scan finds no partner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BracketMode {
    /// Fall through to the next instruction.
    #[default]
    Permissive,
    /// Fail with [`EngineError::UnmatchedBracket`].
    Strict,
}

impl FromStr for BracketMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "permissive" => Ok(BracketMode::Permissive),
            "strict" => Ok(BracketMode::Strict),
            other => Err(format!(
                "unknown bracket mode '{other}', expected 'permissive' or 'strict'"
            )),
        }
    }
}

/// Effect of one executed instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Moved { to: usize },
    Incremented { from: u8, to: u8 },
    Decremented { from: u8, to: u8 },
    Output(u8),
    Input(u8),
    JumpedForward { to: usize },
    EnteredLoop,
    JumpedBack { to: usize },
    ExitedLoop,
    /// A bracket scan found no partner and execution fell through.
    Fallthrough,
    Ignored,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Moved { to } => write!(f, "Moved pointer head to index {to}"),
            Action::Incremented { from, to } => write!(f, "Increment cell from {from} to {to}"),
            Action::Decremented { from, to } => write!(f, "Decrement cell from {from} to {to}"),
            Action::Output(b) => write!(f, "Output byte {b} ({:?})", *b as char),
            Action::Input(b) => write!(f, "Read byte from input -> {b}"),
            Action::JumpedForward { to } => write!(f, "Cell is 0; jump forward to ']' at IP {to}"),
            Action::EnteredLoop => write!(f, "Enter loop (cell != 0)"),
            Action::JumpedBack { to } => write!(f, "Cell != 0; jump back to '[' at IP {to}"),
            Action::ExitedLoop => write!(f, "Exit loop (cell is 0)"),
            Action::Fallthrough => write!(f, "No matching bracket; fall through"),
            Action::Ignored => write!(f, "Ignored"),
        }
    }
}

/// Record of a single [`Engine::step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    /// Instruction index the step executed.
    pub ip: usize,
    pub instruction: char,
    /// Data pointer before the instruction ran.
    pub pointer: usize,
    /// Current cell before the instruction ran.
    pub cell: u8,
    pub action: Action,
}

/// A Brainfuck program bound to the tape it runs on.
#[derive(Debug)]
pub struct Engine {
    source: String,
    program: Vec<char>,
    ip: usize,
    tape: Tape,
    step_delay: Duration,
    max_steps: Option<usize>,
    bracket_mode: BracketMode,
    steps: usize,
}

impl Engine {
    /// Bind `program` to a fresh default tape.
    pub fn new(program: impl Into<String>) -> Self {
        Self::with_tape(program, Tape::new())
    }

    /// Bind `program` to an existing tape, e.g. one pre-seeded by a test or
    /// handed over from a previous engine via [`into_tape`](Self::into_tape).
    pub fn with_tape(program: impl Into<String>, tape: Tape) -> Self {
        let source = program.into();
        let program = source.chars().collect();
        Self {
            source,
            program,
            ip: 0,
            tape,
            step_delay: Duration::ZERO,
            max_steps: None,
            bracket_mode: BracketMode::default(),
            steps: 0,
        }
    }

    /// Build the tape and apply delay, step limit and bracket mode from `config`.
    pub fn from_config(program: impl Into<String>, config: &Config) -> Self {
        let tape = Tape::with_policy(config.tape_size, config.pointer_policy);
        let mut engine = Self::with_tape(program, tape);
        engine.set_step_delay(config.step_delay());
        engine.set_max_steps(config.max_steps);
        engine.set_bracket_mode(config.bracket_mode);
        engine
    }

    pub fn is_finished(&self) -> bool {
        self.ip >= self.program.len()
    }

    pub fn instruction_pointer(&self) -> usize {
        self.ip
    }

    pub fn instructions(&self) -> &str {
        &self.source
    }

    /// The instruction the next [`step`](Self::step) will execute.
    pub fn current_instruction(&self) -> Option<char> {
        self.program.get(self.ip).copied()
    }

    pub fn tape(&self) -> &Tape {
        &self.tape
    }

    pub fn into_tape(self) -> Tape {
        self.tape
    }

    pub fn io(&self) -> TapeIo {
        self.tape.io()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.tape.cancel_handle()
    }

    pub fn step_delay(&self) -> Duration {
        self.step_delay
    }

    /// Pause inserted after every step of [`run`](Self::run). Zero disables it.
    pub fn set_step_delay(&mut self, delay: Duration) {
        self.step_delay = delay;
    }

    pub fn max_steps(&self) -> Option<usize> {
        self.max_steps
    }

    /// Cap the total number of steps [`run`](Self::run) may reach.
    pub fn set_max_steps(&mut self, limit: Option<usize>) {
        self.max_steps = limit;
    }

    pub fn bracket_mode(&self) -> BracketMode {
        self.bracket_mode
    }

    pub fn set_bracket_mode(&mut self, mode: BracketMode) {
        self.bracket_mode = mode;
    }

    /// Instructions executed so far, across `step` and `run`.
    pub fn steps_executed(&self) -> usize {
        self.steps
    }

    /// Execute one instruction.
    ///
    /// Returns `Ok(None)` without touching anything once the program is
    /// finished. A jump lands on the partner bracket and the usual `+1`
    /// then moves past it. On error the instruction pointer stays put.
    pub fn step(&mut self) -> Result<Option<Step>, EngineError> {
        let Some(instruction) = self.current_instruction() else {
            return Ok(None);
        };
        let ip = self.ip;
        let (pointer, cell) = (self.tape.pointer(), self.tape.read());

        let action = self.execute(instruction)?;
        log::trace!("ip={ip} op={instruction} ptr={pointer} cell={cell} -> {action}");

        self.ip += 1;
        self.steps += 1;
        Ok(Some(Step { ip, instruction, pointer, cell, action }))
    }

    /// Step until finished.
    ///
    /// Before each step the cancel handle and the step limit are checked;
    /// after each step the engine sleeps for the configured delay. A cancel
    /// interrupts a blocked `,` or a pending delay right away and leaves the
    /// engine where it stopped.
    pub fn run(&mut self) -> Result<(), EngineError> {
        self.run_with(|_| {})
    }

    /// [`run`](Self::run), handing every executed [`Step`] to `on_step`.
    pub fn run_with<F>(&mut self, mut on_step: F) -> Result<(), EngineError>
    where
        F: FnMut(&Step),
    {
        log::debug!(
            "run: {} instructions from ip {}, delay {:?}",
            self.program.len(),
            self.ip,
            self.step_delay
        );
        let cancel = self.tape.cancel_handle();

        while !self.is_finished() {
            if cancel.is_cancelled() {
                log::debug!("run cancelled at ip {}", self.ip);
                return Err(EngineError::Cancelled { ip: self.ip });
            }
            if let Some(limit) = self.max_steps {
                if self.steps >= limit {
                    return Err(EngineError::StepLimitExceeded { limit });
                }
            }

            if let Some(step) = self.step()? {
                on_step(&step);
            }

            if !self.step_delay.is_zero() {
                cancel
                    .pause(self.step_delay)
                    .map_err(|_| EngineError::Cancelled { ip: self.ip })?;
            }
        }

        log::debug!("run finished after {} steps", self.steps);
        Ok(())
    }

    fn execute(&mut self, instruction: char) -> Result<Action, EngineError> {
        let ip = self.ip;
        let action = match instruction {
            '<' | '>' => {
                let direction = if instruction == '<' { Direction::Left } else { Direction::Right };
                self.tape
                    .move_pointer(direction)
                    .map_err(|e| tape_fault(e, ip, instruction))?;
                Action::Moved { to: self.tape.pointer() }
            }
            '+' => {
                let from = self.tape.read();
                self.tape.increment();
                Action::Incremented { from, to: self.tape.read() }
            }
            '-' => {
                let from = self.tape.read();
                self.tape.decrement();
                Action::Decremented { from, to: self.tape.read() }
            }
            '.' => {
                self.tape.write_output();
                Action::Output(self.tape.read())
            }
            ',' => {
                self.tape
                    .read_input()
                    .map_err(|e| tape_fault(e, ip, instruction))?;
                Action::Input(self.tape.read())
            }
            '[' => self.jump_forward()?,
            ']' => self.jump_back()?,
            _ => Action::Ignored,
        };
        Ok(action)
    }

    fn jump_forward(&mut self) -> Result<Action, EngineError> {
        if self.tape.read() != 0 {
            return Ok(Action::EnteredLoop);
        }
        // First ']' at or after this '[', whatever lies in between.
        match self.program[self.ip..].iter().position(|&c| c == ']') {
            Some(offset) => {
                self.ip += offset;
                Ok(Action::JumpedForward { to: self.ip })
            }
            None => self.unmatched(UnmatchedBracketKind::Open),
        }
    }

    fn jump_back(&mut self) -> Result<Action, EngineError> {
        if self.tape.read() == 0 {
            return Ok(Action::ExitedLoop);
        }
        // Last '[' anywhere before this ']'.
        match self.program[..self.ip].iter().rposition(|&c| c == '[') {
            Some(target) => {
                self.ip = target;
                Ok(Action::JumpedBack { to: target })
            }
            None => self.unmatched(UnmatchedBracketKind::Close),
        }
    }

    fn unmatched(&self, kind: UnmatchedBracketKind) -> Result<Action, EngineError> {
        match self.bracket_mode {
            BracketMode::Permissive => Ok(Action::Fallthrough),
            BracketMode::Strict => Err(EngineError::UnmatchedBracket { ip: self.ip, kind }),
        }
    }
}

fn tape_fault(err: TapeError, ip: usize, op: char) -> EngineError {
    match err {
        TapeError::PointerOutOfBounds { pointer, .. } => {
            EngineError::PointerOutOfBounds { ip, ptr: pointer, op }
        }
        TapeError::IndexOutOfRange { .. } => {
            unreachable!("'{op}' at {ip} raised an index error; only value_at does that")
        }
        TapeError::Cancelled => EngineError::Cancelled { ip },
    }
}
