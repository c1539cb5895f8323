//! A steppable Brainfuck engine with an observable tape.
//!
//! The crate is split in two layers:
//! - [`Tape`]: 30,000 wrapping `u8` cells by default, a data pointer, a
//!   blocking input queue, an output queue, and a change feed for viewers.
//! - [`Engine`]: the program text plus an instruction pointer; executes one
//!   instruction per [`Engine::step`] or runs to completion with an optional
//!   delay between steps.
//!
//! Features and behaviors:
//! - Cells wrap on overflow and underflow.
//! - Pointer moves past either end fail by default; a wrapping policy is
//!   available.
//! - `,` blocks until a byte is supplied, the input is closed (cell becomes
//!   0), or the run is cancelled.
//! - `[` and `]` find their partner by scanning the program text for the
//!   nearest bracket of the other kind, without counting nesting. A missing
//!   partner falls through unless strict bracket mode is on.
//! - Any non-Brainfuck character is ignored.
//!
//! Quick start:
//!
//! ```
//! use bf_tape::Engine;
//!
//! // Classic "Hello World!" in Brainfuck
//! let code = "++++++++++[>+++++++>++++++++++>+++>+<<<<-]>++.>+.+++++++..+++.>++.<<+++++++++++++++.>.+++.------.--------.>+.>.";
//! let mut bf = Engine::new(code);
//! bf.run().expect("program should run");
//! assert_eq!(bf.tape().drain_all_output(), b"Hello World!\n");
//! ```
//!
//! Feeding input from another thread:
//!
//! ```
//! use std::thread;
//! use bf_tape::Engine;
//!
//! let mut bf = Engine::new(",.");
//! let io = bf.io();
//! let worker = thread::spawn(move || bf.run());
//! io.supply_input(b'A');
//! assert_eq!(io.drain_output(), Some(b'A'));
//! worker.join().unwrap().unwrap();
//! ```

pub mod cli_util;
pub mod config;
pub mod engine;
pub mod error;
pub mod tape;

pub use config::Config;
pub use engine::{Action, BracketMode, Engine, Step};
pub use error::{ConfigError, EngineError, TapeError, UnmatchedBracketKind};
pub use tape::{
    CancelHandle, ChangeKind, Direction, PointerPolicy, Subscription, Tape, TapeChange, TapeIo,
    DEFAULT_CAPACITY,
};
