use std::io::{self, IsTerminal, Write};

use nu_ansi_term::{Color, Style};

use crate::{Engine, EngineError, Step};

/// Pretty-print an [`EngineError`] with caret positioning.
/// If `program` is `Some("bf")`, prefix messages with "bf: ..." for CLI run mode
pub fn print_engine_error(program: Option<&str>, code: &str, err: &EngineError) {
    let prefix_program = |msg: &str| {
        if let Some(p) = program {
            format!("{p}: {msg}")
        } else {
            msg.to_string()
        }
    };

    match err {
        EngineError::PointerOutOfBounds { ip, ptr, op } => {
            let msg = prefix_program(&format!(
                "Runtime error: pointer out of bounds (ptr={ptr}, op={op})"
            ));
            print_error_with_context(&msg, code, *ip);
        }
        EngineError::UnmatchedBracket { ip, kind } => {
            let msg = prefix_program(&format!("Runtime error: unmatched bracket {kind}"));
            print_error_with_context(&msg, code, *ip);
        }
        EngineError::StepLimitExceeded { .. } | EngineError::Cancelled { .. } => {
            eprintln!("{}", header_style().paint(err.to_string()));
            let _ = io::stderr().flush();
        }
    }
}

/// Print a concise error with instruction index and a caret context window.
pub fn print_error_with_context(prefix: &str, code: &str, pos: usize) {
    eprintln!("{} at instruction {pos}", header_style().paint(prefix));
    let (snippet, caret) = error_context(code, pos);
    eprintln!("  {snippet}");
    eprintln!("  {caret}");
    let _ = io::stderr().flush();
}

// Bold red on a terminal, plain text when stderr is piped.
fn header_style() -> Style {
    if io::stderr().is_terminal() {
        Color::Red.bold()
    } else {
        Style::new()
    }
}

/// A short window of `code` around char position `pos`, and a caret line
/// pointing at it. Works on chars so multi-byte UTF-8 is never split.
pub fn error_context(code: &str, pos: usize) -> (String, String) {
    const WINDOW_CHARS: usize = 32;

    let total_chars = code.chars().count();
    let start_char = pos.saturating_sub(WINDOW_CHARS);
    let end_char = (pos + WINDOW_CHARS + 1).min(total_chars);

    let start_byte = char_to_byte_index(code, start_char);
    let end_byte = char_to_byte_index(code, end_char);
    let snippet = code[start_byte..end_byte].replace(['\n', '\r', '\t'], " ");

    let caret_offset_chars = pos.saturating_sub(start_char);
    let caret = format!("{}^", " ".repeat(caret_offset_chars));
    (snippet, caret)
}

/// Convert a char index into a byte index in the given UTF-8 string.
fn char_to_byte_index(s: &str, char_idx: usize) -> usize {
    s.char_indices()
        .nth(char_idx)
        .map(|(byte_idx, _)| byte_idx)
        .unwrap_or(s.len())
}

pub const TRACE_HEADER: &str = "STEP | IP  | PTR | CELL | INSTR | ACTION";
pub const TRACE_RULE: &str =
    "-----+-----+-----+------+-------+------------------------------------------------";

/// One row of the `--debug` step table.
pub fn trace_row(index: usize, step: &Step) -> String {
    let instr = if step.instruction.is_whitespace() { ' ' } else { step.instruction };
    format!(
        "{:<4} | {:<3} | {:<3} | {:<4} |  {}    | {}",
        index, step.ip, step.pointer, step.cell, instr, step.action
    )
}

/// Step `engine` to completion, printing the table to stdout instead of
/// program output. Output bytes stay queued on the tape.
///
/// A failed write to stdout cancels the run.
pub fn run_traced(engine: &mut Engine) -> Result<(), EngineError> {
    let cancel = engine.cancel_handle();
    let mut out = io::stdout();
    if writeln!(out, "{TRACE_HEADER}\n{TRACE_RULE}").is_err() {
        cancel.cancel();
    }
    let mut index = 0usize;
    let result = engine.run_with(|step| {
        if writeln!(out, "{}", trace_row(index, step)).is_err() {
            cancel.cancel();
        }
        index += 1;
    });
    let _ = out.flush();
    result
}
