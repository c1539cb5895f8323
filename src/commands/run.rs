use clap::Args;
use std::fs;
use std::io::{self, Read, Write};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use bf_tape::cli_util::{print_engine_error, run_traced};
use bf_tape::{BracketMode, Config, Engine, EngineError, PointerPolicy, Subscription, TapeIo};

#[derive(Args, Debug)]
#[command(disable_help_flag = true)]
pub struct RunArgs {
    /// Print a step-by-step table of operations instead of program output
    #[arg(short = 'd', long = "debug")]
    pub debug: bool,

    /// Read Brainfuck code from PATH instead of positional "<code>"
    #[arg(short = 'f', long = "file")]
    pub file: Option<String>,

    /// Concatenated Brainfuck code parts
    #[arg(value_name = "code", trailing_var_arg = true, allow_hyphen_values = true)]
    pub code: Vec<String>,

    /// Pause between steps in milliseconds (fallback BF_STEP_DELAY_MS; default 0)
    #[arg(long = "delay", value_name = "MS")]
    pub delay_ms: Option<u64>,

    /// Wall-clock timeout in milliseconds, 0 disables (fallback BF_TIMEOUT_MS; default 2_000)
    #[arg(long = "timeout", value_name = "MS")]
    pub timeout_ms: Option<u64>,

    /// Maximum interpreter steps before abort (fallback BF_MAX_STEPS; default unlimited)
    #[arg(long = "max-steps", value_name = "N")]
    pub max_steps: Option<usize>,

    /// Number of tape cells (fallback BF_TAPE_SIZE; default 30_000)
    #[arg(long = "tape-size", value_name = "N")]
    pub tape_size: Option<usize>,

    /// Wrap the pointer around the tape ends instead of failing
    #[arg(long = "wrap-pointer")]
    pub wrap_pointer: bool,

    /// Fail on a bracket without a partner instead of falling through
    #[arg(long = "strict-brackets")]
    pub strict_brackets: bool,

    /// Print every tape change to stderr
    #[arg(short = 'w', long = "watch")]
    pub watch: bool,

    /// Show this help
    #[arg(short = 'h', long = "help", action = clap::ArgAction::SetTrue)]
    pub help: bool,
}

pub fn run(program: &str, args: RunArgs) -> i32 {
    if args.help {
        usage_and_exit(program, 0);
    }

    if args.file.is_none() && args.code.is_empty() {
        usage_and_exit(program, 2);
    }

    if args.file.is_some() && !args.code.is_empty() {
        eprintln!("{program}: cannot use positional code together with --file");
        usage_and_exit(program, 2);
    }

    let code_str = if let Some(path) = &args.file {
        match fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) => {
                eprintln!("{program}: failed to read code file as UTF-8: {e}");
                let _ = io::stderr().flush();
                return 1;
            }
        }
    } else {
        args.code.join("")
    };

    // Resolve settings: flags -> env -> config file -> defaults
    let mut config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{program}: {e}");
            let _ = io::stderr().flush();
            return 2;
        }
    };
    apply_flags(&mut config, &args);
    log::debug!("effective config: {config:?}");

    let mut engine = Engine::from_config(code_str.clone(), &config);
    let tape_io = engine.io();
    let cancel = engine.cancel_handle();

    // Ctrl+C aborts the run instead of killing the process mid-output
    let cancel_on_signal = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || cancel_on_signal.cancel()) {
        log::warn!("failed to set ctrl+c handler: {e}");
    }

    spawn_stdin_feeder(tape_io.clone());
    let watcher = args.watch.then(|| spawn_watcher(engine.tape().subscribe()));

    // Execute on a worker thread; this thread drains output
    let (tx, rx) = mpsc::channel::<Result<(), EngineError>>();
    let worker_io = tape_io.clone();
    let debug = args.debug;
    thread::spawn(move || {
        let res = if debug { run_traced(&mut engine) } else { engine.run() };
        let _ = tx.send(res);
        worker_io.close_output();
    });

    let deadline = (config.timeout_ms > 0)
        .then(|| Instant::now() + Duration::from_millis(config.timeout_ms));
    let mut stdout = io::stdout();
    let mut timed_out = false;
    let mut stdout_closed = false;

    let result = loop {
        let wait = match deadline {
            Some(d) => {
                let now = Instant::now();
                if now >= d {
                    timed_out = true;
                    cancel.cancel();
                    break rx.recv_timeout(Duration::from_secs(1)).ok();
                }
                d - now
            }
            None => Duration::from_millis(250),
        };

        match tape_io.drain_output_timeout(wait) {
            // Debug mode reports steps instead of program output
            Some(_) if debug => {}
            Some(byte) => {
                if let Err(e) = stdout.write_all(&[byte]).and_then(|()| stdout.flush()) {
                    log::debug!("stdout closed, stopping: {e}");
                    stdout_closed = true;
                    cancel.cancel();
                    break rx.recv_timeout(Duration::from_secs(1)).ok();
                }
            }
            None => match rx.try_recv() {
                Ok(res) => break Some(res),
                Err(mpsc::TryRecvError::Empty) => {}
                Err(mpsc::TryRecvError::Disconnected) => break None,
            },
        }
    };

    // Reader went away; exit quietly.
    if stdout_closed {
        return 1;
    }

    if !debug && stdout.write_all(&tape_io.drain_all_output()).is_err() {
        return 1;
    }

    let exit_code = match &result {
        Some(Ok(())) => 0,
        Some(Err(EngineError::StepLimitExceeded { limit })) => {
            eprintln!("Execution aborted: step limit exceeded ({limit})");
            1
        }
        Some(Err(EngineError::Cancelled { .. })) | None if timed_out => {
            eprintln!(
                "Execution aborted: wall-clock timeout exceeded ({} ms)",
                config.timeout_ms
            );
            1
        }
        Some(Err(EngineError::Cancelled { .. })) => {
            eprintln!("Execution aborted: cancelled");
            1
        }
        Some(Err(other)) => {
            print_engine_error(Some(program), &code_str, other);
            1
        }
        None => 1,
    };
    let _ = io::stderr().flush();

    if let Some(handle) = watcher {
        if result.is_some() {
            let _ = handle.join();
        }
    }

    if writeln!(stdout).and_then(|()| stdout.flush()).is_err() {
        return 1;
    }
    exit_code
}

fn apply_flags(config: &mut Config, args: &RunArgs) {
    if let Some(ms) = args.delay_ms {
        config.step_delay_ms = ms;
    }
    if let Some(ms) = args.timeout_ms {
        config.timeout_ms = ms;
    }
    if let Some(n) = args.max_steps {
        config.max_steps = Some(n);
    }
    if let Some(n) = args.tape_size {
        config.tape_size = n;
    }
    if args.wrap_pointer {
        config.pointer_policy = PointerPolicy::Wrap;
    }
    if args.strict_brackets {
        config.bracket_mode = BracketMode::Strict;
    }
}

// Feed stdin to the tape byte by byte; EOF closes the input so `,` stores 0.
fn spawn_stdin_feeder(tape_io: TapeIo) {
    thread::spawn(move || {
        let mut stdin = io::stdin().lock();
        let mut buf = [0u8; 256];
        loop {
            match stdin.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => tape_io.supply_bytes(&buf[..n]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    log::warn!("stdin read failed: {e}");
                    break;
                }
            }
        }
        tape_io.close_input();
    });
}

fn spawn_watcher(subscription: Subscription) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        while let Some(change) = subscription.recv() {
            eprintln!(
                "[tape] {:?} ptr={} cell={} hwm={}",
                change.kind, change.pointer, change.value, change.high_water_mark
            );
        }
    })
}

fn usage_and_exit(program: &str, code: i32) -> ! {
    eprintln!(
        r#"Usage:
  {0} run [OPTIONS] "<code>"
  {0} run [OPTIONS] --file <PATH>

Options:
  --file,  -f <PATH>   Read Brainfuck code from PATH instead of positional "<code>"
  --debug, -d          Print a step-by-step table of operations instead of program output
  --watch, -w          Print every tape change to stderr
  --delay <MS>         Pause between steps (animate execution)
  --timeout <MS>       Wall-clock timeout, 0 disables (default 2000)
  --max-steps <N>      Abort after N steps
  --tape-size <N>      Number of tape cells (default 30000)
  --wrap-pointer       Wrap the pointer around the tape ends instead of failing
  --strict-brackets    Fail on a bracket without a partner instead of falling through
  --help,  -h          Show this help

Notes:
- Input (`,`) waits for a byte from stdin; on EOF the current cell is set to 0.
- Characters outside of Brainfuck's ><+-.,[] are ignored.
- Ctrl+C aborts the running program.

Examples:
- Load Brainfuck code from a file:
    {0} run --file ./program.bf
- Read bytes from a file as stdin (`,` will consume file input):
    {0} run ",[.,]" < input.txt
- Animate a program while watching the tape:
    {0} run --delay 50 --timeout 0 --watch --file ./program.bf
"#,
        program
    );
    let _ = io::stderr().flush();
    std::process::exit(code);
}
