//! Gears CLI: run a script, evaluate a string, or start the REPL.

use std::env;
use std::fs;
use std::io::{self, BufRead, Write};
use std::process;

use colored::Colorize;
use tracing_subscriber::EnvFilter;

use gears::error::GearsError;
use gears::{Vm, VmConfig};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// CLI command to execute.
enum Command {
    /// Run a script file
    Run { file: String },
    /// Evaluate a string
    Eval { code: String },
    /// Start the REPL
    Repl,
}

/// CLI options parsed from arguments.
struct Options {
    command: Command,
    disassemble: bool,
    trace: bool,
}

fn print_usage() {
    eprintln!("Gears {} - bytecode VM", VERSION);
    eprintln!();
    eprintln!("Usage: gears [options] [script.gears]");
    eprintln!("       gears -e <code>");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --disassemble   Print the bytecode listing instead of running");
    eprintln!("  --trace         Log every executed instruction (needs GEARS_LOG=debug)");
    eprintln!("  -e <code>       Evaluate code directly");
    eprintln!("  --help, -h      Show this help message");
    eprintln!("  --version, -V   Show version");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  GEARS_LOG          Log filter (default: warn)");
    eprintln!("  GEARS_TRACE        Same as --trace when set to 1");
    eprintln!("  GEARS_MAX_FRAMES   Maximum call depth (default: 256)");
    eprintln!();
    eprintln!("Examples:");
    eprintln!("  gears                     Start interactive REPL");
    eprintln!("  gears script.gears        Run a script file");
    eprintln!("  gears -e 'print 1 + 1;'   Evaluate code directly");
}

fn parse_args() -> Options {
    let args: Vec<String> = env::args().skip(1).collect();
    let mut command = None;
    let mut disassemble = false;
    let mut trace = false;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_usage();
                process::exit(0);
            }
            "--version" | "-V" => {
                println!("gears {}", VERSION);
                process::exit(0);
            }
            "--disassemble" => disassemble = true,
            "--trace" => trace = true,
            "-e" => {
                i += 1;
                match args.get(i) {
                    Some(code) => command = Some(Command::Eval { code: code.clone() }),
                    None => {
                        eprintln!("-e requires code to evaluate");
                        print_usage();
                        process::exit(64);
                    }
                }
            }
            arg if arg.starts_with('-') => {
                eprintln!("Unknown option: {}", arg);
                print_usage();
                process::exit(64);
            }
            file => {
                if command.is_some() {
                    eprintln!("Only one script may be given");
                    process::exit(64);
                }
                command = Some(Command::Run {
                    file: file.to_string(),
                });
            }
        }
        i += 1;
    }

    Options {
        command: command.unwrap_or(Command::Repl),
        disassemble,
        trace,
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("GEARS_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn main() {
    init_logging();
    let options = parse_args();

    match &options.command {
        Command::Repl => run_repl(&options),
        Command::Run { file } => run_file(file, &options),
        Command::Eval { code } => run_source(code, &options),
    }
}

fn config_for(options: &Options) -> VmConfig {
    let mut config = VmConfig::from_env();
    if options.trace {
        config.trace_execution = true;
    }
    config
}

fn run_file(path: &str, options: &Options) {
    let source = match fs::read_to_string(path) {
        Ok(source) => source,
        Err(e) => {
            report(&GearsError::Io(e));
            process::exit(74);
        }
    };
    run_source(&source, options);
}

fn run_source(source: &str, options: &Options) {
    let result = if options.disassemble {
        gears::disassemble(source).map(|listing| print!("{}", listing))
    } else {
        let mut vm = Vm::with_config(config_for(options));
        vm.interpret_source(source)
    };

    if let Err(e) = result {
        report(&e);
        process::exit(exit_code(&e));
    }
}

fn exit_code(err: &GearsError) -> i32 {
    match err {
        GearsError::Lexer(_) | GearsError::Compile(_) => 65,
        GearsError::Runtime(_) => 70,
        GearsError::Io(_) => 74,
    }
}

fn report(err: &GearsError) {
    match err {
        GearsError::Compile(errs) => {
            for e in errs.iter() {
                eprintln!("{} {}", "error:".red().bold(), e);
            }
        }
        other => eprintln!("{} {}", "error:".red().bold(), other),
    }
}

/// Line REPL. Globals persist between entries; an entry whose braces are not
/// yet balanced continues on the next line.
fn run_repl(options: &Options) {
    println!("Gears {} - REPL", VERSION);
    println!("Type .exit or press Ctrl-D to quit.\n");

    let mut vm = Vm::with_config(config_for(options));
    let stdin = io::stdin();
    let mut buffer = String::new();
    let mut balance: i32 = 0;

    loop {
        let prompt = if buffer.is_empty() { ">> " } else { ".. " };
        print!("{}", prompt.cyan());
        if io::stdout().flush().is_err() {
            return;
        }

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => {
                println!();
                return;
            }
            Ok(_) => {}
            Err(e) => {
                report(&GearsError::Io(e));
                return;
            }
        }

        if buffer.is_empty() && line.trim() == ".exit" {
            return;
        }

        balance += brace_delta(&line);
        buffer.push_str(&line);
        if balance > 0 {
            continue;
        }

        let entry = std::mem::take(&mut buffer);
        balance = 0;
        if entry.trim().is_empty() {
            continue;
        }

        let result = if options.disassemble {
            gears::disassemble(&entry).map(|listing| print!("{}", listing))
        } else {
            vm.interpret_source(&entry)
        };
        if let Err(e) = result {
            report(&e);
        }
    }
}

fn brace_delta(line: &str) -> i32 {
    let mut delta = 0;
    let mut in_string = false;
    for c in line.chars() {
        match c {
            '"' => in_string = !in_string,
            '{' if !in_string => delta += 1,
            '}' if !in_string => delta -= 1,
            _ => {}
        }
    }
    delta
}
