//! Command-line runner for uFork IR modules.
//!
//! Loads a JSON IR module and its imports, boots one of its exported
//! behaviors and runs the core until it goes idle or faults.
//!
//! # Usage
//! ```text
//! ufork <module.json> [OPTIONS]
//! ```
//!
//! # Options
//! - `--boot <name>`: exported behavior to boot (defaults to `boot`)
//! - `--steps <n>`: run-loop iteration limit, `0` for no limit
//! - `--memory <n>`, `--events <n>`, `--cycles <n>`: root sponsor quotas
//! - `--snapshot <path>`: write the final heap snapshot to `path`
//! - `--quiet`: log errors only
//! - `--verbose`: log down to debug level
//!
//! Prints the final signal and the snapshot digest. Exits with `0` when the
//! core went idle, `1` on a fault or load failure and `2` on bad arguments.

use crate::utils::log::{Level, set_level};
use crate::virtual_machine::any::{Any, UNDEF, ZERO};
use crate::virtual_machine::config::CoreConfig;
use crate::virtual_machine::errors::{Fault, HostError};
use crate::virtual_machine::host::Host;
use crate::virtual_machine::loader::FileResolver;
use std::env;
use std::process;

mod types;
mod utils;
mod virtual_machine;

#[derive(Debug, PartialEq)]
struct Options {
    module: String,
    boot: String,
    steps: i32,
    config: CoreConfig,
    snapshot: Option<String>,
    level: Level,
}

fn main() {
    let args: Vec<String> = env::args().collect();
    let program = args.first().map_or("ufork", String::as_str);

    if args.iter().skip(1).any(|a| a == "--help" || a == "-h") {
        print_usage(program);
        process::exit(0);
    }

    let options = match parse_args(args.get(1..).unwrap_or_default()) {
        Ok(options) => options,
        Err(msg) => {
            eprintln!("{}\n", msg);
            print_usage(program);
            process::exit(2);
        }
    };
    set_level(options.level);

    match run(&options) {
        Ok(signal) => process::exit(if signal == ZERO { 0 } else { 1 }),
        Err(e) => {
            error!("{}", e);
            process::exit(1);
        }
    }
}

fn run(options: &Options) -> Result<Any, HostError> {
    let host = Host::new(options.config.clone())?;
    let exports = host.h_import(&options.module, &mut FileResolver)?;
    let beh = *exports
        .get(&options.boot)
        .ok_or_else(|| HostError::MissingExport(options.boot.clone()))?;
    let actor = host.h_boot(beh, &[])?;
    info!("booted {} as {}", options.boot, actor);

    let signal = host.h_run_loop(options.steps)?;
    let snapshot = host.h_snapshot()?;
    println!("signal: {} ({})", signal, describe(signal));
    println!("digest: {}", snapshot.digest());

    if let Some(path) = &options.snapshot {
        snapshot.save(path)?;
        info!("snapshot written to {}", path);
    }
    Ok(signal)
}

fn describe(signal: Any) -> &'static str {
    if signal == UNDEF {
        return "step limit reached";
    }
    match signal.fix_num() {
        Some(code) => Fault::message(code),
        None => "running",
    }
}

fn parse_args(args: &[String]) -> Result<Options, String> {
    let mut iter = args.iter();
    let module = match iter.next() {
        Some(arg) if !arg.starts_with("--") => arg.clone(),
        Some(arg) => return Err(format!("Expected a module path, got {}", arg)),
        None => return Err("Missing module path".to_string()),
    };

    let mut options = Options {
        module,
        boot: "boot".to_string(),
        steps: 0,
        config: CoreConfig::default(),
        snapshot: None,
        level: Level::Info,
    };

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--boot" => options.boot = value(&mut iter, arg)?.to_string(),
            "--steps" => options.steps = number(&mut iter, arg)?,
            "--memory" => options.config.memory = number(&mut iter, arg)?,
            "--events" => options.config.events = number(&mut iter, arg)?,
            "--cycles" => options.config.cycles = number(&mut iter, arg)?,
            "--snapshot" => options.snapshot = Some(value(&mut iter, arg)?.to_string()),
            "--quiet" => options.level = Level::Error,
            "--verbose" => options.level = Level::Debug,
            other => return Err(format!("Unexpected argument: {}", other)),
        }
    }
    options.config.validate().map_err(|e| e.to_string())?;
    Ok(options)
}

fn value<'a>(iter: &mut std::slice::Iter<'a, String>, flag: &str) -> Result<&'a str, String> {
    iter.next()
        .map(String::as_str)
        .ok_or_else(|| format!("{} requires an argument", flag))
}

fn number(iter: &mut std::slice::Iter<'_, String>, flag: &str) -> Result<i32, String> {
    let raw = value(iter, flag)?;
    raw.parse()
        .map_err(|_| format!("{} expects a number, got {}", flag, raw))
}

fn print_usage(program: &str) {
    eprintln!(
        r#"Usage: {} <module.json> [OPTIONS]

Arguments:
  <module.json>      IR module to load; imports resolve relative to it

Options:
  --boot <name>      Exported behavior to boot (default: boot)
  --steps <n>        Run-loop iteration limit, 0 for none (default: 0)
  --memory <n>       Root sponsor memory quota
  --events <n>       Root sponsor event quota
  --cycles <n>       Root sponsor instruction quota
  --snapshot <path>  Write the final heap snapshot to <path>
  --quiet            Log errors only
  --verbose          Log debug messages
  -h, --help         Print this help

Examples:
  {} counter.json
  {} app.json --boot main --cycles 100000 --snapshot app.snap"#,
        program, program, program
    );
}
