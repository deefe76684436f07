mod atom;
mod complete;
mod dispatch;
mod env;
mod error;
mod glob;
mod hash;
mod input;
mod resolve;
mod spawn;
mod term;
mod tokens;

use std::ffi::OsStr;
use std::io::Write;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use anyhow::Context;

use atom::{AtomTable, Wk};
use dispatch::{process_line, source_file};
use env::{Environment, OsFlavor};
use error::ShellError;
use input::Input;
use term::TermState;

/// Path-separator interpretation and environment case folding differ by
/// OS family; everything downstream branches on this one boolean.
pub const WINDOWS_STYLE: bool = cfg!(windows);

fn main() -> anyhow::Result<()> {
    let mut ts = TermState::init(libc::STDIN_FILENO, libc::STDOUT_FILENO)
        .context("snapshotting terminal state")?;
    let result = run(&mut ts);
    // every exit path restores the terminal
    let _ = ts.orig();
    result
}

fn run(ts: &mut TermState) -> anyhow::Result<()> {
    let mut at = AtomTable::new().context("interning well-known atoms")?;
    let mut env = Environment::from_os(&mut at, WINDOWS_STYLE, OsFlavor::host())
        .context("capturing process environment")?;
    let mut input = Input::new();
    env.refresh_cwd(&mut at, WINDOWS_STYLE)
        .context("reading working directory")?;
    ts.refresh_size(&mut env, &mut at)
        .context("querying window size")?;
    if env.set_shell_path(&mut at).is_err() {
        ts.print("error setting SHELL\r\n");
    }
    let _ = env.increment_shlvl(&mut at);
    let _ = ts.write_all(b"\x1b[?25h"); // show cursor

    if let Ok(config) = env.config_path(&mut at) {
        let config = at.atomize(&config).context("interning config path")?;
        let key = at.well_known(Wk::VarConfig);
        env.set(&at, key, config).context("recording config path")?;
        if let Err(ShellError::Exit) = source_file(config, ts, &mut env, &mut at) {
            return Ok(());
        }
    }

    let args: Vec<String> = std::env::args().skip(1).collect();
    for arg in &args {
        let path = at.atomize(arg.as_bytes()).context("interning script path")?;
        if let Err(ShellError::Exit) = source_file(path, ts, &mut env, &mut at) {
            return Ok(());
        }
    }
    if !args.is_empty() {
        return Ok(());
    }

    load_history(&mut input, ts, &mut env, &mut at);

    loop {
        let result = input.read_line(ts, &mut env, &mut at);
        if ts.in_is_terminal && ts.out_is_terminal {
            let _ = ts.write_all(b"\r\n");
        }
        let line = match result {
            Ok(line) => line,
            // editing may fail allocation without taking the shell down
            Err(ShellError::Oom) => continue,
            Err(_) => break,
        };
        let _ = ts.refresh_size(&mut env, &mut at);
        if ts.in_is_terminal {
            if let Ok(atom) = at.atomize(&line) {
                input.hist_add(&at, atom);
            }
        }
        if let Err(ShellError::Exit) = process_line(&line, ts, &mut env, &mut at) {
            break;
        }
    }
    let _ = hist_dump(&input, &mut env, &mut at);
    Ok(())
}

fn load_history(input: &mut Input, ts: &TermState, env: &mut Environment, at: &mut AtomTable) {
    let hist_path = match env.history_path(at) {
        Ok(p) => p,
        Err(_) => {
            ts.print("error getting history path\r\n");
            return;
        }
    };
    let content = match std::fs::read(OsStr::from_bytes(at.text(hist_path))) {
        Ok(c) => c,
        Err(_) => {
            ts.print(&format!(
                "error reading: {}\r\n",
                String::from_utf8_lossy(at.text(hist_path))
            ));
            return;
        }
    };
    let mut rest: &[u8] = &content;
    while let Some(pos) = rest
        .iter()
        .position(|&b| matches!(b, b'\0' | b'\n' | b'\r'))
    {
        let mut line = &rest[..pos + 1];
        rest = &rest[pos + 1..];
        while let Some((&last, head)) = line.split_last() {
            if last == b'\n' || last == b'\r' {
                line = head;
            } else {
                break;
            }
        }
        if line.is_empty() {
            continue;
        }
        if let Ok(atom) = at.atomize(line) {
            input.hist_add(at, atom);
        }
    }
    input.hist_start = input.history().len();
}

/// Appends the lines accepted this session (everything past `hist_start`)
/// to the history file, creating its directory on first use.
fn hist_dump(input: &Input, env: &mut Environment, at: &mut AtomTable) -> error::Result<()> {
    let path = env.history_path(at)?;
    if at.len(path) == 0 {
        return Err(ShellError::NotFound);
    }
    let path_bytes = at.text(path).to_vec();
    let path = Path::new(OsStr::from_bytes(&path_bytes));
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)
        .map_err(|_| ShellError::Io)?;
    for &atom in &input.history()[input.hist_start..] {
        let _ = file.write_all(at.text(atom));
        let _ = file.write_all(b"\n");
    }
    Ok(())
}
