//! Turns an accepted line into work: tokenize, canonicalize, glob, then
//! either run a builtin or resolve and spawn an external program.
//!
//! Builtin names are compared by atom handle against the well-known set,
//! so dispatch never re-examines bytes. A failing builtin aborts itself,
//! never the shell; only `exit` (possibly relayed through `source`)
//! unwinds the loop.

use std::ffi::CString;

use bytes::{BufMut, BytesMut};

use crate::atom::{Atom, AtomTable, Wk};
use crate::env::Environment;
use crate::error::{Result, ShellError};
use crate::glob;
use crate::spawn::spawn_and_wait;
use crate::term::TermState;
use crate::tokens::{canonicalize, tokenize};

fn tokens_to_argv(
    line: &[u8],
    env: &Environment,
    at: &mut AtomTable,
) -> Result<Vec<Atom>> {
    let mut argv = Vec::new();
    for span in tokenize(line) {
        let word = canonicalize(span.text(line), at, env, crate::WINDOWS_STYLE)?;
        if crate::WINDOWS_STYLE {
            // programs expand their own wildcards on this family
            argv.push(word);
        } else {
            let text = at.text(word).to_vec();
            for expansion in glob::expand_word(&text) {
                argv.push(at.atomize(&expansion)?);
            }
        }
    }
    Ok(argv)
}

/// Runs one line to completion. Every outcome other than the `exit`
/// builtin folds into `Ok` so the caller's loop keeps going.
pub fn process_line(
    line: &[u8],
    ts: &mut TermState,
    env: &mut Environment,
    at: &mut AtomTable,
) -> Result<()> {
    if line.is_empty() || (line.len() == 1 && (line[0] == b'\r' || line[0] == b'\n')) {
        return Ok(());
    }
    let argv = match tokens_to_argv(line, env, at) {
        Ok(argv) => argv,
        Err(_) => return Ok(()),
    };
    let Some(&first) = argv.first() else {
        return Ok(());
    };

    if first == at.well_known(Wk::Cd) {
        let _ = builtin_cd(env, at, &argv);
        return Ok(());
    }
    if first == at.well_known(Wk::Echo) {
        let mut out = BytesMut::new();
        for &arg in &argv[1..] {
            out.put_slice(at.text(arg));
            out.put_u8(b' ');
        }
        out.put_slice(b"\r\n");
        let _ = ts.write_all(&out);
        return Ok(());
    }
    if first == at.well_known(Wk::Exit) {
        return Err(ShellError::Exit);
    }
    if first == at.well_known(Wk::Pwd) {
        if let Some(pwd) = env.get(at, at.well_known(Wk::VarPwd)) {
            ts.print(&format!("{}\r\n", String::from_utf8_lossy(at.text(pwd))));
        }
        return Ok(());
    }
    if first == at.well_known(Wk::Set) {
        match argv.len() {
            1 => {
                let ci = env.case_insensitive();
                let mut out = BytesMut::new();
                for &(key, value) in env.sorted_entries(at) {
                    out.put_slice(at.text(key));
                    if ci {
                        out.put_slice(b" (");
                        out.put_slice(at.text(at.fold(key)));
                        out.put_slice(b")");
                    }
                    out.put_u8(b'=');
                    out.put_slice(at.text(value));
                    out.put_slice(b"\r\n");
                }
                let _ = ts.write_all(&out);
            }
            3 => {
                let key = argv[1];
                if at.len(key) > 0 {
                    let _ = env.set(at, key, argv[2]);
                }
            }
            _ => {}
        }
        return Ok(());
    }
    if first == at.well_known(Wk::Debug) {
        if argv.len() > 1 {
            let val = argv[1];
            if val == at.well_known(Wk::On)
                || val == at.well_known(Wk::True)
                || val == at.well_known(Wk::One)
            {
                env.debug = true;
            } else if val == at.well_known(Wk::Off)
                || val == at.well_known(Wk::False)
                || val == at.well_known(Wk::Zero)
            {
                env.debug = false;
            }
        } else {
            ts.print(&format!("debug = {}\r\n", env.debug));
        }
        return Ok(());
    }
    if first == at.well_known(Wk::Source) || first == at.well_known(Wk::Dot) {
        if argv.len() > 1 {
            return source_file(argv[1], ts, env, at);
        }
        return Ok(());
    }
    if first == at.well_known(Wk::Time) {
        if argv.len() > 1 {
            if spawn_and_wait(ts, env, at, &argv[1..], true).is_err() {
                ts.print("error\r\n");
            }
        }
        return Ok(());
    }
    if spawn_and_wait(ts, env, at, &argv, false).is_err() {
        ts.print("error\r\n");
    }
    Ok(())
}

fn builtin_cd(env: &mut Environment, at: &mut AtomTable, argv: &[Atom]) -> Result<()> {
    if argv.len() != 2 {
        return Err(ShellError::Value);
    }
    let dir = CString::new(at.text(argv[1])).map_err(|_| ShellError::Value)?;
    unsafe {
        libc::chdir(dir.as_ptr());
    }
    env.refresh_cwd(at, crate::WINDOWS_STYLE)
}

/// Reads a file and processes it line by line, recursively. A missing or
/// unreadable file is not an error; `exit` inside the file unwinds all
/// the way out.
pub fn source_file(
    path: Atom,
    ts: &mut TermState,
    env: &mut Environment,
    at: &mut AtomTable,
) -> Result<()> {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;
    let Ok(content) = std::fs::read(OsStr::from_bytes(at.text(path))) else {
        return Ok(());
    };
    let mut rest: &[u8] = &content;
    while let Some(pos) = rest
        .iter()
        .position(|&b| b == b'\0' || b == b'\n' || b == b'\r')
    {
        let line = &rest[..pos + 1];
        rest = &rest[pos + 1..];
        if let Err(ShellError::Exit) = process_line(line, ts, env, at) {
            return Err(ShellError::Exit);
        }
    }
    Ok(())
}
