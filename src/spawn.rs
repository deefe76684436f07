//! Foreground process execution.
//!
//! Spawning brackets the terminal state machine: the original mode is
//! restored before the child starts (it expects a cooked terminal) and the
//! state is marked unknown afterwards, since the child may have
//! reconfigured the terminal arbitrarily. The wait reaps usage numbers so
//! the `time` builtin can report them.

use std::ffi::CString;

use crate::atom::{Atom, AtomTable};
use crate::env::Environment;
use crate::error::{Result, ShellError};
use crate::resolve::resolve_program;
use crate::term::TermState;

/// Serializes argv into the single command-line string the DOS-family
/// spawn primitive takes. The program is always quoted; arguments are
/// quoted only when they contain whitespace. Embedded double quotes are
/// not escaped.
pub fn build_command_line(at: &AtomTable, argv: &[Atom]) -> Vec<u8> {
    let mut out = Vec::new();
    for (i, &a) in argv.iter().enumerate() {
        let text = at.text(a);
        if i > 0 {
            out.push(b' ');
        }
        if i == 0 || text.contains(&b' ') || text.contains(&b'\t') {
            out.push(b'"');
            out.extend_from_slice(text);
            out.push(b'"');
        } else {
            out.extend_from_slice(text);
        }
    }
    out
}

pub fn spawn_and_wait(
    ts: &mut TermState,
    env: &mut Environment,
    at: &mut AtomTable,
    argv: &[Atom],
    report_time: bool,
) -> Result<()> {
    if argv.is_empty() {
        return Err(ShellError::Value);
    }
    let path = match resolve_program(at, env, argv[0], crate::WINDOWS_STYLE) {
        Ok(path) => path,
        Err(err) => {
            ts.print(&format!(
                "Unable to resolve program path for '{}'\r\n",
                String::from_utf8_lossy(at.text(argv[0]))
            ));
            return Err(err);
        }
    };
    let envp = env.envp_posix(at)?;
    let path_c = CString::new(path.clone()).map_err(|_| ShellError::Value)?;
    let mut argv_c = Vec::with_capacity(argv.len());
    for &a in argv {
        argv_c.push(CString::new(at.text(a)).map_err(|_| ShellError::Value)?);
    }
    let mut argv_ptrs: Vec<*mut libc::c_char> = argv_c
        .iter()
        .map(|c| c.as_ptr() as *mut libc::c_char)
        .collect();
    argv_ptrs.push(std::ptr::null_mut());
    let mut envp_ptrs: Vec<*mut libc::c_char> = envp
        .iter()
        .map(|c| c.as_ptr() as *mut libc::c_char)
        .collect();
    envp_ptrs.push(std::ptr::null_mut());

    ts.orig()?;
    if env.debug {
        ts.print(&format!("spawning '{}'\r\n", String::from_utf8_lossy(&path)));
        for (i, a) in argv.iter().enumerate() {
            ts.print(&format!(
                "argv[{i}] '{}'\r\n",
                String::from_utf8_lossy(at.text(*a))
            ));
        }
    }
    let mut pid: libc::pid_t = 0;
    let e = unsafe {
        libc::posix_spawn(
            &mut pid,
            path_c.as_ptr(),
            std::ptr::null(),
            std::ptr::null(),
            argv_ptrs.as_ptr(),
            envp_ptrs.as_ptr(),
        )
    };
    ts.unknown();
    if e != 0 {
        ts.print(&format!("\r{}\r\n", std::io::Error::from_raw_os_error(e)));
        return Ok(());
    }
    let mut status: libc::c_int = 0;
    let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
    loop {
        let p = unsafe { libc::wait4(pid, &mut status, 0, &mut usage) };
        if p == -1 && std::io::Error::last_os_error().raw_os_error() == Some(libc::EINTR) {
            continue;
        }
        break;
    }
    if report_time {
        ts.print(&format!(
            "user   time: {}s{}\u{b5}s\r\n",
            usage.ru_utime.tv_sec, usage.ru_utime.tv_usec
        ));
        ts.print(&format!(
            "system time: {}s{}\u{b5}s\r\n",
            usage.ru_stime.tv_sec, usage.ru_stime.tv_usec
        ));
    }
    Ok(())
}
