//! Program path resolution.
//!
//! A name with a directory component is taken as given (POSIX) or probed
//! through the PATHEXT extension list (DOS family). A bare name walks the
//! PATH directories in order; the DOS family additionally probes the
//! working directory after PATH is exhausted, mirroring the implicit `.`
//! those shells have always had.

use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use crate::atom::{Atom, AtomTable, Wk};
use crate::env::Environment;
use crate::error::{Result, ShellError};

pub fn path_is_abs(path: &[u8], windows_style: bool) -> bool {
    let Some(&first) = path.first() else {
        return false;
    };
    if windows_style {
        if path.len() > 2 && path[1] == b':' && (path[2] == b'/' || path[2] == b'\\') {
            let c = path[0] | 0x20;
            if c.is_ascii_lowercase() {
                return true;
            }
        }
        if first == b'\\' {
            return true;
        }
    }
    first == b'/'
}

fn iendswith(haystack: &[u8], suffix: &[u8]) -> bool {
    haystack.len() >= suffix.len()
        && haystack[haystack.len() - suffix.len()..]
            .iter()
            .zip(suffix)
            .all(|(&a, &b)| a | 0x20 == b | 0x20)
}

fn exists(path: &[u8]) -> bool {
    Path::new(OsStr::from_bytes(path)).exists()
}

fn pathext(at: &AtomTable, env: &Environment) -> Vec<Vec<u8>> {
    let exts = env
        .get(at, at.well_known(Wk::VarPathext))
        .map(|a| at.text(a).to_vec())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| b".exe".to_vec());
    exts.split(|&b| b == b';')
        .filter(|e| !e.is_empty())
        .map(|e| e.to_vec())
        .collect()
}

/// Probes `candidate` under the DOS extension rule: a name already
/// carrying a known extension is probed exactly once, anything else is
/// probed with each extension appended in PATHEXT order.
fn probe_with_exts(candidate: &[u8], exts: &[Vec<u8>]) -> Option<Vec<u8>> {
    if exts.iter().any(|e| iendswith(candidate, e)) {
        return exists(candidate).then(|| candidate.to_vec());
    }
    for ext in exts {
        let mut probe = candidate.to_vec();
        probe.extend_from_slice(ext);
        if exists(&probe) {
            return Some(probe);
        }
    }
    None
}

fn join_dir(dir: &[u8], name: &[u8], windows_style: bool) -> Vec<u8> {
    let mut out = dir.to_vec();
    let trailing_sep = matches!(dir.last(), Some(b'/')) || (windows_style && matches!(dir.last(), Some(b'\\')));
    if !trailing_sep {
        out.push(b'/');
    }
    out.extend_from_slice(name);
    out
}

/// Resolves `program` to the path handed to the spawn primitive.
pub fn resolve_program(
    at: &AtomTable,
    env: &Environment,
    program: Atom,
    windows_style: bool,
) -> Result<Vec<u8>> {
    let prog = at.text(program);
    let has_dir = path_is_abs(prog, windows_style)
        || prog.contains(&b'/')
        || (windows_style && prog.contains(&b'\\'));
    if has_dir {
        if !windows_style {
            return Ok(prog.to_vec());
        }
        let exts = pathext(at, env);
        return probe_with_exts(prog, &exts).ok_or(ShellError::NotFound);
    }
    let path = env
        .get(at, at.well_known(Wk::VarPath))
        .ok_or(ShellError::NotFound)?;
    let separator = if windows_style { b';' } else { b':' };
    let exts = if windows_style {
        pathext(at, env)
    } else {
        Vec::new()
    };
    for dir in at.text(path).to_vec().split(|&b| b == separator) {
        if dir.is_empty() {
            continue;
        }
        let candidate = join_dir(dir, prog, windows_style);
        if windows_style {
            if let Some(found) = probe_with_exts(&candidate, &exts) {
                return Ok(found);
            }
        } else if exists(&candidate) {
            return Ok(candidate);
        }
    }
    if windows_style {
        if let Some(pwd) = env.get(at, at.well_known(Wk::VarPwd)) {
            let candidate = join_dir(at.text(pwd), prog, true);
            if let Some(found) = probe_with_exts(&candidate, &exts) {
                return Ok(found);
            }
        }
    }
    Err(ShellError::NotFound)
}
