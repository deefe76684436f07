//! The shell's environment: a map from key atoms to value atoms, plus the
//! derived state that hangs off it (displayed working directory, terminal
//! dimensions, debug flag, OS flavor).
//!
//! On the case-insensitive family lookups key on each atom's fold sibling
//! while the stored key keeps its original casing, so `set Path` replaces
//! the slot `PATH` occupies and the listing afterwards shows `Path`.

use std::ffi::CString;

use bytes::{BufMut, BytesMut};

use crate::atom::{Atom, AtomTable, Wk};
use crate::error::{Result, ShellError};
use crate::hash::fast_reduce32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsFlavor {
    Apple,
    Windows,
    Linux,
    Other,
}

impl OsFlavor {
    pub fn host() -> OsFlavor {
        if cfg!(target_os = "macos") {
            OsFlavor::Apple
        } else if cfg!(windows) {
            OsFlavor::Windows
        } else if cfg!(target_os = "linux") {
            OsFlavor::Linux
        } else {
            OsFlavor::Other
        }
    }
}

pub struct Environment {
    entries: Vec<(Atom, Atom)>,
    // Open-addressed index over `entries`: 1-based positions, 0 = empty.
    slots: Vec<u32>,
    cap: usize,
    sorted: bool,
    case_insensitive: bool,
    pub debug: bool,
    pub cols: usize,
    pub lines: usize,
    pub home: Option<Atom>,
    pub flavor: OsFlavor,
    cwd_display: Vec<u8>,
}

impl Environment {
    pub fn new(case_insensitive: bool, flavor: OsFlavor) -> Environment {
        Environment {
            entries: Vec::new(),
            slots: Vec::new(),
            cap: 0,
            sorted: false,
            case_insensitive,
            debug: false,
            cols: 0,
            lines: 0,
            home: None,
            flavor,
            cwd_display: Vec::new(),
        }
    }

    /// Captures the process environment.
    pub fn from_os(
        at: &mut AtomTable,
        case_insensitive: bool,
        flavor: OsFlavor,
    ) -> Result<Environment> {
        let mut env = Environment::new(case_insensitive, flavor);
        for (k, v) in std::env::vars_os() {
            let key = at.atomize(os_bytes(&k))?;
            let value = at.atomize(os_bytes(&v))?;
            env.set(at, key, value)?;
        }
        env.home = env.get(at, at.well_known(Wk::VarHome));
        Ok(env)
    }

    fn lookup_key(&self, at: &AtomTable, key: Atom) -> Atom {
        if self.case_insensitive {
            at.fold(key)
        } else {
            key
        }
    }

    pub fn get(&self, at: &AtomTable, key: Atom) -> Option<Atom> {
        if self.cap == 0 {
            return None;
        }
        let key = self.lookup_key(at, key);
        let mut idx = fast_reduce32(at.hash(key), self.cap as u32) as usize;
        loop {
            let pos = self.slots[idx];
            if pos == 0 {
                break;
            }
            let (k, v) = self.entries[(pos - 1) as usize];
            if self.lookup_key(at, k) == key {
                return Some(v);
            }
            idx += 1;
            if idx >= self.slots.len() {
                idx = 0;
            }
        }
        if self.case_insensitive {
            // The index can go stale across fold collisions; rescan.
            for &(k, v) in &self.entries {
                if at.fold(k) == key {
                    return Some(v);
                }
            }
        }
        None
    }

    pub fn get_named(&self, at: &mut AtomTable, name: &[u8]) -> Option<Atom> {
        let key = at.atomize(name).ok()?;
        self.get(at, key)
    }

    pub fn set(&mut self, at: &AtomTable, key: Atom, value: Atom) -> Result<()> {
        let lkey = self.lookup_key(at, key);
        if self.entries.len() * 10 / 8 >= self.cap {
            self.grow(at)?;
        }
        let mut idx = fast_reduce32(at.hash(lkey), self.cap as u32) as usize;
        loop {
            let pos = self.slots[idx];
            if pos == 0 {
                break;
            }
            let entry = &mut self.entries[(pos - 1) as usize];
            let stored = if self.case_insensitive {
                at.fold(entry.0)
            } else {
                entry.0
            };
            if stored == lkey {
                if self.case_insensitive {
                    entry.0 = key;
                }
                entry.1 = value;
                return Ok(());
            }
            idx += 1;
            if idx >= self.slots.len() {
                idx = 0;
            }
        }
        self.slots[idx] = self.entries.len() as u32 + 1;
        self.entries.push((key, value));
        self.sorted = false;
        Ok(())
    }

    pub fn set_bytes(&mut self, at: &mut AtomTable, key: Atom, value: &[u8]) -> Result<()> {
        let value = at.atomize(value)?;
        self.set(at, key, value)
    }

    fn grow(&mut self, at: &AtomTable) -> Result<()> {
        let cap = if self.cap == 0 { 32 } else { self.cap * 2 };
        let mut slots = Vec::new();
        slots.try_reserve(2 * cap)?;
        slots.resize(2 * cap, 0u32);
        for (i, &(k, _)) in self.entries.iter().enumerate() {
            let lkey = self.lookup_key(at, k);
            let mut idx = fast_reduce32(at.hash(lkey), cap as u32) as usize;
            while slots[idx] != 0 {
                idx += 1;
                if idx >= slots.len() {
                    idx = 0;
                }
            }
            slots[idx] = i as u32 + 1;
        }
        self.slots = slots;
        self.cap = cap;
        Ok(())
    }

    /// Sorts entries by key (by fold on the case-insensitive family) and
    /// rebuilds the index to match. Serialization requires sorted order.
    pub fn sort(&mut self, at: &AtomTable) {
        if self.sorted || self.entries.is_empty() {
            return;
        }
        let ci = self.case_insensitive;
        self.entries.sort_by(|a, b| {
            let (ka, kb) = if ci {
                (at.fold(a.0), at.fold(b.0))
            } else {
                (a.0, b.0)
            };
            at.text(ka).cmp(at.text(kb))
        });
        for s in self.slots.iter_mut() {
            *s = 0;
        }
        for i in 0..self.entries.len() {
            let lkey = self.lookup_key(at, self.entries[i].0);
            let mut idx = fast_reduce32(at.hash(lkey), self.cap as u32) as usize;
            while self.slots[idx] != 0 {
                idx += 1;
                if idx >= self.slots.len() {
                    idx = 0;
                }
            }
            self.slots[idx] = i as u32 + 1;
        }
        self.sorted = true;
    }

    pub fn sorted_entries(&mut self, at: &AtomTable) -> &[(Atom, Atom)] {
        self.sort(at);
        &self.entries
    }

    pub fn case_insensitive(&self) -> bool {
        self.case_insensitive
    }

    /// `KEY=VALUE` strings for posix spawn, sorted.
    pub fn envp_posix(&mut self, at: &AtomTable) -> Result<Vec<CString>> {
        self.sort(at);
        let mut out = Vec::with_capacity(self.entries.len());
        for &(k, v) in &self.entries {
            let mut s = Vec::with_capacity(at.len(k) + 1 + at.len(v));
            s.extend_from_slice(at.text(k));
            s.push(b'=');
            s.extend_from_slice(at.text(v));
            out.push(CString::new(s).map_err(|_| ShellError::Value)?);
        }
        Ok(out)
    }

    /// The DOS-family environment block: `KEY=VALUE\0` records with a
    /// second NUL closing the block.
    pub fn envp_block(&mut self, at: &AtomTable) -> BytesMut {
        self.sort(at);
        let mut block = BytesMut::new();
        for &(k, v) in &self.entries {
            block.put_slice(at.text(k));
            block.put_u8(b'=');
            block.put_slice(at.text(v));
            block.put_u8(0);
        }
        block.put_u8(0);
        block
    }

    /// Where the startup config lives. An existing `DRSH_CONFIG` wins.
    pub fn config_path(&mut self, at: &mut AtomTable) -> Result<Vec<u8>> {
        if let Some(path) = self.get(at, at.well_known(Wk::VarConfig)) {
            return Ok(at.text(path).to_vec());
        }
        let mut path = self.app_dir(at)?;
        path.extend_from_slice(b"/drsh/drsh_config.drsh");
        Ok(path)
    }

    /// Where history is read and appended. An existing `DRSH_HISTORY`
    /// wins; otherwise the computed path is stored back into it.
    pub fn history_path(&mut self, at: &mut AtomTable) -> Result<Atom> {
        if let Some(path) = self.get(at, at.well_known(Wk::VarHistory)) {
            return Ok(path);
        }
        let mut path = match self.flavor {
            OsFlavor::Apple | OsFlavor::Windows => self.app_dir(at)?,
            _ => {
                let mut xdg = self.get_named(at, b"XDG_STATE_HOME");
                if !xdg.is_some_and(|a| at.len(a) > 0) {
                    xdg = self.get_named(at, b"XDG_DATA_HOME");
                }
                match xdg.filter(|&a| at.len(a) > 0) {
                    Some(dir) => at.text(dir).to_vec(),
                    None => {
                        let home = self.home.filter(|&h| at.len(h) > 0).ok_or(ShellError::NotFound)?;
                        let mut p = at.text(home).to_vec();
                        p.extend_from_slice(b"/.local/state");
                        p
                    }
                }
            }
        };
        path.extend_from_slice(b"/drsh/drsh_history.txt");
        let atom = at.atomize(&path)?;
        self.set(at, at.well_known(Wk::VarHistory), atom)?;
        Ok(atom)
    }

    /// The per-flavor application data directory shared by config and
    /// history.
    fn app_dir(&mut self, at: &mut AtomTable) -> Result<Vec<u8>> {
        match self.flavor {
            OsFlavor::Apple => {
                let home = self.home.filter(|&h| at.len(h) > 0).ok_or(ShellError::NotFound)?;
                let mut p = at.text(home).to_vec();
                p.extend_from_slice(b"/Library/Application Support");
                Ok(p)
            }
            OsFlavor::Windows => {
                let local = self
                    .get_named(at, b"LOCALAPPDATA")
                    .filter(|&a| at.len(a) > 0)
                    .ok_or(ShellError::NotFound)?;
                Ok(at.text(local).to_vec())
            }
            _ => {
                let xdg = self.get_named(at, b"XDG_CONFIG_HOME").filter(|&a| at.len(a) > 0);
                match xdg {
                    Some(dir) => Ok(at.text(dir).to_vec()),
                    None => {
                        let home = self.home.filter(|&h| at.len(h) > 0).ok_or(ShellError::NotFound)?;
                        let mut p = at.text(home).to_vec();
                        p.extend_from_slice(b"/.config");
                        Ok(p)
                    }
                }
            }
        }
    }

    /// Points `SHELL` at this executable.
    pub fn set_shell_path(&mut self, at: &mut AtomTable) -> Result<()> {
        if self.flavor == OsFlavor::Other {
            return Err(ShellError::Unimplemented);
        }
        let exe = std::env::current_exe().map_err(|_| ShellError::NotFound)?;
        let key = at.well_known(Wk::VarShell);
        self.set_bytes(at, key, os_bytes(exe.as_os_str()))
    }

    pub fn increment_shlvl(&mut self, at: &mut AtomTable) -> Result<()> {
        let key = at.well_known(Wk::VarShlvl);
        let lvl: i64 = self
            .get(at, key)
            .and_then(|a| std::str::from_utf8(at.text(a)).ok())
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(0);
        self.set_bytes(at, key, format!("{}", lvl + 1).as_bytes())
    }

    /// Reads the OS working directory, stores it in `PWD`, and rebuilds
    /// the display form shown in the prompt.
    pub fn refresh_cwd(&mut self, at: &mut AtomTable, backslash_is_sep: bool) -> Result<()> {
        match std::env::current_dir() {
            Ok(wd) => {
                let bytes = os_bytes(wd.as_os_str()).to_vec();
                let key = at.well_known(Wk::VarPwd);
                self.set_bytes(at, key, &bytes)?;
                let home = self.home.map(|h| at.text(h).to_vec());
                self.cwd_display = display_cwd(&bytes, home.as_deref(), backslash_is_sep);
            }
            Err(_) => {
                self.cwd_display = b"???".to_vec();
            }
        }
        Ok(())
    }

    pub fn display_cwd(&self) -> &[u8] {
        &self.cwd_display
    }
}

/// Builds the prompt form of a working directory: a `HOME` prefix (on a
/// separator boundary) becomes `~`, backslashes normalize to `/` on the
/// DOS family, and interior components condense to their first byte.
pub fn display_cwd(wd: &[u8], home: Option<&[u8]>, backslash_is_sep: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(wd.len() + 1);
    let mut rest = wd;
    if let Some(home) = home {
        if !home.is_empty() && wd.len() >= home.len() && &wd[..home.len()] == home {
            let boundary = wd.len() == home.len()
                || wd[home.len()] == b'/'
                || (backslash_is_sep && wd[home.len()] == b'\\');
            if boundary {
                out.push(b'~');
                rest = &wd[home.len()..];
            }
        }
    }
    if backslash_is_sep {
        out.extend(rest.iter().map(|&b| if b == b'\\' { b'/' } else { b }));
    } else {
        out.extend_from_slice(rest);
    }
    dir_condense(&mut out);
    out
}

/// Condenses each directory name between the first and last `/` to its
/// first byte: `~/src/project/drsh` displays as `~/s/p/drsh`.
fn dir_condense(cwd: &mut Vec<u8>) {
    let first = match cwd.iter().position(|&b| b == b'/') {
        Some(i) => i,
        None => return,
    };
    let last = match cwd.iter().rposition(|&b| b == b'/') {
        Some(i) => i,
        None => return,
    };
    if last == 0 {
        return;
    }
    let mut out = Vec::with_capacity(cwd.len());
    out.extend_from_slice(&cwd[..first]);
    let mut keep = true;
    for &b in &cwd[first..last] {
        if b == b'/' {
            keep = true;
            out.push(b);
        } else if keep {
            out.push(b);
            keep = false;
        }
    }
    out.extend_from_slice(&cwd[last..]);
    *cwd = out;
}

#[cfg(unix)]
pub fn os_bytes(s: &std::ffi::OsStr) -> &[u8] {
    use std::os::unix::ffi::OsStrExt;
    s.as_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> AtomTable {
        AtomTable::new().unwrap()
    }

    #[test]
    fn set_then_get_round_trips() {
        let mut at = table();
        let mut env = Environment::new(false, OsFlavor::Linux);
        let k = at.atomize(b"X").unwrap();
        let v = at.atomize(b"hello").unwrap();
        env.set(&at, k, v).unwrap();
        assert_eq!(env.get(&at, k), Some(v));
        let v2 = at.atomize(b"world").unwrap();
        env.set(&at, k, v2).unwrap();
        assert_eq!(env.get(&at, k), Some(v2));
        assert_eq!(env.entries.len(), 1);
    }

    #[test]
    fn case_sensitive_keys_are_distinct() {
        let mut at = table();
        let mut env = Environment::new(false, OsFlavor::Linux);
        let upper = at.atomize(b"PATH").unwrap();
        let lower = at.atomize(b"path").unwrap();
        let v = at.atomize(b"/bin").unwrap();
        env.set(&at, upper, v).unwrap();
        assert_eq!(env.get(&at, upper), Some(v));
        assert_eq!(env.get(&at, lower), None);
    }

    #[test]
    fn case_insensitive_lookup_folds() {
        let mut at = table();
        let mut env = Environment::new(true, OsFlavor::Windows);
        let upper = at.atomize(b"PATH").unwrap();
        let lower = at.atomize(b"path").unwrap();
        let v = at.atomize(b"C:\\bin").unwrap();
        env.set(&at, upper, v).unwrap();
        assert_eq!(env.get(&at, lower), Some(v));
        assert_eq!(env.get(&at, upper), Some(v));
    }

    #[test]
    fn case_insensitive_set_replaces_stored_casing() {
        let mut at = table();
        let mut env = Environment::new(true, OsFlavor::Windows);
        let upper = at.atomize(b"PATH").unwrap();
        let mixed = at.atomize(b"Path").unwrap();
        let v1 = at.atomize(b"one").unwrap();
        let v2 = at.atomize(b"two").unwrap();
        env.set(&at, upper, v1).unwrap();
        env.set(&at, mixed, v2).unwrap();
        assert_eq!(env.entries.len(), 1);
        assert_eq!(env.entries[0].0, mixed);
        assert_eq!(env.get(&at, upper), Some(v2));
    }

    #[test]
    fn survives_growth_past_initial_capacity() {
        let mut at = table();
        let mut env = Environment::new(false, OsFlavor::Linux);
        let mut keys = Vec::new();
        for i in 0..200 {
            let k = at.atomize(format!("VAR_{i}").as_bytes()).unwrap();
            let v = at.atomize(format!("value-{i}").as_bytes()).unwrap();
            env.set(&at, k, v).unwrap();
            keys.push((k, v));
        }
        for (k, v) in keys {
            assert_eq!(env.get(&at, k), Some(v));
        }
    }

    #[test]
    fn envp_posix_is_sorted() {
        let mut at = table();
        let mut env = Environment::new(false, OsFlavor::Linux);
        for (k, v) in [("ZED", "1"), ("ALPHA", "2"), ("MID", "3")] {
            let k = at.atomize(k.as_bytes()).unwrap();
            let v = at.atomize(v.as_bytes()).unwrap();
            env.set(&at, k, v).unwrap();
        }
        let envp = env.envp_posix(&at).unwrap();
        let strings: Vec<&str> = envp.iter().map(|c| c.to_str().unwrap()).collect();
        assert_eq!(strings, ["ALPHA=2", "MID=3", "ZED=1"]);
        // lookups still work after the sort rebuilt the index
        let k = at.atomize(b"MID").unwrap();
        assert_eq!(env.get(&at, k).map(|v| at.text(v).to_vec()), Some(b"3".to_vec()));
    }

    #[test]
    fn envp_block_is_double_nul_terminated() {
        let mut at = table();
        let mut env = Environment::new(true, OsFlavor::Windows);
        let k = at.atomize(b"A").unwrap();
        let v = at.atomize(b"b").unwrap();
        env.set(&at, k, v).unwrap();
        let block = env.envp_block(&at);
        assert_eq!(&block[..], b"A=b\0\0");
    }

    #[test]
    fn config_path_prefers_xdg_config_home() {
        let mut at = table();
        let mut env = Environment::new(false, OsFlavor::Linux);
        let k = at.atomize(b"XDG_CONFIG_HOME").unwrap();
        let v = at.atomize(b"/xdg").unwrap();
        env.set(&at, k, v).unwrap();
        assert_eq!(env.config_path(&mut at).unwrap(), b"/xdg/drsh/drsh_config.drsh");
    }

    #[test]
    fn config_path_falls_back_to_home() {
        let mut at = table();
        let mut env = Environment::new(false, OsFlavor::Linux);
        env.home = Some(at.atomize(b"/home/u").unwrap());
        assert_eq!(
            env.config_path(&mut at).unwrap(),
            b"/home/u/.config/drsh/drsh_config.drsh"
        );
    }

    #[test]
    fn config_path_apple_uses_application_support() {
        let mut at = table();
        let mut env = Environment::new(false, OsFlavor::Apple);
        env.home = Some(at.atomize(b"/Users/u").unwrap());
        assert_eq!(
            env.config_path(&mut at).unwrap(),
            b"/Users/u/Library/Application Support/drsh/drsh_config.drsh".to_vec()
        );
    }

    #[test]
    fn explicit_drsh_config_overrides() {
        let mut at = table();
        let mut env = Environment::new(false, OsFlavor::Linux);
        let k = at.well_known(Wk::VarConfig);
        let v = at.atomize(b"/etc/custom.drsh").unwrap();
        env.set(&at, k, v).unwrap();
        assert_eq!(env.config_path(&mut at).unwrap(), b"/etc/custom.drsh");
    }

    #[test]
    fn history_path_state_home_chain_and_sets_var() {
        let mut at = table();
        let mut env = Environment::new(false, OsFlavor::Linux);
        env.home = Some(at.atomize(b"/home/u").unwrap());
        let h = env.history_path(&mut at).unwrap();
        assert_eq!(at.text(h), b"/home/u/.local/state/drsh/drsh_history.txt");
        assert_eq!(env.get(&at, at.well_known(Wk::VarHistory)), Some(h));

        let mut env = Environment::new(false, OsFlavor::Linux);
        let k = at.atomize(b"XDG_STATE_HOME").unwrap();
        let v = at.atomize(b"/state").unwrap();
        env.set(&at, k, v).unwrap();
        let h = env.history_path(&mut at).unwrap();
        assert_eq!(at.text(h), b"/state/drsh/drsh_history.txt");
    }

    #[test]
    fn shlvl_counts_up_from_missing_and_garbage() {
        let mut at = table();
        let mut env = Environment::new(false, OsFlavor::Linux);
        env.increment_shlvl(&mut at).unwrap();
        let key = at.well_known(Wk::VarShlvl);
        assert_eq!(env.get(&at, key).map(|a| at.text(a).to_vec()), Some(b"1".to_vec()));
        env.increment_shlvl(&mut at).unwrap();
        assert_eq!(env.get(&at, key).map(|a| at.text(a).to_vec()), Some(b"2".to_vec()));
        env.set_bytes(&mut at, key, b"junk").unwrap();
        env.increment_shlvl(&mut at).unwrap();
        assert_eq!(env.get(&at, key).map(|a| at.text(a).to_vec()), Some(b"1".to_vec()));
    }

    #[test]
    fn display_condenses_interior_components() {
        assert_eq!(
            display_cwd(b"/home/u/src/project", Some(b"/home/u"), false),
            b"~/s/project"
        );
        assert_eq!(
            display_cwd(b"/home/u/src/deep/project/tree", Some(b"/home/u"), false),
            b"~/s/d/p/tree"
        );
        assert_eq!(display_cwd(b"/home/u", Some(b"/home/u"), false), b"~");
        assert_eq!(display_cwd(b"/tmp", None, false), b"/tmp");
        assert_eq!(display_cwd(b"/a/b/c", None, false), b"/a/b/c");
    }

    #[test]
    fn display_requires_separator_boundary_after_home() {
        assert_eq!(
            display_cwd(b"/home/user2/x", Some(b"/home/user"), false),
            b"/h/u/x"
        );
    }

    #[test]
    fn display_normalizes_backslashes_on_dos() {
        assert_eq!(
            display_cwd(b"C:\\Users\\u\\src\\proj", Some(b"C:\\Users\\u"), true),
            b"~/s/proj"
        );
    }
}
