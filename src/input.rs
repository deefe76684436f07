//! Raw-terminal line input: keystroke decoding, the write-buffer editor,
//! history navigation, completion cycling, and the multi-line redisplay.
//!
//! Bytes from the terminal land in the read buffer and are decoded one
//! editing command at a time. Commands mutate the write buffer (the line
//! being edited) and mark it for redisplay; the redisplay pass repaints
//! the prompt and line in a single composed write so partially drawn
//! states never hit the screen.

use bytes::{BufMut, BytesMut};
use chrono::Local;

use crate::atom::{Atom, AtomTable};
use crate::complete::{collect_candidates, Word};
use crate::env::Environment;
use crate::error::{Result, ShellError};
use crate::term::TermState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cmd {
    MoveHome,
    MoveEnd,
    MoveLeft,
    MoveRight,
    MoveUp,
    MoveDown,
    DeleteBack,
    DeleteForward,
    DeleteForwardOrEof,
    KillEndOfLine,
    Interrupt,
    ClearScreen,
    Tab,
    ShiftTab,
    Accept,
    Enter,
    Esc,
    Nop,
    Literal(u8),
}

/// Decodes the shortest command at the front of `buf`. Returns the
/// command and how many bytes it consumed, or `None` when the bytes so
/// far are an unfinished escape sequence and more input is needed.
pub fn decode(buf: &[u8]) -> Option<(Cmd, usize)> {
    let &c = buf.first()?;
    if c < 27 {
        let cmd = match c {
            1 => Cmd::MoveHome,
            2 => Cmd::MoveLeft,
            3 => Cmd::Interrupt,
            4 => Cmd::DeleteForwardOrEof,
            5 => Cmd::MoveEnd,
            6 => Cmd::MoveRight,
            8 => Cmd::DeleteBack,
            9 => Cmd::Tab,
            10 => Cmd::Accept,
            11 => Cmd::KillEndOfLine,
            12 => Cmd::ClearScreen,
            13 => Cmd::Enter,
            14 => Cmd::MoveDown,
            16 => Cmd::MoveUp,
            0 => Cmd::Literal(0),
            _ => Cmd::Nop,
        };
        return Some((cmd, 1));
    }
    if c == 127 {
        return Some((Cmd::DeleteBack, 1));
    }
    if c > 27 {
        return Some((Cmd::Literal(c), 1));
    }
    if buf.len() > 2 {
        if buf[1] == b'[' {
            if buf[2].is_ascii_digit() && buf.len() > 3 && buf[3] == b'~' && buf[2] == b'3' {
                return Some((Cmd::DeleteForward, 4));
            }
            match buf[2] {
                b'A' => return Some((Cmd::MoveUp, 3)),
                b'B' => return Some((Cmd::MoveDown, 3)),
                b'C' => return Some((Cmd::MoveRight, 3)),
                b'D' => return Some((Cmd::MoveLeft, 3)),
                b'H' => return Some((Cmd::MoveHome, 3)),
                b'F' => return Some((Cmd::MoveEnd, 3)),
                b'Z' => return Some((Cmd::ShiftTab, 3)),
                _ => {}
            }
            // unrecognized or unfinished CSI: ask for more bytes
            return None;
        }
        if buf[1] == b'O' {
            match buf[2] {
                b'H' => return Some((Cmd::MoveHome, 3)),
                b'F' => return Some((Cmd::MoveEnd, 3)),
                _ => {}
            }
        }
    }
    Some((Cmd::Esc, 1))
}

pub struct Input {
    read_buffer: Vec<u8>,
    read_cursor: usize,
    pub write_buffer: Vec<u8>,
    pub write_cursor: usize,
    prompt: Vec<u8>,
    prompt_visual_len: usize,
    history: Vec<Atom>,
    pub hist_start: usize,
    hist_cursor: usize,
    completions: Vec<Word>,
    completion_cursor: usize,
    tab_completion_active: bool,
    needs_redisplay: bool,
    needs_clear_screen: bool,
}

impl Input {
    pub fn new() -> Input {
        Input {
            read_buffer: Vec::new(),
            read_cursor: 0,
            write_buffer: Vec::new(),
            write_cursor: 0,
            prompt: b"> ".to_vec(),
            prompt_visual_len: 2,
            history: Vec::new(),
            hist_start: 0,
            hist_cursor: 0,
            completions: Vec::new(),
            completion_cursor: 0,
            tab_completion_active: false,
            needs_redisplay: false,
            needs_clear_screen: false,
        }
    }

    fn move_home(&mut self) {
        self.write_cursor = 0;
        self.needs_redisplay = true;
    }

    fn move_end(&mut self) {
        self.write_cursor = self.write_buffer.len();
        self.needs_redisplay = true;
    }

    fn move_left(&mut self) {
        // byte granular; multibyte sequences take several presses
        if self.write_cursor > 0 {
            self.write_cursor -= 1;
        }
        self.needs_redisplay = true;
    }

    fn move_right(&mut self) {
        if self.write_cursor < self.write_buffer.len() {
            self.write_cursor += 1;
        }
        self.needs_redisplay = true;
    }

    fn del_left(&mut self) {
        if self.write_cursor == 0 {
            return;
        }
        self.write_buffer.remove(self.write_cursor - 1);
        self.write_cursor -= 1;
        self.needs_redisplay = true;
    }

    fn del_right(&mut self) {
        if self.write_cursor == self.write_buffer.len() {
            return;
        }
        self.write_buffer.remove(self.write_cursor);
        self.needs_redisplay = true;
    }

    fn kill_end_of_line(&mut self) {
        if self.write_buffer.len() == self.write_cursor {
            return;
        }
        self.write_buffer.truncate(self.write_cursor);
        self.needs_redisplay = true;
    }

    fn clear_line(&mut self) {
        if self.write_cursor == 0 && self.write_buffer.is_empty() {
            return;
        }
        self.write_buffer.clear();
        self.write_cursor = 0;
        self.needs_redisplay = true;
    }

    fn input_one(&mut self, c: u8) {
        self.write_buffer.insert(self.write_cursor, c);
        self.write_cursor += 1;
        self.needs_redisplay = true;
    }

    fn load_history_entry(&mut self, at: &AtomTable) {
        let atom = self.history[self.hist_cursor];
        self.write_buffer.clear();
        self.write_buffer.extend_from_slice(at.text(atom));
        self.write_cursor = self.write_buffer.len();
    }

    fn move_up(&mut self, at: &AtomTable) {
        if self.hist_cursor == 0 {
            return;
        }
        self.hist_cursor -= 1;
        self.needs_redisplay = true;
        self.load_history_entry(at);
    }

    fn move_down(&mut self, at: &AtomTable) {
        self.hist_cursor += 1;
        self.needs_redisplay = true;
        if self.hist_cursor >= self.history.len() {
            self.hist_cursor = self.history.len();
            self.write_buffer.clear();
            self.write_cursor = 0;
            return;
        }
        self.load_history_entry(at);
    }

    /// Records an accepted line, collapsing consecutive duplicates, and
    /// parks the history cursor past the end.
    pub fn hist_add(&mut self, at: &AtomTable, atom: Atom) {
        if at.len(atom) == 0 {
            return;
        }
        self.hist_cursor = self.history.len();
        if self.history.last() == Some(&atom) {
            return;
        }
        self.history.push(atom);
        self.hist_cursor = self.history.len();
    }

    pub fn history(&self) -> &[Atom] {
        &self.history
    }

    fn end_tab_completion(&mut self) {
        self.tab_completion_active = false;
        self.completions.clear();
    }

    /// First Tab collects and ranks candidates for the token at the
    /// cursor; every further Tab swaps the current candidate's bytes for
    /// the next one's.
    fn tab_completion(&mut self, at: &mut AtomTable, env: &Environment, backslash_is_sep: bool) {
        if !self.tab_completion_active {
            let line = self.write_buffer[..self.write_cursor].to_vec();
            self.completions = collect_candidates(at, env, &line, backslash_is_sep);
            self.completion_cursor = 0;
            self.tab_completion_active = true;
        }
        if self.completions.is_empty() {
            return;
        }
        self.completion_cursor += 1;
        if self.completion_cursor >= self.completions.len() {
            self.completion_cursor = 0;
        }
        let next = self.completions[self.completion_cursor].atom;
        let prev_index = if self.completion_cursor > 0 {
            self.completion_cursor - 1
        } else {
            self.completions.len() - 1
        };
        let prev = self.completions[prev_index].atom;
        self.replace_candidate(at, prev, next);
    }

    fn tab_completion_prev(&mut self, at: &AtomTable) {
        if !self.tab_completion_active || self.completions.is_empty() {
            return;
        }
        let len = self.completions.len();
        self.completion_cursor = if self.completion_cursor == 0 {
            len - 1
        } else {
            self.completion_cursor - 1
        };
        let next = self.completions[self.completion_cursor].atom;
        let prev_index = if self.completion_cursor < len - 1 {
            self.completion_cursor + 1
        } else {
            0
        };
        let prev = self.completions[prev_index].atom;
        self.replace_candidate(at, prev, next);
    }

    /// Esc puts back what the user had typed (candidate zero).
    fn tab_completion_cancel(&mut self, at: &AtomTable) {
        if !self.tab_completion_active || self.completions.is_empty() {
            return;
        }
        let current = self.completions[self.completion_cursor].atom;
        let original = self.completions[0].atom;
        self.replace_candidate(at, current, original);
        self.end_tab_completion();
    }

    fn replace_candidate(&mut self, at: &AtomTable, prev: Atom, next: Atom) {
        for _ in 0..at.len(prev) {
            self.del_left();
        }
        for &b in at.text(next).to_vec().iter() {
            self.input_one(b);
        }
    }

    /// Pulls the next editing command out of the read buffer, refilling
    /// from the terminal in 8 KiB chunks when the buffer runs dry or
    /// holds only an unfinished escape sequence.
    pub fn read_one(&mut self, ts: &TermState) -> Result<Cmd> {
        loop {
            if self.read_cursor > 0 && self.read_cursor == self.read_buffer.len() {
                self.read_buffer.clear();
                self.read_cursor = 0;
            }
            if self.read_cursor < self.read_buffer.len() {
                if let Some((cmd, len)) = decode(&self.read_buffer[self.read_cursor..]) {
                    self.read_cursor += len;
                    return Ok(cmd);
                }
            }
            self.read_buffer.try_reserve(8192)?;
            let old = self.read_buffer.len();
            self.read_buffer.resize(old + 8192, 0);
            let n = ts.read(&mut self.read_buffer[old..])?;
            self.read_buffer.truncate(old + n);
            if n == 0 {
                return Err(ShellError::Io);
            }
        }
    }

    /// Rebuilds the prompt: cyan timestamp, green condensed cwd, grey
    /// `> `, reset. The visual length excludes the escape sequences.
    fn refresh_prompt(&mut self, env: &Environment) {
        let mut b = Vec::with_capacity(64);
        let mut escapes = 0;
        b.extend_from_slice(b"\x1b[36m");
        escapes += 5;
        let stamp = Local::now().format("%m/%d %l:%M%p ").to_string();
        b.extend_from_slice(stamp.as_bytes());
        b.extend_from_slice(b"\x1b[32m");
        escapes += 5;
        b.extend_from_slice(env.display_cwd());
        b.extend_from_slice(b"\x1b[38;5;248m> ");
        escapes += 11;
        b.extend_from_slice(b"\x1b[0m");
        escapes += 4;
        self.prompt_visual_len = b.len() - escapes;
        self.prompt = b;
    }

    /// Repaints prompt and line in one write: climb to the prompt's top
    /// row, clear to the end of the screen, re-emit everything, then park
    /// the cursor on its visual position.
    fn redisplay(&mut self, ts: &TermState, cols: usize, n_cols_up: &mut usize) -> Result<()> {
        let cols = cols.max(1);
        let mut out = BytesMut::with_capacity(self.prompt.len() + self.write_buffer.len() + 32);
        if self.needs_clear_screen {
            out.put_slice(b"\x1b[2J\x1b[1;1H");
            self.needs_clear_screen = false;
        }
        if *n_cols_up > 0 {
            out.put_slice(format!("\x1b[{}A", n_cols_up).as_bytes());
        }
        out.put_slice(b"\r\x1b[J");
        out.put_slice(&self.prompt);
        let mut visual_size = self.prompt_visual_len;
        if !self.write_buffer.is_empty() {
            out.put_slice(&self.write_buffer);
            visual_size += self.write_buffer.len();
        }
        let cursor_visual = visual_size - (self.write_buffer.len() - self.write_cursor);
        let total_lines = (visual_size.max(1) - 1) / cols + 1;
        let cursor_line = (cursor_visual.max(1) - 1) / cols + 1;
        *n_cols_up = total_lines - 1;
        if total_lines > cursor_line {
            let diff = total_lines - cursor_line;
            out.put_slice(format!("\x1b[{diff}A").as_bytes());
            *n_cols_up -= diff;
        }
        let cursor_col = (cursor_visual.max(1) - 1) % cols + 1;
        out.put_slice(format!("\r\x1b[{cursor_col}C").as_bytes());
        ts.write_all(&out)?;
        self.needs_redisplay = false;
        Ok(())
    }

    /// Runs the editor until a line is accepted. `Eof` on ctrl-d with an
    /// empty line; `Io` when the input side goes away.
    pub fn read_line(
        &mut self,
        ts: &mut TermState,
        env: &mut Environment,
        at: &mut AtomTable,
    ) -> Result<Vec<u8>> {
        ts.raw()?;
        self.write_buffer.clear();
        self.write_cursor = 0;
        self.needs_redisplay = true;
        let mut n_cols_up = 0usize;
        loop {
            if self.needs_redisplay && ts.in_is_terminal && ts.out_is_terminal {
                let _ = ts.refresh_size(env, at);
                self.refresh_prompt(env);
                self.redisplay(ts, env.cols, &mut n_cols_up)?;
            }
            let cmd = self.read_one(ts)?;
            if !matches!(cmd, Cmd::Tab | Cmd::ShiftTab | Cmd::Esc) {
                self.end_tab_completion();
            }
            match cmd {
                Cmd::DeleteBack => self.del_left(),
                Cmd::DeleteForwardOrEof => {
                    if self.write_buffer.is_empty() {
                        return Err(ShellError::Eof);
                    }
                    self.del_right();
                }
                Cmd::DeleteForward => self.del_right(),
                Cmd::MoveLeft => self.move_left(),
                Cmd::MoveRight => self.move_right(),
                Cmd::MoveUp => self.move_up(at),
                Cmd::MoveDown => self.move_down(at),
                Cmd::MoveHome => self.move_home(),
                Cmd::MoveEnd => self.move_end(),
                Cmd::Interrupt => self.clear_line(),
                Cmd::Tab => self.tab_completion(at, env, crate::WINDOWS_STYLE),
                Cmd::ShiftTab => self.tab_completion_prev(at),
                Cmd::KillEndOfLine => self.kill_end_of_line(),
                Cmd::ClearScreen => {
                    self.needs_clear_screen = true;
                    self.needs_redisplay = true;
                }
                Cmd::Accept | Cmd::Enter => return Ok(self.write_buffer.clone()),
                Cmd::Esc => {
                    if self.tab_completion_active {
                        self.tab_completion_cancel(at);
                    }
                }
                Cmd::Nop => {}
                Cmd::Literal(c) => self.input_one(c),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::Wk;
    use crate::env::OsFlavor;
    use std::os::unix::io::RawFd;

    #[test]
    fn decodes_control_bytes() {
        assert_eq!(decode(b"\x01"), Some((Cmd::MoveHome, 1)));
        assert_eq!(decode(b"\x03"), Some((Cmd::Interrupt, 1)));
        assert_eq!(decode(b"\x04"), Some((Cmd::DeleteForwardOrEof, 1)));
        assert_eq!(decode(b"\x09"), Some((Cmd::Tab, 1)));
        assert_eq!(decode(b"\x0a"), Some((Cmd::Accept, 1)));
        assert_eq!(decode(b"\x0d"), Some((Cmd::Enter, 1)));
        assert_eq!(decode(b"\x7f"), Some((Cmd::DeleteBack, 1)));
        assert_eq!(decode(b"\x07"), Some((Cmd::Nop, 1)));
        assert_eq!(decode(b"x"), Some((Cmd::Literal(b'x'), 1)));
    }

    #[test]
    fn decodes_escape_sequences() {
        assert_eq!(decode(b"\x1b[A"), Some((Cmd::MoveUp, 3)));
        assert_eq!(decode(b"\x1b[B"), Some((Cmd::MoveDown, 3)));
        assert_eq!(decode(b"\x1b[C"), Some((Cmd::MoveRight, 3)));
        assert_eq!(decode(b"\x1b[D"), Some((Cmd::MoveLeft, 3)));
        assert_eq!(decode(b"\x1b[H"), Some((Cmd::MoveHome, 3)));
        assert_eq!(decode(b"\x1b[F"), Some((Cmd::MoveEnd, 3)));
        assert_eq!(decode(b"\x1b[Z"), Some((Cmd::ShiftTab, 3)));
        assert_eq!(decode(b"\x1b[3~"), Some((Cmd::DeleteForward, 4)));
        assert_eq!(decode(b"\x1bOH"), Some((Cmd::MoveHome, 3)));
        assert_eq!(decode(b"\x1bOF"), Some((Cmd::MoveEnd, 3)));
    }

    #[test]
    fn lone_escape_decodes_as_esc() {
        assert_eq!(decode(b"\x1b"), Some((Cmd::Esc, 1)));
        // a pending '[' alone cannot disambiguate yet either
        assert_eq!(decode(b"\x1b["), Some((Cmd::Esc, 1)));
        assert_eq!(decode(b"\x1bOx"), Some((Cmd::Esc, 1)));
    }

    #[test]
    fn unfinished_csi_requests_more_bytes() {
        assert_eq!(decode(b"\x1b[3"), None);
        assert_eq!(decode(b"\x1b[5~"), None);
    }

    #[test]
    fn decode_consumes_minimum_prefix() {
        assert_eq!(decode(b"\x1b[Axyz"), Some((Cmd::MoveUp, 3)));
        assert_eq!(decode(b"ab"), Some((Cmd::Literal(b'a'), 1)));
    }

    fn typed(input: &mut Input, text: &str) {
        for b in text.bytes() {
            input.input_one(b);
        }
    }

    #[test]
    fn editing_keeps_cursor_inside_the_buffer() {
        let mut input = Input::new();
        typed(&mut input, "hello");
        assert_eq!(input.write_cursor, 5);
        input.move_left();
        input.move_left();
        input.del_left();
        assert_eq!(input.write_buffer, b"helo");
        assert_eq!(input.write_cursor, 2);
        input.del_right();
        assert_eq!(input.write_buffer, b"heo");
        input.move_home();
        input.move_left();
        assert_eq!(input.write_cursor, 0);
        input.move_end();
        input.move_right();
        assert_eq!(input.write_cursor, input.write_buffer.len());
        input.kill_end_of_line();
        assert_eq!(input.write_buffer, b"heo");
        input.move_home();
        input.kill_end_of_line();
        assert!(input.write_buffer.is_empty());
    }

    #[test]
    fn interrupt_clears_the_line() {
        let mut input = Input::new();
        typed(&mut input, "half a command");
        input.clear_line();
        assert!(input.write_buffer.is_empty());
        assert_eq!(input.write_cursor, 0);
    }

    #[test]
    fn insertion_happens_at_the_cursor() {
        let mut input = Input::new();
        typed(&mut input, "ac");
        input.move_left();
        input.input_one(b'b');
        assert_eq!(input.write_buffer, b"abc");
        assert_eq!(input.write_cursor, 2);
    }

    #[test]
    fn history_navigation_replaces_the_line() {
        let mut at = AtomTable::new().unwrap();
        let mut input = Input::new();
        let first = at.atomize(b"first").unwrap();
        let second = at.atomize(b"second").unwrap();
        input.hist_add(&at, first);
        input.hist_add(&at, second);
        input.move_up(&at);
        assert_eq!(input.write_buffer, b"second");
        input.move_up(&at);
        assert_eq!(input.write_buffer, b"first");
        input.move_up(&at);
        assert_eq!(input.write_buffer, b"first");
        input.move_down(&at);
        assert_eq!(input.write_buffer, b"second");
        input.move_down(&at);
        assert!(input.write_buffer.is_empty());
    }

    #[test]
    fn consecutive_duplicate_history_entries_collapse() {
        let mut at = AtomTable::new().unwrap();
        let mut input = Input::new();
        let a = at.atomize(b"ls").unwrap();
        let empty = at.atomize(b"").unwrap();
        input.hist_add(&at, a);
        input.hist_add(&at, a);
        input.hist_add(&at, empty);
        assert_eq!(input.history().len(), 1);
    }

    #[test]
    fn tab_cycles_ranked_candidates_and_esc_restores() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["abc", "abd", "abz"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        let mut at = AtomTable::new().unwrap();
        let mut env = Environment::new(false, OsFlavor::Linux);
        let k = at.well_known(Wk::VarPwd);
        env.set_bytes(&mut at, k, dir.path().to_str().unwrap().as_bytes())
            .unwrap();
        let mut input = Input::new();
        typed(&mut input, "a");
        input.tab_completion(&mut at, &env, false);
        assert_eq!(input.write_buffer, b"abc");
        input.tab_completion(&mut at, &env, false);
        assert_eq!(input.write_buffer, b"abd");
        input.tab_completion(&mut at, &env, false);
        assert_eq!(input.write_buffer, b"abz");
        input.tab_completion(&mut at, &env, false);
        assert_eq!(input.write_buffer, b"a");
        input.tab_completion(&mut at, &env, false);
        assert_eq!(input.write_buffer, b"abc");
        input.tab_completion_prev(&at);
        assert_eq!(input.write_buffer, b"a");
        input.tab_completion(&mut at, &env, false);
        input.tab_completion_cancel(&at);
        assert_eq!(input.write_buffer, b"a");
        assert!(!input.tab_completion_active);
    }

    #[test]
    fn completion_replaces_only_the_basename() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub").join("inner"), b"").unwrap();
        let mut at = AtomTable::new().unwrap();
        let mut env = Environment::new(false, OsFlavor::Linux);
        let k = at.well_known(Wk::VarPwd);
        env.set_bytes(&mut at, k, dir.path().to_str().unwrap().as_bytes())
            .unwrap();
        let mut input = Input::new();
        typed(&mut input, "cat sub/i");
        input.tab_completion(&mut at, &env, false);
        assert_eq!(input.write_buffer, b"cat sub/inner");
    }

    fn pipe_term(bytes: &[u8]) -> (TermState, RawFd, RawFd) {
        let mut fds = [0i32; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        let n = unsafe { libc::write(fds[1], bytes.as_ptr().cast(), bytes.len()) };
        assert_eq!(n as usize, bytes.len());
        let ts = TermState::init(fds[0], fds[1]).unwrap();
        (ts, fds[0], fds[1])
    }

    #[test]
    fn read_one_pulls_commands_from_the_fd() {
        let (ts, r, w) = pipe_term(b"hi\x1b[A\n");
        let mut input = Input::new();
        assert_eq!(input.read_one(&ts).unwrap(), Cmd::Literal(b'h'));
        assert_eq!(input.read_one(&ts).unwrap(), Cmd::Literal(b'i'));
        assert_eq!(input.read_one(&ts).unwrap(), Cmd::MoveUp);
        assert_eq!(input.read_one(&ts).unwrap(), Cmd::Accept);
        unsafe {
            libc::close(r);
            libc::close(w);
        }
    }

    #[test]
    fn read_line_accepts_piped_input() {
        let (mut ts, r, w) = pipe_term(b"echo hi\nnext\n");
        let mut at = AtomTable::new().unwrap();
        let mut env = Environment::new(false, OsFlavor::Linux);
        let mut input = Input::new();
        let line = input.read_line(&mut ts, &mut env, &mut at).unwrap();
        assert_eq!(line, b"echo hi");
        let line = input.read_line(&mut ts, &mut env, &mut at).unwrap();
        assert_eq!(line, b"next");
        unsafe { libc::close(w) };
        assert_eq!(
            input.read_line(&mut ts, &mut env, &mut at),
            Err(ShellError::Io)
        );
        unsafe { libc::close(r) };
    }

    #[test]
    fn ctrl_d_on_empty_line_is_eof() {
        let (mut ts, r, w) = pipe_term(b"\x04");
        let mut at = AtomTable::new().unwrap();
        let mut env = Environment::new(false, OsFlavor::Linux);
        let mut input = Input::new();
        assert_eq!(
            input.read_line(&mut ts, &mut env, &mut at),
            Err(ShellError::Eof)
        );
        unsafe {
            libc::close(r);
            libc::close(w);
        }
    }

    #[test]
    fn ctrl_d_with_content_deletes_forward() {
        let (mut ts, r, w) = pipe_term(b"ab\x01\x04\n");
        let mut at = AtomTable::new().unwrap();
        let mut env = Environment::new(false, OsFlavor::Linux);
        let mut input = Input::new();
        let line = input.read_line(&mut ts, &mut env, &mut at).unwrap();
        assert_eq!(line, b"b");
        unsafe {
            libc::close(r);
            libc::close(w);
        }
    }

    #[test]
    fn prompt_visual_length_excludes_escapes() {
        let mut at = AtomTable::new().unwrap();
        let mut env = Environment::new(false, OsFlavor::Linux);
        env.home = Some(at.atomize(b"/home/u").unwrap());
        let mut input = Input::new();
        input.refresh_prompt(&env);
        assert!(input.prompt.starts_with(b"\x1b[36m"));
        assert!(input.prompt.ends_with(b"\x1b[0m"));
        assert_eq!(input.prompt_visual_len, input.prompt.len() - 25);
    }

    #[test]
    fn redisplay_is_idempotent_for_unchanged_state() {
        let mut input = Input::new();
        input.prompt = b"> ".to_vec();
        input.prompt_visual_len = 2;
        typed(&mut input, "hello");

        let render = |input: &mut Input| -> Vec<u8> {
            let mut fds = [0i32; 2];
            assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
            let ts = TermState::init(fds[0], fds[1]).unwrap();
            let mut n_cols_up = 0usize;
            input.redisplay(&ts, 80, &mut n_cols_up).unwrap();
            let mut buf = [0u8; 256];
            let n = unsafe { libc::read(fds[0], buf.as_mut_ptr().cast(), buf.len()) };
            unsafe {
                libc::close(fds[0]);
                libc::close(fds[1]);
            }
            buf[..n as usize].to_vec()
        };
        let first = render(&mut input);
        let second = render(&mut input);
        assert_eq!(first, second);
        assert_eq!(first, b"\r\x1b[J> hello\r\x1b[7C");
    }

    #[test]
    fn redisplay_climbs_back_over_wrapped_lines() {
        let mut input = Input::new();
        input.prompt = b"> ".to_vec();
        input.prompt_visual_len = 2;
        typed(&mut input, "0123456789abcd");

        let mut fds = [0i32; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        let ts = TermState::init(fds[0], fds[1]).unwrap();
        // 16 visual cells over 10 columns: two lines, cursor on line 2
        let mut n_cols_up = 0usize;
        input.redisplay(&ts, 10, &mut n_cols_up).unwrap();
        assert_eq!(n_cols_up, 1);
        input.needs_redisplay = true;
        input.redisplay(&ts, 10, &mut n_cols_up).unwrap();
        let mut buf = [0u8; 256];
        let n = unsafe { libc::read(fds[0], buf.as_mut_ptr().cast(), buf.len()) };
        let out = &buf[..n as usize];
        // the second repaint starts by moving up over the wrapped line
        assert!(out
            .windows(b"\x1b[1A\r\x1b[J".len())
            .any(|w| w == b"\x1b[1A\r\x1b[J"));
        unsafe {
            libc::close(fds[0]);
            libc::close(fds[1]);
        }
    }
}
