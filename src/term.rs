//! Terminal mode state machine.
//!
//! The terminal is the one shared resource whose state outlives any single
//! operation. The machine is {Init, Raw, Orig, Unknown}: `raw` while the
//! line editor owns the screen, `orig` around every child spawn and on
//! every exit path, `unknown` after a child may have changed the mode
//! behind our back (the next redisplay re-enters raw).

use std::os::unix::io::RawFd;

use crate::atom::{AtomTable, Wk};
use crate::env::Environment;
use crate::error::{Result, ShellError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Init,
    Raw,
    Orig,
    Unknown,
}

pub struct TermState {
    state: State,
    pub in_is_terminal: bool,
    pub out_is_terminal: bool,
    in_fd: RawFd,
    out_fd: RawFd,
    orig: Option<libc::termios>,
}

impl TermState {
    pub fn init(in_fd: RawFd, out_fd: RawFd) -> Result<TermState> {
        let in_is_terminal = unsafe { libc::isatty(in_fd) } == 1;
        let out_is_terminal = unsafe { libc::isatty(out_fd) } == 1;
        let mut orig = None;
        if in_is_terminal {
            let mut term: libc::termios = unsafe { std::mem::zeroed() };
            if unsafe { libc::tcgetattr(in_fd, &mut term) } == -1 {
                return Err(ShellError::Io);
            }
            orig = Some(term);
        }
        Ok(TermState {
            state: State::Init,
            in_is_terminal,
            out_is_terminal,
            in_fd,
            out_fd,
            orig,
        })
    }

    /// No echo, no canonical processing, no signal translation; reads
    /// return every single byte.
    pub fn raw(&mut self) -> Result<()> {
        if self.state == State::Raw {
            return Ok(());
        }
        if let Some(orig) = self.orig {
            let mut raw = orig;
            raw.c_iflag &= !(libc::BRKINT | libc::ICRNL | libc::INPCK | libc::ISTRIP | libc::IXON);
            raw.c_oflag &= !libc::OPOST;
            raw.c_cflag |= libc::CS8;
            raw.c_lflag &= !(libc::ECHO | libc::ICANON | libc::IEXTEN | libc::ISIG);
            raw.c_cc[libc::VMIN] = 1;
            raw.c_cc[libc::VTIME] = 0;
            if unsafe { libc::tcsetattr(self.in_fd, libc::TCSAFLUSH, &raw) } < 0 {
                return Err(ShellError::Io);
            }
        }
        self.state = State::Raw;
        Ok(())
    }

    /// Restores the snapshot taken at init. Idempotent; every exit path
    /// ends here.
    pub fn orig(&mut self) -> Result<()> {
        if self.state == State::Orig {
            return Ok(());
        }
        if let Some(orig) = self.orig {
            if unsafe { libc::tcsetattr(self.in_fd, libc::TCSAFLUSH, &orig) } < 0 {
                return Err(ShellError::Io);
            }
        }
        self.state = State::Orig;
        Ok(())
    }

    /// A child process may have left the terminal in any mode. No syscall,
    /// just bookkeeping so the next `raw` call actually runs.
    pub fn unknown(&mut self) {
        self.state = State::Unknown;
    }

    pub fn write_all(&self, mut bytes: &[u8]) -> Result<()> {
        while !bytes.is_empty() {
            let n = unsafe { libc::write(self.out_fd, bytes.as_ptr().cast(), bytes.len()) };
            if n < 0 {
                let err = std::io::Error::last_os_error();
                if err.raw_os_error() == Some(libc::EINTR) {
                    continue;
                }
                return Err(ShellError::Io);
            }
            bytes = &bytes[n as usize..];
        }
        Ok(())
    }

    pub fn print(&self, s: &str) {
        let _ = self.write_all(s.as_bytes());
    }

    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        loop {
            let n = unsafe { libc::read(self.in_fd, buf.as_mut_ptr().cast(), buf.len()) };
            if n < 0 {
                let err = std::io::Error::last_os_error();
                if err.raw_os_error() == Some(libc::EINTR) {
                    continue;
                }
                return Err(ShellError::Io);
            }
            return Ok(n as usize);
        }
    }

    fn window_size(&self) -> Result<(usize, usize)> {
        let mut w: libc::winsize = unsafe { std::mem::zeroed() };
        if unsafe { libc::ioctl(self.out_fd, libc::TIOCGWINSZ, &mut w) } == -1 {
            return Err(ShellError::Io);
        }
        Ok((w.ws_col as usize, w.ws_row as usize))
    }

    /// Queries the window size and mirrors it into `COLUMNS`/`LINES`.
    pub fn refresh_size(&self, env: &mut Environment, at: &mut AtomTable) -> Result<()> {
        if !self.out_is_terminal {
            return Ok(());
        }
        let (cols, lines) = self.window_size()?;
        env.cols = cols;
        env.lines = lines;
        let key = at.well_known(Wk::VarLines);
        env.set_bytes(at, key, format!("{}", env.lines).as_bytes())?;
        let key = at.well_known(Wk::VarColumns);
        env.set_bytes(at, key, format!("{}", env.cols).as_bytes())?;
        Ok(())
    }
}
