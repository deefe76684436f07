//! Interned byte strings.
//!
//! Every string the shell touches more than once (environment keys and
//! values, history entries, completion candidates, argv words) is interned
//! into an [`AtomTable`]. Two [`Atom`] handles from the same table are
//! equal iff their bytes are equal, so all downstream comparisons are a
//! single integer compare. Each atom also records the atom of its
//! ASCII-lowercased form, which makes case-insensitive equality an integer
//! compare as well.

use crate::error::{Result, ShellError};
use crate::hash::{fast_reduce32, hash_bytes};

/// Handle to an interned string. Atoms are never freed; the handle stays
/// valid for the life of the table that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Atom(u32);

struct AtomData {
    text: Box<[u8]>,
    hash: u32,
    fold: Atom,
}

/// The well-known atoms, interned once at table construction so builtin
/// dispatch and environment lookups never re-hash their names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wk {
    Pwd,
    Cd,
    Echo,
    Set,
    Exit,
    Source,
    Time,
    Debug,
    On,
    Off,
    True,
    False,
    Zero,
    One,
    Dot,
    VarPwd,
    VarHome,
    VarPath,
    VarPathext,
    VarColumns,
    VarLines,
    VarTerm,
    VarUser,
    VarShell,
    VarShlvl,
    VarHistory,
    VarConfig,
}

const WK_SPELLINGS: [(Wk, &[u8]); 27] = [
    (Wk::Pwd, b"pwd"),
    (Wk::Cd, b"cd"),
    (Wk::Echo, b"echo"),
    (Wk::Set, b"set"),
    (Wk::Exit, b"exit"),
    (Wk::Source, b"source"),
    (Wk::Time, b"time"),
    (Wk::Debug, b"debug"),
    (Wk::On, b"on"),
    (Wk::Off, b"off"),
    (Wk::True, b"true"),
    (Wk::False, b"false"),
    (Wk::Zero, b"0"),
    (Wk::One, b"1"),
    (Wk::Dot, b"."),
    (Wk::VarPwd, b"PWD"),
    (Wk::VarHome, b"HOME"),
    (Wk::VarPath, b"PATH"),
    (Wk::VarPathext, b"PATHEXT"),
    (Wk::VarColumns, b"COLUMNS"),
    (Wk::VarLines, b"LINES"),
    (Wk::VarTerm, b"TERM"),
    (Wk::VarUser, b"USER"),
    (Wk::VarShell, b"SHELL"),
    (Wk::VarShlvl, b"SHLVL"),
    (Wk::VarHistory, b"DRSH_HISTORY"),
    (Wk::VarConfig, b"DRSH_CONFIG"),
];

pub struct AtomTable {
    atoms: Vec<AtomData>,
    // Open-addressed index: 2*cap slots of 1-based atom ids, 0 = empty.
    slots: Vec<u32>,
    cap: usize,
    special: [Atom; WK_SPELLINGS.len()],
}

impl AtomTable {
    pub fn new() -> Result<AtomTable> {
        let mut at = AtomTable {
            atoms: Vec::new(),
            slots: Vec::new(),
            cap: 0,
            special: [Atom(0); WK_SPELLINGS.len()],
        };
        for (wk, text) in WK_SPELLINGS {
            let a = at.atomize(text)?;
            at.special[wk as usize] = a;
        }
        Ok(at)
    }

    pub fn well_known(&self, wk: Wk) -> Atom {
        self.special[wk as usize]
    }

    pub fn text(&self, a: Atom) -> &[u8] {
        &self.atoms[a.0 as usize].text
    }

    pub fn len(&self, a: Atom) -> usize {
        self.atoms[a.0 as usize].text.len()
    }

    pub fn hash(&self, a: Atom) -> u32 {
        self.atoms[a.0 as usize].hash
    }

    /// The atom of `a`'s ASCII-lowercased spelling. Self-referential when
    /// `a` is already lowercase.
    pub fn fold(&self, a: Atom) -> Atom {
        self.atoms[a.0 as usize].fold
    }

    /// Interns `text`, returning the existing handle when the exact bytes
    /// are already present.
    pub fn atomize(&mut self, text: &[u8]) -> Result<Atom> {
        if text.len() >= u32::MAX as usize {
            return Err(ShellError::Value);
        }
        if self.atoms.len() * 10 / 8 >= self.cap {
            self.grow()?;
        }
        // Zero marks an empty slot, so a real hash of zero is displaced.
        let mut hash = hash_bytes(text);
        if hash == 0 {
            hash = 1024;
        }
        let mut idx = fast_reduce32(hash, self.cap as u32) as usize;
        loop {
            let id = self.slots[idx];
            if id == 0 {
                break;
            }
            let data = &self.atoms[(id - 1) as usize];
            if data.hash == hash && *data.text == *text {
                return Ok(Atom(id - 1));
            }
            idx += 1;
            if idx >= self.slots.len() {
                idx = 0;
            }
        }
        self.atoms.try_reserve(1)?;
        let id = self.atoms.len() as u32;
        self.slots[idx] = id + 1;
        self.atoms.push(AtomData {
            text: text.into(),
            hash,
            fold: Atom(id),
        });
        let folded: Vec<u8> = text.iter().map(|&b| b | 0x20).collect();
        if *folded != *text {
            let f = self.atomize(&folded)?;
            self.atoms[id as usize].fold = f;
        }
        Ok(Atom(id))
    }

    fn grow(&mut self) -> Result<()> {
        let cap = if self.cap == 0 { 4 } else { self.cap * 2 };
        let mut slots = Vec::new();
        slots.try_reserve(2 * cap)?;
        slots.resize(2 * cap, 0u32);
        for (i, data) in self.atoms.iter().enumerate() {
            let mut idx = fast_reduce32(data.hash, cap as u32) as usize;
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
}
