//! Line tokenizing and word canonicalization.
//!
//! The tokenizer splits a raw line into spans on unquoted, unescaped
//! whitespace. The canonicalizer then rewrites one span into the word the
//! command actually receives: quotes stripped, escapes resolved, `~` and
//! `$NAME` expanded, interned as an atom.

use crate::atom::{Atom, AtomTable};
use crate::env::Environment;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub offset: usize,
    pub len: usize,
}

impl Span {
    pub fn text<'a>(&self, line: &'a [u8]) -> &'a [u8] {
        &line[self.offset..self.offset + self.len]
    }
}

fn is_word_break(c: u8) -> bool {
    matches!(c, b'\0' | b' ' | b'\r' | b'\t' | b'\n' | b'\x0c')
}

pub fn tokenize(line: &[u8]) -> Vec<Span> {
    let mut tokens = Vec::new();
    let mut quoted: u8 = 0;
    let mut backslash = false;
    let mut tok_begin: Option<usize> = None;
    for (i, &c) in line.iter().enumerate() {
        let Some(begin) = tok_begin else {
            if is_word_break(c) {
                continue;
            }
            match c {
                b'"' | b'\'' => quoted = c,
                b'\\' => backslash = true,
                _ => {}
            }
            tok_begin = Some(i);
            continue;
        };
        if backslash {
            backslash = false;
            continue;
        }
        if c == b'\\' {
            backslash = true;
            continue;
        }
        if c == quoted {
            quoted = 0;
            continue;
        }
        if quoted != 0 {
            continue;
        }
        if is_word_break(c) {
            tokens.push(Span {
                offset: begin,
                len: i - begin,
            });
            tok_begin = None;
        } else if c == b'"' || c == b'\'' {
            quoted = c;
        }
    }
    if let Some(begin) = tok_begin {
        tokens.push(Span {
            offset: begin,
            len: line.len() - begin,
        });
    }
    tokens
}

fn is_name_byte(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_'
}

/// Resolves quotes, escapes, a leading `~`, and `$NAME` references in one
/// token, producing the interned word.
///
/// `$` expands everywhere except inside single quotes and after a
/// backslash; an unset name expands to nothing. A backslash disappears
/// when it escapes a space, quote, backslash, or `$`, and is kept
/// literally before anything else.
pub fn canonicalize(
    token: &[u8],
    at: &mut AtomTable,
    env: &Environment,
    backslash_is_sep: bool,
) -> Result<Atom> {
    let mut out: Vec<u8> = Vec::with_capacity(token.len());
    let mut start = 0;
    if let Some(home) = env.home.filter(|&h| at.len(h) > 0) {
        if token.first() == Some(&b'~') {
            let boundary = token.len() == 1
                || token[1] == b'/'
                || (backslash_is_sep && token[1] == b'\\');
            if boundary {
                out.extend_from_slice(at.text(home));
                start = 1;
            }
        }
    }
    let mut quoted: u8 = 0;
    let mut backslash = false;
    let mut dollar: Option<usize> = None;
    for i in start..token.len() {
        let c = token[i];
        if let Some(d) = dollar {
            if is_name_byte(c) {
                continue;
            }
            expand_name(&token[d + 1..i], at, env, &mut out);
            dollar = None;
        }
        match c {
            b'$' => {
                if !backslash && quoted != b'\'' {
                    dollar = Some(i);
                    continue;
                }
            }
            b'"' => {
                if !backslash && quoted == b'"' {
                    quoted = 0;
                    continue;
                }
                if !backslash && quoted == 0 {
                    quoted = b'"';
                    continue;
                }
            }
            b'\'' => {
                if !backslash && quoted == b'\'' {
                    quoted = 0;
                    continue;
                }
                if !backslash && quoted == 0 {
                    quoted = b'\'';
                    continue;
                }
            }
            b'\\' => {
                if !backslash {
                    backslash = true;
                    continue;
                }
            }
            _ => {}
        }
        if backslash {
            match c {
                b' ' | b'"' | b'\'' | b'\\' | b'$' => {}
                _ => out.push(b'\\'),
            }
            backslash = false;
        }
        out.push(c);
    }
    if let Some(d) = dollar {
        expand_name(&token[d + 1..], at, env, &mut out);
    }
    at.atomize(&out)
}

fn expand_name(name: &[u8], at: &mut AtomTable, env: &Environment, out: &mut Vec<u8>) {
    if name.is_empty() {
        return;
    }
    if let Some(value) = env.get_named(at, name) {
        out.extend_from_slice(at.text(value));
    }
}
