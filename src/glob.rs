//! Glob expansion for canonicalized words (POSIX family only).
//!
//! Shell-style patterns: `*`, `?`, `[abc]`/`[a-z]`/`[!abc]`, and `{a,b}`
//! brace alternatives (nestable). A pattern that matches nothing passes
//! through verbatim, so commands still see the word the user typed.

use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

/// Bounds total matcher work, not stack depth, so adversarial patterns
/// like `*a*a*a*...` cannot pin the shell.
const MAX_MATCH_CALLS: usize = 100_000;

pub fn has_magic(pattern: &[u8]) -> bool {
    pattern.iter().any(|&b| matches!(b, b'*' | b'?' | b'['))
}

/// Expands one canonicalized word into argv entries: brace alternatives
/// in written order, each alternative's filesystem matches sorted
/// bytewise, unmatched patterns passed through.
pub fn expand_word(word: &[u8]) -> Vec<Vec<u8>> {
    let mut out = Vec::new();
    for pattern in expand_braces(word) {
        if has_magic(&pattern) {
            let matches = expand_pattern(&pattern);
            if matches.is_empty() {
                out.push(pattern);
            } else {
                out.extend(matches);
            }
        } else {
            out.push(pattern);
        }
    }
    out
}

/// `{a,b,c}` alternatives, nestable, expanded left to right.
pub fn expand_braces(pattern: &[u8]) -> Vec<Vec<u8>> {
    let mut depth = 0usize;
    let mut start = None;
    let mut end = None;
    for (i, &c) in pattern.iter().enumerate() {
        match c {
            b'{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            b'}' => {
                if depth > 0 {
                    depth -= 1;
                    if depth == 0 {
                        end = Some(i);
                        break;
                    }
                }
            }
            _ => {}
        }
    }
    let (Some(start), Some(end)) = (start, end) else {
        return vec![pattern.to_vec()];
    };
    let prefix = &pattern[..start];
    let suffix = &pattern[end + 1..];
    let body = &pattern[start + 1..end];
    let mut alternatives = Vec::new();
    let mut depth = 0usize;
    let mut piece_start = 0;
    for (i, &c) in body.iter().enumerate() {
        match c {
            b'{' => depth += 1,
            b'}' => depth = depth.saturating_sub(1),
            b',' if depth == 0 => {
                alternatives.push(&body[piece_start..i]);
                piece_start = i + 1;
            }
            _ => {}
        }
    }
    alternatives.push(&body[piece_start..]);
    let mut out = Vec::new();
    for alt in alternatives {
        let mut candidate = Vec::with_capacity(prefix.len() + alt.len() + suffix.len());
        candidate.extend_from_slice(prefix);
        candidate.extend_from_slice(alt);
        candidate.extend_from_slice(suffix);
        // the suffix (or the alternative itself) may hold further groups
        out.extend(expand_braces(&candidate));
    }
    out
}

/// Matches one path component (no `/` crossing) against a pattern.
pub fn glob_match(pattern: &[u8], input: &[u8]) -> bool {
    let mut calls = 0usize;
    match_at(pattern, input, 0, 0, &mut calls)
}

fn match_at(pat: &[u8], input: &[u8], pi: usize, ii: usize, calls: &mut usize) -> bool {
    *calls += 1;
    if *calls > MAX_MATCH_CALLS {
        return false;
    }
    if pi == pat.len() {
        return ii == input.len();
    }
    match pat[pi] {
        b'*' => {
            if match_at(pat, input, pi + 1, ii, calls) {
                return true;
            }
            for j in ii..input.len() {
                if match_at(pat, input, pi + 1, j + 1, calls) {
                    return true;
                }
            }
            false
        }
        b'?' => ii < input.len() && match_at(pat, input, pi + 1, ii + 1, calls),
        b'[' => match parse_set(pat, pi) {
            Some((set_matches, next_pi)) => {
                ii < input.len()
                    && set_matches(input[ii])
                    && match_at(pat, input, next_pi, ii + 1, calls)
            }
            // unterminated set: the bracket is an ordinary byte
            None => {
                ii < input.len() && input[ii] == b'[' && match_at(pat, input, pi + 1, ii + 1, calls)
            }
        },
        c => ii < input.len() && input[ii] == c && match_at(pat, input, pi + 1, ii + 1, calls),
    }
}

type SetMatcher = Box<dyn Fn(u8) -> bool>;

fn parse_set(pat: &[u8], open: usize) -> Option<(SetMatcher, usize)> {
    let mut i = open + 1;
    let negate = matches!(pat.get(i), Some(b'!') | Some(b'^'));
    if negate {
        i += 1;
    }
    let mut singles = Vec::new();
    let mut ranges = Vec::new();
    let mut first = true;
    loop {
        let &c = pat.get(i)?;
        if c == b']' && !first {
            i += 1;
            break;
        }
        first = false;
        if pat.get(i + 1) == Some(&b'-') && pat.get(i + 2).is_some_and(|&e| e != b']') {
            ranges.push((c, pat[i + 2]));
            i += 3;
        } else {
            singles.push(c);
            i += 1;
        }
    }
    let matches = move |b: u8| {
        let hit = singles.contains(&b) || ranges.iter().any(|&(lo, hi)| b >= lo && b <= hi);
        hit != negate
    };
    Some((Box::new(matches), i))
}

fn as_path(bytes: &[u8]) -> &Path {
    Path::new(OsStr::from_bytes(bytes))
}

fn join(base: &[u8], name: &[u8]) -> Vec<u8> {
    if base.is_empty() {
        return name.to_vec();
    }
    let mut out = base.to_vec();
    if base.last() != Some(&b'/') {
        out.push(b'/');
    }
    out.extend_from_slice(name);
    out
}

/// Walks the filesystem component by component. Dotfiles only match
/// patterns that spell the leading dot.
fn expand_pattern(pattern: &[u8]) -> Vec<Vec<u8>> {
    let absolute = pattern.first() == Some(&b'/');
    let comps: Vec<&[u8]> = pattern
        .split(|&b| b == b'/')
        .filter(|c| !c.is_empty())
        .collect();
    if comps.is_empty() {
        return Vec::new();
    }
    let mut stack: Vec<Vec<u8>> = vec![if absolute { b"/".to_vec() } else { Vec::new() }];
    for comp in &comps {
        let mut next = Vec::new();
        for base in &stack {
            if !has_magic(comp) {
                let joined = join(base, comp);
                if as_path(&joined).exists() {
                    next.push(joined);
                }
                continue;
            }
            let dir = if base.is_empty() {
                b".".to_vec()
            } else {
                base.clone()
            };
            let Ok(entries) = std::fs::read_dir(as_path(&dir)) else {
                continue;
            };
            for entry in entries.flatten() {
                let name = entry.file_name();
                let name = name.as_bytes();
                if name.starts_with(b".") && !comp.starts_with(b".") {
                    continue;
                }
                if glob_match(comp, name) {
                    next.push(join(base, name));
                }
            }
        }
        stack = next;
    }
    stack.sort();
    stack
}
