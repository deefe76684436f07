//! Tab-completion candidates and ranking.
//!
//! Completion works on the token under the cursor: the basename is scored
//! against every entry of the token's directory and the candidates are
//! cycled through in rank order. Ranking prefers exact prefixes, then
//! case-insensitive prefixes, then the fewest inserted bytes needed to
//! reach the candidate, with dotfiles pushed behind everything else.

use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use crate::atom::{Atom, AtomTable, Wk};
use crate::env::Environment;
use crate::resolve::path_is_abs;

#[derive(Debug, Clone, Copy)]
pub struct Word {
    pub atom: Atom,
    pub prefix: bool,
    pub iprefix: bool,
    pub distance: Option<usize>,
    pub idistance: Option<usize>,
}

/// How many byte insertions turn `needle` into `haystack`, or `None` when
/// `needle` is not an in-order subsequence of `haystack`. When defined the
/// answer is always `haystack.len() - needle.len()`.
pub fn expansion_distance(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    subsequence_distance(haystack, needle, |a, b| a == b)
}

/// ASCII-folded variant of [`expansion_distance`].
pub fn expansion_distance_icase(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    subsequence_distance(haystack, needle, |a, b| a | 0x20 == b | 0x20)
}

fn subsequence_distance(
    haystack: &[u8],
    needle: &[u8],
    eq: impl Fn(u8, u8) -> bool,
) -> Option<usize> {
    let mut hay = haystack.iter();
    for &n in needle {
        loop {
            match hay.next() {
                Some(&h) if eq(h, n) => break,
                Some(_) => {}
                None => return None,
            }
        }
    }
    Some(haystack.len() - needle.len())
}

/// Finds the token being completed: the start offset after the nearest
/// unescaped space, and the offset of the token's last path separator if
/// it has one.
//
// An even run of backslashes before a separator should arguably not make
// it a separator; matching on only the byte before is kept as-is.
pub fn parse_completable_token(line: &[u8], backslash_is_sep: bool) -> (usize, Option<usize>) {
    if line.is_empty() {
        return (0, None);
    }
    let mut slash = None;
    let mut p = line.len();
    loop {
        p -= 1;
        let c = line[p];
        if c == b' ' {
            if !(p > 0 && line[p - 1] == b'\\') {
                return (p + 1, slash);
            }
        } else if slash.is_none() {
            if c == b'/' {
                slash = Some(p);
            } else if backslash_is_sep && c == b'\\' && !(p > 0 && line[p - 1] == b'\\') {
                slash = Some(p);
            }
        }
        if p == 0 {
            return (0, slash);
        }
    }
}

/// The directory a token's `dirname` part refers to, resolved against the
/// displayed working directory.
fn listing_dir(pwd: Option<&[u8]>, dirname: &[u8], backslash_is_sep: bool) -> Vec<u8> {
    if !dirname.is_empty() && path_is_abs(dirname, backslash_is_sep) {
        return dirname.to_vec();
    }
    if !dirname.is_empty() {
        if let Some(pwd) = pwd {
            let mut out = pwd.to_vec();
            out.push(b'/');
            out.extend_from_slice(dirname);
            return out;
        }
        return dirname.to_vec();
    }
    match pwd {
        Some(pwd) => pwd.to_vec(),
        None => b".".to_vec(),
    }
}

/// Builds the ranked candidate vector for the text left of the cursor.
/// Candidate 0 is the typed basename itself so cycling can come back to
/// it; impossible expansions are dropped off the tail.
pub fn collect_candidates(
    at: &mut AtomTable,
    env: &Environment,
    line_to_cursor: &[u8],
    backslash_is_sep: bool,
) -> Vec<Word> {
    let dirs_only = line_to_cursor.len() > 2 && &line_to_cursor[..3] == b"cd ";
    let (token_start, sep) = parse_completable_token(line_to_cursor, backslash_is_sep);
    let (dirname, basename): (&[u8], &[u8]) = match sep {
        Some(s) => (&line_to_cursor[token_start..=s], &line_to_cursor[s + 1..]),
        None => (b"", &line_to_cursor[token_start..]),
    };
    let basename = basename.to_vec();

    let mut words = Vec::new();
    if let Ok(orig) = at.atomize(&basename) {
        words.push(Word {
            atom: orig,
            prefix: false,
            iprefix: false,
            distance: None,
            idistance: None,
        });
    }

    let pwd = env
        .get(at, at.well_known(Wk::VarPwd))
        .map(|a| at.text(a).to_vec());
    let dir = listing_dir(pwd.as_deref(), dirname, backslash_is_sep);
    list_directory(at, &dir, dirs_only, &mut words);

    for w in words.iter_mut() {
        let text = at.text(w.atom);
        if basename.is_empty() {
            w.distance = Some(0);
            w.idistance = Some(0);
        } else {
            w.distance = expansion_distance(text, &basename);
            w.idistance = expansion_distance_icase(text, &basename);
        }
        w.prefix = basename.len() <= text.len() && text[..basename.len()] == basename[..];
        w.iprefix = basename.len() <= text.len()
            && text[..basename.len()]
                .iter()
                .zip(&basename)
                .all(|(&a, &b)| a | 0x20 == b | 0x20);
    }

    let at_ref: &AtomTable = at;
    words.sort_by(|l, r| {
        let ltext = at_ref.text(l.atom);
        let rtext = at_ref.text(r.atom);
        r.prefix
            .cmp(&l.prefix)
            .then(r.iprefix.cmp(&l.iprefix))
            .then(rank(l.distance).cmp(&rank(r.distance)))
            .then(rank(l.idistance).cmp(&rank(r.idistance)))
            .then(is_dotfile(ltext).cmp(&is_dotfile(rtext)))
            .then(ltext.cmp(rtext))
    });
    while words.last().is_some_and(|w| w.idistance.is_none()) {
        words.pop();
    }
    words
}

fn rank(d: Option<usize>) -> usize {
    d.unwrap_or(usize::MAX)
}

fn is_dotfile(text: &[u8]) -> bool {
    text.first() == Some(&b'.')
}

fn list_directory(at: &mut AtomTable, dir: &[u8], dirs_only: bool, out: &mut Vec<Word>) {
    let dir_path = Path::new(OsStr::from_bytes(dir));
    let Ok(entries) = std::fs::read_dir(dir_path) else {
        return;
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.as_bytes();
        if name == b"." || name == b".." {
            continue;
        }
        let Ok(ftype) = entry.file_type() else {
            continue;
        };
        let is_dir = if ftype.is_symlink() {
            // resolve the link to decide whether to offer it as a directory
            match std::fs::metadata(dir_path.join(entry.file_name())) {
                Ok(meta) => meta.is_dir(),
                Err(_) => continue,
            }
        } else {
            ftype.is_dir()
        };
        let atom = if is_dir {
            let mut with_sep = name.to_vec();
            with_sep.push(b'/');
            at.atomize(&with_sep)
        } else {
            if dirs_only {
                continue;
            }
            at.atomize(name)
        };
        let Ok(atom) = atom else { continue };
        out.push(Word {
            atom,
            prefix: false,
            iprefix: false,
            distance: None,
            idistance: None,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::OsFlavor;

    #[test]
    fn distance_counts_insertions_only() {
        assert_eq!(expansion_distance(b"abc", b"abc"), Some(0));
        assert_eq!(expansion_distance(b"abc", b"a"), Some(2));
        assert_eq!(expansion_distance(b"abc", b"ac"), Some(1));
        assert_eq!(expansion_distance(b"abc", b""), Some(3));
        assert_eq!(expansion_distance(b"abc", b"x"), None);
        assert_eq!(expansion_distance(b"abc", b"cb"), None);
        assert_eq!(expansion_distance(b"ab", b"abc"), None);
    }

    #[test]
    fn distance_matches_length_difference_when_defined() {
        for (h, n) in [
            (b"Makefile".as_slice(), b"Mf".as_slice()),
            (b"src/main.rs", b"sm.rs"),
            (b"x", b"x"),
        ] {
            assert_eq!(expansion_distance(h, n), Some(h.len() - n.len()));
        }
    }

    #[test]
    fn icase_distance_folds_ascii() {
        assert_eq!(expansion_distance(b"Makefile", b"make"), None);
        assert_eq!(expansion_distance_icase(b"Makefile", b"make"), Some(4));
        assert_eq!(expansion_distance_icase(b"ABC", b"abc"), Some(0));
    }

    #[test]
    fn token_boundary_is_the_nearest_unescaped_space() {
        assert_eq!(parse_completable_token(b"ls foo", false), (3, None));
        assert_eq!(parse_completable_token(b"foo", false), (0, None));
        assert_eq!(parse_completable_token(b"ls a\\ b", false), (3, None));
        assert_eq!(parse_completable_token(b"cat src/ma", false), (4, Some(7)));
        assert_eq!(parse_completable_token(b"/usr/bin/x", false), (0, Some(8)));
        assert_eq!(parse_completable_token(b"", false), (0, None));
    }

    #[test]
    fn backslash_separates_only_on_the_dos_family() {
        assert_eq!(parse_completable_token(b"dir\\sub", false), (0, None));
        assert_eq!(parse_completable_token(b"dir\\sub", true), (0, Some(3)));
        // for an escaped backslash only the second byte is ruled out, so
        // the first of the pair still reads as a separator
        assert_eq!(parse_completable_token(b"a\\\\b", true), (0, Some(1)));
    }

    fn setup_env(at: &mut AtomTable, pwd: &Path) -> Environment {
        let mut env = Environment::new(false, OsFlavor::Linux);
        let k = at.well_known(Wk::VarPwd);
        env.set_bytes(at, k, pwd.to_str().unwrap().as_bytes()).unwrap();
        env
    }

    fn names(at: &AtomTable, words: &[Word]) -> Vec<Vec<u8>> {
        words.iter().map(|w| at.text(w.atom).to_vec()).collect()
    }

    #[test]
    fn cycles_prefix_matches_bytewise() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["abc", "abd", "abz"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        let mut at = AtomTable::new().unwrap();
        let env = setup_env(&mut at, dir.path());
        let words = collect_candidates(&mut at, &env, b"a", false);
        assert_eq!(
            names(&at, &words),
            [b"a".to_vec(), b"abc".to_vec(), b"abd".to_vec(), b"abz".to_vec()]
        );
    }

    #[test]
    fn case_sensitive_prefix_outranks_folded_prefix() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["Makefile", "makefile.bak", "other"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        let mut at = AtomTable::new().unwrap();
        let env = setup_env(&mut at, dir.path());
        let words = collect_candidates(&mut at, &env, b"vi Make", false);
        let names = names(&at, &words);
        assert_eq!(names[0], b"Make".to_vec());
        assert_eq!(names[1], b"Makefile".to_vec());
        assert_eq!(names[2], b"makefile.bak".to_vec());
        // "other" holds no subsequence of "Make" and is dropped
        assert_eq!(names.len(), 3);
    }

    #[test]
    fn cd_lines_offer_directories_only() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("subdir")).unwrap();
        std::fs::write(dir.path().join("file"), b"").unwrap();
        let mut at = AtomTable::new().unwrap();
        let env = setup_env(&mut at, dir.path());
        let words = collect_candidates(&mut at, &env, b"cd ", false);
        assert_eq!(names(&at, &words), [b"".to_vec(), b"subdir/".to_vec()]);
    }

    #[test]
    fn symlink_to_directory_completes_with_a_slash() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("real")).unwrap();
        std::os::unix::fs::symlink(dir.path().join("real"), dir.path().join("link")).unwrap();
        std::fs::write(dir.path().join("plain"), b"").unwrap();
        let mut at = AtomTable::new().unwrap();
        let env = setup_env(&mut at, dir.path());
        let words = collect_candidates(&mut at, &env, b"l", false);
        assert!(names(&at, &words).contains(&b"link/".to_vec()));
    }

    #[test]
    fn dotfiles_sort_after_ordinary_names() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".aaa"), b"").unwrap();
        std::fs::write(dir.path().join("bbb"), b"").unwrap();
        let mut at = AtomTable::new().unwrap();
        let env = setup_env(&mut at, dir.path());
        let words = collect_candidates(&mut at, &env, b"", false);
        assert_eq!(
            names(&at, &words),
            [b"".to_vec(), b"bbb".to_vec(), b".aaa".to_vec()]
        );
    }

    #[test]
    fn dirname_portion_restricts_the_listing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub").join("inner"), b"").unwrap();
        std::fs::write(dir.path().join("outer"), b"").unwrap();
        let mut at = AtomTable::new().unwrap();
        let env = setup_env(&mut at, dir.path());
        let words = collect_candidates(&mut at, &env, b"cat sub/i", false);
        assert_eq!(names(&at, &words), [b"i".to_vec(), b"inner".to_vec()]);
    }
}
