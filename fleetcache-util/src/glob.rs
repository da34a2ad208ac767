//! Shell-style glob matching for the `KEYS` command.
//!
//! Supports `*` (any run of bytes, including empty), `?` (exactly one byte),
//! literal bytes, and `\` to escape the byte that follows it. Character
//! classes (`[abc]`) are intentionally unsupported.

/// Returns whether `name` matches `pattern`.
///
/// Matching operates on raw bytes, not `char`s, since key names are opaque
/// byte strings. `\*`, `\?`, and `\\` match a literal `*`, `?`, or `\`.
pub fn glob_match(pattern: &[u8], name: &[u8]) -> bool {
    match_from(pattern, name)
}

/// Backtracking matcher. Keeps the last `*` seen and the name position it
/// was first tried at, so on mismatch we can retry the star against one
/// more byte of `name` rather than re-walking the whole pattern.
fn match_from(pattern: &[u8], name: &[u8]) -> bool {
    let mut pi = 0;
    let mut ni = 0;
    let mut star_pi: Option<usize> = None;
    let mut star_ni = 0;

    while ni < name.len() {
        if pi < pattern.len() {
            match pattern[pi] {
                b'*' => {
                    star_pi = Some(pi);
                    star_ni = ni;
                    pi += 1;
                    continue;
                }
                b'?' => {
                    pi += 1;
                    ni += 1;
                    continue;
                }
                b'\\' if pi + 1 < pattern.len() => {
                    if pattern[pi + 1] == name[ni] {
                        pi += 2;
                        ni += 1;
                        continue;
                    }
                }
                c if c == name[ni] => {
                    pi += 1;
                    ni += 1;
                    continue;
                }
                _ => {}
            }
        }
        // mismatch (or pattern exhausted): backtrack to the last `*`, if any
        if let Some(sp) = star_pi {
            star_ni += 1;
            ni = star_ni;
            pi = sp + 1;
        } else {
            return false;
        }
    }

    // consume any trailing `*`s; anything else means the pattern wanted more
    while pi < pattern.len() && pattern[pi] == b'*' {
        pi += 1;
    }
    pi == pattern.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_match() {
        assert!(glob_match(b"abc", b"abc"));
        assert!(!glob_match(b"abc", b"abd"));
        assert!(!glob_match(b"abc", b"ab"));
    }

    #[test]
    fn star_matches_any_run() {
        assert!(glob_match(b"*", b""));
        assert!(glob_match(b"*", b"anything"));
        assert!(glob_match(b"c*", b"c"));
        assert!(glob_match(b"c*", b"ca"));
        assert!(glob_match(b"c*", b"caaaaaa"));
        assert!(!glob_match(b"c*", b"dca"));
    }

    #[test]
    fn question_matches_one_byte() {
        assert!(glob_match(b"c?", b"ca"));
        assert!(!glob_match(b"c?", b"c"));
        assert!(!glob_match(b"c?", b"caa"));
    }

    #[test]
    fn escaped_literals() {
        assert!(glob_match(br"c\*", b"c*"));
        assert!(!glob_match(br"c\*", b"ca"));
        assert!(glob_match(br"c\?", b"c?"));
    }

    #[test]
    fn exact_original_source_cases() {
        // mirrors original_source/test/test_cmds_extra.py "Test keys command";
        // the shell's own `\*` escaping resolves to a literal `c*` pattern
        // before it ever reaches the wire, so the glob pattern under test
        // here is `c*`, not a backslash-escaped one.
        assert!(glob_match(b"*", b"c"));
        assert!(glob_match(b"*", b"a"));
        assert!(glob_match(b"*", b"ca"));
        assert!(glob_match(b"*", b"b"));
        assert!(!glob_match(b"d", b"c"));
        assert!(glob_match(b"c", b"c"));
        assert!(!glob_match(b"c?", b"c"));
        assert!(glob_match(b"c?", b"ca"));
        assert!(glob_match(b"c*", b"c"));
        assert!(glob_match(b"c*", b"ca"));
    }

    #[cfg(test)]
    mod proptests {
        use proptest::prelude::*;

        use super::super::glob_match;

        proptest! {
            #[test]
            fn every_literal_pattern_matches_itself(name in proptest::collection::vec(any::<u8>(), 0..16)) {
                prop_assert!(glob_match(&name, &name));
            }

            #[test]
            fn bare_star_matches_everything(name in proptest::collection::vec(any::<u8>(), 0..16)) {
                prop_assert!(glob_match(b"*", &name));
            }
        }
    }
}
