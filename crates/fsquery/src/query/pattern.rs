//! Shell-style wildcard patterns for string equations.
//!
//! `*` matches any run of characters, `?` any single character and `[...]` a
//! character class (`[abc]`, `[a-z]`, negated with `[^...]` or `[!...]`).
//! A backslash makes the next character literal, inside classes too.

use memchr::memchr3;

/// Returns true if `value` contains wildcard metacharacters.
pub fn is_pattern(value: &str) -> bool {
    memchr3(b'*', b'?', b'[', value.as_bytes()).is_some()
}

/// Checks that every class is closed and non-empty, that no class contains
/// `--`, and that the pattern does not end in a lone backslash.
pub fn is_valid_pattern(pattern: &str) -> bool {
    let chars = pattern.chars().collect::<Vec<_>>();
    let mut index = 0usize;
    while index < chars.len() {
        match chars[index] {
            '\\' => {
                if index + 1 >= chars.len() {
                    return false;
                }
                index += 2;
            }
            '[' => match class_end(&chars, index) {
                Some(end) => index = end,
                None => return false,
            },
            _ => index += 1,
        }
    }
    true
}

/// Byte length of the literal prefix in front of the first metacharacter or
/// escape. This is the part of a pattern an index can be positioned with.
pub fn fixed_prefix_len(pattern: &str) -> usize {
    pattern
        .bytes()
        .position(|byte| matches!(byte, b'*' | b'?' | b'[' | b'\\'))
        .unwrap_or(pattern.len())
}

/// Matches `candidate` against a validated pattern.
pub fn matches(pattern: &str, candidate: &str) -> bool {
    let pattern = pattern.chars().collect::<Vec<_>>();
    let candidate = candidate.chars().collect::<Vec<_>>();

    let mut pattern_index = 0usize;
    let mut candidate_index = 0usize;
    let mut star_index: Option<usize> = None;
    let mut star_candidate_index = 0usize;

    while candidate_index < candidate.len() {
        if pattern.get(pattern_index) == Some(&'*') {
            star_index = Some(pattern_index);
            pattern_index += 1;
            star_candidate_index = candidate_index;
            continue;
        }

        if let Some(next) = match_single(&pattern, pattern_index, candidate[candidate_index]) {
            pattern_index = next;
            candidate_index += 1;
            continue;
        }

        if let Some(last_star_index) = star_index {
            pattern_index = last_star_index + 1;
            star_candidate_index += 1;
            candidate_index = star_candidate_index;
            continue;
        }

        return false;
    }

    while pattern.get(pattern_index) == Some(&'*') {
        pattern_index += 1;
    }

    pattern_index == pattern.len()
}

/// Matches one non-star pattern element; returns the index after it.
fn match_single(pattern: &[char], index: usize, ch: char) -> Option<usize> {
    match *pattern.get(index)? {
        '?' => Some(index + 1),
        '[' => {
            let (matched, next) = match_class(pattern, index, ch)?;
            matched.then_some(next)
        }
        '\\' => {
            let literal = *pattern.get(index + 1)?;
            (literal == ch).then_some(index + 2)
        }
        literal => (literal == ch).then_some(index + 1),
    }
}

fn match_class(pattern: &[char], start: usize, ch: char) -> Option<(bool, usize)> {
    let mut index = start + 1;
    let negated = matches!(pattern.get(index), Some('^' | '!'));
    if negated {
        index += 1;
    }

    let mut matched = false;
    loop {
        let mut low = *pattern.get(index)?;
        if low == ']' {
            break;
        }
        if low == '\\' {
            index += 1;
            low = *pattern.get(index)?;
        }
        index += 1;

        if pattern.get(index) == Some(&'-') && pattern.get(index + 1).is_some_and(|c| *c != ']') {
            let mut high = pattern[index + 1];
            index += 2;
            if high == '\\' {
                high = *pattern.get(index)?;
                index += 1;
            }
            matched |= low <= ch && ch <= high;
        } else {
            matched |= low == ch;
        }
    }

    Some((matched != negated, index + 1))
}

/// Index after the `]` closing the class opened at `start`, if well-formed.
fn class_end(chars: &[char], start: usize) -> Option<usize> {
    let mut index = start + 1;
    if matches!(chars.get(index), Some('^' | '!')) {
        index += 1;
    }
    if matches!(chars.get(index), None | Some(']')) {
        return None;
    }

    while let Some(&ch) = chars.get(index) {
        match ch {
            ']' => return Some(index + 1),
            '\\' => {
                chars.get(index + 1)?;
                index += 2;
            }
            '-' if chars.get(index + 1) == Some(&'-') => return None,
            _ => index += 1,
        }
    }
    None
}
