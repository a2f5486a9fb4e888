//! Query normalization.
//!
//! Pure function: NFC-normalize, collapse whitespace runs, trim, lowercase,
//! strip trailing punctuation, strip surrounding quotes. Two queries that
//! differ only in casing, spacing or trailing punctuation normalize equal.

use unicode_normalization::UnicodeNormalization;

const TRAILING_PUNCTUATION: &[char] = &['?', '!', '.', ',', ';'];
const QUOTES: &[char] = &['"', '\'', '\u{201C}', '\u{201D}', '\u{2018}', '\u{2019}'];

pub fn normalize(input: &str) -> String {
    let nfc: String = input.nfc().collect();

    let collapsed = collapse_whitespace(&nfc);
    let trimmed = collapsed.trim();
    let lowercased = trimmed.to_lowercase();
    let depunctuated = lowercased.trim_end_matches(TRAILING_PUNCTUATION);
    let unquoted = depunctuated.trim_matches(QUOTES);

    unquoted.to_string()
}

fn collapse_whitespace(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut last_was_space = false;
    for c in s.chars() {
        if c.is_whitespace() {
            if !last_was_space {
                out.push(' ');
            }
            last_was_space = true;
        } else {
            out.push(c);
            last_was_space = false;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_whitespace_and_trims() {
        assert_eq!(normalize("  hello   world  "), "hello world");
    }

    #[test]
    fn lowercases() {
        assert_eq!(normalize("Hello WORLD"), "hello world");
    }

    #[test]
    fn strips_trailing_punctuation() {
        assert_eq!(normalize("what is this?"), "what is this");
        assert_eq!(normalize("wait..."), "wait");
    }

    #[test]
    fn strips_surrounding_quotes() {
        assert_eq!(normalize("\"hello world\""), "hello world");
        assert_eq!(normalize("'hello world'"), "hello world");
    }

    #[test]
    fn preserves_interior_punctuation() {
        assert_eq!(normalize("what's up, doc?"), "what's up, doc");
    }

    #[test]
    fn casing_spacing_and_punctuation_variants_normalize_equal() {
        let a = normalize("What is the Gold Loan rate?");
        let b = normalize("  what   is the gold loan rate  ");
        assert_eq!(a, b);
    }

    #[test]
    fn empty_input_normalizes_to_empty() {
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("   "), "");
    }
}
