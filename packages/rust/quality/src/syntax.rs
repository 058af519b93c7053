//! Bracket-balance syntax plausibility check.

use curator_shared::{Result, SyntaxValidator};
use tracing::trace;

use crate::language::Language;

/// Accepts a snippet when its `()`, `[]` and `{}` are balanced and no string
/// literal or block comment is left open. String contents and comments are
/// ignored. Unknown languages are an `Err`, so the pipeline's failure policy
/// decides their fate.
#[derive(Debug, Clone, Copy, Default)]
pub struct DelimiterSyntaxChecker;

impl DelimiterSyntaxChecker {
    pub fn new() -> Self {
        Self
    }
}

impl SyntaxValidator for DelimiterSyntaxChecker {
    fn is_syntax_valid(&self, content: &str, language: &str) -> Result<bool> {
        let lang: Language = language.parse()?;
        let balanced = is_balanced(content, lang);
        trace!(language, balanced, "delimiter check");
        Ok(balanced)
    }
}

fn closer_for(open: char) -> char {
    match open {
        '(' => ')',
        '[' => ']',
        _ => '}',
    }
}

fn is_balanced(content: &str, lang: Language) -> bool {
    let chars: Vec<char> = content.chars().collect();
    let line_comments: Vec<Vec<char>> = lang
        .line_comments()
        .iter()
        .map(|m| m.chars().collect())
        .collect();
    let quotes = lang.quotes();

    let mut stack = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if line_comments.iter().any(|m| chars[i..].starts_with(m)) {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
            continue;
        }

        if lang.has_block_comments() && chars[i..].starts_with(&['/', '*']) {
            i += 2;
            loop {
                if i + 1 >= chars.len() {
                    return false;
                }
                if chars[i] == '*' && chars[i + 1] == '/' {
                    i += 2;
                    break;
                }
                i += 1;
            }
            continue;
        }

        if lang.triple_quotes().contains(&c) && chars[i..].starts_with(&[c, c, c]) {
            match triple_quoted_end(&chars, i + 3, c) {
                Some(end) => {
                    i = end;
                    continue;
                }
                None => return false,
            }
        }

        if c == '\'' && lang.has_char_literals() {
            i += char_literal_len(&chars[i..]).unwrap_or(1);
            continue;
        }

        if quotes.contains(&c) {
            i += 1;
            loop {
                match chars.get(i) {
                    None => return false,
                    Some('\\') => i += 2,
                    Some(&q) if q == c => {
                        i += 1;
                        break;
                    }
                    // Only backtick strings may span lines.
                    Some('\n') if c != '`' => return false,
                    Some(_) => i += 1,
                }
            }
            continue;
        }

        match c {
            '(' | '[' | '{' => stack.push(closer_for(c)),
            ')' | ']' | '}' => {
                if stack.pop() != Some(c) {
                    return false;
                }
            }
            _ => {}
        }
        i += 1;
    }

    stack.is_empty()
}

/// Index just past the `"""` (or `'''`) closing a string whose body starts
/// at `from`. `None` when the string is never closed.
fn triple_quoted_end(chars: &[char], from: usize, quote: char) -> Option<usize> {
    let mut i = from;
    loop {
        match chars.get(i)? {
            '\\' => i += 2,
            &c if c == quote && chars[i..].starts_with(&[quote, quote, quote]) => {
                return Some(i + 3);
            }
            _ => i += 1,
        }
    }
}

/// Length of a char literal such as `'{'`, `'\n'` or `'\u{7b}'` at the start
/// of `rest`. `None` for lifetimes and symbols.
fn char_literal_len(rest: &[char]) -> Option<usize> {
    match rest.get(1)? {
        '\\' => (3..rest.len().min(12))
            .find(|&j| rest[j] == '\'')
            .filter(|&j| !rest[2..j].contains(&'\n'))
            .map(|j| j + 1),
        '\'' | '\n' => None,
        _ => (rest.get(2) == Some(&'\'')).then_some(3),
    }
}
