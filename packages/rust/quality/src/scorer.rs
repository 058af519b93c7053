//! Heuristic quality scoring, complexity estimation and pattern extraction.
//!
//! The score is the sum of five bounded components:
//!
//! | Component         | Range  |
//! |-------------------|--------|
//! | length band       | 0 – 3  |
//! | line count        | 0 – 2  |
//! | comment ratio     | 0 – 2  |
//! | structure         | 0 – 2  |
//! | external score    | 0 – 1  |

use std::sync::LazyLock;

use regex::Regex;

use curator_shared::{Candidate, Complexity, QualityScorer};

#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicScorer;

impl HeuristicScorer {
    pub fn new() -> Self {
        Self
    }
}

impl QualityScorer for HeuristicScorer {
    fn score(&self, candidate: &Candidate) -> f64 {
        let content = candidate.content.as_str();
        let total = length_component(content)
            + line_component(content)
            + comment_component(content)
            + structure_component(content)
            + external_component(candidate.external_score);
        total.clamp(0.0, 10.0)
    }

    fn complexity(&self, content: &str) -> Complexity {
        let depth = nesting_depth(content);
        let lines = code_lines(content).count();

        if depth >= 5 || lines > 100 {
            Complexity::Complex
        } else if depth <= 2 && lines <= 20 {
            Complexity::Simple
        } else {
            Complexity::Moderate
        }
    }

    fn extract_patterns(&self, candidate: &Candidate) -> Vec<String> {
        PATTERNS
            .iter()
            .filter(|(_, re)| re.is_match(&candidate.content))
            .map(|(name, _)| (*name).to_string())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Patterns
// ---------------------------------------------------------------------------

static PATTERNS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    [
        (
            "function-definition",
            r"\b(fn|def|function|func|fun)\s+\w+\s*[<(]",
        ),
        (
            "class-definition",
            r"\b(class|struct|interface|trait|impl|enum)\s+\w+",
        ),
        ("async", r"\b(async|await)\b|\.await\b"),
        (
            "error-handling",
            r"\b(try|catch|except|finally|raise|throw|throws)\b|Result<|Err\(|\)\?|if err != nil",
        ),
        (
            "iteration",
            r"\b(for|while|loop|foreach)\b|\.(iter|map|filter|forEach|reduce)\(",
        ),
        ("closure", r"\|[^|\n]*\|\s*[\w{(]|\blambda\b|=>"),
        (
            "test",
            r"#\[(tokio::)?test\]|\bdef test_\w+|\b(describe|it|test)\(|@Test\b|\bfunc Test\w+",
        ),
        (
            "import",
            r"(?m)^\s*(use\s+\w|import\s|from\s+\S+\s+import|#include|require\(|using\s+\w)",
        ),
    ]
    .into_iter()
    .map(|(name, pattern)| (name, Regex::new(pattern).expect("valid regex")))
    .collect()
});

// ---------------------------------------------------------------------------
// Score components
// ---------------------------------------------------------------------------

fn code_lines(content: &str) -> impl Iterator<Item = &str> {
    content.lines().filter(|l| !l.trim().is_empty())
}

fn length_component(content: &str) -> f64 {
    match content.trim().len() {
        0..=19 => 0.0,
        20..=49 | 2_001..=5_000 => 2.0,
        50..=2_000 => 3.0,
        _ => 1.0,
    }
}

fn line_component(content: &str) -> f64 {
    match code_lines(content).count() {
        0 => 0.0,
        3..=80 => 2.0,
        _ => 1.0,
    }
}

fn is_comment_line(line: &str) -> bool {
    let trimmed = line.trim_start();
    ["//", "#", "/*", "* ", "*/", "--", "\"\"\""]
        .iter()
        .any(|marker| trimmed.starts_with(marker))
        && !trimmed.starts_with("#[")
        && !trimmed.starts_with("#include")
}

fn comment_component(content: &str) -> f64 {
    let (total, comments) = code_lines(content).fold((0usize, 0usize), |(t, c), line| {
        (t + 1, c + usize::from(is_comment_line(line)))
    });
    if total == 0 {
        return 0.0;
    }
    let ratio = comments as f64 / total as f64;
    if ratio == 0.0 {
        0.5
    } else if (0.05..=0.4).contains(&ratio) {
        2.0
    } else {
        1.0
    }
}

fn structure_component(content: &str) -> f64 {
    let constructs = PATTERNS
        .iter()
        .filter(|(name, _)| {
            matches!(
                *name,
                "function-definition" | "class-definition" | "error-handling" | "iteration"
            )
        })
        .filter(|(_, re)| re.is_match(content))
        .count();
    (constructs as f64 * 0.5).min(2.0)
}

/// Maps an external popularity score onto `[0, 1]` logarithmically.
fn external_component(external: Option<i64>) -> f64 {
    match external {
        Some(score) if score > 0 => ((score as f64).ln_1p() / 101f64.ln()).min(1.0),
        _ => 0.0,
    }
}

/// Deepest bracket nesting, or indentation depth when that is larger
/// (for brace-less languages).
fn nesting_depth(content: &str) -> usize {
    let mut depth = 0usize;
    let mut max_depth = 0usize;
    for c in content.chars() {
        match c {
            '{' | '(' | '[' => {
                depth += 1;
                max_depth = max_depth.max(depth);
            }
            '}' | ')' | ']' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }

    let max_indent = code_lines(content)
        .map(|l| {
            let spaces: usize = l
                .chars()
                .take_while(|c| c.is_whitespace())
                .map(|c| if c == '\t' { 4 } else { 1 })
                .sum();
            spaces / 4
        })
        .max()
        .unwrap_or(0);

    max_depth.max(max_indent)
}
