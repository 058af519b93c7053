//! Languages the default checker understands, and their lexical rules.

use std::str::FromStr;

use curator_shared::CuratorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    Rust,
    Python,
    JavaScript,
    TypeScript,
    Java,
    Go,
    C,
    Cpp,
    CSharp,
    Kotlin,
    Swift,
    Ruby,
    Php,
    Scala,
}

impl Language {
    /// Markers that start a comment running to end of line.
    pub fn line_comments(self) -> &'static [&'static str] {
        match self {
            Self::Python | Self::Ruby => &["#"],
            Self::Php => &["//", "#"],
            _ => &["//"],
        }
    }

    pub fn has_block_comments(self) -> bool {
        !matches!(self, Self::Python | Self::Ruby)
    }

    /// Characters that open and close a string literal.
    ///
    /// Rust and Scala use `'` for lifetimes and symbols, so it is not
    /// treated as a quote there; see [`Language::has_char_literals`].
    pub fn quotes(self) -> &'static [char] {
        match self {
            Self::Rust | Self::Scala => &['"'],
            Self::JavaScript | Self::TypeScript | Self::Go => &['"', '\'', '`'],
            _ => &['"', '\''],
        }
    }

    /// Quote characters that also open a multi-line `"""` style string.
    pub fn triple_quotes(self) -> &'static [char] {
        match self {
            Self::Python => &['"', '\''],
            Self::Kotlin | Self::Scala | Self::Swift | Self::Java => &['"'],
            _ => &[],
        }
    }

    /// `'x'` is a char literal, but a lone `'` is a lifetime or symbol.
    pub fn has_char_literals(self) -> bool {
        matches!(self, Self::Rust | Self::Scala)
    }
}

impl FromStr for Language {
    type Err = CuratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lang = match s.trim().to_ascii_lowercase().as_str() {
            "rust" | "rs" => Self::Rust,
            "python" | "py" => Self::Python,
            "javascript" | "js" | "node" => Self::JavaScript,
            "typescript" | "ts" => Self::TypeScript,
            "java" => Self::Java,
            "go" | "golang" => Self::Go,
            "c" => Self::C,
            "cpp" | "c++" | "cxx" => Self::Cpp,
            "csharp" | "c#" | "cs" => Self::CSharp,
            "kotlin" | "kt" => Self::Kotlin,
            "swift" => Self::Swift,
            "ruby" | "rb" => Self::Ruby,
            "php" => Self::Php,
            "scala" => Self::Scala,
            other => {
                return Err(CuratorError::validation(format!(
                    "unsupported language '{other}'"
                )));
            }
        };
        Ok(lang)
    }
}
