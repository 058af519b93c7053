//! Default judging collaborators for the Curator pipeline.
//!
//! - [`DelimiterSyntaxChecker`]: cheap bracket-balance check per language
//! - [`HeuristicScorer`]: quality score, complexity, and pattern extraction

mod language;
mod scorer;
mod syntax;

pub use language::Language;
pub use scorer::HeuristicScorer;
pub use syntax::DelimiterSyntaxChecker;
