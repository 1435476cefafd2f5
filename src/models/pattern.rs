//! Warn-pattern matching against captured script output.

use regex::{Regex, RegexBuilder};

use crate::Result;

/// Compiled set of warn patterns.
///
/// Each configured pattern is tried as written, with doubled backslashes
/// collapsed, and case-insensitively. A pattern that is not a valid regex
/// is matched literally.
#[derive(Debug, Clone, Default)]
pub struct WarnMatcher {
    variants: Vec<Regex>,
}

impl WarnMatcher {
    /// Compile `patterns`; blank entries are ignored.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Pattern` if even the literal form of a pattern
    /// cannot be compiled (for example when it exceeds the size limit).
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let mut variants = Vec::new();
        for raw in patterns.iter().map(AsRef::as_ref) {
            if raw.trim().is_empty() {
                continue;
            }
            variants.push(compile(raw, false)?);
            let unescaped = raw.replace("\\\\", "\\");
            if unescaped != raw {
                variants.push(compile(&unescaped, false)?);
            }
            variants.push(compile(raw, true)?);
        }
        Ok(Self { variants })
    }

    /// Whether no pattern is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }

    /// Whether any variant matches `output`.
    #[must_use]
    pub fn matches(&self, output: &str) -> bool {
        self.variants.iter().any(|re| re.is_match(output))
    }
}

fn compile(pattern: &str, case_insensitive: bool) -> Result<Regex> {
    match RegexBuilder::new(pattern)
        .case_insensitive(case_insensitive)
        .build()
    {
        Ok(re) => Ok(re),
        Err(_) => Ok(RegexBuilder::new(&regex::escape(pattern))
            .case_insensitive(case_insensitive)
            .build()?),
    }
}
