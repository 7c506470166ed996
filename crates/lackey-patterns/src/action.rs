//! Open action vocabulary for caller-declared pattern sets.

use std::fmt;

/// Label attached to a compiled pattern: the path of mapping keys under
/// which the pattern was declared, for example `["error", "syntax"]`.
///
/// The first segment classifies the action for protocol bookkeeping:
/// `return` and `error` heads end a command's lifecycle, everything else
/// is informational.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ActionPath {
    segments: Vec<String>,
}

impl ActionPath {
    /// Builds a path from the supplied segments.
    #[must_use]
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            segments: segments.into_iter().map(Into::into).collect(),
        }
    }

    /// The ordered mapping keys forming this path.
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// The first segment, or the empty string for an empty path.
    #[must_use]
    pub fn head(&self) -> &str {
        self.segments.first().map_or("", String::as_str)
    }

    /// Whether this action marks successful command completion.
    #[must_use]
    pub fn is_return_class(&self) -> bool {
        self.head() == "return"
    }

    /// Whether this action marks command failure.
    #[must_use]
    pub fn is_error_class(&self) -> bool {
        self.head() == "error"
    }
}

impl fmt::Display for ActionPath {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.segments.join("/"))
    }
}
