//! Pattern-set templates and the declarative action-map compiler.

use serde_json::Value;

use crate::action::ActionPath;
use crate::errors::CompileError;

/// One token position in an unbound pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatternToken {
    /// Placeholder for the correlation identifier, resolved by
    /// [`PatternSet::bind`].
    Identifier,
    /// Matches exactly one message token, capturing it.
    One,
    /// Matches and captures all remaining message tokens. Always the
    /// final token of its pattern.
    Rest,
    /// Matches one message token by equality.
    Literal(Value),
}

/// An unbound pattern-set template: patterns keyed into a fixed table
/// (no wildcards) and a wildcard table, each entry carrying a
/// deduplicated list of action labels.
///
/// The template is reused across many in-flight commands; binding it to
/// a concrete identifier is a structural copy, never a shared mutation.
#[derive(Debug, Clone)]
pub struct PatternSet<A> {
    pub(crate) fixed: Vec<(Vec<PatternToken>, Vec<A>)>,
    pub(crate) wildcard: Vec<(Vec<PatternToken>, Vec<A>)>,
}

impl<A> PatternSet<A> {
    fn new() -> Self {
        Self {
            fixed: Vec::new(),
            wildcard: Vec::new(),
        }
    }

    fn is_empty(&self) -> bool {
        self.fixed.is_empty() && self.wildcard.is_empty()
    }
}

impl<A: PartialEq> PatternSet<A> {
    /// Files a pattern under the table its tokens call for, merging the
    /// action into an existing identical key rather than duplicating it.
    fn insert(&mut self, pattern: Vec<PatternToken>, action: A) {
        let has_wildcard = pattern
            .iter()
            .any(|token| matches!(token, PatternToken::One | PatternToken::Rest));
        let table = if has_wildcard {
            &mut self.wildcard
        } else {
            &mut self.fixed
        };
        if let Some((_, actions)) = table.iter_mut().find(|(key, _)| *key == pattern) {
            if !actions.contains(&action) {
                actions.push(action);
            }
        } else {
            table.push((pattern, vec![action]));
        }
    }
}

impl PatternSet<ActionPath> {
    /// Compiles an ordered list of declarative action maps.
    ///
    /// Each map is walked depth-first: mapping keys accumulate the action
    /// path, a leaf array whose first element is neither an array nor a
    /// mapping is a literal pattern. Within a pattern, `"?"` compiles to
    /// a one-wildcard and `"*"` to a rest-wildcard; every pattern is
    /// prefixed with the identifier placeholder.
    ///
    /// # Errors
    ///
    /// Returns a [`CompileError`] when the input list is empty, an entry
    /// is not a mapping, a pattern sits under no action label, tokens
    /// follow a rest-wildcard, or no patterns compile at all.
    pub fn compile(maps: &[Value]) -> Result<Self, CompileError> {
        if maps.is_empty() {
            return Err(CompileError::EmptyInput);
        }
        let mut set = Self::new();
        for map in maps {
            let Value::Object(entries) = map else {
                return Err(CompileError::NotAMapping {
                    found: map.to_string(),
                });
            };
            for (key, entry) in entries {
                walk(&mut set, &[key.clone()], entry)?;
            }
        }
        if set.is_empty() {
            return Err(CompileError::NoPatterns);
        }
        Ok(set)
    }
}

fn walk(
    set: &mut PatternSet<ActionPath>,
    path: &[String],
    entry: &Value,
) -> Result<(), CompileError> {
    match entry {
        Value::Object(entries) => {
            for (key, sub) in entries {
                let mut next = path.to_vec();
                next.push(key.clone());
                walk(set, &next, sub)?;
            }
            Ok(())
        }
        Value::Array(items) => {
            if matches!(items.first(), Some(Value::Array(_) | Value::Object(_))) {
                for sub in items {
                    walk(set, path, sub)?;
                }
                Ok(())
            } else if path.is_empty() {
                Err(CompileError::PatternOutsideAction {
                    pattern: entry.to_string(),
                })
            } else {
                let pattern = compile_pattern(entry, items)?;
                set.insert(pattern, ActionPath::new(path.to_vec()));
                Ok(())
            }
        }
        other => Err(CompileError::InvalidEntry {
            found: other.to_string(),
        }),
    }
}

fn compile_pattern(entry: &Value, items: &[Value]) -> Result<Vec<PatternToken>, CompileError> {
    let mut pattern = vec![PatternToken::Identifier];
    let mut tokens = items.iter();
    while let Some(token) = tokens.next() {
        match token.as_str() {
            Some("?") => pattern.push(PatternToken::One),
            Some("*") => {
                pattern.push(PatternToken::Rest);
                if tokens.next().is_some() {
                    return Err(CompileError::TokenAfterRest {
                        pattern: entry.to_string(),
                    });
                }
            }
            _ => pattern.push(PatternToken::Literal(token.clone())),
        }
    }
    Ok(pattern)
}

/// Builds a pattern set directly from typed entries, bypassing the JSON
/// declaration walk. Used for the engine's fixed internal action maps.
#[derive(Debug, Clone)]
pub struct PatternSetBuilder<A> {
    set: PatternSet<A>,
}

impl<A: PartialEq> PatternSetBuilder<A> {
    /// Starts an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            set: PatternSet::new(),
        }
    }

    /// Adds one pattern under the given action. The identifier
    /// placeholder is prefixed automatically and tokens after a
    /// rest-wildcard are dropped.
    #[must_use]
    pub fn entry<I>(mut self, action: A, tokens: I) -> Self
    where
        I: IntoIterator<Item = PatternToken>,
    {
        let mut pattern = vec![PatternToken::Identifier];
        for token in tokens {
            let is_rest = matches!(token, PatternToken::Rest);
            pattern.push(token);
            if is_rest {
                break;
            }
        }
        self.set.insert(pattern, action);
        self
    }

    /// Finishes the builder.
    #[must_use]
    pub fn build(self) -> PatternSet<A> {
        self.set
    }
}

impl<A: PartialEq> Default for PatternSetBuilder<A> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::{PatternSet, PatternSetBuilder, PatternToken};
    use crate::action::ActionPath;
    use crate::errors::CompileError;

    #[rstest]
    fn rejects_empty_input() {
        let result = PatternSet::compile(&[]);
        assert!(matches!(result, Err(CompileError::EmptyInput)));
    }

    #[rstest]
    fn rejects_non_mapping_entry() {
        let result = PatternSet::compile(&[json!(["data", "stored"])]);
        assert!(matches!(result, Err(CompileError::NotAMapping { .. })));
    }

    #[rstest]
    fn rejects_scalar_under_action() {
        let result = PatternSet::compile(&[json!({"stored": "data"})]);
        assert!(matches!(result, Err(CompileError::InvalidEntry { .. })));
    }

    #[rstest]
    fn rejects_tokens_after_rest_wildcard() {
        let result = PatternSet::compile(&[json!({"error": ["error", "*", "extra"]})]);
        assert!(matches!(result, Err(CompileError::TokenAfterRest { .. })));
    }

    #[rstest]
    fn rejects_maps_without_patterns() {
        let result = PatternSet::compile(&[json!({"stored": {}})]);
        assert!(matches!(result, Err(CompileError::NoPatterns)));
    }

    #[rstest]
    fn classifies_fixed_and_wildcard_patterns() {
        let set = PatternSet::compile(&[json!({
            "done": ["done", ""],
            "stored": ["data", "stored", "?", "?"],
        })])
        .expect("compile failed");

        assert_eq!(set.fixed.len(), 1);
        assert_eq!(set.wildcard.len(), 1);
    }

    #[rstest]
    fn prefixes_identifier_placeholder() {
        let set =
            PatternSet::compile(&[json!({"done": ["done", ""]})]).expect("compile failed");
        let (pattern, _) = set.fixed.first().expect("missing pattern");
        assert_eq!(pattern.first(), Some(&PatternToken::Identifier));
    }

    #[rstest]
    fn accumulates_nested_action_paths() {
        let set = PatternSet::compile(&[json!({
            "error": {
                "syntax": [
                    ["error", "missing", "*"],
                    ["error", "unknown", "*"],
                ],
            },
        })])
        .expect("compile failed");

        assert_eq!(set.wildcard.len(), 2);
        for (_, actions) in &set.wildcard {
            assert_eq!(actions, &vec![ActionPath::new(["error", "syntax"])]);
        }
    }

    #[rstest]
    fn deduplicates_actions_on_identical_keys() {
        let set = PatternSet::compile(&[
            json!({"stored": ["data", "stored", "?", "?"]}),
            json!({"stored": ["data", "stored", "?", "?"]}),
        ])
        .expect("compile failed");

        let (_, actions) = set.wildcard.first().expect("missing pattern");
        assert_eq!(actions.len(), 1);
    }

    #[rstest]
    fn merges_distinct_actions_on_shared_key() {
        let set = PatternSet::compile(&[
            json!({"stored": ["data", "stored", "?", "?"]}),
            json!({"fresh": ["data", "stored", "?", "?"]}),
        ])
        .expect("compile failed");

        let (_, actions) = set.wildcard.first().expect("missing pattern");
        assert_eq!(actions.len(), 2);
    }

    #[rstest]
    fn builder_truncates_after_rest_wildcard() {
        let set = PatternSetBuilder::new()
            .entry("error", vec![
                PatternToken::Literal(json!("error")),
                PatternToken::Rest,
                PatternToken::One,
            ])
            .build();

        let (pattern, _) = set.wildcard.first().expect("missing pattern");
        assert_eq!(pattern.last(), Some(&PatternToken::Rest));
        assert_eq!(pattern.len(), 3);
    }
}
