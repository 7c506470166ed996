//! Identifier binding and the best-match algorithm.

use std::collections::HashMap;

use serde_json::Value;

use crate::compile::{PatternSet, PatternToken};

/// One token position in a bound wildcard pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
enum MatchToken {
    One,
    Rest,
    Literal(Value),
}

/// A pattern set resolved against a concrete correlation identifier.
///
/// The fixed table is keyed by the canonical JSON encoding of the
/// literal token sequence, giving exact matches a single lookup; the
/// wildcard table is scanned in declaration order.
#[derive(Debug, Clone)]
pub struct BoundPatternSet<A> {
    fixed: HashMap<String, Vec<A>>,
    wildcard: Vec<(Vec<MatchToken>, Vec<A>)>,
}

/// Canonical lookup key for a literal token sequence.
fn canonical_key(tokens: &[Value]) -> String {
    serde_json::to_string(tokens).unwrap_or_default()
}

impl<A: Clone + PartialEq> PatternSet<A> {
    /// Resolves the identifier placeholder in every pattern, producing an
    /// independent bound copy. Use `Value::Null` for the
    /// notification-scoped set.
    #[must_use]
    pub fn bind(&self, identifier: &Value) -> BoundPatternSet<A> {
        let mut fixed: HashMap<String, Vec<A>> = HashMap::new();
        for (pattern, actions) in &self.fixed {
            let literals: Vec<Value> = pattern
                .iter()
                .map(|token| match token {
                    PatternToken::Identifier => identifier.clone(),
                    PatternToken::Literal(value) => value.clone(),
                    // Fixed-table patterns carry no wildcards.
                    PatternToken::One | PatternToken::Rest => Value::Null,
                })
                .collect();
            let merged = fixed.entry(canonical_key(&literals)).or_default();
            for action in actions {
                if !merged.contains(action) {
                    merged.push(action.clone());
                }
            }
        }

        let wildcard = self
            .wildcard
            .iter()
            .map(|(pattern, actions)| {
                let tokens = pattern
                    .iter()
                    .map(|token| match token {
                        PatternToken::Identifier => MatchToken::Literal(identifier.clone()),
                        PatternToken::Literal(value) => MatchToken::Literal(value.clone()),
                        PatternToken::One => MatchToken::One,
                        PatternToken::Rest => MatchToken::Rest,
                    })
                    .collect();
                (tokens, actions.clone())
            })
            .collect();

        BoundPatternSet { fixed, wildcard }
    }
}

impl<A> BoundPatternSet<A> {
    /// Finds the best-matching entry for the message token sequence.
    ///
    /// An exact fixed-table hit always wins and captures nothing.
    /// Otherwise every viable wildcard candidate is walked token by
    /// token; the candidate matching the most literal positions wins,
    /// ties broken by the greatest count of one-wildcard captures
    /// (tokens swallowed by a rest-wildcard do not count towards the
    /// tie-break). `None` means the message is of no interest.
    #[must_use]
    pub fn best_match(&self, message: &[Value]) -> Option<(&[A], Vec<Value>)> {
        if let Some(actions) = self.fixed.get(&canonical_key(message)) {
            return Some((actions, Vec::new()));
        }

        let mut best: Option<(&[A], Vec<Value>)> = None;
        let mut best_rank = (0usize, 0usize);
        for (pattern, actions) in &self.wildcard {
            let ends_in_rest = matches!(pattern.last(), Some(MatchToken::Rest));
            if ends_in_rest {
                if message.len() + 1 < pattern.len() {
                    continue;
                }
            } else if message.len() != pattern.len() {
                continue;
            }

            let Some(candidate) = walk_candidate(pattern, message) else {
                continue;
            };
            let rank = (candidate.exact, candidate.ones);
            if best.is_none() || rank > best_rank {
                best_rank = rank;
                best = Some((actions.as_slice(), candidate.captures));
            }
        }
        best
    }
}

struct Candidate {
    exact: usize,
    ones: usize,
    captures: Vec<Value>,
}

/// Walks one viable candidate, returning the counts of matched literal
/// positions and one-wildcard captures plus the captured tokens, or
/// `None` on a literal mismatch.
fn walk_candidate(pattern: &[MatchToken], message: &[Value]) -> Option<Candidate> {
    let mut exact = 0usize;
    let mut ones = 0usize;
    let mut captures = Vec::new();
    for (index, token) in pattern.iter().enumerate() {
        match token {
            MatchToken::Rest => {
                captures.extend(message.get(index..).unwrap_or(&[]).iter().cloned());
                break;
            }
            MatchToken::One => {
                captures.push(message.get(index)?.clone());
                ones += 1;
            }
            MatchToken::Literal(value) => {
                if message.get(index) != Some(value) {
                    return None;
                }
                exact += 1;
            }
        }
    }
    Some(Candidate {
        exact,
        ones,
        captures,
    })
}
