//! Session tokens and channel-group sequence numbers.

use crate::errors::ScError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

/// Number of letters in a session token.
pub const TOKEN_LEN: usize = 4;

/// Alphabet tokens are drawn from.
const TOKEN_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// A session token: exactly four upper-case ASCII letters.
///
/// User-supplied tokens are case-insensitive; [`Token::parse`] normalizes them
/// so registry and artifact lookups compare equal regardless of input case.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Token(String);

impl Token {
    /// Validate and normalize a user-supplied token.
    ///
    /// # Errors
    ///
    /// Returns `ScError::InvalidToken` unless the input is exactly four ASCII letters.
    pub fn parse(raw: &str) -> Result<Self, ScError> {
        let trimmed = raw.trim();
        if trimmed.len() == TOKEN_LEN && trimmed.bytes().all(|b| b.is_ascii_alphabetic()) {
            Ok(Self(trimmed.to_ascii_uppercase()))
        } else {
            Err(ScError::InvalidToken(trimmed.chars().take(16).collect()))
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Token {
    type Error = ScError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Token::parse(&value)
    }
}

impl From<Token> for String {
    fn from(token: Token) -> Self {
        token.0
    }
}

/// Generates session tokens.
#[derive(Debug, Clone, Copy)]
pub struct IdentifierAllocator {
    max_attempts: u32,
}

impl IdentifierAllocator {
    #[must_use]
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    /// Produce a random token. The caller checks it against live state.
    #[must_use]
    pub fn generate_token(&self) -> Token {
        Self::generate_with(&mut rand::thread_rng())
    }

    fn generate_with<R: Rng>(rng: &mut R) -> Token {
        let letters: String = (0..TOKEN_LEN)
            .map(|_| {
                let idx = rng.gen_range(0..TOKEN_ALPHABET.len());
                TOKEN_ALPHABET.get(idx).map_or('A', |b| char::from(*b))
            })
            .collect();
        Token(letters)
    }

    /// Regenerate until `is_free` accepts a token.
    ///
    /// Collisions are retried, not reported; only exhausting the attempt budget
    /// surfaces `ScError::DuplicateToken`.
    pub fn generate_free_token<F>(&self, mut is_free: F) -> Result<Token, ScError>
    where
        F: FnMut(&Token) -> bool,
    {
        for _ in 0..self.max_attempts {
            let candidate = self.generate_token();
            if is_free(&candidate) {
                return Ok(candidate);
            }
        }

        warn!(
            target: "sc.actor.registry",
            attempts = self.max_attempts,
            "Token space exhausted"
        );
        Err(ScError::DuplicateToken)
    }
}

/// Smallest positive integer not present in `assigned`.
///
/// Computed from the live set on every call, so a number vacated by teardown
/// is handed out again before any higher one.
#[must_use]
pub fn allocate_sequence_number<I>(assigned: I) -> u32
where
    I: IntoIterator<Item = u32>,
{
    let mut numbers: Vec<u32> = assigned.into_iter().filter(|n| *n > 0).collect();
    numbers.sort_unstable();
    numbers.dedup();

    let mut candidate = 1u32;
    for n in numbers {
        if n != candidate {
            break;
        }
        candidate = candidate.saturating_add(1);
    }
    candidate
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    #[test]
    fn test_parse_normalizes_case() {
        let token = Token::parse(" abCd ").unwrap();
        assert_eq!(token.as_str(), "ABCD");
        assert_eq!(token, Token::parse("ABCD").unwrap());
    }

    #[test]
    fn test_parse_rejects_malformed_tokens() {
        for raw in ["", "ABC", "ABCDE", "AB1D", "AB D", "ÄBCD", "AB_D"] {
            assert!(
                matches!(Token::parse(raw), Err(ScError::InvalidToken(_))),
                "{raw:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_generated_tokens_are_well_formed() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..500 {
            let token = IdentifierAllocator::generate_with(&mut rng);
            assert_eq!(Token::parse(token.as_str()).unwrap(), token);
        }
    }

    #[test]
    fn test_generate_free_token_skips_taken_tokens() {
        let allocator = IdentifierAllocator::new(1000);
        let mut rejected = HashSet::new();

        let token = allocator
            .generate_free_token(|candidate| {
                // Reject the first three distinct candidates.
                if rejected.len() < 3 && rejected.insert(candidate.clone()) {
                    return false;
                }
                !rejected.contains(candidate)
            })
            .unwrap();

        assert!(!rejected.contains(&token));
    }

    #[test]
    fn test_generate_free_token_gives_up() {
        let allocator = IdentifierAllocator::new(10);
        let mut calls = 0;
        let result = allocator.generate_free_token(|_| {
            calls += 1;
            false
        });

        assert!(matches!(result, Err(ScError::DuplicateToken)));
        assert_eq!(calls, 10);
    }

    #[test]
    fn test_token_serde_round_trip_validates() {
        let token: Token = serde_json::from_str("\"wxyz\"").unwrap();
        assert_eq!(token.as_str(), "WXYZ");
        assert!(serde_json::from_str::<Token>("\"toolong\"").is_err());
    }

    #[test]
    fn test_sequence_number_starts_at_one() {
        assert_eq!(allocate_sequence_number(Vec::new()), 1);
    }

    #[test]
    fn test_sequence_number_fills_lowest_gap() {
        assert_eq!(allocate_sequence_number([1, 2, 3]), 4);
        assert_eq!(allocate_sequence_number([2, 3]), 1);
        assert_eq!(allocate_sequence_number([1, 3, 4]), 2);
        assert_eq!(allocate_sequence_number([5, 1, 1, 2]), 3);
    }

    #[test]
    fn test_released_number_is_reused_before_higher_ones() {
        let mut live: HashSet<u32> = (1..=5).collect();
        live.remove(&2);
        assert_eq!(allocate_sequence_number(live.iter().copied()), 2);
    }
}
