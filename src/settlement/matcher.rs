//! Match rules: does a wagered number win against a published result?
//!
//! Matching is exhaustive over the closed `BetType` enum, so a bet type
//! without a rule cannot exist at settlement time. Absent result fields
//! never match (the draw category simply has not been published).

use crate::models::{BetType, DrawResult};

impl BetType {
    /// Pure win predicate for one wagered number against a draw result.
    pub fn matches(&self, number: &str, result: &DrawResult) -> bool {
        match self {
            BetType::ThreeTop => result.three_top.as_deref() == Some(number),
            BetType::ThreeTod => result
                .three_top
                .as_deref()
                .map(|drawn| is_digit_permutation(number, drawn))
                .unwrap_or(false),
            BetType::TwoTop => result.two_top.as_deref() == Some(number),
            BetType::TwoBottom => result.two_bottom.as_deref() == Some(number),
            BetType::RunTop => result.run_top.iter().any(|d| d == number),
            BetType::RunBottom => result.run_bottom.iter().any(|d| d == number),
        }
    }
}

/// Multiset equality of digits, computed by comparing sorted characters.
/// Both sides must be exactly three digits; mismatched lengths never match.
fn is_digit_permutation(wagered: &str, drawn: &str) -> bool {
    if wagered.len() != 3 || drawn.len() != 3 {
        return false;
    }
    sorted_chars(wagered) == sorted_chars(drawn)
}

fn sorted_chars(s: &str) -> [char; 3] {
    let mut chars = ['\0'; 3];
    for (i, c) in s.chars().take(3).enumerate() {
        chars[i] = c;
    }
    chars.sort_unstable();
    chars
}
