//! Scoring Engine
//!
//! Compares a guess against a secret. Pure and deterministic.

use serde::{Serialize, Deserialize};

use crate::game::code::Code;
use crate::CODE_LENGTH;

/// Feedback for one guess.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Feedback {
    /// Digits in the right position.
    pub exact: u8,
    /// Digits present in the secret but in another position.
    pub partial: u8,
}

impl Feedback {
    /// Create feedback from raw counts.
    pub const fn new(exact: u8, partial: u8) -> Self {
        Self { exact, partial }
    }

    /// A guess that matches every position.
    #[inline]
    pub fn is_win(&self) -> bool {
        self.exact as usize == CODE_LENGTH
    }
}

/// Score `guess` against `secret`.
///
/// Both codes have distinct digits, so presence is plain set membership:
/// `partial` is the number of guess digits found anywhere in the secret
/// minus the exact hits.
pub fn score(secret: &Code, guess: &Code) -> Feedback {
    let s = secret.digits();
    let g = guess.digits();

    let exact = s.iter().zip(g).filter(|(a, b)| a == b).count() as u8;
    let present = g.iter().filter(|&&d| secret.contains(d)).count() as u8;

    Feedback {
        exact,
        partial: present - exact,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn code(s: &str) -> Code {
        Code::parse(s).unwrap()
    }

    fn arb_code() -> impl Strategy<Value = Code> {
        Just((0u8..10).collect::<Vec<_>>())
            .prop_shuffle()
            .prop_filter("leading zero", |d| d[0] != 0)
            .prop_map(|d| {
                let s: String = d[..4].iter().map(|x| char::from(b'0' + x)).collect();
                Code::parse(&s).unwrap()
            })
    }

    #[test]
    fn test_reversed_digits() {
        assert_eq!(score(&code("1234"), &code("4321")), Feedback::new(0, 4));
    }

    #[test]
    fn test_two_swapped() {
        assert_eq!(score(&code("1234"), &code("1243")), Feedback::new(2, 2));
    }

    #[test]
    fn test_no_overlap() {
        assert_eq!(score(&code("1234"), &code("5678")), Feedback::new(0, 0));
    }

    #[test]
    fn test_mixed() {
        // 1 exact (the 2), 1 partial (the 1)
        assert_eq!(score(&code("1234"), &code("5216")), Feedback::new(1, 1));
    }

    #[test]
    fn test_win() {
        let f = score(&code("9071"), &code("9071"));
        assert!(f.is_win());
        assert!(!Feedback::new(3, 0).is_win());
    }

    #[test]
    fn test_score_is_symmetric_for_distinct_digits() {
        let a = code("1234");
        let b = code("2135");
        assert_eq!(score(&a, &b), Feedback::new(1, 2));
        assert_eq!(score(&b, &a), Feedback::new(1, 2));
    }

    proptest! {
        #[test]
        fn prop_self_score_is_win(s in arb_code()) {
            prop_assert_eq!(score(&s, &s), Feedback::new(4, 0));
        }

        #[test]
        fn prop_counts_bounded(s in arb_code(), g in arb_code()) {
            let f = score(&s, &g);
            prop_assert!(f.exact as usize + f.partial as usize <= CODE_LENGTH);
            prop_assert_eq!(f.is_win(), s == g);
        }
    }
}
