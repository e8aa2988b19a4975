//! Secret and Guess Codes
//!
//! A code is four pairwise-distinct decimal digits with a non-zero first
//! digit. Secrets and guesses share the same rule, so both are `Code`.

use std::fmt;
use std::str::FromStr;
use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::CODE_LENGTH;

/// Why a candidate string is not a valid code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CodeError {
    /// Not exactly four characters.
    #[error("code must be exactly 4 digits, got {0} characters")]
    WrongLength(usize),
    /// Contains something other than 0-9.
    #[error("code may only contain digits 0-9")]
    NonDigit,
    /// The same digit appears twice.
    #[error("all digits must be different")]
    RepeatedDigit,
    /// First digit is 0.
    #[error("code cannot start with 0")]
    LeadingZero,
}

/// A validated four-digit code.
///
/// Stored as digit values (0-9), not ASCII.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Code([u8; CODE_LENGTH]);

impl Code {
    /// Parse and validate a code.
    ///
    /// Checks run in the order length, digits, uniqueness, leading zero,
    /// so `"0023"` reports the repeated digit first.
    pub fn parse(s: &str) -> Result<Self, CodeError> {
        let len = s.chars().count();
        if len != CODE_LENGTH {
            return Err(CodeError::WrongLength(len));
        }

        let mut digits = [0u8; CODE_LENGTH];
        for (slot, c) in digits.iter_mut().zip(s.chars()) {
            *slot = c.to_digit(10).ok_or(CodeError::NonDigit)? as u8;
        }

        let mut seen = [false; 10];
        for &d in &digits {
            if seen[d as usize] {
                return Err(CodeError::RepeatedDigit);
            }
            seen[d as usize] = true;
        }

        if digits[0] == 0 {
            return Err(CodeError::LeadingZero);
        }

        Ok(Self(digits))
    }

    /// Digit values in position order.
    #[inline]
    pub fn digits(&self) -> &[u8; CODE_LENGTH] {
        &self.0
    }

    /// Whether `digit` appears anywhere in the code.
    #[inline]
    pub fn contains(&self, digit: u8) -> bool {
        self.0.contains(&digit)
    }
}

impl FromStr for Code {
    type Err = CodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Code {
    type Error = CodeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<Code> for String {
    fn from(code: Code) -> Self {
        code.to_string()
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for d in self.0 {
            write!(f, "{}", d)?;
        }
        Ok(())
    }
}

// Debug stays readable in test output; secrets are kept out of logs by
// the callers, not by this impl.
impl fmt::Debug for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Code({})", self)
    }
}
