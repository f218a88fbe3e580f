//! Script arguments - filling payload fields from whitespace-separated tokens.
//!
//! Both walkers here reuse the wire field description, so a payload's script
//! argument order is its wire field order. Counted arrays take their count
//! as one token followed by the elements.

use crate::wire::FieldWalker;
use std::convert::Infallible;
use std::str::FromStr;
use thiserror::Error;

/// Errors raised while filling a payload from script arguments.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ArgumentError {
    /// Ran out of tokens
    #[error("missing argument at position {position}")]
    Missing { position: usize },

    /// A token did not parse as the expected field type
    #[error("argument {position} ('{token}') is not a valid {expected}")]
    Malformed {
        position: usize,
        token: String,
        expected: &'static str,
    },

    /// An array count larger than the tokens left to fill it
    #[error("argument {position}: count {count} exceeds the {remaining} remaining arguments")]
    CountTooLarge {
        position: usize,
        count: usize,
        remaining: usize,
    },

    /// Tokens left over after the last field
    #[error("{count} unexpected trailing arguments")]
    Unexpected { count: usize },
}

/// Walker that fills fields from script tokens.
pub struct ScriptArgs<'a> {
    tokens: &'a [&'a str],
    position: usize,
}

impl<'a> ScriptArgs<'a> {
    pub fn new(tokens: &'a [&'a str]) -> Self {
        Self { tokens, position: 0 }
    }

    /// Fails unless every token has been consumed.
    pub fn finish(self) -> Result<(), ArgumentError> {
        match self.tokens.len() - self.position {
            0 => Ok(()),
            count => Err(ArgumentError::Unexpected { count }),
        }
    }

    fn next_token(&mut self) -> Result<&'a str, ArgumentError> {
        let token = self
            .tokens
            .get(self.position)
            .copied()
            .ok_or(ArgumentError::Missing { position: self.position })?;
        self.position += 1;
        Ok(token)
    }

    fn parse<T: FromStr>(&mut self, expected: &'static str) -> Result<T, ArgumentError> {
        let position = self.position;
        let token = self.next_token()?;
        token.parse().map_err(|_| ArgumentError::Malformed {
            position,
            token: token.to_string(),
            expected,
        })
    }
}

impl FieldWalker for ScriptArgs<'_> {
    type Error = ArgumentError;

    fn int32(&mut self, value: &mut i32) -> Result<(), ArgumentError> {
        *value = self.parse("integer")?;
        Ok(())
    }

    fn float64(&mut self, value: &mut f64) -> Result<(), ArgumentError> {
        *value = self.parse("number")?;
        Ok(())
    }

    fn string(&mut self, value: &mut String) -> Result<(), ArgumentError> {
        *value = self.next_token()?.to_string();
        Ok(())
    }

    fn count(&mut self, _len: usize) -> Result<usize, ArgumentError> {
        let position = self.position;
        let count: usize = self.parse("count")?;
        // Each element needs at least one token
        let remaining = self.tokens.len() - self.position;
        if count > remaining {
            return Err(ArgumentError::CountTooLarge {
                position,
                count,
                remaining,
            });
        }
        Ok(count)
    }
}

/// Walker that counts the script tokens a payload takes.
#[derive(Debug, Default)]
pub struct ArityCounter {
    tokens: i32,
    variable: bool,
}

impl ArityCounter {
    /// The token count, or `None` if the payload has counted arrays.
    pub fn fixed(&self) -> Option<i32> {
        if self.variable {
            None
        } else {
            Some(self.tokens)
        }
    }
}

impl FieldWalker for ArityCounter {
    type Error = Infallible;

    fn int32(&mut self, _value: &mut i32) -> Result<(), Infallible> {
        self.tokens += 1;
        Ok(())
    }

    fn float64(&mut self, _value: &mut f64) -> Result<(), Infallible> {
        self.tokens += 1;
        Ok(())
    }

    fn string(&mut self, _value: &mut String) -> Result<(), Infallible> {
        self.tokens += 1;
        Ok(())
    }

    fn count(&mut self, len: usize) -> Result<usize, Infallible> {
        self.tokens += 1;
        self.variable = true;
        Ok(len)
    }
}
