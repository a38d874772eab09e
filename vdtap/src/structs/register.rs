//! Video chip register addresses as seen from the capture device's bus.

use std::fmt::Display;
use std::str::FromStr;

use crate::utils::errors::RegisterParseError;

/// Bit 3 of the address: the access also triggers command execution.
const EXECUTE_FLAG: u8 = 0x08;

/// A 4-bit register address: `R0`..`R7`, or `ER0`..`ER7` with the execute
/// flag set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Register(u8);

impl Register {
    pub fn new(index: u8, execute: bool) -> Result<Self, RegisterParseError> {
        if index > 7 {
            return Err(RegisterParseError::OutOfRange(index));
        }
        Ok(Self(if execute { index | EXECUTE_FLAG } else { index }))
    }

    /// Raw 4-bit address as sent in the control request value.
    pub fn raw(&self) -> u8 {
        self.0
    }

    pub fn index(&self) -> u8 {
        self.0 & 0x07
    }

    pub fn is_execute(&self) -> bool {
        self.0 & EXECUTE_FLAG != 0
    }
}

impl TryFrom<u8> for Register {
    type Error = RegisterParseError;

    fn try_from(raw: u8) -> Result<Self, Self::Error> {
        if raw > 0x0F {
            return Err(RegisterParseError::OutOfRange(raw));
        }
        Ok(Self(raw))
    }
}

impl FromStr for Register {
    type Err = RegisterParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || RegisterParseError::InvalidName(s.to_string());

        let upper = s.trim().to_ascii_uppercase();
        let (execute, rest) = match upper.strip_prefix('E') {
            Some(rest) => (true, rest),
            None => (false, upper.as_str()),
        };
        let digits = rest.strip_prefix('R').ok_or_else(invalid)?;

        let mut chars = digits.chars();
        let (Some(c), None) = (chars.next(), chars.next()) else {
            return Err(invalid());
        };
        let index = c.to_digit(10).ok_or_else(invalid)? as u8;

        Self::new(index, execute)
    }
}

impl Display for Register {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_execute() {
            write!(f, "ER{}", self.index())
        } else {
            write!(f, "R{}", self.index())
        }
    }
}
