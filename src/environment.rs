//! Session-wide encoding services shared by every variable.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str;
use strum_macros::EnumString;
use thiserror::Error;

/// Client-side character sets a session can be opened with.
#[derive(Clone, Copy, Debug, Deserialize, EnumString, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "snake_case")]
pub enum Charset {
    Al32Utf8,
    Utf8,
    Us7Ascii,
}

impl Charset {
    /// Returns the character-set identifier passed to the native call
    /// interface.
    #[must_use]
    pub fn id(self) -> u16 {
        match self {
            Charset::Al32Utf8 => 873,
            Charset::Utf8 => 871,
            Charset::Us7Ascii => 1,
        }
    }

    /// Returns the worst-case encoded size of a single character in bytes.
    #[must_use]
    pub fn max_bytes_per_character(self) -> usize {
        match self {
            Charset::Al32Utf8 => 4,
            Charset::Utf8 => 3,
            Charset::Us7Ascii => 1,
        }
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Charset::Al32Utf8 => "AL32UTF8",
            Charset::Utf8 => "UTF8",
            Charset::Us7Ascii => "US7ASCII",
        }
    }
}

impl fmt::Display for Charset {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-session encoding context, shared read-only by all variables bound or
/// defined in that session.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Environment {
    charset: Charset,
}

impl Environment {
    #[must_use]
    pub fn new(charset: Charset) -> Self {
        Self { charset }
    }

    #[must_use]
    pub fn charset(&self) -> Charset {
        self.charset
    }

    /// Returns the worst-case number of bytes one character occupies in the
    /// session character set. Always at least 1.
    #[must_use]
    pub fn max_bytes_per_character(&self) -> usize {
        self.charset.max_bytes_per_character()
    }

    /// Decodes bytes received from the native call interface into text.
    ///
    /// # Errors
    ///
    /// Returns a `DecodeError` if `bytes` is not a valid sequence in the
    /// session character set.
    pub fn from_encoded_string(&self, bytes: &[u8]) -> Result<String, DecodeError> {
        match self.charset {
            Charset::Us7Ascii => match bytes.iter().position(|b| !b.is_ascii()) {
                Some(offset) => Err(DecodeError {
                    charset: self.charset,
                    offset,
                }),
                None => Ok(str::from_utf8(bytes).expect("validated 7-bit input").to_string()),
            },
            Charset::Al32Utf8 | Charset::Utf8 => str::from_utf8(bytes)
                .map(str::to_string)
                .map_err(|e| DecodeError {
                    charset: self.charset,
                    offset: e.valid_up_to(),
                }),
        }
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new(Charset::Al32Utf8)
    }
}

#[derive(Clone, Debug, Eq, Error, PartialEq)]
#[error("invalid {charset} byte sequence at offset {offset}")]
pub struct DecodeError {
    pub charset: Charset,
    pub offset: usize,
}

#[cfg(test)]
mod tests {
    use super::{Charset, Environment};
    use std::str::FromStr;

    #[test]
    fn charset_table() {
        assert_eq!(873, Charset::Al32Utf8.id());
        assert_eq!(871, Charset::Utf8.id());
        assert_eq!(1, Charset::Us7Ascii.id());
        assert_eq!(4, Charset::Al32Utf8.max_bytes_per_character());
        assert_eq!(3, Charset::Utf8.max_bytes_per_character());
        assert_eq!(1, Charset::Us7Ascii.max_bytes_per_character());
    }

    #[test]
    fn charset_from_str() {
        assert_eq!(Ok(Charset::Al32Utf8), Charset::from_str("al32_utf8"));
        assert_eq!(Ok(Charset::Us7Ascii), Charset::from_str("us7_ascii"));
        assert!(Charset::from_str("latin1").is_err());
    }

    #[test]
    fn decode_utf8() {
        let env = Environment::new(Charset::Al32Utf8);
        assert_eq!("héllo", env.from_encoded_string("héllo".as_bytes()).unwrap());

        let err = env.from_encoded_string(b"ab\xffcd").unwrap_err();
        assert_eq!(2, err.offset);
        assert_eq!(Charset::Al32Utf8, err.charset);
    }

    #[test]
    fn decode_ascii() {
        let env = Environment::new(Charset::Us7Ascii);
        assert_eq!("hello", env.from_encoded_string(b"hello").unwrap());

        let err = env.from_encoded_string("héllo".as_bytes()).unwrap_err();
        assert_eq!(1, err.offset);
        assert_eq!(
            "invalid US7ASCII byte sequence at offset 1",
            err.to_string()
        );
    }

    #[test]
    fn decode_empty() {
        let env = Environment::default();
        assert_eq!("", env.from_encoded_string(b"").unwrap());
    }
}
