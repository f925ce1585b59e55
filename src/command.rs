//! Shell command lines and their arguments.

use crate::error::{Error, Result};

/// A command name with its positional arguments.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Command {
    pub name: String,
    pub args: Vec<String>,
}

impl Command {
    pub fn new(name: impl Into<String>, args: Vec<String>) -> Self {
        let name = name.into();
        Self { name, args }
    }

    /// Split `line` on whitespace. There is no quoting.
    ///
    /// Returns `None` for a blank line.
    pub fn parse(line: &str) -> Option<Self> {
        let mut words = line.split_whitespace().map(str::to_owned);
        let name = words.next()?;
        let args = words.collect();

        Some(Self { name, args })
    }
}

/// Decode a hex address, with or without a `0x` prefix.
///
/// The digits are decoded to bytes, left-padded with zero bytes to 8, and read
/// big-endian. An odd number of digits is read as if it had a leading `0`.
pub fn parse_hex_addr(input: &str) -> Result<u64> {
    let parse_err = |reason: &str| Error::Parse {
        input: input.to_owned(),
        reason: reason.to_owned(),
    };

    let digits = input.strip_prefix("0x").unwrap_or(input);

    if digits.is_empty() {
        return Err(parse_err("no hex digits"));
    }

    let nibbles = digits
        .chars()
        .map(|c| c.to_digit(16).map(|d| d as u8))
        .collect::<Option<Vec<u8>>>()
        .ok_or_else(|| parse_err("not a hex number"))?;

    let mut padded = Vec::with_capacity(nibbles.len() + 1);
    if nibbles.len() % 2 == 1 {
        padded.push(0);
    }
    padded.extend(nibbles);

    let mut bytes: Vec<u8> = padded.chunks(2).map(|pair| pair[0] << 4 | pair[1]).collect();

    // Leading zero bytes don't change the value.
    let significant = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    bytes.drain(..significant);

    if bytes.len() > 8 {
        return Err(parse_err("address wider than 64 bits"));
    }

    let mut be = [0u8; 8];
    be[8 - bytes.len()..].copy_from_slice(&bytes);

    Ok(u64::from_be_bytes(be))
}
