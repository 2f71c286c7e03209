//! # Summary
//!
//! Colon-delimited text framing shared by the Paxos and lease messages.
//!
//! A message is a one-character tag followed by `:`-prefixed fields. Numbers
//! are written in decimal, opaque values as `<len>:<bytes>` so they may
//! contain any byte, colons included:
//!
//! ```text
//! 5:12:3:4294967297:5:hello
//! ```

use crate::error::{Error, Result};
use crate::identity::ProposalId;

const SEPARATOR: u8 = b':';

/// Accumulates the fields of one message.
#[derive(Debug)]
pub struct Writer {
    buffer: Vec<u8>,
}

impl Writer {
    pub fn new(tag: u8) -> Self {
        Writer { buffer: vec![tag] }
    }

    /// Starts a message inside an envelope whose prefix is already written.
    pub fn append_to(mut buffer: Vec<u8>, tag: u8) -> Self {
        buffer.push(tag);
        Writer { buffer }
    }

    pub fn number(mut self, number: u64) -> Self {
        self.buffer.push(SEPARATOR);
        self.buffer.extend_from_slice(number.to_string().as_bytes());
        self
    }

    pub fn value(self, value: &[u8]) -> Self {
        let mut writer = self.number(value.len() as u64);
        writer.buffer.push(SEPARATOR);
        writer.buffer.extend_from_slice(value);
        writer
    }

    pub fn finish(self) -> Vec<u8> {
        self.buffer
    }
}

/// Consumes the fields of one message, failing on anything unexpected.
#[derive(Debug)]
pub struct Reader<'a> {
    input: &'a [u8],
    position: usize,
}

impl<'a> Reader<'a> {
    pub fn new(input: &'a [u8]) -> Self {
        Reader { input, position: 0 }
    }

    pub fn tag(&mut self) -> Result<u8> {
        let tag = *self.input.get(self.position)
            .ok_or_else(|| Error::decode("missing message tag"))?;
        self.position += 1;
        Ok(tag)
    }

    fn separator(&mut self) -> Result<()> {
        match self.input.get(self.position) {
        | Some(&SEPARATOR) => {
            self.position += 1;
            Ok(())
        }
        | Some(byte) => Err(Error::decode(format!("expected ':' at {}, found {:?}", self.position, *byte as char))),
        | None => Err(Error::decode("unexpected end of message")),
        }
    }

    pub fn number(&mut self) -> Result<u64> {
        self.separator()?;
        let start = self.position;
        let end = self.input[start..]
            .iter()
            .position(|byte| *byte == SEPARATOR)
            .map(|offset| start + offset)
            .unwrap_or_else(|| self.input.len());
        let digits = &self.input[start..end];
        if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
            return Err(Error::decode(format!("malformed number at {}", start)))
        }
        let number = std::str::from_utf8(digits)
            .ok()
            .and_then(|digits| digits.parse::<u64>().ok())
            .ok_or_else(|| Error::decode(format!("number out of range at {}", start)))?;
        self.position = end;
        Ok(number)
    }

    pub fn proposal_id(&mut self) -> Result<ProposalId> {
        let raw = self.number()?;
        ProposalId::checked(raw).ok_or_else(|| Error::decode(format!("proposal ID {} is out of range", raw)))
    }

    pub fn value(&mut self) -> Result<Vec<u8>> {
        let length = self.number()? as usize;
        self.separator()?;
        let start = self.position;
        let end = start.checked_add(length)
            .filter(|end| *end <= self.input.len())
            .ok_or_else(|| Error::decode(format!("value of length {} overruns message", length)))?;
        self.position = end;
        Ok(self.input[start..end].to_vec())
    }

    /// Asserts that every byte was consumed.
    pub fn finish(self) -> Result<()> {
        if self.position == self.input.len() {
            Ok(())
        } else {
            Err(Error::decode(format!("{} trailing bytes", self.input.len() - self.position)))
        }
    }
}
