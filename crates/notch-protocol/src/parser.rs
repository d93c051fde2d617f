//! Reply line decoding
//!
//! Record replies have the shape `TAG key=value key="quoted value" ...`.
//! Any reply starting with `ERR` is a negative acknowledgement.

use std::collections::BTreeMap;
use std::str::FromStr;

use crate::error::DecodeError;
use crate::response::{ConsoleInfo, Failure, MemoryInfo, Settings, Stats};

/// Expected reply to the handshake
pub const HANDSHAKE_ACK: &str = "NOTCH_READY";

const ACK: &str = "OK";
const NACK: &str = "ERR";

/// `Some(reason)` if the line is a negative acknowledgement
pub fn rejection(line: &str) -> Option<String> {
    let mut tokens = Tokenizer::new(line);
    match tokens.next() {
        Some(head) if head.eq_ignore_ascii_case(NACK) => Some(
            tokens
                .rest()
                .map(str::to_string)
                .unwrap_or_else(|| "no reason given".to_string()),
        ),
        _ => None,
    }
}

pub fn decode_handshake(line: &str) -> Result<(), Failure> {
    if let Some(reason) = rejection(line) {
        return Err(Failure::Rejected(reason));
    }
    if line.trim().eq_ignore_ascii_case(HANDSHAKE_ACK) {
        Ok(())
    } else {
        Err(Failure::HandshakeMismatch(line.to_string()))
    }
}

/// `OK [message]`
pub fn decode_ack(line: &str) -> Result<(), Failure> {
    if let Some(reason) = rejection(line) {
        return Err(Failure::Rejected(reason));
    }
    match Tokenizer::new(line).next() {
        Some(head) if head.eq_ignore_ascii_case(ACK) => Ok(()),
        _ => Err(DecodeError::new(ACK, format!("unexpected reply {:?}", line)).into()),
    }
}

/// Any line counts as a pong unless it is a negative acknowledgement
pub fn decode_ping(line: &str) -> Result<(), Failure> {
    match rejection(line) {
        Some(reason) => Err(Failure::Rejected(reason)),
        None => Ok(()),
    }
}

pub fn decode_info(line: &str) -> Result<ConsoleInfo, Failure> {
    let mut fields = record(line, "INFO")?;
    let model = take(&mut fields, "INFO", "model")?;
    let firmware = take(&mut fields, "INFO", "firmware")?;
    Ok(ConsoleInfo {
        model,
        firmware,
        extra: fields,
    })
}

pub fn decode_settings(line: &str) -> Result<Settings, Failure> {
    Ok(Settings(record(line, "SETTINGS")?))
}

pub fn decode_memory(line: &str) -> Result<MemoryInfo, Failure> {
    let mut fields = record(line, "MEMORY")?;
    Ok(MemoryInfo {
        sram: number(&mut fields, "MEMORY", "sram")?,
        flash: number(&mut fields, "MEMORY", "flash")?,
        eeprom: number(&mut fields, "MEMORY", "eeprom")?,
    })
}

pub fn decode_stats(line: &str) -> Result<Stats, Failure> {
    let fields = record(line, "STATS")?;
    let mut stats = BTreeMap::new();
    for (key, value) in fields {
        let parsed: u64 = value.parse().map_err(|_| {
            DecodeError::new("STATS", format!("{} is not a number: {:?}", key, value))
        })?;
        stats.insert(key, parsed);
    }
    Ok(Stats(stats))
}

/// Split a `TAG k=v ...` reply into lowercase keys and raw values
fn record(line: &str, tag: &'static str) -> Result<BTreeMap<String, String>, Failure> {
    if let Some(reason) = rejection(line) {
        return Err(Failure::Rejected(reason));
    }

    let mut tokens = Tokenizer::new(line);
    let head = tokens
        .next()
        .ok_or_else(|| DecodeError::new(tag, "empty reply"))?;
    if !head.eq_ignore_ascii_case(tag) {
        return Err(DecodeError::new(tag, format!("unexpected reply {:?}", line)).into());
    }

    let mut fields = BTreeMap::new();
    while let Some(pair) = tokens.next_pair() {
        let (key, value) = pair.map_err(|reason| DecodeError::new(tag, reason))?;
        fields.insert(key.to_ascii_lowercase(), value.to_string());
    }
    Ok(fields)
}

fn take(
    fields: &mut BTreeMap<String, String>,
    tag: &'static str,
    key: &str,
) -> Result<String, DecodeError> {
    fields
        .remove(key)
        .ok_or_else(|| DecodeError::new(tag, format!("missing field {}", key)))
}

fn number<T: FromStr>(
    fields: &mut BTreeMap<String, String>,
    tag: &'static str,
    key: &str,
) -> Result<T, DecodeError> {
    let raw = take(fields, tag, key)?;
    raw.parse()
        .map_err(|_| DecodeError::new(tag, format!("{} is not a number: {:?}", key, raw)))
}

/// Whitespace tokenizer that understands `key="quoted value"` pairs
struct Tokenizer<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Tokenizer<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn skip_whitespace(&mut self) {
        let remaining = &self.input[self.pos..];
        self.pos += remaining.len() - remaining.trim_start().len();
    }

    fn next(&mut self) -> Option<&'a str> {
        self.skip_whitespace();
        if self.pos >= self.input.len() {
            return None;
        }

        let remaining = &self.input[self.pos..];
        let end = remaining.find(char::is_whitespace).unwrap_or(remaining.len());
        self.pos += end;
        Some(&remaining[..end])
    }

    fn next_pair(&mut self) -> Option<Result<(&'a str, &'a str), String>> {
        self.skip_whitespace();
        if self.pos >= self.input.len() {
            return None;
        }

        let remaining = &self.input[self.pos..];
        let word_end = remaining.find(char::is_whitespace).unwrap_or(remaining.len());

        let eq = match remaining[..word_end].find('=') {
            Some(0) => {
                self.pos += word_end;
                return Some(Err(format!("empty key in {:?}", &remaining[..word_end])));
            }
            Some(eq) => eq,
            None => {
                self.pos += word_end;
                return Some(Err(format!("expected key=value, got {:?}", &remaining[..word_end])));
            }
        };

        let key = &remaining[..eq];
        let after = &remaining[eq + 1..];

        if let Some(quoted) = after.strip_prefix('"') {
            return match quoted.find('"') {
                Some(end) => {
                    self.pos += eq + 1 + end + 2;
                    Some(Ok((key, &quoted[..end])))
                }
                None => {
                    self.pos = self.input.len();
                    Some(Err(format!("unterminated quote for {}", key)))
                }
            };
        }

        let end = after.find(char::is_whitespace).unwrap_or(after.len());
        self.pos += eq + 1 + end;
        Some(Ok((key, &after[..end])))
    }

    fn rest(&mut self) -> Option<&'a str> {
        self.skip_whitespace();
        if self.pos >= self.input.len() {
            return None;
        }

        let remaining = &self.input[self.pos..];
        self.pos = self.input.len();
        Some(remaining.trim_end())
    }
}
