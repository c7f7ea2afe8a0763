//! Command-line parsing.

use anyhow::{anyhow, bail, Context};

pub const USAGE: &str = "usage: pico-linux [--version] <serve | get <id> | set <id> <hex-bytes>>";

#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    Version,
    Serve,
    Get { id: u8 },
    Set { id: u8, value: Vec<u8> },
}

pub fn parse(args: impl IntoIterator<Item = String>) -> anyhow::Result<Command> {
    let args: Vec<String> = args.into_iter().collect();
    if args.iter().any(|a| a == "--version" || a == "-V") {
        return Ok(Command::Version);
    }
    let words: Vec<&str> = args.iter().map(String::as_str).collect();
    match words.as_slice() {
        [] | ["serve"] => Ok(Command::Serve),
        ["get", id] => Ok(Command::Get { id: parse_id(id)? }),
        ["set", id, value] => Ok(Command::Set {
            id: parse_id(id)?,
            value: parse_hex(value)?,
        }),
        _ => bail!("{}", USAGE),
    }
}

/// Decimal or 0x-prefixed hex id in 0..=63.
pub fn parse_id(s: &str) -> anyhow::Result<u8> {
    let id = match s.strip_prefix("0x") {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => s.parse::<u8>(),
    }
    .with_context(|| format!("invalid id {:?}", s))?;
    if id > pico_core::MAX_ID {
        bail!("id {} out of range (max {})", id, pico_core::MAX_ID);
    }
    Ok(id)
}

/// Non-empty hex string, two digits per byte, at most one frame payload long.
pub fn parse_hex(s: &str) -> anyhow::Result<Vec<u8>> {
    if s.is_empty() || s.len() % 2 != 0 {
        bail!("expected an even number of hex digits, got {:?}", s);
    }
    let bytes = (0..s.len())
        .step_by(2)
        .map(|i| {
            s.get(i..i + 2)
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or_else(|| anyhow!("invalid hex byte at offset {} in {:?}", i, s))
        })
        .collect::<anyhow::Result<Vec<u8>>>()?;
    if bytes.len() > pico_core::MAX_PAYLOAD {
        bail!(
            "value of {} bytes exceeds {}",
            bytes.len(),
            pico_core::MAX_PAYLOAD
        );
    }
    Ok(bytes)
}

pub fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
