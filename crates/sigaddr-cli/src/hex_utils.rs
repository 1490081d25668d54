//! Hex address parsing.

use anyhow::{Result, anyhow};

/// Parse a hex address with or without a `0x` prefix.
pub fn parse_hex_address(s: &str) -> Result<u64> {
    let digits = s
        .trim()
        .trim_start_matches("0x")
        .trim_start_matches("0X")
        .replace('_', "");
    if digits.is_empty() {
        return Err(anyhow!("Invalid hex address: {:?}", s));
    }
    u64::from_str_radix(&digits, 16).map_err(|e| anyhow!("Invalid hex address {:?}: {}", s, e))
}
