use alloy_primitives::{Address, B256, U256};
use rust_decimal::prelude::*;

/// Convert a raw token amount to a display value using Decimal where it
/// fits, falling back to lossy f64 math for amounts beyond u128.
pub fn format_units(raw: U256, decimals: u8) -> f64 {
    if decimals <= 28 {
        if let Ok(v) = u128::try_from(raw) {
            // Decimal::new(1, d) is 10^-d, so this scales without a divide.
            let dec = Decimal::from_u128(v)
                .map(|d| d * Decimal::new(1, decimals as u32))
                .and_then(|d| d.to_f64());
            if let Some(f) = dec {
                return f;
            }
        }
    }
    // Amounts past 2^128 smallest units only occur for exotic tokens;
    // precision loss here is acceptable for display.
    let s = raw.to_string();
    s.parse::<f64>().unwrap_or(0.0) / 10f64.powi(decimals as i32)
}

/// Convert wei to ether for display.
pub fn wei_to_eth(wei: U256) -> f64 {
    format_units(wei, 18)
}

/// Trim a display amount to a sensible precision: whole-ish numbers get two
/// decimals, dust gets more.
pub fn format_amount(amount: f64) -> String {
    if amount >= 1.0 {
        format!("{amount:.2}")
    } else if amount >= 0.01 {
        format!("{amount:.4}")
    } else {
        format!("{amount:.8}")
    }
}

/// Abbreviate an address for log lines and messages: `0x1234…abcd`.
pub fn short_address(addr: &Address) -> String {
    let s = addr.to_checksum(None);
    format!("{}…{}", &s[..6], &s[s.len() - 4..])
}

/// Abbreviate a transaction hash.
pub fn short_hash(hash: &B256) -> String {
    let s = format!("{hash}");
    format!("{}…{}", &s[..10], &s[s.len() - 6..])
}
