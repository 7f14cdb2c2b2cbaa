// =============================================================================
// Instrument-name grammar — `<CCY>-<DDMMMYY>-<STRIKE>-<C|P>`
// =============================================================================
//
// Example: `BTC-24MAY25-60000-P`. Day is 1-2 digits, month is a three-letter
// uppercase abbreviation, year is two digits (2000-based). Options expire at
// 08:00 UTC on the expiry date.
// =============================================================================

use anyhow::{bail, Context, Result};
use chrono::{TimeZone, Utc};

/// Call/put discriminator, the final letter of the instrument name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionKind {
    Call,
    Put,
}

/// Fields derived from a well-formed option instrument name.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedInstrument {
    /// Strike in quote-currency units.
    pub strike: f64,
    /// Expiry instant, seconds since the epoch (08:00 UTC on expiry day).
    pub expiry_ts: f64,
    pub kind: OptionKind,
}

/// Parse an option instrument name into strike, expiry and kind.
pub fn parse_instrument(name: &str) -> Result<ParsedInstrument> {
    let parts: Vec<&str> = name.split('-').collect();
    if parts.len() != 4 {
        bail!("malformed instrument name: {name}");
    }

    let expiry_ts = parse_expiry_ts(parts[1])
        .with_context(|| format!("unparsable expiry in instrument name: {name}"))?;

    let strike: f64 = parts[2]
        .parse()
        .with_context(|| format!("unparsable strike in instrument name: {name}"))?;

    let kind = match parts[3] {
        "C" => OptionKind::Call,
        "P" => OptionKind::Put,
        other => bail!("unknown option kind '{other}' in instrument name: {name}"),
    };

    Ok(ParsedInstrument {
        strike,
        expiry_ts,
        kind,
    })
}

/// Parse a `DDMMMYY` date field into the 08:00 UTC expiry timestamp.
fn parse_expiry_ts(field: &str) -> Result<f64> {
    let digits = field.chars().take_while(|c| c.is_ascii_digit()).count();
    if !(1..=2).contains(&digits) || field.len() != digits + 5 {
        bail!("unparsable date field: {field}");
    }

    let day: u32 = field[..digits].parse()?;
    let month = month_number(&field[digits..digits + 3])
        .with_context(|| format!("unknown month in date field: {field}"))?;
    let year: i32 = 2000 + field[digits + 3..].parse::<i32>()?;

    let expiry = Utc
        .with_ymd_and_hms(year, month, day, 8, 0, 0)
        .single()
        .with_context(|| format!("invalid calendar date: {field}"))?;

    Ok(expiry.timestamp() as f64)
}

fn month_number(abbrev: &str) -> Option<u32> {
    let month = match abbrev {
        "JAN" => 1,
        "FEB" => 2,
        "MAR" => 3,
        "APR" => 4,
        "MAY" => 5,
        "JUN" => 6,
        "JUL" => 7,
        "AUG" => 8,
        "SEP" => 9,
        "OCT" => 10,
        "NOV" => 11,
        "DEC" => 12,
        _ => return None,
    };
    Some(month)
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_put_with_two_digit_day() {
        let parsed = parse_instrument("BTC-24MAY25-60000-P").unwrap();
        assert_eq!(parsed.strike, 60000.0);
        assert_eq!(parsed.kind, OptionKind::Put);
        let expected = Utc.with_ymd_and_hms(2025, 5, 24, 8, 0, 0).unwrap();
        assert_eq!(parsed.expiry_ts, expected.timestamp() as f64);
    }

    #[test]
    fn parses_call_with_one_digit_day() {
        let parsed = parse_instrument("ETH-4JUL25-3200-C").unwrap();
        assert_eq!(parsed.strike, 3200.0);
        assert_eq!(parsed.kind, OptionKind::Call);
        let expected = Utc.with_ymd_and_hms(2025, 7, 4, 8, 0, 0).unwrap();
        assert_eq!(parsed.expiry_ts, expected.timestamp() as f64);
    }

    #[test]
    fn rejects_unknown_month() {
        assert!(parse_instrument("BTC-24XXX25-60000-P").is_err());
    }

    #[test]
    fn rejects_invalid_calendar_date() {
        assert!(parse_instrument("BTC-31FEB25-60000-C").is_err());
    }

    #[test]
    fn rejects_bad_strike() {
        assert!(parse_instrument("BTC-24MAY25-sixty-P").is_err());
    }

    #[test]
    fn rejects_wrong_field_count() {
        assert!(parse_instrument("BTC-24MAY25-60000").is_err());
        assert!(parse_instrument("BTC-PERPETUAL").is_err());
    }

    #[test]
    fn rejects_unknown_kind_letter() {
        assert!(parse_instrument("BTC-24MAY25-60000-X").is_err());
    }
}
