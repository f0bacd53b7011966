//! Symbol Formatting
//!
//! Builds tastytrade-format option and futures symbols for subscriptions.
//!
//! - Options: `ROOT  YYMMDDCSSSSSSSS` (root padded to 6, strike x 1000 as 8 digits)
//! - Futures: `/ROOTMY` (month code, last digit of year)
//! - Futures options: `./ROOTMY CODE YYMMDDCSTRIKE` (strike as written, no padding)

use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

/// Month codes for futures contracts, January first.
const FUTURES_MONTH_CODES: [char; 12] = ['F', 'G', 'H', 'J', 'K', 'M', 'N', 'Q', 'U', 'V', 'X', 'Z'];

/// Largest strike (in thousandths) that fits the 8-digit field.
const MAX_STRIKE_MILLIS: u64 = 99_999_999;

/// Width of the padded option root.
const OPTION_ROOT_WIDTH: usize = 6;

/// Symbol formatting errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SymbologyError {
    /// Underlying root is empty or longer than six characters.
    #[error("invalid option root '{0}': must be 1-6 characters")]
    InvalidRoot(String),

    /// Strike is negative or does not fit the 8-digit field.
    #[error("strike {0} out of range")]
    StrikeOutOfRange(Decimal),

    /// Month outside 1-12.
    #[error("invalid contract month {0}")]
    InvalidMonth(u32),

    /// Unrecognized option kind.
    #[error("unknown option kind '{0}'")]
    UnknownOptionKind(String),

    /// Not a futures symbol of the form `/ROOTMY`.
    #[error("invalid futures symbol '{0}'")]
    InvalidFutureSymbol(String),

    /// Option product code is empty or contains whitespace.
    #[error("invalid option product code '{0}'")]
    InvalidProductCode(String),
}

/// Option right.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OptionKind {
    /// Call option.
    Call,
    /// Put option.
    Put,
}

impl OptionKind {
    /// Single-letter code used in option symbols.
    #[must_use]
    pub const fn code(self) -> char {
        match self {
            Self::Call => 'C',
            Self::Put => 'P',
        }
    }
}

impl FromStr for OptionKind {
    type Err = SymbologyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "c" | "call" => Ok(Self::Call),
            "p" | "put" => Ok(Self::Put),
            _ => Err(SymbologyError::UnknownOptionKind(s.to_string())),
        }
    }
}

/// Format a tastytrade option symbol.
///
/// # Example
///
/// ```rust
/// use chrono::NaiveDate;
/// use rust_decimal::Decimal;
/// use tasty_stream::domain::symbology::{OptionKind, option_symbol};
///
/// let expiration = NaiveDate::from_ymd_opt(2022, 1, 21).unwrap();
/// let symbol = option_symbol("AAPL", expiration, OptionKind::Call, Decimal::new(130, 0)).unwrap();
/// assert_eq!(symbol, "AAPL  220121C00130000");
/// ```
///
/// # Errors
///
/// Returns an error if the root is empty or too long, or the strike is
/// negative or too large for the 8-digit strike field.
pub fn option_symbol(
    root: &str,
    expiration: NaiveDate,
    kind: OptionKind,
    strike: Decimal,
) -> Result<String, SymbologyError> {
    if root.is_empty() || root.len() > OPTION_ROOT_WIDTH {
        return Err(SymbologyError::InvalidRoot(root.to_string()));
    }

    // Thousandths, truncated toward zero
    let millis = (strike * Decimal::from(1000))
        .trunc()
        .to_u64()
        .filter(|m| *m <= MAX_STRIKE_MILLIS)
        .ok_or(SymbologyError::StrikeOutOfRange(strike))?;

    Ok(format!(
        "{root:<width$}{date}{kind}{millis:08}",
        width = OPTION_ROOT_WIDTH,
        date = expiration.format("%y%m%d"),
        kind = kind.code(),
    ))
}

/// Format a tastytrade futures symbol (e.g. `/CLZ2`).
///
/// # Errors
///
/// Returns an error if `month` is not in 1-12.
pub fn future_symbol(product_code: &str, year: i32, month: u32) -> Result<String, SymbologyError> {
    let code = month
        .checked_sub(1)
        .and_then(|i| FUTURES_MONTH_CODES.get(i as usize))
        .ok_or(SymbologyError::InvalidMonth(month))?;

    Ok(format!("/{product_code}{code}{}", year.rem_euclid(10)))
}

/// Format a tastytrade futures option symbol.
///
/// `future` is the underlying contract as built by [`future_symbol`].
///
/// # Example
///
/// ```rust
/// use chrono::NaiveDate;
/// use rust_decimal::Decimal;
/// use tasty_stream::domain::symbology::{OptionKind, future_option_symbol, future_symbol};
///
/// let future = future_symbol("CL", 2022, 12).unwrap();
/// let expiration = NaiveDate::from_ymd_opt(2022, 11, 4).unwrap();
/// let symbol =
///     future_option_symbol(&future, "LO1X2", expiration, OptionKind::Call, Decimal::new(91, 0))
///         .unwrap();
/// assert_eq!(symbol, "./CLZ2 LO1X2 221104C91");
/// ```
///
/// # Errors
///
/// Returns an error if `future` does not start with `/`, the product code is
/// empty or contains whitespace, or the strike is negative.
pub fn future_option_symbol(
    future: &str,
    option_product_code: &str,
    expiration: NaiveDate,
    kind: OptionKind,
    strike: Decimal,
) -> Result<String, SymbologyError> {
    if future.len() < 2 || !future.starts_with('/') || future.contains(char::is_whitespace) {
        return Err(SymbologyError::InvalidFutureSymbol(future.to_string()));
    }
    if option_product_code.is_empty() || option_product_code.contains(char::is_whitespace) {
        return Err(SymbologyError::InvalidProductCode(
            option_product_code.to_string(),
        ));
    }
    if strike.is_sign_negative() && !strike.is_zero() {
        return Err(SymbologyError::StrikeOutOfRange(strike));
    }

    Ok(format!(
        ".{future} {option_product_code} {date}{kind}{strike}",
        date = expiration.format("%y%m%d"),
        kind = kind.code(),
        strike = strike.normalize(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn option_symbol_pads_root() {
        let symbol = option_symbol("AAPL", date(2022, 1, 21), OptionKind::Call, Decimal::new(130, 0))
            .unwrap();
        assert_eq!(symbol, "AAPL  220121C00130000");
        assert_eq!(symbol.len(), 21);
    }

    #[test]
    fn option_symbol_fractional_strike() {
        let symbol =
            option_symbol("SPY", date(2024, 3, 15), OptionKind::Put, Decimal::new(4505, 1)).unwrap();
        assert_eq!(symbol, "SPY   240315P00450500");
    }

    #[test]
    fn option_symbol_truncates_sub_millis() {
        // 172.5005 -> 172500 thousandths
        let symbol = option_symbol("AAPL", date(2024, 3, 15), OptionKind::Call, Decimal::new(1_725_005, 4))
            .unwrap();
        assert!(symbol.ends_with("C00172500"));
    }

    #[test]
    fn option_symbol_six_char_root() {
        let symbol =
            option_symbol("GOOGL1", date(2025, 6, 20), OptionKind::Call, Decimal::new(100, 0)).unwrap();
        assert_eq!(symbol, "GOOGL1250620C00100000");
    }

    #[test_case("" ; "empty root")]
    #[test_case("TOOLONG" ; "seven chars")]
    fn option_symbol_rejects_root(root: &str) {
        let err = option_symbol(root, date(2024, 1, 19), OptionKind::Call, Decimal::ONE).unwrap_err();
        assert!(matches!(err, SymbologyError::InvalidRoot(_)));
    }

    #[test_case(Decimal::new(-1, 0) ; "negative")]
    #[test_case(Decimal::new(100_000, 0) ; "too wide")]
    fn option_symbol_rejects_strike(strike: Decimal) {
        let err = option_symbol("AAPL", date(2024, 1, 19), OptionKind::Put, strike).unwrap_err();
        assert_eq!(err, SymbologyError::StrikeOutOfRange(strike));
    }

    #[test_case("CL", 2022, 12, "/CLZ2")]
    #[test_case("ES", 2024, 3, "/ESH4")]
    #[test_case("GC", 2030, 1, "/GCF0")]
    fn future_symbol_formats(code: &str, year: i32, month: u32, expected: &str) {
        assert_eq!(future_symbol(code, year, month).unwrap(), expected);
    }

    #[test_case(0)]
    #[test_case(13)]
    fn future_symbol_rejects_month(month: u32) {
        assert_eq!(
            future_symbol("CL", 2024, month).unwrap_err(),
            SymbologyError::InvalidMonth(month)
        );
    }

    #[test]
    fn future_option_symbol_formats() {
        let symbol = future_option_symbol(
            "/CLZ2",
            "LO1X2",
            date(2022, 11, 4),
            OptionKind::Call,
            Decimal::new(910, 1),
        )
        .unwrap();
        assert_eq!(symbol, "./CLZ2 LO1X2 221104C91");
    }

    #[test]
    fn future_option_symbol_keeps_fractional_strike() {
        let symbol = future_option_symbol(
            "/ESH4",
            "EW3",
            date(2024, 3, 15),
            OptionKind::Put,
            Decimal::new(450_550, 2),
        )
        .unwrap();
        assert_eq!(symbol, "./ESH4 EW3 240315P4505.5");
    }

    #[test_case("CLZ2" ; "missing slash")]
    #[test_case("/" ; "slash only")]
    #[test_case("/CL Z2" ; "whitespace")]
    fn future_option_symbol_rejects_future(future: &str) {
        let err = future_option_symbol(future, "LO", date(2022, 11, 4), OptionKind::Call, Decimal::ONE)
            .unwrap_err();
        assert!(matches!(err, SymbologyError::InvalidFutureSymbol(_)));
    }

    #[test]
    fn future_option_symbol_rejects_product_code_and_strike() {
        let expiration = date(2022, 11, 4);
        assert!(matches!(
            future_option_symbol("/CLZ2", "", expiration, OptionKind::Call, Decimal::ONE),
            Err(SymbologyError::InvalidProductCode(_))
        ));
        assert!(matches!(
            future_option_symbol("/CLZ2", "LO1X2", expiration, OptionKind::Call, Decimal::new(-5, 0)),
            Err(SymbologyError::StrikeOutOfRange(_))
        ));
    }

    #[test_case("call", OptionKind::Call)]
    #[test_case("C", OptionKind::Call)]
    #[test_case("Put", OptionKind::Put)]
    #[test_case("p", OptionKind::Put)]
    fn option_kind_parses(input: &str, expected: OptionKind) {
        assert_eq!(input.parse::<OptionKind>().unwrap(), expected);
    }

    #[test]
    fn option_kind_rejects_unknown() {
        assert!("straddle".parse::<OptionKind>().is_err());
    }
}
