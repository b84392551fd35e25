//! Fixed-point rate representation (value x 1e8).
//!
//! Feed contracts store answers as integers with 8 decimals. Every rate the
//! keeper pushes on-chain goes through [`Rate`], so the conversions from API
//! quotes live here and nowhere else.

use alloy::primitives::{I256, U256};
use std::fmt;

use crate::error::RateFetchError;

/// Scale factor for all on-chain answers (8 decimals).
pub const RATE_SCALE: u128 = 100_000_000;

/// One tenth of a USD expressed in [`RATE_SCALE`] units.
const TENTH_SCALE: u128 = RATE_SCALE / 10;

/// Price of one unit in USD-equivalent terms, scaled by 1e8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Rate(u128);

impl Rate {
    /// Exactly 1.0 (stablecoin peg).
    pub const ONE: Rate = Rate(RATE_SCALE);

    /// Wrap an already scaled integer.
    pub const fn from_raw(raw: u128) -> Self {
        Self(raw)
    }

    /// Scaled integer value.
    pub const fn raw(&self) -> u128 {
        self.0
    }

    /// Answer argument for `updateAnswer(int256)`.
    pub fn to_int256(&self) -> I256 {
        I256::from_raw(U256::from(self.0))
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:08}", self.0 / RATE_SCALE, self.0 % RATE_SCALE)
    }
}

/// Convert an FX quote ("units of currency per 1 USD") into the USD value of
/// one unit of that currency.
///
/// The quote is inverted first and then scaled, truncating toward zero. Near
/// exact quotients this can differ by one unit from `1e8 / quote`; the feed
/// has always been written with the inverted form.
pub fn rate_from_fx_quote(units_per_usd: f64) -> Result<Rate, RateFetchError> {
    if !units_per_usd.is_finite() || units_per_usd <= 0.0 {
        return Err(RateFetchError::InvalidPrice {
            value: units_per_usd.to_string(),
        });
    }

    let scaled = (RATE_SCALE as f64 * (1.0 / units_per_usd)).trunc();
    if scaled < 1.0 {
        return Err(RateFetchError::InvalidPrice {
            value: units_per_usd.to_string(),
        });
    }

    Ok(Rate(scaled as u128))
}

/// Convert a USD market price into a rate, rounding **up** to the next 0.1 USD.
///
/// The rounding is done on the decimal text so that a quote like `"1234.50"`
/// stays at 1234.5 instead of drifting through binary floating point.
pub fn rate_from_usd_price(text: &str) -> Result<Rate, RateFetchError> {
    let invalid = || RateFetchError::InvalidPrice {
        value: text.to_string(),
    };

    let trimmed = text.trim();
    if trimmed.is_empty() || trimmed.starts_with('-') {
        return Err(invalid());
    }

    // Scientific notation only shows up for absurd prices; take the float path.
    if trimmed.contains(|c: char| c == 'e' || c == 'E') {
        let price: f64 = trimmed.parse().map_err(|_| invalid())?;
        if !price.is_finite() || price <= 0.0 {
            return Err(invalid());
        }
        let tenths = (price * 10.0).ceil() as u128;
        return scale_tenths(tenths).ok_or_else(invalid);
    }

    let trimmed = trimmed.trim_start_matches('+');
    let (int_part, frac_part) = trimmed.split_once('.').unwrap_or((trimmed, ""));
    if int_part.is_empty() && frac_part.is_empty() {
        return Err(invalid());
    }
    if !int_part.bytes().all(|b| b.is_ascii_digit()) || !frac_part.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }

    let mut tenths: u128 = 0;
    for digit in int_part.bytes() {
        tenths = tenths
            .checked_mul(10)
            .and_then(|t| t.checked_add(u128::from(digit - b'0')))
            .ok_or_else(invalid)?;
    }
    tenths = tenths.checked_mul(10).ok_or_else(invalid)?;

    let mut frac = frac_part.bytes();
    if let Some(first) = frac.next() {
        tenths += u128::from(first - b'0');
    }
    if frac.any(|b| b != b'0') {
        tenths = tenths.checked_add(1).ok_or_else(invalid)?;
    }

    scale_tenths(tenths).ok_or_else(invalid)
}

fn scale_tenths(tenths: u128) -> Option<Rate> {
    if tenths == 0 {
        return None;
    }
    tenths.checked_mul(TENTH_SCALE).map(Rate)
}
