use std::fmt;

use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};

pub type AccountId = String;
pub type Balance = u128;
pub type StorageUsage = u64;

pub const NEAR_DECIMALS: usize = 24;
pub const ONE_NEAR: Balance = 10u128.pow(NEAR_DECIMALS as u32); // 1 NEAR = 1e24 minimal units

/// Balance that travels over JSON as a decimal string, so 128-bit values
/// survive clients whose numbers are doubles.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct U128(pub Balance);

impl From<Balance> for U128 {
    fn from(value: Balance) -> Self {
        Self(value)
    }
}

impl From<U128> for Balance {
    fn from(value: U128) -> Self {
        value.0
    }
}

impl fmt::Display for U128 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for U128 {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for U128 {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        encoded.parse::<Balance>().map(U128).map_err(D::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AmountError {
    #[error("empty amount")]
    Empty,
    #[error("malformed amount {0:?}")]
    Malformed(String),
    #[error("amount {0:?} has more than 24 fractional digits")]
    TooPrecise(String),
    #[error("amount {0:?} does not fit in 128 bits")]
    Overflow(String),
}

/// Parses either a raw integer in minimal units (`"1500"`) or a decimal NEAR
/// amount (`"1.5 NEAR"`, `"2near"`).
pub fn parse_amount(input: &str) -> Result<Balance, AmountError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(AmountError::Empty);
    }
    let lower = trimmed.to_ascii_lowercase();
    let Some(number) = lower.strip_suffix("near") else {
        return parse_digits(trimmed, trimmed);
    };
    let number = number.trim_end();
    let (whole, frac) = match number.split_once('.') {
        Some((whole, frac)) => (whole, frac),
        None => (number, ""),
    };
    if whole.is_empty() && frac.is_empty() {
        return Err(AmountError::Malformed(input.to_string()));
    }
    if frac.len() > NEAR_DECIMALS {
        return Err(AmountError::TooPrecise(input.to_string()));
    }
    let whole = if whole.is_empty() {
        0
    } else {
        parse_digits(whole, input)?
    };
    let frac = if frac.is_empty() {
        0
    } else {
        let scale = 10u128.pow((NEAR_DECIMALS - frac.len()) as u32);
        parse_digits(frac, input)? * scale
    };
    whole
        .checked_mul(ONE_NEAR)
        .and_then(|units| units.checked_add(frac))
        .ok_or_else(|| AmountError::Overflow(input.to_string()))
}

fn parse_digits(digits: &str, original: &str) -> Result<Balance, AmountError> {
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(AmountError::Malformed(original.to_string()));
    }
    digits
        .parse::<Balance>()
        .map_err(|_| AmountError::Overflow(original.to_string()))
}

/// Renders minimal units as a NEAR amount with trailing zeros trimmed.
pub fn format_amount(amount: Balance) -> String {
    let whole = amount / ONE_NEAR;
    let frac = amount % ONE_NEAR;
    if frac == 0 {
        return format!("{whole} NEAR");
    }
    let frac = format!("{frac:0width$}", width = NEAR_DECIMALS);
    format!("{whole}.{} NEAR", frac.trim_end_matches('0'))
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccountIdError {
    #[error("account id {0:?} must be between 2 and 64 characters")]
    Length(String),
    #[error("account id {0:?} contains an invalid character")]
    InvalidChar(String),
    #[error("account id {0:?} has a misplaced separator")]
    Separator(String),
}

pub fn validate_account_id(account_id: &str) -> Result<(), AccountIdError> {
    if !(2..=64).contains(&account_id.len()) {
        return Err(AccountIdError::Length(account_id.to_string()));
    }
    let mut previous_separator = true;
    for ch in account_id.chars() {
        let separator = matches!(ch, '-' | '_' | '.');
        if !separator && !(ch.is_ascii_lowercase() || ch.is_ascii_digit()) {
            return Err(AccountIdError::InvalidChar(account_id.to_string()));
        }
        if separator && previous_separator {
            return Err(AccountIdError::Separator(account_id.to_string()));
        }
        previous_separator = separator;
    }
    if previous_separator {
        return Err(AccountIdError::Separator(account_id.to_string()));
    }
    Ok(())
}
