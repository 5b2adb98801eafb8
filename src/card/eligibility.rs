//! Age-based eligibility derived from the Italian fiscal code.
//!
//! The birth date is encoded in characters 7-11 of the code (year, month
//! letter, day + 40 for women). Digits may be replaced by letters when two
//! citizens would otherwise share a code ("omocodia").

use chrono::{Datelike, Months, NaiveDate};
use thiserror::Error;

use super::status::SubjectId;

const MONTH_LETTERS: [char; 12] = ['A', 'B', 'C', 'D', 'E', 'H', 'L', 'M', 'P', 'R', 'S', 'T'];
const OMOCODIA_LETTERS: [char; 10] = ['L', 'M', 'N', 'P', 'Q', 'R', 'S', 'T', 'U', 'V'];

/// Minimum age to obtain a CGN.
pub const CGN_LOWER_BOUND_AGE: u32 = 18;
/// The CGN expires on this birthday.
pub const CGN_UPPER_BOUND_AGE: u32 = 36;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EligibilityError {
    #[error("fiscal code must be 16 alphanumeric characters")]
    Malformed,
    #[error("fiscal code encodes an invalid birth date")]
    InvalidBirthDate,
}

/// A subject who may hold the card until `expiration_date`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Eligible {
    pub expiration_date: NaiveDate,
}

fn decode_digit(c: char) -> Option<u32> {
    c.to_digit(10).or_else(|| {
        OMOCODIA_LETTERS
            .iter()
            .position(|&l| l == c)
            .map(|p| p as u32)
    })
}

fn decode_number(chars: &[char]) -> Option<u32> {
    chars
        .iter()
        .try_fold(0u32, |acc, &c| decode_digit(c).map(|d| acc * 10 + d))
}

/// Extract the birth date from a fiscal code, relative to `today` for the century.
pub fn birth_date(fiscal_code: &str, today: NaiveDate) -> Result<NaiveDate, EligibilityError> {
    let chars: Vec<char> = fiscal_code.trim().to_ascii_uppercase().chars().collect();
    if chars.len() != 16 || !chars.iter().all(|c| c.is_ascii_alphanumeric()) {
        return Err(EligibilityError::Malformed);
    }

    let yy = decode_number(&chars[6..8]).ok_or(EligibilityError::Malformed)?;
    let month = MONTH_LETTERS
        .iter()
        .position(|&l| l == chars[8])
        .map(|p| p as u32 + 1)
        .ok_or(EligibilityError::Malformed)?;
    let mut day = decode_number(&chars[9..11]).ok_or(EligibilityError::Malformed)?;
    if day > 40 {
        day -= 40;
    }

    let this_century = today.year() - today.year() % 100;
    let mut year = this_century + yy as i32;
    if year > today.year() {
        year -= 100;
    }

    NaiveDate::from_ymd_opt(year, month, day).ok_or(EligibilityError::InvalidBirthDate)
}

fn add_years(date: NaiveDate, years: u32) -> Result<NaiveDate, EligibilityError> {
    date.checked_add_months(Months::new(12 * years))
        .ok_or(EligibilityError::InvalidBirthDate)
}

/// CGN eligibility: ages 18 through 35, expiring on the 36th birthday.
pub fn cgn_eligibility(
    subject: &SubjectId,
    today: NaiveDate,
) -> Result<Option<Eligible>, EligibilityError> {
    let born = birth_date(subject.as_str(), today)?;
    let age = today.years_since(born).unwrap_or(0);
    if !(CGN_LOWER_BOUND_AGE..CGN_UPPER_BOUND_AGE).contains(&age) {
        return Ok(None);
    }
    Ok(Some(Eligible {
        expiration_date: add_years(born, CGN_UPPER_BOUND_AGE)?,
    }))
}

/// EYCA eligibility: younger than `upper_bound_age`, expiring on that birthday.
pub fn eyca_eligibility(
    subject: &SubjectId,
    today: NaiveDate,
    upper_bound_age: u32,
) -> Result<Option<Eligible>, EligibilityError> {
    let born = birth_date(subject.as_str(), today)?;
    let age = today.years_since(born).unwrap_or(0);
    if age >= upper_bound_age {
        return Ok(None);
    }
    Ok(Some(Eligible {
        expiration_date: add_years(born, upper_bound_age)?,
    }))
}
