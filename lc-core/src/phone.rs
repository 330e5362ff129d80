//! Phone number normalization.
//!
//! Numbers are stored and sent in E.164 form: a leading `+` followed by
//! 8 to 15 digits. Common separators typed by users are stripped first.

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::{LcError, LcResult};

lazy_static! {
    static ref E164: Regex = Regex::new(r"^\+[1-9][0-9]{7,14}$").unwrap();
    static ref SEPARATORS: Regex = Regex::new(r"[\s\-().]").unwrap();
}

/// Strip separators and validate the result as an E.164 number.
pub fn normalize(raw: &str) -> LcResult<String> {
    let compact = SEPARATORS.replace_all(raw.trim(), "").into_owned();
    if E164.is_match(&compact) {
        Ok(compact)
    } else {
        Err(LcError::InvalidPhone(raw.trim().to_string()))
    }
}

/// Reduce a partial number typed into a search box to its digits and `+`.
/// Everything else is dropped, including `LIKE` wildcards.
pub fn search_fragment(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit() || *c == '+').collect()
}

/// Mask all but the last four digits for logging.
pub fn redact(phone: &str) -> String {
    let visible: String = phone.chars().rev().take(4).collect::<Vec<_>>().into_iter().rev().collect();
    format!("***{visible}")
}
