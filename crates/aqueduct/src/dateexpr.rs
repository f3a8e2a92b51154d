/*
 *  Copyright 2025 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Date expression evaluation for template tokens.
//!
//! A token body is a date expression when it contains at least one of the
//! field sequences `yyyy`, `MM`, `dd`, `HH`, `mm`, `ss` (case-sensitive). It
//! may carry a trailing day offset:
//!
//! ```text
//! ${yyyy-MM-dd}      -> 2024-07-15
//! ${yyyy-MM-dd-1}    -> 2024-07-14
//! ${yyyyMMdd+7}      -> 20240722
//! ```
//!
//! The offset applies in whole days against the run's reference date. Tokens
//! that resemble a date pattern but carry a malformed offset are not parsed;
//! the resolver then falls through to name lookup and ultimately leaves the
//! token literal.

use chrono::{Duration, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;

/// Splits an expression into a format body and an optional trailing offset.
/// The body must end in a letter so that `yyyy-MM-dd-1` parses as the body
/// `yyyy-MM-dd` with offset `-1`.
static EXPR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(.*[A-Za-z])(?:([+-])([0-9]+))?$").unwrap());

/// The date field sequences recognised inside a format body, longest first so
/// the scanner never splits a four-character field into two-character ones.
const FIELDS: &[(&str, &str)] = &[
    ("yyyy", "%Y"),
    ("MM", "%m"),
    ("dd", "%d"),
    ("HH", "%H"),
    ("mm", "%M"),
    ("ss", "%S"),
];

/// A parsed date expression: a format body plus a day offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateExpr {
    body: String,
    offset_days: i64,
}

impl DateExpr {
    /// Parses a token body into a date expression.
    ///
    /// Returns `None` when the body does not contain any date field, or when
    /// the trailing offset is malformed (e.g. a dangling sign).
    pub fn parse(token: &str) -> Option<Self> {
        let caps = EXPR_RE.captures(token)?;
        let body = caps.get(1)?.as_str();
        if !contains_date_field(body) {
            return None;
        }

        let offset_days = match (caps.get(2), caps.get(3)) {
            (Some(sign), Some(digits)) => {
                let magnitude: i64 = digits.as_str().parse().ok()?;
                if sign.as_str() == "-" {
                    -magnitude
                } else {
                    magnitude
                }
            }
            _ => 0,
        };

        Some(Self {
            body: body.to_string(),
            offset_days,
        })
    }

    /// Evaluates the expression against a reference instant.
    ///
    /// The offset shifts the date component; time fields (`HH`/`mm`/`ss`)
    /// render the reference's time of day.
    pub fn evaluate(&self, reference: NaiveDateTime) -> String {
        let shifted = reference + Duration::days(self.offset_days);
        shifted.format(&to_chrono_format(&self.body)).to_string()
    }

    /// The day offset carried by the expression.
    pub fn offset_days(&self) -> i64 {
        self.offset_days
    }
}

/// True when the body contains at least one recognised date field sequence.
pub fn contains_date_field(body: &str) -> bool {
    FIELDS.iter().any(|(field, _)| body.contains(field))
}

/// Translates a field-style format body into a chrono strftime string.
///
/// Characters outside the recognised fields are copied through; literal `%`
/// is escaped so user text cannot inject format specifiers.
fn to_chrono_format(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let bytes = body.as_bytes();
    let mut i = 0;
    'outer: while i < bytes.len() {
        for (field, code) in FIELDS {
            if body[i..].starts_with(field) {
                out.push_str(code);
                i += field.len();
                continue 'outer;
            }
        }
        let ch = body[i..].chars().next().unwrap();
        if ch == '%' {
            out.push_str("%%");
        } else {
            out.push(ch);
        }
        i += ch.len_utf8();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::init_test_logging;
    use chrono::NaiveDate;

    fn reference(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(9, 30, 5)
            .unwrap()
    }

    #[test]
    fn test_parse_plain_pattern() {
        init_test_logging();

        let expr = DateExpr::parse("yyyy-MM-dd").unwrap();
        assert_eq!(expr.offset_days(), 0);
        assert_eq!(expr.evaluate(reference(2024, 7, 15)), "2024-07-15");
    }

    #[test]
    fn test_parse_negative_offset() {
        init_test_logging();

        let expr = DateExpr::parse("yyyy-MM-dd-1").unwrap();
        assert_eq!(expr.offset_days(), -1);
        assert_eq!(expr.evaluate(reference(2024, 7, 15)), "2024-07-14");
    }

    #[test]
    fn test_parse_positive_offset_compact() {
        init_test_logging();

        let expr = DateExpr::parse("yyyyMMdd+7").unwrap();
        assert_eq!(expr.evaluate(reference(2024, 7, 15)), "20240722");
    }

    #[test]
    fn test_leap_day_arithmetic() {
        init_test_logging();

        let expr = DateExpr::parse("yyyyMMdd-1").unwrap();
        assert_eq!(expr.evaluate(reference(2024, 3, 1)), "20240229");
    }

    #[test]
    fn test_time_fields() {
        init_test_logging();

        let expr = DateExpr::parse("yyyy-MM-dd HH:mm:ss").unwrap();
        assert_eq!(expr.evaluate(reference(2024, 7, 15)), "2024-07-15 09:30:05");
    }

    #[test]
    fn test_non_date_body_rejected() {
        init_test_logging();

        assert!(DateExpr::parse("region").is_none());
        assert!(DateExpr::parse("ref_date").is_none());
        assert!(DateExpr::parse("").is_none());
    }

    #[test]
    fn test_malformed_offset_rejected() {
        init_test_logging();

        // Dangling sign: body would have to end in a letter.
        assert!(DateExpr::parse("yyyy-MM-dd-").is_none());
        assert!(DateExpr::parse("yyyyMMdd+").is_none());
    }

    #[test]
    fn test_literal_text_survives_formatting() {
        init_test_logging();

        let expr = DateExpr::parse("dt=yyyyMMdd").unwrap();
        assert_eq!(expr.evaluate(reference(2024, 1, 2)), "dt=20240102");
    }

    #[test]
    fn test_percent_is_escaped() {
        init_test_logging();

        let expr = DateExpr::parse("%yyyy").unwrap();
        assert_eq!(expr.evaluate(reference(2024, 1, 2)), "%2024");
    }
}
