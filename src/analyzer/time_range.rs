//! Rolling time-window extraction.
//!
//! Recognises MySQL's `DATE_SUB(CURDATE(), INTERVAL <n> <unit>)` idiom.
//!
//! ```text
//! DATE_SUB(CURDATE(),  INTERVAL  3  MONTH)
//! ─────────┬────────── ────┬─── ─┬─ ──┬──
//!          │               │     │    └── unit: YEAR | MONTH | DAY
//!          │               │     └── interval (digits)
//!          │               └── keyword, whitespace on both sides
//!          └── anchor, at least one space after the comma
//! ```

use std::fmt;

use nom::{
    IResult,
    branch::alt,
    bytes::complete::tag_no_case,
    character::complete::{char, digit1, multispace1},
    combinator::{map, value},
};
use serde::{Deserialize, Serialize};

const ANCHOR: &str = "date_sub(curdate(),";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Year,
    Month,
    Day,
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TimeUnit::Year => "year",
            TimeUnit::Month => "month",
            TimeUnit::Day => "day",
        })
    }
}

/// A look-back window such as "3 month".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub interval: u64,
    pub unit: TimeUnit,
    pub recommendation: String,
}

impl TimeRange {
    pub fn new(interval: u64, unit: TimeUnit) -> Self {
        Self {
            interval,
            unit,
            recommendation: format!(
                "start: compute the date {} {} before the run date",
                interval, unit
            ),
        }
    }
}

/// Find the first `DATE_SUB(CURDATE(), INTERVAL n UNIT)` window in the text.
///
/// Absence is `None`, never a zero-length window.
pub fn extract_time_range(sql: &str) -> Option<TimeRange> {
    // ASCII lower-casing keeps byte offsets aligned with `sql`.
    let lower = sql.to_ascii_lowercase();
    lower
        .match_indices(ANCHOR)
        .find_map(|(idx, _)| date_sub_curdate(&sql[idx..]).ok())
        .map(|(_, (interval, unit))| TimeRange::new(interval, unit))
}

fn date_sub_curdate(input: &str) -> IResult<&str, (u64, TimeUnit)> {
    let (input, _) = tag_no_case(ANCHOR)(input)?;
    let (input, _) = multispace1(input)?;
    let (input, _) = tag_no_case("interval")(input)?;
    let (input, _) = multispace1(input)?;
    // digit1 guarantees digits, so parsing only fails on overflow
    let (input, interval) = map(digit1, |d: &str| d.parse::<u64>().unwrap_or(u64::MAX))(input)?;
    let (input, _) = multispace1(input)?;
    let (input, unit) = parse_unit(input)?;
    let (input, _) = char(')')(input)?;
    Ok((input, (interval, unit)))
}

fn parse_unit(input: &str) -> IResult<&str, TimeUnit> {
    alt((
        value(TimeUnit::Year, tag_no_case("year")),
        value(TimeUnit::Month, tag_no_case("month")),
        value(TimeUnit::Day, tag_no_case("day")),
    ))(input)
}
