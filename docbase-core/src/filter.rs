//! The human-readable date/range filter mini-language.
//!
//! Grammar:
//!
//! ```text
//! expr   := op? value ( '..' value )?
//! op     := '>' | '>=' | '<' | '<='
//! value  := isoDateTime | nowExpr
//! nowExpr:= '@now' ( signedInteger )?      // integer is a day offset
//! ```
//!
//! A single value with an operator is a unary comparison; `value..value` is
//! an inclusive BETWEEN; a bare value is an equality check. `@now` resolves
//! against the caller-supplied UTC clock captured at query build time, so a
//! slow query stays internally consistent. The language is UTC-only: a
//! timezone suffix on `@now` is a parse error, and datetime literals with an
//! explicit offset are normalized to UTC.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use nom::{
    branch::alt,
    bytes::complete::{tag, take_while1},
    character::complete::{digit1, multispace0, one_of},
    combinator::{eof, map, opt, recognize},
    sequence::{pair, preceded, tuple},
    IResult,
};

use crate::error::{DocbaseError, DocbaseResult};
use crate::query::{ColumnRef, CompareOp, Expr};

/// A parsed filter expression, with `@now` already resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum DateFilter {
    /// `op value` or a bare value (equality).
    Compare { op: CompareOp, value: DateTime<Utc> },
    /// `low..high`, both ends inclusive.
    Range {
        low: DateTime<Utc>,
        high: DateTime<Utc>,
    },
}

impl DateFilter {
    /// Lowers the filter onto a column as a predicate expression.
    pub(crate) fn into_expr(self, column: ColumnRef) -> Expr {
        match self {
            DateFilter::Compare { op, value } => Expr::Compare {
                column,
                op,
                value: value.into(),
            },
            DateFilter::Range { low, high } => Expr::Between {
                column,
                low: low.into(),
                high: high.into(),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum RawValue<'a> {
    Now { offset_days: i64 },
    Literal(&'a str),
}

fn comparison_op(input: &str) -> IResult<&str, CompareOp> {
    alt((
        map(tag(">="), |_| CompareOp::Ge),
        map(tag("<="), |_| CompareOp::Le),
        map(tag(">"), |_| CompareOp::Gt),
        map(tag("<"), |_| CompareOp::Lt),
    ))(input)
}

fn now_value(input: &str) -> IResult<&str, RawValue<'_>> {
    let (input, _) = tag("@now")(input)?;
    let (input, offset) = opt(recognize(pair(one_of("+-"), digit1)))(input)?;
    let offset_days = offset
        .map(|s: &str| s.parse::<i64>().unwrap_or(0))
        .unwrap_or(0);
    Ok((input, RawValue::Now { offset_days }))
}

fn literal_value(input: &str) -> IResult<&str, RawValue<'_>> {
    // Datetime characters only; '..' never matches because '.' is excluded.
    map(
        take_while1(|c: char| c.is_ascii_digit() || "T:-Z+".contains(c)),
        RawValue::Literal,
    )(input)
}

fn value(input: &str) -> IResult<&str, RawValue<'_>> {
    alt((now_value, literal_value))(input)
}

type ParsedFilter<'a> = (
    Option<CompareOp>,
    RawValue<'a>,
    Option<RawValue<'a>>,
);

fn filter_expr(input: &str) -> IResult<&str, ParsedFilter<'_>> {
    map(
        tuple((
            multispace0,
            opt(comparison_op),
            multispace0,
            value,
            opt(preceded(
                tuple((multispace0, tag(".."), multispace0)),
                value,
            )),
            multispace0,
            eof,
        )),
        |(_, op, _, first, second, _, _)| (op, first, second),
    )(input)
}

fn resolve(raw: RawValue<'_>, now: DateTime<Utc>, input: &str) -> DocbaseResult<DateTime<Utc>> {
    match raw {
        RawValue::Now { offset_days } => Ok(now + Duration::days(offset_days)),
        RawValue::Literal(text) => parse_datetime(text).ok_or_else(|| DocbaseError::Parse {
            position: offset_of(input, text),
            message: format!("'{text}' is not a valid ISO date or datetime"),
        }),
    }
}

fn parse_datetime(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S") {
        return Some(naive.and_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return Some(date.and_hms_opt(0, 0, 0)?.and_utc());
    }
    None
}

fn offset_of(input: &str, substring: &str) -> usize {
    let input_ptr = input.as_ptr() as usize;
    let sub_ptr = substring.as_ptr() as usize;
    sub_ptr.saturating_sub(input_ptr)
}

/// Parses a filter expression against the given UTC clock.
///
/// Errors carry the byte position of the failure within `input`.
pub fn parse_date_filter(input: &str, now: DateTime<Utc>) -> DocbaseResult<DateFilter> {
    let (op, first, second) = match filter_expr(input) {
        Ok((_, parsed)) => parsed,
        Err(err) => {
            let position = match &err {
                nom::Err::Error(e) | nom::Err::Failure(e) => offset_of(input, e.input),
                nom::Err::Incomplete(_) => input.len(),
            };
            return Err(DocbaseError::Parse {
                position,
                message: "expected an optional comparison operator, then a date or '@now'"
                    .to_string(),
            });
        }
    };

    match (op, second) {
        (None, Some(high)) => {
            let low = resolve(first, now, input)?;
            let high = resolve(high, now, input)?;
            Ok(DateFilter::Range { low, high })
        }
        (Some(_), Some(_)) => Err(DocbaseError::Parse {
            position: 0,
            message: "a comparison operator cannot be combined with a range".to_string(),
        }),
        (op, None) => Ok(DateFilter::Compare {
            op: op.unwrap_or(CompareOp::Eq),
            value: resolve(first, now, input)?,
        }),
    }
}
