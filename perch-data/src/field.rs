//! Scalar field codec for the observation dump.
//!
//! Every function here is a pure transformation from the raw text of one
//! (or a few related) dump columns to a typed value, failing with a
//! [`FieldParseError`] on malformed input. The pipeline decides whether a
//! failure aborts the run or skips the row; the codec never does.

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use thiserror::Error;

/// Separators accepted between date components. The upstream exports have
/// used all three over the years.
const DATE_SEPARATORS: &[char] = &['/', '\\', '-'];

/// Format of the `LAST EDITED DATE` column.
const LAST_EDITED_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Errors raised when a scalar field cannot be decoded.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FieldParseError {
    /// A composite identifier did not start with the expected tag.
    #[error("identifier {value:?} does not start with prefix {prefix:?}")]
    MissingPrefix {
        /// Expected fixed prefix, e.g. `S` or `obsr`.
        prefix: &'static str,
        /// Offending raw value.
        value: String,
    },
    /// The digits of a composite identifier failed to parse.
    #[error("identifier {value:?} is not numeric after prefix {prefix:?}")]
    NonNumericIdentifier {
        /// Expected fixed prefix.
        prefix: &'static str,
        /// Offending raw value.
        value: String,
    },
    /// A date token did not contain month, day, and year components.
    #[error("malformed date {value:?}; expected month, day, and year")]
    MalformedDate {
        /// Offending raw value.
        value: String,
    },
    /// A time token did not contain hour, minute, and second components.
    #[error("malformed time {value:?}; expected hour:minute:second")]
    MalformedTime {
        /// Offending raw value.
        value: String,
    },
    /// An integer field failed to parse.
    #[error("malformed integer {value:?}")]
    MalformedInteger {
        /// Offending raw value.
        value: String,
    },
    /// A decimal or coordinate field failed to parse.
    #[error("malformed decimal {value:?}")]
    MalformedDecimal {
        /// Offending raw value.
        value: String,
    },
    /// A boolean flag was not the literal `0` or `1`.
    #[error("malformed flag {value:?}; expected \"0\" or \"1\"")]
    MalformedFlag {
        /// Offending raw value.
        value: String,
    },
    /// The last-edited timestamp did not match its fixed format.
    #[error("malformed timestamp {value:?}; expected yyyy-mm-dd hh:mm:ss")]
    MalformedTimestamp {
        /// Offending raw value.
        value: String,
    },
    /// A protocol name outside the fixed enumeration. Either the upstream
    /// format gained a protocol or the row is corrupt; both warrant
    /// stopping.
    #[error("unrecognised protocol name {name:?}")]
    UnknownProtocol {
        /// Offending protocol name.
        name: String,
    },
}

/// Strip a fixed prefix from a composite identifier and parse the rest as
/// an integer: `"S1234567"` with prefix `"S"` yields `1234567`.
pub fn prefixed_id(prefix: &'static str, value: &str) -> Result<i64, FieldParseError> {
    let digits = value
        .strip_prefix(prefix)
        .ok_or_else(|| FieldParseError::MissingPrefix {
            prefix,
            value: value.to_owned(),
        })?;
    digits
        .parse()
        .map_err(|_| FieldParseError::NonNumericIdentifier {
            prefix,
            value: value.to_owned(),
        })
}

/// [`prefixed_id`] for columns that may be blank; blank means absent.
pub fn optional_prefixed_id(
    prefix: &'static str,
    value: &str,
) -> Result<Option<i64>, FieldParseError> {
    if value.is_empty() {
        return Ok(None);
    }
    prefixed_id(prefix, value).map(Some)
}

/// Extract the numeric tail of an observation URN such as
/// `URN:CornellLabOfOrnithology:EBIRD:OBS123456789`.
pub fn observation_id(value: &str) -> Result<i64, FieldParseError> {
    let tail = value.rsplit(':').next().unwrap_or(value);
    prefixed_id("OBS", tail).map_err(|_| FieldParseError::NonNumericIdentifier {
        prefix: "OBS",
        value: value.to_owned(),
    })
}

/// Parse the observation start timestamp from its date and time columns.
///
/// Four cases: both blank yields no timestamp; a date alone yields
/// midnight of that date; date and time yield the exact instant. A time
/// without a date is malformed.
pub fn start_timestamp(
    date: &str,
    time: &str,
) -> Result<Option<NaiveDateTime>, FieldParseError> {
    if date.is_empty() && time.is_empty() {
        return Ok(None);
    }
    let date = parse_date(date)?;
    let time = if time.is_empty() {
        NaiveTime::MIN
    } else {
        parse_time(time)?
    };
    Ok(Some(date.and_time(time)))
}

/// Parse the effort duration column: blank means absent, otherwise whole
/// minutes.
pub fn duration_minutes(value: &str) -> Result<Option<Duration>, FieldParseError> {
    if value.is_empty() {
        return Ok(None);
    }
    let minutes: i32 = value
        .parse()
        .map_err(|_| FieldParseError::MalformedInteger {
            value: value.to_owned(),
        })?;
    Ok(Some(Duration::minutes(i64::from(minutes))))
}

/// Month-day-year date token with `/`, `\`, or `-` separators.
fn parse_date(value: &str) -> Result<NaiveDate, FieldParseError> {
    let malformed = || FieldParseError::MalformedDate {
        value: value.to_owned(),
    };
    let mut parts = value.split(DATE_SEPARATORS);
    let month: u32 = next_component(&mut parts).ok_or_else(malformed)?;
    let day: u32 = next_component(&mut parts).ok_or_else(malformed)?;
    let year: i32 = next_component(&mut parts).ok_or_else(malformed)?;
    if parts.next().is_some() {
        return Err(malformed());
    }
    NaiveDate::from_ymd_opt(year, month, day).ok_or_else(malformed)
}

/// `hour:minute:second` time token.
fn parse_time(value: &str) -> Result<NaiveTime, FieldParseError> {
    let malformed = || FieldParseError::MalformedTime {
        value: value.to_owned(),
    };
    let mut parts = value.split(':');
    let hour: u32 = next_component(&mut parts).ok_or_else(malformed)?;
    let minute: u32 = next_component(&mut parts).ok_or_else(malformed)?;
    let second: u32 = next_component(&mut parts).ok_or_else(malformed)?;
    if parts.next().is_some() {
        return Err(malformed());
    }
    NaiveTime::from_hms_opt(hour, minute, second).ok_or_else(malformed)
}

fn next_component<'a, T: std::str::FromStr>(
    parts: &mut impl Iterator<Item = &'a str>,
) -> Option<T> {
    parts.next().and_then(|part| part.parse().ok())
}

/// Blank means absent, otherwise an arbitrary-precision decimal.
pub fn decimal_or_none(value: &str) -> Result<Option<Decimal>, FieldParseError> {
    if value.is_empty() {
        return Ok(None);
    }
    value
        .parse()
        .map(Some)
        .map_err(|_| FieldParseError::MalformedDecimal {
            value: value.to_owned(),
        })
}

/// Blank means absent, otherwise an integer.
pub fn int_or_none(value: &str) -> Result<Option<i64>, FieldParseError> {
    if value.is_empty() {
        return Ok(None);
    }
    value
        .parse()
        .map(Some)
        .map_err(|_| FieldParseError::MalformedInteger {
            value: value.to_owned(),
        })
}

/// A WGS84 coordinate component.
pub fn coordinate(value: &str) -> Result<f64, FieldParseError> {
    value
        .parse()
        .map_err(|_| FieldParseError::MalformedDecimal {
            value: value.to_owned(),
        })
}

/// Boolean flags are encoded as the literal digits `0` and `1`.
pub fn flag(value: &str) -> Result<bool, FieldParseError> {
    match value {
        "0" => Ok(false),
        "1" => Ok(true),
        _ => Err(FieldParseError::MalformedFlag {
            value: value.to_owned(),
        }),
    }
}

/// The observation count column: `X` reports presence without a count,
/// blank means absent, anything else is the count itself.
pub fn observation_count(value: &str) -> Result<(Option<i64>, bool), FieldParseError> {
    if value == "X" {
        return Ok((None, true));
    }
    Ok((int_or_none(value)?, false))
}

/// The last-edited timestamp, `yyyy-mm-dd hh:mm:ss`; blank means absent.
pub fn last_edited(value: &str) -> Result<Option<NaiveDateTime>, FieldParseError> {
    if value.is_empty() {
        return Ok(None);
    }
    NaiveDateTime::parse_from_str(value, LAST_EDITED_FORMAT)
        .map(Some)
        .map_err(|_| FieldParseError::MalformedTimestamp {
            value: value.to_owned(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("S", "S1234567", 1234567)]
    #[case("L", "L42", 42)]
    #[case("obsr", "obsr000123", 123)]
    #[case("G", "G99", 99)]
    fn extracts_prefixed_identifiers(
        #[case] prefix: &'static str,
        #[case] value: &str,
        #[case] expected: i64,
    ) {
        assert_eq!(prefixed_id(prefix, value), Ok(expected));
    }

    #[rstest]
    fn rejects_identifier_with_wrong_prefix() {
        assert_eq!(
            prefixed_id("S", "T123"),
            Err(FieldParseError::MissingPrefix {
                prefix: "S",
                value: "T123".into(),
            })
        );
    }

    #[rstest]
    fn rejects_identifier_with_non_numeric_tail() {
        assert!(matches!(
            prefixed_id("S", "Sabc"),
            Err(FieldParseError::NonNumericIdentifier { .. })
        ));
    }

    #[rstest]
    fn extracts_observation_id_from_urn() {
        assert_eq!(
            observation_id("URN:CornellLabOfOrnithology:EBIRD:OBS999"),
            Ok(999)
        );
    }

    #[rstest]
    fn optional_identifier_is_absent_when_blank() {
        assert_eq!(optional_prefixed_id("obsr", ""), Ok(None));
        assert_eq!(optional_prefixed_id("obsr", "obsr7"), Ok(Some(7)));
    }

    #[rstest]
    fn start_is_absent_without_date_and_time() {
        assert_eq!(start_timestamp("", ""), Ok(None));
    }

    #[rstest]
    #[case("03-04-2015")]
    #[case("03/04/2015")]
    #[case("03\\04\\2015")]
    fn date_alone_yields_midnight(#[case] date: &str) {
        let expected = NaiveDate::from_ymd_opt(2015, 3, 4)
            .and_then(|d| d.and_hms_opt(0, 0, 0));
        assert_eq!(start_timestamp(date, ""), Ok(expected));
    }

    #[rstest]
    fn date_and_time_yield_exact_instant() {
        let expected = NaiveDate::from_ymd_opt(2015, 3, 4)
            .and_then(|d| d.and_hms_opt(7, 30, 0));
        assert_eq!(start_timestamp("03-04-2015", "07:30:00"), Ok(expected));
    }

    #[rstest]
    #[case("2015-03")]
    #[case("13-40-2015")]
    #[case("a-b-c")]
    fn rejects_malformed_dates(#[case] date: &str) {
        assert!(matches!(
            start_timestamp(date, ""),
            Err(FieldParseError::MalformedDate { .. })
        ));
    }

    #[rstest]
    fn rejects_malformed_time() {
        assert!(matches!(
            start_timestamp("03-04-2015", "25:00:00"),
            Err(FieldParseError::MalformedTime { .. })
        ));
    }

    #[rstest]
    fn duration_is_absent_when_blank() {
        assert_eq!(duration_minutes(""), Ok(None));
    }

    #[rstest]
    fn duration_converts_minutes() {
        assert_eq!(duration_minutes("45"), Ok(Some(Duration::minutes(45))));
    }

    #[rstest]
    fn decimals_and_integers_treat_blank_as_absent() {
        assert_eq!(decimal_or_none(""), Ok(None));
        assert_eq!(int_or_none(""), Ok(None));
        assert_eq!(
            decimal_or_none("2.414"),
            Ok(Some("2.414".parse().expect("decimal")))
        );
        assert_eq!(int_or_none("3"), Ok(Some(3)));
    }

    #[rstest]
    fn flags_decode_the_two_literals_only() {
        assert_eq!(flag("0"), Ok(false));
        assert_eq!(flag("1"), Ok(true));
        assert!(matches!(
            flag("true"),
            Err(FieldParseError::MalformedFlag { .. })
        ));
    }

    #[rstest]
    fn observation_count_handles_indeterminate_marker() {
        assert_eq!(observation_count("X"), Ok((None, true)));
        assert_eq!(observation_count(""), Ok((None, false)));
        assert_eq!(observation_count("12"), Ok((Some(12), false)));
    }

    #[rstest]
    fn last_edited_parses_fixed_format() {
        let expected = NaiveDate::from_ymd_opt(2021, 6, 1)
            .and_then(|d| d.and_hms_opt(12, 0, 5));
        assert_eq!(last_edited("2021-06-01 12:00:05"), Ok(expected));
        assert_eq!(last_edited(""), Ok(None));
        assert!(matches!(
            last_edited("June 1st"),
            Err(FieldParseError::MalformedTimestamp { .. })
        ));
    }
}
