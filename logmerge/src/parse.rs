//! Line splitting, field typing and time parsing.
//!
//! The parser is pure: it takes a line and a [`Format`] and produces field
//! parts, typed values or timestamps. Shape failures come back as
//! [`Error::LineShape`] result values — the merge iterator interprets them
//! as continuation lines rather than unwinding.

use crate::error::{Error, Result};
use crate::format::{Field, FieldKind, FieldValue, Format, LineShape, Timestamp};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use tracing::warn;

/// Literals accepted as `true` for bool fields, compared case-insensitively.
const TRUE_LITERALS: [&str; 7] = ["true", "t", "1", "yes", "y", "on", "enabled"];

/// Split a line into its ordered field parts according to the format's
/// line shape.
pub fn split_line(line: &str, format: &Format) -> Result<Vec<String>> {
    match &format.line_shape {
        LineShape::Separator(sep) => Ok(line.split(sep.as_str()).map(|p| p.trim().to_string()).collect()),
        LineShape::Pattern(regex) => {
            let Some(caps) = regex.captures(line) else {
                return Err(Error::LineShape(format!(
                    "line does not match the pattern {:?}",
                    regex.as_str()
                )));
            };
            let mut parts = Vec::with_capacity(format.fields.len());
            for field in &format.fields {
                let value = caps
                    .name(&field.name)
                    .or_else(|| caps.get(parts.len() + 1))
                    .map(|m| m.as_str())
                    .unwrap_or_default();
                parts.push(value.trim().to_string());
            }
            Ok(parts)
        }
        LineShape::Json => {
            let root: serde_json::Value = serde_json::from_str(line)
                .map_err(|e| Error::LineShape(format!("not a JSON line: {e}")))?;
            let mut parts = Vec::with_capacity(format.fields.len());
            for field in &format.fields {
                let mut current = Some(&root);
                for token in field.name.split('.') {
                    current = current.and_then(|v| v.get(token));
                }
                let part = match current {
                    Some(serde_json::Value::String(s)) => s.trim().to_string(),
                    Some(other) => other.to_string(),
                    None => String::new(),
                };
                parts.push(part);
            }
            Ok(parts)
        }
    }
}

/// The entry-starter test: every declared field, in order, either matches
/// its regex at its position or is optional with an empty/absent part.
/// Closed-list enum fields must additionally coerce to a listed value.
pub fn check_format(parts: &[String], format: &Format) -> bool {
    let mut index = 0;
    for field in &format.fields {
        let Some(part) = parts.get(index) else {
            if !field.optional {
                return false;
            }
            index += 1;
            continue;
        };

        let matched = match &field.regex {
            Some(regex) => regex.find(part).map(|m| m.as_str()),
            None => Some(part.as_str()),
        };

        let out_of_list = field.is_enum && !field.values.is_empty() && {
            let candidate = matched.unwrap_or(part);
            match field_value(candidate, field, format) {
                Some(value) => !field.values.contains(&value),
                None => true,
            }
        };

        if (matched.is_none() || out_of_list) && !field.optional {
            return false;
        }

        if field.optional && matched.is_none() && !part.is_empty() {
            continue;
        }

        index += 1;
    }
    true
}

/// Coerce a captured string to the field's declared type. Values that do
/// not parse are logged and omitted.
pub fn field_value(raw: &str, field: &Field, format: &Format) -> Option<FieldValue> {
    match field.kind {
        FieldKind::Bool => Some(FieldValue::Bool(
            TRUE_LITERALS.iter().any(|lit| raw.eq_ignore_ascii_case(lit)),
        )),
        FieldKind::Int => match raw.parse::<i64>() {
            Ok(v) => Some(FieldValue::Int(v)),
            Err(_) => {
                warn!("field {}: cannot parse {raw:?} as int", field.name);
                None
            }
        },
        FieldKind::UInt => match raw.parse::<u64>() {
            Ok(v) => Some(FieldValue::UInt(v)),
            Err(_) => {
                warn!("field {}: cannot parse {raw:?} as uint", field.name);
                None
            }
        },
        FieldKind::Double => match raw.parse::<f64>() {
            Ok(v) => Some(FieldValue::Double(v)),
            Err(_) => {
                warn!("field {}: cannot parse {raw:?} as double", field.name);
                None
            }
        },
        FieldKind::Str => Some(FieldValue::Str(raw.to_string())),
        FieldKind::DateTime => match parse_time(raw, format) {
            Ok(t) => Some(FieldValue::Time(t)),
            Err(err) => {
                warn!("field {}: {err}", field.name);
                None
            }
        },
    }
}

/// Parse a time field: the part before the first `.` with the strftime
/// mask, the part after as a fixed-width decimal fraction.
pub fn parse_time(value: &str, format: &Format) -> Result<Timestamp> {
    let time_parse_err = || Error::TimeParse {
        value: value.to_string(),
        mask: format.time_mask.clone(),
    };

    if format.time_mask.is_empty() {
        return Err(time_parse_err());
    }

    let (base, fraction) = match value.split_once('.') {
        Some((base, fraction)) => (base, Some(fraction)),
        None => (value, None),
    };

    let naive = parse_base_time(base, &format.time_mask).ok_or_else(time_parse_err)?;
    let mut timestamp = naive.and_utc();

    if format.time_fractional_digits > 0 {
        if let Some(fraction) = fraction.filter(|f| !f.is_empty()) {
            let nanos = fraction_to_nanos(fraction, format.time_fractional_digits)
                .ok_or_else(time_parse_err)?;
            timestamp += chrono::Duration::nanoseconds(nanos);
        }
    }

    Ok(timestamp)
}

/// Masks may describe a full datetime, a date, or a bare time of day.
fn parse_base_time(base: &str, mask: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = NaiveDateTime::parse_from_str(base, mask) {
        return Some(dt);
    }
    if let Ok(date) = NaiveDate::parse_from_str(base, mask) {
        return date.and_hms_opt(0, 0, 0);
    }
    if let Ok(time) = NaiveTime::parse_from_str(base, mask) {
        return NaiveDate::from_ymd_opt(1970, 1, 1).map(|d| d.and_time(time));
    }
    None
}

/// Interpret a fractional segment left-to-right as a fixed-width decimal
/// of `digits` digits and scale it to nanoseconds.
fn fraction_to_nanos(fraction: &str, digits: u32) -> Option<i64> {
    if !(1..=9).contains(&digits) {
        return None;
    }

    let mut value: i64 = 0;
    let mut actual = 0u32;
    for c in fraction.chars() {
        let Some(d) = c.to_digit(10) else { break };
        value = value * 10 + d as i64;
        actual += 1;
    }

    while actual < digits {
        value *= 10;
        actual += 1;
    }
    while actual > digits {
        value /= 10;
        actual -= 1;
    }

    Some(value * 10_i64.pow(9 - digits))
}

/// Strip from every continuation line the minimum count of leading
/// space/tab characters common to them all. Internal indentation survives.
pub fn normalize_continuation(continuation: &str) -> String {
    if continuation.is_empty() {
        return String::new();
    }

    let min_lead = continuation
        .lines()
        .map(|line| {
            line.chars()
                .take_while(|c| *c == ' ' || *c == '\t')
                .count()
        })
        .min()
        .unwrap_or(0);

    if min_lead == 0 {
        return continuation.to_string();
    }

    let stripped: Vec<&str> = continuation
        .lines()
        .map(|line| {
            let cut = line
                .char_indices()
                .nth(min_lead)
                .map(|(i, _)| i)
                .unwrap_or(line.len());
            &line[cut..]
        })
        .collect();
    stripped.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collections::HashSet;
    use chrono::{TimeZone, Utc};
    use regex::Regex;

    fn field(name: &str, kind: FieldKind) -> Field {
        Field {
            name: name.to_string(),
            regex: None,
            kind,
            optional: false,
            is_enum: false,
            values: HashSet::default(),
        }
    }

    fn separator_format(fields: Vec<Field>) -> Format {
        Format {
            name: "test".to_string(),
            modules: HashSet::default(),
            filename_regex: None,
            extension: ".log".to_string(),
            encoding: None,
            comments: vec![],
            line_shape: LineShape::Separator(";".to_string()),
            time_field_index: 0,
            time_mask: "%F %H:%M:%S".to_string(),
            time_fractional_digits: 3,
            fields,
        }
    }

    #[test]
    fn separator_split_trims_parts() {
        let format = separator_format(vec![
            field("time", FieldKind::DateTime),
            field("message", FieldKind::Str),
        ]);
        let parts = split_line("2023-01-01 10:00:00.000 ;  hello ", &format).unwrap();
        assert_eq!(parts, ["2023-01-01 10:00:00.000", "hello"]);
    }

    #[test]
    fn pattern_split_prefers_named_groups() {
        let mut format = separator_format(vec![
            field("time", FieldKind::DateTime),
            field("level", FieldKind::Str),
            field("message", FieldKind::Str),
        ]);
        format.line_shape = LineShape::Pattern(
            Regex::new(r"^\[(?P<time>[^\]]+)\] (?P<level>\w+): (.*)$").unwrap(),
        );

        let parts = split_line("[2023-01-01 10:00:00] INFO: all good", &format).unwrap();
        assert_eq!(parts[0], "2023-01-01 10:00:00");
        assert_eq!(parts[1], "INFO");
        assert_eq!(parts[2], "all good");

        assert!(matches!(
            split_line("no brackets here", &format),
            Err(Error::LineShape(_))
        ));
    }

    #[test]
    fn json_split_traverses_dotted_paths() {
        let mut format = separator_format(vec![
            field("ts", FieldKind::DateTime),
            field("ctx.module", FieldKind::Str),
            field("ctx.pid", FieldKind::UInt),
            field("missing", FieldKind::Str),
        ]);
        format.line_shape = LineShape::Json;

        let parts = split_line(
            r#"{"ts": "2023-01-01 10:00:00", "ctx": {"module": " net ", "pid": 42}}"#,
            &format,
        )
        .unwrap();
        assert_eq!(parts, ["2023-01-01 10:00:00", "net", "42", ""]);

        assert!(matches!(
            split_line("not json", &format),
            Err(Error::LineShape(_))
        ));
    }

    #[test]
    fn check_format_requires_mandatory_fields() {
        let mut time = field("time", FieldKind::DateTime);
        time.regex = Some(Regex::new(r"^\d{4}-\d{2}-\d{2} ").unwrap());
        let format = separator_format(vec![time, field("message", FieldKind::Str)]);

        let starter = vec!["2023-01-01 10:00:00.000".to_string(), "hello".to_string()];
        assert!(check_format(&starter, &format));

        let continuation = vec!["at frame 1".to_string()];
        assert!(!check_format(&continuation, &format));
    }

    #[test]
    fn check_format_optional_field_may_be_absent() {
        let mut level = field("level", FieldKind::Str);
        level.regex = Some(Regex::new(r"^(INFO|ERROR)$").unwrap());
        level.optional = true;
        let format = separator_format(vec![field("time", FieldKind::DateTime), level]);

        assert!(check_format(
            &["2023-01-01 10:00:00".to_string(), "INFO".to_string()],
            &format
        ));
        assert!(check_format(
            &["2023-01-01 10:00:00".to_string(), String::new()],
            &format
        ));
        assert!(check_format(&["2023-01-01 10:00:00".to_string()], &format));
    }

    #[test]
    fn closed_enum_rejects_unlisted_values() {
        let mut level = field("level", FieldKind::Str);
        level.is_enum = true;
        level.values = [FieldValue::Str("INFO".to_string())].into_iter().collect();
        let format = separator_format(vec![field("time", FieldKind::DateTime), level]);

        assert!(check_format(
            &["2023-01-01 10:00:00".to_string(), "INFO".to_string()],
            &format
        ));
        assert!(!check_format(
            &["2023-01-01 10:00:00".to_string(), "TRACE".to_string()],
            &format
        ));
    }

    #[test]
    fn bool_truth_literals() {
        let format = separator_format(vec![field("flag", FieldKind::Bool)]);
        let f = &format.fields[0];
        for lit in ["true", "T", "1", "Yes", "y", "ON", "Enabled"] {
            assert_eq!(field_value(lit, f, &format), Some(FieldValue::Bool(true)), "{lit}");
        }
        for lit in ["false", "0", "off", "nope"] {
            assert_eq!(field_value(lit, f, &format), Some(FieldValue::Bool(false)), "{lit}");
        }
    }

    #[test]
    fn numeric_coercions() {
        let format = separator_format(vec![
            field("i", FieldKind::Int),
            field("u", FieldKind::UInt),
            field("d", FieldKind::Double),
        ]);
        assert_eq!(
            field_value("-17", &format.fields[0], &format),
            Some(FieldValue::Int(-17))
        );
        assert_eq!(
            field_value("17", &format.fields[1], &format),
            Some(FieldValue::UInt(17))
        );
        assert_eq!(
            field_value("2.5", &format.fields[2], &format),
            Some(FieldValue::Double(2.5))
        );
        assert_eq!(field_value("x", &format.fields[0], &format), None);
    }

    #[test]
    fn time_with_millisecond_fraction() {
        let format = separator_format(vec![field("time", FieldKind::DateTime)]);
        let t = parse_time("2023-01-01 00:00:02.250", &format).unwrap();
        assert_eq!(
            t,
            Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 2).unwrap()
                + chrono::Duration::milliseconds(250)
        );

        // Short fractions are right-padded, long ones truncated.
        let short = parse_time("2023-01-01 00:00:02.2", &format).unwrap();
        assert_eq!(short, t.with_timezone(&Utc) - chrono::Duration::milliseconds(50));
        let long = parse_time("2023-01-01 00:00:02.2504", &format).unwrap();
        assert_eq!(long, t);
    }

    #[test]
    fn time_without_fraction() {
        let mut format = separator_format(vec![field("time", FieldKind::DateTime)]);
        format.time_fractional_digits = 0;
        let t = parse_time("2023-01-01 12:30:00", &format).unwrap();
        assert_eq!(t, Utc.with_ymd_and_hms(2023, 1, 1, 12, 30, 0).unwrap());

        assert!(matches!(
            parse_time("garbage", &format),
            Err(Error::TimeParse { .. })
        ));
    }

    #[test]
    fn date_only_mask_falls_back_to_midnight() {
        let mut format = separator_format(vec![field("time", FieldKind::DateTime)]);
        format.time_mask = "%Y/%m/%d".to_string();
        format.time_fractional_digits = 0;
        let t = parse_time("2023/06/15", &format).unwrap();
        assert_eq!(t, Utc.with_ymd_and_hms(2023, 6, 15, 0, 0, 0).unwrap());
    }

    #[test]
    fn continuation_common_prefix_is_stripped() {
        let text = "    at frame 1\n    at frame 2";
        assert_eq!(normalize_continuation(text), "at frame 1\nat frame 2");

        // Uneven indentation keeps the relative depth.
        let text = "  outer\n    inner";
        assert_eq!(normalize_continuation(text), "outer\n  inner");

        // Tabs count as one unit each.
        let text = "\t\ta\n\tb";
        assert_eq!(normalize_continuation(text), "\ta\nb");

        assert_eq!(normalize_continuation(""), "");
    }
}
