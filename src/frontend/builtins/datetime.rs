use chrono::{DateTime, Datelike, Duration, FixedOffset, SecondsFormat, Timelike, Utc};

use super::{FuncArgs, FuncDef, ParamType};
use crate::frontend::value::{Unknown, Value};

fn parse_timestamp(ts: &str) -> Result<DateTime<FixedOffset>, String> {
    DateTime::parse_from_rfc3339(ts).map_err(|e| format!("invalid timestamp {ts:?}: {e}"))
}

/// The current time is only known at apply time.
pub fn create_timestamp_func() -> FuncDef {
    FuncDef::builder().build(|_: FuncArgs| Ok(Unknown::new("timestamp()", "timestamp").into()))
}

const MONTHS: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

/// Render a timestamp with the `YYYY-MM-DD hh:mm:ss` style format language.
fn format_date(spec: &str, dt: &DateTime<FixedOffset>) -> Result<String, String> {
    let chars: Vec<char> = spec.chars().collect();
    let mut out = String::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == '\'' {
            let end = chars[i + 1..]
                .iter()
                .position(|&q| q == '\'')
                .ok_or("unterminated literal in format")?;
            if end == 0 {
                out.push('\'');
            } else {
                out.extend(&chars[i + 1..i + 1 + end]);
            }
            i += end + 2;
            continue;
        }
        if !c.is_ascii_alphabetic() {
            out.push(c);
            i += 1;
            continue;
        }
        let run = chars[i..].iter().take_while(|&&x| x == c).count();
        let hour12 = match dt.hour() % 12 {
            0 => 12,
            h => h,
        };
        let offset = dt.offset().local_minus_utc();
        let token = match (c, run) {
            ('Y', 4) => format!("{:04}", dt.year()),
            ('Y', 2) => format!("{:02}", dt.year() % 100),
            ('M', 4) => MONTHS[dt.month0() as usize].to_string(),
            ('M', 3) => MONTHS[dt.month0() as usize][..3].to_string(),
            ('M', 2) => format!("{:02}", dt.month()),
            ('M', 1) => dt.month().to_string(),
            ('D', 2) => format!("{:02}", dt.day()),
            ('D', 1) => dt.day().to_string(),
            ('E', 4) => dt.format("%A").to_string(),
            ('E', 3) => dt.format("%a").to_string(),
            ('h', 2) => format!("{:02}", dt.hour()),
            ('h', 1) => dt.hour().to_string(),
            ('H', 2) => format!("{:02}", hour12),
            ('H', 1) => hour12.to_string(),
            ('A', 2) => (if dt.hour() < 12 { "AM" } else { "PM" }).to_string(),
            ('a', 2) => (if dt.hour() < 12 { "am" } else { "pm" }).to_string(),
            ('m', 2) => format!("{:02}", dt.minute()),
            ('m', 1) => dt.minute().to_string(),
            ('s', 2) => format!("{:02}", dt.second()),
            ('s', 1) => dt.second().to_string(),
            ('Z', 1) if offset == 0 => "Z".to_string(),
            ('Z', 1) | ('Z', 5) => dt.format("%:z").to_string(),
            ('Z', 4) => dt.format("%z").to_string(),
            ('Z', 3) if offset == 0 => "UTC".to_string(),
            ('Z', 3) => dt.format("%:z").to_string(),
            _ => {
                return Err(format!(
                    "invalid date format verb {:?}",
                    chars[i..i + run].iter().collect::<String>()
                ))
            }
        };
        out.push_str(&token);
        i += run;
    }
    Ok(out)
}

/// Format a timestamp using the provided format string
pub fn create_formatdate_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::String)
        .param(ParamType::String)
        .build(|args: FuncArgs| {
            let dt = parse_timestamp(args.str(1)?)?;
            Ok(Value::from(format_date(args.str(0)?, &dt)?))
        })
}

/// Parse a duration such as `1h30m`, `-10s` or `1.5h`.
fn parse_duration(input: &str) -> Result<Duration, String> {
    let invalid = || format!("invalid duration {input:?}");
    let (negative, mut rest) = match input.strip_prefix('-') {
        Some(r) => (true, r),
        None => (false, input.strip_prefix('+').unwrap_or(input)),
    };
    if rest.is_empty() {
        return Err(invalid());
    }
    let mut nanos: f64 = 0.0;
    while !rest.is_empty() {
        let num_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(invalid)?;
        let n: f64 = rest[..num_len].parse().map_err(|_| invalid())?;
        rest = &rest[num_len..];
        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let scale = match &rest[..unit_len] {
            "ns" => 1.0,
            "us" | "µs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            _ => return Err(invalid()),
        };
        nanos += n * scale;
        rest = &rest[unit_len..];
    }
    let nanos = if negative { -nanos } else { nanos };
    Ok(Duration::nanoseconds(nanos as i64))
}

/// Add a duration to a timestamp
pub fn create_timeadd_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::String)
        .param(ParamType::String)
        .build(|args: FuncArgs| {
            let dt = parse_timestamp(args.str(0)?)?.with_timezone(&Utc);
            let dur = parse_duration(args.str(1)?)?;
            Ok(Value::from(
                (dt + dur).to_rfc3339_opts(SecondsFormat::AutoSi, true),
            ))
        })
}

/// Compare two timestamps returning -1, 0, or 1
pub fn create_timecmp_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::String)
        .param(ParamType::String)
        .build(|args: FuncArgs| {
            let ts1 = parse_timestamp(args.str(0)?)?;
            let ts2 = parse_timestamp(args.str(1)?)?;
            let result = match ts1.cmp(&ts2) {
                std::cmp::Ordering::Less => -1,
                std::cmp::Ordering::Equal => 0,
                std::cmp::Ordering::Greater => 1,
            };
            Ok(Value::from(result as i64))
        })
}

#[cfg(test)]
mod tests {
    use crate::frontend::builtins::test_support::eval;
    use crate::frontend::value::Value;

    #[test]
    fn test_timestamp_is_unknown() {
        assert!(eval("timestamp()").unwrap().is_unknown());
    }

    #[test]
    fn test_formatdate_function() {
        assert_eq!(
            eval("formatdate(\"YYYY-MM-DD\", \"2020-01-01T00:00:00Z\")").unwrap(),
            Value::from("2020-01-01")
        );
        assert_eq!(
            eval("formatdate(\"DD MMM YYYY hh:mm ZZZ\", \"2018-01-02T23:12:01Z\")").unwrap(),
            Value::from("02 Jan 2018 23:12 UTC")
        );
        assert_eq!(
            eval("formatdate(\"h'h'mm\", \"2018-01-02T23:12:01-08:00\")").unwrap(),
            Value::from("23h12")
        );
    }

    #[test]
    fn test_formatdate_error() {
        assert!(eval("formatdate(\"YYYY\", \"invalid\")").is_err());
    }

    #[test]
    fn test_timeadd_function() {
        assert_eq!(
            eval("timeadd(\"2020-01-01T00:00:00Z\", \"1h30m\")").unwrap(),
            Value::from("2020-01-01T01:30:00Z")
        );
        assert_eq!(
            eval("timeadd(\"2020-01-01T00:00:00Z\", \"-10s\")").unwrap(),
            Value::from("2019-12-31T23:59:50Z")
        );
    }

    #[test]
    fn test_timeadd_error() {
        assert!(eval("timeadd(\"2020-01-01T00:00:00Z\", \"10x\")").is_err());
    }

    #[test]
    fn test_timecmp_function() {
        assert_eq!(
            eval("timecmp(\"2020-01-01T00:00:00Z\", \"2020-01-02T00:00:00Z\")").unwrap(),
            Value::from(-1)
        );
    }
}
