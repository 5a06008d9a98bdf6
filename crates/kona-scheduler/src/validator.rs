use chrono::{NaiveDate, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, SchedulerError};
use crate::types::{JobStatus, Repeat, RunModel, RunSpec};

/// Wire shape of a run specification. Fields stay untyped so that bad
/// input is reported as a validation error instead of a decode error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawRunSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub at: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat: Option<Value>,
}

impl TryFrom<RawRunSpec> for RunSpec {
    type Error = SchedulerError;

    fn try_from(raw: RawRunSpec) -> Result<Self> {
        validate_raw(&raw)
    }
}

impl From<RunSpec> for RawRunSpec {
    fn from(run: RunSpec) -> Self {
        let model = match &run.model {
            RunModel::Now => Value::from("now"),
            RunModel::Daily => Value::from("daily"),
            RunModel::Weekly(days) => days.iter().map(|d| weekday_token(*d)).collect(),
            RunModel::DayOfMonth(day) => Value::from(vec![day.to_string()]),
            RunModel::DayOfYear { day, month } => Value::from(vec![format!("{day}/{month}")]),
            RunModel::Date(dt) => Value::from(vec![dt.format("%-d/%-m/%Y %-H:%M").to_string()]),
        };
        Self {
            model: Some(model),
            at: run.at.map(|t| Value::from(t.format("%H:%M").to_string())),
            delay: run.delay.map(Value::from),
            repeat: run.repeat.map(|r| match r {
                Repeat::Forever => Value::from("forever"),
                Repeat::Times(n) => Value::from(n.to_string()),
            }),
        }
    }
}

fn invalid(msg: impl Into<String>) -> SchedulerError {
    SchedulerError::Validation(msg.into())
}

/// `null` and `""` count as absent.
fn present(value: &Option<Value>) -> Option<&Value> {
    value
        .as_ref()
        .filter(|v| !v.is_null() && v.as_str() != Some(""))
}

/// Validate an untrusted `run` field into a [`RunSpec`].
pub fn validate_run(run: Option<&Value>) -> Result<RunSpec> {
    let run = run
        .filter(|v| !v.is_null())
        .ok_or_else(|| invalid("Run specification must be provided"))?;
    let raw: RawRunSpec = serde_json::from_value(run.clone())
        .map_err(|e| invalid(format!("Invalid run specification: {e}")))?;
    validate_raw(&raw)
}

fn validate_raw(raw: &RawRunSpec) -> Result<RunSpec> {
    let model = present(&raw.model).ok_or_else(|| invalid("Run model must be specified"))?;
    let at = present(&raw.at).map(parse_at).transpose()?;
    let delay = present(&raw.delay).map(parse_delay).transpose()?;
    let repeat = present(&raw.repeat).map(parse_repeat).transpose()?;

    let model = parse_model(model, at)?;

    let repeats = matches!(repeat, Some(Repeat::Forever)) || matches!(repeat, Some(Repeat::Times(n)) if n > 1);
    if repeats && delay.is_none() {
        return Err(invalid("Delay in minutes must be specified when repeat is set"));
    }

    let repeat = match model {
        RunModel::Daily => Some(repeat.unwrap_or(Repeat::Times(1))),
        _ => None,
    };
    Ok(RunSpec {
        model,
        at,
        delay,
        repeat,
    })
}

fn parse_model(model: &Value, at: Option<NaiveTime>) -> Result<RunModel> {
    let require_at = |model: RunModel| {
        if at.is_none() {
            Err(invalid("Time must be specified for this run model"))
        } else {
            Ok(model)
        }
    };

    let items = match model {
        Value::String(s) => {
            return match s.as_str() {
                "now" => Ok(RunModel::Now),
                "daily" => require_at(RunModel::Daily),
                other => Err(invalid(format!("Invalid run model: {other}"))),
            }
        }
        Value::Array(items) => items,
        other => return Err(invalid(format!("Invalid run model: {other}"))),
    };

    if items.is_empty() {
        return Err(invalid("Run model must not be empty"));
    }
    let tokens = items
        .iter()
        .map(|item| match item {
            Value::String(s) => Ok(s.trim().to_string()),
            Value::Number(n) => Ok(n.to_string()),
            other => Err(invalid(format!("Invalid run model entry: {other}"))),
        })
        .collect::<Result<Vec<_>>>()?;

    let weekdays: Option<Vec<Weekday>> = tokens.iter().map(|t| parse_weekday(t)).collect();
    if let Some(mut days) = weekdays {
        days.dedup();
        return require_at(RunModel::Weekly(days));
    }

    let [token] = tokens.as_slice() else {
        return Err(invalid("Inconsistent run model"));
    };

    if let Some((date, time)) = token.split_once(' ') {
        return parse_date_time(date, time.trim());
    }
    if token.contains('/') {
        let (day, month) = parse_day_month(token)?;
        return require_at(RunModel::DayOfYear { day, month });
    }
    match token.parse::<u32>() {
        Ok(day) if (1..=31).contains(&day) => require_at(RunModel::DayOfMonth(day)),
        Ok(day) => Err(invalid(format!("Invalid day of month: {day}"))),
        Err(_) => Err(invalid(format!("Invalid run model: {token}"))),
    }
}

fn parse_weekday(token: &str) -> Option<Weekday> {
    Some(match token {
        "mon" => Weekday::Mon,
        "tue" => Weekday::Tue,
        "wed" => Weekday::Wed,
        "thu" => Weekday::Thu,
        "fri" => Weekday::Fri,
        "sat" => Weekday::Sat,
        "sun" => Weekday::Sun,
        _ => return None,
    })
}

fn weekday_token(day: Weekday) -> Value {
    Value::from(match day {
        Weekday::Mon => "mon",
        Weekday::Tue => "tue",
        Weekday::Wed => "wed",
        Weekday::Thu => "thu",
        Weekday::Fri => "fri",
        Weekday::Sat => "sat",
        Weekday::Sun => "sun",
    })
}

fn numbers(s: &str, sep: char) -> Option<Vec<u32>> {
    s.split(sep).map(|p| p.trim().parse().ok()).collect()
}

/// `"D/M"`; 29/02 is accepted.
fn parse_day_month(token: &str) -> Result<(u32, u32)> {
    match numbers(token, '/').as_deref() {
        // Leap year so that 29/02 validates.
        Some(&[day, month]) if NaiveDate::from_ymd_opt(2000, month, day).is_some() => Ok((day, month)),
        _ => Err(invalid(format!("Invalid day/month: {token}"))),
    }
}

/// `"D/M/YYYY"` + `"H:MM"`.
fn parse_date_time(date: &str, time: &str) -> Result<RunModel> {
    if !date.contains('/') {
        return Err(invalid(format!("Invalid date: {date}")));
    }
    if !time.contains(':') {
        return Err(invalid(format!("Invalid time: {time}")));
    }
    let date = match numbers(date, '/').as_deref() {
        Some(&[day, month, year]) => i32::try_from(year)
            .ok()
            .and_then(|year| NaiveDate::from_ymd_opt(year, month, day)),
        _ => None,
    }
    .ok_or_else(|| invalid(format!("Invalid date: {date}")))?;
    let time = parse_time(time)?;
    Ok(RunModel::Date(date.and_time(time)))
}

fn parse_time(s: &str) -> Result<NaiveTime> {
    let time = match numbers(s, ':').as_deref() {
        Some(&[hour, minute]) => NaiveTime::from_hms_opt(hour, minute, 0),
        _ => None,
    };
    time.ok_or_else(|| invalid(format!("Invalid time: {s}")))
}

fn parse_at(value: &Value) -> Result<NaiveTime> {
    match value.as_str() {
        Some(s) => parse_time(s.trim()),
        None => Err(invalid(format!("Invalid time: {value}"))),
    }
}

/// A non-negative integer given as a JSON number or a numeric string.
fn as_integer(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn parse_delay(value: &Value) -> Result<u32> {
    as_integer(value)
        .filter(|d| *d > 0)
        .and_then(|d| u32::try_from(d).ok())
        .ok_or_else(|| invalid("Delay must be a positive number of minutes"))
}

fn parse_repeat(value: &Value) -> Result<Repeat> {
    if value.as_str() == Some("forever") {
        return Ok(Repeat::Forever);
    }
    as_integer(value)
        .filter(|n| *n >= 1)
        .and_then(|n| u32::try_from(n).ok())
        .map(Repeat::Times)
        .ok_or_else(|| invalid(format!("Invalid repeat: {value}")))
}

/// Job version: integer >= 1 given as a number or numeric string.
pub fn validate_version(value: &Value) -> Result<u32> {
    as_integer(value)
        .filter(|v| *v >= 1)
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| invalid(format!("Invalid job version: {value}")))
}

pub fn validate_code(code: &str) -> Result<()> {
    if code.trim().is_empty() {
        return Err(invalid("Job code must not be empty"));
    }
    Ok(())
}

pub fn validate_group(group: &str) -> Result<()> {
    if group.trim().is_empty() {
        return Err(invalid("Job group must not be empty"));
    }
    Ok(())
}

pub fn validate_status(status: &str) -> Result<JobStatus> {
    status.parse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;
    use serde_json::json;

    fn run(v: Value) -> Result<RunSpec> {
        validate_run(Some(&v))
    }

    fn rejected(v: Value) {
        let err = run(v.clone()).expect_err(&format!("{v} should be rejected"));
        assert_eq!(err.code(), "validation_error");
    }

    #[test]
    fn now_needs_nothing_else() {
        let spec = run(json!({"model": "now"})).unwrap();
        assert_eq!(spec, RunSpec::now());
    }

    #[test]
    fn daily_defaults_repeat_to_one() {
        let spec = run(json!({"model": "daily", "at": "09:30"})).unwrap();
        assert_eq!(spec.model, RunModel::Daily);
        assert_eq!(spec.at, NaiveTime::from_hms_opt(9, 30, 0));
        assert_eq!(spec.repeat, Some(Repeat::Times(1)));
    }

    #[test]
    fn repeat_is_dropped_outside_daily() {
        let spec = run(json!({"model": ["mon"], "at": "08:00", "repeat": "3", "delay": 10})).unwrap();
        assert_eq!(spec.repeat, None);
        assert_eq!(spec.delay, Some(10));
    }

    #[test]
    fn weekday_lists() {
        let spec = run(json!({"model": ["mon", "wed"], "at": "08:00"})).unwrap();
        assert_eq!(spec.model, RunModel::Weekly(vec![Weekday::Mon, Weekday::Wed]));
        rejected(json!({"model": ["mon", "wed"]}));
        rejected(json!({"model": ["mon", "15"], "at": "08:00"}));
    }

    #[test]
    fn single_token_models() {
        assert_eq!(
            run(json!({"model": ["15"], "at": "06:00"})).unwrap().model,
            RunModel::DayOfMonth(15)
        );
        assert_eq!(
            run(json!({"model": ["29/2"], "at": "06:00"})).unwrap().model,
            RunModel::DayOfYear { day: 29, month: 2 }
        );
        let expected = NaiveDateTime::parse_from_str("2030-03-01 14:05", "%Y-%m-%d %H:%M").unwrap();
        assert_eq!(
            run(json!({"model": ["1/3/2030 14:05"]})).unwrap().model,
            RunModel::Date(expected)
        );
    }

    #[test]
    fn malformed_models_are_rejected() {
        rejected(json!({}));
        rejected(json!({"model": "banana"}));
        rejected(json!({"model": "daily"}));
        rejected(json!({"model": []}));
        rejected(json!({"model": ["15", "16"], "at": "06:00"}));
        rejected(json!({"model": ["32"], "at": "06:00"}));
        rejected(json!({"model": ["15"]}));
        rejected(json!({"model": ["31/2"], "at": "06:00"}));
        rejected(json!({"model": ["1/3/2030 1405"]}));
        rejected(json!({"model": ["31/2/2030 10:00"]}));
        rejected(json!({"model": 42}));
        rejected(json!("now"));
        assert!(validate_run(None).is_err());
    }

    #[test]
    fn field_formats() {
        rejected(json!({"model": "daily", "at": "25:00"}));
        rejected(json!({"model": "daily", "at": "noon"}));
        rejected(json!({"model": "now", "delay": 0}));
        rejected(json!({"model": "now", "delay": "soon"}));
    }

    #[test]
    fn repeat_requires_delay() {
        rejected(json!({"model": "daily", "at": "09:00", "repeat": "forever"}));
        rejected(json!({"model": "daily", "at": "09:00", "repeat": 3}));
        let spec = run(json!({"model": "daily", "at": "09:00", "repeat": "forever", "delay": 15})).unwrap();
        assert_eq!(spec.repeat, Some(Repeat::Forever));
    }

    #[test]
    fn persisted_shape_reads_back() {
        for v in [
            json!({"model": "daily", "at": "09:00", "repeat": "1"}),
            json!({"model": ["tue", "fri"], "at": "17:45"}),
            json!({"model": ["29/2"], "at": "00:00"}),
            json!({"model": ["1/3/2030 9:05"]}),
        ] {
            let spec: RunSpec = serde_json::from_value(v.clone()).unwrap();
            assert_eq!(serde_json::to_value(&spec).unwrap(), v);
        }
    }

    #[test]
    fn field_validators() {
        assert_eq!(validate_version(&json!(2)).unwrap(), 2);
        assert_eq!(validate_version(&json!("3")).unwrap(), 3);
        assert!(validate_version(&json!(0)).is_err());
        assert!(validate_version(&json!("x")).is_err());
        assert!(validate_code(" ").is_err());
        assert!(validate_group("").is_err());
        assert_eq!(validate_status("locked").unwrap(), JobStatus::Locked);
    }
}
