use crate::{
    db::{
        sql::{ScalarFunction, TrimSpec},
        store::StoreError,
    },
    value::{ArithmeticOp, Value},
};
use time::{OffsetDateTime, PrimitiveDateTime};

/// Evaluate a scalar function; any NULL argument yields NULL.
pub(super) fn apply(function: ScalarFunction, args: &[Value]) -> Result<Value, StoreError> {
    let (min, max) = function.arity();
    if args.len() < min || args.len() > max {
        return Err(StoreError::statement(format!(
            "{} takes {min}..{max} arguments, got {}",
            function.name(),
            args.len()
        )));
    }

    match function {
        ScalarFunction::CurrentDate => return Ok(Value::Date(OffsetDateTime::now_utc().date())),
        ScalarFunction::CurrentTime => return Ok(Value::Time(OffsetDateTime::now_utc().time())),
        ScalarFunction::CurrentTimestamp => {
            let now = OffsetDateTime::now_utc();
            return Ok(Value::Timestamp(PrimitiveDateTime::new(now.date(), now.time())));
        }
        _ => {}
    }
    if args.iter().any(Value::is_null) {
        return Ok(Value::Null);
    }

    let value = match function {
        ScalarFunction::Concat => Value::Text(args.iter().map(plain_text).collect()),
        ScalarFunction::Substring => {
            let chars: Vec<char> = text(function, &args[0])?.chars().collect();
            let start = position(int(function, &args[1])?);
            let end = match args.get(2) {
                Some(len) => {
                    start.saturating_add(usize::try_from(int(function, len)?).unwrap_or(0))
                }
                None => chars.len(),
            };
            let start = start.min(chars.len());
            let end = end.clamp(start, chars.len());
            Value::Text(chars[start..end].iter().collect())
        }
        ScalarFunction::Trim(spec) => {
            let s = text(function, &args[0])?;
            let ch = match args.get(1) {
                Some(v) => text(function, v)?.chars().next().unwrap_or(' '),
                None => ' ',
            };
            let trimmed = match spec {
                TrimSpec::Both => s.trim_matches(ch),
                TrimSpec::Leading => s.trim_start_matches(ch),
                TrimSpec::Trailing => s.trim_end_matches(ch),
            };
            Value::Text(trimmed.to_string())
        }
        ScalarFunction::Upper => Value::Text(text(function, &args[0])?.to_uppercase()),
        ScalarFunction::Lower => Value::Text(text(function, &args[0])?.to_lowercase()),
        ScalarFunction::Length => {
            let len = text(function, &args[0])?.chars().count();
            Value::Int(i64::try_from(len).unwrap_or(i64::MAX))
        }
        ScalarFunction::Locate => {
            let needle = text(function, &args[0])?;
            let haystack: Vec<char> = text(function, &args[1])?.chars().collect();
            let skip = match args.get(2) {
                Some(start) => position(int(function, start)?).min(haystack.len()),
                None => 0,
            };
            let rest: String = haystack[skip..].iter().collect();
            let found = rest
                .find(needle)
                .map_or(0, |byte| skip + rest[..byte].chars().count() + 1);
            Value::Int(i64::try_from(found).unwrap_or(i64::MAX))
        }
        ScalarFunction::Abs => match &args[0] {
            Value::Int(v) => Value::Int(
                v.checked_abs()
                    .ok_or_else(|| StoreError::statement("ABS overflow"))?,
            ),
            Value::Float(v) => Value::Float(v.abs()),
            other => return Err(mismatch(function, other)),
        },
        ScalarFunction::Sqrt => match args[0].as_f64() {
            Some(v) => Value::Float(v.sqrt()),
            None => return Err(mismatch(function, &args[0])),
        },
        ScalarFunction::Mod => ArithmeticOp::Mod.apply(&args[0], &args[1])?,
        ScalarFunction::CurrentDate
        | ScalarFunction::CurrentTime
        | ScalarFunction::CurrentTimestamp => Value::Null,
    };

    Ok(value)
}

// 1-based SQL position to 0-based index.
fn position(one_based: i64) -> usize {
    usize::try_from(one_based.saturating_sub(1)).unwrap_or(0)
}

fn text(function: ScalarFunction, value: &Value) -> Result<&str, StoreError> {
    value.as_text().ok_or_else(|| mismatch(function, value))
}

fn int(function: ScalarFunction, value: &Value) -> Result<i64, StoreError> {
    value.as_int().ok_or_else(|| mismatch(function, value))
}

fn plain_text(value: &Value) -> String {
    match value {
        Value::Text(s) => s.clone(),
        other => other.to_string(),
    }
}

fn mismatch(function: ScalarFunction, value: &Value) -> StoreError {
    StoreError::statement(format!(
        "{} is not defined for argument {value}",
        function.name()
    ))
}
