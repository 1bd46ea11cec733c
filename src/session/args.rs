use crate::core::{DbError, Result, Value};
use chrono::{DateTime, FixedOffset, Local, NaiveDateTime, TimeDelta, Utc};
use std::any::Any;

/// Tries each listed type in turn; the first successful downcast wins
macro_rules! try_convert {
    ($arg:expr, $($ty:ty => $conv:expr),+ $(,)?) => {
        $(
            if let Some(v) = $arg.downcast_ref::<$ty>() {
                let conv: fn(&$ty) -> Value = $conv;
                return Some(conv(v));
            }
        )+
    };
}

fn convert(arg: &dyn Any) -> Option<Value> {
    try_convert!(arg,
        () => |_| Value::Null,
        Value => |v| v.clone(),
        Option<Value> => |v| v.clone().unwrap_or(Value::Null),
        bool => |v| Value::Boolean(*v),
    );

    try_convert!(arg,
        i8 => |v| Value::Integer(*v as i64),
        i16 => |v| Value::Integer(*v as i64),
        i32 => |v| Value::Integer(*v as i64),
        i64 => |v| Value::Integer(*v),
        isize => |v| Value::Integer(*v as i64),
        u8 => |v| Value::Unsigned(*v as u64),
        u16 => |v| Value::Unsigned(*v as u64),
        u32 => |v| Value::Unsigned(*v as u64),
        u64 => |v| Value::Unsigned(*v),
        usize => |v| Value::Unsigned(*v as u64),
        f32 => |v| Value::Float(*v as f64),
        f64 => |v| Value::Float(*v),
    );

    try_convert!(arg,
        String => |v| Value::Text(v.clone()),
        &'static str => |v| Value::Text(v.to_string()),
        Vec<u8> => |v| Value::Bytes(v.clone()),
        &'static [u8] => |v| Value::Bytes(v.to_vec()),
    );

    try_convert!(arg,
        DateTime<Utc> => |v| Value::Timestamp(*v),
        DateTime<Local> => |v| Value::Timestamp(v.with_timezone(&Utc)),
        DateTime<FixedOffset> => |v| Value::Timestamp(v.with_timezone(&Utc)),
        NaiveDateTime => |v| Value::Timestamp(v.and_utc()),
        std::time::Duration => |v| TimeDelta::from_std(*v)
            .map(Value::Duration)
            .unwrap_or(Value::Duration(TimeDelta::MAX)),
        TimeDelta => |v| Value::Duration(*v),
    );

    try_convert!(arg,
        Utc => |_| Value::Location("UTC".into()),
        Local => |_| Value::Location("Local".into()),
        FixedOffset => |v| Value::Location(v.to_string()),
    );

    None
}

/// Converts caller-supplied arguments into engine values.
///
/// Accepts `()` as NULL, [`Value`], booleans, every integer width, floats,
/// strings, byte sequences, chrono date-times, durations and time zones.
/// Anything else fails with [`DbError::UnsupportedArgType`] naming the
/// 0-based position of the first offending argument.
pub fn check_args(args: &[&dyn Any]) -> Result<Vec<Value>> {
    args.iter()
        .enumerate()
        .map(|(position, arg)| convert(*arg).ok_or(DbError::UnsupportedArgType { position }))
        .collect()
}
