//! Human-readable names and typed values for device telemetry codes.
//!
//! Devices report their state as a flat `fields` object keyed by short codes
//! (`"s18": "183"`). [`translate`] turns one of those pairs into a descriptive
//! name and, where a conversion is registered, a typed value.

use chrono::NaiveDateTime;
use log::error;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;

pub const DEVICE_TIME_FORMAT: &str = "%y%m%d%H%M%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conversion {
    /// Compact `yyMMddHHmmss` timestamp.
    DeviceTime,
    Integer,
    /// Fixed-point value reported in tenths.
    Tenths,
    /// `0` / `1` flag.
    Boolean,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: &'static str,
    pub conversion: Option<Conversion>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Raw(Value),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Timestamp(NaiveDateTime),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Raw(Value::String(s)) => write!(f, "{}", s),
            FieldValue::Raw(value) => write!(f, "{}", value),
            FieldValue::Integer(i) => write!(f, "{}", i),
            FieldValue::Float(x) => write!(f, "{}", x),
            FieldValue::Boolean(b) => write!(f, "{}", b),
            FieldValue::Timestamp(t) => write!(f, "{}", t),
        }
    }
}

/// A conversion that could not be applied; logged, never returned to callers.
#[derive(Debug)]
pub struct ConversionError {
    pub code: String,
    pub name: String,
    pub raw: Value,
    pub reason: String,
}

impl fmt::Display for ConversionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let key = if self.name == self.code {
            self.code.clone()
        } else {
            format!("{} ({})", self.code, self.name)
        };
        write!(
            f,
            "Could not convert key '{}' value '{}': {}",
            key,
            raw_text(&self.raw),
            self.reason
        )
    }
}

/// Look up the descriptor for a telemetry code.
pub fn descriptor(code: &str) -> Option<FieldDescriptor> {
    use Conversion::*;

    let (name, conversion) = match code {
        // IntelliFlo variable speed pump
        "s1" => ("Device time", Some(DeviceTime)),
        "s2" => ("Wifi firmware version", None),
        "s3" => ("Motor firmware version", None),
        "s5" => ("Wifi signal strength", Some(Integer)),
        "s6" => ("Wifi mac address", None),
        "s8" => ("Active program", Some(Integer)),
        "s11" => ("Motor running", Some(Boolean)),
        "s14" => ("Pump mode", Some(Integer)),
        "s17" => ("Drive temperature", Some(Integer)),
        "s18" => ("Current power", Some(Integer)),
        "s19" => ("Current motor speed", Some(Tenths)),
        "s20" => ("Target motor speed", Some(Tenths)),
        "s26" => ("Current estimated flow", Some(Tenths)),
        "s27" => ("Current pressure", Some(Tenths)),
        "s30" => ("Error code", Some(Integer)),
        "s31" => ("Warning code", Some(Integer)),
        "s38" => ("Freeze protection enabled", Some(Boolean)),
        "s40" => ("Last power on time", Some(DeviceTime)),
        // Salt level sensor
        "salt_level" => ("Salt level", Some(Integer)),
        "average_salt_usage_per_day" => ("Average salt usage per day", None),
        "low_battery_alert" => ("Low battery alert", Some(Boolean)),
        "sensor_fault" => ("Sensor fault", Some(Boolean)),
        "calibration_status_alert" => ("Calibration status alert", Some(Boolean)),
        "salt_level_alert" => ("Salt level alert", Some(Integer)),
        "battery_level" => ("Battery level", Some(Integer)),
        _ => return None,
    };

    Some(FieldDescriptor { name, conversion })
}

/// Translate a raw telemetry pair into `(name, value)`.
///
/// Unknown codes pass through unchanged. A failed conversion is logged and
/// the raw value is returned as-is, so one malformed field never aborts the
/// rest of a device record.
pub fn translate(code: &str, raw: &Value) -> (String, FieldValue) {
    let Some(descriptor) = descriptor(code) else {
        return (code.to_string(), FieldValue::Raw(raw.clone()));
    };
    let name = descriptor.name.to_string();

    let Some(conversion) = descriptor.conversion else {
        return (name, FieldValue::Raw(raw.clone()));
    };

    match convert(conversion, raw) {
        Ok(value) => (name, value),
        Err(reason) => {
            let err = ConversionError {
                code: code.to_string(),
                name: name.clone(),
                raw: raw.clone(),
                reason,
            };
            error!("{}", err);
            (name, FieldValue::Raw(raw.clone()))
        }
    }
}

/// Translate every entry of a device `fields` object, in key order.
pub fn translate_fields(fields: &Map<String, Value>) -> Vec<(String, FieldValue)> {
    fields
        .iter()
        .map(|(code, raw)| translate(code, raw))
        .collect()
}

pub fn convert(conversion: Conversion, raw: &Value) -> Result<FieldValue, String> {
    match conversion {
        Conversion::DeviceTime => {
            NaiveDateTime::parse_from_str(raw_text(raw).trim(), DEVICE_TIME_FORMAT)
                .map(FieldValue::Timestamp)
                .map_err(|e| {
                    format!(
                        "time data '{}' does not match format '{}' ({})",
                        raw_text(raw),
                        DEVICE_TIME_FORMAT,
                        e
                    )
                })
        }
        Conversion::Integer => parse_integer(raw).map(FieldValue::Integer),
        Conversion::Tenths => parse_float(raw).map(|x| FieldValue::Float(x / 10.0)),
        Conversion::Boolean => parse_integer(raw).map(|i| FieldValue::Boolean(i != 0)),
    }
}

fn raw_text(raw: &Value) -> String {
    match raw {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn parse_integer(raw: &Value) -> Result<i64, String> {
    match raw {
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| format!("invalid literal for integer: '{}'", n)),
        Value::Bool(b) => Ok(i64::from(*b)),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|e| format!("invalid literal for integer: '{}' ({})", s, e)),
        other => Err(format!("expected a number, got {}", other)),
    }
}

fn parse_float(raw: &Value) -> Result<f64, String> {
    match raw {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| format!("could not convert to float: '{}'", n)),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|e| format!("could not convert string to float: '{}' ({})", s, e)),
        other => Err(format!("expected a number, got {}", other)),
    }
}
