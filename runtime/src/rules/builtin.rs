use std::sync::Arc;

use serde_json::{Number, Value};

use super::{Rule, SharedRule};
use crate::error::{RuleError, value_kind};

pub const BBOX_CORNERS_TO_ORIGIN_SIZE: &str = "CUS_001";
pub const BBOX_ORIGIN_SIZE_TO_CORNERS: &str = "CUS_002";
pub const TRIM_WHITESPACE: &str = "CUS_003";

/// `[x1, y1, x2, y2]` -> `[x1, y1, x2 - x1, y2 - y1]`.
#[derive(Debug, Default, Clone, Copy)]
pub struct BboxCornersToOriginSize;

impl BboxCornersToOriginSize {
    pub fn shared() -> SharedRule {
        Arc::new(Self)
    }
}

impl Rule for BboxCornersToOriginSize {
    fn id(&self) -> &str {
        BBOX_CORNERS_TO_ORIGIN_SIZE
    }

    fn do_process(&self, input: &Value) -> Result<Value, RuleError> {
        let [x1, y1, x2, y2] = read_box(input)?;
        let width = x2.sub(&x1, 2)?;
        let height = y2.sub(&y1, 3)?;
        Ok(Value::Array(vec![
            x1.into_value(0)?,
            y1.into_value(1)?,
            width,
            height,
        ]))
    }
}

/// `[x, y, width, height]` -> `[x, y, x + width, y + height]`.
#[derive(Debug, Default, Clone, Copy)]
pub struct BboxOriginSizeToCorners;

impl BboxOriginSizeToCorners {
    pub fn shared() -> SharedRule {
        Arc::new(Self)
    }
}

impl Rule for BboxOriginSizeToCorners {
    fn id(&self) -> &str {
        BBOX_ORIGIN_SIZE_TO_CORNERS
    }

    fn do_process(&self, input: &Value) -> Result<Value, RuleError> {
        let [x, y, width, height] = read_box(input)?;
        let x2 = x.add(&width, 2)?;
        let y2 = y.add(&height, 3)?;
        Ok(Value::Array(vec![x.into_value(0)?, y.into_value(1)?, x2, y2]))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TrimWhitespace;

impl TrimWhitespace {
    pub fn shared() -> SharedRule {
        Arc::new(Self)
    }
}

impl Rule for TrimWhitespace {
    fn id(&self) -> &str {
        TRIM_WHITESPACE
    }

    fn do_process(&self, input: &Value) -> Result<Value, RuleError> {
        match input {
            Value::String(text) => Ok(Value::String(text.trim().to_string())),
            other => Err(RuleError::NotAString {
                found: value_kind(other),
            }),
        }
    }
}

/// A coordinate that remembers whether it arrived as an integer, so integer
/// boxes stay integral and float boxes are never rounded.
#[derive(Debug, Clone, Copy)]
enum Coord {
    Int(i64),
    Float(f64),
}

impl Coord {
    fn parse(value: &Value, index: usize) -> Result<Self, RuleError> {
        let Value::Number(number) = value else {
            return Err(RuleError::NotNumeric { index });
        };
        if let Some(int) = number.as_i64() {
            return Ok(Self::Int(int));
        }
        number
            .as_f64()
            .map(Self::Float)
            .ok_or(RuleError::NotNumeric { index })
    }

    fn as_f64(&self) -> f64 {
        match *self {
            Self::Int(v) => v as f64,
            Self::Float(v) => v,
        }
    }

    fn sub(&self, other: &Self, index: usize) -> Result<Value, RuleError> {
        match (*self, *other) {
            (Self::Int(a), Self::Int(b)) => match a.checked_sub(b) {
                Some(v) => Ok(Value::from(v)),
                None => float_value(a as f64 - b as f64, index),
            },
            _ => float_value(self.as_f64() - other.as_f64(), index),
        }
    }

    fn add(&self, other: &Self, index: usize) -> Result<Value, RuleError> {
        match (*self, *other) {
            (Self::Int(a), Self::Int(b)) => match a.checked_add(b) {
                Some(v) => Ok(Value::from(v)),
                None => float_value(a as f64 + b as f64, index),
            },
            _ => float_value(self.as_f64() + other.as_f64(), index),
        }
    }

    fn into_value(self, index: usize) -> Result<Value, RuleError> {
        match self {
            Self::Int(v) => Ok(Value::from(v)),
            Self::Float(v) => float_value(v, index),
        }
    }
}

fn float_value(value: f64, index: usize) -> Result<Value, RuleError> {
    Number::from_f64(value)
        .map(Value::Number)
        .ok_or(RuleError::NotNumeric { index })
}

fn read_box(input: &Value) -> Result<[Coord; 4], RuleError> {
    let items = input.as_array().ok_or(RuleError::NotAnArray {
        found: value_kind(input),
    })?;
    if items.len() != 4 {
        return Err(RuleError::Arity {
            expected: 4,
            found: items.len(),
        });
    }
    Ok([
        Coord::parse(&items[0], 0)?,
        Coord::parse(&items[1], 1)?,
        Coord::parse(&items[2], 2)?,
        Coord::parse(&items[3], 3)?,
    ])
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn corners_to_origin_size_keeps_integers() {
        let out = BboxCornersToOriginSize
            .do_process(&json!([10, 20, 50, 80]))
            .unwrap();
        assert_eq!(out, json!([10, 20, 40, 60]));
        assert!(out[2].is_i64());
    }

    #[test]
    fn corners_to_origin_size_keeps_floats_exact() {
        let out = BboxCornersToOriginSize
            .do_process(&json!([1.5, 2.25, 4.0, 3.25]))
            .unwrap();
        assert_eq!(out, json!([1.5, 2.25, 2.5, 1.0]));
    }

    #[test]
    fn short_box_is_an_arity_error() {
        let err = BboxCornersToOriginSize
            .do_process(&json!([1, 2, 3]))
            .unwrap_err();
        assert_eq!(
            err,
            RuleError::Arity {
                expected: 4,
                found: 3
            }
        );
    }

    #[test]
    fn non_numeric_coordinate_is_reported_by_index() {
        let err = BboxCornersToOriginSize
            .do_process(&json!([1, "2", 3, 4]))
            .unwrap_err();
        assert_eq!(err, RuleError::NotNumeric { index: 1 });
    }

    #[test]
    fn origin_size_round_trips_corners() {
        let corners = json!([3, 4, 13, 24]);
        let xywh = BboxCornersToOriginSize.do_process(&corners).unwrap();
        assert_eq!(BboxOriginSizeToCorners.do_process(&xywh).unwrap(), corners);
    }

    #[test]
    fn trim_rejects_non_strings() {
        assert_eq!(
            TrimWhitespace.do_process(&json!("  total  ")).unwrap(),
            json!("total")
        );
        assert!(TrimWhitespace.do_process(&json!(5)).is_err());
    }
}
