// wollok-embed - Value conversion
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Conversions between Rust values and Wollok instances.

use std::fmt;

use wollok_vm::{Evaluation, Operand, FALSE_ID, NULL_ID, TRUE_ID};

/// A failed conversion.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvertError {
    pub expected: &'static str,
    pub found: String,
}

impl fmt::Display for ConvertError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "expected {}, found {}", self.expected, self.found)
    }
}

impl std::error::Error for ConvertError {}

impl ConvertError {
    fn new(expected: &'static str, evaluation: &Evaluation, value: Operand) -> Self {
        ConvertError {
            expected,
            found: evaluation.describe_operand(value),
        }
    }
}

/// Convert a Wollok operand into a Rust value.
pub trait FromWollok: Sized {
    fn from_wollok(evaluation: &Evaluation, value: Operand) -> Result<Self, ConvertError>;
}

/// Convert a Rust value into a Wollok operand.
pub trait IntoWollok {
    fn into_wollok(self, evaluation: &mut Evaluation) -> Operand;
}

impl FromWollok for f64 {
    fn from_wollok(evaluation: &Evaluation, value: Operand) -> Result<Self, ConvertError> {
        evaluation
            .number_value(value)
            .ok_or_else(|| ConvertError::new("a number", evaluation, value))
    }
}

impl FromWollok for i64 {
    fn from_wollok(evaluation: &Evaluation, value: Operand) -> Result<Self, ConvertError> {
        let number = f64::from_wollok(evaluation, value)?;
        if number.fract() == 0.0 {
            Ok(number as i64)
        } else {
            Err(ConvertError::new("an integer", evaluation, value))
        }
    }
}

impl FromWollok for bool {
    fn from_wollok(evaluation: &Evaluation, value: Operand) -> Result<Self, ConvertError> {
        match value {
            Some(id) if id == TRUE_ID => Ok(true),
            Some(id) if id == FALSE_ID => Ok(false),
            _ => Err(ConvertError::new("a boolean", evaluation, value)),
        }
    }
}

impl FromWollok for String {
    fn from_wollok(evaluation: &Evaluation, value: Operand) -> Result<Self, ConvertError> {
        evaluation
            .string_value(value)
            .ok_or_else(|| ConvertError::new("a string", evaluation, value))
    }
}

/// `null` converts to `None`; anything else through `T`.
impl<T: FromWollok> FromWollok for Option<T> {
    fn from_wollok(evaluation: &Evaluation, value: Operand) -> Result<Self, ConvertError> {
        match value {
            Some(id) if id == NULL_ID => Ok(None),
            other => T::from_wollok(evaluation, other).map(Some),
        }
    }
}

impl<T: FromWollok> FromWollok for Vec<T> {
    fn from_wollok(evaluation: &Evaluation, value: Operand) -> Result<Self, ConvertError> {
        let elements = value
            .and_then(|id| evaluation.instance(id))
            .and_then(|object| object.elements().map(<[_]>::to_vec))
            .ok_or_else(|| ConvertError::new("a collection", evaluation, value))?;
        elements
            .into_iter()
            .map(|element| T::from_wollok(evaluation, Some(element)))
            .collect()
    }
}

impl IntoWollok for f64 {
    fn into_wollok(self, evaluation: &mut Evaluation) -> Operand {
        Some(evaluation.number(self))
    }
}

impl IntoWollok for i64 {
    fn into_wollok(self, evaluation: &mut Evaluation) -> Operand {
        Some(evaluation.number(self as f64))
    }
}

impl IntoWollok for bool {
    fn into_wollok(self, evaluation: &mut Evaluation) -> Operand {
        Some(evaluation.boolean(self))
    }
}

impl IntoWollok for &str {
    fn into_wollok(self, evaluation: &mut Evaluation) -> Operand {
        Some(evaluation.string(self))
    }
}

impl IntoWollok for String {
    fn into_wollok(self, evaluation: &mut Evaluation) -> Operand {
        Some(evaluation.string(&self))
    }
}

impl<T: IntoWollok> IntoWollok for Vec<T> {
    fn into_wollok(self, evaluation: &mut Evaluation) -> Operand {
        let elements = self
            .into_iter()
            .map(|element| {
                element
                    .into_wollok(evaluation)
                    .unwrap_or_else(|| evaluation.null())
            })
            .collect();
        Some(evaluation.list(elements))
    }
}
