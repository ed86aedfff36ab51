// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Display helpers registered as SQL scalar functions
//!
//! - `to_size(bytes)`: `10240` → `10Ki`
//! - `to_age(seconds)`: `129600` → `1d12h`
//! - `to_utc(seconds)`: `1609459200` → `2021-01-01T00:00:00Z`

use std::any::Any;
use std::sync::Arc;

use datafusion::arrow::array::{ArrayRef, StringArray};
use datafusion::arrow::datatypes::DataType;
use datafusion::common::ScalarValue;
use datafusion::common::cast::as_int64_array;
use datafusion::error::{DataFusionError, Result as DFResult};
use datafusion::logical_expr::{
    ColumnarValue, ScalarFunctionArgs, ScalarUDF, ScalarUDFImpl, Signature, Volatility,
};
use datafusion::prelude::SessionContext;

use crate::extract::{format_age, format_size, format_utc};

/// Which rendering a function applies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Format {
    Size,
    Age,
    Utc,
}

impl Format {
    fn apply(self, value: i64) -> Option<String> {
        match self {
            Format::Size => Some(format_size(value)),
            Format::Age => Some(format_age(value)),
            Format::Utc => format_utc(value),
        }
    }
}

/// An integer-to-text formatting function
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct FormatFunction {
    name: &'static str,
    signature: Signature,
    format: Format,
}

impl FormatFunction {
    fn new(name: &'static str, format: Format) -> Self {
        Self {
            name,
            signature: Signature::uniform(1, vec![DataType::Int64], Volatility::Immutable),
            format,
        }
    }
}

impl ScalarUDFImpl for FormatFunction {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn name(&self) -> &str {
        self.name
    }

    fn signature(&self) -> &Signature {
        &self.signature
    }

    fn return_type(&self, _args: &[DataType]) -> DFResult<DataType> {
        Ok(DataType::Utf8)
    }

    fn invoke_with_args(&self, args: ScalarFunctionArgs) -> DFResult<ColumnarValue> {
        let [arg] = args.args.as_slice() else {
            return Err(DataFusionError::Plan(format!(
                "{}() takes exactly one argument",
                self.name
            )));
        };

        match arg {
            ColumnarValue::Scalar(ScalarValue::Int64(value)) => Ok(ColumnarValue::Scalar(
                ScalarValue::Utf8(value.and_then(|v| self.format.apply(v))),
            )),
            ColumnarValue::Scalar(ScalarValue::Null) => {
                Ok(ColumnarValue::Scalar(ScalarValue::Utf8(None)))
            }
            ColumnarValue::Scalar(other) => Err(DataFusionError::Execution(format!(
                "{}() expects an integer, got {}",
                self.name,
                other.data_type()
            ))),
            ColumnarValue::Array(array) => {
                let values = as_int64_array(array)?;
                let formatted: StringArray = values
                    .iter()
                    .map(|v| v.and_then(|v| self.format.apply(v)))
                    .collect();
                Ok(ColumnarValue::Array(Arc::new(formatted) as ArrayRef))
            }
        }
    }
}

/// All helper functions
pub fn helper_functions() -> Vec<ScalarUDF> {
    vec![
        ScalarUDF::new_from_impl(FormatFunction::new("to_size", Format::Size)),
        ScalarUDF::new_from_impl(FormatFunction::new("to_age", Format::Age)),
        ScalarUDF::new_from_impl(FormatFunction::new("to_utc", Format::Utc)),
    ]
}

/// Register the helper functions with a session
pub fn register_helpers(ctx: &SessionContext) {
    for udf in helper_functions() {
        ctx.register_udf(udf);
    }
}
