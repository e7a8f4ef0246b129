use std::future::ready;

use parley_core::tool::{Error as ToolError, Tool, ToolResult};
use schemars::{JsonSchema, schema_for};
use serde::Deserialize;
use serde_json::{Value, json};

#[derive(Deserialize, JsonSchema)]
pub struct CalculatorToolParameters {
    #[schemars(description = "The first operand.")]
    first_num: f64,
    #[schemars(description = "The second operand.")]
    second_num: f64,
    #[schemars(description = "One of `add`, `sub`, `mul` or `div`.")]
    operation: String,
}

/// A tool for basic arithmetic on two numbers.
pub struct CalculatorTool {
    parameter_schema: Value,
}

impl CalculatorTool {
    /// Creates a new calculator tool.
    #[inline]
    pub fn new() -> Self {
        CalculatorTool {
            parameter_schema: schema_for!(CalculatorToolParameters).to_value(),
        }
    }
}

impl Default for CalculatorTool {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

fn calculate(first_num: f64, second_num: f64, operation: &str) -> Result<f64, String> {
    let result = match operation {
        "add" => first_num + second_num,
        "sub" => first_num - second_num,
        "mul" => first_num * second_num,
        "div" if second_num == 0.0 => {
            return Err("Division by zero is not allowed".to_owned());
        }
        "div" => first_num / second_num,
        _ => return Err(format!("Unsupported operation '{operation}'")),
    };
    // JSON has no representation for infinities.
    if !result.is_finite() {
        return Err("The result is too large to represent".to_owned());
    }
    Ok(result)
}

impl Tool for CalculatorTool {
    type Input = CalculatorToolParameters;

    fn name(&self) -> &str {
        "calculator"
    }

    fn description(&self) -> &str {
        r#"
Perform a basic arithmetic operation on two numbers.
Supported operations: add, sub, mul, div"#
    }

    fn parameter_schema(&self) -> &Value {
        &self.parameter_schema
    }

    fn execute(
        &self,
        input: CalculatorToolParameters,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        let result = calculate(input.first_num, input.second_num, &input.operation)
            .map(|result| {
                json!({
                    "first_num": input.first_num,
                    "second_num": input.second_num,
                    "operation": input.operation,
                    "result": result,
                })
                .to_string()
            })
            .map_err(|reason| ToolError::execution_error().with_reason(reason));
        ready(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn run(first_num: f64, second_num: f64, operation: &str) -> ToolResult {
        CalculatorTool::new()
            .execute(CalculatorToolParameters {
                first_num,
                second_num,
                operation: operation.to_owned(),
            })
            .await
    }

    #[tokio::test]
    async fn test_operations() {
        let output: Value =
            serde_json::from_str(&run(6.0, 4.0, "mul").await.unwrap()).unwrap();
        assert_eq!(
            output,
            json!({
                "first_num": 6.0,
                "second_num": 4.0,
                "operation": "mul",
                "result": 24.0,
            })
        );
        assert_eq!(calculate(6.0, 4.0, "sub"), Ok(2.0));
        assert_eq!(calculate(1.0, 4.0, "div"), Ok(0.25));
    }

    #[tokio::test]
    async fn test_errors() {
        let err = run(1.0, 0.0, "div").await.unwrap_err();
        assert_eq!(err.reason(), "Division by zero is not allowed");

        let err = run(2.0, 3.0, "pow").await.unwrap_err();
        assert_eq!(err.reason(), "Unsupported operation 'pow'");

        let err = run(1e308, 10.0, "mul").await.unwrap_err();
        assert_eq!(err.reason(), "The result is too large to represent");
        assert!(calculate(f64::MAX, f64::MAX, "add").is_err());
    }

    #[test]
    fn test_schema() {
        let tool = CalculatorTool::new();
        let properties = &tool.parameter_schema()["properties"];
        assert!(properties["first_num"].is_object());
        assert!(properties["operation"]["description"].is_string());
    }
}
