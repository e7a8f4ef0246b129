use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use parley_model::{ModelTool, ToolCallRequest, ToolCallResult};
use serde_json::json;
use tracing::Instrument;

use crate::tool::{Error, ToolObject, ToolResult};

/// An executor that handles tool call requests from the model.
pub struct Executor {
    tools: HashMap<String, Arc<dyn ToolObject>>,
    timeout: Option<Duration>,
}

impl Executor {
    pub fn with_tools(
        tools: Vec<Arc<dyn ToolObject>>,
        timeout: Option<Duration>,
    ) -> Self {
        let mut tool_map = HashMap::with_capacity(tools.len());
        for tool in tools {
            let name = tool.name();
            tool_map.insert(name.to_owned(), tool);
        }
        let tools = tool_map;
        Self { tools, timeout }
    }

    /// Returns the definitions of all tools, sorted by name.
    pub fn definitions(&self) -> Vec<ModelTool> {
        let mut definitions: Vec<_> = self
            .tools
            .values()
            .map(|tool| ModelTool {
                name: tool.name().to_owned(),
                description: tool.description().trim().to_owned(),
                parameters: tool.parameter_schema().clone(),
            })
            .collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        definitions
    }

    /// Runs all requests concurrently.
    ///
    /// Exactly one result is returned for each request, in request order.
    /// Failures are reported in the result content.
    pub async fn run(&self, requests: Vec<ToolCallRequest>) -> Vec<ToolCallResult> {
        let calls = requests.into_iter().map(|req| self.run_one(req));
        join_all(calls).instrument(debug_span!("tool executor")).await
    }

    async fn run_one(&self, req: ToolCallRequest) -> ToolCallResult {
        let ToolCallRequest {
            id,
            name,
            arguments,
        } = req;

        let result = match self.tools.get(&name) {
            Some(tool) => {
                trace!("running a tool ({id}) with args: {arguments:?}");
                self.execute(&name, tool.execute(arguments)).await
            }
            None => {
                warn!("tool not found: {name}");
                Err(Error::not_found()
                    .with_reason(format!("{name} is not a valid tool")))
            }
        };

        let content = match result {
            Ok(content) => content,
            Err(err) => {
                debug!("tool {name} ({id}) failed: {err}");
                json!({ "error": err.reason() }).to_string()
            }
        };
        ToolCallResult { id, name, content }
    }

    async fn execute(
        &self,
        name: &str,
        fut: impl Future<Output = ToolResult>,
    ) -> ToolResult {
        let Some(timeout) = self.timeout else {
            return fut.await;
        };
        match tokio::time::timeout(timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::timed_out().with_reason(format!(
                "{name} did not finish within {} seconds",
                timeout.as_secs_f64()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::future::ready;

    use serde::Deserialize;
    use serde_json::{Value, json};

    use super::*;
    use crate::tool::{AnyTool, Tool};

    static EMPTY_SCHEMA: &Value = &Value::Null;

    #[derive(Deserialize)]
    struct EchoInput {
        text: String,
    }

    struct EchoTool;

    impl Tool for EchoTool {
        type Input = EchoInput;

        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echoes the input"
        }

        fn parameter_schema(&self) -> &Value {
            EMPTY_SCHEMA
        }

        fn execute(
            &self,
            input: Self::Input,
        ) -> impl Future<Output = ToolResult> + Send + 'static {
            ready(Ok(input.text))
        }
    }

    struct SlowTool;

    impl Tool for SlowTool {
        type Input = Value;

        fn name(&self) -> &str {
            "slow"
        }

        fn description(&self) -> &str {
            "Never finishes in time"
        }

        fn parameter_schema(&self) -> &Value {
            EMPTY_SCHEMA
        }

        fn execute(
            &self,
            _input: Self::Input,
        ) -> impl Future<Output = ToolResult> + Send + 'static {
            async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok("done".to_owned())
            }
        }
    }

    fn request(id: &str, name: &str, arguments: Value) -> ToolCallRequest {
        ToolCallRequest {
            id: id.to_owned(),
            name: name.to_owned(),
            arguments,
        }
    }

    #[tokio::test]
    async fn test_run() {
        let executor = Executor::with_tools(
            vec![Arc::new(AnyTool(EchoTool)), Arc::new(AnyTool(SlowTool))],
            None,
        );
        let names: Vec<_> =
            executor.definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names, ["echo", "slow"]);

        let results = executor
            .run(vec![
                request("1", "echo", json!({ "text": "first" })),
                request("2", "read_file", json!({})),
                request("3", "echo", json!({ "message": "oops" })),
                request("4", "echo", json!({ "text": "last" })),
            ])
            .await;

        let ids: Vec<_> = results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["1", "2", "3", "4"]);
        assert_eq!(results[0].content, "first");
        assert_eq!(
            results[1].content,
            json!({ "error": "read_file is not a valid tool" }).to_string()
        );
        let error: Value = serde_json::from_str(&results[2].content).unwrap();
        assert!(
            error["error"]
                .as_str()
                .unwrap()
                .starts_with("Invalid arguments")
        );
        assert_eq!(results[3].content, "last");
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout() {
        let executor = Executor::with_tools(
            vec![Arc::new(AnyTool(SlowTool))],
            Some(Duration::from_secs(5)),
        );
        let results = executor.run(vec![request("1", "slow", json!({}))]).await;
        assert_eq!(
            results[0].content,
            json!({ "error": "slow did not finish within 5 seconds" })
                .to_string()
        );
    }
}
