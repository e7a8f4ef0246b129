use parley_core::tool::{Error as ToolError, Tool, ToolResult};
use reqwest::{Client, Url};
use schemars::{JsonSchema, schema_for};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::Instrument;

use super::execution_error;

const ALPHA_VANTAGE_URL: &str = "https://www.alphavantage.co/query";

#[derive(Deserialize, JsonSchema)]
pub struct StockPriceToolParameters {
    #[schemars(description = "The ticker symbol, e.g. `AAPL` or `TSLA`.")]
    symbol: String,
}

/// A quote as returned to the model.
#[derive(Debug, PartialEq, Serialize)]
struct Quote {
    symbol: String,
    price: String,
    open: String,
    high: String,
    low: String,
    volume: String,
    latest_trading_day: String,
    previous_close: String,
    change: String,
    change_percent: String,
}

/// A tool for looking up the latest price of a stock via Alpha Vantage.
pub struct StockPriceTool {
    client: Client,
    api_key: Option<String>,
    parameter_schema: Value,
}

impl StockPriceTool {
    /// Creates a new stock tool with the given Alpha Vantage key.
    #[inline]
    pub fn new(client: Client, api_key: Option<String>) -> Self {
        StockPriceTool {
            client,
            api_key,
            parameter_schema: schema_for!(StockPriceToolParameters).to_value(),
        }
    }
}

impl Tool for StockPriceTool {
    type Input = StockPriceToolParameters;

    fn name(&self) -> &str {
        "get_stock_price"
    }

    fn description(&self) -> &str {
        "Fetch latest stock price for a given symbol (e.g. 'AAPL', 'TSLA')."
    }

    fn parameter_schema(&self) -> &Value {
        &self.parameter_schema
    }

    fn execute(
        &self,
        input: StockPriceToolParameters,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        let client = self.client.clone();
        let api_key = self.api_key.clone();
        async move {
            let Some(api_key) = api_key else {
                return Err(ToolError::execution_error()
                    .with_reason("Alpha Vantage API key not found"));
            };
            let symbol = input.symbol.trim().to_uppercase();
            let url = Url::parse_with_params(
                ALPHA_VANTAGE_URL,
                &[
                    ("function", "GLOBAL_QUOTE"),
                    ("symbol", symbol.as_str()),
                    ("apikey", api_key.as_str()),
                ],
            )
            .map_err(execution_error)?;

            let body: Value = client
                .get(url)
                .send()
                .await
                .and_then(|resp| resp.error_for_status())
                .map_err(execution_error)?
                .json()
                .await
                .map_err(execution_error)?;

            let quote = parse_quote(&symbol, &body)
                .map_err(execution_error)?;
            serde_json::to_string(&quote)
                .map_err(execution_error)
        }
        .instrument(debug_span!("stock quote"))
    }
}

fn parse_quote(symbol: &str, body: &Value) -> Result<Quote, String> {
    // The API reports throttling and bad keys with a 200 status.
    for key in ["Error Message", "Note", "Information"] {
        if let Some(message) = body.get(key).and_then(Value::as_str) {
            return Err(message.to_owned());
        }
    }

    let quote = body
        .get("Global Quote")
        .and_then(Value::as_object)
        .filter(|quote| !quote.is_empty())
        .ok_or_else(|| format!("No quote found for symbol '{symbol}'"))?;
    let field = |name: &str| {
        quote
            .get(name)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned()
    };

    Ok(Quote {
        symbol: field("01. symbol"),
        open: field("02. open"),
        high: field("03. high"),
        low: field("04. low"),
        price: field("05. price"),
        volume: field("06. volume"),
        latest_trading_day: field("07. latest trading day"),
        previous_close: field("08. previous close"),
        change: field("09. change"),
        change_percent: field("10. change percent"),
    })
}
