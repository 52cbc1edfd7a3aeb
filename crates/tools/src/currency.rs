//! Currency conversion at the latest ECB reference rates (Frankfurter API).

use async_trait::async_trait;
use jarvis_core::error::ToolError;
use jarvis_core::tool::Tool;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::{http_client, required_str};

const RATES_URL: &str = "https://api.frankfurter.app/latest";

pub struct CurrencyTool {
    client: reqwest::Client,
    rates_url: String,
}

impl CurrencyTool {
    pub fn new() -> Self {
        Self::with_endpoint(RATES_URL)
    }

    pub fn with_endpoint(rates_url: impl Into<String>) -> Self {
        Self {
            client: http_client(),
            rates_url: rates_url.into(),
        }
    }

    fn failed(&self, reason: impl Into<String>) -> ToolError {
        ToolError::ExecutionFailed {
            tool_name: "currency_convert".into(),
            reason: reason.into(),
        }
    }
}

impl Default for CurrencyTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for CurrencyTool {
    fn name(&self) -> &str {
        "currency_convert"
    }

    fn description(&self) -> &str {
        "Convert an amount from one currency to another using current exchange rates."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "amount": { "type": "number", "description": "Amount to convert" },
                "from_currency": { "type": "string", "description": "Source currency code, e.g. 'USD'" },
                "to_currency": { "type": "string", "description": "Target currency code, e.g. 'JPY'" }
            },
            "required": ["amount", "from_currency", "to_currency"]
        })
    }

    async fn execute(&self, arguments: Map<String, Value>) -> Result<String, ToolError> {
        let amount = parse_amount(arguments.get("amount"))?;
        let from = currency_code(required_str(&arguments, "from_currency")?)?;
        let to = currency_code(required_str(&arguments, "to_currency")?)?;

        if from == to {
            return Ok(format_conversion(amount, &from, amount, &to));
        }

        let response = self
            .client
            .get(&self.rates_url)
            .query(&[("from", from.as_str()), ("to", to.as_str())])
            .send()
            .await
            .map_err(|e| self.failed(format!("exchange rate service unreachable: {e}")))?;
        if !response.status().is_success() {
            return Err(self.failed(format!("No exchange rate from {from} to {to}.")));
        }
        let rates: RatesResponse = response
            .json()
            .await
            .map_err(|e| self.failed(format!("unexpected exchange rate response: {e}")))?;
        let rate = rates
            .rates
            .get(&to)
            .copied()
            .ok_or_else(|| self.failed(format!("No exchange rate from {from} to {to}.")))?;

        Ok(format_conversion(amount, &from, amount * rate, &to))
    }
}

#[derive(Debug, Deserialize)]
struct RatesResponse {
    #[serde(default)]
    rates: HashMap<String, f64>,
}

/// Amounts may arrive as numbers or numeric strings.
fn parse_amount(value: Option<&Value>) -> Result<f64, ToolError> {
    let amount = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    };
    amount
        .filter(|a| a.is_finite())
        .ok_or_else(|| ToolError::InvalidArguments("'amount' must be a number".into()))
}

fn currency_code(raw: &str) -> Result<String, ToolError> {
    let code = raw.trim().to_ascii_uppercase();
    if code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic()) {
        Ok(code)
    } else {
        Err(ToolError::InvalidArguments(format!(
            "'{raw}' is not a three-letter currency code"
        )))
    }
}

fn format_conversion(amount: f64, from: &str, converted: f64, to: &str) -> String {
    format!("{amount} {from} = {converted:.2} {to}")
}
