// =============================================================================
// Model-output parsing
// =============================================================================
//
// Extracts a single JSON object describing a trade decision out of raw model
// text, tolerating fenced code blocks and prose wrapped around the object.
// No teacher equivalent — grounded on the structured-reply extraction idiom
// in other_examples' agent-protocol parsing (hunting for the first balanced
// `{...}` span rather than assuming the whole reply is JSON).

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::decision::Action;
use rust_decimal::Decimal;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("no JSON object found in model output")]
    NoJsonFound,
    #[error("JSON object did not match the expected decision schema: {0}")]
    SchemaMismatch(String),
}

#[derive(Debug, Deserialize)]
struct RawDecision {
    action: String,
    symbol: Option<String>,
    #[serde(rename = "quantityUsd")]
    quantity_usd: Option<Decimal>,
    leverage: Option<u32>,
    #[serde(rename = "stopLossPct")]
    stop_loss_pct: Option<Decimal>,
    #[serde(rename = "takeProfitPct")]
    take_profit_pct: Option<Decimal>,
    reasoning: Option<String>,
    confidence: Option<f64>,
    strategy: Option<String>,
}

pub struct ParsedDecision {
    pub action: Action,
    pub symbol: Option<String>,
    pub quantity_usd: Option<Decimal>,
    pub leverage: Option<u32>,
    pub stop_loss_pct: Option<Decimal>,
    pub take_profit_pct: Option<Decimal>,
    pub reasoning: String,
    pub confidence: Option<f64>,
    pub strategy: Option<String>,
}

/// Find the first balanced `{...}` span in `text` and return its contents,
/// tolerating it being wrapped in markdown fences or surrounded by prose.
fn find_json_object(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let start = text.find('{')?;
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escape {
                escape = false;
            } else if b == b'\\' {
                escape = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

pub fn extract_decision_json(raw: &str) -> Result<ParsedDecision, ParseError> {
    let object_text = find_json_object(raw).ok_or(ParseError::NoJsonFound)?;

    let value: Value = serde_json::from_str(object_text)
        .map_err(|e| ParseError::SchemaMismatch(format!("invalid JSON: {e}")))?;

    let raw_decision: RawDecision = serde_json::from_value(value)
        .map_err(|e| ParseError::SchemaMismatch(e.to_string()))?;

    let action = match raw_decision.action.to_uppercase().as_str() {
        "BUY" => Action::Buy,
        "SELL" => Action::Sell,
        "CLOSE" => Action::Close,
        "HOLD" => Action::Hold,
        other => {
            return Err(ParseError::SchemaMismatch(format!(
                "unknown action '{other}'"
            )))
        }
    };

    if matches!(action, Action::Buy | Action::Sell) && raw_decision.symbol.is_none() {
        return Err(ParseError::SchemaMismatch(
            "BUY/SELL requires a symbol".to_string(),
        ));
    }
    if matches!(action, Action::Close) && raw_decision.symbol.is_none() {
        return Err(ParseError::SchemaMismatch(
            "CLOSE requires a symbol".to_string(),
        ));
    }

    Ok(ParsedDecision {
        action,
        symbol: raw_decision.symbol,
        quantity_usd: raw_decision.quantity_usd,
        leverage: raw_decision.leverage,
        stop_loss_pct: raw_decision.stop_loss_pct,
        take_profit_pct: raw_decision.take_profit_pct,
        reasoning: raw_decision.reasoning.unwrap_or_default(),
        confidence: raw_decision.confidence,
        strategy: raw_decision.strategy,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_bare_json() {
        let raw = r#"{"action": "HOLD", "reasoning": "nothing interesting"}"#;
        let parsed = extract_decision_json(raw).unwrap();
        assert_eq!(parsed.action, Action::Hold);
    }

    #[test]
    fn extracts_fenced_json_with_prose() {
        let raw = "Here is my decision:\n```json\n{\"action\": \"BUY\", \"symbol\": \"BTCUSDT\", \"quantityUsd\": 100, \"leverage\": 3, \"reasoning\": \"momentum\"}\n```\nLet me know if you need more.";
        let parsed = extract_decision_json(raw).unwrap();
        assert_eq!(parsed.action, Action::Buy);
        assert_eq!(parsed.symbol.as_deref(), Some("BTCUSDT"));
        assert_eq!(parsed.leverage, Some(3));
    }

    #[test]
    fn no_json_found() {
        let raw = "I don't think we should trade right now.";
        assert_eq!(extract_decision_json(raw), Err(ParseError::NoJsonFound));
    }

    #[test]
    fn buy_without_symbol_is_schema_mismatch() {
        let raw = r#"{"action": "BUY", "quantityUsd": 50}"#;
        assert!(matches!(
            extract_decision_json(raw),
            Err(ParseError::SchemaMismatch(_))
        ));
    }

    #[test]
    fn unknown_action_is_schema_mismatch() {
        let raw = r#"{"action": "SHORT_SQUEEZE"}"#;
        assert!(matches!(
            extract_decision_json(raw),
            Err(ParseError::SchemaMismatch(_))
        ));
    }

    #[test]
    fn nested_braces_in_reasoning_do_not_break_scan() {
        let raw = r#"{"action": "HOLD", "reasoning": "the {curly} set up isn't there"}"#;
        let parsed = extract_decision_json(raw).unwrap();
        assert_eq!(parsed.action, Action::Hold);
    }
}
