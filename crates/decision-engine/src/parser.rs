use serde_json::Value;
use trading_core::Decision;

use crate::error::{EngineError, EngineResult};

/// Locate the longest substring of `text` that parses as a JSON array.
///
/// Models wrap their decision array in chain-of-thought prose; bracket
/// matching respects string literals and escapes so prose brackets do not
/// confuse the scan. Returns the byte range of the winning candidate.
pub fn extract_json_array(text: &str) -> Option<(usize, usize)> {
    let bytes = text.as_bytes();
    let mut best: Option<(usize, usize)> = None;

    for start in 0..bytes.len() {
        if bytes[start] != b'[' {
            continue;
        }
        if let Some(end) = matching_bracket(bytes, start) {
            let candidate = &text[start..=end];
            if serde_json::from_str::<Vec<Value>>(candidate).is_ok() {
                let longer = match best {
                    Some((s, e)) => end - start > e - s,
                    None => true,
                };
                if longer {
                    best = Some((start, end));
                }
            }
        }
    }
    best
}

/// Index of the `]` matching the `[` at `start`, or None if unbalanced.
fn matching_bracket(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'[' => depth += 1,
            b']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse a raw model reply into decisions plus the surrounding
/// chain-of-thought prose.
///
/// The whole reply fails when no valid array exists, the array is empty, or
/// any element does not fit the decision schema (unknown actions included);
/// the caller downgrades the cycle to wait.
pub fn parse_decisions(text: &str) -> EngineResult<(Vec<Decision>, String)> {
    let (start, end) = extract_json_array(text)
        .ok_or_else(|| EngineError::Parse("no JSON array found in response".to_string()))?;

    let elements: Vec<Value> = serde_json::from_str(&text[start..=end])
        .map_err(|e| EngineError::Parse(e.to_string()))?;
    if elements.is_empty() {
        return Err(EngineError::Parse("decision array is empty".to_string()));
    }

    let mut decisions = Vec::with_capacity(elements.len());
    for element in elements {
        let decision: Decision = serde_json::from_value(element)
            .map_err(|e| EngineError::Parse(format!("invalid decision: {e}")))?;
        decisions.push(decision);
    }

    let mut cot = String::with_capacity(text.len());
    cot.push_str(text[..start].trim());
    let tail = text[end + 1..].trim();
    if !tail.is_empty() {
        if !cot.is_empty() {
            cot.push('\n');
        }
        cot.push_str(tail);
    }

    Ok((decisions, cot))
}

#[cfg(test)]
mod tests {
    use trading_core::TradeAction;

    use super::*;

    #[test]
    fn extracts_array_embedded_in_prose() {
        let text = r#"The market looks weak [1] so I will wait.
[{"symbol":"ALL","action":"wait","reasoning":"no setup"}]
That is my final answer."#;

        let (decisions, cot) = parse_decisions(text).unwrap();
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].symbol, "ALL");
        assert_eq!(decisions[0].action, TradeAction::Wait);
        assert!(cot.contains("market looks weak"));
        assert!(cot.contains("final answer"));
        assert!(!cot.contains("\"action\""));
    }

    #[test]
    fn picks_the_longest_valid_array() {
        let text = r#"Options considered: [1, 2, 3].
Decisions: [{"symbol":"BTCUSDT","action":"open_long","quantity":0.1,"leverage":5,"confidence":80,"reasoning":"breakout"}]"#;

        let (decisions, _) = parse_decisions(text).unwrap();
        assert_eq!(decisions[0].symbol, "BTCUSDT");
        assert_eq!(decisions[0].action, TradeAction::OpenLong);
        assert_eq!(decisions[0].confidence, 80.0);
    }

    #[test]
    fn brackets_inside_strings_do_not_break_matching() {
        let text = r#"[{"symbol":"BTCUSDT","action":"hold","reasoning":"range [19k, 21k] intact"}]"#;
        let (decisions, cot) = parse_decisions(text).unwrap();
        assert_eq!(decisions[0].reasoning, "range [19k, 21k] intact");
        assert!(cot.is_empty());
    }

    #[test]
    fn unknown_action_fails_the_parse() {
        let text = r#"[{"symbol":"BTCUSDT","action":"yolo_long"}]"#;
        let err = parse_decisions(text).unwrap_err();
        assert!(matches!(err, EngineError::Parse(_)));
    }

    #[test]
    fn empty_array_fails_the_parse() {
        assert!(parse_decisions("[]").is_err());
    }

    #[test]
    fn no_array_fails_the_parse() {
        assert!(parse_decisions("I cannot decide right now.").is_err());
    }

    #[test]
    fn missing_numeric_fields_default_to_zero() {
        let text = r#"[{"symbol":"ETHUSDT","action":"open_short"}]"#;
        let (decisions, _) = parse_decisions(text).unwrap();
        assert_eq!(decisions[0].quantity, 0.0);
        assert_eq!(decisions[0].leverage, 0.0);
        assert_eq!(decisions[0].take_profit, 0.0);
        assert_eq!(decisions[0].stop_loss, 0.0);
        assert_eq!(decisions[0].confidence, 0.0);
        assert_eq!(decisions[0].reasoning, "");
    }
}
