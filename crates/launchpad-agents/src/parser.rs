use serde_json::{Deserializer, Value};

/// Parsed output of an external collaborator.
#[derive(Debug, Clone, PartialEq)]
pub enum RawAnswer {
    /// Output was the literal `null`: a valid answer with nothing to report.
    Null,
    Object(Value),
}

/// Interpret stdout as either `null` or the first JSON object found in it.
///
/// Commands may print a line of context before the object, e.g.
/// `Result: {"confidence": 0.8}`; anything that is not an object is ignored.
pub fn parse_answer(text: &str) -> Option<RawAnswer> {
    let trimmed = text.trim();
    if trimmed == "null" {
        return Some(RawAnswer::Null);
    }
    first_object(trimmed).map(RawAnswer::Object)
}

/// Try each `{` in turn and keep the first one that starts a complete object.
fn first_object(text: &str) -> Option<Value> {
    text.match_indices('{').find_map(|(start, _)| {
        let mut values = Deserializer::from_str(&text[start..]).into_iter::<Value>();
        match values.next() {
            Some(Ok(value @ Value::Object(_))) => Some(value),
            _ => None,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(text: &str) -> Value {
        match parse_answer(text) {
            Some(RawAnswer::Object(value)) => value,
            other => panic!("expected an object, got {other:?}"),
        }
    }

    #[test]
    fn clean_object() {
        assert_eq!(
            object(r#"{"lower": 0.95, "upper": 1.05}"#),
            json!({"lower": 0.95, "upper": 1.05})
        );
    }

    #[test]
    fn prefix_text_and_braces_in_strings() {
        let parsed = object(r#"reasoning follows {"reasoning": "range {a} to {b}", "confidence": 0.5}"#);
        assert_eq!(parsed["confidence"], 0.5);
        assert_eq!(parsed["reasoning"], "range {a} to {b}");
    }

    #[test]
    fn unbalanced_prefix_is_skipped() {
        assert_eq!(object(r#"} {partial {"ok": true}"#), json!({"ok": true}));
    }

    #[test]
    fn trailing_output_is_ignored() {
        assert_eq!(object("{\"ok\": true}\ndone in 12ms"), json!({"ok": true}));
    }

    #[test]
    fn null_is_a_valid_answer() {
        assert_eq!(parse_answer("null\n"), Some(RawAnswer::Null));
    }

    #[test]
    fn garbage_is_not_an_answer() {
        assert_eq!(parse_answer("(error: unknown predicate)"), None);
        assert_eq!(parse_answer("[1, 2, 3]"), None);
    }
}
