use crate::error::EngineError;
use serde::Serialize;
use serde_json::Value;

/// Create a success envelope with data
pub fn ok<T: Serialize>(data: T) -> Value {
    serde_json::json!({
        "ok": true,
        "data": data
    })
}

/// Create a failure envelope carrying the tagged error
pub fn err(error: &EngineError) -> Value {
    serde_json::json!({
        "ok": false,
        "error": {
            "code": error.code(),
            "message": error.to_string()
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_envelope_shape() {
        let envelope = err(&EngineError::Validation("name is required".into()));
        assert_eq!(envelope["ok"], false);
        assert_eq!(envelope["error"]["code"], "VALIDATION_ERROR");
        assert_eq!(envelope["error"]["message"], "name is required");
    }

    #[test]
    fn test_ok_envelope_shape() {
        let envelope = ok(serde_json::json!({"id": "flow_1"}));
        assert_eq!(envelope["ok"], true);
        assert_eq!(envelope["data"]["id"], "flow_1");
    }
}
