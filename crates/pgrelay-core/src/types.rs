use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One result row, keyed by column name.
pub type Row = Map<String, Value>;

/// Request payload carried by a frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Vec<Value>>,
    /// Overrides the proxy's default backend address for this request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl Message {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            params: None,
            address: None,
        }
    }

    pub fn with_params(mut self, params: Vec<Value>) -> Self {
        self.params = Some(params);
        self
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn params(&self) -> &[Value] {
        self.params.as_deref().unwrap_or(&[])
    }

    /// Params must be JSON scalars; arrays and objects are rejected.
    pub fn validate_params(&self) -> Result<(), String> {
        for (idx, param) in self.params().iter().enumerate() {
            if param.is_array() || param.is_object() {
                return Err(format!("parameter ${} is not a scalar", idx + 1));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct QueryResult {
    #[serde(rename = "rowCount")]
    pub row_count: u64,
    pub rows: Vec<Row>,
}

impl QueryResult {
    pub fn from_rows(rows: Vec<Row>) -> Self {
        Self {
            row_count: rows.len() as u64,
            rows,
        }
    }
}

/// Response payload: exactly one of the two shapes per frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Response {
    Rows(QueryResult),
    Error { error: String },
}

impl Response {
    pub fn error(message: impl Into<String>) -> Self {
        Response::Error {
            error: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Response::Error { .. })
    }

    pub fn into_result(self) -> Result<QueryResult, String> {
        match self {
            Response::Rows(result) => Ok(result),
            Response::Error { error } => Err(error),
        }
    }
}

impl From<QueryResult> for Response {
    fn from(result: QueryResult) -> Self {
        Response::Rows(result)
    }
}

#[cfg(test)]
mod tests {
    use super::{Message, QueryResult, Response};
    use serde_json::json;

    #[test]
    fn message_skips_absent_fields() {
        let encoded = serde_json::to_string(&Message::new("select 1")).expect("encode");
        assert_eq!(encoded, r#"{"query":"select 1"}"#);
    }

    #[test]
    fn message_accepts_null_params() {
        let msg: Message =
            serde_json::from_str(r#"{"query":"select 1","params":null}"#).expect("decode");
        assert!(msg.params().is_empty());
    }

    #[test]
    fn nested_params_are_rejected() {
        let msg = Message::new("select $1").with_params(vec![json!([1, 2])]);
        assert!(msg.validate_params().is_err());
        let msg = Message::new("select $1").with_params(vec![json!(1), json!("a"), json!(null)]);
        assert!(msg.validate_params().is_ok());
    }

    #[test]
    fn response_shapes() {
        let rows: Response =
            serde_json::from_value(json!({"rowCount": 1, "rows": [{"current_user": "test"}]}))
                .expect("rows");
        match rows {
            Response::Rows(QueryResult { row_count, rows }) => {
                assert_eq!(row_count, 1);
                assert_eq!(rows[0]["current_user"], json!("test"));
            }
            other => panic!("unexpected response {other:?}"),
        }
        let err: Response = serde_json::from_value(json!({"error": "boom"})).expect("error");
        assert_eq!(err, Response::error("boom"));
        assert_eq!(
            serde_json::to_value(Response::error("boom")).expect("encode"),
            json!({"error": "boom"})
        );
    }
}
