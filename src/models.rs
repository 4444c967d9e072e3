//! Request and response envelope types.
//!
//! Every database action arrives as a request envelope (`name`, `method`,
//! optional `params` and `body`) and leaves as a uniform
//! [DbActionResponse], whatever handler dealt with it.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum_macros::Display;

use crate::error::{error_chain, ExptDbError};

/// Request methods supported by the handlers.
#[derive(Clone, Copy, Debug, Deserialize, Display, PartialEq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    /// Query records
    #[strum(serialize = "GET")]
    Get,
    /// Insert or upsert records
    #[strum(serialize = "PUT")]
    Put,
}

impl Method {
    /// Validate a raw method string.
    pub fn parse(method: &str) -> Result<Self, ExptDbError> {
        match method {
            "GET" => Ok(Method::Get),
            "PUT" => Ok(Method::Put),
            other => Err(ExptDbError::InvalidMethod {
                method: other.to_string(),
            }),
        }
    }
}

/// One requested ordering term.
///
/// The direction is kept as a raw string here; the ordering builder validates
/// it against the asc/desc vocabulary together with the column name.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct OrderSpec {
    /// Column to order by
    pub name: String,
    /// Direction, `asc` or `desc`
    pub order_by: String,
}

/// Common query parameters.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct RequestParams {
    /// Nested per-column filter mapping
    #[serde(default)]
    pub filters: Option<serde_json::Map<String, Value>>,
    /// Requested result ordering
    #[serde(default)]
    pub ordering: Option<Vec<OrderSpec>>,
    /// Cap on returned rows; non-positive values are ignored
    #[serde(default)]
    pub record_limit: Option<i64>,
    /// Region GET filter mode (`none`, `by_name`, `by_data`)
    #[serde(default)]
    pub filter_type: Option<String>,
    /// strftime format for datetime values in the filters
    #[serde(default)]
    pub datestr_format: Option<String>,
}

impl RequestParams {
    /// The record limit, with non-positive values treated as absent.
    pub fn effective_limit(&self) -> Option<i64> {
        self.record_limit.filter(|limit| *limit > 0)
    }
}

/// A parsed request envelope.
#[derive(Clone, Debug, Deserialize)]
pub struct Request {
    /// Registered handler name
    pub name: String,
    /// Request method, validated per handler
    pub method: String,
    #[serde(default)]
    pub params: Option<RequestParams>,
    #[serde(default)]
    pub body: Option<Value>,
}

impl Request {
    /// Parse an envelope out of a raw request value.
    pub fn from_value(value: &Value) -> Result<Self, ExptDbError> {
        Ok(serde_json::from_value(value.clone())?)
    }

    /// The validated request method.
    pub fn method(&self) -> Result<Method, ExptDbError> {
        Method::parse(&self.method)
    }

    /// The request body, which this handler requires.
    pub fn required_body(&self) -> Result<&Value, ExptDbError> {
        self.body
            .as_ref()
            .ok_or(ExptDbError::MissingField { field: "body" })
    }

    /// The request params, defaulted when absent.
    pub fn params(&self) -> RequestParams {
        self.params.clone().unwrap_or_default()
    }
}

/// Action taken by a PUT against an upsert constraint.
#[derive(Clone, Copy, Debug, Deserialize, Display, PartialEq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PutAction {
    #[strum(serialize = "INSERT")]
    Insert,
    #[strum(serialize = "UPDATE")]
    Update,
}

/// Result payload carried inside a response.
#[derive(Debug, Default, Serialize)]
pub struct ResponseDetails {
    /// Number of records returned by a GET
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_count: Option<usize>,
    /// Records returned by a GET
    #[serde(skip_serializing_if = "Option::is_none")]
    pub records: Option<Value>,
    /// Whether a PUT inserted or updated
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<PutAction>,
    /// Primary key affected by a PUT
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    /// Regions newly inserted by a region PUT
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inserted_records: Option<Value>,
    /// All regions matching a region request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_records: Option<Value>,
}

impl ResponseDetails {
    /// Details for a tabular GET result.
    pub fn for_records<T: Serialize>(rows: &[T]) -> Result<Self, ExptDbError> {
        Ok(ResponseDetails {
            record_count: Some(rows.len()),
            records: if rows.is_empty() {
                None
            } else {
                Some(serde_json::to_value(rows)?)
            },
            ..Default::default()
        })
    }

    /// Details for an upsert PUT result.
    pub fn for_action(action: PutAction, id: i64) -> Self {
        ResponseDetails {
            action: Some(action),
            id: Some(id),
            ..Default::default()
        }
    }
}

/// The uniform response envelope returned by every handler.
#[derive(Debug, Serialize)]
pub struct DbActionResponse {
    /// The request that produced this response
    pub request: Value,
    /// Whether the action succeeded
    pub success: bool,
    /// Human-readable outcome summary
    pub message: String,
    /// Result payload, absent on failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<ResponseDetails>,
    /// Failure description, absent on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<String>,
}

impl DbActionResponse {
    /// Return a success response.
    pub fn ok(request: Value, message: &str, details: ResponseDetails) -> Self {
        DbActionResponse {
            request,
            success: true,
            message: message.to_string(),
            details: Some(details),
            errors: None,
        }
    }

    /// Return a failure response carrying the error chain.
    pub fn failed(request: Value, message: &str, error: &ExptDbError) -> Self {
        DbActionResponse {
            request,
            success: false,
            message: message.to_string(),
            details: None,
            errors: Some(error_chain(error)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_valid_methods() {
        assert_eq!(Method::Get, Method::parse("GET").unwrap());
        assert_eq!(Method::Put, Method::parse("PUT").unwrap());
    }

    #[test]
    fn parse_invalid_method() {
        let result = Method::parse("DELETE");
        assert!(matches!(result, Err(ExptDbError::InvalidMethod { method }) if method == "DELETE"));
    }

    #[test]
    fn method_display() {
        assert_eq!("GET", Method::Get.to_string());
        assert_eq!("PUT", Method::Put.to_string());
    }

    #[test]
    fn request_from_value() {
        let value = json!({
            "name": "experiment",
            "method": "GET",
            "params": {
                "filters": {"name": {"exact": "expt_one"}},
                "ordering": [{"name": "group_id", "order_by": "desc"}],
                "record_limit": 10
            }
        });
        let request = Request::from_value(&value).unwrap();
        assert_eq!("experiment", request.name);
        assert_eq!(Method::Get, request.method().unwrap());
        let params = request.params();
        assert_eq!(Some(10), params.effective_limit());
        assert_eq!(
            vec![OrderSpec {
                name: "group_id".to_string(),
                order_by: "desc".to_string()
            }],
            params.ordering.unwrap()
        );
    }

    #[test]
    fn non_positive_record_limit_is_ignored() {
        let params = RequestParams {
            record_limit: Some(0),
            ..Default::default()
        };
        assert_eq!(None, params.effective_limit());
        let params = RequestParams {
            record_limit: Some(-3),
            ..Default::default()
        };
        assert_eq!(None, params.effective_limit());
    }

    #[test]
    fn missing_body_is_an_error() {
        let value = json!({"name": "region", "method": "PUT"});
        let request = Request::from_value(&value).unwrap();
        assert!(matches!(
            request.required_body(),
            Err(ExptDbError::MissingField { field: "body" })
        ));
    }

    #[test]
    fn failure_response_shape() {
        let request = json!({"name": "experiment", "method": "GET"});
        let error = ExptDbError::UnknownRequest {
            name: "bogus".to_string(),
        };
        let response = DbActionResponse::failed(request, "Failed experiment request.", &error);
        assert!(!response.success);
        assert!(response.details.is_none());
        assert_eq!(
            Some("no registered handler for request bogus".to_string()),
            response.errors
        );
    }

    #[test]
    fn details_omit_empty_records() {
        let rows: Vec<serde_json::Value> = vec![];
        let details = ResponseDetails::for_records(&rows).unwrap();
        assert_eq!(Some(0), details.record_count);
        assert!(details.records.is_none());
    }
}
