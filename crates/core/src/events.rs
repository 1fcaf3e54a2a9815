use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use thiserror::Error;

/// Opaque cell value as delivered by the backend.
pub type Scalar = Value;

pub const SCHEMA_MSG_TYPE: &str = "bpftrace_output";
pub const ERROR_MSG_TYPE: &str = "bpftrace_error";
pub const RESULTS_MSG_TYPE: &str = "bpftrace_results";

const DISCRIMINATOR: &str = "msg_type";
const ENVELOPE_DATA: &str = "data";

#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    SchemaAndSummary {
        output_text: String,
        headers: Vec<String>,
    },
    Error {
        message: String,
    },
    ResultRows {
        rows: Vec<Vec<Scalar>>,
    },
    Unknown {
        msg_type: String,
    },
}

impl ServerEvent {
    #[must_use]
    pub fn msg_type(&self) -> &str {
        match self {
            Self::SchemaAndSummary { .. } => SCHEMA_MSG_TYPE,
            Self::Error { .. } => ERROR_MSG_TYPE,
            Self::ResultRows { .. } => RESULTS_MSG_TYPE,
            Self::Unknown { msg_type } => msg_type,
        }
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("message is not valid JSON: {0}")]
    Json(#[source] serde_json::Error),
    #[error("message is not a JSON object")]
    NotAnObject,
    #[error("message has no string `msg_type` discriminator")]
    MissingDiscriminator,
    #[error("malformed `{msg_type}` payload: {source}")]
    MalformedPayload {
        msg_type: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Deserialize)]
struct SchemaPayload {
    #[serde(default, alias = "outputText")]
    output: String,
    headers: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorPayload {
    error_message: String,
}

#[derive(Debug, Deserialize)]
struct ResultsPayload {
    results: Vec<Vec<Scalar>>,
}

/// Outgoing query submission. The wire form is the raw query text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRequest {
    text: String,
}

impl QueryRequest {
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    #[must_use]
    pub fn wire_text(&self) -> &str {
        &self.text
    }
}

/// Classifies one inbound message by its `msg_type` discriminator.
///
/// Payload fields are read from the top-level object, or from a nested
/// `data` object when the server wraps them in a `{type, data}` envelope.
/// Unrecognized discriminators decode to [`ServerEvent::Unknown`]; only
/// structurally broken messages are errors.
pub fn decode_event(text: &str) -> Result<ServerEvent, DecodeError> {
    let value: Value = serde_json::from_str(text).map_err(DecodeError::Json)?;
    let Value::Object(object) = value else {
        return Err(DecodeError::NotAnObject);
    };

    let msg_type = match object.get(DISCRIMINATOR) {
        Some(Value::String(msg_type)) => msg_type.clone(),
        _ => return Err(DecodeError::MissingDiscriminator),
    };

    match msg_type.as_str() {
        SCHEMA_MSG_TYPE => {
            let payload: SchemaPayload = parse_payload(&msg_type, object)?;
            Ok(ServerEvent::SchemaAndSummary {
                output_text: payload.output,
                headers: payload.headers,
            })
        }
        ERROR_MSG_TYPE => {
            let payload: ErrorPayload = parse_payload(&msg_type, object)?;
            Ok(ServerEvent::Error {
                message: payload.error_message,
            })
        }
        RESULTS_MSG_TYPE => {
            let payload: ResultsPayload = parse_payload(&msg_type, object)?;
            Ok(ServerEvent::ResultRows {
                rows: payload.results,
            })
        }
        _ => Ok(ServerEvent::Unknown { msg_type }),
    }
}

/// Renders an event in the wire shape accepted by [`decode_event`].
#[must_use]
pub fn encode_event(event: &ServerEvent) -> String {
    let value = match event {
        ServerEvent::SchemaAndSummary {
            output_text,
            headers,
        } => json!({
            "msg_type": SCHEMA_MSG_TYPE,
            "output": output_text,
            "headers": headers,
        }),
        ServerEvent::Error { message } => json!({
            "msg_type": ERROR_MSG_TYPE,
            "error_message": message,
        }),
        ServerEvent::ResultRows { rows } => json!({
            "msg_type": RESULTS_MSG_TYPE,
            "results": rows,
        }),
        ServerEvent::Unknown { msg_type } => json!({ "msg_type": msg_type }),
    };
    value.to_string()
}

fn parse_payload<T: DeserializeOwned>(
    msg_type: &str,
    mut object: Map<String, Value>,
) -> Result<T, DecodeError> {
    let body = match object.remove(ENVELOPE_DATA) {
        Some(Value::Object(inner)) => Value::Object(inner),
        Some(other) => {
            object.insert(ENVELOPE_DATA.to_string(), other);
            Value::Object(object)
        }
        None => Value::Object(object),
    };

    serde_json::from_value(body).map_err(|source| DecodeError::MalformedPayload {
        msg_type: msg_type.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{decode_event, encode_event, DecodeError, QueryRequest, ServerEvent};

    #[test]
    fn decodes_schema_event_with_either_output_field_name() {
        let event = decode_event(
            r#"{"msg_type":"bpftrace_output","output":"kprobe:vfs_open { }","headers":["comm"]}"#,
        )
        .expect("schema event should decode");
        assert_eq!(
            event,
            ServerEvent::SchemaAndSummary {
                output_text: "kprobe:vfs_open { }".to_string(),
                headers: vec!["comm".to_string()],
            }
        );

        let event = decode_event(
            r#"{"msg_type":"bpftrace_output","outputText":"summary","headers":[]}"#,
        )
        .expect("aliased schema event should decode");
        assert!(matches!(
            event,
            ServerEvent::SchemaAndSummary { ref output_text, .. } if output_text == "summary"
        ));
    }

    #[test]
    fn decodes_payload_nested_in_data_envelope() {
        let event = decode_event(
            r#"{"type":"BpftraceError","data":{"error_message":"syntax error"},"msg_type":"bpftrace_error"}"#,
        )
        .expect("enveloped error should decode");
        assert_eq!(
            event,
            ServerEvent::Error {
                message: "syntax error".to_string()
            }
        );
    }

    #[test]
    fn decodes_result_rows_with_mixed_scalars() {
        let event = decode_event(
            r#"{"msg_type":"bpftrace_results","results":[[0,"bash",null],[1,"sh",3.5]]}"#,
        )
        .expect("results should decode");
        let ServerEvent::ResultRows { rows } = event else {
            panic!("expected result rows");
        };
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], vec![json!(0), json!("bash"), json!(null)]);
        assert_eq!(rows[1][2], json!(3.5));
    }

    #[test]
    fn unknown_discriminator_is_not_an_error() {
        let event = decode_event(r#"{"msg_type":"foo","whatever":1}"#)
            .expect("unknown events still decode");
        assert_eq!(
            event,
            ServerEvent::Unknown {
                msg_type: "foo".to_string()
            }
        );
        assert_eq!(event.msg_type(), "foo");
    }

    #[test]
    fn structurally_broken_messages_are_decode_errors() {
        assert!(matches!(
            decode_event("not json"),
            Err(DecodeError::Json(_))
        ));
        assert!(matches!(
            decode_event("[1,2,3]"),
            Err(DecodeError::NotAnObject)
        ));
        assert!(matches!(
            decode_event(r#"{"results":[]}"#),
            Err(DecodeError::MissingDiscriminator)
        ));
        assert!(matches!(
            decode_event(r#"{"msg_type":7}"#),
            Err(DecodeError::MissingDiscriminator)
        ));

        let err = decode_event(r#"{"msg_type":"bpftrace_results","results":"nope"}"#)
            .expect_err("wrong results shape should fail");
        assert!(matches!(
            err,
            DecodeError::MalformedPayload { ref msg_type, .. } if msg_type == "bpftrace_results"
        ));
    }

    #[test]
    fn encoded_events_decode_back_to_the_same_variant() {
        let event = ServerEvent::SchemaAndSummary {
            output_text: "tracepoint:syscalls:sys_enter_open { }".to_string(),
            headers: vec!["comm".to_string(), "probe".to_string()],
        };
        let decoded = decode_event(&encode_event(&event)).expect("encoded event should decode");
        assert_eq!(decoded, event);
    }

    #[test]
    fn query_request_is_sent_without_envelope() {
        let request = QueryRequest::new("select comm from kprobe.vfs_open");
        assert_eq!(request.wire_text(), "select comm from kprobe.vfs_open");
    }
}
