use docbind_client::{ClientError, CommunicationError, Method, Response};
use pretty_assertions::assert_eq;
use serde_json::json;

// ── Defaults ─────────────────────────────────────────────────────

#[test]
fn defaults_without_body() {
    let err = CommunicationError::from_response(Method::Get, "/db/Person/1", &Response::new(500));
    assert_eq!(err.status, 500);
    assert_eq!(err.class_name, "CommunicationError");
    assert_eq!(err.reason, "Communication failed");
    assert_eq!(err.message, "Handling the Response for GET /db/Person/1");
    assert!(err.data.is_none());
    assert!(err.server_causes.is_empty());
    assert_eq!(err.server_trace(), "");
}

#[test]
fn status_zero_blames_the_request() {
    let err = CommunicationError::from_response(Method::Post, "/db/Person", &Response::new(0));
    assert_eq!(err.message, "Handling the Request for POST /db/Person");
}

#[test]
fn non_object_body_is_ignored() {
    let response = Response::new(502).with_body(json!("bad gateway"));
    let err = CommunicationError::from_response(Method::Get, "/db/schema", &response);
    assert_eq!(err.class_name, "CommunicationError");
}

// ── Server details ───────────────────────────────────────────────

#[test]
fn reads_server_fields() {
    let response = Response::new(412).with_body(json!({
        "message": "version mismatch",
        "className": "PreconditionFailed",
        "reason": "stale",
        "data": {"expected": 2}
    }));
    let err = CommunicationError::from_response(Method::Put, "/db/Person/1", &response);
    assert_eq!(err.message, "version mismatch");
    assert_eq!(err.class_name, "PreconditionFailed");
    assert_eq!(err.reason, "stale");
    assert_eq!(err.data, Some(json!({"expected": 2})));
    assert!(err.is_precondition_failed());
    assert_eq!(err.to_string(), "PreconditionFailed (412): version mismatch");
}

#[test]
fn renders_server_cause_chain() {
    let response = Response::new(500).with_body(json!({
        "message": "outer",
        "className": "ServerError",
        "stackTrace": [
            {"className": "db.Handler", "methodName": "put", "fileName": "Handler.java", "lineNumber": 12}
        ],
        "cause": {
            "message": "inner",
            "className": "IOError",
            "stackTrace": [
                {"className": "io.Disk", "methodName": "write", "fileName": "Disk.java", "lineNumber": 7}
            ]
        }
    }));
    let err = CommunicationError::from_response(Method::Put, "/db/Person/1", &response);

    assert_eq!(err.server_causes.len(), 2);
    assert_eq!(err.server_causes[1].class_name, "IOError");
    assert_eq!(
        err.server_trace(),
        "\nServerside Caused by: ServerError outer\
         \n    at db.Handler.put (Handler.java:12)\
         \nServerside Caused by: IOError inner\
         \n    at io.Disk.write (Disk.java:7)"
    );
}

#[test]
fn cause_without_stack_trace_ends_chain() {
    let response = Response::new(500).with_body(json!({
        "message": "outer",
        "className": "ServerError",
        "stackTrace": [],
        "cause": {"message": "inner", "className": "IOError"}
    }));
    let err = CommunicationError::from_response(Method::Get, "/db/Person/1", &response);
    assert_eq!(err.server_causes.len(), 1);
    assert!(err.server_causes[0].frames.is_empty());
}

// ── ClientError ──────────────────────────────────────────────────

#[test]
fn client_error_display() {
    assert_eq!(
        ClientError::Unsupported("subscribe").to_string(),
        "unsupported by this connector: subscribe"
    );
    assert_eq!(ClientError::Closed.to_string(), "connector closed");
}
