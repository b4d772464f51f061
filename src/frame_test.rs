use serde_json::json;

use super::*;

fn inbound(json: &str) -> Frame {
    serde_json::from_str(json).unwrap()
}

#[derive(Debug)]
struct Boom;

impl std::fmt::Display for Boom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "boom")
    }
}

impl ErrorCode for Boom {
    fn error_code(&self) -> &'static str {
        "E_BOOM"
    }

    fn retryable(&self) -> bool {
        true
    }
}

#[test]
fn minimal_inbound_frame_fills_defaults() {
    let frame = inbound(r#"{"syscall":"shape:rect"}"#);
    assert_eq!(frame.syscall, "shape:rect");
    assert_eq!(frame.status, Status::Request);
    assert!(frame.parent_id.is_none());
    assert!(frame.data.is_empty());
    assert!(frame.ts > 0);
}

#[test]
fn inbound_frame_without_syscall_is_rejected() {
    assert!(serde_json::from_str::<Frame>(r#"{"data":{}}"#).is_err());
}

#[test]
fn reply_answers_request() {
    let req = inbound(r#"{"syscall":"canvas:export","canvas_id":"abc"}"#);
    let done = req.done_with(Data::from([("url".to_owned(), json!("data:"))]));

    assert_eq!(done.parent_id, Some(req.id));
    assert_ne!(done.id, req.id);
    assert_eq!(done.canvas_id.as_deref(), Some("abc"));
    assert_eq!(done.syscall, "canvas:export");
    assert_eq!(done.status, Status::Done);
    assert_eq!(done.data_str("url"), Some("data:"));
}

#[test]
fn notification_has_no_parent() {
    let frame = Frame::notify("session:ready").with_canvas_id("c1").with_data("objects", 3);
    assert!(frame.parent_id.is_none());
    assert_eq!(frame.status, Status::Request);
    assert_eq!(frame.data.get("objects"), Some(&json!(3)));

    let value = serde_json::to_value(&frame).unwrap();
    assert!(value.get("parent_id").is_none());
    assert_eq!(value["status"], json!("request"));
}

#[test]
fn route_splits_at_first_colon() {
    let frame = inbound(r#"{"syscall":"selection:delete"}"#);
    assert_eq!(frame.route(), ("selection", "delete"));

    let frame = inbound(r#"{"syscall":"a:b:c"}"#);
    assert_eq!((frame.prefix(), frame.op()), ("a", "b:c"));

    let frame = inbound(r#"{"syscall":"noseparator"}"#);
    assert_eq!((frame.prefix(), frame.op()), ("noseparator", ""));
}

#[test]
fn data_u32_rejects_negative_and_oversized() {
    let frame = inbound(r#"{"syscall":"viewport:resize","data":{"w":1200,"neg":-1,"big":5000000000,"s":"9"}}"#);
    assert_eq!(frame.data_u32("w"), Some(1200));
    assert_eq!(frame.data_u32("neg"), None);
    assert_eq!(frame.data_u32("big"), None);
    assert_eq!(frame.data_u32("s"), None);
    assert_eq!(frame.data_u32("missing"), None);
}

#[test]
fn canvas_id_omitted_when_absent() {
    let json = serde_json::to_value(Frame::notify("canvas:list")).unwrap();
    assert!(json.get("canvas_id").is_none());
}

#[test]
fn error_from_carries_code_message_and_retryable() {
    let req = inbound(r#"{"syscall":"canvas:save"}"#);
    let err = req.error_from(&Boom);
    assert_eq!(err.status, Status::Error);
    assert_eq!(err.parent_id, Some(req.id));
    assert_eq!(err.data_str(keys::CODE), Some("E_BOOM"));
    assert_eq!(err.data_str(keys::MESSAGE), Some("boom"));
    assert_eq!(err.data.get(keys::RETRYABLE), Some(&json!(true)));
}

#[test]
fn plain_error_has_message_only() {
    let err = inbound(r#"{"syscall":"stroke:commit"}"#).error("points required");
    assert_eq!(err.status, Status::Error);
    assert_eq!(err.data_str(keys::MESSAGE), Some("points required"));
    assert!(!err.data.contains_key(keys::CODE));
}

#[test]
fn failure_notification_is_unparented_error() {
    let frame = Frame::failure("save:error", &Boom).with_canvas_id("c1");
    assert_eq!(frame.status, Status::Error);
    assert!(frame.parent_id.is_none());
    assert_eq!(frame.data_str(keys::CODE), Some("E_BOOM"));
}

#[test]
fn with_syscall_renames_reply() {
    let req = inbound(r#"{"syscall":"canvas:save"}"#);
    let ok = req.done().with_syscall("save:ok");
    assert_eq!(ok.syscall, "save:ok");
    assert_eq!(ok.parent_id, Some(req.id));
}
