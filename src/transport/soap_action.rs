//! SOAP operation detection.
//!
//! Precedence:
//! 1. `SOAPAction` header, surrounding quotes trimmed.
//! 2. Local name of the first element opened after entering `Body`
//!    (any namespace prefix, case-insensitive).
//!
//! The body scan is a forward-only token walk with one bit of state; no
//! tree is built.

use axum::http::HeaderMap;
use quick_xml::events::Event;
use quick_xml::Reader;

/// Header carrying the SOAP 1.1 action.
pub const SOAP_ACTION_HEADER: &str = "soapaction";

/// Determine the invoked operation, or an empty string.
pub fn detect_operation(headers: &HeaderMap, body: &[u8]) -> String {
    let header = headers
        .get(SOAP_ACTION_HEADER)
        .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
        .filter(|v| !v.is_empty());

    match header {
        Some(action) => action.trim_matches('"').to_string(),
        None => first_body_child(body).unwrap_or_default(),
    }
}

/// Local name of the first element after `<Body>`, if the body is XML and
/// has one.
pub fn first_body_child(body: &[u8]) -> Option<String> {
    if body.is_empty() {
        return None;
    }

    let mut reader = Reader::from_reader(body);
    let mut in_body = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(element)) | Ok(Event::Empty(element)) => {
                let local = element.local_name();
                if in_body {
                    return Some(String::from_utf8_lossy(local.as_ref()).into_owned());
                }
                if local.as_ref().eq_ignore_ascii_case(b"body") {
                    in_body = true;
                }
            }
            Ok(Event::Eof) | Err(_) => return None,
            Ok(_) => {}
        }
    }
}
