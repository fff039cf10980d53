//! Request/response bodies for the roster backend and their interpretation.

use rollcall_core::{FacialDescriptor, IdentificationResult, Score, Student};
use serde::{Deserialize, Serialize};

/// Fallback reason when neither the server nor the transport says anything useful.
pub const GENERIC_IDENTIFY_ERROR: &str = "Identify error";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentifyRequest<'a> {
    pub embedding: &'a FacialDescriptor,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mark_present: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentifyResponse {
    pub matched: bool,
    #[serde(default)]
    pub student: Option<Student>,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub best_score: Option<f64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkRequest<'a> {
    pub student_id: &'a str,
}

/// Body for `POST /students/enroll`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollRequest {
    pub student_id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_id: Option<String>,
    pub embedding: FacialDescriptor,
}

/// One entry of `GET /students/class/:classId`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterEntry {
    pub student_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_phone: Option<String>,
}

/// The roster endpoint answers either a bare array or `{ "students": [...] }`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum RosterBody {
    List(Vec<RosterEntry>),
    Wrapped { students: Vec<RosterEntry> },
}

impl RosterBody {
    pub(crate) fn into_entries(self) -> Vec<RosterEntry> {
        match self {
            Self::List(entries) | Self::Wrapped { students: entries } => entries,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Structured error message from a response body, if the server sent one.
pub fn server_message(body: &[u8]) -> Option<String> {
    let parsed: ErrorBody = serde_json::from_slice(body).ok()?;
    parsed
        .error
        .or(parsed.message)
        .map(|m| m.trim().to_string())
        .filter(|m| !m.is_empty())
}

/// Human-readable reason for a non-2xx response.
pub fn status_reason(status: u16, body: &[u8]) -> String {
    server_message(body).unwrap_or_else(|| format!("request failed with status code {status}"))
}

/// Map a completed HTTP exchange to an identification result.
pub fn interpret_identify(status: u16, body: &[u8]) -> IdentificationResult {
    if !(200..300).contains(&status) {
        return IdentificationResult::Failed {
            reason: status_reason(status, body),
        };
    }

    let response: IdentifyResponse = match serde_json::from_slice(body) {
        Ok(r) => r,
        Err(e) => {
            return IdentificationResult::Failed {
                reason: format!("malformed identify response: {e}"),
            }
        }
    };

    if !response.matched {
        return IdentificationResult::NotMatched {
            best_score: response.best_score,
        };
    }

    match response.student {
        Some(student) => IdentificationResult::Matched {
            student,
            score: Score(response.score.unwrap_or(0.0)),
        },
        None => IdentificationResult::Failed {
            reason: "malformed identify response: matched without student".into(),
        },
    }
}

/// Reason text for a transport-level failure.
pub fn transport_reason(error: &dyn std::error::Error) -> String {
    let text = error.to_string();
    if text.trim().is_empty() {
        GENERIC_IDENTIFY_ERROR.to_string()
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::types::DESCRIPTOR_LEN;

    #[test]
    fn test_matched_response() {
        let body = br#"{"matched":true,"student":{"studentId":"S-9","name":"Lin"},"score":0.91876}"#;
        match interpret_identify(200, body) {
            IdentificationResult::Matched { student, score } => {
                assert_eq!(student.student_id, "S-9");
                assert_eq!(score.value(), 0.91876);
                assert_eq!(score.to_string(), "0.919");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    struct NoopMarker;

    #[async_trait::async_trait]
    impl rollcall_core::AttendanceMarker for NoopMarker {
        async fn mark_present(&self, _student_id: &str) -> Result<(), String> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_parent_phone_reaches_confirmation_card() {
        let body = br#"{"matched":true,"student":{"studentId":"S-9","name":"Lin","parentPhone":"+1 555 0100"},"score":0.8}"#;
        let IdentificationResult::Matched { student, .. } = interpret_identify(200, body) else {
            panic!("expected a match");
        };
        let mut card = rollcall_core::Confirmation::new(std::sync::Arc::new(NoopMarker));
        let session = card.open(student, std::time::Duration::ZERO).unwrap();
        assert_eq!(session.student.parent_phone.as_deref(), Some("+1 555 0100"));

        // absent field stays absent on the way back out
        let json = serde_json::to_value(Student {
            parent_phone: None,
            ..session.student
        })
        .unwrap();
        assert!(json.get("parentPhone").is_none());
    }

    #[test]
    fn test_not_matched_response() {
        let body = br#"{"matched":false,"bestScore":0.41}"#;
        assert_eq!(
            interpret_identify(200, body),
            IdentificationResult::NotMatched { best_score: Some(0.41) }
        );
    }

    #[test]
    fn test_matched_without_student_is_failure() {
        let result = interpret_identify(200, br#"{"matched":true,"score":0.9}"#);
        assert!(matches!(result, IdentificationResult::Failed { .. }));
    }

    #[test]
    fn test_server_error_message_preferred() {
        let body = br#"{"error":"embedding must have 128 values"}"#;
        assert_eq!(
            interpret_identify(400, body),
            IdentificationResult::Failed {
                reason: "embedding must have 128 values".into()
            }
        );
    }

    #[test]
    fn test_status_text_when_no_server_message() {
        assert_eq!(
            interpret_identify(502, b"<html>bad gateway</html>"),
            IdentificationResult::Failed {
                reason: "request failed with status code 502".into()
            }
        );
    }

    #[test]
    fn test_malformed_success_body() {
        let result = interpret_identify(200, b"not json");
        match result {
            IdentificationResult::Failed { reason } => {
                assert!(reason.starts_with("malformed identify response"))
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_identify_request_shape() {
        let d = FacialDescriptor::new(vec![0.25; DESCRIPTOR_LEN]).unwrap();
        let req = IdentifyRequest {
            embedding: &d,
            class_id: Some("bus-4"),
            mark_present: None,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["embedding"].as_array().map(Vec::len), Some(DESCRIPTOR_LEN));
        assert_eq!(json["classId"], "bus-4");
        assert!(json.get("markPresent").is_none());
    }

    #[test]
    fn test_roster_body_both_shapes() {
        let bare: RosterBody =
            serde_json::from_str(r#"[{"studentId":"a","name":"A"}]"#).unwrap();
        assert_eq!(bare.into_entries().len(), 1);
        let wrapped: RosterBody = serde_json::from_str(
            r#"{"students":[{"studentId":"a","name":"A","classId":"c1"}]}"#,
        )
        .unwrap();
        let entries = wrapped.into_entries();
        assert_eq!(entries[0].class_id.as_deref(), Some("c1"));
        assert_eq!(entries[0].parent_phone, None);

        let with_phone: RosterBody = serde_json::from_str(
            r#"[{"studentId":"b","name":"B","parentPhone":"555-0199"}]"#,
        )
        .unwrap();
        assert_eq!(
            with_phone.into_entries()[0].parent_phone.as_deref(),
            Some("555-0199")
        );
    }
}
