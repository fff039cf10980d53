use crate::wire::{
    self, EnrollRequest, IdentifyRequest, MarkRequest, RosterBody, RosterEntry,
};
use async_trait::async_trait;
use reqwest::{Response, Url};
use rollcall_core::{AttendanceMarker, FacialDescriptor, IdentificationResult, Identifier};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("invalid backend base url {url}: {reason}")]
    InvalidBase { url: String, reason: String },
    #[error("transport: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("{message}")]
    Status { status: u16, message: String },
    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Optional scoping sent with every identify call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentifyScope {
    pub class_id: Option<String>,
    pub mark_present: bool,
}

/// HTTP client for the roster backend. No call is retried.
#[derive(Clone)]
pub struct RosterClient {
    http: reqwest::Client,
    base: Url,
    scope: IdentifyScope,
}

impl RosterClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ClientError> {
        let invalid = |reason: String| ClientError::InvalidBase {
            url: base_url.to_string(),
            reason,
        };
        let base = Url::parse(base_url).map_err(|e| invalid(e.to_string()))?;
        if base.cannot_be_a_base() {
            return Err(invalid("not a hierarchical url".into()));
        }
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            base,
            scope: IdentifyScope::default(),
        })
    }

    pub fn with_scope(mut self, scope: IdentifyScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// `POST /students/identify`. Always settles to exactly one result variant.
    pub async fn identify_scoped(
        &self,
        descriptor: &FacialDescriptor,
        scope: &IdentifyScope,
    ) -> IdentificationResult {
        let url = self.endpoint(&["students", "identify"]);
        let body = IdentifyRequest {
            embedding: descriptor,
            class_id: scope.class_id.as_deref(),
            mark_present: scope.mark_present.then_some(true),
        };
        tracing::debug!(%url, class_id = ?scope.class_id, "identify request");

        let response = match self.http.post(url).json(&body).send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "identify transport failure");
                return IdentificationResult::Failed {
                    reason: wire::transport_reason(&e),
                };
            }
        };

        let status = response.status().as_u16();
        let result = match response.bytes().await {
            Ok(bytes) => wire::interpret_identify(status, &bytes),
            Err(e) => IdentificationResult::Failed {
                reason: wire::transport_reason(&e),
            },
        };
        match &result {
            IdentificationResult::Matched { student, score } => {
                tracing::info!(student_id = %student.student_id, %score, "identify matched")
            }
            IdentificationResult::NotMatched { best_score } => {
                tracing::info!(?best_score, "identify not matched")
            }
            IdentificationResult::Failed { reason } => {
                tracing::warn!(status, %reason, "identify failed")
            }
        }
        result
    }

    /// `POST /attendance/mark`.
    pub async fn mark_attendance(&self, student_id: &str) -> Result<(), ClientError> {
        let url = self.endpoint(&["attendance", "mark"]);
        let response = self
            .http
            .post(url)
            .json(&MarkRequest { student_id })
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    /// `POST /students/enroll`. Returns the backend's JSON reply unchanged.
    pub async fn enroll(&self, request: &EnrollRequest) -> Result<serde_json::Value, ClientError> {
        let url = self.endpoint(&["students", "enroll"]);
        tracing::info!(student_id = %request.student_id, "enroll request");
        self.post_json(url, request).await
    }

    /// `GET /students/class/:classId`.
    pub async fn class_students(&self, class_id: &str) -> Result<Vec<RosterEntry>, ClientError> {
        let url = self.endpoint(&["students", "class", class_id]);
        let response = check_status(self.http.get(url).send().await?).await?;
        let bytes = response.bytes().await?;
        let body: RosterBody =
            serde_json::from_slice(&bytes).map_err(|e| ClientError::Malformed(e.to_string()))?;
        Ok(body.into_entries())
    }

    async fn post_json<B: Serialize + ?Sized>(
        &self,
        url: Url,
        body: &B,
    ) -> Result<serde_json::Value, ClientError> {
        let response = check_status(self.http.post(url).json(body).send().await?).await?;
        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_slice(&bytes).map_err(|e| ClientError::Malformed(e.to_string()))
    }
}

async fn check_status(response: Response) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.bytes().await.unwrap_or_default();
    Err(ClientError::Status {
        status: status.as_u16(),
        message: wire::status_reason(status.as_u16(), &body),
    })
}

#[async_trait]
impl Identifier for RosterClient {
    async fn identify(&self, descriptor: &FacialDescriptor) -> IdentificationResult {
        self.identify_scoped(descriptor, &self.scope).await
    }
}

#[async_trait]
impl AttendanceMarker for RosterClient {
    async fn mark_present(&self, student_id: &str) -> Result<(), String> {
        self.mark_attendance(student_id)
            .await
            .map_err(|e| e.to_string())
    }
}
