//! JSON-over-HTTP remote
//!
//! Talks to a sync server exposing one change feed per table:
//!
//! - `GET  {endpoint}/v1/tables/{table}/changes?since=&limit=` returns a
//!   [`PullBatch`]
//! - `POST {endpoint}/v1/tables/{table}/changes` with `{"changes": [...]}`
//!   returns `{"results": [{"remote_id": ...} | {"error": {...}}]}` in input
//!   order

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::db::Cursor;
use crate::error::{Error, Result};
use crate::models::{RemoteId, Table};
use crate::sync::{OutgoingChange, PullBatch, RemoteError, RemoteErrorKind, RemoteService};
use crate::util::{compact_text, is_http_url, normalize_text_option};

#[derive(Clone)]
pub struct HttpRemote {
    endpoint: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpRemote {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpRemote")
            .field("endpoint", &self.endpoint)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

impl HttpRemote {
    pub fn new(endpoint: impl Into<String>, token: Option<String>) -> Result<Self> {
        let endpoint = normalize_endpoint(endpoint.into())?;
        let client = reqwest::Client::builder()
            .build()
            .map_err(|error| Error::InvalidInput(format!("cannot build HTTP client: {error}")))?;
        Ok(Self {
            endpoint,
            token: normalize_text_option(token),
            client,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn changes_url(&self, table: Table) -> String {
        format!("{}/v1/tables/{table}/changes", self.endpoint)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let request = request.header("Accept", "application/json");
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[derive(Debug, Serialize)]
struct PushRequest<'a> {
    changes: &'a [OutgoingChange],
}

#[derive(Debug, Deserialize)]
struct PushResponse {
    results: Vec<PushResultBody>,
}

#[derive(Debug, Deserialize)]
struct PushResultBody {
    remote_id: Option<RemoteId>,
    error: Option<RowErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RowErrorBody {
    kind: Option<RemoteErrorKind>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

impl PushResultBody {
    fn into_result(self) -> std::result::Result<RemoteId, RemoteError> {
        match (self.remote_id, self.error) {
            (_, Some(error)) => Err(RemoteError::new(
                error.kind.unwrap_or(RemoteErrorKind::Rejected),
                error.message.unwrap_or_else(|| "row rejected".to_string()),
            )),
            (Some(remote_id), None) => Ok(remote_id),
            (None, None) => Err(RemoteError::schema("push result without remote_id")),
        }
    }
}

#[async_trait]
impl RemoteService for HttpRemote {
    async fn pull(
        &self,
        table: Table,
        since: Option<Cursor>,
        limit: usize,
    ) -> std::result::Result<PullBatch, RemoteError> {
        let mut query = vec![("limit", limit.to_string())];
        if let Some(since) = since {
            query.push(("since", since.to_string()));
        }

        let response = self
            .authorize(self.client.get(self.changes_url(table)))
            .query(&query)
            .send()
            .await
            .map_err(transport_error)?;

        let response = check_status(response).await?;
        response.json::<PullBatch>().await.map_err(decode_error)
    }

    async fn push(
        &self,
        table: Table,
        changes: Vec<OutgoingChange>,
    ) -> std::result::Result<Vec<std::result::Result<RemoteId, RemoteError>>, RemoteError> {
        let response = self
            .authorize(self.client.post(self.changes_url(table)))
            .json(&PushRequest { changes: &changes })
            .send()
            .await
            .map_err(transport_error)?;

        let response = check_status(response).await?;
        let payload = response.json::<PushResponse>().await.map_err(decode_error)?;
        Ok(payload
            .results
            .into_iter()
            .map(PushResultBody::into_result)
            .collect())
    }
}

async fn check_status(
    response: reqwest::Response,
) -> std::result::Result<reqwest::Response, RemoteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(RemoteError::new(
        classify_status(status),
        parse_api_error(status, &body),
    ))
}

/// Map an HTTP failure status to how the engine should treat it
pub fn classify_status(status: StatusCode) -> RemoteErrorKind {
    match status.as_u16() {
        408 | 500..=599 => RemoteErrorKind::Transient,
        429 => RemoteErrorKind::QuotaExceeded,
        400 | 409 | 422 => RemoteErrorKind::Schema,
        _ => RemoteErrorKind::Rejected,
    }
}

fn transport_error(error: reqwest::Error) -> RemoteError {
    if error.is_decode() {
        decode_error(error)
    } else {
        RemoteError::transient(error.to_string())
    }
}

fn decode_error(error: reqwest::Error) -> RemoteError {
    RemoteError::schema(format!("unexpected response body: {error}"))
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", compact_text(&message), status.as_u16());
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

fn normalize_endpoint(raw: String) -> Result<String> {
    let endpoint = normalize_text_option(Some(raw))
        .ok_or_else(|| Error::InvalidInput("remote endpoint must not be empty".to_string()))?;
    if is_http_url(&endpoint) {
        Ok(endpoint.trim_end_matches('/').to_string())
    } else {
        Err(Error::InvalidInput(
            "remote endpoint must include http:// or https://".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_endpoint_rejects_invalid_values() {
        assert!(normalize_endpoint(String::new()).is_err());
        assert!(normalize_endpoint("sync.example.com".to_string()).is_err());
        assert_eq!(
            normalize_endpoint(" https://sync.example.com/ ".to_string()).unwrap(),
            "https://sync.example.com"
        );
    }

    #[test]
    fn statuses_map_to_error_kinds() {
        assert_eq!(classify_status(StatusCode::REQUEST_TIMEOUT), RemoteErrorKind::Transient);
        assert_eq!(classify_status(StatusCode::BAD_GATEWAY), RemoteErrorKind::Transient);
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            RemoteErrorKind::QuotaExceeded
        );
        assert_eq!(classify_status(StatusCode::CONFLICT), RemoteErrorKind::Schema);
        assert_eq!(
            classify_status(StatusCode::UNPROCESSABLE_ENTITY),
            RemoteErrorKind::Schema
        );
        assert_eq!(classify_status(StatusCode::FORBIDDEN), RemoteErrorKind::Rejected);
    }

    #[test]
    fn api_error_prefers_message_field() {
        let message = parse_api_error(StatusCode::TOO_MANY_REQUESTS, r#"{"message":"slow down"}"#);
        assert_eq!(message, "slow down (429)");
        assert_eq!(parse_api_error(StatusCode::BAD_GATEWAY, "  "), "HTTP 502");
    }

    #[test]
    fn push_results_decode_per_row() {
        let payload: PushResponse = serde_json::from_str(
            r#"{"results": [
                {"remote_id": "srv-1"},
                {"error": {"kind": "rejected", "message": "read-only"}},
                {}
            ]}"#,
        )
        .unwrap();
        let results: Vec<_> = payload
            .results
            .into_iter()
            .map(PushResultBody::into_result)
            .collect();

        assert_eq!(results[0], Ok(RemoteId::new("srv-1")));
        assert_eq!(results[1].as_ref().unwrap_err().kind, RemoteErrorKind::Rejected);
        assert_eq!(results[2].as_ref().unwrap_err().kind, RemoteErrorKind::Schema);
    }

    #[test]
    fn debug_redacts_token() {
        let remote = HttpRemote::new("https://sync.example.com", Some("secret".to_string())).unwrap();
        let debug = format!("{remote:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("[REDACTED]"));
    }
}
