use std::time::Duration;

use reqwest::{RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;

use super::ProviderKind;
use crate::errors::ProviderError;

pub(crate) const USER_AGENT: &str = "ai-coding-factory-autopilot";

/// Longest response body excerpt carried in an error.
const BODY_EXCERPT: usize = 500;

/// Thin wrapper over `reqwest::Client` that applies the per-call timeout and
/// classifies failures.
#[derive(Debug, Clone)]
pub(crate) struct HttpClient {
    client: reqwest::Client,
    provider: ProviderKind,
}

impl HttpClient {
    pub(crate) fn new(provider: ProviderKind, timeout: Duration) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(ProviderError::Network)?;
        Ok(Self { client, provider })
    }

    pub(crate) fn inner(&self) -> &reqwest::Client {
        &self.client
    }

    /// Append path segments to `base`, percent-encoding each one.
    pub(crate) fn endpoint(base: &str, segments: &[&str]) -> Result<Url, ProviderError> {
        let mut url =
            Url::parse(base).map_err(|e| ProviderError::Decode(format!("bad base url {base}: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| ProviderError::Decode(format!("base url {base} cannot have a path")))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Send and decode a JSON body.
    pub(crate) async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, ProviderError> {
        let response = self.send(request).await?;
        response.json::<T>().await.map_err(ProviderError::from)
    }

    /// Like `send_json`, but a 404 is `Ok(None)`.
    pub(crate) async fn send_optional<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<Option<T>, ProviderError> {
        match self.send(request).await {
            Ok(response) => Ok(Some(response.json::<T>().await?)),
            Err(ProviderError::Rejected { status: 404, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<reqwest::Response, ProviderError> {
        let request = request.build().map_err(ProviderError::from)?;
        let method = request.method().clone();
        let url = request.url().clone();

        let response = match self.client.execute(request).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(provider = %self.provider, %method, %url, error = %e, "provider.call failed");
                return Err(e.into());
            }
        };

        let status = response.status();
        tracing::debug!(provider = %self.provider, %method, %url, status = status.as_u16(), "provider.call");
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify(status, &body))
    }
}

/// 401/403 → auth, 429/5xx → transient, anything else → rejected.
pub(crate) fn classify(status: StatusCode, body: &str) -> ProviderError {
    let status_code = status.as_u16();
    let body = excerpt(body);
    match status_code {
        401 | 403 => ProviderError::Auth {
            status: status_code,
            body,
        },
        429 | 500..=599 => ProviderError::Transient {
            status: status_code,
            body,
        },
        _ => ProviderError::Rejected {
            status: status_code,
            body,
        },
    }
}

fn excerpt(body: &str) -> String {
    let body = body.trim();
    if body.len() <= BODY_EXCERPT {
        body.to_string()
    } else {
        format!("{}…", &body[..body.floor_char_boundary(BODY_EXCERPT)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_statuses() {
        assert!(matches!(
            classify(StatusCode::UNAUTHORIZED, "bad"),
            ProviderError::Auth { status: 401, .. }
        ));
        assert!(matches!(
            classify(StatusCode::FORBIDDEN, ""),
            ProviderError::Auth { status: 403, .. }
        ));
        assert!(matches!(
            classify(StatusCode::TOO_MANY_REQUESTS, ""),
            ProviderError::Transient { status: 429, .. }
        ));
        assert!(matches!(
            classify(StatusCode::BAD_GATEWAY, ""),
            ProviderError::Transient { status: 502, .. }
        ));
        assert!(matches!(
            classify(StatusCode::UNPROCESSABLE_ENTITY, ""),
            ProviderError::Rejected { status: 422, .. }
        ));
    }

    #[test]
    fn test_excerpt_truncates_long_bodies() {
        let long = "x".repeat(2000);
        match classify(StatusCode::INTERNAL_SERVER_ERROR, &long) {
            ProviderError::Transient { body, .. } => assert!(body.len() < 600),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_endpoint_encodes_segments() {
        let url = HttpClient::endpoint(
            "https://dev.azure.com/acme",
            &["My Project", "_apis", "wit", "workitems", "$User Story"],
        )
        .unwrap();
        assert_eq!(
            url.as_str(),
            "https://dev.azure.com/acme/My%20Project/_apis/wit/workitems/$User%20Story"
        );
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let url = HttpClient::endpoint("https://ghe.example.com/api/v3/", &["repos", "a", "b"]).unwrap();
        assert_eq!(url.as_str(), "https://ghe.example.com/api/v3/repos/a/b");
    }
}
