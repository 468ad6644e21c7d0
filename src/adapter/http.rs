use async_trait::async_trait;

use crate::adapter::AdapterError;

/// Browser-like agent string; the scraped front ends reject unknown clients.
const USER_AGENT: &str = "Mozilla/5.0";

#[derive(Debug, Clone, PartialEq)]
pub enum HttpBody {
    /// `application/x-www-form-urlencoded` fields.
    Form(Vec<(String, String)>),
    Text { content_type: String, body: String },
}

/// A single POST issued by an adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub url: String,
    pub body: HttpBody,
}

impl HttpRequest {
    pub fn form(url: impl Into<String>, fields: Vec<(String, String)>) -> Self {
        Self {
            url: url.into(),
            body: HttpBody::Form(fields),
        }
    }

    pub fn xml(url: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            body: HttpBody::Text {
                content_type: "text/xml".to_string(),
                body: body.into(),
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }

    /// Body of a 2xx response; anything else becomes [`AdapterError::Backend`].
    pub fn into_success(self) -> Result<String, AdapterError> {
        if (200..300).contains(&self.status) {
            Ok(self.body)
        } else {
            Err(AdapterError::Backend {
                status: self.status,
                body: self.body,
            })
        }
    }
}

/// Seam between adapters and the network. Tests substitute a fake.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn post(&self, request: HttpRequest) -> Result<HttpResponse, AdapterError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, AdapterError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| AdapterError::Unreachable(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn post(&self, request: HttpRequest) -> Result<HttpResponse, AdapterError> {
        let builder = self.client.post(&request.url);
        let builder = match request.body {
            HttpBody::Form(fields) => builder.form(&fields),
            HttpBody::Text { content_type, body } => builder
                .header(reqwest::header::CONTENT_TYPE, content_type)
                .body(body),
        };

        let response = builder.send().await.map_err(|e| {
            tracing::debug!(url = %request.url, error = %e, "HTTP request failed");
            AdapterError::Unreachable(e.to_string())
        })?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| AdapterError::Unreachable(e.to_string()))?;

        Ok(HttpResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_success_status_is_a_backend_error() {
        let response = HttpResponse {
            status: 503,
            body: "down".to_string(),
        };
        assert!(matches!(
            response.into_success(),
            Err(AdapterError::Backend { status: 503, body }) if body == "down"
        ));
        assert_eq!(HttpResponse::ok("fine").into_success().unwrap(), "fine");
    }

    #[tokio::test]
    async fn unreachable_host_maps_to_unreachable() {
        let transport = ReqwestTransport::new().unwrap();
        let err = transport
            .post(HttpRequest::xml("http://127.0.0.1:1/RPC2", "<x/>"))
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::Unreachable(_)));
    }
}
