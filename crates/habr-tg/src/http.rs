use crate::prelude::*;
use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Instant;

pub(crate) mod prelude {
    pub(crate) use super::RequestBuilderExt as _;
}

pub(crate) type Client = reqwest_middleware::ClientWithMiddleware;

pub(crate) fn create_client() -> Client {
    reqwest_middleware::ClientBuilder::new(teloxide::net::client_from_env())
        .with(ObservingMiddleware)
        .with_init(|request_builder: reqwest_middleware::RequestBuilder| {
            request_builder.header(
                "User-Agent",
                concat!("HabrTelegramBot/", env!("CARGO_PKG_VERSION")),
            )
        })
        .build()
}

struct ObservingMiddleware;

#[async_trait]
impl reqwest_middleware::Middleware for ObservingMiddleware {
    async fn handle(
        &self,
        request: reqwest::Request,
        extensions: &mut task_local_extensions::Extensions,
        next: reqwest_middleware::Next<'_>,
    ) -> reqwest_middleware::Result<reqwest::Response> {
        let span = info_span!(
            "request",
            method = %request.method(),
            url = %request.url(),
        );

        let method = request.method().to_string();
        let host = request.url().host_str().unwrap_or("{unknown}").to_owned();

        async move {
            let start = Instant::now();
            let result = next.run(request, extensions).await;
            let elapsed = start.elapsed();

            let status = match &result {
                Ok(response) => response.status().as_u16().to_string(),
                Err(_) => "{fatal}".to_owned(),
            };

            metrics::histogram!(
                "http_request_duration_seconds",
                elapsed.as_secs_f64(),
                "method" => method,
                "host" => host,
                "status" => status
            );

            let duration = tracing_duration(elapsed);

            match &result {
                Ok(response) if response.status().is_success() => {
                    debug!(duration, status = %response.status(), "Network request succeeded");
                }
                Ok(response) => {
                    warn!(duration, status = %response.status(), "Network request failed (error status)");
                }
                Err(err) => {
                    warn!(duration, err = tracing_err(err), "Network request failed");
                }
            }

            result
        }
        .instrument(span)
        .await
    }
}

#[async_trait]
pub(crate) trait RequestBuilderExt {
    async fn read_bytes(self) -> Result<Bytes>;

    async fn read_text(self) -> Result<String>;
}

#[async_trait]
impl RequestBuilderExt for reqwest_middleware::RequestBuilder {
    async fn read_bytes(self) -> Result<Bytes> {
        let response = self
            .send()
            .await
            .map_err(err_ctx!(HttpClientError::Request))?;

        let status = response.status();

        if status.is_client_error() || status.is_server_error() {
            let body = match response.text().await {
                Ok(body) => body,
                Err(err) => format!("Could not collect the error response body text: {err}"),
            };

            return Err(err!(HttpClientError::BadResponseStatusCode { status, body }));
        }

        response
            .bytes()
            .await
            .map_err(err_ctx!(HttpClientError::ReadPayload))
    }

    async fn read_text(self) -> Result<String> {
        let bytes = self.read_bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// Errors at the layer of the HTTP API
#[derive(Debug, thiserror::Error)]
pub(crate) enum HttpClientError {
    #[error("HTTP request failed")]
    Request { source: reqwest_middleware::Error },

    #[error("Failed to read HTTP response")]
    ReadPayload { source: reqwest::Error },

    #[error("HTTP request has failed (HTTP status code: {status}):\n{body}")]
    BadResponseStatusCode {
        status: reqwest::StatusCode,
        body: String,
    },
}
