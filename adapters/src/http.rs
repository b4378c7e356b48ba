//! Request plumbing shared by the remote adapters.

use reqwest::{RequestBuilder, Response, StatusCode};
use tokio_util::sync::CancellationToken;

use crate::error::{AdapterError, AdapterResult};

/// Send a request racing the cancellation token and map the response status
/// onto the adapter error taxonomy: 401/403 permanent, 429 retryable with a
/// server hint, other 4xx permanent, 5xx retryable.
pub(crate) async fn send_checked(
    adapter: &str,
    builder: RequestBuilder,
    cancel: &CancellationToken,
) -> AdapterResult<Response> {
    if cancel.is_cancelled() {
        return Err(AdapterError::Cancelled);
    }

    let response = tokio::select! {
        _ = cancel.cancelled() => return Err(AdapterError::Cancelled),
        result = builder.send() => result?,
    };

    match response.status() {
        status if status.is_success() => Ok(response),
        StatusCode::TOO_MANY_REQUESTS => {
            let retry_after_seconds = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(60);
            Err(AdapterError::RateLimited {
                retry_after_seconds,
            })
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(AdapterError::Authentication {
            adapter: adapter.to_string(),
            message: "credentials were rejected".to_string(),
        }),
        status => {
            let message = response.text().await.unwrap_or_default();
            Err(AdapterError::Api {
                adapter: adapter.to_string(),
                status: status.as_u16(),
                message,
            })
        }
    }
}
