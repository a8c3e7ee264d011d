//! HTTP plumbing shared by the remote providers.

use std::time::Duration;

use reqwest::Client;
use serde::Serialize;
use serde::de::DeserializeOwned;
use url::Url;

use carebot_shared::{CarebotError, Result};

/// User-Agent string for provider requests.
const USER_AGENT: &str = concat!("carebot/", env!("CARGO_PKG_VERSION"));

/// Longest error body echoed back in an error message.
const MAX_ERROR_BODY: usize = 300;

/// Build a reqwest client with a request timeout.
pub(crate) fn build_client(timeout_secs: u64) -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| CarebotError::Network(format!("failed to build HTTP client: {e}")))
}

/// Parse and validate an endpoint URL.
pub(crate) fn parse_endpoint(raw: &str) -> Result<Url> {
    let url = Url::parse(raw)
        .map_err(|e| CarebotError::config(format!("invalid endpoint {raw:?}: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(CarebotError::config(format!(
            "unsupported scheme {other:?} in endpoint {raw:?}"
        ))),
    }
}

/// Send a request and fail on non-2xx statuses, keeping the start of the body.
pub(crate) async fn send_checked(
    request: reqwest::RequestBuilder,
    url: &Url,
) -> Result<reqwest::Response> {
    let response = request
        .send()
        .await
        .map_err(|e| CarebotError::Network(format!("{url}: {e}")))?;

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let snippet: String = body.chars().take(MAX_ERROR_BODY).collect();
    Err(CarebotError::Network(format!("{url}: HTTP {status}: {snippet}")))
}

/// POST a JSON body and decode a JSON response.
pub(crate) async fn post_json<B, R>(client: &Client, url: &Url, body: &B) -> Result<R>
where
    B: Serialize + ?Sized,
    R: DeserializeOwned,
{
    let response = send_checked(client.post(url.clone()).json(body), url).await?;
    response
        .json::<R>()
        .await
        .map_err(|e| CarebotError::parse(format!("{url}: invalid response body: {e}")))
}
