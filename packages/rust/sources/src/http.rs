//! HTTP plumbing shared by the adapters: client construction and mapping of
//! transport failures and status codes onto [`SourceError`].

use std::time::Duration;

use harvester_shared::{HarvesterError, Result, SourceError};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use tokio::time::Instant;
use tracing::debug;

/// Maximum number of redirects followed by adapter requests.
const MAX_REDIRECTS: usize = 5;

/// Upper bound on the slice of a budget held back for assembling the
/// result after the last request gives up.
const BUDGET_MARGIN: Duration = Duration::from_millis(50);

// ---------------------------------------------------------------------------
// Time budget
// ---------------------------------------------------------------------------

/// Wall-clock allowance for one `fetch` call, shared by every request and
/// pause the adapter makes while serving it.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Budget {
    deadline: Instant,
}

impl Budget {
    /// Start a budget of `timeout`, minus a small margin (at most a tenth of
    /// `timeout`) so the adapter can return what it has before a caller
    /// wrapping the call in the same `timeout` gives up on it.
    pub(crate) fn start(timeout: Duration) -> Self {
        let margin = BUDGET_MARGIN.min(timeout / 10);
        Self {
            deadline: Instant::now() + timeout.saturating_sub(margin),
        }
    }

    /// Time left before the deadline; zero once it has passed.
    pub(crate) fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub(crate) fn is_exhausted(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Sleep for `delay` when the budget can afford it and still leave time
    /// for another request. Returns `false` without sleeping otherwise.
    pub(crate) async fn pause(&self, delay: Duration) -> bool {
        if delay >= self.remaining() {
            return false;
        }
        tokio::time::sleep(delay).await;
        true
    }
}

/// Build a reqwest client with the given User-Agent.
///
/// No client-wide timeout is set; every request carries its own.
pub(crate) fn build_client(user_agent: &str) -> Result<Client> {
    Client::builder()
        .user_agent(user_agent)
        .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
        .build()
        .map_err(|e| HarvesterError::Network(format!("failed to build HTTP client: {e}")))
}

/// Send `request` with `timeout` and reject non-success statuses.
pub(crate) async fn send(
    request: RequestBuilder,
    timeout: Duration,
    what: &str,
) -> std::result::Result<Response, SourceError> {
    let response = request
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| map_transport_error(what, &e))?;

    debug!(what, status = %response.status(), "response received");
    check_status(what, response)
}

/// Read the full body as text.
pub(crate) async fn read_text(
    what: &str,
    response: Response,
) -> std::result::Result<String, SourceError> {
    response.text().await.map_err(|e| {
        if e.is_timeout() {
            SourceError::Timeout(format!("{what}: body read timed out"))
        } else {
            SourceError::Parse(format!("{what}: failed to read body: {e}"))
        }
    })
}

/// Map an HTTP status onto the adapter error taxonomy.
///
/// 429 is rate limiting (the `Retry-After` value is kept as a hint), 5xx is
/// an unreachable source and any other 4xx means the request itself was bad.
pub(crate) fn check_status(
    what: &str,
    response: Response,
) -> std::result::Result<Response, SourceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        return Err(SourceError::RateLimited(match retry_after {
            Some(after) => format!("{what}: HTTP {status} (retry after {after})"),
            None => format!("{what}: HTTP {status}"),
        }));
    }

    if status.is_server_error() {
        return Err(SourceError::Unreachable(format!("{what}: HTTP {status}")));
    }

    if status.is_client_error() {
        return Err(SourceError::InvalidQuery(format!("{what}: HTTP {status}")));
    }

    // Redirect loops past the policy limit or other unexpected codes
    Err(SourceError::Unreachable(format!(
        "{what}: unexpected HTTP {status}"
    )))
}

fn map_transport_error(what: &str, err: &reqwest::Error) -> SourceError {
    if err.is_timeout() {
        SourceError::Timeout(format!("{what}: request timed out"))
    } else if err.is_connect() || err.is_request() || err.is_redirect() {
        SourceError::Unreachable(format!("{what}: {err}"))
    } else if err.is_builder() {
        SourceError::InvalidQuery(format!("{what}: {err}"))
    } else if err.is_body() || err.is_decode() {
        SourceError::Parse(format!("{what}: {err}"))
    } else {
        SourceError::Unreachable(format!("{what}: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harvester_shared::SourceErrorKind;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn status_kind(template: ResponseTemplate) -> std::result::Result<(), SourceError> {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/status"))
            .respond_with(template)
            .mount(&server)
            .await;

        let client = build_client("harvester-test").unwrap();
        let url = format!("{}/status", server.uri());
        send(client.get(&url), Duration::from_secs(5), "test")
            .await
            .map(|_| ())
    }

    #[tokio::test]
    async fn maps_429_to_rate_limited_with_hint() {
        let err = status_kind(ResponseTemplate::new(429).insert_header("Retry-After", "7"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), SourceErrorKind::RateLimited);
        assert!(err.message().contains("retry after 7"));
    }

    #[tokio::test]
    async fn maps_5xx_to_unreachable() {
        let err = status_kind(ResponseTemplate::new(503)).await.unwrap_err();
        assert_eq!(err.kind(), SourceErrorKind::Unreachable);
    }

    #[tokio::test]
    async fn maps_4xx_to_invalid_query() {
        let err = status_kind(ResponseTemplate::new(400)).await.unwrap_err();
        assert_eq!(err.kind(), SourceErrorKind::InvalidQuery);
    }

    #[tokio::test]
    async fn success_passes_through() {
        assert!(status_kind(ResponseTemplate::new(200)).await.is_ok());
    }

    #[tokio::test]
    async fn slow_response_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let client = build_client("harvester-test").unwrap();
        let err = send(client.get(server.uri()), Duration::from_millis(100), "slow")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), SourceErrorKind::Timeout);
    }

    #[tokio::test]
    async fn budget_runs_down_and_refuses_long_pauses() {
        let budget = Budget::start(Duration::from_millis(500));
        assert!(budget.remaining() <= Duration::from_millis(500));
        assert!(budget.remaining() >= Duration::from_millis(400));

        assert!(budget.pause(Duration::from_millis(100)).await);
        assert!(budget.remaining() < Duration::from_millis(400));

        // Pausing past the deadline is skipped
        let started = Instant::now();
        assert!(!budget.pause(Duration::from_secs(3)).await);
        assert!(started.elapsed() < Duration::from_millis(100));

        tokio::time::sleep(budget.remaining()).await;
        assert!(budget.is_exhausted());
        assert_eq!(budget.remaining(), Duration::ZERO);
    }

    #[tokio::test]
    async fn refused_connection_is_unreachable() {
        let client = build_client("harvester-test").unwrap();
        // Port 9 (discard) is not listening on test hosts
        let err = send(
            client.get("http://127.0.0.1:9/"),
            Duration::from_secs(2),
            "closed",
        )
        .await
        .unwrap_err();
        assert!(err.is_transient());
    }
}
