use std::future::Future;
use std::time::Duration;

use crate::{control::Workload, error::IssueError};

/// Performs one unit of simulated work against an external endpoint.
///
/// An `Issuer` makes exactly one call per invocation and never retries. It
/// reports the measured round-trip latency on success, or an [`IssueError`]
/// describing why the call failed. It must not touch any shared counters: the
/// virtual user calling it is responsible for folding the outcome into the
/// engine's statistics.
///
/// Issuers are shared by every virtual user, so heavy resources (HTTP clients,
/// connection pools) belong in the issuer itself, never inside `issue`.
///
/// # Example
/// ```rust
/// use std::time::Duration;
/// use throng::{Issuer, Workload, error::IssueError};
///
/// struct Sleeper;
///
/// impl Issuer for Sleeper {
///     async fn issue(&self, workload: Workload) -> Result<Duration, IssueError> {
///         tokio::time::sleep(workload.duration()).await;
///         Ok(workload.duration())
///     }
/// }
/// ```
pub trait Issuer
where
    Self: Send + Sync + 'static,
{
    fn issue(&self, workload: Workload)
    -> impl Future<Output = Result<Duration, IssueError>> + Send;
}

#[cfg(feature = "http")]
pub use http::*;

#[cfg(feature = "http")]
mod http {
    use super::*;

    use reqwest::Client;
    use tokio::time::Instant;
    use typed_builder::TypedBuilder;

    /// Issues `GET {base_url}{path}?{param}={workload in ms}` and times the round trip.
    ///
    /// - 2xx → success with the elapsed time.
    /// - any other status → [`IssueError::Application`], latency still measured.
    /// - connection failures and client timeouts → [`IssueError::Transport`].
    ///
    /// There is no timeout unless one is configured; a stalled endpoint then
    /// simply shows up as a growing in-flight gauge.
    #[derive(TypedBuilder)]
    pub struct HttpIssuer {
        #[builder(setter(into))]
        pub base_url: String,
        #[builder(default = "/compute".to_string(), setter(into))]
        pub path: String,
        #[builder(default = "ms".to_string(), setter(into))]
        pub param: String,
        #[builder(default, setter(strip_option))]
        pub timeout: Option<Duration>,
        #[builder(default = Client::new())]
        pub client: Client,
    }

    impl HttpIssuer {
        pub fn url(&self) -> String {
            format!("{}{}", self.base_url.trim_end_matches('/'), self.path)
        }
    }

    impl Issuer for HttpIssuer {
        async fn issue(&self, workload: Workload) -> Result<Duration, IssueError> {
            let mut request = self
                .client
                .get(self.url())
                .query(&[(self.param.as_str(), workload.as_millis())]);
            if let Some(timeout) = self.timeout {
                request = request.timeout(timeout);
            }

            let start = Instant::now();
            let response = request
                .send()
                .await
                .map_err(|e| IssueError::Transport(e.to_string()))?;
            let latency = start.elapsed();

            let status = response.status();
            if status.is_success() {
                Ok(latency)
            } else {
                Err(IssueError::Application {
                    status: status.as_u16(),
                    latency,
                })
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use wiremock::{
            Mock, MockServer, ResponseTemplate,
            matchers::{method, path, query_param},
        };

        #[tokio::test]
        async fn success_reports_latency() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/compute"))
                .and(query_param("ms", "25"))
                .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
                .expect(1)
                .mount(&server)
                .await;

            let issuer = HttpIssuer::builder().base_url(server.uri()).build();
            let result = issuer.issue(Workload::from_millis(25).unwrap()).await;

            assert!(result.is_ok());
        }

        #[tokio::test]
        async fn error_status_is_an_application_error_with_latency() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/work"))
                .respond_with(ResponseTemplate::new(503))
                .mount(&server)
                .await;

            let issuer = HttpIssuer::builder()
                .base_url(format!("{}/", server.uri()))
                .path("/work")
                .param("duration")
                .build();
            let err = issuer
                .issue(Workload::from_millis(5).unwrap())
                .await
                .unwrap_err();

            match err {
                IssueError::Application { status, .. } => assert_eq!(status, 503),
                other => panic!("expected application error, got {other:?}"),
            }
            assert!(err.latency().is_some());
        }

        #[tokio::test]
        async fn unreachable_endpoint_is_a_transport_error() {
            // Port 9 (discard) is closed on CI machines.
            let issuer = HttpIssuer::builder()
                .base_url("http://127.0.0.1:9")
                .timeout(Duration::from_secs(2))
                .build();
            let err = issuer
                .issue(Workload::from_millis(5).unwrap())
                .await
                .unwrap_err();

            assert!(matches!(err, IssueError::Transport(_)));
            assert_eq!(err.latency(), None);
        }

        #[tokio::test]
        async fn slow_endpoint_hits_configured_timeout() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
                .mount(&server)
                .await;

            let issuer = HttpIssuer::builder()
                .base_url(server.uri())
                .timeout(Duration::from_millis(50))
                .build();
            let err = issuer
                .issue(Workload::from_millis(5).unwrap())
                .await
                .unwrap_err();

            assert!(matches!(err, IssueError::Transport(_)));
        }
    }
}
