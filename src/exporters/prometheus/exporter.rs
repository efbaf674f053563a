// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use http::header::{AUTHORIZATION, CONTENT_ENCODING, CONTENT_TYPE, USER_AGENT};
use http::{HeaderValue, Method, Request, Response, Uri};
use http_body_util::Full;
use prost::Message;
use tokio::select;
use tokio::time::{Instant, interval_at, sleep_until, timeout_at};
use tower::{BoxError, Service, ServiceExt};
use tracing::{debug, error, info, warn};

use crate::exporters::prometheus::client::RemoteWriteClient;
use crate::exporters::prometheus::config::RemoteWriteConfig;
use crate::exporters::prometheus::errors::ExporterError;
use crate::exporters::prometheus::labels::{AlertLabels, METRIC_NAME_LABEL};
use crate::exporters::prometheus::proto::{
    Label, MetricMetadata, MetricType, Sample, TimeSeries, WriteRequest,
};
use crate::receivers::file::{AlertDispatch, MatchEvent};

pub const REMOTE_WRITE_VERSION: &str = "0.1.0";

/// Sends single-sample write requests to a Prometheus remote-write endpoint.
///
/// A failed send is retried on a fixed interval until it succeeds or twice
/// the configured timeout has elapsed, after which it is dropped.
pub struct RemoteWriteExporter<S = RemoteWriteClient> {
    client: S,
    endpoint: Uri,
    user_agent: HeaderValue,
    auth: Option<HeaderValue>,
    config: RemoteWriteConfig,
}

impl RemoteWriteExporter<RemoteWriteClient> {
    pub fn from_config(config: RemoteWriteConfig) -> Result<Self, ExporterError> {
        let client = RemoteWriteClient::build(config.tls_ca_file.as_deref())
            .map_err(|e| ExporterError::Config(e.to_string()))?;
        Self::new(client, config)
    }
}

impl<S> RemoteWriteExporter<S>
where
    S: Service<Request<Full<Bytes>>, Response = Response<Bytes>, Error = BoxError>
        + Clone
        + Send
        + Sync
        + 'static,
    S::Future: Send,
{
    pub fn new(client: S, config: RemoteWriteConfig) -> Result<Self, ExporterError> {
        let endpoint: Uri = config
            .endpoint
            .parse()
            .map_err(|e| ExporterError::Config(format!("invalid endpoint {}: {}", config.endpoint, e)))?;
        if endpoint.scheme().is_none() || endpoint.host().is_none() {
            return Err(ExporterError::Config(format!(
                "endpoint must be an absolute URL: {}",
                config.endpoint
            )));
        }
        if config.retry_interval.is_zero() || config.timeout.is_zero() {
            return Err(ExporterError::Config(
                "timeout and retry interval must be non-zero".to_string(),
            ));
        }

        let user_agent = HeaderValue::from_str(&config.user_agent)
            .map_err(|e| ExporterError::Config(format!("invalid user agent: {}", e)))?;
        let auth = match &config.auth {
            None => None,
            Some(auth) => {
                let mut value = HeaderValue::from_str(&auth.header_value())
                    .map_err(|e| ExporterError::Config(format!("invalid credentials: {}", e)))?;
                value.set_sensitive(true);
                Some(value)
            }
        };

        Ok(Self {
            client,
            endpoint,
            user_agent,
            auth,
            config,
        })
    }

    /// Send one sample with `labels`, stamped with the current time.
    pub async fn send(&self, value: f64, labels: Vec<Label>) -> Result<(), ExporterError> {
        self.send_at(value, labels, SystemTime::now()).await
    }

    pub async fn send_event(&self, event: &MatchEvent) -> Result<(), ExporterError> {
        let labels = AlertLabels::from_event(event).into_labels();
        self.send_at(1.0, labels, event.timestamp).await
    }

    async fn send_at(
        &self,
        value: f64,
        labels: Vec<Label>,
        at: SystemTime,
    ) -> Result<(), ExporterError> {
        let body = self.encode(value, labels, at)?;
        let give_up_at = Instant::now() + self.config.give_up_after();

        let mut attempts = 1;
        match self.attempt(body.clone(), give_up_at).await {
            Ok(()) => {
                debug!(endpoint = %self.endpoint, "Sent remote write request.");
                return Ok(());
            }
            Err(e) => {
                warn!(endpoint = %self.endpoint, error = %e, retry_in = ?self.config.retry_interval, "Remote write failed, retrying.");
            }
        }

        let mut retry = interval_at(
            Instant::now() + self.config.retry_interval,
            self.config.retry_interval,
        );
        loop {
            select! {
                biased;

                _ = sleep_until(give_up_at) => {
                    error!(endpoint = %self.endpoint, attempts, "Giving up on remote write request.");
                    return Err(ExporterError::RetriesExhausted { attempts });
                },

                _ = retry.tick() => {
                    attempts += 1;
                    match self.attempt(body.clone(), give_up_at).await {
                        Ok(()) => {
                            info!(endpoint = %self.endpoint, attempts, "Remote write succeeded after retry.");
                            return Ok(());
                        }
                        Err(e) => debug!(endpoint = %self.endpoint, attempts, error = %e, "Remote write retry failed."),
                    }
                },
            }
        }
    }

    async fn attempt(&self, body: Bytes, give_up_at: Instant) -> Result<(), ExporterError> {
        let deadline = (Instant::now() + self.config.timeout).min(give_up_at);
        match timeout_at(deadline, self.post(body)).await {
            Ok(res) => res,
            Err(_) => Err(ExporterError::Timeout),
        }
    }

    async fn post(&self, body: Bytes) -> Result<(), ExporterError> {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(self.endpoint.clone())
            .header(CONTENT_ENCODING, "snappy")
            .header(CONTENT_TYPE, "application/x-protobuf")
            .header("X-Prometheus-Remote-Write-Version", REMOTE_WRITE_VERSION)
            .header(USER_AGENT, self.user_agent.clone());
        if let Some(auth) = &self.auth {
            builder = builder.header(AUTHORIZATION, auth.clone());
        }
        let req = builder.body(Full::new(body))?;

        let resp = self
            .client
            .clone()
            .oneshot(req)
            .await
            .map_err(ExporterError::Transport)?;

        let status = resp.status();
        if status.as_u16() >= 400 {
            let body = String::from_utf8_lossy(resp.body()).into_owned();
            return Err(ExporterError::Status { status, body });
        }
        Ok(())
    }

    /// Serialize and snappy-compress a single-sample write request.
    pub fn encode(
        &self,
        value: f64,
        mut labels: Vec<Label>,
        at: SystemTime,
    ) -> Result<Bytes, ExporterError> {
        labels.retain(|l| l.name != METRIC_NAME_LABEL);
        labels.push(Label::new(METRIC_NAME_LABEL, self.config.metric_name.as_str()));
        labels.sort_by(|a, b| a.name.cmp(&b.name));

        let timestamp = at
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or_default();

        let request = WriteRequest {
            timeseries: vec![TimeSeries {
                labels,
                samples: vec![Sample { value, timestamp }],
            }],
            metadata: vec![MetricMetadata {
                r#type: MetricType::Histogram as i32,
                metric_family_name: self.config.metric_name.clone(),
                help: self.config.help.clone(),
                unit: String::new(),
            }],
        };

        let compressed = snap::raw::Encoder::new().compress_vec(&request.encode_to_vec())?;
        Ok(Bytes::from(compressed))
    }
}

/// Fires each event on its own tokio task so tail tasks never wait on the network.
pub struct BackgroundDispatcher<S = RemoteWriteClient> {
    exporter: Arc<RemoteWriteExporter<S>>,
}

impl<S> BackgroundDispatcher<S> {
    pub fn new(exporter: Arc<RemoteWriteExporter<S>>) -> Self {
        Self { exporter }
    }
}

impl<S> AlertDispatch for BackgroundDispatcher<S>
where
    S: Service<Request<Full<Bytes>>, Response = Response<Bytes>, Error = BoxError>
        + Clone
        + Send
        + Sync
        + 'static,
    S::Future: Send,
{
    fn dispatch(&self, event: MatchEvent) {
        let exporter = self.exporter.clone();
        tokio::spawn(async move {
            // Failures are logged by the exporter.
            let _ = exporter.send_event(&event).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exporters::prometheus::config::Authentication;
    use http::StatusCode;
    use http_body_util::BodyExt;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::task::{Context, Poll};
    use std::time::Duration;

    #[derive(Clone)]
    struct MockRemote {
        calls: Arc<AtomicUsize>,
        fail_first: usize,
        seen: Arc<Mutex<Vec<(http::HeaderMap, Bytes)>>>,
    }

    impl MockRemote {
        fn failing(fail_first: usize) -> Self {
            Self {
                calls: Arc::new(AtomicUsize::new(0)),
                fail_first,
                seen: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Service<Request<Full<Bytes>>> for MockRemote {
        type Response = Response<Bytes>;
        type Error = BoxError;
        type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, req: Request<Full<Bytes>>) -> Self::Future {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let fail = call < self.fail_first;
            let seen = self.seen.clone();
            Box::pin(async move {
                let (head, body) = req.into_parts();
                let body = body.collect().await?.to_bytes();
                seen.lock().unwrap().push((head.headers, body));
                let status = if fail {
                    StatusCode::SERVICE_UNAVAILABLE
                } else {
                    StatusCode::NO_CONTENT
                };
                Ok(Response::builder().status(status).body(Bytes::new())?)
            })
        }
    }

    fn config(timeout: Duration) -> RemoteWriteConfig {
        RemoteWriteConfig {
            endpoint: "http://tsdb.local:9090/api/v1/write".to_string(),
            timeout,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn sends_compressed_write_request() {
        let remote = MockRemote::failing(0);
        let mut cfg = config(Duration::from_secs(5));
        cfg.auth = Some(Authentication::Basic {
            username: "admin".to_string(),
            password: "secret".to_string(),
        });
        let exporter = RemoteWriteExporter::new(remote.clone(), cfg).unwrap();

        let at = UNIX_EPOCH + Duration::from_millis(1_700_000_000_123);
        let labels = AlertLabels::new("api", "/var/log/api.log", "10.0.0.7")
            .with_values("keywords", &["ERROR"])
            .into_labels();
        exporter.send_at(1.0, labels, at).await.unwrap();

        assert_eq!(1, remote.calls());
        let (headers, body) = remote.seen.lock().unwrap().pop().unwrap();
        assert_eq!("snappy", headers[CONTENT_ENCODING]);
        assert_eq!("application/x-protobuf", headers[CONTENT_TYPE]);
        assert_eq!("0.1.0", headers["X-Prometheus-Remote-Write-Version"]);
        assert_eq!("keyword-exporter", headers[USER_AGENT]);
        assert_eq!("Basic YWRtaW46c2VjcmV0", headers[AUTHORIZATION]);

        let raw = snap::raw::Decoder::new().decompress_vec(&body).unwrap();
        let request = WriteRequest::decode(raw.as_slice()).unwrap();
        let series = &request.timeseries[0];
        assert_eq!(
            Label::new("__name__", "keyword_appear_alert"),
            series.labels[0]
        );
        assert_eq!(5, series.labels.len());
        assert_eq!(1.0, series.samples[0].value);
        assert_eq!(1_700_000_000_123, series.samples[0].timestamp);
        assert_eq!(MetricType::Histogram as i32, request.metadata[0].r#type);
        assert_eq!("some keyword appear alert", request.metadata[0].help);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_on_fixed_interval_until_success() {
        let remote = MockRemote::failing(2);
        let exporter = RemoteWriteExporter::new(remote.clone(), config(Duration::from_secs(60))).unwrap();

        let started = Instant::now();
        exporter.send(1.0, vec![]).await.unwrap();

        assert_eq!(3, remote.calls());
        assert!(started.elapsed() >= Duration::from_secs(20));
        assert!(started.elapsed() < Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_twice_the_timeout() {
        let remote = MockRemote::failing(usize::MAX);
        let exporter = RemoteWriteExporter::new(remote.clone(), config(Duration::from_secs(30))).unwrap();

        let started = Instant::now();
        let err = exporter.send(1.0, vec![]).await.unwrap_err();

        assert!(matches!(err, ExporterError::RetriesExhausted { .. }));
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(60));
        assert!(elapsed < Duration::from_secs(61));

        // Initial attempt plus at most one retry per interval of the window.
        let calls = remote.calls();
        assert!(calls >= 2, "calls = {calls}");
        assert!(calls <= 1 + 6, "calls = {calls}");

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(calls, remote.calls());
    }

    #[test]
    fn rejects_relative_endpoint() {
        let mut cfg = config(Duration::from_secs(5));
        cfg.endpoint = "/api/v1/write".to_string();
        assert!(matches!(
            RemoteWriteExporter::new(MockRemote::failing(0), cfg),
            Err(ExporterError::Config(_))
        ));
    }
}
