// SPDX-License-Identifier: Apache-2.0

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use http::{Request, Response};
use http_body_util::{BodyExt, Full};
use hyper_rustls::{ConfigBuilderExt, HttpsConnector};
use hyper_util::client::legacy::Client as HyperClient;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use rustls::pki_types::CertificateDer;
use rustls::pki_types::pem::PemObject;
use rustls::{ClientConfig, RootCertStore};
use tower::{BoxError, Service};

/// HTTP(S) client for remote-write requests. Responses are returned with
/// their body fully buffered.
#[derive(Clone)]
pub struct RemoteWriteClient {
    inner: HyperClient<HttpsConnector<HttpConnector>, Full<Bytes>>,
}

impl RemoteWriteClient {
    pub fn build(tls_ca_file: Option<&Path>) -> Result<Self, BoxError> {
        let https = hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(tls_config(tls_ca_file)?)
            .https_or_http()
            .enable_http1()
            .build();

        let inner = HyperClient::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(4)
            .timer(TokioTimer::new())
            .build::<_, Full<Bytes>>(https);

        Ok(Self { inner })
    }
}

fn tls_config(ca_file: Option<&Path>) -> Result<ClientConfig, BoxError> {
    let builder = match ca_file {
        None => ClientConfig::builder().with_native_roots()?,
        Some(path) => {
            let mut roots = RootCertStore::empty();
            let certs = CertificateDer::pem_file_iter(path)
                .map_err(|e| format!("unable to read CA file {}: {:?}", path.display(), e))?;
            for cert in certs {
                let cert = cert.map_err(|e| format!("invalid CA certificate: {:?}", e))?;
                roots.add(cert)?;
            }
            ClientConfig::builder().with_root_certificates(roots)
        }
    };
    Ok(builder.with_no_client_auth())
}

impl Service<Request<Full<Bytes>>> for RemoteWriteClient {
    type Response = Response<Bytes>;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Full<Bytes>>) -> Self::Future {
        let inner = self.inner.clone();
        Box::pin(async move {
            let (head, body) = inner.request(req).await?.into_parts();
            let body = body.collect().await?.to_bytes();
            Ok(Response::from_parts(head, body))
        })
    }
}
