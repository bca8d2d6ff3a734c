//! HTTPS connector for [`super::HttpClient`].
//!
//! No proxy support (out of scope here) and no plaintext fallback (the
//! engine only ever talks to HTTPS endpoints), so the connector always
//! returns a TLS stream rather than a `MaybeTlsStream`-style enum.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use anyhow::{format_err, Error};
use hyper::client::HttpConnector;
use hyper::service::Service;
use hyper::Uri;
use openssl::ssl::SslConnector;
use tokio::net::TcpStream;
use tokio_openssl::SslStream;

#[derive(Clone)]
pub struct HttpsConnector {
    connector: HttpConnector,
    ssl_connector: Arc<SslConnector>,
}

impl HttpsConnector {
    pub fn new(ssl_connector: SslConnector) -> Self {
        let mut connector = HttpConnector::new();
        connector.enforce_http(false);
        Self {
            connector,
            ssl_connector: Arc::new(ssl_connector),
        }
    }

    async fn secure_stream(
        tcp_stream: TcpStream,
        ssl_connector: &SslConnector,
        host: &str,
    ) -> Result<SslStream<TcpStream>, Error> {
        let config = ssl_connector.configure()?;
        let mut conn = SslStream::new(config.into_ssl(host)?, tcp_stream)?;
        Pin::new(&mut conn).connect().await?;
        Ok(conn)
    }
}

impl hyper::service::Service<Uri> for HttpsConnector {
    type Response = SslStream<TcpStream>;
    type Error = Error;
    #[allow(clippy::type_complexity)]
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn poll_ready(&mut self, ctx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.connector.poll_ready(ctx).map_err(|err| err.into())
    }

    fn call(&mut self, dst: Uri) -> Self::Future {
        let mut connector = self.connector.clone();
        let ssl_connector = Arc::clone(&self.ssl_connector);
        let host = match dst.host() {
            Some(host) => host.to_owned(),
            None => return Box::pin(async move { Err(format_err!("missing host in URI")) }),
        };

        Box::pin(async move {
            let dst_str = dst.to_string();
            let tcp_stream = connector
                .call(dst)
                .await
                .map_err(|err| format_err!("error connecting to {}: {}", dst_str, err))?;
            Self::secure_stream(tcp_stream, &ssl_connector, &host).await
        })
    }
}
