//! Long-lived event-stream transport.
//!
//! Opens an HTTP GET whose response body never ends on its own and exposes
//! it as a stream of text lines. Dropping the [`LineStream`] closes the
//! underlying connection, which is how callers force a blocked read to
//! return.

use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use futures_util::{StreamExt, TryStreamExt};
use tokio_util::codec::{FramedRead, LinesCodec};
use tokio_util::io::StreamReader;
use tracing::{debug, trace};
use url::Url;

use crate::error::Error;
use crate::transport::TransportConfig;

/// Longest single line accepted from the server.
const MAX_LINE_LENGTH: usize = 512 * 1024;

/// Lines of the response body, without their terminators.
///
/// Ends with `None` when the server closes the stream; yields at most one
/// `Err` and then ends.
pub type LineStream = BoxStream<'static, Result<String, Error>>;

/// An opened event stream.
pub struct StreamResponse {
    /// HTTP status of the response.
    pub status: u16,
    /// Body lines. Only meaningful for 2xx responses.
    pub lines: LineStream,
}

impl StreamResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Opens event streams.
///
/// `open` resolves once response headers arrive. Connection-level
/// failures (DNS, refused, TLS) are reported as `Err`; any HTTP response,
/// including 4xx/5xx, is reported as `Ok` with its status.
pub trait StreamTransport: Send + Sync {
    fn open<'a>(
        &'a self,
        url: &'a Url,
        headers: &'a [(String, String)],
    ) -> BoxFuture<'a, Result<StreamResponse, Error>>;
}

/// [`StreamTransport`] backed by `reqwest`, with an idle-read timeout.
///
/// The idle timer restarts on every line, keep-alive comments included.
pub struct HttpStreamTransport {
    http: reqwest::Client,
    idle_timeout: Duration,
}

impl HttpStreamTransport {
    pub fn new(transport: &TransportConfig, idle_timeout: Duration) -> Result<Self, Error> {
        Ok(Self::with_client(
            transport.build_streaming_client()?,
            idle_timeout,
        ))
    }

    /// Wrap a pre-built client. It must not carry a whole-request timeout.
    pub fn with_client(http: reqwest::Client, idle_timeout: Duration) -> Self {
        Self { http, idle_timeout }
    }

    async fn open_stream(
        &self,
        url: &Url,
        headers: &[(String, String)],
    ) -> Result<StreamResponse, Error> {
        let mut request = self
            .http
            .get(url.clone())
            .header(reqwest::header::ACCEPT, "text/event-stream");
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let resp = request.send().await.map_err(classify_send_error)?;
        let status = resp.status().as_u16();
        debug!(status, "event stream response received");

        let body = resp.bytes_stream().map_err(std::io::Error::other);
        let framed = FramedRead::new(
            StreamReader::new(body),
            LinesCodec::new_with_max_length(MAX_LINE_LENGTH),
        );

        Ok(StreamResponse {
            status,
            lines: idle_guarded(framed, self.idle_timeout),
        })
    }
}

impl StreamTransport for HttpStreamTransport {
    fn open<'a>(
        &'a self,
        url: &'a Url,
        headers: &'a [(String, String)],
    ) -> BoxFuture<'a, Result<StreamResponse, Error>> {
        Box::pin(self.open_stream(url, headers))
    }
}

/// Re-wrap certificate failures so they classify as non-retryable
/// without callers having to dig through reqwest's source chain.
fn classify_send_error(err: reqwest::Error) -> Error {
    let err = Error::Transport(err);
    if err.is_certificate_error() {
        Error::Tls(err.to_string())
    } else {
        err
    }
}

fn idle_guarded<S>(lines: S, idle: Duration) -> LineStream
where
    S: futures_util::Stream<Item = Result<String, tokio_util::codec::LinesCodecError>>
        + Send
        + 'static,
{
    let stream = async_stream::stream! {
        let mut lines = Box::pin(lines);
        loop {
            match tokio::time::timeout(idle, lines.next()).await {
                Ok(Some(Ok(line))) => {
                    trace!(len = line.len(), "event stream line");
                    yield Ok(line);
                }
                Ok(Some(Err(e))) => {
                    yield Err(Error::StreamRead(e.to_string()));
                    break;
                }
                Ok(None) => break,
                Err(_) => {
                    yield Err(Error::IdleTimeout { idle_secs: idle.as_secs() });
                    break;
                }
            }
        }
    };
    stream.boxed()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn idle_guard_times_out_silent_stream() {
        let silent = futures_util::stream::pending::<
            Result<String, tokio_util::codec::LinesCodecError>,
        >();
        let mut lines = idle_guarded(silent, Duration::from_secs(80));

        let first = lines.next().await;
        assert!(matches!(
            first,
            Some(Err(Error::IdleTimeout { idle_secs: 80 }))
        ));
        assert!(lines.next().await.is_none());
    }

    #[tokio::test]
    async fn idle_guard_passes_lines_through() {
        let source = futures_util::stream::iter(vec![
            Ok("id: 1".to_string()),
            Ok(String::new()),
        ]);
        let lines: Vec<_> = idle_guarded(source, Duration::from_secs(5))
            .collect::<Vec<_>>()
            .await;

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].as_ref().unwrap(), "id: 1");
        assert_eq!(lines[1].as_ref().unwrap(), "");
    }
}
