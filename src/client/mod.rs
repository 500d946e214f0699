//! RTSP transport: one request out, one matching response back.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use rtsp_types::headers::{self, HeaderName};
use rtsp_types::{Message, Method, Response, Version};
use tracing::{debug, info, Level};
use url::Url;

use crate::{
    bail,
    error::{Error, ErrorInt},
    tokyo, wrap, RtspMessageContext,
};

pub const DEFAULT_RTSP_PORT: u16 = 554;

/// An immutable description of one RTSP request.
///
/// Everything the request needs travels with it; the transport only adds
/// `CSeq`.
#[derive(Clone, Debug)]
pub struct RtspRequest {
    method: Method,
    uri: Url,
    headers: Vec<(HeaderName, String)>,
}

impl RtspRequest {
    pub fn new(method: Method, uri: Url) -> Self {
        Self {
            method,
            uri,
            headers: Vec::new(),
        }
    }

    /// Builds a request from a textual URI, as composed by the session driver.
    pub fn parse(method: Method, uri: &str) -> Result<Self, Error> {
        let uri = Url::parse(uri)
            .map_err(|e| wrap!(ErrorInt::InvalidArgument(format!("Bad URI {}: {}", uri, e))))?;
        Ok(Self::new(method, uri))
    }

    pub fn header(mut self, name: HeaderName, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    /// Adds the header only when `value` is present.
    pub fn optional_header(self, name: HeaderName, value: Option<&str>) -> Self {
        match value {
            Some(v) => self.header(name, v),
            None => self,
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Url {
        &self.uri
    }

    pub fn headers(&self) -> &[(HeaderName, String)] {
        &self.headers
    }

    pub fn get_header(&self, name: &HeaderName) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    fn to_message(&self, cseq: u32) -> rtsp_types::Request<Bytes> {
        let mut builder = rtsp_types::Request::builder(self.method.clone(), Version::V1_0)
            .request_uri(self.uri.clone())
            .header(headers::CSEQ, cseq.to_string());
        for (name, value) in &self.headers {
            builder = builder.header(name.clone(), value.as_str());
        }
        builder.build(Bytes::new())
    }
}

/// Sends RTSP requests and hands back the server's response.
///
/// Responses outside 2xx/3xx come back as an `RtspResponseError`.
#[async_trait]
pub trait Transport: Send {
    async fn send(&mut self, request: &RtspRequest) -> Result<Response<Bytes>, Error>;
}

pub struct RtspConnection {
    inner: tokyo::Connection,
    next_cseq: u32,
    timeout: Duration,
}

impl RtspConnection {
    /// Connects to the server named by `url`, giving up after `timeout`.
    pub async fn connect(url: &Url, timeout: Duration) -> Result<Self, Error> {
        let host =
            RtspConnection::validate_url(url).map_err(|e| wrap!(ErrorInt::InvalidArgument(e)))?;
        let port = url.port().unwrap_or(DEFAULT_RTSP_PORT);
        let inner = tokio::time::timeout(timeout, tokyo::Connection::connect(host, port))
            .await
            .map_err(|_| wrap!(ErrorInt::Timeout))?
            .map_err(|e| wrap!(ErrorInt::ConnectError(e)))?;
        info!("Connected {}", inner.ctx());
        Ok(Self {
            inner,
            next_cseq: 1,
            timeout,
        })
    }

    fn validate_url(url: &Url) -> Result<url::Host<&str>, String> {
        if url.scheme() != "rtsp" {
            return Err(format!(
                "Bad URL {}; only scheme rtsp supported",
                url.as_str()
            ));
        }
        if url.username() != "" || url.password().is_some() {
            return Err("URL must not contain credentials".to_owned());
        }
        url.host()
            .ok_or_else(|| format!("Must specify host in rtsp url {}", &url))
    }

    async fn round_trip(
        &mut self,
        cseq: u32,
        req: rtsp_types::Request<Bytes>,
    ) -> Result<(RtspMessageContext, Response<Bytes>), Error> {
        self.inner
            .send(Message::Request(req))
            .await
            .map_err(|e| wrap!(e))?;
        loop {
            let msg = match self.inner.next().await {
                Some(msg) => msg?,
                None => bail!(ErrorInt::RtspReadError {
                    conn_ctx: *self.inner.ctx(),
                    msg_ctx: self.inner.eof_ctx(),
                    source: std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "connection closed by peer",
                    ),
                }),
            };
            match msg.msg {
                Message::Response(r) => match get_cseq(&r) {
                    Some(c) if c == cseq => return Ok((msg.ctx, r)),
                    other => debug!("Skipping response with CSeq {:?}, want {}", other, cseq),
                },
                Message::Request(r) => {
                    debug!("Ignoring {} request from server", Into::<&str>::into(r.method()))
                }
                Message::Data(_) => continue,
            }
        }
    }
}

#[async_trait]
impl Transport for RtspConnection {
    async fn send(&mut self, request: &RtspRequest) -> Result<Response<Bytes>, Error> {
        let cseq = self.next_cseq;
        self.next_cseq += 1;
        let req = request.to_message(cseq);
        if tracing::enabled!(Level::DEBUG) {
            debug!("> {}", dump(&Message::Request(req.clone())));
        }

        let (msg_ctx, resp) = tokio::time::timeout(self.timeout, self.round_trip(cseq, req))
            .await
            .map_err(|_| wrap!(ErrorInt::Timeout))??;
        info!("{} response to CSeq={}", resp.status(), cseq);
        if tracing::enabled!(Level::DEBUG) {
            debug!("< {}", dump(&Message::Response(resp.clone())));
        } else {
            for line in header_lines(&resp) {
                info!("  {}", line);
            }
            // The DESCRIBE body is the session description and goes to the .sdp file.
            if *request.method() != Method::Describe && !resp.body().is_empty() {
                info!("{}", String::from_utf8_lossy(resp.body()).trim_end());
            }
        }

        if !is_acceptable(&resp) {
            bail!(ErrorInt::RtspResponseError {
                conn_ctx: *self.inner.ctx(),
                msg_ctx,
                method: request.method().clone(),
                cseq,
                status: resp.status(),
                description: "Unexpected RTSP response status".into(),
                body: resp.body().clone(),
            });
        }
        Ok(resp)
    }
}

/// 2xx and 3xx count as success; redirects are not followed.
fn is_acceptable(response: &Response<Bytes>) -> bool {
    (200..400).contains(&u16::from(response.status()))
}

fn get_cseq(response: &Response<Bytes>) -> Option<u32> {
    response
        .header(&headers::CSEQ)
        .and_then(|cseq| cseq.as_str().trim().parse().ok())
}

/// Header lines of a response as sent on the wire, without the status line.
fn header_lines(response: &Response<Bytes>) -> Vec<String> {
    let text = dump(&Message::Response(response.clone()));
    let head = text.split("\r\n\r\n").next().unwrap_or("");
    head.lines()
        .skip(1)
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.trim_end().to_owned())
        .collect()
}

fn dump(msg: &Message<Bytes>) -> String {
    let mut buf = Vec::new();
    match msg.write(&mut buf) {
        Ok(()) => String::from_utf8_lossy(&buf).into_owned(),
        Err(e) => format!("<unprintable message: {:?}>", e),
    }
}
