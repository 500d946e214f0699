use std::{fmt::Display, sync::Arc};

use bytes::Bytes;
use crate::{ConnectionContext, RtspMessageContext};
use thiserror::Error;

#[derive(Clone)]
pub struct Error(pub(crate) Arc<ErrorInt>);

impl Error {
    pub fn kind(&self) -> &ErrorInt {
        &self.0
    }

    /// The status of a non-success response, if that is what this error is.
    pub fn status(&self) -> Option<rtsp_types::StatusCode> {
        match &*self.0 {
            ErrorInt::RtspResponseError { status, .. } => Some(status.clone()),
            _ => None,
        }
    }

    /// The body that came with a non-success response.
    pub fn response_body(&self) -> Option<&Bytes> {
        match &*self.0 {
            ErrorInt::RtspResponseError { body, .. } => Some(body),
            _ => None,
        }
    }
}

impl From<ErrorInt> for Error {
    fn from(e: ErrorInt) -> Self {
        Error(Arc::new(e))
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(&self.0, f)
    }
}

impl std::error::Error for Error {}

#[derive(Debug, Error)]
pub enum ErrorInt {
    /// The method's caller provided an invalid argument.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Unparseable or unexpected RTSP message.
    #[error("[{conn_ctx}, {msg_ctx}] RTSP framing error: {description}")]
    RtspFramingError {
        conn_ctx: ConnectionContext,
        msg_ctx: RtspMessageContext,
        description: String,
    },

    #[error("[{conn_ctx}, {msg_ctx}] {status} response to {} CSeq={cseq}: \
             {description}", Into::<&str>::into(.method))]
    RtspResponseError {
        conn_ctx: ConnectionContext,
        msg_ctx: RtspMessageContext,
        method: rtsp_types::Method,
        cseq: u32,
        status: rtsp_types::StatusCode,
        description: String,
        body: Bytes,
    },

    #[error("Unable to connect to RTSP server: {0}")]
    ConnectError(#[source] std::io::Error),

    #[error("[{conn_ctx}, {msg_ctx}] Error reading from RTSP peer: {source}")]
    RtspReadError {
        conn_ctx: ConnectionContext,
        msg_ctx: RtspMessageContext,
        source: std::io::Error,
    },

    #[error("[{conn_ctx}] Error writing to RTSP peer: {source}")]
    WriteError {
        conn_ctx: ConnectionContext,
        source: std::io::Error,
    },

    /// Neither the `.sdp` file nor the stdout fallback accepted the body.
    #[error("Unable to write SDP for '{filename}' to standard output: {source}")]
    SdpWriteError {
        filename: String,
        source: std::io::Error,
    },

    #[error("Timeout")]
    Timeout,
}
