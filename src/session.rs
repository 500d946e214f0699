//! The OPTIONS → DESCRIBE → SETUP → PLAY → TEARDOWN sequence.

use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use rtsp_types::{headers, Method, Response};
use smallvec::SmallVec;
use tracing::{error, info};

use crate::client::{RtspRequest, Transport};
use crate::error::Error;
use crate::sdp::{self, SdpStore};

pub const DEFAULT_TRANSPORT: &str = "RTP/AVP;unicast;client_port=1234-1235";
pub const DEFAULT_RANGE: &str = "0.000-";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-run settings. Fixed once the session starts.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub url: String,
    pub transport: String,
    /// `None` sends PLAY without a `Range` header.
    pub range: Option<String>,
    pub teardown: bool,
    pub interactive: bool,
    pub verbose: bool,
    pub timeout: Duration,
}

impl SessionConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            transport: DEFAULT_TRANSPORT.to_owned(),
            range: Some(DEFAULT_RANGE.to_owned()),
            teardown: true,
            interactive: true,
            verbose: false,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn sdp_filename(&self) -> String {
        sdp::filename_for(&self.url)
    }

    /// `<url>/<control>`, even when `control` is empty.
    pub fn setup_uri(&self, control: &str) -> String {
        format!("{}/{}", self.url, control)
    }

    pub fn play_uri(&self) -> String {
        format!("{}/", self.url)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Init,
    OptionsSent,
    Described,
    SetupDone,
    Playing,
    Waiting,
    TornDown,
    Done,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    Options,
    Describe,
    Setup,
    Play,
    Teardown,
}

impl Step {
    pub fn method(self) -> Method {
        match self {
            Step::Options => Method::Options,
            Step::Describe => Method::Describe,
            Step::Setup => Method::Setup,
            Step::Play => Method::Play,
            Step::Teardown => Method::Teardown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Step::Options => "OPTIONS",
            Step::Describe => "DESCRIBE",
            Step::Setup => "SETUP",
            Step::Play => "PLAY",
            Step::Teardown => "TEARDOWN",
        }
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug)]
pub struct SessionState {
    phase: Phase,
    uri: String,
    control: String,
    session_id: Option<String>,
    succeeded: SmallVec<[Step; 5]>,
}

impl SessionState {
    fn new(uri: String) -> Self {
        Self {
            phase: Phase::Init,
            uri,
            control: String::new(),
            session_id: None,
            succeeded: SmallVec::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// URI of the most recent request.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn control(&self) -> &str {
        &self.control
    }

    /// Session identifier assigned by the server in its SETUP response.
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Whether `step` was sent and answered with a success status.
    pub fn succeeded(&self, step: Step) -> bool {
        self.succeeded.contains(&step)
    }
}

pub struct Session<T> {
    config: SessionConfig,
    transport: T,
    store: SdpStore,
    state: SessionState,
}

impl<T: Transport> Session<T> {
    pub fn new(config: SessionConfig, transport: T, store: SdpStore) -> Self {
        let state = SessionState::new(config.url.clone());
        Self {
            config,
            transport,
            store,
            state,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Runs every step in order. Failed requests are logged and the next
    /// step goes ahead regardless; only an unwritable SDP is returned.
    pub async fn run<F>(&mut self, stop: F) -> Result<(), Error>
    where
        F: Future<Output = ()>,
    {
        self.options().await;
        self.describe().await?;
        self.setup().await;
        self.play().await;
        self.wait_for_stop(stop).await;
        if self.config.teardown {
            self.teardown().await;
        }
        self.state.phase = Phase::Done;
        Ok(())
    }

    pub async fn options(&mut self) -> Option<Response<Bytes>> {
        let request = RtspRequest::parse(Step::Options.method(), &self.config.url);
        let resp = self.exchange(Step::Options, request).await.ok();
        self.state.phase = Phase::OptionsSent;
        resp
    }

    /// Sends DESCRIBE, saves the body and picks the control attribute out
    /// of the saved file.
    ///
    /// The file is written whatever the outcome: an error status saves the
    /// body the server sent with it, and a request that got no response at
    /// all leaves the file empty.
    pub async fn describe(&mut self) -> Result<Option<Response<Bytes>>, Error> {
        let filename = self.config.sdp_filename();
        let request = RtspRequest::parse(Step::Describe.method(), &self.config.url)
            .map(|r| r.header(headers::ACCEPT, "application/sdp"));
        let result = self.exchange(Step::Describe, request).await;

        let body = match &result {
            Ok(resp) => {
                if !resp.body().is_empty() {
                    sdp::summarize(resp.body());
                }
                resp.body().clone()
            }
            Err(e) => e.response_body().cloned().unwrap_or_default(),
        };
        self.store.save(&filename, &body)?;
        self.state.control = self.store.extract_control_attribute(&filename);
        info!("Media control attribute: '{}'", self.state.control);
        self.state.phase = Phase::Described;
        Ok(result.ok())
    }

    pub async fn setup(&mut self) -> Option<Response<Bytes>> {
        let uri = self.config.setup_uri(&self.state.control);
        info!("SETUP transport {}", self.config.transport);
        let request = RtspRequest::parse(Step::Setup.method(), &uri)
            .map(|r| r.header(headers::TRANSPORT, self.config.transport.as_str()));
        let resp = self.exchange(Step::Setup, request).await.ok();
        if let Some(id) = resp.as_ref().and_then(session_id) {
            info!("Session: {}", id);
            self.state.session_id = Some(id);
        }
        self.state.phase = Phase::SetupDone;
        resp
    }

    pub async fn play(&mut self) -> Option<Response<Bytes>> {
        let uri = self.config.play_uri();
        let request = RtspRequest::parse(Step::Play.method(), &uri).map(|r| {
            r.optional_header(headers::RANGE, self.config.range.as_deref())
                .optional_header(headers::SESSION, self.state.session_id.as_deref())
        });
        let resp = self.exchange(Step::Play, request).await.ok();
        self.state.phase = Phase::Playing;
        resp
    }

    /// Blocks on `stop` in interactive mode, otherwise returns at once.
    pub async fn wait_for_stop<F>(&mut self, stop: F)
    where
        F: Future<Output = ()>,
    {
        if self.config.interactive {
            self.state.phase = Phase::Waiting;
            info!("Playing video, press Enter to stop ...");
            stop.await;
        } else {
            info!("Playing video");
        }
    }

    /// Tears down the established session via the play URI.
    pub async fn teardown(&mut self) -> Option<Response<Bytes>> {
        let uri = self.config.play_uri();
        let request = RtspRequest::parse(Step::Teardown.method(), &uri)
            .map(|r| r.optional_header(headers::SESSION, self.state.session_id.as_deref()));
        let resp = self.exchange(Step::Teardown, request).await.ok();
        self.state.phase = Phase::TornDown;
        resp
    }

    /// Sends one step's request. Failures are logged here; callers only
    /// look at the error for what the server sent back with it.
    async fn exchange(
        &mut self,
        step: Step,
        request: Result<RtspRequest, Error>,
    ) -> Result<Response<Bytes>, Error> {
        let request = request.map_err(|e| {
            error!("{} not sent: {}", step, e);
            e
        })?;
        info!("RTSP: {} {}", step, request.uri());
        self.state.uri = request.uri().to_string();
        match self.transport.send(&request).await {
            Ok(resp) => {
                self.state.succeeded.push(step);
                Ok(resp)
            }
            Err(e) => {
                error!("{} {} failed: {}", step, request.uri(), e);
                Err(e)
            }
        }
    }
}

/// The `Session` header value without `;timeout=` or other parameters.
fn session_id(response: &Response<Bytes>) -> Option<String> {
    let value = response.header(&headers::SESSION)?;
    let id = value.as_str().split(';').next()?.trim();
    if id.is_empty() {
        None
    } else {
        Some(id.to_owned())
    }
}
