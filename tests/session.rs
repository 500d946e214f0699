//! Session driver against a recording transport.

use async_trait::async_trait;
use bytes::Bytes;
use rtsp_bootstrap::{
    ConnectionContext, Error, ErrorInt, Phase, RtspMessageContext, RtspRequest, SdpStore,
    Session, SessionConfig, Step, Transport,
};
use rtsp_types::{headers, Method, Response, StatusCode, Version};

const URL: &str = "rtsp://example/ch1/main";
const SDP: &str = "v=0\r\n\
                   o=- 0 0 IN IP4 127.0.0.1\r\n\
                   s=Stub\r\n\
                   t=0 0\r\n\
                   m=video 0 RTP/AVP 96\r\n\
                   a=control:trackID=1\r\n";

#[derive(Default)]
struct Recorder {
    sent: Vec<RtspRequest>,
    describe_body: &'static str,
    session: Option<&'static str>,
    fail: Vec<Method>,
    /// Body sent back with every error status.
    error_body: &'static str,
}

impl Recorder {
    fn with_body(body: &'static str) -> Self {
        Self {
            describe_body: body,
            ..Default::default()
        }
    }

    fn methods(&self) -> Vec<Method> {
        self.sent.iter().map(|r| r.method().clone()).collect()
    }

    fn find(&self, method: Method) -> Option<&RtspRequest> {
        self.sent.iter().find(|r| *r.method() == method)
    }
}

#[async_trait]
impl Transport for Recorder {
    async fn send(&mut self, request: &RtspRequest) -> Result<Response<Bytes>, Error> {
        self.sent.push(request.clone());
        if self.fail.contains(request.method()) {
            return Err(Error::from(ErrorInt::RtspResponseError {
                conn_ctx: ConnectionContext::dummy(),
                msg_ctx: RtspMessageContext::dummy(),
                method: request.method().clone(),
                cseq: self.sent.len() as u32,
                status: StatusCode::NotFound,
                description: "Unexpected RTSP response status".into(),
                body: Bytes::from_static(self.error_body.as_bytes()),
            }));
        }
        let mut builder = Response::builder(Version::V1_0, StatusCode::Ok)
            .header(headers::CSEQ, self.sent.len().to_string());
        if let (Method::Setup, Some(session)) = (request.method(), self.session) {
            builder = builder.header(headers::SESSION, session);
        }
        let body = match request.method() {
            Method::Describe => Bytes::from_static(self.describe_body.as_bytes()),
            _ => Bytes::new(),
        };
        Ok(builder.build(body))
    }
}

fn config() -> SessionConfig {
    let mut config = SessionConfig::new(URL);
    config.interactive = false;
    config
}

#[tokio::test]
async fn full_handshake() {
    let dir = tempfile::tempdir().unwrap();
    let store = SdpStore::new(dir.path());
    let mut session = Session::new(config(), Recorder::with_body(SDP), store.clone());
    session.run(async {}).await.unwrap();

    assert_eq!(session.state().phase(), Phase::Done);
    assert_eq!(session.state().control(), "trackID=1");
    for step in [Step::Options, Step::Describe, Step::Setup, Step::Play, Step::Teardown] {
        assert!(session.state().succeeded(step), "{} did not succeed", step);
    }

    let rec = session.into_transport();
    assert_eq!(
        rec.methods(),
        vec![
            Method::Options,
            Method::Describe,
            Method::Setup,
            Method::Play,
            Method::Teardown
        ]
    );
    assert_eq!(rec.sent[0].uri().as_str(), URL);
    assert_eq!(rec.sent[1].uri().as_str(), URL);
    assert_eq!(
        rec.sent[1].get_header(&headers::ACCEPT),
        Some("application/sdp")
    );

    let setup = rec.find(Method::Setup).unwrap();
    assert_eq!(setup.uri().as_str(), "rtsp://example/ch1/main/trackID=1");
    assert_eq!(
        setup.get_header(&headers::TRANSPORT),
        Some("RTP/AVP;unicast;client_port=1234-1235")
    );

    let play = rec.find(Method::Play).unwrap();
    assert_eq!(play.uri().as_str(), "rtsp://example/ch1/main/");
    assert_eq!(play.get_header(&headers::RANGE), Some("0.000-"));

    let teardown = rec.find(Method::Teardown).unwrap();
    assert_eq!(teardown.uri().as_str(), "rtsp://example/ch1/main/");

    assert_eq!(
        std::fs::read_to_string(store.path("main.sdp")).unwrap(),
        SDP
    );
}

#[tokio::test]
async fn norange_omits_range_header() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config();
    config.range = None;
    let mut session = Session::new(config, Recorder::with_body(SDP), SdpStore::new(dir.path()));
    session.run(async {}).await.unwrap();

    let rec = session.into_transport();
    let play = rec.find(Method::Play).unwrap();
    assert_eq!(play.get_header(&headers::RANGE), None);
    assert!(play.headers().iter().all(|(n, _)| *n != headers::RANGE));
}

#[tokio::test]
async fn custom_range_and_transport() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config();
    config.range = Some("npt=10-".to_owned());
    config.transport = "RTP/AVP/TCP;unicast;interleaved=0-1".to_owned();
    let mut session = Session::new(config, Recorder::with_body(SDP), SdpStore::new(dir.path()));
    session.run(async {}).await.unwrap();

    let rec = session.into_transport();
    assert_eq!(
        rec.find(Method::Play).unwrap().get_header(&headers::RANGE),
        Some("npt=10-")
    );
    assert_eq!(
        rec.find(Method::Setup).unwrap().get_header(&headers::TRANSPORT),
        Some("RTP/AVP/TCP;unicast;interleaved=0-1")
    );
}

#[tokio::test]
async fn noteardown_never_sends_teardown() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config();
    config.teardown = false;
    let mut session = Session::new(config, Recorder::with_body(SDP), SdpStore::new(dir.path()));
    session.run(async {}).await.unwrap();

    assert_eq!(session.state().phase(), Phase::Done);
    assert!(!session.state().succeeded(Step::Teardown));
    let rec = session.into_transport();
    assert_eq!(rec.sent.len(), 4);
    assert!(rec.find(Method::Teardown).is_none());
}

#[tokio::test]
async fn missing_control_still_sets_up() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = Session::new(
        config(),
        Recorder::with_body("v=0\r\ns=No control\r\n"),
        SdpStore::new(dir.path()),
    );
    session.run(async {}).await.unwrap();

    assert_eq!(session.state().control(), "");
    let rec = session.into_transport();
    assert_eq!(
        rec.find(Method::Setup).unwrap().uri().as_str(),
        "rtsp://example/ch1/main/"
    );
}

#[tokio::test]
async fn last_control_attribute_is_used() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = Session::new(
        config(),
        Recorder::with_body("v=0\r\na=control:track1\r\na=control:track2\r\n"),
        SdpStore::new(dir.path()),
    );
    session.run(async {}).await.unwrap();

    let rec = session.into_transport();
    assert_eq!(
        rec.find(Method::Setup).unwrap().uri().as_str(),
        "rtsp://example/ch1/main/track2"
    );
}

#[tokio::test]
async fn failures_do_not_stop_the_sequence() {
    let dir = tempfile::tempdir().unwrap();
    let store = SdpStore::new(dir.path());
    std::fs::write(store.path("main.sdp"), "a=control:stale\r\n").unwrap();
    let rec = Recorder {
        describe_body: SDP,
        fail: vec![Method::Options, Method::Describe, Method::Play],
        ..Default::default()
    };
    let mut session = Session::new(config(), rec, store.clone());
    session.run(async {}).await.unwrap();

    let state = session.state();
    assert!(!state.succeeded(Step::Options));
    assert!(!state.succeeded(Step::Describe));
    assert!(state.succeeded(Step::Setup));
    assert!(!state.succeeded(Step::Play));
    assert!(state.succeeded(Step::Teardown));
    // The failed DESCRIBE came back without a body, so the previous file is
    // truncated and no control is found.
    assert_eq!(state.control(), "");
    assert_eq!(std::fs::read(store.path("main.sdp")).unwrap().len(), 0);
    assert_eq!(session.into_transport().sent.len(), 5);
}

#[tokio::test]
async fn failed_describe_saves_error_body() {
    let dir = tempfile::tempdir().unwrap();
    let store = SdpStore::new(dir.path());
    let rec = Recorder {
        describe_body: SDP,
        fail: vec![Method::Describe],
        error_body: "Stream not found\r\na=control:bogus\r\n",
        ..Default::default()
    };
    let mut session = Session::new(config(), rec, store.clone());
    session.run(async {}).await.unwrap();

    assert!(!session.state().succeeded(Step::Describe));
    assert_eq!(
        std::fs::read_to_string(store.path("main.sdp")).unwrap(),
        "Stream not found\r\na=control:bogus\r\n"
    );
    // Whatever the saved file holds still drives SETUP.
    assert_eq!(session.state().control(), "bogus");
    let rec = session.into_transport();
    assert_eq!(
        rec.find(Method::Setup).unwrap().uri().as_str(),
        "rtsp://example/ch1/main/bogus"
    );
}

#[tokio::test]
async fn session_id_follows_setup() {
    let dir = tempfile::tempdir().unwrap();
    let rec = Recorder {
        describe_body: SDP,
        session: Some("47112344;timeout=60"),
        ..Default::default()
    };
    let mut session = Session::new(config(), rec, SdpStore::new(dir.path()));
    session.run(async {}).await.unwrap();

    assert_eq!(session.state().session_id(), Some("47112344"));
    let rec = session.into_transport();
    assert_eq!(rec.find(Method::Setup).unwrap().get_header(&headers::SESSION), None);
    assert_eq!(
        rec.find(Method::Play).unwrap().get_header(&headers::SESSION),
        Some("47112344")
    );
    assert_eq!(
        rec.find(Method::Teardown).unwrap().get_header(&headers::SESSION),
        Some("47112344")
    );
}

#[tokio::test]
async fn interactive_waits_before_teardown() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config();
    config.interactive = true;
    let mut session = Session::new(config, Recorder::with_body(SDP), SdpStore::new(dir.path()));

    session.options().await;
    session.describe().await.unwrap();
    session.setup().await;
    session.play().await;
    assert_eq!(session.state().phase(), Phase::Playing);

    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    tx.send(()).unwrap();
    session
        .wait_for_stop(async {
            let _ = rx.await;
        })
        .await;
    assert_eq!(session.state().phase(), Phase::Waiting);
    assert_eq!(session.transport().sent.len(), 4);

    session.teardown().await;
    assert_eq!(session.state().phase(), Phase::TornDown);
    assert_eq!(session.state().uri(), "rtsp://example/ch1/main/");
}

#[tokio::test]
async fn non_interactive_ignores_stop_future() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = Session::new(config(), Recorder::with_body(SDP), SdpStore::new(dir.path()));
    // Would hang forever if awaited.
    session.run(futures::future::pending::<()>()).await.unwrap();
    assert_eq!(session.state().phase(), Phase::Done);
}

#[tokio::test]
async fn default_sdp_filename_without_path() {
    let dir = tempfile::tempdir().unwrap();
    let store = SdpStore::new(dir.path());
    let mut config = config();
    config.url = "rtsp://example".to_owned();
    let mut session = Session::new(config, Recorder::with_body(SDP), store.clone());
    session.run(async {}).await.unwrap();

    assert!(store.path("video.sdp").exists());
    let rec = session.into_transport();
    assert_eq!(
        rec.find(Method::Setup).unwrap().uri().as_str(),
        "rtsp://example/trackID=1"
    );
    assert_eq!(rec.find(Method::Play).unwrap().uri().as_str(), "rtsp://example/");
}
