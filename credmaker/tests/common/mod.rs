//! Shared fixtures for handler integration tests
//!
//! Fake authenticators park every completion they are handed so a test can
//! answer them one at a time and pump the handler in between.

#![allow(dead_code)]

use credmaker::{
    Authenticator, AuthenticatorId, AuthenticatorKind, BioEnrollSample, Clock, CollectPinOptions,
    ClientDataHash, Completion, CompletionCallback, CredentialCreationRequest, DeviceReply,
    HandlerConfig, MakeCredentialOptions, MakeCredentialRequestHandler, MakeCredentialStatus,
    Observer, Permissions, PinUvAuthProtocol, PinUvToken,
};
use credmaker_ctap::{
    AuthenticatorData, AuthenticatorInfo, AuthenticatorTransport, MakeCredentialResponse,
    RelyingParty, StatusCode, User,
};

use std::sync::{Arc, Mutex, Once};
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};

pub const RP_ID: &str = "example.com";

static TRACING: Once = Once::new();

pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn request() -> CredentialCreationRequest {
    CredentialCreationRequest::new(
        ClientDataHash::new([7u8; 32]),
        RelyingParty::new(RP_ID),
        User {
            id: vec![1, 2, 3, 4],
            name: Some("alice".into()),
            display_name: Some("Alice".into()),
        },
    )
}

/// A response that passes validation for [`request`]
pub fn response() -> MakeCredentialResponse {
    let hash: [u8; 32] = Sha256::digest(RP_ID.as_bytes()).into();
    MakeCredentialResponse::new(AuthenticatorData::new(hash))
}

pub fn token() -> PinUvToken {
    PinUvToken::new(vec![0x5a; 32], PinUvAuthProtocol::V2).unwrap()
}

/// Every operation the handler invoked on a fake
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    GetTouch,
    MakeCredential(CredentialCreationRequest),
    GetPinRetries,
    GetUvRetries,
    GetPinToken { pin: String, permissions: Permissions },
    GetUvToken(Permissions),
    SetPin(String),
    BioEnroll(Option<Vec<u8>>),
}

#[derive(Default)]
struct Pending {
    touch: Option<Completion<()>>,
    make_credential: Option<DeviceReply<MakeCredentialResponse>>,
    pin_retries: Option<DeviceReply<u8>>,
    uv_retries: Option<DeviceReply<u8>>,
    pin_token: Option<DeviceReply<PinUvToken>>,
    uv_token: Option<DeviceReply<PinUvToken>>,
    set_pin: Option<DeviceReply<()>>,
    bio: Option<DeviceReply<BioEnrollSample>>,
}

pub struct FakeAuthenticator {
    id: AuthenticatorId,
    kind: AuthenticatorKind,
    info: Option<AuthenticatorInfo>,
    auto_response: Option<MakeCredentialResponse>,
    calls: Mutex<Vec<Call>>,
    pending: Mutex<Pending>,
    cancels: Mutex<usize>,
}

impl FakeAuthenticator {
    pub fn new(id: &str, info: Option<AuthenticatorInfo>) -> Self {
        Self {
            id: AuthenticatorId::new(id),
            kind: AuthenticatorKind::Device,
            info,
            auto_response: None,
            calls: Mutex::new(Vec::new()),
            pending: Mutex::new(Pending::default()),
            cancels: Mutex::new(0),
        }
    }

    pub fn os_proxy(id: &str, info: Option<AuthenticatorInfo>) -> Self {
        Self {
            kind: AuthenticatorKind::OsProxy,
            ..Self::new(id, info)
        }
    }

    /// Answer every MakeCredential immediately with `response`
    pub fn with_auto_response(mut self, response: MakeCredentialResponse) -> Self {
        self.auto_response = Some(response);
        self
    }

    pub fn arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn cancels(&self) -> usize {
        *self.cancels.lock().unwrap()
    }

    /// Requests sent with MakeCredential, in order
    pub fn sent_requests(&self) -> Vec<CredentialCreationRequest> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::MakeCredential(request) => Some(request),
                _ => None,
            })
            .collect()
    }

    pub fn touch(&self) {
        let done = self.pending.lock().unwrap().touch.take();
        done.expect("no touch requested").complete(());
    }

    pub fn reply_make_credential(&self, result: Result<MakeCredentialResponse, StatusCode>) {
        let done = self.pending.lock().unwrap().make_credential.take();
        done.expect("no MakeCredential in flight").complete(result);
    }

    pub fn reply_pin_retries(&self, result: Result<u8, StatusCode>) {
        let done = self.pending.lock().unwrap().pin_retries.take();
        done.expect("no getPinRetries in flight").complete(result);
    }

    pub fn reply_uv_retries(&self, result: Result<u8, StatusCode>) {
        let done = self.pending.lock().unwrap().uv_retries.take();
        done.expect("no getUvRetries in flight").complete(result);
    }

    pub fn reply_pin_token(&self, result: Result<PinUvToken, StatusCode>) {
        let done = self.pending.lock().unwrap().pin_token.take();
        done.expect("no PIN token request in flight").complete(result);
    }

    pub fn reply_uv_token(&self, result: Result<PinUvToken, StatusCode>) {
        let done = self.pending.lock().unwrap().uv_token.take();
        done.expect("no UV token request in flight").complete(result);
    }

    pub fn reply_set_pin(&self, result: Result<(), StatusCode>) {
        let done = self.pending.lock().unwrap().set_pin.take();
        done.expect("no setPin in flight").complete(result);
    }

    pub fn reply_bio(&self, result: Result<BioEnrollSample, StatusCode>) {
        let done = self.pending.lock().unwrap().bio.take();
        done.expect("no enrollment in flight").complete(result);
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

impl Authenticator for FakeAuthenticator {
    fn id(&self) -> &AuthenticatorId {
        &self.id
    }

    fn kind(&self) -> AuthenticatorKind {
        self.kind
    }

    fn info(&self) -> Option<&AuthenticatorInfo> {
        self.info.as_ref()
    }

    fn transport(&self) -> Option<AuthenticatorTransport> {
        Some(AuthenticatorTransport::Usb)
    }

    fn get_touch(&self, done: Completion<()>) {
        self.record(Call::GetTouch);
        self.pending.lock().unwrap().touch = Some(done);
    }

    fn make_credential(
        &self,
        request: CredentialCreationRequest,
        done: DeviceReply<MakeCredentialResponse>,
    ) {
        self.record(Call::MakeCredential(request));
        match &self.auto_response {
            Some(response) => done.complete(Ok(response.clone())),
            None => self.pending.lock().unwrap().make_credential = Some(done),
        }
    }

    fn get_pin_retries(&self, done: DeviceReply<u8>) {
        self.record(Call::GetPinRetries);
        self.pending.lock().unwrap().pin_retries = Some(done);
    }

    fn get_uv_retries(&self, done: DeviceReply<u8>) {
        self.record(Call::GetUvRetries);
        self.pending.lock().unwrap().uv_retries = Some(done);
    }

    fn get_pin_token(
        &self,
        pin: &str,
        permissions: Permissions,
        _rp_id: &str,
        done: DeviceReply<PinUvToken>,
    ) {
        self.record(Call::GetPinToken {
            pin: pin.to_string(),
            permissions,
        });
        self.pending.lock().unwrap().pin_token = Some(done);
    }

    fn get_uv_token(&self, permissions: Permissions, _rp_id: &str, done: DeviceReply<PinUvToken>) {
        self.record(Call::GetUvToken(permissions));
        self.pending.lock().unwrap().uv_token = Some(done);
    }

    fn set_pin(&self, pin: &str, done: DeviceReply<()>) {
        self.record(Call::SetPin(pin.to_string()));
        self.pending.lock().unwrap().set_pin = Some(done);
    }

    fn bio_enroll(
        &self,
        _token: &PinUvToken,
        template_id: Option<Vec<u8>>,
        done: DeviceReply<BioEnrollSample>,
    ) {
        self.record(Call::BioEnroll(template_id));
        self.pending.lock().unwrap().bio = Some(done);
    }

    fn cancel(&self) {
        *self.cancels.lock().unwrap() += 1;
    }
}

/// Everything the handler told the UI
#[derive(Debug, Clone, PartialEq)]
pub enum ObserverCall {
    CollectPin(CollectPinOptions),
    StartBioEnrollment,
    SampleCollected(u8),
    RetryUserVerification(u8),
    InternalUvLocked,
    FinishCollectToken,
}

pub struct RecordingObserver {
    supports_pin: bool,
    calls: Mutex<Vec<ObserverCall>>,
    pin_reply: Mutex<Option<Completion<String>>>,
    bio_dismissed: Mutex<Option<Completion<()>>>,
}

impl RecordingObserver {
    pub fn new(supports_pin: bool) -> Self {
        Self {
            supports_pin,
            calls: Mutex::new(Vec::new()),
            pin_reply: Mutex::new(None),
            bio_dismissed: Mutex::new(None),
        }
    }

    pub fn calls(&self) -> Vec<ObserverCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn last_pin_prompt(&self) -> Option<CollectPinOptions> {
        self.calls().into_iter().rev().find_map(|call| match call {
            ObserverCall::CollectPin(options) => Some(options),
            _ => None,
        })
    }

    pub fn enter_pin(&self, pin: &str) {
        let reply = self.pin_reply.lock().unwrap().take();
        reply.expect("no PIN prompt open").complete(pin.to_string());
    }

    pub fn dismiss_bio_enrollment(&self) {
        let done = self.bio_dismissed.lock().unwrap().take();
        done.expect("enrollment UI not shown").complete(());
    }

    fn record(&self, call: ObserverCall) {
        self.calls.lock().unwrap().push(call);
    }
}

impl Observer for RecordingObserver {
    fn supports_pin(&self) -> bool {
        self.supports_pin
    }

    fn collect_pin(&self, options: CollectPinOptions, reply: Completion<String>) {
        self.record(ObserverCall::CollectPin(options));
        *self.pin_reply.lock().unwrap() = Some(reply);
    }

    fn start_bio_enrollment(&self, on_dismissed: Completion<()>) {
        self.record(ObserverCall::StartBioEnrollment);
        *self.bio_dismissed.lock().unwrap() = Some(on_dismissed);
    }

    fn on_sample_collected(&self, remaining_samples: u8) {
        self.record(ObserverCall::SampleCollected(remaining_samples));
    }

    fn on_retry_user_verification(&self, retries: u8) {
        self.record(ObserverCall::RetryUserVerification(retries));
    }

    fn on_internal_user_verification_locked(&self) {
        self.record(ObserverCall::InternalUvLocked);
    }

    fn finish_collect_token(&self) {
        self.record(ObserverCall::FinishCollectToken);
    }
}

/// Clock that only moves when told to
pub struct ManualClock {
    now: Mutex<Instant>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock().unwrap() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap()
    }
}

pub type Outcome = (
    MakeCredentialStatus,
    Option<MakeCredentialResponse>,
    Option<AuthenticatorId>,
);

/// Collects every callback invocation
#[derive(Clone, Default)]
pub struct Outcomes(Arc<Mutex<Vec<Outcome>>>);

impl Outcomes {
    pub fn callback(&self) -> CompletionCallback {
        let outcomes = self.0.clone();
        Box::new(move |status, response, authenticator| {
            outcomes.lock().unwrap().push((status, response, authenticator));
        })
    }

    pub fn all(&self) -> Vec<Outcome> {
        self.0.lock().unwrap().clone()
    }

    /// The one outcome delivered so far
    pub fn single(&self) -> Outcome {
        let all = self.all();
        assert_eq!(all.len(), 1, "expected exactly one outcome, got {all:?}");
        all.into_iter().next().unwrap()
    }

    pub fn status(&self) -> MakeCredentialStatus {
        self.single().0
    }
}

pub struct Harness {
    pub handler: MakeCredentialRequestHandler,
    pub observer: Arc<RecordingObserver>,
    pub clock: Arc<ManualClock>,
    pub outcomes: Outcomes,
}

impl Harness {
    pub fn new(options: MakeCredentialOptions) -> Self {
        Self::with_request(request(), options)
    }

    pub fn with_request(request: CredentialCreationRequest, options: MakeCredentialOptions) -> Self {
        Self::build(request, options, true)
    }

    /// Observer that cannot prompt for a PIN
    pub fn without_pin(options: MakeCredentialOptions) -> Self {
        Self::build(request(), options, false)
    }

    fn build(request: CredentialCreationRequest, options: MakeCredentialOptions, supports_pin: bool) -> Self {
        init_tracing();
        let observer = Arc::new(RecordingObserver::new(supports_pin));
        let clock = Arc::new(ManualClock::new());
        let outcomes = Outcomes::default();
        let handler =
            MakeCredentialRequestHandler::new(request, options, observer.clone(), outcomes.callback())
                .with_clock(clock.clone());
        Self {
            handler,
            observer,
            clock,
            outcomes,
        }
    }

    pub fn with_config(mut self, config: HandlerConfig) -> Self {
        self.handler = self.handler.with_config(config);
        self
    }

    pub fn add(&mut self, authenticator: &Arc<FakeAuthenticator>) {
        self.handler.add_authenticator(authenticator.clone());
        self.pump();
    }

    pub fn pump(&mut self) {
        self.handler.run_pending();
    }
}
