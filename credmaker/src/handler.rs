//! MakeCredential request handler
//!
//! A single state machine races every discovered authenticator, selects the
//! first one the user commits to, runs PIN/UV and optional fingerprint
//! enrollment on it, and reports exactly one outcome.
//!
//! All state changes happen in [`MakeCredentialRequestHandler::handle_event`].
//! Authenticators and the observer answer asynchronously through
//! [`Completion`] handles that queue [`Event`]s on the handler's channel;
//! [`run`](MakeCredentialRequestHandler::run) or
//! [`run_pending`](MakeCredentialRequestHandler::run_pending) feed them back in.

use crate::authenticator::{Authenticator, AuthenticatorId, AuthenticatorKind, BioEnrollSample, Completion};
use crate::bio::{BioEnrollmentSession, BioStep};
use crate::error::MakeCredentialStatus;
use crate::filter;
use crate::observer::{CollectPinOptions, Observer, PinCollectionReason, PinEntryError};
use crate::options::{
    HandlerConfig, MakeCredentialOptions, ResidentKeyRequirement, UserVerificationRequirement,
};
use crate::pin_uv::{self, PinUvDisposition, PinUvToken};
use crate::request::CredentialCreationRequest;
use crate::validate;

use credmaker_ctap::{AuthenticatorAttachment, MakeCredentialResponse, StatusCode};

use std::collections::HashMap;
use std::fmt;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, trace, warn};
use zeroize::Zeroizing;

/// Source of monotonic time for the response-time heuristic
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// [`Clock`] backed by [`Instant::now`]
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Caller's completion callback, invoked exactly once
pub type CompletionCallback = Box<
    dyn FnOnce(MakeCredentialStatus, Option<MakeCredentialResponse>, Option<AuthenticatorId>)
        + Send,
>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Racing all authenticators for a touch or a reply
    WaitingForTouch,
    /// Request sent to the selected authenticator
    WaitingForSecondTouch,
    GettingRetries,
    WaitingForPin,
    WaitingForNewPin,
    SettingPin,
    RequestWithPin,
    /// UV token requested through built-in verification
    WaitingForToken,
    BioEnrollment,
    /// Device finished enrolling, UI still open
    BioEnrollmentDone,
    Finished,
}

/// Inputs to the state machine
pub enum Event {
    AuthenticatorAdded(Arc<dyn Authenticator>),
    AuthenticatorRemoved(AuthenticatorId),
    Touch(AuthenticatorId),
    MakeCredential {
        id: AuthenticatorId,
        result: Result<MakeCredentialResponse, StatusCode>,
    },
    PinRetries {
        id: AuthenticatorId,
        result: Result<u8, StatusCode>,
    },
    UvRetries {
        id: AuthenticatorId,
        result: Result<u8, StatusCode>,
    },
    PinToken {
        id: AuthenticatorId,
        result: Result<PinUvToken, StatusCode>,
    },
    UvToken {
        id: AuthenticatorId,
        result: Result<PinUvToken, StatusCode>,
    },
    PinSet {
        id: AuthenticatorId,
        result: Result<(), StatusCode>,
    },
    BioSample {
        id: AuthenticatorId,
        result: Result<BioEnrollSample, StatusCode>,
    },
    PinCollected(Zeroizing<String>),
    BioEnrollmentDismissed,
    /// The owner is giving up on the request
    Teardown,
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::AuthenticatorAdded(_) => "authenticator-added",
            Event::AuthenticatorRemoved(_) => "authenticator-removed",
            Event::Touch(_) => "touch",
            Event::MakeCredential { .. } => "make-credential",
            Event::PinRetries { .. } => "pin-retries",
            Event::UvRetries { .. } => "uv-retries",
            Event::PinToken { .. } => "pin-token",
            Event::UvToken { .. } => "uv-token",
            Event::PinSet { .. } => "pin-set",
            Event::BioSample { .. } => "bio-sample",
            Event::PinCollected(_) => "pin-collected",
            Event::BioEnrollmentDismissed => "bio-enrollment-dismissed",
            Event::Teardown => "teardown",
        }
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

struct InFlight {
    request: CredentialCreationRequest,
    sent_at: Instant,
    /// Already resent once after KeyStoreFull
    retried: bool,
}

enum TouchPurpose {
    /// Report this status once touched
    Inapplicable(MakeCredentialStatus),
    ObtainToken { internal_uv_locked: bool },
}

pub struct MakeCredentialRequestHandler {
    request: CredentialCreationRequest,
    options: MakeCredentialOptions,
    config: HandlerConfig,
    observer: Arc<dyn Observer>,
    clock: Arc<dyn Clock>,
    callback: Option<CompletionCallback>,
    state: State,
    authenticators: HashMap<AuthenticatorId, Arc<dyn Authenticator>>,
    current: Option<AuthenticatorId>,
    in_flight: HashMap<AuthenticatorId, InFlight>,
    touch_purpose: HashMap<AuthenticatorId, TouchPurpose>,
    pin_hint: Option<PinEntryError>,
    new_pin: Option<Zeroizing<String>>,
    /// A PIN/UV exchange has begun on the current authenticator
    pin_uv_started: bool,
    uv_retrying: bool,
    bio: Option<BioEnrollmentSession>,
    tx: Sender<Event>,
    rx: Receiver<Event>,
}

impl MakeCredentialRequestHandler {
    /// Create a handler; authenticators are dispatched to as they are added
    ///
    /// The attachment constraint is taken from `options` only, never from the
    /// base request.
    pub fn new(
        mut request: CredentialCreationRequest,
        options: MakeCredentialOptions,
        observer: Arc<dyn Observer>,
        callback: CompletionCallback,
    ) -> Self {
        request.authenticator_attachment = AuthenticatorAttachment::Any;
        let (tx, rx) = mpsc::channel();
        Self {
            request,
            options,
            config: HandlerConfig::default(),
            observer,
            clock: Arc::new(SystemClock),
            callback: Some(callback),
            state: State::WaitingForTouch,
            authenticators: HashMap::new(),
            current: None,
            in_flight: HashMap::new(),
            touch_purpose: HashMap::new(),
            pin_hint: None,
            new_pin: None,
            pin_uv_started: false,
            uv_retrying: false,
            bio: None,
            tx,
            rx,
        }
    }

    pub fn with_config(mut self, config: HandlerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn is_finished(&self) -> bool {
        self.state == State::Finished
    }

    /// The selected authenticator, once there is one
    pub fn current_authenticator(&self) -> Option<&AuthenticatorId> {
        self.current.as_ref()
    }

    /// Queue handle for discovery running on other threads
    pub fn sender(&self) -> Sender<Event> {
        self.tx.clone()
    }

    pub fn add_authenticator(&mut self, authenticator: Arc<dyn Authenticator>) {
        self.handle_event(Event::AuthenticatorAdded(authenticator));
    }

    pub fn remove_authenticator(&mut self, id: &AuthenticatorId) {
        self.handle_event(Event::AuthenticatorRemoved(id.clone()));
    }

    /// Handle everything queued so far without blocking
    pub fn run_pending(&mut self) {
        while let Ok(event) = self.rx.try_recv() {
            self.handle_event(event);
        }
    }

    /// Block on the queue until the request finishes
    pub fn run(&mut self) {
        while !self.is_finished() {
            match self.rx.recv() {
                Ok(event) => self.handle_event(event),
                Err(_) => break,
            }
        }
    }

    pub fn handle_event(&mut self, event: Event) {
        if self.state == State::Finished {
            trace!(event = event.name(), "request finished, dropping event");
            return;
        }
        trace!(event = event.name(), state = ?self.state, "handling event");

        match event {
            Event::AuthenticatorAdded(authenticator) => self.dispatch(authenticator),
            Event::AuthenticatorRemoved(id) => self.on_removed(id),
            Event::Touch(id) => self.on_touch(id),
            Event::MakeCredential { id, result } => self.on_make_credential(id, result),
            Event::PinRetries { id, result } => self.on_pin_retries(id, result),
            Event::UvRetries { id, result } => self.on_uv_retries(id, result),
            Event::PinToken { id, result } => self.on_pin_token(id, result),
            Event::UvToken { id, result } => self.on_uv_token(id, result),
            Event::PinSet { id, result } => self.on_pin_set(id, result),
            Event::BioSample { id, result } => self.on_bio_sample(id, result),
            Event::PinCollected(pin) => self.on_pin_collected(pin),
            Event::BioEnrollmentDismissed => self.on_bio_dismissed(),
            Event::Teardown => self.teardown(),
        }
    }

    fn completion<T: 'static>(
        &self,
        make: impl FnOnce(T) -> Event + Send + 'static,
    ) -> Completion<T> {
        Completion::new(self.tx.clone(), make)
    }

    fn authenticator(&self, id: &AuthenticatorId) -> Option<Arc<dyn Authenticator>> {
        self.authenticators.get(id).cloned()
    }

    fn is_current(&self, id: &AuthenticatorId) -> bool {
        self.current.as_ref() == Some(id)
    }

    fn specialize(&self, authenticator: &dyn Authenticator) -> CredentialCreationRequest {
        filter::specialize(
            &self.request,
            &self.options,
            authenticator,
            self.observer.supports_pin(),
        )
    }

    fn dispatch(&mut self, authenticator: Arc<dyn Authenticator>) {
        let id = authenticator.id().clone();
        self.authenticators.insert(id.clone(), authenticator.clone());

        if self.state != State::WaitingForTouch {
            debug!(authenticator = %id, state = ?self.state, "authenticator added after selection");
            return;
        }
        if !filter::pre_touch_accepts(&self.options, authenticator.as_ref()) {
            debug!(authenticator = %id, "attachment mismatch, skipping");
            return;
        }

        let can_collect_pin = self.observer.supports_pin();
        let mut request = self.specialize(authenticator.as_ref());

        if let Some(status) =
            filter::post_touch_mismatch(&request, &self.options, authenticator.as_ref(), can_collect_pin)
        {
            if authenticator.kind() == AuthenticatorKind::OsProxy {
                info!(authenticator = %id, ?status, "platform authenticator cannot satisfy request");
                self.finish(status, None, Some(id));
                return;
            }
            debug!(authenticator = %id, ?status, "ineligible, waiting for touch to report");
            self.touch_purpose
                .insert(id.clone(), TouchPurpose::Inapplicable(status));
            authenticator.get_touch(self.completion(move |()| Event::Touch(id)));
            return;
        }

        match pin_uv::disposition(&request, authenticator.as_ref(), can_collect_pin) {
            PinUvDisposition::UsePin | PinUvDisposition::SetPin | PinUvDisposition::UseUvToken => {
                if self.options.allow_skipping_pin_touch && self.authenticators.len() == 1 {
                    self.obtain_token(id, false);
                } else {
                    self.touch_purpose.insert(
                        id.clone(),
                        TouchPurpose::ObtainToken {
                            internal_uv_locked: false,
                        },
                    );
                    authenticator.get_touch(self.completion(move |()| Event::Touch(id)));
                }
            }
            PinUvDisposition::InternalUv | PinUvDisposition::InternalUvWithPinFallback => {
                request.user_verification = UserVerificationRequirement::Required;
                self.send_request(&authenticator, request, false);
            }
            PinUvDisposition::NoUv => {
                if authenticator.info().is_some() {
                    request.user_verification = UserVerificationRequirement::Discouraged;
                }
                self.send_request(&authenticator, request, false);
            }
            PinUvDisposition::Unsatisfiable => {
                error!(authenticator = %id, "unsatisfiable UV passed the capability filter");
                debug_assert!(false, "unsatisfiable UV passed the capability filter");
            }
        }
    }

    fn send_request(
        &mut self,
        authenticator: &Arc<dyn Authenticator>,
        request: CredentialCreationRequest,
        retried: bool,
    ) {
        let id = authenticator.id().clone();
        debug!(authenticator = %id, rk = request.resident_key, uv = ?request.user_verification, "sending MakeCredential");
        self.in_flight.insert(
            id.clone(),
            InFlight {
                request: request.clone(),
                sent_at: self.clock.now(),
                retried,
            },
        );
        authenticator.make_credential(
            request,
            self.completion(move |result| Event::MakeCredential { id, result }),
        );
    }

    fn on_touch(&mut self, id: AuthenticatorId) {
        if self.state != State::WaitingForTouch {
            return;
        }
        match self.touch_purpose.remove(&id) {
            Some(TouchPurpose::Inapplicable(status)) => {
                info!(authenticator = %id, ?status, "touched ineligible authenticator");
                self.finish(status, None, Some(id));
            }
            Some(TouchPurpose::ObtainToken { internal_uv_locked }) => {
                self.obtain_token(id, internal_uv_locked);
            }
            None => debug!(authenticator = %id, "unexpected touch"),
        }
    }

    /// Make `id` current and cancel everyone else
    fn select(&mut self, id: &AuthenticatorId) {
        info!(authenticator = %id, "authenticator selected");
        self.current = Some(id.clone());
        self.cancel_others(Some(id));
    }

    fn cancel_others(&mut self, keep: Option<&AuthenticatorId>) {
        for (id, authenticator) in &self.authenticators {
            if Some(id) == keep {
                continue;
            }
            if self.in_flight.contains_key(id) || self.touch_purpose.contains_key(id) {
                debug!(authenticator = %id, "cancelling");
                authenticator.cancel();
            }
        }
        self.in_flight.retain(|id, _| Some(id) == keep);
        self.touch_purpose.retain(|id, _| Some(id) == keep);
    }

    fn obtain_token(&mut self, id: AuthenticatorId, internal_uv_locked: bool) {
        let Some(authenticator) = self.authenticator(&id) else {
            return;
        };
        self.select(&id);

        if internal_uv_locked {
            self.observer.on_internal_user_verification_locked();
            self.pin_hint = Some(PinEntryError::InternalUvLocked);
            self.request_pin_retries(&authenticator);
            return;
        }

        let request = self.specialize(authenticator.as_ref());
        match pin_uv::disposition(&request, authenticator.as_ref(), self.observer.supports_pin()) {
            PinUvDisposition::UseUvToken => self.request_uv_retries(&authenticator),
            PinUvDisposition::SetPin => self.prompt_new_pin(&authenticator),
            _ => self.request_pin_retries(&authenticator),
        }
    }

    fn request_pin_retries(&mut self, authenticator: &Arc<dyn Authenticator>) {
        self.pin_uv_started = true;
        self.state = State::GettingRetries;
        let id = authenticator.id().clone();
        authenticator.get_pin_retries(self.completion(move |result| Event::PinRetries { id, result }));
    }

    fn request_uv_retries(&mut self, authenticator: &Arc<dyn Authenticator>) {
        self.pin_uv_started = true;
        self.state = State::GettingRetries;
        let id = authenticator.id().clone();
        authenticator.get_uv_retries(self.completion(move |result| Event::UvRetries { id, result }));
    }

    fn prompt_new_pin(&mut self, authenticator: &Arc<dyn Authenticator>) {
        self.pin_uv_started = true;
        self.state = State::WaitingForNewPin;
        let options = CollectPinOptions {
            reason: PinCollectionReason::Set,
            error: None,
            attempts: None,
            min_pin_length: pin_uv::min_pin_length(authenticator.info()),
        };
        self.observer.collect_pin(
            options,
            self.completion(|pin: String| Event::PinCollected(Zeroizing::new(pin))),
        );
    }

    fn request_pin_token(&mut self, authenticator: &Arc<dyn Authenticator>, pin: &str) {
        self.state = State::RequestWithPin;
        let id = authenticator.id().clone();
        let permissions = pin_uv::token_permissions(&self.request, authenticator.info());
        authenticator.get_pin_token(
            pin,
            permissions,
            &self.request.rp.id,
            self.completion(move |result| Event::PinToken { id, result }),
        );
    }

    fn on_pin_retries(&mut self, id: AuthenticatorId, result: Result<u8, StatusCode>) {
        if self.state != State::GettingRetries || !self.is_current(&id) {
            return;
        }
        let Some(authenticator) = self.authenticator(&id) else {
            return;
        };
        match result {
            Err(code) => {
                warn!(authenticator = %id, status = ?code, "getPinRetries failed");
                self.finish(MakeCredentialStatus::AuthenticatorResponseInvalid, None, Some(id));
            }
            Ok(0) => self.finish(MakeCredentialStatus::HardPinBlock, None, Some(id)),
            Ok(retries) => {
                self.state = State::WaitingForPin;
                let options = CollectPinOptions {
                    reason: PinCollectionReason::Enter,
                    error: self.pin_hint.take(),
                    attempts: Some(retries),
                    min_pin_length: pin_uv::min_pin_length(authenticator.info()),
                };
                self.observer.collect_pin(
                    options,
                    self.completion(|pin: String| Event::PinCollected(Zeroizing::new(pin))),
                );
            }
        }
    }

    fn on_pin_collected(&mut self, pin: Zeroizing<String>) {
        let Some(id) = self.current.clone() else {
            return;
        };
        let Some(authenticator) = self.authenticator(&id) else {
            return;
        };
        match self.state {
            State::WaitingForPin => self.request_pin_token(&authenticator, &pin),
            State::WaitingForNewPin => {
                self.state = State::SettingPin;
                authenticator.set_pin(
                    &pin,
                    self.completion(move |result| Event::PinSet { id, result }),
                );
                self.new_pin = Some(pin);
            }
            _ => debug!(state = ?self.state, "PIN arrived in unexpected state"),
        }
    }

    fn on_pin_set(&mut self, id: AuthenticatorId, result: Result<(), StatusCode>) {
        if self.state != State::SettingPin || !self.is_current(&id) {
            return;
        }
        let Some(authenticator) = self.authenticator(&id) else {
            return;
        };
        let pin = self.new_pin.take();
        match (result, pin) {
            (Ok(()), Some(pin)) => self.request_pin_token(&authenticator, &pin),
            (result, _) => {
                warn!(authenticator = %id, ?result, "setPin failed");
                self.finish(MakeCredentialStatus::AuthenticatorResponseInvalid, None, Some(id));
            }
        }
    }

    fn on_pin_token(&mut self, id: AuthenticatorId, result: Result<PinUvToken, StatusCode>) {
        if self.state != State::RequestWithPin || !self.is_current(&id) {
            return;
        }
        let Some(authenticator) = self.authenticator(&id) else {
            return;
        };
        match result {
            Ok(token) => self.on_token(&authenticator, token),
            Err(StatusCode::PinInvalid) => {
                self.pin_hint = Some(PinEntryError::WrongPin);
                self.request_pin_retries(&authenticator);
            }
            Err(StatusCode::PinAuthBlocked) => {
                self.finish(MakeCredentialStatus::SoftPinBlock, None, Some(id));
            }
            Err(StatusCode::PinBlocked) => {
                self.finish(MakeCredentialStatus::HardPinBlock, None, Some(id));
            }
            Err(code) => {
                warn!(authenticator = %id, status = ?code, "PIN token request failed");
                self.finish(MakeCredentialStatus::AuthenticatorResponseInvalid, None, Some(id));
            }
        }
    }

    fn on_uv_retries(&mut self, id: AuthenticatorId, result: Result<u8, StatusCode>) {
        if self.state != State::GettingRetries || !self.is_current(&id) {
            return;
        }
        let Some(authenticator) = self.authenticator(&id) else {
            return;
        };
        match result {
            Err(code) => {
                warn!(authenticator = %id, status = ?code, "getUvRetries failed");
                self.finish(MakeCredentialStatus::AuthenticatorResponseInvalid, None, Some(id));
            }
            Ok(0) => self.on_uv_locked(&authenticator),
            Ok(retries) => {
                if self.uv_retrying {
                    self.observer.on_retry_user_verification(retries);
                }
                self.state = State::WaitingForToken;
                let permissions = pin_uv::token_permissions(&self.request, authenticator.info());
                authenticator.get_uv_token(
                    permissions,
                    &self.request.rp.id,
                    self.completion(move |result| Event::UvToken { id, result }),
                );
            }
        }
    }

    fn on_uv_token(&mut self, id: AuthenticatorId, result: Result<PinUvToken, StatusCode>) {
        if self.state != State::WaitingForToken || !self.is_current(&id) {
            return;
        }
        let Some(authenticator) = self.authenticator(&id) else {
            return;
        };
        match result {
            Ok(token) => self.on_token(&authenticator, token),
            Err(StatusCode::UvInvalid | StatusCode::OperationDenied) => {
                self.uv_retrying = true;
                self.request_uv_retries(&authenticator);
            }
            Err(StatusCode::UvBlocked) => self.on_uv_locked(&authenticator),
            Err(code) => {
                warn!(authenticator = %id, status = ?code, "UV token request failed");
                self.finish(MakeCredentialStatus::AuthenticatorResponseInvalid, None, Some(id));
            }
        }
    }

    fn on_uv_locked(&mut self, authenticator: &Arc<dyn Authenticator>) {
        self.observer.on_internal_user_verification_locked();
        if pin_uv::can_fall_back_to_pin(authenticator.info(), self.observer.supports_pin()) {
            self.pin_hint = Some(PinEntryError::InternalUvLocked);
            self.request_pin_retries(authenticator);
        } else {
            let id = authenticator.id().clone();
            self.finish(MakeCredentialStatus::InternalUvLocked, None, Some(id));
        }
    }

    fn on_token(&mut self, authenticator: &Arc<dyn Authenticator>, token: PinUvToken) {
        if !pin_uv::needs_bio_enrollment(authenticator.info()) {
            self.dispatch_with_token(authenticator, token);
            return;
        }

        let id = authenticator.id().clone();
        info!(authenticator = %id, "starting fingerprint enrollment");
        self.state = State::BioEnrollment;
        let session = BioEnrollmentSession::new(id.clone(), token);
        self.observer
            .start_bio_enrollment(self.completion(|()| Event::BioEnrollmentDismissed));
        authenticator.bio_enroll(
            session.token(),
            None,
            self.completion(move |result| Event::BioSample { id, result }),
        );
        self.bio = Some(session);
    }

    fn on_bio_sample(&mut self, id: AuthenticatorId, result: Result<BioEnrollSample, StatusCode>) {
        if !matches!(self.state, State::BioEnrollment | State::BioEnrollmentDone)
            || !self.is_current(&id)
        {
            return;
        }
        let Some(authenticator) = self.authenticator(&id) else {
            return;
        };
        let step = match self.bio.as_mut() {
            Some(session) => {
                if let (Ok(sample), false) = (&result, session.device_done()) {
                    self.observer.on_sample_collected(sample.remaining_samples);
                }
                session.on_sample(result)
            }
            None => return,
        };

        match step {
            BioStep::NextSample(template_id) => {
                let done = self.completion(move |result| Event::BioSample { id, result });
                if let Some(session) = &self.bio {
                    authenticator.bio_enroll(session.token(), Some(template_id), done);
                }
            }
            BioStep::Released => self.release_bio(),
            BioStep::Wait | BioStep::CancelDevice => {
                if self.bio.as_ref().is_some_and(BioEnrollmentSession::device_done) {
                    self.state = State::BioEnrollmentDone;
                }
            }
        }
    }

    fn on_bio_dismissed(&mut self) {
        if !matches!(self.state, State::BioEnrollment | State::BioEnrollmentDone) {
            return;
        }
        let step = match self.bio.as_mut() {
            Some(session) => session.on_dismissed(),
            None => return,
        };
        match step {
            BioStep::CancelDevice => {
                if let Some(authenticator) = self.current.clone().and_then(|id| self.authenticator(&id)) {
                    debug!(authenticator = %authenticator.id(), "enrollment dismissed, cancelling device");
                    authenticator.cancel();
                }
            }
            BioStep::Released => self.release_bio(),
            BioStep::Wait | BioStep::NextSample(_) => {}
        }
    }

    fn release_bio(&mut self) {
        let Some(session) = self.bio.take() else {
            return;
        };
        let Some(authenticator) = self.authenticator(session.authenticator()) else {
            return;
        };
        self.dispatch_with_token(&authenticator, session.into_token());
    }

    fn dispatch_with_token(&mut self, authenticator: &Arc<dyn Authenticator>, token: PinUvToken) {
        self.observer.finish_collect_token();
        self.state = State::WaitingForSecondTouch;

        let mut request = self.specialize(authenticator.as_ref());
        match token.pin_auth(&request.client_data_hash) {
            Ok(pin_auth) => request.pin_uv_auth = Some(pin_auth),
            Err(err) => {
                error!(error = %err, "cannot authenticate request with token");
                let id = authenticator.id().clone();
                self.finish(MakeCredentialStatus::AuthenticatorResponseInvalid, None, Some(id));
                return;
            }
        }
        // The token already proves verification.
        request.user_verification = UserVerificationRequirement::Discouraged;
        self.send_request(authenticator, request, false);
    }

    fn on_make_credential(
        &mut self,
        id: AuthenticatorId,
        result: Result<MakeCredentialResponse, StatusCode>,
    ) {
        match self.state {
            State::WaitingForTouch => {}
            State::WaitingForSecondTouch if self.is_current(&id) => {}
            _ => {
                debug!(authenticator = %id, state = ?self.state, "dropping stale reply");
                return;
            }
        }
        let Some(in_flight) = self.in_flight.remove(&id) else {
            debug!(authenticator = %id, "reply without a request in flight");
            return;
        };
        let Some(authenticator) = self.authenticator(&id) else {
            return;
        };

        if authenticator.kind() == AuthenticatorKind::OsProxy {
            match result {
                Ok(response) => self.finish_with_response(&authenticator, &in_flight.request, response),
                Err(code) => {
                    info!(authenticator = %id, status = ?code, "platform authenticator failed");
                    self.finish(MakeCredentialStatus::from_platform_error(code), None, Some(id));
                }
            }
            return;
        }

        let code = result.as_ref().err().copied().unwrap_or(StatusCode::Success);

        if code == StatusCode::KeyStoreFull
            && !in_flight.retried
            && self.options.resident_key == ResidentKeyRequirement::Preferred
            && in_flight.request.resident_key
        {
            info!(authenticator = %id, "key store full, retrying without a discoverable credential");
            self.select(&id);
            self.state = State::WaitingForSecondTouch;
            let mut request = in_flight.request;
            request.resident_key = false;
            if request.pin_uv_auth.is_none() {
                request.user_verification = self.options.user_verification;
            }
            self.send_request(&authenticator, request, true);
            return;
        }

        if matches!(code, StatusCode::PinAuthInvalid | StatusCode::PinRequired)
            && self.state == State::WaitingForTouch
            && in_flight.request.pin_uv_auth.is_none()
            && in_flight.request.user_verification != UserVerificationRequirement::Discouraged
            && pin_uv::disposition(
                &self.specialize(authenticator.as_ref()),
                authenticator.as_ref(),
                self.observer.supports_pin(),
            ) == PinUvDisposition::InternalUvWithPinFallback
        {
            let elapsed = self.clock.now().saturating_duration_since(in_flight.sent_at);
            if elapsed < self.config.min_expected_response_time {
                debug!(authenticator = %id, ?elapsed, "UV rejected instantly, collecting a touch before PIN fallback");
                self.touch_purpose.insert(
                    id.clone(),
                    TouchPurpose::ObtainToken {
                        internal_uv_locked: true,
                    },
                );
                authenticator.get_touch(self.completion(move |()| Event::Touch(id)));
            } else {
                self.obtain_token(id, true);
            }
            return;
        }

        let response = match result {
            Ok(response) => response,
            Err(code) => {
                match MakeCredentialStatus::from_device_response(code) {
                    Some(status) if !status.is_success() => {
                        info!(authenticator = %id, status = ?code, "request failed");
                        self.finish(status, None, Some(id));
                    }
                    _ if self.state == State::WaitingForSecondTouch || in_flight.retried => {
                        warn!(authenticator = %id, status = ?code, "unexpected response from selected authenticator");
                        self.finish(MakeCredentialStatus::AuthenticatorResponseInvalid, None, Some(id));
                    }
                    _ => warn!(authenticator = %id, status = ?code, "ignoring unexpected response"),
                }
                return;
            }
        };

        self.finish_with_response(&authenticator, &in_flight.request, response);
    }

    fn finish_with_response(
        &mut self,
        authenticator: &Arc<dyn Authenticator>,
        request: &CredentialCreationRequest,
        mut response: MakeCredentialResponse,
    ) {
        let id = authenticator.id().clone();
        match validate::validate_response(request, authenticator.as_ref(), &response) {
            Ok(()) => {
                if response.transport_used.is_none() {
                    response.transport_used = authenticator.transport();
                }
                self.finish(MakeCredentialStatus::Success, Some(response), Some(id));
            }
            Err(err) => {
                warn!(authenticator = %id, error = %err, "rejecting response");
                self.finish(MakeCredentialStatus::AuthenticatorResponseInvalid, None, Some(id));
            }
        }
    }

    fn on_removed(&mut self, id: AuthenticatorId) {
        self.authenticators.remove(&id);
        self.in_flight.remove(&id);
        self.touch_purpose.remove(&id);

        if !self.is_current(&id) {
            debug!(authenticator = %id, "authenticator removed");
            return;
        }
        self.current = None;
        if self.state != State::WaitingForTouch {
            info!(authenticator = %id, state = ?self.state, "selected authenticator removed");
            self.finish(MakeCredentialStatus::AuthenticatorRemovedDuringPinEntry, None, None);
        }
    }

    fn teardown(&mut self) {
        if self.state == State::Finished {
            return;
        }
        if self.current.is_some() && self.pin_uv_started && self.state != State::WaitingForTouch {
            self.finish(MakeCredentialStatus::AuthenticatorRemovedDuringPinEntry, None, None);
            return;
        }
        debug!("discarding request without a result");
        self.cancel_others(None);
        self.callback = None;
        self.state = State::Finished;
    }

    fn finish(
        &mut self,
        status: MakeCredentialStatus,
        response: Option<MakeCredentialResponse>,
        authenticator: Option<AuthenticatorId>,
    ) {
        if self.state == State::Finished {
            return;
        }
        self.state = State::Finished;
        self.cancel_others(authenticator.as_ref());
        self.in_flight.clear();
        self.touch_purpose.clear();
        self.bio = None;
        self.new_pin = None;

        info!(?status, authenticator = ?authenticator.as_ref().map(AuthenticatorId::as_str), "request finished");
        if let Some(callback) = self.callback.take() {
            callback(status, response, authenticator);
        }
    }
}

impl Drop for MakeCredentialRequestHandler {
    fn drop(&mut self) {
        self.teardown();
    }
}
