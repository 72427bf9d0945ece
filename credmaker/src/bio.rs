//! Inline fingerprint enrollment
//!
//! Runs between token acquisition and dispatch when the selected
//! authenticator supports biometrics but has nothing enrolled. Two parties
//! must finish before the request continues: the device sample loop and the
//! UI being dismissed.

use crate::authenticator::{AuthenticatorId, BioEnrollSample};
use crate::pin_uv::PinUvToken;

use credmaker_ctap::StatusCode;

/// Count-down join over a fixed number of parties
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionBarrier {
    remaining: usize,
}

impl CompletionBarrier {
    pub fn new(parties: usize) -> Self {
        Self { remaining: parties }
    }

    /// Record one party as done; true once the last one arrives
    pub fn arrive(&mut self) -> bool {
        self.remaining = self.remaining.saturating_sub(1);
        self.remaining == 0
    }

    pub fn is_released(&self) -> bool {
        self.remaining == 0
    }
}

/// What the handler must do after feeding the session an event
#[derive(Debug, PartialEq, Eq)]
pub enum BioStep {
    /// Capture another sample for this template
    NextSample(Vec<u8>),
    /// Cancel the enrollment still running on the device
    CancelDevice,
    /// Keep waiting for the other party
    Wait,
    /// Both parties finished
    Released,
}

/// State of one enrollment run
#[derive(Debug)]
pub struct BioEnrollmentSession {
    authenticator: AuthenticatorId,
    token: PinUvToken,
    template_id: Option<Vec<u8>>,
    device_done: bool,
    dismissed: bool,
    barrier: CompletionBarrier,
}

impl BioEnrollmentSession {
    pub fn new(authenticator: AuthenticatorId, token: PinUvToken) -> Self {
        Self {
            authenticator,
            token,
            template_id: None,
            device_done: false,
            dismissed: false,
            barrier: CompletionBarrier::new(2),
        }
    }

    pub fn authenticator(&self) -> &AuthenticatorId {
        &self.authenticator
    }

    pub fn token(&self) -> &PinUvToken {
        &self.token
    }

    pub fn template_id(&self) -> Option<&[u8]> {
        self.template_id.as_deref()
    }

    pub fn device_done(&self) -> bool {
        self.device_done
    }

    /// Feed a device reply to `bio_enroll`
    pub fn on_sample(&mut self, result: Result<BioEnrollSample, StatusCode>) -> BioStep {
        if self.device_done {
            return BioStep::Wait;
        }
        match result {
            Ok(sample) => {
                self.template_id = Some(sample.template_id.clone());
                if sample.remaining_samples > 0 && !self.dismissed {
                    return BioStep::NextSample(sample.template_id);
                }
            }
            Err(code) => {
                tracing::debug!(status = ?code, "bio enrollment ended with error");
            }
        }
        self.device_done = true;
        self.arrive()
    }

    /// Feed the UI dismissal
    pub fn on_dismissed(&mut self) -> BioStep {
        if self.dismissed {
            return BioStep::Wait;
        }
        self.dismissed = true;
        if !self.device_done {
            self.barrier.arrive();
            return BioStep::CancelDevice;
        }
        self.arrive()
    }

    /// Give up the session, returning the token it held
    pub fn into_token(self) -> PinUvToken {
        self.token
    }

    fn arrive(&mut self) -> BioStep {
        if self.barrier.arrive() {
            BioStep::Released
        } else {
            BioStep::Wait
        }
    }
}
