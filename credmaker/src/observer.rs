//! UI surface the handler drives during PIN/UV and enrollment

use crate::authenticator::Completion;

/// Why a PIN is being asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinCollectionReason {
    /// Enter the PIN already set on the authenticator
    Enter,
    /// Choose a PIN for an authenticator that has none
    Set,
}

/// Hint shown alongside a PIN prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinEntryError {
    /// The previous attempt was wrong
    WrongPin,
    /// Built-in verification is locked, so the PIN is the fallback
    InternalUvLocked,
}

/// Parameters for a PIN prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectPinOptions {
    pub reason: PinCollectionReason,
    pub error: Option<PinEntryError>,
    /// Attempts left before the PIN blocks; `None` when setting a PIN
    pub attempts: Option<u8>,
    pub min_pin_length: u32,
}

/// Request observer
///
/// Calls arrive on the handler's thread. Anything that waits on the user
/// replies later through the given [`Completion`].
pub trait Observer: Send + Sync {
    /// Whether this UI can prompt for a PIN at all
    fn supports_pin(&self) -> bool;

    fn collect_pin(&self, options: CollectPinOptions, reply: Completion<String>);

    /// Show enrollment UI; `on_dismissed` fires when the user closes it
    fn start_bio_enrollment(&self, on_dismissed: Completion<()>);

    fn on_sample_collected(&self, remaining_samples: u8);

    fn on_retry_user_verification(&self, retries: u8);

    fn on_internal_user_verification_locked(&self);

    /// PIN/UV is over; the request is about to be sent with the token
    fn finish_collect_token(&self);
}
