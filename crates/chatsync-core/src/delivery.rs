//! Delivery status transition rules

use thiserror::Error;

use crate::models::DeliveryStatus;

/// A rejected delivery status transition
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatusError {
    /// `Read` is terminal
    #[error("cannot change status of a read message")]
    CannotChangeFromRead,

    /// Delivered messages cannot go back to sending
    #[error("cannot change from delivered to sending")]
    CannotChangeFromDeliveredToSending,

    /// Delivered messages cannot fail
    #[error("cannot change from delivered to failed")]
    CannotChangeFromDeliveredToFailed,

    /// Delivered messages cannot go back to sent
    #[error("cannot change from delivered to sent")]
    CannotChangeFromDeliveredToSent,

    /// Sent messages cannot go back to sending
    #[error("cannot change from sent to sending")]
    CannotChangeFromSentToSending,

    /// Sent messages cannot fail
    #[error("cannot change from sent to failed")]
    CannotChangeFromSentToFailed,

    /// A tracked status cannot be cleared
    #[error("cannot clear an existing delivery status")]
    CannotChangeAnyStatusToUndefined,

    /// An untracked message may only start sending
    #[error("a message without status may only start sending")]
    CannotChangeFromUndefinedToOtherThanSending,

    /// Progress outside `0..=100`
    #[error("invalid sending progress: {0}")]
    InvalidSendingProgress(u8),
}

/// Check whether `current -> next` is a legal delivery status transition.
///
/// | current        | allowed next                                |
/// |----------------|---------------------------------------------|
/// | none           | sending                                     |
/// | sending/failed | sending, failed, sent, delivered, read      |
/// | sent           | sent, delivered, read                       |
/// | delivered      | delivered, read                             |
/// | read           | nothing                                     |
pub fn validate(
    current: Option<&DeliveryStatus>,
    next: Option<&DeliveryStatus>,
) -> Result<(), DeliveryStatusError> {
    use DeliveryStatus::{Delivered, Failed, Read, Sending, Sent};
    use DeliveryStatusError as E;

    if let Some(Sending { progress }) = next {
        if *progress > 100 {
            return Err(E::InvalidSendingProgress(*progress));
        }
    }

    match (current, next) {
        (Some(Read), _) => Err(E::CannotChangeFromRead),
        (Some(_), None) => Err(E::CannotChangeAnyStatusToUndefined),
        (None, Some(Sending { .. })) => Ok(()),
        (None, _) => Err(E::CannotChangeFromUndefinedToOtherThanSending),
        (Some(Sending { .. } | Failed { .. }), Some(_)) => Ok(()),
        (Some(Sent), Some(Sent | Delivered | Read)) => Ok(()),
        (Some(Sent), Some(Sending { .. })) => Err(E::CannotChangeFromSentToSending),
        (Some(Sent), Some(Failed { .. })) => Err(E::CannotChangeFromSentToFailed),
        (Some(Delivered), Some(Delivered | Read)) => Ok(()),
        (Some(Delivered), Some(Sending { .. })) => Err(E::CannotChangeFromDeliveredToSending),
        (Some(Delivered), Some(Failed { .. })) => Err(E::CannotChangeFromDeliveredToFailed),
        (Some(Delivered), Some(Sent)) => Err(E::CannotChangeFromDeliveredToSent),
    }
}
