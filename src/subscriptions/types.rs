//! Outcome types for subscribe and unsubscribe.

/// Successful result of a subscribe call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscribeOutcome {
    /// Newly observed; the protocol subscription was issued.
    Subscribed,
    /// Already observed on this channel. Nothing was done.
    AlreadySubscribed,
}

/// Successful result of an unsubscribe call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnsubscribeOutcome {
    Unsubscribed,
    /// Not observed on this channel. Nothing was done.
    NotSubscribed,
}
