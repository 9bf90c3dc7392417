//! Per-run signal mailbox

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::workflow::SignalReceiver;

/// Buffers signals until a receiver asks and hands each payload to exactly
/// one receiver
///
/// Signals sent before anyone listens are queued per name; listeners waiting
/// before a signal arrives are served in registration order.
#[derive(Debug, Default)]
pub(crate) struct SignalMailbox {
    inner: Mutex<MailboxState>,
}

#[derive(Debug, Default)]
struct MailboxState {
    buffered: HashMap<String, VecDeque<Value>>,
    waiters: HashMap<String, VecDeque<oneshot::Sender<Value>>>,
    closed: bool,
}

impl SignalMailbox {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Hand `payload` to the oldest live waiter, or buffer it
    ///
    /// Returns `false` once the mailbox is closed.
    pub(crate) fn deliver(&self, name: &str, payload: Value) -> bool {
        let mut state = self.inner.lock();
        if state.closed {
            return false;
        }

        let mut payload = payload;
        if let Some(waiters) = state.waiters.get_mut(name) {
            while let Some(waiter) = waiters.pop_front() {
                // A dropped receiver hands the payload back
                match waiter.send(payload) {
                    Ok(()) => return true,
                    Err(returned) => payload = returned,
                }
            }
        }

        state
            .buffered
            .entry(name.to_string())
            .or_default()
            .push_back(payload);
        true
    }

    pub(crate) fn receiver(&self, name: &str) -> SignalReceiver {
        let mut state = self.inner.lock();
        if let Some(payload) = state.buffered.get_mut(name).and_then(VecDeque::pop_front) {
            return SignalReceiver::new(futures::future::ready(Some(payload)));
        }
        if state.closed {
            return SignalReceiver::closed();
        }

        let (tx, rx) = oneshot::channel();
        state.waiters.entry(name.to_string()).or_default().push_back(tx);
        SignalReceiver::from_oneshot(rx)
    }

    /// Reject further signals and resolve every pending receiver with `None`
    pub(crate) fn close(&self) {
        let mut state = self.inner.lock();
        state.closed = true;
        state.waiters.clear();
        state.buffered.clear();
    }
}
