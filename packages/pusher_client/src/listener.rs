//! Listener traits and panic-isolated invocation.
//!
//! Listener identity is the `Arc` allocation: binding the same `Arc` twice
//! registers it twice, and `unbind` removes one registration by `Arc::ptr_eq`.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use crate::error::TransportError;
use crate::protocol::ChannelEvent;
use crate::state::ConnectionStateChange;

/// Observer of connection lifecycle transitions.
pub trait ConnectionEventListener: Send + Sync {
    fn on_connection_state_change(&self, change: &ConnectionStateChange);

    /// Called for `pusher:error` frames and transport failures.
    fn on_error(&self, _message: &str, _code: Option<i64>, _cause: Option<&TransportError>) {}
}

impl<F> ConnectionEventListener for F
where
    F: Fn(&ConnectionStateChange) + Send + Sync,
{
    fn on_connection_state_change(&self, change: &ConnectionStateChange) {
        self(change)
    }
}

/// Observer of events on a channel.
pub trait ChannelEventListener: Send + Sync {
    fn on_event(&self, event: &ChannelEvent);

    fn on_subscription_succeeded(&self, _channel: &str) {}
}

impl<F> ChannelEventListener for F
where
    F: Fn(&ChannelEvent) + Send + Sync,
{
    fn on_event(&self, event: &ChannelEvent) {
        self(event)
    }
}

/// Remove the first registration of `listener`. Returns whether one was found.
pub(crate) fn remove_first<T: ?Sized>(list: &mut Vec<Arc<T>>, listener: &Arc<T>) -> bool {
    match list.iter().position(|l| Arc::ptr_eq(l, listener)) {
        Some(idx) => {
            list.remove(idx);
            true
        }
        None => false,
    }
}

/// Push `listener` unless the same allocation is already present.
pub(crate) fn push_distinct<T: ?Sized>(list: &mut Vec<Arc<T>>, listener: &Arc<T>) {
    if !list.iter().any(|l| Arc::ptr_eq(l, listener)) {
        list.push(listener.clone());
    }
}

/// Run one listener callback, containing any panic it raises.
///
/// Returns `false` if the callback panicked.
pub(crate) fn invoke_isolated(context: &str, f: impl FnOnce()) -> bool {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(()) => true,
        Err(panic) => {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            tracing::error!(context, reason = %reason, "listener panicked");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remove_first_only_removes_one_registration() {
        let a: Arc<str> = Arc::from("a");
        let b: Arc<str> = Arc::from("a");
        let mut list = vec![a.clone(), b.clone(), a.clone()];

        assert!(remove_first(&mut list, &a));
        assert_eq!(list.len(), 2);
        assert!(Arc::ptr_eq(&list[0], &b));
        assert!(Arc::ptr_eq(&list[1], &a));
    }

    #[test]
    fn remove_first_uses_identity_not_equality() {
        let a: Arc<str> = Arc::from("same");
        let b: Arc<str> = Arc::from("same");
        let mut list = vec![a];
        assert!(!remove_first(&mut list, &b));
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn push_distinct_skips_duplicates() {
        let a: Arc<str> = Arc::from("a");
        let mut list = Vec::new();
        push_distinct(&mut list, &a);
        push_distinct(&mut list, &a);
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn invoke_isolated_contains_panics() {
        assert!(invoke_isolated("test", || {}));
        assert!(!invoke_isolated("test", || panic!("listener bug")));
    }
}
