//! Reactive single-value state cells
//!
//! A [`SubscriptionCell`] holds one value behind a `tokio::sync::watch` channel.
//! Every update is applied atomically and is visible to readers before the
//! updating call returns; subscribers are woken on each change.

use tokio::sync::watch;

/// Atomic state container with change notification
#[derive(Debug)]
pub struct SubscriptionCell<T> {
    tx: watch::Sender<T>,
}

impl<T> SubscriptionCell<T> {
    pub fn new(value: T) -> Self {
        let (tx, _rx) = watch::channel(value);
        Self { tx }
    }

    /// Clone the current value
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.tx.borrow().clone()
    }

    /// Read the current value in place.
    ///
    /// Writers block while `f` runs, so `f` must not await or touch this cell.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.tx.borrow())
    }

    /// Replace the value, returning the previous one
    pub fn set(&self, value: T) -> T {
        self.tx.send_replace(value)
    }

    /// Modify the value in place and notify subscribers
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        self.tx.send_modify(f);
    }

    /// Modify the value in place; subscribers are only notified when `f` returns `true`
    pub fn update_if(&self, f: impl FnOnce(&mut T) -> bool) -> bool {
        self.tx.send_if_modified(f)
    }

    /// Stream of changes. The receiver starts with the current value marked as seen.
    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.tx.subscribe()
    }
}

impl<T: Default> Default for SubscriptionCell<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_get() {
        let cell = SubscriptionCell::new(false);
        assert!(!cell.get());

        let previous = cell.set(true);
        assert!(!previous);
        assert!(cell.get());
    }

    #[test]
    fn test_update_if_reports_modification() {
        let cell = SubscriptionCell::new(Some(1u64));
        assert!(!cell.update_if(|value| value.is_none()));
        assert!(cell.update_if(|value| value.take().is_some()));
        assert_eq!(cell.get(), None);
    }

    #[tokio::test]
    async fn test_subscriber_sees_update() {
        let cell = SubscriptionCell::new(0u32);
        let mut rx = cell.subscribe();

        cell.update(|value| *value += 5);

        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), 5);
    }

    #[tokio::test]
    async fn test_silent_update_does_not_wake() {
        let cell = SubscriptionCell::new(0u32);
        let mut rx = cell.subscribe();

        cell.update_if(|_| false);
        assert!(!rx.has_changed().unwrap());
    }
}
