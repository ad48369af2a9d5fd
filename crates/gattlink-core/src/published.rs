//! Observable session state
//!
//! A [`Published`] value keeps only its latest snapshot. Observers that
//! subscribe late see the current value, never the history.

use tokio::sync::watch;

/// A latest-value-wins cell observers can subscribe to
#[derive(Debug)]
pub struct Published<T> {
    tx: watch::Sender<T>,
}

impl<T: Clone> Published<T> {
    pub fn new(initial: T) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    /// Snapshot of the current value
    pub fn get(&self) -> T {
        self.tx.borrow().clone()
    }

    /// Replace the value and wake observers
    pub fn set(&self, value: T) {
        self.tx.send_replace(value);
    }

    /// Mutate in place under the cell's lock and wake observers
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut T),
    {
        self.tx.send_modify(f);
    }

    /// Receiver that observes every subsequent change
    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.tx.subscribe()
    }
}

impl<T: Clone + Default> Default for Published<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}
