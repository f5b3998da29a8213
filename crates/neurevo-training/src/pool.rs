/// Fixed-capacity pool of simulation contexts.
///
/// Contexts are moved out of the pool on checkout and moved back on checkin,
/// so a context is never shared between two workers.
#[derive(Debug)]
pub struct ContextPool<S> {
    capacity: usize,
    idle: Vec<S>,
}

impl<S> ContextPool<S> {
    /// Creates a pool owning every given context; its capacity is their count.
    pub fn new<I>(contexts: I) -> Self
    where
        I: IntoIterator<Item = S>,
    {
        let idle: Vec<S> = contexts.into_iter().collect();
        Self {
            capacity: idle.len(),
            idle,
        }
    }

    /// Number of contexts owned by the pool, checked out or not.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of contexts ready to be checked out.
    #[must_use]
    pub fn available(&self) -> usize {
        self.idle.len()
    }

    pub fn checkout(&mut self) -> Option<S> {
        self.idle.pop()
    }

    /// Checks out exactly `count` contexts, or none at all.
    pub fn checkout_many(&mut self, count: usize) -> Option<Vec<S>> {
        let start = self.idle.len().checked_sub(count)?;
        Some(self.idle.split_off(start))
    }

    /// Returns a checked-out context to the pool.
    ///
    /// # Panics
    ///
    /// Panics if the pool already holds `capacity` idle contexts.
    pub fn checkin(&mut self, context: S) {
        assert!(
            self.idle.len() < self.capacity,
            "checked in more contexts than the pool owns"
        );
        self.idle.push(context);
    }

    /// Drops a checked-out context that can no longer be returned.
    pub(crate) fn forget(&mut self, count: usize) {
        self.capacity = self.capacity.saturating_sub(count).max(self.idle.len());
    }
}
