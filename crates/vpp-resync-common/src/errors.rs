//! Error accumulation for passes that continue past per-object failures.

/// Collects per-object errors of a resync pass.
///
/// Families that keep going after a failed create/modify/delete record each
/// failure here and report the most recent one when the pass ends.
///
/// ```
/// use vpp_resync_common::PassErrors;
///
/// let mut errors = PassErrors::new();
/// errors.record("key 1 rejected");
/// errors.record("key 2 rejected");
///
/// assert_eq!(errors.count(), 2);
/// assert_eq!(errors.into_result(), Err("key 2 rejected"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassErrors<E> {
    count: usize,
    last: Option<E>,
}

impl<E> PassErrors<E> {
    pub const fn new() -> Self {
        Self {
            count: 0,
            last: None,
        }
    }

    /// Records a failure; it replaces any earlier one as the reported error.
    pub fn record(&mut self, error: E) {
        self.count += 1;
        self.last = Some(error);
    }

    pub const fn count(&self) -> usize {
        self.count
    }

    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Converts to `Ok(())` if nothing failed, or the last recorded error.
    pub fn into_result(self) -> Result<(), E> {
        match self.last {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl<E> Default for PassErrors<E> {
    fn default() -> Self {
        Self::new()
    }
}
