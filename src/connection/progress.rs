/// Outcome of an I/O operation that may not finish on a non-blocking transport.
///
/// `WouldBlock` is not an error: the operation made whatever progress it could and
/// kept it. Repeat the same call, with the same arguments, once the owning reactor
/// reports readiness.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Progress<T> {
    /// The operation finished.
    Complete(T),
    /// The transport cannot make progress right now.
    WouldBlock,
}

impl<T> Progress<T> {
    #[inline]
    pub const fn is_complete(&self) -> bool {
        matches!(self, Progress::Complete(_))
    }

    #[inline]
    pub const fn is_would_block(&self) -> bool {
        matches!(self, Progress::WouldBlock)
    }

    /// The completed value, if any.
    #[inline]
    pub fn complete(self) -> Option<T> {
        match self {
            Progress::Complete(value) => Some(value),
            Progress::WouldBlock => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Progress<U> {
        match self {
            Progress::Complete(value) => Progress::Complete(f(value)),
            Progress::WouldBlock => Progress::WouldBlock,
        }
    }
}
