//! Core value types shared across the kernel.
//!
//! Every blocking operation in this crate takes a [`WaitTimeout`], which
//! carries the SDK-wide millisecond convention: negative waits forever,
//! zero polls without blocking, positive bounds the wait.
//!
//! [`CallSite`] is the opaque diagnostic token that travels with worker
//! submissions. It carries no behavioral weight; it exists so hang
//! diagnosis and tracing output can name the code that queued a task.

use core::fmt;
use std::time::Duration;

/// Timeout for a blocking wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitTimeout {
    /// Wait until the predicate holds, however long that takes.
    Infinite,
    /// Check the predicate once and return immediately.
    Poll,
    /// Wait at most this long.
    Bounded(Duration),
}

impl WaitTimeout {
    /// Shorthand for [`WaitTimeout::Infinite`].
    pub const INFINITE: Self = Self::Infinite;

    /// Shorthand for [`WaitTimeout::Poll`].
    pub const POLL: Self = Self::Poll;

    /// Converts from the SDK's millisecond convention.
    ///
    /// `ms < 0` waits indefinitely, `ms == 0` polls, `ms > 0` bounds the
    /// wait to `ms` milliseconds.
    #[must_use]
    pub fn from_millis(ms: i64) -> Self {
        match ms {
            m if m < 0 => Self::Infinite,
            0 => Self::Poll,
            m => Self::Bounded(Duration::from_millis(m.unsigned_abs())),
        }
    }

    /// Returns the bounded duration, if any.
    #[must_use]
    pub const fn bound(&self) -> Option<Duration> {
        match self {
            Self::Bounded(d) => Some(*d),
            Self::Infinite | Self::Poll => None,
        }
    }

    /// Returns `true` for the non-blocking poll mode.
    #[must_use]
    pub const fn is_poll(&self) -> bool {
        matches!(self, Self::Poll)
    }
}

impl From<Duration> for WaitTimeout {
    fn from(d: Duration) -> Self {
        Self::Bounded(d)
    }
}

/// Opaque source-context token attached to worker submissions.
///
/// Produced by [`call_site!`](crate::call_site); flows into tracing
/// fields unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallSite(&'static str);

impl CallSite {
    /// Creates a call site from a static label.
    #[must_use]
    pub const fn new(label: &'static str) -> Self {
        Self(label)
    }

    /// Returns the label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Captures the current `file:line` as a [`CallSite`].
#[macro_export]
macro_rules! call_site {
    () => {
        $crate::types::CallSite::new(concat!(file!(), ":", line!()))
    };
}
