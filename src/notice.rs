// src/notice.rs
// Transient dismissible banners. One at a time: a new notice supersedes
// the old, and anything older than the TTL is treated as dismissed.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Info,
    Error,
}

#[derive(Debug, Clone)]
pub struct Notice {
    pub text: String,
    pub kind: NoticeKind,
    raised_at: Instant,
}

impl Notice {
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind: NoticeKind::Error,
            raised_at: Instant::now(),
        }
    }

    pub fn info(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind: NoticeKind::Info,
            raised_at: Instant::now(),
        }
    }

    pub fn age(&self) -> Duration {
        self.raised_at.elapsed()
    }
}

/// Holds at most one live notice.
#[derive(Debug, Default)]
pub struct NoticeBoard {
    current: Option<Notice>,
    ttl: Option<Duration>,
}

pub const DEFAULT_NOTICE_TTL: Duration = Duration::from_secs(60);

impl NoticeBoard {
    pub fn new(ttl: Duration) -> Self {
        Self {
            current: None,
            ttl: Some(ttl),
        }
    }

    pub fn raise(&mut self, notice: Notice) {
        self.current = Some(notice);
    }

    pub fn dismiss(&mut self) {
        self.current = None;
    }

    /// The live notice, if any. Expired notices are dropped on access.
    pub fn active(&mut self) -> Option<&Notice> {
        let ttl = self.ttl.unwrap_or(DEFAULT_NOTICE_TTL);
        if let Some(notice) = &self.current {
            if notice.age() >= ttl {
                self.current = None;
            }
        }
        self.current.as_ref()
    }
}
