use std::collections::VecDeque;

use crate::util::generate_id;

const MAX_NOTICES: usize = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NoticeKind {
    Info,
    Success,
    Warning,
    Error,
}

/// A user-visible message, e.g. a failed remote call.
#[derive(Clone, Debug, PartialEq)]
pub struct Notice {
    pub id: String,
    pub kind: NoticeKind,
    pub text: String,
}

impl Notice {
    pub fn new(kind: NoticeKind, text: impl Into<String>) -> Self {
        Self {
            id: generate_id("notice"),
            kind,
            text: text.into(),
        }
    }
}

/// Bounded queue; the oldest notice is dropped once full.
#[derive(Clone, Debug, Default)]
pub struct Notices {
    entries: VecDeque<Notice>,
}

impl Notices {
    pub fn push(&mut self, kind: NoticeKind, text: impl Into<String>) -> &Notice {
        if self.entries.len() >= MAX_NOTICES {
            self.entries.pop_front();
        }
        self.entries.push_back(Notice::new(kind, text));
        &self.entries[self.entries.len() - 1]
    }

    pub fn dismiss(&mut self, id: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|notice| notice.id != id);
        before != self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Notice> {
        self.entries.iter()
    }

    pub fn latest(&self) -> Option<&Notice> {
        self.entries.back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
