//! Revision-tagged registers.
//!
//! Every synchronized field is a [`Register`]: a value plus the revision at
//! which it was written. Merging is last-writer-wins by revision, with two
//! refinements:
//!
//! - an unset local value is filled from a remote that is not older
//! - on equal revisions with different content the local value is kept and
//!   the outcome is reported as [`MergeOutcome::TieKeptLocal`]
//!
//! Revisions never move backward.

use serde::{Deserialize, Serialize};

/// A value tagged with the revision that wrote it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Register<T> {
    pub value: Option<T>,
    pub revision: u64,
}

impl<T> Default for Register<T> {
    fn default() -> Self {
        Self {
            value: None,
            revision: 0,
        }
    }
}

/// What a merge did to the local register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The remote value replaced the local one.
    Adopted,
    /// The local value is newer or identical.
    KeptLocal,
    /// Same revision, different content; local kept.
    TieKeptLocal,
}

impl<T: Clone + PartialEq> Register<T> {
    pub fn new(value: Option<T>, revision: u64) -> Self {
        Self { value, revision }
    }

    pub fn is_set(&self) -> bool {
        self.value.is_some()
    }

    /// Merge a remote register into this one.
    pub fn merge(&mut self, remote: &Register<T>) -> MergeOutcome {
        if self.value.is_none() && remote.value.is_some() && remote.revision >= self.revision {
            self.value = remote.value.clone();
            self.revision = self.revision.max(remote.revision);
            return MergeOutcome::Adopted;
        }

        if remote.revision > self.revision {
            let changed = self.value != remote.value;
            self.value = remote.value.clone();
            self.revision = remote.revision;
            return if changed {
                MergeOutcome::Adopted
            } else {
                MergeOutcome::KeptLocal
            };
        }

        if remote.revision == self.revision && self.value != remote.value && remote.value.is_some() {
            return MergeOutcome::TieKeptLocal;
        }

        MergeOutcome::KeptLocal
    }
}
