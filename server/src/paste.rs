use burnbin_common::PasteView;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::{Record, Store, StoreError};

/// Number of reports after which a paste is taken down.
pub const REPORT_THRESHOLD: u32 = 3;

pub const DEFAULT_SYNTAX: &str = "text";

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PasteEntry {
    pub slug: String,
    pub content: String,
    pub syntax: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Argon2 PHC string; never the password itself.
    pub password_hash: Option<String>,
    pub burn_after_read: bool,
    pub report_count: u32,
}

impl PasteEntry {
    pub fn new(content: String, syntax: String, created_at: DateTime<Utc>) -> Self {
        Self {
            slug: String::new(),
            content,
            syntax,
            created_at,
            expires_at: None,
            password_hash: None,
            burn_after_read: false,
            report_count: 0,
        }
    }

    /// Reported pastes are deleted right away; one that is still around
    /// (e.g. the delete failed) is treated as already gone.
    pub const fn is_reported(&self) -> bool {
        self.report_count >= REPORT_THRESHOLD
    }

    pub const fn is_password_protected(&self) -> bool {
        self.password_hash.is_some()
    }

    pub fn into_view(self) -> PasteView {
        PasteView {
            password_protected: self.is_password_protected(),
            content: self.content,
            syntax: self.syntax,
            created_at: self.created_at,
            expires_at: self.expires_at,
            burn_after_read: self.burn_after_read,
        }
    }
}

impl Record for PasteEntry {
    const NAMESPACE: &'static [u8] = b"p/";

    fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }
}

/// Result of bumping a paste's report counter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReportTally {
    pub count: u32,
    pub threshold_reached: bool,
}

impl ReportTally {
    const fn new(count: u32) -> Self {
        Self {
            count,
            threshold_reached: count >= REPORT_THRESHOLD,
        }
    }
}

impl Store {
    /// Atomically increments the report counter of a live paste. Deleting the
    /// paste once the threshold is reached is left to the caller.
    pub async fn increment_report_count(&self, slug: &str) -> Result<ReportTally, StoreError> {
        self.update::<PasteEntry, _, _>(slug, |entry| {
            entry.report_count = entry.report_count.saturating_add(1);
            ReportTally::new(entry.report_count)
        })
        .await?
        .ok_or(StoreError::NotFound)
    }
}
