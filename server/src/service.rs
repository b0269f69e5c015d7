//! The paste access protocol: create, read, report and delete on top of the
//! expiring store, with the password and burn-after-read gates applied in a
//! fixed order.

use burnbin_common::CreatePaste;
use chrono::Utc;
use rand::rngs::OsRng;
use rand::Rng;
use tracing::{error, info, instrument, warn};

use crate::error::PasteError;
use crate::paste::{PasteEntry, DEFAULT_SYNTAX};
use crate::password;
use crate::short_code::{Generator, Slug};
use crate::store::{Store, StoreError};

/// How many fresh slugs to try before giving up on a create.
pub const MAX_SLUG_ATTEMPTS: usize = 5;

/// What a report did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReportOutcome {
    pub count: u32,
    /// Whether this report removed the paste.
    pub deleted: bool,
}

#[derive(Clone)]
pub struct PasteService {
    store: Store,
    max_content_chars: usize,
}

impl PasteService {
    pub const fn new(store: Store, max_content_chars: usize) -> Self {
        Self {
            store,
            max_content_chars,
        }
    }

    pub const fn store(&self) -> &Store {
        &self.store
    }

    /// Validates and persists a new paste, returning its slug.
    #[instrument(skip_all, fields(expires_in = %request.expires_in, burn = request.burn_after_read))]
    pub async fn create(&self, request: CreatePaste) -> Result<Slug, PasteError> {
        let content = request
            .content
            .filter(|content| !content.is_empty())
            .ok_or(PasteError::ContentRequired)?;

        if content.chars().count() > self.max_content_chars {
            return Err(PasteError::ContentTooLarge {
                max: self.max_content_chars,
            });
        }

        let syntax = request
            .syntax
            .map(|syntax| syntax.trim().to_owned())
            .filter(|syntax| !syntax.is_empty())
            .unwrap_or_else(|| DEFAULT_SYNTAX.to_owned());

        let now = Utc::now();
        let mut entry = PasteEntry::new(content, syntax, now);
        entry.expires_at = Some(request.expires_in.expires_at(now));
        entry.burn_after_read = request.burn_after_read;

        if let Some(password) = request.password.filter(|password| !password.is_empty()) {
            entry.password_hash = Some(password::hash(password).await?);
        }

        self.persist_with_fresh_slug(&mut entry, &mut OsRng).await
    }

    async fn persist_with_fresh_slug<R: Rng + Send>(
        &self,
        entry: &mut PasteEntry,
        rng: &mut R,
    ) -> Result<Slug, PasteError> {
        for attempt in 1..=MAX_SLUG_ATTEMPTS {
            let slug: Slug = rng.sample(Generator);
            entry.slug = slug.to_string();

            match self.store.put(&entry.slug, &*entry).await {
                Ok(()) => {
                    info!(%slug, "Created paste");
                    return Ok(slug);
                }
                Err(StoreError::DuplicateKey) => {
                    warn!(%slug, attempt, "Slug already taken, generating another");
                }
                Err(e) => return Err(e.into()),
            }
        }

        error!("Failed to generate a unique slug");
        Err(StoreError::DuplicateKey.into())
    }

    /// Returns a paste if every gate passes. A burn-after-read paste is gone
    /// once this returns `Ok`.
    #[instrument(skip(self, password))]
    pub async fn read(
        &self,
        slug: &str,
        password: Option<String>,
    ) -> Result<PasteEntry, PasteError> {
        let key = parse_slug(slug)?.to_string();
        let entry = self
            .store
            .get::<PasteEntry>(&key)
            .await?
            .ok_or(PasteError::NotFound)?;

        if entry.is_reported() {
            self.store.delete::<PasteEntry>(&key).await?;
            return Err(PasteError::NotFound);
        }

        if let Some(hash) = &entry.password_hash {
            let attempt = password
                .filter(|attempt| !attempt.is_empty())
                .ok_or(PasteError::PasswordRequired)?;
            if !password::verify(attempt, hash.clone()).await? {
                return Err(PasteError::IncorrectPassword);
            }
        }

        if entry.burn_after_read {
            // Only the reader that actually removes the paste gets to see it.
            if !self.store.delete::<PasteEntry>(&key).await? {
                return Err(PasteError::NotFound);
            }
            info!(slug = %key, "Burned paste after read");
        }

        Ok(entry)
    }

    /// Counts a report against a paste and takes it down at the threshold.
    #[instrument(skip(self))]
    pub async fn report(&self, slug: &str) -> Result<ReportOutcome, PasteError> {
        let key = parse_slug(slug)?.to_string();
        let tally = match self.store.increment_report_count(&key).await {
            Ok(tally) => tally,
            Err(StoreError::NotFound) => return Err(PasteError::NotFound),
            Err(e) => return Err(e.into()),
        };

        let deleted =
            tally.threshold_reached && self.store.delete::<PasteEntry>(&key).await?;
        if deleted {
            warn!(slug = %key, count = tally.count, "Paste taken down after reports");
        }

        Ok(ReportOutcome {
            count: tally.count,
            deleted,
        })
    }

    /// Removes a paste now. Returns whether there was one to remove.
    #[instrument(skip(self))]
    pub async fn delete(&self, slug: &str) -> Result<bool, PasteError> {
        let slug = match slug.parse::<Slug>() {
            Ok(slug) => slug,
            Err(_) => return Ok(false),
        };

        let removed = self.store.delete::<PasteEntry>(&slug.to_string()).await?;
        if removed {
            info!(%slug, "Deleted paste");
        }
        Ok(removed)
    }
}

// A slug that can't have been generated can't name a paste.
fn parse_slug(slug: &str) -> Result<Slug, PasteError> {
    slug.parse().map_err(|_| PasteError::NotFound)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use burnbin_common::ExpiresIn;
    use chrono::Duration as TimeDelta;
    use rand::RngCore;
    use tempfile::TempDir;

    use super::*;
    use crate::paste::REPORT_THRESHOLD;

    const MAX_CHARS: usize = 100_000;

    fn setup_service() -> (PasteService, TempDir) {
        let temp = TempDir::new().unwrap();
        let store = Store::open(temp.path().join("db"), Duration::from_secs(5)).unwrap();
        (PasteService::new(store, MAX_CHARS), temp)
    }

    fn request(content: &str) -> CreatePaste {
        CreatePaste {
            content: Some(content.to_string()),
            ..CreatePaste::default()
        }
    }

    /// An rng that always yields the same slug.
    struct StuckRng;

    impl RngCore for StuckRng {
        fn next_u32(&mut self) -> u32 {
            0
        }

        fn next_u64(&mut self) -> u64 {
            0
        }

        fn fill_bytes(&mut self, dest: &mut [u8]) {
            dest.fill(0);
        }

        fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
            dest.fill(0);
            Ok(())
        }
    }

    #[tokio::test]
    async fn create_then_read() {
        let (service, _temp) = setup_service();
        let slug = service
            .create(CreatePaste {
                content: Some("fn main() {}".to_string()),
                syntax: Some("rust".to_string()),
                ..CreatePaste::default()
            })
            .await
            .unwrap();

        let entry = service.read(&slug.to_string(), None).await.unwrap();
        assert_eq!(entry.content, "fn main() {}");
        assert_eq!(entry.syntax, "rust");
        assert_eq!(entry.report_count, 0);
        assert!(!entry.burn_after_read);

        let expected = ExpiresIn::OneDay.expires_at(entry.created_at);
        assert_eq!(entry.expires_at, Some(expected));

        // Plain pastes survive reads.
        assert!(service.read(&slug.to_string(), None).await.is_ok());
    }

    #[tokio::test]
    async fn syntax_defaults_to_text() {
        let (service, _temp) = setup_service();
        let mut req = request("hello");
        req.syntax = Some("   ".to_string());
        let slug = service.create(req).await.unwrap();

        let entry = service.read(&slug.to_string(), None).await.unwrap();
        assert_eq!(entry.syntax, DEFAULT_SYNTAX);
    }

    #[tokio::test]
    async fn content_is_required() {
        let (service, _temp) = setup_service();
        let missing = service.create(CreatePaste::default()).await.unwrap_err();
        assert!(matches!(missing, PasteError::ContentRequired));

        let empty = service.create(request("")).await.unwrap_err();
        assert!(matches!(empty, PasteError::ContentRequired));
    }

    #[tokio::test]
    async fn content_length_bound_is_inclusive() {
        let (service, _temp) = setup_service();
        assert!(service.create(request(&"a".repeat(MAX_CHARS))).await.is_ok());
        // Measured in characters, not bytes.
        assert!(service.create(request(&"é".repeat(MAX_CHARS))).await.is_ok());

        let err = service
            .create(request(&"a".repeat(MAX_CHARS + 1)))
            .await
            .unwrap_err();
        assert!(matches!(err, PasteError::ContentTooLarge { max } if max == MAX_CHARS));
    }

    #[tokio::test]
    async fn expired_pastes_are_gone_after_one_read() {
        let (service, _temp) = setup_service();
        let slug = "23456789CFGH";
        let mut entry = PasteEntry::new("stale".into(), DEFAULT_SYNTAX.into(), Utc::now());
        entry.slug = slug.to_string();
        entry.expires_at = Some(Utc::now() - TimeDelta::seconds(1));
        service.store().put(slug, &entry).await.unwrap();
        assert!(service.store().contains::<PasteEntry>(slug));

        let err = service.read(slug, None).await.unwrap_err();
        assert!(matches!(err, PasteError::NotFound));
        assert!(!service.store().contains::<PasteEntry>(slug));
    }

    #[tokio::test]
    async fn burn_after_read_allows_one_read() {
        let (service, _temp) = setup_service();
        let mut req = request("secret");
        req.burn_after_read = true;
        let slug = service.create(req).await.unwrap().to_string();

        let entry = service.read(&slug, None).await.unwrap();
        assert_eq!(entry.content, "secret");
        assert!(entry.burn_after_read);

        let err = service.read(&slug, None).await.unwrap_err();
        assert!(matches!(err, PasteError::NotFound));
    }

    #[tokio::test]
    async fn failed_password_does_not_burn() {
        let (service, _temp) = setup_service();
        let mut req = request("secret");
        req.burn_after_read = true;
        req.password = Some("hunter2".to_string());
        let slug = service.create(req).await.unwrap().to_string();

        let missing = service.read(&slug, None).await.unwrap_err();
        assert!(matches!(missing, PasteError::PasswordRequired));
        let empty = service.read(&slug, Some(String::new())).await.unwrap_err();
        assert!(matches!(empty, PasteError::PasswordRequired));
        let wrong = service
            .read(&slug, Some("hunter3".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(wrong, PasteError::IncorrectPassword));

        let entry = service
            .read(&slug, Some("hunter2".to_string()))
            .await
            .unwrap();
        assert_eq!(entry.content, "secret");
        assert!(entry.is_password_protected());

        let burned = service
            .read(&slug, Some("hunter2".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(burned, PasteError::NotFound));
    }

    #[tokio::test]
    async fn password_is_never_stored_in_plaintext() {
        let (service, _temp) = setup_service();
        let mut req = request("body");
        req.password = Some("plaintext-password".to_string());
        let slug = service.create(req).await.unwrap().to_string();

        let stored = service
            .store()
            .get::<PasteEntry>(&slug)
            .await
            .unwrap()
            .unwrap();
        let hash = stored.password_hash.unwrap();
        assert!(!hash.contains("plaintext-password"));

        // An empty password means no password at all.
        let mut req = request("body");
        req.password = Some(String::new());
        let slug = service.create(req).await.unwrap().to_string();
        assert!(service.read(&slug, None).await.is_ok());
    }

    #[tokio::test]
    async fn third_report_takes_the_paste_down() {
        let (service, _temp) = setup_service();
        let slug = service.create(request("spam")).await.unwrap().to_string();

        for count in 1..REPORT_THRESHOLD {
            let outcome = service.report(&slug).await.unwrap();
            assert_eq!(outcome, ReportOutcome { count, deleted: false });
        }

        let outcome = service.report(&slug).await.unwrap();
        assert_eq!(
            outcome,
            ReportOutcome {
                count: REPORT_THRESHOLD,
                deleted: true
            }
        );
        assert!(!service.store().contains::<PasteEntry>(&slug));

        let err = service.report(&slug).await.unwrap_err();
        assert!(matches!(err, PasteError::NotFound));
        let err = service.read(&slug, None).await.unwrap_err();
        assert!(matches!(err, PasteError::NotFound));
    }

    #[tokio::test]
    async fn leftover_reported_paste_is_not_served() {
        let (service, _temp) = setup_service();
        let slug = "23456789CFGH";
        let mut entry = PasteEntry::new("spam".into(), DEFAULT_SYNTAX.into(), Utc::now());
        entry.slug = slug.to_string();
        entry.report_count = REPORT_THRESHOLD;
        service.store().put(slug, &entry).await.unwrap();

        let err = service.read(slug, None).await.unwrap_err();
        assert!(matches!(err, PasteError::NotFound));
        assert!(!service.store().contains::<PasteEntry>(slug));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let (service, _temp) = setup_service();
        let slug = service.create(request("bye")).await.unwrap().to_string();

        assert!(service.delete(&slug).await.unwrap());
        assert!(!service.delete(&slug).await.unwrap());
        assert!(!service.delete("not-a-slug").await.unwrap());
        assert!(matches!(
            service.read(&slug, None).await.unwrap_err(),
            PasteError::NotFound
        ));
    }

    #[tokio::test]
    async fn malformed_slugs_are_not_found() {
        let (service, _temp) = setup_service();
        for slug in ["", "short", "0OIl0OIl0OIl", "../../etc/passwd"] {
            assert!(matches!(
                service.read(slug, None).await.unwrap_err(),
                PasteError::NotFound
            ));
            assert!(matches!(
                service.report(slug).await.unwrap_err(),
                PasteError::NotFound
            ));
        }
    }

    #[tokio::test]
    async fn slug_collisions_are_retried_then_surfaced() {
        let (service, _temp) = setup_service();
        let mut first = PasteEntry::new("one".into(), DEFAULT_SYNTAX.into(), Utc::now());
        let slug = service
            .persist_with_fresh_slug(&mut first, &mut StuckRng)
            .await
            .unwrap();

        let mut second = PasteEntry::new("two".into(), DEFAULT_SYNTAX.into(), Utc::now());
        let err = service
            .persist_with_fresh_slug(&mut second, &mut StuckRng)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PasteError::StorageUnavailable(StoreError::DuplicateKey)
        ));

        let kept = service.read(&slug.to_string(), None).await.unwrap();
        assert_eq!(kept.content, "one");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_reports_below_threshold_are_all_counted() {
        let (service, _temp) = setup_service();
        let service = Arc::new(service);
        let slug = service.create(request("x")).await.unwrap().to_string();

        let reports = (REPORT_THRESHOLD - 1) as usize;
        let handles: Vec<_> = (0..reports)
            .map(|_| {
                let service = Arc::clone(&service);
                let slug = slug.clone();
                tokio::spawn(async move { service.report(&slug).await })
            })
            .collect();
        for handle in handles {
            assert!(!handle.await.unwrap().unwrap().deleted);
        }

        let entry = service
            .store()
            .get::<PasteEntry>(&slug)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.report_count, REPORT_THRESHOLD - 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_reports_delete_exactly_once() {
        let (service, _temp) = setup_service();
        let service = Arc::new(service);
        let slug = service.create(request("x")).await.unwrap().to_string();

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let service = Arc::clone(&service);
                let slug = slug.clone();
                tokio::spawn(async move { service.report(&slug).await })
            })
            .collect();

        let mut counts = Vec::new();
        let mut deletions = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(outcome) => {
                    counts.push(outcome.count);
                    if outcome.deleted {
                        deletions += 1;
                    }
                }
                Err(PasteError::NotFound) => {}
                Err(e) => panic!("unexpected error: {}", e),
            }
        }

        assert_eq!(deletions, 1);
        // No increment was lost: every successful report saw its own count.
        counts.sort_unstable();
        let reported = counts.len();
        counts.dedup();
        assert_eq!(counts.len(), reported);
        assert!(counts.starts_with(&[1, 2, 3]));
        assert!(!service.store().contains::<PasteEntry>(&slug));
    }
}
