// src/stocks.rs
//! Vote and comment mutations on stock profiles.
//!
//! Every mutation is a read-modify-write of the whole profile document,
//! committed with a version check. A lost race reloads the document and
//! re-applies the change, so guards such as "one vote per user" are always
//! evaluated against the state that actually gets overwritten.

use crate::db::ProfileStore;
use crate::error::ApiError;
use crate::models::{Comment, Direction, Endorsement, Principal, StockProfile, Symbol};
use chrono::Utc;
use log::{debug, info, warn};
use std::sync::Arc;
use uuid::Uuid;

const MAX_ATTEMPTS: usize = 8;

#[derive(Clone)]
pub struct StockService {
    store: Arc<dyn ProfileStore>,
}

impl StockService {
    pub fn new(store: Arc<dyn ProfileStore>) -> Self {
        StockService { store }
    }

    pub async fn get(&self, symbol: &str) -> Result<StockProfile, ApiError> {
        let symbol = Symbol::parse(symbol)?;
        self.store
            .load(symbol.as_str())
            .await?
            .map(|v| v.value)
            .ok_or_else(|| ApiError::NotFound("Stock profile not found".into()))
    }

    /// Returns the profile and whether this call created it.
    pub async fn fetch_or_create(&self, symbol: &str) -> Result<(StockProfile, bool), ApiError> {
        let symbol = Symbol::parse(symbol)?;
        if let Some(existing) = self.store.load(symbol.as_str()).await? {
            return Ok((existing.value, false));
        }

        let profile = StockProfile::new(symbol.clone());
        if self.store.insert_if_absent(&profile).await? {
            info!("Created stock profile {}", symbol);
            return Ok((profile, true));
        }

        debug!("Lost creation race for {}, re-fetching", symbol);
        self.store
            .load(symbol.as_str())
            .await?
            .map(|v| (v.value, false))
            .ok_or_else(|| ApiError::Storage(format!("profile {} vanished after insert conflict", symbol)))
    }

    pub async fn cast_vote(
        &self,
        symbol: &str,
        caller: &Principal,
        direction: Direction,
    ) -> Result<StockProfile, ApiError> {
        let vote = Endorsement {
            user_id: caller.id.clone(),
            name: caller.name.clone(),
            avatar: caller.avatar.clone(),
            date: Utc::now(),
        };
        let profile = self
            .mutate(symbol, |profile| profile.endorse(direction, vote.clone()))
            .await?;
        info!("{} voted {} on {}", caller.id, direction, profile.symbol);
        Ok(profile)
    }

    pub async fn post_comment(
        &self,
        symbol: &str,
        caller: &Principal,
        text: &str,
    ) -> Result<StockProfile, ApiError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ApiError::invalid("text", "Text is required"));
        }

        let comment = Comment {
            id: Uuid::new_v4().to_string(),
            user_id: caller.id.clone(),
            name: caller.name.clone(),
            avatar: caller.avatar.clone(),
            date: Utc::now(),
            text: text.to_string(),
        };
        let id = comment.id.clone();
        let profile = self
            .mutate(symbol, |profile| profile.add_comment(comment.clone()))
            .await?;
        info!("{} commented {} on {}", caller.id, id, profile.symbol);
        Ok(profile)
    }

    pub async fn delete_comment(
        &self,
        symbol: &str,
        caller: &Principal,
        comment_id: &str,
    ) -> Result<StockProfile, ApiError> {
        let profile = self
            .mutate(symbol, |profile| {
                profile.remove_comment(comment_id, &caller.id).map(|_| ())
            })
            .await?;
        info!("{} deleted comment {} on {}", caller.id, comment_id, profile.symbol);
        Ok(profile)
    }

    /// Loads the profile, applies `op` to a copy and commits it only if the
    /// stored version is unchanged, retrying on conflict. When `op` fails
    /// nothing is written.
    async fn mutate<F>(&self, symbol: &str, op: F) -> Result<StockProfile, ApiError>
    where
        F: Fn(&mut StockProfile) -> Result<(), ApiError>,
    {
        let symbol = Symbol::parse(symbol)?;
        for attempt in 1..=MAX_ATTEMPTS {
            let current = self
                .store
                .load(symbol.as_str())
                .await?
                .ok_or_else(|| ApiError::NotFound("Stock profile not found".into()))?;

            let mut next = current.value;
            op(&mut next)?;

            if self.store.replace_if_version(&next, current.version).await? {
                return Ok(next);
            }
            debug!(
                "Version conflict on {} at v{} (attempt {})",
                symbol, current.version, attempt
            );
        }

        warn!("Gave up on {} after {} conflicting writes", symbol, MAX_ATTEMPTS);
        Err(ApiError::Storage(format!("too much contention on {}", symbol)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{MemoryStore, Versioned};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn user(id: &str) -> Principal {
        Principal {
            id: id.into(),
            name: format!("User {}", id),
            avatar: format!("https://avatars/{}", id),
        }
    }

    fn setup() -> (StockService, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (StockService::new(store.clone()), store)
    }

    #[tokio::test]
    async fn fetch_or_create_normalizes_symbol() {
        let (service, store) = setup();
        let (created, was_created) = service.fetch_or_create("AAPL").await.unwrap();
        assert!(was_created);
        assert_eq!(created.symbol, "aapl");

        let (again, was_created) = service.fetch_or_create("aapl").await.unwrap();
        assert!(!was_created);
        assert_eq!(again, created);
        assert_eq!(service.get("AaPl").await.unwrap(), created);
        assert_eq!(store.profile_count().await, 1);
    }

    #[tokio::test]
    async fn concurrent_creation_yields_one_profile() {
        let (service, store) = setup();
        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let service = service.clone();
                tokio::spawn(async move { service.fetch_or_create("NVDA").await })
            })
            .collect();

        let mut created = 0;
        for task in tasks {
            let (_, was_created) = task.await.unwrap().unwrap();
            if was_created {
                created += 1;
            }
        }
        assert_eq!(created, 1);
        assert_eq!(store.profile_count().await, 1);
    }

    #[tokio::test]
    async fn empty_symbol_is_a_validation_error() {
        let (service, _) = setup();
        assert!(matches!(
            service.fetch_or_create("  ").await,
            Err(ApiError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn get_missing_profile_is_not_found() {
        let (service, _) = setup();
        assert!(matches!(service.get("ibm").await, Err(ApiError::NotFound(_))));
    }

    #[tokio::test]
    async fn vote_requires_existing_profile() {
        let (service, _) = setup();
        let result = service.cast_vote("msft", &user("u1"), Direction::Bullish).await;
        assert!(matches!(result, Err(ApiError::NotFound(_))));
    }

    #[tokio::test]
    async fn repeated_vote_is_refused() {
        let (service, _) = setup();
        service.fetch_or_create("msft").await.unwrap();

        let first = service
            .cast_vote("MSFT", &user("u1"), Direction::Bullish)
            .await
            .unwrap();
        assert_eq!(first.bullish.len(), 1);
        assert_eq!(first.bullish[0].user_id, "u1");

        let second = service.cast_vote("msft", &user("u1"), Direction::Bullish).await;
        assert_eq!(second, Err(ApiError::AlreadyVoted));
        assert_eq!(service.get("msft").await.unwrap().bullish.len(), 1);
    }

    #[tokio::test]
    async fn bullish_and_bearish_are_independent() {
        let (service, _) = setup();
        service.fetch_or_create("msft").await.unwrap();
        service
            .cast_vote("msft", &user("u1"), Direction::Bullish)
            .await
            .unwrap();
        let profile = service
            .cast_vote("msft", &user("u1"), Direction::Bearish)
            .await
            .unwrap();
        assert_eq!(profile.bullish.len(), 1);
        assert_eq!(profile.bearish.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_duplicate_votes_leave_one_endorsement() {
        let (service, _) = setup();
        service.fetch_or_create("amd").await.unwrap();

        let tasks: Vec<_> = (0..6)
            .map(|_| {
                let service = service.clone();
                tokio::spawn(async move {
                    service.cast_vote("amd", &user("u1"), Direction::Bearish).await
                })
            })
            .collect();

        let mut accepted = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => accepted += 1,
                Err(e) => assert_eq!(e, ApiError::AlreadyVoted),
            }
        }
        assert_eq!(accepted, 1);
        assert_eq!(service.get("amd").await.unwrap().bearish.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_comments_are_all_kept() {
        let (service, _) = setup();
        service.fetch_or_create("amd").await.unwrap();

        let tasks: Vec<_> = (0..5)
            .map(|i| {
                let service = service.clone();
                tokio::spawn(async move {
                    service
                        .post_comment("amd", &user(&format!("u{}", i)), "to the moon")
                        .await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(service.get("amd").await.unwrap().comments.len(), 5);
    }

    #[tokio::test]
    async fn empty_comment_leaves_document_unchanged() {
        let (service, store) = setup();
        service.fetch_or_create("goog").await.unwrap();
        let result = service.post_comment("goog", &user("u1"), "   ").await;
        assert!(matches!(result, Err(ApiError::Validation(_))));

        let stored = store.load("goog").await.unwrap().unwrap();
        assert_eq!(stored.version, 1);
        assert!(stored.value.comments.is_empty());
    }

    #[tokio::test]
    async fn comment_lifecycle() {
        let (service, _) = setup();
        service.fetch_or_create("goog").await.unwrap();
        service.post_comment("goog", &user("u1"), "first").await.unwrap();
        let profile = service.post_comment("goog", &user("u2"), "second").await.unwrap();
        assert_eq!(profile.comments[0].text, "second");
        let target = profile.comments[1].id.clone();

        let denied = service.delete_comment("goog", &user("u2"), &target).await;
        assert_eq!(denied, Err(ApiError::Forbidden));
        assert_eq!(service.get("goog").await.unwrap().comments.len(), 2);

        let missing = service.delete_comment("goog", &user("u1"), "no-such-id").await;
        assert_eq!(missing, Err(ApiError::CommentNotFound));

        let after = service.delete_comment("goog", &user("u1"), &target).await.unwrap();
        assert_eq!(after.comments.len(), 1);
        assert_eq!(after.comments[0].text, "second");
    }

    /// Always reports a lost race on write.
    struct ContendedStore {
        inner: MemoryStore,
        writes: AtomicUsize,
    }

    #[async_trait]
    impl ProfileStore for ContendedStore {
        async fn load(&self, symbol: &str) -> Result<Option<Versioned<StockProfile>>, ApiError> {
            self.inner.load(symbol).await
        }

        async fn insert_if_absent(&self, profile: &StockProfile) -> Result<bool, ApiError> {
            self.inner.insert_if_absent(profile).await
        }

        async fn replace_if_version(&self, _: &StockProfile, _: i64) -> Result<bool, ApiError> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            Ok(false)
        }
    }

    #[tokio::test]
    async fn persistent_contention_gives_up() {
        let store = Arc::new(ContendedStore {
            inner: MemoryStore::new(),
            writes: AtomicUsize::new(0),
        });
        let service = StockService::new(store.clone());
        service.fetch_or_create("tsla").await.unwrap();

        let result = service.post_comment("tsla", &user("u1"), "hi").await;
        assert!(matches!(result, Err(ApiError::Storage(_))));
        assert_eq!(store.writes.load(Ordering::SeqCst), MAX_ATTEMPTS);
    }

    type Rival = Box<dyn FnOnce(&mut StockProfile) + Send>;

    /// Once armed, lets a competing writer commit its change just before the
    /// next write, so that write loses its version check.
    #[derive(Default)]
    struct RacingStore {
        inner: MemoryStore,
        rival: Mutex<Option<Rival>>,
        conflicts: AtomicUsize,
    }

    impl RacingStore {
        fn arm(&self, rival: impl FnOnce(&mut StockProfile) + Send + 'static) {
            *self.rival.lock().unwrap() = Some(Box::new(rival));
        }
    }

    #[async_trait]
    impl ProfileStore for RacingStore {
        async fn load(&self, symbol: &str) -> Result<Option<Versioned<StockProfile>>, ApiError> {
            self.inner.load(symbol).await
        }

        async fn insert_if_absent(&self, profile: &StockProfile) -> Result<bool, ApiError> {
            self.inner.insert_if_absent(profile).await
        }

        async fn replace_if_version(
            &self,
            profile: &StockProfile,
            expected: i64,
        ) -> Result<bool, ApiError> {
            let rival = self.rival.lock().unwrap().take();
            if let Some(rival) = rival {
                let mut winner = self.inner.load(&profile.symbol).await?.unwrap();
                rival(&mut winner.value);
                assert!(self
                    .inner
                    .replace_if_version(&winner.value, winner.version)
                    .await?);
            }

            let committed = self.inner.replace_if_version(profile, expected).await?;
            if !committed {
                self.conflicts.fetch_add(1, Ordering::SeqCst);
            }
            Ok(committed)
        }
    }

    fn racing_setup() -> (StockService, Arc<RacingStore>) {
        let store = Arc::new(RacingStore::default());
        let service = StockService::new(store.clone());
        (service, store)
    }

    #[tokio::test]
    async fn vote_retried_after_conflict_sees_winning_vote() {
        let (service, store) = racing_setup();
        service.fetch_or_create("msft").await.unwrap();
        store.arm(|profile| {
            let rival = Endorsement {
                user_id: "u1".into(),
                name: "User u1".into(),
                avatar: String::new(),
                date: Utc::now(),
            };
            profile.endorse(Direction::Bullish, rival).unwrap();
        });

        let result = service.cast_vote("msft", &user("u1"), Direction::Bullish).await;
        assert_eq!(result, Err(ApiError::AlreadyVoted));
        assert_eq!(store.conflicts.load(Ordering::SeqCst), 1);

        let stored = service.get("msft").await.unwrap();
        assert_eq!(stored.bullish.len(), 1);
        assert_eq!(stored.bullish[0].user_id, "u1");
    }

    #[tokio::test]
    async fn comment_retried_after_conflict_keeps_both() {
        let (service, store) = racing_setup();
        service.fetch_or_create("amd").await.unwrap();
        store.arm(|profile| {
            let rival = Comment {
                id: "rival".into(),
                user_id: "u2".into(),
                name: "User u2".into(),
                avatar: String::new(),
                date: Utc::now(),
                text: "landed first".into(),
            };
            profile.add_comment(rival).unwrap();
        });

        let profile = service.post_comment("amd", &user("u1"), "mine").await.unwrap();
        assert_eq!(store.conflicts.load(Ordering::SeqCst), 1);

        let texts: Vec<_> = profile.comments.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["mine", "landed first"]);
        assert_eq!(service.get("amd").await.unwrap(), profile);
    }

    #[tokio::test]
    async fn delete_retried_after_conflict_sees_removal() {
        let (service, store) = racing_setup();
        service.fetch_or_create("ibm").await.unwrap();
        let profile = service.post_comment("ibm", &user("u1"), "short lived").await.unwrap();
        let id = profile.comments[0].id.clone();

        let rival_id = id.clone();
        store.arm(move |profile| {
            profile.comments.retain(|c| c.id != rival_id);
        });

        let result = service.delete_comment("ibm", &user("u1"), &id).await;
        assert_eq!(result, Err(ApiError::CommentNotFound));
        assert_eq!(store.conflicts.load(Ordering::SeqCst), 1);
        assert!(service.get("ibm").await.unwrap().comments.is_empty());
    }
}
