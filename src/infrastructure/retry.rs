use std::{fmt, future::Future, sync::Arc, time::Duration};

use async_trait::async_trait;
use tracing::info;

use crate::{
    domain::{entity::Entity, errors::DomainError, search::EntitySearch},
    infrastructure::EntityRepository,
};

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Re-runs a unit of work on transient store failures.
///
/// Holds static configuration only, so one value can be shared by any number
/// of concurrent callers. Attempt `n` (1-indexed) waits `2^n` base delays
/// before attempt `n + 1`.
#[derive(Clone, Copy)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    is_transient: fn(&DomainError) -> bool,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .finish_non_exhaustive()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES, DEFAULT_BASE_DELAY)
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            is_transient: DomainError::is_transient,
        }
    }

    pub fn with_transient_predicate(mut self, predicate: fn(&DomainError) -> bool) -> Self {
        self.is_transient = predicate;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Wait after the given failed attempt (1-indexed).
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.checked_pow(attempt).unwrap_or(u32::MAX))
    }

    fn should_retry(&self, attempt: u32, err: &DomainError) -> bool {
        attempt <= self.max_retries && (self.is_transient)(err)
    }

    /// Runs `operation` until it succeeds, fails with a non-transient error, or
    /// the retry budget is spent. The last error is returned unchanged.
    ///
    /// The whole closure is re-executed on every attempt; it must be safe to
    /// run again from scratch.
    pub async fn execute<F, Fut, T>(&self, mut operation: F) -> Result<T, DomainError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, DomainError>>,
    {
        let mut attempt = 1u32;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if !self.should_retry(attempt, &err) {
                        return Err(err);
                    }

                    let wait = self.backoff(attempt);
                    info!(
                        attempt,
                        max_attempts = self.max_attempts(),
                        error = %err,
                        wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                        "retrying store operation after transient failure"
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Wraps every repository call in a [`RetryPolicy`].
#[derive(Clone)]
pub struct RetryingEntityRepository {
    inner: Arc<dyn EntityRepository>,
    policy: RetryPolicy,
}

impl RetryingEntityRepository {
    pub fn new(inner: Arc<dyn EntityRepository>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl EntityRepository for RetryingEntityRepository {
    async fn init(&self) -> Result<(), DomainError> {
        self.policy.execute(|| self.inner.init()).await
    }

    async fn create(&self, entity: Entity) -> Result<(), DomainError> {
        self.policy
            .execute(|| self.inner.create(entity.clone()))
            .await
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Entity>, DomainError> {
        self.policy.execute(|| self.inner.get_by_id(id)).await
    }

    async fn update(&self, entity: Entity) -> Result<(), DomainError> {
        self.policy
            .execute(|| self.inner.update(entity.clone()))
            .await
    }

    async fn delete(&self, id: &str) -> Result<(), DomainError> {
        self.policy.execute(|| self.inner.delete(id)).await
    }

    async fn search(&self, search: EntitySearch) -> Result<Vec<Entity>, DomainError> {
        self.policy
            .execute(|| self.inner.search(search.clone()))
            .await
    }
}
