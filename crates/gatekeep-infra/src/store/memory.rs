//! In-memory shared store - used as fallback when Redis is unavailable.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;

use gatekeep_core::ports::{AtomicOp, ScriptArg, SharedStore, StoreError};

enum Value {
    Counter(i64),
    Log(HashMap<String, i64>),
    Bucket { tokens: f64, updated_ms: i64 },
}

struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: Value) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at
            .map(|exp| Instant::now() >= exp)
            .unwrap_or(false)
    }
}

/// In-memory store using a HashMap behind an async Mutex.
///
/// Every operation takes the lock once, so single commands and atomic
/// operations are indivisible with respect to each other, matching what
/// Redis guarantees. Expired keys are dropped lazily on access.
///
/// Note: State is per-process and lost on restart, so limits are not
/// shared across instances.
pub struct InMemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    latency: Option<Duration>,
    available: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            latency: None,
            available: AtomicBool::new(true),
        }
    }

    /// Delay every operation by `latency` before it touches the data,
    /// simulating a network round trip.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Simulate an outage: while unavailable every operation fails with
    /// [`StoreError::Connection`].
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Remaining time-to-live of a key, `None` if it is absent or has no expiry.
    pub async fn ttl(&self, key: &str) -> Option<Duration> {
        let mut entries = self.entries.lock().await;
        let entry = live_entry(&mut entries, key)?;
        entry
            .expires_at
            .map(|exp| exp.saturating_duration_since(Instant::now()))
    }

    async fn round_trip(&self) -> Result<(), StoreError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if !self.available.load(Ordering::SeqCst) {
            return Err(StoreError::Connection("store unavailable".to_string()));
        }
        Ok(())
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn purge_expired(entries: &mut HashMap<String, Entry>, key: &str) {
    if entries.get(key).is_some_and(Entry::is_expired) {
        entries.remove(key);
    }
}

fn live_entry<'a>(entries: &'a mut HashMap<String, Entry>, key: &str) -> Option<&'a mut Entry> {
    purge_expired(entries, key);
    entries.get_mut(key)
}

fn wrong_type(key: &str) -> StoreError {
    StoreError::WrongType(key.to_string())
}

fn key_arg<'a>(op: AtomicOp, keys: &'a [String], idx: usize) -> Result<&'a str, StoreError> {
    keys.get(idx)
        .map(String::as_str)
        .ok_or_else(|| StoreError::Script(format!("{op}: missing key {}", idx + 1)))
}

fn int_arg(op: AtomicOp, args: &[ScriptArg], idx: usize) -> Result<i64, StoreError> {
    match args.get(idx) {
        Some(ScriptArg::Int(n)) => Ok(*n),
        Some(ScriptArg::Str(s)) => s
            .parse()
            .map_err(|_| StoreError::Script(format!("{op}: argument {} is not a number", idx + 1))),
        None => Err(StoreError::Script(format!(
            "{op}: missing argument {}",
            idx + 1
        ))),
    }
}

fn str_arg(op: AtomicOp, args: &[ScriptArg], idx: usize) -> Result<String, StoreError> {
    match args.get(idx) {
        Some(ScriptArg::Str(s)) => Ok(s.clone()),
        Some(ScriptArg::Int(n)) => Ok(n.to_string()),
        None => Err(StoreError::Script(format!(
            "{op}: missing argument {}",
            idx + 1
        ))),
    }
}

fn expiry_after(ms: i64) -> Option<Instant> {
    let ms = u64::try_from(ms).unwrap_or(0);
    Some(Instant::now() + Duration::from_millis(ms))
}

fn fixed_window_incr(
    entries: &mut HashMap<String, Entry>,
    keys: &[String],
    args: &[ScriptArg],
) -> Result<i64, StoreError> {
    let op = AtomicOp::FixedWindowIncr;
    let key = key_arg(op, keys, 0)?;
    let ttl = int_arg(op, args, 0)?;
    purge_expired(entries, key);

    let entry = entries
        .entry(key.to_string())
        .or_insert_with(|| Entry::new(Value::Counter(0)));
    let Value::Counter(count) = &mut entry.value else {
        return Err(wrong_type(key));
    };
    *count += 1;

    let count = *count;
    if count == 1 {
        entry.expires_at = expiry_after(ttl);
    }
    Ok(count)
}

fn sliding_log_admit(
    entries: &mut HashMap<String, Entry>,
    keys: &[String],
    args: &[ScriptArg],
) -> Result<i64, StoreError> {
    let op = AtomicOp::SlidingLogAdmit;
    let key = key_arg(op, keys, 0)?;
    let now = int_arg(op, args, 0)?;
    let window = int_arg(op, args, 1)?;
    let limit = int_arg(op, args, 2)?;
    let ttl = int_arg(op, args, 3)?;
    let member = str_arg(op, args, 4)?;

    let cutoff = now - window;
    let count = match live_entry(entries, key) {
        Some(Entry {
            value: Value::Log(log),
            ..
        }) => {
            log.retain(|_, score| !(0..=cutoff).contains(&*score));
            log.len() as i64
        }
        Some(_) => return Err(wrong_type(key)),
        None => 0,
    };

    if count >= limit {
        return Ok(0);
    }

    let entry = entries
        .entry(key.to_string())
        .or_insert_with(|| Entry::new(Value::Log(HashMap::new())));
    if let Value::Log(log) = &mut entry.value {
        log.insert(member, now);
    }
    entry.expires_at = expiry_after(ttl);

    Ok(1)
}

fn token_bucket_take(
    entries: &mut HashMap<String, Entry>,
    keys: &[String],
    args: &[ScriptArg],
) -> Result<i64, StoreError> {
    let op = AtomicOp::TokenBucketTake;
    let key = key_arg(op, keys, 0)?;
    let capacity = int_arg(op, args, 0)? as f64;
    let refill_per_sec = int_arg(op, args, 1)? as f64;
    let now = int_arg(op, args, 2)?;
    let ttl = int_arg(op, args, 3)?;

    let (tokens, last) = match live_entry(entries, key) {
        Some(Entry {
            value: Value::Bucket { tokens, updated_ms },
            ..
        }) => (*tokens, *updated_ms),
        Some(_) => return Err(wrong_type(key)),
        None => (capacity, now),
    };

    let elapsed = (now - last).max(0) as f64;
    let mut tokens = (tokens + elapsed * refill_per_sec / 1000.0).min(capacity);
    let taken = if tokens >= 1.0 {
        tokens -= 1.0;
        1
    } else {
        0
    };

    entries.insert(
        key.to_string(),
        Entry {
            value: Value::Bucket {
                tokens,
                updated_ms: now.max(last),
            },
            expires_at: expiry_after(ttl),
        },
    );

    Ok(taken)
}

#[async_trait]
impl SharedStore for InMemoryStore {
    async fn increment(&self, key: &str) -> Result<i64, StoreError> {
        self.round_trip().await?;
        let mut entries = self.entries.lock().await;
        purge_expired(&mut entries, key);

        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(Value::Counter(0)));
        match &mut entry.value {
            Value::Counter(count) => {
                *count += 1;
                Ok(*count)
            }
            _ => Err(wrong_type(key)),
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.round_trip().await?;
        let mut entries = self.entries.lock().await;
        match live_entry(&mut entries, key) {
            Some(entry) => {
                entry.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn sorted_add(&self, key: &str, member: &str, score: i64) -> Result<(), StoreError> {
        self.round_trip().await?;
        let mut entries = self.entries.lock().await;
        purge_expired(&mut entries, key);

        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(Value::Log(HashMap::new())));
        match &mut entry.value {
            Value::Log(log) => {
                log.insert(member.to_string(), score);
                Ok(())
            }
            _ => Err(wrong_type(key)),
        }
    }

    async fn sorted_remove_by_score(
        &self,
        key: &str,
        min: i64,
        max: i64,
    ) -> Result<u64, StoreError> {
        self.round_trip().await?;
        let mut entries = self.entries.lock().await;
        let (removed, now_empty) = match live_entry(&mut entries, key) {
            Some(Entry {
                value: Value::Log(log),
                ..
            }) => {
                let before = log.len();
                log.retain(|_, score| !(min..=max).contains(&*score));
                ((before - log.len()) as u64, log.is_empty())
            }
            Some(_) => return Err(wrong_type(key)),
            None => return Ok(0),
        };

        // Redis drops a sorted set once its last member is removed.
        if now_empty {
            entries.remove(key);
        }
        Ok(removed)
    }

    async fn sorted_len(&self, key: &str) -> Result<i64, StoreError> {
        self.round_trip().await?;
        let mut entries = self.entries.lock().await;
        match live_entry(&mut entries, key) {
            Some(Entry {
                value: Value::Log(log),
                ..
            }) => Ok(log.len() as i64),
            Some(_) => Err(wrong_type(key)),
            None => Ok(0),
        }
    }

    async fn execute_atomic(
        &self,
        op: AtomicOp,
        keys: &[String],
        args: &[ScriptArg],
    ) -> Result<i64, StoreError> {
        self.round_trip().await?;
        let mut entries = self.entries.lock().await;
        match op {
            AtomicOp::FixedWindowIncr => fixed_window_incr(&mut entries, keys, args),
            AtomicOp::SlidingLogAdmit => sliding_log_admit(&mut entries, keys, args),
            AtomicOp::TokenBucketTake => token_bucket_take(&mut entries, keys, args),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sliding_args(now: i64, window: i64, limit: i64, member: &str) -> Vec<ScriptArg> {
        vec![
            ScriptArg::Int(now),
            ScriptArg::Int(window),
            ScriptArg::Int(limit),
            ScriptArg::Int(window),
            ScriptArg::Str(member.to_string()),
        ]
    }

    #[tokio::test]
    async fn test_increment_and_expire() {
        let store = InMemoryStore::new();
        assert_eq!(store.increment("counter").await.unwrap(), 1);
        assert_eq!(store.increment("counter").await.unwrap(), 2);
        assert_eq!(store.ttl("counter").await, None);

        assert!(store.expire("counter", Duration::from_millis(50)).await.unwrap());
        assert!(store.ttl("counter").await.is_some());

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(store.increment("counter").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_expire_missing_key() {
        let store = InMemoryStore::new();
        assert!(!store.expire("missing", Duration::from_secs(1)).await.unwrap());
    }

    #[tokio::test]
    async fn test_sorted_remove_by_score_is_inclusive() {
        let store = InMemoryStore::new();
        store.sorted_add("log", "a", 100).await.unwrap();
        store.sorted_add("log", "b", 200).await.unwrap();
        store.sorted_add("log", "c", 300).await.unwrap();

        assert_eq!(store.sorted_remove_by_score("log", 0, 200).await.unwrap(), 2);
        assert_eq!(store.sorted_len("log").await.unwrap(), 1);

        assert_eq!(store.sorted_remove_by_score("log", 0, 300).await.unwrap(), 1);
        assert_eq!(store.sorted_len("log").await.unwrap(), 0);
        assert!(!store.expire("log", Duration::from_secs(1)).await.unwrap());
    }

    #[tokio::test]
    async fn test_wrong_type() {
        let store = InMemoryStore::new();
        store.increment("k").await.unwrap();
        let err = store.sorted_len("k").await.unwrap_err();
        assert!(matches!(err, StoreError::WrongType(_)));
    }

    #[tokio::test]
    async fn test_fixed_window_incr_sets_expiry_once() {
        let store = InMemoryStore::new();
        let keys = vec!["window".to_string()];
        let args = [ScriptArg::Int(500)];

        let first = store
            .execute_atomic(AtomicOp::FixedWindowIncr, &keys, &args)
            .await
            .unwrap();
        assert_eq!(first, 1);
        let first_ttl = store.ttl("window").await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        let second = store
            .execute_atomic(AtomicOp::FixedWindowIncr, &keys, &args)
            .await
            .unwrap();
        assert_eq!(second, 2);
        assert!(store.ttl("window").await.unwrap() <= first_ttl - Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_sliding_log_admit_leaves_log_untouched_on_reject() {
        let store = InMemoryStore::new();
        let keys = vec!["log".to_string()];

        for member in ["a", "b"] {
            let admitted = store
                .execute_atomic(
                    AtomicOp::SlidingLogAdmit,
                    &keys,
                    &sliding_args(1_000, 500, 2, member),
                )
                .await
                .unwrap();
            assert_eq!(admitted, 1);
        }

        let rejected = store
            .execute_atomic(
                AtomicOp::SlidingLogAdmit,
                &keys,
                &sliding_args(1_100, 500, 2, "c"),
            )
            .await
            .unwrap();
        assert_eq!(rejected, 0);
        assert_eq!(store.sorted_len("log").await.unwrap(), 2);

        // Both entries fall out of the window once now - window reaches their score.
        let admitted = store
            .execute_atomic(
                AtomicOp::SlidingLogAdmit,
                &keys,
                &sliding_args(1_500, 500, 2, "d"),
            )
            .await
            .unwrap();
        assert_eq!(admitted, 1);
        assert_eq!(store.sorted_len("log").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_token_bucket_take_refills() {
        let store = InMemoryStore::new();
        let keys = vec!["bucket".to_string()];
        let args = |now: i64| {
            vec![
                ScriptArg::Int(2),
                ScriptArg::Int(1),
                ScriptArg::Int(now),
                ScriptArg::Int(10_000),
            ]
        };

        assert_eq!(
            store
                .execute_atomic(AtomicOp::TokenBucketTake, &keys, &args(0))
                .await
                .unwrap(),
            1
        );
        assert_eq!(
            store
                .execute_atomic(AtomicOp::TokenBucketTake, &keys, &args(10))
                .await
                .unwrap(),
            1
        );
        assert_eq!(
            store
                .execute_atomic(AtomicOp::TokenBucketTake, &keys, &args(20))
                .await
                .unwrap(),
            0
        );
        assert_eq!(
            store
                .execute_atomic(AtomicOp::TokenBucketTake, &keys, &args(1_020))
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_missing_argument_is_script_error() {
        let store = InMemoryStore::new();
        let err = store
            .execute_atomic(
                AtomicOp::SlidingLogAdmit,
                &["log".to_string()],
                &[ScriptArg::Int(1)],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Script(_)));
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_every_operation() {
        let store = InMemoryStore::new();
        store.set_available(false);
        assert!(matches!(
            store.increment("k").await,
            Err(StoreError::Connection(_))
        ));
        assert!(matches!(
            store
                .execute_atomic(AtomicOp::SlidingLogAdmit, &["k".to_string()], &[])
                .await,
            Err(StoreError::Connection(_))
        ));

        store.set_available(true);
        assert_eq!(store.increment("k").await.unwrap(), 1);
    }
}
