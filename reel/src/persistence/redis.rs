use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::{AsyncCommands, AsyncConnectionConfig, Client, Script};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::job::{JobId, JobRecord, TaskKey};
use crate::lease::{LeaseRetryConfig, ResurrectionOutcome, SweepReport, TaskLease};
use crate::queue::{FanInCount, LeaseExpiryScanner, QueueSnapshot, TaskQueue};
use crate::store::JobStore;

mod scripts {
    use redis::Script;

    /// KEYS: processing, leases, attempts, errors, payload
    /// ARGV: entry
    pub fn resolve() -> Script {
        Script::new(
            r#"
            if redis.call('LREM', KEYS[1], 1, ARGV[1]) == 0 then
                return 0
            end
            redis.call('HDEL', KEYS[2], ARGV[1])
            redis.call('HDEL', KEYS[3], ARGV[1])
            redis.call('HDEL', KEYS[4], ARGV[1])
            redis.call('DEL', KEYS[5])
            return 1
            "#,
        )
    }

    /// KEYS: processing, leases, attempts, errors, payload,
    ///       completed counter, queued counter, fan_in
    /// ARGV: entry, job_id, now_ms
    ///
    /// Returns `{}` when the entry was not in processing, otherwise
    /// `{completed, queued}`.
    pub fn resolve_and_count() -> Script {
        Script::new(
            r#"
            if redis.call('LREM', KEYS[1], 1, ARGV[1]) == 0 then
                return {}
            end
            redis.call('HDEL', KEYS[2], ARGV[1])
            redis.call('HDEL', KEYS[3], ARGV[1])
            redis.call('HDEL', KEYS[4], ARGV[1])
            redis.call('DEL', KEYS[5])
            local completed = redis.call('INCR', KEYS[6])
            local queued = tonumber(redis.call('GET', KEYS[7]) or '0')
            if completed == queued then
                redis.call('HSET', KEYS[8], ARGV[2], ARGV[3])
            end
            return {completed, queued}
            "#,
        )
    }

    /// KEYS: fan_in
    /// ARGV: stale_before_ms, now_ms
    pub fn claim_fan_ins() -> Script {
        Script::new(
            r#"
            local claimed = {}
            local entries = redis.call('HGETALL', KEYS[1])
            for i = 1, #entries, 2 do
                if tonumber(entries[i + 1]) < tonumber(ARGV[1]) then
                    redis.call('HSET', KEYS[1], entries[i], ARGV[2])
                    table.insert(claimed, entries[i])
                end
            end
            return claimed
            "#,
        )
    }

    /// KEYS: processing, leases, attempts, errors, queued, dead
    /// ARGV: entry, max_attempts, error ('' for none)
    ///
    /// Returns `{}` when the entry was not in processing, otherwise
    /// `{attempts, dead}`.
    pub fn fail() -> Script {
        Script::new(
            r#"
            if redis.call('LREM', KEYS[1], 1, ARGV[1]) == 0 then
                return {}
            end
            redis.call('HDEL', KEYS[2], ARGV[1])
            if ARGV[3] ~= '' then
                redis.call('HSET', KEYS[4], ARGV[1], ARGV[3])
            end
            local attempts = redis.call('HINCRBY', KEYS[3], ARGV[1], 1)
            if attempts >= tonumber(ARGV[2]) then
                redis.call('LPUSH', KEYS[6], ARGV[1])
                return {attempts, 1}
            end
            redis.call('RPUSH', KEYS[5], ARGV[1])
            return {attempts, 0}
            "#,
        )
    }

    /// KEYS: processing, leases, errors, dead
    /// ARGV: entry, error ('' for none)
    pub fn dead_letter() -> Script {
        Script::new(
            r#"
            if redis.call('LREM', KEYS[1], 1, ARGV[1]) == 0 then
                return 0
            end
            redis.call('HDEL', KEYS[2], ARGV[1])
            if ARGV[2] ~= '' then
                redis.call('HSET', KEYS[3], ARGV[1], ARGV[2])
            end
            redis.call('LPUSH', KEYS[4], ARGV[1])
            return 1
            "#,
        )
    }

    /// KEYS: processing, leases, attempts, errors, queued, dead
    /// ARGV: now_ms, ttl_ms, max_attempts
    ///
    /// Entries without a lease record (moved but not yet stamped) are
    /// adopted: they get a fresh expiry and are reclaimed by a later pass.
    pub fn sweep() -> Script {
        Script::new(
            r#"
            local now = tonumber(ARGV[1])
            local entries = redis.call('LRANGE', KEYS[1], 0, -1)
            local requeued, dead = {}, {}
            local adopted = 0
            for _, entry in ipairs(entries) do
                local expiry = redis.call('HGET', KEYS[2], entry)
                if not expiry then
                    redis.call('HSET', KEYS[2], entry, now + tonumber(ARGV[2]))
                    adopted = adopted + 1
                elseif tonumber(expiry) < now then
                    redis.call('LREM', KEYS[1], 1, entry)
                    redis.call('HDEL', KEYS[2], entry)
                    redis.call('HSETNX', KEYS[4], entry, 'lease expired')
                    local attempts = redis.call('HINCRBY', KEYS[3], entry, 1)
                    if attempts >= tonumber(ARGV[3]) then
                        redis.call('LPUSH', KEYS[6], entry)
                        table.insert(dead, entry)
                    else
                        redis.call('RPUSH', KEYS[5], entry)
                        table.insert(requeued, entry)
                    end
                end
            end
            return {requeued, dead, adopted}
            "#,
        )
    }
}

#[derive(Debug)]
struct Keys {
    prefix: String,
}

impl Keys {
    fn job_counter(&self) -> String {
        format!("{}:counter:jobs", self.prefix)
    }

    fn job(&self, job_id: JobId) -> String {
        format!("{}:job:{job_id}", self.prefix)
    }

    fn queued_counter(&self, job_id: JobId) -> String {
        format!("{}:counter:queued:{job_id}", self.prefix)
    }

    fn completed_counter(&self, job_id: JobId) -> String {
        format!("{}:counter:completed:{job_id}", self.prefix)
    }

    fn payload(&self, key: TaskKey) -> String {
        format!("{}:task:{}:{}", self.prefix, key.job_id, key.task_id)
    }

    fn queued(&self) -> String {
        format!("{}:queue:queued", self.prefix)
    }

    fn processing(&self) -> String {
        format!("{}:queue:processing", self.prefix)
    }

    fn dead(&self) -> String {
        format!("{}:queue:dead", self.prefix)
    }

    fn leases(&self) -> String {
        format!("{}:queue:leases", self.prefix)
    }

    fn attempts(&self) -> String {
        format!("{}:queue:attempts", self.prefix)
    }

    fn errors(&self) -> String {
        format!("{}:queue:errors", self.prefix)
    }

    fn fan_in(&self) -> String {
        format!("{}:queue:fan_in", self.prefix)
    }
}

/// Redis-backed job store and task queue.
///
/// Queue lists hold `{job_id}_{task_id}` entries. New entries are pushed on
/// the left of `queued` and leased from the right with `BLMOVE`, so the
/// right end is the head. Every other multi-key transition runs as a Lua
/// script.
///
/// Blocking `BLMOVE` calls go through dedicated connections so they never
/// stall the shared [`ConnectionManager`].
#[derive(Clone)]
pub struct RedisStore {
    client: Client,
    conn: ConnectionManager,
    blocking: Arc<Mutex<Vec<MultiplexedConnection>>>,
    keys: Arc<Keys>,
    retry: LeaseRetryConfig,
    resolve_script: Script,
    resolve_and_count_script: Script,
    claim_fan_ins_script: Script,
    fail_script: Script,
    dead_letter_script: Script,
    sweep_script: Script,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("prefix", &self.keys.prefix)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Connect to `redis_url`, namespacing every key under `prefix`.
    pub async fn connect(
        redis_url: &str,
        prefix: impl Into<String>,
        retry: LeaseRetryConfig,
    ) -> Result<Self, StoreError> {
        info!("Connecting to Redis at {}", redis_url);
        let client = Client::open(redis_url)?;
        let conn = ConnectionManager::new(client.clone()).await?;

        Ok(Self {
            client,
            conn,
            blocking: Arc::new(Mutex::new(Vec::new())),
            keys: Arc::new(Keys {
                prefix: prefix.into(),
            }),
            retry,
            resolve_script: scripts::resolve(),
            resolve_and_count_script: scripts::resolve_and_count(),
            claim_fan_ins_script: scripts::claim_fan_ins(),
            fail_script: scripts::fail(),
            dead_letter_script: scripts::dead_letter(),
            sweep_script: scripts::sweep(),
        })
    }

    /// Namespace prefix of every key.
    pub fn prefix(&self) -> &str {
        &self.keys.prefix
    }

    async fn checkout_blocking(&self) -> Result<MultiplexedConnection, StoreError> {
        if let Some(conn) = self.blocking.lock().await.pop() {
            return Ok(conn);
        }
        // BLMOVE may legitimately hold the reply for the whole wait.
        let config = AsyncConnectionConfig::new().set_response_timeout(None);
        Ok(self
            .client
            .get_multiplexed_async_connection_with_config(&config)
            .await?)
    }

    async fn checkin_blocking(&self, conn: MultiplexedConnection) {
        self.blocking.lock().await.push(conn);
    }

    fn decode_entry(&self, entry: &str) -> Result<TaskKey, StoreError> {
        TaskKey::decode(entry).ok_or_else(|| {
            StoreError::corrupt(self.keys.processing(), format!("bad entry `{entry}`"))
        })
    }

    async fn quarantine(&self, entry: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        redis::pipe()
            .atomic()
            .lrem(self.keys.processing(), 1, entry)
            .ignore()
            .lpush(self.keys.dead(), entry)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;
        warn!(entry, "moved unreadable entry to dead");
        Ok(())
    }
}

#[async_trait]
impl JobStore for RedisStore {
    async fn create_job(&self) -> Result<JobId, StoreError> {
        let mut conn = self.conn.clone();
        let id: u64 = conn.incr(self.keys.job_counter(), 1).await?;
        let job_id = JobId(id);

        let record = serde_json::to_string(&JobRecord::pending())
            .map_err(|e| StoreError::corrupt(self.keys.job(job_id), e))?;
        conn.set::<_, _, ()>(self.keys.job(job_id), record).await?;
        Ok(job_id)
    }

    async fn get_job(&self, job_id: JobId) -> Result<Option<JobRecord>, StoreError> {
        let mut conn = self.conn.clone();
        let key = self.keys.job(job_id);
        let raw: Option<String> = conn.get(&key).await?;
        raw.map(|json| serde_json::from_str(&json).map_err(|e| StoreError::corrupt(&key, e)))
            .transpose()
    }

    async fn mark_done(
        &self,
        job_id: JobId,
        final_path: &str,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let key = self.keys.job(job_id);
        let record = serde_json::to_string(&JobRecord::done(final_path))
            .map_err(|e| StoreError::corrupt(&key, e))?;
        redis::pipe()
            .atomic()
            .set(key, record)
            .ignore()
            .hdel(self.keys.fan_in(), job_id.0)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn increment_queued(&self, job_id: JobId) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        Ok(conn.incr(self.keys.queued_counter(job_id), 1).await?)
    }

    async fn increment_completed(
        &self,
        job_id: JobId,
    ) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        Ok(conn.incr(self.keys.completed_counter(job_id), 1).await?)
    }

    async fn queued_count(&self, job_id: JobId) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        let count: Option<u64> = conn.get(self.keys.queued_counter(job_id)).await?;
        Ok(count.unwrap_or(0))
    }

    async fn completed_count(&self, job_id: JobId) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        let count: Option<u64> = conn.get(self.keys.completed_counter(job_id)).await?;
        Ok(count.unwrap_or(0))
    }

    async fn claim_stale_fan_ins(
        &self,
        stale_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<JobId>, StoreError> {
        let mut conn = self.conn.clone();
        let claimed: Vec<String> = self
            .claim_fan_ins_script
            .key(self.keys.fan_in())
            .arg(stale_before.timestamp_millis())
            .arg(now.timestamp_millis())
            .invoke_async(&mut conn)
            .await?;

        claimed
            .iter()
            .map(|raw| {
                raw.parse::<u64>().map(JobId).map_err(|_| {
                    StoreError::corrupt(self.keys.fan_in(), format!("bad job id `{raw}`"))
                })
            })
            .collect()
    }

    async fn release_fan_in(&self, job_id: JobId) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.hdel::<_, _, ()>(self.keys.fan_in(), job_id.0).await?;
        Ok(())
    }
}

#[async_trait]
impl TaskQueue for RedisStore {
    async fn enqueue(
        &self,
        key: TaskKey,
        payload: Vec<u8>,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        redis::pipe()
            .atomic()
            .set(self.keys.payload(key), payload)
            .ignore()
            .lpush(self.keys.queued(), key.encode())
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;
        debug!(task = %key, "enqueued task");
        Ok(())
    }

    async fn lease_next(
        &self,
        worker_id: &str,
        wait: Duration,
    ) -> Result<Option<TaskLease>, StoreError> {
        // A BLMOVE timeout of 0 blocks forever.
        let moved: Option<String> = if wait.is_zero() {
            let mut conn = self.conn.clone();
            redis::cmd("LMOVE")
                .arg(self.keys.queued())
                .arg(self.keys.processing())
                .arg("RIGHT")
                .arg("LEFT")
                .query_async(&mut conn)
                .await?
        } else {
            let mut blocking = self.checkout_blocking().await?;
            let moved = redis::cmd("BLMOVE")
                .arg(self.keys.queued())
                .arg(self.keys.processing())
                .arg("RIGHT")
                .arg("LEFT")
                .arg(wait.as_secs_f64())
                .query_async(&mut blocking)
                .await?;
            self.checkin_blocking(blocking).await;
            moved
        };

        let Some(entry) = moved else {
            return Ok(None);
        };

        let key = match self.decode_entry(&entry) {
            Ok(key) => key,
            Err(err) => {
                self.quarantine(&entry).await?;
                return Err(err);
            }
        };

        let mut lease = TaskLease::new(key, Vec::new(), worker_id, self.retry.lease_ttl(), 0);
        let mut conn = self.conn.clone();
        let (attempts, payload): (Option<u32>, Option<Vec<u8>>) = redis::pipe()
            .atomic()
            .hset(self.keys.leases(), &entry, lease.expires_at.timestamp_millis())
            .ignore()
            .hget(self.keys.attempts(), &entry)
            .get(self.keys.payload(key))
            .query_async(&mut conn)
            .await?;

        let Some(payload) = payload else {
            self.quarantine(&entry).await?;
            return Err(StoreError::corrupt(
                self.keys.payload(key),
                "queued entry has no payload",
            ));
        };

        lease.payload = payload;
        lease.attempts = attempts.unwrap_or(0);
        debug!(task = %key, worker_id, "leased task");
        Ok(Some(lease))
    }

    async fn resolve(&self, key: TaskKey) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let removed: i64 = self
            .resolve_script
            .key(self.keys.processing())
            .key(self.keys.leases())
            .key(self.keys.attempts())
            .key(self.keys.errors())
            .key(self.keys.payload(key))
            .arg(key.encode())
            .invoke_async(&mut conn)
            .await?;
        Ok(removed == 1)
    }

    async fn resolve_and_count(
        &self,
        key: TaskKey,
    ) -> Result<Option<FanInCount>, StoreError> {
        let mut conn = self.conn.clone();
        let result: Vec<u64> = self
            .resolve_and_count_script
            .key(self.keys.processing())
            .key(self.keys.leases())
            .key(self.keys.attempts())
            .key(self.keys.errors())
            .key(self.keys.payload(key))
            .key(self.keys.completed_counter(key.job_id))
            .key(self.keys.queued_counter(key.job_id))
            .key(self.keys.fan_in())
            .arg(key.encode())
            .arg(key.job_id.0)
            .arg(Utc::now().timestamp_millis())
            .invoke_async(&mut conn)
            .await?;

        Ok(match result.as_slice() {
            [] => None,
            [completed, queued] => Some(FanInCount {
                completed: *completed,
                queued: *queued,
            }),
            other => {
                return Err(StoreError::corrupt(
                    self.keys.completed_counter(key.job_id),
                    format!("unexpected resolve reply {other:?}"),
                ));
            }
        })
    }

    async fn fail(
        &self,
        key: TaskKey,
        error: Option<String>,
    ) -> Result<Option<ResurrectionOutcome>, StoreError> {
        let mut conn = self.conn.clone();
        let result: Vec<i64> = self
            .fail_script
            .key(self.keys.processing())
            .key(self.keys.leases())
            .key(self.keys.attempts())
            .key(self.keys.errors())
            .key(self.keys.queued())
            .key(self.keys.dead())
            .arg(key.encode())
            .arg(self.retry.max_attempts)
            .arg(error.unwrap_or_default())
            .invoke_async(&mut conn)
            .await?;

        Ok(match result.as_slice() {
            [] => None,
            [attempts, 0] => Some(ResurrectionOutcome::Requeued {
                attempts: *attempts as u32,
            }),
            [attempts, _] => Some(ResurrectionOutcome::DeadLettered {
                attempts: *attempts as u32,
            }),
            other => {
                return Err(StoreError::corrupt(
                    self.keys.attempts(),
                    format!("unexpected fail reply {other:?}"),
                ));
            }
        })
    }

    async fn dead_letter(
        &self,
        key: TaskKey,
        error: Option<String>,
    ) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let moved: i64 = self
            .dead_letter_script
            .key(self.keys.processing())
            .key(self.keys.leases())
            .key(self.keys.errors())
            .key(self.keys.dead())
            .arg(key.encode())
            .arg(error.unwrap_or_default())
            .invoke_async(&mut conn)
            .await?;
        Ok(moved == 1)
    }

    async fn snapshot(&self) -> Result<QueueSnapshot, StoreError> {
        let mut conn = self.conn.clone();
        let (queued, processing, dead): (usize, Vec<String>, usize) = redis::pipe()
            .llen(self.keys.queued())
            .lrange(self.keys.processing(), 0, -1)
            .llen(self.keys.dead())
            .query_async(&mut conn)
            .await?;

        let mut snapshot = QueueSnapshot::new(Utc::now());
        snapshot.queued = queued;
        snapshot.dead = dead;
        // Newest lease is on the left.
        snapshot.processing = processing
            .iter()
            .rev()
            .map(|entry| self.decode_entry(entry))
            .collect::<Result<_, _>>()?;
        Ok(snapshot)
    }
}

#[async_trait]
impl LeaseExpiryScanner for RedisStore {
    fn retry_config(&self) -> LeaseRetryConfig {
        self.retry.clone()
    }

    async fn scan_expired_leases(
        &self,
        now: DateTime<Utc>,
    ) -> Result<SweepReport, StoreError> {
        let mut conn = self.conn.clone();
        let (requeued, dead, adopted): (Vec<String>, Vec<String>, usize) = self
            .sweep_script
            .key(self.keys.processing())
            .key(self.keys.leases())
            .key(self.keys.attempts())
            .key(self.keys.errors())
            .key(self.keys.queued())
            .key(self.keys.dead())
            .arg(now.timestamp_millis())
            .arg(self.retry.lease_ttl().num_milliseconds())
            .arg(self.retry.max_attempts)
            .invoke_async(&mut conn)
            .await?;

        let mut report = SweepReport {
            adopted,
            ..SweepReport::default()
        };
        for entry in requeued {
            report.requeued.push(self.decode_entry(&entry)?);
        }
        for entry in dead {
            report.dead_lettered.push(self.decode_entry(&entry)?);
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        let keys = Keys {
            prefix: "reel".into(),
        };
        let key = TaskKey::new(JobId(3), 12);
        assert_eq!(keys.job(JobId(3)), "reel:job:3");
        assert_eq!(keys.completed_counter(JobId(3)), "reel:counter:completed:3");
        assert_eq!(keys.payload(key), "reel:task:3:12");
        assert_eq!(keys.queued(), "reel:queue:queued");
        assert_eq!(keys.processing(), "reel:queue:processing");
        assert_eq!(keys.fan_in(), "reel:queue:fan_in");
    }
}
