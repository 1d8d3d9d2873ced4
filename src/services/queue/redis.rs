use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::{AsyncCommands, Script};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

use super::{Broker, QueueError, RetryPolicy};
use crate::models::job::{
    Delivery, Failure, FailureReason, Job, JobState, Lease, NackOutcome, QueueDepth,
};

/// How long completed job records are kept around for inspection.
const COMPLETED_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Maximum number of expired leases handled per sweep.
const SWEEP_BATCH: usize = 100;

/// Every script reads the Redis server clock so all workers agree on lease expiry.
const NOW_LUA: &str = r#"
local t = redis.call('TIME')
local now = tonumber(t[1]) * 1000 + math.floor(tonumber(t[2]) / 1000)
"#;

// KEYS: queued, job ; ARGV: id, payload
const PUBLISH_LUA: &str = r#"
redis.call('HSET', KEYS[2], 'payload', ARGV[2], 'attempt', 0, 'state', 'queued',
    'created_at', now, 'updated_at', now, 'available_at', now)
redis.call('ZADD', KEYS[1], now, ARGV[1])
return now
"#;

// KEYS: queued, inflight ; ARGV: job key prefix, lease ms, worker id, token
const CLAIM_LUA: &str = r#"
local ids = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', now, 'LIMIT', 0, 1)
if #ids == 0 then return false end
local id = ids[1]
local key = ARGV[1] .. id
redis.call('ZREM', KEYS[1], id)
if redis.call('EXISTS', key) == 0 then return false end
local expires = now + tonumber(ARGV[2])
redis.call('ZADD', KEYS[2], expires, id)
redis.call('HSET', key, 'state', 'in-flight', 'lease_owner', ARGV[3], 'lease_token', ARGV[4],
    'lease_expires_at', expires, 'updated_at', now)
local f = redis.call('HMGET', key, 'payload', 'attempt', 'created_at', 'last_error')
return {id, f[1], tostring(f[2]), tostring(f[3]), f[4] or '', tostring(expires), tostring(now)}
"#;

// KEYS: inflight, job ; ARGV: id, token, completed ttl ms
const ACK_LUA: &str = r#"
if redis.call('HGET', KEYS[2], 'state') ~= 'in-flight'
    or redis.call('HGET', KEYS[2], 'lease_token') ~= ARGV[2] then
    return 0
end
redis.call('ZREM', KEYS[1], ARGV[1])
redis.call('HDEL', KEYS[2], 'lease_token', 'lease_owner', 'lease_expires_at')
redis.call('HSET', KEYS[2], 'state', 'completed', 'updated_at', now)
redis.call('PEXPIRE', KEYS[2], ARGV[3])
return 1
"#;

// KEYS: queued, inflight, dead, job
// ARGV: id, token, error, permanent, max attempts, require expired, delays...
// Returns {-1, 0} when the lease is not held, {0, attempt} requeued, {1, attempt} dead.
const NACK_LUA: &str = r#"
if redis.call('HGET', KEYS[4], 'state') ~= 'in-flight'
    or redis.call('HGET', KEYS[4], 'lease_token') ~= ARGV[2] then
    return {-1, 0}
end
if ARGV[6] == '1' and tonumber(redis.call('HGET', KEYS[4], 'lease_expires_at')) > now then
    return {-1, 0}
end
local attempt = redis.call('HINCRBY', KEYS[4], 'attempt', 1)
redis.call('ZREM', KEYS[2], ARGV[1])
redis.call('HDEL', KEYS[4], 'lease_token', 'lease_owner', 'lease_expires_at')
redis.call('HSET', KEYS[4], 'last_error', ARGV[3], 'updated_at', now)
if ARGV[4] == '1' or attempt >= tonumber(ARGV[5]) then
    redis.call('HSET', KEYS[4], 'state', 'dead')
    redis.call('ZADD', KEYS[3], now, ARGV[1])
    return {1, attempt}
end
local at = now + tonumber(ARGV[6 + attempt])
redis.call('HSET', KEYS[4], 'state', 'queued', 'available_at', at)
redis.call('ZADD', KEYS[1], at, ARGV[1])
return {0, attempt}
"#;

// KEYS: queued, inflight, job ; ARGV: id, token
const RELEASE_LUA: &str = r#"
if redis.call('HGET', KEYS[3], 'state') ~= 'in-flight'
    or redis.call('HGET', KEYS[3], 'lease_token') ~= ARGV[2] then
    return 0
end
redis.call('ZREM', KEYS[2], ARGV[1])
redis.call('HDEL', KEYS[3], 'lease_token', 'lease_owner', 'lease_expires_at')
redis.call('HSET', KEYS[3], 'state', 'queued', 'available_at', now, 'updated_at', now)
redis.call('ZADD', KEYS[1], now, ARGV[1])
return 1
"#;

// KEYS: job ; ARGV: token
const LEASE_VALID_LUA: &str = r#"
local f = redis.call('HMGET', KEYS[1], 'state', 'lease_token', 'lease_expires_at')
if f[1] == 'in-flight' and f[2] == ARGV[1] and tonumber(f[3]) > now then
    return 1
end
return 0
"#;

// KEYS: inflight ; ARGV: limit
const EXPIRED_LUA: &str = r#"
return redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', now, 'LIMIT', 0, tonumber(ARGV[1]))
"#;

struct Scripts {
    publish: Script,
    claim: Script,
    ack: Script,
    nack: Script,
    release: Script,
    lease_valid: Script,
    expired: Script,
}

impl Scripts {
    fn load() -> Self {
        let script = |body: &str| Script::new(&format!("{NOW_LUA}{body}"));
        Self {
            publish: script(PUBLISH_LUA),
            claim: script(CLAIM_LUA),
            ack: script(ACK_LUA),
            nack: script(NACK_LUA),
            release: script(RELEASE_LUA),
            lease_valid: script(LEASE_VALID_LUA),
            expired: script(EXPIRED_LUA),
        }
    }
}

/// Redis-backed durable broker with leases and delayed redelivery.
///
/// Layout under the queue name `q`: `q:job:{id}` hash per job, `q:queued`
/// sorted by availability time, `q:inflight` sorted by lease expiry and
/// `q:dead` sorted by time of death. Every transition is a single Lua script.
/// The claim script derives job keys from a prefix, so the queue must live on
/// a single Redis node.
pub struct RedisBroker {
    client: redis::Client,
    policy: RetryPolicy,
    job_prefix: String,
    queued_key: String,
    inflight_key: String,
    dead_key: String,
    scripts: Scripts,
}

impl RedisBroker {
    pub fn new(redis_url: &str, queue_name: &str, policy: RetryPolicy) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(QueueError::Redis)?;
        Ok(Self {
            client,
            policy,
            job_prefix: format!("{queue_name}:job:"),
            queued_key: format!("{queue_name}:queued"),
            inflight_key: format!("{queue_name}:inflight"),
            dead_key: format!("{queue_name}:dead"),
            scripts: Scripts::load(),
        })
    }

    fn job_key(&self, job_id: Uuid) -> String {
        format!("{}{}", self.job_prefix, job_id)
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, QueueError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(QueueError::Redis)
    }

    async fn nack_with(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        job_id: Uuid,
        token: &str,
        failure: &Failure,
        require_expired: bool,
    ) -> Result<Option<NackOutcome>, QueueError> {
        let permanent = failure.is_permanent();
        let mut invocation = self.scripts.nack.prepare_invoke();
        invocation
            .key(&self.queued_key)
            .key(&self.inflight_key)
            .key(&self.dead_key)
            .key(self.job_key(job_id))
            .arg(job_id.to_string())
            .arg(token)
            .arg(failure.describe())
            .arg(if permanent { "1" } else { "0" })
            .arg(self.policy.max_attempts)
            .arg(if require_expired { "1" } else { "0" })
            .arg(self.policy.delay_table_ms());
        let (status, attempt): (i64, u32) = invocation.invoke_async(conn).await?;

        Ok(match status {
            -1 => None,
            1 => Some(NackOutcome::Dead { attempt }),
            _ => Some(NackOutcome::Requeued {
                attempt,
                delay: self.policy.backoff.delay_for(attempt),
            }),
        })
    }
}

fn millis_to_datetime(raw: &str) -> Result<DateTime<Utc>, String> {
    raw.parse::<i64>()
        .ok()
        .and_then(DateTime::from_timestamp_millis)
        .ok_or_else(|| format!("bad timestamp {raw:?}"))
}

fn job_from_hash(job_id: Uuid, fields: &HashMap<String, String>) -> Result<Job, QueueError> {
    let corrupt = |msg: String| QueueError::Corrupt(job_id.to_string(), msg);
    let field = |name: &str| {
        fields
            .get(name)
            .ok_or_else(|| corrupt(format!("missing field {name}")))
    };

    let payload = serde_json::from_str(field("payload")?)?;
    let attempt = field("attempt")?
        .parse()
        .map_err(|_| corrupt("bad attempt".into()))?;
    let state = field("state")?
        .parse::<JobState>()
        .map_err(|e| corrupt(e.to_string()))?;
    let created_at = millis_to_datetime(field("created_at")?).map_err(corrupt)?;
    let updated_at = millis_to_datetime(field("updated_at")?).map_err(corrupt)?;

    Ok(Job {
        id: job_id,
        payload,
        attempt,
        state,
        created_at,
        updated_at,
        last_error: fields.get("last_error").filter(|e| !e.is_empty()).cloned(),
    })
}

#[async_trait]
impl Broker for RedisBroker {
    async fn publish(&self, payload: serde_json::Value) -> Result<Uuid, QueueError> {
        let mut conn = self.connection().await?;
        let job_id = Uuid::new_v4();
        let body = serde_json::to_string(&payload)?;
        let _: i64 = self
            .scripts
            .publish
            .key(&self.queued_key)
            .key(self.job_key(job_id))
            .arg(job_id.to_string())
            .arg(body)
            .invoke_async(&mut conn)
            .await?;
        Ok(job_id)
    }

    async fn claim(
        &self,
        worker_id: &str,
        lease: Duration,
    ) -> Result<Option<Delivery>, QueueError> {
        let mut conn = self.connection().await?;
        let token = Uuid::new_v4();
        let claimed: Option<Vec<String>> = self
            .scripts
            .claim
            .key(&self.queued_key)
            .key(&self.inflight_key)
            .arg(&self.job_prefix)
            .arg(lease.as_millis() as u64)
            .arg(worker_id)
            .arg(token.to_string())
            .invoke_async(&mut conn)
            .await?;

        let Some(fields) = claimed else {
            return Ok(None);
        };
        let [id, payload, attempt, created_at, last_error, expires_at, now] = fields.as_slice()
        else {
            return Err(QueueError::Corrupt(
                "claim".into(),
                format!("unexpected reply of {} fields", fields.len()),
            ));
        };

        let job_id = Uuid::parse_str(id).map_err(|e| QueueError::Corrupt(id.clone(), e.to_string()))?;
        let corrupt = |msg: String| QueueError::Corrupt(id.clone(), msg);
        let job = Job {
            id: job_id,
            payload: serde_json::from_str(payload)?,
            attempt: attempt.parse().map_err(|_| corrupt("bad attempt".into()))?,
            state: JobState::InFlight,
            created_at: millis_to_datetime(created_at).map_err(corrupt)?,
            updated_at: millis_to_datetime(now).map_err(corrupt)?,
            last_error: Some(last_error.clone()).filter(|e| !e.is_empty()),
        };

        Ok(Some(Delivery {
            job,
            lease: Lease {
                job_id,
                worker_id: worker_id.to_string(),
                token,
                expires_at: millis_to_datetime(expires_at).map_err(corrupt)?,
            },
        }))
    }

    async fn ack(&self, lease: &Lease) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        let acked: i64 = self
            .scripts
            .ack
            .key(&self.inflight_key)
            .key(self.job_key(lease.job_id))
            .arg(lease.job_id.to_string())
            .arg(lease.token.to_string())
            .arg(COMPLETED_TTL.as_millis() as u64)
            .invoke_async(&mut conn)
            .await?;
        if acked == 1 {
            Ok(())
        } else {
            Err(QueueError::LeaseLost(lease.job_id))
        }
    }

    async fn nack(&self, lease: &Lease, failure: &Failure) -> Result<NackOutcome, QueueError> {
        let mut conn = self.connection().await?;
        self.nack_with(&mut conn, lease.job_id, &lease.token.to_string(), failure, false)
            .await?
            .ok_or(QueueError::LeaseLost(lease.job_id))
    }

    async fn release(&self, lease: &Lease) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        let released: i64 = self
            .scripts
            .release
            .key(&self.queued_key)
            .key(&self.inflight_key)
            .key(self.job_key(lease.job_id))
            .arg(lease.job_id.to_string())
            .arg(lease.token.to_string())
            .invoke_async(&mut conn)
            .await?;
        if released == 1 {
            Ok(())
        } else {
            Err(QueueError::LeaseLost(lease.job_id))
        }
    }

    async fn lease_valid(&self, lease: &Lease) -> Result<bool, QueueError> {
        let mut conn = self.connection().await?;
        let valid: i64 = self
            .scripts
            .lease_valid
            .key(self.job_key(lease.job_id))
            .arg(lease.token.to_string())
            .invoke_async(&mut conn)
            .await?;
        Ok(valid == 1)
    }

    async fn sweep_expired(&self) -> Result<usize, QueueError> {
        let mut conn = self.connection().await?;
        let expired: Vec<String> = self
            .scripts
            .expired
            .key(&self.inflight_key)
            .arg(SWEEP_BATCH)
            .invoke_async(&mut conn)
            .await?;

        let failure = Failure::new(FailureReason::LeaseExpired, "");
        let mut swept = 0;
        for id in expired {
            let Ok(job_id) = Uuid::parse_str(&id) else {
                tracing::warn!(job_id = %id, "Dropping malformed id from in-flight set");
                let _: () = conn.zrem(&self.inflight_key, &id).await?;
                continue;
            };
            let token: Option<String> = conn.hget(self.job_key(job_id), "lease_token").await?;
            let Some(token) = token else {
                let _: () = conn.zrem(&self.inflight_key, &id).await?;
                continue;
            };
            // A worker may ack between the scan and the nack; the script re-checks the lease.
            if let Some(outcome) = self
                .nack_with(&mut conn, job_id, &token, &failure, true)
                .await?
            {
                tracing::warn!(job_id = %job_id, outcome = ?outcome, "Lease expired without ack");
                swept += 1;
            }
        }
        Ok(swept)
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>, QueueError> {
        let mut conn = self.connection().await?;
        let fields: HashMap<String, String> = conn.hgetall(self.job_key(job_id)).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        job_from_hash(job_id, &fields).map(Some)
    }

    async fn dead_jobs(&self, limit: usize) -> Result<Vec<Job>, QueueError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.connection().await?;
        let ids: Vec<String> = conn
            .zrevrange(&self.dead_key, 0, limit as isize - 1)
            .await?;

        let mut jobs = Vec::with_capacity(ids.len());
        for id in ids {
            let job_id =
                Uuid::parse_str(&id).map_err(|e| QueueError::Corrupt(id.clone(), e.to_string()))?;
            let fields: HashMap<String, String> = conn.hgetall(self.job_key(job_id)).await?;
            if !fields.is_empty() {
                jobs.push(job_from_hash(job_id, &fields)?);
            }
        }
        Ok(jobs)
    }

    async fn depth(&self) -> Result<QueueDepth, QueueError> {
        let mut conn = self.connection().await?;
        let (queued, in_flight, dead): (u64, u64, u64) = redis::pipe()
            .zcard(&self.queued_key)
            .zcard(&self.inflight_key)
            .zcard(&self.dead_key)
            .query_async(&mut conn)
            .await?;
        Ok(QueueDepth {
            queued,
            in_flight,
            dead,
        })
    }

    /// Check Redis connectivity (for health checks).
    async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }
}
