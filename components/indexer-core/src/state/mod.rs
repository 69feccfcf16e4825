use std::collections::HashMap;

use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Script};

use crate::metadata::cbor_to_json;
use crate::try_debug;
use crate::types::{
    content_type_bucket, network_label_of_resource_id, BatchClaim, ErrorRecord, IdentityResource,
    NonIdentityResource, CLAIM_TTL_SECS,
};
use crate::utils::{now_millis, Context};

pub const CURSOR_KEY: &str = "indexer:cursor";
pub const CLAIM_KEY_PREFIX: &str = "indexer:claim:";
pub const IDENTITY_RESOURCES_KEY: &str = "ordinals-plus-resources";
pub const NON_IDENTITY_RESOURCES_KEY: &str = "non-ordinals-resources";
pub const IDENTITY_RESOURCE_KEY_PREFIX: &str = "ordinals_plus:resource:";
pub const ERROR_KEY_PREFIX: &str = "indexer:error:";
pub const ERRORS_KEY: &str = "indexer:errors";
pub const IDENTITY_STATS_KEY_PREFIX: &str = "ordinals-plus:stats:";
pub const NON_IDENTITY_STATS_KEY_PREFIX: &str = "non-ordinals:stats:";
pub const ERROR_STATS_KEY: &str = "indexer:stats:errors";

/// Atomically reserves the next free inscription-number interval for a
/// worker. The probing loop is the server-side rendition of
/// [`next_free_interval`]; it runs against every live claim (skipping the
/// caller's own key, which makes re-claiming idempotent), then writes the
/// claim with the standard TTL and returns its payload. Returns nil when
/// no non-overlapping interval was found.
const CLAIM_BATCH_LUA: &str = r#"
local cursor = tonumber(redis.call('GET', KEYS[1]))
local claim_prefix = ARGV[1]
local worker_id = ARGV[2]
local batch_size = tonumber(ARGV[3])
local default_start = tonumber(ARGV[4])
local claim_ttl = tonumber(ARGV[5])
local claimed_at = tonumber(ARGV[6])
if cursor == nil then
  cursor = default_start
end
local own_key = claim_prefix .. worker_id
local start = cursor + 1
for attempt = 1, 10 do
  local finish = start + batch_size - 1
  local overlap = false
  local claim_keys = redis.call('KEYS', claim_prefix .. '*')
  for _, key in ipairs(claim_keys) do
    if key ~= own_key then
      local raw = redis.call('GET', key)
      if raw then
        local decoded, claim = pcall(cjson.decode, raw)
        if decoded and claim['start'] ~= nil and claim['endInscription'] ~= nil then
          if start <= claim['endInscription'] and finish >= claim['start'] then
            overlap = true
          end
        end
      end
    end
  end
  if overlap then
    start = finish + 1
  else
    local payload = cjson.encode({
      ['start'] = start,
      ['endInscription'] = finish,
      ['workerId'] = worker_id,
      ['claimedAt'] = claimed_at
    })
    redis.call('SET', own_key, payload, 'EX', claim_ttl)
    return payload
  end
end
return false
"#;

/// Monotonic cursor write: the stored value only ever grows.
const ADVANCE_CURSOR_LUA: &str = r#"
local cursor = tonumber(redis.call('GET', KEYS[1]))
local candidate = tonumber(ARGV[1])
if cursor == nil or candidate > cursor then
  redis.call('SET', KEYS[1], candidate)
  return candidate
end
return cursor
"#;

lazy_static! {
    static ref CLAIM_BATCH_SCRIPT: Script = Script::new(CLAIM_BATCH_LUA);
    static ref ADVANCE_CURSOR_SCRIPT: Script = Script::new(ADVANCE_CURSOR_LUA);
}

/// Pure form of the interval probing performed by `CLAIM_BATCH_LUA`. Probes
/// up to 10 candidate intervals of `batch_size` numbers starting right
/// after `cursor`; a candidate colliding with any live claim of another
/// worker is abandoned and the probe restarts past it. Returns the first
/// collision-free interval, or `None` when every attempt collided. The Lua
/// body must stay in lockstep with this function: it is the executable
/// statement of the claim non-overlap guarantee.
pub fn next_free_interval(
    cursor: i64,
    batch_size: u64,
    live_claims: &[BatchClaim],
    worker_id: &str,
) -> Option<(u64, u64)> {
    let mut start = cursor + 1;
    for _attempt in 0..10 {
        let finish = start + batch_size as i64 - 1;
        let overlap = live_claims.iter().any(|claim| {
            claim.worker_id != worker_id
                && start <= claim.end_inscription as i64
                && finish >= claim.start as i64
        });
        if !overlap {
            return Some((start as u64, finish as u64));
        }
        start = finish + 1;
    }
    None
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct IndexerStatistics {
    pub cursor: Option<i64>,
    pub active_workers: usize,
    pub identity_total: u64,
    pub did_documents: u64,
    pub verifiable_credentials: u64,
    pub non_identity_total: u64,
    pub non_identity_by_content_type: Vec<(String, u64)>,
    pub errors: u64,
}

/// All interactions with the shared key-value store. Worker replicas are
/// stateless; everything observable or resumable lives behind these keys.
#[derive(Clone)]
pub struct SharedState {
    con: MultiplexedConnection,
}

impl SharedState {
    pub async fn connect(url: &str) -> Result<SharedState, String> {
        let client =
            redis::Client::open(url).map_err(|e| format!("invalid redis url {url}: {e}"))?;
        let con = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| format!("unable to connect to redis at {url}: {e}"))?;
        Ok(SharedState { con })
    }

    pub async fn claim_next_batch(
        &self,
        worker_id: &str,
        batch_size: u64,
        default_start: i64,
    ) -> Result<Option<BatchClaim>, String> {
        let mut con = self.con.clone();
        let payload: Option<String> = CLAIM_BATCH_SCRIPT
            .key(CURSOR_KEY)
            .arg(CLAIM_KEY_PREFIX)
            .arg(worker_id)
            .arg(batch_size)
            .arg(default_start)
            .arg(CLAIM_TTL_SECS)
            .arg(now_millis())
            .invoke_async(&mut con)
            .await
            .map_err(|e| format!("claim script failed: {e}"))?;
        match payload {
            Some(payload) => {
                let claim: BatchClaim = serde_json::from_str(&payload)
                    .map_err(|e| format!("invalid claim payload {payload}: {e}"))?;
                Ok(Some(claim))
            }
            None => Ok(None),
        }
    }

    pub async fn release_claim(&self, worker_id: &str) -> Result<(), String> {
        let mut con = self.con.clone();
        let _: () = con
            .del(format!("{CLAIM_KEY_PREFIX}{worker_id}"))
            .await
            .map_err(|e| format!("unable to release claim for {worker_id}: {e}"))?;
        Ok(())
    }

    pub async fn cursor(&self) -> Result<Option<i64>, String> {
        let mut con = self.con.clone();
        con.get(CURSOR_KEY)
            .await
            .map_err(|e| format!("unable to read cursor: {e}"))
    }

    async fn advance_cursor(&self, candidate: i64) -> Result<i64, String> {
        let mut con = self.con.clone();
        ADVANCE_CURSOR_SCRIPT
            .key(CURSOR_KEY)
            .arg(candidate)
            .invoke_async(&mut con)
            .await
            .map_err(|e| format!("cursor advance failed: {e}"))
    }

    /// Records the completion of a batch: advances the cursor (never
    /// backwards) and sweeps stale claims left behind by crashed workers.
    pub async fn complete_batch(&self, cursor: i64, ctx: &Context) -> Result<i64, String> {
        let cursor = self.advance_cursor(cursor).await?;
        let swept = self.sweep_expired_claims().await?;
        if swept > 0 {
            try_debug!(ctx, "Dropped {swept} expired claims");
        }
        Ok(cursor)
    }

    pub async fn active_claims(&self) -> Result<Vec<BatchClaim>, String> {
        let mut con = self.con.clone();
        let keys: Vec<String> = con
            .keys(format!("{CLAIM_KEY_PREFIX}*"))
            .await
            .map_err(|e| format!("unable to enumerate claims: {e}"))?;
        let mut claims = Vec::with_capacity(keys.len());
        for key in keys.iter() {
            let raw: Option<String> = con
                .get(key)
                .await
                .map_err(|e| format!("unable to read claim {key}: {e}"))?;
            // The key may expire between enumeration and read.
            let Some(raw) = raw else {
                continue;
            };
            if let Ok(claim) = serde_json::from_str::<BatchClaim>(&raw) {
                claims.push(claim);
            }
        }
        Ok(claims)
    }

    pub async fn sweep_expired_claims(&self) -> Result<usize, String> {
        let mut con = self.con.clone();
        let keys: Vec<String> = con
            .keys(format!("{CLAIM_KEY_PREFIX}*"))
            .await
            .map_err(|e| format!("unable to enumerate claims: {e}"))?;
        let now = now_millis();
        let mut swept = 0;
        for key in keys.iter() {
            let raw: Option<String> = con
                .get(key)
                .await
                .map_err(|e| format!("unable to read claim {key}: {e}"))?;
            let Some(raw) = raw else {
                continue;
            };
            let Ok(claim) = serde_json::from_str::<BatchClaim>(&raw) else {
                continue;
            };
            if now.saturating_sub(claim.claimed_at) > CLAIM_TTL_SECS * 1000 {
                let _: () = con
                    .del(key)
                    .await
                    .map_err(|e| format!("unable to drop expired claim {key}: {e}"))?;
                swept += 1;
            }
        }
        Ok(swept)
    }

    pub async fn record_identity_resource(
        &self,
        resource: &IdentityResource,
    ) -> Result<(), String> {
        let mut con = self.con.clone();
        let network = network_label_of_resource_id(&resource.resource_id);
        let metadata = serde_json::to_string(&cbor_to_json(&resource.metadata)).map_err(|e| {
            format!(
                "unable to serialize metadata for {}: {e}",
                resource.inscription_id
            )
        })?;
        let resource_key = format!("{IDENTITY_RESOURCE_KEY_PREFIX}{}", resource.inscription_id);
        let fields: Vec<(&str, String)> = vec![
            ("resourceId", resource.resource_id.clone()),
            ("inscriptionId", resource.inscription_id.clone()),
            ("inscriptionNumber", resource.inscription_number.to_string()),
            ("ordinalsType", resource.identity_kind.as_str().to_string()),
            ("contentType", resource.content_type.clone()),
            ("metadata", metadata),
            ("indexedAt", resource.indexed_at.to_string()),
            ("network", network.to_string()),
        ];
        redis::pipe()
            .atomic()
            .lpush(IDENTITY_RESOURCES_KEY, &resource.resource_id)
            .hset_multiple(&resource_key, &fields)
            .incr(
                format!(
                    "{IDENTITY_STATS_KEY_PREFIX}{}",
                    resource.identity_kind.as_str()
                ),
                1,
            )
            .incr(format!("{IDENTITY_STATS_KEY_PREFIX}total"), 1)
            .query_async::<_, ()>(&mut con)
            .await
            .map_err(|e| {
                format!(
                    "unable to record identity resource {}: {e}",
                    resource.resource_id
                )
            })?;
        Ok(())
    }

    pub async fn record_non_identity_resource(
        &self,
        resource: &NonIdentityResource,
    ) -> Result<(), String> {
        let mut con = self.con.clone();
        let bucket = content_type_bucket(&resource.content_type);
        redis::pipe()
            .atomic()
            .lpush(NON_IDENTITY_RESOURCES_KEY, &resource.resource_id)
            .incr(format!("{NON_IDENTITY_STATS_KEY_PREFIX}{bucket}"), 1)
            .incr(format!("{NON_IDENTITY_STATS_KEY_PREFIX}total"), 1)
            .query_async::<_, ()>(&mut con)
            .await
            .map_err(|e| {
                format!(
                    "unable to record resource {}: {e}",
                    resource.resource_id
                )
            })?;
        Ok(())
    }

    pub async fn record_error(&self, record: &ErrorRecord) -> Result<(), String> {
        let mut con = self.con.clone();
        let error_key = format!("{ERROR_KEY_PREFIX}{}", record.inscription_number);
        let fields: Vec<(&str, String)> = vec![
            ("inscriptionId", record.inscription_id.clone()),
            ("inscriptionNumber", record.inscription_number.to_string()),
            ("error", record.error.clone()),
            ("timestamp", record.timestamp.to_string()),
            ("workerId", record.worker_id.clone()),
        ];
        redis::pipe()
            .atomic()
            .hset_multiple(&error_key, &fields)
            .lpush(ERRORS_KEY, &record.inscription_id)
            .incr(ERROR_STATS_KEY, 1)
            .query_async::<_, ()>(&mut con)
            .await
            .map_err(|e| {
                format!(
                    "unable to record error for inscription #{}: {e}",
                    record.inscription_number
                )
            })?;
        Ok(())
    }

    /// Reads the newest `limit` entries of the error list. The list holds
    /// inscription ids while the detail hashes are keyed by inscription
    /// number, so the hashes are indexed by id before resolution; ids whose
    /// detail hash has been lost come back without a record.
    pub async fn recent_errors(
        &self,
        limit: usize,
    ) -> Result<Vec<(String, Option<ErrorRecord>)>, String> {
        if limit == 0 {
            return Ok(vec![]);
        }
        let mut con = self.con.clone();
        let ids: Vec<String> = con
            .lrange(ERRORS_KEY, 0, limit as isize - 1)
            .await
            .map_err(|e| format!("unable to read error list: {e}"))?;
        let keys: Vec<String> = con
            .keys(format!("{ERROR_KEY_PREFIX}*"))
            .await
            .map_err(|e| format!("unable to enumerate error records: {e}"))?;
        let mut by_inscription_id = HashMap::new();
        for key in keys.iter() {
            let fields: HashMap<String, String> = con
                .hgetall(key)
                .await
                .map_err(|e| format!("unable to read error record {key}: {e}"))?;
            if let Some(record) = parse_error_record(&fields) {
                by_inscription_id.insert(record.inscription_id.clone(), record);
            }
        }
        Ok(ids
            .into_iter()
            .map(|id| {
                let record = by_inscription_id.get(&id).cloned();
                (id, record)
            })
            .collect())
    }

    pub async fn statistics(&self) -> Result<IndexerStatistics, String> {
        let mut con = self.con.clone();
        let cursor = self.cursor().await?;
        let active_workers = self.active_claims().await?.len();
        let identity_total = self.read_counter(&mut con, &format!("{IDENTITY_STATS_KEY_PREFIX}total")).await?;
        let did_documents = self
            .read_counter(&mut con, &format!("{IDENTITY_STATS_KEY_PREFIX}did-document"))
            .await?;
        let verifiable_credentials = self
            .read_counter(
                &mut con,
                &format!("{IDENTITY_STATS_KEY_PREFIX}verifiable-credential"),
            )
            .await?;
        let errors = self.read_counter(&mut con, ERROR_STATS_KEY).await?;

        let bucket_keys: Vec<String> = con
            .keys(format!("{NON_IDENTITY_STATS_KEY_PREFIX}*"))
            .await
            .map_err(|e| format!("unable to enumerate content type counters: {e}"))?;
        let mut non_identity_total = 0;
        let mut non_identity_by_content_type = vec![];
        for key in bucket_keys.iter() {
            let count = self.read_counter(&mut con, key).await?;
            let bucket = key
                .strip_prefix(NON_IDENTITY_STATS_KEY_PREFIX)
                .unwrap_or(key)
                .to_string();
            if bucket == "total" {
                non_identity_total = count;
            } else {
                non_identity_by_content_type.push((bucket, count));
            }
        }
        non_identity_by_content_type.sort();

        Ok(IndexerStatistics {
            cursor,
            active_workers,
            identity_total,
            did_documents,
            verifiable_credentials,
            non_identity_total,
            non_identity_by_content_type,
            errors,
        })
    }

    async fn read_counter(
        &self,
        con: &mut MultiplexedConnection,
        key: &str,
    ) -> Result<u64, String> {
        let count: Option<u64> = con
            .get(key)
            .await
            .map_err(|e| format!("unable to read counter {key}: {e}"))?;
        Ok(count.unwrap_or(0))
    }
}

fn parse_error_record(fields: &HashMap<String, String>) -> Option<ErrorRecord> {
    Some(ErrorRecord {
        inscription_id: fields.get("inscriptionId")?.clone(),
        inscription_number: fields.get("inscriptionNumber")?.parse().ok()?,
        error: fields.get("error")?.clone(),
        timestamp: fields.get("timestamp")?.parse().ok()?,
        worker_id: fields.get("workerId")?.clone(),
    })
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn parses_complete_error_records() {
        let mut fields = HashMap::new();
        fields.insert("inscriptionId".to_string(), "abcdi0".to_string());
        fields.insert("inscriptionNumber".to_string(), "9".to_string());
        fields.insert("error".to_string(), "sat 1000 reports no inscriptions".to_string());
        fields.insert("timestamp".to_string(), "1700000000000".to_string());
        fields.insert("workerId".to_string(), "worker-1".to_string());

        let record = parse_error_record(&fields).unwrap();
        assert_eq!(record.inscription_id, "abcdi0");
        assert_eq!(record.inscription_number, 9);
        assert_eq!(record.timestamp, 1_700_000_000_000);
        assert_eq!(record.worker_id, "worker-1");
    }

    #[test]
    fn incomplete_error_records_are_dropped() {
        let mut fields = HashMap::new();
        fields.insert("inscriptionId".to_string(), "abcdi0".to_string());
        assert_eq!(parse_error_record(&fields), None);

        fields.insert("inscriptionNumber".to_string(), "not a number".to_string());
        fields.insert("error".to_string(), "boom".to_string());
        fields.insert("timestamp".to_string(), "0".to_string());
        fields.insert("workerId".to_string(), "worker-1".to_string());
        assert_eq!(parse_error_record(&fields), None);
    }

    fn live_claim(worker_id: &str, start: u64, end_inscription: u64) -> BatchClaim {
        BatchClaim {
            start,
            end_inscription,
            worker_id: worker_id.to_string(),
            claimed_at: 0,
        }
    }

    fn overlaps(interval: (u64, u64), claim: &BatchClaim) -> bool {
        interval.0 <= claim.end_inscription && interval.1 >= claim.start
    }

    #[test]
    fn two_workers_claim_disjoint_intervals() {
        let first = next_free_interval(0, 100, &[], "worker-a").unwrap();
        assert_eq!(first, (1, 100));

        let live = vec![live_claim("worker-a", first.0, first.1)];
        let second = next_free_interval(0, 100, &live, "worker-b").unwrap();
        assert_eq!(second, (101, 200));
        assert!(!overlaps(second, &live[0]));
    }

    #[test]
    fn reclaiming_replaces_the_callers_own_interval() {
        let live = vec![live_claim("worker-a", 1, 100)];
        assert_eq!(next_free_interval(0, 100, &live, "worker-a"), Some((1, 100)));
    }

    #[test]
    fn probing_walks_past_every_live_collision() {
        let live = vec![
            live_claim("worker-a", 1, 100),
            live_claim("worker-b", 150, 249),
        ];
        let interval = next_free_interval(0, 100, &live, "worker-c").unwrap();
        assert_eq!(interval, (301, 400));
        for claim in live.iter() {
            assert!(!overlaps(interval, claim));
        }
    }

    #[test]
    fn unset_cursor_starts_at_the_configured_origin() {
        assert_eq!(next_free_interval(-1, 100, &[], "worker-a"), Some((0, 99)));
    }

    #[test]
    fn saturated_claim_space_yields_no_batch() {
        let live: Vec<BatchClaim> = (0..10)
            .map(|i| live_claim(&format!("worker-{i}"), i * 100 + 1, (i + 1) * 100))
            .collect();
        assert_eq!(next_free_interval(0, 100, &live, "worker-x"), None);
    }

    #[test]
    fn claim_payloads_decode_from_script_encoding() {
        let payload = r#"{"start":1,"endInscription":100,"workerId":"worker-1","claimedAt":1700000000000}"#;
        let claim: BatchClaim = serde_json::from_str(payload).unwrap();
        assert_eq!(claim.start, 1);
        assert_eq!(claim.end_inscription, 100);
    }
}
