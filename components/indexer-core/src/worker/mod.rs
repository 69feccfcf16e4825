use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ciborium::value::Value;
use config::Config;
use rand::Rng;
use tokio::task::JoinSet;
use tokio::time::sleep;

use crate::cache::InscriptionCache;
use crate::classification::{classify, Classification};
use crate::provider::{ProviderClient, ProviderError};
use crate::resources::ResourceIdDeriver;
use crate::state::SharedState;
use crate::types::{
    BatchClaim, ErrorRecord, IdentityResource, InscriptionRecord, NonIdentityResource,
    CHUNK_DELAY_MS, ERROR_RETRY_DELAY_SECS,
};
use crate::utils::{now_millis, Context};
use crate::{try_debug, try_error, try_info, try_warn};

/// Aggregated result of one claimed batch.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BatchOutcome {
    pub ordinals_found: u64,
    pub non_ordinals_found: u64,
    pub failures: u64,
    pub first_missing: Option<u64>,
}

impl BatchOutcome {
    fn absorb(&mut self, number: u64, item: ItemOutcome) {
        match item {
            ItemOutcome::Identity => self.ordinals_found += 1,
            ItemOutcome::NonIdentity => self.non_ordinals_found += 1,
            ItemOutcome::NotFound => {
                self.failures += 1;
                self.first_missing = Some(self.first_missing.map_or(number, |m| m.min(number)));
            }
            ItemOutcome::Unavailable | ItemOutcome::Errored => self.failures += 1,
        }
    }
}

/// Only a true upstream "not found" may feed `first_missing`: a transport
/// failure counts against the batch but says nothing about the tip of the
/// stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ItemOutcome {
    Identity,
    NonIdentity,
    NotFound,
    Unavailable,
    Errored,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CursorDecision {
    pub cursor: i64,
    pub end_of_stream: bool,
}

/// Decides where the cursor lands after a batch. A mostly-missing batch
/// with an identified first missing number marks the tip of the stream:
/// the cursor stops right before it (never below `start - 1`). A
/// mostly-failing batch without one is treated as a persistent upstream
/// problem and skipped entirely rather than blocking forever.
pub fn resolve_cursor_advance(
    claim: &BatchClaim,
    outcome: &BatchOutcome,
    batch_size: u64,
    high_failure_threshold: f64,
) -> CursorDecision {
    let failure_ratio = outcome.failures as f64 / batch_size.max(1) as f64;
    if failure_ratio > high_failure_threshold {
        match outcome.first_missing {
            Some(first_missing) => CursorDecision {
                cursor: (claim.start as i64 - 1).max(first_missing as i64 - 1),
                end_of_stream: true,
            },
            None => CursorDecision {
                cursor: claim.end_inscription as i64,
                end_of_stream: true,
            },
        }
    } else {
        CursorDecision {
            cursor: claim.end_inscription as i64,
            end_of_stream: false,
        }
    }
}

pub fn generate_worker_id() -> String {
    let suffix: u32 = rand::thread_rng().gen_range(1000..10000);
    format!("worker-{}-{}-{}", std::process::id(), now_millis(), suffix)
}

enum TickOutcome {
    Processed,
    Backoff,
    NoBatch,
    Interrupted,
}

/// One indexing replica: claims non-overlapping batches of inscription
/// numbers, fetches and classifies them with bounded concurrency, persists
/// the results, and advances the shared cursor.
pub struct Worker {
    config: Config,
    worker_id: String,
    state: SharedState,
    provider: ProviderClient,
    deriver: ResourceIdDeriver,
    cache: Arc<InscriptionCache>,
    running: Arc<AtomicBool>,
    ctx: Context,
}

impl Worker {
    pub fn new(
        config: &Config,
        worker_id: String,
        state: SharedState,
        provider: ProviderClient,
        running: Arc<AtomicBool>,
        ctx: &Context,
    ) -> Worker {
        let cache = Arc::new(InscriptionCache::new(Duration::from_secs(
            config.cache.ttl_secs,
        )));
        let deriver = ResourceIdDeriver::new(
            provider.clone(),
            Arc::clone(&cache),
            config.network,
            ctx,
        );
        Worker {
            config: config.clone(),
            worker_id,
            state,
            provider,
            deriver,
            cache,
            running,
            ctx: ctx.clone(),
        }
    }

    pub async fn run(&self) -> Result<(), String> {
        try_info!(
            self.ctx,
            "Worker {} starting: batch size {}, concurrency {}",
            self.worker_id,
            self.config.workload.batch_size,
            self.config.workload.concurrent_processing
        );
        let sweeper = InscriptionCache::start_sweep(&self.cache, &self.ctx);
        while self.running.load(Ordering::SeqCst) {
            match self.tick().await {
                Ok(TickOutcome::Processed) => {}
                Ok(TickOutcome::NoBatch) | Ok(TickOutcome::Backoff) => {
                    self.pause(Duration::from_millis(self.config.workload.poll_interval_ms))
                        .await;
                }
                Ok(TickOutcome::Interrupted) => break,
                Err(e) => {
                    try_error!(self.ctx, "Worker {} iteration failed: {e}", self.worker_id);
                    self.pause(Duration::from_secs(ERROR_RETRY_DELAY_SECS)).await;
                }
            }
        }
        sweeper.abort();
        self.state.release_claim(&self.worker_id).await?;
        try_info!(self.ctx, "Worker {} stopped", self.worker_id);
        Ok(())
    }

    async fn tick(&self) -> Result<TickOutcome, String> {
        let default_start = self.config.workload.start_inscription as i64 - 1;
        let claim = match self
            .state
            .claim_next_batch(
                &self.worker_id,
                self.config.workload.batch_size,
                default_start,
            )
            .await?
        {
            Some(claim) => claim,
            None => {
                try_debug!(self.ctx, "No batch available for worker {}", self.worker_id);
                return Ok(TickOutcome::NoBatch);
            }
        };
        try_info!(
            self.ctx,
            "Worker {} claimed inscriptions #{} to #{}",
            self.worker_id,
            claim.start,
            claim.end_inscription
        );

        let outcome = match self.process_batch(&claim).await? {
            Some(outcome) => outcome,
            // Shutdown mid-batch: leave the cursor alone, the claim TTL or
            // the release below hands the interval back.
            None => return Ok(TickOutcome::Interrupted),
        };
        let decision = resolve_cursor_advance(
            &claim,
            &outcome,
            self.config.workload.batch_size,
            self.config.workload.high_failure_threshold,
        );
        let cursor = self.state.complete_batch(decision.cursor, &self.ctx).await?;
        try_info!(
            self.ctx,
            "Worker {} finished #{}..#{}: {} identity, {} other, {} failures, cursor at {cursor}",
            self.worker_id,
            claim.start,
            claim.end_inscription,
            outcome.ordinals_found,
            outcome.non_ordinals_found,
            outcome.failures
        );
        if decision.end_of_stream {
            try_info!(self.ctx, "Reached the tip of the inscription stream, backing off");
            return Ok(TickOutcome::Backoff);
        }
        Ok(TickOutcome::Processed)
    }

    /// Processes the claimed interval in chunks of `concurrent_processing`
    /// items; all items of a chunk execute concurrently, chunks are
    /// separated by a short pause. Returns `None` when interrupted by
    /// shutdown between chunks.
    async fn process_batch(&self, claim: &BatchClaim) -> Result<Option<BatchOutcome>, String> {
        let mut outcome = BatchOutcome::default();
        let numbers: Vec<u64> = (claim.start..=claim.end_inscription).collect();
        let chunk_size = self.config.workload.concurrent_processing.max(1);
        let mut chunks = numbers.chunks(chunk_size).peekable();
        while let Some(chunk) = chunks.next() {
            if !self.running.load(Ordering::SeqCst) {
                return Ok(None);
            }
            let mut set = JoinSet::new();
            for number in chunk.iter().copied() {
                let provider = self.provider.clone();
                let deriver = self.deriver.clone();
                let state = self.state.clone();
                let worker_id = self.worker_id.clone();
                let ctx = self.ctx.clone();
                set.spawn(async move {
                    let item =
                        process_inscription(number, &provider, &deriver, &state, &worker_id, &ctx)
                            .await;
                    (number, item)
                });
            }
            while let Some(joined) = set.join_next().await {
                let (number, item) =
                    joined.map_err(|e| format!("inscription processing task failed: {e}"))?;
                outcome.absorb(number, item);
            }
            if chunks.peek().is_some() {
                sleep(Duration::from_millis(CHUNK_DELAY_MS)).await;
            }
        }
        Ok(Some(outcome))
    }

    /// Sleeps in short slices so a shutdown signal is honored promptly.
    async fn pause(&self, duration: Duration) {
        let slice = Duration::from_millis(250);
        let mut remaining = duration;
        while !remaining.is_zero() && self.running.load(Ordering::SeqCst) {
            let step = remaining.min(slice);
            sleep(step).await;
            remaining -= step;
        }
    }
}

async fn process_inscription(
    number: u64,
    provider: &ProviderClient,
    deriver: &ResourceIdDeriver,
    state: &SharedState,
    worker_id: &str,
    ctx: &Context,
) -> ItemOutcome {
    let record = match provider.inscription_by_number(number).await {
        Ok(record) => record,
        Err(ProviderError::NotFound) => return ItemOutcome::NotFound,
        Err(ProviderError::Transport(e)) => {
            try_warn!(ctx, "Inscription #{number} unavailable: {e}");
            return ItemOutcome::Unavailable;
        }
    };
    let metadata = match provider.metadata(&record.inscription_id).await {
        Ok(metadata) => metadata,
        Err(e) => {
            try_warn!(
                ctx,
                "Unable to fetch metadata for {}: {e}",
                record.inscription_id
            );
            None
        }
    };
    let resource_id = match deriver.derive(&record.inscription_id).await {
        Ok(resource_id) => resource_id,
        Err(e) => {
            report_error(state, &record, number, e, worker_id, ctx).await;
            return ItemOutcome::Errored;
        }
    };
    let indexed_at = now_millis();
    match classify(metadata.as_ref()) {
        Classification::Identity(identity_kind) => {
            let resource = IdentityResource {
                resource_id,
                inscription_id: record.inscription_id.clone(),
                inscription_number: record.inscription_number,
                identity_kind,
                content_type: record.content_type.clone(),
                metadata: metadata.unwrap_or(Value::Null),
                indexed_at,
            };
            match state.record_identity_resource(&resource).await {
                Ok(()) => ItemOutcome::Identity,
                Err(e) => {
                    report_error(state, &record, number, e, worker_id, ctx).await;
                    ItemOutcome::Errored
                }
            }
        }
        Classification::NonIdentity => {
            let resource = NonIdentityResource {
                resource_id,
                inscription_id: record.inscription_id.clone(),
                inscription_number: record.inscription_number,
                content_type: record.content_type.clone(),
                indexed_at,
            };
            match state.record_non_identity_resource(&resource).await {
                Ok(()) => ItemOutcome::NonIdentity,
                Err(e) => {
                    report_error(state, &record, number, e, worker_id, ctx).await;
                    ItemOutcome::Errored
                }
            }
        }
    }
}

async fn report_error(
    state: &SharedState,
    record: &InscriptionRecord,
    number: u64,
    error: String,
    worker_id: &str,
    ctx: &Context,
) {
    try_warn!(ctx, "Inscription #{number} failed: {error}");
    let record = ErrorRecord {
        inscription_id: record.inscription_id.clone(),
        inscription_number: number,
        error,
        timestamp: now_millis(),
        worker_id: worker_id.to_string(),
    };
    if let Err(e) = state.record_error(&record).await {
        try_error!(ctx, "Unable to record error for inscription #{number}: {e}");
    }
}

#[cfg(test)]
mod test {
    use test_case::test_case;

    use super::*;

    fn claim(start: u64, end_inscription: u64) -> BatchClaim {
        BatchClaim {
            start,
            end_inscription,
            worker_id: "worker-1".to_string(),
            claimed_at: 0,
        }
    }

    fn outcome(failures: u64, first_missing: Option<u64>) -> BatchOutcome {
        BatchOutcome {
            ordinals_found: 0,
            non_ordinals_found: 0,
            failures,
            first_missing,
        }
    }

    #[test_case(1, 100, 0, None => (100, false); "clean batch advances to end")]
    #[test_case(1, 100, 50, Some(51) => (100, false); "below threshold advances to end")]
    #[test_case(1001, 1100, 100, Some(1001) => (1000, true); "end of stream stops before first missing")]
    #[test_case(1001, 1100, 90, Some(1011) => (1010, true); "partial tail stops before first missing")]
    #[test_case(1001, 1100, 100, None => (1100, true); "persistent failures skip the batch")]
    #[test_case(0, 99, 100, Some(0) => (-1, true); "empty world does not advance past missing")]
    fn resolves_cursor_advances(
        start: u64,
        end_inscription: u64,
        failures: u64,
        first_missing: Option<u64>,
    ) -> (i64, bool) {
        let decision = resolve_cursor_advance(
            &claim(start, end_inscription),
            &outcome(failures, first_missing),
            100,
            0.8,
        );
        (decision.cursor, decision.end_of_stream)
    }

    #[test]
    fn cursor_never_lands_below_claim_start() {
        // A stray first_missing below the claimed interval cannot drag the
        // cursor backwards past start - 1.
        let decision = resolve_cursor_advance(&claim(1001, 1100), &outcome(100, Some(900)), 100, 0.8);
        assert_eq!(decision.cursor, 1000);
    }

    #[test]
    fn outcome_tracks_smallest_missing_number() {
        let mut outcome = BatchOutcome::default();
        outcome.absorb(7, ItemOutcome::Identity);
        outcome.absorb(9, ItemOutcome::NotFound);
        outcome.absorb(8, ItemOutcome::NotFound);
        outcome.absorb(10, ItemOutcome::NonIdentity);
        outcome.absorb(11, ItemOutcome::Errored);

        assert_eq!(outcome.ordinals_found, 1);
        assert_eq!(outcome.non_ordinals_found, 1);
        assert_eq!(outcome.failures, 3);
        assert_eq!(outcome.first_missing, Some(8));
    }

    #[test]
    fn transport_failures_do_not_mark_the_stream_tip() {
        let mut outcome = BatchOutcome::default();
        for number in 1..=100 {
            outcome.absorb(number, ItemOutcome::Unavailable);
        }
        assert_eq!(outcome.failures, 100);
        assert_eq!(outcome.first_missing, None);

        // An upstream blip across a whole batch skips it instead of
        // parking the cursor as if the stream tip had been reached.
        let decision = resolve_cursor_advance(&claim(1, 100), &outcome, 100, 0.8);
        assert_eq!(decision.cursor, 100);
        assert!(decision.end_of_stream);
    }

    #[test]
    fn generated_worker_ids_follow_the_expected_shape() {
        let id = generate_worker_id();
        let segments: Vec<&str> = id.split('-').collect();
        assert_eq!(segments.len(), 4);
        assert_eq!(segments[0], "worker");
        assert!(segments[1].parse::<u32>().is_ok());
        assert!(segments[2].parse::<u64>().is_ok());
        assert!(segments[3].parse::<u32>().is_ok());
    }
}
