//! Notification engine: rule matching, dedup, rate limiting
//! and retry-with-backoff dispatch over the configured transports.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use chrono_tz::Tz;
use parking_lot::Mutex;
use tracing::{info, warn};

use crab_core::model::{CurrentState, Event, JobRegistration, NotificationRule, Severity, StatusDelta, TransportResult};
use crab_store::JobStore;

use crate::formatter::format_alert;
use crate::transport::Transport;

#[derive(Debug, Clone)]
pub struct NotifyConfig {
    pub cooldown: Duration,
    pub rate_limit_capacity: f64,
    pub rate_limit_window: Duration,
    pub backlog_cap: usize,
    pub retry_max_attempts: u32,
    pub retry_base_delay: Duration,
    pub timezone: Tz,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(3600),
            rate_limit_capacity: 10.0,
            rate_limit_window: Duration::from_secs(300),
            backlog_cap: 1000,
            retry_max_attempts: 5,
            retry_base_delay: Duration::from_secs(2),
            timezone: chrono_tz::UTC,
        }
    }
}

struct DedupEntry {
    state: CurrentState,
    last_alert_at: Instant,
}

struct TokenBucket {
    tokens: f64,
    capacity: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: f64, window: Duration) -> Self {
        Self {
            tokens: capacity,
            capacity,
            refill_per_sec: capacity / window.as_secs_f64().max(1.0),
            last_refill: Instant::now(),
        }
    }

    fn try_take(&mut self) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[derive(Clone)]
struct PendingAlert {
    rule: NotificationRule,
    job: JobRegistration,
    delta: StatusDelta,
    recent_events: Vec<Event>,
}

pub struct NotificationEngine {
    store: Arc<dyn JobStore>,
    transports: HashMap<String, Arc<dyn Transport>>,
    config: NotifyConfig,
    dedup: Mutex<HashMap<(i64, i64), DedupEntry>>,
    buckets: Mutex<HashMap<i64, TokenBucket>>,
    backlog: Mutex<VecDeque<PendingAlert>>,
    dropped_count: Mutex<u64>,
}

impl NotificationEngine {
    pub fn new(
        store: Arc<dyn JobStore>,
        transports: HashMap<String, Arc<dyn Transport>>,
        config: NotifyConfig,
    ) -> Self {
        Self {
            store,
            transports,
            config,
            dedup: Mutex::new(HashMap::new()),
            buckets: Mutex::new(HashMap::new()),
            backlog: Mutex::new(VecDeque::new()),
            dropped_count: Mutex::new(0),
        }
    }

    /// How many alerts have been dropped after the backlog filled up.
    pub fn dropped_count(&self) -> u64 {
        *self.dropped_count.lock()
    }

    /// Evaluate the full rule set against one status delta. Matched,
    /// non-deduplicated rules are either dispatched immediately or
    /// queued on the bounded backlog.
    pub async fn handle_delta(
        &self,
        delta: StatusDelta,
        job: JobRegistration,
        recent_events: Vec<Event>,
    ) {
        let rules = match self.store.get_notifications().await {
            Ok(rules) => rules,
            Err(e) => {
                warn!(error = %e, "could not load notification rules");
                return;
            }
        };

        let severity = Severity::from_state(delta.new_state).max(Severity::from_kind(delta.trigger_event.kind));

        for rule in rules {
            if !rule.matches_job(&job) {
                continue;
            }
            if delta.new_state == CurrentState::Ok && rule.skip_ok {
                continue;
            }
            if severity < rule.min_severity {
                continue;
            }
            if self.is_deduplicated(&rule, job.job_ref.0, delta.new_state) {
                continue;
            }
            self.mark_alerted(rule.id, job.job_ref.0, delta.new_state);

            let pending = PendingAlert {
                rule: rule.clone(),
                job: job.clone(),
                delta: delta.clone(),
                recent_events: recent_events.clone(),
            };
            if self.try_take_token(rule.id) {
                self.dispatch(pending).await;
            } else {
                self.enqueue(pending);
            }
        }
    }

    /// Drain as much of the backlog as the current token budget allows.
    /// Intended to be called on the monitor's tick cadence.
    pub async fn drain_backlog(&self) {
        loop {
            let next = {
                let mut backlog = self.backlog.lock();
                match backlog.front() {
                    Some(item) if self.try_take_token(item.rule.id) => backlog.pop_front(),
                    _ => None,
                }
            };
            match next {
                Some(pending) => self.dispatch(pending).await,
                None => break,
            }
        }
    }

    fn is_deduplicated(&self, rule: &NotificationRule, job_id: i64, state: CurrentState) -> bool {
        let cooldown = rule.cooldown_secs.map(Duration::from_secs).unwrap_or(self.config.cooldown);
        let dedup = self.dedup.lock();
        match dedup.get(&(rule.id, job_id)) {
            Some(entry) if entry.state == state => entry.last_alert_at.elapsed() < cooldown,
            _ => false,
        }
    }

    fn mark_alerted(&self, rule_id: i64, job_id: i64, state: CurrentState) {
        self.dedup.lock().insert(
            (rule_id, job_id),
            DedupEntry {
                state,
                last_alert_at: Instant::now(),
            },
        );
    }

    fn try_take_token(&self, rule_id: i64) -> bool {
        let mut buckets = self.buckets.lock();
        buckets
            .entry(rule_id)
            .or_insert_with(|| TokenBucket::new(self.config.rate_limit_capacity, self.config.rate_limit_window))
            .try_take()
    }

    fn enqueue(&self, pending: PendingAlert) {
        let mut backlog = self.backlog.lock();
        if backlog.len() >= self.config.backlog_cap {
            *self.dropped_count.lock() += 1;
            warn!(rule_id = pending.rule.id, "notification backlog full, dropping alert");
            return;
        }
        backlog.push_back(pending);
    }

    async fn dispatch(&self, pending: PendingAlert) {
        let PendingAlert { rule, job, delta, recent_events } = pending;
        let (subject, body) = format_alert(&delta, &job, &recent_events, self.config.timezone, rule.include_output);

        let Some(transport) = self.transports.get(&rule.transport).cloned() else {
            warn!(transport = %rule.transport, "no transport registered for this name");
            return;
        };

        let store = self.store.clone();
        let addresses = rule.address.clone();
        let max_attempts = self.config.retry_max_attempts;
        let base_delay = self.config.retry_base_delay;
        let rule_id = rule.id;
        let job_ref = job.job_ref;
        let event_id = delta.trigger_event.id;

        tokio::spawn(async move {
            for address in &addresses {
                let mut attempts = 0u32;
                let result = loop {
                    attempts += 1;
                    match transport.dispatch(address, &subject, &body).await {
                        Ok(()) => break TransportResult::Success,
                        Err(e) if attempts < max_attempts => {
                            let delay = base_delay * 2u32.saturating_pow(attempts - 1);
                            warn!(error = %e, attempts, "notification dispatch failed, retrying");
                            tokio::time::sleep(delay).await;
                            continue;
                        }
                        Err(e) => {
                            break TransportResult::Failed {
                                message: e.to_string(),
                                attempts,
                            }
                        }
                    }
                };
                let is_success = matches!(result, TransportResult::Success);
                if let Err(e) = store.record_alert(rule_id, job_ref, event_id, Utc::now(), result).await {
                    warn!(error = %e, "could not record alert outcome");
                }
                if is_success {
                    info!(rule_id, job = %job_ref, "alert dispatched");
                }
            }
        });
    }
}
