//! Delivery client - sends `Send` decisions to the push relay
//!
//! Classification per attempt:
//! - 2xx → success
//! - 5xx or network failure → transient, retried with exponential backoff
//! - 4xx → permanent, no retry, token invalidated
//! - anything else → permanent, no retry
//!
//! The token is re-read before every attempt, so a retry never uses a token
//! older than the latest registration. If the store is cleared while a retry
//! is pending, the remaining attempts are abandoned.

use crate::domain::notification::MessageTemplate;
use crate::domain::types::{
    AttemptOutcome, DeliveryAttempt, DeliveryOutcome, DeliveryReport, DispatchDecision,
    FailureCause, PushToken,
};
use crate::infra::config::Config;
use crate::infra::observer::DispatchObserver;
use crate::io::relay::PushRelay;
use crate::services::token_store::TokenStore;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::warn;
use uuid::Uuid;

/// Exponential backoff schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base: Duration,
    pub cap: Duration,
    /// Total attempts, first one included
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { base: Duration::from_secs(1), cap: Duration::from_secs(30), max_attempts: 5 }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            base: Duration::from_millis(config.retry_base_ms()),
            cap: Duration::from_millis(config.retry_cap_ms()),
            max_attempts: config.retry_max_attempts().max(1),
        }
    }

    /// Delay to wait after failed attempt `attempt` (1-based):
    /// base, 2·base, 4·base, … capped at `cap`
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base.saturating_mul(1u32 << exponent).min(self.cap)
    }
}

/// How one relay answer is treated
enum Verdict {
    Success,
    Transient,
    Permanent(FailureCause),
}

fn classify_status(status: u16) -> Verdict {
    match status {
        200..=299 => Verdict::Success,
        400..=499 => Verdict::Permanent(FailureCause::Rejected(status)),
        500..=599 => Verdict::Transient,
        other => Verdict::Permanent(FailureCause::UnexpectedStatus(other)),
    }
}

pub struct DeliveryClient {
    relay: Arc<dyn PushRelay>,
    tokens: Arc<TokenStore>,
    template: MessageTemplate,
    retry: RetryPolicy,
    observer: Arc<dyn DispatchObserver>,
}

impl DeliveryClient {
    pub fn new(
        relay: Arc<dyn PushRelay>,
        tokens: Arc<TokenStore>,
        template: MessageTemplate,
        retry: RetryPolicy,
        observer: Arc<dyn DispatchObserver>,
    ) -> Self {
        Self { relay, tokens, template, retry, observer }
    }

    /// Run one delivery to completion. Never panics and never returns an
    /// error: every failure ends up in the report and the observer.
    pub async fn deliver(&self, decision: DispatchDecision) -> DeliveryReport {
        let dispatch_id = Uuid::now_v7();
        let start = Instant::now();
        let mut attempts = Vec::new();

        if !decision.is_send() {
            warn!(
                region = %decision.event.region_identifier,
                reason = %decision.reason.as_str(),
                "delivery_called_for_skip"
            );
            return self.finish(dispatch_id, &decision, DeliveryOutcome::Abandoned, attempts, start);
        }

        self.observer.delivery_started(dispatch_id, &decision);
        let mut token_rx = self.tokens.subscribe();

        let event = &decision.event;
        let mut attempt_number = 0;

        let outcome = loop {
            attempt_number += 1;

            let Some(token) = self.tokens.current() else {
                break DeliveryOutcome::Abandoned;
            };

            let message = self.template.render(&token.value, &event.region_identifier, event.kind);
            let (verdict, status, error) = match self.relay.send(&message).await {
                Ok(response) => {
                    let verdict = classify_status(response.status);
                    let error = match verdict {
                        Verdict::Success => None,
                        _ => Some(response.body),
                    };
                    (verdict, Some(response.status), error)
                }
                Err(e) => {
                    let verdict = if e.is_transient() {
                        Verdict::Transient
                    } else {
                        Verdict::Permanent(FailureCause::InvalidMessage)
                    };
                    (verdict, None, Some(e.to_string()))
                }
            };

            let attempt_outcome = match verdict {
                Verdict::Success => AttemptOutcome::Success,
                Verdict::Transient => AttemptOutcome::TransientFailure,
                Verdict::Permanent(_) => AttemptOutcome::PermanentFailure,
            };
            let attempt = DeliveryAttempt { attempt_number, outcome: attempt_outcome, status, error };

            match verdict {
                Verdict::Success => {
                    attempts.push(attempt);
                    break DeliveryOutcome::Success;
                }
                Verdict::Permanent(cause) => {
                    self.observer.attempt_failed(dispatch_id, &attempt, None);
                    attempts.push(attempt);
                    if matches!(cause, FailureCause::Rejected(_))
                        && self.tokens.invalidate_if(&token.value)
                    {
                        self.observer.token_invalidated(dispatch_id);
                    }
                    break DeliveryOutcome::PermanentFailure(cause);
                }
                Verdict::Transient if attempt_number >= self.retry.max_attempts => {
                    self.observer.attempt_failed(dispatch_id, &attempt, None);
                    attempts.push(attempt);
                    break DeliveryOutcome::PermanentFailure(FailureCause::RetriesExhausted);
                }
                Verdict::Transient => {
                    let delay = self.retry.delay_after(attempt_number);
                    self.observer.attempt_failed(dispatch_id, &attempt, Some(delay));
                    attempts.push(attempt);

                    if !wait_unless_cleared(delay, &mut token_rx).await {
                        break DeliveryOutcome::Abandoned;
                    }
                }
            }
        };

        self.finish(dispatch_id, &decision, outcome, attempts, start)
    }

    fn finish(
        &self,
        dispatch_id: Uuid,
        decision: &DispatchDecision,
        outcome: DeliveryOutcome,
        attempts: Vec<DeliveryAttempt>,
        start: Instant,
    ) -> DeliveryReport {
        let report = DeliveryReport {
            dispatch_id,
            region_identifier: decision.event.region_identifier.clone(),
            kind: decision.event.kind,
            outcome,
            attempts,
            elapsed_ms: start.elapsed().as_millis() as u64,
        };
        if decision.is_send() {
            self.observer.delivery_finished(&report);
        }
        report
    }
}

/// Sleep for `delay` unless the token store is cleared first.
/// Returns false when the delivery should be abandoned.
async fn wait_unless_cleared(
    delay: Duration,
    token_rx: &mut watch::Receiver<Option<PushToken>>,
) -> bool {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            _ = &mut sleep => return true,
            changed = token_rx.changed() => {
                if changed.is_err() {
                    // Store dropped; nothing left to observe
                    (&mut sleep).await;
                    return true;
                }
                let cleared = token_rx.borrow_and_update().is_none();
                if cleared {
                    return false;
                }
            }
        }
    }
}
