//! Status classification and the retry/backoff policy.
//!
//! Transient failures get exponential backoff; 429s get their own wait,
//! honouring `Retry-After`. Both draw from one wall-clock budget per request.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use grcsync_core::remote::SourceError;
use reqwest::{StatusCode, header::HeaderMap};

use crate::config::SourceConfig;

// ─── Classification ──────────────────────────────────────────────────────────

/// Map a non-success HTTP status to the source error taxonomy.
pub fn classify_status(
  status: StatusCode,
  headers: &HeaderMap,
  body: String,
  resource: &str,
  default_retry_after: u64,
) -> SourceError {
  match status.as_u16() {
    401 | 403 => SourceError::AuthFailed { status: status.as_u16() },
    404 => SourceError::NotFound { resource: resource.to_owned() },
    409 => SourceError::Conflict { message: body },
    429 => SourceError::RateLimited {
      retry_after_secs: parse_retry_after(headers, default_retry_after),
    },
    408 => SourceError::Timeout,
    s if s >= 500 => SourceError::ServerError { status: s, message: body },
    s => SourceError::Rejected { status: s, message: body },
  }
}

/// Map a transport-level failure.
pub fn classify_transport(err: &reqwest::Error) -> SourceError {
  if err.is_timeout() {
    SourceError::Timeout
  } else if err.is_decode() {
    SourceError::invalid(err.to_string())
  } else {
    SourceError::ConnectionFailed { message: err.to_string() }
  }
}

/// Parse the `Retry-After` header, given either as delta-seconds or as an
/// HTTP date, falling back to `default_secs` if absent or unparseable.
pub fn parse_retry_after(headers: &HeaderMap, default_secs: u64) -> u64 {
  let Some(value) = headers
    .get(reqwest::header::RETRY_AFTER)
    .and_then(|v| v.to_str().ok())
    .map(str::trim)
  else {
    return default_secs;
  };

  if let Ok(secs) = value.parse::<u64>() {
    return secs;
  }
  DateTime::parse_from_rfc2822(value)
    .ok()
    .map(|at| {
      let delta = at.with_timezone(&Utc) - Utc::now();
      u64::try_from(delta.num_seconds()).unwrap_or(0)
    })
    .unwrap_or(default_secs)
}

// ─── Policy ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
  pub max_attempts:         u32,
  pub initial_backoff:      Duration,
  pub max_backoff:          Duration,
  pub max_rate_limit_waits: u32,
  pub max_elapsed:          Duration,
}

impl RetryPolicy {
  pub fn from_config(config: &SourceConfig) -> Self {
    Self {
      max_attempts:         config.max_attempts.max(1),
      initial_backoff:      Duration::from_millis(config.initial_backoff_ms),
      max_backoff:          Duration::from_millis(config.max_backoff_ms),
      max_rate_limit_waits: config.max_rate_limit_waits,
      max_elapsed:          Duration::from_secs(config.max_retry_elapsed_secs),
    }
  }

  /// Delay before the retry that follows failed attempt number `attempt`
  /// (1-based): `initial * 2^(attempt - 1)`, capped at `max_backoff`.
  pub fn backoff(&self, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    self.initial_backoff.saturating_mul(factor).min(self.max_backoff)
  }

  pub fn start(&self) -> RetryState {
    RetryState {
      policy:           *self,
      failed_attempts:  0,
      rate_limit_waits: 0,
      waited:           Duration::ZERO,
      started:          Instant::now(),
    }
  }
}

/// Bookkeeping for one logical request across its attempts.
#[derive(Debug)]
pub struct RetryState {
  policy:           RetryPolicy,
  failed_attempts:  u32,
  rate_limit_waits: u32,
  waited:           Duration,
  started:          Instant,
}

impl RetryState {
  /// How long to wait before trying again after `err`, or `None` if the
  /// error is terminal or the budget is spent.
  pub fn next_delay(&mut self, err: &SourceError) -> Option<Duration> {
    let delay = match err {
      SourceError::RateLimited { retry_after_secs } => {
        self.rate_limit_waits += 1;
        if self.rate_limit_waits > self.policy.max_rate_limit_waits {
          return None;
        }
        Duration::from_secs(*retry_after_secs)
      }
      e if e.is_transient() => {
        self.failed_attempts += 1;
        if self.failed_attempts >= self.policy.max_attempts {
          return None;
        }
        self.policy.backoff(self.failed_attempts)
      }
      _ => return None,
    };

    if self.waited + delay > self.policy.max_elapsed {
      return None;
    }
    self.waited += delay;
    Some(delay)
  }

  pub fn elapsed(&self) -> Duration { self.started.elapsed() }
}
