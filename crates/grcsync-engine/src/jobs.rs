//! In-process registry of running jobs.
//!
//! A [`JobClaim`] reserves one or more scopes (a system id for pulls, the
//! actor for pushes) for the lifetime of a job and owns its cancellation
//! token. Dropping the claim releases the scopes, so a job that panics or
//! returns early never leaves its scope locked.

use std::{
  collections::HashMap,
  sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use grcsync_core::job::JobKind;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{Error, Result};

#[derive(Default)]
struct Registry {
  /// `(kind, scope)` → claim id.
  scopes: HashMap<(JobKind, String), Uuid>,
  /// job id → token, for claims attached to a persisted job.
  tokens: HashMap<Uuid, CancellationToken>,
}

#[derive(Default)]
pub struct JobRegistry {
  inner: Mutex<Registry>,
}

impl JobRegistry {
  fn lock(&self) -> MutexGuard<'_, Registry> {
    self.inner.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Reserve every scope in `scopes` for a `kind` job, or none of them.
  pub fn claim(self: &Arc<Self>, kind: JobKind, scopes: &[String]) -> Result<JobClaim> {
    let mut reg = self.lock();
    if let Some(busy) = scopes
      .iter()
      .find(|s| reg.scopes.contains_key(&(kind, (*s).clone())))
    {
      return Err(Error::JobAlreadyRunning { kind, scope: busy.clone() });
    }

    let claim_id = Uuid::new_v4();
    for scope in scopes {
      reg.scopes.insert((kind, scope.clone()), claim_id);
    }
    Ok(JobClaim {
      registry: Arc::clone(self),
      claim_id,
      kind,
      scopes: scopes.to_vec(),
      job_id: None,
      token: CancellationToken::new(),
    })
  }

  /// Signal cancellation to a running job. Returns `false` if this process
  /// is not running it.
  pub fn cancel(&self, job_id: Uuid) -> bool {
    match self.lock().tokens.get(&job_id) {
      Some(token) => {
        token.cancel();
        true
      }
      None => false,
    }
  }

  pub fn is_running(&self, job_id: Uuid) -> bool { self.lock().tokens.contains_key(&job_id) }
}

/// Exclusive hold on a set of job scopes. See the module docs.
pub struct JobClaim {
  registry: Arc<JobRegistry>,
  claim_id: Uuid,
  kind:     JobKind,
  scopes:   Vec<String>,
  job_id:   Option<Uuid>,
  token:    CancellationToken,
}

impl JobClaim {
  /// Bind the claim to its persisted job so it can be cancelled by id.
  pub fn attach(&mut self, job_id: Uuid) {
    self.job_id = Some(job_id);
    self.registry.lock().tokens.insert(job_id, self.token.clone());
  }

  pub fn token(&self) -> CancellationToken { self.token.clone() }
}

impl Drop for JobClaim {
  fn drop(&mut self) {
    let mut reg = self.registry.lock();
    for scope in self.scopes.drain(..) {
      let key = (self.kind, scope);
      // Only release scopes this claim still holds.
      if reg.scopes.get(&key) == Some(&self.claim_id) {
        reg.scopes.remove(&key);
      }
    }
    if let Some(job_id) = self.job_id {
      reg.tokens.remove(&job_id);
    }
  }
}
