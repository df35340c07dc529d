/// Sandbox Pool - Pre-warmed, Single-use Sandboxes
///
/// **Lifecycle of one sandbox:**
/// Provisioning → Ready (queued) → InUse (leased) → Destroying
///
/// **Guarantees:**
/// - A leased sandbox is never returned to the Ready queue. Releasing it
///   destroys it and schedules a fresh replacement, so nothing left behind by
///   one untrusted run is visible to the next
/// - `|Ready| + |InUse| + |Provisioning|` never exceeds capacity and converges
///   back to it after every release
/// - Provisioning retries forever with a fixed backoff; callers feel pressure
///   only through `acquire`'s bounded wait
/// - `acquire` is the only blocking point. Exhaustion becomes a fast
///   `ResourceExhausted` instead of an unbounded queue of requests
use crate::error::ExecutionError;
use crate::runtime::SandboxRuntime;
use glimpse_common::config::PoolSettings;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxState {
    Provisioning,
    Ready,
    InUse,
    Destroying,
}

#[derive(Debug)]
pub struct Sandbox {
    id: String,
    state: SandboxState,
}

impl Sandbox {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SandboxState {
        self.state
    }
}

/// Point-in-time pool counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub capacity: usize,
    pub ready: usize,
    pub in_use: usize,
    pub provisioning: usize,
}

impl PoolStats {
    pub fn total(&self) -> usize {
        self.ready + self.in_use + self.provisioning
    }
}

struct PoolInner {
    runtime: Arc<dyn SandboxRuntime>,
    settings: PoolSettings,
    /// Ready queue. `in_use` and `provisioning` are only changed while this
    /// lock is held so stats snapshots are consistent.
    ready: Mutex<VecDeque<Sandbox>>,
    /// One permit per sandbox in `ready`
    available: Semaphore,
    /// Bounds concurrent provisioning workers to capacity
    workers: Semaphore,
    in_use: AtomicUsize,
    provisioning: AtomicUsize,
    shut_down: AtomicBool,
}

impl PoolInner {
    fn lock_ready(&self) -> MutexGuard<'_, VecDeque<Sandbox>> {
        self.ready.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Spawn one provisioning worker. Caller has already counted it in
    /// `provisioning`.
    fn spawn_provision(self: &Arc<Self>) {
        let inner = Arc::clone(self);
        tokio::spawn(async move { inner.provision().await });
    }

    async fn provision(self: Arc<Self>) {
        let _worker = match self.workers.acquire().await {
            Ok(permit) => permit,
            Err(_) => {
                self.provisioning.fetch_sub(1, Ordering::SeqCst);
                return;
            }
        };

        let mut attempt: u32 = 0;
        loop {
            if self.is_shut_down() {
                self.provisioning.fetch_sub(1, Ordering::SeqCst);
                return;
            }

            attempt += 1;
            match self.runtime.create().await {
                Ok(id) => {
                    // shutdown drains under this lock, so checking here cannot
                    // strand a sandbox in the queue
                    let orphan = {
                        let mut ready = self.lock_ready();
                        self.provisioning.fetch_sub(1, Ordering::SeqCst);
                        if self.is_shut_down() {
                            Some(id)
                        } else {
                            info!(sandbox_id = %id, attempt = attempt, "Provisioned sandbox");
                            ready.push_back(Sandbox {
                                id,
                                state: SandboxState::Ready,
                            });
                            None
                        }
                    };

                    match orphan {
                        Some(id) => {
                            debug!(sandbox_id = %id, "Pool shut down during provisioning, destroying");
                            self.destroy(&id).await;
                        }
                        None => self.available.add_permits(1),
                    }
                    return;
                }
                Err(e) => {
                    warn!(
                        attempt = attempt,
                        backoff_ms = self.settings.provision_backoff.as_millis() as u64,
                        error = %format!("{:#}", e),
                        "Failed to provision sandbox, retrying"
                    );
                    tokio::time::sleep(self.settings.provision_backoff).await;
                }
            }
        }
    }

    async fn destroy(&self, sandbox_id: &str) {
        match self.runtime.destroy(sandbox_id).await {
            Ok(()) => debug!(sandbox_id = sandbox_id, "Destroyed sandbox"),
            Err(e) => warn!(
                sandbox_id = sandbox_id,
                error = %format!("{:#}", e),
                "Failed to destroy sandbox"
            ),
        }
    }

    /// Destroy a leased sandbox and schedule its replacement
    fn release(self: &Arc<Self>, mut sandbox: Sandbox) {
        sandbox.state = SandboxState::Destroying;

        let replace = {
            let _ready = self.lock_ready();
            self.in_use.fetch_sub(1, Ordering::SeqCst);
            let replace = !self.is_shut_down();
            if replace {
                self.provisioning.fetch_add(1, Ordering::SeqCst);
            }
            replace
        };

        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                error!(sandbox_id = %sandbox.id, "Sandbox released outside a runtime, it was not destroyed");
                if replace {
                    self.provisioning.fetch_sub(1, Ordering::SeqCst);
                }
                return;
            }
        };

        let inner = Arc::clone(self);
        handle.spawn(async move {
            inner.destroy(&sandbox.id).await;
            if replace {
                inner.provision().await;
            }
        });
    }
}

/// Exclusive use of one sandbox for the duration of one request.
///
/// Dropping the lease releases the sandbox (destroy + replacement) exactly
/// once, on every exit path including panics and cancelled futures.
pub struct SandboxLease {
    sandbox: Option<Sandbox>,
    pool: Arc<PoolInner>,
}

impl SandboxLease {
    pub fn id(&self) -> &str {
        self.sandbox.as_ref().map(|s| s.id.as_str()).unwrap_or_default()
    }

    pub fn state(&self) -> SandboxState {
        self.sandbox
            .as_ref()
            .map(|s| s.state)
            .unwrap_or(SandboxState::Destroying)
    }

    /// Destroy the sandbox and schedule a replacement
    pub fn release(self) {
        drop(self)
    }
}

impl Drop for SandboxLease {
    fn drop(&mut self) {
        if let Some(sandbox) = self.sandbox.take() {
            debug!(sandbox_id = %sandbox.id, "Releasing sandbox");
            self.pool.release(sandbox);
        }
    }
}

/// Fixed-capacity pool of pre-warmed sandboxes.
///
/// Constructed explicitly at startup and shut down explicitly; cheap to
/// clone (shared state behind an `Arc`).
#[derive(Clone)]
pub struct SandboxPool {
    inner: Arc<PoolInner>,
}

impl SandboxPool {
    pub fn new(runtime: Arc<dyn SandboxRuntime>, settings: PoolSettings) -> Self {
        let capacity = settings.capacity;
        Self {
            inner: Arc::new(PoolInner {
                runtime,
                settings,
                ready: Mutex::new(VecDeque::with_capacity(capacity)),
                available: Semaphore::new(0),
                workers: Semaphore::new(capacity),
                in_use: AtomicUsize::new(0),
                provisioning: AtomicUsize::new(0),
                shut_down: AtomicBool::new(false),
            }),
        }
    }

    pub fn runtime(&self) -> &Arc<dyn SandboxRuntime> {
        &self.inner.runtime
    }

    pub fn capacity(&self) -> usize {
        self.inner.settings.capacity
    }

    /// Start provisioning until the pool is back at capacity.
    ///
    /// Idempotent: a pool that is full (counting sandboxes in use or still
    /// provisioning) spawns nothing.
    pub fn warm_up(&self) {
        if self.inner.is_shut_down() {
            return;
        }

        let deficit = {
            let ready = self.inner.lock_ready();
            let total = ready.len()
                + self.inner.in_use.load(Ordering::SeqCst)
                + self.inner.provisioning.load(Ordering::SeqCst);
            let deficit = self.capacity().saturating_sub(total);
            self.inner.provisioning.fetch_add(deficit, Ordering::SeqCst);
            deficit
        };

        if deficit == 0 {
            debug!(capacity = self.capacity(), "Pool already at capacity");
            return;
        }

        info!(capacity = self.capacity(), spawning = deficit, "Warming up sandbox pool");
        for _ in 0..deficit {
            self.inner.spawn_provision();
        }
    }

    /// Take a Ready sandbox, waiting at most the configured acquire timeout
    pub async fn acquire(&self) -> Result<SandboxLease, ExecutionError> {
        let wait = self.inner.settings.acquire_timeout;
        let start = Instant::now();

        let permit = match tokio::time::timeout(wait, self.inner.available.acquire()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_closed)) => {
                warn!("Acquire on a pool that has been shut down");
                return Err(ExecutionError::ResourceExhausted {
                    waited: start.elapsed(),
                });
            }
            Err(_) => {
                warn!(
                    waited_ms = wait.as_millis() as u64,
                    stats = ?self.stats(),
                    "No sandbox available"
                );
                return Err(ExecutionError::ResourceExhausted { waited: wait });
            }
        };
        permit.forget();
        self.take_ready(start)
    }

    /// Pop the sandbox a consumed `available` permit stands for
    fn take_ready(&self, start: Instant) -> Result<SandboxLease, ExecutionError> {
        let sandbox = {
            let mut ready = self.inner.lock_ready();
            let sandbox = ready.pop_front();
            if sandbox.is_some() {
                self.inner.in_use.fetch_add(1, Ordering::SeqCst);
            }
            sandbox
        };

        let mut sandbox = match sandbox {
            Some(sandbox) => sandbox,
            // shutdown drained the queue after our permit was granted
            None if self.inner.is_shut_down() => {
                warn!("Acquire raced with pool shutdown");
                return Err(ExecutionError::ResourceExhausted {
                    waited: start.elapsed(),
                });
            }
            None => {
                return Err(ExecutionError::Infrastructure(anyhow::anyhow!(
                    "Ready queue empty despite an available permit"
                )))
            }
        };
        sandbox.state = SandboxState::InUse;

        debug!(
            sandbox_id = %sandbox.id,
            waited_ms = start.elapsed().as_millis() as u64,
            "Acquired sandbox"
        );

        Ok(SandboxLease {
            sandbox: Some(sandbox),
            pool: Arc::clone(&self.inner),
        })
    }

    /// Release a lease explicitly (same as dropping it)
    pub fn release(&self, lease: SandboxLease) {
        lease.release()
    }

    pub fn stats(&self) -> PoolStats {
        let ready = self.inner.lock_ready();
        PoolStats {
            capacity: self.capacity(),
            ready: ready.len(),
            in_use: self.inner.in_use.load(Ordering::SeqCst),
            provisioning: self.inner.provisioning.load(Ordering::SeqCst),
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.is_shut_down()
    }

    /// Destroy every Ready sandbox and stop replenishing.
    ///
    /// Does not wait for sandboxes that are in use or still provisioning;
    /// those are destroyed when released / when their creation completes.
    pub async fn shutdown(&self) {
        let drained: Vec<Sandbox> = {
            let mut ready = self.inner.lock_ready();
            self.inner.shut_down.store(true, Ordering::SeqCst);
            ready.drain(..).collect()
        };
        self.inner.available.close();
        self.inner.workers.close();

        let count = drained.len();
        let destroys = drained
            .iter()
            .map(|sandbox| self.inner.destroy(&sandbox.id));
        futures_util::future::join_all(destroys).await;

        info!(destroyed = count, "Sandbox pool shut down");
    }
}
