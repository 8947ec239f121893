//! Generic bounded worker pool driven by a fixed tick.
//!
//! Each tick reaps finished workers, then fills free slots from the work
//! source while intake is running. The loop never waits on a worker.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::error::Elapsed;
use tracing::{debug, error, info, warn};

use super::{Completion, DaemonConfig, RunState, WorkSource};
use crate::metrics;
use crate::notify::{Notification, Notifier};

struct ActiveWorker<S: WorkSource> {
    item: S::Item,
    started: Instant,
    handle: JoinHandle<Result<S::Outcome, Elapsed>>,
}

struct Pool<S: WorkSource> {
    workers: HashMap<String, ActiveWorker<S>>,
    last_refill: Option<Instant>,
}

struct DaemonCore<S: WorkSource> {
    config: DaemonConfig,
    source: Arc<S>,
    notifier: Notifier,
    intake: AtomicBool,
    pool: Mutex<Pool<S>>,
    run_state: RwLock<RunState>,
}

impl<S: WorkSource> DaemonCore<S> {
    async fn tick(&self) {
        let mut pool = self.pool.lock().await;
        self.reap(&mut pool).await;
        if self.intake.load(Ordering::Acquire) {
            self.refill(&mut pool).await;
        }
        let active = pool.workers.len();
        drop(pool);

        self.refresh_run_state(active).await;
    }

    async fn reap(&self, pool: &mut Pool<S>) {
        let finished: Vec<String> = pool
            .workers
            .iter()
            .filter(|(_, worker)| worker.handle.is_finished())
            .map(|(key, _)| key.clone())
            .collect();

        for key in finished {
            let Some(worker) = pool.workers.remove(&key) else {
                continue;
            };
            let completion = match worker.handle.await {
                Ok(Ok(outcome)) => Completion::Finished(outcome),
                Ok(Err(_)) => {
                    warn!(daemon = %self.config.name, key = %key, "Worker exceeded its budget");
                    Completion::TimedOut
                }
                Err(e) => {
                    error!(daemon = %self.config.name, key = %key, error = %e, "Worker panicked");
                    Completion::Panicked(e.to_string())
                }
            };
            debug!(
                daemon = %self.config.name,
                key = %key,
                elapsed_ms = worker.started.elapsed().as_millis() as u64,
                "Worker finished"
            );
            self.source.complete(worker.item, completion).await;
        }
    }

    async fn refill(&self, pool: &mut Pool<S>) {
        let free = self.config.max_parallel.saturating_sub(pool.workers.len());
        if free == 0 {
            return;
        }
        if let Some(last) = pool.last_refill {
            if last.elapsed() < self.config.refill_delay {
                return;
            }
        }
        pool.last_refill = Some(Instant::now());

        let active: HashSet<String> = pool.workers.keys().cloned().collect();
        let items = self.source.claim(free, &active).await;
        if items.len() > free {
            // Should not happen; extra claims would be left unsettled
            error!(
                daemon = %self.config.name,
                claimed = items.len(),
                free,
                "Work source over-claimed"
            );
        }

        for item in items {
            let key = S::key(&item);
            if pool.workers.contains_key(&key) {
                warn!(daemon = %self.config.name, key = %key, "Work source returned an active item");
                continue;
            }
            if pool.workers.len() >= self.config.max_parallel {
                // Hand back as a failure so the claim is settled
                self.source.complete(item, Completion::Panicked("pool full".to_string())).await;
                continue;
            }

            let source = Arc::clone(&self.source);
            let budget = self.config.worker_budget;
            let work = item.clone();
            let handle =
                tokio::spawn(async move { tokio::time::timeout(budget, source.run(work)).await });

            debug!(daemon = %self.config.name, key = %key, "Worker started");
            pool.workers.insert(
                key,
                ActiveWorker {
                    item,
                    started: Instant::now(),
                    handle,
                },
            );
        }
    }

    async fn refresh_run_state(&self, active: usize) {
        let running = self.intake.load(Ordering::Acquire);
        metrics::WORKERS_ACTIVE
            .with_label_values(&[self.config.name.as_str()])
            .set(active as i64);

        {
            let current = self.run_state.read().await;
            if current.active == active && current.running == running {
                return;
            }
        }

        let snapshot = RunState {
            daemon: self.config.name.clone(),
            running,
            active,
            max_parallel: self.config.max_parallel,
            queue_depth: self.source.queue_depth().await,
        };
        *self.run_state.write().await = snapshot.clone();
        self.notifier.publish(Notification::RunState(snapshot));
    }

    /// Wait for in-flight workers, settling each as it finishes.
    async fn drain(&self) {
        loop {
            let mut pool = self.pool.lock().await;
            self.reap(&mut pool).await;
            let remaining = pool.workers.len();
            drop(pool);
            self.refresh_run_state(remaining).await;

            if remaining == 0 {
                return;
            }
            debug!(daemon = %self.config.name, remaining, "Waiting for workers");
            tokio::time::sleep(self.config.tick).await;
        }
    }
}

/// Bounded pool of workers fed by a [`WorkSource`].
pub struct SchedulerDaemon<S: WorkSource> {
    core: Arc<DaemonCore<S>>,
    running: AtomicBool,
    shutdown_tx: broadcast::Sender<()>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl<S: WorkSource> SchedulerDaemon<S> {
    pub fn new(config: DaemonConfig, source: Arc<S>, notifier: Notifier) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let run_state = RunState {
            daemon: config.name.clone(),
            running: true,
            active: 0,
            max_parallel: config.max_parallel,
            queue_depth: 0,
        };

        Self {
            core: Arc::new(DaemonCore {
                config,
                source,
                notifier,
                intake: AtomicBool::new(true),
                pool: Mutex::new(Pool {
                    workers: HashMap::new(),
                    last_refill: None,
                }),
                run_state: RwLock::new(run_state),
            }),
            running: AtomicBool::new(false),
            shutdown_tx,
            loop_handle: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.core.config.name
    }

    pub fn source(&self) -> &Arc<S> {
        &self.core.source
    }

    /// Spawn the control loop.
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!(daemon = %self.name(), "Scheduler already running");
            return;
        }

        let core = Arc::clone(&self.core);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let handle = tokio::spawn(async move {
            info!(daemon = %core.config.name, "Scheduler loop started");
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!(daemon = %core.config.name, "Scheduler loop received shutdown signal");
                        break;
                    }
                    _ = tokio::time::sleep(core.config.tick) => {
                        core.tick().await;
                    }
                }
            }
            core.drain().await;
            info!(daemon = %core.config.name, "Scheduler loop stopped");
        });

        *self.loop_handle.lock().await = Some(handle);
    }

    /// Stop taking work, let in-flight workers finish, then return.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!(daemon = %self.name(), "Scheduler not running");
            return;
        }

        let _ = self.shutdown_tx.send(());
        if let Some(handle) = self.loop_handle.lock().await.take() {
            if let Err(e) = handle.await {
                error!(daemon = %self.name(), error = %e, "Scheduler loop ended abnormally");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run one control step. The spawned loop calls this on every tick.
    pub async fn tick(&self) {
        self.core.tick().await;
    }

    /// Stop admitting new workers. Active workers keep running.
    pub async fn pause_intake(&self) {
        if self.core.intake.swap(false, Ordering::AcqRel) {
            info!(daemon = %self.name(), "Intake paused");
        }
        let active = self.active_count().await;
        self.core.refresh_run_state(active).await;
    }

    pub async fn resume_intake(&self) {
        if !self.core.intake.swap(true, Ordering::AcqRel) {
            info!(daemon = %self.name(), "Intake resumed");
        }
        let active = self.active_count().await;
        self.core.refresh_run_state(active).await;
    }

    pub fn is_intake_running(&self) -> bool {
        self.core.intake.load(Ordering::Acquire)
    }

    pub async fn active_count(&self) -> usize {
        self.core.pool.lock().await.workers.len()
    }

    /// Last published run state with a fresh queue depth.
    pub async fn run_state(&self) -> RunState {
        let mut state = self.core.run_state.read().await.clone();
        state.queue_depth = self.core.source.queue_depth().await;
        state
    }
}
