//! Concurrent task executor
//!
//! Tasks start as soon as all of their dependencies have finished, up to
//! a concurrency limit. The first failure (or an outside cancellation)
//! stops new tasks from starting; tasks already running are allowed to
//! finish so their errors are reported too. After every task succeeds, deletions discovered by the
//! tasks are applied (Direct) or reported (DryRun), and the target writes
//! its output.

use std::collections::{BTreeMap, BTreeSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::context::RunContext;
use crate::error::{RunError, TaskError};
use crate::graph::TaskGraph;
use crate::key::TaskKey;
use crate::target::Target;
use crate::task::{Deletion, TaskOutcome};

/// Default number of tasks run at once
pub const DEFAULT_CONCURRENCY: usize = 10;

/// Result of a successful run
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    /// Outcome of every task
    pub outcomes: BTreeMap<TaskKey, TaskOutcome>,
    /// Deletions applied or reported, as `(task kind, item)`
    pub deletions: Vec<(String, String)>,
}

impl RunReport {
    /// Keys with a given outcome
    pub fn with_outcome(&self, outcome: TaskOutcome) -> Vec<&TaskKey> {
        self.outcomes
            .iter()
            .filter(|(_, o)| **o == outcome)
            .map(|(k, _)| k)
            .collect()
    }
}

/// Runs a compiled task graph
#[derive(Debug, Clone)]
pub struct Executor {
    concurrency: usize,
}

impl Default for Executor {
    fn default() -> Self {
        Self::new(DEFAULT_CONCURRENCY)
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl Executor {
    /// Create an executor running at most `concurrency` tasks at once
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
        }
    }

    /// Run every task in `graph`
    ///
    /// # Arguments
    ///
    /// * `ctx` - Run context; its task map must be the one the graph was built from
    /// * `graph` - Ordered dependency graph
    pub async fn run(&self, ctx: Arc<RunContext>, graph: &TaskGraph) -> Result<RunReport, RunError> {
        let order = graph.order();
        let total = order.len();
        let mut pending: BTreeMap<TaskKey, usize> = order
            .iter()
            .map(|k| (k.clone(), graph.dependencies_of(k).count()))
            .collect();
        let mut dependents: BTreeMap<TaskKey, Vec<TaskKey>> = BTreeMap::new();
        for key in order {
            for dep in graph.dependencies_of(key) {
                dependents.entry(dep.clone()).or_default().push(key.clone());
            }
        }
        let mut ready: BTreeSet<TaskKey> = pending
            .iter()
            .filter(|(_, n)| **n == 0)
            .map(|(k, _)| k.clone())
            .collect();
        pending.retain(|_, n| *n > 0);

        info!(tasks = total, backend = %ctx.target, concurrency = self.concurrency, "Running tasks");

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let stop = ctx.cancel.child_token();
        let mut running: JoinSet<(TaskKey, Result<TaskOutcome, TaskError>)> = JoinSet::new();
        let mut outcomes = BTreeMap::new();
        let mut failures: Vec<(TaskKey, TaskError)> = Vec::new();
        let mut started = 0usize;

        loop {
            while !stop.is_cancelled() {
                let Some(key) = ready.pop_first() else { break };
                let Some(task) = ctx.tasks.get(&key).cloned() else {
                    failures.push((key.clone(), TaskError::NotFound(format!("task {key}"))));
                    stop.cancel();
                    break;
                };
                let task_ctx = Arc::clone(&ctx);
                let semaphore = Arc::clone(&semaphore);
                let stop = stop.clone();
                running.spawn(async move {
                    let permit = tokio::select! {
                        biased;
                        () = stop.cancelled() => return (key, Err(TaskError::Cancelled)),
                        permit = semaphore.acquire_owned() => permit,
                    };
                    let Ok(_permit) = permit else {
                        return (key, Err(TaskError::Cancelled));
                    };
                    debug!(task = %key, "Starting task");
                    let result = AssertUnwindSafe(task.run(&task_ctx)).catch_unwind().await;
                    let result = match result {
                        Ok(result) => result,
                        Err(payload) => Err(TaskError::Panicked(panic_message(payload.as_ref()))),
                    };
                    (key, result)
                });
            }

            let Some(joined) = running.join_next().await else { break };
            let (key, result) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "Task join failed");
                    stop.cancel();
                    continue;
                }
            };

            match result {
                Ok(outcome) => {
                    started += 1;
                    debug!(task = %key, ?outcome, "Task finished");
                    if let Some(children) = dependents.get(&key) {
                        for child in children {
                            if let Some(n) = pending.get_mut(child) {
                                *n -= 1;
                                if *n == 0 {
                                    pending.remove(child);
                                    ready.insert(child.clone());
                                }
                            }
                        }
                    }
                    outcomes.insert(key, outcome);
                }
                Err(TaskError::Cancelled) => {
                    debug!(task = %key, "Task not started");
                }
                Err(err) => {
                    started += 1;
                    error!(task = %key, error = %err, "Task failed");
                    failures.push((key, err));
                    stop.cancel();
                }
            }
        }

        if !failures.is_empty() {
            failures.sort_by(|a, b| a.0.cmp(&b.0));
            return Err(RunError::Failed {
                failures,
                not_started: total - started,
            });
        }
        if ctx.cancel.is_cancelled() || outcomes.len() < total {
            warn!(finished = outcomes.len(), total, "Run cancelled");
            return Err(RunError::Cancelled);
        }

        let deletions = self.run_deletions(&ctx).await?;

        ctx.target.finish().await.map_err(RunError::Finish)?;
        info!(
            created = outcomes.values().filter(|o| **o == TaskOutcome::Created).count(),
            updated = outcomes.values().filter(|o| **o == TaskOutcome::Updated).count(),
            deletions = deletions.len(),
            "Run complete"
        );
        Ok(RunReport {
            outcomes,
            deletions,
        })
    }

    async fn run_deletions(&self, ctx: &RunContext) -> Result<Vec<(String, String)>, RunError> {
        if !ctx.target.checks_existing() {
            return Ok(Vec::new());
        }

        let mut found: BTreeMap<(String, String), Arc<dyn Deletion>> = BTreeMap::new();
        let mut failures = Vec::new();
        for (key, task) in ctx.tasks.iter() {
            match task.find_deletions(ctx).await {
                Ok(items) => {
                    for d in items {
                        found.entry((d.task_kind().to_string(), d.item())).or_insert(d);
                    }
                }
                Err(err) => failures.push((key.clone(), err)),
            }
        }
        if !failures.is_empty() {
            return Err(RunError::Failed {
                failures,
                not_started: 0,
            });
        }

        let mut done = Vec::new();
        for ((kind, item), deletion) in found {
            match &ctx.target {
                Target::DryRun(report) => report.record_deletion(&kind, &item),
                Target::Direct => {
                    info!(kind = %kind, item = %item, "Deleting");
                    if let Err(err) = deletion.delete(ctx).await {
                        failures.push((TaskKey::new(kind.clone(), item.clone()), err));
                        continue;
                    }
                }
                Target::Terraform(_) | Target::CloudFormation(_) => continue,
            }
            done.push((kind, item));
        }
        if !failures.is_empty() {
            return Err(RunError::Failed {
                failures,
                not_started: 0,
            });
        }
        Ok(done)
    }
}
