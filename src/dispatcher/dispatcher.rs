//! Plan execution.
//!
//! Stages run strictly in plan order. Within a stage, payloads are built
//! concurrently, split into batches and created by a bounded pool of
//! workers. The stage ends at a barrier: every worker is joined and every
//! outcome is applied to the remap table and the result before the next
//! stage reads them. Self references and deferred cycle edges are set by an
//! update pass after the last stage.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    future::Future,
    sync::Arc,
    time::Duration,
};

use futures::{StreamExt, stream};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::{
    MigrateError, Result,
    common::{Queue, Shutdown},
    dispatcher::payload::{self, Payload, Prepared},
    events::MigrationEvent,
    graph::RecordNode,
    model::{Fields, RecordKey, TargetId},
    plan::{DeferredUpdate, Plan},
    result::{ErrorKind, MigrationResult, RecordError, Remapping, RunStatus},
    runtime::Context,
    store::CreateOutcome,
    utils,
};

type Batch = Vec<Payload>;

/// Outcome of one stage, counted for the stage event.
#[derive(Default)]
struct StageTally {
    inserted: usize,
    failed: usize,
}

/// One child's deferred reference fields.
struct UpdateJob {
    child: RecordKey,
    target_id: TargetId,
    fields: Fields,
    missing: Vec<RecordError>,
}

/// Await a store call, bounded by the configured timeout.
async fn bounded<T>(
    call: impl Future<Output = Result<T>>,
    timeout: Option<Duration>,
) -> Result<T> {
    match timeout {
        Some(timeout) => tokio::time::timeout(timeout, call)
            .await
            .unwrap_or_else(|_| Err(MigrateError::Store(format!("timed out after {}ms", timeout.as_millis())))),
        None => call.await,
    }
}

fn not_attempted(
    key: RecordKey,
    source_ref: String,
    cause: &MigrateError,
) -> RecordError {
    RecordError::new(ErrorKind::RecordCreateFailed, key, source_ref, format!("not attempted: {}", cause))
}

/// Executes one plan within one run context.
pub struct Dispatcher {
    ctx: Arc<Context>,
}

impl Dispatcher {
    pub fn new(ctx: Arc<Context>) -> Self {
        Self {
            ctx,
        }
    }

    /// Run every stage then the deferred update pass.
    ///
    /// Never fails: per-record problems land in the result, a cancellation or
    /// a fatal store error ends the run early and is reported as its status.
    pub async fn run(
        &self,
        plan: &Plan,
        shutdown: &Shutdown,
    ) -> MigrationResult {
        let ctx = &self.ctx;
        let mut result = MigrationResult::new(ctx.run_id());
        result.start_time = utils::time::time_millis();

        info!(run_id = ctx.run_id(), stages = plan.object_order.len(), records = plan.record_count(), "migration started");
        ctx.emit(
            "",
            MigrationEvent::RunStarted {
                stages: plan.object_order.len(),
                records: plan.record_count(),
            },
        );

        let source_refs: HashMap<RecordKey, String> =
            plan.records_by_type.values().flatten().map(|node| (node.key(), node.record.display_ref(ctx.display_fields()))).collect();
        let source_ref = |key: &RecordKey| source_refs.get(key).cloned().unwrap_or_else(|| key.to_string());

        for issue in &plan.issues {
            result.push_error(RecordError::new(issue.kind, issue.record.clone(), source_ref(&issue.record), issue.message.clone()).on_field(&issue.field_name));
        }

        let mut completed_stages = 0;
        for object_type in &plan.object_order {
            if shutdown.is_terminated() {
                result.status = RunStatus::Cancelled {
                    completed_stages,
                };
                break;
            }
            if let Err(e) = self.run_stage(object_type, plan.stage(object_type), &mut result).await {
                self.abort(&mut result, e);
                break;
            }
            completed_stages += 1;
        }

        if result.status == RunStatus::Completed && !plan.deferred_updates.is_empty() {
            if shutdown.is_terminated() {
                result.status = RunStatus::Cancelled {
                    completed_stages,
                };
            } else if let Err(e) = self.run_deferred(&plan.deferred_updates, &source_ref, &mut result).await {
                self.abort(&mut result, e);
            }
        }

        result.remapped = ctx
            .remap()
            .entries()
            .into_iter()
            .map(|(record, target_id)| Remapping {
                record,
                target_id,
            })
            .collect();
        result.end_time = utils::time::time_millis();

        info!(run_id = ctx.run_id(), inserted = result.inserted(), failed = result.failed(), status = ?result.status, "migration finished");
        ctx.emit(
            "",
            MigrationEvent::RunFinished {
                status: result.status.clone(),
            },
        );
        result
    }

    fn abort(
        &self,
        result: &mut MigrationResult,
        e: MigrateError,
    ) {
        error!(run_id = self.ctx.run_id(), error = %e, "migration aborted");
        result.status = RunStatus::Aborted {
            error: e.to_string(),
        };
    }

    /// Create the records of one object type.
    ///
    /// `Err` only for a fatal store error or a crashed worker, after every
    /// record of the stage has been counted as inserted or failed.
    async fn run_stage(
        &self,
        object_type: &str,
        records: &[RecordNode],
        result: &mut MigrationResult,
    ) -> Result<()> {
        let ctx = &self.ctx;
        let execution = ctx.execution();
        let mut tally = StageTally::default();

        info!(run_id = ctx.run_id(), object_type, records = records.len(), "stage started");
        ctx.emit(
            object_type,
            MigrationEvent::StageStarted {
                records: records.len(),
            },
        );
        // stages without records still show up in the result
        result.object_mut(object_type);

        let mut ready = Vec::with_capacity(records.len());
        let mut fatal: Option<MigrateError> = None;
        let mut handled = 0;
        {
            let mut prepared = stream::iter(records).map(|node| payload::prepare(ctx, node)).buffered(execution.workers);
            while let Some(prepared) = prepared.next().await {
                handled += 1;
                match prepared {
                    Ok(Prepared::Ready(payload, notes)) => ready.push((payload, notes)),
                    Ok(Prepared::Blocked(error)) => self.fail(result, &mut tally, error),
                    Err(e) => {
                        fatal = Some(e);
                        break;
                    }
                }
            }
        }

        if let Some(e) = fatal.take() {
            // the failing record and everything after it was never prepared
            for node in &records[handled - 1..] {
                self.fail(result, &mut tally, not_attempted(node.key(), node.record.display_ref(ctx.display_fields()), &e));
            }
            for (payload, _) in ready {
                self.fail(result, &mut tally, not_attempted(payload.key, payload.source_ref, &e));
            }
            self.finish_stage(object_type, &tally);
            return Err(e);
        }

        let mut submitted = Vec::with_capacity(ready.len());
        let mut payloads = Vec::with_capacity(ready.len());
        for (payload, notes) in ready {
            for note in notes {
                warn!(record = %note.record, field = ?note.field_name, message = %note.message, "reference left unresolved");
                result.push_error(note);
            }
            submitted.push((payload.key.clone(), payload.source_ref.clone()));
            payloads.push(payload);
        }

        let mut batches: Vec<Batch> = Vec::new();
        let mut payloads = payloads.into_iter().peekable();
        while payloads.peek().is_some() {
            batches.push(payloads.by_ref().take(execution.batch_size).collect());
        }

        if !batches.is_empty() {
            let queue = Queue::new(batches.len());
            for batch in batches {
                queue.send(batch)?;
            }

            let halt = Shutdown::new();
            let workers = execution.workers.min(queue.len());
            let mut handles = Vec::with_capacity(workers);
            for _ in 0..workers {
                let queue = queue.clone();
                let halt = halt.clone();
                let target = ctx.target();
                let timeout = execution.call_timeout();
                let object_type = object_type.to_string();

                handles.push(tokio::spawn(async move {
                    let mut done: Vec<(Batch, Result<Vec<CreateOutcome>>)> = Vec::new();
                    while !halt.is_terminated() {
                        let Some(batch) = queue.try_next() else {
                            break;
                        };
                        let payloads = batch.iter().map(|p| p.fields.clone()).collect();
                        let outcome = bounded(target.create_many(&object_type, payloads), timeout).await;
                        if outcome.as_ref().is_err_and(MigrateError::is_fatal) {
                            halt.shutdown();
                        }
                        done.push((batch, outcome));
                    }
                    done
                }));
            }

            // barrier: the next stage reads what this one wrote
            let mut settled = HashSet::with_capacity(submitted.len());
            let mut crashed = None;
            for handle in handles {
                let done = match handle.await {
                    Ok(done) => done,
                    Err(e) => {
                        error!(run_id = ctx.run_id(), object_type, error = %e, "stage worker failed");
                        if crashed.is_none() {
                            crashed = Some(MigrateError::Engine(format!("stage worker failed: {}", e)));
                        }
                        continue;
                    }
                };
                for (batch, outcome) in done {
                    settled.extend(batch.iter().map(|p| p.key.clone()));
                    let error = self.apply(object_type, batch, outcome, result, &mut tally);
                    if fatal.is_none() {
                        fatal = error;
                    }
                }
            }

            let mut leftover = Vec::new();
            while let Some(batch) = queue.try_next() {
                settled.extend(batch.iter().map(|p| p.key.clone()));
                leftover.extend(batch);
            }

            if let Some(crashed) = crashed {
                // batches held by a crashed worker have no known outcome
                for (key, source_ref) in submitted.into_iter().filter(|(key, _)| !settled.contains(key)) {
                    let message = format!("outcome unknown: {}", crashed);
                    self.fail(result, &mut tally, RecordError::new(ErrorKind::RecordCreateFailed, key, source_ref, message));
                }
                if fatal.is_none() {
                    fatal = Some(crashed);
                }
            }

            if let Some(e) = &fatal {
                for payload in leftover {
                    self.fail(result, &mut tally, not_attempted(payload.key, payload.source_ref, e));
                }
            }
        }

        self.finish_stage(object_type, &tally);

        match fatal {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Apply the outcome of one create call; returns the error if it was fatal.
    fn apply(
        &self,
        object_type: &str,
        batch: Batch,
        outcome: Result<Vec<CreateOutcome>>,
        result: &mut MigrationResult,
        tally: &mut StageTally,
    ) -> Option<MigrateError> {
        let outcomes = match outcome {
            Ok(outcomes) => outcomes,
            Err(e) => {
                for payload in batch {
                    self.fail(result, tally, RecordError::new(ErrorKind::RecordCreateFailed, payload.key, payload.source_ref, e.to_string()));
                }
                return e.is_fatal().then_some(e);
            }
        };

        let mut outcomes = outcomes.into_iter();
        for payload in batch {
            match outcomes.next() {
                Some(Ok(target_id)) => {
                    debug!(record = %payload.key, target_id = %target_id, "record created");
                    self.ctx.emit(
                        object_type,
                        MigrationEvent::RecordCreated {
                            record: payload.key.clone(),
                            target_id: target_id.clone(),
                        },
                    );
                    self.ctx.remap().set(payload.key, target_id);
                    result.object_mut(object_type).inserted += 1;
                    tally.inserted += 1;
                }
                Some(Err(message)) => {
                    self.fail(result, tally, RecordError::new(ErrorKind::RecordCreateFailed, payload.key, payload.source_ref, message));
                }
                None => {
                    let message = "target store returned no outcome".to_string();
                    self.fail(result, tally, RecordError::new(ErrorKind::RecordCreateFailed, payload.key, payload.source_ref, message));
                }
            }
        }
        None
    }

    fn finish_stage(
        &self,
        object_type: &str,
        tally: &StageTally,
    ) {
        info!(run_id = self.ctx.run_id(), object_type, inserted = tally.inserted, failed = tally.failed, "stage finished");
        self.ctx.emit(
            object_type,
            MigrationEvent::StageFinished {
                inserted: tally.inserted,
                failed: tally.failed,
            },
        );
    }

    fn fail(
        &self,
        result: &mut MigrationResult,
        tally: &mut StageTally,
        error: RecordError,
    ) {
        warn!(record = %error.record, kind = error.kind.as_ref(), message = %error.message, "record not created");
        self.ctx.emit(
            &error.record.object_type,
            MigrationEvent::RecordFailed {
                record: error.record.clone(),
                kind: error.kind,
                message: error.message.clone(),
            },
        );
        result.object_mut(&error.record.object_type).failed += 1;
        tally.failed += 1;
        result.push_error(error);
    }

    /// Set deferred references with one update per created child.
    ///
    /// A child counts as updated when every one of its deferred fields was
    /// set, and as update-failed otherwise.
    async fn run_deferred(
        &self,
        updates: &[DeferredUpdate],
        source_ref: &impl Fn(&RecordKey) -> String,
        result: &mut MigrationResult,
    ) -> Result<()> {
        let ctx = &self.ctx;
        let execution = ctx.execution();

        let mut by_child: BTreeMap<&RecordKey, Vec<&DeferredUpdate>> = BTreeMap::new();
        for update in updates {
            by_child.entry(&update.child).or_default().push(update);
        }

        let mut jobs = Vec::new();
        for (child, updates) in by_child {
            // a child that was not created has already been reported
            let Some(target_id) = ctx.remap().get(child) else {
                continue;
            };

            let mut fields = Fields::new();
            let mut missing = Vec::new();
            for update in updates {
                match ctx.remap().get(&update.parent) {
                    Some(parent_id) => {
                        fields.insert(update.field_name.clone(), Value::String(parent_id));
                    }
                    None => missing.push(
                        RecordError::new(ErrorKind::ParentNotCreated, child.clone(), source_ref(child), format!("parent {} was not created", update.parent))
                            .on_field(&update.field_name),
                    ),
                }
            }
            jobs.push(UpdateJob {
                child: child.clone(),
                target_id,
                fields,
                missing,
            });
        }

        info!(run_id = ctx.run_id(), updates = jobs.len(), "deferred update pass started");
        let timeout = execution.call_timeout();
        let mut done: Vec<(UpdateJob, Option<Result<()>>)> = stream::iter(jobs)
            .map(|job| {
                let target = ctx.target();
                async move {
                    if job.fields.is_empty() {
                        return (job, None);
                    }
                    let outcome = bounded(target.update_by_id(&job.child.object_type, &job.target_id, job.fields.clone()), timeout).await;
                    (job, Some(outcome))
                }
            })
            .buffer_unordered(execution.workers)
            .collect()
            .await;
        done.sort_by(|a, b| a.0.child.cmp(&b.0.child));

        let mut fatal = None;
        for (job, outcome) in done {
            let object_type = job.child.object_type.clone();
            let mut errors = job.missing;
            match outcome {
                Some(Err(e)) => {
                    errors.push(RecordError::new(ErrorKind::RecordUpdateFailed, job.child.clone(), source_ref(&job.child), e.to_string()));
                    if e.is_fatal() && fatal.is_none() {
                        fatal = Some(e);
                    }
                }
                Some(Ok(())) if errors.is_empty() => {
                    debug!(record = %job.child, target_id = %job.target_id, "deferred references set");
                    ctx.emit(
                        &object_type,
                        MigrationEvent::RecordUpdated {
                            record: job.child.clone(),
                            target_id: job.target_id.clone(),
                        },
                    );
                    result.object_mut(&object_type).updated += 1;
                    continue;
                }
                _ => {}
            }

            let message = errors.iter().map(|e| e.message.as_str()).collect::<Vec<_>>().join("; ");
            warn!(record = %job.child, message = %message, "deferred update failed");
            ctx.emit(
                &object_type,
                MigrationEvent::UpdateFailed {
                    record: job.child.clone(),
                    message,
                },
            );
            result.object_mut(&object_type).update_failed += 1;
            for error in errors {
                result.push_error(error);
            }
        }

        match fatal {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
