// src/engine/event_handlers.rs

//! Event handling logic for the core runtime.

use tracing::{debug, info};

use crate::bus::StatusEvent;
use crate::chain::{ChainId, ScheduledUnit, SchedulerStep, UnitId, WorkChain};
use crate::constraints::ConstraintCheck;
use crate::engine::core::CoreRuntime;
use crate::engine::queue::QueuedSubmission;
use crate::engine::registry::Resolution;
use crate::engine::{Reply, RequestId, SubmitOutcome, UnitOutcome};

/// Command produced by the pure core, to be executed by the outer IO shell.
#[derive(Debug, Clone)]
pub enum CoreCommand {
    /// Publish these transitions on the status bus, in order.
    Publish(Vec<StatusEvent>),
    /// Drop purged chains from the bus snapshot and the store.
    Forget(Vec<ChainId>),
    /// Write the current state of these chains to the store.
    Persist(Vec<WorkChain>),
    /// Ask these running bodies to stop and start their grace timers.
    CancelRunning(Vec<UnitId>),
    /// Hand these units to the executor.
    Dispatch(Vec<ScheduledUnit>),
    /// Answer a waiting handle.
    Reply { request: RequestId, reply: Reply },
}

/// Decision returned by the core after handling a single `RuntimeEvent`.
#[derive(Debug, Clone)]
pub struct CoreStep {
    /// Commands the IO shell should execute, in order.
    pub commands: Vec<CoreCommand>,
    /// Whether the outer runtime loop should keep running.
    pub keep_running: bool,
}

impl CoreStep {
    pub fn stop() -> Self {
        Self {
            commands: Vec::new(),
            keep_running: false,
        }
    }

    pub fn dispatched(&self) -> impl Iterator<Item = &ScheduledUnit> {
        self.commands.iter().flat_map(|c| match c {
            CoreCommand::Dispatch(units) => units.as_slice(),
            _ => &[][..],
        })
    }

    pub fn events(&self) -> impl Iterator<Item = &StatusEvent> {
        self.commands.iter().flat_map(|c| match c {
            CoreCommand::Publish(events) => events.as_slice(),
            _ => &[][..],
        })
    }

    pub fn reply_to(&self, request: RequestId) -> Option<&Reply> {
        self.commands.iter().find_map(|c| match c {
            CoreCommand::Reply { request: r, reply } if *r == request => Some(reply),
            _ => None,
        })
    }
}

/// Scheduler output plus replies gathered while handling one event.
#[derive(Debug, Default)]
pub(crate) struct Pending {
    pub(crate) step: SchedulerStep,
    pub(crate) replies: Vec<(RequestId, Reply)>,
}

impl CoreRuntime {
    /// Handle a submission.
    ///
    /// If a replacement for the same name is still waiting, the submission
    /// queues behind it; otherwise its policy is resolved right away.
    pub(super) fn handle_submit(&mut self, request: RequestId, chain: WorkChain) -> CoreStep {
        let env = self.constraints.snapshot();
        let mut out = Pending::default();

        let name = chain.name.clone();
        let submission = QueuedSubmission { request, chain };

        if self.pending.is_blocked(&name) {
            self.pending.push(&name, submission);
        } else {
            self.resolve(submission, env.as_ref(), &mut out);
        }

        self.finish(out)
    }

    /// Cancel every in-flight chain of `name` and reject submissions queued
    /// for it.
    pub(super) fn handle_cancel(&mut self, request: RequestId, name: String) -> CoreStep {
        let env = self.constraints.snapshot();
        let mut out = Pending::default();

        for dropped in self.pending.release(&name) {
            info!(name = %name, request = dropped.request.0, "dropping queued submission on cancel");
            out.replies.push((
                dropped.request,
                Reply::Submitted(SubmitOutcome::Rejected(format!(
                    "'{name}' was cancelled before this submission was registered"
                ))),
            ));
        }

        let active: Vec<ChainId> = self
            .registry
            .chains_of(&name)
            .iter()
            .copied()
            .filter(|id| !self.chain_is_terminal(*id))
            .collect();

        if active.is_empty() {
            debug!(name = %name, "cancel for name without in-flight work; nothing to do");
        }

        for id in active.iter() {
            out.step.merge(self.scheduler.cancel(*id, env.as_ref()));
        }
        out.replies
            .push((request, Reply::Cancelled(!active.is_empty())));

        self.release_pending(env.as_ref(), &mut out);
        self.finish(out)
    }

    /// Forget terminal chains of `name`.
    pub(super) fn handle_purge(&mut self, request: RequestId, name: String) -> CoreStep {
        let mut out = Pending::default();
        let purged = self.forget_terminal(&name, &mut out.step);
        info!(name = %name, purged, "purged terminal chains");
        out.replies.push((request, Reply::Purged(purged)));
        self.finish(out)
    }

    pub(super) fn handle_completion(&mut self, unit: UnitId, outcome: UnitOutcome) -> CoreStep {
        let env = self.constraints.snapshot();
        let mut out = Pending::default();
        out.step = self.scheduler.complete(unit, outcome, env.as_ref());
        self.release_pending(env.as_ref(), &mut out);
        self.finish(out)
    }

    pub(super) fn handle_grace_elapsed(&mut self, unit: UnitId) -> CoreStep {
        let env = self.constraints.snapshot();
        let mut out = Pending::default();
        out.step = self.scheduler.grace_elapsed(unit, env.as_ref());
        self.release_pending(env.as_ref(), &mut out);
        self.finish(out)
    }

    pub(super) fn handle_constraints_changed(&mut self) -> CoreStep {
        let env = self.constraints.snapshot();
        let mut out = Pending::default();
        out.step = self.scheduler.constraints_changed(env.as_ref());
        self.finish(out)
    }

    /// Apply the submission's policy against the chains registered under its
    /// name.
    fn resolve(&mut self, submission: QueuedSubmission, env: &dyn ConstraintCheck, out: &mut Pending) {
        let name = submission.chain.name.clone();
        let policy = submission.chain.policy;

        let resolution = self
            .registry
            .resolve(&name, policy, |id| self.chain_is_terminal(id));

        match resolution {
            Resolution::Reject => {
                info!(name = %name, %policy, "name has work in flight; keeping it and rejecting submission");
                out.replies.push((
                    submission.request,
                    Reply::Submitted(SubmitOutcome::Rejected(format!(
                        "'{name}' already has work in flight"
                    ))),
                ));
            }
            Resolution::Register => {
                self.forget_terminal(&name, &mut out.step);
                self.register(submission, None, env, out);
            }
            Resolution::Append { after } => {
                info!(name = %name, after = %after, "appending chain behind current tail");
                self.register(submission, Some(after), env, out);
            }
            Resolution::Replace { active } => {
                info!(name = %name, replaced = ?active, "replacing in-flight chains");
                for id in active.iter() {
                    out.step.merge(self.scheduler.cancel(*id, env));
                }

                let still_running: Vec<ChainId> = active
                    .into_iter()
                    .filter(|id| !self.chain_is_terminal(*id))
                    .collect();

                if still_running.is_empty() {
                    self.forget_terminal(&name, &mut out.step);
                    self.register(submission, None, env, out);
                } else {
                    self.pending.block(&name, still_running, submission);
                }
            }
        }
    }

    fn register(
        &mut self,
        submission: QueuedSubmission,
        after: Option<ChainId>,
        env: &dyn ConstraintCheck,
        out: &mut Pending,
    ) {
        let name = submission.chain.name.clone();
        let (id, step) = self.scheduler.enqueue(submission.chain, after, env);
        out.step.merge(step);
        self.registry.register(&name, id);
        out.replies.push((
            submission.request,
            Reply::Submitted(SubmitOutcome::Accepted(id)),
        ));
    }

    /// Resolve queued submissions whose replaced chains are now terminal.
    fn release_pending(&mut self, env: &dyn ConstraintCheck, out: &mut Pending) {
        loop {
            let ready = self.pending.ready_names(|id| self.chain_is_terminal(id));
            if ready.is_empty() {
                break;
            }

            for name in ready {
                debug!(name = %name, "replaced chains acknowledged cancellation");
                for submission in self.pending.release(&name) {
                    if self.pending.is_blocked(&name) {
                        self.pending.push(&name, submission);
                    } else {
                        self.resolve(submission, env, out);
                    }
                }
            }
        }
    }

    /// Purge terminal chains of `name` from scheduler and registry.
    fn forget_terminal(&mut self, name: &str, step: &mut SchedulerStep) -> usize {
        let terminal: Vec<ChainId> = self
            .registry
            .chains_of(name)
            .iter()
            .copied()
            .filter(|id| self.chain_is_terminal(*id))
            .collect();

        for id in terminal.iter() {
            step.merge(self.scheduler.purge(*id));
            self.registry.remove(name, *id);
        }
        terminal.len()
    }

    /// Turn accumulated output into ordered shell commands.
    pub(super) fn finish(&self, out: Pending) -> CoreStep {
        let Pending { step, replies } = out;
        let mut commands = Vec::new();

        if !step.events.is_empty() {
            commands.push(CoreCommand::Publish(step.events));
        }
        if !step.purged.is_empty() {
            commands.push(CoreCommand::Forget(step.purged));
        }

        let touched: Vec<WorkChain> = step
            .touched
            .iter()
            .filter_map(|id| self.scheduler.chain(*id).cloned())
            .collect();
        if !touched.is_empty() {
            commands.push(CoreCommand::Persist(touched));
        }

        if !step.cancel_running.is_empty() {
            commands.push(CoreCommand::CancelRunning(step.cancel_running));
        }
        if !step.dispatched.is_empty() {
            commands.push(CoreCommand::Dispatch(step.dispatched));
        }
        for (request, reply) in replies {
            commands.push(CoreCommand::Reply { request, reply });
        }

        CoreStep {
            commands,
            keep_running: true,
        }
    }
}
