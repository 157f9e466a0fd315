use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use tracing::{debug, info, warn};

use crate::chain::scheduler_step::{ScheduledUnit, SchedulerStep};
use crate::chain::state_manager::StateManager;
use crate::chain::unit::{TaskUnit, UnitId, WorkState};
use crate::chain::work_chain::{ChainId, WorkChain};
use crate::constraints::ConstraintCheck;
use crate::data::Data;
use crate::engine::UnitOutcome;

/// How the first unit of a chain relates to the chain it was appended to.
enum Upstream {
    /// Not appended (or the upstream chain has been purged).
    Independent,
    /// Upstream chain still in flight.
    Waiting,
    /// Upstream chain succeeded with this terminal output.
    Done(Data),
    /// Upstream chain failed or was cancelled.
    Dead,
}

/// Scheduler holds every retained chain plus the ready queue.
///
/// It is responsible for:
/// - assigning ids when a chain is enqueued
/// - wiring each unit's input from its predecessor's output
/// - gating units on their constraints (`Blocked` vs `Enqueued`)
/// - moving ready units to `Running` while worker slots are free
/// - short-circuiting a chain when a unit fails
/// - cooperative cancellation with a forced fallback
///
/// It performs no IO; every call returns a [`SchedulerStep`] describing what
/// changed and what the shell must do next.
#[derive(Debug)]
pub struct Scheduler {
    chains: BTreeMap<ChainId, WorkChain>,
    unit_index: HashMap<UnitId, ChainId>,
    /// Units whose predecessor is done and whose constraints held when last
    /// checked, in the order they became ready.
    ready: VecDeque<UnitId>,
    /// Units forced to `Cancelled` whose body has not returned yet. They
    /// still hold a worker slot.
    forced: HashSet<UnitId>,
    workers: usize,
    next_chain_id: u64,
    next_unit_id: u64,
}

impl Scheduler {
    /// `workers` is clamped to at least 1.
    pub fn new(workers: usize) -> Self {
        Self {
            chains: BTreeMap::new(),
            unit_index: HashMap::new(),
            ready: VecDeque::new(),
            forced: HashSet::new(),
            workers: workers.max(1),
            next_chain_id: 1,
            next_unit_id: 1,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn chain(&self, id: ChainId) -> Option<&WorkChain> {
        self.chains.get(&id)
    }

    pub fn chains(&self) -> impl Iterator<Item = &WorkChain> {
        self.chains.values()
    }

    pub fn unit_state(&self, unit: UnitId) -> Option<WorkState> {
        let chain = self.chains.get(self.unit_index.get(&unit)?)?;
        chain.unit(unit).map(|u| u.state)
    }

    /// Number of units currently occupying a worker slot, including forced
    /// cancellations whose body is still executing.
    pub fn running_count(&self) -> usize {
        let running = self
            .chains
            .values()
            .flat_map(|c| c.units.iter())
            .filter(|u| u.state == WorkState::Running)
            .count();
        running + self.forced.len()
    }

    /// `true` if no retained chain is still in flight.
    pub fn is_idle(&self) -> bool {
        self.chains.values().all(|c| c.is_terminal())
    }

    /// Accept a built chain, assign ids and start it if possible.
    ///
    /// With `after = Some(id)` the first unit waits for chain `id` to succeed.
    pub fn enqueue(
        &mut self,
        mut chain: WorkChain,
        after: Option<ChainId>,
        env: &dyn ConstraintCheck,
    ) -> (ChainId, SchedulerStep) {
        let id = ChainId(self.next_chain_id);
        self.next_chain_id += 1;

        chain.id = id;
        chain.after = after;
        chain.published = None;

        for unit in chain.units.iter_mut() {
            unit.id = UnitId(self.next_unit_id);
            self.next_unit_id += 1;
            unit.state = WorkState::Enqueued;
            unit.output = None;
            unit.cancel_requested = false;
            unit.input = unit.static_input.clone();
            self.unit_index.insert(unit.id, id);
        }

        info!(
            chain = %chain.name,
            id = %id,
            units = chain.units.len(),
            after = ?after,
            "enqueued chain"
        );

        let mut step = SchedulerStep::default();
        StateManager::new(&mut chain, &mut step).announce();
        self.chains.insert(id, chain);

        self.advance(id, env, &mut step);
        self.fill_slots(env, &mut step);
        (id, step)
    }

    /// Apply the result reported by a unit body.
    pub fn complete(
        &mut self,
        unit_id: UnitId,
        outcome: UnitOutcome,
        env: &dyn ConstraintCheck,
    ) -> SchedulerStep {
        let mut step = SchedulerStep::default();

        // The chain may already be purged; only the slot matters here.
        if self.forced.remove(&unit_id) {
            debug!(unit = %unit_id, "forcibly cancelled unit returned; releasing its worker slot");
            self.fill_slots(env, &mut step);
            return step;
        }

        let Some(chain_id) = self.unit_index.get(&unit_id).copied() else {
            warn!(unit = %unit_id, "completion for unknown unit; ignoring");
            return step;
        };
        let Some(chain) = self.chains.get_mut(&chain_id) else {
            warn!(unit = %unit_id, chain = %chain_id, "completion for purged chain; ignoring");
            return step;
        };
        let Some(idx) = chain.position_of(unit_id) else {
            return step;
        };

        let state = chain.units[idx].state;
        if state != WorkState::Running {
            debug!(
                unit = %unit_id,
                state = %state,
                "late completion for unit that is no longer running; ignoring"
            );
            return step;
        }

        {
            let mut mgr = StateManager::new(chain, &mut step);
            let unit = &mgr.chain().units[idx];
            let (name, kind) = (mgr.chain().name.clone(), unit.kind.clone());

            if unit.cancel_requested {
                info!(chain = %name, unit = %unit_id, %kind, "unit stopped after cancellation; result discarded");
                mgr.transition(idx, WorkState::Cancelled);
            } else {
                match outcome {
                    UnitOutcome::Succeeded(output) => {
                        debug!(chain = %name, unit = %unit_id, %kind, "unit succeeded");
                        mgr.succeed(idx, output);
                    }
                    UnitOutcome::Failed(reason) => {
                        warn!(
                            chain = %name,
                            unit = %unit_id,
                            %kind,
                            %reason,
                            "unit failed; cancelling the rest of the chain"
                        );
                        mgr.transition(idx, WorkState::Failed);
                        mgr.cancel_pending_from(idx + 1);
                    }
                }
            }
        }

        self.advance(chain_id, env, &mut step);
        self.settle_dependents(chain_id, env, &mut step);
        self.fill_slots(env, &mut step);
        step
    }

    /// Cancel a chain.
    ///
    /// Units that have not started are cancelled immediately; the running
    /// unit (if any) is flagged and listed in `cancel_running` so its body can
    /// stop cooperatively. Cancelling a terminal chain is a no-op.
    pub fn cancel(&mut self, chain_id: ChainId, env: &dyn ConstraintCheck) -> SchedulerStep {
        let mut step = SchedulerStep::default();

        let Some(chain) = self.chains.get_mut(&chain_id) else {
            return step;
        };
        if chain.is_terminal() {
            debug!(chain = %chain.name, id = %chain_id, "cancel on terminal chain; nothing to do");
            return step;
        }

        info!(chain = %chain.name, id = %chain_id, "cancelling chain");

        let (running, cancelled) = {
            let mut mgr = StateManager::new(chain, &mut step);
            let running = mgr.request_cancel_running();
            let cancelled = mgr.cancel_pending_from(0);
            mgr.publish_chain_state();
            (running, cancelled)
        };

        step.cancel_running.extend(running);
        self.ready.retain(|u| !cancelled.contains(u));

        self.settle_dependents(chain_id, env, &mut step);
        self.fill_slots(env, &mut step);
        step
    }

    /// The grace period for a cooperative stop ran out.
    ///
    /// If the unit is still running with a pending cancellation it is forced
    /// to `Cancelled`; whatever its body reports later is ignored. Its worker
    /// slot stays taken until that report arrives.
    pub fn grace_elapsed(&mut self, unit_id: UnitId, env: &dyn ConstraintCheck) -> SchedulerStep {
        let mut step = SchedulerStep::default();

        let Some(chain_id) = self.unit_index.get(&unit_id).copied() else {
            return step;
        };
        let Some(chain) = self.chains.get_mut(&chain_id) else {
            return step;
        };
        let Some(idx) = chain.position_of(unit_id) else {
            return step;
        };

        let unit = &chain.units[idx];
        if unit.state != WorkState::Running || !unit.cancel_requested {
            return step;
        }

        warn!(
            chain = %chain.name,
            unit = %unit_id,
            kind = %unit.kind,
            "body did not stop within the grace period; forcing Cancelled"
        );

        {
            let mut mgr = StateManager::new(chain, &mut step);
            mgr.transition(idx, WorkState::Cancelled);
            mgr.publish_chain_state();
        }
        self.forced.insert(unit_id);

        self.settle_dependents(chain_id, env, &mut step);
        self.fill_slots(env, &mut step);
        step
    }

    /// Re-check constraints of every in-flight chain after a signal change.
    pub fn constraints_changed(&mut self, env: &dyn ConstraintCheck) -> SchedulerStep {
        let mut step = SchedulerStep::default();

        let ids: Vec<ChainId> = self
            .chains
            .values()
            .filter(|c| !c.is_terminal())
            .map(|c| c.id)
            .collect();

        for id in ids {
            self.advance(id, env, &mut step);
        }
        self.fill_slots(env, &mut step);
        step
    }

    /// Forget a terminal chain. Non-terminal chains are left alone.
    pub fn purge(&mut self, chain_id: ChainId) -> SchedulerStep {
        let mut step = SchedulerStep::default();

        let Some(chain) = self.chains.get(&chain_id) else {
            return step;
        };
        if !chain.is_terminal() {
            warn!(chain = %chain.name, id = %chain_id, "refusing to purge a chain that is still in flight");
            return step;
        }

        debug!(chain = %chain.name, id = %chain_id, "purging chain");
        if let Some(chain) = self.chains.remove(&chain_id) {
            for unit in chain.units.iter() {
                self.unit_index.remove(&unit.id);
            }
        }
        self.ready.retain(|u| self.unit_index.contains_key(u));
        step.purged.push(chain_id);

        step
    }

    /// Re-load chains from a store after a restart.
    ///
    /// Units that were running when the process stopped are re-enqueued, or
    /// cancelled if their cancellation was already pending. Id counters move
    /// past every restored id.
    pub fn restore(&mut self, chains: Vec<WorkChain>, env: &dyn ConstraintCheck) -> SchedulerStep {
        let mut step = SchedulerStep::default();

        for mut chain in chains {
            if chain.id == ChainId::UNASSIGNED || self.chains.contains_key(&chain.id) {
                warn!(chain = %chain.name, id = %chain.id, "skipping stored chain with unusable id");
                continue;
            }

            self.next_chain_id = self.next_chain_id.max(chain.id.0 + 1);

            for unit in chain.units.iter_mut() {
                self.next_unit_id = self.next_unit_id.max(unit.id.0 + 1);
                if unit.state == WorkState::Running {
                    unit.state = if unit.cancel_requested {
                        WorkState::Cancelled
                    } else {
                        WorkState::Enqueued
                    };
                    unit.output = None;
                }
                unit.cancel_requested = false;
                self.unit_index.insert(unit.id, chain.id);
            }

            debug!(chain = %chain.name, id = %chain.id, "restored chain");

            let id = chain.id;
            StateManager::new(&mut chain, &mut step).announce();
            self.chains.insert(id, chain);
        }

        let ids: Vec<ChainId> = self
            .chains
            .values()
            .filter(|c| !c.is_terminal())
            .map(|c| c.id)
            .collect();
        for id in ids {
            self.advance(id, env, &mut step);
        }
        self.fill_slots(env, &mut step);
        step
    }

    fn upstream_of(&self, id: ChainId) -> Upstream {
        let Some(after) = self.chains.get(&id).and_then(|c| c.after) else {
            return Upstream::Independent;
        };

        match self.chains.get(&after) {
            None => Upstream::Independent,
            Some(prev) => match prev.state() {
                WorkState::Succeeded => {
                    Upstream::Done(prev.terminal_output().cloned().unwrap_or_default())
                }
                WorkState::Failed | WorkState::Cancelled => Upstream::Dead,
                _ => Upstream::Waiting,
            },
        }
    }

    /// Bring the frontier unit of a chain up to date and publish the chain
    /// state if it changed.
    fn advance(&mut self, id: ChainId, env: &dyn ConstraintCheck, step: &mut SchedulerStep) {
        let upstream = self.upstream_of(id);

        let Some(chain) = self.chains.get_mut(&id) else {
            return;
        };
        let mut mgr = StateManager::new(chain, step);

        if let Some(idx) = mgr.chain().frontier() {
            let state = mgr.chain().units[idx].state;

            if matches!(state, WorkState::Enqueued | WorkState::Blocked) {
                let input = if idx == 0 {
                    let static_input = &mgr.chain().units[0].static_input;
                    match upstream {
                        Upstream::Independent => Some(static_input.clone()),
                        Upstream::Done(prev_output) => Some(static_input.overlaid_with(&prev_output)),
                        Upstream::Waiting => None,
                        Upstream::Dead => {
                            info!(
                                chain = %mgr.chain().name,
                                id = %id,
                                "upstream chain did not succeed; cancelling appended chain"
                            );
                            let cancelled = mgr.cancel_pending_from(0);
                            self.ready.retain(|u| !cancelled.contains(u));
                            None
                        }
                    }
                } else {
                    let prev_output = mgr.chain().units[idx - 1].output.clone().unwrap_or_default();
                    Some(mgr.chain().units[idx].static_input.overlaid_with(&prev_output))
                };

                if let Some(input) = input {
                    mgr.wire_input(idx, input);

                    let unit = &mgr.chain().units[idx];
                    let unit_id = unit.id;

                    if constraints_hold(env, unit) {
                        // A Blocked unit leaves that state in fill_slots,
                        // straight to Running when a slot is free.
                        if !self.ready.contains(&unit_id) {
                            self.ready.push_back(unit_id);
                        }
                    } else {
                        if state != WorkState::Blocked {
                            info!(
                                chain = %mgr.chain().name,
                                unit = %unit_id,
                                kind = %unit.kind,
                                constraints = ?unit.constraints,
                                "unit blocked on constraints"
                            );
                        }
                        mgr.transition(idx, WorkState::Blocked);
                        self.ready.retain(|u| *u != unit_id);
                    }
                }
            }
        }

        mgr.publish_chain_state();
    }

    /// Chains appended to a chain that just became terminal can now start
    /// (or must be cancelled), transitively.
    fn settle_dependents(&mut self, chain_id: ChainId, env: &dyn ConstraintCheck, step: &mut SchedulerStep) {
        let mut stack = vec![chain_id];

        while let Some(id) = stack.pop() {
            let terminal = self.chains.get(&id).map(|c| c.is_terminal()).unwrap_or(true);
            if !terminal {
                continue;
            }

            let dependents: Vec<ChainId> = self
                .chains
                .values()
                .filter(|c| c.after == Some(id) && !c.is_terminal())
                .map(|c| c.id)
                .collect();

            for dep in dependents {
                self.advance(dep, env, step);
                stack.push(dep);
            }
        }
    }

    /// Move ready units to `Running` while worker slots are free.
    fn fill_slots(&mut self, env: &dyn ConstraintCheck, step: &mut SchedulerStep) {
        let mut running = self.running_count();

        while running < self.workers {
            let Some(unit_id) = self.ready.pop_front() else {
                break;
            };
            let Some(chain_id) = self.unit_index.get(&unit_id).copied() else {
                continue;
            };
            let Some(chain) = self.chains.get_mut(&chain_id) else {
                continue;
            };
            let Some(idx) = chain.position_of(unit_id) else {
                continue;
            };
            if !matches!(chain.units[idx].state, WorkState::Enqueued | WorkState::Blocked) {
                continue;
            }

            let scheduled = {
                let mut mgr = StateManager::new(chain, step);

                // Constraints may have flipped since the unit became ready.
                if !constraints_hold(env, &mgr.chain().units[idx]) {
                    mgr.transition(idx, WorkState::Blocked);
                    None
                } else {
                    mgr.transition(idx, WorkState::Running);
                    let chain = mgr.chain();
                    let unit = &chain.units[idx];
                    info!(chain = %chain.name, unit = %unit.id, kind = %unit.kind, "dispatching unit");
                    Some(ScheduledUnit {
                        unit: unit.id,
                        chain: chain.id,
                        chain_name: chain.name.clone(),
                        kind: unit.kind.clone(),
                        input: unit.input.clone(),
                    })
                }
            };

            if let Some(scheduled) = scheduled {
                step.dispatched.push(scheduled);
                running += 1;
            }
        }

        self.park_ready(step);
    }

    /// Ready units left without a slot wait in `Enqueued`.
    fn park_ready(&mut self, step: &mut SchedulerStep) {
        for unit_id in self.ready.iter() {
            let Some(chain_id) = self.unit_index.get(unit_id) else {
                continue;
            };
            let Some(chain) = self.chains.get_mut(chain_id) else {
                continue;
            };
            let Some(idx) = chain.position_of(*unit_id) else {
                continue;
            };
            if chain.units[idx].state == WorkState::Blocked {
                StateManager::new(chain, step).transition(idx, WorkState::Enqueued);
            }
        }
    }
}

fn constraints_hold(env: &dyn ConstraintCheck, unit: &TaskUnit) -> bool {
    unit.constraints.iter().all(|p| env.is_satisfied(p))
}
