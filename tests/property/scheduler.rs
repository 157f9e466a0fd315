use proptest::prelude::*;
use workchain::chain::{Scheduler, TaskUnit, WorkChain, WorkState};
use workchain::data::Data;
use workchain::engine::UnitOutcome;
use workchain::types::ExistingWorkPolicy;

fn always(_: &str) -> bool {
    true
}

fn chain_of(len: usize) -> WorkChain {
    let units = (0..len)
        .map(|i| TaskUnit::new(format!("step_{i}"), Data::new(), Default::default(), Default::default()))
        .collect();
    WorkChain::new("prop", ExistingWorkPolicy::Replace, units)
}

// Strategy: chain length plus an optional index of the unit that fails.
fn failing_chain_strategy(max_units: usize) -> impl Strategy<Value = (usize, Option<usize>)> {
    (1..=max_units).prop_flat_map(|len| (Just(len), proptest::option::of(0..len)))
}

// Strategy: one output per unit, each a small map of primitive values.
fn outputs_strategy(max_units: usize) -> impl Strategy<Value = Vec<Data>> {
    let data = proptest::collection::btree_map("[a-z]{1,6}", any::<i64>(), 0..4).prop_map(|m| {
        let mut d = Data::new();
        for (k, v) in m {
            d.insert(k, v);
        }
        d
    });
    proptest::collection::vec(data, 1..=max_units)
}

proptest! {
    #[test]
    fn failure_cancels_every_later_unit((len, fail_at) in failing_chain_strategy(8)) {
        let mut sched = Scheduler::new(2);
        let (id, step) = sched.enqueue(chain_of(len), None, &always);

        let mut ran = Vec::new();
        let mut pending = step.dispatched;

        while let Some(unit) = pending.pop() {
            let idx = sched
                .chain(id)
                .and_then(|c| c.position_of(unit.unit))
                .expect("dispatched unit belongs to the chain");
            ran.push(idx);

            let outcome = if Some(idx) == fail_at {
                UnitOutcome::Failed("boom".to_string())
            } else {
                UnitOutcome::Succeeded(Data::new())
            };
            pending.extend(sched.complete(unit.unit, outcome, &always).dispatched);
        }

        let chain = sched.chain(id).expect("chain retained");
        match fail_at {
            Some(k) => {
                prop_assert_eq!(chain.state(), WorkState::Failed);
                prop_assert_eq!(ran, (0..=k).collect::<Vec<_>>());
                prop_assert_eq!(chain.units[k].state, WorkState::Failed);
                for unit in chain.units[k + 1..].iter() {
                    prop_assert_eq!(unit.state, WorkState::Cancelled);
                }
            }
            None => {
                prop_assert_eq!(chain.state(), WorkState::Succeeded);
                prop_assert_eq!(ran, (0..len).collect::<Vec<_>>());
            }
        }
    }

    #[test]
    fn each_unit_receives_its_predecessors_output(outputs in outputs_strategy(6)) {
        let mut sched = Scheduler::new(1);
        let (id, step) = sched.enqueue(chain_of(outputs.len()), None, &always);

        let mut inputs = Vec::new();
        let mut pending = step.dispatched;
        let mut next = 0;

        while let Some(unit) = pending.pop() {
            inputs.push(unit.input.clone());
            let output = outputs[next].clone();
            next += 1;
            pending.extend(
                sched
                    .complete(unit.unit, UnitOutcome::Succeeded(output), &always)
                    .dispatched,
            );
        }

        prop_assert_eq!(inputs.len(), outputs.len());
        prop_assert!(inputs[0].is_empty());
        for i in 1..outputs.len() {
            prop_assert_eq!(&inputs[i], &outputs[i - 1]);
        }

        let chain = sched.chain(id).expect("chain retained");
        prop_assert_eq!(chain.terminal_output(), outputs.last());
    }
}
