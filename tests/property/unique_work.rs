use std::sync::Arc;

use proptest::prelude::*;
use workchain::chain::{Scheduler, TaskUnit, WorkChain, WorkState};
use workchain::constraints::ConstraintEvaluator;
use workchain::data::Data;
use workchain::engine::{CoreRuntime, RequestId, RuntimeEvent, UnitOutcome};
use workchain::types::ExistingWorkPolicy;

#[derive(Debug, Clone)]
enum Op {
    Submit(ExistingWorkPolicy),
    Finish(bool),
    Cancel,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        prop_oneof![
            Just(ExistingWorkPolicy::Replace),
            Just(ExistingWorkPolicy::Keep),
        ]
        .prop_map(Op::Submit),
        any::<bool>().prop_map(Op::Finish),
        Just(Op::Cancel),
    ]
}

fn chain(policy: ExistingWorkPolicy) -> WorkChain {
    let units = ["a", "b"]
        .iter()
        .map(|k| TaskUnit::new(*k, Data::new(), Default::default(), Default::default()))
        .collect();
    WorkChain::new("img", policy, units)
}

fn in_flight(core: &CoreRuntime) -> usize {
    core.scheduler()
        .chains()
        .filter(|c| c.name == "img" && !c.is_terminal())
        .count()
}

proptest! {
    #[test]
    fn at_most_one_chain_in_flight_per_name(ops in proptest::collection::vec(op_strategy(), 1..40)) {
        let mut core = CoreRuntime::new(
            Scheduler::new(2),
            Arc::new(ConstraintEvaluator::with_builtin_predicates()),
        );
        let mut request = 0;

        for op in ops {
            request += 1;
            let event = match op {
                Op::Submit(policy) => RuntimeEvent::SubmitRequested {
                    request: RequestId(request),
                    chain: chain(policy),
                },
                Op::Cancel => RuntimeEvent::CancelRequested {
                    request: RequestId(request),
                    name: "img".to_string(),
                },
                Op::Finish(ok) => {
                    let running = core
                        .scheduler()
                        .chains()
                        .flat_map(|c| c.units.iter())
                        .find(|u| u.state == WorkState::Running)
                        .map(|u| u.id);
                    let Some(unit) = running else { continue };
                    let outcome = if ok {
                        UnitOutcome::Succeeded(Data::new())
                    } else {
                        UnitOutcome::Failed("boom".to_string())
                    };
                    RuntimeEvent::UnitCompleted { unit, outcome }
                }
            };

            core.step(event);
            prop_assert!(in_flight(&core) <= 1);
        }
    }
}
