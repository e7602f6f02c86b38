// tests/property_flow.rs

use std::collections::{BTreeMap, BTreeSet};

use flowdag::dag::{Deps, JobSpec};
use flowdag::flow::{Finisher, Flow};
use flowdag::types::{TaskId, TaskStatus, WorkId};
use flowdag_test_utils::builders::drive;
use proptest::prelude::*;

/// One task: its work (0..3), raw dependency picks and whether it fails.
type TaskPlan = (usize, Vec<usize>, bool);

// Acyclic by construction: task N only depends on tasks 0..N-1.
fn plan_strategy(max_tasks: usize) -> impl Strategy<Value = Vec<TaskPlan>> {
    proptest::collection::vec(
        (
            0..3usize,
            proptest::collection::vec(any::<usize>(), 0..3),
            prop::bool::weighted(0.2),
        ),
        1..=max_tasks,
    )
}

fn build(plan: &[TaskPlan]) -> (Flow, Vec<BTreeSet<usize>>) {
    let mut flow = Flow::new(std::env::temp_dir().join("flowdag-prop"));
    let mut works: BTreeMap<usize, WorkId> = BTreeMap::new();
    let mut deps_of = Vec::with_capacity(plan.len());

    for (i, (work, picks, _)) in plan.iter().enumerate() {
        let work = *works
            .entry(*work)
            .or_insert_with(|| flow.new_work(format!("w{work}"), Finisher::Noop));
        let deps: BTreeSet<usize> = if i == 0 {
            BTreeSet::new()
        } else {
            picks.iter().map(|p| p % i).collect()
        };
        let edges = deps
            .iter()
            .fold(Deps::new(), |d, k| d.on(TaskId(*k), "X"));
        let id = flow
            .register_task(work, JobSpec::generic(["X"]), edges)
            .expect("acyclic plan registers");
        assert_eq!(id, TaskId(i));
        deps_of.push(deps);
    }
    (flow, deps_of)
}

fn expected_statuses(plan: &[TaskPlan], deps_of: &[BTreeSet<usize>]) -> Vec<TaskStatus> {
    let mut out: Vec<TaskStatus> = Vec::with_capacity(plan.len());
    for (i, (_, _, fails)) in plan.iter().enumerate() {
        let status = if deps_of[i].iter().any(|d| out[*d] != TaskStatus::Succeeded) {
            TaskStatus::Unreachable
        } else if *fails {
            TaskStatus::Failed
        } else {
            TaskStatus::Succeeded
        };
        out.push(status);
    }
    out
}

proptest! {
    #[test]
    fn driving_terminates_with_the_predicted_statuses(plan in plan_strategy(12)) {
        let (mut flow, deps_of) = build(&plan);
        let failing: BTreeSet<TaskId> = plan
            .iter()
            .enumerate()
            .filter(|(_, (_, _, fails))| *fails)
            .map(|(i, _)| TaskId(i))
            .collect();

        let started = drive(&mut flow, |_, t| failing.contains(&t));

        // Each task starts at most once, and only after its producers.
        let unique: BTreeSet<TaskId> = started.iter().copied().collect();
        prop_assert_eq!(unique.len(), started.len());
        for (pos, task) in started.iter().enumerate() {
            for dep in &deps_of[task.0] {
                prop_assert!(started[..pos].contains(&TaskId(*dep)));
            }
        }

        let expected = expected_statuses(&plan, &deps_of);
        for (i, status) in expected.iter().enumerate() {
            prop_assert_eq!(flow.task(TaskId(i)).unwrap().status(), *status);
        }
        prop_assert!(flow.is_done());
        prop_assert!(flow.next_runnable().is_empty());
    }

    #[test]
    fn blocked_tasks_are_exactly_the_unreachable_ones(plan in plan_strategy(12)) {
        let (mut flow, _) = build(&plan);
        let failing: BTreeSet<TaskId> = plan
            .iter()
            .enumerate()
            .filter(|(_, (_, _, fails))| *fails)
            .map(|(i, _)| TaskId(i))
            .collect();
        drive(&mut flow, |_, t| failing.contains(&t));

        let unreachable: Vec<TaskId> = flow
            .tasks()
            .iter()
            .filter(|t| t.status() == TaskStatus::Unreachable)
            .map(|t| t.id())
            .collect();
        prop_assert_eq!(flow.failure_chain().blocked_tasks(), unreachable);
    }
}
