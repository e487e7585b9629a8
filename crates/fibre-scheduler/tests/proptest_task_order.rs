//! Property-based ordering tests for the task queue.
//!
//! 1. Without yielding, tasks run in `(expiration, id)` order.
//! 2. Yielding at arbitrary points never changes that order.
//! 3. Cancelled tasks never run; every other task runs exactly once.
//! 4. Delayed tasks never run before their start time.

use std::rc::Rc;

use fibre_scheduler::{
    ManualClock, PriorityLevel, Scheduler, SchedulerConfig, SchedulerHost, TaskStatus, YieldPolicy,
};
use proptest::prelude::*;

struct Ctx {
    scheduler: Scheduler<Ctx>,
    ran: Vec<u64>,
    ran_at: Vec<(u64, f64)>,
}

impl SchedulerHost for Ctx {
    fn scheduler(&mut self) -> &mut Scheduler<Self> {
        &mut self.scheduler
    }
}

fn ctx(clock: &ManualClock, policy: YieldPolicy) -> Ctx {
    let config = SchedulerConfig {
        yield_policy: policy,
        ..SchedulerConfig::default()
    };
    Ctx {
        scheduler: Scheduler::new(config, Rc::new(clock.clone())),
        ran: Vec::new(),
        ran_at: Vec::new(),
    }
}

fn priority_strategy() -> impl Strategy<Value = PriorityLevel> {
    prop::sample::select(PriorityLevel::ALL.to_vec())
}

fn drain(ctx: &mut Ctx) {
    let mut guard = 0;
    while Scheduler::perform_work_until_deadline(ctx).expect("flush") {
        guard += 1;
        assert!(guard < 10_000, "scheduler failed to drain");
    }
}

fn expected_order(tasks: &[(PriorityLevel, u8)]) -> Vec<u64> {
    let mut keyed: Vec<(f64, u64)> = tasks
        .iter()
        .enumerate()
        .map(|(i, (priority, offset))| {
            let start = f64::from(*offset);
            (start + priority.timeout_ms(), i as u64 + 1)
        })
        .collect();
    keyed.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
    keyed.into_iter().map(|(_, id)| id).collect()
}

fn schedule_all(ctx: &mut Ctx, clock: &ManualClock, tasks: &[(PriorityLevel, u8)]) {
    // Ids are assigned at schedule time, so schedule in index order; offsets
    // are non-decreasing (see `sorted_offsets`) so the clock only moves forward.
    for (priority, offset) in tasks {
        clock.set(f64::from(*offset));
        ctx.scheduler
            .schedule_callback(*priority, move |ctx: &mut Ctx, _: bool| {
                let id = ctx.scheduler.current_task().map(|h| h.id()).unwrap_or(0);
                ctx.ran.push(id);
                Ok(TaskStatus::Complete)
            });
    }
}

fn sorted_offsets(raw: Vec<(PriorityLevel, u8)>) -> Vec<(PriorityLevel, u8)> {
    let mut offsets: Vec<u8> = raw.iter().map(|(_, o)| *o).collect();
    offsets.sort_unstable();
    raw.into_iter()
        .zip(offsets)
        .map(|((p, _), o)| (p, o))
        .collect()
}

proptest! {
    #[test]
    fn drain_order_matches_expiration_then_id(
        raw in prop::collection::vec((priority_strategy(), any::<u8>()), 1..40)
    ) {
        let tasks = sorted_offsets(raw);
        let clock = ManualClock::new(0.0);
        let mut ctx = ctx(&clock, YieldPolicy::Never);
        schedule_all(&mut ctx, &clock, &tasks);
        drain(&mut ctx);
        prop_assert_eq!(ctx.ran, expected_order(&tasks));
    }

    #[test]
    fn yielding_does_not_change_order(
        raw in prop::collection::vec((priority_strategy(), any::<u8>()), 1..40),
        checks in 1usize..5,
    ) {
        let tasks = sorted_offsets(raw);
        let clock = ManualClock::new(0.0);
        let mut ctx = ctx(&clock, YieldPolicy::AfterChecks(checks));
        schedule_all(&mut ctx, &clock, &tasks);
        drain(&mut ctx);
        prop_assert_eq!(ctx.ran, expected_order(&tasks));
    }

    #[test]
    fn cancelled_tasks_never_run(
        count in 1usize..30,
        cancel_mask in any::<u32>(),
    ) {
        let clock = ManualClock::new(0.0);
        let mut ctx = ctx(&clock, YieldPolicy::Never);
        let mut handles = Vec::new();
        for _ in 0..count {
            handles.push(ctx.scheduler.schedule_callback(
                PriorityLevel::Normal,
                |ctx: &mut Ctx, _: bool| {
                    let id = ctx.scheduler.current_task().map(|h| h.id()).unwrap_or(0);
                    ctx.ran.push(id);
                    Ok(TaskStatus::Complete)
                },
            ));
        }
        let mut expected = Vec::new();
        for (i, handle) in handles.iter().enumerate() {
            if cancel_mask & (1 << (i % 32)) != 0 {
                ctx.scheduler.cancel_callback(*handle);
            } else {
                expected.push(handle.id());
            }
        }
        drain(&mut ctx);
        prop_assert_eq!(ctx.ran, expected);
        prop_assert_eq!(ctx.scheduler.pending_count(), 0);
    }

    #[test]
    fn delayed_tasks_respect_start_time(
        delays in prop::collection::vec(1u16..500, 1..20),
    ) {
        let clock = ManualClock::new(0.0);
        let mut ctx = ctx(&clock, YieldPolicy::Never);
        for delay in &delays {
            let delay = f64::from(*delay);
            ctx.scheduler.schedule_delayed(
                PriorityLevel::Normal,
                delay,
                move |ctx: &mut Ctx, _: bool| {
                    let id = ctx.scheduler.current_task().map(|h| h.id()).unwrap_or(0);
                    let now = ctx.scheduler.now();
                    ctx.ran_at.push((id, now - delay));
                    Ok(TaskStatus::Complete)
                },
            );
        }
        // Drive the host timeout loop until the queue is empty.
        let mut guard = 0;
        while ctx.scheduler.pending_count() > 0 {
            guard += 1;
            prop_assert!(guard < 10_000);
            if let Some(at) = ctx.scheduler.host_timeout_deadline() {
                clock.set(at);
                ctx.scheduler.handle_host_timeout();
            }
            drain(&mut ctx);
        }
        prop_assert_eq!(ctx.ran_at.len(), delays.len());
        for (_, lateness) in &ctx.ran_at {
            prop_assert!(*lateness >= 0.0);
        }
    }
}
