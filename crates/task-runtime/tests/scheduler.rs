mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use task_runtime::{
    ConflictArbiter, Event, FailureReason, ManualClock, Outcome, SchedulerEvent, SchedulerState,
    StepFault, StepOptions, StepScheduler, Timestamp, Topic,
};

use common::{Harness, frame_at};

fn recorder() -> Arc<Mutex<Vec<String>>> {
    Arc::new(Mutex::new(Vec::new()))
}

fn push_done(scheduler: &StepScheduler, log: &Arc<Mutex<Vec<String>>>, name: &str) {
    let log = Arc::clone(log);
    let label = name.to_owned();
    scheduler.enqueue(name, move |_| {
        log.lock().push(label.clone());
        Ok(Outcome::Done)
    });
}

#[test]
fn runs_one_step_per_tick_in_enqueue_order() {
    let scheduler = StepScheduler::new("order");
    let log = recorder();
    for name in ["a", "b", "c"] {
        push_done(&scheduler, &log, name);
    }

    scheduler.tick(&frame_at(1, 0));
    assert_eq!(*log.lock(), ["a"]);
    scheduler.tick(&frame_at(2, 16));
    assert_eq!(*log.lock(), ["a", "b"]);
    scheduler.tick(&frame_at(3, 32));
    assert_eq!(*log.lock(), ["a", "b", "c"]);
    assert!(!scheduler.is_busy());
}

#[test]
fn retry_three_times_then_done_takes_four_ticks() {
    let scheduler = StepScheduler::new("retry");
    let calls = Arc::new(AtomicU32::new(0));
    {
        let calls = Arc::clone(&calls);
        scheduler.enqueue("flaky", move |ctx| {
            let n = calls.fetch_add(1, Ordering::Relaxed);
            assert_eq!(ctx.attempt(), n);
            Ok(Outcome::done_if(n == 3))
        });
    }

    let mut states = Vec::new();
    for i in 1..=4 {
        scheduler.tick(&frame_at(i, i * 16));
        states.push(scheduler.state());
    }
    assert_eq!(
        states,
        [
            SchedulerState::Running,
            SchedulerState::Running,
            SchedulerState::Running,
            SchedulerState::Idle
        ]
    );

    scheduler.tick(&frame_at(5, 80));
    assert_eq!(calls.load(Ordering::Relaxed), 4);
    assert_eq!(scheduler.state(), SchedulerState::Idle);
}

#[test]
fn retry_delay_is_honored() {
    let scheduler = StepScheduler::new("delay");
    let attempts = Arc::new(Mutex::new(Vec::new()));
    {
        let attempts = Arc::clone(&attempts);
        scheduler.enqueue("wait", move |ctx| {
            attempts.lock().push(ctx.now());
            Ok(if ctx.attempt() == 0 {
                Outcome::retry_after(Duration::from_millis(100))
            } else {
                Outcome::Done
            })
        });
    }

    for (i, ms) in [0u64, 50, 99, 100].into_iter().enumerate() {
        scheduler.tick(&frame_at(i as u64 + 1, ms));
    }
    assert_eq!(*attempts.lock(), [Timestamp(0), Timestamp(100)]);
}

#[test]
fn delay_next_defers_the_following_step() {
    let scheduler = StepScheduler::new("delay-next");
    let log = Arc::new(Mutex::new(Vec::new()));

    {
        let log = Arc::clone(&log);
        scheduler.enqueue("first", move |ctx| {
            log.lock().push(("first", ctx.now()));
            Ok(Outcome::Done)
        });
    }
    scheduler.delay_next(Duration::from_millis(300));
    {
        let log = Arc::clone(&log);
        scheduler.enqueue("second", move |ctx| {
            log.lock().push(("second", ctx.now()));
            Ok(Outcome::Done)
        });
    }

    let mut ms = 0;
    let mut index = 0;
    while scheduler.is_busy() && index < 100 {
        index += 1;
        scheduler.tick(&frame_at(index, ms));
        ms += 16;
    }

    let log = log.lock();
    assert_eq!(log.len(), 2);
    let (_, second_at) = log[1];
    assert!(second_at.as_millis() >= 300);
}

#[test]
fn delay_next_frames_counts_frames() {
    let scheduler = StepScheduler::new("frames");
    let ran_at = Arc::new(Mutex::new(None));
    scheduler.delay_next_frames(3);
    {
        let ran_at = Arc::clone(&ran_at);
        scheduler.enqueue("later", move |ctx| {
            *ran_at.lock() = Some(ctx.frame().index);
            Ok(Outcome::Done)
        });
    }

    for i in 1..=5 {
        scheduler.tick(&frame_at(i, 0));
    }
    assert_eq!(*ran_at.lock(), Some(4));
}

#[test]
fn delay_next_keeps_time_and_frame_waits_together() {
    type Delay = fn(&StepScheduler);
    let orders: [Delay; 2] = [
        |s| {
            s.delay_next(Duration::from_millis(300));
            s.delay_next_frames(1);
        },
        |s| {
            s.delay_next_frames(1);
            s.delay_next(Duration::from_millis(300));
        },
    ];

    for delay in orders {
        let scheduler = StepScheduler::new("mixed-delay");
        let ran_at = Arc::new(Mutex::new(None));
        delay(&scheduler);
        {
            let ran_at = Arc::clone(&ran_at);
            scheduler.enqueue("cast", move |ctx| {
                *ran_at.lock() = Some((ctx.frame().index, ctx.now()));
                Ok(Outcome::Done)
            });
        }

        for i in 1..=30 {
            scheduler.tick(&frame_at(i, (i - 1) * 16));
        }
        assert_eq!(*ran_at.lock(), Some((20, Timestamp(304))));
    }
}

#[test]
fn abort_inside_step_discards_it_and_everything_after() {
    let scheduler = StepScheduler::new("abort");
    let log = recorder();

    push_done(&scheduler, &log, "one");
    {
        let log = Arc::clone(&log);
        scheduler.enqueue("two", move |ctx| {
            log.lock().push("two".into());
            ctx.scheduler().abort();
            Ok(Outcome::retry())
        });
    }
    push_done(&scheduler, &log, "three");
    push_done(&scheduler, &log, "four");

    for i in 1..=6 {
        scheduler.tick(&frame_at(i, i * 16));
    }

    assert_eq!(*log.lock(), ["one", "two"]);
    assert!(!scheduler.is_busy());
    assert!(scheduler.last_failure().is_none());
}

#[test]
fn work_enqueued_after_abort_inside_step_survives() {
    let scheduler = StepScheduler::new("restart");
    let log = recorder();
    {
        let log = Arc::clone(&log);
        scheduler.enqueue("restart", move |ctx| {
            ctx.scheduler().abort();
            let log = Arc::clone(&log);
            ctx.scheduler().enqueue("fresh", move |_| {
                log.lock().push("fresh".into());
                Ok(Outcome::Done)
            });
            Ok(Outcome::Done)
        });
    }
    push_done(&scheduler, &log, "stale");

    for i in 1..=3 {
        scheduler.tick(&frame_at(i, 0));
    }
    assert_eq!(*log.lock(), ["fresh"]);
}

#[test]
fn timeout_clears_queue_within_one_tick() {
    let scheduler = StepScheduler::new("timeout");
    let log = recorder();
    scheduler.enqueue_with(
        "stuck",
        StepOptions::new().time_limit(Duration::from_millis(100)),
        |_| Ok(Outcome::retry()),
    );
    push_done(&scheduler, &log, "never");

    scheduler.tick(&frame_at(1, 0));
    scheduler.tick(&frame_at(2, 60));
    assert!(scheduler.is_busy());

    scheduler.tick(&frame_at(3, 101));
    assert!(!scheduler.is_busy());
    assert!(log.lock().is_empty());

    let failure = scheduler.last_failure().expect("timeout is recorded");
    assert_eq!(failure.step, "stuck");
    assert_eq!(failure.reason, FailureReason::TimedOut(Duration::from_millis(100)));
    assert_eq!(failure.discarded, 1);
}

#[test]
fn timeout_without_abort_skips_only_that_step() {
    let scheduler = StepScheduler::new("skip");
    let log = recorder();
    scheduler.enqueue_with(
        "stuck",
        StepOptions::new()
            .time_limit(Duration::from_millis(50))
            .abort_on_timeout(false),
        |_| Ok(Outcome::retry()),
    );
    push_done(&scheduler, &log, "after");

    scheduler.tick(&frame_at(1, 0));
    scheduler.tick(&frame_at(2, 51));
    scheduler.tick(&frame_at(3, 67));

    assert_eq!(*log.lock(), ["after"]);
    assert!(scheduler.last_failure().is_none());
}

#[test]
fn queue_deadline_counts_from_enqueue_across_quick_steps() {
    let scheduler = StepScheduler::new("sequence");
    let log = recorder();
    for i in 0..10 {
        let log = Arc::clone(&log);
        scheduler.enqueue_with(
            format!("step-{i}"),
            StepOptions::new().time_limit(Duration::from_millis(100)),
            move |ctx| {
                log.lock().push(ctx.step_name().to_owned());
                Ok(Outcome::Done)
            },
        );
    }

    for i in 0..10 {
        scheduler.tick(&frame_at(i + 1, i * 50));
    }

    assert_eq!(*log.lock(), ["step-0", "step-1", "step-2"]);
    assert!(!scheduler.is_busy());
    let failure = scheduler.last_failure().expect("sequence outlived its limit");
    assert_eq!(failure.step, "step-3");
    assert_eq!(failure.reason, FailureReason::TimedOut(Duration::from_millis(100)));
    assert_eq!(failure.discarded, 6);
}

#[test]
fn idle_scheduler_stamps_new_steps_from_the_last_frame() {
    let scheduler = StepScheduler::new("late");
    let log = recorder();
    scheduler.tick(&frame_at(1, 1_000));

    {
        let log = Arc::clone(&log);
        scheduler.enqueue_with(
            "late",
            StepOptions::new().time_limit(Duration::from_millis(100)),
            move |_| {
                log.lock().push("late".into());
                Ok(Outcome::Done)
            },
        );
    }
    scheduler.tick(&frame_at(2, 1_150));

    assert!(log.lock().is_empty());
    let failure = scheduler.last_failure().expect("stamped at the last frame");
    assert_eq!(failure.step, "late");
    assert!(failure.reason.is_timeout());
}

#[test]
fn deadline_is_stamped_from_the_context_clock_at_enqueue() {
    let harness = Harness::new();
    let scheduler = harness.ctx.scheduler("clocked");
    scheduler.attach(harness.ticker.as_ref());
    let log = recorder();
    for name in ["first", "second"] {
        let log = Arc::clone(&log);
        scheduler.enqueue_with(
            name,
            StepOptions::new().time_limit(Duration::from_millis(100)),
            move |ctx| {
                log.lock().push(ctx.step_name().to_owned());
                Ok(Outcome::Done)
            },
        );
    }

    harness.clock.advance_ms(90);
    harness.frame(0);
    harness.frame(16);

    assert_eq!(*log.lock(), ["first"]);
    let failure = scheduler.last_failure().expect("enqueue time is the base");
    assert_eq!(failure.step, "second");
}

#[test]
fn step_waiting_in_its_lane_times_out_and_clears_the_queue() {
    let scheduler = StepScheduler::new("waiting");
    let log = recorder();
    scheduler.enqueue_with("busy", StepOptions::new().priority(5), |_| {
        Ok(Outcome::retry())
    });
    {
        let log = Arc::clone(&log);
        scheduler.enqueue_with(
            "behind",
            StepOptions::new()
                .priority(1)
                .time_limit(Duration::from_millis(100)),
            move |_| {
                log.lock().push("behind".into());
                Ok(Outcome::Done)
            },
        );
    }

    for (i, ms) in [0u64, 50, 100, 150].into_iter().enumerate() {
        scheduler.tick(&frame_at(i as u64 + 1, ms));
    }

    assert!(log.lock().is_empty());
    assert!(!scheduler.is_busy());
    let failure = scheduler.last_failure().expect("waiting step expired");
    assert_eq!(failure.step, "behind");
    assert_eq!(failure.reason, FailureReason::TimedOut(Duration::from_millis(100)));
    assert_eq!(failure.discarded, 1);
}

#[test]
fn expired_waiting_step_without_abort_is_dropped_alone() {
    let harness = Harness::new();
    let mut events = harness.ctx.subscribe(Topic::Scheduler);
    let scheduler = harness.ctx.scheduler("waiting");
    let attempts = Arc::new(AtomicU32::new(0));
    {
        let attempts = Arc::clone(&attempts);
        scheduler.enqueue_with("busy", StepOptions::new().priority(5), move |_| {
            attempts.fetch_add(1, Ordering::Relaxed);
            Ok(Outcome::retry())
        });
    }
    scheduler.enqueue_with(
        "optional",
        StepOptions::new()
            .priority(1)
            .time_limit(Duration::from_millis(100))
            .abort_on_timeout(false),
        |_| Ok(Outcome::Done),
    );
    scheduler.attach(harness.ticker.as_ref());

    harness.frames(8, 16);

    assert!(scheduler.is_busy());
    assert_eq!(scheduler.len(), 1);
    assert!(scheduler.last_failure().is_none());
    assert_eq!(attempts.load(Ordering::Relaxed), 7);

    let mut skipped = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let Event::Scheduler(SchedulerEvent::StepSkipped { step, reason, .. }) = event {
            skipped.push((step, reason));
        }
    }
    assert_eq!(
        skipped,
        [(
            "optional".to_owned(),
            FailureReason::TimedOut(Duration::from_millis(100))
        )]
    );
}

#[test]
fn explicit_abort_fault_and_panic_clear_the_queue() {
    type Body = fn(&mut task_runtime::StepContext<'_>) -> task_runtime::StepResult;
    let cases: [(Body, fn(&FailureReason) -> bool); 3] = [
        (|_| Ok(Outcome::abort("target died")), |r| {
            matches!(r, FailureReason::Aborted(m) if m == "target died")
        }),
        (|_| Err(StepFault::new("window missing")), |r| {
            matches!(r, FailureReason::Fault(m) if m == "window missing")
        }),
        (|_| panic!("boom"), |r| matches!(r, FailureReason::Panicked(m) if m == "boom")),
    ];

    for (body, expected) in cases {
        let scheduler = StepScheduler::new("failing");
        let log = recorder();
        scheduler.enqueue("bad", body);
        push_done(&scheduler, &log, "next");

        scheduler.tick(&frame_at(1, 0));
        scheduler.tick(&frame_at(2, 16));

        assert!(!scheduler.is_busy());
        assert!(log.lock().is_empty());
        let failure = scheduler.last_failure().expect("failure recorded");
        assert!(expected(&failure.reason), "unexpected {:?}", failure.reason);
        assert!(!failure.reason.is_timeout());
    }
}

#[test]
fn higher_priority_lane_runs_first_but_does_not_preempt_current() {
    let scheduler = StepScheduler::new("lanes");
    let log = recorder();
    {
        let log = Arc::clone(&log);
        scheduler.enqueue("current", move |ctx| {
            log.lock().push(format!("current#{}", ctx.attempt()));
            Ok(Outcome::done_if(ctx.attempt() == 1))
        });
    }
    push_done(&scheduler, &log, "low");

    scheduler.tick(&frame_at(1, 0));
    {
        let log = Arc::clone(&log);
        scheduler.enqueue_with("urgent", StepOptions::new().priority(9), move |_| {
            log.lock().push("urgent".into());
            Ok(Outcome::Done)
        });
    }
    for i in 2..=4 {
        scheduler.tick(&frame_at(i, 0));
    }

    assert_eq!(*log.lock(), ["current#0", "current#1", "urgent", "low"]);
}

#[test]
fn insert_jumps_ahead_within_its_lane() {
    let scheduler = StepScheduler::new("insert");
    let log = recorder();
    push_done(&scheduler, &log, "queued");
    {
        let log = Arc::clone(&log);
        scheduler.insert("inserted", StepOptions::new(), move |_| {
            log.lock().push("inserted".into());
            Ok(Outcome::Done)
        });
    }

    scheduler.tick(&frame_at(1, 0));
    scheduler.tick(&frame_at(2, 0));
    assert_eq!(*log.lock(), ["inserted", "queued"]);
}

#[test]
fn bound_claim_is_released_on_drain_and_on_failure() {
    let arbiter = Arc::new(ConflictArbiter::new(Arc::new(ManualClock::new())));

    let scheduler = StepScheduler::new("auto_raise");
    assert!(scheduler.bind_claim(&arbiter, "party_window").is_held());
    scheduler.enqueue("open", |_| Ok(Outcome::Done));
    assert!(arbiter.try_claim("party_window", "auto_heal").is_interrupted());

    scheduler.tick(&frame_at(1, 0));
    assert_eq!(arbiter.holder("party_window"), None);

    assert!(scheduler.bind_claim(&arbiter, "party_window").is_held());
    scheduler.enqueue("explode", |_| Ok(Outcome::abort("no target")));
    scheduler.tick(&frame_at(2, 16));
    assert_eq!(arbiter.holder("party_window"), None);
}

#[test]
fn bound_claim_is_released_when_aborted_from_outside_or_inside() {
    let arbiter = Arc::new(ConflictArbiter::new(Arc::new(ManualClock::new())));

    let scheduler = StepScheduler::new("auto_raise");
    assert!(scheduler.bind_claim(&arbiter, "party_window").is_held());
    scheduler.enqueue("wait", |_| Ok(Outcome::retry()));
    scheduler.tick(&frame_at(1, 0));
    assert_eq!(arbiter.holder("party_window").as_deref(), Some("auto_raise"));
    scheduler.abort();
    assert_eq!(arbiter.holder("party_window"), None);

    assert!(scheduler.bind_claim(&arbiter, "party_window").is_held());
    scheduler.enqueue("bail", |ctx| {
        ctx.scheduler().abort();
        Ok(Outcome::Done)
    });
    push_done(&scheduler, &recorder(), "unreached");
    scheduler.tick(&frame_at(2, 16));
    assert_eq!(arbiter.holder("party_window"), None);
    assert!(!scheduler.is_busy());
}

#[test]
fn bound_claim_on_an_idle_queue_is_released_by_abort() {
    let arbiter = Arc::new(ConflictArbiter::new(Arc::new(ManualClock::new())));
    let scheduler = StepScheduler::new("auto_heal");

    assert!(scheduler.bind_claim(&arbiter, "party_window").is_held());
    scheduler.tick(&frame_at(1, 0));
    assert_eq!(arbiter.holder("party_window").as_deref(), Some("auto_heal"));

    scheduler.abort();
    assert_eq!(arbiter.holder("party_window"), None);
}

#[test]
fn bound_claim_is_released_on_detach() {
    let harness = Harness::new();
    let scheduler = harness.ctx.scheduler("auto_raise");
    scheduler.attach(harness.ticker.as_ref());

    assert!(scheduler.bind_claim(harness.ctx.arbiter(), "party_window").is_held());
    scheduler.enqueue("wait", |_| Ok(Outcome::retry()));
    harness.frames(2, 16);
    assert!(scheduler.is_busy());

    scheduler.detach(harness.ticker.as_ref());
    assert!(!scheduler.is_busy());
    assert_eq!(harness.ctx.arbiter().holder("party_window"), None);
}

#[test]
fn attached_scheduler_reports_failures_on_the_bus() {
    let harness = Harness::new();
    let mut events = harness.ctx.subscribe(Topic::Scheduler);
    let scheduler = harness.ctx.scheduler("auto_cancel");
    scheduler.attach(harness.ticker.as_ref());

    scheduler.enqueue_with(
        "hang",
        StepOptions::new().time_limit(Duration::from_millis(200)),
        |_| Ok(Outcome::retry()),
    );
    harness.frames(20, 16);
    assert!(!scheduler.is_busy());

    let mut saw_timeout = false;
    while let Ok(event) = events.try_recv() {
        if let Event::Scheduler(SchedulerEvent::Failed { scheduler, failure }) = event {
            assert_eq!(scheduler, "auto_cancel");
            saw_timeout = failure.reason.is_timeout();
        }
    }
    assert!(saw_timeout);

    scheduler.detach(harness.ticker.as_ref());
    scheduler.enqueue("after-detach", |_| Ok(Outcome::Done));
    harness.frames(3, 16);
    assert!(scheduler.is_busy());
}
