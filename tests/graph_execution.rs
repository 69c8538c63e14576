// tests/graph_execution.rs

use std::any::Any;
use std::error::Error;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use daqsched::errors::Result as SchedResult;
use daqsched::{
    Affinity, AwaitableState, Logger, Schedulable, Scheduler, SchedulerError, Task, TaskError,
    TaskGraph, TaskId, WorkerPool, execute_graph,
};
use daqsched_test_utils::fake_executor::InlineBackend;
use daqsched_test_utils::init_tracing;
use daqsched_test_utils::recorder::Recorder;

type TestResult = Result<(), Box<dyn Error>>;

fn scheduler(workers: usize) -> Scheduler {
    init_tracing();
    Scheduler::new(&Logger::default(), workers, false).expect("scheduler")
}

fn counting(name: &str, counter: &Arc<AtomicUsize>) -> Task {
    let counter = Arc::clone(counter);
    Task::named(name, move || {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    })
}

#[test]
fn fan_out_runs_each_task_once() -> TestResult {
    let scheduler = scheduler(4);
    let counter = Arc::new(AtomicUsize::new(0));

    let graph = TaskGraph::named("G");
    let t1 = counting("T1", &counter);
    let t2 = counting("T2", &counter);
    let t3 = counting("T3", &counter);
    for t in [&t1, &t2, &t3] {
        graph.add_task(t)?;
    }
    t1.then(&t2)?;
    t1.then(&t3)?;

    scheduler.schedule_graph(&graph)?.result()?;
    assert_eq!(counter.load(Ordering::SeqCst), 3);
    Ok(())
}

#[test]
fn continuation_starts_after_predecessor_finished() -> TestResult {
    let scheduler = scheduler(4);

    for _ in 0..50 {
        let rec = Recorder::new();
        let graph = TaskGraph::named("chain");
        let a = rec.slow_task("A", Duration::from_millis(1));
        let b = rec.task("B");
        let c = rec.task("C");
        for t in [&a, &b, &c] {
            graph.add_task(t)?;
        }
        a.then(&b)?.then(&c)?;

        scheduler.schedule_graph(&graph)?.result()?;

        assert!(rec.finished_at("A") < rec.started_at("B"));
        assert!(rec.finished_at("B") < rec.started_at("C"));
    }
    Ok(())
}

#[test]
fn diamond_join_waits_for_both_branches() -> TestResult {
    let scheduler = scheduler(4);
    let rec = Recorder::new();

    let graph = TaskGraph::named("diamond");
    let src = rec.task("src");
    let left = rec.slow_task("left", Duration::from_millis(30));
    let right = rec.task("right");
    let join = rec.task("join");
    for t in [&src, &left, &right, &join] {
        graph.add_task(t)?;
    }
    src.then(&left)?.then(&join)?;
    src.then(&right)?.then(&join)?;

    scheduler.schedule_graph(&graph)?.result()?;

    assert_eq!(rec.count("join"), 1);
    assert!(rec.finished_at("left") < rec.started_at("join"));
    assert!(rec.finished_at("right") < rec.started_at("join"));
    Ok(())
}

#[test]
fn independent_tasks_run_in_parallel() -> TestResult {
    const N: usize = 4;
    let busy = Duration::from_millis(200);
    let scheduler = scheduler(N);
    let rec = Recorder::new();

    let graph = TaskGraph::named("parallel");
    let tasks: Vec<Task> = (0..N)
        .map(|i| rec.slow_task(&format!("t{i}"), busy))
        .collect();
    for t in &tasks {
        graph.add_task(t)?;
    }

    let started = Instant::now();
    scheduler.schedule_graph(&graph)?.result()?;
    let elapsed = started.elapsed();

    for i in 0..N {
        assert_eq!(rec.count(&format!("t{i}")), 1);
    }
    // Soft bound: much closer to one task than to N sequential tasks.
    assert!(
        elapsed < busy * (N as u32) - busy / 2,
        "graph took {elapsed:?}"
    );
    assert!(rec.max_concurrency() > 1);
    Ok(())
}

#[test]
fn failure_only_skips_its_own_chain() -> TestResult {
    let scheduler = scheduler(2);
    let rec = Recorder::new();

    let graph = TaskGraph::named("two-chains");
    let a1 = rec.task("a1");
    let a2 = rec.failing_task("a2");
    let a3 = rec.task("a3");
    let a4 = rec.task("a4");
    let b1 = rec.task("b1");
    let b2 = rec.slow_task("b2", Duration::from_millis(20));
    let b3 = rec.task("b3");
    for t in [&a1, &a2, &a3, &a4, &b1, &b2, &b3] {
        graph.add_task(t)?;
    }
    a1.then(&a2)?.then(&a3)?.then(&a4)?;
    b1.then(&b2)?.then(&b3)?;

    let aw = scheduler.schedule_graph(&graph)?;
    match aw.result() {
        Err(TaskError::GraphFailed {
            graph,
            failed,
            mut skipped,
        }) => {
            assert_eq!(graph, "two-chains");
            assert_eq!(failed, vec!["a2".to_string()]);
            skipped.sort();
            assert_eq!(skipped, vec!["a3".to_string(), "a4".to_string()]);
        }
        other => panic!("expected GraphFailed, got {other:?}"),
    }

    assert!(rec.ran("a1"));
    assert!(!rec.ran("a3"));
    assert!(!rec.ran("a4"));
    for b in ["b1", "b2", "b3"] {
        assert_eq!(rec.count(b), 1, "{b} should have run");
    }
    assert_eq!(aw.state(), AwaitableState::Failed);
    Ok(())
}

#[test]
fn panicking_task_fails_the_graph() -> TestResult {
    let scheduler = scheduler(1);
    let graph = TaskGraph::named("panics");
    let bad = Task::named("bad", || panic!("bad driver"));
    let after = Task::named("after", || Ok(()));
    graph.add_task(&bad)?;
    graph.add_task(&after)?;
    bad.then(&after)?;

    match scheduler.schedule_graph(&graph)?.result() {
        Err(TaskError::GraphFailed { failed, skipped, .. }) => {
            assert_eq!(failed, vec!["bad".to_string()]);
            assert_eq!(skipped, vec!["after".to_string()]);
        }
        other => panic!("expected GraphFailed, got {other:?}"),
    }

    // The worker is still usable.
    assert_eq!(scheduler.schedule_function(|| Ok(1))?.result()?, 1);
    Ok(())
}

#[test]
fn nested_graph_acts_as_a_single_node() -> TestResult {
    let scheduler = scheduler(3);
    let rec = Recorder::new();

    let inner = TaskGraph::named("calibrate");
    let i1 = rec.task("i1");
    let i2 = rec.task("i2");
    inner.add_task(&i1)?;
    inner.add_task(&i2)?;
    i1.then(&i2)?;

    let outer = TaskGraph::named("session");
    let connect = rec.task("connect");
    let acquire = rec.task("acquire");
    outer.add_task(&connect)?;
    outer.add_task(&inner)?;
    outer.add_task(&acquire)?;
    connect.then(&inner)?.then(&acquire)?;

    scheduler.schedule_graph(&outer)?.result()?;

    assert!(rec.finished_at("connect") < rec.started_at("i1"));
    assert!(rec.finished_at("i2") < rec.started_at("acquire"));
    Ok(())
}

#[test]
fn graph_with_root_chains_from_the_root() -> TestResult {
    let scheduler = scheduler(2);
    let rec = Recorder::new();
    let hits = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&hits);
    let graph = TaskGraph::with_root("boot", move || {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    let root = graph.root().ok_or("graph has no root")?;
    let next = rec.task("next");
    graph.add_task(&next)?;
    root.then(&next)?;

    scheduler.schedule_graph(&graph)?.result()?;
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert!(rec.ran("next"));
    Ok(())
}

#[test]
fn empty_graph_completes() -> TestResult {
    let scheduler = scheduler(1);
    let aw = scheduler.schedule_graph(&TaskGraph::new())?;
    assert!(aw.wait_timeout(Duration::from_secs(5)));
    assert_eq!(aw.state(), AwaitableState::Completed);
    Ok(())
}

#[test]
fn cyclic_graph_is_rejected_and_nothing_runs() -> TestResult {
    let scheduler = scheduler(2);
    let rec = Recorder::new();

    let graph = TaskGraph::named("cyclic");
    let a = rec.task("a");
    let b = rec.task("b");
    let c = rec.task("c");
    for t in [&a, &b, &c] {
        graph.add_task(t)?;
    }
    a.then(&b)?.then(&c)?.then(&a)?;

    assert!(matches!(graph.validate(), Err(SchedulerError::GraphCycle(_))));
    match scheduler.schedule_graph(&graph) {
        Err(SchedulerError::GraphCycle(msg)) => assert!(msg.contains("cyclic"), "{msg}"),
        other => panic!("expected GraphCycle, got {other:?}"),
    }

    scheduler.wait_all();
    assert!(rec.events().is_empty());
    // A rejected graph is not sealed.
    graph.add_task(&rec.task("d"))?;
    Ok(())
}

#[test]
fn scheduled_graph_is_sealed_but_can_run_again() -> TestResult {
    let scheduler = scheduler(2);
    let rec = Recorder::new();

    let graph = TaskGraph::named("sealed");
    let a = rec.task("a");
    let b = rec.task("b");
    graph.add_task(&a)?;
    graph.add_task(&b)?;
    a.then(&b)?;

    scheduler.schedule_graph(&graph)?.result()?;

    assert!(matches!(
        graph.add_task(&rec.task("late")),
        Err(SchedulerError::GraphSealed(_))
    ));
    assert!(matches!(a.then(&rec.task("late")), Err(SchedulerError::GraphSealed(_))));
    // Names are metadata and stay editable.
    graph.set_name("renamed");
    assert_eq!(graph.name(), "renamed");

    scheduler.schedule_graph(&graph)?.result()?;
    assert_eq!(rec.count("a"), 2);
    assert_eq!(rec.count("b"), 2);
    Ok(())
}

#[derive(Debug)]
struct ForeignTask;

impl Schedulable for ForeignTask {
    fn id(&self) -> TaskId {
        Task::new(|| Ok(())).id()
    }

    fn name(&self) -> String {
        "foreign".to_string()
    }

    fn set_name(&self, _name: &str) {}

    fn then<'a>(&self, continuation: &'a dyn Schedulable) -> SchedResult<&'a dyn Schedulable> {
        Ok(continuation)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[test]
fn foreign_continuation_is_not_supported() -> TestResult {
    let task = Task::named("native", || Ok(()));
    let graph = TaskGraph::named("g");

    assert!(matches!(task.then(&ForeignTask), Err(SchedulerError::NotSupported(_))));
    assert!(task.continuations().is_empty());
    assert!(matches!(graph.add_task(&ForeignTask), Err(SchedulerError::NotSupported(_))));
    assert!(graph.is_empty());
    Ok(())
}

#[test]
fn main_loop_tasks_need_a_main_loop() -> TestResult {
    let scheduler = scheduler(1);
    let graph = TaskGraph::named("ui");
    graph.add_task(&Task::named("paint", || Ok(())).on_main_loop())?;

    assert!(matches!(
        scheduler.schedule_graph(&graph),
        Err(SchedulerError::MainLoopNotSet)
    ));
    Ok(())
}

#[test]
fn main_loop_tasks_run_on_the_driving_thread() -> TestResult {
    init_tracing();
    let scheduler = Scheduler::new(&Logger::default(), 2, true)?;
    let rec = Recorder::new();

    let graph = TaskGraph::named("mixed");
    let load = rec.task("load");
    let paint = rec.task("paint").on_main_loop();
    graph.add_task(&load)?;
    graph.add_task(&paint)?;
    load.then(&paint)?;

    let aw = scheduler.schedule_graph(&graph)?;
    let started = Instant::now();
    while !aw.is_done() {
        assert!(started.elapsed() < Duration::from_secs(5), "graph never finished");
        scheduler.run_main_loop(Some(Duration::from_millis(10)))?;
    }
    aw.result()?;

    let me = thread::current().name().map(str::to_string);
    assert_eq!(rec.threads_of("paint"), vec![me.clone()]);
    assert_ne!(rec.threads_of("load"), vec![me]);
    assert!(rec.finished_at("load") < rec.started_at("paint"));
    Ok(())
}

#[test]
fn graphs_run_on_custom_backends() -> TestResult {
    let rec = Recorder::new();
    let graph = TaskGraph::named("inline");
    let a = rec.task("a");
    let b = rec.task("b").on_main_loop();
    graph.add_task(&a)?;
    graph.add_task(&b)?;
    a.then(&b)?;

    let backend = Arc::new(InlineBackend::new());
    let aw = execute_graph(&graph, backend.clone())?;

    assert_eq!(aw.state(), AwaitableState::Completed);
    assert_eq!(rec.start_order(), vec!["a", "b"]);
    assert_eq!(backend.dispatched(), vec![Affinity::Pool, Affinity::MainLoop]);
    Ok(())
}

#[test]
fn rejected_dispatch_cancels_the_graph() -> TestResult {
    let rec = Recorder::new();
    let graph = TaskGraph::named("rejected");
    let a = rec.task("a");
    let b = rec.task("b");
    graph.add_task(&a)?;
    graph.add_task(&b)?;
    a.then(&b)?;

    let aw = execute_graph(&graph, Arc::new(InlineBackend::rejecting()))?;
    assert_eq!(aw.state(), AwaitableState::Cancelled);
    assert!(rec.events().is_empty());
    Ok(())
}

#[test]
fn dump_describes_members_and_edges() -> TestResult {
    let graph = TaskGraph::named("dot");
    let a = Task::named("a", || Ok(()));
    let b = Task::new(|| Ok(()));
    graph.add_task(&a)?;
    graph.add_task(&b)?;
    a.then(&b)?;

    let dot = graph.dump();
    assert!(dot.starts_with("digraph \"dot\""));
    assert!(dot.contains("label=\"a\""));
    assert!(dot.contains(&format!("label=\"{}\"", b.id())));
    assert!(dot.contains(&format!("t{} -> t{};", a.id().raw(), b.id().raw())));
    Ok(())
}

#[test]
fn stopping_mid_graph_cancels_the_rest() -> TestResult {
    use std::sync::atomic::AtomicBool;

    init_tracing();
    let pool = Arc::new(WorkerPool::new(&Logger::default(), 1)?);
    let rec = Recorder::new();
    let started = Arc::new(AtomicBool::new(false));
    let gate = Arc::new(AtomicBool::new(false));

    let blocker = {
        let (started, gate) = (Arc::clone(&started), Arc::clone(&gate));
        Task::named("acquire", move || {
            started.store(true, Ordering::SeqCst);
            while !gate.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(1));
            }
            Ok(())
        })
    };
    let (process, publish) = (rec.task("process"), rec.task("publish"));

    let graph = TaskGraph::named("pipeline");
    for t in [&blocker, &process, &publish] {
        graph.add_task(t)?;
    }
    blocker.then(&process)?.then(&publish)?;

    let aw = pool.schedule_graph(&graph)?;
    let deadline = Instant::now() + Duration::from_secs(5);
    while !started.load(Ordering::SeqCst) && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(1));
    }
    assert!(started.load(Ordering::SeqCst), "first task never started");

    // Release the running task only once stopping has begun, so its
    // continuation is dispatched to a pool that no longer accepts work.
    let opener = {
        let (pool, gate) = (Arc::clone(&pool), Arc::clone(&gate));
        thread::spawn(move || {
            let deadline = Instant::now() + Duration::from_secs(5);
            while !pool.is_stopped() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(1));
            }
            gate.store(true, Ordering::SeqCst);
        })
    };

    pool.stop();
    opener.join().map_err(|_| "opener panicked")?;

    assert!(aw.wait_timeout(Duration::from_secs(5)), "graph never resolved");
    assert_eq!(aw.state(), AwaitableState::Cancelled);
    assert!(matches!(aw.result(), Err(TaskError::Cancelled)));
    assert!(!rec.ran("process"));
    assert!(!rec.ran("publish"));

    pool.wait_all();
    assert_eq!(pool.outstanding(), 0);
    Ok(())
}
