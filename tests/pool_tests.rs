mod common;

use common::{bare_engine, setup_tracing_for_test, wait_until, Gate};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;
use task_engine::{EngineError, PoolConfig, PoolKind, ShutdownMode, TaskError, TaskState};

#[test]
fn test_compute_pool_respects_worker_count() {
  setup_tracing_for_test();
  let engine = bare_engine();
  engine.create_pool("compute2", PoolConfig::compute(2)).unwrap();

  let current = Arc::new(AtomicUsize::new(0));
  let peak = Arc::new(AtomicUsize::new(0));
  let task_ids: Vec<String> = (0..3)
    .map(|_| {
      let current = current.clone();
      let peak = peak.clone();
      engine
        .submit("compute2", move |_ctx| {
          let now = current.fetch_add(1, Ordering::SeqCst) + 1;
          peak.fetch_max(now, Ordering::SeqCst);
          thread::sleep(Duration::from_millis(50));
          current.fetch_sub(1, Ordering::SeqCst);
          Ok(())
        })
        .unwrap()
    })
    .collect();

  let stats = engine.pool_stats("compute2").unwrap();
  assert_eq!(stats.kind, PoolKind::ComputeBound);
  assert_eq!(stats.workers, 2);

  engine.shutdown_pool("compute2", ShutdownMode::Graceful).unwrap();
  assert!(peak.load(Ordering::SeqCst) <= 2, "at most 2 tasks may run at once");
  for task_id in &task_ids {
    assert_eq!(engine.task(task_id).unwrap().state, TaskState::Succeeded);
  }
}

#[test]
fn test_affine_pool_starts_tasks_in_submission_order() {
  setup_tracing_for_test();
  let engine = bare_engine();
  engine.create_pool("ordered", PoolConfig::affine(64)).unwrap();

  let order = Arc::new(Mutex::new(Vec::new()));
  let thread_names = Arc::new(Mutex::new(Vec::new()));
  for i in 0..20usize {
    let order = order.clone();
    let thread_names = thread_names.clone();
    engine
      .submit("ordered", move |_ctx| {
        order.lock().unwrap().push(i);
        thread_names
          .lock()
          .unwrap()
          .push(thread::current().name().map(str::to_string));
        Ok(())
      })
      .unwrap();
  }

  engine.shutdown_pool("ordered", ShutdownMode::Graceful).unwrap();
  assert_eq!(*order.lock().unwrap(), (0..20).collect::<Vec<_>>());

  let names = thread_names.lock().unwrap();
  assert!(names.iter().all(|name| name == &names[0]), "affine pool must use one consumer");
  assert!(names[0].as_deref().is_some_and(|name| name.starts_with("ordered-worker")));
}

#[test]
fn test_single_worker_compute_pool_is_fifo() {
  setup_tracing_for_test();
  let engine = bare_engine();
  engine.create_pool("fifo", PoolConfig::compute(1)).unwrap();

  let order = Arc::new(Mutex::new(Vec::new()));
  for i in 0..10usize {
    let order = order.clone();
    engine
      .submit("fifo", move |_ctx| {
        order.lock().unwrap().push(i);
        Ok(())
      })
      .unwrap();
  }
  engine.shutdown_pool("fifo", ShutdownMode::Graceful).unwrap();
  assert_eq!(*order.lock().unwrap(), (0..10).collect::<Vec<_>>());
}

fn assert_tasks_start_in_submission_order(pool_name: &str, config: PoolConfig) {
  let engine = bare_engine();
  engine.create_pool(pool_name, config).unwrap();

  for _round in 0..10 {
    let task_ids: Vec<String> = (0..200u32)
      .map(|i| engine.submit(pool_name, move |_ctx| Ok(i)).unwrap())
      .collect();
    for task_id in &task_ids {
      engine.watch(task_id).unwrap().wait();
    }

    let started: Vec<_> = task_ids
      .iter()
      .map(|task_id| engine.task(task_id).unwrap().started_at.unwrap())
      .collect();
    for (position, pair) in started.windows(2).enumerate() {
      assert!(
        pair[0] <= pair[1],
        "task {} started after task {} on {}",
        task_ids[position],
        task_ids[position + 1],
        pool_name
      );
    }
  }
  engine.shutdown_pool(pool_name, ShutdownMode::Graceful).unwrap();
}

#[test]
fn test_multi_worker_compute_pool_starts_tasks_in_submission_order() {
  setup_tracing_for_test();
  assert_tasks_start_in_submission_order("wide_compute", PoolConfig::compute(8));
}

#[test]
fn test_multi_worker_io_pool_starts_tasks_in_submission_order() {
  setup_tracing_for_test();
  assert_tasks_start_in_submission_order("wide_io", PoolConfig::io(6).with_min_workers(3));
}

#[test]
fn test_io_pool_grows_on_demand_and_retires_idle_workers() {
  setup_tracing_for_test();
  let engine = bare_engine();
  engine
    .create_pool(
      "elastic",
      PoolConfig::io(4)
        .with_min_workers(1)
        .with_idle_timeout(Duration::from_millis(100)),
    )
    .unwrap();
  let pool = engine.pool("elastic").unwrap();
  assert!(wait_until(Duration::from_secs(2), || pool.stats().idle_workers == 1));

  let gate = Gate::new();
  let task_ids: Vec<String> = (0..4)
    .map(|_| {
      let gate = gate.clone();
      engine
        .submit("elastic", move |_ctx| {
          gate.wait();
          Ok(())
        })
        .unwrap()
    })
    .collect();

  assert!(
    wait_until(Duration::from_secs(2), || pool.running_count() == 4),
    "pool should grow to run all blocked tasks concurrently"
  );
  assert_eq!(pool.stats().workers, 4);

  // The ceiling holds: a fifth task waits in the queue.
  engine.submit("elastic", |_ctx| Ok(())).unwrap();
  thread::sleep(Duration::from_millis(20));
  assert_eq!(pool.stats().workers, 4);
  assert_eq!(pool.pending_count(), 1);

  gate.open();
  for task_id in &task_ids {
    assert_eq!(engine.watch(task_id).unwrap().wait(), TaskState::Succeeded);
  }

  assert!(
    wait_until(Duration::from_secs(3), || pool.stats().workers == 1),
    "idle workers should retire down to the floor"
  );
  engine.shutdown_pool("elastic", ShutdownMode::Graceful).unwrap();
  assert_eq!(pool.stats().completed, 5);
}

#[test]
fn test_affine_queue_bound_blocks_submit() {
  setup_tracing_for_test();
  let engine = Arc::new(bare_engine());
  engine.create_pool("bounded", PoolConfig::affine(1)).unwrap();
  let pool = engine.pool("bounded").unwrap();

  let gate = Gate::new();
  let blocker_gate = gate.clone();
  engine
    .submit("bounded", move |_ctx| {
      blocker_gate.wait();
      Ok(())
    })
    .unwrap();
  assert!(wait_until(Duration::from_secs(2), || pool.running_count() == 1));

  engine.submit("bounded", |_ctx| Ok(())).unwrap();
  assert_eq!(pool.pending_count(), 1);

  let (done_tx, done_rx) = mpsc::channel();
  let submitter_engine = engine.clone();
  let submitter = thread::spawn(move || {
    let submitted = submitter_engine.submit("bounded", |_ctx| Ok(()));
    done_tx.send(submitted.is_ok()).unwrap();
  });

  assert!(
    done_rx.recv_timeout(Duration::from_millis(100)).is_err(),
    "submit should block while the queue is full"
  );

  gate.open();
  assert_eq!(done_rx.recv_timeout(Duration::from_secs(5)), Ok(true));
  submitter.join().unwrap();
  engine.shutdown_pool("bounded", ShutdownMode::Graceful).unwrap();
}

#[test]
fn test_blocked_submit_fails_when_pool_closes() {
  setup_tracing_for_test();
  let engine = Arc::new(bare_engine());
  engine.create_pool("closing", PoolConfig::affine(1)).unwrap();
  let pool = engine.pool("closing").unwrap();

  let blocker = engine
    .submit("closing", |ctx| -> Result<(), TaskError> {
      while !ctx.is_cancelled() {
        thread::sleep(Duration::from_millis(5));
      }
      Err(TaskError::Cancelled)
    })
    .unwrap();
  assert!(wait_until(Duration::from_secs(2), || pool.running_count() == 1));
  engine.submit("closing", |_ctx| Ok(())).unwrap();

  let (done_tx, done_rx) = mpsc::channel();
  let submitter_engine = engine.clone();
  let submitter = thread::spawn(move || {
    done_tx.send(submitter_engine.submit("closing", |_ctx| Ok(()))).unwrap();
  });
  assert!(done_rx.recv_timeout(Duration::from_millis(100)).is_err());

  engine.shutdown_pool("closing", ShutdownMode::Cancel).unwrap();
  assert_eq!(
    done_rx.recv_timeout(Duration::from_secs(5)),
    Ok(Err(EngineError::PoolClosed("closing".to_string())))
  );
  submitter.join().unwrap();
  assert_eq!(engine.watch(&blocker).unwrap().wait(), TaskState::Cancelled);
}

#[test]
fn test_random_workload_reaches_terminal_states() {
  use rand::Rng;

  setup_tracing_for_test();
  let engine = bare_engine();
  engine.create_pool("mixed", PoolConfig::compute(3)).unwrap();

  let mut rng = rand::rng();
  let mut task_ids = Vec::new();
  for i in 0..40u32 {
    let sleep_ms = rng.random_range(0..10u64);
    let should_fail = rng.random_bool(0.2);
    let task_id = engine
      .submit("mixed", move |_ctx| -> Result<u32, TaskError> {
        thread::sleep(Duration::from_millis(sleep_ms));
        if should_fail {
          return Err(TaskError::msg(format!("task {} failed on purpose", i)));
        }
        Ok(i)
      })
      .unwrap();
    if rng.random_bool(0.25) {
      engine.cancel_task(&task_id);
    }
    task_ids.push(task_id);
  }

  engine.shutdown_pool("mixed", ShutdownMode::Graceful).unwrap();
  for task_id in &task_ids {
    let snapshot = engine.task(task_id).unwrap();
    assert!(snapshot.state.is_terminal(), "task {} left in {}", task_id, snapshot.state);
    match snapshot.state {
      TaskState::Succeeded => assert!(snapshot.result.is_some() && snapshot.error.is_none()),
      TaskState::Failed => assert!(snapshot.result.is_none() && snapshot.error.is_some()),
      _ => assert!(snapshot.result.is_none() && snapshot.error.is_none()),
    }
  }
}
