mod common;

use common::{bare_engine, collect_all_events, events_for, setup_tracing_for_test, wait_for_state, Gate};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use task_engine::{EventKind, PoolConfig, PoolEvent, PoolKind, ShutdownMode, TaskError, TaskEvent, TaskState};

#[test]
fn test_success_events_in_order() {
  setup_tracing_for_test();
  let engine = bare_engine();
  engine.create_pool("events", PoolConfig::compute(2)).unwrap();
  let collected = collect_all_events(&engine);

  let results: Arc<Mutex<Vec<Option<u32>>>> = Arc::new(Mutex::new(Vec::new()));
  let result_sink = results.clone();
  engine.on_event(EventKind::Succeeded, move |event: &TaskEvent| {
    let value = event.result.as_ref().and_then(|value| value.downcast_ref::<u32>()).copied();
    result_sink.lock().unwrap().push(value);
  });

  let task_id = engine.submit("events", |_ctx| Ok(5u32)).unwrap();
  engine.shutdown_pool("events", ShutdownMode::Graceful).unwrap();

  assert_eq!(
    events_for(&collected, &task_id),
    vec![EventKind::Started, EventKind::Succeeded, EventKind::Finished]
  );
  assert_eq!(*results.lock().unwrap(), vec![Some(5)]);
}

#[test]
fn test_failed_event_carries_error() {
  setup_tracing_for_test();
  let engine = bare_engine();
  engine.create_pool("failing", PoolConfig::affine(4)).unwrap();
  let collected = collect_all_events(&engine);

  let errors = Arc::new(Mutex::new(Vec::new()));
  let error_sink = errors.clone();
  engine.on_event(EventKind::Failed, move |event: &TaskEvent| {
    assert!(event.result.is_none());
    error_sink.lock().unwrap().push(event.error.clone());
  });

  let task_id = engine
    .submit("failing", |_ctx| Err::<(), _>(TaskError::msg("bad input")))
    .unwrap();
  engine.shutdown_pool("failing", ShutdownMode::Graceful).unwrap();

  assert_eq!(
    events_for(&collected, &task_id),
    vec![EventKind::Started, EventKind::Failed, EventKind::Finished]
  );
  let errors = errors.lock().unwrap();
  assert_eq!(errors.len(), 1);
  assert_eq!(errors[0].as_ref().map(|info| info.message.as_str()), Some("bad input"));
}

#[test]
fn test_cancel_before_start_publishes_cancelled_then_finished() {
  setup_tracing_for_test();
  let engine = bare_engine();
  engine.create_pool("queue", PoolConfig::affine(8)).unwrap();
  let collected = collect_all_events(&engine);

  let gate = Gate::new();
  let blocker_gate = gate.clone();
  let blocker = engine
    .submit("queue", move |_ctx| {
      blocker_gate.wait();
      Ok(())
    })
    .unwrap();
  assert!(wait_for_state(&engine, &blocker, TaskState::Running));

  let victim = engine.submit("queue", |_ctx| Ok(())).unwrap();
  assert!(engine.cancel_task(&victim));
  // Delivered synchronously by the cancelling call.
  assert_eq!(
    events_for(&collected, &victim),
    vec![EventKind::Cancelled, EventKind::Finished]
  );

  gate.open();
  engine.shutdown_pool("queue", ShutdownMode::Graceful).unwrap();
  assert_eq!(
    events_for(&collected, &victim),
    vec![EventKind::Cancelled, EventKind::Finished]
  );
}

#[test]
fn test_cancel_shutdown_emits_terminal_event_for_every_task() {
  setup_tracing_for_test();
  let engine = bare_engine();
  engine.create_pool("doomed", PoolConfig::affine(8)).unwrap();
  let collected = collect_all_events(&engine);

  let running = engine
    .submit("doomed", |ctx| -> Result<(), TaskError> {
      while !ctx.is_cancelled() {
        thread::sleep(Duration::from_millis(5));
      }
      Err(TaskError::Cancelled)
    })
    .unwrap();
  assert!(wait_for_state(&engine, &running, TaskState::Running));
  let queued: Vec<String> = (0..3).map(|_| engine.submit("doomed", |_ctx| Ok(())).unwrap()).collect();

  engine.shutdown_pool("doomed", ShutdownMode::Cancel).unwrap();
  for task_id in &queued {
    assert_eq!(
      events_for(&collected, task_id),
      vec![EventKind::Cancelled, EventKind::Finished]
    );
  }

  assert!(common::wait_until(Duration::from_secs(5), || {
    events_for(&collected, &running).len() == 3
  }));
  assert_eq!(
    events_for(&collected, &running),
    vec![EventKind::Started, EventKind::Cancelled, EventKind::Finished]
  );
}

#[test]
fn test_exactly_one_terminal_event_per_task_under_concurrency() {
  setup_tracing_for_test();
  let engine = Arc::new(bare_engine());
  engine.create_pool("busy", PoolConfig::io(6).with_min_workers(2)).unwrap();
  let collected = collect_all_events(&engine);

  let submitters: Vec<_> = (0..4)
    .map(|worker| {
      let engine = engine.clone();
      thread::spawn(move || {
        let mut ids = Vec::new();
        for i in 0..25u32 {
          let task_id = engine
            .submit("busy", move |_ctx| -> Result<u32, TaskError> {
              if i % 7 == 0 {
                panic!("unlucky task {}", i);
              }
              thread::sleep(Duration::from_millis(u64::from(i % 3)));
              Ok(i)
            })
            .unwrap();
          if (i + worker) % 5 == 0 {
            engine.cancel_task(&task_id);
          }
          ids.push(task_id);
        }
        ids
      })
    })
    .collect();

  let task_ids: Vec<String> = submitters
    .into_iter()
    .flat_map(|handle| handle.join().unwrap())
    .collect();
  engine.shutdown_pool("busy", ShutdownMode::Graceful).unwrap();

  for task_id in &task_ids {
    let kinds = events_for(&collected, task_id);
    let terminal_count = kinds
      .iter()
      .filter(|kind| matches!(kind, EventKind::Succeeded | EventKind::Failed | EventKind::Cancelled))
      .count();
    assert_eq!(terminal_count, 1, "task {} saw {:?}", task_id, kinds);
    assert_eq!(kinds.last(), Some(&EventKind::Finished), "task {} saw {:?}", task_id, kinds);
    assert_eq!(kinds.iter().filter(|kind| **kind == EventKind::Finished).count(), 1);
    if kinds.contains(&EventKind::Started) {
      assert_eq!(kinds[0], EventKind::Started);
      assert_eq!(kinds.len(), 3);
    } else {
      assert_eq!(kinds, vec![EventKind::Cancelled, EventKind::Finished]);
    }
  }
}

#[test]
fn test_unsubscribe_and_panicking_handler() {
  setup_tracing_for_test();
  let engine = bare_engine();
  engine.create_pool("subs", PoolConfig::compute(1)).unwrap();

  engine.on_event(EventKind::Started, |_event: &TaskEvent| panic!("handler failure"));
  let finished_count = Arc::new(AtomicUsize::new(0));
  let counter = finished_count.clone();
  let subscription = engine.on_event(EventKind::Finished, move |_event: &TaskEvent| {
    counter.fetch_add(1, Ordering::SeqCst);
  });

  let first = engine.submit("subs", |_ctx| Ok(())).unwrap();
  assert_eq!(engine.watch(&first).unwrap().wait(), TaskState::Succeeded);
  assert!(common::wait_until(Duration::from_secs(2), || finished_count.load(Ordering::SeqCst) == 1));

  assert!(engine.unsubscribe(subscription));
  assert!(!engine.unsubscribe(subscription));

  engine.submit("subs", |_ctx| Ok(())).unwrap();
  engine.shutdown_pool("subs", ShutdownMode::Graceful).unwrap();
  assert_eq!(finished_count.load(Ordering::SeqCst), 1);
}

#[test]
fn test_pool_lifecycle_events() {
  setup_tracing_for_test();
  let engine = bare_engine();
  let pool_events = Arc::new(Mutex::new(Vec::new()));
  let sink = pool_events.clone();
  engine.on_pool_event(move |event: &PoolEvent| sink.lock().unwrap().push(event.clone()));

  engine.create_pool("observed", PoolConfig::io(2)).unwrap();
  assert!(engine.create_pool("observed", PoolConfig::io(2)).is_err());
  engine.shutdown_pool("observed", ShutdownMode::Graceful).unwrap();

  assert_eq!(
    *pool_events.lock().unwrap(),
    vec![
      PoolEvent::Created {
        name: "observed".to_string(),
        kind: PoolKind::IoBound,
      },
      PoolEvent::Closed {
        name: "observed".to_string(),
      },
    ]
  );
}
