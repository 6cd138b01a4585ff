use crate::task::ErrorInfo;

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Once;

static INSTALL_HOOK: Once = Once::new();

thread_local! {
  /// Set while a task body runs on this thread.
  static CAPTURING: Cell<bool> = const { Cell::new(false) };
  /// Trace of the last panic raised while `CAPTURING` was set.
  static LAST_PANIC: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// Chains a panic hook that records the faulting location and a backtrace
/// taken at the panic site. The previous hook still runs afterwards.
fn install_hook() {
  INSTALL_HOOK.call_once(|| {
    let previous = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
      if CAPTURING.with(Cell::get) {
        let location = info
          .location()
          .map(|location| format!("{}:{}:{}", location.file(), location.line(), location.column()))
          .unwrap_or_else(|| "<unknown location>".to_string());
        let trace = format!("panicked at {}\n{}", location, Backtrace::force_capture());
        LAST_PANIC.with(|slot| *slot.borrow_mut() = Some(trace));
      }
      previous(info);
    }));
  });
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
  if let Some(s) = payload.downcast_ref::<&str>() {
    (*s).to_string()
  } else if let Some(s) = payload.downcast_ref::<String>() {
    s.clone()
  } else {
    "non-string panic payload".to_string()
  }
}

/// Runs `body`, turning a panic into an `ErrorInfo` whose trace describes
/// where the body panicked.
pub(crate) fn catch_task_panic<R>(body: impl FnOnce() -> R) -> Result<R, ErrorInfo> {
  install_hook();
  let was_capturing = CAPTURING.with(|flag| flag.replace(true));
  let caught = panic::catch_unwind(AssertUnwindSafe(body));
  CAPTURING.with(|flag| flag.set(was_capturing));
  let captured = LAST_PANIC.with(|slot| slot.borrow_mut().take());

  caught.map_err(|payload| {
    let trace = captured.unwrap_or_else(|| Backtrace::force_capture().to_string());
    ErrorInfo::new(format!("task panicked: {}", panic_message(payload.as_ref())), trace)
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[inline(never)]
  fn fail_deep_inside() -> u32 {
    panic!("deep failure")
  }

  #[test]
  fn test_trace_points_at_panic_site() {
    let info = catch_task_panic(fail_deep_inside).unwrap_err();
    assert_eq!(info.message, "task panicked: deep failure");
    assert!(info.trace.starts_with("panicked at "), "trace: {}", info.trace);
    assert!(info.trace.contains("panic_trace.rs"), "trace: {}", info.trace);
    assert!(info.trace.contains("fail_deep_inside"), "trace: {}", info.trace);
  }

  #[test]
  fn test_successful_body_leaves_no_capture_behind() {
    assert_eq!(catch_task_panic(|| 5), Ok(5));
    let nested = catch_task_panic(|| panic::catch_unwind(|| panic!("swallowed")).is_err());
    assert_eq!(nested, Ok(true));
    assert!(LAST_PANIC.with(|slot| slot.borrow().is_none()));
  }
}
