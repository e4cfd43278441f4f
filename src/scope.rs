use std::cell::Cell;

use crate::error::Result;


// Tensor buffers register here on allocation and deregister on drop.
// The graph is Rc-based and never crosses threads, so the count is
// kept per thread.
thread_local! {
  static LIVE_BUFFERS: Cell<usize> = Cell::new(0);
}

pub(crate) fn buffer_created() {
  LIVE_BUFFERS.with(|live| live.set(live.get() + 1) );
}

pub(crate) fn buffer_dropped() {
  LIVE_BUFFERS.with(|live| live.set(live.get() - 1) );
}

/// Number of tensor buffers currently alive on this thread.
///
/// After a completed training step this equals the parameter buffers of
/// both models plus the optimizer moment buffers plus the session's
/// cached constants; everything else was allocated and released inside
/// the step's scope.

pub fn live_buffers() -> usize {
  LIVE_BUFFERS.with(|live| live.get() )
}


/// Run a fallible body as one allocation scope.
///
/// Every tensor created during `body` is owned by bindings inside the
/// closure, so it is released when the closure finishes, whether it
/// returns `Ok` or propagates an error with `?`. Values escape the
/// scope only by being returned or moved into a longer-lived owner
/// (model parameters, optimizer moments).
///
/// The entry and exit counts are traced so leaks show up in logs long
/// before they show up in memory profiles.

pub fn with_scope<R>(body: impl FnOnce() -> Result<R>) -> Result<R> {
  let guard = ScopeGuard::enter();
  let out = body();
  guard.exit(out.is_err());
  out
}


struct ScopeGuard {
  entered: usize,
}

impl ScopeGuard {
  fn enter() -> Self {
    Self { entered: live_buffers() }
  }

  fn exit(self, failed: bool) {
    let now = live_buffers();
    log::trace!(
      "scope exit{}: {} buffers live ({} at entry, {} retained)",
      if failed { " (error path)" } else { "" },
      now,
      self.entered,
      now.saturating_sub(self.entered),
    );
  }
}


#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::Error;
  use crate::shape::Shape;
  use crate::tensor::Tensor;

  #[test]
  fn intermediates_are_released() {
    let before = live_buffers();
    let kept = with_scope(|| {
      let a = Tensor::<f32>::zeros(&[4, 4]);
      let b = Tensor::<f32>::ones(&[4, 4]);
      let c = &a + &b;
      Ok(c)
    }).unwrap();
    // Only the returned tensor survived
    assert_eq!(live_buffers(), before + 1);
    drop(kept);
    assert_eq!(live_buffers(), before);
  }

  #[test]
  fn released_on_error_path() {
    let before = live_buffers();
    let result: Result<Tensor<f32>> = with_scope(|| {
      let _a = Tensor::<f32>::zeros(&[8, 8]);
      let _b = Tensor::<f32>::ones(&[8, 8]);
      Err(Error::Shape {
        op: "test",
        lhs: Shape::new(&[8, 8]),
        rhs: Shape::new(&[2]),
      })
    });
    assert!(result.is_err());
    assert_eq!(live_buffers(), before);
  }

  #[test]
  fn views_share_one_buffer() {
    let before = live_buffers();
    let t = Tensor::<f32>::zeros(&[4, 4]);
    let _v = t.range(&[0..4, 1..4]);
    let _w = t.transpose(0, 1);
    assert_eq!(live_buffers(), before + 1);
  }
}
