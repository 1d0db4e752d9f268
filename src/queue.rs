//! The work queue that orders deferred verification and lowering tasks.
//!
//! Items that cannot make progress yet return [`WorkResult::Deferred`] and go
//! to the back of the queue. A debug-only counter asserts that the number of
//! consecutive deferrals never exceeds the queue length, which catches
//! infinite deferral cycles.

use std::collections::VecDeque;
use crate::context::CtxId;
use crate::types::ast::ExprId;

/// The kinds of deferrable work.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WorkKind {
  /// Compute the qualified type of a node.
  VerifyType(ExprId),
  /// Verify the body of a function, jump, struct, or enum literal.
  VerifyBody(ExprId),
  /// Evaluate and store a constant declaration's value.
  EmitValue(ExprId),
  /// Emit the struct-completion function and special members.
  CompleteStructMembers(ExprId),
}

/// One queued task, bound to the context it must run in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkItem {
  /// The context to run in.
  pub ctx: CtxId,
  /// The work to do.
  pub kind: WorkKind,
}

/// What a work item did.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum WorkResult {
  /// Done.
  Success,
  /// Done, with diagnostics.
  Failure,
  /// Cannot run yet; retry after the rest of the queue.
  Deferred,
}

/// A FIFO of work items.
#[derive(Debug, Default)]
pub struct WorkQueue {
  items: VecDeque<WorkItem>,
  #[cfg(debug_assertions)]
  cycle_breaker_count: usize,
}

impl WorkQueue {
  /// An empty queue.
  #[must_use] pub fn new() -> Self { Self::default() }

  /// Is there nothing left to do?
  #[must_use] pub fn is_empty(&self) -> bool { self.items.is_empty() }

  /// The number of pending items.
  #[must_use] pub fn len(&self) -> usize { self.items.len() }

  /// Add an item to the back of the queue.
  pub fn enqueue(&mut self, item: WorkItem) {
    log::trace!("enqueue {item:?}");
    self.items.push_back(item);
  }

  /// Pop the front item. The caller must hand the item back to
  /// [`Self::finish`] with the result of processing it.
  pub fn pop(&mut self) -> Option<WorkItem> { self.items.pop_front() }

  /// Record the result of a popped item, requeueing it if it deferred.
  pub fn finish(&mut self, item: WorkItem, result: WorkResult) {
    let deferred = result == WorkResult::Deferred;
    if deferred {
      log::trace!("deferring {item:?}");
      self.items.push_back(item);
    }
    #[cfg(debug_assertions)]
    {
      self.cycle_breaker_count = if deferred { self.cycle_breaker_count + 1 } else { 0 };
      assert!(self.cycle_breaker_count <= self.items.len(), "work queue deferral cycle");
    }
  }

  /// Pop the front item, run it, and requeue it if it deferred.
  pub fn process_one_item(&mut self, f: impl FnOnce(&WorkItem) -> WorkResult) {
    let item = self.pop().expect("queue is empty");
    let result = f(&item);
    self.finish(item, result);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn item(n: u32) -> WorkItem {
    WorkItem { ctx: CtxId::ROOT, kind: WorkKind::VerifyType(ExprId(n)) }
  }

  #[test]
  fn deferred_items_requeue() {
    let mut q = WorkQueue::new();
    q.enqueue(item(0));
    q.enqueue(item(1));
    q.process_one_item(|_| WorkResult::Deferred);
    assert_eq!(q.len(), 2);
    q.process_one_item(|it| {
      assert_eq!(it.kind, WorkKind::VerifyType(ExprId(1)));
      WorkResult::Success
    });
    q.process_one_item(|it| {
      assert_eq!(it.kind, WorkKind::VerifyType(ExprId(0)));
      WorkResult::Success
    });
    assert!(q.is_empty());
  }

  #[test]
  #[should_panic(expected = "deferral cycle")]
  fn deferral_cycles_are_caught() {
    let mut q = WorkQueue::new();
    q.enqueue(item(0));
    for _ in 0..3 { q.process_one_item(|_| WorkResult::Deferred) }
  }
}
