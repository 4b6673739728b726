//! Tasks and the cooperative scheduler.
//!
//! A task owns its operand stack, call frames, open upvalues and try
//! handlers. The VM runs one task at a time; the others wait in a queue and
//! only change hands between instructions.

use std::rc::Rc;
use std::time::{Duration, Instant};

use super::{Vm, VmError, VmResult};
use crate::chunk::Chunk;
use crate::gc::{Heap, ObjRef};
use crate::object::{Obj, ObjTask, TaskStatus, Upvalue};
use crate::value::Value;

/// Id of the task `interpret` starts the script on.
pub(crate) const MAIN_TASK: u32 = 0;

/// Instructions a task runs before the scheduler looks at the queue.
pub(crate) const TASK_QUANTUM: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FrameKind {
    Function,
    /// Runs a module body. `require` pushes the package when the frame
    /// returns; `import` leaves nothing behind.
    Package { require: bool },
}

#[derive(Debug, Clone)]
pub(crate) struct CallFrame {
    pub closure: ObjRef,
    pub chunk: Rc<Chunk>,
    pub ip: usize,
    /// Stack index of slot 0.
    pub base: usize,
    pub package: Option<ObjRef>,
    pub kind: FrameKind,
    /// Arguments as passed, kept only when the function reads `args`.
    pub args: Vec<Value>,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct TryFrame {
    /// Frame count when the handler was installed.
    pub depth: usize,
    pub height: usize,
    pub catch_ip: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum TaskState {
    Ready,
    Sleeping { since: Instant, until: Instant },
    /// Waiting for the task with this id to finish.
    Parked(u32),
}

#[derive(Debug)]
pub(crate) struct Task {
    pub id: u32,
    pub handle: ObjRef,
    pub stack: Vec<Value>,
    pub frames: Vec<CallFrame>,
    /// Sorted by slot, ascending.
    pub open_upvalues: Vec<(usize, ObjRef)>,
    pub tries: Vec<TryFrame>,
    pub state: TaskState,
}

impl Task {
    pub fn new(id: u32, handle: ObjRef) -> Self {
        Task {
            id,
            handle,
            stack: Vec::with_capacity(256),
            frames: Vec::with_capacity(16),
            open_upvalues: Vec::new(),
            tries: Vec::new(),
            state: TaskState::Ready,
        }
    }

    pub fn is_done(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn frame(&self) -> &CallFrame {
        self.frames.last().unwrap_or_else(|| unreachable!("task {} has no active frame", self.id))
    }

    pub fn frame_mut(&mut self) -> &mut CallFrame {
        let id = self.id;
        self.frames.last_mut().unwrap_or_else(|| unreachable!("task {id} has no active frame"))
    }

    /// Returns the open upvalue for `slot`, creating it if needed.
    pub fn capture_upvalue(&mut self, heap: &mut Heap, slot: usize) -> ObjRef {
        match self.open_upvalues.binary_search_by_key(&slot, |&(s, _)| s) {
            Ok(i) => self.open_upvalues[i].1,
            Err(i) => {
                let upvalue = heap.alloc(Obj::Upvalue(Upvalue::Open { task: self.id, slot }));
                self.open_upvalues.insert(i, (slot, upvalue));
                upvalue
            }
        }
    }

    /// Closes every open upvalue at or above `from`.
    pub fn close_upvalues(&mut self, heap: &mut Heap, from: usize) {
        while let Some(&(slot, upvalue)) = self.open_upvalues.last() {
            if slot < from {
                break;
            }
            let value = self.stack.get(slot).copied().unwrap_or_default();
            *heap.upvalue_mut(upvalue) = Upvalue::Closed(value);
            self.open_upvalues.pop();
        }
    }

    /// Drops all execution state. Captured variables survive in their cells.
    pub fn reset(&mut self, heap: &mut Heap) {
        self.close_upvalues(heap, 0);
        self.stack.clear();
        self.frames.clear();
        self.tries.clear();
        self.state = TaskState::Ready;
    }

    pub(crate) fn roots(&self, out: &mut Vec<ObjRef>) {
        out.push(self.handle);
        out.extend(self.stack.iter().filter_map(|v| v.as_obj()));
        for frame in &self.frames {
            out.push(frame.closure);
            out.extend(frame.package);
            out.extend(frame.args.iter().filter_map(|v| v.as_obj()));
        }
        out.extend(self.open_upvalues.iter().map(|&(_, u)| u));
    }
}

// ── Scheduling ──────────────────────────────────────────────────────

impl Vm {
    pub(crate) fn spawn_task(&mut self, closure: ObjRef) -> ObjRef {
        self.next_task_id += 1;
        let id = self.next_task_id;
        let name = self.heap.intern(&format!("task-{id}"));
        let handle = self.heap.alloc(Obj::Task(ObjTask {
            name,
            id,
            status: TaskStatus::Running,
            result: Value::None,
        }));

        let mut task = Task::new(id, handle);
        task.stack.push(Value::Obj(closure));
        let chunk = Rc::clone(&self.heap.function(self.heap.closure(closure).function).chunk);
        task.frames.push(CallFrame {
            closure,
            chunk,
            ip: 0,
            base: 0,
            package: self.heap.closure(closure).package,
            kind: FrameKind::Function,
            args: Vec::new(),
        });
        self.queue.push_back(task);
        handle
    }

    /// Records the current task's result and wakes its waiters.
    pub(crate) fn finish_task(&mut self, result: Value) {
        let id = self.task.id;
        let handle = self.heap.task_mut(self.task.handle);
        handle.status = TaskStatus::Finished;
        handle.result = result;
        if id == MAIN_TASK {
            self.main_result = Some(result);
        }
        self.wake_waiters(id);
    }

    fn wake_waiters(&mut self, id: u32) {
        for task in self.queue.iter_mut() {
            if task.state == TaskState::Parked(id) {
                task.state = TaskState::Ready;
            }
        }
        if self.task.state == TaskState::Parked(id) {
            self.task.state = TaskState::Ready;
        }
    }

    /// Ends another task immediately. Its pending `catch` blocks never run.
    pub(crate) fn abort_task(&mut self, handle: ObjRef) -> VmResult {
        let id = self.heap.task(handle).id;
        if id == self.task.id {
            return Err(VmError::Message("A task cannot abort itself.".into()));
        }
        let Some(index) = self.queue.iter().position(|t| t.id == id) else {
            // already finished
            return Ok(());
        };
        if let Some(mut task) = self.queue.remove(index) {
            task.reset(&mut self.heap);
        }
        let handle = self.heap.task_mut(handle);
        handle.status = TaskStatus::Aborted;
        handle.result = Value::None;
        if id == MAIN_TASK {
            self.main_result = Some(Value::None);
        }
        self.wake_waiters(id);
        Ok(())
    }

    /// Hands the VM to the next runnable task, round robin. Returns `false`
    /// once every task has finished.
    pub(crate) fn schedule(&mut self) -> VmResult<bool> {
        loop {
            let mut earliest: Option<Instant> = None;
            for _ in 0..self.queue.len() {
                let Some(mut candidate) = self.queue.pop_front() else { break };
                let runnable = match candidate.state {
                    TaskState::Ready => true,
                    TaskState::Sleeping { since, until } if Instant::now() >= until => {
                        candidate.state = TaskState::Ready;
                        if let Some(top) = candidate.stack.last_mut() {
                            *top = Value::Number(since.elapsed().as_secs_f64());
                        }
                        true
                    }
                    TaskState::Sleeping { until, .. } => {
                        earliest = Some(earliest.map_or(until, |e| e.min(until)));
                        false
                    }
                    TaskState::Parked(_) => false,
                };
                if runnable {
                    let previous = std::mem::replace(&mut self.task, candidate);
                    if !previous.is_done() {
                        self.queue.push_back(previous);
                    }
                    return Ok(true);
                }
                self.queue.push_back(candidate);
            }

            // Nothing else can run; the current task may still be able to.
            if !self.task.is_done() {
                match self.task.state {
                    TaskState::Ready => return Ok(true),
                    TaskState::Sleeping { since, until } if Instant::now() >= until => {
                        self.task.state = TaskState::Ready;
                        if let Some(top) = self.task.stack.last_mut() {
                            *top = Value::Number(since.elapsed().as_secs_f64());
                        }
                        return Ok(true);
                    }
                    TaskState::Sleeping { until, .. } => {
                        earliest = Some(earliest.map_or(until, |e| e.min(until)));
                    }
                    TaskState::Parked(_) => {}
                }
            }

            match earliest {
                Some(deadline) => {
                    std::thread::sleep(deadline.saturating_duration_since(Instant::now()));
                }
                None if self.queue.is_empty() && self.task.is_done() => return Ok(false),
                None => {
                    // Every live task waits on another one. The error goes to
                    // the main task when it is still alive.
                    let pick = self.queue.iter().position(|t| t.id == MAIN_TASK).or(Some(0));
                    if self.task.id != MAIN_TASK || self.task.is_done() {
                        if let Some(next) = pick.and_then(|i| self.queue.remove(i)) {
                            let previous = std::mem::replace(&mut self.task, next);
                            if !previous.is_done() {
                                self.queue.push_back(previous);
                            }
                        }
                    }
                    self.task.state = TaskState::Ready;
                    return Err(VmError::Deadlock);
                }
            }
        }
    }

    /// Puts the current task to sleep for `seconds`.
    pub(crate) fn sleep_current(&mut self, seconds: f64) {
        let since = Instant::now();
        let until = since + Duration::from_secs_f64(seconds.max(0.0));
        self.task.state = TaskState::Sleeping { since, until };
    }

    /// Drops every task but the current one, closing their upvalues.
    pub(crate) fn drop_other_tasks(&mut self) {
        while let Some(mut task) = self.queue.pop_front() {
            task.reset(&mut self.heap);
            let handle = self.heap.task_mut(task.handle);
            handle.status = TaskStatus::Aborted;
        }
    }

    // ── Upvalues ────────────────────────────────────────────────────

    fn task_by_id(&self, id: u32) -> Option<&Task> {
        if self.task.id == id {
            return Some(&self.task);
        }
        self.queue.iter().find(|t| t.id == id)
    }

    fn task_by_id_mut(&mut self, id: u32) -> Option<&mut Task> {
        if self.task.id == id {
            return Some(&mut self.task);
        }
        self.queue.iter_mut().find(|t| t.id == id)
    }

    pub(crate) fn read_upvalue(&self, upvalue: ObjRef) -> Value {
        match *self.heap.upvalue(upvalue) {
            Upvalue::Closed(value) => value,
            Upvalue::Open { task, slot } => self
                .task_by_id(task)
                .and_then(|t| t.stack.get(slot).copied())
                .unwrap_or_default(),
        }
    }

    pub(crate) fn write_upvalue(&mut self, upvalue: ObjRef, value: Value) {
        match *self.heap.upvalue(upvalue) {
            Upvalue::Closed(_) => *self.heap.upvalue_mut(upvalue) = Upvalue::Closed(value),
            Upvalue::Open { task, slot } => {
                if let Some(cell) = self.task_by_id_mut(task).and_then(|t| t.stack.get_mut(slot)) {
                    *cell = value;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gc::GcConfig;

    fn task(heap: &mut Heap) -> Task {
        let name = heap.intern("t");
        let handle = heap.alloc(Obj::Task(ObjTask { name, id: 7, status: TaskStatus::Running, result: Value::None }));
        Task::new(7, handle)
    }

    #[test]
    fn capture_reuses_open_cells_per_slot() {
        let mut heap = Heap::new(GcConfig::default());
        let mut t = task(&mut heap);
        t.stack.extend([Value::Number(1.0), Value::Number(2.0), Value::Number(3.0)]);
        let a = t.capture_upvalue(&mut heap, 2);
        let b = t.capture_upvalue(&mut heap, 0);
        assert_eq!(t.capture_upvalue(&mut heap, 2), a);
        assert_ne!(a, b);
        assert_eq!(t.open_upvalues.iter().map(|&(s, _)| s).collect::<Vec<_>>(), vec![0, 2]);
    }

    #[test]
    fn closing_copies_stack_values() {
        let mut heap = Heap::new(GcConfig::default());
        let mut t = task(&mut heap);
        t.stack.extend([Value::Number(1.0), Value::Number(2.0)]);
        let low = t.capture_upvalue(&mut heap, 0);
        let high = t.capture_upvalue(&mut heap, 1);
        t.close_upvalues(&mut heap, 1);
        assert_eq!(*heap.upvalue(high), Upvalue::Closed(Value::Number(2.0)));
        assert_eq!(*heap.upvalue(low), Upvalue::Open { task: 7, slot: 0 });
        t.reset(&mut heap);
        assert_eq!(*heap.upvalue(low), Upvalue::Closed(Value::Number(1.0)));
        assert!(t.open_upvalues.is_empty());
    }
}
