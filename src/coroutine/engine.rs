// Single-threaded cooperative scheduler: `start`/`yield`/`sched`/`block`/
// `unblock` over an alive list and a blocked list, grounded on the
// original coroutine engine's primitives. The original copies one shared
// stack in and out of each routine's save buffer on every switch; this
// implementation instead gives each routine its own small stack (the
// mechanism substitution the design notes license) so a switch is just a
// register-file swap, no memcpy.

use std::cell::{Cell, RefCell, UnsafeCell};
use std::collections::VecDeque;

use super::context::{swap, Context};
use super::routine::{Routine, DEFAULT_STACK_BYTES};

thread_local! {
    static ENGINE_PTR: Cell<*const Engine> = Cell::new(std::ptr::null());
}

/// A handle to a routine owned by one `Engine`. Not valid across engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutineId(pub(crate) usize);

/// A stackful cooperative scheduler bound to the OS thread that calls
/// `run`. Not `Send`/`Sync`: `unblock` must be called from the engine's
/// own thread, same as the source requires.
pub struct Engine {
    arena: UnsafeCell<Vec<Routine>>,
    alive: RefCell<VecDeque<usize>>,
    blocked: RefCell<VecDeque<usize>>,
    cur: Cell<Option<usize>>,
    main_ctx: UnsafeCell<Context>,
    stack_bytes: usize,
}

impl Engine {
    pub fn new() -> Self {
        Self::with_stack_bytes(DEFAULT_STACK_BYTES)
    }

    pub fn with_stack_bytes(stack_bytes: usize) -> Self {
        Self {
            arena: UnsafeCell::new(Vec::new()),
            alive: RefCell::new(VecDeque::new()),
            blocked: RefCell::new(VecDeque::new()),
            cur: Cell::new(None),
            main_ctx: UnsafeCell::new(Context::default()),
            stack_bytes,
        }
    }

    #[allow(clippy::mut_from_ref)]
    fn arena(&self) -> &mut Vec<Routine> {
        // SAFETY: the engine is single-threaded and every access is
        // sequenced by a context switch; no two live references overlap.
        unsafe { &mut *self.arena.get() }
    }

    fn new_routine<F>(&self, entry: F) -> usize
    where
        F: FnOnce() + 'static,
    {
        let idx = {
            let arena = self.arena();
            arena.push(Routine::new(self.stack_bytes, Box::new(entry)));
            arena.len() - 1
        };
        let (ctx, stack) = {
            let routine = &mut self.arena()[idx];
            (&mut routine.ctx as *mut Context, &routine.stack as *const _)
        };
        unsafe { super::context::prepare(&mut *ctx, &*stack, trampoline) };
        idx
    }

    /// Registers a new routine in the alive list without running it yet.
    pub fn spawn<F>(&self, entry: F) -> RoutineId
    where
        F: FnOnce() + 'static,
    {
        let idx = self.new_routine(entry);
        self.alive.borrow_mut().push_back(idx);
        RoutineId(idx)
    }

    /// Starts the scheduler: spawns `entry` and runs until the alive list
    /// has fully drained (every routine has returned or is parked in the
    /// blocked list with nothing left runnable).
    pub fn run<F>(&self, entry: F)
    where
        F: FnOnce() + 'static,
    {
        let idx = self.new_routine(entry);
        ENGINE_PTR.with(|p| p.set(self as *const Engine));
        self.do_switch(Some(idx));
        ENGINE_PTR.with(|p| p.set(std::ptr::null()));
    }

    fn do_switch(&self, target: Option<usize>) {
        let from: *mut Context = match self.cur.get() {
            Some(i) => &mut self.arena()[i].ctx as *mut Context,
            None => self.main_ctx.get(),
        };
        let to: *const Context = match target {
            Some(i) => &self.arena()[i].ctx as *const Context,
            None => self.main_ctx.get() as *const Context,
        };
        self.cur.set(target);
        unsafe { swap(from, to) };
    }

    /// Surrenders to the next alive routine other than the caller. Returns
    /// immediately, without switching, if no other routine is alive.
    pub fn yield_now(&self) {
        let next = self.alive.borrow_mut().pop_front();
        match next {
            Some(next_idx) => {
                if let Some(cur) = self.cur.get() {
                    self.alive.borrow_mut().push_back(cur);
                }
                self.do_switch(Some(next_idx));
            }
            None => {}
        }
    }

    /// Switches directly to `r`. Degrades to `yield_now` if `r` is the
    /// caller itself or is not currently alive.
    pub fn sched(&self, r: RoutineId) {
        if self.cur.get() == Some(r.0) {
            return self.yield_now();
        }
        let found = {
            let mut alive = self.alive.borrow_mut();
            match alive.iter().position(|&i| i == r.0) {
                Some(pos) => {
                    alive.remove(pos);
                    true
                }
                None => false,
            }
        };
        if !found {
            return self.yield_now();
        }
        if let Some(cur) = self.cur.get() {
            self.alive.borrow_mut().push_back(cur);
        }
        self.do_switch(Some(r.0));
    }

    /// Moves `r` (or the caller, if `None`) to the blocked list. Blocking
    /// the caller switches away immediately.
    pub fn block(&self, r: Option<RoutineId>) {
        let target = match r.map(|x| x.0).or_else(|| self.cur.get()) {
            Some(t) => t,
            None => return,
        };
        {
            let mut alive = self.alive.borrow_mut();
            if let Some(pos) = alive.iter().position(|&i| i == target) {
                alive.remove(pos);
            }
        }
        self.blocked.borrow_mut().push_back(target);

        if self.cur.get() == Some(target) {
            let next = self.alive.borrow_mut().pop_front();
            self.do_switch(next);
        }
    }

    /// Moves `r` from blocked back to alive. Does not preempt the caller.
    pub fn unblock(&self, r: RoutineId) {
        let mut blocked = self.blocked.borrow_mut();
        if let Some(pos) = blocked.iter().position(|&i| i == r.0) {
            blocked.remove(pos);
            drop(blocked);
            self.alive.borrow_mut().push_back(r.0);
        }
    }

    /// Resumes scheduling from outside any routine: switches into the
    /// next alive routine, if there is one. Used by a driver loop that
    /// calls `unblock` (after observing socket readiness, say) and then
    /// wants the newly-alive routine to actually run. Returns `false`
    /// without switching if nothing is alive.
    pub fn resume(&self) -> bool {
        let next = self.alive.borrow_mut().pop_front();
        match next {
            Some(idx) => {
                ENGINE_PTR.with(|p| p.set(self as *const Engine));
                self.do_switch(Some(idx));
                ENGINE_PTR.with(|p| p.set(std::ptr::null()));
                true
            }
            None => false,
        }
    }

    pub fn has_work(&self) -> bool {
        !self.alive.borrow().is_empty() || !self.blocked.borrow().is_empty()
    }

    pub fn is_alive(&self, r: RoutineId) -> bool {
        self.cur.get() == Some(r.0) || self.alive.borrow().iter().any(|&i| i == r.0)
    }

    pub fn is_blocked(&self, r: RoutineId) -> bool {
        self.blocked.borrow().iter().any(|&i| i == r.0)
    }

    pub fn is_finished(&self, r: RoutineId) -> bool {
        self.arena()[r.0].finished
    }

    fn finish_current(&self) {
        let idx = self.cur.get().expect("finish_current without a current routine");
        self.arena()[idx].finished = true;
        let next = self.alive.borrow_mut().pop_front();
        self.do_switch(next);
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

extern "C" fn trampoline() -> ! {
    let engine = ENGINE_PTR.with(|p| p.get());
    let engine: &Engine = unsafe { &*engine };
    let idx = engine.cur.get().expect("trampoline entered without a current routine");
    let entry = engine.arena()[idx]
        .entry
        .take()
        .expect("routine entry already consumed");
    entry();
    engine.finish_current();
    unreachable!("finish_current never switches back into a finished routine")
}
