//! A test-runner for flushing out data-races in lock-free structures.

use std::{
    cell::RefCell,
    hint,
    sync::{Arc, atomic::{AtomicBool, AtomicUsize, Ordering}},
    thread::{self, JoinHandle},
};

/// Lockstep is a multi-thread coordinator running user-specified steps _in lockstep_ across multiple threads.
///
/// Lockstep allows the user to:
///
/// -   Register a Shared state, accessible from all threads.
/// -   Register N instances of a Local state, each dedicated to a single thread.
/// -   Register S steps, which will run on each thread, each step starting on all threads as simultaneously as
///     possible, and only once all threads have completed the previous step.
///
/// Constructing a `Lockstep` is done through a `LockstepBuilder`.
pub struct Lockstep<Shared, Local> {
    shared: Arc<Shared>,
    threads: RefCell<Vec<JoinHandle<Local>>>,
    locals: RefCell<Vec<Local>>,
}

impl<Shared, Local> Lockstep<Shared, Local> {
    /// Joins the threads, and collects their Local states.
    ///
    /// #   Panics
    ///
    /// -   If any of the threads panicked.
    pub fn join(&self) {
        let threads = self.threads.replace(vec!());

        if threads.is_empty() {
            return;
        }

        let locals = threads.into_iter()
            .map(|handle| handle.join().expect("Thread to succeed"))
            .collect();

        self.locals.replace(locals);
    }

    /// Returns a reference to the Shared state.
    ///
    /// #   Warning
    ///
    /// Access is provided _without_ joining the threads first.
    pub fn shared(&self) -> &Shared { &self.shared }

    /// Returns a clone of the Local states, in the order they were registered.
    ///
    /// Calls `self.join()` to collect them first, if not already done.
    pub fn locals(&self) -> Vec<Local>
        where
            Local: Clone,
    {
        self.join();

        self.locals.borrow().clone()
    }
}

impl<Shared, Local> Drop for Lockstep<Shared, Local> {
    fn drop(&mut self) {
        if !thread::panicking() {
            self.join();
        }
    }
}

/// LockstepBuilder, a builder for a `Lockstep` instance.
///
/// #   Example
///
/// ```
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use fbmalloc_test::LockstepBuilder;
///
/// let mut builder = LockstepBuilder::new(AtomicUsize::new(0), vec!(1, 10));
///
/// builder.add_step(|| |shared: &AtomicUsize, local: &mut usize| { shared.fetch_add(*local, Ordering::Relaxed); });
///
/// let lockstep = builder.launch(4);
/// lockstep.join();
///
/// assert_eq!(44, lockstep.shared().load(Ordering::Relaxed));
/// assert_eq!(vec!(1, 10), lockstep.locals());
/// ```
pub struct LockstepBuilder<Shared, Local> {
    shared: Arc<Shared>,
    locals: Vec<Local>,
    steps: Vec<Vec<Step<Shared, Local>>>,
}

//  A step, invoked with the shared state, the local state, and the gate to pass once prepared.
type Step<Shared, Local> = Box<dyn FnMut(&Shared, &mut Local, &dyn Fn()) + Send + 'static>;

impl<Shared, Local> LockstepBuilder<Shared, Local>
    where
        Shared: Send + Sync + 'static,
        Local: Send + 'static,
{
    /// Creates an instance, which will run one thread per Local state.
    ///
    /// #   Panics
    ///
    /// -   If `locals` is empty.
    pub fn new(shared: Shared, locals: Vec<Local>) -> Self {
        assert!(!locals.is_empty(), "Cannot run in lockstep without a single thread");

        let steps = locals.iter().map(|_| vec!()).collect();

        Self { shared: Arc::new(shared), locals, steps }
    }

    /// Adds a step on each thread.
    ///
    /// The step is created by invoking `factory` once per thread.
    pub fn add_step<Factory, S>(&mut self, mut factory: Factory)
        where
            Factory: FnMut() -> S,
            S: FnMut(&Shared, &mut Local) + Send + 'static,
    {
        self.add_prepared_step(move || {
            let mut step = factory();
            (|_: &Shared, _: &mut Local| (), move |shared: &Shared, local: &mut Local, _: ()| step(shared, local))
        });
    }

    /// Adds a step on each thread, split in two halves created by invoking `factory` once per thread:
    ///
    /// -   The preparation, returning R, which runs _before_ waiting for the other threads; ideal for expensive work.
    /// -   The step itself, which runs once all threads are prepared.
    pub fn add_prepared_step<Factory, Prep, R, S>(&mut self, mut factory: Factory)
        where
            Factory: FnMut() -> (Prep, S),
            Prep: FnMut(&Shared, &mut Local) -> R + Send + 'static,
            S: FnMut(&Shared, &mut Local, R) + Send + 'static,
    {
        for serie in &mut self.steps {
            let (mut prep, mut step) = factory();

            serie.push(Box::new(move |shared: &Shared, local: &mut Local, pass: &dyn Fn()| {
                let prepared = prep(shared, local);
                pass();
                step(shared, local, prepared);
            }));
        }
    }

    /// Launches the threads, each running its serie of steps `iterations` times.
    ///
    /// #   Panics
    ///
    /// -   If no step was added.
    pub fn launch(self, iterations: usize) -> Lockstep<Shared, Local> {
        assert!(!self.steps[0].is_empty(), "Cannot run in lockstep without a single step");

        let gate = Arc::new(Gate::new(self.locals.len()));
        let mut threads = vec!();

        for (mut local, mut serie) in self.locals.into_iter().zip(self.steps.into_iter()) {
            let shared = self.shared.clone();
            let gate = gate.clone();

            threads.push(thread::spawn(move || {
                let guard = PoisonGuard(&gate);

                for _ in 0..iterations {
                    for step in &mut serie {
                        step(&shared, &mut local, &|| gate.pass());
                    }
                }

                gate.pass();
                guard.dismiss();

                local
            }));
        }

        Lockstep { shared: self.shared, threads: RefCell::new(threads), locals: RefCell::new(vec!()) }
    }
}

//
//  Implementation details
//

//  A reusable spinning barrier.
//
//  The last thread to arrive re-arms the count, then opens the gate by bumping the generation.
struct Gate {
    remaining: AtomicUsize,
    generation: AtomicUsize,
    poisoned: AtomicBool,
    count: usize,
}

impl Gate {
    fn new(count: usize) -> Self {
        Self { remaining: AtomicUsize::new(count), generation: AtomicUsize::new(0), poisoned: AtomicBool::new(false), count }
    }

    fn pass(&self) {
        let generation = self.generation.load(Ordering::Acquire);

        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.remaining.store(self.count, Ordering::Relaxed);
            self.generation.fetch_add(1, Ordering::Release);
            return;
        }

        while self.generation.load(Ordering::Acquire) == generation {
            if self.poisoned.load(Ordering::Relaxed) {
                panic!("Another thread panicked");
            }

            hint::spin_loop();
        }
    }

    fn poison(&self) { self.poisoned.store(true, Ordering::Relaxed); }
}

//  If a single thread panics, the others must stop waiting for it.
struct PoisonGuard<'a>(&'a Gate);

impl PoisonGuard<'_> {
    fn dismiss(self) { std::mem::forget(self) }
}

impl Drop for PoisonGuard<'_> {
    fn drop(&mut self) { self.0.poison(); }
}

// mod tests
