//! Process groups.
//!
//! A [`Comm`] is the fixed set of cooperating ranks a distributed vector is
//! partitioned over. Every collective (`barrier`, `sum_exscan`,
//! `all_reduce_sum`) must be called by all ranks of the group in the same
//! order, otherwise the group deadlocks.
//!
//! Two implementations ship with the crate:
//! - [`Comm::world`]: a single-process group (rank 0 of 1)
//! - [`Comm::spawn_group`]: an in-process group with one OS thread per rank

use crate::error::{PkError, PkResult};
use crate::numeric::{Real, scaled_norm};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock};

/// Collective operations a process group must provide.
pub trait Communicator: Send + Sync + fmt::Debug {
    /// Rank of the calling process, in `0..size()`.
    fn rank(&self) -> usize;

    /// Number of ranks in the group.
    fn size(&self) -> usize;

    /// Block until every rank has entered the barrier.
    fn barrier(&self);

    /// Element-wise exclusive prefix sum over ranks. Rank 0 receives zeros.
    fn sum_exscan(&self, buf: &[i64]) -> Vec<i64>;

    /// Element-wise sum over all ranks; every rank receives the same result.
    fn all_reduce_sum(&self, buf: &[Real]) -> Vec<Real>;
}

static NEXT_GROUP: AtomicU64 = AtomicU64::new(1);

/// Shared handle to one rank's view of a process group.
#[derive(Clone)]
pub struct Comm {
    inner: Arc<dyn Communicator>,
    group: u64,
}

impl Comm {
    /// Wrap a communicator implementation as a new, distinct group.
    pub fn from_communicator(inner: Arc<dyn Communicator>) -> Self {
        Self {
            inner,
            group: NEXT_GROUP.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// The single-process group. All calls return the same group.
    pub fn world() -> Self {
        static WORLD: OnceLock<Comm> = OnceLock::new();
        WORLD
            .get_or_init(|| Comm::from_communicator(Arc::new(SelfComm)))
            .clone()
    }

    /// Run `f` once per rank of a fresh `size`-rank group, each rank on its
    /// own thread, and return the per-rank results in rank order.
    ///
    /// A panic on any rank aborts the group: ranks blocked in a collective,
    /// or entering one later, unwind instead of waiting for the dead rank.
    /// Once every rank has stopped, the lowest rank's own panic is
    /// re-raised on the calling thread.
    pub fn spawn_group<F, R>(size: usize, f: F) -> PkResult<Vec<R>>
    where
        F: Fn(Comm) -> R + Sync,
        R: Send,
    {
        if size == 0 {
            return Err(PkError::InvalidArg {
                what: "process group size must be positive",
            });
        }

        let shared = Arc::new(GroupShared::new(size));
        let group = NEXT_GROUP.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(size, group, "spawning thread process group");

        let f = &f;
        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..size)
                .map(|rank| {
                    let comm = Comm {
                        inner: Arc::new(ThreadRank {
                            rank,
                            shared: Arc::clone(&shared),
                        }),
                        group,
                    };
                    let guard = AbortOnPanic(Arc::clone(&shared));
                    scope.spawn(move || {
                        let _guard = guard;
                        f(comm)
                    })
                })
                .collect();

            let mut results = Vec::with_capacity(size);
            let mut aborted = None;
            for handle in handles {
                match handle.join() {
                    Ok(r) => results.push(r),
                    Err(payload) if payload.is::<GroupAborted>() => {
                        aborted.get_or_insert(payload);
                    }
                    Err(payload) => std::panic::resume_unwind(payload),
                }
            }
            if let Some(payload) = aborted {
                std::panic::resume_unwind(payload);
            }
            Ok(results)
        })
    }

    pub fn rank(&self) -> usize {
        self.inner.rank()
    }

    pub fn size(&self) -> usize {
        self.inner.size()
    }

    pub fn barrier(&self) {
        self.inner.barrier()
    }

    pub fn sum_exscan(&self, buf: &[i64]) -> Vec<i64> {
        self.inner.sum_exscan(buf)
    }

    pub fn all_reduce_sum(&self, buf: &[Real]) -> Vec<Real> {
        self.inner.all_reduce_sum(buf)
    }

    /// Convenience for reducing a single scalar.
    pub fn all_reduce_sum_scalar(&self, value: Real) -> Real {
        self.inner.all_reduce_sum(&[value])[0]
    }

    /// Global Euclidean norm of the ranks' `local` entries.
    ///
    /// Each rank's partial norm is divided by the sum of the per-rank
    /// scales, which bounds the largest entry from above, before squaring
    /// across ranks.
    pub fn all_reduce_l2_norm(&self, local: &[Real]) -> Real {
        let (scale, norm) = scaled_norm(local);
        let bound = self.all_reduce_sum_scalar(scale);
        if bound == 0.0 {
            return 0.0;
        }
        let ratio = norm / bound;
        bound * self.all_reduce_sum_scalar(ratio * ratio).sqrt()
    }

    /// True when both handles refer to the same process group.
    pub fn same_group(&self, other: &Comm) -> bool {
        self.group == other.group
    }
}

impl fmt::Debug for Comm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Comm")
            .field("group", &self.group)
            .field("rank", &self.rank())
            .field("size", &self.size())
            .finish()
    }
}

impl PartialEq for Comm {
    fn eq(&self, other: &Self) -> bool {
        self.same_group(other)
    }
}

/// Group consisting only of the calling process.
#[derive(Debug)]
struct SelfComm;

impl Communicator for SelfComm {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn barrier(&self) {}

    fn sum_exscan(&self, buf: &[i64]) -> Vec<i64> {
        vec![0; buf.len()]
    }

    fn all_reduce_sum(&self, buf: &[Real]) -> Vec<Real> {
        buf.to_vec()
    }
}

/// Unwind payload of a rank that left a collective because another rank of
/// its group panicked.
#[derive(Debug)]
struct GroupAborted;

fn unwind_aborted() -> ! {
    std::panic::resume_unwind(Box::new(GroupAborted))
}

#[derive(Debug, Default)]
struct BarrierState {
    arrived: usize,
    generation: u64,
    aborted: bool,
}

/// Reusable barrier that can be aborted, releasing every waiter.
#[derive(Debug)]
struct GroupBarrier {
    size: usize,
    state: Mutex<BarrierState>,
    released: Condvar,
}

impl GroupBarrier {
    fn new(size: usize) -> Self {
        Self {
            size,
            state: Mutex::new(BarrierState::default()),
            released: Condvar::new(),
        }
    }

    fn wait(&self) {
        let mut state = lock(&self.state);
        if state.aborted {
            drop(state);
            unwind_aborted();
        }
        let generation = state.generation;
        state.arrived += 1;
        if state.arrived == self.size {
            state.arrived = 0;
            state.generation += 1;
            self.released.notify_all();
            return;
        }
        while state.generation == generation && !state.aborted {
            state = self
                .released
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        if state.generation == generation {
            drop(state);
            unwind_aborted();
        }
    }

    fn abort(&self) {
        lock(&self.state).aborted = true;
        self.released.notify_all();
    }
}

/// State shared by all ranks of a thread group. Each collective deposits the
/// caller's contribution in its rank slot, meets at the barrier, combines the
/// slots in rank order and meets again before the slots may be reused.
#[derive(Debug)]
struct GroupShared {
    size: usize,
    barrier: GroupBarrier,
    reals: Mutex<Vec<Vec<Real>>>,
    ints: Mutex<Vec<Vec<i64>>>,
}

impl GroupShared {
    fn new(size: usize) -> Self {
        Self {
            size,
            barrier: GroupBarrier::new(size),
            reals: Mutex::new(vec![Vec::new(); size]),
            ints: Mutex::new(vec![Vec::new(); size]),
        }
    }
}

/// Aborts the group when its rank unwinds.
struct AbortOnPanic(Arc<GroupShared>);

impl Drop for AbortOnPanic {
    fn drop(&mut self) {
        if std::thread::panicking() {
            tracing::error!("rank panicked, aborting its process group");
            self.0.barrier.abort();
        }
    }
}

// A panicking rank poisons the slots; the data is still consistent because
// each slot is written whole.
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug)]
struct ThreadRank {
    rank: usize,
    shared: Arc<GroupShared>,
}

impl Communicator for ThreadRank {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.shared.size
    }

    fn barrier(&self) {
        self.shared.barrier.wait();
    }

    fn sum_exscan(&self, buf: &[i64]) -> Vec<i64> {
        lock(&self.shared.ints)[self.rank] = buf.to_vec();
        self.shared.barrier.wait();

        let mut acc = vec![0_i64; buf.len()];
        {
            let slots = lock(&self.shared.ints);
            for slot in &slots[..self.rank] {
                for (a, v) in acc.iter_mut().zip(slot) {
                    *a += v;
                }
            }
        }

        self.shared.barrier.wait();
        acc
    }

    fn all_reduce_sum(&self, buf: &[Real]) -> Vec<Real> {
        lock(&self.shared.reals)[self.rank] = buf.to_vec();
        self.shared.barrier.wait();

        let mut acc = vec![0.0; buf.len()];
        {
            let slots = lock(&self.shared.reals);
            for slot in slots.iter() {
                for (a, v) in acc.iter_mut().zip(slot) {
                    *a += v;
                }
            }
        }

        self.shared.barrier.wait();
        acc
    }
}
