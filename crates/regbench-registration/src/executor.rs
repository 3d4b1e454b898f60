use rayon::prelude::*;

use crate::RegistrationError;

/// Number of threads a parallel variant uses when none is requested.
///
/// This is the size of the global rayon pool, so it honours `RAYON_NUM_THREADS`.
pub fn available_threads() -> usize {
    rayon::current_num_threads()
}

/// Runs per-point work either on the calling thread or on a dedicated pool.
#[derive(Debug)]
pub(crate) enum Executor {
    /// Plain iterators on the current thread, rayon is never touched.
    Serial,
    /// A local thread pool with a fixed number of threads.
    Pool(rayon::ThreadPool),
}

impl Executor {
    /// Build a dedicated pool with `num_threads` workers.
    pub fn with_threads(num_threads: usize) -> Result<Self, RegistrationError> {
        if num_threads == 0 {
            return Err(RegistrationError::InvalidOption(
                "thread count must be > 0, got 0".to_string(),
            ));
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build()?;
        Ok(Executor::Pool(pool))
    }

    /// Number of threads doing the work.
    pub fn num_threads(&self) -> usize {
        match self {
            Executor::Serial => 1,
            Executor::Pool(pool) => pool.current_num_threads(),
        }
    }

    /// Map every index in `0..len` and collect the results in order.
    pub fn map_collect<T, F>(&self, len: usize, f: F) -> Vec<T>
    where
        T: Send,
        F: Fn(usize) -> T + Sync + Send,
    {
        match self {
            Executor::Serial => (0..len).map(f).collect(),
            Executor::Pool(pool) => pool.install(|| (0..len).into_par_iter().map(f).collect()),
        }
    }

    /// Fold every index in `0..len` into an accumulator and merge partial results.
    pub fn fold_reduce<T, Id, F, R>(&self, len: usize, identity: Id, fold: F, reduce: R) -> T
    where
        T: Send,
        Id: Fn() -> T + Sync + Send,
        F: Fn(T, usize) -> T + Sync + Send,
        R: Fn(T, T) -> T + Sync + Send,
    {
        match self {
            Executor::Serial => (0..len).fold(identity(), fold),
            Executor::Pool(pool) => pool.install(|| {
                (0..len)
                    .into_par_iter()
                    .fold(&identity, &fold)
                    .reduce(&identity, &reduce)
            }),
        }
    }
}
