use crate::error::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

/// Execution resources handed to model construction and training: the rayon
/// pool every batched kernel runs on, and the seeded generator all
/// initialization and shuffling randomness derives from.
pub struct ExecutionContext {
    pool: rayon::ThreadPool,
    rng: StdRng,
    seed: u64,
}

impl ExecutionContext {
    /// `threads == 0` lets rayon pick one worker per logical CPU.
    pub fn new(threads: usize, seed: u64) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("stn-worker-{}", i))
            .build()?;
        debug!(threads = pool.current_num_threads(), seed, "execution context ready");
        Ok(Self {
            pool,
            rng: StdRng::seed_from_u64(seed),
            seed,
        })
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    /// Independent generator for a component that keeps its own stream,
    /// such as a dropout layer.
    pub fn fork_rng(&mut self) -> StdRng {
        StdRng::seed_from_u64(self.rng.gen())
    }

    /// Runs `op` inside the context's thread pool.
    pub fn install<OP, R>(&self, op: OP) -> R
    where
        OP: FnOnce() -> R + Send,
        R: Send,
    {
        self.pool.install(op)
    }
}
