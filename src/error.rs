//! The crate's sole `Result`-returning surface: parsing the benchmark
//! binary's CLI arguments. Everything else follows spec.md §7's
//! taxonomy (assert on contract violation, `Option`/`bool` for absence,
//! clamp on resource exhaustion, silent retry on contention) and never
//! surfaces a `Result`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BenchArgsError {
    #[error("iterations must be greater than zero")]
    ZeroIterations,
    #[error("key count must be greater than zero")]
    ZeroKeys,
    #[error("thread count must be greater than zero")]
    ZeroThreads,
}
