//! Benchmark harness for [`sebr::ConcurrentHashMap`]: `n_threads`
//! workers each perform `iterations` find/insert/erase cycles against a
//! shared map preloaded with `n_keys` entries.
//!
//! Ported from `test_scalable_queue`'s CLI shape in `ms_queue_sebr.cpp`
//! (`<times> <n> <nthreads>` positional args), using `clap`'s derive API
//! the way `tdb-bench`/`sky-bench` do for their own benchmark CLIs.

use std::sync::Arc;
use std::thread;
use std::time::Instant;

use clap::Parser;
use rand::Rng;

use sebr::error::BenchArgsError;
use sebr::ConcurrentHashMap;

#[derive(Parser, Debug)]
#[command(name = "bench", about = "sebr concurrent hash map benchmark")]
struct Args {
    /// Number of find/insert/erase cycles performed per thread.
    iterations: usize,

    /// Number of distinct keys preloaded into the map before timing.
    n_keys: usize,

    /// Number of worker threads.
    n_threads: usize,
}

impl Args {
    fn validate(&self) -> Result<(), BenchArgsError> {
        if self.iterations == 0 {
            return Err(BenchArgsError::ZeroIterations);
        }
        if self.n_keys == 0 {
            return Err(BenchArgsError::ZeroKeys);
        }
        if self.n_threads == 0 {
            return Err(BenchArgsError::ZeroThreads);
        }
        Ok(())
    }
}

fn main() {
    env_logger::init();
    let args = Args::parse();
    if let Err(err) = args.validate() {
        eprintln!("bench: {err}");
        std::process::exit(1);
    }

    let map: Arc<ConcurrentHashMap<usize, usize>> = Arc::new(ConcurrentHashMap::new());
    for k in 0..args.n_keys {
        map.insert(k, k);
    }

    log::info!(
        "starting {} threads, {} iterations each, {} preloaded keys",
        args.n_threads,
        args.iterations,
        args.n_keys
    );

    let start = Instant::now();
    let handles: Vec<_> = (0..args.n_threads)
        .map(|_| {
            let map = map.clone();
            let iterations = args.iterations;
            let n_keys = args.n_keys;
            thread::spawn(move || {
                let mut rng = rand::thread_rng();
                for _ in 0..iterations {
                    let key = rng.gen_range(0..n_keys);
                    match rng.gen_range(0..3) {
                        0 => {
                            map.find(&key);
                        }
                        1 => {
                            map.insert(key, key);
                        }
                        _ => {
                            map.erase(&key);
                        }
                    }
                }
            })
        })
        .collect();
    for h in handles {
        h.join().expect("worker thread panicked");
    }
    let elapsed = start.elapsed();

    println!(
        "{} threads x {} iterations in {:.3}s ({:.0} ops/s), final size {}",
        args.n_threads,
        args.iterations,
        elapsed.as_secs_f64(),
        (args.n_threads * args.iterations) as f64 / elapsed.as_secs_f64(),
        map.size()
    );
}
