use std::collections::VecDeque;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::piece::{ALL_KINDS, Kind};

/// Refill whenever fewer kinds than this remain queued, so draws and the
/// next-three preview never run dry.
const REFILL_THRESHOLD: usize = 7;

/// The 7-bag piece source: an infinite concatenation of shuffled
/// permutations of the seven kinds, reproducible from the seed. Two bags
/// built from the same seed yield the identical sequence on every platform.
#[derive(Debug)]
pub struct SevenBag {
    rng: StdRng,
    queue: VecDeque<Kind>,
}

impl SevenBag {
    pub fn new(seed: u64) -> Self {
        let mut bag = Self {
            rng: StdRng::seed_from_u64(seed),
            queue: VecDeque::new(),
        };
        bag.top_up();
        bag
    }

    fn top_up(&mut self) {
        while self.queue.len() < REFILL_THRESHOLD {
            let mut batch = ALL_KINDS;
            batch.shuffle(&mut self.rng);
            self.queue.extend(batch);
        }
    }

    /// Draw the next kind.
    pub fn draw(&mut self) -> Kind {
        self.top_up();
        // top_up guarantees at least seven queued kinds.
        self.queue.pop_front().unwrap_or(Kind::I)
    }

    /// The upcoming `n` kinds without consuming them.
    pub fn preview(&mut self, n: usize) -> Vec<Kind> {
        self.top_up();
        self.queue.iter().take(n).copied().collect()
    }
}
