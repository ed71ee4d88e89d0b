use rand::{rngs::StdRng, Rng, SeedableRng};

/// Chooses one index out of `len` candidates.
///
/// Callers never pass `len == 0`.
pub trait Selector: Send + Sync {
    fn pick(&mut self, len: usize) -> usize;
}

/// Uniform random choice. A failing device cannot starve the others the
/// way a fixed order would.
#[derive(Debug)]
pub struct RandomSelector {
    rng: StdRng,
}

impl RandomSelector {
    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Selector for RandomSelector {
    fn pick(&mut self, len: usize) -> usize {
        self.rng.gen_range(0..len)
    }
}

/// Deterministic rotation over the candidates, for tests.
#[derive(Debug, Default)]
pub struct RoundRobin {
    next: usize,
}

impl Selector for RoundRobin {
    fn pick(&mut self, len: usize) -> usize {
        let index = self.next % len;
        self.next = self.next.wrapping_add(1);
        index
    }
}

/// Drains `items` in an order chosen by `selector`.
pub fn drain_fair<T>(mut items: Vec<T>, selector: &mut dyn Selector) -> Vec<T> {
    let mut ordered = Vec::with_capacity(items.len());
    while !items.is_empty() {
        let index = selector.pick(items.len());
        ordered.push(items.swap_remove(index));
    }
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_selector_stays_in_range_and_reaches_every_index() {
        let mut selector = RandomSelector::seeded(7);
        let mut seen = [false; 5];
        for _ in 0..500 {
            let index = selector.pick(5);
            assert!(index < 5);
            seen[index] = true;
        }
        assert!(seen.iter().all(|hit| *hit));
    }

    #[test]
    fn round_robin_cycles() {
        let mut selector = RoundRobin::default();
        let picks: Vec<usize> = (0..5).map(|_| selector.pick(3)).collect();
        assert_eq!(picks, vec![0, 1, 2, 0, 1]);
    }

    #[test]
    fn drain_fair_keeps_every_item() {
        let mut selector = RandomSelector::seeded(1);
        let mut drained = drain_fair((0..20).collect(), &mut selector);
        drained.sort_unstable();
        assert_eq!(drained, (0..20).collect::<Vec<_>>());
    }
}
