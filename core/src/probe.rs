//! Bounded random search over a population.
//!
//! Finding a free device by scanning everything is too slow at
//! population scale, so callers draw random picks and give up after a
//! fixed number of misses. Giving up is backpressure, not an error.

use crate::rng::SubsystemRng;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RandomProbe {
    max_probes: usize,
}

impl RandomProbe {
    pub fn new(max_probes: usize) -> Self {
        Self { max_probes }
    }

    /// Two draws per member of the searched set.
    pub fn population_proportional(population: usize) -> Self {
        Self::new(population.saturating_mul(2))
    }

    pub fn max_probes(&self) -> usize {
        self.max_probes
    }

    /// Draw up to `max_probes` random indices in `[0, len)` and return the
    /// first one `accept` likes.
    pub fn probe_index(
        &self,
        len: usize,
        rng: &mut SubsystemRng,
        mut accept: impl FnMut(usize) -> bool,
    ) -> Option<usize> {
        if len == 0 {
            return None;
        }
        (0..self.max_probes)
            .map(|_| rng.pick_index(len))
            .find(|&i| accept(i))
    }

    pub fn probe<'a, T>(
        &self,
        items: &'a [T],
        rng: &mut SubsystemRng,
        mut accept: impl FnMut(&T) -> bool,
    ) -> Option<&'a T> {
        self.probe_index(items.len(), rng, |i| accept(&items[i]))
            .map(|i| &items[i])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_population_finds_nothing() {
        let mut rng = SubsystemRng::new(1, 0);
        let items: [i64; 0] = [];
        assert_eq!(RandomProbe::new(10).probe(&items, &mut rng, |_| true), None);
    }

    #[test]
    fn gives_up_after_max_probes() {
        let mut rng = SubsystemRng::new(1, 0);
        let mut asked = 0;
        let found = RandomProbe::new(7).probe_index(100, &mut rng, |_| {
            asked += 1;
            false
        });
        assert_eq!(found, None);
        assert_eq!(asked, 7);
    }

    #[test]
    fn finds_the_only_acceptable_item_eventually() {
        let mut rng = SubsystemRng::new(9, 0);
        let items = [1, 2, 3, 4];
        let probe = RandomProbe::population_proportional(items.len() * 50);
        assert_eq!(probe.probe(&items, &mut rng, |&v| v == 3), Some(&3));
    }
}
