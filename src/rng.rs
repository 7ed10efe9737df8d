/// Mulberry32. Small, fast and stable across platforms, which is all the
/// simulation needs: the same seed must lay out the same arena forever.
#[derive(Clone, Debug, Default)]
pub struct Rng {
    seed: u32,
}

impl Rng {
    pub fn new(seed: u32) -> Self {
        Self { seed }
    }

    pub fn next_u32(&mut self) -> u32 {
        self.seed = self.seed.wrapping_add(0x6d2b79f5);
        let mut t = self.seed;
        t = (t ^ (t >> 15)).wrapping_mul(t | 1);
        t ^= t.wrapping_add((t ^ (t >> 7)).wrapping_mul(t | 61));
        t ^ (t >> 14)
    }

    pub fn next_f64(&mut self) -> f64 {
        self.next_u32() as f64 / 4_294_967_296.0
    }

    pub fn range(&mut self, min: f64, max: f64) -> f64 {
        if max <= min {
            return min;
        }
        min + self.next_f64() * (max - min)
    }

    pub fn pick_index(&mut self, len: usize) -> usize {
        if len <= 1 {
            return 0;
        }
        (self.next_f64() * len as f64).floor().min((len - 1) as f64) as usize
    }

    /// Derives an independent stream, used to hand each robot its own
    /// generator per tick without disturbing the match stream.
    pub fn fork(&mut self, salt: u32) -> Rng {
        Rng::new(self.next_u32() ^ salt.wrapping_mul(0x9e37_79b9))
    }
}
