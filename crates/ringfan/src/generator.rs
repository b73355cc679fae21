//! Key sources feeding the producers.
//!
//! Every source upholds two wire-format rules: it never yields a key whose
//! low 32 bits are zero (key 0 is the table's empty-slot reserve), and the
//! workloads it produces are expected to avoid keys that would pack to the
//! end-of-stream word (checked by a debug assertion in the router).

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use ringfan_table::prefetch::prefetch_read;
use ringfan_table::KEY_MASK;

/// A lazy stream of 64-bit keys.
pub trait KeyStream {
    fn next_key(&mut self) -> u64;
}

/// Dense counter stream starting at a per-producer offset.
///
/// The start is clamped to at least 1 so that key 0 stays reserved, and any
/// later key whose low 32 bits wrap to zero is skipped for the same reason.
#[derive(Debug, Clone)]
pub struct SequentialKeys {
    next: u64,
}

impl SequentialKeys {
    pub fn starting_at(start: u64) -> Self {
        Self {
            next: start.max(1),
        }
    }
}

impl KeyStream for SequentialKeys {
    #[inline]
    fn next_key(&mut self) -> u64 {
        loop {
            let key = self.next;
            self.next = self.next.wrapping_add(1);
            if key & KEY_MASK != 0 {
                return key;
            }
        }
    }
}

/// Marsaglia xorwow generator; two 32-bit draws make one 64-bit key.
#[derive(Debug, Clone)]
pub struct Xorwow {
    state: [u32; 5],
    counter: u32,
}

impl Xorwow {
    pub fn new(seed: u64) -> Self {
        // Spread the seed through splitmix64 so nearby seeds diverge.
        let mut s = seed;
        let mut word = || {
            s = s.wrapping_add(0x9E37_79B9_7F4A_7C15);
            let mut z = s;
            z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
            z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
            (z ^ (z >> 31)) as u32
        };
        let mut state = [word(), word(), word(), word(), word()];
        if state == [0; 5] {
            state[0] = 1;
        }
        Self { state, counter: 0 }
    }

    #[inline]
    fn next_u32(&mut self) -> u32 {
        let mut t = self.state[4];
        let s = self.state[0];
        self.state[4] = self.state[3];
        self.state[3] = self.state[2];
        self.state[2] = self.state[1];
        self.state[1] = s;
        t ^= t >> 2;
        t ^= t << 1;
        t ^= s ^ (s << 4);
        self.state[0] = t;
        self.counter = self.counter.wrapping_add(362_437);
        t.wrapping_add(self.counter)
    }
}

impl KeyStream for Xorwow {
    #[inline]
    fn next_key(&mut self) -> u64 {
        loop {
            let hi = self.next_u32() as u64;
            let lo = self.next_u32() as u64;
            let key = (hi << 32) | lo;
            if key & KEY_MASK != 0 {
                return key;
            }
        }
    }
}

/// Cursor over a pre-materialized shared Zipf stream.
///
/// Reads ahead of itself: every 8th index it prefetches the value 16 slots
/// ahead, so the hot loop never stalls on the backing vector.
#[derive(Debug, Clone)]
pub struct ZipfianKeys<'a> {
    values: &'a [u64],
    cursor: usize,
}

impl<'a> ZipfianKeys<'a> {
    /// Starts the cursor at `start` (wrapped into range).
    pub fn new(values: &'a [u64], start: usize) -> Self {
        debug_assert!(!values.is_empty());
        Self {
            values,
            cursor: start % values.len(),
        }
    }
}

impl KeyStream for ZipfianKeys<'_> {
    #[inline]
    fn next_key(&mut self) -> u64 {
        if self.cursor & 7 == 0 && self.cursor + 16 < self.values.len() {
            prefetch_read(&self.values[self.cursor + 16]);
        }
        let key = self.values[self.cursor];
        self.cursor += 1;
        if self.cursor == self.values.len() {
            self.cursor = 0;
        }
        key
    }
}

/// Materializes `count` Zipf(`skew`) samples over `[1, 2^key_bits]`.
///
/// Rejection-inversion sampling (the Apache commons scheme): invert the
/// integral of the bounding function, accept when the sample falls under the
/// discrete mass. `skew = 0` degenerates to uniform. Samples whose low 32
/// bits are zero are redrawn.
pub fn materialize_zipf(count: usize, skew: f64, key_bits: u32, seed: u64) -> Vec<u64> {
    assert!((1..=63).contains(&key_bits));
    let sampler = ZipfSampler::new((1u64 << key_bits) as f64, skew);
    let mut rng = StdRng::seed_from_u64(seed);
    let mut values = Vec::with_capacity(count);
    while values.len() < count {
        let key = sampler.sample(&mut rng);
        if key & KEY_MASK != 0 {
            values.push(key);
        }
    }
    values
}

struct ZipfSampler {
    num_elements: f64,
    exponent: f64,
    h_integral_x1: f64,
    h_integral_num: f64,
    s: f64,
}

impl ZipfSampler {
    fn new(num_elements: f64, exponent: f64) -> Self {
        let h_integral_x1 = h_integral(1.5, exponent) - 1.0;
        let h_integral_num = h_integral(num_elements + 0.5, exponent);
        let s = 2.0 - h_integral_inverse(h_integral(2.5, exponent) - h(2.0, exponent), exponent);
        Self {
            num_elements,
            exponent,
            h_integral_x1,
            h_integral_num,
            s,
        }
    }

    fn sample<R: Rng>(&self, rng: &mut R) -> u64 {
        loop {
            let u = self.h_integral_num
                + rng.gen::<f64>() * (self.h_integral_x1 - self.h_integral_num);
            let x = h_integral_inverse(u, self.exponent);
            let k = (x + 0.5).floor().clamp(1.0, self.num_elements);

            if k - x <= self.s || u >= h_integral(k + 0.5, self.exponent) - h(k, self.exponent) {
                return k as u64;
            }
        }
    }
}

/// Integral of the bounding function `h(x) = x^-exponent`.
fn h_integral(x: f64, exponent: f64) -> f64 {
    let log_x = x.ln();
    if (1.0 - exponent).abs() < 1e-9 {
        log_x
    } else {
        ((1.0 - exponent) * log_x).exp_m1() / (1.0 - exponent)
    }
}

fn h(x: f64, exponent: f64) -> f64 {
    (-exponent * x.ln()).exp()
}

fn h_integral_inverse(x: f64, exponent: f64) -> f64 {
    if (1.0 - exponent).abs() < 1e-9 {
        x.exp()
    } else {
        // Clamp guards the log argument against rounding below -1.
        let t = (x * (1.0 - exponent)).max(-1.0 + 1e-15);
        (t.ln_1p() / (1.0 - exponent)).exp()
    }
}
