use std::fmt;

use bedrock::Op;

/// Fixed-width bucket histogram over an inclusive integer range, used to
/// estimate predicate selectivity.
#[derive(Debug, Clone)]
pub struct IntHistogram {
    buckets: Vec<u64>,
    min: i64,
    max: i64,
    width: i64,
    ntups: u64,
}

impl IntHistogram {
    /// `num_buckets` buckets covering `[min, max]`; each is
    /// `ceil((max - min + 1) / num_buckets)` values wide.
    pub fn new(num_buckets: usize, min: i32, max: i32) -> Self {
        let num_buckets = num_buckets.max(1);
        let (min, max) = (min.min(max) as i64, min.max(max) as i64);
        let width = ((max - min + 1) as u64).div_ceil(num_buckets as u64).max(1) as i64;
        Self {
            buckets: vec![0; num_buckets],
            min,
            max,
            width,
            ntups: 0,
        }
    }

    fn index(&self, v: i64) -> usize {
        (((v - self.min) / self.width) as usize).min(self.buckets.len() - 1)
    }

    /// Values outside `[min, max]` are ignored.
    pub fn add_value(&mut self, v: i32) {
        let v = v as i64;
        if v < self.min || v > self.max {
            return;
        }
        let idx = self.index(v);
        self.buckets[idx] += 1;
        self.ntups += 1;
    }

    pub fn num_values(&self) -> u64 {
        self.ntups
    }

    fn equals(&self, v: i64) -> f64 {
        if v < self.min || v > self.max {
            return 0.0;
        }
        let h = self.buckets[self.index(v)] as f64;
        (h / self.width as f64) / self.ntups as f64
    }

    fn greater_than(&self, v: i64) -> f64 {
        if v < self.min {
            return 1.0;
        }
        if v > self.max {
            return 0.0;
        }
        let n = self.ntups as f64;
        let idx = self.index(v);
        let h = self.buckets[idx] as f64;
        let right = self.min + (idx as i64 + 1) * self.width - 1;
        let partial = ((right - v) as f64 / self.width as f64) * (h / n);
        let rest: u64 = self.buckets[idx + 1..].iter().sum();
        partial + rest as f64 / n
    }

    /// Estimated fraction of values satisfying `value <op> v`, in `[0, 1]`.
    pub fn estimate_selectivity(&self, op: Op, v: i32) -> f64 {
        if self.ntups == 0 {
            return 0.0;
        }
        let v = v as i64;
        let sel = match op {
            Op::Equals | Op::Like => self.equals(v),
            Op::NotEquals => 1.0 - self.equals(v),
            Op::GreaterThan => self.greater_than(v),
            Op::GreaterThanOrEq => self.greater_than(v) + self.equals(v),
            Op::LessThan => 1.0 - self.greater_than(v) - self.equals(v),
            Op::LessThanOrEq => 1.0 - self.greater_than(v),
        };
        sel.clamp(0.0, 1.0)
    }

    /// Expected equality selectivity of a value drawn from the stored ones.
    pub fn avg_selectivity(&self) -> f64 {
        if self.ntups == 0 {
            return 0.0;
        }
        let n = self.ntups as f64;
        let sum: f64 = self
            .buckets
            .iter()
            .map(|&h| {
                let h = h as f64;
                (h / n) * ((h / self.width as f64) / n)
            })
            .sum();
        sum.clamp(0.0, 1.0)
    }
}

impl fmt::Display for IntHistogram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "IntHistogram[min={}, max={}, width={}, n={}]",
            self.min, self.max, self.width, self.ntups
        )?;
        for (i, h) in self.buckets.iter().enumerate() {
            let lo = self.min + i as i64 * self.width;
            write!(f, " [{}..{}]:{}", lo, lo + self.width - 1, h)?;
        }
        Ok(())
    }
}

/// Histogram over strings, mapped onto integers so that the order of the
/// first four characters is preserved.
#[derive(Debug, Clone)]
pub struct StringHistogram {
    inner: IntHistogram,
}

impl StringHistogram {
    pub fn new(num_buckets: usize) -> Self {
        Self {
            inner: IntHistogram::new(num_buckets, Self::min_val(), Self::max_val()),
        }
    }

    /// Packs the first four bytes (7 bits each, 8 bits apart), clamped to
    /// the range of `""..="zzzz"`.
    pub fn string_to_int(s: &str) -> i32 {
        let mut v: i32 = 0;
        for (i, b) in s.bytes().take(4).enumerate() {
            v += ((b & 0x7f) as i32) << ((3 - i) * 8);
        }
        v.clamp(0, Self::packed_zzzz())
    }

    fn packed_zzzz() -> i32 {
        (0..4).map(|i| (b'z' as i32) << (i * 8)).sum()
    }

    fn min_val() -> i32 {
        0
    }

    fn max_val() -> i32 {
        Self::packed_zzzz()
    }

    pub fn add_value(&mut self, s: &str) {
        self.inner.add_value(Self::string_to_int(s));
    }

    pub fn estimate_selectivity(&self, op: Op, s: &str) -> f64 {
        self.inner.estimate_selectivity(op, Self::string_to_int(s))
    }

    pub fn avg_selectivity(&self) -> f64 {
        self.inner.avg_selectivity()
    }
}

impl fmt::Display for StringHistogram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StringHistogram({})", self.inner)
    }
}
