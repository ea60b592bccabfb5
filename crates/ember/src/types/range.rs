use crate::exception_private::{ExcType, RunResult};

/// `range(start, stop, step)`; the step is never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Range {
    pub start: i64,
    pub stop: i64,
    pub step: i64,
}

impl Range {
    pub fn new(start: i64, stop: i64, step: i64) -> RunResult<Self> {
        if step == 0 {
            return Err(ExcType::value_error("range() arg 3 must not be zero"));
        }
        Ok(Self { start, stop, step })
    }

    /// Number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        let (lo, hi, step) = if self.step > 0 {
            (i128::from(self.start), i128::from(self.stop), i128::from(self.step))
        } else {
            (i128::from(self.stop), i128::from(self.start), -i128::from(self.step))
        };
        if lo >= hi {
            0
        } else {
            usize::try_from((hi - lo - 1) / step + 1).unwrap_or(usize::MAX)
        }
    }

    /// Element at `index`, `None` when out of range. Negative indexes count from the end.
    #[must_use]
    pub fn get(&self, index: i64) -> Option<i64> {
        let len = i64::try_from(self.len()).ok()?;
        let index = if index < 0 { index + len } else { index };
        if (0..len).contains(&index) {
            Some(self.start + index * self.step)
        } else {
            None
        }
    }

    #[must_use]
    pub fn contains(&self, value: i64) -> bool {
        let in_bounds = if self.step > 0 {
            self.start <= value && value < self.stop
        } else {
            self.stop < value && value <= self.start
        };
        in_bounds && (i128::from(value) - i128::from(self.start)) % i128::from(self.step) == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn len_and_get_follow_python() {
        let r = Range::new(0, 10, 3).unwrap();
        assert_eq!(r.len(), 4);
        assert_eq!(r.get(-1), Some(9));
        assert_eq!(Range::new(5, 0, -2).unwrap().len(), 3);
        assert_eq!(Range::new(5, 5, 1).unwrap().len(), 0);
        assert!(Range::new(5, 0, -2).unwrap().contains(1));
        assert!(Range::new(0, 1, 0).is_err());
    }
}
