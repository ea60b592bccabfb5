use crate::{
    exception_private::{ExcType, RunResult},
    heap::HeapId,
    value::Value,
};

/// `slice(start, stop, step)` built by `BUILD_SLICE`.
#[derive(Debug)]
pub(crate) struct Slice {
    pub start: Value,
    pub stop: Value,
    pub step: Value,
}

impl Slice {
    /// Resolves the slice against a sequence of `len` items, returning
    /// `(start, stop, step)` clamped like `slice.indices()`.
    pub fn indices(&self, len: usize) -> RunResult<(i64, i64, i64)> {
        let len = i64::try_from(len).unwrap_or(i64::MAX);
        let step = match &self.step {
            Value::None => 1,
            other => index_or_error(other)?,
        };
        if step == 0 {
            return Err(ExcType::value_error("slice step cannot be zero"));
        }
        let (lower, upper) = if step < 0 { (-1, len - 1) } else { (0, len) };
        let clamp = |value: &Value, default: i64| -> RunResult<i64> {
            match value {
                Value::None => Ok(default),
                other => {
                    let mut i = index_or_error(other)?;
                    if i < 0 {
                        i = (i + len).max(lower);
                    } else {
                        i = i.min(upper);
                    }
                    Ok(i)
                }
            }
        };
        let start = clamp(&self.start, if step < 0 { upper } else { lower })?;
        let stop = clamp(&self.stop, if step < 0 { lower } else { upper })?;
        Ok((start, stop, step))
    }

    pub fn py_dec_ref_ids(&mut self, stack: &mut Vec<HeapId>) {
        self.start.collect_ref(stack);
        self.stop.collect_ref(stack);
        self.step.collect_ref(stack);
    }
}

fn index_or_error(value: &Value) -> RunResult<i64> {
    value.as_index().ok_or_else(|| {
        ExcType::type_error("slice indices must be integers or None or have an __index__ method")
    })
}

/// Collects the positions selected by `(start, stop, step)`.
pub(crate) fn slice_positions(start: i64, stop: i64, step: i64) -> impl Iterator<Item = usize> {
    let mut current = start;
    std::iter::from_fn(move || {
        let more = if step > 0 { current < stop } else { current > stop };
        if more {
            let position = usize::try_from(current).ok();
            current += step;
            position
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indices_clamp_like_python() {
        let s = Slice {
            start: Value::Int(-2),
            stop: Value::None,
            step: Value::None,
        };
        assert_eq!(s.indices(5).unwrap(), (3, 5, 1));
        let reversed = Slice {
            start: Value::None,
            stop: Value::None,
            step: Value::Int(-1),
        };
        assert_eq!(reversed.indices(3).unwrap(), (2, -1, -1));
        assert_eq!(slice_positions(2, -1, -1).collect::<Vec<_>>(), vec![2, 1, 0]);
    }
}
