use std::time::Duration;

/// Wall time spent in each stage of processing one frame.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameTimes {
    pub decode: Duration,
    pub inference: Duration,
    pub annotation: Duration,
    pub encode: Duration,
}

impl FrameTimes {
    pub fn total(&self) -> Duration {
        self.decode + self.inference + self.annotation + self.encode
    }

    fn zip_with(&self, other: &Self, f: impl Fn(Duration, Duration) -> Duration) -> Self {
        Self {
            decode: f(self.decode, other.decode),
            inference: f(self.inference, other.inference),
            annotation: f(self.annotation, other.annotation),
            encode: f(self.encode, other.encode),
        }
    }
}

/// Frame times collected over a whole run.
#[derive(Debug, Clone, Default)]
pub struct AggregatedTimes {
    frames: Vec<FrameTimes>,
}

impl AggregatedTimes {
    pub fn push(&mut self, times: FrameTimes) {
        self.frames.push(times);
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// The first frame pays for lazy session init, so callers usually skip it.
    fn considered(&self, skip_first: bool) -> &[FrameTimes] {
        if skip_first && self.frames.len() > 1 {
            &self.frames[1..]
        } else {
            &self.frames
        }
    }

    pub fn avg(&self, skip_first: bool) -> FrameTimes {
        let frames = self.considered(skip_first);
        if frames.is_empty() {
            return FrameTimes::default();
        }
        let n = frames.len() as u32;
        let sum = frames
            .iter()
            .fold(FrameTimes::default(), |acc, t| acc.zip_with(t, |a, b| a + b));
        FrameTimes {
            decode: sum.decode / n,
            inference: sum.inference / n,
            annotation: sum.annotation / n,
            encode: sum.encode / n,
        }
    }

    pub fn min(&self, skip_first: bool) -> FrameTimes {
        let frames = self.considered(skip_first);
        let mut it = frames.iter();
        match it.next() {
            Some(first) => it.fold(*first, |acc, t| acc.zip_with(t, Duration::min)),
            None => FrameTimes::default(),
        }
    }

    pub fn max(&self, skip_first: bool) -> FrameTimes {
        self.considered(skip_first)
            .iter()
            .fold(FrameTimes::default(), |acc, t| acc.zip_with(t, Duration::max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn times(ms: u64) -> FrameTimes {
        let d = Duration::from_millis(ms);
        FrameTimes {
            decode: d,
            inference: d * 10,
            annotation: d,
            encode: d,
        }
    }

    #[test]
    fn test_stats_skip_first_frame() {
        let mut agg = AggregatedTimes::default();
        agg.push(times(100));
        agg.push(times(2));
        agg.push(times(4));

        assert_eq!(agg.avg(true).decode, Duration::from_millis(3));
        assert_eq!(agg.min(true).inference, Duration::from_millis(20));
        assert_eq!(agg.max(true).encode, Duration::from_millis(4));
        assert_eq!(agg.max(false).encode, Duration::from_millis(100));
    }

    #[test]
    fn test_empty_and_single_frame() {
        let mut agg = AggregatedTimes::default();
        assert_eq!(agg.avg(true), FrameTimes::default());
        agg.push(times(5));
        // a lone frame is still reported when skipping
        assert_eq!(agg.avg(true).decode, Duration::from_millis(5));
        assert_eq!(agg.min(true).total(), Duration::from_millis(65));
    }
}
