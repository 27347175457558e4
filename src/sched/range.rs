use serde::{Deserialize, Serialize};

/// Half-open range `[start, end)` of the flattened index space, tagged with
/// the executor it is nominally assigned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskRange {
    pub start: u64,
    pub end: u64,
    pub executor: usize,
}

impl TaskRange {
    pub fn new(start: u64, end: u64, executor: usize) -> Self {
        Self { start, end, executor }
    }

    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Shape of the work to partition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Workload {
    /// `pixels * samples` units, index `s * pixels + p` for sample pass `s`
    PixelSamples { pixels: u64, samples: u64 },
    Flat { total: u64 },
}

impl Workload {
    pub fn total(&self) -> u64 {
        match *self {
            Workload::PixelSamples { pixels, samples } => pixels.saturating_mul(samples),
            Workload::Flat { total } => total,
        }
    }
}

/// Partition `[0, U)` for `parallelism` executors.
///
/// Pixel×sample work is split into one range per sample pass when there are
/// at least as many passes as executors. Everything else is split into
/// `min(P, U)` equal chunks with the remainder folded into the last chunk.
pub fn partition(workload: Workload, parallelism: usize) -> Vec<TaskRange> {
    let parallelism = parallelism.max(1);
    match workload {
        Workload::PixelSamples { pixels, samples }
            if pixels > 0 && samples >= parallelism as u64 =>
        {
            (0..samples)
                .map(|s| TaskRange::new(s * pixels, (s + 1) * pixels, (s % parallelism as u64) as usize))
                .collect()
        }
        other => flat_chunks(other.total(), parallelism),
    }
}

fn flat_chunks(total: u64, parallelism: usize) -> Vec<TaskRange> {
    if total == 0 {
        return Vec::new();
    }
    let count = (parallelism as u64).min(total);
    let chunk = total / count;
    (0..count)
        .map(|i| {
            let start = i * chunk;
            let end = if i == count - 1 { total } else { start + chunk };
            TaskRange::new(start, end, i as usize)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn assert_partitions(ranges: &[TaskRange], total: u64) {
        let mut next = 0;
        for r in ranges {
            assert_eq!(r.start, next, "gap or overlap at {:?}", r);
            assert!(!r.is_empty());
            next = r.end;
        }
        assert_eq!(next, total);
    }

    #[test]
    fn test_flat_remainder_in_last_chunk() {
        let ranges = partition(Workload::Flat { total: 10 }, 3);
        assert_eq!(
            ranges,
            vec![TaskRange::new(0, 3, 0), TaskRange::new(3, 6, 1), TaskRange::new(6, 10, 2)]
        );
    }

    #[test]
    fn test_flat_fewer_units_than_executors() {
        let ranges = partition(Workload::Flat { total: 2 }, 8);
        assert_eq!(ranges.len(), 2);
        assert_partitions(&ranges, 2);
    }

    #[test]
    fn test_pixel_samples_one_range_per_pass() {
        let ranges = partition(Workload::PixelSamples { pixels: 4, samples: 5 }, 2);
        assert_eq!(ranges.len(), 5);
        assert_eq!(ranges[1], TaskRange::new(4, 8, 1));
        assert_eq!(ranges[2].executor, 0);
        assert_partitions(&ranges, 20);
    }

    #[test]
    fn test_pixel_samples_falls_back_to_chunks() {
        let ranges = partition(Workload::PixelSamples { pixels: 10, samples: 1 }, 4);
        assert_eq!(ranges.len(), 4);
        assert_partitions(&ranges, 10);
    }

    #[test]
    fn test_partition_correctness() {
        for total in 1..60u64 {
            for p in 1..9usize {
                assert_partitions(&partition(Workload::Flat { total }, p), total);
            }
        }
        for pixels in 1..6u64 {
            for samples in 1..6u64 {
                for p in 1..5usize {
                    let ranges = partition(Workload::PixelSamples { pixels, samples }, p);
                    assert_partitions(&ranges, pixels * samples);
                }
            }
        }
    }

    #[test]
    fn test_empty_workload() {
        assert!(partition(Workload::Flat { total: 0 }, 4).is_empty());
        assert!(partition(Workload::PixelSamples { pixels: 0, samples: 8 }, 4).is_empty());
        // Zero parallelism behaves as one executor
        assert_eq!(partition(Workload::Flat { total: 5 }, 0), vec![TaskRange::new(0, 5, 0)]);
    }
}
