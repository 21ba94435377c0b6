/// A maximal run of consecutive blocks sharing the same mapped state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Run {
    pub first: u64,
    pub last: u64,
    pub mapped: bool,
}

/// Groups consecutive blocks `0..blocks_count` by the result of a per-block
/// predicate and yields each group as a [`Run`], in ascending order.
///
/// Every block is probed exactly once. The first predicate error is yielded
/// and ends the iteration.
pub struct RangeCoalescer<F> {
    probe: F,
    next: u64,
    blocks_count: u64,
    pending: Option<Run>,
    done: bool,
}

impl<F> std::fmt::Debug for RangeCoalescer<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RangeCoalescer")
            .field("next", &self.next)
            .field("blocks_count", &self.blocks_count)
            .field("pending", &self.pending)
            .finish_non_exhaustive()
    }
}

impl<F, E> RangeCoalescer<F>
where
    F: FnMut(u64) -> Result<bool, E>,
{
    pub fn new(blocks_count: u64, probe: F) -> Self {
        Self {
            probe,
            next: 0,
            blocks_count,
            pending: None,
            done: false,
        }
    }

    /// Yields only the mapped runs as `(first, last)` pairs.
    pub fn mapped(self) -> impl Iterator<Item = Result<(u64, u64), E>> {
        self.filter_map(|run| match run {
            Ok(Run {
                first,
                last,
                mapped: true,
            }) => Some(Ok((first, last))),
            Ok(_) => None,
            Err(e) => Some(Err(e)),
        })
    }
}

impl<F, E> Iterator for RangeCoalescer<F>
where
    F: FnMut(u64) -> Result<bool, E>,
{
    type Item = Result<Run, E>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        while self.next < self.blocks_count {
            let block = self.next;
            let mapped = match (self.probe)(block) {
                Ok(v) => v,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            };

            self.next += 1;

            match &mut self.pending {
                Some(run) if run.mapped == mapped => run.last = block,
                pending => {
                    let finished = pending.replace(Run {
                        first: block,
                        last: block,
                        mapped,
                    });

                    if finished.is_some() {
                        return finished.map(Ok);
                    }
                }
            }
        }

        self.done = true;
        self.pending.take().map(Ok)
    }
}
