//! Periodic software timers keyed by id

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TimerId(u16);

struct Record<C> {
    id: TimerId,
    period_ms: u32,
    elapsed_ms: u32,
    callback: fn(&mut C),
}

/// Up to `N` periodic callbacks over a shared context `C`. The same callback
/// may be registered more than once; each registration has its own id.
pub struct SoftTimers<C, const N: usize> {
    records: [Option<Record<C>>; N],
    next_id: u16,
}

impl<C, const N: usize> SoftTimers<C, N> {
    pub fn new() -> Self {
        Self {
            records: core::array::from_fn(|_| None),
            next_id: 0,
        }
    }

    pub fn register(&mut self, period_ms: u32, callback: fn(&mut C)) -> Option<TimerId> {
        if period_ms == 0 {
            return None;
        }
        let slot = self.records.iter_mut().find(|r| r.is_none())?;
        let id = TimerId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);
        *slot = Some(Record {
            id,
            period_ms,
            elapsed_ms: 0,
            callback,
        });
        Some(id)
    }

    pub fn unregister(&mut self, id: TimerId) -> bool {
        for slot in self.records.iter_mut() {
            if matches!(slot, Some(record) if record.id == id) {
                *slot = None;
                return true;
            }
        }
        false
    }

    /// Advances every timer by `elapsed_ms`, firing each callback once per
    /// period that completed
    pub fn tick(&mut self, ctx: &mut C, elapsed_ms: u32) {
        for record in self.records.iter_mut().flatten() {
            record.elapsed_ms = record.elapsed_ms.saturating_add(elapsed_ms);
            while record.elapsed_ms >= record.period_ms {
                record.elapsed_ms -= record.period_ms;
                (record.callback)(ctx);
            }
        }
    }

    pub fn active(&self) -> usize {
        self.records.iter().flatten().count()
    }
}

impl<C, const N: usize> Default for SoftTimers<C, N> {
    fn default() -> Self {
        Self::new()
    }
}
