//! Arena region bookkeeping: generations, sections, allocation gating.
//!
//! Cache state lives in an arena whose compaction may relocate entries.
//! Raw iterators must therefore never be cached across a suspension point;
//! instead, cursors capture the region *generation* and re-seek when it has
//! moved on.
//!
//! Work against the arena happens inside *read sections* and *update
//! sections*: synchronous critical regions with no suspension inside.
//! `invalidate_references` requested inside a section takes effect at the
//! outermost section exit; outside a section it takes effect immediately.
//! Populations become visible at update-section exit.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicU32, Ordering};

/// Allocation exhaustion during a population attempt.
///
/// Never surfaced to the caller of a read; population sites swallow it,
/// request reference invalidation and continue.
#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("cache arena allocation failed")]
pub struct AllocError;

/// Region bookkeeping for one partition's arena.
#[derive(Debug, Default)]
pub struct Region {
    generation: AtomicU64,
    section_depth: AtomicU32,
    pending_invalidation: AtomicBool,
    // Failure injector: remaining forced allocation failures; <0 disabled.
    forced_failures: AtomicI64,
}

impl Region {
    pub fn new() -> Self {
        Region {
            generation: AtomicU64::new(0),
            section_depth: AtomicU32::new(0),
            pending_invalidation: AtomicBool::new(false),
            forced_failures: AtomicI64::new(-1),
        }
    }

    /// The current reference generation. Cursors holding an older value
    /// must refresh before use.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Invalidate all outstanding references into the arena.
    ///
    /// Inside a section the invalidation is deferred to outermost section
    /// exit; outside it takes effect immediately.
    pub fn invalidate_references(&self) {
        if self.section_depth.load(Ordering::Acquire) > 0 {
            self.pending_invalidation.store(true, Ordering::Release);
        } else {
            self.generation.fetch_add(1, Ordering::AcqRel);
        }
    }

    /// Invalidate immediately, even inside a section. Used when an entry
    /// is removed mid-section and stale iterators must not survive to the
    /// section exit.
    pub fn invalidate_references_now(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Allocation gate for population sites.
    pub fn try_alloc(&self) -> Result<(), AllocError> {
        let mut remaining = self.forced_failures.load(Ordering::Acquire);
        while remaining > 0 {
            match self.forced_failures.compare_exchange_weak(
                remaining,
                remaining - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Err(AllocError),
                Err(observed) => remaining = observed,
            }
        }
        Ok(())
    }

    /// Force the next `n` allocations to fail. Test hook.
    pub fn fail_next_allocations(&self, n: u64) {
        self.forced_failures.store(n as i64, Ordering::Release);
    }

    /// Run `f` as a read section.
    pub fn run_in_read_section<R>(&self, f: impl FnOnce() -> R) -> R {
        self.enter_section();
        let out = f();
        self.exit_section();
        out
    }

    /// Run `f` as an update section. Mutations inside become visible, and
    /// any requested invalidation takes effect, at section exit.
    pub fn run_in_update_section<R>(&self, f: impl FnOnce() -> R) -> R {
        self.enter_section();
        let out = f();
        self.exit_section();
        out
    }

    fn enter_section(&self) {
        self.section_depth.fetch_add(1, Ordering::AcqRel);
    }

    fn exit_section(&self) {
        let prev = self.section_depth.fetch_sub(1, Ordering::AcqRel);
        if prev == 1 && self.pending_invalidation.swap(false, Ordering::AcqRel) {
            self.generation.fetch_add(1, Ordering::AcqRel);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalidation_outside_section_is_immediate() {
        let region = Region::new();
        let g = region.generation();
        region.invalidate_references();
        assert_eq!(region.generation(), g + 1);
    }

    #[test]
    fn invalidation_inside_section_is_deferred() {
        let region = Region::new();
        let g = region.generation();
        region.run_in_update_section(|| {
            region.invalidate_references();
            assert_eq!(region.generation(), g);
        });
        assert_eq!(region.generation(), g + 1);
    }

    #[test]
    fn nested_sections_defer_to_outermost_exit() {
        let region = Region::new();
        let g = region.generation();
        region.run_in_read_section(|| {
            region.run_in_update_section(|| {
                region.invalidate_references();
            });
            assert_eq!(region.generation(), g);
        });
        assert_eq!(region.generation(), g + 1);
    }

    #[test]
    fn alloc_injector_counts_down() {
        let region = Region::new();
        assert!(region.try_alloc().is_ok());
        region.fail_next_allocations(2);
        assert!(region.try_alloc().is_err());
        assert!(region.try_alloc().is_err());
        assert!(region.try_alloc().is_ok());
    }
}
