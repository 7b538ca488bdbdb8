use std::sync::atomic::{AtomicBool, Ordering};

/// Held while a periodic task runs; a second `try_begin` fails until it drops.
pub struct SingleFlight<'a> {
    flag: &'a AtomicBool,
}

impl<'a> SingleFlight<'a> {
    pub fn try_begin(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for SingleFlight<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_begin_skipped() {
        let flag = AtomicBool::new(false);
        let first = SingleFlight::try_begin(&flag);
        assert!(first.is_some());
        assert!(SingleFlight::try_begin(&flag).is_none());
        drop(first);
        assert!(SingleFlight::try_begin(&flag).is_some());
    }
}
