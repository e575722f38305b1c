use crate::types::Page;
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub(crate) struct Slot {
    result: Mutex<Option<Option<Page>>>,
    ready: Condvar,
}

impl Slot {
    pub(crate) fn wait(&self) -> Option<Page> {
        let mut result = self.result.lock();
        loop {
            if let Some(page) = result.as_ref() {
                return page.clone();
            }
            self.ready.wait(&mut result);
        }
    }

    fn set(&self, page: Option<Page>) {
        *self.result.lock() = Some(page);
        self.ready.notify_all();
    }
}

/// Device reads in progress, by page. The first claimant of a page reads
/// it and later claimants wait for that result.
#[derive(Debug, Default)]
pub(crate) struct InFlight {
    slots: Mutex<HashMap<u64, Arc<Slot>>>,
    coalesced: AtomicU64,
}

pub(crate) enum Claim<'a> {
    Leader(Leader<'a>),
    Follower(Arc<Slot>),
}

impl InFlight {
    pub(crate) fn claim(&self, pa: u64) -> Claim<'_> {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get(&pa) {
            self.coalesced.fetch_add(1, Ordering::Relaxed);
            return Claim::Follower(slot.clone());
        }
        let slot = Arc::new(Slot::default());
        slots.insert(pa, slot.clone());
        Claim::Leader(Leader {
            owner: self,
            pa,
            slot,
            done: false,
        })
    }

    /// Claim only if nobody else is reading the page.
    pub(crate) fn try_lead(&self, pa: u64) -> Option<Leader<'_>> {
        match self.claim(pa) {
            Claim::Leader(leader) => Some(leader),
            Claim::Follower(_) => {
                self.coalesced.fetch_sub(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub(crate) fn coalesced(&self) -> u64 {
        self.coalesced.load(Ordering::Relaxed)
    }

    fn release(&self, pa: u64) {
        self.slots.lock().remove(&pa);
    }
}

/// Exclusive right to read one page. Dropping it without completing
/// wakes followers with a failure.
pub(crate) struct Leader<'a> {
    owner: &'a InFlight,
    pa: u64,
    slot: Arc<Slot>,
    done: bool,
}

impl Leader<'_> {
    pub(crate) fn pa(&self) -> u64 {
        self.pa
    }

    pub(crate) fn complete(mut self, page: Option<Page>) {
        self.finish(page);
    }

    fn finish(&mut self, page: Option<Page>) {
        if self.done {
            return;
        }
        self.done = true;
        self.owner.release(self.pa);
        self.slot.set(page);
    }
}

impl Drop for Leader<'_> {
    fn drop(&mut self) {
        self.finish(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::zero_page;

    #[test]
    fn second_claim_follows_the_first() {
        let inflight = InFlight::default();
        let Claim::Leader(leader) = inflight.claim(0x1000) else {
            panic!("first claim must lead");
        };
        let Claim::Follower(slot) = inflight.claim(0x1000) else {
            panic!("second claim must follow");
        };
        leader.complete(Some(zero_page()));
        assert!(slot.wait().is_some());
        assert_eq!(inflight.coalesced(), 1);
        // released after completion
        assert!(matches!(inflight.claim(0x1000), Claim::Leader(_)));
    }

    #[test]
    fn dropped_leader_fails_followers() {
        let inflight = InFlight::default();
        let leader = inflight.try_lead(0x2000).unwrap();
        assert!(inflight.try_lead(0x2000).is_none());
        let Claim::Follower(slot) = inflight.claim(0x2000) else {
            panic!("must follow");
        };
        drop(leader);
        assert!(slot.wait().is_none());
    }

    #[test]
    fn followers_wake_across_threads() {
        let inflight = Arc::new(InFlight::default());
        let Claim::Leader(leader) = inflight.claim(0x3000) else {
            panic!("first claim must lead");
        };
        let Claim::Follower(slot) = inflight.claim(0x3000) else {
            panic!("must follow");
        };
        let waiter = std::thread::spawn(move || slot.wait());
        leader.complete(Some(zero_page()));
        assert!(waiter.join().unwrap().is_some());
    }
}
