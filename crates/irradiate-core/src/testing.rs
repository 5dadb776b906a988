//! In-memory fakes shared by the unit tests.

use std::cell::{Cell, RefCell};
use std::io;
use std::rc::Rc;

use crate::flip::{BitFlip, FlipError, MemoryAccess};
use crate::injector::StopReason;
use crate::observer::InjectionObserver;
use crate::region::RegionSet;
use crate::target::{Target, TargetError};

/// A single mapping of bytes starting at `base`.
#[derive(Clone)]
pub struct FakeMemory {
    base: u64,
    bytes: Rc<RefCell<Vec<u8>>>,
    failures: Rc<Cell<usize>>,
    reads: Rc<Cell<usize>>,
}

impl FakeMemory {
    pub fn new(base: u64, bytes: Vec<u8>) -> Self {
        Self {
            base,
            bytes: Rc::new(RefCell::new(bytes)),
            failures: Rc::new(Cell::new(0)),
            reads: Rc::new(Cell::new(0)),
        }
    }

    /// Makes the next `n` reads fail.
    pub fn fail_next(&self, n: usize) {
        self.failures.set(n);
    }

    pub fn reads(&self) -> usize {
        self.reads.get()
    }

    pub fn bytes(&self) -> Vec<u8> {
        self.bytes.borrow().clone()
    }

    fn index(&self, addr: u64) -> io::Result<usize> {
        let len = self.bytes.borrow().len() as u64;
        match addr.checked_sub(self.base) {
            Some(idx) if idx < len => Ok(idx as usize),
            _ => Err(io::Error::from_raw_os_error(libc::EIO)),
        }
    }
}

impl MemoryAccess for FakeMemory {
    fn read_byte(&mut self, addr: u64) -> io::Result<u8> {
        self.reads.set(self.reads.get() + 1);
        if self.failures.get() > 0 {
            self.failures.set(self.failures.get() - 1);
            return Err(io::Error::from_raw_os_error(libc::EIO));
        }
        let idx = self.index(addr)?;
        Ok(self.bytes.borrow()[idx])
    }

    fn write_byte(&mut self, addr: u64, value: u8) -> io::Result<()> {
        let idx = self.index(addr)?;
        self.bytes.borrow_mut()[idx] = value;
        Ok(())
    }
}

/// A target whose layout report is a string and whose memory is a [`FakeMemory`].
///
/// A `maps` of `None` behaves like a process that has exited.
pub struct FakeTarget {
    pub pid: u32,
    pub maps: RefCell<Option<String>>,
    pub memory: FakeMemory,
    pub open_failures: Cell<usize>,
    pub opens: Cell<usize>,
}

impl FakeTarget {
    pub fn new(maps: Option<&str>, memory: FakeMemory) -> Self {
        Self {
            pid: 4242,
            maps: RefCell::new(maps.map(str::to_string)),
            memory,
            open_failures: Cell::new(0),
            opens: Cell::new(0),
        }
    }

    pub fn exit(&self) {
        self.maps.replace(None);
    }
}

impl Target for FakeTarget {
    type Memory = FakeMemory;

    fn pid(&self) -> u32 {
        self.pid
    }

    fn regions(&self) -> Result<RegionSet, TargetError> {
        match self.maps.borrow().as_deref() {
            Some(maps) => Ok(RegionSet::from_maps(maps)?),
            None => Err(TargetError::from_io(
                self.pid,
                io::Error::from(io::ErrorKind::NotFound),
            )),
        }
    }

    fn open_memory(&self) -> Result<FakeMemory, TargetError> {
        self.opens.set(self.opens.get() + 1);
        if self.open_failures.get() > 0 {
            self.open_failures.set(self.open_failures.get() - 1);
            return Err(TargetError::from_io(
                self.pid,
                io::Error::from(io::ErrorKind::PermissionDenied),
            ));
        }
        Ok(self.memory.clone())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Regions(u64),
    Planned(Option<u64>),
    Flipped(BitFlip),
    AttemptFailed(usize),
    Abandoned,
    CycleFailed,
    Stopped(StopReason),
}

/// Observer that records every event.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    pub events: Vec<Event>,
}

impl RecordingObserver {
    pub fn failed_attempts(&self) -> Vec<usize> {
        self.events
            .iter()
            .filter_map(|e| match e {
                Event::AttemptFailed(attempt) => Some(*attempt),
                _ => None,
            })
            .collect()
    }

    pub fn flips(&self) -> Vec<BitFlip> {
        self.events
            .iter()
            .filter_map(|e| match e {
                Event::Flipped(flip) => Some(*flip),
                _ => None,
            })
            .collect()
    }
}

impl InjectionObserver for RecordingObserver {
    fn regions_discovered(&mut self, regions: &RegionSet) {
        self.events.push(Event::Regions(regions.total_len()));
    }

    fn schedule_planned(
        &mut self,
        schedule: Option<&crate::schedule::FlipSchedule>,
        _delay: std::time::Duration,
    ) {
        self.events.push(Event::Planned(schedule.map(|s| s.batch_size)));
    }

    fn flip_succeeded(&mut self, flip: &BitFlip) {
        self.events.push(Event::Flipped(*flip));
    }

    fn flip_attempt_failed(&mut self, attempt: usize, _error: &FlipError) {
        self.events.push(Event::AttemptFailed(attempt));
    }

    fn flip_abandoned(&mut self, _error: &FlipError) {
        self.events.push(Event::Abandoned);
    }

    fn cycle_failed(&mut self, _error: &TargetError) {
        self.events.push(Event::CycleFailed);
    }

    fn stopped(&mut self, reason: &StopReason) {
        self.events.push(Event::Stopped(reason.clone()));
    }
}
