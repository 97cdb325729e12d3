//! Lock-free single-producer single-consumer sample ring.
//!
//! The emulation thread pushes rendered frames, the host audio callback
//! drains them. Slots are packed stereo frames stored as `AtomicU32`;
//! ordering is carried by the acquire/release index pair, so no locking and
//! no unsafe code. A full ring drops new frames, an underflowing drain is
//! padded with the most recent frame so the output does not click.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StereoSample {
    pub left: i16,
    pub right: i16,
}

impl StereoSample {
    fn pack(self) -> u32 {
        (u32::from(self.left.cast_unsigned()) << 16) | u32::from(self.right.cast_unsigned())
    }

    fn unpack(raw: u32) -> Self {
        Self {
            left: ((raw >> 16) as u16).cast_signed(),
            right: (raw as u16).cast_signed(),
        }
    }
}

pub struct SampleRing {
    slots: Box<[AtomicU32]>,
    read: AtomicUsize,
    write: AtomicUsize,
    last: AtomicU32,
}

impl SampleRing {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: (0..capacity).map(|_| AtomicU32::new(0)).collect(),
            read: AtomicUsize::new(0),
            write: AtomicUsize::new(0),
            last: AtomicU32::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.write
            .load(Ordering::Acquire)
            .wrapping_sub(self.read.load(Ordering::Acquire))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Producer side. Drops the frame when the consumer is not keeping up.
    pub(crate) fn push(&self, sample: StereoSample) {
        let raw = sample.pack();
        self.last.store(raw, Ordering::Relaxed);
        let read = self.read.load(Ordering::Acquire);
        let write = self.write.load(Ordering::Relaxed);
        if write.wrapping_sub(read) >= self.slots.len() {
            return;
        }
        self.slots[write % self.slots.len()].store(raw, Ordering::Relaxed);
        self.write.store(write.wrapping_add(1), Ordering::Release);
    }

    /// Consumer side; fills all of `dst`.
    pub fn drain(&self, dst: &mut [StereoSample]) {
        let read = self.read.load(Ordering::Relaxed);
        let write = self.write.load(Ordering::Acquire);
        let available = write.wrapping_sub(read);
        let taken = available.min(dst.len());
        for (i, out) in dst.iter_mut().take(taken).enumerate() {
            *out = StereoSample::unpack(
                self.slots[read.wrapping_add(i) % self.slots.len()].load(Ordering::Relaxed),
            );
        }
        self.read.store(read.wrapping_add(taken), Ordering::Release);

        let filler = StereoSample::unpack(self.last.load(Ordering::Relaxed));
        for out in dst.iter_mut().skip(taken) {
            *out = filler;
        }
    }
}
