//! Single-producer/single-consumer sample ring shared between the audio
//! render thread and the capture consumer.
//!
//! Every channel owns a fixed buffer of `capacity` samples. The producer
//! never blocks: it stores the frame, publishes the new count and pokes the
//! consumer once a full kernel is available. The consumer blocks until that
//! happens and then reads exactly `kernel_length` samples per channel.
//!
//! If the consumer falls more than `capacity` samples behind, the oldest
//! samples are overwritten and skipped on the next read.

use std::{
    marker::PhantomData,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering},
    },
    time::Duration,
};

use parking_lot::{Condvar, Mutex};

use crate::common::errors::CaptureError;

/// A sample type that fits in a 32-bit atomic slot.
pub trait Sample: Copy + Default + Send + Sync + 'static {
    fn to_bits(self) -> u32;
    fn from_bits(bits: u32) -> Self;
}

impl Sample for f32 {
    fn to_bits(self) -> u32 {
        f32::to_bits(self)
    }

    fn from_bits(bits: u32) -> Self {
        f32::from_bits(bits)
    }
}

impl Sample for i16 {
    fn to_bits(self) -> u32 {
        self as u16 as u32
    }

    fn from_bits(bits: u32) -> Self {
        bits as u16 as i16
    }
}

struct Shared {
    channels: Vec<Box<[AtomicU32]>>,
    capacity: usize,
    kernel_length: usize,
    write_index: AtomicUsize,
    read_index: AtomicUsize,
    available: AtomicUsize,
    requested: AtomicBool,
    lock: Mutex<()>,
    ready: Condvar,
}

impl Shared {
    /// Clears the wake flag, re-raising it if the producer slipped a kernel
    /// in between.
    fn settle_request(&self) {
        self.requested.store(false, Ordering::Release);
        if self.available.load(Ordering::Acquire) >= self.kernel_length {
            self.requested.store(true, Ordering::Release);
        }
    }
}

/// Creates a ring and returns its two halves.
pub fn channel<T: Sample>(
    channels: usize,
    capacity: usize,
    kernel_length: usize,
) -> Result<(Producer<T>, Consumer<T>), CaptureError> {
    if channels == 0 {
        return Err(CaptureError::Config("ring needs at least one channel".into()));
    }
    if kernel_length == 0 || kernel_length > capacity {
        return Err(CaptureError::Config(format!(
            "kernel length {} does not fit a ring of {} samples",
            kernel_length, capacity
        )));
    }

    let shared = Arc::new(Shared {
        channels: (0..channels)
            .map(|_| (0..capacity).map(|_| AtomicU32::new(0)).collect())
            .collect(),
        capacity,
        kernel_length,
        write_index: AtomicUsize::new(0),
        read_index: AtomicUsize::new(0),
        available: AtomicUsize::new(0),
        requested: AtomicBool::new(false),
        lock: Mutex::new(()),
        ready: Condvar::new(),
    });

    Ok((
        Producer {
            shared: shared.clone(),
            _marker: PhantomData,
        },
        Consumer {
            shared,
            _marker: PhantomData,
        },
    ))
}

/// Writing half. Safe to call from a real-time callback.
pub struct Producer<T> {
    shared: Arc<Shared>,
    _marker: PhantomData<fn(T)>,
}

impl<T: Sample> Producer<T> {
    pub fn channels(&self) -> usize {
        self.shared.channels.len()
    }

    /// Writes one frame, given as one slice per channel. Channels missing
    /// from `frame` are written as silence; all channels advance by the
    /// length of the shortest supplied slice.
    pub fn write(&mut self, frame: &[&[T]]) {
        let len = frame.iter().map(|c| c.len()).min().unwrap_or(0);
        if len == 0 {
            return;
        }

        let shared = &*self.shared;
        let start = shared.write_index.load(Ordering::Relaxed);
        // Only the newest `capacity` samples of an oversized frame survive.
        let skip = len.saturating_sub(shared.capacity);
        let at = (start + skip) % shared.capacity;

        for (i, slots) in shared.channels.iter().enumerate() {
            match frame.get(i) {
                Some(samples) => store(slots, at, &samples[skip..len]),
                None => store_silence::<T>(slots, at, len - skip),
            }
        }

        shared
            .write_index
            .store((start + len) % shared.capacity, Ordering::Release);
        let available = shared.available.fetch_add(len, Ordering::AcqRel) + len;

        if available >= shared.kernel_length {
            shared.requested.store(true, Ordering::Release);
            // Never wait for the lock here; the consumer's timed wait covers
            // a missed notification.
            let _guard = shared.lock.try_lock();
            shared.ready.notify_one();
        }
    }
}

/// Reading half.
pub struct Consumer<T> {
    shared: Arc<Shared>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Sample> Consumer<T> {
    pub fn channels(&self) -> usize {
        self.shared.channels.len()
    }

    pub fn kernel_length(&self) -> usize {
        self.shared.kernel_length
    }

    /// Samples per channel written but not yet read.
    pub fn available(&self) -> usize {
        self.shared
            .available
            .load(Ordering::Acquire)
            .min(self.shared.capacity)
    }

    /// Reads one kernel into `out` (one vector per channel) if available.
    pub fn try_read(&mut self, out: &mut [Vec<T>]) -> bool {
        let shared = &*self.shared;
        let mut available = shared.available.load(Ordering::Acquire);
        let mut read = shared.read_index.load(Ordering::Relaxed);

        if available > shared.capacity {
            let overrun = available - shared.capacity;
            read = (read + overrun) % shared.capacity;
            available = shared.available.fetch_sub(overrun, Ordering::AcqRel) - overrun;
        }

        if available < shared.kernel_length {
            shared.read_index.store(read, Ordering::Relaxed);
            shared.settle_request();
            return false;
        }

        for (slots, buf) in shared.channels.iter().zip(out.iter_mut()) {
            load(slots, read, shared.kernel_length, buf);
        }

        shared.read_index.store(
            (read + shared.kernel_length) % shared.capacity,
            Ordering::Relaxed,
        );
        let remaining =
            shared.available.fetch_sub(shared.kernel_length, Ordering::AcqRel) - shared.kernel_length;
        if remaining < shared.kernel_length {
            shared.settle_request();
        }
        true
    }

    /// Blocks up to `timeout` for a kernel, then reads it.
    pub fn wait_read(&mut self, out: &mut [Vec<T>], timeout: Duration) -> bool {
        if self.try_read(out) {
            return true;
        }
        {
            let mut guard = self.shared.lock.lock();
            if !self.shared.requested.load(Ordering::Acquire) {
                self.shared.ready.wait_for(&mut guard, timeout);
            }
        }
        self.try_read(out)
    }
}

fn store<T: Sample>(slots: &[AtomicU32], at: usize, samples: &[T]) {
    let first = (slots.len() - at).min(samples.len());
    for (slot, sample) in slots[at..at + first].iter().zip(&samples[..first]) {
        slot.store(sample.to_bits(), Ordering::Relaxed);
    }
    for (slot, sample) in slots.iter().zip(&samples[first..]) {
        slot.store(sample.to_bits(), Ordering::Relaxed);
    }
}

fn store_silence<T: Sample>(slots: &[AtomicU32], at: usize, len: usize) {
    let silence = T::default().to_bits();
    for i in 0..len {
        slots[(at + i) % slots.len()].store(silence, Ordering::Relaxed);
    }
}

fn load<T: Sample>(slots: &[AtomicU32], at: usize, len: usize, out: &mut Vec<T>) {
    out.clear();
    let first = (slots.len() - at).min(len);
    out.extend(
        slots[at..at + first]
            .iter()
            .chain(&slots[..len - first])
            .map(|slot| T::from_bits(slot.load(Ordering::Relaxed))),
    );
}
