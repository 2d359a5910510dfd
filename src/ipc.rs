use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};

use bytemuck::{Pod, Zeroable};
use portable_atomic::{AtomicBool, AtomicU32, Ordering};

use crate::config::MEASUREMENT_LEN;
use crate::scanner::Measurement;

/// Wire-format frame: exactly what a reporting layer copies out.
#[repr(C)]
#[derive(Clone, Copy, Zeroable, Pod)]
pub struct MeasurementFrame {
    pub samples: Measurement,
}

impl MeasurementFrame {
    pub const fn zeroed() -> Self {
        Self {
            samples: [0.0; MEASUREMENT_LEN],
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}

/// Single-flag handoff of the latest measurement between the acquisition
/// task and one external reader.
///
/// `available` is the whole protocol: whoever flips it from `true` to
/// `false` owns the buffer until they put it back. There is no queueing,
/// so this is meant for exactly one writer and one reader; a second writer
/// or reader would only ever see "busy" while the other holds it, with no
/// ordering between them.
pub struct PublishChannel {
    available: AtomicBool,
    sequence: AtomicU32,
    frame: UnsafeCell<MeasurementFrame>,
}

// The buffer is only touched by the holder of `available`.
unsafe impl Sync for PublishChannel {}

impl PublishChannel {
    pub const fn new() -> Self {
        Self {
            available: AtomicBool::new(true),
            sequence: AtomicU32::new(0),
            frame: UnsafeCell::new(MeasurementFrame::zeroed()),
        }
    }

    /// `false` while a write or a read is in progress.
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    /// Number of completed writes.
    pub fn sequence(&self) -> u32 {
        self.sequence.load(Ordering::Acquire)
    }

    fn claim(&self) -> bool {
        self.available
            .compare_exchange(true, false, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Take write access if no reader holds the buffer.
    pub fn try_begin_write(&self) -> Option<PublishWriter<'_>> {
        if self.claim() {
            Some(PublishWriter { channel: self })
        } else {
            None
        }
    }

    /// Take read access if no write is in progress.
    pub fn try_begin_read(&self) -> Option<PublishReader<'_>> {
        if self.claim() {
            Some(PublishReader { channel: self })
        } else {
            None
        }
    }

    /// Copy `measurement` in if the buffer is free. `false` leaves the
    /// previous frame in place.
    pub fn try_publish(&self, measurement: &Measurement) -> bool {
        match self.try_begin_write() {
            Some(mut writer) => {
                writer.copy_from_slice(measurement);
                writer.end_write();
                true
            }
            None => false,
        }
    }

    /// Copy the current frame out if no write is in progress.
    pub fn try_snapshot(&self) -> Option<(u32, MeasurementFrame)> {
        let reader = self.try_begin_read()?;
        let snapshot = (reader.sequence(), reader.frame());
        reader.end_read();
        Some(snapshot)
    }
}

impl Default for PublishChannel {
    fn default() -> Self {
        Self::new()
    }
}

pub struct PublishWriter<'a> {
    channel: &'a PublishChannel,
}

impl PublishWriter<'_> {
    /// Mark the buffer available again.
    pub fn end_write(self) {}
}

impl Deref for PublishWriter<'_> {
    type Target = Measurement;

    fn deref(&self) -> &Measurement {
        unsafe { &(*self.channel.frame.get()).samples }
    }
}

impl DerefMut for PublishWriter<'_> {
    fn deref_mut(&mut self) -> &mut Measurement {
        unsafe { &mut (*self.channel.frame.get()).samples }
    }
}

impl Drop for PublishWriter<'_> {
    fn drop(&mut self) {
        self.channel.sequence.fetch_add(1, Ordering::Release);
        self.channel.available.store(true, Ordering::Release);
    }
}

pub struct PublishReader<'a> {
    channel: &'a PublishChannel,
}

impl PublishReader<'_> {
    pub fn sequence(&self) -> u32 {
        self.channel.sequence.load(Ordering::Acquire)
    }

    pub fn frame(&self) -> MeasurementFrame {
        unsafe { *self.channel.frame.get() }
    }

    pub fn end_read(self) {}
}

impl Deref for PublishReader<'_> {
    type Target = Measurement;

    fn deref(&self) -> &Measurement {
        unsafe { &(*self.channel.frame.get()).samples }
    }
}

impl Drop for PublishReader<'_> {
    fn drop(&mut self) {
        self.channel.available.store(true, Ordering::Release);
    }
}

/// Target tilt written by the reporting layer, as fractions in [-1, 1].
///
/// Each axis is a separate atomic, so a value is never torn, but a reader
/// may pair a new `x` with an old `y` if it races a writer. That matches
/// the unsynchronized pair of shares the controller was designed around;
/// the controller only needs each axis to be individually sane.
pub struct TargetSetpoint {
    x: AtomicU32,
    y: AtomicU32,
}

impl TargetSetpoint {
    pub const fn new() -> Self {
        Self {
            x: AtomicU32::new(0),
            y: AtomicU32::new(0),
        }
    }

    pub fn set(&self, x: f32, y: f32) {
        self.x.store(sanitize(x).to_bits(), Ordering::Relaxed);
        self.y.store(sanitize(y).to_bits(), Ordering::Relaxed);
    }

    pub fn get(&self) -> (f32, f32) {
        (
            f32::from_bits(self.x.load(Ordering::Relaxed)),
            f32::from_bits(self.y.load(Ordering::Relaxed)),
        )
    }
}

impl Default for TargetSetpoint {
    fn default() -> Self {
        Self::new()
    }
}

fn sanitize(fraction: f32) -> f32 {
    if fraction.is_finite() {
        fraction.clamp(-1.0, 1.0)
    } else {
        0.0
    }
}

/// Flags owned by the external reporting protocol. The core never reads
/// them; they are carried here so the reporting layer has a home for them.
pub struct ExternalFlags {
    initialize: AtomicBool,
    read: AtomicBool,
}

impl ExternalFlags {
    pub const fn new() -> Self {
        Self {
            initialize: AtomicBool::new(false),
            read: AtomicBool::new(false),
        }
    }

    pub fn initialize(&self) -> bool {
        self.initialize.load(Ordering::Relaxed)
    }

    pub fn set_initialize(&self, value: bool) {
        self.initialize.store(value, Ordering::Relaxed);
    }

    pub fn read(&self) -> bool {
        self.read.load(Ordering::Relaxed)
    }

    pub fn set_read(&self, value: bool) {
        self.read.store(value, Ordering::Relaxed);
    }
}

impl Default for ExternalFlags {
    fn default() -> Self {
        Self::new()
    }
}

/// Cross-task data shared by the acquisition, balance and reporting tasks.
pub struct SharedState {
    pub publish: PublishChannel,
    pub setpoint: TargetSetpoint,
    pub flags: ExternalFlags,
}

impl SharedState {
    pub const fn new() -> Self {
        Self {
            publish: PublishChannel::new(),
            setpoint: TargetSetpoint::new(),
            flags: ExternalFlags::new(),
        }
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}
