//! Fixed-capacity single-producer/single-consumer buffer ring.
//!
//! The ring is a `ThingBuf` whose slots are filled once at construction and then
//! reused in place: the producer claims the slot at the write position and publishes
//! it when the claim is dropped, and the consumer borrows the oldest published slot
//! and releases it when its claim is dropped. A ring of capacity `n` holds at most
//! `n - 1` published buffers.

use std::sync::Arc;

use thingbuf::recycling::Recycle;
use thingbuf::{Ref, ThingBuf};

use crate::error::{Error, Result};

/// Buffer claimed for writing, published to the consumer when dropped.
pub type WriteSlot<'a, T> = Ref<'a, T>;
/// Buffer borrowed for reading, released to the producer when dropped.
pub type ReadSlot<'a, T> = Ref<'a, T>;

/// Creates each slot's buffer once and leaves its contents alone on reuse.
struct Reuse<T> {
    init: fn() -> T,
}

impl<T> Recycle<T> for Reuse<T> {
    fn new_element(&self) -> T { (self.init)() }
    fn recycle(&self, _: &mut T) {}
}

type Slots<T> = Arc<ThingBuf<T, Reuse<T>>>;

/// Create a ring with the given power-of-two capacity, initializing each buffer with
/// the given function.
pub fn ring<T>(capacity: usize, init: fn() -> T) -> Result<(Producer<T>, Consumer<T>)> {
    if capacity < 2 || !capacity.is_power_of_two() {
        return Err(Error::Capacity(capacity));
    }

    let held = capacity - 1;

    let mut bufs = Vec::new();
    bufs.try_reserve_exact(held).map_err(|_| Error::Alloc(capacity))?;
    bufs.extend((0..held).map(|_| init()));

    let slots = ThingBuf::with_recycle(held, Reuse { init: init });

    // Seat every buffer in its slot so later claims never allocate.
    for buf in bufs {
        if slots.push(buf).is_err() {
            return Err(Error::Capacity(capacity));
        }
    }

    while slots.pop_ref().is_some() {}

    let slots = Arc::new(slots);

    Ok((Producer { slots: slots.clone() }, Consumer { slots: slots }))
}

/// Writing half of a ring.
pub struct Producer<T> {
    slots: Slots<T>,
}

impl<T> Producer<T> {
    /// Claim the next free buffer, or `None` if the ring is full.
    ///
    /// The buffer still holds whatever was last written to it.
    pub fn acquire(&mut self) -> Option<WriteSlot<T>> {
        self.slots.push_ref().ok()
    }

    /// Number of published buffers not yet released by the consumer.
    pub fn len(&self) -> usize { self.slots.len() }

    /// Number of buffers the ring can hold.
    pub fn capacity(&self) -> usize { self.slots.capacity() }
}

/// Reading half of a ring.
pub struct Consumer<T> {
    slots: Slots<T>,
}

impl<T> Consumer<T> {
    /// Borrow the oldest published buffer, or `None` if the ring is empty.
    pub fn acquire(&mut self) -> Option<ReadSlot<T>> {
        self.slots.pop_ref()
    }

    /// Number of published buffers waiting to be read.
    pub fn len(&self) -> usize { self.slots.len() }

    pub fn is_empty(&self) -> bool { self.slots.is_empty() }
}
