//! # Memory Accounting
//!
//! Tracks the bytes owned by live [`TableBuffer`](crate::table::TableBuffer)s.
//!
//! Arrow arrays free themselves when their last reference drops, so the
//! allocator here does not hand out memory. It records what each buffer
//! holds through an RAII [`Reservation`] that is returned when the buffer's
//! final handle is released. Tests use it to prove that every retained
//! buffer was released exactly as often as it was retained: a leak shows up
//! as bytes still allocated after the pipeline finishes.

mod allocator;

pub use allocator::{Allocator, AllocatorStats, Reservation};
