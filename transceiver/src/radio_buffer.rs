//! Segmented Sample Ring Buffer
//!
//! Hands fixed-size blocks between the radio interface and the per-carrier
//! producers and consumers. The interface side works one segment at a time
//! directly in buffer memory; the other side moves arbitrary sample counts.
//!
//! Every segment slot is preceded by `headroom` samples. After a segment is
//! read its last `headroom` samples are copied in front of the next slot, so
//! a read segment is always delivered together with the samples that came
//! before it. Writers never touch the head-room area.

use crate::TrxError;
use num_complex::Complex32;
use num_traits::Zero;
use std::sync::{Mutex, MutexGuard, PoisonError};

struct Inner {
    /// Slots of `headroom + segment_len` samples
    data: Vec<Complex32>,
    /// Logical write position in `[0, capacity)`
    write_pos: usize,
    /// Logical read position in `[0, capacity)`
    read_pos: usize,
    /// Samples written and not yet read
    avail: usize,
}

/// Thread-safe ring of `num_segments` segments of `segment_len` samples
pub struct RadioBuffer {
    inner: Mutex<Inner>,
    num_segments: usize,
    segment_len: usize,
    headroom: usize,
}

impl RadioBuffer {
    pub fn new(num_segments: usize, segment_len: usize, headroom: usize) -> Result<Self, TrxError> {
        if num_segments == 0 || segment_len == 0 {
            return Err(TrxError::InvalidConfiguration(format!(
                "Empty radio buffer: {} segments of {} samples",
                num_segments, segment_len
            )));
        }
        if headroom > segment_len {
            return Err(TrxError::InvalidConfiguration(format!(
                "Head-room {} exceeds segment length {}",
                headroom, segment_len
            )));
        }

        Ok(Self {
            inner: Mutex::new(Inner {
                data: vec![Complex32::zero(); num_segments * (headroom + segment_len)],
                write_pos: 0,
                read_pos: 0,
                avail: 0,
            }),
            num_segments,
            segment_len,
            headroom,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Physical index of logical sample position `pos`
    fn index(&self, pos: usize) -> usize {
        let slot = pos / self.segment_len;
        slot * (self.headroom + self.segment_len) + self.headroom + pos % self.segment_len
    }

    pub fn segment_len(&self) -> usize {
        self.segment_len
    }

    pub fn num_segments(&self) -> usize {
        self.num_segments
    }

    pub fn headroom(&self) -> usize {
        self.headroom
    }

    /// Total capacity in samples
    pub fn capacity(&self) -> usize {
        self.num_segments * self.segment_len
    }

    /// Samples ready to be read
    pub fn available(&self) -> usize {
        self.lock().avail
    }

    /// Samples that can be written
    pub fn space(&self) -> usize {
        self.capacity() - self.lock().avail
    }

    /// Whole segments that can be written
    pub fn free_segments(&self) -> usize {
        self.space() / self.segment_len
    }

    /// Whole segments ready to be read
    pub fn avail_segments(&self) -> usize {
        self.available() / self.segment_len
    }

    /// Fill the next segment in place.
    ///
    /// `f` receives exactly `segment_len()` samples. The segment is committed
    /// only if `f` succeeds. Returns `None` when no aligned segment is free.
    pub fn with_write_segment<R, E>(
        &self,
        f: impl FnOnce(&mut [Complex32]) -> Result<R, E>,
    ) -> Option<Result<R, E>> {
        let mut inner = self.lock();
        let capacity = self.capacity();
        if inner.write_pos % self.segment_len != 0 || capacity - inner.avail < self.segment_len {
            return None;
        }

        let start = self.index(inner.write_pos);
        let result = f(&mut inner.data[start..start + self.segment_len]);
        if result.is_ok() {
            inner.write_pos = (inner.write_pos + self.segment_len) % capacity;
            inner.avail += self.segment_len;
        }
        Some(result)
    }

    /// Consume the next segment in place.
    ///
    /// `f` receives `headroom() + segment_len()` samples: the tail of the
    /// previously read segment followed by the segment itself. The segment is
    /// released only if `f` succeeds. Returns `None` when no aligned segment
    /// is available.
    pub fn with_read_segment<R, E>(
        &self,
        f: impl FnOnce(&[Complex32]) -> Result<R, E>,
    ) -> Option<Result<R, E>> {
        let mut inner = self.lock();
        if inner.read_pos % self.segment_len != 0 || inner.avail < self.segment_len {
            return None;
        }

        let slot_len = self.headroom + self.segment_len;
        let slot = inner.read_pos / self.segment_len;
        let start = slot * slot_len;
        let result = f(&inner.data[start..start + slot_len]);

        if result.is_ok() {
            let next = ((slot + 1) % self.num_segments) * slot_len;
            let tail = start + slot_len - self.headroom;
            inner.data.copy_within(tail..tail + self.headroom, next);
            inner.read_pos = (inner.read_pos + self.segment_len) % self.capacity();
            inner.avail -= self.segment_len;
        }
        Some(result)
    }

    /// Append all of `samples`, or nothing if they do not fit
    pub fn write(&self, samples: &[Complex32]) -> bool {
        let mut inner = self.lock();
        let capacity = self.capacity();
        if capacity - inner.avail < samples.len() {
            return false;
        }

        let mut pos = inner.write_pos;
        let mut rest = samples;
        while !rest.is_empty() {
            let run = (self.segment_len - pos % self.segment_len).min(rest.len());
            let start = self.index(pos);
            inner.data[start..start + run].copy_from_slice(&rest[..run]);
            rest = &rest[run..];
            pos = (pos + run) % capacity;
        }

        inner.write_pos = pos;
        inner.avail += samples.len();
        true
    }

    /// Fill all of `samples`, or nothing if not enough are available
    pub fn read(&self, samples: &mut [Complex32]) -> bool {
        let mut inner = self.lock();
        if inner.avail < samples.len() {
            return false;
        }

        let capacity = self.capacity();
        let mut pos = inner.read_pos;
        let mut filled = 0;
        while filled < samples.len() {
            let run = (self.segment_len - pos % self.segment_len).min(samples.len() - filled);
            let start = self.index(pos);
            samples[filled..filled + run].copy_from_slice(&inner.data[start..start + run]);
            filled += run;
            pos = (pos + run) % capacity;
        }

        inner.read_pos = pos;
        inner.avail -= samples.len();
        true
    }

    /// Drop all buffered samples and history
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.data.fill(Complex32::zero());
        inner.write_pos = 0;
        inner.read_pos = 0;
        inner.avail = 0;
    }
}

impl std::fmt::Debug for RadioBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RadioBuffer")
            .field("num_segments", &self.num_segments)
            .field("segment_len", &self.segment_len)
            .field("headroom", &self.headroom)
            .field("available", &self.available())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use std::sync::Arc;
    use std::thread;

    fn ramp(start: usize, len: usize) -> Vec<Complex32> {
        (start..start + len).map(|i| Complex32::new(i as f32, 0.0)).collect()
    }

    #[test]
    fn test_buffer_geometry() {
        let buffer = RadioBuffer::new(24, 260, 16).unwrap();
        assert_eq!(buffer.capacity(), 24 * 260);
        assert_eq!(buffer.free_segments(), 24);
        assert_eq!(buffer.avail_segments(), 0);

        assert!(RadioBuffer::new(0, 260, 0).is_err());
        assert!(RadioBuffer::new(4, 8, 9).is_err());
    }

    #[test]
    fn test_segment_write_then_sample_read() {
        let buffer = RadioBuffer::new(3, 4, 0).unwrap();
        for seg in 0..3 {
            let result = buffer.with_write_segment(|s| {
                s.copy_from_slice(&ramp(seg * 4, 4));
                Ok::<_, Infallible>(())
            });
            assert!(matches!(result, Some(Ok(()))));
        }
        assert_eq!(buffer.free_segments(), 0);
        assert!(buffer.with_write_segment(|_| Ok::<_, Infallible>(())).is_none());

        let mut out = vec![Complex32::zero(); 6];
        assert!(buffer.read(&mut out));
        assert_eq!(out, ramp(0, 6));
        assert_eq!(buffer.available(), 6);

        let mut too_many = vec![Complex32::zero(); 7];
        assert!(!buffer.read(&mut too_many));
        assert_eq!(buffer.available(), 6);
    }

    #[test]
    fn test_failed_segment_fill_is_not_committed() {
        let buffer = RadioBuffer::new(2, 4, 0).unwrap();
        let result = buffer.with_write_segment(|_| Err::<(), _>("filter failed"));
        assert_eq!(result, Some(Err("filter failed")));
        assert_eq!(buffer.available(), 0);
    }

    #[test]
    fn test_read_segment_carries_previous_tail() {
        let buffer = RadioBuffer::new(3, 4, 2).unwrap();
        assert!(buffer.write(&ramp(0, 12)));

        let mut seen = Vec::new();
        for _ in 0..3 {
            buffer
                .with_read_segment(|s| {
                    seen.push(s.to_vec());
                    Ok::<_, Infallible>(())
                })
                .unwrap()
                .unwrap();
        }

        assert_eq!(seen[0][..2], [Complex32::zero(); 2]);
        assert_eq!(seen[0][2..], ramp(0, 4)[..]);
        assert_eq!(seen[1], ramp(2, 6));
        assert_eq!(seen[2], ramp(6, 6));

        // Wrap around: the first slot now sees the tail of the last segment
        assert!(buffer.write(&ramp(12, 4)));
        buffer
            .with_read_segment(|s| {
                assert_eq!(s, &ramp(10, 6)[..]);
                Ok::<_, Infallible>(())
            })
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_write_is_all_or_nothing() {
        let buffer = RadioBuffer::new(2, 4, 1).unwrap();
        assert!(buffer.write(&ramp(0, 5)));
        assert!(!buffer.write(&ramp(5, 4)));
        assert_eq!(buffer.available(), 5);
        assert!(buffer.write(&ramp(5, 3)));
        assert_eq!(buffer.space(), 0);
    }

    #[test]
    fn test_unaligned_positions_block_segments() {
        let buffer = RadioBuffer::new(2, 4, 0).unwrap();
        assert!(buffer.write(&ramp(0, 2)));
        assert!(buffer.with_write_segment(|_| Ok::<_, Infallible>(())).is_none());
        assert!(buffer.with_read_segment(|_| Ok::<_, Infallible>(())).is_none());

        buffer.clear();
        assert_eq!(buffer.available(), 0);
        assert!(buffer.with_write_segment(|_| Ok::<_, Infallible>(())).is_some());
    }

    #[test]
    fn test_concurrent_producer_consumer() {
        let buffer = Arc::new(RadioBuffer::new(4, 16, 0).unwrap());
        let total = 16 * 64;

        let producer = {
            let buffer = buffer.clone();
            thread::spawn(move || {
                let mut next = 0;
                while next < total {
                    let ok = buffer
                        .with_write_segment(|s| {
                            s.copy_from_slice(&ramp(next, 16));
                            Ok::<_, Infallible>(())
                        })
                        .is_some();
                    if ok {
                        next += 16;
                    } else {
                        thread::yield_now();
                    }
                }
            })
        };

        let mut received = Vec::with_capacity(total);
        let mut chunk = vec![Complex32::zero(); 8];
        while received.len() < total {
            if buffer.read(&mut chunk) {
                received.extend_from_slice(&chunk);
            } else {
                thread::yield_now();
            }
        }
        producer.join().unwrap();

        assert_eq!(received, ramp(0, total));
    }
}
