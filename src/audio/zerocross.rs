//! Zero-cross and level counting over a sample cycle buffer.
//!
//! The detector keeps the last `length` samples in a ring together with a
//! parallel flag array marking which positions were counted as zero
//! crossings, so evicting the oldest sample adjusts the running count in
//! O(1). The ring doubles as the head-margin reservoir: on trigger-up the
//! segmenter flushes it to recover audio from before the trigger point.

use log::warn;

use crate::audio::Sample;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sign {
    Positive,
    Negative,
}

pub struct ZeroCross {
    /// Level threshold a sample magnitude must exceed to arm the detector.
    trigger: i32,
    /// Static DC offset added to each incoming sample before evaluation.
    offset: i32,
    length: usize,
    data: Vec<Sample>,
    is_zc: Vec<bool>,
    zero_cross: usize,
    /// Next write position in the ring.
    top: usize,
    /// Number of valid samples; below `length` until the ring first fills.
    valid_len: usize,
    sign: Sign,
    armed: bool,
    /// Peak absolute level seen in the last `push`.
    level: i32,
}

impl ZeroCross {
    pub fn new(trigger: i32, length: usize, offset: i32) -> Self {
        let mut zc = ZeroCross {
            trigger,
            offset,
            length,
            data: vec![0; length],
            is_zc: vec![false; length],
            zero_cross: 0,
            top: 0,
            valid_len: 0,
            sign: Sign::Positive,
            armed: false,
            level: 0,
        };
        zc.reset(trigger, length, offset);
        zc
    }

    /// Re-initialize all counters. If the requested window length differs
    /// from the allocated one, the buffers are re-allocated.
    pub fn reset(&mut self, trigger: i32, length: usize, offset: i32) {
        if self.length != length {
            warn!("zerocross buffer length changed ({} -> {}), re-allocating", self.length, length);
            self.length = length;
            self.data = vec![0; length];
            self.is_zc = vec![false; length];
        }
        self.trigger = trigger;
        self.offset = offset;
        self.zero_cross = 0;
        self.armed = false;
        self.sign = Sign::Positive;
        self.top = 0;
        self.valid_len = 0;
        self.is_zc.iter_mut().for_each(|f| *f = false);
    }

    pub fn set_trigger(&mut self, trigger: i32) {
        self.trigger = trigger;
    }

    pub fn window_len(&self) -> usize {
        self.length
    }

    /// Number of samples currently held (the head margin available so far).
    pub fn valid_len(&self) -> usize {
        self.valid_len
    }

    /// Admit `buf` into the ring, evicting the oldest samples, and return
    /// the zero-cross count over the samples currently held together with
    /// the peak absolute level of the admitted chunk.
    pub fn push(&mut self, buf: &[Sample]) -> (usize, i32) {
        let mut level: i32 = 0;
        for &s in buf {
            if self.is_zc[self.top] {
                self.zero_cross -= 1;
            }
            self.is_zc[self.top] = false;

            let v = s as i32 + self.offset;
            if self.armed {
                if self.sign == Sign::Positive && v < 0 {
                    self.zero_cross += 1;
                    self.is_zc[self.top] = true;
                    self.armed = false;
                    self.sign = Sign::Negative;
                } else if self.sign == Sign::Negative && v > 0 {
                    self.zero_cross += 1;
                    self.is_zc[self.top] = true;
                    self.armed = false;
                    self.sign = Sign::Positive;
                }
            }
            if v.abs() > self.trigger {
                self.armed = true;
            }
            if v.abs() > level {
                level = v.abs();
            }

            self.data[self.top] = s;
            self.top += 1;
            if self.valid_len < self.top {
                self.valid_len = self.top;
            }
            if self.top >= self.length {
                self.top = 0;
            }
        }
        self.level = level;
        (self.zero_cross, level)
    }

    /// Peak absolute level of the chunk given to the last `push`.
    pub fn last_level(&self) -> i32 {
        self.level
    }

    /// Copy the held samples, oldest first, into `out`. Used to flush the
    /// head margin when a segment triggers up.
    pub fn copy_buffer(&self, out: &mut Vec<Sample>) {
        out.clear();
        out.reserve(self.valid_len);
        let mut t = if self.valid_len < self.length { 0 } else { self.top };
        for _ in 0..self.valid_len {
            out.push(self.data[t]);
            t += 1;
            if t == self.length {
                t = 0;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Square wave of the given amplitude and half-period in samples.
    fn square(amplitude: i16, half_period: usize, len: usize) -> Vec<i16> {
        (0..len)
            .map(|i| if (i / half_period) % 2 == 0 { amplitude } else { -amplitude })
            .collect()
    }

    #[test]
    fn counts_crossings_of_loud_square_wave() {
        let mut zc = ZeroCross::new(1000, 1600, 0);
        // 100 samples per half period -> a crossing every 100 samples
        let wave = square(8000, 100, 1600);
        let (count, level) = zc.push(&wave);
        assert_eq!(level, 8000);
        // 16 half-periods, one sign reversal at each boundary except the first
        assert_eq!(count, 15);
    }

    #[test]
    fn quiet_signal_never_arms() {
        let mut zc = ZeroCross::new(1000, 1600, 0);
        let wave = square(500, 100, 1600);
        let (count, level) = zc.push(&wave);
        assert_eq!(count, 0);
        assert_eq!(level, 500);
    }

    #[test]
    fn eviction_decrements_count() {
        let mut zc = ZeroCross::new(1000, 400, 0);
        let wave = square(8000, 100, 400);
        let (count, _) = zc.push(&wave);
        assert_eq!(count, 3);
        // Push silence; old crossings leave the window one by one.
        let (count, _) = zc.push(&vec![0i16; 400]);
        assert_eq!(count, 0);
    }

    #[test]
    fn dc_offset_applies_before_threshold() {
        // With +2000 offset, a -1500 sample sits at +500: below trigger.
        let mut zc = ZeroCross::new(1000, 100, 2000);
        let (_, level) = zc.push(&[-1500i16; 100]);
        assert_eq!(level, 500);
    }

    #[test]
    fn copy_buffer_preserves_capture_order() {
        let mut zc = ZeroCross::new(1000, 4, 0);
        zc.push(&[1, 2, 3, 4, 5, 6]);
        let mut out = Vec::new();
        zc.copy_buffer(&mut out);
        assert_eq!(out, vec![3, 4, 5, 6]);
    }

    #[test]
    fn partial_fill_flushes_prefix_only() {
        let mut zc = ZeroCross::new(1000, 8, 0);
        zc.push(&[7, 8, 9]);
        let mut out = Vec::new();
        zc.copy_buffer(&mut out);
        assert_eq!(out, vec![7, 8, 9]);
        assert_eq!(zc.valid_len(), 3);
    }

    #[test]
    fn reset_with_new_length_reallocates() {
        let mut zc = ZeroCross::new(1000, 4, 0);
        zc.push(&[1, 2, 3, 4]);
        zc.reset(500, 16, 0);
        assert_eq!(zc.window_len(), 16);
        assert_eq!(zc.valid_len(), 0);
        let mut out = Vec::new();
        zc.copy_buffer(&mut out);
        assert!(out.is_empty());
    }
}
