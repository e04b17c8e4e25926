//! Fixed-size frame chunker for synthesis output.
//!
//! Synthesis backends return reads of arbitrary length. The chunker keeps one
//! partially-filled frame buffer and yields a full [`AudioFrame`] every time
//! it fills. At end of stream the partial buffer becomes one shorter frame;
//! on abandonment it is discarded unplayed.

use crate::frame::{AudioFormat, AudioFrame};

/// Accumulates PCM bytes into frames of `format.frame_size()` bytes.
#[derive(Debug)]
pub struct FrameChunker {
    format: AudioFormat,
    frame_size: usize,
    buffer: Vec<u8>,
    frames_emitted: usize,
}

impl FrameChunker {
    pub fn new(format: AudioFormat) -> Self {
        let frame_size = format.frame_size().max(1);
        Self {
            format,
            frame_size,
            buffer: Vec::with_capacity(frame_size),
            frames_emitted: 0,
        }
    }

    pub fn format(&self) -> &AudioFormat {
        &self.format
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Bytes waiting for the current frame to fill.
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }

    /// Frames yielded so far, including a flushed remainder.
    pub fn frames_emitted(&self) -> usize {
        self.frames_emitted
    }

    /// Feeds one read into the chunker.
    ///
    /// The returned iterator yields each frame as it fills. Bytes the
    /// iterator has not consumed when dropped stay buffered for the next call.
    pub fn feed<'a>(&'a mut self, bytes: &'a [u8]) -> Frames<'a> {
        Frames {
            chunker: self,
            input: bytes,
        }
    }

    /// Emits whatever partial bytes remain as one final, shorter frame.
    pub fn flush_remainder(&mut self) -> Option<AudioFrame> {
        if self.buffer.is_empty() {
            return None;
        }
        let payload = std::mem::take(&mut self.buffer);
        self.frames_emitted += 1;
        Some(AudioFrame::new(&self.format, payload))
    }

    /// Drops the partial buffer without emitting it. Returns the bytes lost.
    pub fn discard(&mut self) -> usize {
        let dropped = self.buffer.len();
        self.buffer.clear();
        dropped
    }

    fn take_frame(&mut self) -> AudioFrame {
        let rest = if self.buffer.len() > self.frame_size {
            self.buffer.split_off(self.frame_size)
        } else {
            Vec::with_capacity(self.frame_size)
        };
        let payload = std::mem::replace(&mut self.buffer, rest);
        self.frames_emitted += 1;
        AudioFrame::new(&self.format, payload)
    }
}

/// Lazy sequence of full frames produced by one [`FrameChunker::feed`] call.
pub struct Frames<'a> {
    chunker: &'a mut FrameChunker,
    input: &'a [u8],
}

impl Iterator for Frames<'_> {
    type Item = AudioFrame;

    fn next(&mut self) -> Option<AudioFrame> {
        let frame_size = self.chunker.frame_size;
        if self.chunker.buffer.len() >= frame_size {
            return Some(self.chunker.take_frame());
        }
        while !self.input.is_empty() {
            let need = frame_size - self.chunker.buffer.len();
            let take = need.min(self.input.len());
            let (head, tail) = self.input.split_at(take);
            self.chunker.buffer.extend_from_slice(head);
            self.input = tail;
            if self.chunker.buffer.len() == frame_size {
                return Some(self.chunker.take_frame());
            }
        }
        None
    }
}

impl Drop for Frames<'_> {
    fn drop(&mut self) {
        if !self.input.is_empty() {
            self.chunker.buffer.extend_from_slice(self.input);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format_with_frame(samples_per_channel: u32) -> AudioFormat {
        AudioFormat {
            samples_per_channel,
            ..AudioFormat::default()
        }
    }

    #[test]
    fn test_exact_frame_emits_once() {
        let mut chunker = FrameChunker::new(AudioFormat::default());
        let frames: Vec<_> = chunker.feed(&[7u8; 320]).collect();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload.len(), 320);
        assert_eq!(frames[0].samples_per_channel, 160);
        assert_eq!(chunker.pending_bytes(), 0);
    }

    #[test]
    fn test_small_reads_accumulate() {
        let mut chunker = FrameChunker::new(format_with_frame(4)); // 8 bytes
        assert_eq!(chunker.feed(&[1, 2, 3]).count(), 0);
        assert_eq!(chunker.pending_bytes(), 3);

        let frames: Vec<_> = chunker.feed(&[4, 5, 6, 7, 8, 9]).collect();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload, vec![1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(chunker.pending_bytes(), 1);
    }

    #[test]
    fn test_large_read_yields_many_frames() {
        let mut chunker = FrameChunker::new(format_with_frame(2)); // 4 bytes
        let bytes: Vec<u8> = (0..18).collect();
        let frames: Vec<_> = chunker.feed(&bytes).collect();
        assert_eq!(frames.len(), 4);
        assert_eq!(frames[3].payload, vec![12, 13, 14, 15]);
        assert_eq!(chunker.pending_bytes(), 2);
    }

    #[test]
    fn test_flush_remainder_is_shorter_frame() {
        let mut chunker = FrameChunker::new(format_with_frame(4));
        chunker.feed(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]).for_each(drop);

        let last = chunker.flush_remainder().unwrap();
        assert_eq!(last.payload, vec![9, 10]);
        assert_eq!(last.samples_per_channel, 1);
        assert!(chunker.flush_remainder().is_none());
        assert_eq!(chunker.frames_emitted(), 2);
    }

    #[test]
    fn test_flush_remainder_empty_is_none() {
        let mut chunker = FrameChunker::new(AudioFormat::default());
        assert!(chunker.flush_remainder().is_none());
        chunker.feed(&[0u8; 640]).for_each(drop);
        assert!(chunker.flush_remainder().is_none());
    }

    #[test]
    fn test_discard_drops_partial() {
        let mut chunker = FrameChunker::new(AudioFormat::default());
        chunker.feed(&[1u8; 100]).for_each(drop);
        assert_eq!(chunker.discard(), 100);
        assert_eq!(chunker.pending_bytes(), 0);
        assert!(chunker.flush_remainder().is_none());
    }

    #[test]
    fn test_dropped_iterator_keeps_unconsumed_bytes() {
        let mut chunker = FrameChunker::new(format_with_frame(1)); // 2 bytes
        {
            let mut frames = chunker.feed(&[1, 2, 3, 4, 5, 6, 7]);
            assert_eq!(frames.next().unwrap().payload, vec![1, 2]);
        }
        assert_eq!(chunker.pending_bytes(), 5);

        let frames: Vec<_> = chunker.feed(&[8]).collect();
        let payloads: Vec<_> = frames.into_iter().map(|f| f.payload).collect();
        assert_eq!(payloads, vec![vec![3, 4], vec![5, 6], vec![7, 8]]);
        assert_eq!(chunker.pending_bytes(), 0);
    }

    #[test]
    fn test_frame_count_matches_floor_division() {
        let frame = 6usize;
        for total in [0usize, 1, 5, 6, 7, 35, 36, 100] {
            for read in [1usize, 4, 6, 13] {
                let mut chunker = FrameChunker::new(AudioFormat {
                    samples_per_channel: 3,
                    ..AudioFormat::default()
                });
                let bytes = vec![0u8; total];
                let full: usize = bytes.chunks(read).map(|c| chunker.feed(c).count()).sum();
                let tail = chunker.flush_remainder();

                assert_eq!(full, total / frame, "total={total} read={read}");
                match total % frame {
                    0 => assert!(tail.is_none()),
                    rem => assert_eq!(tail.unwrap().payload.len(), rem),
                }
            }
        }
    }
}
