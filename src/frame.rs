//! Audio frame types emitted by the synthesis worker.

use crate::defaults;
use crate::horizon::Timestamp;
use serde::{Deserialize, Serialize};

/// Sample layout inside a frame payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataFormat {
    Interleaved,
}

/// Fixed PCM geometry for one pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub bytes_per_sample: u16,
    pub channel_count: u16,
    pub channel_layout: u64,
    pub samples_per_channel: u32,
}

impl AudioFormat {
    /// Bytes in one full frame: samples per channel × channels × bytes per sample.
    pub fn frame_size(&self) -> usize {
        self.samples_per_channel as usize
            * usize::from(self.channel_count)
            * usize::from(self.bytes_per_sample)
    }

    /// Bytes in one sample across all channels.
    pub fn block_align(&self) -> usize {
        usize::from(self.channel_count) * usize::from(self.bytes_per_sample)
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            sample_rate: defaults::SAMPLE_RATE,
            bytes_per_sample: defaults::BYTES_PER_SAMPLE,
            channel_count: defaults::CHANNEL_COUNT,
            channel_layout: defaults::CHANNEL_LAYOUT,
            samples_per_channel: defaults::samples_per_frame(
                defaults::SAMPLE_RATE,
                defaults::FRAME_DURATION_MS,
            ),
        }
    }
}

/// One chunk of interleaved PCM ready for the audio sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFrame {
    pub sample_rate: u32,
    pub bytes_per_sample: u16,
    pub channel_count: u16,
    pub channel_layout: u64,
    /// Equals the configured value except on the last frame of a stream.
    pub samples_per_channel: u32,
    pub data_format: DataFormat,
    pub timestamp: Timestamp,
    pub payload: Vec<u8>,
}

impl AudioFrame {
    /// Wraps `payload` in a frame of `format`, deriving samples per channel
    /// from the payload length.
    pub fn new(format: &AudioFormat, payload: Vec<u8>) -> Self {
        let align = format.block_align().max(1);
        let samples_per_channel = u32::try_from(payload.len() / align).unwrap_or(u32::MAX);
        Self {
            sample_rate: format.sample_rate,
            bytes_per_sample: format.bytes_per_sample,
            channel_count: format.channel_count,
            channel_layout: format.channel_layout,
            samples_per_channel,
            data_format: DataFormat::Interleaved,
            timestamp: Timestamp::now(),
            payload,
        }
    }

    /// Returns the duration of this frame in milliseconds.
    pub fn duration_ms(&self) -> u32 {
        if self.sample_rate == 0 {
            return 0;
        }
        (u64::from(self.samples_per_channel) * 1000 / u64::from(self.sample_rate)) as u32
    }

    /// Decodes the payload as 16-bit little-endian samples.
    ///
    /// A trailing odd byte is ignored.
    pub fn samples_i16(&self) -> Vec<i16> {
        self.payload
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_format_geometry() {
        let format = AudioFormat::default();
        assert_eq!(format.sample_rate, 16000);
        assert_eq!(format.samples_per_channel, 160);
        assert_eq!(format.frame_size(), 320);
        assert_eq!(format.block_align(), 2);
    }

    #[test]
    fn test_stereo_frame_size() {
        let format = AudioFormat {
            sample_rate: 48000,
            bytes_per_sample: 2,
            channel_count: 2,
            channel_layout: 3,
            samples_per_channel: 480,
        };
        assert_eq!(format.frame_size(), 1920);
    }

    #[test]
    fn test_frame_derives_samples_from_payload() {
        let format = AudioFormat::default();
        let full = AudioFrame::new(&format, vec![0; 320]);
        assert_eq!(full.samples_per_channel, 160);
        assert_eq!(full.duration_ms(), 10);

        let short = AudioFrame::new(&format, vec![0; 100]);
        assert_eq!(short.samples_per_channel, 50);
        assert_eq!(short.data_format, DataFormat::Interleaved);
    }

    #[test]
    fn test_samples_i16_little_endian() {
        let format = AudioFormat::default();
        let frame = AudioFrame::new(&format, vec![0x01, 0x00, 0xff, 0x7f, 0x00, 0x80, 0x09]);
        assert_eq!(frame.samples_i16(), vec![1, i16::MAX, i16::MIN]);
    }
}
