//! Consumers for outbound pipeline events.
//!
//! The routing runtime normally owns the outbound side; these sinks cover
//! the local cases: printing reply text, writing audio to a WAV file, and
//! collecting events in tests.

use crate::error::{Result, TurnError};
use crate::events::OutboundEvent;
use crate::frame::AudioFormat;
use std::fs::File;
use std::io::{BufWriter, Seek, Write};
use std::path::Path;

/// Pluggable handler for outbound events.
pub trait EventSink: Send {
    /// Handles one event, in pipeline order.
    fn handle(&mut self, event: &OutboundEvent) -> Result<()>;

    /// Called once after the outbound channel closes.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }

    /// Name for logging/debugging.
    fn name(&self) -> &'static str {
        "sink"
    }
}

/// Prints reply text as it streams, one reply per line.
pub struct TextPrinter<W: Write + Send> {
    out: W,
    mid_line: bool,
}

impl<W: Write + Send> TextPrinter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            mid_line: false,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send> EventSink for TextPrinter<W> {
    fn handle(&mut self, event: &OutboundEvent) -> Result<()> {
        match event {
            OutboundEvent::PartialText {
                text,
                end_of_segment,
            } => {
                if !self.mid_line {
                    write!(self.out, "< ")?;
                    self.mid_line = true;
                }
                write!(self.out, "{text}")?;
                if *end_of_segment {
                    writeln!(self.out)?;
                    self.mid_line = false;
                }
                self.out.flush()?;
            }
            OutboundEvent::Command { .. } => {
                if self.mid_line {
                    writeln!(self.out, " ...")?;
                    self.mid_line = false;
                }
                writeln!(self.out, "[flush]")?;
            }
            OutboundEvent::AudioFrame(_) => {}
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if self.mid_line {
            writeln!(self.out)?;
        }
        self.out.flush()?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "text"
    }
}

/// Appends every audio frame to a 16-bit PCM WAV stream.
pub struct WavFrameSink<W: Write + Seek + Send> {
    writer: Option<hound::WavWriter<W>>,
    format: AudioFormat,
    frames: usize,
}

impl WavFrameSink<BufWriter<File>> {
    /// Creates (or truncates) the WAV file at `path`.
    pub fn create(path: &Path, format: AudioFormat) -> Result<Self> {
        let writer = hound::WavWriter::create(path, wav_spec(&format)?).map_err(wav_error)?;
        Ok(Self {
            writer: Some(writer),
            format,
            frames: 0,
        })
    }
}

impl<W: Write + Seek + Send> WavFrameSink<W> {
    pub fn new(out: W, format: AudioFormat) -> Result<Self> {
        let writer = hound::WavWriter::new(out, wav_spec(&format)?).map_err(wav_error)?;
        Ok(Self {
            writer: Some(writer),
            format,
            frames: 0,
        })
    }

    /// Frames written so far.
    pub fn frames(&self) -> usize {
        self.frames
    }
}

impl<W: Write + Seek + Send> EventSink for WavFrameSink<W> {
    fn handle(&mut self, event: &OutboundEvent) -> Result<()> {
        let Some(frame) = event.as_audio() else {
            return Ok(());
        };
        if frame.sample_rate != self.format.sample_rate
            || frame.channel_count != self.format.channel_count
        {
            return Err(TurnError::Other(format!(
                "frame format {}Hz/{}ch does not match WAV format {}Hz/{}ch",
                frame.sample_rate,
                frame.channel_count,
                self.format.sample_rate,
                self.format.channel_count
            )));
        }
        let Some(writer) = self.writer.as_mut() else {
            return Err(TurnError::Other("WAV sink already finished".to_string()));
        };
        for sample in frame.samples_i16() {
            writer.write_sample(sample).map_err(wav_error)?;
        }
        self.frames += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            writer.finalize().map_err(wav_error)?;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "wav"
    }
}

/// Keeps every event; for tests and embedding.
#[derive(Debug, Default)]
pub struct CollectorSink {
    events: Vec<OutboundEvent>,
}

impl CollectorSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[OutboundEvent] {
        &self.events
    }

    /// Concatenated reply text.
    pub fn text(&self) -> String {
        self.events
            .iter()
            .filter_map(|e| match e {
                OutboundEvent::PartialText { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }
}

impl EventSink for CollectorSink {
    fn handle(&mut self, event: &OutboundEvent) -> Result<()> {
        self.events.push(event.clone());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "collector"
    }
}

fn wav_spec(format: &AudioFormat) -> Result<hound::WavSpec> {
    if format.bytes_per_sample != 2 {
        return Err(TurnError::ConfigInvalidValue {
            key: "audio.bytes_per_sample".to_string(),
            message: "WAV output supports 16-bit samples only".to_string(),
        });
    }
    Ok(hound::WavSpec {
        channels: format.channel_count,
        sample_rate: format.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    })
}

fn wav_error(e: hound::Error) -> TurnError {
    match e {
        hound::Error::IoError(io) => TurnError::Io(io),
        other => TurnError::Other(format!("WAV write failed: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::AudioFrame;
    use std::io::Cursor;

    fn text(s: &str, end: bool) -> OutboundEvent {
        OutboundEvent::PartialText {
            text: s.to_string(),
            end_of_segment: end,
        }
    }

    #[test]
    fn test_text_printer_lines() {
        let mut printer = TextPrinter::new(Vec::new());
        for event in [
            text("Hello,", false),
            text(" there.", false),
            text("", true),
            text("One", false),
            OutboundEvent::flush(),
        ] {
            printer.handle(&event).unwrap();
        }
        printer.finish().unwrap();

        let out = String::from_utf8(printer.into_inner()).unwrap();
        assert_eq!(out, "< Hello, there.\n< One ...\n[flush]\n");
    }

    #[test]
    fn test_wav_sink_writes_samples() {
        let format = AudioFormat::default();
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut sink = WavFrameSink::new(&mut cursor, format).unwrap();
            let samples: Vec<u8> = [1i16, -2, 3, -4]
                .iter()
                .flat_map(|s| s.to_le_bytes())
                .collect();
            sink.handle(&OutboundEvent::AudioFrame(AudioFrame::new(&format, samples)))
                .unwrap();
            sink.handle(&text("ignored", true)).unwrap();
            assert_eq!(sink.frames(), 1);
            sink.finish().unwrap();
        }

        cursor.set_position(0);
        let mut reader = hound::WavReader::new(cursor).unwrap();
        assert_eq!(reader.spec().sample_rate, 16000);
        let read: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(read, vec![1, -2, 3, -4]);
    }

    #[test]
    fn test_wav_sink_rejects_mismatched_frames() {
        let format = AudioFormat::default();
        let other = AudioFormat {
            sample_rate: 24000,
            ..format
        };
        let mut sink = WavFrameSink::new(Cursor::new(Vec::new()), format).unwrap();
        let frame = AudioFrame::new(&other, vec![0; 4]);
        assert!(sink.handle(&OutboundEvent::AudioFrame(frame)).is_err());
    }

    #[test]
    fn test_wav_sink_requires_16_bit() {
        let format = AudioFormat {
            bytes_per_sample: 4,
            ..AudioFormat::default()
        };
        assert!(WavFrameSink::new(Cursor::new(Vec::new()), format).is_err());
    }

    #[test]
    fn test_collector_text() {
        let mut sink = CollectorSink::new();
        sink.handle(&text("a,", false)).unwrap();
        sink.handle(&OutboundEvent::flush()).unwrap();
        sink.handle(&text(" b", true)).unwrap();
        assert_eq!(sink.text(), "a, b");
        assert_eq!(sink.events().len(), 3);
    }
}
