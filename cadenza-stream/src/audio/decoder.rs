//! Incremental audio decoder using symphonia
//!
//! Unlike a whole-file decoder, [`TrackDecoder`] holds the format reader and
//! codec open and yields one packet's worth of interleaved f32 samples per
//! call. The streaming worker pulls chunks at its own pace, so a multi-minute
//! file never sits fully decoded in memory.
//!
//! Seeking uses the container's seek support plus a decoder reset; the
//! returned position is converted back to source-rate samples through the
//! track's time base.

use crate::error::{Error, Result};
use std::fs::File;
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::{Time, TimeBase};
use tracing::{debug, warn};

/// Upper bound on frames (per channel) returned by one `read_chunk` call.
///
/// Keeps a single chunk comfortably below the accumulation buffer's
/// headroom even after heavy upsampling (8 kHz mono → 48 kHz stereo is a
/// 12× expansion). Decoded packets larger than this are carried over to
/// the next call.
pub const DECODE_CHUNK_FRAMES: usize = 512;

/// Open decode stream for one track.
pub struct TrackDecoder {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    time_base: Option<TimeBase>,
    sample_rate: u32,
    channels: u16,
    format_name: String,
    sample_buf: Option<SampleBuffer<f32>>,
    /// Decoded samples not yet handed out (packets can exceed one chunk).
    leftover: Vec<f32>,
}

impl TrackDecoder {
    /// Open a file and prepare its first audio track for decoding.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .map_err(|e| Error::Decode(format!("cannot open {}: {}", path.display(), e)))?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| Error::Decode(format!("cannot probe {}: {}", path.display(), e)))?;

        let format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| Error::Decode(format!("no audio track in {}", path.display())))?;

        let track_id = track.id;
        let codec_params = track.codec_params.clone();

        let sample_rate = codec_params
            .sample_rate
            .ok_or_else(|| Error::Decode("unknown sample rate".to_string()))?;
        let channels = codec_params
            .channels
            .map(|c| c.count() as u16)
            .ok_or_else(|| Error::Decode("unknown channel count".to_string()))?;
        if channels == 0 || channels > 2 {
            return Err(Error::Decode(format!("unsupported channel count: {channels}")));
        }

        let decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|e| Error::Decode(format!("cannot create decoder: {}", e)))?;

        let format_name = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_else(|| "unknown".to_string());

        debug!(
            "Opened {}: {} {} Hz, {} ch",
            path.display(),
            format_name,
            sample_rate,
            channels
        );

        Ok(Self {
            format,
            decoder,
            track_id,
            time_base: codec_params.time_base,
            sample_rate,
            channels,
            format_name,
            sample_buf: None,
            leftover: Vec::new(),
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn format_name(&self) -> &str {
        &self.format_name
    }

    /// Decode up to [`DECODE_CHUNK_FRAMES`] frames, appending interleaved
    /// f32 samples to `out`.
    ///
    /// Returns the number of frames (samples per channel) appended, or 0 at
    /// end of stream. A corrupt packet is skipped; a corrupt stream reads as
    /// end of stream so the caller can move on to the next track.
    pub fn read_chunk(&mut self, out: &mut Vec<f32>) -> Result<usize> {
        let channels = self.channels as usize;
        loop {
            if !self.leftover.is_empty() {
                let frames = (self.leftover.len() / channels).min(DECODE_CHUNK_FRAMES);
                let take = frames * channels;
                out.extend(self.leftover.drain(..take));
                return Ok(frames);
            }

            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(0);
                }
                Err(e) => {
                    warn!("Error reading packet, treating as end of stream: {}", e);
                    return Ok(0);
                }
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(e)) => {
                    warn!("Decode error in packet, skipping: {}", e);
                    continue;
                }
                Err(e) => {
                    warn!("Decoder failed, treating as end of stream: {}", e);
                    return Ok(0);
                }
            };

            if decoded.frames() == 0 {
                continue;
            }

            let spec = *decoded.spec();
            let needed = decoded.capacity() as u64;
            let reuse = self
                .sample_buf
                .as_ref()
                .map(|b| b.capacity() >= decoded.capacity() * spec.channels.count())
                .unwrap_or(false);
            if !reuse {
                self.sample_buf = Some(SampleBuffer::<f32>::new(needed, spec));
            }
            let sample_buf = self.sample_buf.as_mut().unwrap();
            sample_buf.copy_interleaved_ref(decoded);
            self.leftover.extend_from_slice(sample_buf.samples());
            // Loop around: the leftover branch hands out the first chunk.
        }
    }

    /// Seek to an absolute source-rate sample position.
    ///
    /// Returns the actual position landed on (container seeks are keyframe
    /// granular for some formats).
    pub fn seek_to_sample(&mut self, sample_pos: u64) -> Result<u64> {
        let rate = self.sample_rate as u64;
        let time = Time::new(sample_pos / rate, (sample_pos % rate) as f64 / rate as f64);

        let seeked = self
            .format
            .seek(
                SeekMode::Accurate,
                SeekTo::Time {
                    time,
                    track_id: Some(self.track_id),
                },
            )
            .map_err(|e| Error::Decode(format!("seek failed: {}", e)))?;

        // Codec state and any carried-over samples are stale after a
        // container seek.
        self.decoder.reset();
        self.leftover.clear();

        let actual = match self.time_base {
            Some(tb) => {
                let t = tb.calc_time(seeked.actual_ts);
                (t.seconds as f64 * self.sample_rate as f64 + t.frac * self.sample_rate as f64)
                    as u64
            }
            None => seeked.actual_ts,
        };
        Ok(actual)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_test_wav(path: &Path, rate: u32, channels: u16, seconds: f32) {
        let spec = hound::WavSpec {
            channels,
            sample_rate: rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        let frames = (rate as f32 * seconds) as u32;
        for i in 0..frames {
            let t = i as f32 / rate as f32;
            let sample = ((2.0 * std::f32::consts::PI * 440.0 * t).sin() * 0.5 * i16::MAX as f32)
                as i16;
            for _ in 0..channels {
                writer.write_sample(sample).unwrap();
            }
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn open_reports_source_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_test_wav(&path, 44100, 2, 0.5);

        let decoder = TrackDecoder::open(&path).unwrap();
        assert_eq!(decoder.sample_rate(), 44100);
        assert_eq!(decoder.channels(), 2);
        assert_eq!(decoder.format_name(), "wav");
    }

    #[test]
    fn read_chunk_drains_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_test_wav(&path, 8000, 1, 0.25);

        let mut decoder = TrackDecoder::open(&path).unwrap();
        let mut total_frames = 0usize;
        let mut chunk = Vec::new();
        loop {
            chunk.clear();
            let frames = decoder.read_chunk(&mut chunk).unwrap();
            if frames == 0 {
                break;
            }
            assert!(frames <= DECODE_CHUNK_FRAMES);
            assert_eq!(chunk.len(), frames * decoder.channels() as usize);
            total_frames += frames;
        }
        // 0.25s at 8 kHz
        assert_eq!(total_frames, 2000);
    }

    #[test]
    fn seek_lands_near_target() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_test_wav(&path, 8000, 1, 2.0);

        let mut decoder = TrackDecoder::open(&path).unwrap();
        let actual = decoder.seek_to_sample(8000).unwrap(); // 1.0s
        // WAV seeks are sample accurate; allow a frame of slack anyway.
        assert!((actual as i64 - 8000).unsigned_abs() < 1024, "actual={actual}");

        // Remaining audio should be roughly one second.
        let mut remaining = 0usize;
        let mut chunk = Vec::new();
        loop {
            chunk.clear();
            let frames = decoder.read_chunk(&mut chunk).unwrap();
            if frames == 0 {
                break;
            }
            remaining += frames;
        }
        assert!((remaining as i64 - 8000).unsigned_abs() < 1024, "remaining={remaining}");
    }

    #[test]
    fn open_rejects_non_audio() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not_audio.wav");
        let mut f = File::create(&path).unwrap();
        f.write_all(b"this is not a wav file at all").unwrap();
        assert!(TrackDecoder::open(&path).is_err());
    }
}
