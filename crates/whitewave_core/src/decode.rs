//! Audio decoder using symphonia
//!
//! Decodes a whole encoded loop (MP3, WAV, FLAC, Vorbis) from memory into
//! one interleaved f32 [`AudioBuffer`].

use std::io::Cursor;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, warn};
use whitewave_dsp::AudioBuffer;

use crate::error::{EngineError, EngineResult};

/// Decode `bytes` for `sound_id`; `hint` is an optional file extension
pub fn decode(sound_id: &str, bytes: Vec<u8>, hint: Option<&str>) -> EngineResult<AudioBuffer> {
    let fail = |reason: String| EngineError::Decode {
        sound_id: sound_id.to_string(),
        reason,
    };

    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());

    let mut format_hint = Hint::new();
    if let Some(ext) = hint {
        format_hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &format_hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| fail(format!("Failed to probe format: {}", e)))?;

    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| fail("No audio track found".to_string()))?;

    let track_id = track.id;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| fail("Sample rate not found".to_string()))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| fail(format!("Failed to create decoder: {}", e)))?;

    let mut samples = Vec::new();
    let mut channels = track.codec_params.channels.map(|c| c.count() as u16);

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(ref e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => {
                warn!("Error reading packet for {}: {}", sound_id, e);
                break;
            }
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                if channels.is_none() {
                    channels = Some(spec.channels.count() as u16);
                }

                let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                buffer.copy_interleaved_ref(decoded);
                samples.extend_from_slice(buffer.samples());
            }
            Err(SymphoniaError::DecodeError(e)) => {
                // Corrupt frames are skipped, the rest of the loop still plays
                warn!("Skipping bad packet in {}: {}", sound_id, e);
            }
            Err(e) => return Err(fail(format!("Decode failed: {}", e))),
        }
    }

    let channels = channels.ok_or_else(|| fail("Channel count not found".to_string()))?;
    if samples.is_empty() {
        return Err(fail("No audio frames decoded".to_string()));
    }

    debug!(
        "Decoded {}: {} frames, {} Hz, {} channels",
        sound_id,
        samples.len() / channels.max(1) as usize,
        sample_rate,
        channels
    );

    AudioBuffer::new(samples, sample_rate, channels).map_err(|e| fail(e.to_string()))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Synthesise a short sine loop as WAV bytes
    pub(crate) fn wav_bytes(frames: usize, channels: u16, sample_rate: u32) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for i in 0..frames {
                let value = ((i as f32 * 0.05).sin() * 8000.0) as i16;
                for _ in 0..channels {
                    writer.write_sample(value).unwrap();
                }
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn test_decode_wav() {
        let buffer = decode("rain", wav_bytes(4800, 2, 48000), Some("wav")).unwrap();
        assert_eq!(buffer.sample_rate(), 48000);
        assert_eq!(buffer.channels(), 2);
        assert_eq!(buffer.frames(), 4800);
    }

    #[test]
    fn test_decode_without_hint() {
        let buffer = decode("birds", wav_bytes(1000, 1, 22050), None).unwrap();
        assert_eq!(buffer.sample_rate(), 22050);
        assert_eq!(buffer.channels(), 1);
    }

    #[test]
    fn test_garbage_is_decode_error() {
        let err = decode("fire", b"definitely not audio".to_vec(), Some("mp3")).unwrap_err();
        assert!(matches!(err, EngineError::Decode { ref sound_id, .. } if sound_id == "fire"));
    }

    #[test]
    fn test_empty_input_is_decode_error() {
        assert!(matches!(
            decode("lofi", Vec::new(), None),
            Err(EngineError::Decode { .. })
        ));
    }
}
