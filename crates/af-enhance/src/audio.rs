//! Audio decoding and WAV encoding
//!
//! Every source is decoded to mono `f32` and resampled to the pipeline rate.
//! WAV goes through hound; other containers (FLAC, MP3, OGG, ...) through
//! symphonia.

use std::io::Cursor;
use std::path::PathBuf;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CODEC_TYPE_NULL, DecoderOptions};
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::{EnhanceError, EnhanceResult};

/// Where a waveform comes from
#[derive(Debug, Clone)]
pub enum AudioSource {
    /// Encoded file on disk
    Path(PathBuf),
    /// Encoded file contents in memory
    Bytes(Vec<u8>),
}

impl AudioSource {
    pub fn describe(&self) -> String {
        match self {
            AudioSource::Path(path) => path.display().to_string(),
            AudioSource::Bytes(bytes) => format!("<{} bytes>", bytes.len()),
        }
    }

    /// Decode to mono at `target_rate`
    pub fn decode(&self, target_rate: u32) -> EnhanceResult<Vec<f32>> {
        let (samples, rate) = match self {
            AudioSource::Path(path) => {
                let is_wav = path
                    .extension()
                    .map(|e| e.eq_ignore_ascii_case("wav"))
                    .unwrap_or(false);
                if is_wav {
                    let reader = hound::WavReader::open(path)
                        .map_err(|e| EnhanceError::Input(format!("{}: {}", path.display(), e)))?;
                    read_wav(reader)?
                } else {
                    let ext = path.extension().and_then(|e| e.to_str()).map(str::to_owned);
                    let file = std::fs::File::open(path)?;
                    decode_symphonia(Box::new(file), ext.as_deref())?
                }
            }
            AudioSource::Bytes(bytes) => {
                if bytes.starts_with(b"RIFF") {
                    let reader = hound::WavReader::new(Cursor::new(bytes.as_slice()))
                        .map_err(|e| EnhanceError::Input(e.to_string()))?;
                    read_wav(reader)?
                } else {
                    decode_symphonia(Box::new(Cursor::new(bytes.clone())), None)?
                }
            }
        };

        if samples.is_empty() {
            return Err(EnhanceError::Input(format!("{}: no audio samples", self.describe())));
        }

        log::debug!(
            "Decoded {}: {} samples at {} Hz",
            self.describe(),
            samples.len(),
            rate
        );

        Ok(af_dsp::resample(&samples, rate, target_rate)?)
    }
}

/// Read a WAV stream and downmix to mono
fn read_wav<R: std::io::Read>(reader: hound::WavReader<R>) -> EnhanceResult<(Vec<f32>, u32)> {
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| EnhanceError::Input(e.to_string()))?,
        hound::SampleFormat::Int => {
            let scale = 1.0 / (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| EnhanceError::Input(e.to_string()))?
        }
    };

    Ok((downmix(&interleaved, channels), spec.sample_rate))
}

/// Probe and decode any container symphonia understands
fn decode_symphonia(
    source: Box<dyn MediaSource>,
    extension: Option<&str>,
) -> EnhanceResult<(Vec<f32>, u32)> {
    let mss = MediaSourceStream::new(source, Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = extension {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| EnhanceError::Input(format!("unrecognized audio format: {e}")))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| EnhanceError::Input("no audio track".into()))?;

    let track_id = track.id;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| EnhanceError::Input("unknown sample rate".into()))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| EnhanceError::Input(e.to_string()))?;

    let mut mono = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(symphonia::core::errors::Error::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => return Err(EnhanceError::Input(e.to_string())),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(symphonia::core::errors::Error::DecodeError(e)) => {
                log::warn!("Skipping undecodable packet: {}", e);
                continue;
            }
            Err(e) => return Err(EnhanceError::Input(e.to_string())),
        };

        let spec = *decoded.spec();
        let channels = spec.channels.count().max(1);
        let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        buffer.copy_interleaved_ref(decoded);
        mono.extend(downmix(buffer.samples(), channels));
    }

    Ok((mono, sample_rate))
}

/// Average interleaved channels into one
pub fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Encode mono samples as a WAV file in memory (16/24-bit int or 32-bit float)
pub fn encode_wav(samples: &[f32], sample_rate: u32, bit_depth: u16) -> EnhanceResult<Vec<u8>> {
    let sample_format = match bit_depth {
        16 | 24 => hound::SampleFormat::Int,
        32 => hound::SampleFormat::Float,
        other => {
            return Err(EnhanceError::Config(format!("Unsupported bit depth: {other}")));
        }
    };

    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: bit_depth,
        sample_format,
    };

    let mut output = Vec::new();
    let mut writer = hound::WavWriter::new(Cursor::new(&mut output), spec)
        .map_err(|e| EnhanceError::Encoding(e.to_string()))?;

    for &sample in samples {
        let sample = sample.clamp(-1.0, 1.0);
        let result = match bit_depth {
            16 => writer.write_sample((sample * 32767.0) as i16),
            24 => writer.write_sample((sample * 8_388_607.0) as i32),
            _ => writer.write_sample(sample),
        };
        result.map_err(|e| EnhanceError::Encoding(e.to_string()))?;
    }

    writer
        .finalize()
        .map_err(|e| EnhanceError::Encoding(e.to_string()))?;

    Ok(output)
}
