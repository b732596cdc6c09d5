// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Decodes encoded audio into interleaved f32 samples at the output rate.

use std::io::Cursor;

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::default::{get_codecs, get_probe};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("audio decoding failed: {0}")]
    Symphonia(#[from] SymphoniaError),

    #[error("no audio track found")]
    NoTrack,

    #[error("unsupported audio: {0}")]
    Unsupported(String),

    #[error("resampling failed: {0}")]
    Resample(String),
}

/// Input block size for the sinc resampler.
const INPUT_BLOCK_SIZE: usize = 1024;

/// Fully decoded audio.
#[derive(Debug, Clone)]
pub struct Decoded {
    /// Interleaved samples.
    pub samples: Vec<f32>,
    /// Number of interleaved channels.
    pub channels: u16,
    /// The sample rate of `samples`.
    pub sample_rate: u32,
}

impl Decoded {
    /// The number of frames.
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }
}

/// Decodes an in-memory audio file and resamples it to the target rate with linear
/// interpolation. Meant for short one-shots. The extension, if known, helps the probe
/// pick a format.
pub fn decode(
    bytes: Vec<u8>,
    extension: Option<&str>,
    target_rate: u32,
) -> Result<Decoded, DecodeError> {
    let decoded = decode_native(bytes, extension)?;
    if decoded.sample_rate == target_rate {
        return Ok(decoded);
    }

    debug!(
        source_rate = decoded.sample_rate,
        target_rate, "Resampling one-shot"
    );
    Ok(Decoded {
        samples: resample(
            &decoded.samples,
            decoded.channels,
            decoded.sample_rate,
            target_rate,
        ),
        channels: decoded.channels,
        sample_rate: target_rate,
    })
}

/// Decodes an in-memory audio file at its own sample rate.
pub fn decode_native(bytes: Vec<u8>, extension: Option<&str>) -> Result<Decoded, DecodeError> {
    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());

    let mut hint = Hint::new();
    if let Some(extension) = extension {
        hint.with_extension(extension);
    }

    let probed = get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;
    let mut format_reader = probed.format;

    let track = format_reader
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or(DecodeError::NoTrack)?;
    let track_id = track.id;
    let params = track.codec_params.clone();

    let source_rate = params
        .sample_rate
        .ok_or_else(|| DecodeError::Unsupported("sample rate not specified".to_string()))?;
    let mut channels = params.channels.map(|c| c.count() as u16).unwrap_or(0);
    let mut decoder = get_codecs().make(&params, &DecoderOptions::default())?;

    let mut samples = Vec::new();
    loop {
        let packet = match format_reader.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break
            }
            Err(SymphoniaError::ResetRequired) => {
                decoder.reset();
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            // Skip corrupt packets rather than failing the whole file.
            Err(SymphoniaError::DecodeError(e)) => {
                debug!(err = e, "Skipping undecodable packet");
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        let spec = *decoded.spec();
        if channels == 0 {
            channels = spec.channels.count() as u16;
        }
        let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        buffer.copy_interleaved_ref(decoded);
        samples.extend_from_slice(buffer.samples());
    }

    if channels == 0 {
        return Err(DecodeError::Unsupported(
            "channel count could not be determined".to_string(),
        ));
    }

    Ok(Decoded {
        samples,
        channels,
        sample_rate: source_rate,
    })
}

/// Resamples a full-length track to the target rate with rubato's windowed sinc
/// resampler. The resampler's delay is trimmed, so the output starts on the first
/// source frame and holds exactly as many frames as the rate ratio asks for.
pub fn resample_track(decoded: Decoded, target_rate: u32) -> Result<Decoded, DecodeError> {
    if decoded.sample_rate == target_rate || decoded.samples.is_empty() {
        return Ok(Decoded {
            sample_rate: target_rate,
            ..decoded
        });
    }

    let channels = decoded.channels.max(1) as usize;
    let source_frames = decoded.frames();
    let ratio = target_rate as f64 / decoded.sample_rate as f64;
    let target_frames = (source_frames as f64 * ratio).ceil() as usize;

    let sinc_params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        oversampling_factor: 128,
        interpolation: SincInterpolationType::Linear,
        window: WindowFunction::BlackmanHarris2,
    };
    let mut resampler =
        SincFixedIn::<f32>::new(ratio, 1.0, sinc_params, INPUT_BLOCK_SIZE, channels)
            .map_err(|e| DecodeError::Resample(e.to_string()))?;
    debug!(
        source_rate = decoded.sample_rate,
        target_rate,
        frames = source_frames,
        "Resampling track"
    );

    let mut planar = vec![Vec::with_capacity(source_frames); channels];
    for frame in decoded.samples.chunks_exact(channels) {
        for (channel, sample) in frame.iter().enumerate() {
            planar[channel].push(*sample);
        }
    }

    let delay = resampler.output_delay();
    let wanted = target_frames + delay;
    let mut output: Vec<Vec<f32>> = vec![Vec::with_capacity(wanted); channels];
    let mut chunk: Vec<Vec<f32>> = vec![Vec::with_capacity(INPUT_BLOCK_SIZE); channels];
    let mut scratch = resampler.output_buffer_allocate(true);
    let mut position = 0;

    // Past the end of the input, empty partial chunks flush the resampler with silence.
    while output[0].len() < wanted {
        let needed = resampler.input_frames_next();
        let take = needed.min(source_frames - position);
        for (dst, src) in chunk.iter_mut().zip(planar.iter()) {
            dst.clear();
            dst.extend_from_slice(&src[position..position + take]);
        }
        position += take;

        let (_, produced) = if take == needed {
            resampler.process_into_buffer(chunk.as_slice(), scratch.as_mut_slice(), None)
        } else {
            resampler.process_partial_into_buffer(
                Some(chunk.as_slice()),
                scratch.as_mut_slice(),
                None,
            )
        }
        .map_err(|e| DecodeError::Resample(e.to_string()))?;

        for (dst, src) in output.iter_mut().zip(scratch.iter()) {
            dst.extend_from_slice(&src[..produced]);
        }
    }

    let mut samples = Vec::with_capacity(target_frames * channels);
    for frame in delay..wanted {
        for channel in &output {
            samples.push(channel[frame]);
        }
    }

    Ok(Decoded {
        samples,
        channels: decoded.channels,
        sample_rate: target_rate,
    })
}

/// Resamples interleaved audio using linear interpolation. Simple and sufficient for
/// short instrument one-shots.
pub fn resample(samples: &[f32], channels: u16, source_rate: u32, target_rate: u32) -> Vec<f32> {
    let ratio = target_rate as f64 / source_rate as f64;
    let channels = channels.max(1) as usize;
    let source_frames = samples.len() / channels;
    let target_frames = (source_frames as f64 * ratio).ceil() as usize;

    let mut output = Vec::with_capacity(target_frames * channels);
    for target_frame in 0..target_frames {
        let source_pos = target_frame as f64 / ratio;
        let source_frame = source_pos.floor() as usize;
        let frac = source_pos.fract() as f32;

        for channel in 0..channels {
            let s0 = samples
                .get(source_frame * channels + channel)
                .copied()
                .unwrap_or(0.0);
            let s1 = samples
                .get((source_frame + 1) * channels + channel)
                .copied()
                .unwrap_or(s0);
            output.push(s0 + (s1 - s0) * frac);
        }
    }
    output
}
