//! Audio decoding into engine-ready tracks
//!
//! Any container/codec Symphonia supports is decoded to planar stereo at the
//! engine sample rate:
//!
//! - mono is duplicated to both channels
//! - more than two channels keep the first two
//! - other sample rates are converted with an FFT resampler

use std::fs::File;
use std::path::Path;

use demix_core::{Result, SeparationError, Track, ENGINE_SAMPLE_RATE};
use rubato::{FftFixedIn, Resampler};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// Input block size of the resampler
const RESAMPLE_BLOCK: usize = 1024;

/// Decode an audio file into a stereo track at the engine rate
pub fn decode_track(path: &Path) -> Result<Track> {
    let (samples, sample_rate, channels) = decode_interleaved(path)?;
    let (left, right) = to_stereo(&samples, channels)?;

    log::info!(
        "Decoded {:?}: {} frames, {} Hz, {} channel(s)",
        path,
        left.len(),
        sample_rate,
        channels
    );

    if sample_rate == ENGINE_SAMPLE_RATE {
        return Track::new(left, right, sample_rate);
    }

    let (left, right) = resample_stereo(&left, &right, sample_rate, ENGINE_SAMPLE_RATE)?;
    log::info!(
        "Resampled {} Hz -> {} Hz: {} frames",
        sample_rate,
        ENGINE_SAMPLE_RATE,
        left.len()
    );
    Track::new(left, right, ENGINE_SAMPLE_RATE)
}

/// Decode an audio file to interleaved f32 samples using Symphonia
fn decode_interleaved(path: &Path) -> Result<(Vec<f32>, u32, usize)> {
    let file = File::open(path).map_err(|e| SeparationError::AudioReadError {
        path: path.to_path_buf(),
        source: e,
    })?;

    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| SeparationError::Decode(format!("{:?}: {}", path, e)))?;

    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| SeparationError::Decode(format!("{:?}: no audio track found", path)))?;

    let track_id = track.id;

    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| SeparationError::Decode(format!("{:?}: unknown sample rate", path)))?;

    let mut channels = track.codec_params.channels.map(|c| c.count()).unwrap_or(0);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| SeparationError::Decode(format!("{:?}: {}", path, e)))?;

    let mut samples: Vec<f32> = Vec::new();
    let mut sample_buf: Option<SampleBuffer<f32>> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(e) => {
                log::warn!("Error reading packet: {}", e);
                break;
            }
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(e) => {
                log::warn!("Error decoding packet: {}", e);
                continue;
            }
        };

        // Initialize sample buffer on first decode
        if sample_buf.is_none() {
            let spec = *decoded.spec();
            channels = spec.channels.count();
            let duration = decoded.capacity() as u64;
            sample_buf = Some(SampleBuffer::new(duration, spec));
        }

        if let Some(ref mut buf) = sample_buf {
            buf.copy_interleaved_ref(decoded);
            samples.extend_from_slice(buf.samples());
        }
    }

    if sample_buf.is_none() {
        return Err(SeparationError::Decode(format!(
            "{:?}: no decodable audio packets",
            path
        )));
    }

    Ok((samples, sample_rate, channels))
}

/// Split interleaved samples into left/right
///
/// Mono is duplicated; channels beyond the first two are dropped.
pub fn to_stereo(samples: &[f32], channels: usize) -> Result<(Vec<f32>, Vec<f32>)> {
    match channels {
        0 => Err(SeparationError::Decode(String::from("zero audio channels"))),
        1 => Ok((samples.to_vec(), samples.to_vec())),
        _ => {
            let frames = samples.len() / channels;
            let mut left = Vec::with_capacity(frames);
            let mut right = Vec::with_capacity(frames);
            for frame in samples.chunks_exact(channels) {
                left.push(frame[0]);
                right.push(frame[1]);
            }
            Ok((left, right))
        }
    }
}

/// Convert a stereo signal between sample rates
///
/// Output length is `round(N * to / from)`; the resampler's group delay is
/// trimmed from the front so the output is time-aligned with the input.
pub fn resample_stereo(
    left: &[f32],
    right: &[f32],
    from_rate: u32,
    to_rate: u32,
) -> Result<(Vec<f32>, Vec<f32>)> {
    let frames = left.len();
    if from_rate == to_rate || frames == 0 {
        return Ok((left.to_vec(), right.to_vec()));
    }

    let target_len = (frames as f64 * to_rate as f64 / from_rate as f64).round() as usize;

    let mut resampler =
        FftFixedIn::<f32>::new(from_rate as usize, to_rate as usize, RESAMPLE_BLOCK, 2, 2)
            .map_err(|e| SeparationError::Decode(format!("Failed to create resampler: {}", e)))?;
    let delay = resampler.output_delay();
    let resample_err = |e: rubato::ResampleError| {
        SeparationError::Decode(format!("Resampling failed: {}", e))
    };

    let mut out_left = Vec::with_capacity(target_len + delay + RESAMPLE_BLOCK);
    let mut out_right = Vec::with_capacity(target_len + delay + RESAMPLE_BLOCK);

    let mut pos = 0;
    loop {
        let needed = resampler.input_frames_next();
        if pos + needed > frames {
            break;
        }
        let block = [&left[pos..pos + needed], &right[pos..pos + needed]];
        let out = resampler.process(block.as_slice(), None).map_err(resample_err)?;
        out_left.extend_from_slice(&out[0]);
        out_right.extend_from_slice(&out[1]);
        pos += needed;
    }

    if pos < frames {
        let block = [&left[pos..], &right[pos..]];
        let out = resampler
            .process_partial(Some(block.as_slice()), None)
            .map_err(resample_err)?;
        out_left.extend_from_slice(&out[0]);
        out_right.extend_from_slice(&out[1]);
    }

    // Flush the delay line with silence
    while out_left.len() < delay + target_len {
        let out = resampler
            .process_partial::<&[f32]>(None, None)
            .map_err(resample_err)?;
        if out[0].is_empty() {
            break;
        }
        out_left.extend_from_slice(&out[0]);
        out_right.extend_from_slice(&out[1]);
    }

    for channel in [&mut out_left, &mut out_right] {
        channel.drain(..delay.min(channel.len()));
        channel.resize(target_len, 0.0);
    }

    Ok((out_left, out_right))
}
