use std::io::Read;
use std::path::Path;

use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{
    Async as AsyncResampler, FixedAsync, Resampler as RubatoResampler,
    SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

use super::audio_buffer::pcm16le_to_f32;

const TARGET_RATE: u32 = 16000;

/// Upload formats accepted by [`decode_upload`].
pub const SUPPORTED_FORMATS: &[&str] = &["wav", "pcm"];

/// Decodes an in-memory WAV file to 16kHz mono.
pub fn decode_wav(bytes: &[u8]) -> anyhow::Result<Vec<f32>> {
    let reader = hound::WavReader::new(std::io::Cursor::new(bytes))
        .map_err(|e| anyhow::anyhow!("Invalid WAV data: {}", e))?;
    decode_reader(reader)
}

/// Decodes an uploaded file by extension: `.pcm` is raw s16le 16kHz mono,
/// everything else must be WAV.
pub fn decode_upload(file_name: &str, bytes: &[u8]) -> anyhow::Result<Vec<f32>> {
    let extension = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "pcm" => Ok(pcm16le_to_f32(bytes)),
        "wav" => decode_wav(bytes),
        other => anyhow::bail!(
            "Unsupported format '{}', supported formats: {}",
            other,
            SUPPORTED_FORMATS.join(", ")
        ),
    }
}

/// Supports 16-bit integer and 32-bit float formats. Multi-channel audio is
/// down-mixed to mono and any sample rate is resampled to 16kHz.
fn decode_reader<R: Read>(reader: hound::WavReader<R>) -> anyhow::Result<Vec<f32>> {
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;
    let sample_rate = spec.sample_rate;

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Int => {
            let max_val = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.unwrap_or(0) as f32 / max_val)
                .collect()
        }
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .map(|s| s.unwrap_or(0.0))
            .collect(),
    };

    let mono = if channels > 1 {
        samples
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    } else {
        samples
    };

    if sample_rate != TARGET_RATE {
        resample_to_16k(&mono, sample_rate)
    } else {
        Ok(mono)
    }
}

/// Resamples mono audio from `src_rate` Hz to 16kHz using sinc interpolation.
fn resample_to_16k(audio: &[f32], src_rate: u32) -> anyhow::Result<Vec<f32>> {
    let ratio = TARGET_RATE as f64 / src_rate as f64;
    let chunk_size = 1024;

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let mut resampler = AsyncResampler::<f32>::new_sinc(
        ratio,
        2.0,
        &params,
        chunk_size,
        1, // mono
        FixedAsync::Input,
    )
    .map_err(|e| anyhow::anyhow!("Failed to create resampler: {}", e))?;

    let mut output = Vec::with_capacity((audio.len() as f64 * ratio) as usize + chunk_size);

    for chunk in audio.chunks(chunk_size) {
        let mut input = chunk.to_vec();
        input.resize(chunk_size, 0.0);

        let input_adapter = InterleavedSlice::new(&input, 1, chunk_size)
            .map_err(|e| anyhow::anyhow!("Input adapter error: {}", e))?;

        let result = resampler
            .process(&input_adapter, 0, None)
            .map_err(|e| anyhow::anyhow!("Resample error: {}", e))?;

        output.extend(result.take_data());
    }

    // drop the tail produced by zero padding
    output.truncate((audio.len() as f64 * ratio) as usize);

    Ok(output)
}
