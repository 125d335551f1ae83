//! Plays the synthesizer through the default output device with [cpal](https://crates.io/crates/cpal).

use anyhow::anyhow;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, SampleFormat, SizedSample, Stream, StreamConfig};

use crate::synth::SynthControl;

/// A running output stream. Audio stops when it is dropped.
pub struct AudioOutput {
    _stream: Stream,
    sample_rate: u32,
    channels: usize,
}

impl AudioOutput {
    /// Sample rate of the default output device, if there is one.
    pub fn default_sample_rate() -> Option<u32> {
        let device = cpal::default_host().default_output_device()?;
        let config = device.default_output_config().ok()?;
        Some(config.sample_rate().0)
    }

    /// Starts pulling audio from `synth` on the default output device.
    pub fn start(synth: SynthControl) -> anyhow::Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or(anyhow!("failed to find a default output device"))?;
        let config = device.default_output_config()?;
        let stream = match config.sample_format() {
            SampleFormat::F32 => build_stream::<f32>(&device, &config.clone().into(), synth)?,
            SampleFormat::I16 => build_stream::<i16>(&device, &config.clone().into(), synth)?,
            SampleFormat::U16 => build_stream::<u16>(&device, &config.clone().into(), synth)?,
            format => return Err(anyhow!("unsupported sample format {format:?}")),
        };
        stream.play()?;
        let output = Self {
            _stream: stream,
            sample_rate: config.sample_rate().0,
            channels: config.channels() as usize,
        };
        log::info!(
            "audio output: {} Hz, {} channel(s)",
            output.sample_rate,
            output.channels
        );
        Ok(output)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> usize {
        self.channels
    }
}

fn build_stream<T>(
    device: &Device,
    config: &StreamConfig,
    synth: SynthControl,
) -> anyhow::Result<Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = config.channels as usize;
    let mut left = Vec::<f32>::new();
    let mut right = Vec::<f32>::new();
    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            let frames = data.len() / channels.max(1);
            // Grows on the first callbacks, then stays put.
            if left.len() < frames {
                left.resize(frames, 0.0);
                right.resize(frames, 0.0);
            }
            synth.render(&mut left[..frames], &mut right[..frames]);
            write_data(data, channels, &left[..frames], &right[..frames]);
        },
        |err| log::error!("audio stream error: {err}"),
        None,
    )?;
    Ok(stream)
}

/// Interleaves a stereo block into `output`. Even channels get the left signal, odd ones the
/// right; a mono device gets the left.
fn write_data<T: SizedSample + FromSample<f32>>(
    output: &mut [T],
    channels: usize,
    left: &[f32],
    right: &[f32],
) {
    for (frame, (l, r)) in output
        .chunks_mut(channels.max(1))
        .zip(left.iter().zip(right.iter()))
    {
        for (channel, sample) in frame.iter_mut().enumerate() {
            let value = if channel & 1 == 0 { *l } else { *r };
            *sample = T::from_sample(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_eq::assert_float_eq;

    #[test]
    fn interleaves_stereo() {
        let mut out = [0.0f32; 6];
        write_data(&mut out, 2, &[0.1, 0.2, 0.3], &[-0.1, -0.2, -0.3]);
        let expected = [0.1, -0.1, 0.2, -0.2, 0.3, -0.3];
        for (got, want) in out.iter().zip(expected) {
            assert_float_eq!(*got, want, abs <= 1e-6);
        }
    }

    #[test]
    fn extra_channels_alternate() {
        let mut out = [0.0f32; 4];
        write_data(&mut out, 4, &[0.5], &[0.25]);
        assert_eq!(out, [0.5, 0.25, 0.5, 0.25]);
    }

    #[test]
    fn converts_to_integer_samples() {
        let mut out = [0i16; 2];
        write_data(&mut out, 2, &[0.0], &[-1.0]);
        assert_eq!(out[0], 0);
        assert!(out[1] <= -32767);
    }
}
