//! cpal stream wrapper
//!
//! Opens a 48 kHz stereo stream with a one-frame buffer and runs it on a
//! dedicated thread that keeps the `cpal::Stream` alive. Hosts are free
//! to deliver other buffer lengths, so callbacks are re-chunked: the
//! caller always sees exactly one 480-sample frame per call.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{BufferSize, SampleFormat, StreamConfig, SupportedBufferSize};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::device::{find_device, Direction};
use crate::constants::{CHANNELS, FRAME_MONO_SAMPLES, FRAME_STEREO_SAMPLES, SAMPLE_RATE};
use crate::error::AudioError;

type InputHandler = Box<dyn FnMut(&[i16]) + Send>;
type OutputHandler = Box<dyn FnMut(&mut [i16]) + Send>;

enum Handler {
    Input(InputHandler),
    Output(OutputHandler),
}

/// A running input or output stream
pub struct AudioStream {
    direction: Direction,
    device_name: String,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    error_rx: Receiver<AudioError>,
}

impl AudioStream {
    /// Open a capture stream; `on_frame` gets one interleaved frame per call
    pub fn input<F>(device: Option<&str>, on_frame: F) -> Result<Self, AudioError>
    where
        F: FnMut(&[i16]) + Send + 'static,
    {
        Self::start(Direction::Input, device, Handler::Input(Box::new(on_frame)))
    }

    /// Open a playback stream; `render` fills one interleaved frame per call
    pub fn output<F>(device: Option<&str>, render: F) -> Result<Self, AudioError>
    where
        F: FnMut(&mut [i16]) + Send + 'static,
    {
        Self::start(Direction::Output, device, Handler::Output(Box::new(render)))
    }

    fn start(direction: Direction, device: Option<&str>, handler: Handler) -> Result<Self, AudioError> {
        let device_name = device.map(str::to_string);
        let running = Arc::new(AtomicBool::new(true));
        let (error_tx, error_rx) = bounded::<AudioError>(16);
        let (ready_tx, ready_rx) = bounded::<Result<String, AudioError>>(1);

        let running_for_loop = running.clone();
        let thread_name = match direction {
            Direction::Input => "audio-capture",
            Direction::Output => "audio-render",
        };

        let handle = thread::Builder::new()
            .name(thread_name.into())
            .spawn(move || {
                let stream = match open_stream(direction, device_name.as_deref(), handler, error_tx) {
                    Ok((stream, name)) => {
                        let _ = ready_tx.send(Ok(name));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                // Keep thread alive while running
                while running_for_loop.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }

                // Stream is dropped here, stopping audio
                drop(stream);
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        let ready = ready_rx
            .recv()
            .unwrap_or_else(|_| Err(AudioError::StreamError("audio thread exited".into())));

        match ready {
            Ok(device_name) => {
                tracing::info!("Opened {:?} stream on {}", direction, device_name);
                Ok(Self {
                    direction,
                    device_name,
                    running,
                    thread_handle: Some(handle),
                    error_rx,
                })
            }
            Err(e) => {
                let _ = handle.join();
                Err(e)
            }
        }
    }

    /// Stop the stream and join its thread
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
            tracing::debug!("Closed {:?} stream on {}", self.direction, self.device_name);
        }
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Next error reported by the audio backend, if any
    pub fn check_errors(&self) -> Option<AudioError> {
        self.error_rx.try_recv().ok()
    }
}

impl Drop for AudioStream {
    fn drop(&mut self) {
        self.stop();
    }
}

fn open_stream(
    direction: Direction,
    device_name: Option<&str>,
    handler: Handler,
    error_tx: Sender<AudioError>,
) -> Result<(cpal::Stream, String), AudioError> {
    let device = find_device(direction, device_name)?;
    let name = device.name().unwrap_or_else(|_| "Unknown".to_string());

    let default_config = match direction {
        Direction::Input => device.default_input_config(),
        Direction::Output => device.default_output_config(),
    }
    .map_err(|e| AudioError::CpalError(e.to_string()))?;

    let buffer_size = match default_config.buffer_size() {
        SupportedBufferSize::Range { min, max }
            if (*min..=*max).contains(&(FRAME_STEREO_SAMPLES as u32)) =>
        {
            BufferSize::Fixed(FRAME_STEREO_SAMPLES as u32)
        }
        _ => {
            tracing::warn!("{} cannot use a {}-sample buffer, using its default", name, FRAME_STEREO_SAMPLES);
            BufferSize::Default
        }
    };

    let config = StreamConfig {
        channels: CHANNELS,
        sample_rate: cpal::SampleRate(SAMPLE_RATE),
        buffer_size,
    };

    let on_error = move |err: cpal::StreamError| {
        let _ = error_tx.try_send(AudioError::StreamError(err.to_string()));
    };

    let format = default_config.sample_format();
    let stream = match (handler, format) {
        (Handler::Input(mut on_frame), SampleFormat::I16) => {
            let mut assembler = FrameAssembler::new();
            device.build_input_stream(
                &config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    assembler.push(data, |s| s, &mut on_frame)
                },
                on_error,
                None,
            )
        }
        (Handler::Input(mut on_frame), SampleFormat::F32) => {
            let mut assembler = FrameAssembler::new();
            device.build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    assembler.push(data, f32_to_i16, &mut on_frame)
                },
                on_error,
                None,
            )
        }
        (Handler::Output(mut render), SampleFormat::I16) => {
            let mut splitter = FrameSplitter::new();
            device.build_output_stream(
                &config,
                move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    splitter.fill(data, |s| s, &mut render)
                },
                on_error,
                None,
            )
        }
        (Handler::Output(mut render), SampleFormat::F32) => {
            let mut splitter = FrameSplitter::new();
            device.build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    splitter.fill(data, i16_to_f32, &mut render)
                },
                on_error,
                None,
            )
        }
        (_, other) => return Err(AudioError::UnsupportedFormat(format!("{:?}", other))),
    }
    .map_err(|e| AudioError::StreamError(e.to_string()))?;

    stream
        .play()
        .map_err(|e| AudioError::StreamError(e.to_string()))?;

    Ok((stream, name))
}

fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

fn i16_to_f32(sample: i16) -> f32 {
    sample as f32 / 32768.0
}

/// Collects host buffers of any length into whole frames
pub struct FrameAssembler {
    frame: [i16; FRAME_MONO_SAMPLES],
    filled: usize,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self {
            frame: [0; FRAME_MONO_SAMPLES],
            filled: 0,
        }
    }

    pub fn push<T: Copy>(
        &mut self,
        data: &[T],
        convert: impl Fn(T) -> i16,
        on_frame: &mut impl FnMut(&[i16]),
    ) {
        for &sample in data {
            self.frame[self.filled] = convert(sample);
            self.filled += 1;
            if self.filled == FRAME_MONO_SAMPLES {
                on_frame(&self.frame);
                self.filled = 0;
            }
        }
    }
}

impl Default for FrameAssembler {
    fn default() -> Self {
        Self::new()
    }
}

/// Serves host buffers of any length from whole rendered frames
pub struct FrameSplitter {
    frame: [i16; FRAME_MONO_SAMPLES],
    read: usize,
}

impl FrameSplitter {
    pub fn new() -> Self {
        Self {
            frame: [0; FRAME_MONO_SAMPLES],
            read: FRAME_MONO_SAMPLES,
        }
    }

    pub fn fill<T>(
        &mut self,
        out: &mut [T],
        convert: impl Fn(i16) -> T,
        render: &mut impl FnMut(&mut [i16]),
    ) {
        for sample in out.iter_mut() {
            if self.read == FRAME_MONO_SAMPLES {
                render(&mut self.frame);
                self.read = 0;
            }
            *sample = convert(self.frame[self.read]);
            self.read += 1;
        }
    }
}

impl Default for FrameSplitter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assembler_handles_uneven_chunks() {
        let mut assembler = FrameAssembler::new();
        let mut frames: Vec<Vec<i16>> = Vec::new();
        let mut collect = |frame: &[i16]| frames.push(frame.to_vec());

        let input: Vec<i16> = (0..(FRAME_MONO_SAMPLES * 2 + 7) as i16).collect();
        for chunk in input.chunks(333) {
            assembler.push(chunk, |s| s, &mut collect);
        }

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0][0], 0);
        assert_eq!(frames[1][0], FRAME_MONO_SAMPLES as i16);
        assert_eq!(frames[1].len(), FRAME_MONO_SAMPLES);
    }

    #[test]
    fn test_splitter_renders_on_demand() {
        let mut splitter = FrameSplitter::new();
        let mut calls = 0i16;
        let mut render = |frame: &mut [i16]| {
            calls += 1;
            frame.fill(calls);
        };

        let mut out = vec![0i16; 300];
        splitter.fill(&mut out, |s| s, &mut render);
        assert!(out.iter().all(|&s| s == 1));

        splitter.fill(&mut out, |s| s, &mut render);
        assert_eq!(out[FRAME_MONO_SAMPLES - 300 - 1], 1);
        assert_eq!(out[FRAME_MONO_SAMPLES - 300], 2);
        assert_eq!(calls, 2);
    }

    #[test]
    fn test_sample_conversion() {
        assert_eq!(f32_to_i16(1.5), i16::MAX);
        assert_eq!(f32_to_i16(0.0), 0);
        assert_eq!(i16_to_f32(i16::MIN), -1.0);
    }
}
