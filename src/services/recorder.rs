//! Live microphone capture.
//!
//! At most one capture session exists per process. `start` opens the device
//! and spawns two threads: a reader that blocks on the device, and the
//! session thread that owns the sample buffer. `stop` signals the session
//! thread over a channel, interrupts the device, and joins the session thread
//! for the collected audio. A device that never produces data cannot hold
//! up `stop`.

use std::io::Read;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender};
use crossbeam::select;
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::services::asr::{DeviceError, RecognitionError};

pub trait AudioSource: Send + Sync {
    fn open(&self) -> Result<Box<dyn CaptureStream>, DeviceError>;
    fn sample_rate(&self) -> u32;
}

/// Unblocks a pending `read_chunk` from another thread.
pub type Interrupt = Box<dyn FnOnce() + Send>;

pub trait CaptureStream: Send {
    /// Read the next block of mono samples. An empty block means end of stream.
    fn read_chunk(&mut self) -> Result<Vec<f32>, DeviceError>;

    fn interrupt(&self) -> Interrupt {
        Box::new(|| {})
    }
}

/// Captures audio from an external command writing raw f32 little-endian
/// mono samples to stdout (e.g. `arecord -f FLOAT_LE -c 1 -r 16000 -t raw`).
pub struct CommandAudioSource {
    command: Option<Vec<String>>,
    sample_rate: u32,
}

impl CommandAudioSource {
    pub fn new(command: Option<Vec<String>>, sample_rate: u32) -> Self {
        Self {
            command,
            sample_rate,
        }
    }
}

impl AudioSource for CommandAudioSource {
    fn open(&self) -> Result<Box<dyn CaptureStream>, DeviceError> {
        let Some((program, args)) = self.command.as_deref().and_then(|c| c.split_first()) else {
            return Err(DeviceError::NotConfigured);
        };

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| DeviceError::Open(format!("{}: {}", program, e)))?;
        let Some(stdout) = child.stdout.take() else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(DeviceError::Open("capture process has no stdout".into()));
        };

        Ok(Box::new(CommandStream {
            child: Arc::new(Mutex::new(child)),
            stdout,
            pending: Vec::new(),
        }))
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

struct CommandStream {
    child: Arc<Mutex<Child>>,
    stdout: ChildStdout,
    pending: Vec<u8>,
}

impl CaptureStream for CommandStream {
    fn read_chunk(&mut self) -> Result<Vec<f32>, DeviceError> {
        let mut buf = [0u8; 4096];
        let n = self
            .stdout
            .read(&mut buf)
            .map_err(|e| DeviceError::Read(e.to_string()))?;
        if n == 0 {
            return Ok(Vec::new());
        }
        self.pending.extend_from_slice(&buf[..n]);

        let whole = self.pending.len() - self.pending.len() % 4;
        let samples = self.pending[..whole]
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        self.pending.drain(..whole);
        Ok(samples)
    }

    /// Killing the process closes its stdout, so a blocked read returns.
    fn interrupt(&self) -> Interrupt {
        let child = Arc::clone(&self.child);
        Box::new(move || {
            let _ = child.lock().kill();
        })
    }
}

impl Drop for CommandStream {
    fn drop(&mut self) {
        let mut child = self.child.lock();
        let _ = child.kill();
        let _ = child.wait();
    }
}

struct ActiveCapture {
    stop_tx: Sender<()>,
    interrupt: Interrupt,
    handle: JoinHandle<Vec<f32>>,
}

/// Samples collected by a finished capture session.
#[derive(Debug)]
pub struct Recording {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

pub struct Recorder {
    source: Arc<dyn AudioSource>,
    active: Mutex<Option<ActiveCapture>>,
}

impl Recorder {
    pub fn new(source: Arc<dyn AudioSource>) -> Self {
        Self {
            source,
            active: Mutex::new(None),
        }
    }

    pub fn is_recording(&self) -> bool {
        self.active.lock().is_some()
    }

    pub fn start(&self) -> Result<(), RecognitionError> {
        let mut active = self.active.lock();
        if active.is_some() {
            return Err(RecognitionError::AlreadyRecording);
        }

        let stream = self.source.open()?;
        let interrupt = stream.interrupt();
        let (chunk_tx, chunk_rx) = channel::bounded(64);
        let (stop_tx, stop_rx) = channel::bounded(1);

        thread::Builder::new()
            .name("audio-reader".into())
            .spawn(move || read_loop(stream, chunk_tx))
            .map_err(|e| DeviceError::Open(e.to_string()))?;
        let handle = match thread::Builder::new()
            .name("audio-capture".into())
            .spawn(move || capture_loop(chunk_rx, stop_rx))
        {
            Ok(handle) => handle,
            Err(e) => {
                interrupt();
                return Err(DeviceError::Open(e.to_string()).into());
            }
        };

        *active = Some(ActiveCapture {
            stop_tx,
            interrupt,
            handle,
        });
        info!("Recording started");
        Ok(())
    }

    /// Waits only for the session thread to hand back its buffer, never for
    /// the device. Call from a blocking context.
    pub fn stop(&self) -> Result<Recording, RecognitionError> {
        let capture = self
            .active
            .lock()
            .take()
            .ok_or(RecognitionError::NotRecording)?;

        let _ = capture.stop_tx.send(());
        (capture.interrupt)();
        let samples = capture
            .handle
            .join()
            .map_err(|_| DeviceError::Read("capture thread panicked".into()))?;

        info!("Recording stopped with {} samples", samples.len());
        Ok(Recording {
            samples,
            sample_rate: self.source.sample_rate(),
        })
    }
}

/// Pulls blocks off the device until it ends, fails, or the session is gone.
fn read_loop(mut stream: Box<dyn CaptureStream>, chunk_tx: Sender<Vec<f32>>) {
    loop {
        match stream.read_chunk() {
            Ok(chunk) if chunk.is_empty() => break,
            Ok(chunk) => {
                if chunk_tx.send(chunk).is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!("Audio capture error: {}", e);
                break;
            }
        }
    }
}

/// Owns the sample buffer until the stop signal arrives. If the device ends
/// first, the samples collected so far are kept for `stop`.
fn capture_loop(chunk_rx: Receiver<Vec<f32>>, stop_rx: Receiver<()>) -> Vec<f32> {
    let mut samples = Vec::new();
    loop {
        select! {
            recv(chunk_rx) -> chunk => match chunk {
                Ok(chunk) => samples.extend_from_slice(&chunk),
                Err(_) => {
                    let _ = stop_rx.recv();
                    return samples;
                }
            },
            recv(stop_rx) -> _ => {
                for chunk in chunk_rx.try_iter() {
                    samples.extend_from_slice(&chunk);
                }
                return samples;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    pub struct ToneSource;

    struct ToneStream;

    impl CaptureStream for ToneStream {
        fn read_chunk(&mut self) -> Result<Vec<f32>, DeviceError> {
            thread::sleep(Duration::from_millis(5));
            Ok(vec![0.25; 160])
        }
    }

    impl AudioSource for ToneSource {
        fn open(&self) -> Result<Box<dyn CaptureStream>, DeviceError> {
            Ok(Box::new(ToneStream))
        }

        fn sample_rate(&self) -> u32 {
            16_000
        }
    }

    #[test]
    fn test_start_stop_collects_samples() {
        let recorder = Recorder::new(Arc::new(ToneSource));
        recorder.start().unwrap();
        assert!(recorder.is_recording());
        thread::sleep(Duration::from_millis(50));

        let recording = recorder.stop().unwrap();
        assert!(!recording.samples.is_empty());
        assert_eq!(recording.sample_rate, 16_000);
        assert!(!recorder.is_recording());
    }

    #[test]
    fn test_double_start_is_rejected() {
        let recorder = Recorder::new(Arc::new(ToneSource));
        recorder.start().unwrap();
        assert!(matches!(
            recorder.start(),
            Err(RecognitionError::AlreadyRecording)
        ));
        recorder.stop().unwrap();
    }

    #[test]
    fn test_stop_without_start() {
        let recorder = Recorder::new(Arc::new(ToneSource));
        assert!(matches!(
            recorder.stop(),
            Err(RecognitionError::NotRecording)
        ));
    }

    #[test]
    fn test_unconfigured_command_source() {
        let recorder = Recorder::new(Arc::new(CommandAudioSource::new(None, 16_000)));
        assert!(matches!(
            recorder.start(),
            Err(RecognitionError::Device(DeviceError::NotConfigured))
        ));
        assert!(!recorder.is_recording());
    }

    #[test]
    fn test_missing_capture_program() {
        let source = CommandAudioSource::new(
            Some(vec!["/nonexistent/ora-capture-binary".to_string()]),
            16_000,
        );
        assert!(matches!(source.open(), Err(DeviceError::Open(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_command_source_decodes_f32_stream() {
        // 0x3e800000 = 0.25f32, written twice as little-endian bytes.
        let source = CommandAudioSource::new(
            Some(vec![
                "printf".to_string(),
                "\\000\\000\\200\\076\\000\\000\\200\\076".to_string(),
            ]),
            16_000,
        );
        let recorder = Recorder::new(Arc::new(source));
        recorder.start().unwrap();
        thread::sleep(Duration::from_millis(200));

        let recording = recorder.stop().unwrap();
        assert_eq!(recording.samples, vec![0.25, 0.25]);
    }

    struct StalledSource;

    struct StalledStream;

    impl CaptureStream for StalledStream {
        fn read_chunk(&mut self) -> Result<Vec<f32>, DeviceError> {
            thread::sleep(Duration::from_secs(3));
            Ok(Vec::new())
        }
    }

    impl AudioSource for StalledSource {
        fn open(&self) -> Result<Box<dyn CaptureStream>, DeviceError> {
            Ok(Box::new(StalledStream))
        }

        fn sample_rate(&self) -> u32 {
            16_000
        }
    }

    #[test]
    fn test_stop_does_not_wait_for_stalled_device() {
        let recorder = Recorder::new(Arc::new(StalledSource));
        recorder.start().unwrap();
        thread::sleep(Duration::from_millis(50));

        let started = Instant::now();
        let recording = recorder.stop().unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(recording.samples.is_empty());
        assert!(!recorder.is_recording());
    }

    #[cfg(unix)]
    #[test]
    fn test_stop_kills_silent_capture_command() {
        let source = CommandAudioSource::new(
            Some(vec!["sleep".to_string(), "30".to_string()]),
            16_000,
        );
        let recorder = Recorder::new(Arc::new(source));
        recorder.start().unwrap();
        thread::sleep(Duration::from_millis(100));

        let started = Instant::now();
        let recording = recorder.stop().unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(recording.samples.is_empty());

        // A new session can start right away.
        recorder.start().unwrap();
        recorder.stop().unwrap();
    }
}
