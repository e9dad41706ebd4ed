//! Best-effort audio: one-shot cues and a looping background track.
//!
//! One [`AudioService`] exists per process and is passed to whoever needs
//! sound. Consumers call [`AudioService::acquire`] and keep the returned
//! [`AudioHandle`]; when the last handle is dropped the loop is stopped and
//! the resume target is forgotten. Playback failures are logged and never
//! reach the caller.

use crate::error::{Error, Result};
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Output device abstraction
pub trait AudioBackend {
    fn name(&self) -> &'static str;

    /// Fire and forget
    fn play_once(&mut self, path: &Path) -> Result<()>;

    /// Loop `path` at `volume`; restarts the loop if it stopped, no-op if it is already running
    fn start_loop(&mut self, path: &Path, volume: f32) -> Result<()>;

    fn stop_loop(&mut self);
}

/// Backend that plays nothing
pub struct NullBackend;

impl AudioBackend for NullBackend {
    fn name(&self) -> &'static str {
        "silent"
    }

    fn play_once(&mut self, path: &Path) -> Result<()> {
        log::debug!("audio(silent): {}", path.display());
        Ok(())
    }

    fn start_loop(&mut self, _path: &Path, _volume: f32) -> Result<()> {
        Ok(())
    }

    fn stop_loop(&mut self) {}
}

#[cfg(feature = "playback")]
pub use rodio_backend::RodioBackend;

#[cfg(feature = "playback")]
mod rodio_backend {
    use super::AudioBackend;
    use crate::error::{Error, Result};
    use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink, Source};
    use std::collections::HashMap;
    use std::fs;
    use std::io::Cursor;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;

    /// rodio output on the default device.
    ///
    /// Files are read once and kept in memory; every play decodes from the cached bytes.
    pub struct RodioBackend {
        _stream: OutputStream,
        handle: OutputStreamHandle,
        cache: HashMap<PathBuf, Arc<[u8]>>,
        looping: Option<(PathBuf, Sink)>,
    }

    impl RodioBackend {
        pub fn open() -> Result<Self> {
            let (stream, handle) = OutputStream::try_default()
                .map_err(|e| Error::Audio(format!("no output device: {}", e)))?;
            Ok(Self {
                _stream: stream,
                handle,
                cache: HashMap::new(),
                looping: None,
            })
        }

        fn decoder(&mut self, path: &Path) -> Result<Decoder<Cursor<Arc<[u8]>>>> {
            let bytes = match self.cache.get(path) {
                Some(bytes) => Arc::clone(bytes),
                None => {
                    let data: Arc<[u8]> = fs::read(path)
                        .map_err(|e| Error::Audio(format!("{}: {}", path.display(), e)))?
                        .into();
                    self.cache.insert(path.to_path_buf(), Arc::clone(&data));
                    data
                }
            };
            Decoder::new(Cursor::new(bytes))
                .map_err(|e| Error::Audio(format!("{}: {}", path.display(), e)))
        }

        fn sink(&self) -> Result<Sink> {
            Sink::try_new(&self.handle).map_err(|e| Error::Audio(format!("sink: {}", e)))
        }
    }

    impl AudioBackend for RodioBackend {
        fn name(&self) -> &'static str {
            "rodio"
        }

        fn play_once(&mut self, path: &Path) -> Result<()> {
            let source = self.decoder(path)?;
            let sink = self.sink()?;
            sink.append(source);
            sink.detach();
            Ok(())
        }

        fn start_loop(&mut self, path: &Path, volume: f32) -> Result<()> {
            if let Some((current, sink)) = &self.looping {
                if current == path && !sink.empty() {
                    sink.set_volume(volume);
                    sink.play();
                    return Ok(());
                }
            }
            self.stop_loop();

            let source = self.decoder(path)?;
            let sink = self.sink()?;
            sink.set_volume(volume);
            sink.append(source.repeat_infinite());
            self.looping = Some((path.to_path_buf(), sink));
            Ok(())
        }

        fn stop_loop(&mut self) {
            if let Some((_, sink)) = self.looping.take() {
                sink.stop();
            }
        }
    }
}

/// Pick the output backend for a session
pub fn open_backend(enabled: bool) -> Box<dyn AudioBackend> {
    if !enabled {
        return Box::new(NullBackend);
    }
    #[cfg(feature = "playback")]
    {
        match RodioBackend::open() {
            Ok(backend) => return Box::new(backend),
            Err(e) => log::warn!("{}; continuing without sound", e),
        }
    }
    Box::new(NullBackend)
}

struct Shared {
    backend: Box<dyn AudioBackend>,
    dir: PathBuf,
    consumers: usize,
    /// What `resume_loop` restarts
    loop_target: Option<(PathBuf, f32)>,
}

impl Shared {
    fn resolve(&self, cue: &str) -> PathBuf {
        let path = Path::new(cue);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.dir.join(path)
        }
    }

    fn report(&self, what: &str, result: Result<()>) {
        if let Err(e) = result {
            log::warn!("audio {} failed ({}): {}", what, self.backend.name(), e);
        }
    }
}

/// Shared audio resource, cheap to clone
#[derive(Clone)]
pub struct AudioService {
    shared: Rc<RefCell<Shared>>,
}

impl AudioService {
    /// `dir` is where relative cue names are looked up
    pub fn new(backend: Box<dyn AudioBackend>, dir: impl Into<PathBuf>) -> Self {
        Self {
            shared: Rc::new(RefCell::new(Shared {
                backend,
                dir: dir.into(),
                consumers: 0,
                loop_target: None,
            })),
        }
    }

    pub fn acquire(&self) -> AudioHandle {
        self.shared.borrow_mut().consumers += 1;
        AudioHandle {
            shared: Rc::clone(&self.shared),
        }
    }

    /// Live handles
    #[cfg(test)]
    pub fn consumers(&self) -> usize {
        self.shared.borrow().consumers
    }

    pub fn backend_name(&self) -> &'static str {
        self.shared.borrow().backend.name()
    }

    #[cfg(test)]
    pub fn is_looping(&self) -> bool {
        self.shared.borrow().loop_target.is_some()
    }
}

/// A consumer's claim on the [`AudioService`]
pub struct AudioHandle {
    shared: Rc<RefCell<Shared>>,
}

impl AudioHandle {
    pub fn play_once(&self, cue: &str) {
        let mut shared = self.shared.borrow_mut();
        let path = shared.resolve(cue);
        log::debug!("audio: cue {}", path.display());
        let result = shared.backend.play_once(&path);
        shared.report("cue", result);
    }

    pub fn play_loop(&self, cue: &str, volume: f32) {
        let mut shared = self.shared.borrow_mut();
        let path = shared.resolve(cue);
        let volume = volume.clamp(0.0, 1.0);
        shared.loop_target = Some((path.clone(), volume));
        let result = shared.backend.start_loop(&path, volume);
        shared.report("loop", result);
    }

    /// Restart the loop after a suspension; no-op when no loop was requested
    pub fn resume_loop(&self) {
        let mut shared = self.shared.borrow_mut();
        let Some((path, volume)) = shared.loop_target.clone() else {
            return;
        };
        let result = shared.backend.start_loop(&path, volume);
        shared.report("resume", result);
    }

    pub fn stop_loop(&self) {
        let mut shared = self.shared.borrow_mut();
        shared.loop_target = None;
        shared.backend.stop_loop();
    }
}

impl Clone for AudioHandle {
    fn clone(&self) -> Self {
        self.shared.borrow_mut().consumers += 1;
        Self {
            shared: Rc::clone(&self.shared),
        }
    }
}

impl Drop for AudioHandle {
    fn drop(&mut self) {
        let mut shared = self.shared.borrow_mut();
        shared.consumers = shared.consumers.saturating_sub(1);
        if shared.consumers == 0 {
            shared.loop_target = None;
            shared.backend.stop_loop();
            log::debug!("audio: last consumer released");
        }
    }
}

/// Check that a cue resolves to a readable file
pub fn check_cue(dir: &Path, cue: &str) -> Result<()> {
    let path = dir.join(cue);
    if path.is_file() {
        Ok(())
    } else {
        Err(Error::Audio(format!("missing cue {}", path.display())))
    }
}

/// Backend that records calls, for tests
#[cfg(test)]
#[derive(Default, Clone)]
pub struct RecordingBackend {
    pub calls: Rc<RefCell<Vec<String>>>,
    pub fail: bool,
}

#[cfg(test)]
impl AudioBackend for RecordingBackend {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn play_once(&mut self, path: &Path) -> Result<()> {
        self.calls.borrow_mut().push(format!("once {}", path.display()));
        if self.fail {
            return Err(Error::Audio("blocked".to_string()));
        }
        Ok(())
    }

    fn start_loop(&mut self, path: &Path, volume: f32) -> Result<()> {
        self.calls
            .borrow_mut()
            .push(format!("loop {} {:.1}", path.display(), volume));
        Ok(())
    }

    fn stop_loop(&mut self) {
        self.calls.borrow_mut().push("stop".to_string());
    }
}
