//! Background thread for everything that blocks on I/O.
//!
//! The UI sends [`WorkerMsg`] commands and drains [`WorkerEvent`]s once per
//! frame. Session-bound results carry the [`Generation`] of the request so
//! the UI can drop results that arrive after the session moved on; the
//! request itself is never aborted.

use crate::annotation::AnnotationState;
use crate::chat::{ChatClient, ChatMessage};
use crate::config::ServiceConfig;
use crate::error::{ViewerError, ViewerResult};
use crate::masks::{OrganMasks, SliceMasks};
use crate::segmentation::{self, HttpSegmentationClient, SegmentationService, VolumeUpload};
use crate::slice::Orientation;
use crate::source::{self, LoadedVolume, VolumeSource};
use crate::tts::{AudioClip, TtsClient, TtsSettings};
use log::{debug, error, info};
use reqwest::blocking::Client;
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Counter identifying the active viewer session.
pub type Generation = u64;

/// Commands from the UI thread.
#[derive(Debug)]
pub enum WorkerMsg {
    /// Read and decode a volume.
    LoadVolume {
        generation: Generation,
        source: VolumeSource,
    },
    /// Decode bytes the UI already has (dropped files).
    DecodeVolume {
        generation: Generation,
        upload: VolumeUpload,
    },
    SegmentOrgans {
        generation: Generation,
        upload: VolumeUpload,
        native: (u32, u32),
    },
    /// Segment from the annotation drawn on one slice. The annotation is
    /// validated here, before the backend is called.
    SegmentAnnotation {
        generation: Generation,
        upload: VolumeUpload,
        annotation: AnnotationState,
        slice_index: usize,
        orientation: Orientation,
        native: (u32, u32),
    },
    Chat {
        messages: Vec<ChatMessage>,
    },
    Synthesize {
        message_index: usize,
        text: String,
        settings: TtsSettings,
    },
    Close,
}

/// Results reported back to the UI thread.
#[derive(Debug)]
pub enum WorkerEvent {
    VolumeLoaded {
        generation: Generation,
        result: ViewerResult<LoadedVolume>,
    },
    SegmentationProgress {
        generation: Generation,
        progress: u8,
        status: String,
    },
    OrganMasks {
        generation: Generation,
        result: ViewerResult<OrganMasks>,
    },
    AnnotationMasks {
        generation: Generation,
        result: ViewerResult<SliceMasks>,
    },
    ChatDelta(String),
    ChatDone(ViewerResult<String>),
    Audio(ViewerResult<AudioClip>),
}

impl WorkerEvent {
    /// Generation the event belongs to; `None` for session-independent
    /// events (chat and speech).
    pub fn generation(&self) -> Option<Generation> {
        match self {
            WorkerEvent::VolumeLoaded { generation, .. }
            | WorkerEvent::SegmentationProgress { generation, .. }
            | WorkerEvent::OrganMasks { generation, .. }
            | WorkerEvent::AnnotationMasks { generation, .. } => Some(*generation),
            WorkerEvent::ChatDelta(_) | WorkerEvent::ChatDone(_) | WorkerEvent::Audio(_) => None,
        }
    }
}

/// Clients the worker talks through.
pub struct Services {
    pub segmentation: Box<dyn SegmentationService>,
    pub chat: ChatClient,
    pub tts: TtsClient,
    pub http: Client,
}

impl Services {
    pub fn from_config(config: &ServiceConfig) -> ViewerResult<Self> {
        let timeout = config.timeout();
        Ok(Self {
            segmentation: Box::new(HttpSegmentationClient::new(&config.backend_url, timeout)?),
            chat: ChatClient::new(&config.chat_url, timeout)?,
            tts: TtsClient::new(&config.tts_url, timeout)?,
            http: Client::builder().timeout(timeout).build()?,
        })
    }
}

struct Handler {
    rx: Receiver<WorkerMsg>,
    tx: Sender<WorkerEvent>,
    services: Services,
    repaint: Option<egui::Context>,
}

impl Handler {
    fn run(self) {
        while let Ok(msg) = self.rx.recv() {
            match msg {
                WorkerMsg::Close => break,
                WorkerMsg::LoadVolume { generation, source } => {
                    info!("loading {source}");
                    let result = source::load(&source, &self.services.http);
                    self.send(WorkerEvent::VolumeLoaded { generation, result });
                }
                WorkerMsg::DecodeVolume { generation, upload } => {
                    let result = LoadedVolume::from_upload(upload);
                    self.send(WorkerEvent::VolumeLoaded { generation, result });
                }
                WorkerMsg::SegmentOrgans {
                    generation,
                    upload,
                    native,
                } => {
                    let result = segmentation::run_organ_segmentation(
                        self.services.segmentation.as_ref(),
                        &upload,
                        native,
                        &mut |progress, status| self.progress(generation, progress, status),
                    );
                    self.log_failure("organ segmentation", &result);
                    self.send(WorkerEvent::OrganMasks { generation, result });
                }
                WorkerMsg::SegmentAnnotation {
                    generation,
                    upload,
                    annotation,
                    slice_index,
                    orientation,
                    native,
                } => {
                    let result = segmentation::run_annotation_segmentation(
                        self.services.segmentation.as_ref(),
                        &upload,
                        &annotation,
                        slice_index,
                        orientation,
                        native,
                        &mut |progress, status| self.progress(generation, progress, status),
                    );
                    self.log_failure("annotation segmentation", &result);
                    self.send(WorkerEvent::AnnotationMasks { generation, result });
                }
                WorkerMsg::Chat { messages } => {
                    let result = self
                        .services
                        .chat
                        .send(&messages, &mut |delta| self.send(WorkerEvent::ChatDelta(delta.to_string())));
                    self.log_failure("chat", &result);
                    self.send(WorkerEvent::ChatDone(result));
                }
                WorkerMsg::Synthesize {
                    message_index,
                    text,
                    settings,
                } => {
                    let result = self
                        .services
                        .tts
                        .synthesize(&text, &settings)
                        .map(|bytes| AudioClip { message_index, bytes });
                    self.log_failure("speech synthesis", &result);
                    self.send(WorkerEvent::Audio(result));
                }
            }
        }
        debug!("worker shutdown");
    }

    fn send(&self, event: WorkerEvent) {
        let _ = self.tx.send(event);
        if let Some(ctx) = &self.repaint {
            ctx.request_repaint();
        }
    }

    fn progress(&self, generation: Generation, progress: u8, status: &str) {
        self.send(WorkerEvent::SegmentationProgress {
            generation,
            progress,
            status: status.to_string(),
        });
    }

    fn log_failure<T>(&self, what: &str, result: &ViewerResult<T>) {
        if let Err(e) = result {
            error!("{what} failed: {e}");
        }
    }
}

/// Handle to the worker thread. Dropping it stops the thread.
pub struct Worker {
    tx: Sender<WorkerMsg>,
    rx: Receiver<WorkerEvent>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    /// Start the worker. With a `repaint` context the UI is woken whenever
    /// an event is sent.
    pub fn spawn(services: Services, repaint: Option<egui::Context>) -> Self {
        let (tx_to_worker, rx_in_worker) = channel();
        let (tx_to_ui, rx_from_worker) = channel();
        let handle = thread::spawn(move || {
            Handler {
                rx: rx_in_worker,
                tx: tx_to_ui,
                services,
                repaint,
            }
            .run();
        });
        Self {
            tx: tx_to_worker,
            rx: rx_from_worker,
            handle: Some(handle),
        }
    }

    pub fn send(&self, msg: WorkerMsg) -> ViewerResult<()> {
        self.tx
            .send(msg)
            .map_err(|_| ViewerError::Network("background worker has stopped".to_string()))
    }

    /// Next pending event, without blocking.
    pub fn try_recv(&self) -> Option<WorkerEvent> {
        self.rx.try_recv().ok()
    }

    /// Wait up to `timeout` for the next event.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<WorkerEvent> {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        let _ = self.tx.send(WorkerMsg::Close);
        if let Some(handle) = self.handle.take() {
            // A request in flight is not interrupted; the thread exits once
            // it completes.
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                debug!("worker busy, detaching");
            }
        }
    }
}
