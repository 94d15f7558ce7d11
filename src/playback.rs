//! Playback of synthesized speech on the default audio output.

use crate::error::{ViewerError, ViewerResult};
use crate::tts::{AudioClip, TtsSettings};
use log::{debug, info};
use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink};
use std::io::Cursor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    #[default]
    Idle,
    /// Index of the message being played.
    Playing(usize),
    Paused(usize),
}

impl PlaybackState {
    pub fn message_index(self) -> Option<usize> {
        match self {
            PlaybackState::Idle => None,
            PlaybackState::Playing(index) | PlaybackState::Paused(index) => Some(index),
        }
    }
}

/// Decode the bytes returned by the synthesis service.
pub fn decode_clip(bytes: &[u8]) -> ViewerResult<Decoder<Cursor<Vec<u8>>>> {
    Decoder::new(Cursor::new(bytes.to_vec())).map_err(|e| ViewerError::Format(format!("speech audio: {e}")))
}

/// One clip at a time on the default output device.
pub struct AudioPlayer {
    // Sinks fall silent once the stream is dropped.
    _stream: OutputStream,
    handle: OutputStreamHandle,
    current: Option<(usize, Sink)>,
}

impl AudioPlayer {
    pub fn open() -> ViewerResult<Self> {
        let (stream, handle) = OutputStream::try_default().map_err(|e| ViewerError::Audio(e.to_string()))?;
        Ok(Self {
            _stream: stream,
            handle,
            current: None,
        })
    }

    /// Replace whatever is playing with `clip`.
    pub fn play(&mut self, clip: &AudioClip, settings: &TtsSettings) -> ViewerResult<()> {
        self.stop();
        let source = decode_clip(&clip.bytes)?;
        let sink = Sink::try_new(&self.handle).map_err(|e| ViewerError::Audio(e.to_string()))?;
        sink.set_volume(settings.playback_volume());
        sink.append(source);
        info!("playing reply {} ({} bytes)", clip.message_index + 1, clip.bytes.len());
        self.current = Some((clip.message_index, sink));
        Ok(())
    }

    pub fn toggle_pause(&self) {
        if let Some((_, sink)) = &self.current {
            if sink.is_paused() {
                sink.play();
            } else {
                sink.pause();
            }
        }
    }

    pub fn stop(&mut self) {
        if let Some((index, sink)) = self.current.take() {
            debug!("stopping reply {}", index + 1);
            sink.stop();
        }
    }

    /// Follow a settings change while a clip is playing.
    pub fn apply(&self, settings: &TtsSettings) {
        if let Some((_, sink)) = &self.current {
            sink.set_volume(settings.playback_volume());
        }
    }

    pub fn state(&self) -> PlaybackState {
        match &self.current {
            Some((index, sink)) if !sink.empty() => {
                if sink.is_paused() {
                    PlaybackState::Paused(*index)
                } else {
                    PlaybackState::Playing(*index)
                }
            }
            _ => PlaybackState::Idle,
        }
    }
}
