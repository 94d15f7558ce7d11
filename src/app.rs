//! The interactive viewer window.
//!
//! The UI thread owns every piece of session state and re-composes the
//! frame from it each update. Anything that blocks goes to the [`Worker`];
//! its events are drained at the start of each frame.

use crate::annotation::{AnnotationState, AnnotationTool};
use crate::chat::{ChatRole, Conversation};
use crate::error::ViewerError;
use crate::interaction::{Controller, PointerEvent};
use crate::masks::{organ_color, ORGAN_COLORS};
use crate::playback::{AudioPlayer, PlaybackState};
use crate::render;
use crate::segmentation::{Notification, SegmentationState, Severity, VolumeUpload};
use crate::slice::Orientation;
use crate::source::{LoadedVolume, VolumeSource};
use crate::tts::{AudioClip, TtsSettings, AVAILABLE_VOICES, SPEED_RANGE, VOLUME_RANGE};
use crate::view::{display_size, ViewTransform, ViewerState};
use crate::worker::{Generation, Services, Worker, WorkerEvent, WorkerMsg};
use egui::{vec2, Color32, RichText, Sense, TextureHandle};
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;

/// Scroll distance, in points, that steps one slice.
const SCROLL_STEP: f32 = 30.0;
/// How long a notification stays up, in seconds.
const NOTIFICATION_SECS: f64 = 6.0;

/// Buttons of the playback strip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PlaybackAction {
    Play,
    TogglePause,
    Stop,
    Save,
    Close,
}

/// What the current load was started from, kept for Retry.
#[derive(Debug, Clone)]
enum LoadRequest {
    Source(VolumeSource),
    Upload(VolumeUpload),
}

impl LoadRequest {
    fn describe(&self) -> String {
        match self {
            LoadRequest::Source(source) => source.to_string(),
            LoadRequest::Upload(upload) => upload.file_name.clone(),
        }
    }
}

/// A decoded volume and the state built around it.
struct Session {
    loaded: LoadedVolume,
    viewer: ViewerState,
    annotation: AnnotationState,
    segmentation: SegmentationState,
}

impl Session {
    fn new(loaded: LoadedVolume) -> Self {
        let viewer = ViewerState::default().clamped(Orientation::Axial.extent(loaded.volume.dims()));
        Self {
            loaded,
            viewer,
            annotation: AnnotationState::default(),
            segmentation: SegmentationState::default(),
        }
    }

    fn dims(&self) -> [usize; 3] {
        self.loaded.volume.dims()
    }

    fn extent(&self) -> usize {
        self.viewer.orientation.extent(self.dims())
    }

    /// Native `(width, height)` of slices in the current orientation.
    fn native(&self) -> (u32, u32) {
        let (w, h) = self.viewer.orientation.plane_dims(self.dims());
        (w as u32, h as u32)
    }

    fn update_viewer(&mut self, f: impl FnOnce(ViewerState) -> ViewerState) {
        self.viewer = f(std::mem::take(&mut self.viewer));
    }

    fn update_annotation(&mut self, f: impl FnOnce(AnnotationState) -> AnnotationState) {
        self.annotation = f(std::mem::take(&mut self.annotation));
    }
}

/// Translates raw egui pointer input over the canvas into [`PointerEvent`]s.
#[derive(Debug, Default)]
struct CanvasInput {
    scroll_accum: f32,
    pointer_inside: bool,
}

impl CanvasInput {
    fn events(&mut self, ui: &egui::Ui, rect: egui::Rect) -> Vec<PointerEvent> {
        let (pos, pressed, released, moving, scroll, modifier) = ui.input(|i| {
            (
                i.pointer.latest_pos(),
                i.pointer.primary_pressed(),
                i.pointer.primary_released(),
                i.pointer.is_moving(),
                i.raw_scroll_delta.y,
                i.modifiers.command,
            )
        });
        let inside = pos.is_some_and(|p| rect.contains(p));
        let mut events = Vec::new();

        if inside {
            // egui reports scrolling towards the user as negative
            self.scroll_accum -= scroll;
            while self.scroll_accum >= SCROLL_STEP {
                self.scroll_accum -= SCROLL_STEP;
                events.push(PointerEvent::Wheel { delta_y: 1.0, modifier });
            }
            while self.scroll_accum <= -SCROLL_STEP {
                self.scroll_accum += SCROLL_STEP;
                events.push(PointerEvent::Wheel { delta_y: -1.0, modifier });
            }
            if let Some(p) = pos {
                if pressed {
                    events.push(PointerEvent::Down(p));
                } else if moving {
                    events.push(PointerEvent::Move(p));
                }
            }
        } else {
            self.scroll_accum = 0.0;
        }
        if released {
            events.push(PointerEvent::Up);
        } else if self.pointer_inside && !inside {
            events.push(PointerEvent::Leave);
        }
        self.pointer_inside = inside;
        events
    }
}

/// The viewer application.
pub struct MedAssistApp {
    worker: Worker,
    generation: Generation,
    session: Option<Session>,
    controller: Controller,
    input: CanvasInput,
    texture: Option<TextureHandle>,

    loading: Option<LoadRequest>,
    /// Last request that failed to load or render, offered for Retry.
    failed: Option<LoadRequest>,
    error: Option<String>,
    url_input: String,

    notification: Option<(Notification, f64)>,

    conversation: Conversation,
    tts: TtsSettings,
    show_tts_settings: bool,
    speaking: Option<usize>,
    /// Last synthesized clip, kept for replay and saving.
    audio: Option<AudioClip>,
    /// Opened on the first clip.
    player: Option<AudioPlayer>,
}

impl MedAssistApp {
    pub fn new(cc: &eframe::CreationContext<'_>, services: Services, initial: Option<VolumeSource>) -> Self {
        let worker = Worker::spawn(services, Some(cc.egui_ctx.clone()));
        let mut app = Self {
            worker,
            generation: 0,
            session: None,
            controller: Controller::new(),
            input: CanvasInput::default(),
            texture: None,
            loading: None,
            failed: None,
            error: None,
            url_input: String::new(),
            notification: None,
            conversation: Conversation::default(),
            tts: TtsSettings::load(cc.storage),
            show_tts_settings: false,
            speaking: None,
            audio: None,
            player: None,
        };
        if let Some(source) = initial {
            app.start_load(LoadRequest::Source(source));
        }
        app
    }

    /// Tear down the current session and load a new volume.
    fn start_load(&mut self, request: LoadRequest) {
        self.generation += 1;
        self.session = None;
        self.texture = None;
        self.controller = Controller::new();
        self.error = None;
        self.failed = None;
        info!("loading {} (generation {})", request.describe(), self.generation);
        let generation = self.generation;
        let msg = match &request {
            LoadRequest::Source(source) => WorkerMsg::LoadVolume {
                generation,
                source: source.clone(),
            },
            LoadRequest::Upload(upload) => WorkerMsg::DecodeVolume {
                generation,
                upload: upload.clone(),
            },
        };
        match self.worker.send(msg) {
            Ok(()) => self.loading = Some(request),
            Err(e) => self.fail_load(request, &e),
        }
    }

    fn fail_load(&mut self, request: LoadRequest, error: &ViewerError) {
        warn!("{} failed: {error}", request.describe());
        self.error = Some(format!("Failed to load {}: {error}", request.describe()));
        self.failed = Some(request);
        self.loading = None;
    }

    /// Reload a failed volume, or re-render the current one.
    fn retry(&mut self) {
        match self.failed.take() {
            Some(request) => self.start_load(request),
            None => self.error = None,
        }
    }

    fn can_retry(&self) -> bool {
        self.failed.is_some() || (self.error.is_some() && self.session.is_some())
    }

    fn open_file_dialog(&mut self) {
        if let Some(path) = rfd::FileDialog::new()
            .add_filter("NIfTI", &["nii", "gz"])
            .pick_file()
        {
            self.start_load(LoadRequest::Source(VolumeSource::Path(path)));
        }
    }

    fn open_url(&mut self) {
        let url = self.url_input.trim();
        if url.is_empty() {
            return;
        }
        let source = VolumeSource::parse(url);
        self.start_load(LoadRequest::Source(source));
    }

    fn handle_dropped_files(&mut self, ctx: &egui::Context) {
        let dropped = ctx.input(|i| i.raw.dropped_files.first().cloned());
        let Some(file) = dropped else {
            return;
        };
        if let Some(path) = file.path {
            self.start_load(LoadRequest::Source(VolumeSource::Path(path)));
        } else if let Some(bytes) = file.bytes {
            self.start_load(LoadRequest::Upload(VolumeUpload {
                file_name: file.name,
                bytes: Arc::new(bytes.to_vec()),
            }));
        }
    }

    fn notify(&mut self, ctx: &egui::Context, notification: Notification) {
        let now = ctx.input(|i| i.time);
        self.notification = Some((notification, now + NOTIFICATION_SECS));
    }

    /// Drain worker events. Session-bound events from older generations are
    /// dropped.
    fn process_events(&mut self, ctx: &egui::Context) {
        while let Some(event) = self.worker.try_recv() {
            if let Some(generation) = event.generation() {
                if generation != self.generation {
                    debug!("dropping stale event from generation {generation}");
                    continue;
                }
            }
            match event {
                WorkerEvent::VolumeLoaded { result, .. } => {
                    let request = self.loading.take();
                    match result {
                        Ok(loaded) => {
                            let title = format!("Medical Assistant Viewer - {}", loaded.upload.file_name);
                            ctx.send_viewport_cmd(egui::ViewportCommand::Title(title));
                            self.session = Some(Session::new(loaded));
                        }
                        Err(e) => {
                            if let Some(request) = request {
                                self.fail_load(request, &e);
                            } else {
                                self.error = Some(e.to_string());
                            }
                        }
                    }
                }
                WorkerEvent::SegmentationProgress { progress, status, .. } => {
                    if let Some(session) = self.session.as_mut() {
                        session.segmentation.set_progress(progress, &status);
                    }
                }
                WorkerEvent::OrganMasks { result, .. } => {
                    if let Some(session) = self.session.as_mut() {
                        let notification = match result {
                            Ok(masks) => session.segmentation.finish_organs(masks),
                            Err(e) => session.segmentation.fail(&e),
                        };
                        self.notify(ctx, notification);
                    }
                }
                WorkerEvent::AnnotationMasks { result, .. } => {
                    if let Some(session) = self.session.as_mut() {
                        let notification = match result {
                            Ok(masks) => session.segmentation.finish_annotation(masks),
                            Err(e) => session.segmentation.fail(&e),
                        };
                        self.notify(ctx, notification);
                    }
                }
                WorkerEvent::ChatDelta(delta) => self.conversation.push_delta(&delta),
                WorkerEvent::ChatDone(Ok(reply)) => self.conversation.finish(reply),
                WorkerEvent::ChatDone(Err(e)) => {
                    self.conversation.abandon();
                    self.notify(ctx, Notification::error(e.to_string()));
                }
                WorkerEvent::Audio(result) => {
                    self.speaking = None;
                    match result {
                        Ok(clip) => self.play_clip(ctx, clip),
                        Err(e) => self.notify(ctx, Notification::error(e.to_string())),
                    }
                }
            }
        }
    }

    fn segment_organs(&mut self, ctx: &egui::Context) {
        let Some(session) = self.session.as_mut() else {
            self.notify(ctx, Notification::error("no volume loaded"));
            return;
        };
        if let Err(e) = session.segmentation.begin("uploading volume") {
            self.notify(ctx, Notification::error(e.to_string()));
            return;
        }
        let (w, h) = Orientation::Axial.plane_dims(session.dims());
        let msg = WorkerMsg::SegmentOrgans {
            generation: self.generation,
            upload: session.loaded.upload.clone(),
            native: (w as u32, h as u32),
        };
        if let Err(e) = self.worker.send(msg) {
            let notification = session.segmentation.fail(&e);
            self.notify(ctx, notification);
        }
    }

    fn segment_annotation(&mut self, ctx: &egui::Context) {
        let Some(session) = self.session.as_mut() else {
            self.notify(ctx, Notification::error("no volume loaded"));
            return;
        };
        if let Err(e) = session.segmentation.begin("uploading annotation") {
            self.notify(ctx, Notification::error(e.to_string()));
            return;
        }
        let msg = WorkerMsg::SegmentAnnotation {
            generation: self.generation,
            upload: session.loaded.upload.clone(),
            annotation: session.annotation.clone(),
            slice_index: session.viewer.current_slice,
            orientation: session.viewer.orientation,
            native: session.native(),
        };
        if let Err(e) = self.worker.send(msg) {
            let notification = session.segmentation.fail(&e);
            self.notify(ctx, notification);
        }
    }

    fn send_chat(&mut self, ctx: &egui::Context) {
        let Some(messages) = self.conversation.submit_draft() else {
            return;
        };
        if let Err(e) = self.worker.send(WorkerMsg::Chat { messages }) {
            self.conversation.abandon();
            self.notify(ctx, Notification::error(e.to_string()));
        }
    }

    fn speak(&mut self, ctx: &egui::Context, message_index: usize) {
        let Some(message) = self.conversation.messages.get(message_index) else {
            return;
        };
        let msg = WorkerMsg::Synthesize {
            message_index,
            text: message.content.clone(),
            settings: self.tts.clone(),
        };
        match self.worker.send(msg) {
            Ok(()) => {
                self.speaking = Some(message_index);
                self.notify(ctx, Notification::info(format!("synthesizing reply {}", message_index + 1)));
            }
            Err(e) => self.notify(ctx, Notification::error(e.to_string())),
        }
    }

    fn play_clip(&mut self, ctx: &egui::Context, clip: AudioClip) {
        if self.player.is_none() {
            match AudioPlayer::open() {
                Ok(player) => self.player = Some(player),
                Err(e) => warn!("no audio output: {e}"),
            }
        }
        let played = match self.player.as_mut() {
            Some(player) => player.play(&clip, &self.tts),
            None => Err(ViewerError::Audio("no output device".to_string())),
        };
        if let Err(e) = played {
            self.notify(ctx, Notification::error(format!("{e}, use File > Save audio…")));
        }
        self.audio = Some(clip);
    }

    fn playback_state(&self) -> PlaybackState {
        self.player.as_ref().map(AudioPlayer::state).unwrap_or_default()
    }

    fn handle_playback(&mut self, ctx: &egui::Context, action: PlaybackAction) {
        match action {
            PlaybackAction::Play => {
                if let Some(clip) = self.audio.take() {
                    self.play_clip(ctx, clip);
                }
            }
            PlaybackAction::TogglePause => {
                if let Some(player) = &self.player {
                    player.toggle_pause();
                }
            }
            PlaybackAction::Stop => {
                if let Some(player) = self.player.as_mut() {
                    player.stop();
                }
            }
            PlaybackAction::Save => self.save_audio(ctx),
            PlaybackAction::Close => {
                if let Some(player) = self.player.as_mut() {
                    player.stop();
                }
                self.audio = None;
            }
        }
    }

    fn save_audio(&mut self, ctx: &egui::Context) {
        let Some(clip) = &self.audio else {
            return;
        };
        let Some(path) = rfd::FileDialog::new()
            .add_filter("Audio", &["wav"])
            .set_file_name(format!("reply_{}.wav", clip.message_index + 1))
            .save_file()
        else {
            return;
        };
        let notification = match std::fs::write(&path, &clip.bytes) {
            Ok(()) => Notification::success(format!("saved {}", path.display())),
            Err(e) => Notification::error(format!("could not save {}: {e}", path.display())),
        };
        self.notify(ctx, notification);
    }

    fn handle_keys(&mut self, ctx: &egui::Context) {
        if ctx.wants_keyboard_input() {
            return;
        }
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let (rotate, reset, prev, next) = ctx.input(|i| {
            (
                i.key_pressed(egui::Key::R),
                i.key_pressed(egui::Key::Home),
                i.key_pressed(egui::Key::ArrowLeft),
                i.key_pressed(egui::Key::ArrowRight),
            )
        });
        let extent = session.extent();
        if rotate {
            session.update_viewer(ViewerState::rotated);
        }
        if reset {
            session.update_viewer(ViewerState::reset_view);
        }
        if prev {
            session.update_viewer(|v| v.stepped(-1, extent));
        }
        if next {
            session.update_viewer(|v| v.stepped(1, extent));
        }
    }

    fn draw_menu(&mut self, ctx: &egui::Context) {
        let mut open = false;
        let mut open_url = false;
        let mut retry = false;
        let mut save_audio = false;
        let can_retry = self.can_retry();
        egui::TopBottomPanel::top("menu_bar").show(ctx, |ui| {
            egui::MenuBar::new().ui(ui, |ui| {
                ui.menu_button("File", |ui| {
                    if ui.button("Load NIfTI…").clicked() {
                        ui.close();
                        open = true;
                    }
                    if ui.add_enabled(can_retry, egui::Button::new("Retry")).clicked() {
                        ui.close();
                        retry = true;
                    }
                    if ui
                        .add_enabled(self.audio.is_some(), egui::Button::new("Save audio…"))
                        .clicked()
                    {
                        ui.close();
                        save_audio = true;
                    }
                });
                ui.menu_button("Speech", |ui| {
                    if ui.button("Settings…").clicked() {
                        ui.close();
                        self.show_tts_settings = true;
                    }
                });
                ui.separator();
                let field = ui.add(
                    egui::TextEdit::singleline(&mut self.url_input)
                        .hint_text("https://…/volume.nii.gz")
                        .desired_width(280.0),
                );
                let entered = field.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter));
                if ui.button("Open URL").clicked() || entered {
                    open_url = true;
                }
            });
            if let Some(msg) = &self.error {
                ui.colored_label(Color32::RED, msg);
            }
        });
        if open {
            self.open_file_dialog();
        }
        if open_url {
            self.open_url();
        }
        if retry {
            self.retry();
        }
        if save_audio {
            self.save_audio(ctx);
        }
    }

    fn draw_controls(&mut self, ctx: &egui::Context) {
        let mut segment_organs = false;
        let mut segment_annotation = false;
        egui::SidePanel::left("controls").resizable(false).show(ctx, |ui| {
            let Some(session) = self.session.as_mut() else {
                ui.label(RichText::new("No volume").color(Color32::GRAY));
                return;
            };
            egui::ScrollArea::vertical().show(ui, |ui| {
                ui.heading("View");
                let dims = session.dims();
                let mut orientation = session.viewer.orientation;
                egui::ComboBox::from_id_salt("orientation")
                    .selected_text(orientation.label())
                    .show_ui(ui, |ui| {
                        for o in Orientation::ALL {
                            ui.selectable_value(&mut orientation, o, o.label());
                        }
                    });
                if orientation != session.viewer.orientation {
                    session.update_viewer(|v| v.with_orientation(orientation, dims));
                }

                let extent = session.extent();
                let mut slice = session.viewer.current_slice;
                ui.add(egui::Slider::new(&mut slice, 0..=extent.saturating_sub(1)).text("Slice"));
                if slice != session.viewer.current_slice {
                    session.update_viewer(|v| v.with_slice(slice, extent));
                }

                let viewer = &mut session.viewer;
                ui.add(egui::Slider::new(&mut viewer.window_width, 1.0..=500.0).text("Window"));
                ui.add(egui::Slider::new(&mut viewer.window_level, 0.0..=255.0).text("Level"));
                ui.add(egui::Slider::new(&mut viewer.brightness, -100.0..=100.0).text("Brightness"));
                ui.add(egui::Slider::new(&mut viewer.contrast, 0.1..=3.0).text("Contrast"));
                ui.label(format!("Zoom: {:.0}%", viewer.zoom * 100.0));
                ui.horizontal(|ui| {
                    if ui.button("Reset view").clicked() {
                        session.update_viewer(ViewerState::reset_view);
                    }
                    if ui.button("Rotate 90°").clicked() {
                        session.update_viewer(ViewerState::rotated);
                    }
                });

                ui.separator();
                ui.heading("Annotation");
                let mut tool = session.annotation.tool;
                ui.horizontal(|ui| {
                    for t in [AnnotationTool::None, AnnotationTool::Box, AnnotationTool::Brush] {
                        ui.selectable_value(&mut tool, t, t.label());
                    }
                });
                if tool != session.annotation.tool {
                    session.update_annotation(|a| a.with_tool(tool));
                }
                ui.checkbox(&mut session.annotation.show_annotations, "Show drawing");
                if ui.button("Clear annotations").clicked() {
                    session.update_annotation(AnnotationState::cleared);
                }

                ui.separator();
                ui.heading("Segmentation");
                let busy = session.segmentation.is_segmenting;
                if ui.add_enabled(!busy, egui::Button::new("Segment organs")).clicked() {
                    segment_organs = true;
                }
                if ui
                    .add_enabled(!busy && tool != AnnotationTool::None, egui::Button::new("Segment annotation"))
                    .clicked()
                {
                    segment_annotation = true;
                }
                if busy || session.segmentation.progress > 0 {
                    ui.add(
                        egui::ProgressBar::new(session.segmentation.progress as f32 / 100.0)
                            .text(session.segmentation.status.as_str()),
                    );
                }
                ui.checkbox(&mut session.segmentation.show_organs, "Show organ masks");
                ui.checkbox(&mut session.segmentation.show_annotations, "Show annotation masks");

                let mut organs: Vec<String> = ORGAN_COLORS.iter().map(|(o, _)| o.to_string()).collect();
                for organ in session.segmentation.available_organs() {
                    if !organs.contains(&organ) {
                        organs.push(organ);
                    }
                }
                for organ in organs {
                    let [r, g, b] = organ_color(&organ);
                    let mut on = session.segmentation.selected_organs.contains(&organ);
                    let label = RichText::new(organ.as_str()).color(Color32::from_rgb(r, g, b));
                    if ui.checkbox(&mut on, label).changed() {
                        session.segmentation.toggle_organ(&organ);
                    }
                }

                ui.separator();
                ui.heading("Volume");
                let [w, h, d] = dims;
                let volume = &session.loaded.volume;
                let [sx, sy, sz] = volume.voxel_spacing();
                ui.label(format!("{w} × {h} × {d} ({})", volume.data_type().label()));
                ui.label(format!("Spacing: {sx:.2} × {sy:.2} × {sz:.2} mm"));
                let stats = &session.loaded.stats;
                ui.label(format!("Min/Max: {:.1} / {:.1}", stats.min, stats.max));
                ui.label(format!("Mean ± SD: {:.1} ± {:.1}", stats.mean, stats.std));
            });
        });
        if segment_organs {
            self.segment_organs(ctx);
        }
        if segment_annotation {
            self.segment_annotation(ctx);
        }
    }

    fn draw_chat(&mut self, ctx: &egui::Context) {
        let mut send = false;
        let mut speak = None;
        let mut playback = None;
        let state = self.playback_state();
        if state != PlaybackState::Idle {
            // picks up the end of the clip
            ctx.request_repaint_after(Duration::from_millis(250));
        }
        egui::SidePanel::right("chat").default_width(320.0).show(ctx, |ui| {
            ui.heading("Assistant");
            egui::TopBottomPanel::bottom("chat_input").show_inside(ui, |ui| {
                if let Some(clip) = &self.audio {
                    ui.horizontal(|ui| {
                        ui.label(format!("Reply {}", clip.message_index + 1));
                        let (label, action) = match state {
                            PlaybackState::Playing(_) => ("⏸ Pause", PlaybackAction::TogglePause),
                            PlaybackState::Paused(_) => ("▶ Resume", PlaybackAction::TogglePause),
                            PlaybackState::Idle => ("▶ Play", PlaybackAction::Play),
                        };
                        if ui.button(label).clicked() {
                            playback = Some(action);
                        }
                        if ui
                            .add_enabled(state != PlaybackState::Idle, egui::Button::new("⏹ Stop"))
                            .clicked()
                        {
                            playback = Some(PlaybackAction::Stop);
                        }
                        if ui.button("Save…").clicked() {
                            playback = Some(PlaybackAction::Save);
                        }
                        if ui.button("✖").on_hover_text("Close").clicked() {
                            playback = Some(PlaybackAction::Close);
                        }
                    });
                    ui.separator();
                }
                let streaming = self.conversation.is_streaming();
                let field = ui.add(
                    egui::TextEdit::multiline(&mut self.conversation.draft)
                        .desired_rows(2)
                        .desired_width(f32::INFINITY)
                        .hint_text("Ask about the scan…"),
                );
                let enter = field.has_focus()
                    && ui.input(|i| i.key_pressed(egui::Key::Enter) && !i.modifiers.shift);
                if ui.add_enabled(!streaming, egui::Button::new("Send")).clicked() || (enter && !streaming) {
                    send = true;
                }
            });
            egui::ScrollArea::vertical().stick_to_bottom(true).show(ui, |ui| {
                for (index, message) in self.conversation.messages.iter().enumerate() {
                    match message.role {
                        ChatRole::User => {
                            ui.label(RichText::new(message.content.as_str()).strong());
                        }
                        ChatRole::Assistant => {
                            ui.label(message.content.as_str());
                            let busy = self.speaking.is_some();
                            let text = if self.speaking == Some(index) {
                                "Synthesizing…"
                            } else if state.message_index() == Some(index) {
                                "🔊 Playing"
                            } else {
                                "🔊 Speak"
                            };
                            if ui.add_enabled(!busy, egui::Button::new(text).small()).clicked() {
                                speak = Some(index);
                            }
                        }
                        ChatRole::System => {}
                    }
                    ui.add_space(6.0);
                }
                if let Some(pending) = &self.conversation.pending {
                    ui.horizontal(|ui| {
                        ui.spinner();
                        ui.label(pending.as_str());
                    });
                }
            });
        });
        if send {
            self.send_chat(ctx);
        }
        if let Some(index) = speak {
            self.speak(ctx, index);
        }
        if let Some(action) = playback {
            self.handle_playback(ctx, action);
        }
    }

    fn draw_tts_settings(&mut self, ctx: &egui::Context) {
        let mut open = self.show_tts_settings;
        egui::Window::new("Speech settings")
            .open(&mut open)
            .resizable(false)
            .show(ctx, |ui| {
                egui::ComboBox::from_id_salt("voice")
                    .selected_text(self.tts.voice_label().to_string())
                    .show_ui(ui, |ui| {
                        for (key, label) in AVAILABLE_VOICES {
                            ui.selectable_value(&mut self.tts.voice_key, key.to_string(), label);
                        }
                    });
                ui.add(egui::Slider::new(&mut self.tts.speed, SPEED_RANGE).step_by(0.1).text("Speed"));
                let volume = ui.add(egui::Slider::new(&mut self.tts.volume, VOLUME_RANGE).text("Volume"));
                if volume.changed() {
                    if let Some(player) = &self.player {
                        player.apply(&self.tts);
                    }
                }
            });
        self.show_tts_settings = open;
    }

    fn draw_notification(&mut self, ctx: &egui::Context) {
        let now = ctx.input(|i| i.time);
        let Some((notification, expires)) = &self.notification else {
            return;
        };
        if now >= *expires {
            self.notification = None;
            return;
        }
        let color = match notification.severity {
            Severity::Success => Color32::from_rgb(60, 170, 90),
            Severity::Error => Color32::RED,
            Severity::Info => Color32::LIGHT_BLUE,
        };
        egui::TopBottomPanel::bottom("notification").show(ctx, |ui| {
            ui.colored_label(color, notification.message.as_str());
        });
        ctx.request_repaint_after(Duration::from_secs_f64(expires - now));
    }

    fn draw_canvas(&mut self, ctx: &egui::Context) {
        let mut retry = false;
        let can_retry = self.can_retry();
        let frame = egui::Frame::new().fill(Color32::BLACK).inner_margin(0.0);
        egui::CentralPanel::default().frame(frame).show(ctx, |ui| {
            if let Some(msg) = &self.error {
                ui.vertical_centered(|ui| {
                    ui.add_space(ui.available_height() / 3.0);
                    ui.colored_label(Color32::RED, msg);
                    if can_retry && ui.button("Retry").clicked() {
                        retry = true;
                    }
                });
                return;
            }
            if let Some(request) = &self.loading {
                ui.centered_and_justified(|ui| {
                    ui.label(
                        RichText::new(format!("Loading {}…", request.describe()))
                            .color(Color32::GRAY)
                            .size(20.0),
                    );
                });
                return;
            }
            let Some(session) = self.session.as_mut() else {
                ui.centered_and_justified(|ui| {
                    ui.label(
                        RichText::new("No volume loaded.\nUse File > Load NIfTI… or drop a file here.")
                            .color(Color32::GRAY)
                            .size(20.0),
                    );
                });
                return;
            };

            let (rect, _response) = ui.allocate_exact_size(ui.available_size(), Sense::click_and_drag());
            let (w, h) = session.native();
            let native = vec2(w as f32, h as f32);
            let origin = rect.center() - display_size(native, session.viewer.rotation) / 2.0;

            let transform = ViewTransform::new(&session.viewer, native, origin);
            let extent = session.extent();
            for event in self.input.events(ui, rect) {
                let (viewer, annotation) = self.controller.handle(
                    std::mem::take(&mut session.viewer),
                    std::mem::take(&mut session.annotation),
                    event,
                    &transform,
                    extent,
                );
                session.viewer = viewer;
                session.annotation = annotation;
            }

            let scene = match render::compose(
                &session.loaded.volume,
                &session.viewer,
                &session.annotation,
                &session.segmentation,
                origin,
            ) {
                Ok(scene) => scene,
                Err(e) => {
                    warn!("render failed: {e}");
                    self.error = Some(format!("Failed to render slice: {e}"));
                    return;
                }
            };
            let image = scene.image.clone();
            match self.texture.as_mut() {
                Some(texture) => texture.set(image, render::texture_options()),
                None => self.texture = Some(ctx.load_texture("slice", image, render::texture_options())),
            }
            if let Some(texture) = &self.texture {
                render::paint(&scene, &ui.painter_at(rect), texture);
            }
        });
        if retry {
            self.retry();
        }
    }
}

impl eframe::App for MedAssistApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.process_events(ctx);
        self.handle_dropped_files(ctx);
        self.handle_keys(ctx);

        self.draw_menu(ctx);
        self.draw_notification(ctx);
        self.draw_controls(ctx);
        self.draw_chat(ctx);
        self.draw_tts_settings(ctx);
        self.draw_canvas(ctx);
    }

    fn save(&mut self, storage: &mut dyn eframe::Storage) {
        self.tts.save(storage);
    }
}
