//! Organ and annotation segmentation: the backend client, the per-session
//! progress record, and the request workflows run off the UI thread.

use crate::annotation::{AnnotationPrompt, AnnotationState};
use crate::error::{ViewerError, ViewerResult};
use crate::masks::{self, OrganMasks, SliceMasks, ANNOTATION_COLOR, DEFAULT_ORGANS};
use crate::slice::Orientation;
use log::{debug, info, warn};
use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::{Client, Response};
use reqwest::Url;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

/// Raw volume bytes as they are uploaded, named after the file they came from.
#[derive(Debug, Clone)]
pub struct VolumeUpload {
    pub file_name: String,
    pub bytes: Arc<Vec<u8>>,
}

impl VolumeUpload {
    fn part(&self) -> ViewerResult<Part> {
        Ok(Part::bytes(self.bytes.as_ref().clone())
            .file_name(self.file_name.clone())
            .mime_str("application/octet-stream")?)
    }
}

/// `{masks: {<stem>: {<organ>: {<slice file>: <image ref>}}}}`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrganSegmentationResponse {
    #[serde(default)]
    pub masks: BTreeMap<String, BTreeMap<String, BTreeMap<String, String>>>,
}

/// `{masks: {<slice file>: <image ref>}}`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnnotationSegmentationResponse {
    #[serde(default)]
    pub masks: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
}

/// Annotation request for one slice.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationRequest {
    pub slice_index: usize,
    pub orientation: Orientation,
    pub prompt: AnnotationPrompt,
}

/// Inference backend used by the segmentation workflows.
pub trait SegmentationService: Send + Sync {
    fn segment_organs(&self, upload: &VolumeUpload) -> ViewerResult<OrganSegmentationResponse>;

    fn segment_annotation(
        &self,
        upload: &VolumeUpload,
        request: &AnnotationRequest,
    ) -> ViewerResult<AnnotationSegmentationResponse>;

    /// Bytes of a mask image the response refers to by URL.
    fn fetch_image(&self, reference: &str) -> ViewerResult<Vec<u8>>;
}

/// HTTP client for `POST /segment` and `POST /annotate-segment`.
pub struct HttpSegmentationClient {
    client: Client,
    base: Url,
}

impl HttpSegmentationClient {
    pub fn new(base_url: &str, timeout: Duration) -> ViewerResult<Self> {
        let mut base = Url::parse(base_url)
            .map_err(|e| ViewerError::Validation(format!("invalid backend URL {base_url}: {e}")))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base })
    }

    fn endpoint(&self, path: &str) -> ViewerResult<Url> {
        self.base
            .join(path)
            .map_err(|e| ViewerError::Validation(format!("cannot resolve {path}: {e}")))
    }
}

/// Longest plain-text error body passed through as the message.
const MAX_PLAIN_ERROR: usize = 200;

/// Turn a non-2xx response into a `Network` error carrying the backend's
/// `error` field (or short plain-text body) verbatim.
pub(crate) fn check_status(response: Response, fallback: &str) -> ViewerResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    let plain = body.trim();
    let message = match serde_json::from_str::<ErrorBody>(&body) {
        Ok(ErrorBody { error: Some(error) }) => error,
        Err(_) if !plain.is_empty() && plain.len() <= MAX_PLAIN_ERROR => plain.to_string(),
        _ => format!("{fallback} (status {})", status.as_u16()),
    };
    warn!("backend answered {status}: {message}");
    Err(ViewerError::Network(message))
}

impl SegmentationService for HttpSegmentationClient {
    fn segment_organs(&self, upload: &VolumeUpload) -> ViewerResult<OrganSegmentationResponse> {
        let url = self.endpoint("segment")?;
        info!("uploading {} ({} bytes) to {url}", upload.file_name, upload.bytes.len());
        let form = Form::new().part("file", upload.part()?);
        let response = self.client.post(url).multipart(form).send()?;
        let response = check_status(response, "segmentation server request failed")?;
        Ok(response.json()?)
    }

    fn segment_annotation(
        &self,
        upload: &VolumeUpload,
        request: &AnnotationRequest,
    ) -> ViewerResult<AnnotationSegmentationResponse> {
        let url = self.endpoint("annotate-segment")?;
        let tool = request.prompt.tool();
        info!(
            "annotation segmentation of slice {} with {} prompt",
            request.slice_index,
            tool.label()
        );
        let mut form = Form::new()
            .part("file", upload.part()?)
            .text("slice_idx", request.slice_index.to_string())
            .text("tool", tool.label());
        form = match &request.prompt {
            AnnotationPrompt::Box(b) => form.text("box", b.to_json()),
            AnnotationPrompt::Brush(png) => form.part(
                "image",
                Part::bytes(png.clone())
                    .file_name("brush_mask.png")
                    .mime_str("image/png")?,
            ),
        };
        let response = self.client.post(url).multipart(form).send()?;
        let response = check_status(response, "annotation segmentation request failed")?;
        Ok(response.json()?)
    }

    fn fetch_image(&self, reference: &str) -> ViewerResult<Vec<u8>> {
        let url = self.endpoint(reference)?;
        debug!("fetching mask {url}");
        let response = self.client.get(url).send()?;
        let response = check_status(response, "mask download failed")?;
        Ok(response.bytes()?.to_vec())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Success,
    Error,
    Info,
}

/// Transient message shown to the user.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub message: String,
    pub severity: Severity,
}

impl Notification {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            severity: Severity::Success,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            severity: Severity::Error,
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            severity: Severity::Info,
        }
    }
}

/// Segmentation progress and results of one viewer session.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentationState {
    pub is_segmenting: bool,
    pub progress: u8,
    pub status: String,
    pub organ_masks: Option<Arc<OrganMasks>>,
    pub annotation_masks: Option<Arc<SliceMasks>>,
    pub selected_organs: BTreeSet<String>,
    pub show_organs: bool,
    pub show_annotations: bool,
}

impl Default for SegmentationState {
    fn default() -> Self {
        Self {
            is_segmenting: false,
            progress: 0,
            status: String::new(),
            organ_masks: None,
            annotation_masks: None,
            selected_organs: DEFAULT_ORGANS.iter().map(|o| o.to_string()).collect(),
            show_organs: true,
            show_annotations: true,
        }
    }
}

impl SegmentationState {
    /// Mark a request as started. Refused while another one is running.
    pub fn begin(&mut self, status: &str) -> ViewerResult<()> {
        if self.is_segmenting {
            return Err(ViewerError::Validation(
                "a segmentation request is already running".to_string(),
            ));
        }
        self.is_segmenting = true;
        self.progress = 10;
        self.status = status.to_string();
        Ok(())
    }

    pub fn set_progress(&mut self, progress: u8, status: &str) {
        self.progress = progress.min(100);
        self.status = status.to_string();
    }

    pub fn finish_organs(&mut self, masks: OrganMasks) -> Notification {
        let organs = masks.len();
        self.organ_masks = Some(Arc::new(masks));
        self.show_organs = true;
        self.complete();
        Notification::success(format!("segmentation finished: {organs} organ(s)"))
    }

    pub fn finish_annotation(&mut self, masks: SliceMasks) -> Notification {
        let slices = masks.len();
        self.annotation_masks = Some(Arc::new(masks));
        self.show_annotations = true;
        self.complete();
        Notification::success(format!("annotation segmentation finished: {slices} slice(s)"))
    }

    /// End a failed request. Masks from earlier requests are kept.
    pub fn fail(&mut self, error: &ViewerError) -> Notification {
        self.is_segmenting = false;
        self.progress = 0;
        self.status = String::new();
        Notification::error(error.to_string())
    }

    fn complete(&mut self) {
        self.is_segmenting = false;
        self.progress = 100;
        self.status = "done".to_string();
    }

    pub fn toggle_organ(&mut self, organ: &str) {
        if !self.selected_organs.remove(organ) {
            self.selected_organs.insert(organ.to_string());
        }
    }

    /// Organs that have masks, sorted by name.
    pub fn available_organs(&self) -> Vec<String> {
        self.organ_masks
            .as_deref()
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default()
    }
}

/// Annotation request for one slice. Fails with `Validation` when the
/// active tool has nothing to submit.
pub fn annotation_request(
    annotation: &AnnotationState,
    slice_index: usize,
    orientation: Orientation,
    native: (u32, u32),
) -> ViewerResult<AnnotationRequest> {
    let prompt = annotation.prompt(native)?;
    Ok(AnnotationRequest {
        slice_index,
        orientation,
        prompt,
    })
}

/// Run organ segmentation and decode the masks filed under the upload's
/// stem. Organ masks index axial slices.
pub fn run_organ_segmentation(
    service: &dyn SegmentationService,
    upload: &VolumeUpload,
    native: (u32, u32),
    progress: &mut dyn FnMut(u8, &str),
) -> ViewerResult<OrganMasks> {
    let response = service.segment_organs(upload)?;
    progress(50, "response received, decoding masks");
    let stem = masks::file_stem(&upload.file_name);
    let organs = response.masks.get(&stem).ok_or_else(|| {
        ViewerError::Format(format!("segmentation response has no masks for {stem}"))
    })?;
    let fetch = |reference: &str| service.fetch_image(reference);
    masks::decode_organ_masks(organs, native, Orientation::Axial, &fetch)
}

/// Validate the annotation drawn on one slice and segment from it. The
/// service is not called when validation fails.
pub fn run_annotation_segmentation(
    service: &dyn SegmentationService,
    upload: &VolumeUpload,
    annotation: &AnnotationState,
    slice_index: usize,
    orientation: Orientation,
    native: (u32, u32),
    progress: &mut dyn FnMut(u8, &str),
) -> ViewerResult<SliceMasks> {
    let request = annotation_request(annotation, slice_index, orientation, native)?;
    let response = service.segment_annotation(upload, &request)?;
    progress(50, "response received, decoding masks");
    let fetch = |reference: &str| service.fetch_image(reference);
    masks::decode_slice_masks(&response.masks, native, orientation, ANNOTATION_COLOR, &fetch)
}
