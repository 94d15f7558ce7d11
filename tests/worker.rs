mod common;

use common::counting_u8;
use medassist_viewer::annotation::{AnnotationState, AnnotationTool};
use medassist_viewer::chat::ChatClient;
use medassist_viewer::segmentation::{
    AnnotationRequest, AnnotationSegmentationResponse, OrganSegmentationResponse, SegmentationService,
    VolumeUpload,
};
use medassist_viewer::slice::Orientation;
use medassist_viewer::source::VolumeSource;
use medassist_viewer::tts::{TtsClient, TtsSettings};
use medassist_viewer::worker::{Services, Worker, WorkerEvent, WorkerMsg};
use medassist_viewer::{ViewerError, ViewerResult};
use reqwest::blocking::Client;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(10);

struct EmptyBackend;

impl SegmentationService for EmptyBackend {
    fn segment_organs(&self, upload: &VolumeUpload) -> ViewerResult<OrganSegmentationResponse> {
        let stem = upload.file_name.trim_end_matches(".nii").to_string();
        Ok(OrganSegmentationResponse {
            masks: BTreeMap::from([(stem, BTreeMap::new())]),
        })
    }

    fn segment_annotation(
        &self,
        _upload: &VolumeUpload,
        _request: &AnnotationRequest,
    ) -> ViewerResult<AnnotationSegmentationResponse> {
        Err(ViewerError::Network("annotation model unavailable".to_string()))
    }

    fn fetch_image(&self, _reference: &str) -> ViewerResult<Vec<u8>> {
        Ok(Vec::new())
    }
}

fn worker() -> Worker {
    let services = Services {
        segmentation: Box::new(EmptyBackend),
        chat: ChatClient::new("http://127.0.0.1:9/api/chat", WAIT).unwrap(),
        tts: TtsClient::new("http://127.0.0.1:9/synthesize", WAIT).unwrap(),
        http: Client::new(),
    };
    Worker::spawn(services, None)
}

fn upload() -> VolumeUpload {
    VolumeUpload {
        file_name: "phantom.nii".to_string(),
        bytes: Arc::new(counting_u8([4, 4, 2])),
    }
}

#[test]
fn decoded_volume_comes_back_with_its_generation() {
    let worker = worker();
    worker
        .send(WorkerMsg::DecodeVolume {
            generation: 7,
            upload: upload(),
        })
        .unwrap();
    let event = worker.recv_timeout(WAIT).unwrap();
    assert_eq!(event.generation(), Some(7));
    let WorkerEvent::VolumeLoaded { result, .. } = event else {
        panic!("expected a loaded volume, got {event:?}");
    };
    let loaded = result.unwrap();
    assert_eq!(loaded.volume.dims(), [4, 4, 2]);
    assert_eq!(loaded.stats.max, 31.0);
}

#[test]
fn volumes_load_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("phantom.nii.gz");
    std::fs::write(&path, common::gzip(&counting_u8([4, 4, 2]))).unwrap();

    let worker = worker();
    worker
        .send(WorkerMsg::LoadVolume {
            generation: 1,
            source: VolumeSource::Path(path),
        })
        .unwrap();
    let Some(WorkerEvent::VolumeLoaded { result, .. }) = worker.recv_timeout(WAIT) else {
        panic!("expected a loaded volume");
    };
    let loaded = result.unwrap();
    assert_eq!(loaded.upload.file_name, "phantom.nii.gz");
    assert_eq!(loaded.volume.dims(), [4, 4, 2]);
}

#[test]
fn undecodable_bytes_report_a_format_error() {
    let worker = worker();
    let upload = VolumeUpload {
        file_name: "junk.nii".to_string(),
        bytes: Arc::new(vec![0; 10]),
    };
    worker.send(WorkerMsg::DecodeVolume { generation: 2, upload }).unwrap();
    let Some(WorkerEvent::VolumeLoaded { result, .. }) = worker.recv_timeout(WAIT) else {
        panic!("expected a load result");
    };
    assert!(matches!(result, Err(ViewerError::Format(_))));
}

#[test]
fn segmentation_reports_progress_then_masks() {
    let worker = worker();
    worker
        .send(WorkerMsg::SegmentOrgans {
            generation: 3,
            upload: upload(),
            native: (4, 4),
        })
        .unwrap();

    let Some(WorkerEvent::SegmentationProgress { generation, progress, .. }) = worker.recv_timeout(WAIT) else {
        panic!("expected progress first");
    };
    assert_eq!((generation, progress), (3, 50));
    let Some(WorkerEvent::OrganMasks { generation, result }) = worker.recv_timeout(WAIT) else {
        panic!("expected organ masks");
    };
    assert_eq!(generation, 3);
    assert!(result.unwrap().is_empty());
}

#[test]
fn annotations_are_checked_before_the_backend_is_asked() {
    let worker = worker();
    let segment = |generation, annotation| WorkerMsg::SegmentAnnotation {
        generation,
        upload: upload(),
        annotation,
        slice_index: 1,
        orientation: Orientation::Axial,
        native: (4, 4),
    };
    let empty = AnnotationState::default().with_tool(AnnotationTool::Box);
    let drawn = empty.clone().begin(egui::pos2(0.0, 0.0)).extend(egui::pos2(2.0, 3.0)).finish();

    worker.send(segment(4, empty)).unwrap();
    let Some(WorkerEvent::AnnotationMasks { generation, result }) = worker.recv_timeout(WAIT) else {
        panic!("expected an annotation result");
    };
    assert_eq!(generation, 4);
    assert!(matches!(result, Err(ViewerError::Validation(_))));

    worker.send(segment(5, drawn)).unwrap();
    let Some(WorkerEvent::AnnotationMasks { result, .. }) = worker.recv_timeout(WAIT) else {
        panic!("expected an annotation result");
    };
    let err = result.unwrap_err();
    assert_eq!(err.to_string(), "annotation model unavailable");
}

#[test]
fn speech_and_chat_failures_are_reported_without_a_generation() {
    let worker = worker();
    worker
        .send(WorkerMsg::Synthesize {
            message_index: 0,
            text: "*".to_string(),
            settings: TtsSettings::default(),
        })
        .unwrap();
    let event = worker.recv_timeout(WAIT).unwrap();
    assert_eq!(event.generation(), None);
    assert!(matches!(event, WorkerEvent::Audio(Err(ViewerError::Validation(_)))));

    worker.send(WorkerMsg::Chat { messages: Vec::new() }).unwrap();
    let event = worker.recv_timeout(WAIT).unwrap();
    assert!(matches!(event, WorkerEvent::ChatDone(Err(ViewerError::Validation(_)))));
}
