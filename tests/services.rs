mod common;

use common::serve_once;
use medassist_viewer::chat::{ChatClient, ChatMessage, Conversation};
use medassist_viewer::tts::{TtsClient, TtsSettings};
use medassist_viewer::ViewerError;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(10);

#[test]
fn chat_reply_streams_in_deltas() {
    let stream = "f:{\"messageId\":\"m1\"}\n0:\"The liver \"\n0:\"looks normal.\"\ne:{\"finishReason\":\"stop\"}\n";
    let (url, server) = serve_once(200, "text/plain; charset=utf-8", stream.as_bytes().to_vec());
    let client = ChatClient::new(&format!("{url}/api/chat"), TIMEOUT).unwrap();

    let mut conversation = Conversation::default();
    conversation.draft = "How does the liver look?".to_string();
    let messages = conversation.submit_draft().unwrap();
    assert!(conversation.is_streaming());

    let reply = client
        .send(&messages, &mut |delta| conversation.push_delta(delta))
        .unwrap();
    assert_eq!(reply, "The liver looks normal.");
    assert_eq!(conversation.pending.as_deref(), Some("The liver looks normal."));
    conversation.finish(reply);
    assert_eq!(conversation.messages.len(), 2);
    assert!(!conversation.is_streaming());

    let request = server.join().unwrap();
    assert!(request.request_line.starts_with("POST /api/chat "));
    let body: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
    assert_eq!(body["messages"][0]["role"], "user");
    assert_eq!(body["messages"][0]["content"], "How does the liver look?");
}

#[test]
fn chat_error_part_fails_the_reply() {
    let (url, _server) = serve_once(200, "text/plain", b"0:\"partial\"\n3:\"model overloaded\"\n".to_vec());
    let client = ChatClient::new(&url, TIMEOUT).unwrap();
    let err = client.send(&[ChatMessage::user("hi")], &mut |_| {}).unwrap_err();
    assert_eq!(err.to_string(), "model overloaded");
}

#[test]
fn empty_conversation_is_refused_locally() {
    // nothing listens on this port; a request would fail with Network
    let client = ChatClient::new("http://127.0.0.1:9/api/chat", TIMEOUT).unwrap();
    let err = client.send(&[ChatMessage::user("")], &mut |_| {}).unwrap_err();
    assert!(matches!(err, ViewerError::Validation(_)));
}

#[test]
fn chat_rejection_carries_the_endpoint_message() {
    let (url, _server) = serve_once(400, "application/json", br#"{"error":"Invalid messages format"}"#.to_vec());
    let client = ChatClient::new(&url, TIMEOUT).unwrap();
    let err = client.send(&[ChatMessage::user("hi")], &mut |_| {}).unwrap_err();
    assert_eq!(err.to_string(), "Invalid messages format");
}

#[test]
fn speech_request_uses_the_settings() {
    let audio = b"RIFF\0\0\0\0WAVE".to_vec();
    let (url, server) = serve_once(200, "audio/wav", audio.clone());
    let client = TtsClient::new(&url, TIMEOUT).unwrap();
    let settings = TtsSettings {
        voice_key: "fa_IR-amir-medium".to_string(),
        speed: 1.3,
        volume: 0.5,
    };

    let bytes = client.synthesize("**Kidneys** are *fine*", &settings).unwrap();
    assert_eq!(bytes, audio);

    let body: serde_json::Value = serde_json::from_slice(&server.join().unwrap().body).unwrap();
    assert_eq!(body["text"], "Kidneys are fine");
    assert_eq!(body["voice_key"], "fa_IR-amir-medium");
    assert!((body["speed"].as_f64().unwrap() - 1.3).abs() < 1e-6);
}

#[test]
fn speech_service_failure_reports_the_status() {
    let (url, _server) = serve_once(503, "text/plain", b"busy".to_vec());
    let client = TtsClient::new(&url, TIMEOUT).unwrap();
    let err = client.synthesize("hello", &TtsSettings::default()).unwrap_err();
    assert!(matches!(err, ViewerError::Network(_)));
    assert_eq!(err.to_string(), "TTS service failed with status 503");
}

#[test]
fn nothing_to_read_aloud() {
    let client = TtsClient::new("http://127.0.0.1:9/synthesize", TIMEOUT).unwrap();
    let err = client.synthesize("***", &TtsSettings::default()).unwrap_err();
    assert!(matches!(err, ViewerError::Validation(_)));
}
