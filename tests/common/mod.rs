#![allow(dead_code)]

use flate2::write::GzEncoder;
use flate2::Compression;
use image::{GrayImage, ImageFormat};
use std::io::{BufRead, BufReader, Cursor, Read, Write};
use std::net::TcpListener;
use std::thread::{self, JoinHandle};

/// Where the voxel data starts in the files built here.
pub const VOX_OFFSET: usize = 352;

/// Little-endian single-file NIfTI-1 image with the given voxel payload.
pub fn nifti(dims: [i16; 3], datatype: i16, bitpix: i16, payload: &[u8]) -> Vec<u8> {
    let mut bytes = vec![0u8; VOX_OFFSET];
    bytes[0..4].copy_from_slice(&348i32.to_le_bytes());
    let dim = [3, dims[0], dims[1], dims[2], 1, 1, 1, 1];
    for (i, d) in dim.iter().enumerate() {
        bytes[40 + 2 * i..42 + 2 * i].copy_from_slice(&d.to_le_bytes());
    }
    bytes[70..72].copy_from_slice(&datatype.to_le_bytes());
    bytes[72..74].copy_from_slice(&bitpix.to_le_bytes());
    let pixdim = [1.0f32, 0.8, 0.8, 2.5, 1.0, 1.0, 1.0, 1.0];
    for (i, p) in pixdim.iter().enumerate() {
        bytes[76 + 4 * i..80 + 4 * i].copy_from_slice(&p.to_le_bytes());
    }
    bytes[108..112].copy_from_slice(&(VOX_OFFSET as f32).to_le_bytes());
    bytes[344..348].copy_from_slice(b"n+1\0");
    bytes.extend_from_slice(payload);
    bytes
}

/// uint8 volume whose voxels count up from 0 in storage order.
pub fn counting_u8(dims: [i16; 3]) -> Vec<u8> {
    let count = dims.iter().map(|&d| d as usize).product::<usize>();
    let payload: Vec<u8> = (0..count).map(|v| v as u8).collect();
    nifti(dims, 2, 8, &payload)
}

pub fn gzip(bytes: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes).unwrap();
    encoder.finish().unwrap()
}

pub fn png(image: &GrayImage) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}

/// A request as the one-shot server received it.
#[derive(Debug)]
pub struct Captured {
    pub request_line: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Captured {
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Answer exactly one HTTP request on a local port. Returns the base URL
/// and a handle that yields the captured request.
pub fn serve_once(status: u16, content_type: &str, response: Vec<u8>) -> (String, JoinHandle<Captured>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let content_type = content_type.to_string();
    let handle = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());

        let mut request_line = String::new();
        reader.read_line(&mut request_line).unwrap();
        let mut headers = Vec::new();
        loop {
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            let line = line.trim_end();
            if line.is_empty() {
                break;
            }
            if let Some((name, value)) = line.split_once(':') {
                headers.push((name.trim().to_ascii_lowercase(), value.trim().to_string()));
            }
        }
        let header = |name: &str| headers.iter().find(|(k, _)| k == name).map(|(_, v)| v.clone());
        let body = if let Some(length) = header("content-length").and_then(|v| v.parse::<usize>().ok()) {
            let mut body = vec![0; length];
            reader.read_exact(&mut body).unwrap();
            body
        } else if header("transfer-encoding").is_some_and(|v| v.contains("chunked")) {
            read_chunked(&mut reader)
        } else {
            Vec::new()
        };

        write!(
            stream,
            "HTTP/1.1 {status} Test\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            response.len()
        )
        .unwrap();
        stream.write_all(&response).unwrap();
        stream.flush().unwrap();

        Captured {
            request_line: request_line.trim_end().to_string(),
            headers,
            body,
        }
    });
    (format!("http://{addr}"), handle)
}

fn read_chunked(reader: &mut impl BufRead) -> Vec<u8> {
    let mut body = Vec::new();
    loop {
        let mut size_line = String::new();
        reader.read_line(&mut size_line).unwrap();
        let size = usize::from_str_radix(size_line.trim().split(';').next().unwrap_or("0"), 16).unwrap();
        let mut chunk = vec![0; size + 2];
        reader.read_exact(&mut chunk).unwrap();
        if size == 0 {
            return body;
        }
        body.extend_from_slice(&chunk[..size]);
    }
}
