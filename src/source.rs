//! Where a volume comes from: a local file or an asset URL.

use crate::error::{ViewerError, ViewerResult};
use crate::intensity::IntensityStats;
use crate::segmentation::VolumeUpload;
use crate::volume::{self, Volume};
use log::info;
use reqwest::blocking::Client;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VolumeSource {
    Path(PathBuf),
    Url(String),
}

impl VolumeSource {
    /// `http(s)://` arguments are URLs, everything else is a path.
    pub fn parse(arg: &str) -> Self {
        if arg.starts_with("http://") || arg.starts_with("https://") {
            VolumeSource::Url(arg.to_string())
        } else {
            VolumeSource::Path(PathBuf::from(arg))
        }
    }

    /// Name the volume is uploaded under: the last path or URL segment,
    /// without any query string.
    pub fn file_name(&self) -> String {
        match self {
            VolumeSource::Path(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "volume.nii".to_string()),
            VolumeSource::Url(url) => {
                let path = url.split(['?', '#']).next().unwrap_or(url);
                path.rsplit('/')
                    .find(|s| !s.is_empty())
                    .filter(|s| !s.contains(':'))
                    .unwrap_or("volume.nii")
                    .to_string()
            }
        }
    }

    /// Read the raw bytes. `client` is only used for URLs.
    pub fn read(&self, client: &Client) -> ViewerResult<VolumeUpload> {
        let bytes = match self {
            VolumeSource::Path(path) => std::fs::read(path)?,
            VolumeSource::Url(url) => {
                let response = client.get(url).send()?;
                let status = response.status();
                if !status.is_success() {
                    return Err(ViewerError::Network(format!(
                        "failed to fetch {url}: status {}",
                        status.as_u16()
                    )));
                }
                response.bytes()?.to_vec()
            }
        };
        info!("read {} bytes from {self}", bytes.len());
        Ok(VolumeUpload {
            file_name: self.file_name(),
            bytes: Arc::new(bytes),
        })
    }
}

impl fmt::Display for VolumeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VolumeSource::Path(path) => write!(f, "{}", path.display()),
            VolumeSource::Url(url) => f.write_str(url),
        }
    }
}

impl From<&Path> for VolumeSource {
    fn from(path: &Path) -> Self {
        VolumeSource::Path(path.to_path_buf())
    }
}

/// A decoded volume together with the bytes it was decoded from, which the
/// segmentation requests upload again.
#[derive(Debug, Clone)]
pub struct LoadedVolume {
    pub upload: VolumeUpload,
    pub volume: Arc<Volume>,
    /// Whole-volume statistics, computed once off the UI thread.
    pub stats: IntensityStats,
}

impl LoadedVolume {
    pub fn from_upload(upload: VolumeUpload) -> ViewerResult<Self> {
        let volume = volume::decode(&upload.bytes)?;
        let stats = volume.intensity_stats();
        Ok(Self {
            upload,
            volume: Arc::new(volume),
            stats,
        })
    }
}

/// Read and decode a volume.
pub fn load(source: &VolumeSource, client: &Client) -> ViewerResult<LoadedVolume> {
    LoadedVolume::from_upload(source.read(client)?)
}
