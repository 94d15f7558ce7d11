//! Command line and environment configuration.

use crate::error::{ViewerError, ViewerResult};
use crate::slice::Orientation;
use crate::view::{Rotation, ViewerState};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

/// Medical assistant NIfTI viewer.
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Verbose output (can be specified multiple times).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(flatten)]
    pub services: ServiceConfig,

    #[command(subcommand)]
    pub command: Option<Command>,
}

impl Cli {
    pub fn log_level(&self) -> log::LevelFilter {
        match self.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            2 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    }
}

/// Endpoints of the collaborating services.
#[derive(Debug, Clone, Args)]
pub struct ServiceConfig {
    /// Segmentation backend serving `/segment` and `/annotate-segment`.
    #[arg(long, env = "MEDASSIST_BACKEND_URL", default_value = "http://localhost:8000", global = true)]
    pub backend_url: String,

    /// Streaming chat endpoint.
    #[arg(long, env = "MEDASSIST_CHAT_URL", default_value = "http://localhost:3000/api/chat", global = true)]
    pub chat_url: String,

    /// Speech synthesis endpoint.
    #[arg(
        long,
        env = "MEDASSIST_TTS_URL",
        default_value = "http://localhost:8001/api/tts/synthesize",
        global = true
    )]
    pub tts_url: String,

    /// Request timeout in seconds; segmentation can take minutes.
    #[arg(long, default_value_t = 300, global = true)]
    pub timeout_secs: u64,
}

impl ServiceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Open the interactive viewer (the default).
    View {
        /// Volume to open: a `.nii`/`.nii.gz` path or an http(s) URL.
        volume: Option<String>,
    },
    /// Render one slice to a PNG without opening a window.
    Render(RenderArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OrientationArg {
    #[default]
    Axial,
    Sagittal,
    Coronal,
}

impl From<OrientationArg> for Orientation {
    fn from(arg: OrientationArg) -> Self {
        match arg {
            OrientationArg::Axial => Orientation::Axial,
            OrientationArg::Sagittal => Orientation::Sagittal,
            OrientationArg::Coronal => Orientation::Coronal,
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct RenderArgs {
    /// Volume to render: a path or an http(s) URL.
    pub volume: String,

    /// Output PNG.
    #[arg(short, long)]
    pub output: PathBuf,

    #[arg(long, value_enum, default_value_t)]
    pub orientation: OrientationArg,

    /// Slice index; the middle slice when omitted.
    #[arg(long, allow_negative_numbers = true)]
    pub slice: Option<i64>,

    #[arg(long, default_value_t = 200.0)]
    pub window_width: f32,

    #[arg(long, default_value_t = 100.0)]
    pub window_level: f32,

    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    pub brightness: f32,

    #[arg(long, default_value_t = 1.0)]
    pub contrast: f32,

    #[arg(long, default_value_t = 1.0)]
    pub zoom: f32,

    /// Clockwise rotation in degrees: 0, 90, 180 or 270.
    #[arg(long, default_value_t = 0)]
    pub rotation: u16,
}

impl RenderArgs {
    /// Viewer state for the render. The slice index is validated separately
    /// against the volume.
    pub fn viewer_state(&self) -> ViewerResult<ViewerState> {
        let rotation = match self.rotation {
            0 => Rotation::Deg0,
            90 => Rotation::Deg90,
            180 => Rotation::Deg180,
            270 => Rotation::Deg270,
            other => {
                return Err(ViewerError::Validation(format!(
                    "rotation must be 0, 90, 180 or 270, got {other}"
                )))
            }
        };
        Ok(ViewerState {
            orientation: self.orientation.into(),
            rotation,
            window_width: self.window_width.max(1.0),
            window_level: self.window_level,
            brightness: self.brightness,
            contrast: self.contrast,
            ..ViewerState::default()
        }
        .zoomed(self.zoom))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn render_arguments() {
        let cli = Cli::try_parse_from([
            "medassist",
            "-vv",
            "render",
            "ct.nii.gz",
            "-o",
            "out.png",
            "--orientation",
            "coronal",
            "--slice",
            "3",
            "--rotation",
            "90",
            "--backend-url",
            "http://seg:9000",
        ])
        .unwrap();
        assert_eq!(cli.log_level(), log::LevelFilter::Debug);
        assert_eq!(cli.services.backend_url, "http://seg:9000");
        let Some(Command::Render(args)) = cli.command else {
            panic!("expected render");
        };
        assert_eq!(args.slice, Some(3));
        let state = args.viewer_state().unwrap();
        assert_eq!(state.orientation, Orientation::Coronal);
        assert_eq!(state.rotation, Rotation::Deg90);
        assert_eq!(state.window_width, 200.0);
    }

    #[test]
    fn bad_rotation_is_rejected() {
        let cli = Cli::try_parse_from(["medassist", "render", "a.nii", "-o", "b.png", "--rotation", "45"]).unwrap();
        let Some(Command::Render(args)) = cli.command else {
            panic!("expected render");
        };
        assert!(matches!(args.viewer_state(), Err(ViewerError::Validation(_))));
    }

    #[test]
    fn no_subcommand_means_view() {
        let cli = Cli::try_parse_from(["medassist"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.log_level(), log::LevelFilter::Warn);
    }
}
