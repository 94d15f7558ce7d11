use anyhow::{Context, Result};
use clap::Parser;
use eframe::egui;
use log::info;
use medassist_viewer::app::MedAssistApp;
use medassist_viewer::config::{Cli, Command, RenderArgs, ServiceConfig};
use medassist_viewer::render;
use medassist_viewer::source::{self, VolumeSource};
use medassist_viewer::worker::Services;
use reqwest::blocking::Client;

fn view(volume: Option<String>, config: &ServiceConfig) -> Result<()> {
    let services = Services::from_config(config).context("Failed to set up service clients")?;
    let initial = volume.as_deref().map(VolumeSource::parse);
    let native_options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default().with_inner_size([1280.0, 820.0]),
        ..Default::default()
    };
    eframe::run_native(
        "Medical Assistant Viewer",
        native_options,
        Box::new(move |cc| Ok(Box::new(MedAssistApp::new(cc, services, initial)))),
    )
    .map_err(|e| anyhow::anyhow!("{e}"))
}

fn render_to_file(args: &RenderArgs, config: &ServiceConfig) -> Result<()> {
    let source = VolumeSource::parse(&args.volume);
    let client = Client::builder().timeout(config.timeout()).build()?;
    let loaded = source::load(&source, &client).with_context(|| format!("Failed to load {source}"))?;
    let viewer = args.viewer_state()?;
    let frame = render::render_slice(&loaded.volume, viewer, args.slice)
        .with_context(|| format!("Failed to render {source}"))?;
    frame
        .save(&args.output)
        .with_context(|| format!("Failed to write {}", args.output.display()))?;
    info!("wrote {}x{} frame to {}", frame.width(), frame.height(), args.output.display());
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(cli.log_level())
        .try_init()
        .unwrap_or_else(|e| eprintln!("Error initializing logger: {e}"));

    match cli.command {
        Some(Command::Render(args)) => render_to_file(&args, &cli.services),
        Some(Command::View { volume }) => view(volume, &cli.services),
        None => view(None, &cli.services),
    }
}
