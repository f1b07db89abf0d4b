use anyhow::{bail, Context, Result};
use clap::Parser;
use ptz_sync::camera::{AxisDriver, CameraDriver};
use ptz_sync::cli::{self, Args, Command};
use ptz_sync::config::{AppConfig, CameraProtocol, SettlePolicy};
use ptz_sync::logging::init_logging;
use ptz_sync::mixer::session::WARM_UP;
use ptz_sync::mixer::SceneSwitcher;
use ptz_sync::SyncContext;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let paths = args.paths()?;
    init_logging(&args.log_level, &paths.log_dir())?;

    let config = AppConfig::load(&args.config)
        .await
        .with_context(|| format!("failed to load config {}", args.config.display()))?;
    let context = SyncContext::new(config, &paths, args.timeouts());
    let result = run(&context, &args).await;
    context.shutdown().await;
    result
}

async fn run(context: &SyncContext, args: &Args) -> Result<()> {
    let mixer_wait = WARM_UP + args.timeouts().request;
    match &args.command {
        Command::Scenes => {
            if !connect_mixer(context, mixer_wait).await {
                bail!("mixer not reachable");
            }
            print_json(&context.mixer().state())
        }
        Command::Presets { camera, all } => {
            let presets = if *all {
                context.get_presets(camera).await?
            } else {
                context.visible_presets(camera).await?
            };
            print_json(&presets)
        }
        Command::Position { camera } => print_json(&context.get_position(camera).await?),
        Command::Goto {
            camera,
            preset,
            preview_only,
        } => {
            if !connect_mixer(context, mixer_wait).await {
                tracing::warn!("mixer not connected, moving the camera only");
            }
            let outcome = context.goto(camera, preset, !preview_only).await?;
            print_json(&outcome)
        }
        Command::Thumbnail {
            camera,
            preset,
            refresh,
            output,
        } => {
            connect_mixer(context, mixer_wait).await;
            let payload = context.thumbnail(camera, preset, *refresh).await?;
            match output {
                Some(path) => {
                    let image = cli::decode_image(&payload)?;
                    tokio::fs::write(path, image)
                        .await
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    println!("{}", path.display());
                }
                None => println!("{payload}"),
            }
            Ok(())
        }
        Command::ClearThumbnails { camera } => {
            context.clear_thumbnails(camera).await?;
            Ok(())
        }
        Command::Snapshot { camera, output } => {
            let config = context.camera(camera)?;
            if config.protocol != CameraProtocol::Axis {
                bail!("camera {camera} is not an Axis camera");
            }
            let driver = AxisDriver::from_config(config, args.timeouts(), SettlePolicy::default())?;
            driver.connect().await?;
            let image = driver.snapshot().await?;
            tokio::fs::write(output, &image)
                .await
                .with_context(|| format!("failed to write {}", output.display()))?;
            println!("{}", output.display());
            Ok(())
        }
        Command::Watch => watch(context).await,
    }
}

/// True once the scene snapshot arrived within `limit`.
async fn connect_mixer(context: &SyncContext, limit: Duration) -> bool {
    let config = context.config().mixer_config.clone();
    if config.is_none() {
        return false;
    }
    if let Err(err) = context.mixer().apply_config(config).await {
        tracing::warn!(error = %err, "mixer connection failed");
        return false;
    }
    context.wait_for_mixer(limit).await
}

async fn watch(context: &SyncContext) -> Result<()> {
    let mut cameras = context.subscribe_camera_events();
    let mut mixer = context.subscribe_mixer();
    context.start().await;

    let followers: Vec<_> = context
        .config()
        .cameras
        .keys()
        .map(|camera_id| {
            let camera_id = camera_id.clone();
            let mut feed = context.subscribe_position(&camera_id);
            tokio::spawn(async move {
                while feed.changed().await.is_ok() {
                    if let Some(position) = *feed.borrow_and_update() {
                        tracing::info!(%camera_id, x = position.x, y = position.y, zoom = position.zoom, "position");
                    }
                }
            })
        })
        .collect();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = cameras.recv() => match event {
                Ok(event) => tracing::info!(?event, "camera event"),
                Err(RecvError::Lagged(skipped)) => tracing::warn!(skipped, "camera events dropped"),
                Err(RecvError::Closed) => break,
            },
            changed = mixer.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = mixer.borrow_and_update().clone();
                tracing::info!(
                    status = ?state.status,
                    program = state.program_scene.as_ref().map(|scene| scene.name.as_str()).unwrap_or("-"),
                    preview = state.preview_scene.as_ref().map(|scene| scene.name.as_str()).unwrap_or("-"),
                    scenes = state.scenes.len(),
                    "mixer state"
                );
            }
        }
    }

    for follower in followers {
        follower.abort();
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
