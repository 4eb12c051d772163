use std::path::Path;

use anyhow::{Context as _, anyhow, bail};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use imagegen_client::{
    ClientConfig, EditImageRequest, EventSubscription, GenerateImageRequest, ImageStudio,
    ImageUpload, ImagesApi, ListImagesQuery, StreamEvent,
};
use tracing::{debug, info};

use crate::args::{Cli, Command, EditArgs, GalleryAction, GenerateArgs};

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = ClientConfig::from_env()?;
    if let Some(base_url) = cli.base_url {
        config = config.base_url(base_url);
    }
    let studio = ImageStudio::new(config)?;

    match cli.command {
        Command::Generate(args) => generate(&studio, args).await,
        Command::Edit(args) => edit(&studio, args).await,
        Command::Gallery { action } => gallery(studio.images(), action).await,
        Command::Health => health(studio.images()).await,
    }
}

async fn generate(studio: &ImageStudio, args: GenerateArgs) -> anyhow::Result<()> {
    let request = GenerateImageRequest::new(args.prompt)
        .size(args.size)
        .quality(args.quality);
    request.validate()?;
    info!(event = "cli.generate", size = %request.size, quality = %request.quality);
    let events = studio.subscribe_generation(&request);
    follow_stream(studio.images(), events, &args.out).await
}

async fn edit(studio: &ImageStudio, args: EditArgs) -> anyhow::Result<()> {
    let image = ImageUpload::from_path(&args.image)?;
    let mut request = EditImageRequest::new(args.prompt, image)
        .size(args.size)
        .quality(args.quality);
    if let Some(mask) = &args.mask {
        request = request.mask(ImageUpload::from_path(mask)?);
    }
    request.validate()?;
    info!(
        event = "cli.edit",
        size = %request.size,
        quality = %request.quality,
        has_mask = request.mask.is_some()
    );
    let events = studio.subscribe_edit(&request);
    follow_stream(studio.images(), events, &args.out).await
}

/// What the CLI does with one stream event.
#[derive(Debug, PartialEq)]
enum Step {
    Status(String),
    Preview(usize),
    Save(Vec<u8>),
    Fetch(String),
}

fn step_for(event: StreamEvent) -> anyhow::Result<Step> {
    match event {
        StreamEvent::Progress { data, .. } => Ok(Step::Status(match data {
            serde_json::Value::String(text) => text,
            serde_json::Value::Null => "working".to_string(),
            other => other.to_string(),
        })),
        StreamEvent::PartialImage { data, .. } => Ok(Step::Preview(data.len())),
        StreamEvent::Image { data, .. } => Ok(Step::Save(decode_image(&data)?)),
        StreamEvent::Complete {
            image_data: Some(data),
            ..
        } => Ok(Step::Save(decode_image(&data)?)),
        StreamEvent::Complete { metadata, .. } => {
            let id = metadata
                .as_ref()
                .and_then(|m| m.get("id"))
                .and_then(|id| id.as_str())
                .ok_or_else(|| anyhow!("completed without image data or an image id"))?;
            Ok(Step::Fetch(id.to_string()))
        }
        StreamEvent::Error { error, .. } => Err(anyhow!(error)),
    }
}

async fn follow_stream(
    images: &ImagesApi,
    mut events: EventSubscription,
    out: &Path,
) -> anyhow::Result<()> {
    let mut previews = 0usize;
    loop {
        let event = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                events.abort();
                eprintln!("cancelled");
                return Ok(());
            }
            event = events.next_event() => event,
        };
        let Some(event) = event else {
            bail!("stream ended before an image was received");
        };
        match step_for(event)? {
            Step::Status(text) => eprintln!("{text}"),
            Step::Preview(len) => {
                previews += 1;
                debug!(event = "cli.preview", index = previews as u64, base64_len = len as u64);
                eprintln!("preview {previews} received");
            }
            Step::Save(bytes) => {
                events.abort();
                return write_image(out, &bytes);
            }
            Step::Fetch(id) => {
                events.abort();
                let file = images
                    .file_by_id(&id)
                    .await
                    .with_context(|| format!("fetching image {id}"))?;
                return write_image(out, &file.bytes);
            }
        }
    }
}

async fn gallery(images: &ImagesApi, action: GalleryAction) -> anyhow::Result<()> {
    match action {
        GalleryAction::List {
            limit,
            offset,
            sort,
        } => {
            let records = images
                .list(&ListImagesQuery {
                    limit,
                    offset,
                    sort,
                })
                .await?;
            println!("{}", serde_json::to_string_pretty(&records)?);
            Ok(())
        }
        GalleryAction::Download { id, out } => {
            let file = images.file_by_id(&id).await?;
            write_image(&out, &file.bytes)
        }
    }
}

async fn health(images: &ImagesApi) -> anyhow::Result<()> {
    let status = images.health().await?;
    println!(
        "status: {} database: {}",
        status.status,
        status.database.as_deref().unwrap_or("n/a")
    );
    if !status.is_healthy() {
        bail!("service is unhealthy");
    }
    Ok(())
}

/// Decodes a base64 image, tolerating a `data:` URL prefix.
fn decode_image(data: &str) -> anyhow::Result<Vec<u8>> {
    let payload = match data.split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => data,
    };
    STANDARD
        .decode(payload.trim())
        .context("image data is not valid base64")
}

fn write_image(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    std::fs::write(path, bytes).with_context(|| format!("writing {}", path.display()))?;
    println!("{}", path.display());
    Ok(())
}
