use imagegen_client::prelude::*;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), ClientError> {
    imagegen_client::init_observability();
    let studio = ImageStudio::from_env()?;

    let request = GenerateImageRequest::new("A watercolor fox reading under a lamp")
        .size(ImageSize::Square)
        .quality(ImageQuality::Low);
    request.validate()?;

    let mut events = studio.subscribe_generation(&request);
    while let Some(event) = events.next_event().await {
        match &event {
            StreamEvent::Progress { data, .. } => eprintln!("progress: {data}"),
            StreamEvent::PartialImage { data, .. } => eprintln!("preview: {} base64 chars", data.len()),
            StreamEvent::Image { data, .. } => println!("image: {} base64 chars", data.len()),
            StreamEvent::Complete { metadata, .. } => println!("complete: {metadata:?}"),
            StreamEvent::Error { error, .. } => eprintln!("stream error: {error}"),
        }
        if event.is_terminal() {
            break;
        }
    }
    Ok(())
}
