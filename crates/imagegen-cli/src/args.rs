use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use imagegen_client::model::SortOrder;
use imagegen_client::{ImageQuality, ImageSize};

#[derive(Parser, Debug)]
#[command(name = "imagegen", version, about = "Generate, edit and browse AI images")]
pub struct Cli {
    /// API base URL (overrides IMAGEGEN_API_BASE_URL)
    #[arg(long, global = true)]
    pub base_url: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Generate an image from a prompt, streaming previews
    Generate(GenerateArgs),
    /// Edit an existing PNG, optionally limited to a mask
    Edit(EditArgs),
    /// Browse stored images
    Gallery {
        #[command(subcommand)]
        action: GalleryAction,
    },
    /// Check API and database health
    Health,
}

#[derive(Args, Debug)]
pub struct GenerateArgs {
    /// Text description of the image
    #[arg(short, long)]
    pub prompt: String,
    #[arg(long, default_value_t = ImageSize::Square)]
    pub size: ImageSize,
    #[arg(long, default_value_t = ImageQuality::Auto)]
    pub quality: ImageQuality,
    /// Where to write the final PNG
    #[arg(short, long, default_value = "image.png")]
    pub out: PathBuf,
}

#[derive(Args, Debug)]
pub struct EditArgs {
    /// Description of the change
    #[arg(short, long)]
    pub prompt: String,
    /// Source PNG
    #[arg(long)]
    pub image: PathBuf,
    /// PNG whose transparent pixels mark the area to edit
    #[arg(long)]
    pub mask: Option<PathBuf>,
    #[arg(long, default_value_t = ImageSize::Square)]
    pub size: ImageSize,
    #[arg(long, default_value_t = ImageQuality::Auto)]
    pub quality: ImageQuality,
    #[arg(short, long, default_value = "edited.png")]
    pub out: PathBuf,
}

#[derive(Subcommand, Debug)]
pub enum GalleryAction {
    /// Print stored image records as JSON
    List {
        #[arg(long, default_value_t = 10)]
        limit: u32,
        #[arg(long, default_value_t = 0)]
        offset: u32,
        #[arg(long, default_value_t = SortOrder::Newest)]
        sort: SortOrder,
    },
    /// Save a stored image to disk
    Download {
        id: String,
        #[arg(short, long)]
        out: PathBuf,
    },
}
