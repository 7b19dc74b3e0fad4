use std::path::PathBuf;

use clap::Parser;

use crate::{
    engine::SessionOptions,
    pipeline::{CameraConstraints, FacingMode},
    types::{JewelryAsset, JewelryCategory},
};

#[derive(Parser, Debug, Clone)]
#[command(name = "jewelry-tryon")]
#[command(author, version, about = "Live camera try-on for earrings, necklaces, rings and bangles", long_about = None)]
pub struct TryOnArgs {
    /// Jewelry image, an http(s) URL or a local path (transparent PNG works best)
    #[arg(long)]
    pub image: String,

    /// Jewelry category: earrings, necklaces, rings or bangles
    #[arg(long)]
    pub category: JewelryCategory,

    /// Product name, used for the exported file name
    #[arg(long, default_value = "jewelry")]
    pub name: String,

    /// Camera index
    #[arg(long, env = "TRYON_CAMERA_INDEX", default_value_t = 0)]
    pub camera: u32,

    /// Which camera to prefer where the platform reports facing
    #[arg(long, value_enum, default_value_t = FacingMode::User)]
    pub facing: FacingMode,

    /// Mirror the preview (default)
    #[arg(long, overrides_with = "no_mirror")]
    pub mirror: bool,

    /// Show the camera unmirrored
    #[arg(long, overrides_with = "mirror")]
    pub no_mirror: bool,

    /// Directory captures are written to
    #[arg(long, env = "TRYON_EXPORT_DIR", default_value = "exports")]
    pub export_dir: PathBuf,

    /// Directory holding (or receiving) the ONNX landmark models
    #[arg(long, env = "TRYON_MODEL_DIR", default_value = "models")]
    pub model_dir: PathBuf,

    /// Run without a window: render a few frames, capture once and exit
    #[arg(long)]
    pub headless: bool,

    /// Render ticks before the headless capture
    #[arg(long, default_value_t = 90)]
    pub headless_frames: u32,
}

impl TryOnArgs {
    pub fn asset(&self) -> JewelryAsset {
        JewelryAsset {
            image_url: self.image.clone(),
            category: self.category,
            name: self.name.clone(),
        }
    }

    pub fn mirrored(&self) -> bool {
        self.mirror || !self.no_mirror
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            constraints: CameraConstraints {
                facing: self.facing,
                ..CameraConstraints::default()
            },
            mirrored: self.mirrored(),
            export_dir: self.export_dir.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<TryOnArgs, clap::Error> {
        TryOnArgs::try_parse_from(std::iter::once("jewelry-tryon").chain(args.iter().copied()))
    }

    #[test]
    fn minimal_arguments_use_defaults() {
        let args = parse(&["--image", "ring.png", "--category", "rings"]).unwrap();
        assert_eq!(args.category, JewelryCategory::Rings);
        assert_eq!(args.name, "jewelry");
        assert!(args.mirrored());
        assert!(!args.headless);
        assert_eq!(args.headless_frames, 90);

        let options = args.session_options();
        assert!(options.mirrored);
        assert_eq!(options.constraints, CameraConstraints::default());
    }

    #[test]
    fn asset_carries_the_product() {
        let args = parse(&[
            "--image",
            "https://example.com/hoops.png",
            "--category",
            "Earrings",
            "--name",
            "Gold Hoops",
        ])
        .unwrap();
        assert_eq!(
            args.asset(),
            JewelryAsset {
                image_url: "https://example.com/hoops.png".to_string(),
                category: JewelryCategory::Earrings,
                name: "Gold Hoops".to_string(),
            }
        );
    }

    #[test]
    fn last_mirror_flag_wins() {
        let base = ["--image", "a.png", "--category", "bangles"];
        let off = parse(&[&base[..], &["--no-mirror"]].concat()).unwrap();
        assert!(!off.mirrored());
        let on = parse(&[&base[..], &["--no-mirror", "--mirror"]].concat()).unwrap();
        assert!(on.mirrored());
    }

    #[test]
    fn unknown_category_is_rejected() {
        assert!(parse(&["--image", "a.png", "--category", "tiaras"]).is_err());
        assert!(parse(&["--category", "rings"]).is_err());
    }

    #[test]
    fn facing_reaches_the_constraints() {
        let args = parse(&[
            "--image",
            "a.png",
            "--category",
            "necklaces",
            "--facing",
            "environment",
        ])
        .unwrap();
        assert_eq!(args.session_options().constraints.facing, FacingMode::Environment);
    }
}
