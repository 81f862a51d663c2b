use anyhow::Result;
use clap::Args;
use ismphot_core::config::IsmConfig;
use ismphot_core::discover::FrameKind;
use ismphot_core::identity::resolve_identity;

use super::FrameInputs;
use crate::summary;

#[derive(Args)]
pub struct IdentifyArgs {
    #[command(flatten)]
    pub frames: FrameInputs,

    /// Scan directories for registered (-xtrns) frames
    #[arg(long)]
    pub registered: bool,
}

pub fn run(args: &IdentifyArgs, _config: IsmConfig) -> Result<()> {
    let kind = if args.registered {
        FrameKind::Registered
    } else {
        FrameKind::Original
    };
    let frames = args.frames.expand(kind);
    let mut failed = 0;
    for frame in &frames {
        let identity = resolve_identity(frame);
        if identity.is_err() {
            failed += 1;
        }
        summary::print_identity(frame, &identity);
    }
    println!();
    println!("{} frames, {} unresolved", frames.len(), failed);
    Ok(())
}
