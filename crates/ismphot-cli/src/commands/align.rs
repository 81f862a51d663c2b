use anyhow::Result;
use clap::Args;
use ismphot_core::astromref::align_frames;
use ismphot_core::config::IsmConfig;
use ismphot_core::discover::FrameKind;

use super::{open_context, FrameInputs};

#[derive(Args)]
pub struct AlignArgs {
    #[command(flatten)]
    pub frames: FrameInputs,

    /// List every frame and its registered output
    #[arg(short, long)]
    pub list: bool,
}

/// Register frames onto the active astrometric reference of their key.
pub fn run(args: &AlignArgs, config: IsmConfig) -> Result<()> {
    let ctx = open_context(config)?;
    let frames = args.frames.expand(FrameKind::Original);
    let total = frames.len();
    let results = align_frames(frames, &ctx)?;

    let aligned = results.values().filter(|r| r.is_some()).count();
    if args.list {
        for (frame, registered) in &results {
            match registered {
                Some(out) => println!("{} -> {}", frame.display(), out.display()),
                None => println!("{} -> (failed)", frame.display()),
            }
        }
        println!();
    }
    println!("Aligned {aligned} of {total} frames");
    Ok(())
}
