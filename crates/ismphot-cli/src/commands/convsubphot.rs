use anyhow::Result;
use clap::Args;
use ismphot_core::config::IsmConfig;
use ismphot_core::discover::FrameKind;
use ismphot_core::newsource::{CatalogMatchFinder, NewSourceFinder};
use ismphot_core::reference::{ReferenceType, SubtractionDirection};
use ismphot_core::subtract::{convsubphot, DiffRequest};

use super::{open_context, FrameInputs};

#[derive(Args)]
pub struct ConvsubphotArgs {
    #[command(flatten)]
    pub frames: FrameInputs,

    /// Reference type to subtract (oneframe, onehour, onenight)
    #[arg(short = 't', long = "type", default_value = "onehour")]
    pub reference_type: ReferenceType,

    /// Subtract the science frame from the reference instead
    #[arg(long)]
    pub reverse: bool,

    /// Search the subtracted frames for new sources
    #[arg(long)]
    pub find_new_sources: bool,
}

pub fn run(args: &ConvsubphotArgs, config: IsmConfig) -> Result<()> {
    let ctx = open_context(config)?;
    let finder = CatalogMatchFinder::new(ctx.config.subtract.new_sources.clone());
    let new_sources: Option<&dyn NewSourceFinder> =
        if args.find_new_sources || ctx.config.subtract.find_new_sources {
            Some(&finder)
        } else {
            None
        };
    let request = DiffRequest {
        reference_type: args.reference_type,
        direction: if args.reverse {
            SubtractionDirection::Reverse
        } else {
            SubtractionDirection::Normal
        },
        new_sources,
    };

    let frames = args.frames.expand(FrameKind::Registered);
    let total = frames.len();
    let results = convsubphot(frames, request, &ctx);

    let mut ok = 0;
    for (frame, outcome) in &results {
        match outcome {
            Ok(artifact) => {
                ok += 1;
                println!("{} -> {}", frame.display(), artifact.photometry_output_path.display());
            }
            Err(e) => {
                println!("{}: {e}", frame.display());
                if let Some(partial) = e.partial_output() {
                    println!("  kept subtracted frame {}", partial.display());
                }
            }
        }
    }
    println!();
    println!("Subtracted {ok} of {total} frames");
    Ok(())
}
