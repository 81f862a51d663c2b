use anyhow::Result;
use clap::Args;
use ismphot_core::astromref::generate_astromref;
use ismphot_core::config::IsmConfig;
use ismphot_core::discover::FrameKind;
use tracing::warn;

use super::{open_context, FrameInputs, KeyFilter};
use crate::summary;

#[derive(Args)]
pub struct AstromrefArgs {
    #[command(flatten)]
    pub frames: FrameInputs,

    #[command(flatten)]
    pub filter: KeyFilter,

    /// Comment stored with the registered reference
    #[arg(long, default_value = "")]
    pub comment: String,

    /// Recompute frame metrics instead of using the cache
    #[arg(long)]
    pub force: bool,
}

/// Select and register one astrometric reference per (project, field, CCD).
pub fn run(args: &AstromrefArgs, config: IsmConfig) -> Result<()> {
    let ctx = open_context(config)?;
    let frames = args.frames.expand(FrameKind::Original);
    let groups = args.filter.groups(frames, &ctx);

    if groups.is_empty() {
        println!("No resolvable frames found");
        return Ok(());
    }

    let mut registered = 0;
    for (key, frames) in &groups {
        match generate_astromref(frames, &args.comment, args.force, &ctx) {
            Ok(Some(reference)) => {
                registered += 1;
                summary::print_astromref(&reference);
            }
            Ok(None) => println!("{key}: no frame has usable metrics"),
            Err(e) => warn!(key = %key, error = %e, "Astrometric reference failed"),
        }
    }
    println!();
    println!("Registered {registered} of {} astrometric references", groups.len());
    Ok(())
}
