use anyhow::Result;
use clap::Args;
use ismphot_core::config::IsmConfig;
use ismphot_core::discover::FrameKind;
use ismphot_core::photref::select_candidates;

use super::{open_context, FrameInputs, KeyFilter};
use crate::summary;

#[derive(Args)]
pub struct SelectArgs {
    #[command(flatten)]
    pub frames: FrameInputs,

    #[command(flatten)]
    pub filter: KeyFilter,

    /// Override the minimum number of candidates
    #[arg(long)]
    pub min_frames: Option<usize>,

    /// Override the maximum |hour angle|
    #[arg(long)]
    pub max_hour_angle: Option<f64>,

    /// Override the maximum zenith distance
    #[arg(long)]
    pub max_zenith_distance: Option<f64>,

    /// Recompute frame metrics instead of using the cache
    #[arg(long)]
    pub force: bool,
}

/// Select photometric reference candidates per (project, field, CCD).
pub fn run(args: &SelectArgs, config: IsmConfig) -> Result<()> {
    let mut thresholds = config.photref.clone();
    if let Some(n) = args.min_frames {
        thresholds.min_frames = n;
    }
    if let Some(ha) = args.max_hour_angle {
        thresholds.max_hour_angle = ha;
    }
    if let Some(z) = args.max_zenith_distance {
        thresholds.max_zenith_distance = z;
    }

    let ctx = open_context(config)?;
    let frames = args.frames.expand(FrameKind::Registered);
    let groups = args.filter.groups(frames, &ctx);
    if groups.is_empty() {
        println!("No resolvable registered frames found");
        return Ok(());
    }

    for (key, frames) in &groups {
        let set = select_candidates(frames, &thresholds, args.force, &ctx);
        summary::print_candidate_set(&key.to_string(), &set);
    }
    Ok(())
}
