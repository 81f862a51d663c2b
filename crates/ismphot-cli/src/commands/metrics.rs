use anyhow::Result;
use clap::Args;
use ismphot_core::config::IsmConfig;
use ismphot_core::discover::FrameKind;
use ismphot_core::photref::collect_quality_metrics;

use super::{open_context, FrameInputs};
use crate::summary;

#[derive(Args)]
pub struct MetricsArgs {
    #[command(flatten)]
    pub frames: FrameInputs,

    /// Scan directories for registered (-xtrns) frames
    #[arg(long)]
    pub registered: bool,

    /// Recompute instead of using the cache
    #[arg(long)]
    pub force: bool,

    /// Print the metrics as JSON
    #[arg(long)]
    pub json: bool,
}

pub fn run(args: &MetricsArgs, config: IsmConfig) -> Result<()> {
    let ctx = open_context(config)?;
    let kind = if args.registered {
        FrameKind::Registered
    } else {
        FrameKind::Original
    };
    let frames = args.frames.expand(kind);
    let metrics = collect_quality_metrics(&frames, args.force, &ctx);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&metrics)?);
    } else {
        summary::print_metrics_table(&metrics);
    }
    Ok(())
}
