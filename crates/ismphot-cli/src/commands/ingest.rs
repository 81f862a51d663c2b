use std::path::Path;

use anyhow::Result;
use clap::Args;
use ismphot_core::config::IsmConfig;
use ismphot_core::discover::{resolve_frames, FrameKind};
use ismphot_core::ingest::{ingest_artifacts, IngestOutcome};
use ismphot_core::reference::{DifferenceArtifact, ReferenceType, SubtractionDirection};

use super::{open_context, FrameInputs};

#[derive(Args)]
pub struct IngestArgs {
    /// Registered frames whose difference photometry is ingested
    #[command(flatten)]
    pub frames: FrameInputs,

    /// Reference type the photometry was made against
    #[arg(short = 't', long = "type", default_value = "onehour")]
    pub reference_type: ReferenceType,

    /// Photometry from reversed subtraction
    #[arg(long)]
    pub reverse: bool,

    /// Replace photometry already in the database
    #[arg(long)]
    pub overwrite: bool,
}

pub fn run(args: &IngestArgs, config: IsmConfig) -> Result<()> {
    let ctx = open_context(config)?;
    let direction = if args.reverse {
        SubtractionDirection::Reverse
    } else {
        SubtractionDirection::Normal
    };

    let frames = args.frames.expand(FrameKind::Registered);
    let artifacts: Vec<DifferenceArtifact> = resolve_frames(frames, &ctx.pool, ctx.reporter())
        .into_iter()
        .map(|(frame, identity)| {
            let out_dir = ctx
                .config
                .subtract
                .output_dir
                .clone()
                .unwrap_or_else(|| frame.parent().unwrap_or_else(|| Path::new(".")).to_path_buf());
            DifferenceArtifact::planned(&frame, &identity, args.reference_type, direction, &out_dir)
        })
        .collect();

    let outcomes = ingest_artifacts(artifacts, args.overwrite, &ctx)?;
    let (mut inserted, mut replaced, mut conflicts, mut failed) = (0, 0, 0, 0);
    for (frame, outcome) in &outcomes {
        match outcome {
            Ok(IngestOutcome::Inserted { .. }) => inserted += 1,
            Ok(IngestOutcome::Replaced { .. }) => replaced += 1,
            Ok(IngestOutcome::Conflict) => conflicts += 1,
            Err(e) => {
                failed += 1;
                println!("{}: {e}", frame.display());
            }
        }
    }
    println!(
        "Inserted {inserted}, replaced {replaced}, skipped {conflicts} existing, {failed} failed"
    );
    Ok(())
}
