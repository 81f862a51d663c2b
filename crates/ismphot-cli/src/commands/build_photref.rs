use anyhow::{bail, Result};
use clap::Args;
use ismphot_core::combined::build_combined_ref;
use ismphot_core::config::IsmConfig;
use ismphot_core::photref::load_candidate_set;
use ismphot_core::reference::ReferenceType;

use super::open_context;
use crate::summary;

#[derive(Args)]
pub struct BuildPhotrefArgs {
    /// Cache key printed by `select`
    pub cache_key: String,

    /// Reference type to build (oneframe, onehour, onenight)
    #[arg(short = 't', long = "type", default_value = "onehour")]
    pub reference_type: ReferenceType,
}

/// Convolve, stack and photometer a candidate set into a registered reference.
pub fn run(args: &BuildPhotrefArgs, config: IsmConfig) -> Result<()> {
    let ctx = open_context(config)?;
    let set = load_candidate_set(&args.cache_key, &ctx)?;
    if set.is_empty() {
        bail!(
            "Candidate set {} is empty: {}",
            args.cache_key,
            set.diagnostics.failure.as_deref().unwrap_or("no candidates")
        );
    }
    let reference = build_combined_ref(&set, args.reference_type, &ctx)?;
    summary::print_combined_ref(&reference);
    Ok(())
}
