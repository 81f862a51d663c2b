use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use ismphot_core::config::IsmConfig;
use ismphot_core::photref::{amend_candidates, load_candidate_set};

use super::open_context;
use crate::summary;

#[derive(Args)]
pub struct AmendArgs {
    /// Cache key printed by `select`
    pub cache_key: String,

    /// Candidate frame to drop (repeatable)
    #[arg(short, long)]
    pub remove: Vec<PathBuf>,

    /// New master frame
    #[arg(short, long)]
    pub master: Option<PathBuf>,
}

pub fn run(args: &AmendArgs, config: IsmConfig) -> Result<()> {
    let ctx = open_context(config)?;
    let set = load_candidate_set(&args.cache_key, &ctx)?;
    let amended = amend_candidates(&set, &args.remove, args.master.as_deref(), &ctx)?;
    summary::print_candidate_set(&args.cache_key, &amended);
    Ok(())
}
