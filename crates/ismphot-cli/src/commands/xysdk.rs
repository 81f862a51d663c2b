use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use ismphot_core::config::IsmConfig;
use ismphot_core::discover::discover_source_lists;
use ismphot_core::xysdk::smoothed_xysdk_coeffs;

use super::open_context;

#[derive(Args)]
pub struct XysdkArgs {
    /// Source lists (.fistar) or directories containing them
    #[arg(required = true)]
    pub inputs: Vec<PathBuf>,

    /// Write .xysdk files here instead of beside each source list
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,
}

/// Fit smoothed shape coefficients for every source list.
pub fn run(args: &XysdkArgs, config: IsmConfig) -> Result<()> {
    let ctx = open_context(config)?;
    let mut lists = Vec::new();
    for input in &args.inputs {
        if input.is_dir() {
            lists.extend(discover_source_lists(input));
        } else {
            lists.push(input.clone());
        }
    }
    lists.sort();
    lists.dedup();
    let total = lists.len();

    let results = smoothed_xysdk_coeffs(lists, args.output_dir.as_deref(), &ctx);
    let failed: Vec<_> = results.iter().filter(|(_, out)| out.is_none()).collect();
    for (sources, _) in &failed {
        println!("{} -> (failed)", sources.display());
    }
    println!("Fitted {} of {total} source lists", total - failed.len());
    Ok(())
}
