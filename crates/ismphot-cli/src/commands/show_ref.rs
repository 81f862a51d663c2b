use anyhow::Result;
use clap::Args;
use ismphot_core::config::IsmConfig;
use ismphot_core::error::IsmError;
use ismphot_core::identity::FrameKey;
use ismphot_core::reference::ReferenceType;

use crate::summary;

#[derive(Args)]
pub struct ShowRefArgs {
    /// Project id
    #[arg(long)]
    pub project: u32,

    /// Field name, e.g. G1234+5678_abc
    #[arg(long)]
    pub field: String,

    /// CCD number
    #[arg(long)]
    pub ccd: u8,

    /// Include inactive references
    #[arg(long)]
    pub history: bool,
}

pub fn run(args: &ShowRefArgs, config: IsmConfig) -> Result<()> {
    let registry = ismphot_core::registry::Registry::open(&config.paths.registry_path)?;
    let key = FrameKey::new(args.project, args.field.clone(), args.ccd);

    if args.history {
        for reference in registry.astromref_history(&key)? {
            summary::print_astromref(&reference);
        }
        for reference_type in ReferenceType::ALL {
            for reference in registry.combined_ref_history(&key, reference_type)? {
                summary::print_combined_ref(&reference);
            }
        }
        return Ok(());
    }

    match registry.get_active_astromref(&key) {
        Ok(reference) => summary::print_astromref(&reference),
        Err(IsmError::NotFound { .. }) => println!("{key}: no active astrometric reference"),
        Err(e) => return Err(e.into()),
    }
    for reference_type in ReferenceType::ALL {
        match registry.get_active_combined_ref(&key, reference_type) {
            Ok(reference) => summary::print_combined_ref(&reference),
            Err(IsmError::NotFound { .. }) => {
                println!("{key}: no active {reference_type} photometric reference")
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}
