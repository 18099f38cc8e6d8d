//! Look up the CCG for a single practice, the same way plans are resolved in a run.
use clap::Parser;
use qu::ick_use::*;
use std::path::PathBuf;
use warfarin_ccg_audit::{
    resolve::{normalize_postcode, normalize_practice_code, resolve_fields},
    Config, ReferenceTables,
};

#[derive(Parser)]
struct Opt {
    /// Where to find the reference tables.
    #[clap(long, short)]
    config: Option<PathBuf>,
    /// The practice code, as it appears in the patient file.
    #[clap(long)]
    code: Option<String>,
    /// The GP postcode.
    #[clap(long, short)]
    postcode: Option<String>,
    /// The practice name.
    #[clap(long, short)]
    name: Option<String>,
}

#[qu::ick]
pub fn main(opt: Opt) -> Result {
    ensure!(
        opt.code.is_some() || opt.postcode.is_some() || opt.name.is_some(),
        "please supply at least one of --code, --postcode, --name"
    );
    let config = match &opt.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    let tables = ReferenceTables::load(&config.lookup)?;

    if let Some(code) = &opt.code {
        println!("practice code: {:?}", normalize_practice_code(code));
    }
    if let Some(postcode) = &opt.postcode {
        println!("postcode: {:?}", normalize_postcode(postcode));
    }
    if let Some(name) = &opt.name {
        println!("practice name: {:?}", name.trim());
    }

    match resolve_fields(
        opt.code.as_deref(),
        opt.postcode.as_deref(),
        opt.name.as_deref(),
        &tables,
    ) {
        Ok(resolution) => println!("{} (from {})", resolution.ccg, resolution.via),
        Err(reason) => println!("not resolved: {}", reason),
    }
    Ok(())
}
