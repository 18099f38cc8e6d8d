use clap::Parser;
use qu::ick_use::*;
use std::path::PathBuf;
use warfarin_ccg_audit::{batch, header, report, Config, ReferenceTables};

#[derive(Parser)]
struct Opt {
    /// A TOML file with settings. Without it everything takes its default.
    #[clap(long, short)]
    config: Option<PathBuf>,
    /// Directory of clinic archives to process.
    #[clap(long)]
    input_dir: Option<PathBuf>,
    /// Directory to write the reports to.
    #[clap(long)]
    output_dir: Option<PathBuf>,
    /// If set, allow overwriting existing reports in the output directory.
    #[clap(long)]
    overwrite: bool,
    /// Also write every warning raised during the run to `run.log`.
    #[clap(long)]
    log: bool,
}

#[qu::ick]
pub fn main(opt: Opt) -> Result {
    let mut config = match &opt.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(input_dir) = opt.input_dir {
        config.input_dir = input_dir;
    }
    if let Some(output_dir) = opt.output_dir {
        config.output_dir = output_dir;
    }
    config.write_log |= opt.log;

    let tables = ReferenceTables::load(&config.lookup)?;
    let agg = batch::run(&config.input_dir, &tables, &config.criteria)?;

    header("Archives");
    println!("{}", report::archive_table(&agg));
    let failures = agg.failures();
    println!(
        "{} plans could not be placed in a CCG:\n{}",
        failures.total(),
        serde_json::to_string_pretty(failures)?
    );

    header("Incidents by CCG");
    println!("{}", report::ccg_table(&agg));
    println!("total patients listed: {}", agg.patients().len());
    println!("distinct diagnoses: {}", agg.diagnoses().len());
    println!("warnings: {}", agg.diagnostics().len());

    let paths = report::write_all(&agg, &config.output_dir, opt.overwrite, config.write_log)?;
    header("Output");
    for path in paths {
        println!("{}", path.display());
    }
    Ok(())
}
