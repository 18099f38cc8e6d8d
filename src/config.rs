//! Run configuration, read from a TOML file.
//!
//! Every setting has a default, so an empty file (or no file) is a valid configuration.
//!
//! ```toml
//! input_dir = "data/input-zips"
//! output_dir = "data/output"
//! write_log = true
//!
//! [lookup]
//! practice_names = "data/lookup/extra.csv"
//!
//! [criteria]
//! low_ttr = 60
//! ```
use crate::classify::Criteria;
use qu::ick_use::*;
use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Directory holding one zip archive per clinic.
    pub input_dir: PathBuf,
    /// Where the reports are written.
    pub output_dir: PathBuf,
    /// Write every warning raised during the run to `run.log` in the output directory.
    pub write_log: bool,
    pub lookup: LookupPaths,
    pub criteria: Criteria,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            input_dir: "data/input-zips".into(),
            output_dir: "data/output".into(),
            write_log: false,
            lookup: LookupPaths::default(),
            criteria: Criteria::default(),
        }
    }
}

/// Locations of the reference tables.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LookupPaths {
    /// postcode -> CCG code
    pub postcodes: PathBuf,
    /// CCG code -> CCG name
    pub ccgs: PathBuf,
    /// practice code -> CCG name
    pub practices: PathBuf,
    /// practice name -> CCG name. Optional.
    pub practice_names: Option<PathBuf>,
}

impl Default for LookupPaths {
    fn default() -> Self {
        Self {
            postcodes: "data/lookup/ccgLookup.csv".into(),
            ccgs: "data/lookup/eccg.csv".into(),
            practices: "data/lookup/epraccur.csv".into(),
            practice_names: None,
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        fn inner(path: &Path) -> Result<Config> {
            let input = fs::read_to_string(path)?;
            Config::from_toml(&input)
        }
        let path = path.as_ref();
        inner(path).with_context(|| format!("loading config from \"{}\"", path.display()))
    }

    pub fn from_toml(input: &str) -> Result<Self> {
        toml::from_str(input).map_err(Into::into)
    }
}
