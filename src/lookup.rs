//! The reference tables used to map treatment plans to CCGs.
use crate::{config::LookupPaths, resolve::collapse_spaces, ArcStr};
use qu::ick_use::*;
use std::{collections::BTreeMap, fs, io, path::Path};

/// Lookups loaded once at the start of a run and never changed.
#[derive(Debug, Default, Clone)]
pub struct ReferenceTables {
    /// postcode -> CCG code
    postcodes: BTreeMap<ArcStr, ArcStr>,
    /// CCG code -> CCG name
    ccgs: BTreeMap<ArcStr, ArcStr>,
    /// practice code -> CCG name
    practices: BTreeMap<ArcStr, ArcStr>,
    /// practice name -> CCG name, for practices whose records have neither a usable code nor a
    /// postcode.
    practice_names: BTreeMap<ArcStr, ArcStr>,
}

impl ReferenceTables {
    /// Load all tables from disk. The practice name table is optional.
    pub fn load(paths: &LookupPaths) -> Result<Self> {
        let tables = Self::from_readers(
            open(&paths.postcodes)?,
            open(&paths.ccgs)?,
            open(&paths.practices)?,
            paths.practice_names.as_deref().map(open).transpose()?,
        )
        .context("loading reference tables")?;

        event!(
            Level::INFO,
            "Reference tables loaded: {} postcodes, {} CCGs, {} practices, {} practice names",
            tables.postcodes.len(),
            tables.ccgs.len(),
            tables.practices.len(),
            tables.practice_names.len()
        );
        Ok(tables)
    }

    /// Build the tables from comma-separated sources.
    ///
    /// Column layouts are
    ///
    ///  - postcodes: `postcode, CCG code`
    ///  - CCGs: `CCG code, CCG name`
    ///  - practices: `practice code, postcode, CCG code, CCG name`
    ///  - practice names: `practice name, CCG name`
    pub fn from_readers(
        postcodes: impl io::Read,
        ccgs: impl io::Read,
        practices: impl io::Read,
        practice_names: Option<impl io::Read>,
    ) -> Result<Self> {
        let mut postcode_table: BTreeMap<ArcStr, ArcStr> = BTreeMap::new();
        for (postcode, ccg) in load_pairs(postcodes, 0, 1).context("postcode table")? {
            postcode_table.insert(collapse_spaces(&postcode).into(), ccg);
        }
        Ok(Self {
            postcodes: postcode_table,
            ccgs: load_pairs(ccgs, 0, 1).context("CCG table")?.collect(),
            practices: load_pairs(practices, 0, 3).context("practice table")?.collect(),
            practice_names: match practice_names {
                Some(rdr) => load_pairs(rdr, 0, 1).context("practice name table")?.collect(),
                None => BTreeMap::new(),
            },
        })
    }

    pub fn ccg_for_practice(&self, practice_code: &str) -> Option<&ArcStr> {
        self.practices.get(practice_code)
    }

    /// Goes via the CCG code. Both lookups must succeed.
    pub fn ccg_for_postcode(&self, postcode: &str) -> Option<&ArcStr> {
        let code = self.postcodes.get(postcode)?;
        self.ccgs.get(&**code)
    }

    pub fn ccg_for_practice_name(&self, practice_name: &str) -> Option<&ArcStr> {
        self.practice_names.get(practice_name)
    }
}

fn open(path: &Path) -> Result<fs::File> {
    fs::File::open(path).with_context(|| format!("opening \"{}\"", path.display()))
}

/// Read `(key, value)` pairs from two columns of a headerless csv.
///
/// A header row, if there is one, only maps its own column names so is harmless. Rows where
/// either the key or the value are empty are skipped, because an empty CCG is no CCG.
fn load_pairs(
    reader: impl io::Read,
    key_col: usize,
    value_col: usize,
) -> Result<impl Iterator<Item = (ArcStr, ArcStr)>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);
    let mut pairs = vec![];
    for record in rdr.records() {
        let record = record?;
        match (record.get(key_col), record.get(value_col)) {
            (Some(key), Some(value)) if !key.is_empty() && !value.is_empty() => {
                pairs.push((ArcStr::from(key), ArcStr::from(value)))
            }
            _ => (),
        }
    }
    Ok(pairs.into_iter())
}
