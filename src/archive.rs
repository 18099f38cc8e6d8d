//! Getting the patient and INR files out of a clinic's zip archive.
use crate::Diagnostics;
use itertools::Itertools;
use qu::ick_use::*;
use std::{
    fmt,
    io::{self, Read},
    path::Path,
};

/// What a file inside an archive contains, going by its name.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FileRole {
    Inr,
    Patient,
    Unknown,
}

impl FileRole {
    /// Names containing "inr" are INR files, otherwise names containing "pat" are patient
    /// files. Case-insensitive, and only the file name is looked at, not any directory.
    pub fn from_name(name: &str) -> Self {
        let file_name = Path::new(name)
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_else(|| name.to_lowercase());
        if file_name.contains("inr") {
            FileRole::Inr
        } else if file_name.contains("pat") {
            FileRole::Patient
        } else {
            FileRole::Unknown
        }
    }
}

impl fmt::Display for FileRole {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FileRole::Inr => f.write_str("INR"),
            FileRole::Patient => f.write_str("patient"),
            FileRole::Unknown => f.write_str("unknown"),
        }
    }
}

/// The two files we need from an archive, read into memory.
#[derive(Debug)]
pub struct ArchiveMembers {
    pub inr_name: String,
    pub inr: Vec<u8>,
    pub patient_name: String,
    pub patients: Vec<u8>,
}

/// Why an archive can't be processed. The run carries on without it.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct IncompleteArchive {
    pub inr_files: Vec<String>,
    pub patient_files: Vec<String>,
}

impl fmt::Display for IncompleteArchive {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "expected exactly 1 INR file and 1 patient file, found {} INR ({}) and {} patient ({})",
            self.inr_files.len(),
            self.inr_files.iter().join(", "),
            self.patient_files.len(),
            self.patient_files.iter().join(", "),
        )
    }
}

impl ArchiveMembers {
    /// Read the INR and patient files from a zip archive.
    ///
    /// Files with an unknown role are reported to `diagnostics` and ignored. The outer `Result`
    /// is for broken archives, the inner one for archives without exactly one file of each role.
    pub fn from_zip(
        archive_name: &str,
        reader: impl io::Read + io::Seek,
        diagnostics: &mut Diagnostics,
    ) -> Result<Result<Self, IncompleteArchive>> {
        let mut ar = zip::ZipArchive::new(reader)?;
        let mut inr = vec![];
        let mut patients = vec![];

        for i in 0..ar.len() {
            let mut file = ar.by_index(i)?;
            if file.is_dir() {
                continue;
            }
            let name = file.name().to_owned();
            let role = FileRole::from_name(&name);
            event!(Level::DEBUG, "{} in {} is {}", name, archive_name, role);
            let slot = match role {
                FileRole::Inr => &mut inr,
                FileRole::Patient => &mut patients,
                FileRole::Unknown => {
                    diagnostics.warn(format!(
                        "{} in {} not recognised as inr or patient",
                        name, archive_name
                    ));
                    continue;
                }
            };
            let mut contents = vec![];
            file.read_to_end(&mut contents)
                .with_context(|| format!("reading \"{}\"", name))?;
            slot.push((name, contents));
        }

        if inr.len() != 1 || patients.len() != 1 {
            return Ok(Err(IncompleteArchive {
                inr_files: inr.into_iter().map(|(name, _)| name).collect(),
                patient_files: patients.into_iter().map(|(name, _)| name).collect(),
            }));
        }
        let (inr_name, inr) = inr.remove(0);
        let (patient_name, patients) = patients.remove(0);
        Ok(Ok(Self {
            inr_name,
            inr,
            patient_name,
            patients,
        }))
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use std::io::{Cursor, Write};

    /// Build a zip archive in memory.
    pub(crate) fn zip(files: &[(&str, &str)]) -> Cursor<Vec<u8>> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, contents) in files {
            writer
                .start_file(*name, zip::write::FileOptions::default())
                .unwrap();
            writer.write_all(contents.as_bytes()).unwrap();
        }
        let mut cursor = writer.finish().unwrap();
        cursor.set_position(0);
        cursor
    }

    #[test]
    fn roles() {
        assert_eq!(FileRole::from_name("Clinic_INR_2017.txt"), FileRole::Inr);
        assert_eq!(FileRole::from_name("clinic_patients.txt"), FileRole::Patient);
        assert_eq!(FileRole::from_name("PATIENT.TXT"), FileRole::Patient);
        assert_eq!(FileRole::from_name("readme.txt"), FileRole::Unknown);
        // a name matching both is INR
        assert_eq!(FileRole::from_name("pat_inr.txt"), FileRole::Inr);
        // directory names don't count
        assert_eq!(FileRole::from_name("inr/readme.txt"), FileRole::Unknown);
    }

    #[test]
    fn members() {
        let ar = zip(&[
            ("export/INR.txt", "inr data"),
            ("export/Patients.txt", "patient data"),
            ("export/notes.txt", "hello"),
        ]);
        let mut diagnostics = Diagnostics::new();
        let members = ArchiveMembers::from_zip("a.zip", ar, &mut diagnostics)
            .unwrap()
            .unwrap();
        assert_eq!(members.inr_name, "export/INR.txt");
        assert_eq!(members.inr, b"inr data");
        assert_eq!(members.patients, b"patient data");
        assert_eq!(diagnostics.len(), 1);
    }

    #[test]
    fn missing_member() {
        let ar = zip(&[("INR.txt", "inr data"), ("other.txt", "")]);
        let incomplete = ArchiveMembers::from_zip("a.zip", ar, &mut Diagnostics::new())
            .unwrap()
            .unwrap_err();
        assert_eq!(incomplete.inr_files, vec!["INR.txt".to_string()]);
        assert!(incomplete.patient_files.is_empty());
    }

    #[test]
    fn two_of_a_kind() {
        let ar = zip(&[("INR.txt", ""), ("INR2.txt", ""), ("pat.txt", "")]);
        let incomplete = ArchiveMembers::from_zip("a.zip", ar, &mut Diagnostics::new())
            .unwrap()
            .unwrap_err();
        assert_eq!(incomplete.inr_files.len(), 2);
        assert_eq!(incomplete.patient_files.len(), 1);
    }

    #[test]
    fn declared_size_is_not_trusted() {
        let ar = zip(&[("INR.txt", "inr data"), ("pat.txt", "patient data")]);
        let mut raw = ar.into_inner();
        // claim the first file is nearly 4GB uncompressed
        let cd = raw.windows(4).position(|w| w == &b"PK\x01\x02"[..]).unwrap();
        raw[cd + 24..cd + 28].copy_from_slice(&0xffff_fff0u32.to_le_bytes());
        let ar = Cursor::new(raw);
        let members = ArchiveMembers::from_zip("a.zip", ar, &mut Diagnostics::new())
            .unwrap()
            .unwrap();
        assert_eq!(members.inr, b"inr data");
        assert_eq!(members.patients, b"patient data");
    }

    #[test]
    fn not_a_zip() {
        let ar = Cursor::new(b"not a zip file".to_vec());
        assert!(ArchiveMembers::from_zip("a.zip", ar, &mut Diagnostics::new()).is_err());
    }
}
