//! Row sources: delimited files, zip archives of them, and static rows.
//!
//! A section's `source` string is a comma-separated list. Each entry is a
//! delimited text file, or a `.zip` archive whose every file entry is read
//! as its own source named `archive.zip!entry`.

mod delimited;

pub use delimited::{CsvRowSource, DataRow};

use crate::config::STATIC_SOURCE;
use crate::error::Result;
use std::fs::File;
use std::io::{self, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Parsed `source:` value of a section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSpec {
    /// One synthetic row built from the section's literals.
    Static,

    /// Files and archives, in listed order.
    Paths(Vec<PathBuf>),
}

impl SourceSpec {
    /// Split a configured source list. Blank entries are ignored.
    pub fn parse(source: &str) -> Self {
        if source.trim() == STATIC_SOURCE {
            return SourceSpec::Static;
        }
        SourceSpec::Paths(
            source
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(PathBuf::from)
                .collect(),
        )
    }
}

/// Something that can be opened as one row source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocator {
    /// A delimited text file on disk.
    File(PathBuf),

    /// One file entry of a zip archive.
    ArchiveEntry {
        archive: PathBuf,
        index: usize,
        name: String,
    },
}

impl SourceLocator {
    /// List the sources behind one configured path.
    ///
    /// Archives are enumerated up front; their entries are only decompressed
    /// when opened.
    pub fn expand(path: &Path) -> Result<Vec<SourceLocator>> {
        if !is_archive(path) {
            return Ok(vec![SourceLocator::File(path.to_path_buf())]);
        }

        let mut archive = zip::ZipArchive::new(File::open(path)?)?;
        let mut locators = Vec::with_capacity(archive.len());
        for index in 0..archive.len() {
            let entry = archive.by_index(index)?;
            if entry.is_dir() {
                continue;
            }
            locators.push(SourceLocator::ArchiveEntry {
                archive: path.to_path_buf(),
                index,
                name: format!("{}!{}", path.display(), entry.name()),
            });
        }
        debug!("{}: {} entries", path.display(), locators.len());
        Ok(locators)
    }

    /// Diagnostic name of the source.
    pub fn name(&self) -> String {
        match self {
            SourceLocator::File(path) => path.display().to_string(),
            SourceLocator::ArchiveEntry { name, .. } => name.clone(),
        }
    }

    /// Open the source and read its header.
    ///
    /// Archive entries are decompressed into an anonymous temporary file that
    /// disappears when the source is dropped.
    pub fn open(&self) -> Result<CsvRowSource<File>> {
        let file = match self {
            SourceLocator::File(path) => File::open(path)?,
            SourceLocator::ArchiveEntry { archive, index, .. } => {
                let mut archive = zip::ZipArchive::new(File::open(archive)?)?;
                let mut entry = archive.by_index(*index)?;
                let mut spool = tempfile::tempfile()?;
                io::copy(&mut entry, &mut spool)?;
                spool.seek(SeekFrom::Start(0))?;
                spool
            }
        };
        CsvRowSource::new(self.name(), file)
    }
}

fn is_archive(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("zip"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;

    fn write_zip(dir: &TempDir, name: &str, entries: &[(&str, &str)]) -> PathBuf {
        let path = dir.path().join(name);
        let mut writer = zip::ZipWriter::new(File::create(&path).unwrap());
        writer
            .add_directory("nested/", SimpleFileOptions::default())
            .unwrap();
        for (entry, body) in entries {
            writer
                .start_file(*entry, SimpleFileOptions::default())
                .unwrap();
            writer.write_all(body.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
        path
    }

    #[test]
    fn test_parse_source_list() {
        assert_eq!(SourceSpec::parse(" static "), SourceSpec::Static);
        assert_eq!(
            SourceSpec::parse("a.csv, dir/b.zip,,"),
            SourceSpec::Paths(vec![PathBuf::from("a.csv"), PathBuf::from("dir/b.zip")])
        );
    }

    #[test]
    fn test_plain_file_opens() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wells.csv");
        std::fs::write(&path, "UWI,NAME\n100,A\n").unwrap();

        let locators = SourceLocator::expand(&path).unwrap();
        assert_eq!(locators, vec![SourceLocator::File(path.clone())]);

        let mut src = locators[0].open().unwrap();
        assert_eq!(src.name(), path.display().to_string());
        assert_eq!(src.next_row().unwrap().unwrap().record.get(1), Some("A"));
    }

    #[test]
    fn test_archive_entries_become_sources() {
        let dir = TempDir::new().unwrap();
        let path = write_zip(
            &dir,
            "logs.zip",
            &[("one.csv", "A\n1\n"), ("nested/two.csv", "A\n2\n3\n")],
        );

        let locators = SourceLocator::expand(&path).unwrap();
        assert_eq!(locators.len(), 2);
        assert!(locators[1].name().ends_with("logs.zip!nested/two.csv"));

        let mut src = locators[1].open().unwrap();
        let mut values = Vec::new();
        while let Some(row) = src.next_row().unwrap() {
            values.push(row.record.get(0).unwrap().to_string());
        }
        assert_eq!(values, vec!["2", "3"]);
    }

    #[test]
    fn test_missing_file_fails_on_open() {
        let locator = SourceLocator::File(PathBuf::from("/nonexistent/x.csv"));
        assert!(locator.open().is_err());
    }

    #[test]
    fn test_corrupt_archive_fails_on_expand() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.zip");
        std::fs::write(&path, "not a zip").unwrap();
        assert!(SourceLocator::expand(&path).is_err());
    }
}
