use crate::error::{ProcessingError, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use zip::ZipArchive;

/// Extracts the CSV members of AIS ZIP archives into a managed temporary
/// directory. The directory and everything in it are removed when the
/// extractor is dropped, so extracted sources only live for one run.
pub struct ArchiveExtractor {
    temp_dir: TempDir,
}

impl ArchiveExtractor {
    pub fn new() -> Result<Self> {
        Ok(Self {
            temp_dir: TempDir::new()?,
        })
    }

    pub fn temp_dir_path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Extract every `.csv` member of the archive, returning their paths.
    /// An archive without any CSV member is an error; the caller should
    /// never silently convert nothing.
    pub fn extract_csv_files(&self, zip_path: &Path) -> Result<Vec<PathBuf>> {
        let file = File::open(zip_path)?;
        let mut archive = ZipArchive::new(file)
            .map_err(|e| ProcessingError::InvalidArchive(format!("{}: {}", zip_path.display(), e)))?;

        let mut extracted = Vec::new();

        for i in 0..archive.len() {
            let mut member = archive
                .by_index(i)
                .map_err(|e| ProcessingError::InvalidArchive(format!("{}: {}", zip_path.display(), e)))?;

            if !member.name().to_lowercase().ends_with(".csv") {
                continue;
            }

            // Flatten archive paths; AIS archives hold one CSV at the root
            // but some years nest it in a directory.
            let file_name = Path::new(member.name())
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .ok_or_else(|| {
                    ProcessingError::InvalidArchive(format!(
                        "unusable member name '{}' in {}",
                        member.name(),
                        zip_path.display()
                    ))
                })?;

            let dest_path = self.temp_dir.path().join(file_name);
            let dest_file = File::create(&dest_path)?;
            let mut writer = BufWriter::new(dest_file);
            std::io::copy(&mut member, &mut writer)?;
            writer.flush()?;

            tracing::info!(
                archive = %zip_path.display(),
                csv = %dest_path.display(),
                "extracted CSV from archive"
            );
            extracted.push(dest_path);
        }

        if extracted.is_empty() {
            return Err(ProcessingError::InvalidArchive(format!(
                "no CSV file found in {}",
                zip_path.display()
            )));
        }

        Ok(extracted)
    }
}

/// Find `.zip` archives in a directory, optionally filtered to names
/// containing `pattern`, sorted by filename for a stable processing order.
pub fn discover_archives(dir_path: &Path, pattern: Option<&str>) -> Result<Vec<PathBuf>> {
    if !dir_path.is_dir() {
        return Err(ProcessingError::InvalidArchive(format!(
            "Path is not a directory: {}",
            dir_path.display()
        )));
    }

    let mut archives = Vec::new();

    for entry in std::fs::read_dir(dir_path)? {
        let entry = entry?;
        let path = entry.path();

        if !path.is_file() || path.extension().map_or(true, |ext| ext != "zip") {
            continue;
        }

        if let Some(pattern) = pattern {
            if !pattern.is_empty() {
                match path.file_name().and_then(|n| n.to_str()) {
                    Some(name) if name.contains(pattern) => {}
                    _ => continue,
                }
            }
        }

        archives.push(path);
    }

    archives.sort();
    Ok(archives)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use zip::write::FileOptions;
    use zip::ZipWriter;

    fn create_zip(dir: &TempDir, name: &str, members: &[(&str, &str)]) -> PathBuf {
        let path = dir.path().join(name);
        let file = File::create(&path).unwrap();
        let mut writer = ZipWriter::new(file);

        for (member_name, content) in members {
            writer
                .start_file(*member_name, FileOptions::default())
                .unwrap();
            writer.write_all(content.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
        path
    }

    #[test]
    fn test_extracts_csv_members_only() {
        let dir = TempDir::new().unwrap();
        let zip_path = create_zip(
            &dir,
            "AIS_2017_02_Zone10.zip",
            &[
                ("AIS_2017_02_Zone10.csv", "MMSI,BaseDateTime\n"),
                ("readme.txt", "ignore me"),
            ],
        );

        let extractor = ArchiveExtractor::new().unwrap();
        let files = extractor.extract_csv_files(&zip_path).unwrap();

        assert_eq!(files.len(), 1);
        assert!(files[0].exists());
        assert_eq!(
            std::fs::read_to_string(&files[0]).unwrap(),
            "MMSI,BaseDateTime\n"
        );
    }

    #[test]
    fn test_archive_without_csv_is_error() {
        let dir = TempDir::new().unwrap();
        let zip_path = create_zip(&dir, "empty.zip", &[("notes.txt", "nothing here")]);

        let extractor = ArchiveExtractor::new().unwrap();
        assert!(extractor.extract_csv_files(&zip_path).is_err());
    }

    #[test]
    fn test_discover_archives_filters_and_sorts() {
        let dir = TempDir::new().unwrap();
        create_zip(&dir, "AIS_2017_02.zip", &[("a.csv", "x")]);
        create_zip(&dir, "AIS_2017_01.zip", &[("a.csv", "x")]);
        create_zip(&dir, "OTHER.zip", &[("a.csv", "x")]);
        std::fs::write(dir.path().join("not_a_zip.txt"), "x").unwrap();

        let all = discover_archives(dir.path(), None).unwrap();
        assert_eq!(all.len(), 3);

        let filtered = discover_archives(dir.path(), Some("AIS_")).unwrap();
        let names: Vec<_> = filtered
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["AIS_2017_01.zip", "AIS_2017_02.zip"]);
    }
}
