use std::fs;
use std::path::{Path, PathBuf};
use crate::{AcxError, Result};

/// Maps source files under an input root onto output files under an output
/// root, and writes them without leaving partial files behind.
pub struct FileManager {
    input_root: PathBuf,
    output_root: PathBuf,
    extension: String,
}

impl FileManager {
    pub fn new(
        input_root: impl Into<PathBuf>,
        output_root: impl Into<PathBuf>,
        extension: impl Into<String>,
    ) -> Self {
        Self {
            input_root: input_root.into(),
            output_root: output_root.into(),
            extension: extension.into().trim_start_matches('.').to_string(),
        }
    }

    /// `output_root / relative_dir / stem [+ "_part{N}"] . extension`.
    ///
    /// `part` is the 1-based segment index, or `None` for an unsplit track.
    pub fn output_path(&self, source: &Path, part: Option<usize>) -> Result<PathBuf> {
        let relative = source.strip_prefix(&self.input_root).map_err(|_| {
            AcxError::Config(format!(
                "{} is not under input root {}",
                source.display(),
                self.input_root.display()
            ))
        })?;
        let stem = relative
            .file_stem()
            .ok_or_else(|| AcxError::Config(format!("{} has no file name", source.display())))?;

        let mut name = stem.to_os_string();
        if let Some(part) = part {
            name.push(format!("_part{}", part));
        }
        name.push(".");
        name.push(&self.extension);

        let mut out = self.output_root.clone();
        if let Some(parent) = relative.parent().filter(|p| !p.as_os_str().is_empty()) {
            out.push(parent);
        }
        out.push(name);
        Ok(out)
    }

    /// Output paths for a track split into `segments` parts.
    pub fn output_paths(&self, source: &Path, segments: usize) -> Result<Vec<PathBuf>> {
        if segments <= 1 {
            return Ok(vec![self.output_path(source, None)?]);
        }
        (1..=segments)
            .map(|part| self.output_path(source, Some(part)))
            .collect()
    }

    /// Creating a directory that already exists is not an error, including
    /// when another worker creates it concurrently.
    pub fn ensure_directory(&self, path: impl AsRef<Path>) -> Result<()> {
        fs::create_dir_all(path.as_ref())?;
        Ok(())
    }

    /// A temporary file in `dest`'s directory, creating the directory first.
    /// Write to [`StagedFile::path`], then [`StagedFile::commit`] to rename it
    /// into place.
    pub fn stage(&self, dest: &Path) -> Result<StagedFile> {
        let dir = dest
            .parent()
            .ok_or_else(|| AcxError::Config(format!("{} has no parent directory", dest.display())))?;
        self.ensure_directory(dir)?;

        let temp = tempfile::Builder::new()
            .prefix(".acx-")
            .suffix(".partial")
            .tempfile_in(dir)?;
        Ok(StagedFile {
            temp,
            dest: dest.to_path_buf(),
        })
    }
}

/// An output being written. Dropping it without committing removes the
/// temporary file, so a failed encode never leaves a partial output.
pub struct StagedFile {
    temp: tempfile::NamedTempFile,
    dest: PathBuf,
}

impl StagedFile {
    pub fn path(&self) -> &Path {
        self.temp.path()
    }

    pub fn commit(self) -> Result<PathBuf> {
        self.temp.persist(&self.dest).map_err(|e| AcxError::Io(e.error))?;
        Ok(self.dest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn manager() -> FileManager {
        FileManager::new("/in", "/out", "mp3")
    }

    #[test]
    fn unsplit_track_mirrors_relative_path() {
        let path = manager().output_path(Path::new("/in/book/ch01.wav"), None).unwrap();
        assert_eq!(path, PathBuf::from("/out/book/ch01.mp3"));
    }

    #[test]
    fn parts_get_one_based_suffix() {
        let paths = manager().output_paths(Path::new("/in/ch02.MP3"), 2).unwrap();
        assert_eq!(
            paths,
            vec![PathBuf::from("/out/ch02_part1.mp3"), PathBuf::from("/out/ch02_part2.mp3")]
        );
    }

    #[test]
    fn only_last_extension_is_replaced() {
        let path = manager().output_path(Path::new("/in/vol.1.final.wav"), None).unwrap();
        assert_eq!(path, PathBuf::from("/out/vol.1.final.mp3"));
    }

    #[test]
    fn source_outside_root_is_rejected() {
        assert!(manager().output_path(Path::new("/elsewhere/a.mp3"), None).is_err());
    }

    #[test]
    fn staged_file_creates_parents_and_renames() {
        let dir = tempfile::tempdir().unwrap();
        let files = FileManager::new(dir.path(), dir.path(), "mp3");
        let dest = dir.path().join("nested/deeper/out.mp3");

        let staged = files.stage(&dest).unwrap();
        assert_ne!(staged.path(), dest.as_path());
        assert_eq!(staged.path().parent(), dest.parent());
        fs::write(staged.path(), b"frames").unwrap();
        assert!(!dest.exists());
        assert_eq!(staged.commit().unwrap(), dest);
        assert_eq!(fs::read(&dest).unwrap(), b"frames");

        // existing directory and existing output are fine the second time around
        let staged = files.stage(&dest).unwrap();
        fs::write(staged.path(), b"again").unwrap();
        staged.commit().unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"again");
    }

    #[test]
    fn abandoned_stage_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let files = FileManager::new(dir.path(), dir.path(), "mp3");
        let dest = dir.path().join("out.mp3");

        let staged = files.stage(&dest).unwrap();
        fs::write(staged.path(), b"half a frame").unwrap();
        drop(staged);

        assert!(!dest.exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
