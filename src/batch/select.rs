//! Directory listing, file keys, and the file selection syntax.
//!
//! Files are keyed either by the number right before their extension
//! (`frame_0012.png` -> 12) or by their stem. Which one applies is decided once
//! per directory: numeric only if every file carries an index.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use image::ImageFormat;
use regex::Regex;
use walkdir::WalkDir;

use crate::error::{Error, Result};

static INDEX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d+)\.(?:png|jpe?g|webp)$").expect("valid index pattern")
});

static RANGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d*)-(\d*)$").expect("valid range pattern"));

/// How files in one directory are keyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexMode {
    Numeric,
    Stem,
}

impl IndexMode {
    /// `Numeric` when every path has an index, `Stem` otherwise (including no paths).
    #[must_use]
    pub fn detect(paths: &[PathBuf]) -> Self {
        if !paths.is_empty() && paths.iter().all(|p| file_index(p).is_some()) {
            Self::Numeric
        } else {
            Self::Stem
        }
    }

    /// Key of `path` under this mode.
    #[must_use]
    pub fn key(self, path: &Path) -> Option<FileKey> {
        match self {
            Self::Numeric => file_index(path).map(FileKey::Index),
            Self::Stem => path
                .file_stem()
                .and_then(|s| s.to_str())
                .map(|s| FileKey::Stem(s.to_string())),
        }
    }
}

/// Identity used to pair images with masks and to resolve selections.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FileKey {
    Index(u64),
    Stem(String),
}

impl std::fmt::Display for FileKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Index(i) => write!(f, "#{i}"),
            Self::Stem(s) => f.write_str(s),
        }
    }
}

/// Numeric index right before an image extension.
#[must_use]
pub fn file_index(path: &Path) -> Option<u64> {
    let name = path.file_name()?.to_str()?;
    INDEX_RE.captures(name)?.get(1)?.as_str().parse().ok()
}

/// Sorted image files of one directory, keyed under the directory's mode.
#[derive(Debug, Clone)]
pub struct DirectoryIndex {
    dir: PathBuf,
    mode: IndexMode,
    files: Vec<PathBuf>,
    by_key: BTreeMap<FileKey, PathBuf>,
}

impl DirectoryIndex {
    /// List the image files directly inside `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be read.
    pub fn scan(dir: &Path) -> Result<Self> {
        let mut files = Vec::new();
        for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
            let entry = entry.map_err(io::Error::from)?;
            if entry.file_type().is_file() && ImageFormat::from_path(entry.path()).is_ok() {
                files.push(entry.into_path());
            }
        }
        Ok(Self::from_files(dir, files))
    }

    /// Index an explicit list of files.
    #[must_use]
    pub fn from_files(dir: &Path, mut files: Vec<PathBuf>) -> Self {
        files.sort();
        let mode = IndexMode::detect(&files);

        let mut by_key: BTreeMap<FileKey, PathBuf> = BTreeMap::new();
        for path in &files {
            let Some(key) = mode.key(path) else { continue };
            if let Some(existing) = by_key.get(&key) {
                tracing::warn!(
                    "{} and {} share key {key}; using the first",
                    existing.display(),
                    path.display()
                );
                continue;
            }
            by_key.insert(key, path.clone());
        }

        tracing::debug!("{} files in {} keyed by {mode:?}", files.len(), dir.display());

        Self {
            dir: dir.to_path_buf(),
            mode,
            files,
            by_key,
        }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub const fn mode(&self) -> IndexMode {
        self.mode
    }

    #[must_use]
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    #[must_use]
    pub fn get(&self, key: &FileKey) -> Option<&Path> {
        self.by_key.get(key).map(PathBuf::as_path)
    }

    /// The file in this directory paired with `other` (a file from elsewhere).
    #[must_use]
    pub fn find_for(&self, other: &Path) -> Option<&Path> {
        self.get(&self.mode.key(other)?)
    }

    /// Resolve a selection such as `"3, 7-9, 12-, cover.png"`.
    ///
    /// Entries are explicit file names, single indices, or `start-end` ranges
    /// whose open ends default to the first and last index present. Ranges
    /// only visit indices that exist. Unknown entries are logged and skipped.
    /// Each file is selected at most once, in order of first mention.
    #[must_use]
    pub fn select(&self, selection: &str) -> Vec<PathBuf> {
        let mut selected: Vec<PathBuf> = Vec::new();
        let mut push = |path: &Path| {
            if !selected.iter().any(|p| p == path) {
                selected.push(path.to_path_buf());
            }
        };

        for entry in selection.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            if let Some(path) = self.by_name(entry) {
                push(path);
                continue;
            }

            if let Some(caps) = RANGE_RE.captures(entry) {
                match self.resolve_range(&caps[1], &caps[2]) {
                    Some((start, end)) if start <= end => {
                        let mut found = 0;
                        for path in self
                            .by_key
                            .range(FileKey::Index(start)..=FileKey::Index(end))
                            .map(|(_, path)| path.as_path())
                        {
                            push(path);
                            found += 1;
                        }
                        if found == 0 {
                            tracing::warn!("range {entry} matches no file");
                        } else {
                            tracing::debug!("range {entry} matches {found} files");
                        }
                    }
                    Some(_) => tracing::warn!("range {entry} matches no file"),
                    None => tracing::warn!("range {entry} needs numbered file names"),
                }
                continue;
            }

            let key = match self.mode {
                IndexMode::Numeric => entry.parse().ok().map(FileKey::Index),
                IndexMode::Stem => Some(FileKey::Stem(entry.to_string())),
            };
            match key.as_ref().and_then(|k| self.get(k)) {
                Some(path) => push(path),
                None => tracing::warn!("selection entry {entry} matches no file"),
            }
        }

        selected
    }

    fn by_name(&self, entry: &str) -> Option<&Path> {
        self.files
            .iter()
            .find(|p| p.file_name().and_then(|n| n.to_str()) == Some(entry) || p.as_os_str() == entry)
            .map(PathBuf::as_path)
    }

    fn resolve_range(&self, start: &str, end: &str) -> Option<(u64, u64)> {
        if self.mode != IndexMode::Numeric {
            return None;
        }
        let first = match self.by_key.keys().next()? {
            FileKey::Index(i) => *i,
            FileKey::Stem(_) => return None,
        };
        let last = match self.by_key.keys().next_back()? {
            FileKey::Index(i) => *i,
            FileKey::Stem(_) => return None,
        };
        let start = if start.is_empty() { first } else { start.parse().ok()? };
        let end = if end.is_empty() { last } else { end.parse().ok()? };
        Some((start.max(first), end.min(last)))
    }
}

/// Selected input files, failing when nothing matched.
///
/// # Errors
///
/// Returns [`Error::EmptySelection`] when the result is empty.
pub fn resolve_inputs(index: &DirectoryIndex, selection: Option<&str>) -> Result<Vec<PathBuf>> {
    let selected = match selection {
        Some(selection) => index.select(selection),
        None => index.files().to_vec(),
    };
    if selected.is_empty() {
        return Err(Error::EmptySelection {
            dir: index.dir().to_path_buf(),
        });
    }
    Ok(selected)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index(names: &[&str]) -> DirectoryIndex {
        let dir = Path::new("in");
        DirectoryIndex::from_files(dir, names.iter().map(|n| dir.join(n)).collect())
    }

    fn names(paths: &[PathBuf]) -> Vec<String> {
        paths
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_file_index() {
        assert_eq!(file_index(Path::new("a/frame_0012.png")), Some(12));
        assert_eq!(file_index(Path::new("7.JPEG")), Some(7));
        assert_eq!(file_index(Path::new("cover.png")), None);
        assert_eq!(file_index(Path::new("12.gif")), None);
    }

    #[test]
    fn test_mode_is_per_directory() {
        assert_eq!(index(&["1.png", "2.png"]).mode(), IndexMode::Numeric);
        // One unnumbered file switches the whole directory to stems.
        let mixed = index(&["1.png", "2.png", "cover.png"]);
        assert_eq!(mixed.mode(), IndexMode::Stem);
        assert!(mixed.get(&FileKey::Stem("1".into())).is_some());
        assert!(mixed.get(&FileKey::Index(1)).is_none());
    }

    #[test]
    fn test_shared_key_keeps_first_file() {
        let idx = index(&["1.png", "01.png"]);
        assert_eq!(idx.get(&FileKey::Index(1)), Some(Path::new("in/01.png")));
        assert_eq!(idx.files().len(), 2);
    }

    #[test]
    fn test_select_ranges_and_singles() {
        let idx = index(&["001.png", "002.png", "003.png", "005.png", "010.png"]);
        assert_eq!(names(&idx.select("2-3")), vec!["002.png", "003.png"]);
        assert_eq!(names(&idx.select("-2")), vec!["001.png", "002.png"]);
        assert_eq!(names(&idx.select("5-")), vec!["005.png", "010.png"]);
        assert_eq!(names(&idx.select("10, 1")), vec!["010.png", "001.png"]);
        assert_eq!(
            names(&idx.select("3-6")),
            vec!["003.png", "005.png"],
            "missing index 4 and 6 are skipped"
        );
    }

    #[test]
    fn test_select_range_over_sparse_indices() {
        let idx = index(&["frame_1.png", "frame_1700000000123.png"]);
        assert_eq!(
            names(&idx.select("1-")),
            vec!["frame_1.png", "frame_1700000000123.png"]
        );
        assert_eq!(names(&idx.select("2-1700000000122")), Vec::<String>::new());
        assert_eq!(names(&idx.select("-1")), vec!["frame_1.png"]);
    }

    #[test]
    fn test_select_reversed_range_is_empty() {
        let idx = index(&["1.png", "2.png", "3.png"]);
        assert!(idx.select("3-1").is_empty());
    }

    #[test]
    fn test_select_by_file_name_and_dedup() {
        let idx = index(&["1.png", "2.png", "3.png"]);
        assert_eq!(names(&idx.select("2.png,2,1-2")), vec!["2.png", "1.png"]);
    }

    #[test]
    fn test_select_stems() {
        let idx = index(&["cat.png", "dog.jpg"]);
        assert_eq!(names(&idx.select("dog")), vec!["dog.jpg"]);
        assert!(idx.select("1-3").is_empty());
    }

    #[test]
    fn test_empty_selection_is_error() {
        let idx = index(&["1.png"]);
        let err = resolve_inputs(&idx, Some("9")).unwrap_err();
        assert!(matches!(err, Error::EmptySelection { .. }));
        assert_eq!(resolve_inputs(&idx, None).unwrap().len(), 1);
    }

    #[test]
    fn test_find_mask_for_image() {
        let masks = index(&["mask_1.png", "mask_2.png"]);
        assert_eq!(
            masks.find_for(Path::new("other/img_2.jpg")),
            Some(Path::new("in/mask_2.png"))
        );
        assert_eq!(masks.find_for(Path::new("other/cover.jpg")), None);

        let stems = index(&["a.png", "b.png", "mask.png"]);
        assert_eq!(stems.find_for(Path::new("x/b.jpg")), Some(Path::new("in/b.png")));
    }

    #[test]
    fn test_scan_skips_non_images() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();
        image::DynamicImage::new_rgb8(2, 2)
            .save(dir.path().join("1.png"))
            .unwrap();

        let idx = DirectoryIndex::scan(dir.path()).unwrap();
        assert_eq!(names(idx.files()), vec!["1.png"]);
        assert_eq!(idx.mode(), IndexMode::Numeric);
    }
}
