use anyhow::{Result, Context, anyhow};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use walkdir::WalkDir;

use crate::language_utils;

// @module: File and directory utilities

/// Extensions treated as transcribable media
const MEDIA_EXTENSIONS: [&str; 11] = [
    "mp4", "mkv", "avi", "mov", "webm", "m4v", "mpg", "mp3", "wav", "m4a", "flac",
];

/// Enum representing different file types
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum FileType {
    /// Subtitle file (SRT)
    Subtitle,
    /// Audio or video file that can be transcribed
    Media,
    /// Unknown file type
    Unknown,
}

// @struct: File operations utility
pub struct FileManager;

impl FileManager {
    // @checks: File existence
    pub fn file_exists<P: AsRef<Path>>(path: P) -> bool {
        path.as_ref().is_file()
    }

    // @creates: Directory and parents if needed
    pub fn ensure_dir<P: AsRef<Path>>(path: P) -> Result<()> {
        let path = path.as_ref();
        if !path.as_os_str().is_empty() && !path.exists() {
            fs::create_dir_all(path)
                .with_context(|| format!("Failed to create directory: {}", path.display()))?;
        }
        Ok(())
    }

    // @generates: Output path for translated subtitle
    // @params: input_file, output_dir, target_language, extension
    pub fn generate_output_path<P1: AsRef<Path>, P2: AsRef<Path>>(
        input_file: P1,
        output_dir: P2,
        target_language: &str,
        extension: &str,
    ) -> PathBuf {
        let stem = input_file.as_ref().file_stem().unwrap_or_default();
        let mut output_filename = stem.to_string_lossy().to_string();
        output_filename.push('.');
        output_filename.push_str(target_language);
        output_filename.push('.');
        output_filename.push_str(extension);
        output_dir.as_ref().join(output_filename)
    }

    /// Find files with a specific extension in a directory, sorted by path
    pub fn find_files<P: AsRef<Path>>(dir: P, extension: &str) -> Result<Vec<PathBuf>> {
        let wanted = extension.trim_start_matches('.');
        let mut result = Vec::new();

        for entry in WalkDir::new(dir.as_ref()).follow_links(true) {
            let entry = entry.context("Failed to read directory entry")?;
            let path = entry.path();
            if path.is_file() && Self::has_extension(path, wanted) {
                result.push(path.to_path_buf());
            }
        }

        result.sort();
        Ok(result)
    }

    /// Subtitle inputs in a directory, skipping files that are already translations
    ///
    /// A file named `movie.vi.srt` is considered the output of a previous run
    /// whenever its inner suffix is a recognised language code.
    pub fn find_subtitle_inputs<P: AsRef<Path>>(dir: P) -> Result<Vec<PathBuf>> {
        Ok(Self::find_files(dir, "srt")?
            .into_iter()
            .filter(|path| Self::translated_language(path).is_none())
            .collect())
    }

    /// Media files in a directory that have no sibling `.srt` yet
    pub fn find_untranscribed_media<P: AsRef<Path>>(dir: P) -> Result<Vec<PathBuf>> {
        let mut result = Vec::new();
        for entry in WalkDir::new(dir.as_ref()).follow_links(true) {
            let entry = entry.context("Failed to read directory entry")?;
            let path = entry.path();
            if Self::detect_file_type(path) == FileType::Media && !path.with_extension("srt").exists() {
                result.push(path.to_path_buf());
            }
        }
        result.sort();
        Ok(result)
    }

    /// Language code embedded in a `<stem>.<lang>.srt` name, if any
    pub fn translated_language(path: &Path) -> Option<String> {
        let stem = path.file_stem()?.to_string_lossy().to_string();
        let (_, suffix) = stem.rsplit_once('.')?;
        if (2..=3).contains(&suffix.len()) && language_utils::validate_language_code(suffix).is_ok() {
            Some(suffix.to_lowercase())
        } else {
            None
        }
    }

    /// Classify a path by its extension
    pub fn detect_file_type<P: AsRef<Path>>(path: P) -> FileType {
        let path = path.as_ref();
        if !path.is_file() {
            return FileType::Unknown;
        }
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if ext == "srt" {
            FileType::Subtitle
        } else if MEDIA_EXTENSIONS.contains(&ext.as_str()) {
            FileType::Media
        } else {
            FileType::Unknown
        }
    }

    /// Read a whole file as bytes
    pub fn read_bytes<P: AsRef<Path>>(path: P) -> Result<Vec<u8>> {
        fs::read(&path).with_context(|| format!("Failed to read file: {:?}", path.as_ref()))
    }

    /// Write bytes atomically: write a sibling temp file, then rename over the target
    pub fn write_atomic<P: AsRef<Path>>(path: P, content: &[u8]) -> Result<()> {
        let path = path.as_ref();
        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        Self::ensure_dir(&parent)?;

        let mut temp = NamedTempFile::new_in(&parent)
            .with_context(|| format!("Failed to create temp file in {}", parent.display()))?;
        temp.write_all(content)
            .with_context(|| format!("Failed to write temp file for {}", path.display()))?;
        temp.flush()?;
        temp.persist(path)
            .map_err(|e| anyhow!("Failed to persist {}: {}", path.display(), e.error))?;
        Ok(())
    }

    fn has_extension(path: &Path, wanted: &str) -> bool {
        path.extension()
            .map(|ext| ext.to_string_lossy().eq_ignore_ascii_case(wanted))
            .unwrap_or(false)
    }
}
