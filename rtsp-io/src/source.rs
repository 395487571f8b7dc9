//! File-backed frame sources
//!
//! A media directory holds one text file per stream. Each file lists frame
//! sizes in bytes as whitespace-separated integers.

use rtsp_protocol::source::{FrameSizeList, FrameSource, SourceError, SourceProvider};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Opens frame-size files from a media directory
#[derive(Debug, Clone)]
pub struct FileSourceProvider {
    media_dir: PathBuf,
}

impl FileSourceProvider {
    pub fn new(media_dir: impl Into<PathBuf>) -> Self {
        FileSourceProvider {
            media_dir: media_dir.into(),
        }
    }

    pub fn media_dir(&self) -> &Path {
        &self.media_dir
    }

    /// Resolve a stream name to a file inside the media directory
    ///
    /// Names must be a single path component.
    fn resolve(&self, name: &str) -> Result<PathBuf, SourceError> {
        let valid = !name.is_empty()
            && name != "."
            && name != ".."
            && !name.contains(['/', '\\']);
        if !valid {
            return Err(SourceError::InvalidName(name.to_string()));
        }
        Ok(self.media_dir.join(name))
    }
}

impl SourceProvider for FileSourceProvider {
    fn open(&mut self, name: &str) -> Result<Box<dyn FrameSource>, SourceError> {
        let path = self.resolve(name)?;
        let text = fs::read_to_string(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => SourceError::NotFound(name.to_string()),
            _ => SourceError::Io(e),
        })?;

        let frames = FrameSizeList::parse(&text);
        debug!(path = %path.display(), frames = frames.len(), "Loaded frame sizes");
        Ok(Box::new(frames))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process;

    fn media_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("rtsp-io-{}-{}", tag, process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_open_file() {
        let dir = media_dir("open");
        fs::write(dir.join("clip.dat"), "1000 1200\n800\n").unwrap();

        let mut provider = FileSourceProvider::new(&dir);
        let mut source = provider.open("clip.dat").unwrap();
        assert_eq!(source.remaining(), Some(3));
        assert_eq!(source.next_frame_size(), Some(1000));

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_missing_file() {
        let dir = media_dir("missing");
        let mut provider = FileSourceProvider::new(&dir);
        assert!(matches!(
            provider.open("nope.txt"),
            Err(SourceError::NotFound(_))
        ));
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_rejects_path_names() {
        let mut provider = FileSourceProvider::new("/tmp");
        for name in ["", "..", "../etc/passwd", "a/b"] {
            assert!(matches!(
                provider.open(name),
                Err(SourceError::InvalidName(_))
            ));
        }
    }
}
