//! Frame Sources
//!
//! A frame source yields the base byte size of each frame in send order. The
//! server opens one by name when it receives `SETUP <name>`; how names map to
//! sources is up to the [`SourceProvider`] the server is built with.

use std::collections::{HashMap, VecDeque};
use thiserror::Error;

/// Errors raised while opening a frame source
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Frame source not found: {0}")]
    NotFound(String),

    #[error("Invalid frame source name: {0:?}")]
    InvalidName(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Ordered supply of frame sizes
pub trait FrameSource: Send {
    /// Base byte size of the next frame, or `None` once exhausted
    fn next_frame_size(&mut self) -> Option<u32>;

    /// Frames left, when known
    fn remaining(&self) -> Option<usize> {
        None
    }
}

/// Opens frame sources by name
pub trait SourceProvider {
    fn open(&mut self, name: &str) -> Result<Box<dyn FrameSource>, SourceError>;
}

/// Frame sizes held in memory
#[derive(Debug, Clone, Default)]
pub struct FrameSizeList {
    sizes: VecDeque<u32>,
}

impl FrameSizeList {
    pub fn new(sizes: impl IntoIterator<Item = u32>) -> Self {
        FrameSizeList {
            sizes: sizes.into_iter().collect(),
        }
    }

    /// Parse whitespace-separated frame sizes
    ///
    /// Parsing stops at the first token that is not an unsigned integer, the
    /// same way a stream extraction loop would.
    pub fn parse(text: &str) -> Self {
        FrameSizeList {
            sizes: text
                .split_whitespace()
                .map_while(|token| token.parse::<u32>().ok())
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.sizes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sizes.is_empty()
    }
}

impl FrameSource for FrameSizeList {
    fn next_frame_size(&mut self) -> Option<u32> {
        self.sizes.pop_front()
    }

    fn remaining(&self) -> Option<usize> {
        Some(self.sizes.len())
    }
}

/// Generates `count` frames of a constant size, or an endless stream
#[derive(Debug, Clone)]
pub struct ConstantSource {
    frame_size: u32,
    remaining: Option<u64>,
}

impl ConstantSource {
    pub fn new(frame_size: u32, count: u64) -> Self {
        ConstantSource {
            frame_size,
            remaining: Some(count),
        }
    }

    pub fn endless(frame_size: u32) -> Self {
        ConstantSource {
            frame_size,
            remaining: None,
        }
    }
}

impl FrameSource for ConstantSource {
    fn next_frame_size(&mut self) -> Option<u32> {
        match &mut self.remaining {
            None => Some(self.frame_size),
            Some(0) => None,
            Some(n) => {
                *n -= 1;
                Some(self.frame_size)
            }
        }
    }

    fn remaining(&self) -> Option<usize> {
        self.remaining.map(|n| n as usize)
    }
}

/// In-memory catalog of named frame-size lists
#[derive(Debug, Clone, Default)]
pub struct SourceCatalog {
    entries: HashMap<String, Vec<u32>>,
}

impl SourceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, sizes: Vec<u32>) -> &mut Self {
        self.entries.insert(name.into(), sizes);
        self
    }

    pub fn with(mut self, name: impl Into<String>, sizes: Vec<u32>) -> Self {
        self.insert(name, sizes);
        self
    }
}

impl SourceProvider for SourceCatalog {
    fn open(&mut self, name: &str) -> Result<Box<dyn FrameSource>, SourceError> {
        self.entries
            .get(name)
            .map(|sizes| Box::new(FrameSizeList::new(sizes.iter().copied())) as Box<dyn FrameSource>)
            .ok_or_else(|| SourceError::NotFound(name.to_string()))
    }
}

/// Serves the same endless constant-size stream under every name
#[derive(Debug, Clone, Copy)]
pub struct ConstantProvider {
    pub frame_size: u32,
}

impl SourceProvider for ConstantProvider {
    fn open(&mut self, _name: &str) -> Result<Box<dyn FrameSource>, SourceError> {
        Ok(Box::new(ConstantSource::endless(self.frame_size)))
    }
}
