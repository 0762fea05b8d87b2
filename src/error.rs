//! Pipeline error taxonomy
//!
//! Page-scoped failures skip one page, directory-scoped failures abort the
//! whole directory before anything is written. A canvas missing from the
//! shape table aborts a transform; the annotator only skips that page.

use std::path::PathBuf;
use thiserror::Error;

/// How far a failure reaches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorScope {
    /// Skip the page, keep processing the directory
    Page,
    /// Abandon the directory, keep processing the batch
    Directory,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("canvas shapes unavailable from {url}: {reason}")]
    FetchFailure { url: String, reason: String },

    #[error("view {view} outside of document range 1..={pages}")]
    InvalidViewIndex { view: u32, pages: u32 },

    #[error("no readable image on view {view}: {reason}")]
    DocumentRead { view: u32, reason: String },

    #[error("canvas {canvas_id} missing from shape table")]
    CanvasMissing { canvas_id: String },

    #[error("bad page file name {0:?}")]
    PageName(PathBuf),

    #[error("IO error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error in {path:?}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("PDF error: {0}")]
    Pdf(#[from] lopdf::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}

impl PipelineError {
    /// Classify the failure for the batch loop
    pub fn scope(&self) -> ErrorScope {
        match self {
            Self::FetchFailure { .. } | Self::CanvasMissing { .. } => ErrorScope::Directory,
            _ => ErrorScope::Page,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Json {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_table_errors_are_directory_scoped() {
        let errors = [
            PipelineError::FetchFailure {
                url: "https://example.org/manifest.json".to_string(),
                reason: "503".to_string(),
            },
            PipelineError::CanvasMissing {
                canvas_id: "f4".to_string(),
            },
        ];
        for err in errors {
            assert_eq!(err.scope(), ErrorScope::Directory, "{}", err);
        }
    }

    #[test]
    fn test_page_errors_are_page_scoped() {
        let errors = [
            PipelineError::InvalidViewIndex { view: 12, pages: 10 },
            PipelineError::DocumentRead {
                view: 3,
                reason: "no image".to_string(),
            },
        ];
        for err in errors {
            assert_eq!(err.scope(), ErrorScope::Page, "{}", err);
        }
    }

    #[test]
    fn test_invalid_view_message() {
        let err = PipelineError::InvalidViewIndex { view: 0, pages: 5 };
        assert_eq!(err.to_string(), "view 0 outside of document range 1..=5");
    }
}
