use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::{DynamicImage, ImageFormat};
use thiserror::Error;

use crate::geometry::{map_selection_to_image, ImageRegion, Rect, Size};
use crate::storage::TempImageStore;

/// File extensions accepted for drag-and-drop and file selection.
pub const ACCEPTED_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "gif"];

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("failed to read image {path}: {message}")]
    Read { path: PathBuf, message: String },
    #[error("failed to write cropped image {path}: {message}")]
    Write { path: PathBuf, message: String },
}

pub type ImageResult<T> = std::result::Result<T, ImageError>;

pub fn is_supported_image_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            ACCEPTED_EXTENSIONS
                .iter()
                .any(|accepted| ext.eq_ignore_ascii_case(accepted))
        })
}

/// The image currently attached to the session and the user's region of
/// interest over its preview.
#[derive(Debug, Clone)]
pub struct ImageState {
    path: PathBuf,
    original: Arc<DynamicImage>,
    display: Size,
    selection: Option<Rect>,
}

impl ImageState {
    /// Decodes `path` up front so unreadable files are rejected before any
    /// request is made.
    pub fn load(path: impl Into<PathBuf>, display: Size) -> ImageResult<Self> {
        let path = path.into();
        if !is_supported_image_path(&path) {
            return Err(ImageError::Read {
                path,
                message: format!(
                    "unsupported file type (expected one of: {})",
                    ACCEPTED_EXTENSIONS.join(", ")
                ),
            });
        }
        let original = image::open(&path).map_err(|err| ImageError::Read {
            path: path.clone(),
            message: err.to_string(),
        })?;
        tracing::debug!(
            path = %path.display(),
            width = original.width(),
            height = original.height(),
            "loaded image"
        );
        Ok(Self {
            path,
            original: Arc::new(original),
            display,
            selection: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }

    pub fn original_size(&self) -> Size {
        Size::new(self.original.width(), self.original.height())
    }

    pub fn display_size(&self) -> Size {
        self.display
    }

    /// The preview was resized; any selection drawn at the old size is stale.
    pub fn set_display_size(&mut self, display: Size) {
        if self.display != display {
            self.display = display;
            self.selection = None;
        }
    }

    pub fn selection(&self) -> Option<Rect> {
        self.selection
    }

    pub fn set_selection(&mut self, selection: Rect) {
        self.selection = (!selection.is_empty()).then_some(selection);
    }

    pub fn clear_selection(&mut self) {
        self.selection = None;
    }

    pub fn selected_region(&self) -> Option<ImageRegion> {
        let selection = self.selection?;
        map_selection_to_image(selection, self.original_size(), self.display)
    }
}

/// Location of the image bytes to send with a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelImage {
    pub path: PathBuf,
    pub is_temporary: bool,
}

/// Produces the image to attach to a request: the original file, or a PNG
/// crop of the selected region written to a new temporary file.
///
/// Temporary files are not tracked here; the caller owns their cleanup.
pub fn materialize(state: &ImageState, store: &TempImageStore) -> ImageResult<ModelImage> {
    let Some(region) = state.selected_region() else {
        return Ok(ModelImage {
            path: state.path.clone(),
            is_temporary: false,
        });
    };

    let cropped = crop_region(&state.original, region);
    let (file, path) = store.allocate().map_err(|err| ImageError::Write {
        path: store.temp_dir().to_path_buf(),
        message: err.to_string(),
    })?;

    if let Err(message) = write_png(&cropped, file) {
        if let Err(err) = std::fs::remove_file(&path) {
            tracing::warn!(path = %path.display(), ?err, "failed to remove partial crop");
        }
        return Err(ImageError::Write { path, message });
    }

    tracing::info!(
        path = %path.display(),
        x = region.x,
        y = region.y,
        width = region.width,
        height = region.height,
        "wrote cropped image"
    );
    Ok(ModelImage {
        path,
        is_temporary: true,
    })
}

pub fn crop_region(source: &DynamicImage, region: ImageRegion) -> DynamicImage {
    source.crop_imm(region.x, region.y, region.width, region.height)
}

fn write_png(image: &DynamicImage, file: std::fs::File) -> Result<(), String> {
    let mut writer = BufWriter::new(file);
    image
        .write_to(&mut writer, ImageFormat::Png)
        .map_err(|err| err.to_string())?;
    writer.flush().map_err(|err| err.to_string())
}
