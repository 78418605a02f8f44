//! Sprite sheet packing.
//!
//! A [`SpriteSheet`] holds every frame of a pool in one JPEG, laid out in a
//! row-major grid. Frame `i` lives in the cell returned by
//! [`cell_for_index`], so a renderer only needs the index and the column count
//! to clip the right thumbnail out of the sheet.

use std::{fmt, sync::Arc};

use base64::{Engine, engine::general_purpose::STANDARD};
use image::{
    ExtendedColorType, GenericImage, RgbImage,
    codecs::jpeg::JpegEncoder,
    imageops::{self, FilterType},
};

use crate::{
    configuration::DEFAULT_SPRITE_QUALITY,
    error::FilmstripError,
    progress::{NoOpProgress, OperationType, ProgressCallback, ProgressReporter},
    source::RasterFrame,
};

const DATA_URL_PREFIX: &str = "data:image/jpeg;base64,";

/// Grid cell `(row, col)` of frame `index` in a sheet with `cols` columns.
///
/// ```
/// use filmstrip::cell_for_index;
///
/// assert_eq!(cell_for_index(22, 10), (2, 2));
/// assert_eq!(cell_for_index(9, 10), (0, 9));
/// ```
pub fn cell_for_index(index: usize, cols: usize) -> (usize, usize) {
    let cols = cols.max(1);
    (index / cols, index % cols)
}

/// A JPEG-encoded grid of equally sized frames.
#[derive(Clone, PartialEq, Eq)]
pub struct SpriteSheet {
    /// Encoded JPEG bytes. Empty for the sentinel sheet.
    pub image: Vec<u8>,
    /// Number of grid rows.
    pub rows: usize,
    /// Number of grid columns.
    pub cols: usize,
    /// Width of one cell in pixels.
    pub frame_width: u32,
    /// Height of one cell in pixels.
    pub frame_height: u32,
}

impl fmt::Debug for SpriteSheet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpriteSheet")
            .field("image_bytes", &self.image.len())
            .field("rows", &self.rows)
            .field("cols", &self.cols)
            .field("frame_width", &self.frame_width)
            .field("frame_height", &self.frame_height)
            .finish()
    }
}

impl SpriteSheet {
    /// The "no sprite available" sentinel. Must not be rendered.
    pub fn empty() -> Self {
        Self {
            image: Vec::new(),
            rows: 0,
            cols: 0,
            frame_width: 0,
            frame_height: 0,
        }
    }

    /// Returns `true` for the sentinel sheet.
    pub fn is_empty(&self) -> bool {
        self.image.is_empty() || self.rows == 0 || self.cols == 0
    }

    /// Grid cell of frame `index`. See [`cell_for_index`].
    pub fn cell(&self, index: usize) -> (usize, usize) {
        cell_for_index(index, self.cols)
    }

    /// Pixel rectangle `(x, y, width, height)` of frame `index` in the sheet.
    pub fn cell_rect(&self, index: usize) -> (u32, u32, u32, u32) {
        let (row, col) = self.cell(index);
        (
            col as u32 * self.frame_width,
            row as u32 * self.frame_height,
            self.frame_width,
            self.frame_height,
        )
    }

    /// The sheet as a `data:image/jpeg;base64,` URL.
    pub fn data_url(&self) -> String {
        format!("{DATA_URL_PREFIX}{}", STANDARD.encode(&self.image))
    }

    /// Rebuild a sheet from a stored data URL and its layout.
    ///
    /// # Errors
    ///
    /// Returns [`FilmstripError::InvalidSpriteData`] if `url` is not a JPEG
    /// data URL or its payload is not valid base64.
    pub fn from_data_url(
        url: &str,
        rows: usize,
        cols: usize,
        frame_width: u32,
        frame_height: u32,
    ) -> Result<Self, FilmstripError> {
        let payload = url.strip_prefix(DATA_URL_PREFIX).ok_or_else(|| {
            FilmstripError::InvalidSpriteData("expected a JPEG data URL".to_string())
        })?;
        let image = STANDARD
            .decode(payload)
            .map_err(|error| FilmstripError::InvalidSpriteData(error.to_string()))?;
        Ok(Self {
            image,
            rows,
            cols,
            frame_width,
            frame_height,
        })
    }
}

/// Packs sampled frames into a [`SpriteSheet`].
///
/// # Example
///
/// ```no_run
/// use filmstrip::{FilmstripError, SpritePacker};
///
/// # fn example(sampled: filmstrip::SampledFrames) -> Result<(), FilmstripError> {
/// let packer = SpritePacker::new(10);
/// let sheet = packer.pack(sampled.frames, sampled.frame_width, sampled.frame_height, 10)?;
/// if !sheet.is_empty() {
///     std::fs::write("sprite.jpg", &sheet.image)?;
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct SpritePacker {
    quality: u8,
    progress: Arc<dyn ProgressCallback>,
}

impl fmt::Debug for SpritePacker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpritePacker")
            .field("quality", &self.quality)
            .finish_non_exhaustive()
    }
}

impl Default for SpritePacker {
    fn default() -> Self {
        Self::new(DEFAULT_SPRITE_QUALITY)
    }
}

impl SpritePacker {
    /// Create a packer encoding at JPEG `quality` (clamped to `1..=100`).
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
            progress: Arc::new(NoOpProgress),
        }
    }

    /// Report one [`OperationType::SpritePacking`] step per painted frame.
    #[must_use]
    pub fn with_progress(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.progress = callback;
        self
    }

    /// Paint `frames` into a grid of `cols` columns and encode it.
    ///
    /// `cols` is clamped to `1..=frames.len()`. Frame `i` is painted at
    /// [`cell_for_index(i, cols)`](cell_for_index); missing and zero-sized
    /// frames leave a blank cell. Frames not matching the cell size are
    /// resized. Every frame is dropped once painted.
    ///
    /// Returns the [empty sentinel](SpriteSheet::empty) when no frame was
    /// painted or encoding failed.
    ///
    /// # Errors
    ///
    /// Returns [`FilmstripError::InvalidDimensions`] if a cell dimension is
    /// zero while frames were supplied.
    pub fn pack(
        &self,
        frames: Vec<Option<RasterFrame>>,
        frame_width: u32,
        frame_height: u32,
        cols: usize,
    ) -> Result<SpriteSheet, FilmstripError> {
        if frames.is_empty() {
            log::debug!("No frames to pack; returning empty sprite");
            return Ok(SpriteSheet::empty());
        }
        if frame_width == 0 || frame_height == 0 {
            return Err(FilmstripError::InvalidDimensions {
                width: frame_width,
                height: frame_height,
            });
        }

        let cols = cols.clamp(1, frames.len());
        let rows = frames.len().div_ceil(cols);
        let mut canvas = RgbImage::new(cols as u32 * frame_width, rows as u32 * frame_height);
        let mut reporter = ProgressReporter::new(
            self.progress.clone(),
            OperationType::SpritePacking,
            Some(frames.len() as u64),
            1,
        );

        log::debug!(
            "Packing {} frame(s) into {rows}x{cols} sprite ({}x{})",
            frames.len(),
            canvas.width(),
            canvas.height()
        );

        let mut painted = 0usize;
        for (index, frame) in frames.into_iter().enumerate() {
            let Some(frame) = frame.filter(|frame| !frame.is_blank()) else {
                continue;
            };
            let (row, col) = cell_for_index(index, cols);
            let (x, y) = (col as u32 * frame_width, row as u32 * frame_height);

            let timestamp = frame.timestamp;
            let pixels = if frame.width() == frame_width && frame.height() == frame_height {
                frame.image
            } else {
                imageops::resize(&frame.image, frame_width, frame_height, FilterType::Triangle)
            };

            match canvas.copy_from(&pixels, x, y) {
                Ok(()) => painted += 1,
                Err(error) => log::warn!("Could not paint frame {index} into sprite: {error}"),
            }
            reporter.step(Some(index as u64), Some(timestamp));
        }
        reporter.done();

        if painted == 0 {
            log::warn!("No frame could be painted; returning empty sprite");
            return Ok(SpriteSheet::empty());
        }

        match self.encode(&canvas) {
            Ok(image) => Ok(SpriteSheet {
                image,
                rows,
                cols,
                frame_width,
                frame_height,
            }),
            Err(error) => {
                log::warn!("{error}; returning empty sprite");
                Ok(SpriteSheet::empty())
            }
        }
    }

    fn encode(&self, canvas: &RgbImage) -> Result<Vec<u8>, FilmstripError> {
        let mut buffer = Vec::new();
        JpegEncoder::new_with_quality(&mut buffer, self.quality)
            .encode(
                canvas.as_raw(),
                canvas.width(),
                canvas.height(),
                ExtendedColorType::Rgb8,
            )
            .map_err(|error| FilmstripError::SpriteEncodeError(error.to_string()))?;
        Ok(buffer)
    }
}
