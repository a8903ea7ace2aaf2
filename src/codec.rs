//! Pixel codec adapter: reads a source DICOM file and materializes its
//! pixel data in the target format.
//!
//! Decode failures are ordinary errors; the caller skips the offending
//! record and continues with the rest of the series.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use dicom::object::open_file;
use dicom::pixeldata::PixelDecoder;
use ndarray::Array3;
use nifti::writer::WriterOptions;

/// Output raster formats produced by the procedure family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    /// 2-D raster, one image per instance.
    Png,
    /// Volumetric NIfTI, gzip-compressed.
    NiftiGz,
}

impl ImageFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ImageFormat::Png => ".png",
            ImageFormat::NiftiGz => ".nii.gz",
        }
    }
}

/// Read `source`, decode its pixel data and write it to `dest` in the
/// requested format.
pub fn convert_image(source: &Path, dest: &Path, format: ImageFormat) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    let obj = open_file(source).with_context(|| format!("failed to open {:?}", source))?;
    let decoded = obj
        .decode_pixel_data()
        .with_context(|| format!("failed to decode pixel data of {:?}", source))?;

    match format {
        ImageFormat::Png => {
            let image = decoded
                .to_dynamic_image(0)
                .with_context(|| format!("failed to render frame 0 of {:?}", source))?;
            image
                .save(dest)
                .with_context(|| format!("failed to write image {:?}", dest))?;
        }
        ImageFormat::NiftiGz => {
            if decoded.samples_per_pixel() != 1 {
                bail!(
                    "volumetric output requires single-sample pixel data, got {} samples in {:?}",
                    decoded.samples_per_pixel(),
                    source
                );
            }
            let frames = decoded.number_of_frames() as usize;
            let rows = decoded.rows() as usize;
            let columns = decoded.columns() as usize;
            let data: Vec<f32> = decoded
                .to_vec()
                .with_context(|| format!("failed to convert pixel data of {:?}", source))?;
            let volume = Array3::from_shape_vec((frames, rows, columns), data)
                .with_context(|| format!("unexpected pixel buffer shape in {:?}", source))?;
            WriterOptions::new(dest)
                .write_nifti(&volume)
                .with_context(|| format!("failed to write volume {:?}", dest))?;
        }
    }
    Ok(())
}
