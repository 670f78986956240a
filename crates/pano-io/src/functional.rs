use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder};

use pano_image::{Image, ImageSize};

use crate::error::IoError;

/// Quality used when writing JPEG files.
pub const JPEG_QUALITY: u8 = 95;

/// Reads an image from the given file path as 8 bit RGB.
///
/// The format is guessed from the file content and can be anything the image crate decodes.
/// Grayscale and alpha images are converted to RGB.
///
/// # Arguments
///
/// * `file_path` - The path to a valid image file.
///
/// # Errors
///
/// [`IoError::FileDoesNotExist`] for a missing file and [`IoError::ImageDecodeError`] when
/// the content cannot be decoded.
pub fn read_image_any_rgb8(file_path: impl AsRef<Path>) -> Result<Image<u8, 3>, IoError> {
    let file_path = file_path.as_ref();

    // verify the file exists
    if !file_path.exists() {
        return Err(IoError::FileDoesNotExist(file_path.to_path_buf()));
    }

    let img = image::ImageReader::open(file_path)?
        .with_guessed_format()?
        .decode()?;

    let size = ImageSize {
        width: img.width() as usize,
        height: img.height() as usize,
    };
    let image = Image::new(size, img.into_rgb8().into_raw())?;
    log::debug!(
        "Read {} ({}x{})",
        file_path.display(),
        size.width,
        size.height
    );
    Ok(image)
}

/// Writes an 8 bit RGB image, choosing the format from the file extension.
///
/// `jpg` and `jpeg` files are written with [`JPEG_QUALITY`], `png` files losslessly.
///
/// # Arguments
///
/// * `file_path` - The destination path.
/// * `image` - The image to write.
pub fn write_image(file_path: impl AsRef<Path>, image: &Image<u8, 3>) -> Result<(), IoError> {
    let file_path = file_path.as_ref();
    let extension = file_path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());

    let width = u32::try_from(image.width())
        .map_err(|_| IoError::ImageTooLarge(image.width(), image.height()))?;
    let height = u32::try_from(image.height())
        .map_err(|_| IoError::ImageTooLarge(image.width(), image.height()))?;

    match extension.as_deref() {
        Some("jpg") | Some("jpeg") => {
            let writer = BufWriter::new(File::create(file_path)?);
            JpegEncoder::new_with_quality(writer, JPEG_QUALITY).write_image(
                image.as_slice(),
                width,
                height,
                ExtendedColorType::Rgb8,
            )?;
        }
        Some("png") => {
            let writer = BufWriter::new(File::create(file_path)?);
            PngEncoder::new(writer).write_image(
                image.as_slice(),
                width,
                height,
                ExtendedColorType::Rgb8,
            )?;
        }
        _ => return Err(IoError::InvalidFileExtension(file_path.to_path_buf())),
    }

    Ok(())
}
