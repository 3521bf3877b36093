use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilterType, PngEncoder};
use image::codecs::webp::WebPEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageReader};
use serde::Deserialize;
use std::borrow::Cow;
use std::io::Cursor;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors that can occur while compressing an image.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompressionError {
    #[error("Failed to decode image: {0}")]
    Decode(String),

    #[error("Failed to encode image: {0}")]
    Encode(String),

    #[error("Compression task failed: {0}")]
    Task(String),
}

/// Which encode family the compressed copy uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormatPolicy {
    /// Keep JPEG, PNG and WebP as they are; everything else becomes PNG
    #[default]
    Preserve,
    /// Always encode PNG
    ForcePng,
}

/// Limits the compressed copy has to satisfy.
#[derive(Debug, Clone)]
pub struct CompressionConstraints {
    /// Byte budget for the output. Default: 3 MiB.
    pub max_bytes: usize,
    /// Lower bound for the longest side, and the shortest side an image may
    /// have to take the fast path. Default: 50.
    pub min_dimension: u32,
    /// Upper bound for the longest side. Default: 1024.
    pub max_dimension: u32,
    /// First quality tried for lossy encoders (1-100). Default: 80.
    pub initial_quality: u8,
    /// Quality floor before the loop starts shrinking. Default: 40.
    pub min_quality: u8,
    /// Quality decrement per attempt. Default: 10.
    pub quality_step: u8,
    /// Factor applied to the longest side when shrinking. Default: 0.8.
    pub dimension_step: f32,
    /// Attempt ceiling for the encode loop. Default: 6.
    pub max_attempts: u32,
    /// Default: [`FormatPolicy::Preserve`].
    pub format_policy: FormatPolicy,
}

impl Default for CompressionConstraints {
    fn default() -> Self {
        Self {
            max_bytes: 3 * 1024 * 1024,
            min_dimension: 50,
            max_dimension: 1024,
            initial_quality: 80,
            min_quality: 40,
            quality_step: 10,
            dimension_step: 0.8,
            max_attempts: 6,
            format_policy: FormatPolicy::Preserve,
        }
    }
}

/// Encoder family used for a compressed copy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeFamily {
    Jpeg,
    Png,
    WebP,
}

impl EncodeFamily {
    /// Family for a decoded source format under the given policy
    pub fn select(source: Option<ImageFormat>, policy: FormatPolicy) -> Self {
        if policy == FormatPolicy::ForcePng {
            return EncodeFamily::Png;
        }

        match source {
            Some(ImageFormat::Jpeg) => EncodeFamily::Jpeg,
            Some(ImageFormat::Png) => EncodeFamily::Png,
            Some(ImageFormat::WebP) => EncodeFamily::WebP,
            _ => EncodeFamily::Png,
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            EncodeFamily::Jpeg => "image/jpeg",
            EncodeFamily::Png => "image/png",
            EncodeFamily::WebP => "image/webp",
        }
    }

    /// Whether the encoder honours a quality setting
    pub fn is_lossy(&self) -> bool {
        matches!(self, EncodeFamily::Jpeg)
    }
}

/// How the compressed copy was produced
#[derive(Debug, Clone, PartialEq)]
pub enum CompressionStatus {
    /// Input was already within limits and is returned untouched
    Unchanged,
    /// An attempt fit the byte budget
    MetBudget { attempts: u32 },
    /// The attempt ceiling was reached; the smallest attempt is returned
    BestEffort { attempts: u32 },
    /// Decoding or encoding failed; the original bytes are returned
    Fallback(CompressionError),
}

/// Output of [`compress`]
#[derive(Debug, Clone)]
pub struct CompressionResult {
    pub bytes: Bytes,
    pub status: CompressionStatus,
    /// Encode family of a re-encoded output
    pub family: Option<EncodeFamily>,
    /// Pixel dimensions of a re-encoded output
    pub dimensions: Option<(u32, u32)>,
}

impl CompressionResult {
    fn unchanged(input: &Bytes) -> Self {
        Self {
            bytes: input.clone(),
            status: CompressionStatus::Unchanged,
            family: None,
            dimensions: None,
        }
    }

    fn fallback(input: &Bytes, err: CompressionError) -> Self {
        Self {
            bytes: input.clone(),
            status: CompressionStatus::Fallback(err),
            family: None,
            dimensions: None,
        }
    }

    /// Whether the bytes differ from the input
    pub fn is_reencoded(&self) -> bool {
        matches!(
            self.status,
            CompressionStatus::MetBudget { .. } | CompressionStatus::BestEffort { .. }
        )
    }

    /// The error that forced a fallback, if any
    pub fn error(&self) -> Option<&CompressionError> {
        match self.status {
            CompressionStatus::Fallback(ref err) => Some(err),
            _ => None,
        }
    }

    /// MIME type of the output, given the declared type of the input
    pub fn content_type<'a>(&self, original: &'a str) -> &'a str {
        match self.family {
            Some(family) if self.is_reencoded() => family.content_type(),
            _ => original,
        }
    }
}

/// Compress `input` to fit `constraints`.
///
/// Never fails: decode and encode errors return the input unchanged with a
/// [`CompressionStatus::Fallback`] status.
pub fn compress(input: &Bytes, constraints: &CompressionConstraints) -> CompressionResult {
    match try_compress(input, constraints) {
        Ok(result) => result,
        Err(e) => {
            warn!(error = %e, size_bytes = input.len(), "Compression failed, using original bytes");
            CompressionResult::fallback(input, e)
        }
    }
}

/// Run [`compress`] on the blocking pool
pub async fn compress_blocking(
    input: Bytes,
    constraints: CompressionConstraints,
) -> CompressionResult {
    let task_input = input.clone();
    match tokio::task::spawn_blocking(move || compress(&task_input, &constraints)).await {
        Ok(result) => result,
        Err(e) => {
            let err = CompressionError::Task(e.to_string());
            warn!(error = %err, "Compression task aborted, using original bytes");
            CompressionResult::fallback(&input, err)
        }
    }
}

fn try_compress(
    input: &Bytes,
    constraints: &CompressionConstraints,
) -> Result<CompressionResult, CompressionError> {
    let reader = ImageReader::new(Cursor::new(input.as_ref()))
        .with_guessed_format()
        .map_err(|e| CompressionError::Decode(e.to_string()))?;
    let source_format = reader.format();
    let (width, height) = reader
        .into_dimensions()
        .map_err(|e| CompressionError::Decode(e.to_string()))?;

    if input.len() <= constraints.max_bytes && width.min(height) >= constraints.min_dimension {
        debug!(
            size_bytes = input.len(),
            width, height, "Image within limits, skipping re-encode"
        );
        return Ok(CompressionResult::unchanged(input));
    }

    let image =
        image::load_from_memory(input).map_err(|e| CompressionError::Decode(e.to_string()))?;
    let family = EncodeFamily::select(source_format, constraints.format_policy);

    let max_attempts = constraints.max_attempts.max(1);
    let mut dims = target_dimensions(width, height, constraints);
    let mut frame = resize_to(&image, dims);
    let mut quality = constraints.initial_quality.clamp(1, 100);
    let mut best: Option<(Vec<u8>, (u32, u32))> = None;
    let mut attempts = 0;

    while attempts < max_attempts {
        attempts += 1;

        let encoded = encode(&frame, family, quality)?;

        debug!(
            attempt = attempts,
            width = dims.0,
            height = dims.1,
            quality,
            size_bytes = encoded.len(),
            "Compression attempt"
        );

        if encoded.len() <= constraints.max_bytes {
            return Ok(CompressionResult {
                bytes: Bytes::from(encoded),
                status: CompressionStatus::MetBudget { attempts },
                family: Some(family),
                dimensions: Some(dims),
            });
        }

        if best.as_ref().map_or(true, |(b, _)| encoded.len() < b.len()) {
            best = Some((encoded, dims));
        }

        if family.is_lossy() && quality > constraints.min_quality {
            quality = quality
                .saturating_sub(constraints.quality_step.max(1))
                .max(constraints.min_quality)
                .max(1);
        } else {
            let next = shrink_dimensions(dims, constraints);
            if next == dims {
                break;
            }
            dims = next;
            frame = resize_to(&image, dims);
        }
    }

    let (bytes, dims) = best
        .ok_or_else(|| CompressionError::Encode("no attempt produced output".to_string()))?;

    warn!(
        attempts,
        size_bytes = bytes.len(),
        max_bytes = constraints.max_bytes,
        "Compression could not reach byte budget, using smallest attempt"
    );

    Ok(CompressionResult {
        bytes: Bytes::from(bytes),
        status: CompressionStatus::BestEffort { attempts },
        family: Some(family),
        dimensions: Some(dims),
    })
}

/// Clamp the longest side into `[min_dimension, max_dimension]`, keeping the aspect ratio
pub fn target_dimensions(
    width: u32,
    height: u32,
    constraints: &CompressionConstraints,
) -> (u32, u32) {
    let longest = width.max(height).max(1);
    let target = longest
        .min(constraints.max_dimension)
        .max(constraints.min_dimension)
        .max(1);
    scale_to_longest(width, height, target)
}

fn shrink_dimensions(dims: (u32, u32), constraints: &CompressionConstraints) -> (u32, u32) {
    let longest = dims.0.max(dims.1);
    let step = constraints.dimension_step.clamp(0.1, 0.99);
    let target = ((longest as f32 * step).round() as u32)
        .max(constraints.min_dimension)
        .max(1);

    if target >= longest {
        return dims;
    }
    scale_to_longest(dims.0, dims.1, target)
}

fn scale_to_longest(width: u32, height: u32, target: u32) -> (u32, u32) {
    let longest = width.max(height).max(1);
    let scale = target as f64 / longest as f64;
    let w = ((width as f64 * scale).round() as u32).max(1);
    let h = ((height as f64 * scale).round() as u32).max(1);
    (w, h)
}

fn resize_to(image: &DynamicImage, dims: (u32, u32)) -> Cow<'_, DynamicImage> {
    if dims == (image.width(), image.height()) {
        Cow::Borrowed(image)
    } else {
        Cow::Owned(image.resize_exact(dims.0, dims.1, FilterType::Triangle))
    }
}

fn encode(
    image: &DynamicImage,
    family: EncodeFamily,
    quality: u8,
) -> Result<Vec<u8>, CompressionError> {
    let mut buf = Vec::new();

    let result = match family {
        EncodeFamily::Jpeg => DynamicImage::ImageRgb8(image.to_rgb8())
            .write_with_encoder(JpegEncoder::new_with_quality(&mut buf, quality)),
        EncodeFamily::Png => with_alpha_if_needed(image).write_with_encoder(
            PngEncoder::new_with_quality(&mut buf, CompressionType::Default, PngFilterType::Adaptive),
        ),
        EncodeFamily::WebP => {
            with_alpha_if_needed(image).write_with_encoder(WebPEncoder::new_lossless(&mut buf))
        }
    };

    result.map_err(|e| CompressionError::Encode(e.to_string()))?;
    Ok(buf)
}

fn with_alpha_if_needed(image: &DynamicImage) -> DynamicImage {
    if image.color().has_alpha() {
        DynamicImage::ImageRgba8(image.to_rgba8())
    } else {
        DynamicImage::ImageRgb8(image.to_rgb8())
    }
}
