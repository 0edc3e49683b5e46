//! Request and result types shared by the dispatcher, the remote protocol and
//! the CLI.
//!
//! Both types serialize to the camelCase JSON used on the wire. Inline image
//! bytes travel as standard base64 in `imageBytes`.

use std::fmt;

use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrorKind};

/// Backend name reported when the local pipeline produced (or failed) a result.
pub const LOCAL_BACKEND: &str = "local";

/// Output vector format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Svg,
    Eps,
    Pdf,
    Ai,
}

impl OutputFormat {
    /// File extension used for stored artifacts
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Svg => "svg",
            OutputFormat::Eps => "eps",
            OutputFormat::Pdf => "pdf",
            OutputFormat::Ai => "ai",
        }
    }
}

/// Quality tier. Controls how aggressively paths are simplified; `Fast`
/// also switches to single-color threshold tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Fast,
    #[default]
    Standard,
    High,
}

impl Quality {
    /// Simplification tolerance in working-resolution pixels.
    ///
    /// Traced outlines run along pixel corners: a one-step staircase sits
    /// 0.71 px from its chord, a two-step one 0.89 px. `High` flattens only
    /// 45 degree staircases, `Standard` also the shallow ones.
    pub fn tolerance(&self) -> f64 {
        match self {
            Quality::Fast => 1.5,
            Quality::Standard => 1.0,
            Quality::High => 0.75,
        }
    }
}

/// How many colors the tracer keeps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ColorMode {
    #[default]
    Auto,
    Limited,
    Full,
}

impl ColorMode {
    /// Palette cap handed to the color analyzer
    pub fn palette_size(&self) -> usize {
        match self {
            ColorMode::Limited => 4,
            ColorMode::Auto | ColorMode::Full => 10,
        }
    }

    /// Minimum share (in percent of sampled pixels) a color needs to get its
    /// own layer. Only `Auto` prunes rare colors.
    pub fn min_share_percent(&self) -> usize {
        match self {
            ColorMode::Auto => 2,
            ColorMode::Limited | ColorMode::Full => 0,
        }
    }
}

/// Detail level; bounds the tracer's working resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Low,
    #[default]
    Medium,
    High,
}

impl Complexity {
    /// Longest side, in pixels, of the raster the tracer works on
    pub fn working_resolution(&self) -> u32 {
        match self {
            Complexity::Low => 256,
            Complexity::Medium => 512,
            Complexity::High => 1024,
        }
    }
}

/// Where the source image comes from
#[derive(Clone, PartialEq, Eq)]
pub enum ImageSource {
    /// `http(s)://` or `file://` URL
    Url(String),
    /// Encoded image bytes (PNG, JPEG, ...)
    Bytes(Vec<u8>),
}

impl fmt::Debug for ImageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageSource::Url(u) => f.debug_tuple("Url").field(u).finish(),
            ImageSource::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
        }
    }
}

/// An inbound vectorization request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireRequest", into = "WireRequest")]
pub struct VectorizationRequest {
    pub source: ImageSource,
    pub output_format: OutputFormat,
    pub quality: Quality,
    pub color_mode: ColorMode,
    pub complexity: Complexity,
    /// Free text from the user; logged, never interpreted
    pub user_hint: Option<String>,
}

impl VectorizationRequest {
    /// Request with default parameters for an image at `url`
    pub fn from_url(url: impl Into<String>) -> Self {
        Self::new(ImageSource::Url(url.into()))
    }

    /// Request with default parameters for inline image bytes
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self::new(ImageSource::Bytes(bytes))
    }

    fn new(source: ImageSource) -> Self {
        Self {
            source,
            output_format: OutputFormat::default(),
            quality: Quality::default(),
            color_mode: ColorMode::default(),
            complexity: Complexity::default(),
            user_hint: None,
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    image_bytes: Option<String>,
    #[serde(default)]
    output_format: OutputFormat,
    #[serde(default)]
    quality: Quality,
    #[serde(default)]
    color_mode: ColorMode,
    #[serde(default)]
    complexity: Complexity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user_hint: Option<String>,
}

impl TryFrom<WireRequest> for VectorizationRequest {
    type Error = String;

    fn try_from(w: WireRequest) -> std::result::Result<Self, Self::Error> {
        let source = match (w.image_url, w.image_bytes) {
            (Some(url), None) => ImageSource::Url(url),
            (None, Some(b64)) => {
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(b64.trim())
                    .map_err(|e| format!("imageBytes is not valid base64: {}", e))?;
                ImageSource::Bytes(bytes)
            }
            (Some(_), Some(_)) => return Err("only one of imageUrl and imageBytes may be set".into()),
            (None, None) => return Err("one of imageUrl or imageBytes is required".into()),
        };
        Ok(Self {
            source,
            output_format: w.output_format,
            quality: w.quality,
            color_mode: w.color_mode,
            complexity: w.complexity,
            user_hint: w.user_hint,
        })
    }
}

impl From<VectorizationRequest> for WireRequest {
    fn from(r: VectorizationRequest) -> Self {
        let (image_url, image_bytes) = match r.source {
            ImageSource::Url(u) => (Some(u), None),
            ImageSource::Bytes(b) => (None, Some(base64::engine::general_purpose::STANDARD.encode(b))),
        };
        Self {
            image_url,
            image_bytes,
            output_format: r.output_format,
            quality: r.quality,
            color_mode: r.color_mode,
            complexity: r.complexity,
            user_hint: r.user_hint,
        }
    }
}

/// The normalized outcome of a request, whichever path produced it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorizationResult {
    pub success: bool,
    #[serde(default)]
    pub format: OutputFormat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_time_ms: Option<u64>,
    /// `"local"` or the id of the remote backend that did the work
    #[serde(default)]
    pub backend: String,
}

impl VectorizationResult {
    pub fn succeeded(
        format: OutputFormat,
        vector_url: String,
        file_size: u64,
        processing_time_ms: u64,
        backend: impl Into<String>,
    ) -> Self {
        Self {
            success: true,
            format,
            vector_url: Some(vector_url),
            error: None,
            error_kind: None,
            file_size: Some(file_size),
            processing_time_ms: Some(processing_time_ms),
            backend: backend.into(),
        }
    }

    pub fn failed(format: OutputFormat, err: &Error, processing_time_ms: u64, backend: impl Into<String>) -> Self {
        Self {
            success: false,
            format,
            vector_url: None,
            error: Some(err.to_string()),
            error_kind: Some(err.kind()),
            file_size: None,
            processing_time_ms: Some(processing_time_ms),
            backend: backend.into(),
        }
    }
}
