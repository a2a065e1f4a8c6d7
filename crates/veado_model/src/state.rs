//! Per-state data and the values the model hands to a renderer.

use std::sync::Arc;

use image::{ImageFormat, RgbaImage};

/// Everything known about one avatar state.
///
/// Fields fill in as list, peek and thumbnail messages arrive, so an entry
/// created by a thumbnail alone has no name yet.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteState {
    pub state_id: String,
    pub state_name: Option<String>,
    pub thumb_hash: Option<String>,
    pub thumbnail: Option<Arc<RgbaImage>>,
    pub is_active: bool,
}

impl RemoteState {
    pub fn new(state_id: impl Into<String>) -> Self {
        Self {
            state_id: state_id.into(),
            state_name: None,
            thumb_hash: None,
            thumbnail: None,
            is_active: false,
        }
    }
}

/// Background color category for a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateColor {
    Active,
    Inactive,
    /// Disconnected, or the state is unknown.
    Error,
}

impl StateColor {
    pub const ACTIVE: [u8; 4] = [111, 202, 28, 255];
    pub const INACTIVE: [u8; 4] = [68, 100, 38, 255];
    pub const ERROR: [u8; 4] = [71, 0, 14, 255];

    pub fn rgba(self) -> [u8; 4] {
        match self {
            Self::Active => Self::ACTIVE,
            Self::Inactive => Self::INACTIVE,
            Self::Error => Self::ERROR,
        }
    }
}

/// What to draw for a state. Placeholder artwork is up to the host.
#[derive(Debug, Clone, PartialEq)]
pub enum StateImage {
    Thumbnail(Arc<RgbaImage>),
    NotFound,
    Disconnected,
}

/// Decode PNG bytes into an RGBA buffer.
pub fn decode_thumbnail(png: &[u8]) -> Result<RgbaImage, image::ImageError> {
    image::load_from_memory_with_format(png, ImageFormat::Png).map(|img| img.to_rgba8())
}
