use image::RgbImage;

/// A single decoded video frame with metadata.
pub struct Frame {
    /// The frame's image data.
    pub image: RgbImage,
    /// Frame number from the start of the source (0-based).
    pub frame_number: u32,
    /// Playback position reported by the backend for this frame, in seconds.
    /// Some backends report 0 (or less) near the start of the stream.
    pub position_seconds: f64,
}

/// Properties of an opened source stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceInfo {
    pub width: u32,
    pub height: u32,
    /// Nominal frame rate, or None when the container does not report one.
    pub fps: Option<f64>,
}
