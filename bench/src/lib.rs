//! Shared fixtures for the preprocessing benchmarks.

/// A `width * height` luma plane with a non-repeating row pattern.
pub fn luma_plane(width: u32, height: u32) -> Vec<u8> {
    (0..width * height).map(|i| (i % 251) as u8).collect()
}
