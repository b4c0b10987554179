use serde::{Deserialize, Serialize};

use crate::error::{AnprError, Result};

/// Android `AHARDWAREBUFFER_FORMAT_Y8Cb8Cr8_420`.
pub const FORMAT_Y8CB8CR8_420: u32 = 0x23;

/// Pixel layout tag of a native frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    /// Planar luma + two half-resolution chroma planes (camera default).
    Yuv420,
    /// Three full-resolution planes.
    Yuv444,
    /// Any other platform tag. Treated as full-resolution planes.
    Other(u32),
}

impl PixelFormat {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            FORMAT_Y8CB8CR8_420 => PixelFormat::Yuv420,
            other => PixelFormat::Other(other),
        }
    }

    /// Whether chroma planes are subsampled by 2 in both directions.
    pub fn is_subsampled(&self) -> bool {
        matches!(self, PixelFormat::Yuv420)
    }
}

/// Geometry of one native frame, as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameDescription {
    pub width: u32,
    pub height: u32,
    /// Bytes per luma row. May exceed `width` when rows are padded.
    pub row_stride: u32,
    pub plane_count: u32,
    pub format: PixelFormat,
}

impl FrameDescription {
    pub fn new(width: u32, height: u32, row_stride: u32, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            row_stride,
            plane_count: 3,
            format,
        }
    }

    /// Reject geometry no backend can process.
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(AnprError::InvalidInput(format!(
                "frame has zero extent ({}x{})",
                self.width, self.height
            )));
        }
        if self.row_stride < self.width {
            return Err(AnprError::InvalidInput(format!(
                "row stride {} is smaller than width {}",
                self.row_stride, self.width
            )));
        }
        Ok(())
    }

    /// Size in bytes of the single-channel output image.
    pub fn output_len(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Byte size of each of the three planes.
    ///
    /// Sizes derive from the row stride, not the width, so padded rows are
    /// always covered: luma is `stride * height`, subsampled chroma is
    /// `ceil(stride / 2) * ceil(height / 2)`, full-resolution chroma matches
    /// luma. Odd dimensions round up, so no plane of a valid frame is empty.
    pub fn plane_sizes(&self) -> [u64; 3] {
        let stride = self.row_stride as u64;
        let height = self.height as u64;
        let luma = stride * height;
        let chroma = if self.format.is_subsampled() {
            stride.div_ceil(2) * height.div_ceil(2)
        } else {
            luma
        };
        [luma, chroma, chroma]
    }
}

/// Which backend produced a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Gpu,
    Cpu,
}

impl Backend {
    pub fn name(&self) -> &'static str {
        match self {
            Backend::Gpu => "gpu",
            Backend::Cpu => "cpu",
        }
    }
}

/// A preprocessed grayscale frame, one byte per pixel.
///
/// `width` and `height` describe the rotated image: a 1280x720 camera frame
/// comes out 720 wide and 1280 high.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub backend: Backend,
}

impl ProcessedFrame {
    pub const BYTES_PER_PIXEL: u32 = 1;
}

/// Pixel coordinate reported by the recognizer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

/// Rectangle the recognizer was asked to search.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RegionOfInterest {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

/// One alternative reading of a plate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlateCandidate {
    pub plate: String,
    pub confidence: f32,
    pub matches_template: i32,
}

/// A detected plate with its best reading and top-N candidates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlateResult {
    pub plate: String,
    pub confidence: f32,
    pub matches_template: i32,
    pub plate_index: i32,
    pub region: String,
    pub region_confidence: i32,
    pub processing_time_ms: f32,
    pub requested_topn: i32,
    pub coordinates: Vec<Point>,
    pub candidates: Vec<PlateCandidate>,
}

/// Recognition output for one image, in the recognizer's JSON layout.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionResult {
    pub version: i32,
    pub data_type: String,
    pub epoch_time: u64,
    pub img_width: u32,
    pub img_height: u32,
    pub processing_time_ms: f32,
    pub regions_of_interest: Vec<RegionOfInterest>,
    pub results: Vec<PlateResult>,
}

impl RecognitionResult {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| AnprError::Recognition(format!("malformed result JSON: {e}")))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| AnprError::Recognition(format!("result serialization failed: {e}")))
    }

    /// Highest-confidence plate, if any.
    pub fn best_plate(&self) -> Option<&PlateResult> {
        self.results
            .iter()
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plane_sizes_follow_stride() {
        let desc = FrameDescription::new(1280, 720, 1344, PixelFormat::Yuv420);
        assert_eq!(desc.plane_sizes(), [1344 * 720, 672 * 360, 672 * 360]);

        let full = FrameDescription::new(4, 2, 4, PixelFormat::Yuv444);
        assert_eq!(full.plane_sizes(), [8, 8, 8]);
    }

    #[test]
    fn odd_and_single_line_chroma_rounds_up() {
        let row = FrameDescription::new(4, 1, 4, PixelFormat::Yuv420);
        assert_eq!(row.plane_sizes(), [4, 2, 2]);

        let column = FrameDescription::new(1, 4, 1, PixelFormat::Yuv420);
        assert_eq!(column.plane_sizes(), [4, 2, 2]);

        let pixel = FrameDescription::new(1, 1, 1, PixelFormat::Yuv420);
        assert_eq!(pixel.plane_sizes(), [1, 1, 1]);

        let odd = FrameDescription::new(3, 5, 3, PixelFormat::Yuv420);
        assert_eq!(odd.plane_sizes(), [15, 6, 6]);
    }

    #[test]
    fn stride_smaller_than_width_is_rejected() {
        let desc = FrameDescription::new(640, 480, 320, PixelFormat::Yuv420);
        assert!(matches!(desc.validate(), Err(AnprError::InvalidInput(_))));
        assert!(FrameDescription::new(0, 480, 640, PixelFormat::Yuv420)
            .validate()
            .is_err());
    }

    #[test]
    fn raw_format_tags() {
        assert_eq!(PixelFormat::from_raw(0x23), PixelFormat::Yuv420);
        assert_eq!(PixelFormat::from_raw(1), PixelFormat::Other(1));
        assert!(!PixelFormat::Other(1).is_subsampled());
    }

    #[test]
    fn parses_recognizer_json() {
        let json = r#"{
            "version": 2,
            "data_type": "alpr_results",
            "epoch_time": 1700000000000,
            "img_width": 720,
            "img_height": 1280,
            "processing_time_ms": 41.5,
            "regions_of_interest": [],
            "results": [
                {"plate": "AB12CDE", "confidence": 91.2, "matches_template": 1,
                 "region": "gb", "coordinates": [{"x": 1, "y": 2}],
                 "candidates": [{"plate": "AB12CDE", "confidence": 91.2, "matches_template": 1},
                                {"plate": "A812CDE", "confidence": 80.0, "matches_template": 0}]},
                {"plate": "XY99", "confidence": 60.0}
            ]
        }"#;

        let result = RecognitionResult::from_json(json).unwrap();
        assert_eq!(result.img_width, 720);
        assert_eq!(result.results.len(), 2);
        assert_eq!(result.results[0].candidates.len(), 2);
        assert_eq!(result.best_plate().unwrap().plate, "AB12CDE");

        let again = RecognitionResult::from_json(&result.to_json().unwrap()).unwrap();
        assert_eq!(again, result);
    }

    #[test]
    fn empty_result_has_no_best_plate() {
        let result = RecognitionResult::from_json("{}").unwrap();
        assert!(result.best_plate().is_none());
        assert!(RecognitionResult::from_json("not json").is_err());
    }
}
