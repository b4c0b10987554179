//! OpenALPR recognition backend via runtime library loading.
//!
//! Loads `libopenalpr` at runtime using `libloading`, resolves the C API
//! symbols and owns one engine instance.

use std::ffi::{c_char, c_int, c_void, CStr, CString};
use std::path::Path;

use anpr_core::{AnprError, Result};

use crate::{PlateRecognizer, RecognizerConfig};

/// `AlprCRegionOfInterest` from `alpr_c.h`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct RegionOfInterest {
    x: c_int,
    y: c_int,
    width: c_int,
    height: c_int,
}

type RawImageFn =
    unsafe extern "C" fn(*mut c_void, *mut u8, c_int, c_int, c_int, RegionOfInterest) -> *mut c_char;
type PixelsFn = unsafe extern "C" fn(*mut c_void, *mut u8, c_int, c_int, c_int);

/// Loaded OpenALPR C API function pointers.
struct AlprApi {
    _lib: libloading::Library,
    init: unsafe extern "C" fn(*const c_char, *const c_char, *const c_char) -> *mut c_void,
    is_loaded: unsafe extern "C" fn(*mut c_void) -> c_int,
    set_country: unsafe extern "C" fn(*mut c_void, *const c_char),
    set_prewarp: unsafe extern "C" fn(*mut c_void, *const c_char),
    set_mask: PixelsFn,
    set_detect_region: unsafe extern "C" fn(*mut c_void, c_int),
    set_topn: unsafe extern "C" fn(*mut c_void, c_int),
    set_default_region: unsafe extern "C" fn(*mut c_void, *const c_char),
    recognize_rawimage: RawImageFn,
    free_response_string: unsafe extern "C" fn(*mut c_char),
    cleanup: unsafe extern "C" fn(*mut c_void),
}

impl AlprApi {
    /// Load the OpenALPR library and resolve all required C API symbols.
    fn load(path: &Path) -> Result<Self> {
        // Safety: loading a dynamic library runs its initialisers. We trust
        // that the configured path points to an OpenALPR build.
        let lib = unsafe { libloading::Library::new(path) }.map_err(|e| {
            AnprError::Recognition(format!(
                "failed to load OpenALPR library '{}': {}",
                path.display(),
                e
            ))
        })?;

        unsafe {
            let init = *lib
                .get::<unsafe extern "C" fn(*const c_char, *const c_char, *const c_char) -> *mut c_void>(
                    b"openalpr_init\0",
                )
                .map_err(|e| AnprError::Recognition(format!("openalpr_init: {e}")))?;
            let is_loaded = *lib
                .get::<unsafe extern "C" fn(*mut c_void) -> c_int>(b"openalpr_is_loaded\0")
                .map_err(|e| AnprError::Recognition(format!("openalpr_is_loaded: {e}")))?;
            let set_country = *lib
                .get::<unsafe extern "C" fn(*mut c_void, *const c_char)>(b"openalpr_set_country\0")
                .map_err(|e| AnprError::Recognition(format!("openalpr_set_country: {e}")))?;
            let set_prewarp = *lib
                .get::<unsafe extern "C" fn(*mut c_void, *const c_char)>(b"openalpr_set_prewarp\0")
                .map_err(|e| AnprError::Recognition(format!("openalpr_set_prewarp: {e}")))?;
            let set_mask = *lib
                .get::<PixelsFn>(b"openalpr_set_mask\0")
                .map_err(|e| AnprError::Recognition(format!("openalpr_set_mask: {e}")))?;
            let set_detect_region = *lib
                .get::<unsafe extern "C" fn(*mut c_void, c_int)>(b"openalpr_set_detect_region\0")
                .map_err(|e| AnprError::Recognition(format!("openalpr_set_detect_region: {e}")))?;
            let set_topn = *lib
                .get::<unsafe extern "C" fn(*mut c_void, c_int)>(b"openalpr_set_topn\0")
                .map_err(|e| AnprError::Recognition(format!("openalpr_set_topn: {e}")))?;
            let set_default_region = *lib
                .get::<unsafe extern "C" fn(*mut c_void, *const c_char)>(
                    b"openalpr_set_default_region\0",
                )
                .map_err(|e| AnprError::Recognition(format!("openalpr_set_default_region: {e}")))?;
            let recognize_rawimage = *lib
                .get::<RawImageFn>(b"openalpr_recognize_rawimage\0")
                .map_err(|e| AnprError::Recognition(format!("openalpr_recognize_rawimage: {e}")))?;
            let free_response_string = *lib
                .get::<unsafe extern "C" fn(*mut c_char)>(b"openalpr_free_response_string\0")
                .map_err(|e| {
                    AnprError::Recognition(format!("openalpr_free_response_string: {e}"))
                })?;
            let cleanup = *lib
                .get::<unsafe extern "C" fn(*mut c_void)>(b"openalpr_cleanup\0")
                .map_err(|e| AnprError::Recognition(format!("openalpr_cleanup: {e}")))?;

            Ok(Self {
                _lib: lib,
                init,
                is_loaded,
                set_country,
                set_prewarp,
                set_mask,
                set_detect_region,
                set_topn,
                set_default_region,
                recognize_rawimage,
                free_response_string,
                cleanup,
            })
        }
    }
}

fn c_string(what: &str, value: &str) -> Result<CString> {
    CString::new(value).map_err(|e| AnprError::InvalidInput(format!("invalid {what}: {e}")))
}

fn c_path(what: &str, path: &Path) -> Result<CString> {
    let s = path
        .to_str()
        .ok_or_else(|| AnprError::InvalidInput(format!("{what} is not valid UTF-8: {}", path.display())))?;
    c_string(what, s)
}

/// Checks that `pixels` covers a `width` x `height` image and converts the
/// dimensions to C ints.
fn image_extent(
    pixels: &[u8],
    bytes_per_pixel: u32,
    width: u32,
    height: u32,
) -> Result<(c_int, c_int, c_int)> {
    if bytes_per_pixel == 0 || width == 0 || height == 0 {
        return Err(AnprError::InvalidInput(format!(
            "empty image ({width}x{height}, {bytes_per_pixel} bytes per pixel)"
        )));
    }
    let needed = bytes_per_pixel as usize * width as usize * height as usize;
    if pixels.len() < needed {
        return Err(AnprError::InvalidInput(format!(
            "image holds {} bytes, {width}x{height}x{bytes_per_pixel} needs {needed}",
            pixels.len()
        )));
    }
    let to_int = |v: u32| {
        c_int::try_from(v).map_err(|_| AnprError::InvalidInput(format!("dimension {v} out of range")))
    };
    Ok((to_int(bytes_per_pixel)?, to_int(width)?, to_int(height)?))
}

/// One OpenALPR engine instance.
pub struct OpenAlpr {
    handle: *mut c_void,
    api: AlprApi,
}

// Safety: the handle is owned by this value and every call goes through
// `&mut self` or the owner's lock, so the engine is never used from two
// threads at once.
unsafe impl Send for OpenAlpr {}

impl OpenAlpr {
    /// Load the library and create an engine for `country`.
    ///
    /// An engine that reports itself as not loaded (missing runtime data,
    /// unknown country) is logged and returned; it recognises nothing.
    pub fn new(config: &RecognizerConfig, country: &str) -> Result<Self> {
        let country_c = c_string("country", country)?;
        let config_c = c_path("config file", &config.config_file)?;
        let runtime_c = c_path("runtime directory", &config.runtime_dir)?;

        let api = AlprApi::load(&config.library_path)?;
        let handle = unsafe { (api.init)(country_c.as_ptr(), config_c.as_ptr(), runtime_c.as_ptr()) };
        if handle.is_null() {
            return Err(AnprError::Recognition("openalpr_init returned null".into()));
        }
        let alpr = Self { handle, api };

        if alpr.is_loaded() {
            tracing::info!(
                library = %config.library_path.display(),
                config = %config.config_file.display(),
                runtime = %config.runtime_dir.display(),
                country,
                "OpenALPR initialized"
            );
        } else {
            tracing::error!(
                config = %config.config_file.display(),
                runtime = %config.runtime_dir.display(),
                country,
                "error loading OpenALPR"
            );
        }
        Ok(alpr)
    }
}

impl PlateRecognizer for OpenAlpr {
    fn recognize(
        &mut self,
        pixels: &[u8],
        bytes_per_pixel: u32,
        width: u32,
        height: u32,
    ) -> Result<String> {
        let (bpp, w, h) = image_extent(pixels, bytes_per_pixel, width, height)?;
        let roi = RegionOfInterest {
            x: 0,
            y: 0,
            width: w,
            height: h,
        };
        unsafe {
            // The C API takes a mutable pointer but only reads the image.
            let response =
                (self.api.recognize_rawimage)(self.handle, pixels.as_ptr().cast_mut(), bpp, w, h, roi);
            if response.is_null() {
                return Err(AnprError::Recognition(
                    "openalpr_recognize_rawimage returned null".into(),
                ));
            }
            let json = CStr::from_ptr(response).to_string_lossy().into_owned();
            (self.api.free_response_string)(response);
            tracing::trace!(width, height, bytes = json.len(), "recognition finished");
            Ok(json)
        }
    }

    fn set_top_n(&mut self, top_n: u32) -> Result<()> {
        let top_n = c_int::try_from(top_n)
            .map_err(|_| AnprError::InvalidInput(format!("topN {top_n} out of range")))?;
        unsafe { (self.api.set_topn)(self.handle, top_n) };
        Ok(())
    }

    fn set_country(&mut self, country: &str) -> Result<()> {
        let country = c_string("country", country)?;
        unsafe { (self.api.set_country)(self.handle, country.as_ptr()) };
        Ok(())
    }

    fn set_prewarp(&mut self, prewarp: &str) -> Result<()> {
        let prewarp = c_string("prewarp", prewarp)?;
        unsafe { (self.api.set_prewarp)(self.handle, prewarp.as_ptr()) };
        Ok(())
    }

    fn set_mask(&mut self, pixels: &[u8], bytes_per_pixel: u32, width: u32, height: u32) -> Result<()> {
        let (bpp, w, h) = image_extent(pixels, bytes_per_pixel, width, height)?;
        // The engine copies the mask before returning.
        unsafe { (self.api.set_mask)(self.handle, pixels.as_ptr().cast_mut(), bpp, w, h) };
        Ok(())
    }

    fn set_detect_region(&mut self, detect_region: bool) -> Result<()> {
        unsafe { (self.api.set_detect_region)(self.handle, c_int::from(detect_region)) };
        Ok(())
    }

    fn set_default_region(&mut self, region: &str) -> Result<()> {
        let region = c_string("region", region)?;
        unsafe { (self.api.set_default_region)(self.handle, region.as_ptr()) };
        Ok(())
    }

    fn is_loaded(&self) -> bool {
        unsafe { (self.api.is_loaded)(self.handle) != 0 }
    }
}

impl Drop for OpenAlpr {
    fn drop(&mut self) {
        unsafe { (self.api.cleanup)(self.handle) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn missing_library_is_a_recognition_error() {
        let config = RecognizerConfig {
            library_path: PathBuf::from("/nonexistent/libopenalpr.so"),
            ..RecognizerConfig::default()
        };
        match OpenAlpr::new(&config, "eu") {
            Err(AnprError::Recognition(msg)) => assert!(msg.contains("libopenalpr"), "{msg}"),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("loaded a nonexistent library"),
        }
    }

    #[test]
    fn nul_in_country_is_rejected_before_loading() {
        let config = RecognizerConfig {
            library_path: PathBuf::from("/nonexistent/libopenalpr.so"),
            ..RecognizerConfig::default()
        };
        assert!(matches!(
            OpenAlpr::new(&config, "e\0u"),
            Err(AnprError::InvalidInput(_))
        ));
    }

    #[test]
    fn image_extent_checks_buffer_length() {
        assert_eq!(image_extent(&[0; 6], 1, 2, 3).unwrap(), (1, 2, 3));
        assert!(image_extent(&[0; 5], 1, 2, 3).is_err());
        assert!(image_extent(&[0; 12], 2, 2, 3).is_ok());
        assert!(image_extent(&[], 1, 0, 3).is_err());
    }
}
