//! Snowboy backend, linked through the C wrapper shipped with Snowboy
//! (`snowboy-detect-c-wrapper.cc`, built as `libsnowboy-detect-c`).

use crate::error::WakeError;
use crate::wake::detector::{Detector, DetectorConfig, DetectorFactory};
use std::ffi::CString;
use std::os::raw::{c_char, c_float, c_int};
use std::path::Path;
use tracing::debug;

#[repr(C)]
struct RawSnowboyDetect {
    _private: [u8; 0],
}

#[link(name = "snowboy-detect-c")]
extern "C" {
    fn SnowboyDetectConstructor(
        resource_filename: *const c_char,
        model_str: *const c_char,
    ) -> *mut RawSnowboyDetect;
    fn SnowboyDetectSetSensitivity(detector: *mut RawSnowboyDetect, sensitivity_str: *const c_char);
    fn SnowboyDetectSetAudioGain(detector: *mut RawSnowboyDetect, audio_gain: c_float);
    fn SnowboyDetectApplyFrontend(detector: *mut RawSnowboyDetect, apply_frontend: bool);
    fn SnowboyDetectRunDetection(
        detector: *mut RawSnowboyDetect,
        data: *const i16,
        array_length: c_int,
        is_end: bool,
    ) -> c_int;
    fn SnowboyDetectDestructor(detector: *mut RawSnowboyDetect);
}

#[derive(Debug, Default)]
pub struct SnowboyDetectorFactory;

impl DetectorFactory for SnowboyDetectorFactory {
    fn create(&self, config: &DetectorConfig) -> Result<Box<dyn Detector>, WakeError> {
        let load_err = |reason: String| WakeError::DetectorLoad {
            keyword: config.keyword.clone(),
            reason,
        };

        let resource = path_cstring(&config.resource_path).map_err(load_err)?;
        let model = path_cstring(&config.model_path).map_err(load_err)?;
        let sensitivity = CString::new(config.sensitivity_string())
            .map_err(|e| load_err(e.to_string()))?;

        // SAFETY: both strings are valid NUL-terminated C strings for the call.
        let raw = unsafe { SnowboyDetectConstructor(resource.as_ptr(), model.as_ptr()) };
        if raw.is_null() {
            return Err(load_err(format!(
                "constructor rejected model {}",
                config.model_path.display()
            )));
        }

        // SAFETY: `raw` is a live handle returned by the constructor above.
        unsafe {
            SnowboyDetectSetSensitivity(raw, sensitivity.as_ptr());
            SnowboyDetectSetAudioGain(raw, config.audio_gain);
            SnowboyDetectApplyFrontend(raw, config.apply_frontend);
        }

        debug!(
            keyword = %config.keyword,
            sensitivity = %config.sensitivity_string(),
            audio_gain = config.audio_gain,
            apply_frontend = config.apply_frontend,
            "Loaded snowboy detector"
        );

        Ok(Box::new(SnowboyDetector { raw }))
    }

    fn name(&self) -> &'static str {
        "snowboy"
    }
}

fn path_cstring(path: &Path) -> Result<CString, String> {
    CString::new(path.to_string_lossy().into_owned()).map_err(|e| e.to_string())
}

struct SnowboyDetector {
    raw: *mut RawSnowboyDetect,
}

// SAFETY: the handle is owned by exactly one session and only ever used from
// the thread currently driving that session; it is never aliased.
unsafe impl Send for SnowboyDetector {}

impl Detector for SnowboyDetector {
    fn run_detection(&mut self, window: &[u8]) -> i32 {
        let samples: Vec<i16> = window
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();

        // SAFETY: `samples` outlives the call and its length is passed along.
        unsafe {
            SnowboyDetectRunDetection(self.raw, samples.as_ptr(), samples.len() as c_int, false)
        }
    }
}

impl Drop for SnowboyDetector {
    fn drop(&mut self) {
        // SAFETY: `raw` came from the constructor and is released exactly once.
        unsafe { SnowboyDetectDestructor(self.raw) }
    }
}
