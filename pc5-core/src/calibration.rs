//! Static camera/LiDAR calibration parameters.
//!
//! Loaded once from JSON and never mutated. The reader does not apply them;
//! they are carried for downstream tools that project points into images.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use thiserror::Error;

/// Errors that can occur while loading calibration.
#[derive(Error, Debug)]
pub enum CalibrationError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid calibration for {sensor}: {reason}")]
    Invalid { sensor: String, reason: String },
}

/// Pinhole intrinsics with optional distortion coefficients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    #[serde(default)]
    pub distortion: Vec<f64>,
}

/// Rigid transform from the sensor frame to the vehicle frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Extrinsics {
    /// Row-major rotation matrix
    pub rotation: [[f64; 3]; 3],
    /// Translation in metres
    pub translation: [f64; 3],
}

impl Default for Extrinsics {
    fn default() -> Self {
        Self {
            rotation: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            translation: [0.0; 3],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraCalibration {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub intrinsics: Intrinsics,
    #[serde(default)]
    pub extrinsics: Extrinsics,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LidarCalibration {
    pub name: String,
    /// Offset applied to host message times, in nanoseconds
    #[serde(default)]
    pub msgtime_offset_ns: i64,
    #[serde(default)]
    pub extrinsics: Extrinsics,
}

impl LidarCalibration {
    /// Shifts a message timestamp by the configured offset (subtracting it).
    pub fn correct_timestamp(&self, timestamp_ns: u64) -> u64 {
        if self.msgtime_offset_ns >= 0 {
            timestamp_ns.saturating_sub(self.msgtime_offset_ns as u64)
        } else {
            timestamp_ns.saturating_add(self.msgtime_offset_ns.unsigned_abs())
        }
    }
}

/// Calibration for every sensor of one rig.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    #[serde(default)]
    pub cameras: Vec<CameraCalibration>,
    #[serde(default)]
    pub lidars: Vec<LidarCalibration>,
}

impl Calibration {
    pub fn camera(&self, name: &str) -> Option<&CameraCalibration> {
        self.cameras.iter().find(|c| c.name == name)
    }

    pub fn lidar(&self, name: &str) -> Option<&LidarCalibration> {
        self.lidars.iter().find(|l| l.name == name)
    }

    /// Checks focal lengths, image sizes and that every value is finite.
    pub fn validate(&self) -> Result<(), CalibrationError> {
        for cam in &self.cameras {
            let invalid = |reason: &str| CalibrationError::Invalid {
                sensor: cam.name.clone(),
                reason: reason.to_string(),
            };
            let k = &cam.intrinsics;
            if !(k.fx > 0.0 && k.fy > 0.0) {
                return Err(invalid("focal lengths must be positive"));
            }
            if cam.width == 0 || cam.height == 0 {
                return Err(invalid("image size must be non-zero"));
            }
            let values = [k.fx, k.fy, k.cx, k.cy]
                .into_iter()
                .chain(k.distortion.iter().copied());
            if !values.into_iter().all(f64::is_finite) || !extrinsics_finite(&cam.extrinsics) {
                return Err(invalid("non-finite parameter"));
            }
        }
        for lidar in &self.lidars {
            if !extrinsics_finite(&lidar.extrinsics) {
                return Err(CalibrationError::Invalid {
                    sensor: lidar.name.clone(),
                    reason: "non-finite parameter".to_string(),
                });
            }
        }
        Ok(())
    }
}

fn extrinsics_finite(e: &Extrinsics) -> bool {
    e.rotation
        .iter()
        .flatten()
        .chain(e.translation.iter())
        .all(|v| v.is_finite())
}

/// Parses and validates calibration JSON.
pub fn parse_calibration(json: &str) -> Result<Calibration, CalibrationError> {
    let calibration: Calibration = serde_json::from_str(json)?;
    calibration.validate()?;
    Ok(calibration)
}

/// Loads and validates a calibration file.
pub fn load_calibration<P: AsRef<Path>>(path: P) -> Result<Calibration, CalibrationError> {
    let reader = BufReader::new(File::open(path)?);
    let calibration: Calibration = serde_json::from_reader(reader)?;
    calibration.validate()?;
    Ok(calibration)
}

#[cfg(test)]
mod tests {
    use super::*;

    const RIG: &str = r#"{
        "cameras": [{
            "name": "front",
            "width": 1920,
            "height": 1080,
            "intrinsics": {"fx": 1000.0, "fy": 1000.0, "cx": 960.0, "cy": 540.0,
                           "distortion": [0.1, -0.05, 0.0, 0.0]}
        }],
        "lidars": [{"name": "top", "msgtime_offset_ns": 0}]
    }"#;

    #[test]
    fn test_parse_calibration() {
        let cal = parse_calibration(RIG).unwrap();
        let front = cal.camera("front").unwrap();
        assert_eq!(front.intrinsics.cx, 960.0);
        assert_eq!(front.intrinsics.distortion.len(), 4);
        assert_eq!(front.extrinsics, Extrinsics::default());
        assert!(cal.lidar("top").is_some());
        assert!(cal.camera("rear").is_none());
    }

    #[test]
    fn test_msgtime_offset() {
        let mut lidar = LidarCalibration {
            name: "top".to_string(),
            msgtime_offset_ns: 500,
            extrinsics: Extrinsics::default(),
        };
        assert_eq!(lidar.correct_timestamp(1_000), 500);
        assert_eq!(lidar.correct_timestamp(100), 0);
        lidar.msgtime_offset_ns = -500;
        assert_eq!(lidar.correct_timestamp(1_000), 1_500);
    }

    #[test]
    fn test_rejects_bad_focal_length() {
        let json = RIG.replace("\"fx\": 1000.0", "\"fx\": 0.0");
        assert!(matches!(
            parse_calibration(&json),
            Err(CalibrationError::Invalid { .. })
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rig.json");
        std::fs::write(&path, RIG).unwrap();
        assert_eq!(load_calibration(&path).unwrap().cameras.len(), 1);
        assert!(matches!(
            load_calibration(dir.path().join("absent.json")),
            Err(CalibrationError::Io(_))
        ));
    }
}
