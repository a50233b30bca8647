use thiserror::Error;

use crate::constants::{HitId, SensorId};

#[derive(Error, Debug)]
pub enum TrackFitError {
    #[error("No usable geometry plane: the registry is empty or every plane is excluded")]
    NoUsablePlanes,

    #[error(
        "Too few active planes to satisfy the ndof floor: {active} active, {max_skips} allowed skips, {required} required"
    )]
    InsufficientActivePlanes {
        active: usize,
        max_skips: usize,
        required: usize,
    },

    #[error("Invalid track fit parameter: {0}")]
    InvalidParameter(String),

    #[error("Invalid plane geometry: {0}")]
    InvalidPlaneGeometry(String),

    #[error("Measurement at z = {0} mm matches no registered plane")]
    UnmatchedMeasurement(f64),

    #[error("Hit {0} has a non-finite position")]
    NonFiniteMeasurement(HitId),

    #[error("Plane index out of range: {0}")]
    PlaneIndexOutOfRange(usize),

    #[error("Unknown sensor id: {0}")]
    UnknownSensor(SensorId),

    #[error("Sensor {0} is excluded from fitting and its measurements are not readable")]
    ExcludedPlane(SensorId),

    #[error("Unable to parse configuration: {0}")]
    ConfigParse(String),

    #[error("Unable to perform file operation: {0}")]
    IoError(#[from] std::io::Error),

    #[error("CSV output error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Gaussian noise generation failed: {0:?}")]
    NoiseGeneration(rand_distr::NormalError),
}

impl From<rand_distr::NormalError> for TrackFitError {
    fn from(err: rand_distr::NormalError) -> Self {
        TrackFitError::NoiseGeneration(err)
    }
}

impl From<serde_json::Error> for TrackFitError {
    fn from(err: serde_json::Error) -> Self {
        TrackFitError::ConfigParse(err.to_string())
    }
}

impl PartialEq for TrackFitError {
    fn eq(&self, other: &Self) -> bool {
        use TrackFitError::*;
        match (self, other) {
            (NoUsablePlanes, NoUsablePlanes) => true,
            (
                InsufficientActivePlanes {
                    active: a1,
                    max_skips: s1,
                    required: r1,
                },
                InsufficientActivePlanes {
                    active: a2,
                    max_skips: s2,
                    required: r2,
                },
            ) => a1 == a2 && s1 == s2 && r1 == r2,
            (InvalidParameter(a), InvalidParameter(b)) => a == b,
            (InvalidPlaneGeometry(a), InvalidPlaneGeometry(b)) => a == b,
            (UnmatchedMeasurement(a), UnmatchedMeasurement(b)) => a == b,
            (NonFiniteMeasurement(a), NonFiniteMeasurement(b)) => a == b,
            (PlaneIndexOutOfRange(a), PlaneIndexOutOfRange(b)) => a == b,
            (UnknownSensor(a), UnknownSensor(b)) => a == b,
            (ExcludedPlane(a), ExcludedPlane(b)) => a == b,
            (ConfigParse(a), ConfigParse(b)) => a == b,
            (NoiseGeneration(a), NoiseGeneration(b)) => a == b,

            // Not comparable: same variant is enough
            (IoError(_), IoError(_)) => true,
            (CsvError(_), CsvError(_)) => true,

            _ => false,
        }
    }
}
