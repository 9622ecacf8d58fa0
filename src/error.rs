use std::{
    error::Error,
    fmt::{self, Display},
};

use ndarray::ShapeError;

/// The result type used in the entire crate.
pub type Result<T> = std::result::Result<T, MlErr>;

/// The crate's error type.
#[derive(Debug)]
pub enum MlErr {
    SizeMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },
    UnknownMetaLearner(String),
    UnknownMode(String),
    UnknownLoss(String),
    EmptyEpisode,
    NotEnoughSteps {
        got: usize,
        expected: usize,
    },
    InvalidConfig(&'static str),
    NegativeLearningRate {
        index: usize,
        value: f32,
    },
    LabelOutOfRange {
        label: f32,
        classes: usize,
    },
    UnsupportedVersion {
        got: u32,
        expected: u32,
    },
    Shape(ShapeError),
    Serde(serde_json::Error),
}

impl Display for MlErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MlErr::SizeMismatch {
                what,
                got,
                expected,
            } => format!("There's a size mismatch in {what}, got {got} and expected {expected}"),
            MlErr::UnknownMetaLearner(kind) => format!("Undefined meta learner type: {kind}"),
            MlErr::UnknownMode(mode) => format!("Unsupported learning rate mode: {mode}"),
            MlErr::UnknownLoss(name) => format!("Unknown loss function: {name}"),
            MlErr::EmptyEpisode => "The adaptation episode has no steps".to_string(),
            MlErr::NotEnoughSteps { got, expected } => format!(
                "The adaptation episode has {got} steps but the meta learner needs {expected}"
            ),
            MlErr::InvalidConfig(msg) => format!("Invalid configuration: {msg}"),
            MlErr::NegativeLearningRate { index, value } => {
                format!("The {index}-th learning rate is not a non-negative number ({value})")
            }
            MlErr::LabelOutOfRange { label, classes } => {
                format!("Label {label} is not a class index in [0, {classes})")
            }
            MlErr::UnsupportedVersion { got, expected } => {
                format!("Unsupported artifact version {got}, expected {expected}")
            }
            MlErr::Shape(e) => format!("Shape error: {e}"),
            MlErr::Serde(e) => format!("Serialization error: {e}"),
        };

        write!(f, "{s}")
    }
}

impl Error for MlErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            MlErr::Shape(e) => Some(e),
            MlErr::Serde(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ShapeError> for MlErr {
    fn from(e: ShapeError) -> Self {
        MlErr::Shape(e)
    }
}

impl From<serde_json::Error> for MlErr {
    fn from(e: serde_json::Error) -> Self {
        MlErr::Serde(e)
    }
}

/// Fails with `MlErr::SizeMismatch` unless `got == expected`.
pub(crate) fn check_size(what: &'static str, got: usize, expected: usize) -> Result<()> {
    if got != expected {
        return Err(MlErr::SizeMismatch {
            what,
            got,
            expected,
        });
    }

    Ok(())
}
