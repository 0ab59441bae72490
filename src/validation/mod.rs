//! Local checks run before files are sent to the server.

pub mod csv_validator;

pub use csv_validator::{
    ensure_importable, validate, CsvValidationError, CsvValidationResult, CsvValidationWarning,
    VALIDATION_SAMPLE_SIZE,
};
