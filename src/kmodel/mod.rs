pub mod calibration;
pub mod compiler;
pub mod options;

pub use calibration::CalibrationSet;
pub use compiler::{check_model_format, CompileJob, ExternalCompiler, KmodelCompiler};
pub use options::KmodelOptions;
