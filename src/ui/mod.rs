pub mod icons;
pub mod progress;

pub use progress::{PipelineUI, print_error_banner};
