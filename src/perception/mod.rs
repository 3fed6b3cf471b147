pub mod catalog;
pub mod change_detector;
pub mod frame;
pub mod grid;
pub mod matcher;
pub mod screenshot;
pub mod traits;
pub mod types;
