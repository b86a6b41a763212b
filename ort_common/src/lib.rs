//! YOLOv8 object detection on top of onnxruntime.

pub mod model;
pub mod yolov8;

pub use model::{ModelVariant, load_session};
pub use yolov8::YoloV8;
