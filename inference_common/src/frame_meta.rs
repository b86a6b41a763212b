use serde::{Deserialize, Serialize};

use crate::detector::Detection;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameMeta {
    pub index: u64,
    pub detections: Vec<Detection>,
}
