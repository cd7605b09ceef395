//! Services the link calls into but does not implement.
//!
//! Each trait is the narrow surface the rest of the app needs from an
//! on-device engine or platform service.

use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("service unavailable: {0}")]
    Unavailable(String),
    #[error("{0}")]
    Failed(String),
}

/// Local language model
pub trait InferenceEngine: Send {
    fn load(&mut self, model_path: &Path) -> bool;
    fn generate(
        &mut self,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, CollaboratorError>;
    fn unload(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionAxis {
    Accelerometer,
    Gyroscope,
    Magnetometer,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionSample {
    pub axis: MotionAxis,
    pub timestamp_ms: u64,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// Phone motion sensors, delivered at roughly `interval`
pub trait MotionFeed: Send {
    fn start(&mut self, interval: Duration) -> mpsc::Receiver<MotionSample>;
    fn stop(&mut self);
}

/// One encoded camera frame
#[derive(Debug, Clone)]
pub struct ImageFrame {
    pub width: u32,
    pub height: u32,
    pub rotation_degrees: u16,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectedObject {
    pub label: String,
    pub confidence: f32,
    pub bounds: BoundingBox,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectedFace {
    pub bounds: BoundingBox,
    pub smiling_probability: Option<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectedText {
    pub text: String,
    pub bounds: BoundingBox,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VisionResult {
    pub objects: Vec<DetectedObject>,
    pub faces: Vec<DetectedFace>,
    pub texts: Vec<DetectedText>,
}

pub trait VisionService: Send + Sync {
    fn analyze(&self, frame: &ImageFrame) -> Result<VisionResult, CollaboratorError>;
}

pub type TranscriptCallback = Box<dyn FnMut(Result<String, CollaboratorError>) + Send>;

pub trait SpeechRecognizer: Send {
    fn start_listening(&mut self, on_result: TranscriptCallback) -> Result<(), CollaboratorError>;
    fn stop_listening(&mut self);
}

pub trait SpeechSynthesizer: Send {
    fn speak(&mut self, text: &str) -> Result<(), CollaboratorError>;
    fn stop(&mut self);
}
