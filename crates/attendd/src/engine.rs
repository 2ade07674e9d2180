use attend_core::{
    BoundingBox, DistanceMatcher, Embedding, FaceDetector, FaceRecognizer, MatchResult, Matcher,
};
use attend_hw::{Camera, CameraError, Frame, FrameStream};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Camera not accessible")]
    Camera(#[from] CameraError),
    #[error("detector error: {0}")]
    Detector(#[from] attend_core::detector::DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] attend_core::recognizer::RecognizerError),
    #[error("face comparison failed: {0}")]
    Match(#[from] attend_core::MatchError),
    #[error("No face detected. Please look at the camera.")]
    NoFaceDetected,
    #[error("failed to start engine thread: {0}")]
    Spawn(std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

impl EngineError {
    /// Errors a person at the reader can fix by trying again.
    pub fn is_capture_failure(&self) -> bool {
        matches!(self, Self::Camera(_) | Self::NoFaceDetected)
    }
}

/// How a single face capture is attempted.
#[derive(Debug, Clone, Copy)]
pub struct CaptureSettings {
    pub attempts: usize,
    pub delay: Duration,
    pub warmup: Duration,
}

/// Something that can produce the embedding of exactly one live face.
pub trait FaceBackend: Send + 'static {
    fn capture(&mut self, settings: &CaptureSettings) -> Result<Embedding, EngineError>;
}

/// Where capture frames come from.
trait FrameSource {
    fn next_frame(&mut self) -> Result<Frame, CameraError>;
}

impl FrameSource for FrameStream<'_> {
    fn next_frame(&mut self) -> Result<Frame, CameraError> {
        FrameStream::next_frame(self)
    }
}

/// Face detection and embedding on a single frame.
trait FaceEncoder {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<BoundingBox>, EngineError>;
    fn encode(&mut self, frame: &Frame, face: &BoundingBox) -> Result<Embedding, EngineError>;
}

struct FaceModels {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl FaceEncoder for FaceModels {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<BoundingBox>, EngineError> {
        Ok(self.detector.detect(&frame.data, frame.width, frame.height)?)
    }

    fn encode(&mut self, frame: &Frame, face: &BoundingBox) -> Result<Embedding, EngineError> {
        Ok(self
            .recognizer
            .extract(&frame.data, frame.width, frame.height, face)?)
    }
}

/// Webcam + SCRFD + ArcFace.
///
/// The camera is opened per capture and released afterwards, so the
/// registration tool can use it while the server is running.
pub struct CameraBackend {
    device: String,
    models: FaceModels,
}

enum FrameOutcome {
    Face(Embedding),
    NoFace,
    MultipleFaces(usize),
    Dark,
}

impl CameraBackend {
    /// Load both models up front so a missing model fails at startup.
    pub fn load(
        camera_device: &str,
        scrfd_path: &str,
        arcface_path: &str,
        detection_confidence: f32,
    ) -> Result<Self, EngineError> {
        let detector = FaceDetector::load(scrfd_path, detection_confidence)?;
        let recognizer = FaceRecognizer::load(arcface_path)?;
        Ok(Self {
            device: camera_device.to_string(),
            models: FaceModels {
                detector,
                recognizer,
            },
        })
    }
}

impl FaceBackend for CameraBackend {
    fn capture(&mut self, settings: &CaptureSettings) -> Result<Embedding, EngineError> {
        tracing::info!(device = %self.device, "opening camera");
        let camera = Camera::open(&self.device).map_err(|e| {
            tracing::warn!(device = %self.device, error = %e, "camera not accessible");
            e
        })?;
        let mut stream = camera.stream()?;
        capture_face(&mut stream, &mut self.models, settings)
    }
}

/// Read and drop frames until `warmup` has passed so auto-exposure settles.
/// Returns the number of frames discarded.
fn discard_warmup<S: FrameSource>(source: &mut S, warmup: Duration) -> usize {
    let deadline = Instant::now() + warmup;
    let mut discarded = 0;
    while Instant::now() < deadline {
        match source.next_frame() {
            Ok(_) => discarded += 1,
            Err(e) => {
                tracing::debug!(error = %e, "warm-up frame failed");
                break;
            }
        }
    }
    if discarded > 0 {
        tracing::debug!(count = discarded, "discarded warm-up frames");
    }
    discarded
}

fn capture_face<S: FrameSource, E: FaceEncoder>(
    source: &mut S,
    encoder: &mut E,
    settings: &CaptureSettings,
) -> Result<Embedding, EngineError> {
    discard_warmup(source, settings.warmup);

    tracing::info!(attempts = settings.attempts, "looking for face");
    for attempt in 1..=settings.attempts {
        match examine(source, encoder)? {
            FrameOutcome::Face(embedding) => {
                tracing::info!(attempt, "face captured");
                return Ok(embedding);
            }
            FrameOutcome::MultipleFaces(count) => {
                tracing::warn!(count, "multiple faces detected; only one person may be visible");
            }
            FrameOutcome::Dark => tracing::debug!(attempt, "dark frame"),
            FrameOutcome::NoFace => tracing::debug!(attempt, "no face in frame"),
        }
        std::thread::sleep(settings.delay);
    }

    Err(EngineError::NoFaceDetected)
}

fn examine<S: FrameSource, E: FaceEncoder>(
    source: &mut S,
    encoder: &mut E,
) -> Result<FrameOutcome, EngineError> {
    let frame = match source.next_frame() {
        Ok(f) => f,
        Err(e) => {
            tracing::debug!(error = %e, "failed to grab frame");
            return Ok(FrameOutcome::NoFace);
        }
    };
    if frame.is_dark {
        return Ok(FrameOutcome::Dark);
    }

    let faces = encoder.detect(&frame)?;
    match faces.as_slice() {
        [] => Ok(FrameOutcome::NoFace),
        [face] => {
            let embedding = encoder.encode(&frame, face)?;
            tracing::debug!(confidence = face.confidence, seq = frame.sequence, "face encoded");
            Ok(FrameOutcome::Face(embedding))
        }
        many => Ok(FrameOutcome::MultipleFaces(many.len())),
    }
}

/// Result of a verification.
#[derive(Debug, Clone, Copy)]
pub struct VerifyResult {
    pub result: MatchResult,
    pub threshold: f32,
}

/// Messages sent from request handlers to the engine thread.
enum EngineRequest {
    Verify {
        reference: Embedding,
        threshold: f32,
        reply: oneshot::Sender<Result<VerifyResult, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Capture one face and compare it against `reference`.
    pub async fn verify(&self, reference: Embedding, threshold: f32) -> Result<VerifyResult, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Verify {
                reference,
                threshold,
                reply,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Run `backend` on a dedicated OS thread; requests are served one at a time.
pub fn spawn_engine<B: FaceBackend>(
    mut backend: B,
    settings: CaptureSettings,
) -> Result<EngineHandle, EngineError> {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("attend-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Verify {
                        reference,
                        threshold,
                        reply,
                    } => {
                        let _ = reply.send(run_verify(&mut backend, &settings, &reference, threshold));
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}

fn run_verify<B: FaceBackend>(
    backend: &mut B,
    settings: &CaptureSettings,
    reference: &Embedding,
    threshold: f32,
) -> Result<VerifyResult, EngineError> {
    let probe = backend.capture(settings)?;
    let result = DistanceMatcher.compare(&probe, reference, threshold)?;
    tracing::info!(
        distance = result.distance,
        threshold,
        matched = result.matched,
        "face compared"
    );
    Ok(VerifyResult { result, threshold })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Option<Vec<f32>>);

    impl FaceBackend for Fixed {
        fn capture(&mut self, _: &CaptureSettings) -> Result<Embedding, EngineError> {
            self.0
                .clone()
                .map(Embedding::new)
                .ok_or(EngineError::NoFaceDetected)
        }
    }

    fn settings() -> CaptureSettings {
        CaptureSettings {
            attempts: 1,
            delay: Duration::ZERO,
            warmup: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn test_verify_match_and_mismatch() {
        let engine = spawn_engine(Fixed(Some(vec![1.0, 0.0])), settings()).unwrap();

        let same = engine.verify(Embedding::new(vec![0.9, 0.1]), 0.6).await.unwrap();
        assert!(same.result.matched);

        let other = engine.verify(Embedding::new(vec![-1.0, 0.0]), 0.6).await.unwrap();
        assert!(!other.result.matched);
        assert!((other.result.distance - 2.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_no_face_is_capture_failure() {
        let engine = spawn_engine(Fixed(None), settings()).unwrap();
        let err = engine.verify(Embedding::new(vec![1.0]), 0.6).await.unwrap_err();
        assert!(err.is_capture_failure());
        assert_eq!(err.to_string(), "No face detected. Please look at the camera.");
    }

    #[tokio::test]
    async fn test_dimension_mismatch_is_not_capture_failure() {
        let engine = spawn_engine(Fixed(Some(vec![1.0, 0.0])), settings()).unwrap();
        let err = engine.verify(Embedding::new(vec![1.0; 128]), 0.6).await.unwrap_err();
        assert!(matches!(err, EngineError::Match(_)));
        assert!(!err.is_capture_failure());
    }

    #[test]
    fn test_camera_error_message_hides_device_detail() {
        let err = EngineError::from(CameraError::DeviceNotFound("/dev/video9".into()));
        assert!(err.is_capture_failure());
        assert_eq!(err.to_string(), "Camera not accessible");
    }

    const W: u32 = 4;
    const H: u32 = 4;

    fn bright(seq: u32) -> Frame {
        Frame::new(vec![200; (W * H) as usize], W, H, seq)
    }

    fn dark(seq: u32) -> Frame {
        Frame::new(vec![0; (W * H) as usize], W, H, seq)
    }

    /// Queued frames (`None` is a failed grab), then grab failures.
    struct Frames {
        queue: std::collections::VecDeque<Option<Frame>>,
        pulled: usize,
    }

    impl Frames {
        fn new(frames: Vec<Frame>) -> Self {
            Self::scripted(frames.into_iter().map(Some).collect())
        }

        fn scripted(frames: Vec<Option<Frame>>) -> Self {
            Self {
                queue: frames.into(),
                pulled: 0,
            }
        }
    }

    impl FrameSource for Frames {
        fn next_frame(&mut self) -> Result<Frame, CameraError> {
            self.pulled += 1;
            self.queue
                .pop_front()
                .flatten()
                .ok_or_else(|| CameraError::CaptureFailed("no frame".into()))
        }
    }

    /// Bright frames forever, one per millisecond.
    struct Endless {
        pulled: u32,
    }

    impl FrameSource for Endless {
        fn next_frame(&mut self) -> Result<Frame, CameraError> {
            std::thread::sleep(Duration::from_millis(1));
            let frame = bright(self.pulled);
            self.pulled += 1;
            Ok(frame)
        }
    }

    /// Face counts per examined frame; the embedding carries the frame sequence.
    struct Faces {
        counts: std::collections::VecDeque<usize>,
        detected: usize,
    }

    impl Faces {
        fn new(counts: Vec<usize>) -> Self {
            Self {
                counts: counts.into(),
                detected: 0,
            }
        }

        fn always_one() -> Self {
            Self::new(vec![1; 1000])
        }
    }

    fn face_box() -> BoundingBox {
        BoundingBox {
            x: 0.0,
            y: 0.0,
            width: 2.0,
            height: 2.0,
            confidence: 0.9,
            landmarks: None,
        }
    }

    impl FaceEncoder for Faces {
        fn detect(&mut self, _: &Frame) -> Result<Vec<BoundingBox>, EngineError> {
            self.detected += 1;
            let n = self.counts.pop_front().unwrap_or(0);
            Ok(vec![face_box(); n])
        }

        fn encode(&mut self, frame: &Frame, _: &BoundingBox) -> Result<Embedding, EngineError> {
            Ok(Embedding::new(vec![frame.sequence as f32]))
        }
    }

    fn attempts(n: usize) -> CaptureSettings {
        CaptureSettings {
            attempts: n,
            ..settings()
        }
    }

    #[test]
    fn test_single_face_on_first_frame() {
        let mut frames = Frames::new(vec![bright(0), bright(1)]);
        let mut faces = Faces::always_one();
        let emb = capture_face(&mut frames, &mut faces, &attempts(5)).unwrap();
        assert_eq!(emb.values, vec![0.0]);
        assert_eq!(frames.pulled, 1);
    }

    #[test]
    fn test_retries_past_dark_empty_and_crowded_frames() {
        let mut frames = Frames::new(vec![dark(0), bright(1), bright(2), bright(3)]);
        let mut faces = Faces::new(vec![0, 2, 1]);
        let emb = capture_face(&mut frames, &mut faces, &attempts(5)).unwrap();
        assert_eq!(emb.values, vec![3.0]);
        // Dark frames never reach the detector.
        assert_eq!(faces.detected, 3);
    }

    #[test]
    fn test_grab_failure_uses_an_attempt_and_retries() {
        let mut frames = Frames::scripted(vec![None, Some(bright(7))]);
        let emb = capture_face(&mut frames, &mut Faces::always_one(), &attempts(2)).unwrap();
        assert_eq!(emb.values, vec![7.0]);
        assert_eq!(frames.pulled, 2);

        let mut failing = Frames::new(vec![]);
        let err = capture_face(&mut failing, &mut Faces::always_one(), &attempts(2)).unwrap_err();
        assert!(matches!(err, EngineError::NoFaceDetected));
        assert_eq!(failing.pulled, 2);
    }

    #[test]
    fn test_exhausted_attempts_is_no_face() {
        let mut frames = Frames::new((0..10).map(bright).collect());
        let mut faces = Faces::new(vec![0; 10]);
        let err = capture_face(&mut frames, &mut faces, &attempts(3)).unwrap_err();
        assert!(matches!(err, EngineError::NoFaceDetected));
        assert_eq!(frames.pulled, 3);
        assert_eq!(faces.detected, 3);
    }

    #[test]
    fn test_no_warmup_discards_nothing() {
        let mut frames = Frames::new(vec![bright(0)]);
        assert_eq!(discard_warmup(&mut frames, Duration::ZERO), 0);
        assert_eq!(frames.pulled, 0);
    }

    #[test]
    fn test_warmup_discards_streamed_frames_before_attempts() {
        let mut source = Endless { pulled: 0 };
        let settings = CaptureSettings {
            attempts: 1,
            delay: Duration::ZERO,
            warmup: Duration::from_millis(20),
        };
        let emb = capture_face(&mut source, &mut Faces::always_one(), &settings).unwrap();
        // The captured frame is the first one after the discarded warm-up frames.
        assert!(emb.values[0] >= 1.0);
        assert_eq!(emb.values[0] as u32 + 1, source.pulled);
    }

    #[test]
    fn test_warmup_stops_on_grab_failure() {
        let mut frames = Frames::new(vec![bright(0), bright(1)]);
        let discarded = discard_warmup(&mut frames, Duration::from_secs(5));
        assert_eq!(discarded, 2);
        assert_eq!(frames.pulled, 3);
    }
}
