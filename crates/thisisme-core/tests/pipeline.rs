use std::io::Cursor;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thisisme_core::artifacts::{ClassifierModel, MeanVector, ProjectionModel};
use thisisme_core::detector::DetectorError;
use thisisme_core::types::FACE_LEN;
use thisisme_core::{
    ArtifactError, ArtifactId, ArtifactStore, BoundingBox, Channel, CombinationPolicy, FaceDetector, FaceLocator,
    GrayFrame, LabelTable, RecognitionError, Recognizer,
};

struct StubDetector {
    boxes: Vec<BoundingBox>,
}

impl FaceDetector for StubDetector {
    fn detect(&self, _frame: &GrayFrame) -> Result<Vec<BoundingBox>, DetectorError> {
        Ok(self.boxes.clone())
    }
}

/// In-memory store that synthesizes artifacts and counts every load.
#[derive(Default)]
struct CountingStore {
    intercept: Vec<f64>,
    weight: f64,
    missing: bool,
    projections: AtomicUsize,
    classifiers: AtomicUsize,
    means: AtomicUsize,
}

impl CountingStore {
    fn with_intercept(intercept: Vec<f64>) -> Self {
        Self {
            intercept,
            weight: 1e-3,
            ..Default::default()
        }
    }

    /// Classifier whose scores are exactly its intercepts.
    fn intercept_only(intercept: Vec<f64>) -> Self {
        Self {
            intercept,
            ..Default::default()
        }
    }

    fn missing() -> Self {
        Self {
            missing: true,
            ..Default::default()
        }
    }

    fn loads(&self) -> usize {
        self.projections.load(Ordering::SeqCst) + self.classifiers.load(Ordering::SeqCst) + self.means.load(Ordering::SeqCst)
    }

    fn not_found(id: ArtifactId) -> ArtifactError {
        ArtifactError::NotFound {
            id,
            path: PathBuf::from("/models").join(id.relative_path()),
        }
    }
}

impl ArtifactStore for CountingStore {
    fn projection(&self, channel: Channel, n_components: u32) -> Result<ProjectionModel, ArtifactError> {
        self.projections.fetch_add(1, Ordering::SeqCst);
        if self.missing {
            return Err(Self::not_found(ArtifactId::Projection { channel, n_components }));
        }
        std::thread::sleep(Duration::from_millis(5));
        let components = (0..n_components as usize)
            .map(|i| {
                let mut row = vec![0.0f32; FACE_LEN];
                for j in (i * 131..FACE_LEN).step_by(997) {
                    row[j] = 1.0;
                }
                row
            })
            .collect();
        Ok(ProjectionModel::new(vec![0.1; FACE_LEN], components, None, false).unwrap())
    }

    fn classifier(&self, policy: CombinationPolicy, n_components: u32) -> Result<ClassifierModel, ArtifactError> {
        self.classifiers.fetch_add(1, Ordering::SeqCst);
        if self.missing {
            return Err(Self::not_found(ArtifactId::Classifier { policy, n_components }));
        }
        let features = n_components as usize * policy.channels().len();
        let coef = (0..self.intercept.len())
            .map(|c| (0..features).map(|j| ((c * 7 + j) % 5) as f64 * self.weight).collect())
            .collect();
        Ok(ClassifierModel::new(coef, self.intercept.clone()).unwrap())
    }

    fn mean(&self, channel: Channel) -> Result<MeanVector, ArtifactError> {
        self.means.fetch_add(1, Ordering::SeqCst);
        if self.missing {
            return Err(Self::not_found(ArtifactId::Mean(channel)));
        }
        Ok(MeanVector::new(vec![0.5; FACE_LEN]).unwrap())
    }
}

fn labels(n: usize) -> LabelTable {
    LabelTable::new((0..n).map(|i| format!("student_{i}")).collect()).unwrap()
}

fn gradient_frame() -> GrayFrame {
    let data: Vec<u8> = (0..200u32 * 200)
        .map(|i| ((i % 200) / 2 + (i / 200) / 3) as u8)
        .collect();
    GrayFrame::from_raw(data, 200, 200).unwrap()
}

fn reference_box() -> BoundingBox {
    BoundingBox::new(10, 10, 80, 100)
}

fn recognizer(boxes: Vec<BoundingBox>, store: Arc<CountingStore>, policy: CombinationPolicy) -> Recognizer {
    Recognizer::new(Arc::new(StubDetector { boxes }), store, labels(6), policy)
}

fn png_bytes(frame: &GrayFrame) -> Vec<u8> {
    let img = image::GrayImage::from_raw(frame.width, frame.height, frame.data.clone()).unwrap();
    let mut buf = Vec::new();
    image::DynamicImage::ImageLuma8(img)
        .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
    buf
}

#[test]
fn test_reference_box_normalizes_to_canonical_face() {
    let locator = FaceLocator::new(Arc::new(StubDetector { boxes: vec![reference_box()] }));
    let located = locator.locate(&gradient_frame()).unwrap().unwrap();
    let values = located.face.values();
    assert_eq!(values.len(), 11750);
    assert!(values.iter().all(|v| v.is_finite() && (0.0..=1.0).contains(v)));
}

#[test]
fn test_no_face_loads_nothing() {
    let store = Arc::new(CountingStore::with_intercept(vec![0.0; 6]));
    let rec = recognizer(vec![], Arc::clone(&store), CombinationPolicy::OriginalHistogramGabor);
    let err = rec.recognize(&gradient_frame(), 10).unwrap_err();
    assert!(matches!(err, RecognitionError::NoFaceDetected));
    assert_eq!(err.to_string(), "no face detected");
    assert_eq!(store.loads(), 0);
    assert!(rec.cached_keys().is_empty());
}

#[test]
fn test_ranking_drops_lowest_tied_class() {
    let store = Arc::new(CountingStore::intercept_only(vec![2.0, 1.0, 0.1, 0.1, 0.1, 0.1]));
    let rec = recognizer(vec![reference_box()], store, CombinationPolicy::OriginalHistogramGabor);

    let result = rec.recognize(&gradient_frame(), 2).unwrap();
    let order: Vec<usize> = result.ranking.iter().map(|e| e.class_index).collect();
    assert_eq!(order, vec![0, 1, 2, 3, 4]);
    assert_eq!(result.ranking.top().label, "student_0");

    // The excluded class 5 ties class 4, so adding it back must give 1.
    let total: f64 = result.ranking.iter().map(|e| e.probability).sum::<f64>()
        + result.ranking.entries[4].probability;
    assert!((total - 1.0).abs() < 1e-6, "{total}");
    assert_eq!(result.bbox, reference_box());
    assert_eq!(result.n_components, 2);
    assert_eq!(result.policy, CombinationPolicy::OriginalHistogramGabor);
}

#[test]
fn test_missing_artifacts_name_the_key() {
    let store = Arc::new(CountingStore::missing());
    let rec = recognizer(vec![reference_box()], store, CombinationPolicy::OriginalHistogramGabor);
    let err = rec.recognize(&gradient_frame(), 7).unwrap_err();
    assert!(matches!(err, RecognitionError::ArtifactNotFound { .. }), "{err}");
    let msg = err.to_string();
    assert!(msg.contains("n_components=7"), "{msg}");
    assert!(msg.contains("pca/original_7"), "{msg}");
    assert!(!err.is_client_error());
}

#[test]
fn test_failed_load_is_retried() {
    let store = Arc::new(CountingStore::missing());
    let rec = recognizer(vec![reference_box()], Arc::clone(&store), CombinationPolicy::OriginalHistogramGabor);
    assert!(rec.recognize(&gradient_frame(), 7).is_err());
    assert!(rec.recognize(&gradient_frame(), 7).is_err());
    assert_eq!(store.projections.load(Ordering::SeqCst), 2);
}

#[test]
fn test_same_bytes_same_ranking() {
    let store = Arc::new(CountingStore::with_intercept(vec![0.3, 0.1, 0.2, 0.0, 0.5, 0.4]));
    let rec = recognizer(vec![reference_box()], Arc::clone(&store), CombinationPolicy::OriginalHistogramGabor);
    let bytes = png_bytes(&gradient_frame());

    let first = rec.recognize_bytes(&bytes, 3).unwrap();
    let second = rec.recognize_bytes(&bytes, 3).unwrap();
    assert_eq!(first, second);

    // Three projections and one classifier, loaded once; no means for this policy.
    assert_eq!(store.projections.load(Ordering::SeqCst), 3);
    assert_eq!(store.classifiers.load(Ordering::SeqCst), 1);
    assert_eq!(store.means.load(Ordering::SeqCst), 0);
}

#[test]
fn test_concurrent_requests_load_once() {
    let store = Arc::new(CountingStore::with_intercept(vec![0.0; 6]));
    let rec = Arc::new(recognizer(
        vec![reference_box()],
        Arc::clone(&store),
        CombinationPolicy::OriginalHistogramGabor,
    ));
    let frame = Arc::new(gradient_frame());

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let rec = Arc::clone(&rec);
            let frame = Arc::clone(&frame);
            std::thread::spawn(move || rec.recognize(&frame, 4).unwrap())
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert!(results.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(store.projections.load(Ordering::SeqCst), 3);
    assert_eq!(store.classifiers.load(Ordering::SeqCst), 1);
    assert_eq!(rec.cached_keys().len(), 1);
}

#[test]
fn test_means_shared_across_dimensionalities() {
    let store = Arc::new(CountingStore::with_intercept(vec![0.0; 6]));
    let rec = recognizer(vec![reference_box()], Arc::clone(&store), CombinationPolicy::Histogram);
    rec.preload(2).unwrap();
    rec.preload(5).unwrap();
    assert_eq!(store.means.load(Ordering::SeqCst), 1);
    assert_eq!(store.classifiers.load(Ordering::SeqCst), 2);
    let keys: Vec<u32> = rec.cached_keys().iter().map(|k| k.n_components).collect();
    assert_eq!(keys, vec![2, 5]);
}

#[test]
fn test_label_count_mismatch_is_configuration_error() {
    let store = Arc::new(CountingStore::with_intercept(vec![0.0; 7]));
    let rec = recognizer(vec![reference_box()], store, CombinationPolicy::OriginalHistogramGabor);
    let err = rec.recognize(&gradient_frame(), 2).unwrap_err();
    assert!(matches!(err, RecognitionError::Configuration(_)), "{err}");
}

#[test]
fn test_undecodable_upload_is_malformed() {
    let store = Arc::new(CountingStore::with_intercept(vec![0.0; 6]));
    let rec = recognizer(vec![reference_box()], Arc::clone(&store), CombinationPolicy::OriginalHistogramGabor);
    let err = rec.recognize_bytes(b"definitely not an image", 2).unwrap_err();
    assert!(matches!(err, RecognitionError::MalformedInput(_)), "{err}");
    assert!(err.is_client_error());
    assert_eq!(store.loads(), 0);
}

#[test]
fn test_zero_components_rejected() {
    let store = Arc::new(CountingStore::with_intercept(vec![0.0; 6]));
    let rec = recognizer(vec![reference_box()], store, CombinationPolicy::OriginalHistogramGabor);
    assert!(matches!(
        rec.recognize(&gradient_frame(), 0),
        Err(RecognitionError::MalformedInput(_))
    ));
}
