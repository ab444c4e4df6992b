use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use fusion_contracts::codec::encode_bytes;
use fusion_contracts::events::{SessionLog, WorkflowEvent};
use fusion_contracts::fusion::{
    build, FusionParameters, FusionRequest, FusionResult, GENERIC_FAILURE_MESSAGE, MAX_IMAGES,
    MIN_IMAGES,
};
use fusion_contracts::FusionError;
use indexmap::IndexMap;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::download::SaveAction;
use crate::media::{load_image, LoadedImage};
use crate::provider::FusionProvider;

pub const TOO_MANY_IMAGES_MESSAGE: &str = "You can upload at most 4 images";
pub const TOO_FEW_IMAGES_MESSAGE: &str = "Please upload at least 2 images";
pub const ALREADY_SUBMITTING_MESSAGE: &str = "A fusion is already in progress";

static NEXT_ASSET_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one selected image. Unique for the life of the process,
/// even when the same file is picked twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AssetId(u64);

impl AssetId {
    fn allocate() -> Self {
        Self(NEXT_ASSET_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "img-{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct ImageAsset {
    pub id: AssetId,
    pub path: PathBuf,
    pub name: String,
    pub mime: &'static str,
    /// Bytes as read and checked when the file was added. Submissions send
    /// these, not whatever the file holds later.
    pub content: Arc<[u8]>,
    /// `data:` URL of the content.
    pub preview: String,
}

impl ImageAsset {
    fn from_loaded(loaded: LoadedImage) -> Self {
        let preview = loaded.preview_url();
        Self {
            id: AssetId::allocate(),
            path: loaded.path,
            name: loaded.name,
            mime: loaded.mime,
            content: loaded.bytes.into(),
            preview,
        }
    }
}

/// Result of a successful submission together with what produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FusionOutcome {
    pub image_url: String,
    pub params: FusionParameters,
    pub image_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Phase {
    Editing,
    Submitting,
    Resulted(FusionOutcome),
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowState<'a> {
    Empty,
    Collecting(usize),
    Submitting,
    Resulted(&'a FusionOutcome),
    Failed(&'a str),
}

/// Snapshot taken when a submission starts. Later edits to the workflow do
/// not affect it.
#[derive(Debug, Clone)]
pub struct Submission {
    generation: u64,
    params: FusionParameters,
    sources: Vec<(AssetId, Arc<[u8]>)>,
}

impl Submission {
    /// Submission counter value this snapshot was taken under.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn params(&self) -> &FusionParameters {
        &self.params
    }

    pub fn image_count(&self) -> usize {
        self.sources.len()
    }

    /// Encodes every image concurrently and builds the request once all of
    /// them are done, in insertion order.
    pub async fn prepare(&self) -> Result<FusionRequest, FusionError> {
        let mut tasks = JoinSet::new();
        for (index, (id, content)) in self.sources.iter().enumerate() {
            let id = *id;
            let content = Arc::clone(content);
            tasks.spawn(async move { (index, id, encode_bytes(&content)) });
        }

        let mut encoded: Vec<Option<String>> = vec![None; self.sources.len()];
        while let Some(joined) = tasks.join_next().await {
            let (index, id, image) = joined
                .map_err(|err| FusionError::Internal(format!("encode task failed: {err}")))?;
            debug!(asset = %id, index, "image encoded");
            encoded[index] = Some(image);
        }
        let images = encoded
            .into_iter()
            .collect::<Option<Vec<String>>>()
            .ok_or_else(|| FusionError::Internal("encode batch incomplete".to_string()))?;
        Ok(build(images, &self.params))
    }
}

/// Client-side state of one fusion editing session.
///
/// Holds up to four images in insertion order, the current parameters and
/// the outcome of the last submission. Any edit to the image set clears a
/// previous result or error.
///
/// Every workflow carries a session id that tags its tracing output and,
/// when a [`SessionLog`] is attached, each logged [`WorkflowEvent`].
pub struct FusionWorkflow {
    session_id: String,
    images: IndexMap<AssetId, ImageAsset>,
    params: FusionParameters,
    phase: Phase,
    // Bumped by `begin_submission` and `reset`; outcomes carrying an older
    // value are dropped.
    generation: u64,
    log: Option<SessionLog>,
}

impl Default for FusionWorkflow {
    fn default() -> Self {
        Self::new()
    }
}

impl FusionWorkflow {
    pub fn new() -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            images: IndexMap::new(),
            params: FusionParameters::default(),
            phase: Phase::Editing,
            generation: 0,
            log: None,
        }
    }

    /// Appends this session's events to the JSON-lines file at `path`.
    pub fn with_session_log(mut self, path: impl AsRef<Path>) -> Self {
        self.log = Some(SessionLog::new(path.as_ref()));
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn params(&self) -> &FusionParameters {
        &self.params
    }

    pub fn set_params(&mut self, params: FusionParameters) {
        self.params = params;
    }

    pub fn images(&self) -> impl Iterator<Item = &ImageAsset> {
        self.images.values()
    }

    pub fn image(&self, id: AssetId) -> Option<&ImageAsset> {
        self.images.get(&id)
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn state(&self) -> WorkflowState<'_> {
        match &self.phase {
            Phase::Submitting => WorkflowState::Submitting,
            Phase::Resulted(outcome) => WorkflowState::Resulted(outcome),
            Phase::Failed(message) => WorkflowState::Failed(message),
            Phase::Editing if self.images.is_empty() => WorkflowState::Empty,
            Phase::Editing => WorkflowState::Collecting(self.images.len()),
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.phase {
            Phase::Failed(message) => Some(message),
            _ => None,
        }
    }

    pub fn outcome(&self) -> Option<&FusionOutcome> {
        match &self.phase {
            Phase::Resulted(outcome) => Some(outcome),
            _ => None,
        }
    }

    /// Reads and checks every selected file, then appends them all in
    /// selection order. The batch is all-or-nothing.
    pub async fn add_files(&mut self, paths: &[PathBuf]) -> Result<Vec<AssetId>, FusionError> {
        if paths.is_empty() {
            return Ok(Vec::new());
        }
        if self.images.len() + paths.len() > MAX_IMAGES {
            return Err(self.reject(TOO_MANY_IMAGES_MESSAGE.to_string()));
        }

        let mut tasks = JoinSet::new();
        for (index, path) in paths.iter().enumerate() {
            let path = path.clone();
            tasks.spawn(async move { (index, load_image(path).await) });
        }
        let mut loaded: Vec<Option<LoadedImage>> = vec![None; paths.len()];
        let mut failure: Option<FusionError> = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, Ok(image))) => loaded[index] = Some(image),
                Ok((_, Err(err))) => {
                    failure.get_or_insert(err);
                }
                Err(err) => {
                    let err = FusionError::Internal(format!("read task failed: {err}"));
                    failure.get_or_insert(err);
                }
            }
        }
        if let Some(err) = failure {
            let message = err.user_message(GENERIC_FAILURE_MESSAGE);
            self.record(WorkflowEvent::ImagesRejected {
                detail: err.to_string(),
            });
            return Err(self.reject_with(err, message));
        }

        let mut ids = Vec::with_capacity(paths.len());
        for image in loaded.into_iter().flatten() {
            let asset = ImageAsset::from_loaded(image);
            ids.push(asset.id);
            self.images.insert(asset.id, asset);
        }
        self.clear_outcome();
        info!(
            session = %self.session_id,
            added = ids.len(),
            total = self.images.len(),
            "images added"
        );
        self.record(WorkflowEvent::ImagesAdded {
            ids: ids.iter().map(ToString::to_string).collect(),
            total: self.images.len(),
        });
        Ok(ids)
    }

    /// Removes one image. Unknown ids are ignored.
    pub fn remove(&mut self, id: AssetId) -> bool {
        if self.images.shift_remove(&id).is_none() {
            return false;
        }
        self.clear_outcome();
        self.record(WorkflowEvent::ImageRemoved {
            id: id.to_string(),
            total: self.images.len(),
        });
        true
    }

    /// Clears images and any result. A submission still in flight is
    /// abandoned: its outcome is ignored when it arrives.
    pub fn reset(&mut self) {
        self.images.clear();
        self.phase = Phase::Editing;
        self.generation += 1;
        self.record(WorkflowEvent::WorkflowReset);
    }

    /// Checks the guards and moves to `Submitting`. On a guard failure no
    /// remote call may follow; the workflow is left in `Failed`.
    pub fn begin_submission(&mut self) -> Result<Submission, FusionError> {
        if self.phase == Phase::Submitting {
            return Err(FusionError::Validation(ALREADY_SUBMITTING_MESSAGE.to_string()));
        }
        if self.images.len() < MIN_IMAGES {
            return Err(self.reject(TOO_FEW_IMAGES_MESSAGE.to_string()));
        }
        self.generation += 1;
        let submission = Submission {
            generation: self.generation,
            params: self.params.clone(),
            sources: self
                .images
                .values()
                .map(|asset| (asset.id, Arc::clone(&asset.content)))
                .collect(),
        };
        self.phase = Phase::Submitting;
        self.record(WorkflowEvent::SubmissionStarted {
            generation: submission.generation,
            image_count: submission.image_count(),
            mode: submission.params.mode,
        });
        Ok(submission)
    }

    /// Applies the outcome of a submission started with
    /// [`begin_submission`](Self::begin_submission). Outcomes of a
    /// submission that was reset or superseded are dropped.
    pub fn finish_submission(
        &mut self,
        submission: Submission,
        outcome: Result<FusionResult, FusionError>,
    ) {
        let generation = submission.generation;
        if generation != self.generation || self.phase != Phase::Submitting {
            debug!(
                session = %self.session_id,
                generation,
                current = self.generation,
                "stale submission outcome dropped"
            );
            return;
        }
        let (phase, event) = match outcome {
            Ok(FusionResult::Success { image_url }) => {
                info!(session = %self.session_id, %image_url, "fusion succeeded");
                let event = WorkflowEvent::FusionResulted {
                    generation,
                    image_url: image_url.clone(),
                };
                let outcome = FusionOutcome {
                    image_url,
                    image_count: submission.image_count(),
                    params: submission.params,
                };
                (Phase::Resulted(outcome), event)
            }
            Ok(FusionResult::Failure { message }) => {
                warn!(session = %self.session_id, %message, "fusion provider reported failure");
                let event = WorkflowEvent::FusionFailed {
                    generation,
                    message: Some(message.clone()),
                    detail: None,
                };
                (Phase::Failed(message), event)
            }
            Err(err) => {
                warn!(session = %self.session_id, error = %err, "fusion submission failed");
                let event = WorkflowEvent::FusionFailed {
                    generation,
                    message: None,
                    detail: Some(err.to_string()),
                };
                let message = match err {
                    FusionError::Validation(_) | FusionError::Io { .. } => {
                        err.user_message(GENERIC_FAILURE_MESSAGE)
                    }
                    _ => GENERIC_FAILURE_MESSAGE.to_string(),
                };
                (Phase::Failed(message), event)
            }
        };
        self.phase = phase;
        self.record(event);
    }

    /// Runs a whole submission cycle against `provider` and returns the
    /// resulting state.
    pub async fn submit(&mut self, provider: &dyn FusionProvider) -> WorkflowState<'_> {
        let Ok(submission) = self.begin_submission() else {
            return self.state();
        };
        let outcome = match submission.prepare().await {
            Ok(request) => provider.fuse(&request).await,
            Err(err) => Err(err),
        };
        self.finish_submission(submission, outcome);
        self.state()
    }

    /// Save action for the current result, if there is one.
    pub fn download(&self) -> Option<SaveAction> {
        self.outcome()
            .map(|outcome| SaveAction::for_result(&outcome.image_url))
    }

    fn clear_outcome(&mut self) {
        if self.phase != Phase::Submitting {
            self.phase = Phase::Editing;
        }
    }

    fn reject(&mut self, message: String) -> FusionError {
        self.reject_with(FusionError::Validation(message.clone()), message)
    }

    fn reject_with(&mut self, err: FusionError, message: String) -> FusionError {
        if self.phase != Phase::Submitting {
            self.phase = Phase::Failed(message);
        }
        err
    }

    fn record(&mut self, event: WorkflowEvent) {
        let Some(log) = self.log.as_mut() else {
            return;
        };
        if let Err(err) = log.append(&self.session_id, event) {
            warn!(
                session = %self.session_id,
                path = %log.path().display(),
                error = %err,
                "failed writing session log"
            );
        }
    }
}
