use chrono::{DateTime, Utc};

use crate::core::config;
use crate::core::error::AdmissionError;

/// Kind of generation a job performs.
///
/// Selected once at submission time; each variant carries its own
/// validation, cost, and model-selection rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    /// Image generation with the user's trained avatar model
    AvatarImage,
    /// Image generation from a reference image, no trained model required
    ReferenceImage,
    /// Video generation
    Video,
}

impl JobKind {
    /// Whether this kind needs a ready `ActiveModelDescriptor` before it
    /// can be dispatched.
    pub fn requires_model(&self) -> bool {
        matches!(self, JobKind::AvatarImage)
    }

    /// Units debited per requested output.
    pub fn cost_per_output(&self) -> u32 {
        match self {
            JobKind::AvatarImage | JobKind::ReferenceImage => config::generation::IMAGE_UNIT_COST,
            JobKind::Video => config::generation::VIDEO_UNIT_COST,
        }
    }

    /// Maximum outputs a single job of this kind may request.
    pub fn max_outputs(&self) -> u32 {
        match self {
            JobKind::AvatarImage | JobKind::ReferenceImage => config::generation::MAX_IMAGE_OUTPUTS,
            JobKind::Video => 1,
        }
    }

    /// Stable label for logs, metrics, and the audit table.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::AvatarImage => "avatar_image",
            JobKind::ReferenceImage => "reference_image",
            JobKind::Video => "video",
        }
    }
}

/// Output aspect ratio requested by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AspectRatio {
    #[default]
    Square,
    Portrait,
    Landscape,
}

impl AspectRatio {
    /// Wire representation the provider API expects.
    pub fn as_str(&self) -> &'static str {
        match self {
            AspectRatio::Square => "1:1",
            AspectRatio::Portrait => "9:16",
            AspectRatio::Landscape => "16:9",
        }
    }
}

/// The unit of work flowing through the dispatch pipeline.
///
/// Built once at submission time and passed by value; nothing mutates a
/// job mid-flight. The resource cost is fixed here and never recomputed.
#[derive(Debug, Clone)]
pub struct GenerationJob {
    /// Unique job identifier (UUID)
    pub id: String,
    /// Chat that submitted the request and receives status messages
    pub requester_chat: i64,
    /// User whose balance and model the job runs against. Differs from the
    /// requester when an admin generates on a user's behalf.
    pub target_user: i64,
    /// What to generate
    pub kind: JobKind,
    /// Prompt text, already processed upstream
    pub prompt: String,
    /// Requested output aspect ratio
    pub aspect_ratio: AspectRatio,
    /// How many outputs the job produces
    pub outputs: u32,
    /// Units to debit, fixed at enqueue time
    pub cost: u32,
    /// Admin-proxy jobs never debit the target user's balance
    pub admin_proxy: bool,
    /// Job creation timestamp
    pub created_at: DateTime<Utc>,
}

impl GenerationJob {
    /// Validates the raw parameters and builds an immutable job.
    ///
    /// # Errors
    ///
    /// Returns `AdmissionError::InvalidParams` when the prompt is empty or
    /// too long, or the output count is outside the kind's bounds.
    pub fn build(
        requester_chat: i64,
        target_user: i64,
        kind: JobKind,
        prompt: String,
        aspect_ratio: AspectRatio,
        outputs: u32,
        admin_proxy: bool,
    ) -> Result<Self, AdmissionError> {
        let prompt = prompt.trim().to_string();
        if prompt.is_empty() {
            return Err(AdmissionError::InvalidParams("empty prompt".to_string()));
        }
        if prompt.chars().count() > config::generation::MAX_PROMPT_CHARS {
            return Err(AdmissionError::InvalidParams(format!(
                "prompt exceeds {} characters",
                config::generation::MAX_PROMPT_CHARS
            )));
        }
        if outputs == 0 || outputs > kind.max_outputs() {
            return Err(AdmissionError::InvalidParams(format!(
                "output count must be between 1 and {}",
                kind.max_outputs()
            )));
        }

        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            requester_chat,
            target_user,
            kind,
            prompt,
            aspect_ratio,
            outputs,
            cost: outputs * kind.cost_per_output(),
            admin_proxy,
            created_at: Utc::now(),
        })
    }
}
