//! KIE.ai video generation API integration.
//!
//! A thin, stateless client over the provider's job-creation and job-status
//! endpoints, plus the prompt template used for UGC ad generation. The
//! polling lifecycle lives in [`crate::session`], not here.

mod client;
mod prompt;

pub use client::{
    GenerationRequest, JobHandle, JobStatus, KieClient, KieError, QualityMode, DEFAULT_ASPECT_RATIO,
    DEFAULT_DURATION, DEFAULT_MODEL, KIE_API_BASE_URL, KIE_API_KEY_ENV,
};
pub use prompt::{build_prompt, validate_image_url, validate_inputs};
