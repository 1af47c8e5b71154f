//! Prompt template and input validation for UGC ad generation.
//!
//! The prompt sent to the API is derived from the user's product name and
//! hook line, wrapped in a fixed template tuned for authentic-looking
//! vertical UGC clips.

use super::client::KieError;

/// Render the full generation prompt from product name and hook text.
pub fn build_prompt(product: &str, hook: &str) -> String {
    format!(
        "UGC TikTok video 9:16 vertical 15 seconds. \n\
         Young person excited unboxing {product}.\n\
         Hook: \"{hook}\"\n\
         Natural bedroom lighting, iPhone aesthetic, authentic genuine reaction.\n\
         Trendy, engaging, real UGC style (not commercial).\n\
         Close-up shots, natural movements, product featured."
    )
}

/// Check that an image URL is well-formed and uses http(s).
pub fn validate_image_url(url: &str) -> Result<(), KieError> {
    let parsed = reqwest::Url::parse(url).map_err(|_| KieError::InvalidImageUrl {
        url: url.to_string(),
    })?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(KieError::InvalidImageUrl {
            url: url.to_string(),
        });
    }
    Ok(())
}

/// Validate the three user-supplied fields before a job may be submitted.
///
/// The UI boundary calls this to disable submission rather than surface a
/// runtime error; a blank field here never reaches the API client.
pub fn validate_inputs(product: &str, hook: &str, image_url: &str) -> Result<(), KieError> {
    if product.trim().is_empty() || hook.trim().is_empty() {
        return Err(KieError::EmptyPrompt);
    }
    validate_image_url(image_url)
}
