//! Decoding of the `{ "ok": .., "result": .. }` response envelope used by
//! Bot-API style update endpoints.

use super::error::SourceError;
use super::update::RawUpdate;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct ResponseEnvelope {
    ok: bool,
    #[serde(default)]
    result: Option<Vec<RawUpdate>>,
    #[serde(default)]
    error_code: Option<i64>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    #[serde(default)]
    retry_after: Option<u64>,
}

/// Unwraps a raw update-list response body into its updates.
///
/// Malformed JSON and `"ok": false` responses both surface as [`SourceError`]; an
/// `"ok": true` response without a `result` field yields an empty batch.
pub fn decode_updates_response(body: &[u8]) -> Result<Vec<RawUpdate>, SourceError> {
    let envelope: ResponseEnvelope = serde_json::from_slice(body)
        .map_err(|err| SourceError::new(anyhow::Error::new(err).context("invalid response body")))?;

    if !envelope.ok {
        let description = envelope
            .description
            .unwrap_or_else(|| "request rejected without description".to_owned());
        let retry_after = envelope.parameters.and_then(|params| params.retry_after);
        return Err(
            SourceError::api(envelope.error_code, description).with_retry_after(retry_after),
        );
    }

    Ok(envelope.result.unwrap_or_default())
}
