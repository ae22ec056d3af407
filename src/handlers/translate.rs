//! # Translation Handler
//!
//! `POST /` takes a multipart form with a `language` field and an audio `file`,
//! transcribes the audio, translates the transcript and returns both.
//!
//! ## Request lifecycle:
//! 1. Read and validate the form (nothing touches the disk on rejection)
//! 2. Save the audio to a uniquely named scratch file
//! 3. Transcribe on the blocking pool
//! 4. Resolve the language name to a code, then translate on the blocking pool
//! 5. Delete the scratch file, whatever happened in 3 and 4
//! 6. Respond

use actix_multipart::Multipart;
use actix_web::{http::header::ContentType, web, HttpResponse};
use futures_util::StreamExt;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use crate::error::{AppError, AppResult};
use crate::languages;
use crate::state::AppState;
use crate::translation;
use crate::upload::ScratchFile;

const INDEX_HTML: &str = include_str!("../../templates/index.html");

/// Limit for every form field other than the audio file.
const MAX_TEXT_FIELD_SIZE: usize = 64 * 1024;

/// Successful response body.
#[derive(Debug, Serialize)]
pub struct ResponsePayload {
    pub transcript: String,
    pub translation: String,
    pub detected_language: String,
    /// The language name exactly as submitted, e.g. "Spanish"
    pub target_language: String,
    pub model_info: String,
}

struct UploadedAudio {
    filename: String,
    bytes: Vec<u8>,
}

#[derive(Default)]
struct TranslateForm {
    language: Option<String>,
    file: Option<UploadedAudio>,
}

impl TranslateForm {
    /// Checks run in a fixed order: language, file, file name.
    fn validate(self) -> AppResult<(String, UploadedAudio)> {
        let language = match self.language {
            Some(language) if !language.is_empty() => language,
            _ => return Err(AppError::BadRequest("No language selected".to_string())),
        };
        let file = self
            .file
            .ok_or_else(|| AppError::BadRequest("No file uploaded".to_string()))?;
        if file.filename.is_empty() {
            return Err(AppError::BadRequest("No file selected".to_string()));
        }
        Ok((language, file))
    }
}

/// Collect the `language` and `file` fields; anything else is drained and ignored.
async fn read_form(mut payload: Multipart, max_file_size: usize) -> AppResult<TranslateForm> {
    let mut form = TranslateForm::default();

    while let Some(field) = payload.next().await {
        let mut field = field?;
        let name = field.name().unwrap_or_default().to_string();
        let filename = field
            .content_disposition()
            .and_then(|cd| cd.get_filename())
            .unwrap_or_default()
            .to_string();

        let is_file = name == "file";
        let limit = if is_file { max_file_size } else { MAX_TEXT_FIELD_SIZE };
        let mut data = Vec::new();
        while let Some(chunk) = field.next().await {
            let chunk = chunk?;
            if data.len() + chunk.len() > limit {
                let message = if is_file {
                    format!("File too large: upload exceeds {} bytes", limit)
                } else {
                    format!("Invalid form data: field '{}' exceeds {} bytes", name, limit)
                };
                return Err(AppError::BadRequest(message));
            }
            data.extend_from_slice(&chunk);
        }

        match name.as_str() {
            "language" => {
                let language = String::from_utf8(data).map_err(|_| {
                    AppError::BadRequest("Invalid form data: language is not UTF-8".to_string())
                })?;
                form.language = Some(language);
            }
            "file" => {
                form.file = Some(UploadedAudio {
                    filename,
                    bytes: data,
                })
            }
            other => debug!("Ignoring form field '{}'", other),
        }
    }

    Ok(form)
}

/// `GET /`: the upload form.
pub async fn upload_form() -> HttpResponse {
    HttpResponse::Ok()
        .content_type(ContentType::html())
        .body(INDEX_HTML)
}

/// `POST /`: transcribe the uploaded audio and translate the transcript.
pub async fn transcribe_and_translate(
    state: web::Data<AppState>,
    payload: Multipart,
) -> AppResult<HttpResponse> {
    let start_time = Instant::now();

    let form = read_form(payload, state.config.upload.max_file_size_bytes()).await?;
    let (language, audio) = form.validate()?;
    info!(
        "Received {} ({} bytes) for translation to {}",
        audio.filename,
        audio.bytes.len(),
        language
    );

    let _active = state.track_translation();
    let scratch = ScratchFile::persist(&state.config.upload.dir, &audio.filename, &audio.bytes).await?;
    drop(audio);

    let outcome = process(&state, &scratch, language).await;
    scratch.remove();

    let payload = outcome?;
    info!(
        "Request completed in {}ms",
        start_time.elapsed().as_millis()
    );
    Ok(HttpResponse::Ok().json(payload))
}

/// Everything between persisting the upload and deleting it.
async fn process(state: &AppState, scratch: &ScratchFile, language: String) -> AppResult<ResponsePayload> {
    let speech_to_text = Arc::clone(&state.speech_to_text);
    let path = scratch.path().to_path_buf();
    let transcription = web::block(move || speech_to_text.transcribe(&path)).await??;
    debug!(
        "Transcript ({}): {}",
        transcription.detected_language, transcription.text
    );

    let target_code = languages::resolve(&language)?;

    let translation = match translation::blank_translation(&transcription.text) {
        Some(blank) => {
            debug!("Transcript is blank, skipping translation");
            blank
        }
        None => {
            let translator = Arc::clone(&state.translator);
            let transcript = transcription.text.clone();
            web::block(move || translator.translate(&transcript, target_code)).await??
        }
    };

    Ok(ResponsePayload {
        transcript: transcription.text,
        translation: translation.translated_text,
        detected_language: transcription.detected_language,
        target_language: language,
        model_info: state.model_info(),
    })
}
