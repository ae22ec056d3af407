//! # Application State Management
//!
//! Shared state handed to every HTTP request handler: the loaded models, the
//! configuration and the request counters.
//!
//! ## Key Rust Concepts:
//!
//! ### Arc<dyn Trait>
//! - **Purpose**: one model instance shared by every worker thread
//! - **dyn**: handlers only see the `SpeechToText`/`Translator` contracts, so
//!   tests can inject fakes without loading any weights
//!
//! ### Arc<RwLock<T>> Pattern
//! - **Arc**: many handlers hold a reference to the same metrics
//! - **RwLock**: concurrent readers (the health endpoint) or one writer (middleware)
//!
//! ## Lock poisoning:
//! A panic while holding the metrics lock must not take the counters down with it,
//! so poisoned locks are recovered with `PoisonError::into_inner`. The model
//! locks are recovered the same way through [`lock_model`].

use crate::config::AppConfig;
use crate::transcription::SpeechToText;
use crate::translation::Translator;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

/// The main application state shared across all HTTP request handlers.
///
/// Cloning is cheap: every field is an `Arc` or `Copy`.
#[derive(Clone)]
pub struct AppState {
    /// Configuration, fixed once the server is running
    pub config: Arc<AppConfig>,

    /// Speech-to-text model, loaded once at startup
    pub speech_to_text: Arc<dyn SpeechToText>,

    /// Translation model, loaded once at startup
    pub translator: Arc<dyn Translator>,

    /// Request counters, updated by the metrics middleware
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// When the server started
    pub start_time: Instant,
}

/// Counters collected across all HTTP requests.
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    /// Total number of HTTP requests processed since server start
    pub request_count: u64,

    /// Total number of 4xx/5xx responses since server start
    pub error_count: u64,

    /// Upload requests currently being transcribed or translated
    pub active_translations: u32,

    /// Key: endpoint name (e.g., "POST /")
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Per-endpoint request statistics.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        speech_to_text: Arc<dyn SpeechToText>,
        translator: Arc<dyn Translator>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            speech_to_text,
            translator,
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
        }
    }

    fn metrics_read(&self) -> RwLockReadGuard<'_, AppMetrics> {
        self.metrics.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn metrics_write(&self) -> RwLockWriteGuard<'_, AppMetrics> {
        self.metrics.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Description of both loaded models, returned with every translation.
    pub fn model_info(&self) -> String {
        format!(
            "Transcription: {}; translation: {}",
            self.speech_to_text.model_name(),
            self.translator.model_name()
        )
    }

    /// Called by the metrics middleware for every request.
    pub fn increment_request_count(&self) {
        self.metrics_write().request_count += 1;
    }

    pub fn increment_error_count(&self) {
        self.metrics_write().error_count += 1;
    }

    /// Record one finished request against its endpoint (e.g. "GET /health").
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics_write();
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Mark an upload as in progress until the returned guard is dropped.
    pub fn track_translation(&self) -> ActiveTranslation {
        self.metrics_write().active_translations += 1;
        ActiveTranslation {
            metrics: Arc::clone(&self.metrics),
        }
    }

    /// Copy of the current metrics, so no lock is held while serializing.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics_read().clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

/// Decrements the active translation counter when dropped, so early returns
/// and errors in the handler are counted correctly.
pub struct ActiveTranslation {
    metrics: Arc<RwLock<AppMetrics>>,
}

impl Drop for ActiveTranslation {
    fn drop(&mut self) {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        metrics.active_translations = metrics.active_translations.saturating_sub(1);
    }
}

impl EndpointMetric {
    /// Average = Total Duration ÷ Number of Requests
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Fraction of failed requests, 0.0 to 1.0
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

/// Lock a loaded model, recovering it if an earlier inference panicked.
///
/// Both models clear their decoder caches at the start of every call, so the
/// value left behind by a panic is still usable.
pub(crate) fn lock_model<T>(model: &Mutex<T>) -> MutexGuard<'_, T> {
    model.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::transcription::TranscriptionResult;
    use crate::translation::TranslationResult;
    use anyhow::{anyhow, Result};
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Speech-to-text stand-in returning a fixed transcript.
    #[derive(Default)]
    pub(crate) struct FakeSpeechToText {
        pub transcript: String,
        pub fail: bool,
        pub calls: AtomicUsize,
        pub last_path: Mutex<Option<PathBuf>>,
    }

    impl FakeSpeechToText {
        pub fn saying(transcript: &str) -> Self {
            Self {
                transcript: transcript.to_string(),
                ..Default::default()
            }
        }

        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Default::default()
            }
        }
    }

    impl SpeechToText for FakeSpeechToText {
        fn transcribe(&self, path: &Path) -> Result<TranscriptionResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_path.lock().unwrap() = Some(path.to_path_buf());
            if !path.exists() {
                return Err(anyhow!("scratch file missing: {}", path.display()));
            }
            if self.fail {
                return Err(anyhow!("decoder exploded"));
            }
            Ok(TranscriptionResult {
                text: self.transcript.clone(),
                detected_language: "en".to_string(),
            })
        }

        fn model_name(&self) -> String {
            "fake-whisper".to_string()
        }
    }

    /// Translator stand-in that tags the text with the target code.
    #[derive(Default)]
    pub(crate) struct FakeTranslator {
        pub fail: bool,
        pub calls: AtomicUsize,
    }

    impl FakeTranslator {
        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Default::default()
            }
        }
    }

    impl Translator for FakeTranslator {
        fn translate(&self, source_text: &str, target_code: &str) -> Result<TranslationResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(anyhow!("out of memory"));
            }
            Ok(TranslationResult {
                translated_text: format!("[{}] {}", target_code, source_text),
            })
        }

        fn model_name(&self) -> String {
            "fake-madlad".to_string()
        }
    }

    fn state() -> AppState {
        AppState::new(
            AppConfig::default(),
            Arc::new(FakeSpeechToText::saying("hello")),
            Arc::new(FakeTranslator::default()),
        )
    }

    #[test]
    fn test_model_info_names_both_models() {
        assert_eq!(
            state().model_info(),
            "Transcription: fake-whisper; translation: fake-madlad"
        );
    }

    #[test]
    fn test_endpoint_metrics_accumulate() {
        let state = state();
        state.record_endpoint_request("POST /", 100, false);
        state.record_endpoint_request("POST /", 300, true);

        let metrics = state.get_metrics_snapshot();
        let post = &metrics.endpoint_metrics["POST /"];
        assert_eq!(post.request_count, 2);
        assert_eq!(post.error_count, 1);
        assert_eq!(post.average_duration_ms(), 200.0);
        assert_eq!(post.error_rate(), 0.5);
    }

    #[test]
    fn test_active_translation_guard_decrements_on_drop() {
        let state = state();
        let first = state.track_translation();
        let second = state.track_translation();
        assert_eq!(state.get_metrics_snapshot().active_translations, 2);

        drop(first);
        drop(second);
        assert_eq!(state.get_metrics_snapshot().active_translations, 0);
    }

    #[test]
    fn test_empty_endpoint_metric_has_zero_rates() {
        let metric = EndpointMetric::default();
        assert_eq!(metric.average_duration_ms(), 0.0);
        assert_eq!(metric.error_rate(), 0.0);
    }

    #[test]
    fn test_lock_model_recovers_from_poisoning() {
        let model = Arc::new(Mutex::new(vec![1u32, 2, 3]));

        let poisoner = Arc::clone(&model);
        let outcome = std::thread::spawn(move || {
            let _guard = poisoner.lock().unwrap();
            panic!("inference blew up");
        })
        .join();
        assert!(outcome.is_err());
        assert!(model.is_poisoned());

        let mut guard = lock_model(&model);
        guard.push(4);
        assert_eq!(*guard, vec![1, 2, 3, 4]);
        drop(guard);

        assert_eq!(lock_model(&model).len(), 4);
    }
}
