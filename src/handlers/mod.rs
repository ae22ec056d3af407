pub mod translate;

pub use translate::*;

use actix_web::web;

/// Register the upload form, the translation endpoint and the health check.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(upload_form))
        .route("/", web::post().to(transcribe_and_translate))
        .route("/health", web::get().to(crate::health::health_check));
}
