//! Subject listing, file enrollment and recognition

use bytes::Bytes;
use std::path::Path;

use super::{emit, CommandContext};
use crate::acquisition::declared_type_for;
use crate::session::{CaptureMethod, EnrollmentSession};
use crate::submission::SubmitOutcome;
use crate::utils::error::AppResult;

pub async fn subjects(ctx: &CommandContext, pending_only: bool) -> AppResult<()> {
    let session = ctx.session().await;
    session.refresh_subjects().await?;

    let subjects = if pending_only {
        session.roster().pending()
    } else {
        session.roster().list()
    };
    emit(&subjects)
}

pub async fn enroll(ctx: &CommandContext, subject_id: &str, file: &Path) -> AppResult<()> {
    let session = ctx.session().await;
    warn_if_unknown(&session, subject_id).await;

    session.select_subject(Some(subject_id)).await;
    session.select_method(CaptureMethod::Upload).await;

    let accepted = session.accept_path(file).await?;
    tracing::info!("Uploading {} ({} bytes)", accepted.filename, accepted.size);

    submit_with_progress(&session).await
}

/// Submit the session's artifact, logging progress as it moves
pub(crate) async fn submit_with_progress(session: &EnrollmentSession) -> AppResult<()> {
    let mut progress = session.submissions().subscribe_progress();
    let reporter = tokio::spawn(async move {
        while progress.changed().await.is_ok() {
            let percent = *progress.borrow_and_update();
            tracing::info!("Upload progress: {}%", percent);
        }
    });

    let outcome = session.submit().await;
    reporter.abort();

    match outcome? {
        SubmitOutcome::Succeeded(response) => emit(&response),
        SubmitOutcome::Skipped(reason) => {
            tracing::warn!("Nothing submitted: {:?}", reason);
            Ok(())
        }
    }
}

pub async fn recognize(ctx: &CommandContext, image: &Path) -> AppResult<()> {
    let session = ctx.session().await;
    let bytes = tokio::fs::read(image).await?;
    let mime_type = declared_type_for(image);

    let result = session.recognize(Bytes::from(bytes), mime_type).await?;
    emit(&result)
}

async fn warn_if_unknown(session: &EnrollmentSession, subject_id: &str) {
    match session.refresh_subjects().await {
        Ok(_) => match session.roster().get(subject_id) {
            Some(subject) if subject.trained => {
                tracing::warn!("{} ({}) is already enrolled; re-enrolling", subject.name, subject.id)
            }
            Some(_) => {}
            None => tracing::warn!("Subject {} is not in the subject listing", subject_id),
        },
        Err(e) => tracing::warn!("Could not load subjects: {}", e),
    }
}
