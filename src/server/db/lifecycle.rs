//! Row mutations shared by every store backend.
//!
//! Each function mutates an already-loaded session in place and refuses
//! changes the lifecycle does not allow. Backends load the row under their
//! own lock or `FOR UPDATE`, apply one of these, then persist the result.

use chrono::{DateTime, Utc};

use super::StoreError;
use crate::models::{CallSession, SessionStatus, SessionTimings, StatusExtras};

fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    (to - from).num_seconds().max(0)
}

/// Move `session` to `next`, stamping `started_at` on `CONNECTING` and the
/// end fields on terminal entry.
pub fn apply_status(
    session: &mut CallSession,
    next: SessionStatus,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    if !session.status.can_transition_to(next) {
        return Err(StoreError::InvalidTransition {
            from: session.status,
            to: next,
        });
    }

    if next == SessionStatus::Connecting && session.started_at.is_none() {
        session.started_at = Some(now.max(session.created_at));
    }

    if next.is_terminal() {
        let started = session.started_at.unwrap_or(session.created_at);
        let ended = now.max(started);
        session.ended_at = Some(ended);
        session.duration_seconds = Some(session.started_at.map_or(0, |s| seconds_between(s, ended)));
    }

    session.status = next;
    session.updated_at = now;
    Ok(())
}

/// Hang up: `COMPLETED` when the call rang or connected, `FAILED` before that.
pub fn apply_close(
    session: &mut CallSession,
    reason: Option<&str>,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    let target = session
        .status
        .close_target()
        .ok_or(StoreError::InvalidTransition {
            from: session.status,
            to: SessionStatus::Completed,
        })?;
    session.disconnect_reason = reason.map(str::to_string);
    apply_status(session, target, now)
}

/// `apply_status` plus the fields that travel with it. The row is only
/// touched once the transition itself is known to be legal.
pub fn apply_status_with(
    session: &mut CallSession,
    next: SessionStatus,
    extras: &StatusExtras,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    if !session.status.can_transition_to(next) {
        return Err(StoreError::InvalidTransition {
            from: session.status,
            to: next,
        });
    }
    if extras.answered {
        stamp_answer(session, now);
    }
    if let Some((code, message)) = &extras.error {
        apply_error(session, code, message, now)?;
    }
    apply_status(session, next, now)?;
    apply_extra_artifacts(session, extras, now);
    Ok(())
}

pub fn apply_close_with(
    session: &mut CallSession,
    reason: Option<&str>,
    extras: &StatusExtras,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    apply_close(session, reason, now)?;
    apply_extra_artifacts(session, extras, now);
    Ok(())
}

/// Answer time runs from `started_at`; ring time from the transition into
/// `RINGING`, which is the row's last write while it rings.
fn stamp_answer(session: &mut CallSession, now: DateTime<Utc>) {
    if let Some(started) = session.started_at {
        session.answer_seconds = Some(seconds_between(started, now));
    }
    if session.status == SessionStatus::Ringing {
        session.ring_seconds = Some(seconds_between(session.updated_at, now));
    }
}

fn apply_extra_artifacts(session: &mut CallSession, extras: &StatusExtras, now: DateTime<Utc>) {
    if extras.recording_url.is_some() {
        apply_artifacts(session, extras.recording_url.as_deref(), None, now);
    }
}

pub fn apply_timing(
    session: &mut CallSession,
    timings: &SessionTimings,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    if session.status.is_terminal() {
        return Err(StoreError::Terminal);
    }
    if !timings.is_consistent_with(session) {
        return Err(StoreError::InvalidTiming(
            "timestamps must satisfy ended_at >= started_at >= created_at".to_string(),
        ));
    }
    let negative = [timings.duration_seconds, timings.ring_seconds, timings.answer_seconds]
        .into_iter()
        .flatten()
        .any(|v| v < 0);
    if negative {
        return Err(StoreError::InvalidTiming("durations must not be negative".to_string()));
    }

    if timings.started_at.is_some() {
        session.started_at = timings.started_at;
    }
    if timings.ended_at.is_some() {
        session.ended_at = timings.ended_at;
    }
    if timings.duration_seconds.is_some() {
        session.duration_seconds = timings.duration_seconds;
    }
    if timings.ring_seconds.is_some() {
        session.ring_seconds = timings.ring_seconds;
    }
    if timings.answer_seconds.is_some() {
        session.answer_seconds = timings.answer_seconds;
    }
    session.updated_at = now;
    Ok(())
}

/// Assign the provider-side id. Re-assigning the same id is a no-op.
pub fn apply_external_id(
    session: &mut CallSession,
    provider_id: &str,
    external_id: &str,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    match session.external_id.as_deref() {
        Some(existing) if existing == external_id => return Ok(()),
        Some(_) => return Err(StoreError::ConflictingExternalId),
        None => {}
    }
    if session.status.is_terminal() {
        return Err(StoreError::Terminal);
    }
    session.provider_id = Some(provider_id.to_string());
    session.external_id = Some(external_id.to_string());
    session.updated_at = now;
    Ok(())
}

pub fn apply_error(
    session: &mut CallSession,
    code: &str,
    message: &str,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    if session.status.is_terminal() {
        return Err(StoreError::Terminal);
    }
    session.error_code = Some(code.to_string());
    session.error_message = Some(message.to_string());
    session.updated_at = now;
    Ok(())
}

pub fn apply_routing(
    session: &mut CallSession,
    provider_id: &str,
    from_phone: &str,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    if session.status.is_terminal() {
        return Err(StoreError::Terminal);
    }
    session.provider_id = Some(provider_id.to_string());
    session.from_phone = from_phone.to_string();
    session.updated_at = now;
    Ok(())
}

pub fn apply_transfer(
    session: &mut CallSession,
    to_phone: &str,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    if session.status.is_terminal() {
        return Err(StoreError::Terminal);
    }
    session.is_transferred = true;
    session.transfer_to = Some(to_phone.to_string());
    session.updated_at = now;
    Ok(())
}

/// Post-processing artifacts are the one write a terminal session accepts.
pub fn apply_artifacts(
    session: &mut CallSession,
    recording_url: Option<&str>,
    transcript_url: Option<&str>,
    now: DateTime<Utc>,
) {
    if let Some(url) = recording_url {
        session.recording_url = Some(url.to_string());
    }
    if let Some(url) = transcript_url {
        session.transcript_url = Some(url.to_string());
    }
    session.updated_at = now;
}
