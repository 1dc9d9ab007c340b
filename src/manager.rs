//! Public management façade (C8).
//!
//! A thin layer over the codec: group a batch of requests by cabinet path,
//! drive [`Cabinet`] through them in order, save once per cabinet if
//! anything mutated it, and report [`Event`]s as it goes. Codec errors are
//! wrapped in [`CabFailure`] with the cabinet path attached; a
//! [`CabError::Cancelled`] is re-thrown unchanged rather than wrapped.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::cabinet::Cabinet;
use crate::ctype::CompressionType;
use crate::error::CabError;
use crate::progress::CancelToken;

/// One operation to perform against a named cabinet.
#[derive(Debug, Clone)]
pub enum Request {
    AddFile { cab_path: PathBuf, source_path: PathBuf, rel_path: String },
    Extract { cab_path: PathBuf, rel_path: String, dest_path: PathBuf },
    Delete { cab_path: PathBuf, rel_path: String },
    Move { cab_path: PathBuf, old_rel_path: String, new_rel_path: String },
}

impl Request {
    fn cab_path(&self) -> &Path {
        match self {
            Request::AddFile { cab_path, .. }
            | Request::Extract { cab_path, .. }
            | Request::Delete { cab_path, .. }
            | Request::Move { cab_path, .. } => cab_path,
        }
    }

}

/// A progress or completion notification emitted while a batch runs.
#[derive(Debug, Clone)]
pub enum Event {
    /// One request against one cabinet finished; `processed` is `false`
    /// for a no-op delete/move/extract that found nothing to do.
    FileProcessed { cab_path: PathBuf, rel_path: String, processed: bool },
    /// Bytes moved for the named file during an add/extract/save.
    Progress { cab_path: PathBuf, rel_path: String, bytes_done: u64, cumulative_bytes_done: u64 },
    /// Every request for this cabinet has been applied (and saved, if any
    /// request mutated it), even if some were no-ops.
    CabinetCompleted { cab_path: PathBuf },
}

/// A codec error that occurred while processing a particular cabinet.
#[derive(Debug, Error)]
#[error("{}: {source}", cab_path.display())]
pub struct CabFailure {
    pub cab_path: PathBuf,
    #[source]
    pub source: CabError,
}

/// Either a genuine failure (wrapped with its cabinet path) or a
/// cancellation, propagated unchanged.
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("operation cancelled")]
    Cancelled,
    #[error(transparent)]
    Failure(#[from] CabFailure),
}

fn wrap(cab_path: &Path, err: CabError) -> ManagerError {
    match err {
        CabError::Cancelled => ManagerError::Cancelled,
        other => ManagerError::Failure(CabFailure { cab_path: cab_path.to_path_buf(), source: other }),
    }
}

/// Runs a batch of requests, grouped by cabinet path in first-seen order.
pub fn run_batch(
    requests: Vec<Request>,
    compression_type: CompressionType,
    cancel: &CancelToken,
    mut on_event: impl FnMut(Event),
) -> Result<(), ManagerError> {
    let mut groups: Vec<(PathBuf, Vec<Request>)> = Vec::new();
    for request in requests {
        let path = request.cab_path().to_path_buf();
        match groups.iter_mut().find(|(p, _)| *p == path) {
            Some((_, reqs)) => reqs.push(request),
            None => groups.push((path, vec![request])),
        }
    }

    let mut cumulative_bytes_done = 0u64;
    for (cab_path, group) in groups {
        cancel.check().map_err(|e| wrap(&cab_path, e))?;
        let needs_create = !cab_path.exists();
        let has_add = group.iter().any(|r| matches!(r, Request::AddFile { .. }));
        if needs_create && !has_add {
            continue;
        }

        let mut cabinet = if needs_create {
            Cabinet::create(cab_path.clone())
        } else {
            Cabinet::open(cab_path.clone()).map_err(|e| wrap(&cab_path, e))?
        };

        let mut mutated = false;
        for request in &group {
            let rel_path = match request {
                Request::AddFile { source_path, rel_path, .. } => {
                    cabinet.add_external_file(source_path, rel_path.clone()).map_err(|e| wrap(&cab_path, e))?;
                    mutated = true;
                    rel_path.clone()
                }
                Request::Extract { rel_path, dest_path, .. } => {
                    let cab_path_for_progress = cab_path.clone();
                    let mut last_done = 0u64;
                    let processed = cabinet
                        .extract_to_file(
                            rel_path,
                            dest_path,
                            |path, done| {
                                cumulative_bytes_done += done.saturating_sub(last_done);
                                last_done = done;
                                on_event(Event::Progress {
                                    cab_path: cab_path_for_progress.clone(),
                                    rel_path: path.to_string(),
                                    bytes_done: done,
                                    cumulative_bytes_done,
                                });
                            },
                            cancel,
                        )
                        .map_err(|e| wrap(&cab_path, e))?;
                    if !processed {
                        tracing::warn!(rel_path = %rel_path, "batch: extract found nothing to do");
                    }
                    on_event(Event::FileProcessed { cab_path: cab_path.clone(), rel_path: rel_path.clone(), processed });
                    continue;
                }
                Request::Delete { rel_path, .. } => {
                    let processed = cabinet.delete_file(rel_path).map_err(|e| wrap(&cab_path, e))?;
                    if !processed {
                        tracing::warn!(rel_path = %rel_path, "batch: delete found nothing to do");
                    }
                    mutated = mutated || processed;
                    on_event(Event::FileProcessed { cab_path: cab_path.clone(), rel_path: rel_path.clone(), processed });
                    continue;
                }
                Request::Move { old_rel_path, new_rel_path, .. } => {
                    let processed = cabinet.move_file(old_rel_path, new_rel_path).map_err(|e| wrap(&cab_path, e))?;
                    if !processed {
                        tracing::warn!(rel_path = %old_rel_path, "batch: move found nothing to do");
                    }
                    mutated = mutated || processed;
                    on_event(Event::FileProcessed { cab_path: cab_path.clone(), rel_path: new_rel_path.clone(), processed });
                    continue;
                }
            };
            on_event(Event::FileProcessed { cab_path: cab_path.clone(), rel_path, processed: true });
        }

        if mutated {
            let cab_path_for_progress = cab_path.clone();
            let mut last: Option<(String, u64)> = None;
            cabinet
                .save(
                    compression_type,
                    |path, done| {
                        let prev = match &last {
                            Some((p, done)) if p == path => *done,
                            _ => 0,
                        };
                        cumulative_bytes_done += done.saturating_sub(prev);
                        last = Some((path.to_string(), done));
                        on_event(Event::Progress {
                            cab_path: cab_path_for_progress.clone(),
                            rel_path: path.to_string(),
                            bytes_done: done,
                            cumulative_bytes_done,
                        });
                    },
                    cancel,
                )
                .map_err(|e| wrap(&cab_path, e))?;
        }
        on_event(Event::CabinetCompleted { cab_path });
    }
    Ok(())
}
