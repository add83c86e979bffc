use std::{
    future::Future,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use qfieldsync_core::{
    CloudProject, ProjectId, TransferPhase, TransferPlan, TransferState, TransferSummary,
};
use thiserror::Error;
use tokio::{sync::mpsc, task::JoinError};
use tracing::{error, info};

use crate::{
    api::CloudClient,
    transfer::{ProjectTransferrer, TransferError, TransferEvent},
};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("a sync of project {active} is already in progress")]
    AlreadyInProgress { active: ProjectId },
    #[error(transparent)]
    Transfer(#[from] TransferError),
    #[error("transfer stopped before the {0} finished")]
    Interrupted(TransferPhase),
}

/// Outcome of each pass that ran. A failed upload does not stop the
/// download pass.
#[derive(Debug, Default)]
pub struct SyncReport {
    pub upload: Option<Result<TransferSummary, TransferError>>,
    pub download: Option<Result<TransferSummary, TransferError>>,
}

impl SyncReport {
    pub fn is_success(&self) -> bool {
        self.upload.as_ref().is_none_or(Result::is_ok)
            && self.download.as_ref().is_none_or(Result::is_ok)
    }
}

/// Hands out at most one running sync at a time.
#[derive(Debug, Clone)]
pub struct SyncController {
    client: CloudClient,
    active: Arc<Mutex<Option<ProjectId>>>,
}

impl SyncController {
    pub fn new(client: CloudClient) -> Self {
        Self {
            client,
            active: Arc::new(Mutex::new(None)),
        }
    }

    pub fn active_project(&self) -> Option<ProjectId> {
        lock_slot(&self.active).clone()
    }

    pub fn ensure_idle(&self) -> Result<(), SyncError> {
        match self.active_project() {
            Some(active) => {
                error!(project_id = %active, "sync requested while another is in progress");
                Err(SyncError::AlreadyInProgress { active })
            }
            None => Ok(()),
        }
    }

    /// Claims the sync slot for `project`. The slot is released when the
    /// returned handle is dropped.
    pub fn start(&self, project: &CloudProject, plan: TransferPlan) -> Result<SyncHandle, SyncError> {
        let guard = {
            let mut slot = lock_slot(&self.active);
            if let Some(active) = slot.as_ref() {
                error!(
                    project_id = %project.id,
                    active = %active,
                    "sync requested while another is in progress"
                );
                return Err(SyncError::AlreadyInProgress {
                    active: active.clone(),
                });
            }
            *slot = Some(project.id.clone());
            ActiveGuard {
                slot: Arc::clone(&self.active),
            }
        };

        let (transferrer, events) =
            ProjectTransferrer::new(self.client.clone(), project, plan.download_policy())?;
        info!(project_id = %project.id, ?plan, "sync started");

        Ok(SyncHandle {
            project: project.clone(),
            plan,
            transferrer,
            events,
            _guard: guard,
        })
    }
}

#[derive(Debug)]
struct ActiveGuard {
    slot: Arc<Mutex<Option<ProjectId>>>,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        lock_slot(&self.slot).take();
    }
}

fn lock_slot(slot: &Mutex<Option<ProjectId>>) -> MutexGuard<'_, Option<ProjectId>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
pub struct SyncHandle {
    project: CloudProject,
    plan: TransferPlan,
    transferrer: ProjectTransferrer,
    events: mpsc::UnboundedReceiver<TransferEvent>,
    _guard: ActiveGuard,
}

impl SyncHandle {
    pub fn project(&self) -> &CloudProject {
        &self.project
    }

    pub fn plan(&self) -> TransferPlan {
        self.plan
    }

    pub fn state(&self) -> TransferState {
        self.transferrer.state()
    }

    /// Drives the plan to completion. The download pass is only issued
    /// after the upload pass reported its completion.
    pub async fn run(
        &mut self,
        mut on_event: impl FnMut(&TransferEvent),
    ) -> Result<SyncReport, SyncError> {
        let mut report = SyncReport::default();

        if self.plan.uploads() {
            self.transferrer.upload(self.plan.upload_all())?;
            report.upload = Some(self.wait_for(TransferPhase::Upload, &mut on_event).await?);
        }
        if self.plan.downloads() {
            self.transferrer.download()?;
            report.download = Some(self.wait_for(TransferPhase::Download, &mut on_event).await?);
        }

        info!(
            project_id = %self.project.id,
            success = report.is_success(),
            "sync finished"
        );
        Ok(report)
    }

    pub fn abort(mut self) {
        self.transferrer.abort_requests();
    }

    async fn wait_for(
        &mut self,
        phase: TransferPhase,
        on_event: &mut impl FnMut(&TransferEvent),
    ) -> Result<Result<TransferSummary, TransferError>, SyncError> {
        let exited = self.transferrer.pass_exited();
        let outcome = wait_for_pass(&mut self.events, exited, phase, on_event).await;
        if outcome.is_err() {
            error!(project_id = %self.project.id, %phase, "pass ended without reporting");
        }
        outcome
    }
}

/// Forwards events until the `phase` pass reports its result. Events still
/// queued when the pass task exits are delivered before giving up.
async fn wait_for_pass(
    events: &mut mpsc::UnboundedReceiver<TransferEvent>,
    exited: impl Future<Output = Option<JoinError>>,
    phase: TransferPhase,
    on_event: &mut impl FnMut(&TransferEvent),
) -> Result<Result<TransferSummary, TransferError>, SyncError> {
    tokio::pin!(exited);
    loop {
        tokio::select! {
            biased;
            Some(event) = events.recv() => {
                if let Some(result) = deliver(event, phase, on_event) {
                    return Ok(result);
                }
            }
            failure = &mut exited => {
                if let Some(err) = failure {
                    error!(%phase, "transfer task failed: {}", err);
                }
                while let Ok(event) = events.try_recv() {
                    if let Some(result) = deliver(event, phase, on_event) {
                        return Ok(result);
                    }
                }
                return Err(SyncError::Interrupted(phase));
            }
        }
    }
}

fn deliver(
    event: TransferEvent,
    phase: TransferPhase,
    on_event: &mut impl FnMut(&TransferEvent),
) -> Option<Result<TransferSummary, TransferError>> {
    on_event(&event);
    match event {
        TransferEvent::Finished {
            phase: finished,
            result,
        } if finished == phase => Some(result),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finished(phase: TransferPhase) -> TransferEvent {
        TransferEvent::Finished {
            phase,
            result: Ok(TransferSummary::default()),
        }
    }

    #[tokio::test]
    async fn panicking_pass_interrupts_the_wait() {
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let task = tokio::spawn(async {
            panic!("pass blew up");
        });

        let mut seen = 0;
        let outcome = wait_for_pass(
            &mut events,
            async move { task.await.err() },
            TransferPhase::Upload,
            &mut |_: &TransferEvent| seen += 1,
        )
        .await;

        assert!(matches!(outcome, Err(SyncError::Interrupted(TransferPhase::Upload))));
        assert_eq!(seen, 0);
        drop(events_tx);
    }

    #[tokio::test]
    async fn result_sent_just_before_exit_is_delivered() {
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let sender = events_tx.clone();
        let task = tokio::spawn(async move {
            let _ = sender.send(TransferEvent::Progress {
                phase: TransferPhase::Download,
                file: "trees.qgs".to_owned(),
                index: 0,
                total: 1,
            });
            let _ = sender.send(finished(TransferPhase::Download));
        });

        let mut seen = Vec::new();
        let outcome = wait_for_pass(
            &mut events,
            async move { task.await.err() },
            TransferPhase::Download,
            &mut |event: &TransferEvent| seen.push(matches!(event, TransferEvent::Finished { .. })),
        )
        .await;

        assert!(matches!(outcome, Ok(Ok(_))));
        assert_eq!(seen, vec![false, true]);
        drop(events_tx);
    }

    #[tokio::test]
    async fn result_of_another_phase_does_not_end_the_wait() {
        let (events_tx, mut events) = mpsc::unbounded_channel();
        events_tx.send(finished(TransferPhase::Upload)).unwrap();
        let task = tokio::spawn(async {});

        let outcome = wait_for_pass(
            &mut events,
            async move { task.await.err() },
            TransferPhase::Download,
            &mut |_: &TransferEvent| {},
        )
        .await;

        assert!(matches!(outcome, Err(SyncError::Interrupted(TransferPhase::Download))));
    }
}
