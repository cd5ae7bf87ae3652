//! Async job commands: submit, collect, and the supervised pipeline.

use std::time::Duration;

use console::style;

use crate::config::Settings;
use crate::models::{new_run_id, RunStatus};
use crate::repository::{DocumentRepository, JobRepository, RunRepository};
use crate::services::AsyncExtractService;

use super::build_queue;

fn build_service(settings: &Settings, run_id: String) -> anyhow::Result<AsyncExtractService> {
    settings.ensure_directories()?;
    let db_path = settings.database_path();
    let docs = DocumentRepository::new(&db_path);
    docs.init()?;
    let jobs = JobRepository::new(&db_path);
    jobs.init()?;
    let queue = build_queue(settings)?;
    Ok(AsyncExtractService::new(
        docs,
        jobs,
        queue,
        run_id,
        settings.lease_secs.max(1) as u64,
    ))
}

pub async fn cmd_submit_jobs(settings: &Settings, limit: usize, force: bool) -> anyhow::Result<()> {
    let service = build_service(settings, new_run_id())?;
    let summary = service
        .submit_jobs(settings.max_extract_attempts, force, limit)
        .await?;
    println!(
        "{} Enqueued {} jobs ({} already in flight), published {}",
        style("✓").green(),
        summary.enqueued,
        summary.skipped_active,
        summary.published
    );
    Ok(())
}

pub async fn cmd_collect_results(settings: &Settings) -> anyhow::Result<()> {
    let service = build_service(settings, new_run_id())?;
    let summary = service.collect_results().await?;
    println!(
        "{} Received {} results: {} completed, {} failed, {} unknown, {} malformed",
        style("✓").green(),
        summary.received,
        summary.completed,
        summary.failed,
        summary.unknown,
        summary.malformed
    );
    Ok(())
}

pub async fn cmd_pipeline(settings: &Settings, limit: usize, force: bool) -> anyhow::Result<()> {
    let run_id = new_run_id();
    let runs = RunRepository::new(settings.database_path());
    runs.init()?;
    runs.start_run(&run_id)?;
    println!("Starting pipeline {run_id}");

    let service = build_service(settings, run_id.clone())?;
    let outcome = async {
        let submit = service
            .submit_jobs(settings.max_extract_attempts, force, limit)
            .await?;
        println!(
            "  submitted: {} enqueued, {} published, {} already in flight",
            submit.enqueued, submit.published, submit.skipped_active
        );
        service
            .run_pipeline(
                Duration::from_millis(settings.poll_interval_ms),
                settings.idle_rounds,
                settings.max_rounds,
            )
            .await
    }
    .await;

    match outcome {
        Ok(outcome) if outcome.drained => {
            runs.finish_run(&run_id, RunStatus::Completed)?;
            println!(
                "{} Pipeline drained: {} results in {} rounds",
                style("✓").green(),
                outcome.collected,
                outcome.rounds
            );
            Ok(())
        }
        Ok(outcome) => {
            runs.finish_run(&run_id, RunStatus::Failed)?;
            println!(
                "{} Pipeline stopped with {} jobs still in flight ({} results in {} rounds); \
                 rerun `pipeline` or `collect-results` to resume",
                style("!").yellow(),
                outcome.active_jobs,
                outcome.collected,
                outcome.rounds
            );
            Ok(())
        }
        Err(err) => {
            runs.finish_run(&run_id, RunStatus::Failed)?;
            Err(err)
        }
    }
}
