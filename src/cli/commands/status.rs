//! Status command.

use console::style;
use serde_json::json;

use crate::config::Settings;
use crate::repository::{DocumentRepository, JobRepository};

pub async fn cmd_status(settings: &Settings, json_output: bool) -> anyhow::Result<()> {
    let db_path = settings.database_path();
    let docs = DocumentRepository::new(&db_path);
    docs.init()?;
    let jobs = JobRepository::new(&db_path);
    jobs.init()?;

    let stats = docs.get_stats()?;
    let job_counts = jobs.counts()?;

    if json_output {
        let out = json!({
            "documents": stats,
            "jobs": {
                "queued": job_counts.queued,
                "leased": job_counts.leased,
                "completed": job_counts.completed,
                "failed": job_counts.failed,
            },
            "data_dir": settings.data_dir.display().to_string(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("{}", style("Documents").bold());
    println!("  total:            {}", stats.total);
    println!("  discovered:       {}", stats.discovered);
    println!("  downloaded_ok:    {}", stats.downloaded_ok);
    println!(
        "  download_failed:  {} ({} permanent 404)",
        stats.download_failed, stats.permanent_404
    );
    println!("  extracted_ok:     {}", stats.extracted_ok);
    println!("  extracted_failed: {}", stats.extracted_failed);
    println!();
    println!("{}", style("Extract jobs").bold());
    println!("  queued:    {}", job_counts.queued);
    println!("  leased:    {}", job_counts.leased);
    println!("  completed: {}", job_counts.completed);
    println!("  failed:    {}", job_counts.failed);
    Ok(())
}
