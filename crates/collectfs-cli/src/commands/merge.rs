//! Merge command - one-shot overlay of the sources into the target
//!
//! Enumerates every source, copies the highest-ranked provider of each path
//! into the target and exits. Nothing is tracked afterwards and the target
//! is left in place.

use anyhow::{Context, Result};
use collectfs_core::config::Config;
use collectfs_sync::tree::{merge_directories, MergeSummary};
use tracing::info;

use super::{overlay_inputs, plural};
use crate::output::{get_formatter, OutputFormat};

pub async fn execute(config: &Config, format: OutputFormat) -> Result<()> {
    let formatter = get_formatter(format);
    let (sources, target) = overlay_inputs(config)?;

    info!(sources = sources.len(), target = %target.display(), "Starting one-shot merge");

    let summary = merge_directories(&sources, &target)
        .await
        .with_context(|| format!("Failed to merge into {}", target.display()))?;

    match format {
        OutputFormat::Json => formatter.print_json(&summary_json(&summary)),
        OutputFormat::Human => {
            let duration_display = if summary.duration_ms >= 1000 {
                format!("{:.1}s", summary.duration_ms as f64 / 1000.0)
            } else {
                format!("{}ms", summary.duration_ms)
            };
            formatter.success(&format!(
                "Merged {} source{} into {} in {}",
                summary.sources,
                plural(summary.sources),
                target.display(),
                duration_display
            ));
            formatter.info(&format!(
                "Copied:   {} file{}",
                summary.files_copied,
                plural(summary.files_copied)
            ));
            if summary.files_shadowed > 0 {
                formatter.info(&format!(
                    "Shadowed: {} file{}",
                    summary.files_shadowed,
                    plural(summary.files_shadowed)
                ));
            }
        }
    }

    Ok(())
}

fn summary_json(summary: &MergeSummary) -> serde_json::Value {
    serde_json::json!({
        "sources": summary.sources,
        "files_copied": summary.files_copied,
        "files_shadowed": summary.files_shadowed,
        "duration_ms": summary.duration_ms,
    })
}

#[cfg(test)]
mod tests {
    use collectfs_core::config::ConfigBuilder;
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_summary_json_shape() {
        let json = summary_json(&MergeSummary {
            sources: 2,
            files_copied: 5,
            files_shadowed: 1,
            duration_ms: 12,
        });
        assert_eq!(json["files_copied"], 5);
        assert_eq!(json["files_shadowed"], 1);
        assert_eq!(json["sources"], 2);
    }

    #[tokio::test]
    async fn test_execute_merges_into_target() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        std::fs::write(a.path().join("f.txt"), "a").unwrap();
        std::fs::write(b.path().join("f.txt"), "b").unwrap();

        let target = out.path().join("merged");
        let config = ConfigBuilder::new()
            .sources(vec![a.path().to_path_buf(), b.path().to_path_buf()])
            .target(target.clone())
            .build();

        execute(&config, OutputFormat::Json).await.unwrap();
        assert_eq!(std::fs::read_to_string(target.join("f.txt")).unwrap(), "b");
    }

    #[tokio::test]
    async fn test_execute_missing_source_fails() {
        let out = TempDir::new().unwrap();
        let config = ConfigBuilder::new()
            .sources(vec![out.path().join("missing")])
            .target(out.path().join("merged"))
            .build();

        assert!(execute(&config, OutputFormat::Human).await.is_err());
    }
}
