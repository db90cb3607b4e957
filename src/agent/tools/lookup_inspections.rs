use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio::process::Command;

use crate::agent::proposer::ToolDefinition;
use crate::agent::tools::{Tool, ToolId, ToolResult};
use crate::config::InspectionConfig;
use crate::error::Result;
use crate::sandbox::CANDIDATE_FILENAME;

/// Descriptor file the inspection script writes next to its findings.
pub const DESCRIPTIONS_FILENAME: &str = ".descriptions.json";

const RESULTS_DIR: &str = "inspections";

/// Inspection output file name -> parsed JSON findings.
pub type Findings = BTreeMap<String, serde_json::Value>;

/// Drives the external static-inspection script.
#[derive(Debug, Clone)]
pub struct InspectionRunner {
    script: PathBuf,
    project_root: PathBuf,
    profile: PathBuf,
    scratch_dir: PathBuf,
    timeout: Duration,
}

impl InspectionRunner {
    pub fn new(
        script: PathBuf,
        project_root: PathBuf,
        profile: PathBuf,
        scratch_dir: PathBuf,
        timeout: Duration,
    ) -> Self {
        Self {
            script,
            project_root,
            profile,
            scratch_dir,
            timeout,
        }
    }

    pub fn from_config(config: &InspectionConfig) -> Self {
        Self::new(
            config.script.clone(),
            config.project_root.clone(),
            config.profile.clone(),
            config.scratch_dir.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    /// Write `code` to the scratch file, run the script and collect its findings.
    ///
    /// A script that cannot be started, exits nonzero or times out yields an
    /// empty map. Only scratch directory I/O failures are errors.
    pub async fn inspect(&self, code: &str) -> Result<Findings> {
        let results_dir = self.scratch_dir.join(RESULTS_DIR);
        tokio::fs::create_dir_all(&results_dir).await?;
        tokio::fs::write(self.scratch_dir.join(CANDIDATE_FILENAME), code).await?;
        clear_files(&results_dir).await?;

        // The script runs from the project root, so hand it absolute paths.
        let scratch_dir = tokio::fs::canonicalize(&self.scratch_dir).await?;
        let results_dir = scratch_dir.join(RESULTS_DIR);
        let project_root = tokio::fs::canonicalize(&self.project_root).await?;
        let script = tokio::fs::canonicalize(&self.script)
            .await
            .unwrap_or_else(|_| self.script.clone());

        let mut command = Command::new(&script);
        command
            .arg(&project_root)
            .arg(&self.profile)
            .arg(&results_dir)
            .args(["-v2", "-d"])
            .arg(&scratch_dir)
            .args(["-format", "json"])
            .current_dir(&project_root)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::info!(script = %script.display(), "Running static inspections");

        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                tracing::warn!(script = %script.display(), error = %e, "Failed to start inspections");
                return Ok(Findings::new());
            }
            Err(_) => {
                tracing::warn!(
                    timeout_secs = self.timeout.as_secs(),
                    "Static inspections timed out"
                );
                return Ok(Findings::new());
            }
        };

        if !output.status.success() {
            tracing::warn!(
                exit_code = ?output.status.code(),
                stderr = %String::from_utf8_lossy(&output.stderr),
                "Static inspections failed"
            );
            return Ok(Findings::new());
        }

        collect_findings(&results_dir).await
    }
}

async fn clear_files(dir: &Path) -> Result<()> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_dir() {
            tokio::fs::remove_file(entry.path()).await?;
        }
    }
    Ok(())
}

async fn collect_findings(results_dir: &Path) -> Result<Findings> {
    let mut findings = Findings::new();
    let mut entries = tokio::fs::read_dir(results_dir).await?;

    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name == DESCRIPTIONS_FILENAME || !entry.file_type().await?.is_file() {
            continue;
        }

        let parsed = tokio::fs::read_to_string(entry.path())
            .await
            .map_err(|e| e.to_string())
            .and_then(|raw| serde_json::from_str(&raw).map_err(|e| e.to_string()));
        match parsed {
            Ok(value) => {
                findings.insert(name, value);
            }
            Err(e) => tracing::debug!(file = %name, error = %e, "Skipping unreadable inspection file"),
        }
    }

    tracing::info!(files = findings.len(), "Collected static inspections");
    Ok(findings)
}

pub struct LookupInspectionsTool {
    runner: InspectionRunner,
}

impl LookupInspectionsTool {
    pub fn new(runner: InspectionRunner) -> Self {
        Self { runner }
    }
}

#[derive(Debug, Deserialize)]
struct LookupInspectionsArgs {
    code: String,
}

#[async_trait]
impl Tool for LookupInspectionsTool {
    fn id(&self) -> ToolId {
        ToolId::LookupStaticInspections
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: ToolId::LookupStaticInspections.name().to_string(),
            description: "Run static inspections over the given code: unused or unresolved references, wrong types and similar problems. Returns the findings keyed by inspection name.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "code": {
                        "type": "string",
                        "description": "Full source code to inspect"
                    }
                },
                "required": ["code"]
            }),
        }
    }

    async fn execute(&self, input: serde_json::Value) -> Result<ToolResult> {
        let args: LookupInspectionsArgs = serde_json::from_value(input)?;
        let findings = self.runner.inspect(&args.code).await?;
        Ok(ToolResult::Inspections(findings))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn write_script(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("inspect.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn runner(dir: &Path, script: PathBuf) -> InspectionRunner {
        InspectionRunner::new(
            script,
            dir.to_path_buf(),
            PathBuf::from("profile.xml"),
            dir.join("scratch"),
            Duration::from_secs(10),
        )
    }

    #[tokio::test]
    async fn test_collects_json_findings_except_descriptions() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(
            dir.path(),
            r#"echo '{"problems": [{"line": 1}]}' > "$3/PyUnresolvedReferences.json"
echo '{"groups": []}' > "$3/.descriptions.json"
echo 'not json' > "$3/broken.json""#,
        );

        let findings = runner(dir.path(), script).inspect("x = y").await.unwrap();

        assert_eq!(findings.len(), 1);
        assert_eq!(
            findings["PyUnresolvedReferences.json"],
            json!({"problems": [{"line": 1}]})
        );
    }

    #[tokio::test]
    async fn test_code_is_written_to_scratch_file() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), r#"cp "$6/buggy_code.py" "$3/echo.json""#);

        let findings = runner(dir.path(), script)
            .inspect(r#"{"seen": true}"#)
            .await
            .unwrap();

        assert_eq!(findings["echo.json"], json!({"seen": true}));
    }

    #[tokio::test]
    async fn test_nonzero_exit_yields_empty_findings() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), r#"echo '{}' > "$3/Partial.json"; exit 2"#);

        let findings = runner(dir.path(), script).inspect("x = 1").await.unwrap();
        assert!(findings.is_empty());
    }

    #[tokio::test]
    async fn test_missing_script_yields_empty_findings() {
        let dir = tempfile::tempdir().unwrap();
        let findings = runner(dir.path(), dir.path().join("missing.sh"))
            .inspect("x = 1")
            .await
            .unwrap();
        assert!(findings.is_empty());
    }

    #[tokio::test]
    async fn test_stale_results_are_cleared() {
        let dir = tempfile::tempdir().unwrap();
        let results = dir.path().join("scratch").join(RESULTS_DIR);
        std::fs::create_dir_all(&results).unwrap();
        std::fs::write(results.join("Stale.json"), "{}").unwrap();

        let script = write_script(dir.path(), "exit 0");
        let findings = runner(dir.path(), script).inspect("x = 1").await.unwrap();
        assert!(findings.is_empty());
    }
}
