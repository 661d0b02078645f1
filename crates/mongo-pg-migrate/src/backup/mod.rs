//! Point-in-time store backups via external dump tooling.
//!
//! Dumps run as bounded subprocesses (`mongodump`, `pg_dump`); exceeding the
//! timeout forcibly terminates the child. Verification re-opens the archive
//! and checks structural validity (magic bytes, size, checksum) without a
//! full restore.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::process::Command;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{SourceConfig, TargetConfig};
use crate::error::{MigrateError, Result};

/// Backup invocation options.
#[derive(Debug, Clone)]
pub struct BackupOptions {
    /// Directory the archive lands in.
    pub output_dir: PathBuf,
    /// Compress the archive (mongodump --gzip).
    pub compress: bool,
    /// Hard deadline for the dump subprocess.
    pub timeout: Duration,
}

impl Default for BackupOptions {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            compress: true,
            timeout: Duration::from_secs(3_600),
        }
    }
}

/// Which store an archive was taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupStore {
    Source,
    Target,
}

/// Metadata describing one archive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupMetadata {
    pub backup_id: Uuid,
    pub store: BackupStore,
    pub tool: String,
    pub tool_version: Option<String>,
    pub archive_path: PathBuf,
    pub size_bytes: u64,
    pub checksum_sha256: String,
    /// Documents reported by the dump tool, when it reports any.
    pub document_count: Option<i64>,
    /// Dumped collections/objects, when reported.
    pub object_count: Option<i64>,
    pub compressed: bool,
    pub created_at: DateTime<Utc>,
}

impl BackupMetadata {
    fn sidecar_path(archive: &Path) -> PathBuf {
        let mut path = archive.as_os_str().to_owned();
        path.push(".meta.json");
        PathBuf::from(path)
    }

    /// Persist metadata next to the archive.
    pub fn save(&self) -> Result<()> {
        let path = Self::sidecar_path(&self.archive_path);
        std::fs::write(&path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Load metadata for an archive.
    pub fn load(archive: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(Self::sidecar_path(archive))?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// Result of structural archive verification.
#[derive(Debug, Clone)]
pub struct BackupVerification {
    pub valid: bool,
    pub issues: Vec<String>,
}

/// Produces and verifies store backups.
#[derive(Default)]
pub struct BackupService;

impl BackupService {
    pub fn new() -> Self {
        Self
    }

    /// Dump the source store to an archive.
    pub async fn backup_source(
        &self,
        config: &SourceConfig,
        options: &BackupOptions,
    ) -> Result<BackupMetadata> {
        let backup_id = Uuid::new_v4();
        let archive_path = options
            .output_dir
            .join(format!("source-{}.archive", backup_id));

        let mut args = vec![
            format!("--uri={}", config.uri),
            format!("--db={}", config.database),
            format!("--archive={}", archive_path.display()),
        ];
        if options.compress {
            args.push("--gzip".into());
        }

        info!("Backing up source store to {}", archive_path.display());
        let output = run_tool("mongodump", &args, options.timeout).await?;
        if !output.success {
            return Err(MigrateError::Backup(format!(
                "mongodump exited with {}: {}",
                output.status, output.stderr
            )));
        }

        let (object_count, document_count) = parse_mongodump_summary(&output.stderr);
        let mut metadata = self
            .finalize_archive(backup_id, BackupStore::Source, "mongodump", &archive_path)
            .await?;
        metadata.compressed = options.compress;
        metadata.object_count = object_count;
        metadata.document_count = document_count;
        metadata.tool_version = tool_version("mongodump").await;
        metadata.save()?;

        Ok(metadata)
    }

    /// Dump the target database to a custom-format archive.
    pub async fn backup_target(
        &self,
        config: &TargetConfig,
        options: &BackupOptions,
    ) -> Result<BackupMetadata> {
        let backup_id = Uuid::new_v4();
        let archive_path = options.output_dir.join(format!("target-{}.dump", backup_id));

        let args = vec![
            "-h".to_string(),
            config.host.clone(),
            "-p".to_string(),
            config.port.to_string(),
            "-U".to_string(),
            config.user.clone(),
            "-d".to_string(),
            config.database.clone(),
            "-Fc".to_string(),
            "-f".to_string(),
            archive_path.display().to_string(),
        ];

        info!("Backing up target database to {}", archive_path.display());
        let output = run_tool_with_env(
            "pg_dump",
            &args,
            &[("PGPASSWORD", &config.password)],
            options.timeout,
        )
        .await?;
        if !output.success {
            return Err(MigrateError::Backup(format!(
                "pg_dump exited with {}: {}",
                output.status, output.stderr
            )));
        }

        let mut metadata = self
            .finalize_archive(backup_id, BackupStore::Target, "pg_dump", &archive_path)
            .await?;
        // Custom format is internally compressed.
        metadata.compressed = true;
        metadata.tool_version = tool_version("pg_dump").await;
        metadata.save()?;

        Ok(metadata)
    }

    /// Restore the source store from an archive produced by `backup_source`.
    pub async fn restore_source(
        &self,
        config: &SourceConfig,
        metadata: &BackupMetadata,
        timeout: Duration,
    ) -> Result<()> {
        let mut args = vec![
            format!("--uri={}", config.uri),
            "--drop".to_string(),
            format!("--archive={}", metadata.archive_path.display()),
        ];
        if metadata.compressed {
            args.push("--gzip".into());
        }

        info!(
            "Restoring source store from {}",
            metadata.archive_path.display()
        );
        let output = run_tool("mongorestore", &args, timeout).await?;
        if !output.success {
            return Err(MigrateError::Backup(format!(
                "mongorestore exited with {}: {}",
                output.status, output.stderr
            )));
        }
        Ok(())
    }

    /// Verify an archive without restoring it.
    pub async fn verify(&self, metadata: &BackupMetadata) -> Result<BackupVerification> {
        let mut issues = Vec::new();

        let bytes = match tokio::fs::read(&metadata.archive_path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                return Ok(BackupVerification {
                    valid: false,
                    issues: vec![format!("archive unreadable: {}", e)],
                })
            }
        };

        if bytes.is_empty() {
            issues.push("archive is empty".into());
        }
        if bytes.len() as u64 != metadata.size_bytes {
            issues.push(format!(
                "size mismatch: archive is {} bytes, metadata says {}",
                bytes.len(),
                metadata.size_bytes
            ));
        }
        if !has_known_magic(&bytes) {
            issues.push("archive has no recognized dump signature".into());
        }

        let checksum = hex::encode(Sha256::digest(&bytes));
        if checksum != metadata.checksum_sha256 {
            issues.push("checksum mismatch: archive modified since backup".into());
        }

        Ok(BackupVerification {
            valid: issues.is_empty(),
            issues,
        })
    }

    async fn finalize_archive(
        &self,
        backup_id: Uuid,
        store: BackupStore,
        tool: &str,
        archive_path: &Path,
    ) -> Result<BackupMetadata> {
        let bytes = tokio::fs::read(archive_path).await?;
        let checksum = hex::encode(Sha256::digest(&bytes));
        debug!(
            "Archive {} complete: {} bytes, sha256 {}",
            archive_path.display(),
            bytes.len(),
            &checksum[..12]
        );

        Ok(BackupMetadata {
            backup_id,
            store,
            tool: tool.to_string(),
            tool_version: None,
            archive_path: archive_path.to_path_buf(),
            size_bytes: bytes.len() as u64,
            checksum_sha256: checksum,
            document_count: None,
            object_count: None,
            compressed: false,
            created_at: Utc::now(),
        })
    }
}

struct ToolOutput {
    success: bool,
    status: String,
    stderr: String,
}

async fn run_tool(program: &str, args: &[String], timeout: Duration) -> Result<ToolOutput> {
    run_tool_with_env(program, args, &[], timeout).await
}

/// Run an external tool with a hard deadline.
///
/// The child is spawned with kill-on-drop, so a timeout (or caller
/// cancellation) forcibly terminates it rather than leaving an orphan.
async fn run_tool_with_env(
    program: &str,
    args: &[String],
    env: &[(&str, &str)],
    timeout: Duration,
) -> Result<ToolOutput> {
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    for (key, value) in env {
        command.env(key, value);
    }

    let child = command.spawn().map_err(|e| {
        MigrateError::Backup(format!("failed to spawn {}: {}", program, e))
    })?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(output) => output?,
        Err(_) => {
            warn!("{} exceeded {}s deadline, killed", program, timeout.as_secs());
            return Err(MigrateError::timeout(program, timeout.as_secs()));
        }
    };

    Ok(ToolOutput {
        success: output.status.success(),
        status: output.status.to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

async fn tool_version(program: &str) -> Option<String> {
    let output = Command::new(program)
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .ok()?;
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .map(|line| line.trim().to_string())
}

/// Sum collection and document counts from mongodump's stderr summary.
///
/// mongodump reports lines like:
/// `2024-03-01T10:00:00.000+0000  done dumping clinical.entries (10050 documents)`
fn parse_mongodump_summary(stderr: &str) -> (Option<i64>, Option<i64>) {
    let mut collections = 0i64;
    let mut documents = 0i64;
    let mut saw_any = false;

    for line in stderr.lines() {
        if let Some(rest) = line.split("done dumping ").nth(1) {
            if let Some(count) = rest
                .split('(')
                .nth(1)
                .and_then(|s| s.split_whitespace().next())
                .and_then(|s| s.parse::<i64>().ok())
            {
                collections += 1;
                documents += count;
                saw_any = true;
            }
        }
    }

    if saw_any {
        (Some(collections), Some(documents))
    } else {
        (None, None)
    }
}

/// Recognized archive signatures: gzip, the mongodump archive magic, and
/// PostgreSQL custom-format dumps.
fn has_known_magic(bytes: &[u8]) -> bool {
    if bytes.len() < 5 {
        return false;
    }
    // gzip
    if bytes[0] == 0x1f && bytes[1] == 0x8b {
        return true;
    }
    // mongodump archive magic (little-endian 0x8199e26d)
    if bytes[..4] == [0x6d, 0xe2, 0x99, 0x81] {
        return true;
    }
    // pg_dump custom format
    if &bytes[..5] == b"PGDMP" {
        return true;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mongodump_summary() {
        let stderr = "\
2024-03-01T10:00:00.000+0000  writing clinical.entries to archive
2024-03-01T10:00:05.000+0000  done dumping clinical.entries (10050 documents)
2024-03-01T10:00:06.000+0000  done dumping clinical.treatments (423 documents)
";
        let (collections, documents) = parse_mongodump_summary(stderr);
        assert_eq!(collections, Some(2));
        assert_eq!(documents, Some(10_473));
    }

    #[test]
    fn test_parse_mongodump_summary_empty() {
        assert_eq!(parse_mongodump_summary("no summary here"), (None, None));
    }

    #[test]
    fn test_magic_gzip() {
        assert!(has_known_magic(&[0x1f, 0x8b, 0x08, 0x00, 0x00]));
    }

    #[test]
    fn test_magic_mongodump_archive() {
        assert!(has_known_magic(&[0x6d, 0xe2, 0x99, 0x81, 0x00]));
    }

    #[test]
    fn test_magic_pgdmp() {
        assert!(has_known_magic(b"PGDMP\x01\x0e"));
    }

    #[test]
    fn test_magic_rejects_garbage() {
        assert!(!has_known_magic(b"hello world"));
        assert!(!has_known_magic(&[0x1f]));
    }

    #[tokio::test]
    async fn test_verify_detects_tampering() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("test.archive");
        std::fs::write(&archive, [0x1f, 0x8b, 0x08, 0x00, 0x01]).unwrap();

        let service = BackupService::new();
        let mut metadata = service
            .finalize_archive(Uuid::new_v4(), BackupStore::Source, "mongodump", &archive)
            .await
            .unwrap();

        let ok = service.verify(&metadata).await.unwrap();
        assert!(ok.valid, "untouched archive should verify: {:?}", ok.issues);

        // Tamper with the archive after the checksum was taken.
        std::fs::write(&archive, [0x1f, 0x8b, 0x08, 0x00, 0x02]).unwrap();
        let tampered = service.verify(&metadata).await.unwrap();
        assert!(!tampered.valid);
        assert!(tampered.issues.iter().any(|i| i.contains("checksum")));

        // Metadata for a missing archive is also invalid.
        metadata.archive_path = dir.path().join("gone.archive");
        let missing = service.verify(&metadata).await.unwrap();
        assert!(!missing.valid);
    }

    #[tokio::test]
    async fn test_run_tool_timeout_kills_child() {
        let start = std::time::Instant::now();
        let result = run_tool(
            "sleep",
            &["30".to_string()],
            Duration::from_millis(200),
        )
        .await;
        assert!(matches!(result, Err(MigrateError::Timeout { .. })));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_metadata_sidecar_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("x.archive");
        std::fs::write(&archive, b"PGDMP..").unwrap();

        let service = BackupService::new();
        let metadata = service
            .finalize_archive(Uuid::new_v4(), BackupStore::Target, "pg_dump", &archive)
            .await
            .unwrap();
        metadata.save().unwrap();

        let loaded = BackupMetadata::load(&archive).unwrap();
        assert_eq!(loaded.backup_id, metadata.backup_id);
        assert_eq!(loaded.checksum_sha256, metadata.checksum_sha256);
    }
}
