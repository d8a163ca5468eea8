//! Writes the servo debug log of every instance to its own file.

use std::{io::ErrorKind, path::Path};

use ptp_core::{clock::LocalClock, PtpSystem};
use tokio::{fs::OpenOptions, io::AsyncWriteExt};
use tracing::warn;

use super::config::DebugLogConfig;

/// Append `lines` to the log at `path`, removing the old file first when
/// `delete` is set
async fn append(path: &Path, delete: bool, lines: &[String]) -> std::io::Result<()> {
    if delete {
        match tokio::fs::remove_file(path).await {
            Err(e) if e.kind() != ErrorKind::NotFound => return Err(e),
            _ => {}
        }
    }
    if lines.is_empty() {
        return Ok(());
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    let mut contents = lines.join("\n");
    contents.push('\n');
    file.write_all(contents.as_bytes()).await?;
    file.flush().await
}

/// Move the buffered debug lines of all instances to their files
pub async fn write_all<C: LocalClock>(system: &mut PtpSystem<C>, config: &DebugLogConfig) {
    let indices: Vec<usize> = system.instances().map(|i| i.index()).collect();
    for index in indices {
        let Ok((delete, lines)) = system.take_debug_log(index) else {
            continue;
        };
        if !delete && lines.is_empty() {
            continue;
        }

        let path = config.path(index);
        if let Err(e) = append(&path, delete, &lines).await {
            warn!(instance = index, ?path, "could not write debug log: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn append_then_delete() {
        let config = DebugLogConfig {
            directory: std::env::temp_dir(),
        };
        let path = config.path(7);
        let _ = std::fs::remove_file(&path);

        append(&path, false, &["1 -20".into(), "2 -10".into()])
            .await
            .unwrap();
        append(&path, false, &["3 0".into()]).await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "1 -20\n2 -10\n3 0\n");

        append(&path, true, &[]).await.unwrap();
        assert!(!path.exists());

        // deleting a log that was never written is fine
        append(&path, true, &[]).await.unwrap();
    }
}
