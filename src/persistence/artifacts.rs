//! 产物落盘：报告 / 幻灯片源码按时间戳写入，永不覆盖
//!
//! 路径：`<root>/<thread?>/<YYYYmmdd_HHMMSS_mmm>_<clean_name>.<ext>`，同名时追加 `_<n>`。
//! 写入失败时删除已占位的文件，不留半截产物。

use std::path::{Path, PathBuf};

use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::PersistenceError;

const MAX_NAME_CHARS: usize = 60;
const MAX_COLLISION_SUFFIX: usize = 1000;

#[derive(Clone, Debug)]
pub struct ArtifactSink {
    root: PathBuf,
}

impl ArtifactSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// 写入一个新文件并返回其路径
    pub async fn write(
        &self,
        name: &str,
        content: &str,
        ext: &str,
        thread: Option<&str>,
    ) -> Result<PathBuf, PersistenceError> {
        let dir = match thread {
            Some(t) => self.root.join(clean_name(t)),
            None => self.root.clone(),
        };
        tokio::fs::create_dir_all(&dir).await?;

        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S_%3f");
        let base = format!("{}_{}", stamp, clean_name(name));
        let ext = ext.trim_start_matches('.');

        for n in 0..MAX_COLLISION_SUFFIX {
            let file_name = if n == 0 {
                format!("{}.{}", base, ext)
            } else {
                format!("{}_{}.{}", base, n, ext)
            };
            let path = dir.join(file_name);
            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => {
                    write_or_remove(&path, file, content.as_bytes()).await?;
                    tracing::info!("Artifact saved: {}", path.display());
                    return Ok(path);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(PersistenceError::Storage(format!(
            "Too many artifacts named {} in {}",
            base,
            dir.display()
        )))
    }
}

/// 写满内容；任何一步失败都删掉该路径
async fn write_or_remove<W: AsyncWrite + Unpin>(
    path: &Path,
    mut writer: W,
    content: &[u8],
) -> std::io::Result<()> {
    let result = async {
        writer.write_all(content).await?;
        writer.flush().await
    }
    .await;
    if let Err(e) = result {
        drop(writer);
        if let Err(rm) = tokio::fs::remove_file(path).await {
            tracing::warn!("Failed to remove partial artifact {}: {}", path.display(), rm);
        }
        return Err(e);
    }
    Ok(())
}

/// 文件名清洗：只保留字母数字（含 CJK）、`-`、`_`，其它替换为 `_`
fn clean_name(raw: &str) -> String {
    let mut out = String::new();
    for ch in raw.trim().chars().take(MAX_NAME_CHARS) {
        let c = if ch.is_alphanumeric() || ch == '-' || ch == '_' {
            ch
        } else {
            '_'
        };
        if c == '_' && out.ends_with('_') {
            continue;
        }
        out.push(c);
    }
    let out = out.trim_matches('_').to_string();
    if out.is_empty() {
        "artifact".to_string()
    } else {
        out
    }
}
