use super::Archiver;
use crate::error::{BackupError, Result};
use crate::task::VirtualMachine;
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use walkdir::WalkDir;
use zip::CompressionMethod;
use zip::write::SimpleFileOptions;

/// 归档压缩级别，数值与任务文件中的 `ArchiveCompressionLevel` 对应
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveCompression {
    Optimal,
    Fastest,
    NoCompression,
    SmallestSize,
}

impl ArchiveCompression {
    pub fn from_level(level: u8) -> Result<Self> {
        match level {
            0 => Ok(Self::Optimal),
            1 => Ok(Self::Fastest),
            2 => Ok(Self::NoCompression),
            3 => Ok(Self::SmallestSize),
            other => Err(BackupError::validation(format!(
                "archive compression level must be 0..3, got {other}"
            ))),
        }
    }

    fn options(&self) -> SimpleFileOptions {
        let options = SimpleFileOptions::default();
        match self {
            Self::Optimal => options.compression_method(CompressionMethod::Deflated),
            Self::Fastest => options
                .compression_method(CompressionMethod::Deflated)
                .compression_level(Some(1)),
            Self::NoCompression => options.compression_method(CompressionMethod::Stored),
            Self::SmallestSize => options
                .compression_method(CompressionMethod::Deflated)
                .compression_level(Some(9)),
        }
    }
}

/// 把导出目录打包为 zip 文件
#[derive(Debug, Clone, Default)]
pub struct ZipArchiver;

impl ZipArchiver {
    pub fn new() -> Self {
        Self
    }
}

const COPY_BUFFER_SIZE: usize = 1024 * 1024;

/// 收集导出目录下的所有文件及总字节数
fn collect_files(export_path: &Path) -> Result<(Vec<(PathBuf, u64)>, u64)> {
    let mut files = Vec::new();
    let mut total = 0u64;
    for entry in WalkDir::new(export_path).sort_by_file_name() {
        let entry = entry?;
        if entry.file_type().is_file() {
            let size = entry.metadata()?.len();
            total += size;
            files.push((entry.into_path(), size));
        }
    }
    Ok((files, total))
}

fn write_archive(
    machine: &VirtualMachine,
    export_path: &Path,
    archive_path: &Path,
    compression: ArchiveCompression,
) -> Result<u64> {
    let (files, total) = collect_files(export_path)?;

    // 归档内保持 {导出目录名}/{相对路径} 结构
    let root_name = export_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    if let Some(parent) = archive_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut zip = zip::ZipWriter::new(BufWriter::new(File::create(archive_path)?));
    let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
    let mut written = 0u64;

    for (path, size) in files {
        let relative = path.strip_prefix(export_path)?;
        let relative = relative.to_string_lossy().replace('\\', "/");
        let entry_name = if root_name.is_empty() {
            relative
        } else {
            format!("{root_name}/{relative}")
        };

        let options = compression.options().large_file(size >= u64::from(u32::MAX));
        zip.start_file(entry_name, options)?;

        let mut source = File::open(&path)?;
        loop {
            let read = source.read(&mut buffer)?;
            if read == 0 {
                break;
            }
            zip.write_all(&buffer[..read])?;
            written += read as u64;
            if total > 0 {
                let percent = (written.saturating_mul(100) / total).min(100);
                machine.runtime.set_archive_percent(percent as u8);
            }
        }
    }

    zip.finish()?.flush()?;
    machine.runtime.set_archive_percent(100);
    Ok(written)
}

#[async_trait::async_trait]
impl Archiver for ZipArchiver {
    async fn archive(
        &self,
        machine: &Arc<VirtualMachine>,
        export_path: &Path,
        archive_path: &Path,
    ) -> Result<()> {
        let compression = ArchiveCompression::from_level(machine.archive_compression_level)?;
        machine.runtime.set_archive_percent(0);

        let vm = Arc::clone(machine);
        let export = export_path.to_path_buf();
        let archive = archive_path.to_path_buf();

        // 压缩在后台线程执行，避免阻塞异步运行时
        let bytes = tokio::task::spawn_blocking(move || {
            write_archive(&vm, &export, &archive, compression)
        })
        .await?
        .map_err(|e| match e {
            BackupError::Validation(_) | BackupError::ExternalOperation { .. } => e,
            other => BackupError::external(machine.name(), format!("创建归档失败: {other}")),
        })?;

        info!(
            machine = %machine.name(),
            archive = %archive_path.display(),
            bytes,
            "归档完成"
        );
        Ok(())
    }
}
