use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::time::{Duration, SystemTime};

use anyhow::anyhow;
use tokio_util::sync::CancellationToken;
use zip::ZipArchive;
use zip::result::ZipError;

use super::{FileMeta, WalkError};

type Visit<'a> = dyn FnMut(&str, &mut dyn Read, FileMeta) + 'a;
type Report<'a> = dyn FnMut(WalkError) + 'a;

/// rar 条目需要整个解压到内存中，超过这个大小的条目会被跳过
const MAX_RAR_ENTRY: u64 = 1 << 30;

fn open_error(path: &Path, error: impl Into<anyhow::Error>) -> WalkError {
    WalkError::ArchiveOpen { path: path.to_path_buf(), error: error.into() }
}

fn entry_error(path: &Path, error: impl Into<anyhow::Error>) -> WalkError {
    WalkError::ArchiveEntry { path: path.to_path_buf(), error: error.into() }
}

/// 遍历 zip 归档中的所有文件条目
///
/// 不支持的条目（压缩算法、加密）会被报告并跳过，其他读取错误会放弃整个归档剩余的部分。
pub(super) fn walk_zip(
    path: &Path,
    cancel: &CancellationToken,
    visit: &mut Visit<'_>,
    report: &mut Report<'_>,
) -> Result<(), WalkError> {
    let file = File::open(path).map_err(|e| open_error(path, e))?;
    let mut archive = ZipArchive::new(BufReader::new(file)).map_err(|e| open_error(path, e))?;

    for i in 0..archive.len() {
        if cancel.is_cancelled() {
            return Ok(());
        }
        let mut entry = match archive.by_index(i) {
            Ok(entry) => entry,
            Err(e @ ZipError::UnsupportedArchive(_)) => {
                report(entry_error(path, anyhow::Error::from(e).context(format!("第 {} 个条目", i))));
                continue;
            }
            Err(e) => return Err(entry_error(path, e)),
        };
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_owned();
        let meta = FileMeta { size: entry.size(), modified: None };
        visit(&name, &mut entry, meta);
    }

    Ok(())
}

/// 遍历 tar 归档中的所有普通文件条目
///
/// NOTE: tar 只能顺序读取，每个条目必须在读取下一个之前处理完毕。
/// 条目读完（`None`）是正常结束，不是错误。
pub(super) fn walk_tar(
    path: &Path,
    cancel: &CancellationToken,
    visit: &mut Visit<'_>,
) -> Result<(), WalkError> {
    let file = File::open(path).map_err(|e| open_error(path, e))?;
    let mut archive = tar::Archive::new(BufReader::new(file));
    let mut entries = archive.entries().map_err(|e| open_error(path, e))?;

    loop {
        if cancel.is_cancelled() {
            return Ok(());
        }
        let Some(entry) = entries.next() else {
            return Ok(());
        };
        let mut entry = entry.map_err(|e| entry_error(path, e))?;
        if !entry.header().entry_type().is_file() {
            continue;
        }

        let name = entry.path().map_err(|e| entry_error(path, e))?.to_string_lossy().into_owned();
        let modified =
            entry.header().mtime().ok().map(|secs| SystemTime::UNIX_EPOCH + Duration::from_secs(secs));
        let meta = FileMeta { size: entry.size(), modified };
        visit(&name, &mut entry, meta);
    }
}

/// 遍历 rar 归档中的所有文件条目
///
/// NOTE: rar 只能顺序读取，读到末尾（`None`）是正常结束。
pub(super) fn walk_rar(
    path: &Path,
    cancel: &CancellationToken,
    visit: &mut Visit<'_>,
    report: &mut Report<'_>,
) -> Result<(), WalkError> {
    let mut archive =
        unrar::Archive::new(path).open_for_processing().map_err(|e| open_error(path, e))?;

    loop {
        if cancel.is_cancelled() {
            return Ok(());
        }
        let Some(header) = archive.read_header().map_err(|e| entry_error(path, e))? else {
            return Ok(());
        };

        let (name, size, is_file) = {
            let entry = header.entry();
            (entry.filename.to_string_lossy().into_owned(), entry.unpacked_size, entry.is_file())
        };
        if !is_file {
            archive = header.skip().map_err(|e| entry_error(path, e))?;
            continue;
        }
        if size > MAX_RAR_ENTRY {
            report(entry_error(path, anyhow!("条目 {} 过大: {} 字节", name, size)));
            archive = header.skip().map_err(|e| entry_error(path, e))?;
            continue;
        }

        let (data, rest) = header.read().map_err(|e| entry_error(path, e))?;
        archive = rest;
        let meta = FileMeta { size: data.len() as u64, modified: None };
        visit(&name, &mut data.as_slice(), meta);
    }
}
