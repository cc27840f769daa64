//! 目录遍历，同时会进入 zip / rar / tar 归档，把归档内的条目当作普通文件交给处理函数
//!
//! 一个生产者负责遍历目录树，固定数量的工作线程从有界队列中取任务处理。
//! 同一个归档内的条目严格按顺序处理，不同文件之间没有顺序保证。

mod archive;

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::SystemTime;

use clap::ValueEnum;
use crossbeam_channel::{Receiver, Sender, bounded};
use log::{debug, info, warn};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use crate::sync::WorkerId;

/// 读取文件时最多预分配的字节数
pub const MAX_PREALLOC: u64 = 64 << 20;

/// 支持的归档格式
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArchiveKind {
    /// zip，条目可随机访问
    Zip,
    /// rar，只能顺序读取
    Rar,
    /// tar，只能顺序读取
    Tar,
}

impl ArchiveKind {
    /// 根据后缀名判断归档格式
    pub fn from_path(path: &Path) -> Option<Self> {
        match extension(path)?.as_str() {
            "zip" => Some(Self::Zip),
            "rar" => Some(Self::Rar),
            "tar" => Some(Self::Tar),
            _ => None,
        }
    }
}

/// 文件元数据，归档条目的大小为解压后的大小
#[derive(Debug, Clone, Copy, Default)]
pub struct FileMeta {
    pub size: u64,
    pub modified: Option<SystemTime>,
}

/// 交给处理函数的一个文件，可能是真实文件，也可能是归档中的条目
///
/// `reader` 在处理函数返回后立刻被推进或关闭，处理函数必须在返回前读完需要的数据。
pub struct VirtualFile<'a> {
    /// 磁盘上真实存在的文件路径（对于归档条目，是归档本身的路径）
    pub real_path: &'a Path,
    /// 归档内的路径，不在归档中时为空
    pub virtual_path: &'a str,
    pub reader: &'a mut dyn Read,
    pub meta: FileMeta,
    pub worker: WorkerId,
}

impl VirtualFile<'_> {
    /// 小写的后缀名，优先使用归档内路径
    pub fn extension(&self) -> Option<String> {
        if self.virtual_path.is_empty() {
            extension(self.real_path)
        } else {
            extension(Path::new(self.virtual_path))
        }
    }

    /// 读取剩余的全部数据
    ///
    /// 归档条目的大小来自文件头，不可信，预分配的空间不超过 [`MAX_PREALLOC`]。
    pub fn read_all(&mut self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.meta.size.min(MAX_PREALLOC) as usize);
        self.reader.read_to_end(&mut buf)?;
        Ok(buf)
    }
}

/// 文件处理函数，会在多个工作线程中并发调用
pub trait FileHandler: Send + Sync {
    fn handle(&self, file: VirtualFile<'_>) -> anyhow::Result<()>;
}

impl<F> FileHandler for F
where
    F: Fn(VirtualFile<'_>) -> anyhow::Result<()> + Send + Sync,
{
    fn handle(&self, file: VirtualFile<'_>) -> anyhow::Result<()> {
        self(file)
    }
}

/// 遍历过程中的错误，全部都是可继续的
#[derive(Debug, Error)]
pub enum WalkError {
    #[error("遍历目录失败: {0}")]
    Traverse(#[from] walkdir::Error),
    #[error("无法打开文件 {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("无法打开归档 {}: {error:#}", .path.display())]
    ArchiveOpen { path: PathBuf, error: anyhow::Error },
    #[error("读取归档 {} 失败: {error:#}", .path.display())]
    ArchiveEntry { path: PathBuf, error: anyhow::Error },
    #[error("处理 {}:{vpath} 失败: {error:#}", .path.display())]
    Handler { path: PathBuf, vpath: String, error: anyhow::Error },
}

struct CrawlTask {
    path: PathBuf,
}

pub struct ArchiveWalker {
    workers: usize,
    archives: Vec<ArchiveKind>,
    errors: Option<Sender<WalkError>>,
}

impl ArchiveWalker {
    /// 创建一个使用 `workers` 个工作线程的遍历器，默认不进入任何归档
    pub fn new(workers: usize) -> Self {
        Self { workers: workers.max(1), archives: vec![], errors: None }
    }

    /// 设置需要进入的归档格式
    pub fn archives(mut self, kinds: impl IntoIterator<Item = ArchiveKind>) -> Self {
        self.archives = kinds.into_iter().collect();
        self
    }

    /// 设置错误接收端，不设置时错误只会输出到日志
    pub fn error_sink(mut self, sink: Sender<WalkError>) -> Self {
        self.errors = Some(sink);
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// 遍历 `root` 下的所有文件，所有工作线程退出后才返回
    ///
    /// 不会跟随指向目录的符号链接，避免出现循环。
    pub fn walk<H: FileHandler>(&self, root: impl AsRef<Path>, cancel: &CancellationToken, handler: &H) {
        let root = root.as_ref();
        info!("开始遍历目录: {}", root.display());

        // NOTE: 队列长度略大于线程数，避免遍历目录的速度远超处理速度
        let (tx, rx) = bounded::<CrawlTask>(self.workers + 2);

        thread::scope(|s| {
            for i in 0..self.workers {
                let rx = rx.clone();
                s.spawn(move || self.work(WorkerId(i), rx, cancel, handler));
            }
            // 只有工作线程持有接收端，工作线程全部退出后发送会立刻失败
            drop(rx);

            self.produce(root, tx, cancel);
        });

        info!("目录遍历结束: {}", root.display());
    }

    fn produce(&self, root: &Path, tx: Sender<CrawlTask>, cancel: &CancellationToken) {
        let mut entries = WalkDir::new(root).follow_links(false).into_iter();
        loop {
            if cancel.is_cancelled() {
                debug!("遍历已取消");
                break;
            }
            let Some(entry) = entries.next() else {
                break;
            };
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    self.report(WalkError::Traverse(e));
                    continue;
                }
            };

            if entry.file_type().is_dir() {
                continue;
            }
            // 指向目录的符号链接不跟随
            if entry.path_is_symlink() && entry.path().is_dir() {
                continue;
            }

            if tx.send(CrawlTask { path: entry.into_path() }).is_err() {
                break;
            }
        }
    }

    fn work<H: FileHandler>(
        &self,
        worker: WorkerId,
        rx: Receiver<CrawlTask>,
        cancel: &CancellationToken,
        handler: &H,
    ) {
        debug!("{} 启动", worker);
        loop {
            if cancel.is_cancelled() {
                break;
            }
            let Ok(task) = rx.recv() else {
                break;
            };
            if cancel.is_cancelled() {
                break;
            }
            self.process(task, worker, cancel, handler);
        }
        debug!("{} 退出", worker);
    }

    fn process<H: FileHandler>(
        &self,
        task: CrawlTask,
        worker: WorkerId,
        cancel: &CancellationToken,
        handler: &H,
    ) {
        let path = task.path.as_path();
        let mut visit = |vpath: &str, reader: &mut dyn Read, meta: FileMeta| {
            let file = VirtualFile { real_path: path, virtual_path: vpath, reader, meta, worker };
            if let Err(error) = handler.handle(file) {
                self.report(WalkError::Handler {
                    path: path.to_path_buf(),
                    vpath: vpath.to_owned(),
                    error,
                });
            }
        };

        let mut report = |err| self.report(err);

        let kind = ArchiveKind::from_path(path).filter(|kind| self.archives.contains(kind));
        let result = match kind {
            Some(ArchiveKind::Zip) => archive::walk_zip(path, cancel, &mut visit, &mut report),
            Some(ArchiveKind::Rar) => archive::walk_rar(path, cancel, &mut visit, &mut report),
            Some(ArchiveKind::Tar) => archive::walk_tar(path, cancel, &mut visit),
            None => open_file(path).map(|(mut reader, meta)| visit("", &mut reader, meta)),
        };

        if let Err(e) = result {
            self.report(e);
        }
    }

    fn report(&self, err: WalkError) {
        match &self.errors {
            // 接收端已关闭时只能丢弃
            Some(tx) => {
                let _ = tx.send(err);
            }
            None => warn!("{}", err),
        }
    }
}

fn open_file(path: &Path) -> Result<(BufReader<File>, FileMeta), WalkError> {
    let open_err = |source| WalkError::Open { path: path.to_path_buf(), source };
    let file = File::open(path).map_err(open_err)?;
    let metadata = file.metadata().map_err(open_err)?;
    let meta = FileMeta { size: metadata.len(), modified: metadata.modified().ok() };
    Ok((BufReader::new(file), meta))
}

/// 返回小写的后缀名
pub fn extension(path: &Path) -> Option<String> {
    path.extension().map(|ext| ext.to_string_lossy().to_lowercase())
}
