#![allow(dead_code)]

use std::fs::{self, File};
use std::io::{Cursor, Write};
use std::path::Path;

use anyhow::Result;
use image::{ImageFormat, Rgb, RgbImage};
use zip::CompressionMethod;
use zip::write::SimpleFileOptions;

/// 生成一张纯色 PNG
pub fn png_bytes(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
    let image = RgbImage::from_pixel(width, height, Rgb(color));
    let mut data = Vec::new();
    image.write_to(&mut Cursor::new(&mut data), ImageFormat::Png).unwrap();
    data
}

pub fn write_file(path: impl AsRef<Path>, data: &[u8]) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, data)?;
    Ok(())
}

/// 生成 zip 归档，名称以 `/` 结尾的条目为目录
pub fn write_zip(path: impl AsRef<Path>, entries: &[(&str, &[u8])]) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    let mut zip = zip::ZipWriter::new(File::create(path)?);
    for (name, data) in entries {
        if name.ends_with('/') {
            zip.add_directory(*name, options)?;
        } else {
            zip.start_file(*name, options)?;
            zip.write_all(data)?;
        }
    }
    zip.finish()?;
    Ok(())
}

/// 生成 tar 归档，名称以 `/` 结尾的条目为目录
pub fn write_tar(path: impl AsRef<Path>, entries: &[(&str, &[u8])]) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut builder = tar::Builder::new(File::create(path)?);
    for (name, data) in entries {
        let mut header = tar::Header::new_gnu();
        if name.ends_with('/') {
            header.set_entry_type(tar::EntryType::Directory);
            header.set_size(0);
            header.set_mode(0o755);
            builder.append_data(&mut header, name, std::io::empty())?;
        } else {
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            builder.append_data(&mut header, name, *data)?;
        }
    }
    builder.into_inner()?.flush()?;
    Ok(())
}

/// 预先生成的 rar 归档，包含 `p.txt`、`q.txt`、`r.txt` 和一个目录 `inner`
pub fn copy_rar_fixture(path: impl AsRef<Path>) -> Result<()> {
    let fixture = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/pack.rar");
    write_file(path, &fs::read(fixture)?)
}

/// 生成只有一个条目的 tar 归档，文件头中声明的大小为 `declared`，实际只有 `data`
pub fn write_tar_with_declared_size(path: impl AsRef<Path>, name: &str, declared: u64, data: &[u8]) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_path(name)?;
    header.set_size(declared);
    header.set_mode(0o644);
    header.set_cksum();

    let mut bytes = header.as_bytes().to_vec();
    bytes.extend_from_slice(data);
    bytes.resize(bytes.len().next_multiple_of(512), 0);
    write_file(path, &bytes)
}

/// 把 zip 中第一个条目的压缩算法改成 bzip2（未启用的算法）
pub fn mark_first_zip_entry_bzip2(path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let mut bytes = fs::read(path)?;
    // 本地文件头的压缩算法位于偏移 8
    bytes[8..10].copy_from_slice(&12u16.to_le_bytes());
    // 中央目录的压缩算法位于偏移 10
    let central = bytes
        .windows(4)
        .position(|w| w == b"PK\x01\x02")
        .ok_or_else(|| anyhow::anyhow!("zip 中没有中央目录"))?;
    bytes[central + 10..central + 12].copy_from_slice(&12u16.to_le_bytes());
    fs::write(path, bytes)?;
    Ok(())
}
