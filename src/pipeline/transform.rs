use std::io::Cursor;
use std::path::Path;

use anyhow::Result;
use image::ImageFormat;
use image::imageops::FilterType;

/// 支持的图片后缀名
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "gif"];

pub fn is_supported(ext: Option<&str>) -> bool {
    ext.is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext))
}

/// 预处理后的图片，宽高为原图尺寸
pub struct PreparedImage {
    pub width: u32,
    pub height: u32,
    /// 缩放后重新编码的 PNG
    pub png: Vec<u8>,
}

/// 解码图片，任意一边超过 `max_size` 时等比缩小，然后编码为 PNG
pub fn prepare(data: &[u8], max_size: u32) -> Result<PreparedImage> {
    let image = image::load_from_memory(data)?;
    let (width, height) = (image.width(), image.height());

    let image = if width > max_size || height > max_size {
        image.resize(max_size, max_size, FilterType::Triangle)
    } else {
        image
    };

    let mut png = Vec::new();
    image.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;

    Ok(PreparedImage { width, height, png })
}

/// 计算 (parent_path, sub_path)
///
/// 普通文件：去掉集合根目录后的所在目录 + 文件名。
/// 归档条目：去掉集合根目录后的归档路径 + 归档内路径。
pub fn split_path(root: &Path, real_path: &Path, virtual_path: &str) -> (String, String) {
    let relative = real_path.strip_prefix(root).unwrap_or(real_path);
    if !virtual_path.is_empty() {
        return (relative.to_string_lossy().into_owned(), virtual_path.to_owned());
    }

    let parent = relative.parent().map(|p| p.to_string_lossy().into_owned()).unwrap_or_default();
    let name = relative.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    (parent, name)
}
