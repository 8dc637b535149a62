//! # 提交导出
//!
//! 会话结束时把 `ImageSet` 转成外部提交步骤需要的形态：
//! 有序的图片字节 + 主图下标。导出后预览句柄全部释放。

use std::collections::HashSet;
use std::path::Path;

use base64::{Engine as _, engine::general_purpose};
use serde::{Serialize, Serializer};

use super::image_set::{ImageId, ImageSet};

/// 待上传的单张图片。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmissionImage {
    pub id: ImageId,
    pub file_name: String,
    pub mime: &'static str,
    #[serde(serialize_with = "serialize_base64")]
    pub bytes: Vec<u8>,
}

/// 提交数据：图片顺序即展示顺序。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Submission {
    pub images: Vec<SubmissionImage>,
    pub primary_index: Option<usize>,
}

impl Submission {
    pub(crate) fn from_set(set: ImageSet) -> Self {
        let (items, primary) = set.into_parts();
        let primary_index = primary.and_then(|id| items.iter().position(|item| item.id() == id));

        let mut used_names = HashSet::new();
        let images = items
            .into_iter()
            .enumerate()
            .map(|(index, item)| {
                let (id, original_name, mime, bytes) = item.into_upload_parts();
                let file_name =
                    dedupe_file_name(upload_file_name(&original_name, index, mime), &mut used_names);
                SubmissionImage {
                    id,
                    file_name,
                    mime,
                    bytes,
                }
            })
            .collect();

        Self {
            images,
            primary_index,
        }
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn primary(&self) -> Option<&SubmissionImage> {
        self.primary_index.and_then(|index| self.images.get(index))
    }

    pub fn total_bytes(&self) -> usize {
        self.images.iter().map(|image| image.bytes.len()).sum()
    }
}

/// 上传文件名：保留原始文件名主干（只留 ASCII 字母数字、`-`、`_`），扩展名跟随实际格式。
fn upload_file_name(original_name: &str, index: usize, mime: &str) -> String {
    let stem: String = Path::new(original_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect();
    let stem = stem.trim_matches('-');

    let extension = match mime {
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/webp" => "webp",
        "image/gif" => "gif",
        _ => "bin",
    };

    if stem.is_empty() {
        format!("photo-{}.{}", index + 1, extension)
    } else {
        format!("{}.{}", stem, extension)
    }
}

/// 同名文件（大小写不敏感）追加 `-2`、`-3` … 后缀，保证一次提交内文件名唯一。
fn dedupe_file_name(file_name: String, used: &mut HashSet<String>) -> String {
    if used.insert(file_name.to_ascii_lowercase()) {
        return file_name;
    }

    let (stem, extension) = file_name.rsplit_once('.').unwrap_or((file_name.as_str(), ""));
    let mut suffix = 2usize;
    loop {
        let candidate = if extension.is_empty() {
            format!("{}-{}", stem, suffix)
        } else {
            format!("{}-{}.{}", stem, suffix, extension)
        };
        if used.insert(candidate.to_ascii_lowercase()) {
            return candidate;
        }
        suffix += 1;
    }
}

fn serialize_base64<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&general_purpose::STANDARD.encode(bytes))
}
