// 该文件是 Liuguang （流光） 项目的一部分。
// src/label.rs - 标签文件
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::{collections::HashMap, path::Path, str::FromStr};

use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum LabelError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("第 {line} 行: 无法解析类别编号 '{id}'")]
  InvalidId { line: usize, id: String },
  #[error("第 {line} 行: 缺少类别名称")]
  MissingText { line: usize },
}

/// 类别编号到名称的映射，每行格式为 `<编号><空白><名称>`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelMap {
  labels: HashMap<u32, String>,
}

impl LabelMap {
  pub fn from_path(path: impl AsRef<Path>) -> Result<Self, LabelError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)?;
    let labels = text.parse::<LabelMap>()?;
    debug!("从 {} 读取 {} 个标签", path.display(), labels.len());
    Ok(labels)
  }

  pub fn get(&self, id: u32) -> Option<&str> {
    self.labels.get(&id).map(String::as_str)
  }

  pub fn len(&self) -> usize {
    self.labels.len()
  }

  pub fn is_empty(&self) -> bool {
    self.labels.is_empty()
  }
}

impl FromStr for LabelMap {
  type Err = LabelError;

  fn from_str(text: &str) -> Result<Self, Self::Err> {
    let mut labels = HashMap::new();
    for (index, line) in text.lines().enumerate() {
      let line_no = index + 1;
      let line = line.trim();
      if line.is_empty() {
        continue;
      }
      let (id, name) = line
        .split_once(char::is_whitespace)
        .ok_or(LabelError::MissingText { line: line_no })?;
      let id = id.parse::<u32>().map_err(|_| LabelError::InvalidId {
        line: line_no,
        id: id.to_string(),
      })?;
      let name = name.trim();
      if name.is_empty() {
        return Err(LabelError::MissingText { line: line_no });
      }
      labels.insert(id, name.to_string());
    }
    Ok(Self { labels })
  }
}

impl FromIterator<(u32, String)> for LabelMap {
  fn from_iter<I: IntoIterator<Item = (u32, String)>>(iter: I) -> Self {
    Self {
      labels: iter.into_iter().collect(),
    }
  }
}
