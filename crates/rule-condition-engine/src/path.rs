//! 分组路径
//!
//! 条件节点以扁平列表存储，`PathKey` 记录节点所在的分组位置：
//! 前 n-1 个分量定位父分组，最后一个分量是节点在父分组中的序号。

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 有序整数序列表示的分组路径
///
/// 节点路径至少包含一个分量；空路径只用于表示根分组的前缀。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PathKey(Vec<usize>);

impl PathKey {
    pub fn new(components: Vec<usize>) -> Self {
        Self(components)
    }

    /// 根分组前缀（空路径）
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn components(&self) -> &[usize] {
        &self.0
    }

    pub fn component(&self, index: usize) -> Option<usize> {
        self.0.get(index).copied()
    }

    /// 取前 k 个分量
    pub fn prefix(&self, k: usize) -> Result<PathKey> {
        if k > self.0.len() {
            return Err(self.out_of_range(format!("prefix({})", k)));
        }
        Ok(Self(self.0[..k].to_vec()))
    }

    /// 判断 self 是否为 other 的前缀（包含相等）
    pub fn is_prefix_of(&self, other: &PathKey) -> bool {
        other.0.starts_with(&self.0)
    }

    pub fn last_component(&self) -> Result<usize> {
        self.0
            .last()
            .copied()
            .ok_or_else(|| self.out_of_range("last_component".to_string()))
    }

    /// 替换最后一个分量
    pub fn with_last(&self, n: usize) -> Result<PathKey> {
        let mut components = self.0.clone();
        match components.last_mut() {
            Some(last) => *last = n,
            None => return Err(self.out_of_range(format!("with_last({})", n))),
        }
        Ok(Self(components))
    }

    pub fn append(&self, n: usize) -> PathKey {
        let mut components = self.0.clone();
        components.push(n);
        Self(components)
    }

    /// 父分组前缀
    pub fn parent(&self) -> Result<PathKey> {
        if self.0.is_empty() {
            return Err(self.out_of_range("parent".to_string()));
        }
        self.prefix(self.0.len() - 1)
    }

    /// 从 `at` 开始移除 `count` 个分量（解除嵌套时使用）
    pub fn drop(&self, at: usize, count: usize) -> Result<PathKey> {
        let end = at
            .checked_add(count)
            .filter(|end| *end <= self.0.len())
            .ok_or_else(|| self.out_of_range(format!("drop({}, {})", at, count)))?;

        let mut components = Vec::with_capacity(self.0.len() - count);
        components.extend_from_slice(&self.0[..at]);
        components.extend_from_slice(&self.0[end..]);

        if components.is_empty() {
            return Err(self.out_of_range(format!("drop({}, {}) 结果为空", at, count)));
        }
        Ok(Self(components))
    }

    /// 在 `at` 位置插入一个分量（包裹新分组时使用）
    pub fn insert(&self, at: usize, n: usize) -> Result<PathKey> {
        if at > self.0.len() {
            return Err(self.out_of_range(format!("insert({}, {})", at, n)));
        }
        let mut components = self.0.clone();
        components.insert(at, n);
        Ok(Self(components))
    }

    fn out_of_range(&self, op: String) -> EngineError {
        EngineError::InvalidPath(format!("{} 超出路径 {} 的范围", op, self))
    }
}

impl From<Vec<usize>> for PathKey {
    fn from(components: Vec<usize>) -> Self {
        Self(components)
    }
}

impl From<&[usize]> for PathKey {
    fn from(components: &[usize]) -> Self {
        Self(components.to_vec())
    }
}

impl fmt::Display for PathKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "root");
        }
        let parts: Vec<String> = self.0.iter().map(|c| c.to_string()).collect();
        write!(f, "{}", parts.join("."))
    }
}

/// 解析 "2.0.3" 形式的路径，"root" 或空串表示根分组
impl FromStr for PathKey {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() || s == "root" {
            return Ok(Self::root());
        }
        s.split('.')
            .map(|part| {
                part.parse::<usize>()
                    .map_err(|_| EngineError::InvalidPath(format!("无法解析路径 '{}'", s)))
            })
            .collect::<Result<Vec<_>>>()
            .map(Self)
    }
}
