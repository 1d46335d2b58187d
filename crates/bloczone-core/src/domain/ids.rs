//! Identifiers.
//!
//! - `ObserverId`: subscription の identity キー（ULID ベース）
//! - `BlocId`: ContainerRegistry で名前付き container を引くためのキー
//!
//! ## なぜ ULID なのか？
//! observer の identity は「参照比較できる何か」であればよい。
//! Rust にはオブジェクト同一性がないので、調整なしで生成できる一意な値を使う。
//! 生成順でソートできるのはデバッグ時のおまけ。

use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

/// Opaque identity of an observer.
///
/// A component creates one when it mounts and keeps it for as long as it
/// wants to receive notifications.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObserverId(Ulid);

impl ObserverId {
    /// 新しい identity を生成
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    pub fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    pub fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl Default for ObserverId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Ulid> for ObserverId {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "observer-{}", self.0)
    }
}

/// Name under which a container is shared through the registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlocId(String);

impl BlocId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for BlocId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for BlocId {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl fmt::Display for BlocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
