//! 存储位置（本地路径或 s3://bucket/key）

use crate::error::SyncError;
use regex::Regex;
use std::fmt;
use std::path::{Path, PathBuf, MAIN_SEPARATOR};

const S3_SCHEME: &str = "s3://";
const GLOB_CHARS: &[char] = &['*', '?', '['];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlKind {
    Local,
    Remote,
}

/// 存储位置引用
#[derive(Debug, Clone)]
pub struct StorageUrl {
    kind: UrlKind,
    bucket: String,
    /// 远程为对象 key，本地为原始路径
    path: String,
    /// 第一个通配符之前、截断到最后一个分隔符的部分
    prefix: String,
    relative: Option<String>,
    raw: bool,
    pattern: Option<Regex>,
}

impl StorageUrl {
    /// 解析位置表达式，`raw` 为 true 时不展开通配符
    pub fn parse(input: &str, raw: bool) -> Result<Self, SyncError> {
        if input.is_empty() {
            return Err(SyncError::validation("given url is empty"));
        }

        let (kind, bucket, path) = if let Some(rest) = input.strip_prefix(S3_SCHEME) {
            let (bucket, key) = rest.split_once('/').unwrap_or((rest, ""));
            if bucket.is_empty() {
                return Err(SyncError::validation(format!(
                    "s3 url should have a bucket: {}",
                    input
                )));
            }
            if bucket.contains(GLOB_CHARS) {
                return Err(SyncError::validation(format!(
                    "bucket name cannot contain wildcards: {}",
                    input
                )));
            }
            (UrlKind::Remote, bucket.to_string(), key.to_string())
        } else if input.contains("://") {
            return Err(SyncError::validation(format!(
                "unsupported url scheme: {}",
                input
            )));
        } else {
            (UrlKind::Local, String::new(), input.to_string())
        };

        let mut url = Self {
            kind,
            bucket,
            path,
            prefix: String::new(),
            relative: None,
            raw,
            pattern: None,
        };
        url.prefix = url.compute_prefix();
        if url.is_wildcard() {
            let expr = glob_to_regex(&normalize(&url.path));
            let re = Regex::new(&expr)
                .map_err(|e| SyncError::validation(format!("invalid wildcard {}: {}", input, e)))?;
            url.pattern = Some(re);
        }
        Ok(url)
    }

    /// 构造列举得到的具体对象位置（始终为 raw）
    pub fn object(base: &StorageUrl, path: impl Into<String>, relative: impl Into<String>) -> Self {
        let mut url = Self {
            kind: base.kind,
            bucket: base.bucket.clone(),
            path: path.into(),
            prefix: String::new(),
            relative: Some(normalize(&relative.into())),
            raw: true,
            pattern: None,
        };
        url.prefix = url.compute_prefix();
        url
    }

    fn separators(&self) -> &'static [char] {
        match self.kind {
            UrlKind::Remote => &['/'],
            UrlKind::Local if cfg!(windows) => &['/', '\\'],
            UrlKind::Local => &['/'],
        }
    }

    fn compute_prefix(&self) -> String {
        let head = if self.is_wildcard() {
            let idx = self.path.find(GLOB_CHARS).unwrap_or(self.path.len());
            &self.path[..idx]
        } else {
            self.path.as_str()
        };
        match head.rfind(self.separators()) {
            Some(idx) => head[..=idx].to_string(),
            None => String::new(),
        }
    }

    pub fn kind(&self) -> UrlKind {
        self.kind
    }

    pub fn is_remote(&self) -> bool {
        self.kind == UrlKind::Remote
    }

    pub fn is_raw(&self) -> bool {
        self.raw
    }

    pub fn is_wildcard(&self) -> bool {
        !self.raw && self.path.contains(GLOB_CHARS)
    }

    /// 只有 bucket，没有 key
    pub fn is_bucket(&self) -> bool {
        self.is_remote() && self.path.is_empty()
    }

    /// 以分隔符结尾的远程 key
    pub fn is_prefix(&self) -> bool {
        self.is_remote() && self.path.ends_with('/')
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn local_path(&self) -> PathBuf {
        PathBuf::from(&self.path)
    }

    /// 最后一段路径
    pub fn base(&self) -> &str {
        let trimmed = self.path.trim_end_matches(self.separators());
        match trimmed.rfind(self.separators()) {
            Some(idx) => &trimmed[idx + 1..],
            None => trimmed,
        }
    }

    /// 相对于列举根目录的路径（统一使用 /）
    pub fn relative(&self) -> &str {
        self.relative.as_deref().unwrap_or_else(|| self.base())
    }

    /// 追加一段路径，结果总是 raw
    pub fn join(&self, name: &str) -> StorageUrl {
        let path = match self.kind {
            UrlKind::Remote => {
                let name = normalize(name);
                let name = name.trim_start_matches('/');
                if self.path.is_empty() || self.path.ends_with('/') {
                    format!("{}{}", self.path, name)
                } else {
                    format!("{}/{}", self.path, name)
                }
            }
            UrlKind::Local => {
                let native: String = name
                    .trim_start_matches(['/', '\\'])
                    .chars()
                    .map(|c| if c == '/' { MAIN_SEPARATOR } else { c })
                    .collect();
                Path::new(&self.path).join(native).to_string_lossy().into_owned()
            }
        };

        let mut url = Self {
            kind: self.kind,
            bucket: self.bucket.clone(),
            path,
            prefix: String::new(),
            relative: None,
            raw: true,
            pattern: None,
        };
        url.prefix = url.compute_prefix();
        url
    }

    /// 通配符匹配，`*` 可以跨越分隔符
    pub fn matches(&self, candidate: &str) -> bool {
        match &self.pattern {
            Some(re) => re.is_match(&normalize(candidate)),
            None => normalize(candidate) == normalize(&self.path),
        }
    }

    /// 两个位置是否位于同一个远程 bucket
    pub fn same_bucket(&self, other: &StorageUrl) -> bool {
        self.is_remote() && other.is_remote() && self.bucket == other.bucket
    }
}

impl PartialEq for StorageUrl {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.bucket == other.bucket && self.path == other.path
    }
}

impl Eq for StorageUrl {}

impl fmt::Display for StorageUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            UrlKind::Remote => write!(f, "{}{}/{}", S3_SCHEME, self.bucket, self.path),
            UrlKind::Local => write!(f, "{}", self.path),
        }
    }
}

/// 路径分隔符统一为 /
pub fn normalize(path: &str) -> String {
    path.replace('\\', "/")
}

pub(crate) fn glob_to_regex(glob: &str) -> String {
    let mut expr = String::from("^");
    let mut chars = glob.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            '[' => {
                let class: String = chars.clone().take_while(|&c| c != ']').collect();
                let closed = chars.clone().nth(class.chars().count()) == Some(']');
                if closed && !class.is_empty() {
                    for _ in 0..=class.chars().count() {
                        chars.next();
                    }
                    expr.push('[');
                    match class.strip_prefix('!') {
                        Some(rest) => {
                            expr.push('^');
                            expr.push_str(&rest.replace('\\', "\\\\"));
                        }
                        None => expr.push_str(&class.replace('\\', "\\\\")),
                    }
                    expr.push(']');
                } else {
                    expr.push_str("\\[");
                }
            }
            other => expr.push_str(&regex::escape(&other.to_string())),
        }
    }
    expr.push('$');
    expr
}
