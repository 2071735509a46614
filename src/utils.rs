use url::Url;

use crate::error::WorkerError;
use crate::Result;

/// 检查URL是否为绝对URL
pub fn is_absolute_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// 将相对URL转换为绝对URL
///
/// # Examples
/// ```
/// use offline_cache_worker::utils::resolve_url;
///
/// let base = "http://example.com/app/";
/// let absolute = resolve_url(base, "/offline.html").unwrap();
/// assert_eq!(absolute.as_str(), "http://example.com/offline.html");
/// ```
pub fn resolve_url(base: &str, relative: &str) -> Result<Url> {
    if is_absolute_url(relative) {
        return Url::parse(relative).map_err(|e| WorkerError::InvalidMessage(e.to_string()));
    }
    let base = Url::parse(base).map_err(|e| WorkerError::Config(format!("invalid base url {}: {}", base, e)))?;
    base.join(relative)
        .map_err(|e| WorkerError::InvalidMessage(e.to_string()))
}

/// 两个 URL 是否同源 (scheme + host + port)
pub fn same_origin(a: &Url, b: &Url) -> bool {
    a.origin() == b.origin()
}

/// 把毫秒时长格式化为 "3 days" / "26 hours" 这样的描述
pub fn describe_duration_ms(ms: i64) -> String {
    let hours = ms.max(0) / (60 * 60 * 1000);
    if hours >= 48 {
        format!("{} days", hours / 24)
    } else if hours == 1 {
        "1 hour".to_string()
    } else {
        format!("{} hours", hours)
    }
}
