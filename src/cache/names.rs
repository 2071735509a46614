use std::collections::HashSet;

pub const STATIC_RESOURCES: &str = "static-resources";
pub const IMAGE_CACHE: &str = "image-cache";
pub const DATA_CACHE: &str = "data-cache";
pub const OFFLINE_FALLBACK: &str = "offline-fallback";

/// 当前这一代部署使用的缓存名
///
/// 只有静态资源缓存带版本号: 每次部署预缓存新的资源清单，
/// 激活时删除不在 [`CacheNames::current`] 里的旧缓存。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheNames {
    pub static_resources: String,
    pub images: String,
    pub data: String,
    pub offline: String,
}

impl CacheNames {
    pub fn new(version: &str) -> Self {
        let static_resources = if version.is_empty() {
            STATIC_RESOURCES.to_string()
        } else {
            format!("{}-{}", STATIC_RESOURCES, version)
        };
        Self {
            static_resources,
            images: IMAGE_CACHE.to_string(),
            data: DATA_CACHE.to_string(),
            offline: OFFLINE_FALLBACK.to_string(),
        }
    }

    pub fn current(&self) -> HashSet<String> {
        [&self.static_resources, &self.images, &self.data, &self.offline]
            .into_iter()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_versioned_static_cache() {
        let names = CacheNames::new("v2");
        assert_eq!(names.static_resources, "static-resources-v2");
        assert_eq!(names.images, "image-cache");

        let current = names.current();
        assert_eq!(current.len(), 4);
        assert!(current.contains("offline-fallback"));
        assert!(!current.contains("static-resources-v1"));
    }

    #[test]
    fn test_unversioned() {
        assert_eq!(CacheNames::new("").static_resources, "static-resources");
    }
}
