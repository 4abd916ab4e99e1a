//! Coarse device classification from the `User-Agent` header.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Mobile,
    Tablet,
    Desktop,
    Bot,
    Unknown,
}

impl DeviceType {
    pub fn detect(user_agent: &str) -> Self {
        let ua = user_agent.to_ascii_lowercase();
        if ua.is_empty() {
            return DeviceType::Unknown;
        }
        if ["bot", "crawler", "spider", "curl/", "wget/"].iter().any(|m| ua.contains(m)) {
            return DeviceType::Bot;
        }
        if ua.contains("ipad") || ua.contains("tablet") || (ua.contains("android") && !ua.contains("mobile")) {
            return DeviceType::Tablet;
        }
        if ["mobile", "iphone", "ipod", "android", "windows phone"].iter().any(|m| ua.contains(m)) {
            return DeviceType::Mobile;
        }
        if ["windows", "macintosh", "mac os x", "linux", "x11", "cros"].iter().any(|m| ua.contains(m)) {
            return DeviceType::Desktop;
        }
        DeviceType::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_common_agents() {
        assert_eq!(
            DeviceType::detect("Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) Mobile/15E148"),
            DeviceType::Mobile
        );
        assert_eq!(
            DeviceType::detect("Mozilla/5.0 (iPad; CPU OS 16_0 like Mac OS X)"),
            DeviceType::Tablet
        );
        assert_eq!(
            DeviceType::detect("Mozilla/5.0 (Linux; Android 13; SM-X700)"),
            DeviceType::Tablet
        );
        assert_eq!(
            DeviceType::detect("Mozilla/5.0 (Windows NT 10.0; Win64; x64) Chrome/120"),
            DeviceType::Desktop
        );
        assert_eq!(DeviceType::detect("Googlebot/2.1"), DeviceType::Bot);
        assert_eq!(DeviceType::detect(""), DeviceType::Unknown);
    }
}
