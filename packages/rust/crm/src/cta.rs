//! Notification CTA links: extraction from email bodies and resolution of
//! the redirect chain down to a numeric file id.

use regex::Regex;
use url::Url;

use reportharvest_shared::{HarvestError, Result};

/// Path of the provider's notification CTA endpoint, relative to the app base.
const CTA_PATH: &str = "/api/notification-station/general/v1/notifications/cta/";

/// Query parameter carrying the real target when the CTA lands on a login page.
const LOGIN_REDIRECT_PARAM: &str = "loginRedirectUrl";

/// Compiled patterns for one app base URL.
#[derive(Debug, Clone)]
pub struct CtaMatcher {
    link: Regex,
    file_id: Regex,
}

impl CtaMatcher {
    /// Build matchers for CTA links under `app_base` (e.g. `https://app-eu1.hubspot.com`).
    pub fn new(app_base: &str) -> Result<Self> {
        let base = regex::escape(app_base.trim_end_matches('/'));
        let cta = regex::escape(CTA_PATH);

        let link = Regex::new(&format!(r#"href="({base}{cta}[^"]+)""#))
            .map_err(|e| HarvestError::config(format!("invalid CTA pattern for {app_base}: {e}")))?;
        let file_id = Regex::new(r"/files/(\d+)/")
            .map_err(|e| HarvestError::config(format!("invalid file id pattern: {e}")))?;

        Ok(Self { link, file_id })
    }

    /// Find the first CTA link in an email body, with `&amp;` unescaped.
    pub fn extract_link(&self, body: &str) -> Option<String> {
        self.link
            .captures(body)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().replace("&amp;", "&"))
    }

    /// Pull the numeric file id out of a `/files/<digits>/` path segment.
    pub fn file_id(&self, url: &str) -> Option<String> {
        self.file_id
            .captures(url)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    }
}

/// Work out where a CTA response points.
///
/// A redirect status uses `location`; otherwise the response URL itself.
/// When that target looks like a login challenge, or the CTA answered 200
/// directly, the real destination is recovered from `loginRedirectUrl`
/// (first on the target, then on the response URL).
pub fn redirect_target(status: u16, response_url: &Url, location: Option<&str>) -> String {
    let mut target = match location {
        Some(loc) if is_redirect(status) => loc.to_string(),
        _ => response_url.to_string(),
    };

    if target.to_lowercase().contains("login") || status == 200 {
        if let Some(inner) =
            login_redirect_param(&target).or_else(|| login_redirect_param(response_url.as_str()))
        {
            target = inner;
        }
    }

    target
}

fn is_redirect(status: u16) -> bool {
    matches!(status, 301 | 302 | 303 | 307 | 308)
}

fn login_redirect_param(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let value = parsed
        .query_pairs()
        .find(|(k, _)| k == LOGIN_REDIRECT_PARAM)
        .map(|(_, v)| v.into_owned())?;

    // The parameter is sometimes encoded twice.
    let decoded = match urlencoding::decode(&value) {
        Ok(cow) => cow.into_owned(),
        Err(_) => value.clone(),
    };
    Some(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://app-eu1.hubspot.com";

    #[test]
    fn extracts_cta_link_and_unescapes() {
        let matcher = CtaMatcher::new(BASE).unwrap();
        let body = r#"<p>Your export is ready.</p>
            <a class="btn" href="https://app-eu1.hubspot.com/api/notification-station/general/v1/notifications/cta/abc123?portalId=1&amp;token=xyz">Download</a>"#;

        let link = matcher.extract_link(body).expect("link");
        assert_eq!(
            link,
            "https://app-eu1.hubspot.com/api/notification-station/general/v1/notifications/cta/abc123?portalId=1&token=xyz"
        );
    }

    #[test]
    fn ignores_links_on_other_hosts() {
        let matcher = CtaMatcher::new(BASE).unwrap();
        let body = r#"<a href="https://evil.example.com/api/notification-station/general/v1/notifications/cta/abc">x</a>
            <a href="https://app-eu1.hubspot.com/settings">settings</a>"#;
        assert!(matcher.extract_link(body).is_none());
    }

    #[test]
    fn base_with_trailing_slash() {
        let matcher = CtaMatcher::new("http://127.0.0.1:8080/").unwrap();
        let body = r#"href="http://127.0.0.1:8080/api/notification-station/general/v1/notifications/cta/q""#;
        assert!(matcher.extract_link(body).is_some());
    }

    #[test]
    fn file_id_from_path() {
        let matcher = CtaMatcher::new(BASE).unwrap();
        assert_eq!(
            matcher.file_id("https://app-eu1.hubspot.com/files/12345/download?x=1"),
            Some("12345".to_string())
        );
        assert_eq!(matcher.file_id("https://app-eu1.hubspot.com/files/abc/"), None);
        assert_eq!(matcher.file_id("https://app-eu1.hubspot.com/files/12345"), None);
    }

    #[test]
    fn redirect_uses_location() {
        let url = Url::parse("https://app.example/cta/1").unwrap();
        let target = redirect_target(302, &url, Some("https://app.example/files/42/x"));
        assert_eq!(target, "https://app.example/files/42/x");
    }

    #[test]
    fn login_redirect_is_unwrapped() {
        let url = Url::parse("https://app.example/cta/1").unwrap();
        let location = "https://app.example/login?loginRedirectUrl=https%253A%252F%252Fapp.example%252Ffiles%252F777%252Fview";
        let target = redirect_target(302, &url, Some(location));
        assert_eq!(target, "https://app.example/files/777/view");
    }

    #[test]
    fn direct_200_reads_response_url() {
        let url = Url::parse(
            "https://app.example/cta/1?loginRedirectUrl=https%3A%2F%2Fapp.example%2Ffiles%2F55%2Fget",
        )
        .unwrap();
        assert_eq!(
            redirect_target(200, &url, None),
            "https://app.example/files/55/get"
        );
    }

    #[test]
    fn non_redirect_without_param_keeps_url() {
        let url = Url::parse("https://app.example/cta/1").unwrap();
        assert_eq!(redirect_target(404, &url, None), "https://app.example/cta/1");
    }
}
