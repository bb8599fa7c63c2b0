//! Twitter/X handle parsing.
//!
//! Accepts `@user`, `user`, and profile or status URLs on twitter.com / x.com.

use regex::Regex;
use std::sync::OnceLock;

static PROFILE_URL: OnceLock<Regex> = OnceLock::new();
static USERNAME: OnceLock<Regex> = OnceLock::new();

fn profile_url_re() -> &'static Regex {
    PROFILE_URL.get_or_init(|| {
        Regex::new(r"^(?:https?://)?(?:www\.)?(?:twitter\.com|x\.com)/([A-Za-z0-9_]+)(?:/status/\d+|/replies)?/?(?:[?#].*)?$")
            .unwrap_or_else(|e| unreachable!("profile url regex: {e}"))
    })
}

fn username_re() -> &'static Regex {
    USERNAME.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9_]{1,15}$").unwrap_or_else(|e| unreachable!("username regex: {e}"))
    })
}

/// Extract the username from user input. Case is preserved for display.
pub fn extract_handle(input: &str) -> Option<String> {
    let trimmed = input.trim();
    let candidate = match profile_url_re().captures(trimmed) {
        Some(caps) => caps.get(1)?.as_str(),
        None => trimmed.strip_prefix('@').unwrap_or(trimmed),
    };

    if username_re().is_match(candidate) {
        Some(candidate.to_string())
    } else {
        None
    }
}

/// Public profile URL for a handle.
pub fn profile_url(handle: &str) -> String {
    format!("https://x.com/{handle}")
}
