//! User agent handling for routed requests.

pub const USER_AGENT: &str = "snowstrap/0.1";

/// User agent sent by current Tor Browser releases.
///
/// Requests leaving an exit node blend in better with this than with a
/// tool-specific string.
pub const TOR_BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; rv:128.0) Gecko/20100101 Firefox/128.0";

/// Resolve user agent from config value.
/// - None => default snowstrap user agent
/// - "torbrowser" => Tor Browser user agent
/// - other => custom user agent string
pub fn resolve_user_agent(config: Option<&str>) -> String {
    match config {
        None => USER_AGENT.to_string(),
        Some("torbrowser") => TOR_BROWSER_USER_AGENT.to_string(),
        Some(custom) => custom.to_string(),
    }
}
