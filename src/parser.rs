//! User-Agent string parsing
//!
//! The [`UserAgentParser`] trait is the seam for plugging in a full parser
//! (uap-core rules, a detection service, ...). [`ProductTokenParser`] is a
//! small built-in heuristic that covers the common browsers, bots, HTTP
//! libraries and operating systems, which is enough for coarse counters.

use crate::descriptor::{AgentType, Descriptor, DescriptorBuilder, OperatingSystem};
use crate::error::ParseError;
use once_cell::sync::Lazy;
use regex::Regex;

/// Turns a raw client-identification string into a [`Descriptor`].
///
/// Implementations must be pure: the same input is expected to produce the
/// same descriptor, since results are memoized.
pub trait UserAgentParser: Send + Sync {
    /// Parse a raw User-Agent string.
    fn parse(&self, user_agent: &str) -> Result<Descriptor, ParseError>;
}

impl<F> UserAgentParser for F
where
    F: Fn(&str) -> Result<Descriptor, ParseError> + Send + Sync,
{
    fn parse(&self, user_agent: &str) -> Result<Descriptor, ParseError> {
        self(user_agent)
    }
}

static PRODUCT_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([A-Za-z][A-Za-z0-9_.\-]*)/([0-9A-Za-z_.]+)").expect("product token regex")
});
static MSIE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"MSIE ([0-9]+(?:\.[0-9]+)*)").expect("MSIE regex"));
static TRIDENT_RV: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Trident/[0-9.]+;.*rv:([0-9]+(?:\.[0-9]+)*)").expect("rv regex"));
static WINDOWS_NT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Windows NT ([0-9]+\.[0-9]+)").expect("Windows NT regex"));
static IOS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:iPhone|CPU) OS ([0-9_]+)").expect("iOS regex"));
static MAC_OS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Mac OS X ?([0-9_.]*)").expect("Mac OS regex"));
static ANDROID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Android ?([0-9.]*)").expect("Android regex"));

const ROBOT_MARKERS: &[&str] = &["bot", "spider", "crawler", "slurp"];

/// Robot marker as a standalone word anywhere in the string (`Yahoo! Slurp`).
static ROBOT_WORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:bot|spider|crawler|slurp)\b").expect("robot word regex"));

/// Product names like `Googlebot`, `bingbot` or `Baiduspider`.
fn is_robot_token(name: &str) -> bool {
    let name = name.to_lowercase();
    ROBOT_MARKERS.iter().any(|marker| name.ends_with(marker))
}

/// (token, display name) pairs for HTTP client libraries and tools
const LIBRARIES: &[(&str, &str)] = &[
    ("curl", "curl"),
    ("Wget", "Wget"),
    ("python-requests", "Python Requests"),
    ("okhttp", "OkHttp"),
    ("Go-http-client", "Go HTTP Client"),
    ("Apache-HttpClient", "Apache HttpClient"),
    ("Java", "Java"),
];

/// Built-in heuristic parser based on product tokens (`Name/Version`).
///
/// Detection order matters because most browsers claim to be several others
/// (`Chrome/.. Safari/..`, `Edg/.. Chrome/..`): the more specific token wins.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProductTokenParser;

impl ProductTokenParser {
    /// Create a parser.
    pub fn new() -> Self {
        Self
    }
}

impl UserAgentParser for ProductTokenParser {
    fn parse(&self, user_agent: &str) -> Result<Descriptor, ParseError> {
        let user_agent = user_agent.trim();
        if user_agent.is_empty() {
            return Err(ParseError::Empty);
        }

        let tokens: Vec<(&str, &str)> = PRODUCT_TOKEN
            .captures_iter(user_agent)
            .filter_map(|caps| Some((caps.get(1)?.as_str(), caps.get(2)?.as_str())))
            .collect();

        let builder = detect_agent(user_agent, &tokens)
            .ok_or_else(|| ParseError::unrecognized(user_agent))?;

        Ok(builder.operating_system(detect_os(user_agent)).build())
    }
}

fn token<'a>(tokens: &[(&'a str, &'a str)], name: &str) -> Option<&'a str> {
    tokens
        .iter()
        .find(|(token, _)| *token == name)
        .map(|(_, version)| *version)
}

fn browser(name: &str, family: &str, version: &str) -> DescriptorBuilder {
    Descriptor::builder(name)
        .family(family)
        .version(version)
        .agent_type(AgentType::Browser)
}

fn detect_agent(
    user_agent: &str,
    tokens: &[(&str, &str)],
) -> Option<DescriptorBuilder> {
    let robot_token = tokens.iter().find(|(name, _)| is_robot_token(name)).copied();
    if robot_token.is_some() || ROBOT_WORD.is_match(user_agent) {
        let (name, version) = robot_token.unwrap_or(("Robot", ""));
        return Some(
            Descriptor::builder(name)
                .version(version)
                .agent_type(AgentType::Robot),
        );
    }

    if let Some(v) = token(tokens, "Edg").or_else(|| token(tokens, "Edge")) {
        return Some(browser("Edge", "Edge", v));
    }
    if let Some(v) = token(tokens, "OPR") {
        return Some(browser("Opera", "Chrome", v));
    }
    if let Some(v) = token(tokens, "Opera") {
        let v = token(tokens, "Version").unwrap_or(v);
        return Some(browser("Opera", "Opera", v));
    }
    if let Some(v) = token(tokens, "Chromium") {
        return Some(browser("Chromium", "Chrome", v));
    }
    if let Some(v) = token(tokens, "Chrome").or_else(|| token(tokens, "CriOS")) {
        return Some(browser("Chrome", "Chrome", v));
    }
    if let Some(v) = token(tokens, "Firefox").or_else(|| token(tokens, "FxiOS")) {
        return Some(browser("Firefox", "Firefox", v));
    }
    if let Some(caps) = MSIE.captures(user_agent).or_else(|| TRIDENT_RV.captures(user_agent)) {
        let v = caps.get(1).map_or("", |m| m.as_str());
        return Some(browser("IE", "IE", v));
    }
    if let Some(v) = token(tokens, "Safari") {
        let v = token(tokens, "Version").unwrap_or(v);
        return Some(browser("Safari", "Safari", v));
    }

    for (needle, name) in LIBRARIES {
        if let Some((_, v)) = tokens.iter().find(|(token, _)| token.eq_ignore_ascii_case(needle)) {
            return Some(
                Descriptor::builder(*name)
                    .version(*v)
                    .agent_type(AgentType::Library),
            );
        }
    }

    // Anything else announcing a product of its own, but not the bare
    // `Mozilla/x.y` compatibility prefix.
    tokens
        .iter()
        .find(|(name, _)| *name != "Mozilla")
        .map(|(name, version)| Descriptor::builder(*name).version(*version))
}

fn detect_os(user_agent: &str) -> OperatingSystem {
    if user_agent.contains("Windows Phone") {
        return OperatingSystem::new("Windows Phone", "Windows", "");
    }
    if let Some(caps) = WINDOWS_NT.captures(user_agent) {
        let version = caps.get(1).map_or("", |m| m.as_str());
        let name = match version {
            "10.0" => "Windows 10".to_string(),
            "6.3" => "Windows 8.1".to_string(),
            "6.2" => "Windows 8".to_string(),
            "6.1" => "Windows 7".to_string(),
            "6.0" => "Windows Vista".to_string(),
            "5.1" | "5.2" => "Windows XP".to_string(),
            other => format!("Windows NT {other}"),
        };
        return OperatingSystem::new(name, "Windows", version);
    }
    if let Some(caps) = IOS.captures(user_agent) {
        let version = caps.get(1).map_or(String::new(), |m| m.as_str().replace('_', "."));
        return OperatingSystem::new("iOS", "iOS", version);
    }
    if let Some(caps) = ANDROID.captures(user_agent) {
        let version = caps.get(1).map_or("", |m| m.as_str());
        return OperatingSystem::new("Android", "Android", version);
    }
    if user_agent.contains("CrOS") {
        return OperatingSystem::new("Chrome OS", "Chrome OS", "");
    }
    if let Some(caps) = MAC_OS.captures(user_agent) {
        let version = caps.get(1).map_or(String::new(), |m| m.as_str().replace('_', "."));
        return OperatingSystem::new("OS X", "OS X", version);
    }
    if user_agent.contains("Linux") {
        return OperatingSystem::new("Linux", "Linux", "");
    }
    OperatingSystem::unknown()
}
