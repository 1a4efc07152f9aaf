//! User-Agent classification for tracking hits.
//!
//! Mail security gateways, crawlers and CLI tools fetch pixels and follow
//! links without a human ever seeing the message. Hits from these agents
//! still get the normal response but are never recorded. The list errs on
//! the side of specific signatures; prefetching mail clients (Apple Mail
//! privacy proxy, Gmail image proxy) are deliberately NOT listed, since those
//! are real recipients and the open dedup window absorbs their refetches.

/// Built-in blocklist, matched case-insensitively as substrings.
const BOT_USER_AGENTS: &[&str] = &[
    // Explicit crawler identifiers
    "googlebot",
    "bingbot",
    "slurp",
    "facebookexternalhit",
    "twitterbot",
    "linkedinbot",
    "whatsapp",
    "telegrambot",
    // Enterprise mail-security scanners
    "proofpoint",
    "mimecast",
    "forcepoint",
    "symantec",
    "mcafee",
    "cisco ironport",
    "barracuda",
    "sophos",
    "trend micro",
    // Development/testing tools
    "curl/",
    "wget/",
    "postman",
    "insomnia",
    "httpie",
    "python-requests",
    "go-http-client",
    // Browser builds this old only appear in link-scanner farms
    "chrome/38.",
    "chrome/39.",
    "chrome/40.",
    "chrome/41.",
    "chrome/42.",
    // Explicit test patterns
    "test-",
    "debug-",
    "bot-",
    "scanner-",
];

/// Classify a User-Agent as automated. `extra` comes from configuration and
/// is appended to the built-in list.
pub fn is_automated_agent(user_agent: &str, extra: &[String]) -> bool {
    let ua = user_agent.to_lowercase();
    BOT_USER_AGENTS.iter().any(|pattern| ua.contains(pattern))
        || extra.iter().any(|pattern| ua.contains(&pattern.to_lowercase()))
}
