// SPDX-License-Identifier: MIT
//! Origin validation.
//!
//! An origin (`scheme://host[:port]`) is accepted or rejected by an ordered
//! pipeline: protocol rule, blocklist, allowlist, homograph/phishing
//! detection against a set of known wallet domains, then an optional custom
//! predicate. The first rejecting step wins; an origin that no step rejects
//! is accepted. Decisions are optionally cached with TTL + LRU eviction.

use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;

/// Host-supplied predicate; return `false` to reject.
pub type CustomValidator = Arc<dyn Fn(&str) -> bool + Send + Sync>;

// ─── Configuration ───────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct OriginValidatorConfig {
    /// Require `https:` except for localhost (see `allow_localhost`).
    ///
    /// Default: true
    pub enforce_https: bool,
    /// Carve-out for `localhost`, `127.0.0.1`, and `[::1]` under the HTTPS
    /// rule.
    pub allow_localhost: bool,
    /// Exact-match allowlist. Non-empty means restrictive: unlisted origins
    /// are rejected (after pattern matching below).
    pub allowed_origins: Vec<String>,
    /// Exact-match blocklist; checked before the allowlist.
    pub blocked_origins: Vec<String>,
    /// Wildcard allowlist patterns (`https://*.example.com`).
    pub allowed_patterns: Vec<String>,
    /// Wildcard blocklist patterns.
    pub blocked_patterns: Vec<String>,
    /// Run the homograph/phishing checks against `known_domains`.
    pub detect_homographs: bool,
    /// Reference domains to protect (e.g. `metamask.io`).
    pub known_domains: Vec<String>,
    /// Permit non-ASCII hosts that don't fold to a known domain.
    pub allow_international_domains: bool,
    pub custom_validator: Option<CustomValidator>,
    pub enable_cache: bool,
    pub cache_max_size: usize,
    pub cache_ttl: Duration,
}

impl Default for OriginValidatorConfig {
    /// HTTPS required with the localhost carve-out, homograph detection on
    /// (against an empty known-domain set), decisions cached for a minute.
    fn default() -> Self {
        Self {
            enforce_https: true,
            allow_localhost: true,
            allowed_origins: Vec::new(),
            blocked_origins: Vec::new(),
            allowed_patterns: Vec::new(),
            blocked_patterns: Vec::new(),
            detect_homographs: true,
            known_domains: Vec::new(),
            allow_international_domains: false,
            custom_validator: None,
            enable_cache: true,
            cache_max_size: 1000,
            cache_ttl: Duration::from_secs(60),
        }
    }
}

/// The validator's verdict for one origin.
#[derive(Debug, Clone)]
pub struct OriginDecision {
    pub allowed: bool,
    /// Why the origin was rejected; `None` when allowed.
    pub reason: Option<String>,
}

impl OriginDecision {
    fn accept() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    fn reject(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }

    pub fn reason_or_unknown(&self) -> &str {
        self.reason.as_deref().unwrap_or("unknown")
    }
}

// ─── Validator ───────────────────────────────────────────────────────────────

struct CacheEntry {
    decision: OriginDecision,
    expires_at: Instant,
    last_used: u64,
}

pub struct OriginValidator {
    config: OriginValidatorConfig,
    cache: Mutex<HashMap<String, CacheEntry>>,
    cache_tick: std::sync::atomic::AtomicU64,
}

impl OriginValidator {
    pub fn new(config: OriginValidatorConfig) -> Self {
        Self {
            config,
            cache: Mutex::new(HashMap::new()),
            cache_tick: std::sync::atomic::AtomicU64::new(0),
        }
    }

    pub async fn validate(&self, origin: &str) -> OriginDecision {
        if self.config.enable_cache {
            if let Some(hit) = self.cache_get(origin) {
                return hit;
            }
        }
        let decision = self.evaluate(origin);
        if self.config.enable_cache {
            self.cache_put(origin, decision.clone());
        }
        if !decision.allowed {
            debug!(origin, reason = %decision.reason_or_unknown(), "origin rejected");
        }
        decision
    }

    /// Run the pipeline. Steps are ordered; the first reject is final.
    fn evaluate(&self, origin: &str) -> OriginDecision {
        let Some((scheme, host, _port)) = parse_origin(origin) else {
            return OriginDecision::reject("malformed origin");
        };

        // 1. Protocol.
        if self.config.enforce_https && scheme != "https" {
            let localhost_ok = self.config.allow_localhost && is_localhost(&host);
            if !localhost_ok {
                return OriginDecision::reject("https required");
            }
        }

        // 2. Blocklist (exact, then wildcard).
        if self.config.blocked_origins.iter().any(|b| b == origin)
            || self
                .config
                .blocked_patterns
                .iter()
                .any(|p| glob_match(p, origin))
        {
            return OriginDecision::reject("origin is blocklisted");
        }

        // 3. Allowlist: non-empty means restrictive.
        let has_allowlist =
            !self.config.allowed_origins.is_empty() || !self.config.allowed_patterns.is_empty();
        if has_allowlist {
            let listed = self.config.allowed_origins.iter().any(|a| a == origin)
                || self
                    .config
                    .allowed_patterns
                    .iter()
                    .any(|p| glob_match(p, origin));
            if !listed {
                return OriginDecision::reject("origin not in allowlist");
            }
        }

        // 4. Homograph / phishing.
        if self.config.detect_homographs {
            if let Some(reason) = self.check_homograph(&host) {
                return OriginDecision::reject(reason);
            }
        }

        // 5. Custom predicate.
        if let Some(custom) = &self.config.custom_validator {
            if !custom(origin) {
                return OriginDecision::reject("rejected by custom validator");
            }
        }

        OriginDecision::accept()
    }

    fn check_homograph(&self, host: &str) -> Option<String> {
        let host_lower = host.to_lowercase();
        let is_ascii = host_lower.is_ascii();
        let folded = fold_confusables(&host_lower);

        if !is_ascii {
            // A non-ASCII host that folds onto a known domain is an attack;
            // otherwise it is only allowed when international domains are on.
            for known in &self.config.known_domains {
                if folded == *known && host_lower != *known {
                    return Some(format!("homograph of known domain {known}"));
                }
            }
            if !self.config.allow_international_domains {
                return Some("international domain not allowed".to_string());
            }
        }

        // Phishing shapes only make sense for dotted DNS names.
        let Some((sld, tld)) = registrable_parts(&folded) else {
            return None;
        };

        for known in &self.config.known_domains {
            if folded == *known || folded.ends_with(&format!(".{known}")) {
                // The known domain itself, or a true subdomain of it.
                continue;
            }
            let Some((known_sld, known_tld)) = registrable_parts(known) else {
                continue;
            };

            // Wrong TLD: metamask.com vs metamask.io.
            if sld == known_sld && tld != known_tld {
                return Some(format!("wrong TLD for known domain {known}"));
            }

            // Hyphenated masquerades: metamask-io.com, secure-metamask.io.
            if sld == known.replace('.', "-") {
                return Some(format!("hyphenated masquerade of {known}"));
            }
            if sld != known_sld && sld.split('-').any(|part| part == known_sld) {
                return Some(format!("hyphenated masquerade of {known}"));
            }

            // Near-miss substitutions within 30% of the reference name.
            let budget = (known_sld.chars().count() * 30 / 100).max(1);
            let distance = levenshtein(&sld, &known_sld);
            if distance > 0 && distance <= budget {
                return Some(format!("too similar to known domain {known}"));
            }
        }
        None
    }

    // ── Decision cache ───────────────────────────────────────────────────────

    fn cache_get(&self, origin: &str) -> Option<OriginDecision> {
        let tick = self
            .cache_tick
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let mut cache = self.cache.lock().expect("cache lock poisoned");
        let entry = cache.get_mut(origin)?;
        if entry.expires_at <= Instant::now() {
            cache.remove(origin);
            return None;
        }
        entry.last_used = tick;
        Some(entry.decision.clone())
    }

    fn cache_put(&self, origin: &str, decision: OriginDecision) {
        let tick = self
            .cache_tick
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let mut cache = self.cache.lock().expect("cache lock poisoned");
        if cache.len() >= self.config.cache_max_size.max(1) && !cache.contains_key(origin) {
            // Evict the least recently used entry.
            if let Some(victim) = cache
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| k.clone())
            {
                cache.remove(&victim);
            }
        }
        cache.insert(
            origin.to_string(),
            CacheEntry {
                decision,
                expires_at: Instant::now() + self.config.cache_ttl,
                last_used: tick,
            },
        );
    }
}

// ─── Pure helpers ────────────────────────────────────────────────────────────

/// Split `scheme://host[:port]` without pulling in a URL parser.
fn parse_origin(origin: &str) -> Option<(String, String, Option<u16>)> {
    let (scheme, rest) = origin.split_once("://")?;
    if scheme.is_empty() || rest.is_empty() || rest.contains('/') {
        return None;
    }
    // IPv6 literals keep their brackets: https://[::1]:8080
    if let Some(rest) = rest.strip_prefix('[') {
        let (addr, tail) = rest.split_once(']')?;
        let port = match tail.strip_prefix(':') {
            Some(p) => Some(p.parse().ok()?),
            None if tail.is_empty() => None,
            None => return None,
        };
        return Some((scheme.to_lowercase(), format!("[{addr}]"), port));
    }
    match rest.rsplit_once(':') {
        Some((host, port)) => Some((scheme.to_lowercase(), host.to_lowercase(), Some(port.parse().ok()?))),
        None => Some((scheme.to_lowercase(), rest.to_lowercase(), None)),
    }
}

fn is_localhost(host: &str) -> bool {
    matches!(host, "localhost" | "127.0.0.1" | "[::1]")
}

/// The registrable `(second-level, top-level)` labels of a dotted name.
fn registrable_parts(host: &str) -> Option<(String, String)> {
    let mut labels = host.rsplit('.');
    let tld = labels.next()?;
    let sld = labels.next()?;
    if tld.is_empty() || sld.is_empty() || tld.chars().all(|c| c.is_ascii_digit()) {
        // Bare or numeric tail: an IP, not a DNS name.
        return None;
    }
    Some((sld.to_string(), tld.to_string()))
}

/// Common Cyrillic/Greek/full-width lookalikes folded to ASCII.
static CONFUSABLES: Lazy<HashMap<char, char>> = Lazy::new(|| {
    let pairs: &[(char, char)] = &[
        // Cyrillic
        ('а', 'a'),
        ('е', 'e'),
        ('о', 'o'),
        ('р', 'p'),
        ('с', 'c'),
        ('х', 'x'),
        ('у', 'y'),
        ('і', 'i'),
        ('ѕ', 's'),
        ('ј', 'j'),
        ('һ', 'h'),
        ('ԁ', 'd'),
        ('ɡ', 'g'),
        ('ԛ', 'q'),
        ('ԝ', 'w'),
        ('ь', 'b'),
        ('м', 'm'),
        ('т', 't'),
        ('к', 'k'),
        ('п', 'n'),
        // Greek
        ('α', 'a'),
        ('ο', 'o'),
        ('ε', 'e'),
        ('ι', 'i'),
        ('κ', 'k'),
        ('ν', 'v'),
        ('ρ', 'p'),
        ('τ', 't'),
        ('υ', 'u'),
        ('χ', 'x'),
        ('ω', 'w'),
    ];
    pairs.iter().copied().collect()
});

/// Fold confusable characters to their ASCII lookalikes.
fn fold_confusables(input: &str) -> String {
    input
        .chars()
        .map(|c| {
            if let Some(&ascii) = CONFUSABLES.get(&c) {
                return ascii;
            }
            // Full-width ASCII block (ＡＢＣ… ａｂｃ… ０１２…).
            let code = c as u32;
            if (0xFF01..=0xFF5E).contains(&code) {
                return char::from_u32(code - 0xFF00 + 0x20)
                    .map(|a| a.to_ascii_lowercase())
                    .unwrap_or(c);
            }
            c
        })
        .collect()
}

/// Match `text` against a `*`-wildcard pattern. `*` matches any run of
/// characters.
pub(crate) fn glob_match(pattern: &str, text: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == text;
    }

    let mut pos = 0usize;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            // Anchored prefix.
            if !text[pos..].starts_with(part) {
                return false;
            }
            pos += part.len();
        } else if i == parts.len() - 1 {
            // Anchored suffix.
            return text[pos..].ends_with(part);
        } else {
            match text[pos..].find(part) {
                Some(at) => pos += at + part.len(),
                None => return false,
            }
        }
    }
    true
}

/// Classic edit distance, char-wise.
fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator(config: OriginValidatorConfig) -> OriginValidator {
        OriginValidator::new(config)
    }

    fn protecting(known: &[&str]) -> OriginValidator {
        validator(OriginValidatorConfig {
            detect_homographs: true,
            known_domains: known.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn https_enforcement_with_localhost_carveout() {
        let v = validator(OriginValidatorConfig {
            enforce_https: true,
            allow_localhost: true,
            ..Default::default()
        });
        assert!(v.validate("https://app.example").await.allowed);
        assert!(!v.validate("http://app.example").await.allowed);
        assert!(v.validate("http://localhost:3000").await.allowed);
        assert!(v.validate("http://127.0.0.1:3000").await.allowed);
        assert!(v.validate("http://[::1]:3000").await.allowed);
    }

    #[tokio::test]
    async fn localhost_carveout_can_be_disabled() {
        let v = validator(OriginValidatorConfig {
            enforce_https: true,
            allow_localhost: false,
            ..Default::default()
        });
        assert!(!v.validate("http://localhost:3000").await.allowed);
    }

    #[tokio::test]
    async fn blocklist_beats_allowlist() {
        let v = validator(OriginValidatorConfig {
            allowed_origins: vec!["https://evil.example".to_string()],
            blocked_origins: vec!["https://evil.example".to_string()],
            ..Default::default()
        });
        assert!(!v.validate("https://evil.example").await.allowed);
    }

    #[tokio::test]
    async fn blocklist_wildcards_match() {
        let v = validator(OriginValidatorConfig {
            blocked_patterns: vec!["https://*.evil.example".to_string()],
            ..Default::default()
        });
        assert!(!v.validate("https://sub.evil.example").await.allowed);
        assert!(v.validate("https://good.example").await.allowed);
    }

    #[tokio::test]
    async fn nonempty_allowlist_is_restrictive() {
        let v = validator(OriginValidatorConfig {
            allowed_patterns: vec!["https://*.example.com".to_string()],
            ..Default::default()
        });
        assert!(v.validate("https://app.example.com").await.allowed);
        assert!(!v.validate("https://other.org").await.allowed);
    }

    #[tokio::test]
    async fn cyrillic_homograph_of_known_domain_is_rejected() {
        let v = protecting(&["metamask.io"]);
        // First 'a' is Cyrillic.
        assert!(!v.validate("https://metаmask.io").await.allowed);
        // The genuine domain passes.
        assert!(v.validate("https://metamask.io").await.allowed);
        assert!(v.validate("https://app.metamask.io").await.allowed);
    }

    #[tokio::test]
    async fn wrong_tld_is_rejected() {
        let v = protecting(&["metamask.io"]);
        assert!(!v.validate("https://metamask.com").await.allowed);
    }

    #[tokio::test]
    async fn hyphenated_masquerades_are_rejected() {
        let v = protecting(&["metamask.io"]);
        assert!(!v.validate("https://metamask-io.com").await.allowed);
        assert!(!v.validate("https://secure-metamask.io").await.allowed);
    }

    #[tokio::test]
    async fn near_miss_edit_distance_is_rejected() {
        let v = protecting(&["metamask.io"]);
        // One substitution away, same TLD.
        assert!(!v.validate("https://metamesk.io").await.allowed);
        // Unrelated names stay fine.
        assert!(v.validate("https://uniswap.org").await.allowed);
    }

    #[tokio::test]
    async fn international_domains_gated_by_config() {
        let strict = protecting(&[]);
        assert!(!strict.validate("https://кошелек.рф").await.allowed);

        let open = validator(OriginValidatorConfig {
            detect_homographs: true,
            allow_international_domains: true,
            ..Default::default()
        });
        assert!(open.validate("https://кошелек.рф").await.allowed);
    }

    #[tokio::test]
    async fn custom_validator_runs_last() {
        let v = validator(OriginValidatorConfig {
            custom_validator: Some(Arc::new(|origin: &str| !origin.contains("denied"))),
            ..Default::default()
        });
        assert!(v.validate("https://fine.example").await.allowed);
        assert!(!v.validate("https://denied.example").await.allowed);
    }

    #[tokio::test]
    async fn cache_caps_its_size() {
        let v = validator(OriginValidatorConfig {
            enable_cache: true,
            cache_max_size: 2,
            cache_ttl: Duration::from_secs(60),
            ..Default::default()
        });
        for i in 0..10 {
            v.validate(&format!("https://site{i}.example")).await;
        }
        assert!(v.cache.lock().unwrap().len() <= 2);
    }

    #[test]
    fn origin_parsing() {
        assert_eq!(
            parse_origin("https://app.example:8443"),
            Some(("https".into(), "app.example".into(), Some(8443)))
        );
        assert_eq!(
            parse_origin("https://[::1]:3000"),
            Some(("https".into(), "[::1]".into(), Some(3000)))
        );
        assert_eq!(parse_origin("not-an-origin"), None);
        assert_eq!(parse_origin("https://a/b"), None);
    }

    #[test]
    fn fold_handles_fullwidth_forms() {
        assert_eq!(fold_confusables("ｍｅｔａｍａｓｋ"), "metamask");
    }

    #[test]
    fn levenshtein_basics() {
        assert_eq!(levenshtein("metamask", "metamask"), 0);
        assert_eq!(levenshtein("metamask", "metamark"), 1);
        assert_eq!(levenshtein("", "abc"), 3);
    }
}
