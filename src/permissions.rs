// SPDX-License-Identifier: MIT
//! Per-session permission grants.
//!
//! A grant is a pattern over `chainId:method`, e.g. `eip155:1:eth_*` or
//! `eip155:*:eth_call`. `*` matches one segment's non-colon characters; it
//! never crosses a `:` boundary, and `**` is not a recognized escape (it
//! matches like any other `*`-containing segment). Grants die with their
//! session.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Inputs to an approval decision.
#[derive(Debug, Clone)]
pub struct PermissionRequest {
    pub session_id: String,
    pub origin: Option<String>,
    /// chain id → requested method patterns.
    pub requested: HashMap<String, Vec<String>>,
}

/// Host policy hook: given a request, return the approved subset. The
/// default policy grants exactly what was requested.
pub type PermissionPolicy =
    Arc<dyn Fn(&PermissionRequest) -> HashMap<String, Vec<String>> + Send + Sync>;

pub struct PermissionManager {
    /// session id → approved `chain:method` patterns.
    grants: RwLock<HashMap<String, HashSet<String>>>,
    policy: Option<PermissionPolicy>,
}

impl PermissionManager {
    pub fn new(policy: Option<PermissionPolicy>) -> Self {
        Self {
            grants: RwLock::new(HashMap::new()),
            policy,
        }
    }

    /// Run the approval pipeline for `request` and record the approved
    /// patterns. Returns the approved subset as a chain → methods map.
    pub async fn approve(&self, request: PermissionRequest) -> HashMap<String, Vec<String>> {
        let approved = match &self.policy {
            Some(policy) => policy(&request),
            None => request.requested.clone(),
        };

        let mut grants = self.grants.write().await;
        let set = grants.entry(request.session_id.clone()).or_default();
        let mut granted = 0usize;
        for (chain, methods) in &approved {
            for method in methods {
                set.insert(format!("{chain}:{method}"));
                granted += 1;
            }
        }
        info!(
            session_id = %request.session_id,
            patterns = granted,
            "permissions approved"
        );
        approved
    }

    /// Is `method` on `chain_id` allowed for this session?
    ///
    /// Allowed iff some approved pattern matches `chainId:method` under the
    /// wildcard rules.
    pub async fn check(&self, session_id: &str, chain_id: &str, method: &str) -> bool {
        let candidate = format!("{chain_id}:{method}");
        let grants = self.grants.read().await;
        let Some(patterns) = grants.get(session_id) else {
            return false;
        };
        let matched = patterns.iter().any(|p| pattern_matches(p, &candidate));
        if !matched {
            debug!(session_id, chain_id, method, "permission denied");
        }
        matched
    }

    /// The session's grants as a chain → method-patterns map, optionally
    /// filtered to chains matching one of `chain_ids`.
    pub async fn get(
        &self,
        session_id: &str,
        chain_ids: Option<&[String]>,
    ) -> HashMap<String, Vec<String>> {
        let grants = self.grants.read().await;
        let mut out: HashMap<String, Vec<String>> = HashMap::new();
        let Some(patterns) = grants.get(session_id) else {
            return out;
        };
        for pattern in patterns {
            // The method is the last segment; the chain id is the rest.
            let Some((chain, method)) = pattern.rsplit_once(':') else {
                continue;
            };
            if let Some(filter) = chain_ids {
                let relevant = filter
                    .iter()
                    .any(|c| c == chain || pattern_matches(chain, c));
                if !relevant {
                    continue;
                }
            }
            out.entry(chain.to_string())
                .or_default()
                .push(method.to_string());
        }
        for methods in out.values_mut() {
            methods.sort();
        }
        out
    }

    /// Destroy the session's grants. Called on session termination.
    pub async fn cleanup(&self, session_id: &str) {
        if self.grants.write().await.remove(session_id).is_some() {
            debug!(session_id, "permissions cleaned up");
        }
    }
}

impl Default for PermissionManager {
    fn default() -> Self {
        Self::new(None)
    }
}

// ─── Pattern matching ────────────────────────────────────────────────────────

/// Match a colon-segmented pattern against a colon-segmented candidate.
/// Segment counts must agree; within a segment `*` matches any run of
/// non-colon characters.
pub fn pattern_matches(pattern: &str, candidate: &str) -> bool {
    let p_segments: Vec<&str> = pattern.split(':').collect();
    let c_segments: Vec<&str> = candidate.split(':').collect();
    if p_segments.len() != c_segments.len() {
        return false;
    }
    p_segments
        .iter()
        .zip(c_segments.iter())
        .all(|(p, c)| segment_matches(p, c))
}

/// Glob one segment. Iterative two-pointer match with backtracking.
fn segment_matches(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ti));
            pi += 1;
        } else if let Some((sp, st)) = star {
            // Backtrack: let the last star eat one more character.
            pi = sp + 1;
            ti = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(session: &str, grants: &[(&str, &[&str])]) -> PermissionRequest {
        PermissionRequest {
            session_id: session.to_string(),
            origin: None,
            requested: grants
                .iter()
                .map(|(c, ms)| (c.to_string(), ms.iter().map(|m| m.to_string()).collect()))
                .collect(),
        }
    }

    #[test]
    fn wildcard_stays_within_its_segment() {
        assert!(pattern_matches("eip155:1:eth_*", "eip155:1:eth_getBalance"));
        assert!(pattern_matches("eip155:*:eth_call", "eip155:1:eth_call"));
        assert!(pattern_matches("eip155:*:eth_call", "eip155:137:eth_call"));

        // `*` never absorbs a segment boundary.
        assert!(!pattern_matches("eip155:*", "eip155:1:eth_call"));
        assert!(!pattern_matches("eip155:1:eth_*", "eip155:1:personal_sign"));
        assert!(!pattern_matches("eip155:1:eth_call", "eip155:2:eth_call"));
    }

    #[test]
    fn literal_and_mixed_segments() {
        assert!(pattern_matches("solana:*:get*", "solana:mainnet:getBalance"));
        assert!(!pattern_matches("solana:*:get*", "solana:mainnet:sendTransaction"));
        assert!(pattern_matches("a:*b*:c", "a:xbz:c"));
        assert!(!pattern_matches("a:*b*:c", "a:xyz:c"));
    }

    #[tokio::test]
    async fn approve_then_check_then_get() {
        let pm = PermissionManager::default();
        let approved = pm
            .approve(request("s1", &[("eip155:1", &["eth_*"])]))
            .await;
        assert_eq!(approved["eip155:1"], vec!["eth_*"]);

        assert!(pm.check("s1", "eip155:1", "eth_getBalance").await);
        assert!(pm.check("s1", "eip155:1", "eth_call").await);
        assert!(!pm.check("s1", "eip155:1", "personal_sign").await);
        assert!(!pm.check("s1", "eip155:137", "eth_call").await);
        assert!(!pm.check("other", "eip155:1", "eth_call").await);

        let map = pm.get("s1", None).await;
        assert_eq!(map["eip155:1"], vec!["eth_*"]);
    }

    #[tokio::test]
    async fn get_filters_by_chain() {
        let pm = PermissionManager::default();
        pm.approve(request(
            "s1",
            &[("eip155:1", &["eth_call"]), ("solana:mainnet", &["getBalance"])],
        ))
        .await;

        let filtered = pm.get("s1", Some(&["eip155:1".to_string()])).await;
        assert!(filtered.contains_key("eip155:1"));
        assert!(!filtered.contains_key("solana:mainnet"));
    }

    #[tokio::test]
    async fn get_includes_wildcard_chains_matching_the_filter() {
        let pm = PermissionManager::default();
        pm.approve(request("s1", &[("eip155:*", &["eth_call"])])).await;
        let filtered = pm.get("s1", Some(&["eip155:1".to_string()])).await;
        assert!(filtered.contains_key("eip155:*"));
    }

    #[tokio::test]
    async fn later_grants_accumulate() {
        let pm = PermissionManager::default();
        pm.approve(request("s1", &[("eip155:1", &["eth_call"])])).await;
        pm.approve(request("s1", &[("eip155:1", &["personal_sign"])]))
            .await;

        // approve → get returns at least the approved set; earlier grants
        // survive.
        let map = pm.get("s1", None).await;
        assert_eq!(map["eip155:1"], vec!["eth_call", "personal_sign"]);
    }

    #[tokio::test]
    async fn cleanup_destroys_all_grants() {
        let pm = PermissionManager::default();
        pm.approve(request("s1", &[("eip155:1", &["eth_*"])])).await;
        pm.cleanup("s1").await;
        assert!(!pm.check("s1", "eip155:1", "eth_call").await);
        assert!(pm.get("s1", None).await.is_empty());
    }

    #[tokio::test]
    async fn policy_can_narrow_the_request() {
        let policy: PermissionPolicy = Arc::new(|req: &PermissionRequest| {
            // Strip anything that is not a read method.
            req.requested
                .iter()
                .map(|(chain, methods)| {
                    let kept: Vec<String> = methods
                        .iter()
                        .filter(|m| !m.contains("send"))
                        .cloned()
                        .collect();
                    (chain.clone(), kept)
                })
                .collect()
        });
        let pm = PermissionManager::new(Some(policy));
        let approved = pm
            .approve(request(
                "s1",
                &[("eip155:1", &["eth_call", "eth_sendTransaction"])],
            ))
            .await;

        assert_eq!(approved["eip155:1"], vec!["eth_call"]);
        assert!(pm.check("s1", "eip155:1", "eth_call").await);
        assert!(!pm.check("s1", "eip155:1", "eth_sendTransaction").await);
    }
}
