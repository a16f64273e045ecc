//! Reference rewriting.
//!
//! Documents refer to uploads in several encodings: absolute URLs on the site or its
//! CDN, quoted `src`/`href` attributes, `[img]` tags, markdown images, and bare paths.
//! Each encoding is one [`RewriteRule`]; rules run in a fixed order, origin-anchored
//! prefixes first and the bare path fallback last. Every rule requires the local
//! prefix to sit directly after its anchor, and a rewritten reference never has one
//! there, so a later rule cannot rewrite a reference twice.

use regex::{Captures, Regex};
use std::collections::HashSet;
use stowage_storage::keys::ORIGINAL_DIR;
use stowage_storage::{LocalStore, S3Location};

/// Relative key of an original: `{n}X/[{h}/...]{name}`. Names are usually
/// `{sha1}[.ext]` but any file under the tree qualifies; a key ends at whitespace, a
/// quote, a bracket, or a query string.
const KEY_PATTERN: &str = r#"(?P<key>[0-9]+X/[^\s"'()<>\[\]?#]+)"#;

/// Which originals may be pointed at the bucket.
#[derive(Debug, Clone)]
pub enum KeyFilter {
    All,
    /// Paths relative to the uploads root, e.g. `original/1X/{sha1}.png`.
    Only(HashSet<String>),
}

impl KeyFilter {
    pub fn allows(&self, path: &str) -> bool {
        match self {
            KeyFilter::All => true,
            KeyFilter::Only(paths) => paths.contains(path),
        }
    }
}

#[derive(Debug, Clone)]
pub enum RewriteRule {
    /// `{origin}/uploads/{db}/original/{key}`, with or without the scheme.
    Prefix { name: &'static str, regex: Regex },
    /// `{lead}/uploads/{db}/original/{key}` where `lead` is kept as is.
    Pattern { name: &'static str, regex: Regex },
}

impl RewriteRule {
    fn prefix(name: &'static str, origin: &str, local_prefix: &str) -> Option<Self> {
        let host = origin
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(origin);
        let pattern = format!(
            r"(?:https?:)?//{}{}{}",
            regex::escape(host),
            regex::escape(local_prefix),
            KEY_PATTERN
        );
        Regex::new(&pattern)
            .map(|regex| RewriteRule::Prefix { name, regex })
            .ok()
    }

    fn pattern(name: &'static str, lead: &str, local_prefix: &str) -> Option<Self> {
        let pattern = format!(
            "(?P<lead>{}){}{}",
            lead,
            regex::escape(local_prefix),
            KEY_PATTERN
        );
        Regex::new(&pattern)
            .map(|regex| RewriteRule::Pattern { name, regex })
            .ok()
    }

    pub fn name(&self) -> &'static str {
        match self {
            RewriteRule::Prefix { name, .. } | RewriteRule::Pattern { name, .. } => name,
        }
    }

    fn regex(&self) -> &Regex {
        match self {
            RewriteRule::Prefix { regex, .. } | RewriteRule::Pattern { regex, .. } => regex,
        }
    }

    fn apply(&self, text: &str, target: &str, filter: &KeyFilter) -> (String, usize) {
        let mut count = 0;
        let rewritten = self.regex().replace_all(text, |caps: &Captures| {
            let key = &caps["key"];
            if !filter.allows(&format!("{}/{}", ORIGINAL_DIR, key)) {
                return caps[0].to_string();
            }
            count += 1;
            let lead = caps.name("lead").map(|m| m.as_str()).unwrap_or("");
            format!("{}{}{}", lead, target, key)
        });
        (rewritten.into_owned(), count)
    }
}

/// Ordered rule list for one migration.
#[derive(Debug, Clone)]
pub struct RewriteRules {
    rules: Vec<RewriteRule>,
    /// `{bucket base}/{key prefix}original/`
    target: String,
    /// `/uploads/{db}/original/`
    local_prefix: String,
}

impl RewriteRules {
    pub fn new(local: &LocalStore, remote: &S3Location) -> Self {
        let local_prefix = local.original_url_prefix();
        let mut rules = Vec::new();

        rules.extend(RewriteRule::prefix("site origin", local.base_url(), &local_prefix));
        if let Some(cdn) = local.cdn_url() {
            rules.extend(RewriteRule::prefix("site cdn", cdn, &local_prefix));
        }
        for (name, lead) in [
            ("double-quoted attribute", r#"(?:src|href)=""#),
            ("single-quoted attribute", r"(?:src|href)='"),
            ("bbcode image", r"\[img\]"),
            ("markdown image", r"!\[[^\]\n]*\]\("),
            ("bare path", r"(?m:^)|[\s(>]"),
        ] {
            rules.extend(RewriteRule::pattern(name, lead, &local_prefix));
        }

        Self {
            rules,
            target: remote.original_url_prefix(),
            local_prefix,
        }
    }

    pub fn rules(&self) -> &[RewriteRule] {
        &self.rules
    }

    /// Substring every rewritable document contains.
    pub fn needle(&self) -> &str {
        &self.local_prefix
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Apply every rule in order. Returns the new text and the number of references
    /// rewritten.
    pub fn apply(&self, text: &str, filter: &KeyFilter) -> (String, usize) {
        let mut current = text.to_string();
        let mut total = 0;
        for rule in &self.rules {
            if !current.contains(self.local_prefix.as_str()) {
                break;
            }
            let (next, count) = rule.apply(&current, &self.target, filter);
            if count > 0 {
                tracing::trace!(rule = rule.name(), count = count, "Rewrote references");
            }
            total += count;
            current = next;
        }
        (current, total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stowage_core::S3Config;

    const A: &str = "0a0b0c0d0e0f101112131415161718191a1b1c1d";
    const B: &str = "b0b1b2b3b4b5b6b7b8b9c0c1c2c3c4c5c6c7c8c9";
    const BUCKET: &str = "https://forum-uploads.s3.us-east-1.amazonaws.com/original/";

    async fn rules(dir: &std::path::Path, tenant_scoped: bool) -> RewriteRules {
        let local = LocalStore::new(
            dir,
            "default",
            "https://forum.example.com",
            Some("https://cdn.example.com"),
        )
        .await
        .unwrap();
        let s3 = S3Config {
            bucket: "forum-uploads".to_string(),
            region: "us-east-1".to_string(),
            endpoint: None,
            access_key_id: Some("key".to_string()),
            secret_access_key: Some("secret".to_string()),
            use_iam_profile: false,
            cdn_url: None,
        };
        RewriteRules::new(&local, &S3Location::from_config(&s3, "default", tenant_scoped))
    }

    #[tokio::test]
    async fn every_encoding_is_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let rules = rules(dir.path(), false).await;

        let cases = [
            (
                format!("<img src=\"/uploads/default/original/1X/{}.png\">", A),
                format!("<img src=\"{}1X/{}.png\">", BUCKET, A),
            ),
            (
                format!("<a href='/uploads/default/original/1X/{}.pdf'>x</a>", A),
                format!("<a href='{}1X/{}.pdf'>x</a>", BUCKET, A),
            ),
            (
                format!("[img]/uploads/default/original/1X/{}.gif[/img]", A),
                format!("[img]{}1X/{}.gif[/img]", BUCKET, A),
            ),
            (
                format!("![cat|690x388](/uploads/default/original/2X/b/{}.jpeg)", B),
                format!("![cat|690x388]({}2X/b/{}.jpeg)", BUCKET, B),
            ),
            (
                format!("https://forum.example.com/uploads/default/original/1X/{}.png", A),
                format!("{}1X/{}.png", BUCKET, A),
            ),
            (
                format!("//cdn.example.com/uploads/default/original/1X/{}.png", A),
                format!("{}1X/{}.png", BUCKET, A),
            ),
            (
                format!("/uploads/default/original/1X/{}.png", A),
                format!("{}1X/{}.png", BUCKET, A),
            ),
            (
                format!("see (/uploads/default/original/1X/{}.txt)", A),
                format!("see ({}1X/{}.txt)", BUCKET, A),
            ),
            (
                format!("<img src=\"/uploads/default/original/1X/{}.png?v=2\">", A),
                format!("<img src=\"{}1X/{}.png?v=2\">", BUCKET, A),
            ),
        ];

        for (input, expected) in cases {
            let (output, count) = rules.apply(&input, &KeyFilter::All);
            assert_eq!(output, expected, "input: {}", input);
            assert_eq!(count, 1, "input: {}", input);
        }
    }

    #[tokio::test]
    async fn overlapping_encodings_in_one_document() {
        let dir = tempfile::tempdir().unwrap();
        let rules = rules(dir.path(), false).await;
        let raw = format!(
            "![a](/uploads/default/original/1X/{a}.png)\n\
             <img src=\"/uploads/default/original/1X/{b}.png\">\n\
             [img]https://forum.example.com/uploads/default/original/1X/{a}.png[/img]\n\
             /uploads/default/original/1X/{b}.png /uploads/default/original/1X/{a}.png",
            a = A,
            b = B
        );

        let (once, count) = rules.apply(&raw, &KeyFilter::All);
        assert_eq!(count, 5);
        assert!(!once.contains("/uploads/default/original/"));
        assert_eq!(once.matches(BUCKET).count(), 5);

        // nothing left to match on a second pass
        let (twice, count) = rules.apply(&once, &KeyFilter::All);
        assert_eq!(count, 0);
        assert_eq!(twice, once);
    }

    #[tokio::test]
    async fn tenant_scoped_targets_are_not_rematched() {
        let dir = tempfile::tempdir().unwrap();
        let rules = rules(dir.path(), true).await;
        assert_eq!(
            rules.target(),
            "https://forum-uploads.s3.us-east-1.amazonaws.com/uploads/default/original/"
        );

        let raw = format!("<img src=\"/uploads/default/original/1X/{}.png\">", A);
        let (once, count) = rules.apply(&raw, &KeyFilter::All);
        assert_eq!(count, 1);
        // the target contains the local prefix, but never right after an anchor
        let (twice, count) = rules.apply(&once, &KeyFilter::All);
        assert_eq!(count, 0);
        assert_eq!(twice, once);
    }

    #[tokio::test]
    async fn only_confirmed_keys_are_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let rules = rules(dir.path(), false).await;
        let filter = KeyFilter::Only(HashSet::from([format!("original/1X/{}.png", A)]));
        let raw = format!(
            "<img src=\"/uploads/default/original/1X/{}.png\"><img src=\"/uploads/default/original/1X/{}.png\">",
            A, B
        );

        let (output, count) = rules.apply(&raw, &filter);
        assert_eq!(count, 1);
        assert!(output.contains(&format!("{}1X/{}.png", BUCKET, A)));
        assert!(output.contains(&format!("\"/uploads/default/original/1X/{}.png\"", B)));
    }

    #[tokio::test]
    async fn files_not_named_by_hash_are_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let rules = rules(dir.path(), false).await;
        let filter = KeyFilter::Only(HashSet::from(["original/1X/report~v2.pdf".to_string()]));
        let raw = "[manual](/uploads/default/original/1X/report~v2.pdf) \
                   <a href='/uploads/default/original/1X/legacy.pdf'>old</a>";

        let (output, count) = rules.apply(raw, &filter);
        assert_eq!(count, 1);
        assert!(output.contains(&format!("({}1X/report~v2.pdf)", BUCKET)));
        assert!(output.contains("'/uploads/default/original/1X/legacy.pdf'"));
    }

    #[tokio::test]
    async fn other_sites_and_non_originals_are_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let rules = rules(dir.path(), false).await;
        for raw in [
            format!("<img src=\"/uploads/other/original/1X/{}.png\">", A),
            "<img src=\"/uploads/default/optimized/1X/abc_2_690x388.png\">".to_string(),
            format!("https://elsewhere.example.org/uploads/default/original/1X/{}.png", A),
        ] {
            let (output, count) = rules.apply(&raw, &KeyFilter::All);
            assert_eq!(count, 0, "{}", raw);
            assert_eq!(output, raw);
        }
    }
}
