//! Channel classification
//!
//! Maps a landing page URL and document referrer to a `(source, medium)` pair.
//! Signals are evaluated in a fixed order and the first match wins:
//!
//! 1. Google click identifier (`gclid`, `gbraid`, `wbraid`) → `google / cpc`
//! 2. Meta click identifier (`fbclid`) → `facebook / cpc`
//! 3. `utm_source` → lowercased source, normalized `utm_medium` or `(not set)`
//! 4. Referrer hostname lookup table, else `<hostname> / referral`
//! 5. No usable referrer → `(direct) / (none)`
//!
//! Pure functions only; malformed input never panics.

use serde::{Deserialize, Serialize};
use url::Url;

pub const DIRECT_SOURCE: &str = "(direct)";
pub const NONE_MEDIUM: &str = "(none)";
pub const NOT_SET_MEDIUM: &str = "(not set)";

const GOOGLE_CLICK_PARAMS: [&str; 3] = ["gclid", "gbraid", "wbraid"];
const META_CLICK_PARAM: &str = "fbclid";

/// Classified channel origin and type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub source: String,
    pub medium: String,
}

impl Channel {
    pub fn new(source: impl Into<String>, medium: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            medium: medium.into(),
        }
    }

    pub fn direct() -> Self {
        Self::new(DIRECT_SOURCE, NONE_MEDIUM)
    }
}

/// Paid-click identifiers carried on the landing URL
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClickIds {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gclid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fbclid: Option<String>,
}

impl ClickIds {
    pub fn is_empty(&self) -> bool {
        self.gclid.is_none() && self.fbclid.is_none()
    }
}

/// Marketing parameters read from the landing URL query string
///
/// Blank values are treated as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LandingParams {
    pub utm_source: Option<String>,
    pub utm_medium: Option<String>,
    pub utm_campaign: Option<String>,
    pub utm_content: Option<String>,
    pub utm_term: Option<String>,
    pub click_ids: ClickIds,
    /// Any Google click parameter, including the app/iOS variants
    pub google_click: bool,
}

impl LandingParams {
    /// Parse the query portion of `page_url`
    ///
    /// Accepts absolute URLs, paths, or bare query strings. Only the text
    /// between the first `?` and any `#` is considered; the first occurrence
    /// of a repeated parameter wins.
    pub fn parse(page_url: &str) -> Self {
        let query = match page_url.split_once('?') {
            Some((_, rest)) => rest.split('#').next().unwrap_or(""),
            None => return Self::default(),
        };

        let mut params = Self::default();
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            let slot = match &*key {
                "utm_source" => &mut params.utm_source,
                "utm_medium" => &mut params.utm_medium,
                "utm_campaign" => &mut params.utm_campaign,
                "utm_content" => &mut params.utm_content,
                "utm_term" => &mut params.utm_term,
                "gclid" => {
                    params.google_click = true;
                    &mut params.click_ids.gclid
                }
                META_CLICK_PARAM => &mut params.click_ids.fbclid,
                k if GOOGLE_CLICK_PARAMS.contains(&k) => {
                    params.google_click = true;
                    continue;
                }
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(value.to_string());
            }
        }
        params
    }
}

/// Full classification result for one landing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub channel: Channel,
    pub params: LandingParams,
}

/// Known referrer hosts: (source, medium, site names, exact hosts)
const REFERRER_TABLE: &[(&str, &str, &[&str], &[&str])] = &[
    ("google", "organic", &["google"], &[]),
    ("facebook", "social", &["facebook", "fb"], &["fb.me"]),
    ("instagram", "social", &["instagram"], &[]),
    ("linkedin", "social", &["linkedin"], &["lnkd.in"]),
    ("twitter", "social", &["twitter"], &["t.co", "x.com"]),
    ("youtube", "social", &["youtube"], &["youtu.be"]),
    ("tiktok", "social", &["tiktok"], &[]),
    ("bing", "organic", &["bing"], &[]),
    ("yahoo", "organic", &["yahoo"], &[]),
    ("duckduckgo", "organic", &["duckduckgo"], &[]),
];

/// Classify a landing from its page URL and document referrer
pub fn classify(page_url: &str, referrer: &str) -> Classification {
    let params = LandingParams::parse(page_url);
    let channel = classify_params(&params).unwrap_or_else(|| classify_referrer(referrer));
    Classification { channel, params }
}

/// Rules 1-3: click identifiers then UTM tags
fn classify_params(params: &LandingParams) -> Option<Channel> {
    if params.google_click {
        return Some(Channel::new("google", "cpc"));
    }
    if params.click_ids.fbclid.is_some() {
        return Some(Channel::new("facebook", "cpc"));
    }
    params.utm_source.as_ref().map(|source| {
        let medium = params
            .utm_medium
            .as_deref()
            .map(normalize_medium)
            .unwrap_or_else(|| NOT_SET_MEDIUM.to_string());
        Channel::new(source.to_lowercase(), medium)
    })
}

/// Rules 4-5: referrer lookup, falling back to direct
///
/// Unparseable referrers count as direct.
pub fn classify_referrer(referrer: &str) -> Channel {
    let referrer = referrer.trim();
    if referrer.is_empty() {
        return Channel::direct();
    }

    let host = match Url::parse(referrer) {
        Ok(url) => match url.host_str() {
            Some(h) if !h.is_empty() => strip_www(h).to_string(),
            _ => return Channel::direct(),
        },
        Err(e) => {
            tracing::debug!(referrer, error = %e, "Malformed referrer, classifying as direct");
            return Channel::direct();
        }
    };

    lookup_referrer_host(&host).unwrap_or_else(|| Channel::new(host, "referral"))
}

fn lookup_referrer_host(host: &str) -> Option<Channel> {
    let host = host.to_ascii_lowercase();
    let site = site_name(&host);
    REFERRER_TABLE
        .iter()
        .find(|(_, _, names, exact)| {
            exact.contains(&host.as_str()) || site.is_some_and(|s| names.contains(&s))
        })
        .map(|(source, medium, _, _)| Channel::new(*source, *medium))
}

/// Registrable name of a host: the label right before its public suffix
///
/// `m.facebook.com` → `facebook`, `www.google.co.uk` → `google`. Two-letter
/// country suffixes preceded by a generic label (`co.uk`, `com.au`) count as
/// one suffix.
fn site_name(host: &str) -> Option<&str> {
    let labels: Vec<&str> = host.split('.').filter(|l| !l.is_empty()).collect();
    match labels.as_slice() {
        [] | [_] => None,
        [.., name, second, tld]
            if tld.len() == 2 && COUNTRY_SECOND_LEVELS.contains(second) =>
        {
            Some(*name)
        }
        [.., name, _tld] => Some(*name),
    }
}

const COUNTRY_SECOND_LEVELS: [&str; 7] = ["co", "com", "net", "org", "gov", "ac", "edu"];

fn strip_www(host: &str) -> &str {
    host.strip_prefix("www.").unwrap_or(host)
}

/// Normalize a `utm_medium` value (case-insensitive)
///
/// Unknown values pass through lowercased.
pub fn normalize_medium(medium: &str) -> String {
    let lowered = medium.trim().to_lowercase();
    let normalized = match lowered.as_str() {
        "cpc" | "ppc" | "paidsearch" | "paid-search" | "paid_search" => "cpc",
        "display" | "cpm" | "banner" => "display",
        "social" | "social-network" | "social_network" | "sm" => "social",
        "email" | "e-mail" | "newsletter" => "email",
        _ => return lowered,
    };
    normalized.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(url: &str, referrer: &str) -> Channel {
        classify(url, referrer).channel
    }

    #[test]
    fn test_google_organic_referrer() {
        assert_eq!(
            channel("https://app.example.com/", "https://www.google.com/search?q=x"),
            Channel::new("google", "organic")
        );
    }

    #[test]
    fn test_utm_source_lowercased_with_normalized_medium() {
        assert_eq!(
            channel("https://app.example.com/?utm_source=Newsletter&utm_medium=email", ""),
            Channel::new("newsletter", "email")
        );
    }

    #[test]
    fn test_gclid_beats_utm_source() {
        let result = classify("https://app.example.com/?gclid=abc123&utm_source=facebook", "");
        assert_eq!(result.channel, Channel::new("google", "cpc"));
        assert_eq!(result.params.click_ids.gclid.as_deref(), Some("abc123"));
    }

    #[test]
    fn test_gclid_beats_fbclid() {
        assert_eq!(
            channel("/?fbclid=f1&gclid=g1", "https://facebook.com/"),
            Channel::new("google", "cpc")
        );
    }

    #[test]
    fn test_gbraid_counts_as_google_click() {
        let result = classify("/?wbraid=w1", "");
        assert_eq!(result.channel, Channel::new("google", "cpc"));
        assert!(result.params.click_ids.gclid.is_none());
    }

    #[test]
    fn test_fbclid_is_facebook_cpc() {
        assert_eq!(
            channel("https://app.example.com/?fbclid=xyz&utm_source=news", ""),
            Channel::new("facebook", "cpc")
        );
    }

    #[test]
    fn test_direct_when_nothing_present() {
        assert_eq!(channel("https://app.example.com/", ""), Channel::direct());
        assert_eq!(channel("", "   "), Channel::direct());
    }

    #[test]
    fn test_utm_without_medium_is_not_set() {
        assert_eq!(
            channel("/?utm_source=Partner", "https://www.google.com/"),
            Channel::new("partner", NOT_SET_MEDIUM)
        );
    }

    #[test]
    fn test_blank_utm_source_is_ignored() {
        assert_eq!(
            channel("/?utm_source=%20&utm_medium=cpc", "https://bing.com/"),
            Channel::new("bing", "organic")
        );
    }

    #[test]
    fn test_referrer_table() {
        let cases = [
            ("https://www.google.com/", "google", "organic"),
            ("https://www.google.co.uk/", "google", "organic"),
            ("https://m.facebook.com/", "facebook", "social"),
            ("https://fb.com/", "facebook", "social"),
            ("https://l.instagram.com/", "instagram", "social"),
            ("https://www.linkedin.com/feed", "linkedin", "social"),
            ("https://twitter.com/", "twitter", "social"),
            ("https://t.co/abc", "twitter", "social"),
            ("https://x.com/post/1", "twitter", "social"),
            ("https://www.youtube.com/watch?v=1", "youtube", "social"),
            ("https://www.tiktok.com/", "tiktok", "social"),
            ("https://www.bing.com/search?q=a", "bing", "organic"),
            ("https://search.yahoo.com/", "yahoo", "organic"),
            ("https://duckduckgo.com/", "duckduckgo", "organic"),
        ];
        for (referrer, source, medium) in cases {
            assert_eq!(
                channel("https://app.example.com/", referrer),
                Channel::new(source, medium),
                "referrer {}",
                referrer
            );
        }
    }

    #[test]
    fn test_unknown_referrer_is_referral_without_www() {
        assert_eq!(
            channel("https://app.example.com/", "https://www.partner-blog.org/post"),
            Channel::new("partner-blog.org", "referral")
        );
        assert_eq!(
            channel("https://app.example.com/", "https://news.site.io/"),
            Channel::new("news.site.io", "referral")
        );
    }

    #[test]
    fn test_malformed_referrer_is_direct() {
        assert_eq!(channel("https://app.example.com/", "not a url"), Channel::direct());
        assert_eq!(channel("https://app.example.com/", "http://"), Channel::direct());
    }

    #[test]
    fn test_same_host_referrer_is_referral() {
        assert_eq!(
            channel("https://app.example.com/landing", "https://app.example.com/blog"),
            Channel::new("app.example.com", "referral")
        );
        assert_eq!(
            channel("https://www.example.com/pricing", "https://www.example.com/home"),
            Channel::new("example.com", "referral")
        );
    }

    #[test]
    fn test_table_name_outside_site_label_is_referral() {
        assert_eq!(
            channel("/", "https://google.partner-site.io/"),
            Channel::new("google.partner-site.io", "referral")
        );
        assert_eq!(
            channel("/", "https://fb.agency.net/"),
            Channel::new("fb.agency.net", "referral")
        );
        assert_eq!(
            channel("/", "https://www.facebook.com.au/"),
            Channel::new("facebook", "social")
        );
    }

    #[test]
    fn test_medium_normalization_table() {
        let cases = [
            ("CPC", "cpc"),
            ("ppc", "cpc"),
            ("PaidSearch", "cpc"),
            ("paid-search", "cpc"),
            ("paid_search", "cpc"),
            ("display", "display"),
            ("CPM", "display"),
            ("banner", "display"),
            ("Social", "social"),
            ("social-network", "social"),
            ("social_network", "social"),
            ("sm", "social"),
            ("EMAIL", "email"),
            ("e-mail", "email"),
            ("newsletter", "email"),
            ("Affiliate", "affiliate"),
        ];
        for (input, expected) in cases {
            assert_eq!(normalize_medium(input), expected, "medium {}", input);
        }
    }

    #[test]
    fn test_landing_params_passthrough_and_fragment() {
        let params = LandingParams::parse(
            "https://app.example.com/x?utm_source=a&utm_campaign=Spring+Sale&utm_content=hero&utm_term=shoes#top",
        );
        assert_eq!(params.utm_campaign.as_deref(), Some("Spring Sale"));
        assert_eq!(params.utm_content.as_deref(), Some("hero"));
        assert_eq!(params.utm_term.as_deref(), Some("shoes"));
    }

    #[test]
    fn test_first_repeated_param_wins() {
        let params = LandingParams::parse("?utm_source=first&utm_source=second");
        assert_eq!(params.utm_source.as_deref(), Some("first"));
    }
}
