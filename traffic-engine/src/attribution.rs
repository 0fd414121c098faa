//! First-touch attribution record

use crate::classifier::{Classification, ClickIds};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Captured attribution for one storage lifetime
///
/// Immutable once stored; a pre-existing record is never overwritten.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributionRecord {
    pub source: String,
    pub medium: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub campaign: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub term: Option<String>,
    #[serde(default, skip_serializing_if = "ClickIds::is_empty")]
    pub click_ids: ClickIds,
    pub landing_page: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referrer: Option<String>,
    pub captured_at: DateTime<Utc>,
}

impl AttributionRecord {
    pub fn from_classification(
        classification: Classification,
        landing_page: &str,
        referrer: &str,
        captured_at: DateTime<Utc>,
    ) -> Self {
        let Classification { channel, params } = classification;
        let referrer = referrer.trim();
        Self {
            source: channel.source,
            medium: channel.medium,
            campaign: params.utm_campaign,
            content: params.utm_content,
            term: params.utm_term,
            click_ids: params.click_ids,
            landing_page: landing_page.to_string(),
            referrer: (!referrer.is_empty()).then(|| referrer.to_string()),
            captured_at,
        }
    }
}

/// Wire shape accepted by the attribution-ingest endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributionPayload {
    pub traffic_source: String,
    pub traffic_medium: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traffic_campaign: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traffic_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traffic_term: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gclid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fbclid: Option<String>,
}

impl From<&AttributionRecord> for AttributionPayload {
    fn from(record: &AttributionRecord) -> Self {
        Self {
            traffic_source: record.source.clone(),
            traffic_medium: record.medium.clone(),
            traffic_campaign: record.campaign.clone(),
            traffic_content: record.content.clone(),
            traffic_term: record.term.clone(),
            gclid: record.click_ids.gclid.clone(),
            fbclid: record.click_ids.fbclid.clone(),
        }
    }
}
