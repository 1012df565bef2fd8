use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::text_enum;

//--------------------------------------       EventType       ---------------------------------------------------------
text_enum! {
    /// The kinds of business events that the engine converts into points.
    EventType {
        Visit => "VISIT",
        Purchase => "PURCHASE",
        Referral => "REFERRAL",
        Subscription => "SUBSCRIPTION",
        Retention => "RETENTION",
        Custom => "CUSTOM",
    }
}

text_enum! {
    SubscriptionType {
        Started => "STARTED",
        Renewed => "RENEWED",
        Cancelled => "CANCELLED",
        Upgraded => "UPGRADED",
        Downgraded => "DOWNGRADED",
    }
}

text_enum! {
    /// Which ledger activity counts towards a retention streak.
    StreakType {
        Visit => "VISIT",
        Purchase => "PURCHASE",
        /// Any earning activity counts.
        Mixed => "MIXED",
    }
}

//--------------------------------------     MembershipRef     ---------------------------------------------------------
/// A resolved reference to a membership. Exactly one lookup path is ever populated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MembershipRef {
    MembershipId(i64),
    Customer { customer_id: i64, tenant_id: i64 },
    QrCode(String),
}

/// The loose, caller-supplied form of a membership reference. The normalizer turns this into a [`MembershipRef`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMembershipRef {
    pub membership_id: Option<i64>,
    pub customer_id: Option<i64>,
    pub tenant_id: Option<i64>,
    pub qr_code: Option<String>,
}

//--------------------------------------    RawLoyaltyEvent    ---------------------------------------------------------
/// A partially populated inbound event, exactly as a caller (or a deserialized request body) supplies it.
///
/// Nothing here is trusted. The event normalizer validates every field and produces a [`LoyaltyEvent`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLoyaltyEvent {
    pub tenant_id: Option<i64>,
    pub event_type: Option<String>,
    pub source_event_id: Option<String>,
    /// Either an RFC 3339 string or a unix timestamp in milliseconds.
    pub occurred_at: Option<Value>,
    pub membership_ref: Option<RawMembershipRef>,
    pub payload: Option<Value>,
    pub correlation_id: Option<String>,
    pub created_by: Option<String>,
    pub metadata: Option<Value>,
}

impl RawLoyaltyEvent {
    pub fn new(tenant_id: i64, event_type: EventType, source_event_id: &str) -> Self {
        Self {
            tenant_id: Some(tenant_id),
            event_type: Some(event_type.to_string()),
            source_event_id: Some(source_event_id.to_string()),
            occurred_at: Some(Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true))),
            ..Default::default()
        }
    }

    pub fn for_membership(mut self, membership_id: i64) -> Self {
        self.membership_ref = Some(RawMembershipRef { membership_id: Some(membership_id), ..Default::default() });
        self
    }

    pub fn for_customer(mut self, customer_id: i64, tenant_id: i64) -> Self {
        self.membership_ref =
            Some(RawMembershipRef { customer_id: Some(customer_id), tenant_id: Some(tenant_id), ..Default::default() });
        self
    }

    pub fn for_qr_code<S: Into<String>>(mut self, qr_code: S) -> Self {
        self.membership_ref = Some(RawMembershipRef { qr_code: Some(qr_code.into()), ..Default::default() });
        self
    }

    pub fn with_occurred_at(mut self, occurred_at: DateTime<Utc>) -> Self {
        self.occurred_at = Some(Value::String(occurred_at.to_rfc3339_opts(SecondsFormat::Millis, true)));
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_correlation_id<S: Into<String>>(mut self, correlation_id: S) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_created_by<S: Into<String>>(mut self, created_by: S) -> Self {
        self.created_by = Some(created_by.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

//--------------------------------------       Payloads        ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseItem {
    pub sku: String,
    pub qty: i64,
    pub unit_price: f64,
    pub category_id: Option<i64>,
    pub category_name: Option<String>,
    pub product_name: Option<String>,
}

impl PurchaseItem {
    pub fn line_total(&self) -> f64 {
        self.unit_price * self.qty as f64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchasePayload {
    pub order_id: String,
    pub net_amount: f64,
    pub gross_amount: f64,
    pub currency: String,
    pub items: Vec<PurchaseItem>,
    pub payment_method: Option<String>,
    pub payment_status: Option<String>,
    pub store_id: Option<i64>,
    pub branch_id: Option<i64>,
    pub channel: Option<String>,
    pub metadata: Option<Map<String, Value>>,
}

impl PurchasePayload {
    /// The amount used for spend tracking: the net amount, or the gross amount when no net amount was recorded.
    pub fn spend_amount(&self) -> f64 {
        if self.net_amount > 0.0 {
            self.net_amount
        } else {
            self.gross_amount
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitPayload {
    pub store_id: Option<i64>,
    pub branch_id: Option<i64>,
    pub channel: Option<String>,
    pub visit_type: Option<String>,
    pub duration_minutes: Option<i64>,
    pub metadata: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferralPayload {
    pub referred_membership_id: i64,
    pub referral_code: Option<String>,
    pub first_purchase_completed: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionPayload {
    pub subscription_id: String,
    pub subscription_type: SubscriptionType,
    pub plan_id: Option<String>,
    pub plan_name: Option<String>,
    pub amount: Option<f64>,
    pub currency: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionPayload {
    pub streak_type: StreakType,
    pub streak_count: u32,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
}

/// A tenant-defined event. Everything except `customType` is kept as free-form attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomPayload {
    pub custom_type: String,
    pub attributes: Map<String, Value>,
}

impl CustomPayload {
    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    /// The flags carried by the payload, if any.
    pub fn flags(&self) -> Vec<String> {
        string_list(self.attributes.get("flags"))
    }

    /// The first numeric value found in the `amount`, `value` or `quantity` attributes.
    pub fn numeric_amount(&self) -> Option<f64> {
        ["amount", "value", "quantity"].iter().find_map(|k| self.attributes.get(*k).and_then(Value::as_f64))
    }
}

pub(crate) fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect(),
        _ => Vec::new(),
    }
}

/// The type-specific body of an event. The variant determines the event type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "eventType", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventPayload {
    Visit(VisitPayload),
    Purchase(PurchasePayload),
    Referral(ReferralPayload),
    Subscription(SubscriptionPayload),
    Retention(RetentionPayload),
    Custom(CustomPayload),
}

impl EventPayload {
    pub fn event_type(&self) -> EventType {
        match self {
            EventPayload::Visit(_) => EventType::Visit,
            EventPayload::Purchase(_) => EventType::Purchase,
            EventPayload::Referral(_) => EventType::Referral,
            EventPayload::Subscription(_) => EventType::Subscription,
            EventPayload::Retention(_) => EventType::Retention,
            EventPayload::Custom(_) => EventType::Custom,
        }
    }

    pub fn store_id(&self) -> Option<i64> {
        match self {
            EventPayload::Visit(v) => v.store_id,
            EventPayload::Purchase(p) => p.store_id,
            _ => None,
        }
    }

    pub fn branch_id(&self) -> Option<i64> {
        match self {
            EventPayload::Visit(v) => v.branch_id,
            EventPayload::Purchase(p) => p.branch_id,
            _ => None,
        }
    }

    pub fn channel(&self) -> Option<&str> {
        match self {
            EventPayload::Visit(v) => v.channel.as_deref(),
            EventPayload::Purchase(p) => p.channel.as_deref(),
            _ => None,
        }
    }
}

//--------------------------------------      LoyaltyEvent     ---------------------------------------------------------
/// A fully validated event. Only the event normalizer constructs these from caller input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoyaltyEvent {
    pub tenant_id: i64,
    pub source_event_id: String,
    pub occurred_at: DateTime<Utc>,
    pub membership_ref: MembershipRef,
    pub payload: EventPayload,
    pub correlation_id: Option<String>,
    pub created_by: Option<String>,
    pub metadata: Option<Map<String, Value>>,
}

impl LoyaltyEvent {
    pub fn event_type(&self) -> EventType {
        self.payload.event_type()
    }

    pub fn metadata_value(&self, key: &str) -> Option<&Value> {
        self.metadata.as_ref().and_then(|m| m.get(key))
    }
}
