//! Turns caller-supplied [`RawLoyaltyEvent`]s into validated [`LoyaltyEvent`]s.
//!
//! Fields are checked in a fixed order (tenant, event type, source event id, timestamp, membership reference,
//! payload) and the first violation is reported. Nothing is returned for a partially valid event.
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Map, Value};

use crate::{
    db_types::{
        CustomPayload,
        EventPayload,
        EventType,
        LoyaltyEvent,
        MembershipRef,
        PurchaseItem,
        PurchasePayload,
        RawLoyaltyEvent,
        RawMembershipRef,
        ReferralPayload,
        RetentionPayload,
        StreakType,
        SubscriptionPayload,
        SubscriptionType,
        VisitPayload,
    },
    loyalty_api::errors::NormalizationError,
};

type NResult<T> = Result<T, NormalizationError>;

pub fn normalize_event(raw: RawLoyaltyEvent) -> NResult<LoyaltyEvent> {
    let tenant_id = match raw.tenant_id {
        Some(id) if id > 0 => id,
        Some(id) => return Err(NormalizationError::new("tenantId", format!("must be positive, got {id}"))),
        None => return Err(NormalizationError::new("tenantId", "is required")),
    };
    let event_type = raw
        .event_type
        .as_deref()
        .ok_or_else(|| NormalizationError::new("eventType", "is required"))?
        .trim()
        .parse::<EventType>()
        .map_err(|e| NormalizationError::new("eventType", e.to_string()))?;
    let source_event_id = match raw.source_event_id.as_deref().map(str::trim) {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => return Err(NormalizationError::new("sourceEventId", "is required and cannot be blank")),
    };
    let occurred_at = match &raw.occurred_at {
        Some(v) => parse_timestamp(v, "occurredAt")?,
        None => return Err(NormalizationError::new("occurredAt", "is required")),
    };
    let membership_ref = match &raw.membership_ref {
        Some(r) => normalize_membership_ref(r, tenant_id)?,
        None => return Err(NormalizationError::new("membershipRef", "is required")),
    };
    let payload = match &raw.payload {
        Some(v) => normalize_payload(event_type, v)?,
        None => return Err(NormalizationError::new("payload", "is required")),
    };
    let metadata = match raw.metadata {
        None | Some(Value::Null) => None,
        Some(Value::Object(m)) => Some(m),
        Some(_) => return Err(NormalizationError::new("metadata", "must be an object")),
    };
    Ok(LoyaltyEvent {
        tenant_id,
        source_event_id,
        occurred_at,
        membership_ref,
        payload,
        correlation_id: non_blank(raw.correlation_id),
        created_by: non_blank(raw.created_by),
        metadata,
    })
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Accepts RFC 3339 strings or unix timestamps in milliseconds.
pub(crate) fn parse_timestamp(value: &Value, field: &str) -> NResult<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| NormalizationError::new(field, format!("'{s}' is not a valid timestamp. {e}"))),
        Value::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .ok_or_else(|| NormalizationError::new(field, format!("{n} is not a valid timestamp"))),
        _ => Err(NormalizationError::new(field, "must be a timestamp")),
    }
}

fn normalize_membership_ref(raw: &RawMembershipRef, event_tenant: i64) -> NResult<MembershipRef> {
    let mut shapes = Vec::with_capacity(1);
    if let Some(id) = raw.membership_id {
        if id <= 0 {
            return Err(NormalizationError::new("membershipRef.membershipId", "must be positive"));
        }
        shapes.push(MembershipRef::MembershipId(id));
    }
    if let Some(customer_id) = raw.customer_id {
        let tenant_id = raw.tenant_id.ok_or_else(|| {
            NormalizationError::new("membershipRef.tenantId", "is required when customerId is given")
        })?;
        if tenant_id != event_tenant {
            return Err(NormalizationError::new(
                "membershipRef.tenantId",
                format!("{tenant_id} does not match the event tenant {event_tenant}"),
            ));
        }
        shapes.push(MembershipRef::Customer { customer_id, tenant_id });
    }
    if let Some(qr) = raw.qr_code.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
        shapes.push(MembershipRef::QrCode(qr.to_string()));
    }
    match shapes.len() {
        0 => Err(NormalizationError::new(
            "membershipRef",
            "must contain a membershipId, a customerId and tenantId, or a qrCode",
        )),
        1 => Ok(shapes.remove(0)),
        _ => Err(NormalizationError::new("membershipRef", "is ambiguous; supply exactly one lookup path")),
    }
}

fn normalize_payload(event_type: EventType, value: &Value) -> NResult<EventPayload> {
    let obj = value.as_object().ok_or_else(|| NormalizationError::new("payload", "must be an object"))?;
    let payload = match event_type {
        EventType::Purchase => EventPayload::Purchase(purchase(obj)?),
        EventType::Visit => EventPayload::Visit(visit(obj)?),
        EventType::Referral => EventPayload::Referral(referral(obj)?),
        EventType::Subscription => EventPayload::Subscription(subscription(obj)?),
        EventType::Retention => EventPayload::Retention(retention(obj)?),
        EventType::Custom => EventPayload::Custom(custom(obj)?),
    };
    Ok(payload)
}

//--------------------------------------    Field readers      ---------------------------------------------------------

struct Fields<'a> {
    obj: &'a Map<String, Value>,
    prefix: String,
}

impl<'a> Fields<'a> {
    fn new(obj: &'a Map<String, Value>, prefix: &str) -> Self {
        Self { obj, prefix: prefix.to_string() }
    }

    fn name(&self, key: &str) -> String {
        format!("{}.{key}", self.prefix)
    }

    fn err<T>(&self, key: &str, message: &str) -> NResult<T> {
        Err(NormalizationError::new(self.name(key), message))
    }

    fn get(&self, key: &str) -> Option<&'a Value> {
        self.obj.get(key).filter(|v| !v.is_null())
    }

    fn required_str(&self, key: &str) -> NResult<String> {
        match self.get(key) {
            Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.trim().to_string()),
            Some(Value::String(_)) => self.err(key, "cannot be blank"),
            Some(_) => self.err(key, "must be a string"),
            None => self.err(key, "is required"),
        }
    }

    fn optional_str(&self, key: &str) -> NResult<Option<String>> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.trim().to_string()).filter(|s| !s.is_empty())),
            Some(_) => self.err(key, "must be a string"),
        }
    }

    /// Identifiers that callers send either as text or as numbers.
    fn required_id_text(&self, key: &str) -> NResult<String> {
        match self.get(key) {
            Some(Value::Number(n)) => Ok(n.to_string()),
            Some(_) => self.required_str(key),
            None => self.err(key, "is required"),
        }
    }

    fn optional_id_text(&self, key: &str) -> NResult<Option<String>> {
        match self.get(key) {
            Some(Value::Number(n)) => Ok(Some(n.to_string())),
            _ => self.optional_str(key),
        }
    }

    fn required_amount(&self, key: &str) -> NResult<f64> {
        match self.optional_amount(key)? {
            Some(v) => Ok(v),
            None => self.err(key, "is required"),
        }
    }

    /// A finite, non-negative number.
    fn optional_amount(&self, key: &str) -> NResult<Option<f64>> {
        match self.get(key) {
            None => Ok(None),
            Some(v) => match v.as_f64() {
                Some(n) if n.is_finite() && n >= 0.0 => Ok(Some(n)),
                Some(_) => self.err(key, "cannot be negative"),
                None => self.err(key, "must be a number"),
            },
        }
    }

    fn optional_int(&self, key: &str) -> NResult<Option<i64>> {
        match self.get(key) {
            None => Ok(None),
            Some(v) => {
                v.as_i64().map(Some).ok_or_else(|| NormalizationError::new(self.name(key), "must be an integer"))
            },
        }
    }

    fn optional_positive_id(&self, key: &str) -> NResult<Option<i64>> {
        match self.optional_int(key)? {
            Some(id) if id <= 0 => self.err(key, "must be positive"),
            other => Ok(other),
        }
    }

    fn optional_bool(&self, key: &str) -> NResult<Option<bool>> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(_) => self.err(key, "must be a boolean"),
        }
    }

    fn optional_object(&self, key: &str) -> NResult<Option<Map<String, Value>>> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::Object(m)) => Ok(Some(m.clone())),
            Some(_) => self.err(key, "must be an object"),
        }
    }
}

//--------------------------------------   Payload variants    ---------------------------------------------------------

fn purchase(obj: &Map<String, Value>) -> NResult<PurchasePayload> {
    let f = Fields::new(obj, "payload");
    let order_id = f.required_id_text("orderId")?;
    let net_amount = f.required_amount("netAmount")?;
    let gross_amount = f.required_amount("grossAmount")?;
    let currency = f.required_str("currency")?;
    let items = match f.get("items") {
        Some(Value::Array(items)) => items
            .iter()
            .enumerate()
            .map(|(i, item)| purchase_item(i, item))
            .collect::<NResult<Vec<PurchaseItem>>>()?,
        Some(_) => return f.err("items", "must be an array"),
        None => return f.err("items", "is required"),
    };
    Ok(PurchasePayload {
        order_id,
        net_amount,
        gross_amount,
        currency,
        items,
        payment_method: f.optional_str("paymentMethod")?,
        payment_status: f.optional_str("paymentStatus")?,
        store_id: f.optional_positive_id("storeId")?,
        branch_id: f.optional_positive_id("branchId")?,
        channel: f.optional_str("channel")?,
        metadata: f.optional_object("metadata")?,
    })
}

fn purchase_item(index: usize, value: &Value) -> NResult<PurchaseItem> {
    let prefix = format!("payload.items[{index}]");
    let obj = value.as_object().ok_or_else(|| NormalizationError::new(prefix.clone(), "must be an object"))?;
    let f = Fields::new(obj, &prefix);
    let sku = f.required_id_text("sku")?;
    let qty = match f.optional_int("qty")? {
        Some(q) if q > 0 => q,
        Some(_) => return f.err("qty", "must be greater than zero"),
        None => return f.err("qty", "is required"),
    };
    let unit_price = f.required_amount("unitPrice")?;
    Ok(PurchaseItem {
        sku,
        qty,
        unit_price,
        category_id: f.optional_int("categoryId")?,
        category_name: f.optional_str("categoryName")?,
        product_name: f.optional_str("productName")?,
    })
}

fn visit(obj: &Map<String, Value>) -> NResult<VisitPayload> {
    let f = Fields::new(obj, "payload");
    let duration_minutes = match f.optional_int("durationMinutes")? {
        Some(d) if d < 0 => return f.err("durationMinutes", "cannot be negative"),
        other => other,
    };
    Ok(VisitPayload {
        store_id: f.optional_positive_id("storeId")?,
        branch_id: f.optional_positive_id("branchId")?,
        channel: f.optional_str("channel")?,
        visit_type: f.optional_str("visitType")?,
        duration_minutes,
        metadata: f.optional_object("metadata")?,
    })
}

fn referral(obj: &Map<String, Value>) -> NResult<ReferralPayload> {
    let f = Fields::new(obj, "payload");
    let referred_membership_id = match f.optional_positive_id("referredMembershipId")? {
        Some(id) => id,
        None => return f.err("referredMembershipId", "is required"),
    };
    Ok(ReferralPayload {
        referred_membership_id,
        referral_code: f.optional_str("referralCode")?,
        first_purchase_completed: f.optional_bool("firstPurchaseCompleted")?,
    })
}

fn subscription(obj: &Map<String, Value>) -> NResult<SubscriptionPayload> {
    let f = Fields::new(obj, "payload");
    let subscription_id = f.required_id_text("subscriptionId")?;
    let subscription_type = f
        .required_str("subscriptionType")?
        .parse::<SubscriptionType>()
        .map_err(|e| NormalizationError::new("payload.subscriptionType", e.to_string()))?;
    Ok(SubscriptionPayload {
        subscription_id,
        subscription_type,
        plan_id: f.optional_id_text("planId")?,
        plan_name: f.optional_str("planName")?,
        amount: f.optional_amount("amount")?,
        currency: f.optional_str("currency")?,
    })
}

fn retention(obj: &Map<String, Value>) -> NResult<RetentionPayload> {
    let f = Fields::new(obj, "payload");
    let streak_type = f
        .required_str("streakType")?
        .parse::<StreakType>()
        .map_err(|e| NormalizationError::new("payload.streakType", e.to_string()))?;
    let streak_count = match f.optional_int("streakCount")? {
        Some(c) if c > 0 => {
            u32::try_from(c).map_err(|_| NormalizationError::new("payload.streakCount", "is too large"))?
        },
        Some(_) => return f.err("streakCount", "must be greater than zero"),
        None => return f.err("streakCount", "is required"),
    };
    let period_start = match f.get("periodStart") {
        Some(v) => parse_timestamp(v, "payload.periodStart")?,
        None => return f.err("periodStart", "is required"),
    };
    let period_end = match f.get("periodEnd") {
        Some(v) => parse_timestamp(v, "payload.periodEnd")?,
        None => return f.err("periodEnd", "is required"),
    };
    if period_end < period_start {
        return f.err("periodEnd", "cannot be before periodStart");
    }
    Ok(RetentionPayload { streak_type, streak_count, period_start, period_end })
}

fn custom(obj: &Map<String, Value>) -> NResult<CustomPayload> {
    let f = Fields::new(obj, "payload");
    let custom_type = f.required_str("customType")?;
    let mut attributes = obj.clone();
    attributes.remove("customType");
    Ok(CustomPayload { custom_type, attributes })
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::*;

    fn purchase_event() -> RawLoyaltyEvent {
        RawLoyaltyEvent::new(1, EventType::Purchase, "ORD-1").for_membership(7).with_payload(json!({
            "orderId": "ORD-1",
            "netAmount": 100.0,
            "grossAmount": 116.0,
            "currency": "USD",
            "items": [{"sku": "LATTE", "qty": 2, "unitPrice": 50.0, "categoryId": 3}],
            "channel": "  ",
        }))
    }

    #[test]
    fn valid_purchase() {
        let event = normalize_event(purchase_event()).unwrap();
        assert_eq!(event.event_type(), EventType::Purchase);
        assert_eq!(event.membership_ref, MembershipRef::MembershipId(7));
        let EventPayload::Purchase(p) = event.payload else { panic!("Expected a purchase payload") };
        assert_eq!(p.items.len(), 1);
        assert_eq!(p.items[0].category_id, Some(3));
        assert_eq!(p.channel, None);
    }

    #[test]
    fn source_event_id_is_mandatory() {
        let mut raw = purchase_event();
        raw.source_event_id = Some("   ".into());
        let err = normalize_event(raw.clone()).unwrap_err();
        assert_eq!(err.field, "sourceEventId");
        raw.source_event_id = None;
        assert_eq!(normalize_event(raw).unwrap_err().field, "sourceEventId");
    }

    #[test]
    fn fields_are_checked_in_order() {
        let mut raw = purchase_event();
        raw.tenant_id = None;
        raw.source_event_id = None;
        assert_eq!(normalize_event(raw).unwrap_err().field, "tenantId");
        let mut raw = purchase_event();
        raw.event_type = Some("LOGIN".into());
        raw.payload = None;
        assert_eq!(normalize_event(raw).unwrap_err().field, "eventType");
    }

    #[test]
    fn bad_items_are_reported_by_index() {
        let raw = purchase_event().with_payload(json!({
            "orderId": 55,
            "netAmount": 10,
            "grossAmount": 10,
            "currency": "EUR",
            "items": [{"sku": "A", "qty": 1, "unitPrice": 1}, {"sku": "B", "qty": 0, "unitPrice": 1}],
        }));
        let err = normalize_event(raw).unwrap_err();
        assert_eq!(err.field, "payload.items[1].qty");
    }

    #[test]
    fn negative_amounts_are_rejected() {
        let raw = purchase_event().with_payload(json!({
            "orderId": "X", "netAmount": -1, "grossAmount": 10, "currency": "EUR", "items": []
        }));
        assert_eq!(normalize_event(raw).unwrap_err().field, "payload.netAmount");
    }

    #[test]
    fn membership_ref_shapes() {
        let raw = purchase_event().for_customer(100, 1);
        assert_eq!(normalize_event(raw).unwrap().membership_ref, MembershipRef::Customer {
            customer_id: 100,
            tenant_id: 1
        });
        let raw = purchase_event().for_customer(100, 2);
        assert_eq!(normalize_event(raw).unwrap_err().field, "membershipRef.tenantId");
        let mut raw = purchase_event();
        raw.membership_ref = Some(RawMembershipRef::default());
        assert_eq!(normalize_event(raw).unwrap_err().field, "membershipRef");
        let mut raw = purchase_event();
        raw.membership_ref =
            Some(RawMembershipRef { membership_id: Some(1), qr_code: Some("QR".into()), ..Default::default() });
        assert_eq!(normalize_event(raw).unwrap_err().field, "membershipRef");
        let raw = purchase_event().for_qr_code(" QR-9 ");
        assert_eq!(normalize_event(raw).unwrap().membership_ref, MembershipRef::QrCode("QR-9".into()));
    }

    #[test]
    fn timestamps_accept_millis() {
        let mut raw = purchase_event();
        raw.occurred_at = Some(json!(1_700_000_000_000i64));
        let event = normalize_event(raw).unwrap();
        assert_eq!(event.occurred_at.timestamp_millis(), 1_700_000_000_000);
        let mut raw = purchase_event();
        raw.occurred_at = Some(json!("yesterday"));
        assert_eq!(normalize_event(raw).unwrap_err().field, "occurredAt");
    }

    #[test]
    fn visit_subscription_retention_custom() {
        let visit = RawLoyaltyEvent::new(1, EventType::Visit, "V-1")
            .for_membership(1)
            .with_payload(json!({"storeId": 4, "channel": " app ", "durationMinutes": 12}));
        let EventPayload::Visit(v) = normalize_event(visit).unwrap().payload else { panic!("Expected a visit") };
        assert_eq!(v.channel.as_deref(), Some("app"));
        let bad_visit =
            RawLoyaltyEvent::new(1, EventType::Visit, "V-2").for_membership(1).with_payload(json!({"branchId": 0}));
        assert_eq!(normalize_event(bad_visit).unwrap_err().field, "payload.branchId");

        let sub = RawLoyaltyEvent::new(1, EventType::Subscription, "S-1")
            .for_membership(1)
            .with_payload(json!({"subscriptionId": 42, "subscriptionType": "RENEWED"}));
        let EventPayload::Subscription(s) = normalize_event(sub).unwrap().payload else { panic!("Expected a sub") };
        assert_eq!(s.subscription_id, "42");
        assert_eq!(s.subscription_type, SubscriptionType::Renewed);

        let ret = RawLoyaltyEvent::new(1, EventType::Retention, "R-1").for_membership(1).with_payload(json!({
            "streakType": "VISIT", "streakCount": 0,
            "periodStart": "2024-01-01T00:00:00Z", "periodEnd": "2024-01-31T00:00:00Z"
        }));
        assert_eq!(normalize_event(ret).unwrap_err().field, "payload.streakCount");

        let custom = RawLoyaltyEvent::new(1, EventType::Custom, "C-1")
            .for_membership(1)
            .with_payload(json!({"customType": "REVIEW", "stars": 5}));
        let EventPayload::Custom(c) = normalize_event(custom).unwrap().payload else { panic!("Expected custom") };
        assert_eq!(c.custom_type, "REVIEW");
        assert!(c.attribute("customType").is_none());
        assert_eq!(c.attribute("stars"), Some(&json!(5)));
        let blank = RawLoyaltyEvent::new(1, EventType::Custom, "C-2")
            .for_membership(1)
            .with_payload(json!({"customType": " "}));
        assert_eq!(normalize_event(blank).unwrap_err().field, "payload.customType");
    }
}
