//! IP Record Model (C2): the canonical in-process representation of an
//! IPAM IP record, its JSON wire codec, and the address-family helper.

use std::net::IpAddr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// `family(addr)` result for an IPv4 address.
pub const AF_IPV4: &str = "ipv4";
/// `family(addr)` result for an IPv6 address (including IPv4-mapped).
pub const AF_IPV6: &str = "ipv6";

/// The remote custom field this controller installs on `ipam.ipaddress`
/// and uses to find a record for a given `DesiredIP` by its `metadata.uid`.
pub const UID_CUSTOM_FIELD_NAME: &str = "netbox_ip_controller_uid";

/// Classifies an address by family the way the wire form does: IPv4 is
/// `"ipv4"`, any IPv6 address — including an IPv4-mapped one, since it is
/// still represented as `IpAddr::V6` once parsed — is `"ipv6"`.
#[must_use]
pub fn family(addr: &IpAddr) -> &'static str {
    match addr {
        IpAddr::V4(_) => AF_IPV4,
        IpAddr::V6(_) => AF_IPV6,
    }
}

/// A NetBox tag as embedded on an IP address or returned by `/extras/tags/`.
///
/// The wire form permits a polymorphic `type` field on fuller tag
/// payloads (either a bare string or `{"value": ..., "label": ...}`); it
/// is accepted but not round-tripped, since this controller never writes
/// it back.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Tag {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub name: String,
    pub slug: String,
    #[serde(
        default,
        rename = "type",
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_polymorphic_type"
    )]
    pub kind: Option<String>,
}

impl Tag {
    #[must_use]
    pub fn named(name: impl Into<String>, slug: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            slug: slug.into(),
            kind: None,
        }
    }

    /// `{name, slug}` only, ignoring the registry-assigned `id` and the
    /// unused `kind` field — the comparison `changed_from` (§4.1 `changed`)
    /// needs, since a record built from a `NetBoxIP` spec never carries a
    /// tag `id` while a decoded remote record always does.
    fn value_key(&self) -> (&str, &str) {
        (&self.name, &self.slug)
    }
}

fn deserialize_polymorphic_type<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Poly {
        Scalar(String),
        Choice { value: String },
    }

    Ok(Option::<Poly>::deserialize(deserializer)?.map(|p| match p {
        Poly::Scalar(s) => s,
        Poly::Choice { value } => value,
    }))
}

/// Custom fields carried on an IP address record. Only the UID field this
/// controller owns is modeled; any other custom field present on the
/// remote record is ignored on decode and never written back, per §4.2.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomFields {
    #[serde(rename = "netbox_ip_controller_uid", default)]
    pub uid: String,
}

/// The remote custom-field descriptor installed once at startup by
/// `upsertUIDField` (C1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UidFieldDescriptor {
    pub name: String,
    pub object_types: Vec<String>,
    #[serde(rename = "type")]
    pub field_type: String,
    pub filter_logic: String,
    pub validation_regex: String,
    pub required: bool,
    pub weight: u32,
}

impl Default for UidFieldDescriptor {
    fn default() -> Self {
        Self {
            name: UID_CUSTOM_FIELD_NAME.to_string(),
            object_types: vec!["ipam.ipaddress".to_string()],
            field_type: "text".to_string(),
            filter_logic: "exact".to_string(),
            validation_regex: "^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$"
                .to_string(),
            required: false,
            weight: 100,
        }
    }
}

/// An IPAM IP record (C1/C2), keyed remotely by a registry-assigned
/// integer `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,

    #[serde(with = "address_cidr")]
    pub address: IpAddr,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub dns_name: String,

    #[serde(default)]
    pub tags: Vec<Tag>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    #[serde(default)]
    pub custom_fields: CustomFields,
}

impl Record {
    /// Structural equality over `{uid, dnsName, address, description,
    /// sorted(tags by name), customFields}`, ignoring the registry-assigned
    /// `id`, and treating empty/absent tag lists as equal (§4.1 `changed`).
    #[must_use]
    pub fn changed_from(&self, existing: &Record) -> bool {
        let mut ours: Vec<(&str, &str)> = self.tags.iter().map(Tag::value_key).collect();
        let mut theirs: Vec<(&str, &str)> = existing.tags.iter().map(Tag::value_key).collect();
        ours.sort_unstable();
        theirs.sort_unstable();

        self.custom_fields.uid != existing.custom_fields.uid
            || self.dns_name != existing.dns_name
            || self.address != existing.address
            || self.description != existing.description
            || ours != theirs
    }

    /// The address family of this record's address, as `"ipv4"`/`"ipv6"`.
    #[must_use]
    pub fn family(&self) -> &'static str {
        family(&self.address)
    }
}

/// Wire form for `address`: always CIDR-suffixed with a full-host mask.
/// Decoding accepts `addr/prefix` (any prefix) and keeps only the bare
/// address; encoding always emits `/32` (IPv4) or `/128` (IPv6).
mod address_cidr {
    use super::{family, AF_IPV4};
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};
    use std::net::IpAddr;

    pub fn serialize<S>(addr: &IpAddr, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mask = if family(addr) == AF_IPV4 { 32 } else { 128 };
        serializer.serialize_str(&format!("{addr}/{mask}"))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<IpAddr, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        let host = raw.split('/').next().unwrap_or(&raw);
        host.parse::<IpAddr>()
            .map_err(|e| D::Error::custom(format!("invalid address {raw:?}: {e}")))
    }
}

/// Parses a bare address, mapping failures to the `ValidationError` class
/// named in §7 rather than panicking.
///
/// # Errors
/// Returns [`crate::NetBoxError::Validation`] if `raw` is not a valid IPv4
/// or IPv6 address.
pub fn parse_address(raw: &str) -> Result<IpAddr, crate::NetBoxError> {
    raw.parse::<IpAddr>()
        .map_err(|e| crate::NetBoxError::Validation(format!("invalid address {raw:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipv4_round_trips_with_full_host_mask() {
        let record = Record {
            id: None,
            address: "192.168.0.1".parse().unwrap(),
            dns_name: "bar".into(),
            tags: vec![],
            description: String::new(),
            custom_fields: CustomFields::default(),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["address"], "192.168.0.1/32");
        let back: Record = serde_json::from_value(json).unwrap();
        assert_eq!(back.address, record.address);
    }

    #[test]
    fn ipv6_round_trips_with_full_host_mask() {
        let record = Record {
            id: None,
            address: "1:2::3".parse().unwrap(),
            dns_name: String::new(),
            tags: vec![],
            description: String::new(),
            custom_fields: CustomFields::default(),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["address"], "1:2::3/128");
        let back: Record = serde_json::from_value(json).unwrap();
        assert_eq!(back.address, record.address);
    }

    #[test]
    fn decode_accepts_arbitrary_prefix_and_keeps_bare_address() {
        let json = serde_json::json!({"address": "10.0.0.5/24"});
        let back: Record = serde_json::from_value(json).unwrap();
        assert_eq!(back.address, "10.0.0.5".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn uid_custom_field_round_trips() {
        let json = serde_json::json!({
            "address": "10.0.0.5/32",
            "custom_fields": {"netbox_ip_controller_uid": "abc-123", "unrelated": "ignored"},
        });
        let record: Record = serde_json::from_value(json).unwrap();
        assert_eq!(record.custom_fields.uid, "abc-123");
    }

    #[test]
    fn missing_uid_decodes_as_empty_string_not_error() {
        let json = serde_json::json!({"address": "10.0.0.5/32"});
        let record: Record = serde_json::from_value(json).unwrap();
        assert_eq!(record.custom_fields.uid, "");
    }

    #[test]
    fn family_classifies_ipv4_mapped_as_ipv6() {
        let addr: IpAddr = "::ffff:1.2.3.4".parse().unwrap();
        assert_eq!(family(&addr), AF_IPV6);
    }

    #[test]
    fn changed_ignores_id_and_tag_order() {
        let mut a = Record {
            id: Some(1),
            address: "10.0.0.1".parse().unwrap(),
            dns_name: "x".into(),
            tags: vec![Tag::named("a", "a"), Tag::named("b", "b")],
            description: String::new(),
            custom_fields: CustomFields::default(),
        };
        let mut b = a.clone();
        b.id = Some(2);
        b.tags = vec![Tag::named("b", "b"), Tag::named("a", "a")];
        assert!(!a.changed_from(&b));

        a.description = "changed".into();
        assert!(a.changed_from(&b));
    }

    #[test]
    fn changed_ignores_registry_assigned_tag_ids() {
        // `incoming` mirrors a record built from a NetBoxIP spec
        // (`Tag::named`, id always None); `existing` mirrors one decoded
        // from NetBox, where every embedded tag carries an id.
        let incoming = Record {
            id: None,
            address: "10.0.0.1".parse().unwrap(),
            dns_name: "x".into(),
            tags: vec![Tag::named("a", "a"), Tag::named("b", "b")],
            description: String::new(),
            custom_fields: CustomFields::default(),
        };
        let existing = Record {
            id: Some(7),
            tags: vec![
                Tag { id: Some(1), name: "a".into(), slug: "a".into(), kind: None },
                Tag { id: Some(2), name: "b".into(), slug: "b".into(), kind: None },
            ],
            ..incoming.clone()
        };
        assert!(!incoming.changed_from(&existing));
    }

    #[test]
    fn invalid_address_is_validation_error_not_panic() {
        let err = parse_address("not-an-ip").unwrap_err();
        assert!(matches!(err, crate::NetBoxError::Validation(_)));
    }

    #[test]
    fn polymorphic_tag_type_accepts_both_shapes() {
        let scalar: Tag = serde_json::from_value(
            serde_json::json!({"name": "a", "slug": "a", "type": "danger"}),
        )
        .unwrap();
        assert_eq!(scalar.kind.as_deref(), Some("danger"));

        let choice: Tag = serde_json::from_value(
            serde_json::json!({"name": "a", "slug": "a", "type": {"value": "danger", "label": "Danger"}}),
        )
        .unwrap();
        assert_eq!(choice.kind.as_deref(), Some("danger"));
    }
}
